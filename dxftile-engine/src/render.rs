//! 分页渲染：对每个网格页绘制标签与全部实体。

use std::collections::BTreeMap;

use dxftile_core::document::{Document, Entity};
use dxftile_core::flatten::FlattenOptions;
use dxftile_core::geometry::{Bounds2D, Point2};
use dxftile_core::path::{Path, path_for};
use tracing::{debug, info, warn};

use crate::canvas::{Canvas, Rgb};
use crate::errors::EngineError;
use crate::settings::PlotSettings;
use crate::tiling::{Tile, TileGrid, Transform, plan_tiles, transform_for};

/// 实体在图纸坐标中的可绘制形态。
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Line {
        start: Point2,
        end: Point2,
    },
    Circle {
        center: Point2,
        radius: f64,
    },
    Arc {
        center: Point2,
        radius: f64,
        start_deg: f64,
        sweep_deg: f64,
    },
    Path(Path),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// 不支持的实体类型。
    Unsupported(String),
    /// 字段缺失、无法解析或非有限值。
    Malformed(String),
    /// 零半径、零扫角或不足两个点。
    Degenerate,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EntityOutcome {
    Drawn(Shape),
    Skipped(SkipReason),
}

/// 将实体转换为可绘制形态。跳过的实体只计数，不会中断渲染。
pub fn shape_entity(entity: &Entity, options: &FlattenOptions) -> EntityOutcome {
    match entity {
        Entity::Line(line) => {
            if !line.start.is_finite() || !line.end.is_finite() {
                return malformed("LINE 端点坐标非有限值");
            }
            EntityOutcome::Drawn(Shape::Line {
                start: line.start,
                end: line.end,
            })
        }
        Entity::Circle(circle) => {
            if !circle.center.is_finite() || !circle.radius.is_finite() {
                return malformed("CIRCLE 圆心或半径非有限值");
            }
            if circle.radius <= 0.0 {
                return EntityOutcome::Skipped(SkipReason::Degenerate);
            }
            EntityOutcome::Drawn(Shape::Circle {
                center: circle.center,
                radius: circle.radius,
            })
        }
        Entity::Arc(arc) => {
            if !arc.center.is_finite()
                || !arc.radius.is_finite()
                || !arc.start_angle.is_finite()
                || !arc.end_angle.is_finite()
            {
                return malformed("ARC 圆心、半径或角度非有限值");
            }
            let sweep = arc.sweep();
            if arc.radius <= 0.0 || sweep <= 0.0 {
                return EntityOutcome::Skipped(SkipReason::Degenerate);
            }
            EntityOutcome::Drawn(Shape::Arc {
                center: arc.center,
                radius: arc.radius,
                start_deg: arc.start_angle.to_degrees(),
                sweep_deg: sweep.to_degrees(),
            })
        }
        Entity::Ellipse(_) | Entity::Polyline(_) | Entity::Spline(_) => {
            if !entity.is_finite() {
                return malformed(format!("{} 包含非有限坐标或参数", entity.kind_name()));
            }
            match path_for(entity, options) {
                Some(path) if path.is_finite() => EntityOutcome::Drawn(Shape::Path(path)),
                Some(_) => malformed(format!("{} 离散结果包含非有限坐标", entity.kind_name())),
                None => EntityOutcome::Skipped(SkipReason::Degenerate),
            }
        }
        Entity::Unknown(unknown) => match &unknown.defect {
            Some(defect) => EntityOutcome::Skipped(SkipReason::Malformed(defect.clone())),
            None => EntityOutcome::Skipped(SkipReason::Unsupported(unknown.kind.clone())),
        },
    }
}

fn malformed(message: impl Into<String>) -> EntityOutcome {
    EntityOutcome::Skipped(SkipReason::Malformed(message.into()))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SkipCounts {
    pub unsupported: usize,
    pub malformed: usize,
    pub degenerate: usize,
}

impl SkipCounts {
    pub fn record(&mut self, reason: &SkipReason) {
        match reason {
            SkipReason::Unsupported(_) => self.unsupported += 1,
            SkipReason::Malformed(_) => self.malformed += 1,
            SkipReason::Degenerate => self.degenerate += 1,
        }
    }

    #[inline]
    pub fn total(&self) -> usize {
        self.unsupported + self.malformed + self.degenerate
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageReport {
    pub page_number: usize,
    pub tile: Tile,
    pub label: String,
    pub processed: usize,
    pub drawn: usize,
    pub skipped: SkipCounts,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderReport {
    pub extents: Bounds2D,
    pub grid: TileGrid,
    /// 按实体类型统计的数量。
    pub kind_counts: BTreeMap<String, usize>,
    pub pages: Vec<PageReport>,
}

impl RenderReport {
    #[inline]
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn drawn_total(&self) -> usize {
        self.pages.iter().map(|page| page.drawn).sum()
    }
}

/// 单页的生命周期状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    Opened,
    Labeled,
    EntitiesDrawn,
    Closed,
}

/// 管理单页的状态迁移：Opened → Labeled → EntitiesDrawn → Closed。
struct PageSession<'a, C: Canvas + ?Sized> {
    canvas: &'a mut C,
    page_number: usize,
    state: PageState,
}

impl<'a, C: Canvas + ?Sized> PageSession<'a, C> {
    fn open(
        canvas: &'a mut C,
        page_number: usize,
        settings: &PlotSettings,
    ) -> Result<Self, EngineError> {
        let (width, height) = settings.page_size_points();
        canvas.begin_page(width, height)?;
        canvas.save_state()?;
        canvas.set_line_width(settings.line_width)?;
        canvas.set_stroke_color(Rgb::BLACK)?;
        canvas.set_fill_color(Rgb::BLACK)?;
        Ok(Self {
            canvas,
            page_number,
            state: PageState::Opened,
        })
    }

    fn expect(&self, expected: PageState) -> Result<(), EngineError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(EngineError::UnexpectedPageState {
                page: self.page_number,
                expected,
                actual: self.state,
            })
        }
    }

    fn label(&mut self, lines: &[(Point2, String)], settings: &PlotSettings) -> Result<(), EngineError> {
        self.expect(PageState::Opened)?;
        let style = &settings.label;
        self.canvas.set_fill_color(style.color)?;
        for (position, text) in lines {
            self.canvas
                .text(*position, text, style.font, style.font_size)?;
        }
        self.canvas.set_fill_color(Rgb::BLACK)?;
        self.state = PageState::Labeled;
        Ok(())
    }

    fn draw_entities(
        &mut self,
        outcomes: &[EntityOutcome],
        transform: &Transform,
    ) -> Result<(usize, SkipCounts), EngineError> {
        self.expect(PageState::Labeled)?;
        let mut drawn = 0;
        let mut skipped = SkipCounts::default();
        for outcome in outcomes {
            match outcome {
                EntityOutcome::Drawn(shape) => {
                    draw_shape(&mut *self.canvas, shape, transform)?;
                    drawn += 1;
                }
                EntityOutcome::Skipped(reason) => skipped.record(reason),
            }
        }
        self.state = PageState::EntitiesDrawn;
        Ok((drawn, skipped))
    }

    fn close(mut self) -> Result<(), EngineError> {
        self.expect(PageState::EntitiesDrawn)?;
        self.canvas.restore_state()?;
        self.canvas.end_page()?;
        self.state = PageState::Closed;
        Ok(())
    }
}

fn draw_shape<C: Canvas + ?Sized>(
    canvas: &mut C,
    shape: &Shape,
    transform: &Transform,
) -> Result<(), EngineError> {
    match shape {
        Shape::Line { start, end } => {
            canvas.line(transform.apply(*start), transform.apply(*end))?;
        }
        Shape::Circle { center, radius } => {
            canvas.circle(transform.apply(*center), transform.apply_length(*radius))?;
        }
        Shape::Arc {
            center,
            radius,
            start_deg,
            sweep_deg,
        } => {
            let center = transform.apply(*center);
            let radius = transform.apply_length(*radius);
            let rect = Bounds2D::new(
                Point2::new(center.x() - radius, center.y() - radius),
                Point2::new(center.x() + radius, center.y() + radius),
            );
            canvas.arc(rect, *start_deg, *sweep_deg)?;
        }
        Shape::Path(path) => {
            let mapped = transform.apply_path(path);
            canvas.path(mapped.points(), mapped.is_closed())?;
        }
    }
    Ok(())
}

pub fn page_label(page_number: usize, total: usize, tile: Tile) -> String {
    format!(
        "Page {page_number}/{total} (X{}, Y{})",
        tile.column + 1,
        tile.row + 1
    )
}

pub fn file_label(source_name: &str) -> String {
    format!("File: {source_name} @ 1:1 Scale")
}

/// 以 1:1 比例将文档分页绘制到画布，完成后调用 `canvas.save()`。
///
/// 文档没有任何可绘制几何时返回 [`EngineError::EmptyDrawing`]，此时不会调用画布。
pub fn render_document<C: Canvas + ?Sized>(
    document: &Document,
    settings: &PlotSettings,
    source_name: &str,
    canvas: &mut C,
) -> Result<RenderReport, EngineError> {
    let extents = document.extents().ok_or(EngineError::EmptyDrawing)?;
    let grid = plan_tiles(&extents, settings.page_size)?;
    info!(
        min_x = extents.min().x(),
        min_y = extents.min().y(),
        max_x = extents.max().x(),
        max_y = extents.max().y(),
        columns = grid.columns(),
        rows = grid.rows(),
        "图纸范围与分页"
    );

    let mut kind_counts = BTreeMap::new();
    let outcomes: Vec<EntityOutcome> = document
        .entities()
        .map(|(id, entity)| {
            *kind_counts.entry(entity.kind_name().to_string()).or_insert(0) += 1;
            let outcome = shape_entity(entity, &settings.flatten);
            if let EntityOutcome::Skipped(reason) = &outcome {
                debug!(entity = id.get(), kind = entity.kind_name(), ?reason, "跳过实体");
            }
            outcome
        })
        .collect();

    let total = grid.tile_count();
    let (_, page_height) = settings.page_size_points();
    let margin = settings.label.margin_mm * settings.scale;
    let file_text = file_label(source_name);

    let mut pages = Vec::new();
    for tile in grid.tiles() {
        let page_number = grid.page_number(tile);
        let label = page_label(page_number, total, tile);
        let transform = transform_for(tile, &extents, settings.page_size, settings.scale);

        let mut session = PageSession::open(canvas, page_number, settings)?;
        session.label(
            &[
                (Point2::new(margin, margin), label.clone()),
                (Point2::new(margin, page_height - margin), file_text.clone()),
            ],
            settings,
        )?;
        let (drawn, skipped) = session.draw_entities(&outcomes, &transform)?;
        session.close()?;

        let processed = outcomes.len();
        if drawn == 0 && processed > 0 {
            warn!(page = page_number, processed, "页面未绘制任何实体");
        }
        debug!(page = page_number, total, drawn, skipped = skipped.total(), "页面完成");
        pages.push(PageReport {
            page_number,
            tile,
            label,
            processed,
            drawn,
            skipped,
        });
    }

    canvas.save()?;
    info!(pages = pages.len(), "渲染完成");

    Ok(RenderReport {
        extents,
        grid,
        kind_counts,
        pages,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::{DrawCommand, RecordingCanvas};
    use crate::settings::POINTS_PER_MM;
    use crate::tiling::PageSize;
    use dxftile_core::document::{Polyline, PolylineVertex, UnknownEntity};
    use dxftile_core::geometry::Vector2;

    fn commands_of<'a>(canvas: &'a RecordingCanvas, page: usize) -> &'a [DrawCommand] {
        &canvas.pages()[page].commands
    }

    #[test]
    fn single_line_round_trips_to_page_origin() {
        let mut doc = Document::new();
        doc.add_line(Point2::new(0.0, 0.0), Point2::new(10.0, 10.0));

        let mut canvas = RecordingCanvas::new();
        let report =
            render_document(&doc, &PlotSettings::default(), "line.dxf", &mut canvas).expect("render");

        assert_eq!(report.page_count(), 1);
        assert!(canvas.is_saved());
        let line = commands_of(&canvas, 0)
            .iter()
            .find_map(|command| match command {
                DrawCommand::Line { from, to } => Some((*from, *to)),
                _ => None,
            })
            .expect("line drawn");
        assert_eq!(line.0, Point2::new(0.0, 0.0));
        assert!((line.1.x() - 10.0 * POINTS_PER_MM).abs() < 1e-9);
        assert!((line.1.y() - 10.0 * POINTS_PER_MM).abs() < 1e-9);
    }

    #[test]
    fn pages_carry_locator_and_file_labels() {
        let mut doc = Document::new();
        doc.add_line(Point2::new(0.0, 0.0), Point2::new(2.5 * 297.0, 100.0));

        let mut canvas = RecordingCanvas::new();
        let report =
            render_document(&doc, &PlotSettings::default(), "wide.dxf", &mut canvas).expect("render");

        assert_eq!(report.page_count(), 3);
        assert_eq!(canvas.pages().len(), 3);
        let texts: Vec<_> = canvas.pages()[1].texts().collect();
        assert_eq!(texts, vec!["Page 2/3 (X2, Y1)", "File: wide.dxf @ 1:1 Scale"]);
        assert_eq!(report.pages[2].label, "Page 3/3 (X3, Y1)");

        let margin = 5.0 * POINTS_PER_MM;
        let (_, height) = PlotSettings::default().page_size_points();
        let positions: Vec<_> = commands_of(&canvas, 0)
            .iter()
            .filter_map(|command| match command {
                DrawCommand::Text { position, size, .. } => Some((*position, *size)),
                _ => None,
            })
            .collect();
        assert_eq!(positions[0], (Point2::new(margin, margin), 8.0));
        assert_eq!(positions[1], (Point2::new(margin, height - margin), 8.0));
    }

    #[test]
    fn every_page_resets_drawing_state() {
        let mut doc = Document::new();
        doc.add_line(Point2::new(0.0, 0.0), Point2::new(700.0, 500.0));

        let settings = PlotSettings::default();
        let mut canvas = RecordingCanvas::new();
        render_document(&doc, &settings, "grid.dxf", &mut canvas).expect("render");

        for page in canvas.pages() {
            assert_eq!(
                &page.commands[..4],
                &[
                    DrawCommand::SaveState,
                    DrawCommand::LineWidth(settings.line_width),
                    DrawCommand::StrokeColor(Rgb::BLACK),
                    DrawCommand::FillColor(Rgb::BLACK),
                ]
            );
            assert_eq!(page.commands.last(), Some(&DrawCommand::RestoreState));
            let (width, height) = settings.page_size_points();
            assert!((page.width - width).abs() < 1e-9);
            assert!((page.height - height).abs() < 1e-9);
        }
    }

    #[test]
    fn rendering_is_idempotent() {
        let mut doc = Document::new();
        doc.add_line(Point2::new(-20.0, 3.0), Point2::new(400.0, 250.0));
        doc.add_circle(Point2::new(100.0, 100.0), 30.0);
        doc.add_arc(Point2::new(200.0, 50.0), 40.0, 0.5, 2.0);
        doc.add_ellipse(
            Point2::new(300.0, 200.0),
            Vector2::new(50.0, 10.0),
            0.4,
            0.0,
            0.0,
        );

        let settings = PlotSettings::default();
        let mut first_canvas = RecordingCanvas::new();
        let mut second_canvas = RecordingCanvas::new();
        let first = render_document(&doc, &settings, "a.dxf", &mut first_canvas).expect("first");
        let second = render_document(&doc, &settings, "a.dxf", &mut second_canvas).expect("second");

        assert_eq!(first, second);
        assert_eq!(first_canvas.pages(), second_canvas.pages());
    }

    #[test]
    fn skipped_entities_are_counted_by_reason() {
        let mut doc = Document::new();
        doc.add_line(Point2::new(0.0, 0.0), Point2::new(10.0, 0.0));
        doc.add_entity(Entity::Unknown(UnknownEntity::unsupported("TEXT")));
        doc.add_entity(Entity::Unknown(UnknownEntity::malformed("CIRCLE", "缺少半径")));
        doc.add_circle(Point2::new(1.0, 1.0), 0.0);
        doc.add_arc(Point2::new(1.0, 1.0), 2.0, 1.0, 1.0);

        let mut canvas = RecordingCanvas::new();
        let report =
            render_document(&doc, &PlotSettings::default(), "mixed.dxf", &mut canvas).expect("render");

        let page = &report.pages[0];
        assert_eq!(page.processed, 5);
        assert_eq!(page.drawn, 1);
        assert_eq!(
            page.skipped,
            SkipCounts {
                unsupported: 1,
                malformed: 1,
                degenerate: 2,
            }
        );
        assert_eq!(report.kind_counts.get("TEXT"), Some(&1));
        assert_eq!(report.kind_counts.get("CIRCLE"), Some(&2));
    }

    #[test]
    fn page_with_only_skipped_entities_reports_zero_drawn() {
        let mut doc = Document::new();
        doc.add_entity(Entity::Unknown(UnknownEntity::unsupported("TEXT")));
        doc.add_circle(Point2::new(10.0, 10.0), 0.0);
        doc.add_arc(Point2::new(10.0, 10.0), 5.0, 1.0, 1.0);

        let mut canvas = RecordingCanvas::new();
        let report =
            render_document(&doc, &PlotSettings::default(), "dots.dxf", &mut canvas).expect("render");

        assert_eq!(report.page_count(), 1);
        let page = &report.pages[0];
        assert_eq!(page.processed, 3);
        assert_eq!(page.drawn, 0);
        assert_eq!(page.skipped.unsupported, 1);
        assert_eq!(page.skipped.degenerate, 2);
        assert!(canvas.is_saved());
        let geometry = canvas.pages()[0].commands.iter().filter(|command| {
            matches!(
                command,
                DrawCommand::Line { .. }
                    | DrawCommand::Circle { .. }
                    | DrawCommand::Arc { .. }
                    | DrawCommand::Path { .. }
            )
        });
        assert_eq!(geometry.count(), 0);
    }

    #[test]
    fn non_finite_path_entities_are_malformed() {
        let options = FlattenOptions::default();
        let ellipse = Entity::Ellipse(dxftile_core::document::Ellipse {
            center: Point2::new(0.0, 0.0),
            major_axis: Vector2::new(3.0, 0.0),
            ratio: 0.5,
            start_parameter: f64::INFINITY,
            end_parameter: 0.0,
        });
        let polyline = Entity::Polyline(Polyline {
            vertices: vec![
                PolylineVertex::with_bulge(Point2::new(0.0, 0.0), f64::NAN),
                PolylineVertex::new(Point2::new(10.0, 0.0)),
            ],
            is_closed: false,
        });
        for entity in [ellipse, polyline] {
            assert!(matches!(
                shape_entity(&entity, &options),
                EntityOutcome::Skipped(SkipReason::Malformed(_))
            ));
        }
    }

    #[test]
    fn oversized_drawing_fails_without_touching_canvas() {
        let mut doc = Document::new();
        doc.add_line(Point2::new(0.0, 0.0), Point2::new(1e9, 1e9));

        let mut canvas = RecordingCanvas::new();
        let err = render_document(&doc, &PlotSettings::default(), "huge.dxf", &mut canvas)
            .expect_err("too many pages");
        assert!(matches!(err, EngineError::TooManyTiles { .. }));
        assert!(canvas.pages().is_empty());
        assert!(!canvas.is_saved());
    }

    #[test]
    fn empty_drawing_is_fatal_and_never_saves() {
        let mut doc = Document::new();
        doc.add_entity(Entity::Unknown(UnknownEntity::unsupported("INSERT")));

        let mut canvas = RecordingCanvas::new();
        let err = render_document(&doc, &PlotSettings::default(), "empty.dxf", &mut canvas)
            .expect_err("no geometry");
        assert!(matches!(err, EngineError::EmptyDrawing));
        assert!(canvas.pages().is_empty());
        assert!(!canvas.is_saved());
    }

    #[test]
    fn invalid_page_size_aborts_before_drawing() {
        let mut doc = Document::new();
        doc.add_line(Point2::new(0.0, 0.0), Point2::new(10.0, 0.0));
        let settings = PlotSettings::default().with_page_size(PageSize::new(0.0, 210.0));

        let mut canvas = RecordingCanvas::new();
        let err = render_document(&doc, &settings, "x.dxf", &mut canvas).expect_err("bad page");
        assert!(matches!(err, EngineError::InvalidPageSize { .. }));
        assert!(canvas.pages().is_empty());
    }

    #[test]
    fn arcs_are_drawn_with_forward_sweep() {
        let mut doc = Document::new();
        doc.add_arc(
            Point2::new(50.0, 50.0),
            10.0,
            350f64.to_radians(),
            10f64.to_radians(),
        );

        let mut canvas = RecordingCanvas::new();
        render_document(&doc, &PlotSettings::default(), "arc.dxf", &mut canvas).expect("render");
        let (start, sweep, rect) = commands_of(&canvas, 0)
            .iter()
            .find_map(|command| match command {
                DrawCommand::Arc {
                    rect,
                    start_deg,
                    sweep_deg,
                } => Some((*start_deg, *sweep_deg, *rect)),
                _ => None,
            })
            .expect("arc drawn");
        assert!((start - 350.0).abs() < 1e-9);
        assert!((sweep - 20.0).abs() < 1e-9);
        assert!((rect.size().x() - 20.0 * POINTS_PER_MM).abs() < 1e-9);
    }

    #[test]
    fn closed_shapes_keep_their_closure() {
        let mut doc = Document::new();
        doc.add_ellipse(
            Point2::new(0.0, 0.0),
            Vector2::new(20.0, 0.0),
            0.5,
            0.0,
            1.0,
        );
        doc.add_polyline(
            [
                Point2::new(0.0, 0.0),
                Point2::new(30.0, 0.0),
                Point2::new(30.0, 30.0),
            ],
            false,
        );

        let mut canvas = RecordingCanvas::new();
        render_document(&doc, &PlotSettings::default(), "paths.dxf", &mut canvas).expect("render");
        let closures: Vec<_> = commands_of(&canvas, 0)
            .iter()
            .filter_map(|command| match command {
                DrawCommand::Path { closed, .. } => Some(*closed),
                _ => None,
            })
            .collect();
        assert_eq!(closures, vec![true, false]);
    }

    #[test]
    fn page_session_rejects_out_of_order_transitions() {
        let settings = PlotSettings::default();
        let mut canvas = RecordingCanvas::new();
        let mut session = PageSession::open(&mut canvas, 1, &settings).expect("open");
        let transform = transform_for(
            Tile { column: 0, row: 0 },
            &Bounds2D::new(Point2::new(0.0, 0.0), Point2::new(1.0, 1.0)),
            settings.page_size,
            settings.scale,
        );
        let err = session
            .draw_entities(&[], &transform)
            .expect_err("drawing before labels");
        assert!(matches!(
            err,
            EngineError::UnexpectedPageState {
                expected: PageState::Labeled,
                actual: PageState::Opened,
                ..
            }
        ));
    }
}
