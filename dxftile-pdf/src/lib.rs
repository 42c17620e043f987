//! 基于 `pdf-writer` 的 [`Canvas`] 实现。每页一个内容流，文件只在 `save()` 时写出。

use std::fs;
use std::path::{Path, PathBuf};

use dxftile_core::geometry::{Bounds2D, Point2};
use dxftile_engine::canvas::{Canvas, CanvasError, Font, Rgb};
use pdf_writer::{Content, Finish, Name, Pdf, Rect, Ref, Str, TextStr};
use tracing::{debug, info};

const CATALOG_ID: i32 = 1;
const PAGE_TREE_ID: i32 = 2;
const HELVETICA_ID: i32 = 3;
const INFO_ID: i32 = 4;
const FIRST_FREE_ID: i32 = 5;
const HELVETICA_RESOURCE: Name<'static> = Name(b"F1");
const PRODUCER: &str = "dxftile";

struct OpenPage {
    page_id: Ref,
    content_id: Ref,
    width: f64,
    height: f64,
    content: Content,
}

pub struct PdfCanvas {
    pdf: Pdf,
    output: PathBuf,
    title: Option<String>,
    next_ref: i32,
    page_ids: Vec<Ref>,
    current: Option<OpenPage>,
    saved: bool,
}

impl PdfCanvas {
    pub fn new(output: impl Into<PathBuf>) -> Self {
        let mut pdf = Pdf::new();
        pdf.catalog(Ref::new(CATALOG_ID)).pages(Ref::new(PAGE_TREE_ID));
        pdf.type1_font(Ref::new(HELVETICA_ID))
            .base_font(Name(Font::Helvetica.base_name().as_bytes()))
            .encoding_predefined(Name(b"WinAnsiEncoding"));

        Self {
            pdf,
            output: output.into(),
            title: None,
            next_ref: FIRST_FREE_ID,
            page_ids: Vec::new(),
            current: None,
            saved: false,
        }
    }

    /// 文档信息中的标题。
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    #[inline]
    pub fn output(&self) -> &Path {
        &self.output
    }

    #[inline]
    pub fn page_count(&self) -> usize {
        self.page_ids.len()
    }

    fn alloc_ref(&mut self) -> Ref {
        let id = Ref::new(self.next_ref);
        self.next_ref += 1;
        id
    }

    fn content(&mut self) -> Result<&mut Content, CanvasError> {
        self.current
            .as_mut()
            .map(|page| &mut page.content)
            .ok_or(CanvasError::NoOpenPage)
    }

    fn draw_beziers(&mut self, segments: &[[Point2; 4]], closed: bool) -> Result<(), CanvasError> {
        let content = self.content()?;
        let Some(first) = segments.first() else {
            return Ok(());
        };
        content.move_to(first[0].x() as f32, first[0].y() as f32);
        for [_, c1, c2, end] in segments {
            content.cubic_to(
                c1.x() as f32,
                c1.y() as f32,
                c2.x() as f32,
                c2.y() as f32,
                end.x() as f32,
                end.y() as f32,
            );
        }
        if closed {
            content.close_and_stroke();
        } else {
            content.stroke();
        }
        Ok(())
    }
}

impl Canvas for PdfCanvas {
    fn begin_page(&mut self, width: f64, height: f64) -> Result<(), CanvasError> {
        if self.current.is_some() {
            return Err(CanvasError::PageAlreadyOpen);
        }
        let page_id = self.alloc_ref();
        let content_id = self.alloc_ref();
        self.current = Some(OpenPage {
            page_id,
            content_id,
            width,
            height,
            content: Content::new(),
        });
        Ok(())
    }

    fn end_page(&mut self) -> Result<(), CanvasError> {
        let page = self.current.take().ok_or(CanvasError::NoOpenPage)?;
        let bytes = page.content.finish();
        self.pdf.stream(page.content_id, &bytes);

        let mut writer = self.pdf.page(page.page_id);
        writer
            .media_box(Rect::new(0.0, 0.0, page.width as f32, page.height as f32))
            .parent(Ref::new(PAGE_TREE_ID))
            .contents(page.content_id);
        writer.resources().fonts().pair(HELVETICA_RESOURCE, Ref::new(HELVETICA_ID));
        writer.finish();

        self.page_ids.push(page.page_id);
        debug!(page = self.page_ids.len(), bytes = bytes.len(), "PDF 页面写入完成");
        Ok(())
    }

    fn save_state(&mut self) -> Result<(), CanvasError> {
        self.content()?.save_state();
        Ok(())
    }

    fn restore_state(&mut self) -> Result<(), CanvasError> {
        self.content()?.restore_state();
        Ok(())
    }

    fn set_line_width(&mut self, width: f64) -> Result<(), CanvasError> {
        self.content()?.set_line_width(width as f32);
        Ok(())
    }

    fn set_stroke_color(&mut self, color: Rgb) -> Result<(), CanvasError> {
        self.content()?
            .set_stroke_rgb(color.r as f32, color.g as f32, color.b as f32);
        Ok(())
    }

    fn set_fill_color(&mut self, color: Rgb) -> Result<(), CanvasError> {
        self.content()?
            .set_fill_rgb(color.r as f32, color.g as f32, color.b as f32);
        Ok(())
    }

    fn line(&mut self, from: Point2, to: Point2) -> Result<(), CanvasError> {
        let content = self.content()?;
        content.move_to(from.x() as f32, from.y() as f32);
        content.line_to(to.x() as f32, to.y() as f32);
        content.stroke();
        Ok(())
    }

    fn circle(&mut self, center: Point2, radius: f64) -> Result<(), CanvasError> {
        let rect = Bounds2D::new(
            Point2::new(center.x() - radius, center.y() - radius),
            Point2::new(center.x() + radius, center.y() + radius),
        );
        let segments = arc_to_beziers(&rect, 0.0, 360.0);
        self.draw_beziers(&segments, true)
    }

    fn arc(&mut self, rect: Bounds2D, start_deg: f64, sweep_deg: f64) -> Result<(), CanvasError> {
        let segments = arc_to_beziers(&rect, start_deg, sweep_deg);
        self.draw_beziers(&segments, false)
    }

    fn path(&mut self, points: &[Point2], closed: bool) -> Result<(), CanvasError> {
        let content = self.content()?;
        let [first, rest @ ..] = points else {
            return Ok(());
        };
        if rest.is_empty() {
            return Ok(());
        }
        content.move_to(first.x() as f32, first.y() as f32);
        for point in rest {
            content.line_to(point.x() as f32, point.y() as f32);
        }
        if closed {
            content.close_and_stroke();
        } else {
            content.stroke();
        }
        Ok(())
    }

    fn text(
        &mut self,
        position: Point2,
        text: &str,
        font: Font,
        size: f64,
    ) -> Result<(), CanvasError> {
        let resource = match font {
            Font::Helvetica => HELVETICA_RESOURCE,
        };
        let encoded = encode_win_ansi(text);
        let content = self.content()?;
        content.begin_text();
        content.set_font(resource, size as f32);
        content.next_line(position.x() as f32, position.y() as f32);
        content.show(Str(&encoded));
        content.end_text();
        Ok(())
    }

    fn save(&mut self) -> Result<(), CanvasError> {
        if self.current.is_some() {
            return Err(CanvasError::PageStillOpen);
        }
        if self.saved {
            return Ok(());
        }

        self.pdf
            .pages(Ref::new(PAGE_TREE_ID))
            .kids(self.page_ids.iter().copied())
            .count(self.page_ids.len() as i32);
        {
            let mut info = self.pdf.document_info(Ref::new(INFO_ID));
            info.producer(TextStr(PRODUCER));
            if let Some(title) = &self.title {
                info.title(TextStr(title.as_str()));
            }
        }

        let pdf = std::mem::replace(&mut self.pdf, Pdf::new());
        let bytes = pdf.finish();
        fs::write(&self.output, &bytes).map_err(|source| CanvasError::Io {
            path: self.output.clone(),
            source,
        })?;
        self.saved = true;
        info!(
            path = %self.output.display(),
            pages = self.page_ids.len(),
            bytes = bytes.len(),
            "PDF 已保存"
        );
        Ok(())
    }
}

/// 将内切于 `rect` 的圆弧拆成若干不超过 90° 的三次 Bézier 段。
/// 每段为 `[起点, 控制点 1, 控制点 2, 终点]`。
pub fn arc_to_beziers(rect: &Bounds2D, start_deg: f64, sweep_deg: f64) -> Vec<[Point2; 4]> {
    if !sweep_deg.is_finite() || sweep_deg == 0.0 {
        return Vec::new();
    }
    let center = rect.center();
    let size = rect.size();
    let (rx, ry) = (size.x() * 0.5, size.y() * 0.5);

    let count = (sweep_deg.abs() / 90.0).ceil().max(1.0) as usize;
    let step = sweep_deg.to_radians() / count as f64;
    let k = 4.0 / 3.0 * (step / 4.0).tan();
    let point_at = |angle: f64| Point2::new(center.x() + rx * angle.cos(), center.y() + ry * angle.sin());
    let tangent_at = |angle: f64| (-rx * angle.sin(), ry * angle.cos());

    let start = start_deg.to_radians();
    (0..count)
        .map(|index| {
            let a0 = start + step * index as f64;
            let a1 = a0 + step;
            let p0 = point_at(a0);
            let p3 = point_at(a1);
            let (t0x, t0y) = tangent_at(a0);
            let (t1x, t1y) = tangent_at(a1);
            [
                p0,
                Point2::new(p0.x() + k * t0x, p0.y() + k * t0y),
                Point2::new(p3.x() - k * t1x, p3.y() - k * t1y),
                p3,
            ]
        })
        .collect()
}

/// 标准 14 字体只覆盖 Latin-1，其余字符替换为 `?`。
fn encode_win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|ch| match u32::from(ch) {
            code @ 0x20..=0x7E | code @ 0xA0..=0xFF => code as u8,
            _ => b'?',
        })
        .collect()
}
