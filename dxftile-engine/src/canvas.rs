//! 渲染输出端抽象。页面坐标单位为 PDF 点，原点位于页面左下角。

use std::path::PathBuf;

use dxftile_core::geometry::{Bounds2D, Point2};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rgb {
    pub r: f64,
    pub g: f64,
    pub b: f64,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb {
        r: 0.0,
        g: 0.0,
        b: 0.0,
    };

    #[inline]
    pub const fn new(r: f64, g: f64, b: f64) -> Self {
        Self { r, g, b }
    }

    #[inline]
    pub const fn gray(level: f64) -> Self {
        Self::new(level, level, level)
    }
}

/// 标签使用的标准字体。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Font {
    Helvetica,
}

impl Font {
    pub fn base_name(self) -> &'static str {
        match self {
            Font::Helvetica => "Helvetica",
        }
    }
}

#[derive(Debug, Error)]
pub enum CanvasError {
    #[error("a page is already open")]
    PageAlreadyOpen,
    #[error("no page is open")]
    NoOpenPage,
    #[error("cannot save while a page is still open")]
    PageStillOpen,
    #[error("failed to write output {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// 分页矢量输出端。绘图操作只在 `begin_page` 与 `end_page` 之间有效。
pub trait Canvas {
    fn begin_page(&mut self, width: f64, height: f64) -> Result<(), CanvasError>;
    fn end_page(&mut self) -> Result<(), CanvasError>;

    fn save_state(&mut self) -> Result<(), CanvasError>;
    fn restore_state(&mut self) -> Result<(), CanvasError>;
    fn set_line_width(&mut self, width: f64) -> Result<(), CanvasError>;
    fn set_stroke_color(&mut self, color: Rgb) -> Result<(), CanvasError>;
    fn set_fill_color(&mut self, color: Rgb) -> Result<(), CanvasError>;

    fn line(&mut self, from: Point2, to: Point2) -> Result<(), CanvasError>;
    fn circle(&mut self, center: Point2, radius: f64) -> Result<(), CanvasError>;
    /// 画内切于 `rect` 的圆弧，从 `start_deg` 起逆时针扫过 `sweep_deg`。
    fn arc(&mut self, rect: Bounds2D, start_deg: f64, sweep_deg: f64) -> Result<(), CanvasError>;
    fn path(&mut self, points: &[Point2], closed: bool) -> Result<(), CanvasError>;
    fn text(&mut self, position: Point2, text: &str, font: Font, size: f64)
    -> Result<(), CanvasError>;

    /// 完成整个文档。调用时不能有未关闭的页面。
    fn save(&mut self) -> Result<(), CanvasError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum DrawCommand {
    SaveState,
    RestoreState,
    LineWidth(f64),
    StrokeColor(Rgb),
    FillColor(Rgb),
    Line {
        from: Point2,
        to: Point2,
    },
    Circle {
        center: Point2,
        radius: f64,
    },
    Arc {
        rect: Bounds2D,
        start_deg: f64,
        sweep_deg: f64,
    },
    Path {
        points: Vec<Point2>,
        closed: bool,
    },
    Text {
        position: Point2,
        text: String,
        font: Font,
        size: f64,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedPage {
    pub width: f64,
    pub height: f64,
    pub commands: Vec<DrawCommand>,
}

impl RecordedPage {
    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.commands.iter().filter_map(|command| match command {
            DrawCommand::Text { text, .. } => Some(text.as_str()),
            _ => None,
        })
    }
}

/// 在内存中记录绘图指令，用于诊断与测试。
#[derive(Debug, Default, Clone)]
pub struct RecordingCanvas {
    pages: Vec<RecordedPage>,
    open: Option<RecordedPage>,
    saved: bool,
}

impl RecordingCanvas {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn pages(&self) -> &[RecordedPage] {
        &self.pages
    }

    #[inline]
    pub fn is_saved(&self) -> bool {
        self.saved
    }

    fn record(&mut self, command: DrawCommand) -> Result<(), CanvasError> {
        let page = self.open.as_mut().ok_or(CanvasError::NoOpenPage)?;
        page.commands.push(command);
        Ok(())
    }
}

impl Canvas for RecordingCanvas {
    fn begin_page(&mut self, width: f64, height: f64) -> Result<(), CanvasError> {
        if self.open.is_some() {
            return Err(CanvasError::PageAlreadyOpen);
        }
        self.open = Some(RecordedPage {
            width,
            height,
            commands: Vec::new(),
        });
        Ok(())
    }

    fn end_page(&mut self) -> Result<(), CanvasError> {
        let page = self.open.take().ok_or(CanvasError::NoOpenPage)?;
        self.pages.push(page);
        Ok(())
    }

    fn save_state(&mut self) -> Result<(), CanvasError> {
        self.record(DrawCommand::SaveState)
    }

    fn restore_state(&mut self) -> Result<(), CanvasError> {
        self.record(DrawCommand::RestoreState)
    }

    fn set_line_width(&mut self, width: f64) -> Result<(), CanvasError> {
        self.record(DrawCommand::LineWidth(width))
    }

    fn set_stroke_color(&mut self, color: Rgb) -> Result<(), CanvasError> {
        self.record(DrawCommand::StrokeColor(color))
    }

    fn set_fill_color(&mut self, color: Rgb) -> Result<(), CanvasError> {
        self.record(DrawCommand::FillColor(color))
    }

    fn line(&mut self, from: Point2, to: Point2) -> Result<(), CanvasError> {
        self.record(DrawCommand::Line { from, to })
    }

    fn circle(&mut self, center: Point2, radius: f64) -> Result<(), CanvasError> {
        self.record(DrawCommand::Circle { center, radius })
    }

    fn arc(&mut self, rect: Bounds2D, start_deg: f64, sweep_deg: f64) -> Result<(), CanvasError> {
        self.record(DrawCommand::Arc {
            rect,
            start_deg,
            sweep_deg,
        })
    }

    fn path(&mut self, points: &[Point2], closed: bool) -> Result<(), CanvasError> {
        self.record(DrawCommand::Path {
            points: points.to_vec(),
            closed,
        })
    }

    fn text(
        &mut self,
        position: Point2,
        text: &str,
        font: Font,
        size: f64,
    ) -> Result<(), CanvasError> {
        self.record(DrawCommand::Text {
            position,
            text: text.to_string(),
            font,
            size,
        })
    }

    fn save(&mut self) -> Result<(), CanvasError> {
        if self.open.is_some() {
            return Err(CanvasError::PageStillOpen);
        }
        self.saved = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drawing_requires_an_open_page() {
        let mut canvas = RecordingCanvas::new();
        let err = canvas
            .line(Point2::new(0.0, 0.0), Point2::new(1.0, 1.0))
            .expect_err("no page open");
        assert!(matches!(err, CanvasError::NoOpenPage));
        assert!(matches!(canvas.end_page(), Err(CanvasError::NoOpenPage)));
    }

    #[test]
    fn page_lifecycle_is_enforced() {
        let mut canvas = RecordingCanvas::new();
        canvas.begin_page(100.0, 50.0).expect("begin");
        assert!(matches!(
            canvas.begin_page(100.0, 50.0),
            Err(CanvasError::PageAlreadyOpen)
        ));
        assert!(matches!(canvas.save(), Err(CanvasError::PageStillOpen)));
        canvas
            .text(Point2::new(1.0, 2.0), "hello", Font::Helvetica, 8.0)
            .expect("text");
        canvas.end_page().expect("end");
        canvas.save().expect("save");

        assert!(canvas.is_saved());
        assert_eq!(canvas.pages().len(), 1);
        assert_eq!(canvas.pages()[0].texts().collect::<Vec<_>>(), vec!["hello"]);
    }
}
