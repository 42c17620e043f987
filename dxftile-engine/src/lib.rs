pub mod canvas;
pub mod render;
pub mod tiling;

pub mod errors {
    use thiserror::Error;

    use crate::canvas::CanvasError;
    use crate::render::PageState;

    #[derive(Debug, Error)]
    pub enum EngineError {
        #[error("drawing contains no drawable geometry")]
        EmptyDrawing,
        #[error("invalid page size {width} x {height} mm")]
        InvalidPageSize { width: f64, height: f64 },
        #[error("drawing needs {columns} x {rows} pages, more than the limit of {limit}")]
        TooManyTiles {
            columns: usize,
            rows: usize,
            limit: usize,
        },
        #[error("page {page} is in state {actual:?}, expected {expected:?}")]
        UnexpectedPageState {
            page: usize,
            expected: PageState,
            actual: PageState,
        },
        #[error(transparent)]
        Canvas(#[from] CanvasError),
    }
}

pub mod settings {
    use dxftile_core::flatten::FlattenOptions;

    use crate::canvas::{Font, Rgb};
    use crate::tiling::PageSize;

    /// 1:1 输出的换算系数：每毫米对应的 PDF 点数。
    pub const POINTS_PER_MM: f64 = 72.0 / 25.4;
    pub const DEFAULT_LINE_WIDTH: f64 = 0.3;

    /// 页面定位标签的样式。
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct LabelStyle {
        pub font: Font,
        pub font_size: f64,
        pub margin_mm: f64,
        pub color: Rgb,
    }

    impl Default for LabelStyle {
        fn default() -> Self {
            Self {
                font: Font::Helvetica,
                font_size: 8.0,
                margin_mm: 5.0,
                color: Rgb::gray(0.5),
            }
        }
    }

    /// 一次输出过程的全部参数，在入口处构造后不再修改。
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct PlotSettings {
        pub page_size: PageSize,
        pub scale: f64,
        pub line_width: f64,
        pub flatten: FlattenOptions,
        pub label: LabelStyle,
    }

    impl Default for PlotSettings {
        fn default() -> Self {
            Self {
                page_size: PageSize::A4_LANDSCAPE,
                scale: POINTS_PER_MM,
                line_width: DEFAULT_LINE_WIDTH,
                flatten: FlattenOptions::default(),
                label: LabelStyle::default(),
            }
        }
    }

    impl PlotSettings {
        pub fn with_page_size(mut self, page_size: PageSize) -> Self {
            self.page_size = page_size;
            self
        }

        /// 页面尺寸（PDF 点）。
        #[inline]
        pub fn page_size_points(&self) -> (f64, f64) {
            (
                self.page_size.width * self.scale,
                self.page_size.height * self.scale,
            )
        }
    }
}
