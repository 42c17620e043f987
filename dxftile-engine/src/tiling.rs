//! 分页规划与页面坐标变换。

use dxftile_core::geometry::{Bounds2D, Point2, Vector2};
use dxftile_core::path::Path;
use tracing::{debug, warn};

use crate::errors::EngineError;

/// 单次输出允许的最大页数，超出时在绘制任何页面之前报错。
pub const MAX_TILES: usize = 10_000;

/// 页面尺寸，单位毫米。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSize {
    pub width: f64,
    pub height: f64,
}

impl PageSize {
    pub const A4_LANDSCAPE: PageSize = PageSize {
        width: 297.0,
        height: 210.0,
    };

    #[inline]
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.width.is_finite() && self.height.is_finite() && self.width > 0.0 && self.height > 0.0
    }
}

/// 网格中的一页，`column` 从左到右、`row` 从下到上计数。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tile {
    pub column: usize,
    pub row: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileGrid {
    columns: usize,
    rows: usize,
    page_size: PageSize,
    degenerate: bool,
}

impl TileGrid {
    #[inline]
    pub fn columns(&self) -> usize {
        self.columns
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn page_size(&self) -> PageSize {
        self.page_size
    }

    /// 图纸在某个方向上尺寸为 0 时置位。
    #[inline]
    pub fn is_degenerate(&self) -> bool {
        self.degenerate
    }

    #[inline]
    pub fn tile_count(&self) -> usize {
        self.columns * self.rows
    }

    /// 按行优先顺序迭代：外层为行（自下而上），内层为列（自左向右）。
    pub fn tiles(&self) -> impl Iterator<Item = Tile> + '_ {
        (0..self.rows)
            .flat_map(move |row| (0..self.columns).map(move |column| Tile { column, row }))
    }

    /// 从 1 开始的页码。
    #[inline]
    pub fn page_number(&self, tile: Tile) -> usize {
        tile.row * self.columns + tile.column + 1
    }
}

/// 按页面尺寸将图纸范围划分为不重叠的网格，每个方向至少一页。
pub fn plan_tiles(bounds: &Bounds2D, page_size: PageSize) -> Result<TileGrid, EngineError> {
    if !page_size.is_valid() {
        return Err(EngineError::InvalidPageSize {
            width: page_size.width,
            height: page_size.height,
        });
    }

    let size = bounds.size();
    let (columns, flat_x) = tiles_along(size.x(), page_size.width);
    let (rows, flat_y) = tiles_along(size.y(), page_size.height);
    let degenerate = flat_x || flat_y;
    if degenerate {
        warn!(
            width = size.x(),
            height = size.y(),
            "图纸在某个方向上尺寸为 0，该方向按单页输出"
        );
    }

    match columns.checked_mul(rows) {
        Some(count) if count <= MAX_TILES => {}
        _ => {
            return Err(EngineError::TooManyTiles {
                columns,
                rows,
                limit: MAX_TILES,
            });
        }
    }

    debug!(columns, rows, "分页规划完成");
    Ok(TileGrid {
        columns,
        rows,
        page_size,
        degenerate,
    })
}

fn tiles_along(extent: f64, page: f64) -> (usize, bool) {
    if !(extent.is_finite() && extent > 0.0) {
        return (1, true);
    }
    // 超大比值在转换时饱和为 usize::MAX，由调用方的页数上限拦截
    let count = (extent / page).ceil() as usize;
    (count.max(1), false)
}

/// 页面左下角在图纸坐标中的位置。
pub fn tile_origin(tile: Tile, bounds: &Bounds2D, page_size: PageSize) -> Point2 {
    bounds.min().translate(Vector2::new(
        tile.column as f64 * page_size.width,
        tile.row as f64 * page_size.height,
    ))
}

pub fn transform_for(tile: Tile, bounds: &Bounds2D, page_size: PageSize, scale: f64) -> Transform {
    let origin = tile_origin(tile, bounds, page_size);
    Transform {
        scale,
        offset: Vector2::new(-(origin.x() * scale), -(origin.y() * scale)),
    }
}

/// 图纸坐标到页面坐标（PDF 点）的仿射变换：`page = drawing * scale + offset`。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    scale: f64,
    offset: Vector2,
}

impl Transform {
    #[inline]
    pub fn scale(&self) -> f64 {
        self.scale
    }

    #[inline]
    pub fn offset(&self) -> Vector2 {
        self.offset
    }

    #[inline]
    pub fn apply(&self, point: Point2) -> Point2 {
        Point2::new(
            point.x() * self.scale + self.offset.x(),
            point.y() * self.scale + self.offset.y(),
        )
    }

    #[inline]
    pub fn apply_length(&self, length: f64) -> f64 {
        length * self.scale
    }

    pub fn apply_path(&self, path: &Path) -> Path {
        path.map_points(|point| self.apply(point))
    }
}
