//! 折线路径：离散化结果加上闭合标记，是渲染前的统一几何形式。

use crate::document::Entity;
use crate::flatten::{FlattenOptions, flatten};
use crate::geometry::Point2;

#[derive(Debug, Clone, PartialEq)]
pub struct Path {
    points: Vec<Point2>,
    closed: bool,
}

impl Path {
    /// 少于两个点的序列无法成线，返回 `None`。
    pub fn build(points: Vec<Point2>, closed: bool) -> Option<Self> {
        if points.len() < 2 {
            return None;
        }
        Some(Self { points, closed })
    }

    #[inline]
    pub fn points(&self) -> &[Point2] {
        &self.points
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    #[inline]
    pub fn point_count(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn is_finite(&self) -> bool {
        self.points.iter().all(|point| point.is_finite())
    }

    /// 对每个顶点应用变换，闭合标记保持不变。
    pub fn map_points<F>(&self, mut transform: F) -> Path
    where
        F: FnMut(Point2) -> Point2,
    {
        Path {
            points: self.points.iter().map(|point| transform(*point)).collect(),
            closed: self.closed,
        }
    }
}

/// 实体离散后是否闭合：圆与椭圆恒闭合，多段线与样条取自身标记。
pub fn closure_of(entity: &Entity) -> bool {
    match entity {
        Entity::Circle(_) | Entity::Ellipse(_) => true,
        Entity::Polyline(polyline) => polyline.is_closed,
        Entity::Spline(spline) => spline.is_closed,
        Entity::Line(_) | Entity::Arc(_) | Entity::Unknown(_) => false,
    }
}

pub fn path_for(entity: &Entity, options: &FlattenOptions) -> Option<Path> {
    Path::build(flatten(entity, options), closure_of(entity))
}
