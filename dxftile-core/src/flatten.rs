//! 曲线离散化：将圆弧、椭圆、凸度多段线与样条转换为折线顶点序列。
//!
//! 所有函数都是纯函数，输出点位于图纸坐标系。容差为折线与真实曲线之间
//! 允许的最大弦高误差（图纸单位）。

use std::f64::consts::{FRAC_PI_2, TAU};

use glam::{DVec2, DVec3};

use crate::document::{Arc, Circle, Ellipse, Entity, Polyline, Spline, arc_point};
use crate::geometry::{Point2, Vector2};

/// 渲染时的默认弦高容差（毫米）。
pub const DEFAULT_TOLERANCE: f64 = 0.1;
/// 计算范围时使用的更精细容差，保证范围贴合曲线真实极值。
pub const EXTENT_TOLERANCE: f64 = 0.01;
pub const DEFAULT_ELLIPSE_SEGMENTS: usize = 60;
pub const MIN_CIRCLE_SEGMENTS: usize = 16;
pub const MAX_ARC_SEGMENTS: usize = 4096;
const SEGMENTS_PER_SPAN: usize = 4;
const MAX_REFINE_DEPTH: u32 = 12;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlattenOptions {
    pub tolerance: f64,
    pub ellipse_segments: usize,
}

impl Default for FlattenOptions {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            ellipse_segments: DEFAULT_ELLIPSE_SEGMENTS,
        }
    }
}

impl FlattenOptions {
    pub fn with_tolerance(tolerance: f64) -> Self {
        Self {
            tolerance,
            ..Self::default()
        }
    }

    /// 非法容差回退到默认值。
    fn effective_tolerance(&self) -> f64 {
        sanitize_tolerance(self.tolerance)
    }
}

fn is_positive(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

fn sanitize_tolerance(tolerance: f64) -> f64 {
    if is_positive(tolerance) {
        tolerance
    } else {
        DEFAULT_TOLERANCE
    }
}

/// 将实体离散为顶点序列。直线返回两个端点；无可绘制几何的实体返回空序列。
pub fn flatten(entity: &Entity, options: &FlattenOptions) -> Vec<Point2> {
    let tolerance = options.effective_tolerance();
    match entity {
        Entity::Line(line) => vec![line.start, line.end],
        Entity::Circle(circle) => flatten_circle(circle, tolerance),
        Entity::Arc(arc) => flatten_arc(arc, tolerance),
        Entity::Ellipse(ellipse) => flatten_ellipse(ellipse, options.ellipse_segments),
        Entity::Polyline(polyline) => flatten_polyline(polyline, tolerance),
        Entity::Spline(spline) => flatten_spline(spline, tolerance),
        Entity::Unknown(_) => Vec::new(),
    }
}

/// 满足弦高容差所需的分段数。单段角度不超过 90°。
pub fn arc_segment_count(radius: f64, sweep: f64, tolerance: f64) -> usize {
    let radius = radius.abs();
    let sweep = sweep.abs();
    if radius <= f64::EPSILON || sweep <= f64::EPSILON {
        return 1;
    }
    let tolerance = sanitize_tolerance(tolerance);
    let step = if tolerance >= radius {
        FRAC_PI_2
    } else {
        (2.0 * (1.0 - tolerance / radius).acos()).min(FRAC_PI_2)
    };
    let count = (sweep / step).ceil() as usize;
    count.clamp(1, MAX_ARC_SEGMENTS)
}

/// 圆弧采样，返回 `n + 1` 个点（含两个端点）。`sweep` 带符号，负值为顺时针。
pub fn arc_points(
    center: Point2,
    radius: f64,
    start_angle: f64,
    sweep: f64,
    tolerance: f64,
) -> Vec<Point2> {
    let segments = arc_segment_count(radius, sweep, tolerance);
    (0..=segments)
        .map(|index| {
            let angle = start_angle + sweep * index as f64 / segments as f64;
            arc_point(center, radius, angle)
        })
        .collect()
}

pub fn flatten_arc(arc: &Arc, tolerance: f64) -> Vec<Point2> {
    let sweep = arc.sweep();
    if !is_positive(arc.radius) || sweep <= 0.0 || !arc.center.is_finite() {
        return Vec::new();
    }
    arc_points(arc.center, arc.radius, arc.start_angle, sweep, tolerance)
}

/// 整圆采样，至少 16 段；首尾点不重复，闭合由路径标记完成。
pub fn flatten_circle(circle: &Circle, tolerance: f64) -> Vec<Point2> {
    if !is_positive(circle.radius) || !circle.center.is_finite() {
        return Vec::new();
    }
    let segments = arc_segment_count(circle.radius, TAU, tolerance).max(MIN_CIRCLE_SEGMENTS);
    (0..segments)
        .map(|index| {
            let angle = TAU * index as f64 / segments as f64;
            arc_point(circle.center, circle.radius, angle)
        })
        .collect()
}

/// 椭圆按参数均匀采样。完整椭圆输出 `segments` 个点，部分椭圆输出 `segments + 1` 个点。
pub fn flatten_ellipse(ellipse: &Ellipse, segments: usize) -> Vec<Point2> {
    if ellipse.major_axis.length() <= f64::EPSILON
        || !is_positive(ellipse.ratio.abs())
        || !ellipse.center.is_finite()
    {
        return Vec::new();
    }
    let segments = segments.max(3);
    let start = ellipse.start_parameter.rem_euclid(TAU);
    let span = ellipse.parameter_span();
    let count = if ellipse.is_full() {
        segments
    } else {
        segments + 1
    };
    (0..count)
        .map(|index| ellipse.point_at(start + span * index as f64 / segments as f64))
        .collect()
}

/// 凸度多段线段对应的圆弧。凸度为 0 或端点重合时返回 `None`。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BulgeArc {
    pub center: Point2,
    pub radius: f64,
    pub start_angle: f64,
    /// 带符号扫角，`4 * atan(bulge)`。
    pub sweep: f64,
}

impl BulgeArc {
    pub fn from_segment(start: Point2, end: Point2, bulge: f64) -> Option<Self> {
        if !bulge.is_finite() || bulge.abs() <= 1e-12 {
            return None;
        }
        let chord = Vector2::from_points(start, end);
        let chord_length = chord.length();
        if chord_length <= f64::EPSILON {
            return None;
        }
        let sweep = 4.0 * bulge.atan();
        let half = sweep * 0.5;
        let radius = chord_length / (2.0 * half.sin().abs());
        let offset = (chord_length * 0.5) / half.tan();
        let normal = chord.perp().scale(1.0 / chord_length);
        let midpoint = Point2::from_vec((start.as_vec2() + end.as_vec2()) * 0.5);
        let center = midpoint.translate(normal.scale(offset));
        let start_vec = start.as_vec2() - center.as_vec2();
        Some(Self {
            center,
            radius,
            start_angle: start_vec.y.atan2(start_vec.x),
            sweep,
        })
    }
}

pub fn flatten_polyline(polyline: &Polyline, tolerance: f64) -> Vec<Point2> {
    let vertices = &polyline.vertices;
    let Some(first) = vertices.first() else {
        return Vec::new();
    };
    let mut points = vec![first.position];
    if vertices.len() < 2 {
        return points;
    }

    let segment_count = if polyline.is_closed {
        vertices.len()
    } else {
        vertices.len() - 1
    };
    for index in 0..segment_count {
        let from = &vertices[index];
        let to = &vertices[(index + 1) % vertices.len()];
        match BulgeArc::from_segment(from.position, to.position, from.bulge) {
            Some(arc) => {
                let samples = arc_points(arc.center, arc.radius, arc.start_angle, arc.sweep, tolerance);
                let last = samples.len() - 1;
                points.extend_from_slice(&samples[1..last]);
                points.push(to.position);
            }
            None => points.push(to.position),
        }
    }

    if polyline.is_closed && points.len() > 1 {
        // 闭合段回到首点，去掉重复点。
        points.pop();
    }
    points
}

/// 样条离散化：控制点足够时按 NURBS 求值，否则使用拟合点插值。
pub fn flatten_spline(spline: &Spline, tolerance: f64) -> Vec<Point2> {
    let tolerance = sanitize_tolerance(tolerance);
    if let Some(curve) = BSpline::from_spline(spline) {
        return curve.flatten(tolerance);
    }
    if spline.fit_points.len() >= 2 {
        return flatten_fit_points(&spline.fit_points, spline.is_closed, tolerance);
    }
    Vec::new()
}

/// 齐次坐标下的 B 样条，节点向量已校验。
struct BSpline {
    degree: usize,
    control_points: Vec<DVec3>,
    knots: Vec<f64>,
}

impl BSpline {
    fn from_spline(spline: &Spline) -> Option<Self> {
        let count = spline.control_points.len();
        if count < 2 || spline.control_points.iter().any(|point| !point.is_finite()) {
            return None;
        }

        let requested = if spline.degree >= 1 {
            spline.degree as usize
        } else {
            3
        };
        let degree = requested.min(count - 1);

        let use_weights = spline.weights.len() == count
            && spline
                .weights
                .iter()
                .all(|weight| weight.is_finite() && *weight > 0.0);
        let control_points = spline
            .control_points
            .iter()
            .enumerate()
            .map(|(index, point)| {
                let weight = if use_weights {
                    spline.weights[index]
                } else {
                    1.0
                };
                DVec3::new(point.x() * weight, point.y() * weight, weight)
            })
            .collect();

        let knots = if knots_are_valid(&spline.knot_values, count, degree) {
            spline.knot_values.clone()
        } else {
            clamped_uniform_knots(count, degree)
        };

        Some(Self {
            degree,
            control_points,
            knots,
        })
    }

    fn domain(&self) -> (f64, f64) {
        (
            self.knots[self.degree],
            self.knots[self.control_points.len()],
        )
    }

    fn span_index(&self, t: f64) -> usize {
        let p = self.degree;
        let n = self.control_points.len();
        for k in (p..n).rev() {
            if self.knots[k] <= t && self.knots[k] < self.knots[k + 1] {
                return k;
            }
        }
        p
    }

    /// de Boor 算法求值。
    fn evaluate(&self, t: f64) -> Point2 {
        let (start, end) = self.domain();
        let t = t.clamp(start, end);
        let p = self.degree;
        let k = self.span_index(t);

        let mut d: Vec<DVec3> = (0..=p)
            .map(|j| self.control_points[j + k - p])
            .collect();
        for r in 1..=p {
            for j in (r..=p).rev() {
                let i = j + k - p;
                let denominator = self.knots[i + p - r + 1] - self.knots[i];
                let alpha = if denominator.abs() <= f64::EPSILON {
                    0.0
                } else {
                    (t - self.knots[i]) / denominator
                };
                d[j] = d[j - 1] * (1.0 - alpha) + d[j] * alpha;
            }
        }

        let h = d[p];
        if h.z.abs() <= f64::EPSILON {
            Point2::new(h.x, h.y)
        } else {
            Point2::new(h.x / h.z, h.y / h.z)
        }
    }

    fn flatten(&self, tolerance: f64) -> Vec<Point2> {
        let (start, end) = self.domain();
        let mut breakpoints: Vec<f64> = self
            .knots
            .iter()
            .copied()
            .filter(|knot| *knot >= start && *knot <= end)
            .collect();
        breakpoints.dedup();

        let eval = |t: f64| self.evaluate(t);
        let mut points = vec![eval(start)];
        for pair in breakpoints.windows(2) {
            sample_span(&eval, pair[0], pair[1], tolerance, &mut points);
        }
        points
    }
}

fn knots_are_valid(knots: &[f64], count: usize, degree: usize) -> bool {
    if knots.len() != count + degree + 1 {
        return false;
    }
    if knots.iter().any(|knot| !knot.is_finite()) {
        return false;
    }
    if knots.windows(2).any(|pair| pair[1] < pair[0]) {
        return false;
    }
    knots[degree] < knots[count]
}

fn clamped_uniform_knots(count: usize, degree: usize) -> Vec<f64> {
    let interior = count - degree;
    let mut knots = Vec::with_capacity(count + degree + 1);
    knots.extend(std::iter::repeat_n(0.0, degree + 1));
    for index in 1..interior {
        knots.push(index as f64 / interior as f64);
    }
    knots.extend(std::iter::repeat_n(1.0, degree + 1));
    knots
}

/// 将 `[t0, t1]` 均分为若干段，再按弦高误差递归细分。
/// 起点不输出（调用方已写入），终点输出。
fn sample_span<F>(eval: &F, t0: f64, t1: f64, tolerance: f64, out: &mut Vec<Point2>)
where
    F: Fn(f64) -> Point2,
{
    let mut previous_t = t0;
    let mut previous = eval(t0);
    for piece in 1..=SEGMENTS_PER_SPAN {
        let t = t0 + (t1 - t0) * piece as f64 / SEGMENTS_PER_SPAN as f64;
        let point = eval(t);
        refine(eval, previous_t, t, previous, point, tolerance, 0, out);
        previous_t = t;
        previous = point;
    }
}

#[allow(clippy::too_many_arguments)]
fn refine<F>(
    eval: &F,
    t0: f64,
    t1: f64,
    p0: Point2,
    p1: Point2,
    tolerance: f64,
    depth: u32,
    out: &mut Vec<Point2>,
) where
    F: Fn(f64) -> Point2,
{
    let mid_t = (t0 + t1) * 0.5;
    let mid = eval(mid_t);
    if depth < MAX_REFINE_DEPTH && chord_distance(mid, p0, p1) > tolerance {
        refine(eval, t0, mid_t, p0, mid, tolerance, depth + 1, out);
        refine(eval, mid_t, t1, mid, p1, tolerance, depth + 1, out);
    } else {
        out.push(p1);
    }
}

fn chord_distance(point: Point2, start: Point2, end: Point2) -> f64 {
    let chord = end.as_vec2() - start.as_vec2();
    let length_squared = chord.length_squared();
    let offset = point.as_vec2() - start.as_vec2();
    if length_squared <= f64::EPSILON {
        return offset.length();
    }
    let t = (offset.dot(chord) / length_squared).clamp(0.0, 1.0);
    (offset - chord * t).length()
}

/// 通过拟合点的 Catmull-Rom 插值，曲线经过每个拟合点。
fn flatten_fit_points(fit_points: &[Point2], closed: bool, tolerance: f64) -> Vec<Point2> {
    let mut points: Vec<DVec2> = fit_points.iter().map(|point| point.as_vec2()).collect();
    if closed && points.len() > 2 {
        if let (Some(first), Some(last)) = (points.first(), points.last()) {
            if first.distance(*last) <= f64::EPSILON {
                points.pop();
            }
        }
    }
    let count = points.len();
    let segment_count = if closed { count } else { count - 1 };

    let mut out = vec![Point2::from_vec(points[0])];
    for index in 0..segment_count {
        let p1 = points[index];
        let p2 = points[(index + 1) % count];
        let (p0, p3) = if closed {
            (
                points[(index + count - 1) % count],
                points[(index + 2) % count],
            )
        } else {
            (
                points[index.saturating_sub(1)],
                points[(index + 2).min(count - 1)],
            )
        };
        let eval = |t: f64| Point2::from_vec(catmull_rom(p0, p1, p2, p3, t));
        sample_span(&eval, 0.0, 1.0, tolerance, &mut out);
        if let Some(last) = out.last_mut() {
            *last = Point2::from_vec(p2);
        }
    }

    if closed && out.len() > 1 {
        out.pop();
    }
    out
}

fn catmull_rom(p0: DVec2, p1: DVec2, p2: DVec2, p3: DVec2, t: f64) -> DVec2 {
    let t2 = t * t;
    let t3 = t2 * t;
    0.5 * (2.0 * p1
        + (p2 - p0) * t
        + (2.0 * p0 - 5.0 * p1 + 4.0 * p2 - p3) * t2
        + (3.0 * p1 - p0 - 3.0 * p2 + p3) * t3)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{PolylineVertex, UnknownEntity};
    use std::f64::consts::PI;

    fn cubic_spline() -> Spline {
        Spline {
            degree: 3,
            is_rational: false,
            is_closed: false,
            is_periodic: false,
            control_points: vec![
                Point2::new(0.0, 0.0),
                Point2::new(10.0, 40.0),
                Point2::new(30.0, -20.0),
                Point2::new(50.0, 10.0),
                Point2::new(60.0, 0.0),
            ],
            fit_points: vec![],
            knot_values: vec![0.0, 0.0, 0.0, 0.0, 0.5, 1.0, 1.0, 1.0, 1.0],
            weights: vec![],
        }
    }

    #[test]
    fn wrapping_arc_has_twenty_degree_sweep() {
        let arc = Arc {
            center: Point2::new(0.0, 0.0),
            radius: 10.0,
            start_angle: 350f64.to_radians(),
            end_angle: 10f64.to_radians(),
        };
        let points = flatten_arc(&arc, DEFAULT_TOLERANCE);
        assert!(points.len() >= 2);
        let first = points[0];
        let last = points[points.len() - 1];
        assert!((first.y() + 10.0 * 10f64.to_radians().sin()).abs() < 1e-9);
        assert!((last.y() - 10.0 * 10f64.to_radians().sin()).abs() < 1e-9);
        for point in &points {
            assert!(point.x() > 9.0, "arc went the long way round: {point:?}");
        }
    }

    #[test]
    fn arc_with_equal_angles_is_empty() {
        let arc = Arc {
            center: Point2::new(0.0, 0.0),
            radius: 10.0,
            start_angle: 1.0,
            end_angle: 1.0,
        };
        assert!(flatten_arc(&arc, DEFAULT_TOLERANCE).is_empty());
    }

    #[test]
    fn circle_has_minimum_segments_without_duplicate_end() {
        let circle = Circle {
            center: Point2::new(0.0, 0.0),
            radius: 1.0,
        };
        let points = flatten_circle(&circle, 10.0);
        assert_eq!(points.len(), MIN_CIRCLE_SEGMENTS);
        let first = points[0];
        let last = points[points.len() - 1];
        assert!(first.distance(last) > 1e-6);
    }

    #[test]
    fn arc_chord_error_respects_tolerance() {
        let radius = 100.0;
        let tolerance = 0.1;
        let points = arc_points(Point2::new(0.0, 0.0), radius, 0.0, PI, tolerance);
        for pair in points.windows(2) {
            let mid = (pair[0].as_vec2() + pair[1].as_vec2()) * 0.5;
            let sagitta = radius - mid.length();
            assert!(sagitta <= tolerance + 1e-9, "sagitta {sagitta}");
        }
    }

    #[test]
    fn full_ellipse_uses_configured_segments() {
        let ellipse = Ellipse {
            center: Point2::new(0.0, 0.0),
            major_axis: Vector2::new(10.0, 0.0),
            ratio: 0.5,
            start_parameter: 0.0,
            end_parameter: TAU,
        };
        let points = flatten_ellipse(&ellipse, DEFAULT_ELLIPSE_SEGMENTS);
        assert_eq!(points.len(), DEFAULT_ELLIPSE_SEGMENTS);
        assert!((points[0].x() - 10.0).abs() < 1e-9);

        let half = Ellipse {
            end_parameter: PI,
            ..ellipse
        };
        let points = flatten_ellipse(&half, DEFAULT_ELLIPSE_SEGMENTS);
        assert_eq!(points.len(), DEFAULT_ELLIPSE_SEGMENTS + 1);
        assert!((points[DEFAULT_ELLIPSE_SEGMENTS].x() + 10.0).abs() < 1e-9);
    }

    #[test]
    fn bulge_arc_passes_through_midpoint() {
        let arc = BulgeArc::from_segment(Point2::new(0.0, 0.0), Point2::new(10.0, 0.0), 1.0)
            .expect("semicircle");
        assert!((arc.radius - 5.0).abs() < 1e-9);
        assert!((arc.center.x() - 5.0).abs() < 1e-9);
        assert!(arc.center.y().abs() < 1e-9);

        let polyline = Polyline {
            vertices: vec![
                PolylineVertex::with_bulge(Point2::new(0.0, 0.0), 1.0),
                PolylineVertex::new(Point2::new(10.0, 0.0)),
            ],
            is_closed: false,
        };
        let tolerance = 0.01;
        let points = flatten_polyline(&polyline, tolerance);
        let center = Point2::new(5.0, 0.0);
        for point in &points {
            assert!((point.distance(center) - 5.0).abs() < 1e-9);
            assert!(point.y() <= 1e-9, "正凸度的圆弧应位于弦的下方");
        }
        let lowest = points.iter().map(|p| p.y()).fold(f64::INFINITY, f64::min);
        assert!((lowest + 5.0).abs() <= tolerance);
        assert_eq!(points[0], Point2::new(0.0, 0.0));
        assert_eq!(points[points.len() - 1], Point2::new(10.0, 0.0));
    }

    #[test]
    fn closed_polyline_drops_repeated_start() {
        let polyline = Polyline {
            vertices: vec![
                PolylineVertex::new(Point2::new(0.0, 0.0)),
                PolylineVertex::new(Point2::new(10.0, 0.0)),
                PolylineVertex::new(Point2::new(10.0, 10.0)),
            ],
            is_closed: true,
        };
        let points = flatten_polyline(&polyline, DEFAULT_TOLERANCE);
        assert_eq!(points.len(), 3);
    }

    #[test]
    fn clamped_spline_interpolates_end_control_points() {
        let spline = cubic_spline();
        let points = flatten_spline(&spline, DEFAULT_TOLERANCE);
        assert_eq!(points[0], Point2::new(0.0, 0.0));
        assert_eq!(points[points.len() - 1], Point2::new(60.0, 0.0));
    }

    #[test]
    fn tighter_tolerance_never_yields_fewer_points() {
        let spline = cubic_spline();
        let coarse = flatten_spline(&spline, 1.0);
        let medium = flatten_spline(&spline, 0.1);
        let fine = flatten_spline(&spline, 0.01);
        assert!(coarse.len() <= medium.len());
        assert!(medium.len() <= fine.len());
    }

    #[test]
    fn invalid_knots_fall_back_to_clamped_uniform() {
        let mut spline = cubic_spline();
        spline.knot_values = vec![1.0, 0.0, 3.0];
        let points = flatten_spline(&spline, DEFAULT_TOLERANCE);
        assert_eq!(points[0], Point2::new(0.0, 0.0));
        assert_eq!(points[points.len() - 1], Point2::new(60.0, 0.0));
    }

    #[test]
    fn fit_point_spline_passes_through_fit_points() {
        let fit_points = vec![
            Point2::new(0.0, 0.0),
            Point2::new(10.0, 5.0),
            Point2::new(20.0, -5.0),
            Point2::new(30.0, 0.0),
        ];
        let spline = Spline {
            degree: 3,
            is_rational: false,
            is_closed: false,
            is_periodic: false,
            control_points: vec![],
            fit_points: fit_points.clone(),
            knot_values: vec![],
            weights: vec![],
        };
        let points = flatten_spline(&spline, DEFAULT_TOLERANCE);
        for fit in &fit_points {
            assert!(points.contains(fit), "missing fit point {fit:?}");
        }
    }

    #[test]
    fn spline_without_geometry_is_empty() {
        let spline = Spline {
            degree: 3,
            is_rational: false,
            is_closed: false,
            is_periodic: false,
            control_points: vec![Point2::new(1.0, 1.0)],
            fit_points: vec![],
            knot_values: vec![],
            weights: vec![],
        };
        assert!(flatten_spline(&spline, DEFAULT_TOLERANCE).is_empty());
        let unknown = Entity::Unknown(UnknownEntity::unsupported("HATCH"));
        assert!(flatten(&unknown, &FlattenOptions::default()).is_empty());
    }

    #[test]
    fn rational_weights_pull_curve_toward_control_point() {
        let mut spline = Spline {
            degree: 2,
            is_rational: true,
            is_closed: false,
            is_periodic: false,
            control_points: vec![
                Point2::new(0.0, 0.0),
                Point2::new(5.0, 10.0),
                Point2::new(10.0, 0.0),
            ],
            fit_points: vec![],
            knot_values: vec![0.0, 0.0, 0.0, 1.0, 1.0, 1.0],
            weights: vec![1.0, 1.0, 1.0],
        };
        let flat = flatten_spline(&spline, 0.001);
        spline.weights = vec![1.0, 4.0, 1.0];
        let pulled = flatten_spline(&spline, 0.001);

        let peak = |points: &[Point2]| points.iter().map(|p| p.y()).fold(f64::MIN, f64::max);
        assert!(peak(&pulled) > peak(&flat));
    }
}
