pub mod flatten;
pub mod path;

pub mod geometry {
    use glam::DVec2;
    use serde::{Deserialize, Serialize};

    /// 二维点，内部以 `glam::DVec2` 表示。图纸空间单位为毫米，页面空间单位为 PDF 点。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Point2(pub DVec2);

    impl Point2 {
        #[inline]
        pub fn new(x: f64, y: f64) -> Self {
            Self(DVec2::new(x, y))
        }

        #[inline]
        pub fn from_vec(vec: DVec2) -> Self {
            Self(vec)
        }

        #[inline]
        pub fn x(self) -> f64 {
            self.0.x
        }

        #[inline]
        pub fn y(self) -> f64 {
            self.0.y
        }

        #[inline]
        pub fn translate(self, offset: Vector2) -> Self {
            Self(self.0 + offset.0)
        }

        #[inline]
        pub fn vector_to(self, other: Point2) -> Vector2 {
            Vector2(other.0 - self.0)
        }

        #[inline]
        pub fn distance(self, other: Point2) -> f64 {
            self.0.distance(other.0)
        }

        #[inline]
        pub fn is_finite(self) -> bool {
            self.0.is_finite()
        }

        #[inline]
        pub fn as_vec2(self) -> DVec2 {
            self.0
        }
    }

    impl From<DVec2> for Point2 {
        fn from(value: DVec2) -> Self {
            Self::from_vec(value)
        }
    }

    /// 二维向量。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Vector2(pub DVec2);

    impl Vector2 {
        #[inline]
        pub fn new(x: f64, y: f64) -> Self {
            Self(DVec2::new(x, y))
        }

        #[inline]
        pub fn from_points(start: Point2, end: Point2) -> Self {
            Self(end.0 - start.0)
        }

        #[inline]
        pub fn length(self) -> f64 {
            self.0.length()
        }

        #[inline]
        pub fn length_squared(self) -> f64 {
            self.0.length_squared()
        }

        /// 逆时针旋转 90° 得到的法向量（长度不变）。
        #[inline]
        pub fn perp(self) -> Self {
            Self(self.0.perp())
        }

        #[inline]
        pub fn scale(self, factor: f64) -> Self {
            Self(self.0 * factor)
        }

        #[inline]
        pub fn as_vec2(self) -> DVec2 {
            self.0
        }

        #[inline]
        pub fn x(self) -> f64 {
            self.0.x
        }

        #[inline]
        pub fn y(self) -> f64 {
            self.0.y
        }
    }

    impl From<DVec2> for Vector2 {
        fn from(value: DVec2) -> Self {
            Self(value)
        }
    }

    /// 轴对齐边界框，用于计算文档范围与分页。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Bounds2D {
        min: Point2,
        max: Point2,
    }

    impl Bounds2D {
        #[inline]
        pub fn new(min: Point2, max: Point2) -> Self {
            Self { min, max }
        }

        #[inline]
        pub fn empty() -> Self {
            Self {
                min: Point2::new(f64::INFINITY, f64::INFINITY),
                max: Point2::new(f64::NEG_INFINITY, f64::NEG_INFINITY),
            }
        }

        #[inline]
        pub fn is_empty(&self) -> bool {
            self.min.x() > self.max.x() || self.min.y() > self.max.y()
        }

        #[inline]
        pub fn is_finite(&self) -> bool {
            self.min.is_finite() && self.max.is_finite()
        }

        #[inline]
        pub fn min(&self) -> Point2 {
            self.min
        }

        #[inline]
        pub fn max(&self) -> Point2 {
            self.max
        }

        /// `max - min`；空范围时结果无意义。
        #[inline]
        pub fn size(&self) -> Vector2 {
            Vector2::from_points(self.min, self.max)
        }

        pub fn include_point(&mut self, point: Point2) {
            if self.is_empty() {
                self.min = point;
                self.max = point;
                return;
            }
            let min_vec = self.min.as_vec2().min(point.as_vec2());
            let max_vec = self.max.as_vec2().max(point.as_vec2());
            self.min = Point2::from_vec(min_vec);
            self.max = Point2::from_vec(max_vec);
        }

        pub fn include_bounds(&mut self, other: &Bounds2D) {
            if other.is_empty() {
                return;
            }
            self.include_point(other.min);
            self.include_point(other.max);
        }

        /// 判断点是否落在范围内，允许 `tolerance` 的外扩误差。
        pub fn contains(&self, point: Point2, tolerance: f64) -> bool {
            point.x() >= self.min.x() - tolerance
                && point.x() <= self.max.x() + tolerance
                && point.y() >= self.min.y() - tolerance
                && point.y() <= self.max.y() + tolerance
        }

        #[inline]
        pub fn center(&self) -> Point2 {
            debug_assert!(!self.is_empty());
            let center = (self.min.as_vec2() + self.max.as_vec2()) * 0.5;
            Point2::from_vec(center)
        }
    }
}

pub mod document {
    use std::f64::consts::{FRAC_PI_2, PI, TAU};

    use serde::{Deserialize, Serialize};

    use crate::flatten::{self, BulgeArc};
    use crate::geometry::{Bounds2D, Point2, Vector2};

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct EntityId(u64);

    impl EntityId {
        #[inline]
        pub fn new(raw: u64) -> Self {
            Self(raw)
        }

        /// 提供原始数值，便于日志输出。
        #[inline]
        pub fn get(self) -> u64 {
            self.0
        }
    }

    /// DXF 头部 `$INSUNITS` 记录的图纸单位。
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub enum DrawingUnits {
        Unitless,
        Inches,
        Feet,
        Millimeters,
        Centimeters,
        Meters,
        Other(i16),
    }

    impl DrawingUnits {
        pub fn from_code(code: i16) -> Self {
            match code {
                0 => DrawingUnits::Unitless,
                1 => DrawingUnits::Inches,
                2 => DrawingUnits::Feet,
                4 => DrawingUnits::Millimeters,
                5 => DrawingUnits::Centimeters,
                6 => DrawingUnits::Meters,
                other => DrawingUnits::Other(other),
            }
        }

        /// 1:1 输出按毫米解释坐标；无单位图纸同样按毫米处理。
        pub fn plots_as_millimeters(self) -> bool {
            matches!(self, DrawingUnits::Millimeters | DrawingUnits::Unitless)
        }

        pub fn describe(&self) -> &'static str {
            match self {
                DrawingUnits::Unitless => "unitless",
                DrawingUnits::Inches => "inches",
                DrawingUnits::Feet => "feet",
                DrawingUnits::Millimeters => "millimeters",
                DrawingUnits::Centimeters => "centimeters",
                DrawingUnits::Meters => "meters",
                DrawingUnits::Other(_) => "other",
            }
        }
    }

    /// 管线可识别的实体种类；其余 DXF 记录统一落入 `Unknown`。
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub enum Entity {
        Line(Line),
        Circle(Circle),
        Arc(Arc),
        Ellipse(Ellipse),
        Polyline(Polyline),
        Spline(Spline),
        Unknown(UnknownEntity),
    }

    impl Entity {
        /// DXF 风格的类型名，用于统计与日志。
        pub fn kind_name(&self) -> &str {
            match self {
                Entity::Line(_) => "LINE",
                Entity::Circle(_) => "CIRCLE",
                Entity::Arc(_) => "ARC",
                Entity::Ellipse(_) => "ELLIPSE",
                Entity::Polyline(_) => "POLYLINE",
                Entity::Spline(_) => "SPLINE",
                Entity::Unknown(unknown) => &unknown.kind,
            }
        }

        /// 定义几何的全部坐标与标量是否为有限值。样条的节点与权重另有回退规则，不在此检查。
        pub fn is_finite(&self) -> bool {
            match self {
                Entity::Line(line) => line.start.is_finite() && line.end.is_finite(),
                Entity::Circle(circle) => circle.center.is_finite() && circle.radius.is_finite(),
                Entity::Arc(arc) => {
                    arc.center.is_finite()
                        && arc.radius.is_finite()
                        && arc.start_angle.is_finite()
                        && arc.end_angle.is_finite()
                }
                Entity::Ellipse(ellipse) => {
                    ellipse.center.is_finite()
                        && ellipse.major_axis.x().is_finite()
                        && ellipse.major_axis.y().is_finite()
                        && ellipse.ratio.is_finite()
                        && ellipse.start_parameter.is_finite()
                        && ellipse.end_parameter.is_finite()
                }
                Entity::Polyline(polyline) => polyline
                    .vertices
                    .iter()
                    .all(|vertex| vertex.position.is_finite() && vertex.bulge.is_finite()),
                Entity::Spline(spline) => spline
                    .control_points
                    .iter()
                    .chain(spline.fit_points.iter())
                    .all(|point| point.is_finite()),
                Entity::Unknown(_) => true,
            }
        }

        /// 计算实体的紧致 2D 轴对齐范围。曲线取真实极值而非控制点范围。
        /// 无可计算几何或坐标非有限值时返回 `None`。
        pub fn bounds(&self) -> Option<Bounds2D> {
            if !self.is_finite() {
                return None;
            }
            let mut bounds = Bounds2D::empty();
            match self {
                Entity::Line(line) => {
                    bounds.include_point(line.start);
                    bounds.include_point(line.end);
                }
                Entity::Circle(circle) => {
                    let radius = circle.radius.abs();
                    let center = circle.center;
                    bounds.include_point(Point2::new(center.x() - radius, center.y() - radius));
                    bounds.include_point(Point2::new(center.x() + radius, center.y() + radius));
                }
                Entity::Arc(arc) => {
                    include_arc(
                        &mut bounds,
                        arc.center,
                        arc.radius,
                        arc.start_angle,
                        arc.sweep(),
                    );
                }
                Entity::Ellipse(ellipse) => {
                    include_ellipse(ellipse, &mut bounds);
                }
                Entity::Polyline(polyline) => {
                    polyline_bounds(polyline, &mut bounds);
                }
                Entity::Spline(spline) => {
                    for point in flatten::flatten_spline(spline, flatten::EXTENT_TOLERANCE) {
                        bounds.include_point(point);
                    }
                }
                Entity::Unknown(_) => {}
            }
            if bounds.is_empty() || !bounds.is_finite() {
                None
            } else {
                Some(bounds)
            }
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct Line {
        pub start: Point2,
        pub end: Point2,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct Circle {
        pub center: Point2,
        pub radius: f64,
    }

    /// 圆弧实体，角度以弧度储存，始终从起始角沿正方向扫到终止角。
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct Arc {
        pub center: Point2,
        pub radius: f64,
        pub start_angle: f64,
        pub end_angle: f64,
    }

    impl Arc {
        /// 正向扫角（弧度）。终止角数值小于起始角时补一整圈，
        /// 因此 350° → 10° 得到 20° 而不是 -340°。
        pub fn sweep(&self) -> f64 {
            let sweep = self.end_angle - self.start_angle;
            if sweep < 0.0 {
                sweep.rem_euclid(TAU)
            } else {
                sweep.min(TAU)
            }
        }

        #[inline]
        pub fn start_point(&self) -> Point2 {
            arc_point(self.center, self.radius, self.start_angle)
        }

        #[inline]
        pub fn end_point(&self) -> Point2 {
            arc_point(self.center, self.radius, self.start_angle + self.sweep())
        }
    }

    /// 椭圆实体，记录主轴向量与参数范围（单位为弧度）。
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct Ellipse {
        pub center: Point2,
        pub major_axis: Vector2,
        pub ratio: f64,
        pub start_parameter: f64,
        pub end_parameter: f64,
    }

    impl Ellipse {
        #[inline]
        pub fn minor_axis(&self) -> Vector2 {
            self.major_axis.perp().scale(self.ratio.abs())
        }

        /// 参数跨度，起止参数相同视为完整椭圆。
        pub fn parameter_span(&self) -> f64 {
            let mut span = self.end_parameter - self.start_parameter;
            if span < 0.0 {
                span = span.rem_euclid(TAU);
            }
            if span.abs() < 1e-9 {
                return TAU;
            }
            span.min(TAU)
        }

        #[inline]
        pub fn is_full(&self) -> bool {
            (self.parameter_span() - TAU).abs() < 1e-9
        }

        pub fn point_at(&self, parameter: f64) -> Point2 {
            let major = self.major_axis.as_vec2();
            let minor = self.minor_axis().as_vec2();
            let offset = major * parameter.cos() + minor * parameter.sin();
            self.center.translate(Vector2::from(offset))
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct Polyline {
        pub vertices: Vec<PolylineVertex>,
        pub is_closed: bool,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct PolylineVertex {
        pub position: Point2,
        pub bulge: f64,
    }

    impl PolylineVertex {
        #[inline]
        pub fn new(position: Point2) -> Self {
            Self {
                position,
                bulge: 0.0,
            }
        }

        #[inline]
        pub fn with_bulge(position: Point2, bulge: f64) -> Self {
            Self { position, bulge }
        }
    }

    /// 样条实体。有控制点时按 B 样条 / NURBS 求值，否则通过拟合点插值。
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct Spline {
        pub degree: i32,
        pub is_rational: bool,
        pub is_closed: bool,
        pub is_periodic: bool,
        pub control_points: Vec<Point2>,
        pub fit_points: Vec<Point2>,
        pub knot_values: Vec<f64>,
        pub weights: Vec<f64>,
    }

    /// 无法绘制的记录：不支持的类型，或字段缺失/损坏的已知类型。
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct UnknownEntity {
        pub kind: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub defect: Option<String>,
    }

    impl UnknownEntity {
        pub fn unsupported(kind: impl Into<String>) -> Self {
            Self {
                kind: kind.into(),
                defect: None,
            }
        }

        pub fn malformed(kind: impl Into<String>, defect: impl Into<String>) -> Self {
            Self {
                kind: kind.into(),
                defect: Some(defect.into()),
            }
        }
    }

    #[derive(Debug, Default, Clone, Serialize, Deserialize)]
    pub struct Document {
        entities: Vec<(EntityId, Entity)>,
        next_entity_id: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        units: Option<DrawingUnits>,
    }

    impl Document {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn add_line(&mut self, start: Point2, end: Point2) -> EntityId {
            self.add_entity(Entity::Line(Line { start, end }))
        }

        pub fn add_circle(&mut self, center: Point2, radius: f64) -> EntityId {
            self.add_entity(Entity::Circle(Circle { center, radius }))
        }

        pub fn add_arc(
            &mut self,
            center: Point2,
            radius: f64,
            start_angle: f64,
            end_angle: f64,
        ) -> EntityId {
            self.add_entity(Entity::Arc(Arc {
                center,
                radius,
                start_angle,
                end_angle,
            }))
        }

        pub fn add_ellipse(
            &mut self,
            center: Point2,
            major_axis: Vector2,
            ratio: f64,
            start_parameter: f64,
            end_parameter: f64,
        ) -> EntityId {
            self.add_entity(Entity::Ellipse(Ellipse {
                center,
                major_axis,
                ratio,
                start_parameter,
                end_parameter,
            }))
        }

        pub fn add_polyline<I>(&mut self, points: I, is_closed: bool) -> EntityId
        where
            I: IntoIterator<Item = Point2>,
        {
            self.add_polyline_with_vertices(points.into_iter().map(PolylineVertex::new), is_closed)
        }

        pub fn add_polyline_with_vertices<I>(&mut self, vertices: I, is_closed: bool) -> EntityId
        where
            I: IntoIterator<Item = PolylineVertex>,
        {
            self.add_entity(Entity::Polyline(Polyline {
                vertices: vertices.into_iter().collect(),
                is_closed,
            }))
        }

        pub fn add_entity(&mut self, entity: Entity) -> EntityId {
            let id = self.next_id();
            self.entities.push((id, entity));
            id
        }

        /// 按文档顺序迭代实体。
        #[inline]
        pub fn entities(&self) -> impl Iterator<Item = &(EntityId, Entity)> {
            self.entities.iter()
        }

        #[inline]
        pub fn len(&self) -> usize {
            self.entities.len()
        }

        #[inline]
        pub fn is_empty(&self) -> bool {
            self.entities.is_empty()
        }

        #[inline]
        pub fn entity(&self, id: EntityId) -> Option<&Entity> {
            self.entities
                .iter()
                .find_map(|(entity_id, entity)| (*entity_id == id).then_some(entity))
        }

        #[inline]
        pub fn entity_bounds(&self, id: EntityId) -> Option<Bounds2D> {
            self.entity(id).and_then(Entity::bounds)
        }

        #[inline]
        pub fn units(&self) -> Option<DrawingUnits> {
            self.units
        }

        #[inline]
        pub fn set_units(&mut self, units: DrawingUnits) {
            self.units = Some(units);
        }

        /// 文档整体范围：合并所有可计算几何的实体范围。
        /// 文档中没有任何可绘制几何时返回 `None`。
        pub fn extents(&self) -> Option<Bounds2D> {
            let mut bounds = Bounds2D::empty();
            let mut has = false;
            for (_, entity) in &self.entities {
                if let Some(entity_bounds) = entity.bounds() {
                    bounds.include_bounds(&entity_bounds);
                    has = true;
                }
            }
            if has { Some(bounds) } else { None }
        }

        #[inline]
        fn next_id(&mut self) -> EntityId {
            let id = self.next_entity_id;
            self.next_entity_id += 1;
            EntityId(id)
        }
    }

    fn normalize_angle(angle: f64) -> f64 {
        angle.rem_euclid(TAU)
    }

    pub(crate) fn arc_point(center: Point2, radius: f64, angle: f64) -> Point2 {
        let offset = Vector2::new(radius * angle.cos(), radius * angle.sin());
        center.translate(offset)
    }

    /// 将参数 `candidate` 平移整圈，使其落在 `[start, start + 2π)` 内。
    fn wrap_into(candidate: f64, start: f64) -> f64 {
        start + (candidate - start).rem_euclid(TAU)
    }

    /// 圆弧范围：端点 + 扫角范围内的四个象限点。`sweep` 可为负（顺时针）。
    fn include_arc(bounds: &mut Bounds2D, center: Point2, radius: f64, start: f64, sweep: f64) {
        let radius = radius.abs();
        if radius <= f64::EPSILON {
            bounds.include_point(center);
            return;
        }

        let (start, sweep) = if sweep < 0.0 {
            (start + sweep, -sweep)
        } else {
            (start, sweep)
        };
        let start = normalize_angle(start);
        let end = start + sweep.min(TAU);
        bounds.include_point(arc_point(center, radius, start));
        bounds.include_point(arc_point(center, radius, end));

        const QUADRANTS: [f64; 4] = [0.0, FRAC_PI_2, PI, FRAC_PI_2 * 3.0];
        for base in QUADRANTS {
            let candidate = wrap_into(base, start);
            if candidate <= end {
                bounds.include_point(arc_point(center, radius, candidate));
            }
        }
    }

    /// 椭圆范围：x(t)、y(t) 的解析极值点 + 参数区间端点。
    fn include_ellipse(ellipse: &Ellipse, bounds: &mut Bounds2D) {
        let major = ellipse.major_axis.as_vec2();
        if major.length() <= f64::EPSILON {
            bounds.include_point(ellipse.center);
            return;
        }
        let minor = ellipse.minor_axis().as_vec2();

        let start = normalize_angle(ellipse.start_parameter);
        let end = start + ellipse.parameter_span();
        bounds.include_point(ellipse.point_at(start));
        bounds.include_point(ellipse.point_at(end));

        let x_extreme = minor.x.atan2(major.x);
        let y_extreme = minor.y.atan2(major.y);
        for base in [x_extreme, x_extreme + PI, y_extreme, y_extreme + PI] {
            let candidate = wrap_into(base, start);
            if candidate <= end {
                bounds.include_point(ellipse.point_at(candidate));
            }
        }
    }

    fn polyline_bounds(polyline: &Polyline, bounds: &mut Bounds2D) {
        let vertices = &polyline.vertices;
        for vertex in vertices {
            bounds.include_point(vertex.position);
        }
        if vertices.len() < 2 {
            return;
        }
        let segment_count = if polyline.is_closed {
            vertices.len()
        } else {
            vertices.len() - 1
        };
        for index in 0..segment_count {
            let from = &vertices[index];
            let to = &vertices[(index + 1) % vertices.len()];
            if let Some(arc) = BulgeArc::from_segment(from.position, to.position, from.bulge) {
                include_arc(bounds, arc.center, arc.radius, arc.start_angle, arc.sweep);
            }
        }
    }

}
