use std::convert::TryFrom;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use dxftile_core::{
    document::{
        Arc, Circle, Document, DrawingUnits, Ellipse, Entity, Line, Polyline, PolylineVertex,
        Spline, UnknownEntity,
    },
    geometry::{Point2, Vector2},
};
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Debug, Error)]
pub enum IoError {
    #[error("input file {path:?} does not exist")]
    NotFound { path: PathBuf },
    #[error("failed to read file {path:?}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid document structure: {0}")]
    InvalidDocument(String),
}

pub trait DocumentLoader {
    fn load(&self, path: &Path) -> Result<Document, IoError>;
}

/// ASCII DXF 读取入口。
#[derive(Debug, Default, Clone, Copy)]
pub struct DxfFacade;

impl DxfFacade {
    pub fn new() -> Self {
        Self
    }

    /// 直接解析内存中的 DXF 文本。
    pub fn parse_str(&self, source: &str) -> Result<Document, IoError> {
        DxfParser::new(source).parse().map_err(|err| match err {
            DxfError::Structure { message } | DxfError::Entity { message } => {
                IoError::InvalidDocument(message)
            }
        })
    }
}

impl DocumentLoader for DxfFacade {
    fn load(&self, path: &Path) -> Result<Document, IoError> {
        let bytes = fs::read(path).map_err(|source| {
            if source.kind() == ErrorKind::NotFound {
                IoError::NotFound {
                    path: path.to_path_buf(),
                }
            } else {
                IoError::ReadError {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;
        // 旧版 DXF 常以本地代码页保存，非 UTF-8 字节按替换字符处理。
        let data = String::from_utf8_lossy(&bytes);
        let document = self.parse_str(&data)?;
        debug!(
            path = %path.display(),
            entities = document.len(),
            "DXF 读取完成"
        );
        Ok(document)
    }
}

/// 解析错误分两级：结构错误终止整个读取，实体错误只影响当前实体。
#[derive(Debug)]
enum DxfError {
    Structure { message: String },
    Entity { message: String },
}

impl DxfError {
    fn structure(message: impl Into<String>) -> Self {
        Self::Structure {
            message: message.into(),
        }
    }

    fn entity(message: impl Into<String>) -> Self {
        Self::Entity {
            message: message.into(),
        }
    }
}

struct DxfParser<'a> {
    reader: DxfReader<'a>,
}

impl<'a> DxfParser<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            reader: DxfReader::new(source),
        }
    }

    fn parse(mut self) -> Result<Document, DxfError> {
        let mut document = Document::new();
        while let Some((code, value)) = self.reader.next_pair()? {
            if code == 999 {
                continue;
            }
            if code != 0 {
                return Err(DxfError::structure(format!(
                    "意外的组码 {code}（期望 0 表示 SECTION/EOF）"
                )));
            }
            match value.trim() {
                "SECTION" => {
                    let (name_code, name) = self
                        .reader
                        .next_pair()?
                        .ok_or_else(|| DxfError::structure("SECTION 缺少名称（组码 2）"))?;
                    if name_code != 2 {
                        return Err(DxfError::structure(format!(
                            "SECTION 名称使用了组码 {name_code}（期望 2）"
                        )));
                    }
                    match name.trim() {
                        "HEADER" => self.parse_header(&mut document)?,
                        "ENTITIES" => self.parse_entities(&mut document)?,
                        other => {
                            trace!(section = other, "跳过 DXF 段");
                            self.skip_section()?
                        }
                    }
                }
                "EOF" => break,
                unexpected => {
                    return Err(DxfError::structure(format!(
                        "意外的标记 {unexpected}，期望 SECTION 或 EOF"
                    )));
                }
            }
        }
        Ok(document)
    }

    fn skip_section(&mut self) -> Result<(), DxfError> {
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) if value.trim() == "ENDSEC" => break,
                Some(_) => continue,
                None => {
                    return Err(DxfError::structure("SECTION 未找到 ENDSEC 终止标记"));
                }
            }
        }
        Ok(())
    }

    /// HEADER 段只关心 `$INSUNITS`，其余变量忽略。
    fn parse_header(&mut self, document: &mut Document) -> Result<(), DxfError> {
        let mut current_variable: Option<String> = None;
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) if value.trim() == "ENDSEC" => break,
                Some((9, name)) => current_variable = Some(name.trim().to_string()),
                Some((70, value)) if current_variable.as_deref() == Some("$INSUNITS") => {
                    // 单位码损坏时视为未声明，不影响读取。
                    if let Ok(code) = parse_i16(&value, "$INSUNITS") {
                        document.set_units(DrawingUnits::from_code(code));
                    }
                    current_variable = None;
                }
                Some(_) => continue,
                None => return Err(DxfError::structure("HEADER 段未找到 ENDSEC 终止标记")),
            }
        }
        Ok(())
    }

    fn parse_entities(&mut self, document: &mut Document) -> Result<(), DxfError> {
        loop {
            let (code, value) = match self.reader.next_pair()? {
                Some(pair) => pair,
                None => return Err(DxfError::structure("ENTITIES 段提前结束")),
            };
            if code == 999 {
                continue;
            }
            if code != 0 {
                return Err(DxfError::structure(format!(
                    "ENTITIES 段遇到组码 {code}（期望 0 表示实体起始）"
                )));
            }

            let kind = value.trim();
            match kind {
                "ENDSEC" => break,
                // 序列附属记录：脱离所属实体单独出现时直接丢弃。
                "SEQEND" | "VERTEX" | "ATTRIB" => {
                    self.skip_entity_body()?;
                }
                kind => {
                    let entity = self.parse_entity_recovering(kind)?;
                    document.add_entity(entity);
                }
            }
        }
        Ok(())
    }

    /// 解析单个实体；字段级错误降级为带缺陷说明的 `Unknown`。
    fn parse_entity_recovering(&mut self, kind: &str) -> Result<Entity, DxfError> {
        match self.parse_entity(kind) {
            Ok(entity) => Ok(entity),
            Err(DxfError::Entity { message }) => {
                debug!(kind, defect = %message, "实体字段损坏，按未知实体记录");
                self.skip_entity_body()?;
                if kind == "POLYLINE" {
                    self.skip_polyline_sequence()?;
                }
                Ok(Entity::Unknown(UnknownEntity::malformed(kind, message)))
            }
            Err(err @ DxfError::Structure { .. }) => Err(err),
        }
    }

    fn parse_entity(&mut self, kind: &str) -> Result<Entity, DxfError> {
        match kind {
            "LINE" => self.parse_line(),
            "CIRCLE" => self.parse_circle(),
            "ARC" => self.parse_arc(),
            "ELLIPSE" => self.parse_ellipse(),
            "LWPOLYLINE" => self.parse_lwpolyline(),
            "POLYLINE" => self.parse_polyline(),
            "SPLINE" => self.parse_spline(),
            other => {
                self.skip_entity_body()?;
                Ok(Entity::Unknown(UnknownEntity::unsupported(other)))
            }
        }
    }

    fn parse_line(&mut self) -> Result<Entity, DxfError> {
        let mut start_x = None;
        let mut start_y = None;
        let mut end_x = None;
        let mut end_y = None;
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value));
                    break;
                }
                Some((code, value)) => match code {
                    10 => assign_coord(&mut start_x, &value, "LINE 起点 X（组码 10）")?,
                    20 => assign_coord(&mut start_y, &value, "LINE 起点 Y（组码 20）")?,
                    11 => assign_coord(&mut end_x, &value, "LINE 终点 X（组码 11）")?,
                    21 => assign_coord(&mut end_y, &value, "LINE 终点 Y（组码 21）")?,
                    30 | 31 => {} // 忽略 Z 坐标
                    _ => {}
                },
                None => return Err(DxfError::structure("LINE 未正确结束")),
            }
        }

        let sx = start_x.ok_or_else(|| DxfError::entity("LINE 缺少起点 X（组码 10）"))?;
        let sy = start_y.ok_or_else(|| DxfError::entity("LINE 缺少起点 Y（组码 20）"))?;
        let ex = end_x.ok_or_else(|| DxfError::entity("LINE 缺少终点 X（组码 11）"))?;
        let ey = end_y.ok_or_else(|| DxfError::entity("LINE 缺少终点 Y（组码 21）"))?;

        Ok(Entity::Line(Line {
            start: Point2::new(sx, sy),
            end: Point2::new(ex, ey),
        }))
    }

    fn parse_circle(&mut self) -> Result<Entity, DxfError> {
        let mut center_x = None;
        let mut center_y = None;
        let mut radius = None;
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value));
                    break;
                }
                Some((code, value)) => match code {
                    10 => assign_coord(&mut center_x, &value, "CIRCLE 圆心 X（组码 10）")?,
                    20 => assign_coord(&mut center_y, &value, "CIRCLE 圆心 Y（组码 20）")?,
                    40 => assign_coord(&mut radius, &value, "CIRCLE 半径（组码 40）")?,
                    _ => {}
                },
                None => return Err(DxfError::structure("CIRCLE 未正确结束")),
            }
        }

        let cx = center_x.ok_or_else(|| DxfError::entity("CIRCLE 缺少圆心 X（组码 10）"))?;
        let cy = center_y.ok_or_else(|| DxfError::entity("CIRCLE 缺少圆心 Y（组码 20）"))?;
        let radius = radius.ok_or_else(|| DxfError::entity("CIRCLE 缺少半径（组码 40）"))?;

        Ok(Entity::Circle(Circle {
            center: Point2::new(cx, cy),
            radius,
        }))
    }

    fn parse_arc(&mut self) -> Result<Entity, DxfError> {
        let mut center_x = None;
        let mut center_y = None;
        let mut radius = None;
        let mut start_angle = None;
        let mut end_angle = None;
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value));
                    break;
                }
                Some((code, value)) => match code {
                    10 => assign_coord(&mut center_x, &value, "ARC 圆心 X（组码 10）")?,
                    20 => assign_coord(&mut center_y, &value, "ARC 圆心 Y（组码 20）")?,
                    40 => assign_coord(&mut radius, &value, "ARC 半径（组码 40）")?,
                    50 => assign_coord(&mut start_angle, &value, "ARC 起始角（组码 50）")?,
                    51 => assign_coord(&mut end_angle, &value, "ARC 终止角（组码 51）")?,
                    _ => {}
                },
                None => return Err(DxfError::structure("ARC 未正确结束")),
            }
        }

        let cx = center_x.ok_or_else(|| DxfError::entity("ARC 缺少圆心 X（组码 10）"))?;
        let cy = center_y.ok_or_else(|| DxfError::entity("ARC 缺少圆心 Y（组码 20）"))?;
        let radius = radius.ok_or_else(|| DxfError::entity("ARC 缺少半径（组码 40）"))?;
        let start_angle =
            start_angle.ok_or_else(|| DxfError::entity("ARC 缺少起始角（组码 50）"))?;
        let end_angle = end_angle.ok_or_else(|| DxfError::entity("ARC 缺少终止角（组码 51）"))?;

        Ok(Entity::Arc(Arc {
            center: Point2::new(cx, cy),
            radius,
            start_angle: start_angle.to_radians(),
            end_angle: end_angle.to_radians(),
        }))
    }

    fn parse_ellipse(&mut self) -> Result<Entity, DxfError> {
        let mut center_x = None;
        let mut center_y = None;
        let mut major_x = None;
        let mut major_y = None;
        let mut ratio = None;
        let mut start_parameter = None;
        let mut end_parameter = None;

        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value));
                    break;
                }
                Some((code, value)) => match code {
                    10 => assign_coord(&mut center_x, &value, "ELLIPSE 圆心 X（组码 10）")?,
                    20 => assign_coord(&mut center_y, &value, "ELLIPSE 圆心 Y（组码 20）")?,
                    11 => assign_coord(&mut major_x, &value, "ELLIPSE 主轴向量 X（组码 11）")?,
                    21 => assign_coord(&mut major_y, &value, "ELLIPSE 主轴向量 Y（组码 21）")?,
                    40 => assign_coord(&mut ratio, &value, "ELLIPSE 半径比（组码 40）")?,
                    41 => {
                        assign_coord(&mut start_parameter, &value, "ELLIPSE 起始参数（组码 41）")?
                    }
                    42 => assign_coord(&mut end_parameter, &value, "ELLIPSE 终止参数（组码 42）")?,
                    // 忽略 Z 分量与法向量。
                    30 | 31 | 210 | 220 | 230 => {}
                    _ => {}
                },
                None => return Err(DxfError::structure("ELLIPSE 未正确结束")),
            }
        }

        let cx = center_x.ok_or_else(|| DxfError::entity("ELLIPSE 缺少圆心 X（组码 10）"))?;
        let cy = center_y.ok_or_else(|| DxfError::entity("ELLIPSE 缺少圆心 Y（组码 20）"))?;
        let major_x =
            major_x.ok_or_else(|| DxfError::entity("ELLIPSE 缺少主轴向量 X（组码 11）"))?;
        let major_y =
            major_y.ok_or_else(|| DxfError::entity("ELLIPSE 缺少主轴向量 Y（组码 21）"))?;

        if major_x.abs() < f64::EPSILON && major_y.abs() < f64::EPSILON {
            return Err(DxfError::entity("ELLIPSE 主轴向量长度为 0"));
        }

        let ratio = ratio.unwrap_or(1.0);
        if ratio <= 0.0 {
            return Err(DxfError::entity(format!(
                "ELLIPSE 半径比必须为正数，实际为 {ratio}"
            )));
        }

        Ok(Entity::Ellipse(Ellipse {
            center: Point2::new(cx, cy),
            major_axis: Vector2::new(major_x, major_y),
            ratio,
            start_parameter: start_parameter.unwrap_or(0.0),
            end_parameter: end_parameter.unwrap_or(std::f64::consts::TAU),
        }))
    }

    fn parse_lwpolyline(&mut self) -> Result<Entity, DxfError> {
        let mut is_closed = false;
        let mut vertices: Vec<PolylineVertex> = Vec::new();
        let mut pending_x: Option<f64> = None;
        let mut pending_y: Option<f64> = None;
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value));
                    break;
                }
                Some((code, value)) => match code {
                    70 => {
                        let flag = parse_i32(&value, "LWPOLYLINE 标志（组码 70）")?;
                        is_closed = flag & 0x01 == 0x01;
                    }
                    10 => {
                        let x = parse_f64(&value, "LWPOLYLINE 顶点 X（组码 10）")?;
                        if let Some(y) = pending_y.take() {
                            vertices.push(PolylineVertex::new(Point2::new(x, y)));
                        } else if pending_x.replace(x).is_some() {
                            return Err(DxfError::entity("LWPOLYLINE 顶点缺少对应的 Y（组码 20）"));
                        }
                    }
                    20 => {
                        let y = parse_f64(&value, "LWPOLYLINE 顶点 Y（组码 20）")?;
                        if let Some(x) = pending_x.take() {
                            vertices.push(PolylineVertex::new(Point2::new(x, y)));
                        } else if pending_y.replace(y).is_some() {
                            return Err(DxfError::entity("LWPOLYLINE 顶点缺少对应的 X（组码 10）"));
                        }
                    }
                    42 => {
                        let bulge = parse_f64(&value, "LWPOLYLINE 顶点 bulge（组码 42）")?;
                        let vertex = vertices.last_mut().ok_or_else(|| {
                            DxfError::entity("LWPOLYLINE 在定义首个顶点前遇到 bulge（组码 42）")
                        })?;
                        vertex.bulge = bulge;
                    }
                    _ => {}
                },
                None => return Err(DxfError::structure("LWPOLYLINE 未正确结束")),
            }
        }

        if pending_x.is_some() || pending_y.is_some() {
            return Err(DxfError::entity(
                "LWPOLYLINE 顶点坐标需成对出现（组码 10/20），检测到不完整的顶点",
            ));
        }

        if vertices.is_empty() {
            return Err(DxfError::entity("LWPOLYLINE 未解析到任何顶点"));
        }

        Ok(Entity::Polyline(Polyline {
            vertices,
            is_closed,
        }))
    }

    /// 旧式 POLYLINE：头部之后跟随 VERTEX 记录，以 SEQEND 结束。
    /// 网格与多面网格不属于可绘制轮廓，记录为未知实体。
    fn parse_polyline(&mut self) -> Result<Entity, DxfError> {
        let mut flags: i16 = 0;
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value));
                    break;
                }
                Some((70, value)) => flags = parse_i16(&value, "POLYLINE 标志（组码 70）")?,
                Some(_) => {}
                None => return Err(DxfError::structure("POLYLINE 未正确结束")),
            }
        }

        if flags & 0x40 != 0 {
            self.skip_polyline_sequence()?;
            return Ok(Entity::Unknown(UnknownEntity::unsupported("POLYFACE_MESH")));
        }
        if flags & 0x10 != 0 {
            self.skip_polyline_sequence()?;
            return Ok(Entity::Unknown(UnknownEntity::unsupported("POLYGON_MESH")));
        }

        let mut vertices = Vec::new();
        let mut defect = None;
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => match value.trim() {
                    "VERTEX" => match self.parse_polyline_vertex() {
                        Ok(Some(vertex)) => vertices.push(vertex),
                        Ok(None) => {}
                        Err(DxfError::Entity { message }) => {
                            self.skip_entity_body()?;
                            defect.get_or_insert(message);
                        }
                        Err(err) => return Err(err),
                    },
                    "SEQEND" => {
                        self.skip_entity_body()?;
                        break;
                    }
                    _ => {
                        // 缺少 SEQEND：序列在下一个实体处结束。
                        self.reader.put_back((0, value));
                        break;
                    }
                },
                Some(_) => continue,
                None => return Err(DxfError::structure("POLYLINE 顶点序列未正确结束")),
            }
        }

        if let Some(message) = defect {
            return Ok(Entity::Unknown(UnknownEntity::malformed("POLYLINE", message)));
        }
        if vertices.is_empty() {
            return Ok(Entity::Unknown(UnknownEntity::malformed(
                "POLYLINE",
                "POLYLINE 未解析到任何顶点",
            )));
        }

        Ok(Entity::Polyline(Polyline {
            vertices,
            is_closed: flags & 0x01 != 0,
        }))
    }

    /// 解析 VERTEX 记录。样条拟合生成的控制框架顶点（标志 16）不参与轮廓。
    fn parse_polyline_vertex(&mut self) -> Result<Option<PolylineVertex>, DxfError> {
        let mut x = None;
        let mut y = None;
        let mut bulge = None;
        let mut flags: i16 = 0;
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value));
                    break;
                }
                Some((code, value)) => match code {
                    10 => assign_coord(&mut x, &value, "VERTEX 位置 X（组码 10）")?,
                    20 => assign_coord(&mut y, &value, "VERTEX 位置 Y（组码 20）")?,
                    42 => assign_coord(&mut bulge, &value, "VERTEX bulge（组码 42）")?,
                    70 => flags = parse_i16(&value, "VERTEX 标志（组码 70）")?,
                    _ => {}
                },
                None => return Err(DxfError::structure("VERTEX 未正确结束")),
            }
        }

        if flags & 0x10 != 0 {
            return Ok(None);
        }
        let x = x.ok_or_else(|| DxfError::entity("VERTEX 缺少位置 X（组码 10）"))?;
        let y = y.ok_or_else(|| DxfError::entity("VERTEX 缺少位置 Y（组码 20）"))?;
        Ok(Some(PolylineVertex::with_bulge(
            Point2::new(x, y),
            bulge.unwrap_or(0.0),
        )))
    }

    /// 跳过 POLYLINE 之后的 VERTEX/SEQEND 记录。
    fn skip_polyline_sequence(&mut self) -> Result<(), DxfError> {
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => match value.trim() {
                    "VERTEX" => self.skip_entity_body()?,
                    "SEQEND" => {
                        self.skip_entity_body()?;
                        break;
                    }
                    _ => {
                        self.reader.put_back((0, value));
                        break;
                    }
                },
                Some(_) => continue,
                None => break,
            }
        }
        Ok(())
    }

    fn parse_spline(&mut self) -> Result<Entity, DxfError> {
        let mut flags: i16 = 0;
        let mut degree: Option<i16> = None;
        let mut knot_values: Vec<f64> = Vec::new();
        let mut weights: Vec<f64> = Vec::new();
        let mut control_points: Vec<Point2> = Vec::new();
        let mut fit_points: Vec<Point2> = Vec::new();
        let mut pending_control_x: Option<f64> = None;
        let mut pending_fit_x: Option<f64> = None;

        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value));
                    break;
                }
                Some((code, value)) => match code {
                    70 => {
                        flags = parse_i16(&value, "SPLINE 类型标志（组码 70）")?;
                    }
                    71 => {
                        degree = Some(parse_i16(&value, "SPLINE 阶数（组码 71）")?);
                    }
                    72..=74 => {
                        // 节点/控制点/拟合点计数，仅校验格式
                        parse_i32(&value, "SPLINE 计数信息")?;
                    }
                    40 => {
                        knot_values.push(parse_f64(&value, "SPLINE 节点值（组码 40）")?);
                    }
                    41 => {
                        weights.push(parse_f64(&value, "SPLINE 权重（组码 41）")?);
                    }
                    10 => {
                        if pending_control_x
                            .replace(parse_f64(&value, "SPLINE 控制点 X（组码 10）")?)
                            .is_some()
                        {
                            return Err(DxfError::entity(
                                "SPLINE 控制点 X（组码 10）在未提供 Y 之前重复出现",
                            ));
                        }
                    }
                    20 => {
                        let y = parse_f64(&value, "SPLINE 控制点 Y（组码 20）")?;
                        let x = pending_control_x.take().ok_or_else(|| {
                            DxfError::entity("SPLINE 控制点 Y（组码 20）缺少对应的 X")
                        })?;
                        control_points.push(Point2::new(x, y));
                    }
                    11 => {
                        if pending_fit_x
                            .replace(parse_f64(&value, "SPLINE 拟合点 X（组码 11）")?)
                            .is_some()
                        {
                            return Err(DxfError::entity(
                                "SPLINE 拟合点 X（组码 11）在未提供 Y 之前重复出现",
                            ));
                        }
                    }
                    21 => {
                        let y = parse_f64(&value, "SPLINE 拟合点 Y（组码 21）")?;
                        let x = pending_fit_x.take().ok_or_else(|| {
                            DxfError::entity("SPLINE 拟合点 Y（组码 21）缺少对应的 X")
                        })?;
                        fit_points.push(Point2::new(x, y));
                    }
                    _ => {}
                },
                None => return Err(DxfError::structure("SPLINE 未正确结束")),
            }
        }

        if let Some(x) = pending_control_x {
            return Err(DxfError::entity(format!(
                "SPLINE 控制点 X={x} 缺少对应的 Y（组码 20）"
            )));
        }
        if let Some(x) = pending_fit_x {
            return Err(DxfError::entity(format!(
                "SPLINE 拟合点 X={x} 缺少对应的 Y（组码 21）"
            )));
        }
        if control_points.len() < 2 && fit_points.len() < 2 {
            return Err(DxfError::entity("SPLINE 缺少控制点与拟合点"));
        }

        let degree = degree.ok_or_else(|| DxfError::entity("SPLINE 缺少阶数（组码 71）"))?;

        Ok(Entity::Spline(Spline {
            degree: i32::from(degree),
            is_closed: flags & 0x01 != 0,
            is_periodic: flags & 0x02 != 0,
            is_rational: flags & 0x04 != 0,
            control_points,
            fit_points,
            knot_values,
            weights,
        }))
    }

    fn skip_entity_body(&mut self) -> Result<(), DxfError> {
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value));
                    break;
                }
                Some(_) => continue,
                None => break,
            }
        }
        Ok(())
    }
}

struct DxfReader<'a> {
    lines: std::str::Lines<'a>,
    buffer: Option<(i32, String)>,
    line_number: usize,
}

impl<'a> DxfReader<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            lines: source.lines(),
            buffer: None,
            line_number: 0,
        }
    }

    fn next_pair(&mut self) -> Result<Option<(i32, String)>, DxfError> {
        if let Some(pair) = self.buffer.take() {
            return Ok(Some(pair));
        }

        let code_line = loop {
            match self.lines.next() {
                Some(line) => {
                    self.line_number += 1;
                    // 文件末尾的空行不构成组码。
                    if line.trim().is_empty() && self.at_trailing_blank() {
                        return Ok(None);
                    }
                    break line;
                }
                None => return Ok(None),
            }
        };

        let value_line = match self.lines.next() {
            Some(line) => {
                self.line_number += 1;
                line
            }
            None => {
                return Err(DxfError::structure(format!(
                    "文件在第 {} 行结束，缺少与组码对应的值行",
                    self.line_number
                )));
            }
        };

        let code = code_line.trim().parse::<i32>().map_err(|_| {
            DxfError::structure(format!(
                "第 {} 行的组码 \"{}\" 无法解析为整数",
                self.line_number - 1,
                code_line.trim()
            ))
        })?;
        let value = value_line.trim_end_matches('\r').to_string();
        Ok(Some((code, value)))
    }

    fn at_trailing_blank(&self) -> bool {
        self.lines.clone().all(|line| line.trim().is_empty())
    }

    fn put_back(&mut self, pair: (i32, String)) {
        debug_assert!(self.buffer.is_none(), "尝试多次回退 DXF pair");
        self.buffer = Some(pair);
    }
}

fn assign_coord(slot: &mut Option<f64>, raw: &str, context: &str) -> Result<(), DxfError> {
    if slot.is_some() {
        return Err(DxfError::entity(format!("{context} 出现重复值")));
    }
    *slot = Some(parse_f64(raw, context)?);
    Ok(())
}

fn parse_f64(raw: &str, context: &str) -> Result<f64, DxfError> {
    raw.trim()
        .parse::<f64>()
        .map_err(|_| DxfError::entity(format!("{context} 解析失败（值：\"{raw}\"）")))
}

fn parse_i32(raw: &str, context: &str) -> Result<i32, DxfError> {
    raw.trim()
        .parse::<i32>()
        .map_err(|_| DxfError::entity(format!("{context} 解析失败（值：\"{raw}\"）")))
}

fn parse_i16(raw: &str, context: &str) -> Result<i16, DxfError> {
    let value = parse_i32(raw, context)?;
    i16::try_from(value)
        .map_err(|_| DxfError::entity(format!("{context} 超出 i16 范围（值：{value}）")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Result<Document, DxfError> {
        DxfParser::new(source).parse()
    }

    #[test]
    fn reader_rejects_non_integer_group_code() {
        let err = parse("  0\nSECTION\nabc\nENTITIES\n").expect_err("应当失败");
        assert!(matches!(err, DxfError::Structure { .. }));
    }

    #[test]
    fn reader_rejects_dangling_group_code() {
        let err = parse("  0\nSECTION\n  2\n").expect_err("应当失败");
        assert!(matches!(err, DxfError::Structure { .. }));
    }

    #[test]
    fn header_units_are_recorded() {
        let source = "0\nSECTION\n2\nHEADER\n9\n$ACADVER\n1\nAC1015\n9\n$INSUNITS\n70\n4\n0\nENDSEC\n0\nEOF\n";
        let doc = parse(source).expect("解析 HEADER");
        assert_eq!(doc.units(), Some(DrawingUnits::Millimeters));
        assert!(doc.is_empty());
    }

    #[test]
    fn malformed_field_degrades_to_unknown() {
        let source = "0\nSECTION\n2\nENTITIES\n0\nCIRCLE\n10\n1.0\n20\noops\n40\n2.0\n0\nLINE\n10\n0\n20\n0\n11\n1\n21\n1\n0\nENDSEC\n0\nEOF\n";
        let doc = parse(source).expect("单个实体损坏不应终止读取");
        let kinds: Vec<_> = doc.entities().map(|(_, e)| e.kind_name().to_string()).collect();
        assert_eq!(kinds, vec!["CIRCLE", "LINE"]);
        match doc.entities().next() {
            Some((_, Entity::Unknown(unknown))) => {
                assert!(unknown.defect.as_deref().unwrap_or("").contains("CIRCLE 圆心 Y"));
            }
            other => panic!("期望未知实体，实际为 {other:?}"),
        }
    }

    #[test]
    fn stray_sequence_records_are_ignored() {
        let source = "0\nSECTION\n2\nENTITIES\n0\nSEQEND\n8\n0\n0\nATTRIB\n1\nvalue\n0\nENDSEC\n0\nEOF\n";
        let doc = parse(source).expect("解析");
        assert!(doc.is_empty());
    }

    #[test]
    fn content_outside_sections_is_fatal() {
        let err = parse("0\nLINE\n0\nEOF\n").expect_err("应当失败");
        assert!(matches!(err, DxfError::Structure { .. }));
    }
}
