use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// 指定配置文件路径的环境变量。
pub const CONFIG_ENV_VAR: &str = "DXFTILE_CONFIG";

/// 应用配置的根结构。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub page: PageConfig,
    #[serde(default)]
    pub render: RenderConfig,
}

impl AppConfig {
    /// 从显式路径加载配置，并校验取值。
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// 自动发现配置文件：优先读取环境变量 `DXFTILE_CONFIG`，否则寻找 `./config/default.toml`。
    /// 若文件缺失，则返回默认配置。
    pub fn discover() -> Result<Self, ConfigError> {
        if let Some(path) = env::var_os(CONFIG_ENV_VAR) {
            return Self::from_file(PathBuf::from(path));
        }

        let default_path = env::current_dir()
            .map(|dir| dir.join("config").join("default.toml"))
            .map_err(|source| ConfigError::Context {
                message: "获取当前工作目录失败".to_string(),
                source,
            })?;

        if default_path.exists() {
            Self::from_file(default_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let (width, height) = self.page.size_mm();
        require_positive("page.width_mm", width)?;
        require_positive("page.height_mm", height)?;
        require_positive("render.line_width", self.render.line_width)?;
        require_positive("render.tolerance_mm", self.render.tolerance_mm)?;
        require_positive("render.label_font_size", self.render.label_font_size)?;
        if !self.render.label_margin_mm.is_finite() || self.render.label_margin_mm < 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "render.label_margin_mm",
                message: format!("必须为非负数，实际为 {}", self.render.label_margin_mm),
            });
        }
        if self.render.ellipse_segments < 3 {
            return Err(ConfigError::InvalidValue {
                field: "render.ellipse_segments",
                message: format!("至少需要 3 段，实际为 {}", self.render.ellipse_segments),
            });
        }
        Ok(())
    }
}

fn require_positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            field,
            message: format!("必须为正数，实际为 {value}"),
        })
    }
}

/// 日志配置，支持设置默认等级。
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

/// 标准纸张规格，尺寸按纵向（宽 < 高）给出。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageFormat {
    A0,
    A1,
    A2,
    A3,
    #[default]
    A4,
    Letter,
}

impl PageFormat {
    pub fn portrait_size_mm(self) -> (f64, f64) {
        match self {
            PageFormat::A0 => (841.0, 1189.0),
            PageFormat::A1 => (594.0, 841.0),
            PageFormat::A2 => (420.0, 594.0),
            PageFormat::A3 => (297.0, 420.0),
            PageFormat::A4 => (210.0, 297.0),
            PageFormat::Letter => (215.9, 279.4),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    #[default]
    Landscape,
    Portrait,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageConfig {
    #[serde(default)]
    pub format: PageFormat,
    #[serde(default)]
    pub orientation: Orientation,
    /// 显式宽度，优先于纸张规格。
    #[serde(default)]
    pub width_mm: Option<f64>,
    #[serde(default)]
    pub height_mm: Option<f64>,
}

impl PageConfig {
    /// 最终页面尺寸 `(宽, 高)`，单位毫米。
    pub fn size_mm(&self) -> (f64, f64) {
        let (short, long) = self.format.portrait_size_mm();
        let (width, height) = match self.orientation {
            Orientation::Landscape => (long, short),
            Orientation::Portrait => (short, long),
        };
        (
            self.width_mm.unwrap_or(width),
            self.height_mm.unwrap_or(height),
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RenderConfig {
    #[serde(default = "RenderConfig::default_line_width")]
    pub line_width: f64,
    #[serde(default = "RenderConfig::default_tolerance")]
    pub tolerance_mm: f64,
    #[serde(default = "RenderConfig::default_ellipse_segments")]
    pub ellipse_segments: usize,
    #[serde(default = "RenderConfig::default_label_font_size")]
    pub label_font_size: f64,
    #[serde(default = "RenderConfig::default_label_margin")]
    pub label_margin_mm: f64,
}

impl RenderConfig {
    fn default_line_width() -> f64 {
        0.3
    }

    fn default_tolerance() -> f64 {
        0.1
    }

    fn default_ellipse_segments() -> usize {
        60
    }

    fn default_label_font_size() -> f64 {
        8.0
    }

    fn default_label_margin() -> f64 {
        5.0
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            line_width: Self::default_line_width(),
            tolerance_mm: Self::default_tolerance(),
            ellipse_segments: Self::default_ellipse_segments(),
            label_font_size: Self::default_label_font_size(),
            label_margin_mm: Self::default_label_margin(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("读取配置文件 {path:?} 失败: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("解析配置文件 {path:?} 失败: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("配置项 {field} 无效: {message}")]
    InvalidValue { field: &'static str, message: String },
    #[error("{message}")]
    Context {
        message: String,
        #[source]
        source: std::io::Error,
    },
}
