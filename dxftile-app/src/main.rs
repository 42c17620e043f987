use std::path::PathBuf;

use clap::Parser;
use dxftile_config::{AppConfig, ConfigError};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

mod convert;

/// 将 DXF 图纸按 1:1 比例切分为多页 PDF。
#[derive(Debug, Parser)]
#[command(name = "dxftile", version, about)]
struct Cli {
    /// 输入的 ASCII DXF 文件
    input: PathBuf,
    /// 输出的 PDF 文件
    output: PathBuf,
    /// 配置文件路径，优先于 `DXFTILE_CONFIG` 与 `./config/default.toml`
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();

    let (config, fallback) = match load_configuration(cli.config.clone()) {
        Ok(loaded) => loaded,
        Err(err) => {
            eprintln!("FATAL: {err}");
            std::process::exit(1);
        }
    };
    init_logging(&config);
    if let Some(err) = fallback {
        match &err {
            ConfigError::Io { path, .. } | ConfigError::Parse { path, .. } => {
                warn!(path = %path.display(), error = %err, "加载配置失败，使用内建默认值");
            }
            _ => {
                warn!(error = %err, "加载配置失败，使用内建默认值");
            }
        }
    }
    info!("启动 dxftile");

    if let Err(err) = convert::run(&cli.input, &cli.output, &config) {
        error!(error = %err, "转换失败");
        eprintln!("FATAL: {err:#}");
        std::process::exit(1);
    }
}

/// 读写失败时回退到内建默认值，并把原因交给调用方在日志就绪后输出；取值非法的配置直接拒绝。
fn load_configuration(
    override_path: Option<PathBuf>,
) -> Result<(AppConfig, Option<ConfigError>), ConfigError> {
    let loaded = match &override_path {
        Some(path) => AppConfig::from_file(path),
        None => AppConfig::discover(),
    };
    match loaded {
        Ok(cfg) => Ok((cfg, None)),
        Err(err @ ConfigError::InvalidValue { .. }) => Err(err),
        Err(err) => Ok((AppConfig::default(), Some(err))),
    }
}

fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_new(config.logging.level.clone()).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if subscriber.try_init().is_err() {
        // 已初始化，忽略
    }
}
