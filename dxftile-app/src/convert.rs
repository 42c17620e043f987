//! 单次转换流程：读取 DXF、规划分页并写出 PDF。

use std::path::Path;

use anyhow::{Context, Result, bail};
use dxftile_config::AppConfig;
use dxftile_core::flatten::FlattenOptions;
use dxftile_engine::render::render_document;
use dxftile_engine::settings::{LabelStyle, PlotSettings};
use dxftile_engine::tiling::PageSize;
use dxftile_io::{DocumentLoader, DxfFacade};
use dxftile_pdf::PdfCanvas;
use tracing::{info, warn};

pub fn run(input: &Path, output: &Path, config: &AppConfig) -> Result<()> {
    if !input.is_file() {
        bail!("input file {} does not exist", input.display());
    }

    let document = DxfFacade::new()
        .load(input)
        .with_context(|| format!("无法读取 DXF 文件 {}", input.display()))?;
    info!(path = %input.display(), entities = document.len(), "DXF 读取完成");

    if let Some(units) = document.units() {
        if !units.plots_as_millimeters() {
            warn!(units = units.describe(), "图纸单位不是毫米，仍按 1 单位 = 1 mm 输出");
        }
    }

    let settings = plot_settings(config);
    let source_name = input
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| input.display().to_string());

    let mut canvas = PdfCanvas::new(output).with_title(source_name.clone());
    let report = render_document(&document, &settings, &source_name, &mut canvas)
        .with_context(|| format!("无法生成 PDF {}", output.display()))?;

    let skipped = report.pages.first().map_or(0, |page| page.skipped.total());
    info!(
        output = %output.display(),
        pages = report.page_count(),
        columns = report.grid.columns(),
        rows = report.grid.rows(),
        drawn = report.drawn_total(),
        skipped,
        kinds = ?report.kind_counts,
        "PDF 输出完成"
    );
    Ok(())
}

/// 将配置映射为一次输出的绘图参数。
fn plot_settings(config: &AppConfig) -> PlotSettings {
    let (width, height) = config.page.size_mm();
    let defaults = PlotSettings::default();
    PlotSettings {
        page_size: PageSize::new(width, height),
        line_width: config.render.line_width,
        flatten: FlattenOptions {
            tolerance: config.render.tolerance_mm,
            ellipse_segments: config.render.ellipse_segments,
        },
        label: LabelStyle {
            font_size: config.render.label_font_size,
            margin_mm: config.render.label_margin_mm,
            ..LabelStyle::default()
        },
        ..defaults
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dxftile_engine::settings::POINTS_PER_MM;

    #[test]
    fn default_config_maps_to_a4_landscape() {
        let settings = plot_settings(&AppConfig::default());
        assert_eq!(settings.page_size, PageSize::A4_LANDSCAPE);
        assert!((settings.scale - POINTS_PER_MM).abs() < 1e-12);
        assert!((settings.flatten.tolerance - 0.1).abs() < 1e-12);
        assert_eq!(settings.flatten.ellipse_segments, 60);
        assert!((settings.label.margin_mm - 5.0).abs() < 1e-12);
    }

    #[test]
    fn missing_input_does_not_create_output() {
        let dir = tempfile::tempdir().expect("tempdir");
        let output = dir.path().join("out.pdf");
        let err = run(&dir.path().join("absent.dxf"), &output, &AppConfig::default())
            .expect_err("missing input must fail");
        assert!(err.to_string().contains("does not exist"));
        assert!(!output.exists());
    }
}
