use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;

const SQUARE_DXF: &str = "0\nSECTION\n2\nENTITIES\n\
0\nLINE\n8\n0\n10\n0.0\n20\n0.0\n11\n400.0\n21\n0.0\n\
0\nCIRCLE\n8\n0\n10\n100.0\n20\n100.0\n40\n50.0\n\
0\nENDSEC\n0\nEOF\n";

const EMPTY_DXF: &str = "0\nSECTION\n2\nENTITIES\n0\nENDSEC\n0\nEOF\n";

fn dxftile() -> Command {
    let mut cmd = Command::cargo_bin("dxftile").expect("binary");
    cmd.env_remove("DXFTILE_CONFIG");
    cmd
}

#[test]
fn missing_arguments_print_usage() {
    dxftile()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn missing_input_is_fatal_without_output() {
    let dir = tempfile::tempdir().expect("tempdir");
    let output = dir.path().join("out.pdf");
    dxftile()
        .current_dir(dir.path())
        .arg(dir.path().join("absent.dxf"))
        .arg(&output)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("FATAL"));
    assert!(!output.exists());
}

#[test]
fn converts_drawing_to_pdf() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("square.dxf");
    let output = dir.path().join("square.pdf");
    fs::write(&input, SQUARE_DXF).expect("write dxf");

    dxftile()
        .current_dir(dir.path())
        .arg(&input)
        .arg(&output)
        .assert()
        .success();

    let bytes = fs::read(&output).expect("read pdf");
    assert!(bytes.starts_with(b"%PDF"));
    let text = String::from_utf8_lossy(&bytes);
    // 400 mm 宽的图纸在 A4 横向上需要两列
    assert!(text.contains("Page 1/2"));
    assert!(text.contains("Page 2/2"));
    assert!(text.contains("File: square.dxf @ 1:1 Scale"));
}

#[test]
fn empty_drawing_is_fatal() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("empty.dxf");
    let output = dir.path().join("empty.pdf");
    fs::write(&input, EMPTY_DXF).expect("write dxf");

    dxftile()
        .current_dir(dir.path())
        .arg(&input)
        .arg(&output)
        .assert()
        .code(1);
    assert!(!output.exists());
}

#[test]
fn invalid_config_value_is_fatal() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("square.dxf");
    let output = dir.path().join("square.pdf");
    let config = dir.path().join("bad.toml");
    fs::write(&input, SQUARE_DXF).expect("write dxf");
    fs::write(&config, "[render]\ntolerance_mm = 0.0\n").expect("write config");

    dxftile()
        .current_dir(dir.path())
        .arg(&input)
        .arg(&output)
        .arg("--config")
        .arg(&config)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("tolerance_mm"));
    assert!(!output.exists());
}

#[test]
fn unreadable_config_falls_back_with_warning() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("square.dxf");
    let output = dir.path().join("square.pdf");
    fs::write(&input, SQUARE_DXF).expect("write dxf");

    dxftile()
        .current_dir(dir.path())
        .arg(&input)
        .arg(&output)
        .arg("--config")
        .arg(dir.path().join("missing.toml"))
        .assert()
        .success()
        .stderr(predicate::str::contains("使用内建默认值"))
        .stderr(predicate::str::contains("missing.toml"));
    assert!(output.exists());
}
