//! CLI integration tests for uv3dp
//!
//! These tests run the binary over real SL1 and ChiTu files, checking that
//! pipelines decode once, filter in order and write every output.

use std::path::Path;
use std::time::Duration;

use image::{GrayImage, Luma};
use predicates::prelude::*;
use tempfile::TempDir;
use uv3dp::format::FormatRegistry;
use uv3dp::{MemoryPrintable, Printable, Properties};

/// Get a command instance for the uv3dp binary
fn uv3dp_cmd() -> assert_cmd::Command {
    let mut cmd = assert_cmd::Command::new(assert_cmd::cargo::cargo_bin!("uv3dp"));
    cmd.env_remove("UV3DP_CONFIG");
    cmd
}

/// Three 20x10 layers with a lit 10x6 rectangle
fn sample() -> MemoryPrintable {
    let mut properties = Properties::default();
    properties.bottom.count = 1;
    properties.exposure.light_on_time = Duration::from_secs(6);
    properties.bottom.exposure.light_on_time = Duration::from_secs(40);

    let image = GrayImage::from_fn(20, 10, |x, y| {
        if (5..15).contains(&x) && (2..8).contains(&y) {
            Luma([255])
        } else {
            Luma([0])
        }
    });
    MemoryPrintable::new(properties, vec![image; 3])
}

fn write_job(path: &Path) {
    let registry = FormatRegistry::builtin();
    let mut format = registry.resolve(path.to_str().unwrap()).unwrap();
    format.parse(&[]).unwrap();
    format.encode(&sample()).unwrap();
}

fn read_job(path: &Path) -> Box<dyn Printable> {
    let registry = FormatRegistry::builtin();
    let mut format = registry.resolve(path.to_str().unwrap()).unwrap();
    format.parse(&[]).unwrap();
    format.decode().unwrap()
}

fn lit_pixels(printable: &dyn Printable, index: usize) -> usize {
    let layer = printable.layer(index).unwrap();
    layer.image.pixels().filter(|p| p.0[0] > 0).count()
}

/// Temp dir holding `job.sl1`
fn setup_job() -> TempDir {
    let dir = TempDir::new().unwrap();
    write_job(&dir.path().join("job.sl1"));
    dir
}

// =============================================================================
// Usage Tests
// =============================================================================

#[test]
fn test_no_arguments_prints_usage() {
    uv3dp_cmd()
        .assert()
        .success()
        .stdout(predicate::str::contains("Commands:"))
        .stdout(predicate::str::contains("Formats:"))
        .stdout(predicate::str::contains("Options for 'exposure'"));
}

#[test]
fn test_help_token_stops_pipeline() {
    let dir = setup_job();

    uv3dp_cmd()
        .current_dir(dir.path())
        .args(["job.sl1", "help", "out.ctb"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Translates input file to output file"));

    assert!(!dir.path().join("out.ctb").exists());
}

// =============================================================================
// Pipeline Tests
// =============================================================================

#[test]
fn test_translate_sl1_to_ctb() {
    let dir = setup_job();

    uv3dp_cmd()
        .current_dir(dir.path())
        .args(["job.sl1", "job.ctb"])
        .assert()
        .success();

    let source = sample();
    let output = read_job(&dir.path().join("job.ctb"));
    assert_eq!(output.layer_count(), 3);
    for index in 0..3 {
        assert_eq!(
            output.layer(index).unwrap().image.as_raw(),
            source.layer(index).unwrap().image.as_raw()
        );
    }
    assert_eq!(output.properties().exposure.light_on_time, Duration::from_secs(6));
    assert_eq!(output.properties().bottom.count, 1);
}

#[test]
fn test_exposure_rewrites_in_place() {
    let dir = setup_job();
    let path = dir.path().join("job.sl1");
    let before = read_job(&path);

    uv3dp_cmd()
        .current_dir(dir.path())
        .args(["job.sl1", "exposure", "--normal=8", "job.sl1"])
        .assert()
        .success();

    let after = read_job(&path);
    let (old, new) = (before.properties(), after.properties());
    assert_eq!(new.exposure.light_on_time, Duration::from_secs(8));
    assert_eq!(new.bottom, old.bottom);
    assert_eq!(new.size, old.size);
    assert_eq!(
        after.layer(2).unwrap().image.as_raw(),
        before.layer(2).unwrap().image.as_raw()
    );
}

#[test]
fn test_command_before_input_fails() {
    let dir = TempDir::new().unwrap();

    uv3dp_cmd()
        .current_dir(dir.path())
        .args(["decimate", "job.sl1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("needs an input file"));

    assert!(!dir.path().join("job.sl1").exists());
}

#[test]
fn test_unknown_extension_fails() {
    let dir = TempDir::new().unwrap();

    uv3dp_cmd()
        .current_dir(dir.path())
        .arg("job.unknownext")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unrecognized format for 'job.unknownext'"));
}

#[test]
fn test_filters_apply_between_outputs() {
    let dir = setup_job();

    uv3dp_cmd()
        .current_dir(dir.path())
        .args([
            "job.sl1", "decimate", "job.ctb", "exposure", "--normal=5", "job2.ctb",
        ])
        .assert()
        .success();

    let first = read_job(&dir.path().join("job.ctb"));
    let second = read_job(&dir.path().join("job2.ctb"));

    // 10x6 rectangle eroded to 8x4
    assert_eq!(lit_pixels(first.as_ref(), 1), 32);
    assert_eq!(lit_pixels(second.as_ref(), 1), 32);
    assert_eq!(first.properties().exposure.light_on_time, Duration::from_secs(6));
    assert_eq!(second.properties().exposure.light_on_time, Duration::from_secs(5));
}

#[test]
fn test_named_format_takes_filename() {
    let dir = setup_job();

    uv3dp_cmd()
        .current_dir(dir.path())
        .args(["job.sl1", "cbddlp", "--anti-alias", "2", "job.bin"])
        .assert()
        .success();

    let registry = FormatRegistry::builtin();
    let mut format = registry.resolve("cbddlp").unwrap();
    format.parse(&[dir.path().join("job.bin").display().to_string()]).unwrap();
    let output = format.decode().unwrap();
    assert_eq!(lit_pixels(output.as_ref(), 0), 60);
}

#[test]
fn test_named_format_without_filename_fails() {
    let dir = setup_job();

    uv3dp_cmd()
        .current_dir(dir.path())
        .args(["job.sl1", "ctb"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("missing filename"));
}

#[test]
fn test_bad_command_option_fails() {
    let dir = setup_job();

    uv3dp_cmd()
        .current_dir(dir.path())
        .args(["job.sl1", "exposure", "--normal=soon", "out.sl1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("soon"));

    assert!(!dir.path().join("out.sl1").exists());
}

#[test]
fn test_failure_keeps_written_outputs() {
    let dir = setup_job();

    uv3dp_cmd()
        .current_dir(dir.path())
        .args(["job.sl1", "out.ctb", "exposure", "--normal=x", "out2.ctb"])
        .assert()
        .failure();

    assert!(dir.path().join("out.ctb").exists());
    assert!(!dir.path().join("out2.ctb").exists());
    assert_eq!(read_job(&dir.path().join("out.ctb")).layer_count(), 3);
}

#[test]
fn test_corrupt_input_fails() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("job.ctb"), b"not a print file").unwrap();

    uv3dp_cmd()
        .current_dir(dir.path())
        .args(["job.ctb", "out.sl1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to decode"));
}

// =============================================================================
// Info Tests
// =============================================================================

#[test]
fn test_info_prints_text() {
    let dir = setup_job();

    uv3dp_cmd()
        .current_dir(dir.path())
        .args(["job.sl1", "info", "--layers"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Resolution:   20 x 10 pixels"))
        .stdout(predicate::str::contains("Layer 2:"));
}

#[test]
fn test_info_prints_json() {
    let dir = setup_job();

    let output = uv3dp_cmd()
        .current_dir(dir.path())
        .args(["job.sl1", "decimate", "info", "--format", "json", "--layers"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["resolution"], serde_json::json!([20, 10]));
    assert_eq!(report["layer_count"], 3);
    assert_eq!(report["layers"][0]["lit_pixels"], 32);
}

// =============================================================================
// Configuration Tests
// =============================================================================

#[test]
fn test_zero_cache_capacity_fails() {
    let dir = setup_job();

    uv3dp_cmd()
        .current_dir(dir.path())
        .args(["--cached-layers", "0", "job.sl1", "info"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("capacity"));
}

#[test]
fn test_config_file_is_used() {
    let dir = setup_job();
    let config = dir.path().join("uv3dp.toml");
    std::fs::write(&config, "[pipeline]\ncached_layers = 0\n").unwrap();

    uv3dp_cmd()
        .current_dir(dir.path())
        .env("UV3DP_CONFIG", &config)
        .args(["job.sl1", "out.ctb"])
        .assert()
        .failure();

    // The flag wins over the file
    uv3dp_cmd()
        .current_dir(dir.path())
        .env("UV3DP_CONFIG", &config)
        .args(["--cached-layers", "2", "job.sl1", "out.ctb"])
        .assert()
        .success();
}

#[test]
fn test_verbose_logs_config_path() {
    let dir = setup_job();
    let config = dir.path().join("uv3dp.toml");
    std::fs::write(&config, "[pipeline]\ncached_layers = 4\n").unwrap();

    uv3dp_cmd()
        .current_dir(dir.path())
        .env("UV3DP_CONFIG", &config)
        .args(["-vv", "job.sl1", "out.ctb"])
        .assert()
        .success()
        .stderr(predicate::str::contains("loaded configuration"))
        .stderr(predicate::str::contains("uv3dp.toml"));
}

#[test]
fn test_malformed_config_fails() {
    let dir = setup_job();
    let config = dir.path().join("uv3dp.toml");
    std::fs::write(&config, "[pipeline\n").unwrap();

    uv3dp_cmd()
        .current_dir(dir.path())
        .args(["--config", config.to_str().unwrap(), "job.sl1", "out.ctb"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to parse configuration"));
}

#[test]
fn test_verbose_logs_stages() {
    let dir = setup_job();

    uv3dp_cmd()
        .current_dir(dir.path())
        .args(["-vv", "job.sl1", "job.ctb"])
        .assert()
        .success()
        .stderr(predicate::str::contains("decoded input"))
        .stderr(predicate::str::contains("layer cache"));
}
