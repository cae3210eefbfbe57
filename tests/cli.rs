use assert_cmd::prelude::*; // Add methods on commands
use std::{fs, path::Path, process::Command};

use tempfile::TempDir;

const PARTITIONS: &str = "\
# Name,   Type, SubType, Offset,  Size, Flags
nvs,      data, nvs,     0x9000,  0x5000,
factory,  app,  factory, 0x10,    0x10,
app,      app,  ota_0,   0x20,    0x10,
";

const CONFIG: &str = r#"
[project]
build_dir = "build"
env_name = "esp32_app"
partitions = "partitions.csv"

[board]
mcu = "esp32"

[factory]
binary = "factory"
"#;

/// A project with a partition table, a factory image and a built application
fn project() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("espfactory.toml"), CONFIG).unwrap();
    fs::write(dir.path().join("partitions.csv"), PARTITIONS).unwrap();
    fs::write(dir.path().join("factory.bin"), [0xAA; 4]).unwrap();
    fs::create_dir(dir.path().join("build")).unwrap();
    fs::write(dir.path().join("build/firmware.bin"), [0xBB; 2]).unwrap();

    dir
}

fn espfactory(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("espfactory").unwrap();
    cmd.current_dir(dir)
        .arg("--config")
        .arg(dir.join("espfactory.toml"))
        .env_remove("ESPFACTORY_ENV");
    cmd
}

fn stdout(cmd: &mut Command) -> String {
    let output = cmd.assert().success().get_output().stdout.clone();
    String::from_utf8(output).unwrap()
}

fn expected_merge() -> Vec<u8> {
    let mut expected = vec![0xFF; 0x10];
    expected.extend_from_slice(&[0xAA; 4]);
    expected.resize(0x20, 0xFF);
    expected.extend_from_slice(&[0xBB; 2]);
    expected
}

#[test]
fn partition_table() -> Result<(), Box<dyn std::error::Error>> {
    let dir = project();

    let out = stdout(espfactory(dir.path()).arg("partition-table"));

    assert!(out.contains("nvs"));
    assert!(out.contains("factory"));
    assert!(out.contains("0x20"));

    Ok(())
}

#[test]
fn missing_partition_table_fails() -> Result<(), Box<dyn std::error::Error>> {
    let dir = project();

    espfactory(dir.path())
        .arg("partition-table")
        .arg(dir.path().join("missing.csv"))
        .assert()
        .failure();

    Ok(())
}

#[test]
fn locate_local_binary() -> Result<(), Box<dyn std::error::Error>> {
    let dir = project();

    let out = stdout(espfactory(dir.path()).arg("locate"));

    assert_eq!(
        out.trim(),
        dir.path().join("factory.bin").display().to_string()
    );

    Ok(())
}

#[test]
fn locate_without_source_succeeds_silently() -> Result<(), Box<dyn std::error::Error>> {
    let dir = project();
    fs::remove_file(dir.path().join("factory.bin"))?;

    let out = stdout(espfactory(dir.path()).arg("locate"));

    assert!(out.trim().is_empty());

    Ok(())
}

#[test]
fn register() -> Result<(), Box<dyn std::error::Error>> {
    let dir = project();

    let out = stdout(espfactory(dir.path()).arg("register"));

    assert_eq!(
        out.trim(),
        format!("0x10 {}", dir.path().join("factory.bin").display())
    );

    Ok(())
}

#[test]
fn register_appends_to_extra_images() -> Result<(), Box<dyn std::error::Error>> {
    let dir = project();
    let config = CONFIG.replace(
        "partitions = \"partitions.csv\"",
        "partitions = \"partitions.csv\"\nextra_images = [\"0x1000 bootloader.bin\"]",
    );
    fs::write(dir.path().join("espfactory.toml"), config)?;

    let out = stdout(espfactory(dir.path()).arg("register"));
    let lines: Vec<&str> = out.lines().collect();

    assert_eq!(
        lines,
        [
            format!("0x1000 {}", dir.path().join("bootloader.bin").display()),
            format!("0x10 {}", dir.path().join("factory.bin").display()),
        ]
    );

    Ok(())
}

#[test]
fn native_merge() -> Result<(), Box<dyn std::error::Error>> {
    let dir = project();

    let out = stdout(espfactory(dir.path()).arg("merge").arg("--native"));

    let merged = dir.path().join("build/merged-firmware.bin");
    assert!(out.contains("Offset"));
    assert!(out.contains(&merged.display().to_string()));
    assert_eq!(fs::read(&merged)?, expected_merge());

    Ok(())
}

#[cfg(unix)]
#[test]
fn failing_merge_tool_fails_the_build() -> Result<(), Box<dyn std::error::Error>> {
    let dir = project();
    let config = format!("{CONFIG}\n[tools]\nesptool = \"false\"\n");
    fs::write(dir.path().join("espfactory.toml"), config)?;

    espfactory(dir.path()).arg("merge").assert().failure();

    Ok(())
}

#[test]
fn upload_target_renames_program() -> Result<(), Box<dyn std::error::Error>> {
    let dir = project();

    let out = stdout(espfactory(dir.path()).arg("upload-target"));

    assert_eq!(
        out.trim(),
        dir.path()
            .join("build/merged-firmware.bin")
            .display()
            .to_string()
    );

    Ok(())
}

#[test]
fn upload_target_replaces_firmware() -> Result<(), Box<dyn std::error::Error>> {
    let dir = project();
    let firmware = dir.path().join("build/firmware.bin");

    espfactory(dir.path())
        .arg("merge")
        .arg("--native")
        .assert()
        .success();

    let out = stdout(
        espfactory(dir.path())
            .arg("upload-target")
            .arg("--strategy")
            .arg("replace-firmware"),
    );

    assert_eq!(out.trim(), firmware.display().to_string());
    assert_eq!(fs::read(&firmware)?, expected_merge());
    assert!(!dir.path().join("build/merged-firmware.bin").exists());

    // Nothing left to move, the second run leaves the firmware untouched
    espfactory(dir.path())
        .arg("upload-target")
        .arg("--strategy")
        .arg("replace-firmware")
        .assert()
        .success();
    assert_eq!(fs::read(&firmware)?, expected_merge());

    Ok(())
}

#[test]
fn replace_firmware_without_merged_image() -> Result<(), Box<dyn std::error::Error>> {
    let dir = project();
    let firmware = dir.path().join("build/firmware.bin");

    let out = stdout(
        espfactory(dir.path())
            .arg("upload-target")
            .arg("--strategy")
            .arg("replace-firmware"),
    );

    assert!(out.trim().is_empty());
    assert_eq!(fs::read(&firmware)?, [0xBB; 2]);

    Ok(())
}
