//! CLI tests for ota-pack

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn ota_pack(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("ota-pack").unwrap();
    cmd.current_dir(dir).env_remove("RUST_LOG");
    cmd
}

fn setup() -> TempDir {
    let dir = TempDir::new().unwrap();
    let data: Vec<u8> = (0..1000u32).map(|i| (i % 256) as u8).collect();
    fs::write(dir.path().join("app.bin"), data).unwrap();
    dir
}

fn pack_uncompressed(dir: &Path) -> PathBuf {
    ota_pack(dir)
        .args(["pack", "-i", "app.bin", "-c", "none", "-v", "1.2.3"])
        .assert()
        .success()
        .stdout(predicate::str::contains("OTA image created"));
    dir.join("custom_ota_binaries").join("app.bin.packed")
}

#[test]
fn test_pack_command() {
    let dir = setup();
    let output = pack_uncompressed(dir.path());

    let image = fs::read(&output).unwrap();
    assert_eq!(image.len(), 80 + 1000);
    assert_eq!(&image[..4], b"ESP\0");
}

#[test]
fn test_pack_is_the_default_command() {
    let dir = setup();
    ota_pack(dir.path())
        .args(["-i", "app.bin", "-o", "out"])
        .assert()
        .success();

    assert!(dir.path().join("out").join("app.bin.xz.packed").is_file());
}

#[test]
fn test_pack_reads_flasher_args() {
    let dir = setup();
    fs::create_dir_all(dir.path().join("build")).unwrap();
    fs::rename(dir.path().join("app.bin"), dir.path().join("build/hello.bin")).unwrap();
    fs::write(
        dir.path().join("build/flasher_args.json"),
        r#"{ "app": { "offset": "0x10000", "file": "hello.bin" } }"#,
    )
    .unwrap();

    ota_pack(dir.path())
        .args(["pack", "--build-dir", "build", "-c", "none"])
        .assert()
        .success();

    assert!(
        dir.path()
            .join("custom_ota_binaries/hello.bin.packed")
            .is_file()
    );
}

#[test]
fn test_pack_with_project_file() {
    let dir = setup();
    fs::write(
        dir.path().join(".ota-pack.toml"),
        "in_file = \"app.bin\"\ncompress_type = \"none\"\nheader_version = \"v2\"\n",
    )
    .unwrap();

    ota_pack(dir.path()).arg("pack").assert().success();

    let image = fs::read(dir.path().join("custom_ota_binaries/app.bin.packed")).unwrap();
    assert_eq!(image.len(), 88 + 1000);
    assert_eq!(image[4], 2);
}

#[test]
fn test_info_command() {
    let dir = setup();
    let output = pack_uncompressed(dir.path());

    ota_pack(dir.path())
        .arg("info")
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("Firmware version: 1.2.3"))
        .stdout(predicate::str::contains("Payload: 1000 bytes"));
}

#[test]
fn test_info_json() {
    let dir = setup();
    let output = pack_uncompressed(dir.path());

    let assert = ota_pack(dir.path())
        .args(["info", "--json"])
        .arg(&output)
        .assert()
        .success();

    let value: serde_json::Value = serde_json::from_slice(&assert.get_output().stdout).unwrap();
    assert_eq!(value["header_version"], 1);
    assert_eq!(value["header_size"], 80);
    assert_eq!(value["compression"], "none");
    assert_eq!(value["firmware_version"], "1.2.3");
    assert_eq!(value["payload_length"], 1000);
    assert!(value["base_check_length"].is_null());
}

#[test]
fn test_verify_command() {
    let dir = setup();
    let output = pack_uncompressed(dir.path());

    ota_pack(dir.path())
        .arg("verify")
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("Image verification successful"));
}

#[test]
fn test_verify_detects_corruption() {
    let dir = setup();
    let output = pack_uncompressed(dir.path());

    let mut image = fs::read(&output).unwrap();
    image[500] ^= 0xff;
    fs::write(&output, &image).unwrap();

    ota_pack(dir.path())
        .arg("verify")
        .arg(&output)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("MD5"));

    image[10] ^= 0xff;
    fs::write(&output, &image).unwrap();

    ota_pack(dir.path())
        .arg("verify")
        .arg(&output)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("CRC"));
}

#[test]
fn test_verify_encrypted_image() {
    let dir = setup();
    fs::write(dir.path().join("aes.key"), [0x42u8; 16]).unwrap();

    ota_pack(dir.path())
        .args([
            "pack",
            "-i",
            "app.bin",
            "-e",
            "aes128",
            "--encrypt-key",
            "aes.key",
        ])
        .assert()
        .success();

    let output = "custom_ota_binaries/app.bin.xz.packed.encrypted";
    ota_pack(dir.path())
        .args(["verify", output])
        .assert()
        .code(2);

    ota_pack(dir.path())
        .args(["verify", output, "--encrypt-key", "aes.key"])
        .assert()
        .success();
}

#[test]
fn test_missing_input_fails() {
    let dir = TempDir::new().unwrap();
    ota_pack(dir.path())
        .args(["pack", "-i", "nonexistent.bin"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn test_invalid_options_fail() {
    let dir = setup();
    ota_pack(dir.path())
        .args(["pack", "-i", "app.bin", "-V", "2", "-d", "ddelta"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("base file"));

    ota_pack(dir.path())
        .args(["pack", "-i", "app.bin", "-v", "0123456789abcdef0123456789abcdef"])
        .assert()
        .code(2);
}

#[test]
fn test_quiet_pack() {
    let dir = setup();
    ota_pack(dir.path())
        .args(["pack", "-q", "-i", "app.bin"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}
