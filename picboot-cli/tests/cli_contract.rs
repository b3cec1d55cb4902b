//! Integration tests for core CLI contract behavior.

use {predicates::prelude::*, std::fs, std::path::Path, tempfile::tempdir};

/// Four bytes at address 0 followed by the EOF record.
const SMALL_HEX: &str = ":0400000001020304F2\n:00000001FF\n";

fn cli_cmd() -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("picboot");
    for var in [
        "PICBOOT_FLASH_SIZE",
        "PICBOOT_PORT",
        "PICBOOT_BAUD",
        "PICBOOT_IDLE_TIMEOUT",
        "RUST_LOG",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

fn empty_config(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("empty.toml");
    fs::write(&path, "").expect("write empty config");
    path
}

#[test]
fn help_exits_zero_and_writes_stdout_only() {
    let mut cmd = cli_cmd();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("picboot"))
        .stdout(predicate::str::contains("FLASH_SIZE"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn short_help_exits_zero_and_writes_stdout_only() {
    let mut cmd = cli_cmd();
    cmd.arg("-h")
        .assert()
        .success()
        .stdout(predicate::str::contains("picboot"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn version_exits_zero_and_writes_stdout_only() {
    let mut cmd = cli_cmd();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("picboot"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn short_version_exits_zero_and_writes_stdout_only() {
    let mut cmd = cli_cmd();
    cmd.arg("-V")
        .assert()
        .success()
        .stdout(predicate::str::contains("picboot"))
        .stderr(predicate::str::is_empty());
}

// ============================================================================
// Exit Code Tests - Following CLI Standards Contract
// ============================================================================

/// Exit code 2: no arguments prints usage
#[test]
fn exit_code_two_without_arguments() {
    let mut cmd = cli_cmd();
    cmd.assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn exit_code_two_for_usage_error_invalid_flag() {
    let mut cmd = cli_cmd();
    cmd.arg("--invalid-flag-xyz")
        .assert()
        .failure()
        .code(2);
}

#[test]
fn exit_code_two_for_invalid_flash_size() {
    let mut cmd = cli_cmd();
    cmd.args(["App.hex", "not-hex"])
        .assert()
        .failure()
        .code(2);
}

#[test]
fn exit_code_two_for_missing_port() {
    let dir = tempdir().expect("tempdir should be created");
    let config = empty_config(dir.path());

    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .arg("--config")
        .arg(&config)
        .args(["App.hex", "0x4000"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("COM_PORT"));
}

#[test]
fn exit_code_two_for_missing_baud_rate() {
    let dir = tempdir().expect("tempdir should be created");
    let config = empty_config(dir.path());

    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .arg("--config")
        .arg(&config)
        .args(["App.hex", "0x4000", "/dev/ttyUSB0"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("BAUD_RATE"));
}

/// Exit code 1: firmware cannot be read
#[test]
fn exit_code_one_for_missing_firmware_file() {
    let dir = tempdir().expect("tempdir should be created");
    let config = empty_config(dir.path());
    let missing = dir.path().join("does_not_exist.hex");

    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .arg("--config")
        .arg(&config)
        .arg(&missing)
        .args(["0x4000", "/dev/ttyUSB0", "9600"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("Failed to prepare firmware"));
}

#[test]
fn environment_supplies_missing_arguments() {
    let dir = tempdir().expect("tempdir should be created");
    let config = empty_config(dir.path());

    // Reaching the firmware step (exit 1, not 2) shows the env values were used.
    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .env("PICBOOT_FLASH_SIZE", "0x4000")
        .env("PICBOOT_PORT", "/dev/ttyUSB0")
        .env("PICBOOT_BAUD", "9600")
        .arg("--config")
        .arg(&config)
        .arg("missing.hex")
        .assert()
        .failure()
        .code(1);
}

#[test]
fn local_config_supplies_missing_arguments() {
    let dir = tempdir().expect("tempdir should be created");
    fs::write(
        dir.path().join("picboot.toml"),
        r#"
[connection]
port = "/dev/ttyUSB0"
baud = 9600

[target]
flash_size = "0x4000"
"#,
    )
    .expect("write config");

    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .arg("missing.hex")
        .assert()
        .failure()
        .code(1);
}

#[test]
fn invalid_config_file_is_a_warning() {
    let dir = tempdir().expect("tempdir should be created");
    fs::write(dir.path().join("picboot.toml"), "invalid toml [[[").expect("write invalid config");

    let output = cli_cmd()
        .current_dir(dir.path())
        .args(["missing.hex", "0x4000", "/dev/ttyUSB0", "9600"])
        .output()
        .expect("command should execute");

    // Fails on the firmware, not on the config
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("TOML"), "should warn about invalid TOML");
}

/// Exit code 3: serial port cannot be opened
#[test]
fn exit_code_three_for_unopenable_port() {
    let dir = tempdir().expect("tempdir should be created");
    let config = empty_config(dir.path());
    let hex = dir.path().join("App.hex");
    fs::write(&hex, SMALL_HEX).expect("write firmware");

    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .arg("--config")
        .arg(&config)
        .arg(&hex)
        .args(["0x10", "/nonexistent/picboot-port", "9600"])
        .assert()
        .failure()
        .code(3)
        .stderr(predicate::str::contains("Failed to open serial port"));

    // The binary artifact is produced before the port is touched.
    let bin = fs::read(dir.path().join("App.bin")).expect("App.bin should exist");
    assert_eq!(bin.len(), 0x10);
    assert_eq!(&bin[..4], &[0x01, 0x02, 0x03, 0x04]);
}

#[test]
fn quiet_mode_suppresses_banners() {
    let dir = tempdir().expect("tempdir should be created");
    let config = empty_config(dir.path());
    let hex = dir.path().join("App.hex");
    fs::write(&hex, SMALL_HEX).expect("write firmware");

    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .arg("-q")
        .arg("--config")
        .arg(&config)
        .arg(&hex)
        .args(["0x10", "/nonexistent/picboot-port", "9600"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Preparing firmware").not());
}
