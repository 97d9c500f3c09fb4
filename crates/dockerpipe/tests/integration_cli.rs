//! CLI surface tests: help, configuration resolution and unit rendering

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// The binary with no ambient DOCKERPIPE_* configuration
fn dockerpipe() -> Command {
    let mut cmd = Command::cargo_bin("dockerpipe").unwrap();
    for var in [
        "DOCKERPIPE_CONFIG",
        "DOCKERPIPE_CHANNEL",
        "DOCKERPIPE_APP_DIR",
        "DOCKERPIPE_LOG_FILE",
        "DOCKERPIPE_FRAMING",
        "DOCKERPIPE_SHELL",
        "DOCKERPIPE_LOG",
        "DOCKERPIPE_LOG_FORMAT",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

#[test]
fn test_help_output() {
    dockerpipe()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("named pipe"))
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("ensure-channel"))
        .stdout(predicate::str::contains("send"))
        .stdout(predicate::str::contains("unit"))
        .stdout(predicate::str::contains("show-config"));
}

#[test]
fn test_version_output() {
    dockerpipe()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(format!(
            "dockerpipe {}",
            env!("CARGO_PKG_VERSION")
        )));
}

#[test]
fn test_show_config_defaults() {
    let temp = TempDir::new().unwrap();
    dockerpipe()
        .args(["show-config", "--app-dir"])
        .arg(temp.path())
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "channel_path = \"/opt/cmdpipe/dockerpipe\"",
        ))
        .stdout(predicate::str::contains("channel_mode = \"0666\""))
        .stdout(predicate::str::contains("framing = \"close\""))
        .stdout(predicate::str::contains("logs/system/commands.log"))
        .stdout(predicate::str::contains("user = \"pi\""))
        .stdout(predicate::str::contains("restart = \"always\""));
}

#[test]
fn test_show_config_layer_precedence() {
    let temp = TempDir::new().unwrap();
    let config = temp.path().join("dockerpipe.toml");
    fs::write(
        &config,
        r#"
channel_path = "/from/file"
channel_mode = "0620"
log_file = "file.log"
shell = "bash"
framing = "line"
"#,
    )
    .unwrap();

    dockerpipe()
        .arg("--config")
        .arg(&config)
        .args(["--app-dir", "/srv/app", "--framing", "length-prefixed"])
        .env("DOCKERPIPE_CHANNEL", "/from/env")
        .arg("show-config")
        .assert()
        .success()
        .stdout(predicate::str::contains("channel_path = \"/from/env\""))
        .stdout(predicate::str::contains("channel_mode = \"0620\""))
        .stdout(predicate::str::contains("log_file = \"/srv/app/file.log\""))
        .stdout(predicate::str::contains("shell = \"bash\""))
        .stdout(predicate::str::contains("framing = \"length-prefixed\""));
}

#[test]
fn test_missing_config_file_exits_2() {
    let temp = TempDir::new().unwrap();
    dockerpipe()
        .arg("--config")
        .arg(temp.path().join("absent.toml"))
        .arg("show-config")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Configuration file not found"));
}

#[test]
fn test_invalid_config_exits_2() {
    let temp = TempDir::new().unwrap();
    let config = temp.path().join("dockerpipe.toml");
    fs::write(&config, "channel_mode = \"0999\"\n").unwrap();

    dockerpipe()
        .arg("--config")
        .arg(&config)
        .arg("show-config")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("channel_mode"));
}

#[test]
fn test_unknown_config_key_exits_2() {
    let temp = TempDir::new().unwrap();
    let config = temp.path().join("dockerpipe.toml");
    fs::write(&config, "pipe_path = \"/tmp/p\"\n").unwrap();

    dockerpipe()
        .arg("--config")
        .arg(&config)
        .arg("show-config")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Failed to parse configuration file"));
}

#[test]
fn test_unit_renders_systemd_service() {
    let temp = TempDir::new().unwrap();
    let config = temp.path().join("dockerpipe.toml");
    fs::write(
        &config,
        r#"
app_dir = "/home/pi/app"

[service]
restart = "bounded"
max_restarts = 5
restart_delay_secs = 3
"#,
    )
    .unwrap();

    dockerpipe()
        .arg("--config")
        .arg(&config)
        .arg("unit")
        .assert()
        .success()
        .stdout(predicate::str::contains("[Service]"))
        .stdout(predicate::str::contains("User=pi"))
        .stdout(predicate::str::contains("WorkingDirectory=/home/pi/app"))
        .stdout(predicate::str::contains(format!(
            "ExecStart=/usr/local/bin/dockerpipe --config {} run",
            config.display()
        )))
        .stdout(predicate::str::contains("Restart=on-failure"))
        .stdout(predicate::str::contains("RestartSec=3"))
        .stdout(predicate::str::contains("StartLimitBurst=5"));
}

#[test]
fn test_unit_writes_output_file() {
    let temp = TempDir::new().unwrap();
    let output = temp.path().join("dockerpipe.service");

    dockerpipe()
        .args(["--app-dir", "/home/pi/app", "unit", "--output"])
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::is_empty());

    let unit = fs::read_to_string(&output).unwrap();
    assert!(unit.contains("Restart=always"));
    assert!(unit.contains("RestartSec=10"));
    assert!(unit.contains("ExecStart=/usr/local/bin/dockerpipe run"));
}
