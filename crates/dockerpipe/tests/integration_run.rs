//! Foreground dispatcher tests: the binary is started, fed through the
//! channel, killed and restarted the way a service manager would.

#![cfg(unix)]

use assert_cmd::cargo::cargo_bin;
use assert_cmd::Command as AssertCommand;
use std::fs;
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};
use tempfile::TempDir;

const WAIT: Duration = Duration::from_secs(10);

struct Node {
    temp: TempDir,
    channel: PathBuf,
    log_file: PathBuf,
}

impl Node {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let channel = temp.path().join("cmdpipe/dockerpipe");
        let log_file = temp.path().join("logs/system/commands.log");
        Self {
            temp,
            channel,
            log_file,
        }
    }

    fn spawn(&self) -> Child {
        let child = Command::new(cargo_bin("dockerpipe"))
            .arg("--channel")
            .arg(&self.channel)
            .arg("--app-dir")
            .arg(self.temp.path())
            .arg("run")
            .env_remove("DOCKERPIPE_CONFIG")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .unwrap();
        wait_for(|| is_fifo(&self.channel));
        child
    }

    fn send(&self, command: &str) {
        AssertCommand::cargo_bin("dockerpipe")
            .unwrap()
            .env_remove("DOCKERPIPE_CONFIG")
            .arg("--channel")
            .arg(&self.channel)
            .args(["send", "--raw", command])
            .timeout(WAIT)
            .assert()
            .success();
    }

    fn log(&self) -> String {
        fs::read_to_string(&self.log_file).unwrap_or_default()
    }

    fn wait_for_log(&self, needle: &str) {
        wait_for(|| self.log().contains(needle));
    }
}

fn is_fifo(path: &Path) -> bool {
    fs::metadata(path)
        .map(|m| m.file_type().is_fifo())
        .unwrap_or(false)
}

fn wait_for(mut condition: impl FnMut() -> bool) {
    let start = Instant::now();
    while !condition() {
        assert!(start.elapsed() < WAIT, "timed out waiting for condition");
        std::thread::sleep(Duration::from_millis(25));
    }
}

/// Whether the test process can switch to another account
fn can_switch_user(scratch: &Path) -> bool {
    let marker = scratch.join("owner-check");
    fs::write(&marker, "").unwrap();
    let is_root = fs::metadata(&marker).unwrap().uid() == 0;
    fs::remove_file(&marker).unwrap();

    is_root
        && Command::new("setpriv")
            .arg("--version")
            .output()
            .map(|out| out.status.success())
            .unwrap_or(false)
}

fn stop(mut child: Child) {
    let _ = child.kill();
    let _ = child.wait();
}

#[test]
fn test_run_executes_and_logs_commands() {
    let node = Node::new();
    let child = node.spawn();

    node.send("echo hello >> x");
    node.wait_for_log("Command finished: echo hello >> x (exit 0)");
    stop(child);

    assert_eq!(
        fs::read_to_string(node.temp.path().join("x")).unwrap(),
        "hello\n"
    );
    let log = node.log();
    assert!(log.contains("Command received: echo hello >> x"));
}

#[test]
fn test_failing_command_is_logged_and_loop_continues() {
    let node = Node::new();
    let child = node.spawn();

    node.send("echo oops >&2; exit 7");
    node.wait_for_log("(exit 7)");
    node.send("echo still-alive");
    node.wait_for_log("Command finished: echo still-alive (exit 0)");
    stop(child);

    let log = node.log();
    assert!(log.contains("oops\n"));
    assert!(log.contains("still-alive\n"));
}

#[test]
fn test_restart_after_crash_reuses_channel() {
    let node = Node::new();

    let child = node.spawn();
    node.send("echo before-crash");
    node.wait_for_log("Command finished: echo before-crash (exit 0)");
    stop(child);

    // The channel survives the dispatcher
    assert!(is_fifo(&node.channel));

    let child = node.spawn();
    node.send("echo after-restart");
    node.wait_for_log("Command finished: echo after-restart (exit 0)");
    stop(child);

    let log = node.log();
    let before = log.find("echo before-crash (exit 0)").unwrap();
    let after = log.find("Command received: echo after-restart").unwrap();
    assert!(before < after);
}

#[test]
fn test_service_account_runs_over_root_provisioned_channel() {
    let node = Node::new();
    if !can_switch_user(node.temp.path()) {
        eprintln!("Skipping: requires root and setpriv");
        return;
    }

    let root = node.temp.path();
    fs::set_permissions(root, fs::Permissions::from_mode(0o755)).unwrap();

    // The unprivileged account cannot reach the cargo target directory
    let binary = root.join("bin/dockerpipe");
    fs::create_dir_all(binary.parent().unwrap()).unwrap();
    fs::copy(cargo_bin("dockerpipe"), &binary).unwrap();
    fs::set_permissions(&binary, fs::Permissions::from_mode(0o755)).unwrap();

    let app_dir = root.join("app");
    fs::create_dir(&app_dir).unwrap();
    fs::set_permissions(&app_dir, fs::Permissions::from_mode(0o777)).unwrap();
    let log_file = app_dir.join("logs/system/commands.log");

    // Install step, as root
    AssertCommand::cargo_bin("dockerpipe")
        .unwrap()
        .env_remove("DOCKERPIPE_CONFIG")
        .arg("--channel")
        .arg(&node.channel)
        .arg("ensure-channel")
        .assert()
        .success();

    let mut child = Command::new("setpriv")
        .args(["--reuid=65534", "--regid=65534", "--clear-groups"])
        .arg(&binary)
        .arg("--channel")
        .arg(&node.channel)
        .arg("--app-dir")
        .arg(&app_dir)
        .arg("run")
        .env_remove("DOCKERPIPE_CONFIG")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    wait_for(|| log_file.exists() || child.try_wait().unwrap().is_some());
    assert!(
        child.try_wait().unwrap().is_none(),
        "dispatcher exited instead of waiting for a writer"
    );

    node.send("echo from-service-account");
    wait_for(|| {
        fs::read_to_string(&log_file)
            .unwrap_or_default()
            .contains("Command finished: echo from-service-account (exit 0)")
    });
    stop(child);

    // The provisioned channel keeps its owner and mode
    let meta = fs::metadata(&node.channel).unwrap();
    assert_eq!(meta.uid(), 0);
    assert_eq!(meta.permissions().mode() & 0o777, 0o666);
}
