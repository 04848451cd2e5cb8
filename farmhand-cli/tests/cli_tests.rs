use std::fs;
use std::net::TcpListener;
use std::path::Path;
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

fn farmhand_cmd(root: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("farmhand"));
    cmd.env("FARMHAND_ROOT", root)
        .env("HOME", root)
        .env_remove("RUST_LOG")
        .env_remove("CHIA_ROOT");
    cmd
}

/// A loopback port with nothing listening on it.
fn closed_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn write_daemon_config(root: &Path, port: u16) {
    let dir = root.join("config");
    fs::create_dir_all(&dir).unwrap();
    fs::write(
        dir.join("config.yaml"),
        format!("self_hostname: 127.0.0.1\ndaemon_port: {port}\n"),
    )
    .unwrap();
}

#[test]
fn init_creates_both_configs() {
    let root = TempDir::new().unwrap();

    farmhand_cmd(root.path())
        .arg("init")
        .assert()
        .success()
        .stdout(contains("farmhand.yaml"))
        .stdout(contains("chia_farmer"))
        .stdout(contains("no daemon_binary set"));

    assert!(root.path().join("farmhand.yaml").exists());
    let daemon = fs::read_to_string(root.path().join("config").join("config.yaml")).unwrap();
    assert!(daemon.contains("log_syslog_port: 11514"), "{daemon}");
}

#[test]
fn init_honours_config_flag() {
    let root = TempDir::new().unwrap();
    let custom = root.path().join("custom").join("farmer.yaml");

    farmhand_cmd(root.path())
        .args(["init", "-c"])
        .arg(&custom)
        .assert()
        .success();

    assert!(custom.exists());
    assert!(!root.path().join("farmhand.yaml").exists());
}

#[test]
fn malformed_config_fails_with_location() {
    let root = TempDir::new().unwrap();
    let config = root.path().join("farmhand.yaml");
    fs::write(&config, "plot_directories: [unterminated\n").unwrap();

    farmhand_cmd(root.path())
        .arg("init")
        .assert()
        .failure()
        .stderr(contains("farmhand.yaml"))
        .stderr(contains("line"));
}

#[test]
fn status_without_daemon_config_suggests_init() {
    let root = TempDir::new().unwrap();
    farmhand_cmd(root.path())
        .arg("status")
        .assert()
        .failure()
        .stderr(contains("farmhand init"));
}

#[test]
fn status_reports_daemon_not_running() {
    let root = TempDir::new().unwrap();
    write_daemon_config(root.path(), closed_port());

    farmhand_cmd(root.path())
        .arg("status")
        .assert()
        .success()
        .stdout(contains("daemon is not running"));
}

#[test]
fn status_json_reports_daemon_not_running() {
    let root = TempDir::new().unwrap();
    let port = closed_port();
    write_daemon_config(root.path(), port);

    let output = farmhand_cmd(root.path())
        .args(["status", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["running"], false);
    assert_eq!(report["endpoint"], format!("127.0.0.1:{port}"));
    assert_eq!(report["services"], serde_json::json!([]));
}

#[test]
fn stop_without_daemon_is_not_an_error() {
    let root = TempDir::new().unwrap();
    write_daemon_config(root.path(), closed_port());

    farmhand_cmd(root.path())
        .arg("stop")
        .assert()
        .success()
        .stdout(contains("daemon is not running"));
}

#[test]
fn help_lists_subcommands() {
    let root = TempDir::new().unwrap();
    farmhand_cmd(root.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("run"))
        .stdout(contains("init"))
        .stdout(contains("status"))
        .stdout(contains("stop"));
}

#[test]
fn init_imports_existing_install() {
    let root = TempDir::new().unwrap();
    let install = TempDir::new().unwrap();
    let config_dir = install.path().join("config");
    fs::create_dir_all(config_dir.join("ssl").join("ca")).unwrap();
    fs::write(
        config_dir.join("config.yaml"),
        "self_hostname: localhost\ndaemon_port: 55400\nharvester:\n  plot_directories: [/mnt/plots]\n",
    )
    .unwrap();
    fs::write(config_dir.join("ssl").join("ca").join("private_ca.crt"), "ca").unwrap();

    farmhand_cmd(root.path())
        .env("CHIA_ROOT", install.path())
        .arg("init")
        .assert()
        .success();

    let farmer = fs::read_to_string(root.path().join("farmhand.yaml")).unwrap();
    assert!(farmer.contains("/mnt/plots"), "{farmer}");
    assert!(root
        .path()
        .join("config/ssl/ca/private_ca.crt")
        .exists());
}

#[test]
fn status_with_missing_certificates_reports_not_running() {
    let root = TempDir::new().unwrap();
    let port = closed_port();
    let dir = root.path().join("config");
    fs::create_dir_all(&dir).unwrap();
    fs::write(
        dir.join("config.yaml"),
        format!(
            "self_hostname: 127.0.0.1\ndaemon_port: {port}\n\
             daemon_ssl:\n  private_crt: config/ssl/daemon/private_daemon.crt\n  private_key: config/ssl/daemon/private_daemon.key\n\
             private_ssl_ca:\n  crt: config/ssl/ca/private_ca.crt\n"
        ),
    )
    .unwrap();

    farmhand_cmd(root.path())
        .arg("status")
        .assert()
        .success()
        .stdout(contains("daemon is not running"));
}
