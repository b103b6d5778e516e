#![cfg(all(unix, feature = "cli"))]

use std::io::{BufRead, BufReader};
use std::process::{Child, Command, Stdio};

/// Start `objlink listen 127.0.0.1:0` and scrape the bound address from its
/// startup log line.
fn spawn_listener(extra_args: &[&str]) -> (Child, String) {
    let mut child = Command::new(env!("CARGO_BIN_EXE_objlink"))
        .args(["--log-level", "info", "listen", "127.0.0.1:0"])
        .args(extra_args)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .expect("listen command should start");

    let stderr = child.stderr.take().expect("stderr should be piped");
    let mut lines = BufReader::new(stderr).lines();
    let addr = loop {
        let line = lines
            .next()
            .expect("listener should log its address before exiting")
            .expect("stderr should be readable");
        if let Some(idx) = line.find("addr=") {
            let rest = &line[idx + "addr=".len()..];
            break rest
                .split_whitespace()
                .next()
                .unwrap_or(rest)
                .to_string();
        }
    };
    // Keep draining so the child never blocks on a full stderr pipe.
    std::thread::spawn(move || for _line in lines {});
    (child, addr)
}

fn call(addr: &str, args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_objlink"))
        .args(["--log-level", "error", "--format", "json", "call", addr])
        .args(args)
        .output()
        .expect("call command should run")
}

#[test]
fn version_prints_the_crate_version() {
    let output = Command::new(env!("CARGO_BIN_EXE_objlink"))
        .arg("version")
        .output()
        .expect("version command should run");
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).expect("stdout should be utf-8");
    assert_eq!(stdout.trim(), format!("objlink {}", env!("CARGO_PKG_VERSION")));
}

#[test]
fn call_invokes_the_demo_root() {
    let (mut child, addr) = spawn_listener(&[]);

    let output = call(&addr, &["add", "20", "22"]);
    assert!(
        output.status.success(),
        "call should succeed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let result: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("result should be json");
    assert_eq!(result["kind"], "int");
    assert_eq!(result["value"], 42);

    let echoed = call(&addr, &["echo", "\"round trip\""]);
    assert!(echoed.status.success());
    let result: serde_json::Value =
        serde_json::from_slice(&echoed.stdout).expect("result should be json");
    assert_eq!(result["kind"], "string");
    assert_eq!(result["value"], "round trip");

    let _ = child.kill();
    let _ = child.wait();
}

#[test]
fn remote_throw_maps_to_the_exception_exit_code() {
    let (mut child, addr) = spawn_listener(&[]);

    let output = call(&addr, &["no_such_method"]);
    assert_eq!(output.status.code(), Some(70));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("no such method"), "stderr was: {stderr}");

    let _ = child.kill();
    let _ = child.wait();
}

#[test]
fn module_allowlist_refuses_other_modules() {
    let (mut child, addr) = spawn_listener(&["--modules", "demo"]);

    let allowed = call(&addr, &["describe", "--module", "demo"]);
    assert!(allowed.status.success());

    let refused = call(&addr, &["describe", "--module", "other"]);
    assert!(!refused.status.success());
    let stderr = String::from_utf8_lossy(&refused.stderr);
    assert!(stderr.contains("not served"), "stderr was: {stderr}");

    let _ = child.kill();
    let _ = child.wait();
}
