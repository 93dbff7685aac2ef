// CLI integration tests for one-shot commands and the stdio bridge.
use std::io::Write;
use std::process::{Command, Stdio};

use serde_json::{Value, json};

fn cmd() -> Command {
    let exe = env!("CARGO_BIN_EXE_portstash");
    Command::new(exe)
}

fn parse_json(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes).expect("valid json")
}

fn json_lines(bytes: &[u8]) -> Vec<Value> {
    String::from_utf8_lossy(bytes)
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).expect("json line"))
        .collect()
}

#[test]
fn set_get_remove_flow() {
    let temp = tempfile::tempdir().expect("tempdir");
    let dir = temp.path().join("origins");
    let dir = dir.to_str().unwrap();

    let set = cmd()
        .args(["--dir", dir, "set", "app", "session", "{\"user\":\"ana\"}"])
        .output()
        .expect("set");
    assert!(set.status.success());
    assert_eq!(parse_json(&set.stdout)["value"]["user"], "ana");

    let get = cmd()
        .args(["--dir", dir, "get", "app", "session"])
        .output()
        .expect("get");
    assert!(get.status.success());
    assert_eq!(
        parse_json(&get.stdout),
        json!({"key": "session", "value": {"user": "ana"}})
    );

    let keys = cmd().args(["--dir", dir, "keys", "app"]).output().expect("keys");
    assert!(keys.status.success());
    assert_eq!(parse_json(&keys.stdout), json!({"keys": ["session"]}));

    for _ in 0..2 {
        let remove = cmd()
            .args(["--dir", dir, "remove", "app", "session"])
            .output()
            .expect("remove");
        assert!(remove.status.success());
    }

    let missing = cmd()
        .args(["--dir", dir, "get", "app", "session"])
        .output()
        .expect("get");
    assert_eq!(missing.status.code(), Some(3));
    let err = parse_json(&missing.stderr);
    assert_eq!(err["error"]["kind"], "NotFound");
    assert_eq!(err["error"]["key"], "session");
}

#[test]
fn invalid_json_value_is_usage_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let dir = temp.path().to_str().unwrap().to_string();
    let output = cmd()
        .args(["--dir", &dir, "set", "app", "k", "not json"])
        .output()
        .expect("set");
    assert_eq!(output.status.code(), Some(2));
    assert_eq!(parse_json(&output.stderr)["error"]["kind"], "Usage");
}

#[test]
fn quota_exceeded_exit_code() {
    let temp = tempfile::tempdir().expect("tempdir");
    let dir = temp.path().to_str().unwrap().to_string();
    let output = cmd()
        .args([
            "--dir",
            &dir,
            "set",
            "app",
            "k",
            "\"far too long for the quota\"",
            "--quota-bytes",
            "8",
        ])
        .output()
        .expect("set");
    assert_eq!(output.status.code(), Some(6));
    assert_eq!(parse_json(&output.stderr)["error"]["kind"], "QuotaExceeded");
}

#[test]
fn bridge_speaks_ports_over_stdio() {
    let temp = tempfile::tempdir().expect("tempdir");
    let dir = temp.path().to_str().unwrap().to_string();

    let seed = cmd()
        .args(["--dir", &dir, "set", "app", "suzdal", "{\"theme\":\"dark\"}"])
        .output()
        .expect("seed");
    assert!(seed.status.success());

    let mut child = cmd()
        .args([
            "--dir",
            &dir,
            "bridge",
            "app",
            "--session-key",
            "suzdal",
            "--peer-latency-ms",
            "0",
            "--poll-ms",
            "0",
        ])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn");

    {
        let stdin = child.stdin.as_mut().expect("stdin");
        let requests = [
            r#"{"port":"save","key":"k","value":{"n":1}}"#,
            r#"{"port":"load","key":"k"}"#,
            r#"{"port":"nope"}"#,
            r#"{"port":"remove","key":"k"}"#,
            r#"{"port":"load","key":"k"}"#,
            r#"{"port":"storePeers","value":["10.0.0.1"]}"#,
            r#"{"port":"fetchPeers"}"#,
            r#"{"port":"setStorage","value":null}"#,
        ];
        for request in requests {
            writeln!(stdin, "{request}").expect("write");
        }
    }
    drop(child.stdin.take());

    let output = child.wait_with_output().expect("wait");
    assert!(output.status.success());

    let events = json_lines(&output.stdout);
    assert_eq!(
        events,
        vec![
            json!({"port": "init", "flags": {"theme": "dark"}}),
            json!({"port": "loaded", "key": "k", "value": {"n": 1}}),
            json!({"port": "loaded", "key": "k"}),
            json!({"port": "peersLoaded", "value": ["10.0.0.1"]}),
        ]
    );

    let stderr = String::from_utf8_lossy(&output.stderr);
    let notice = stderr
        .lines()
        .filter_map(|line| serde_json::from_str::<Value>(line).ok())
        .find(|value| value.get("notice").is_some())
        .expect("bad request notice");
    assert_eq!(notice["notice"]["kind"], "bad_request");
    assert_eq!(notice["notice"]["details"]["line"], 3);

    let cleared = cmd()
        .args(["--dir", &dir, "get", "app", "suzdal"])
        .output()
        .expect("get");
    assert_eq!(cleared.status.code(), Some(3));
}

#[test]
fn bridge_drains_delayed_peer_reply_after_stdin_closes() {
    let temp = tempfile::tempdir().expect("tempdir");
    let dir = temp.path().to_str().unwrap().to_string();

    let mut child = cmd()
        .args(["--dir", &dir, "bridge", "app"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn");

    {
        let stdin = child.stdin.as_mut().expect("stdin");
        writeln!(stdin, r#"{{"port":"storePeers","value":["10.0.0.2"]}}"#).expect("write");
        writeln!(stdin, r#"{{"port":"fetchPeers"}}"#).expect("write");
    }
    drop(child.stdin.take());

    let output = child.wait_with_output().expect("wait");
    assert!(output.status.success());

    let events = json_lines(&output.stdout);
    assert_eq!(
        events,
        vec![
            json!({"port": "init", "flags": null}),
            json!({"port": "peersLoaded", "value": ["10.0.0.2"]}),
        ]
    );
}
