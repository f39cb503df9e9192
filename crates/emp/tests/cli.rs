#![cfg(feature = "cli")]

use std::net::TcpListener;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use emp_frame::{Frame, FrameKind, FrameReader, FrameWriter};
use emp_transport::{connect, AgentListener};

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .and_then(|listener| listener.local_addr())
        .expect("ephemeral port should be available")
        .port()
}

fn emp() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_emp"));
    cmd.arg("--log-level").arg("error");
    for var in [
        "SWI_EMP_SERVER_ADDR",
        "SWI_EMP_SERVER_PORT",
        "SWI_EMP_CMD_TIMEOUT",
        "SWI_EMP_RETRY_IPC_BROKEN",
        "SWI_EMP_TIMEOUT_IPC_BROKEN",
        "SWI_EMP_RETRY_RESET",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

fn spawn_agent(port: u16, extra: &[&str]) -> Child {
    let child = emp()
        .arg("agent")
        .arg("--port")
        .arg(port.to_string())
        .args(extra)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("mock agent should start");
    wait_for_listener(port, Duration::from_secs(5));
    child
}

fn wait_for_listener(port: u16, timeout: Duration) {
    let start = Instant::now();
    // The check connection closes right away and the mock agent moves on to the next client.
    while connect("127.0.0.1", port).is_err() {
        if start.elapsed() >= timeout {
            panic!("mock agent did not come up on port {port}");
        }
        thread::sleep(Duration::from_millis(25));
    }
}

fn stop(mut child: Child) {
    let _ = child.kill();
    let _ = child.wait();
}

#[test]
fn send_against_mock_agent_prints_echo() {
    let port = free_port();
    let agent = spawn_agent(port, &[]);

    let output = emp()
        .arg("--format")
        .arg("json")
        .arg("send")
        .arg("--port")
        .arg(port.to_string())
        .arg("-c")
        .arg("42")
        .arg("--data")
        .arg("ping")
        .output()
        .expect("send should run");

    stop(agent);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let reply: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("send should emit json");
    assert_eq!(reply["event"], "reply");
    assert_eq!(reply["command"], 42);
    assert_eq!(reply["status_name"], "OK");
    assert_eq!(reply["payload"], "ping");
}

#[test]
fn agent_error_status_fails_the_send() {
    let port = free_port();
    let agent = spawn_agent(port, &["--status", "NOT_FOUND"]);

    let output = emp()
        .arg("--format")
        .arg("json")
        .arg("send")
        .arg("--port")
        .arg(port.to_string())
        .arg("-c")
        .arg("7")
        .output()
        .expect("send should run");

    stop(agent);
    assert_eq!(output.status.code(), Some(1));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("\"status_name\":\"NOT_FOUND\""));
}

#[test]
fn send_to_closed_port_is_transport_error() {
    let output = emp()
        .arg("send")
        .arg("--port")
        .arg(free_port().to_string())
        .arg("-c")
        .arg("1")
        .output()
        .expect("send should run");

    assert_eq!(output.status.code(), Some(3));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("connect failed"));
}

#[test]
fn listen_answers_agent_commands() {
    let listener = AgentListener::bind_loopback(0).expect("agent listener should bind");
    let port = listener.port();

    let child = emp()
        .arg("--format")
        .arg("json")
        .arg("listen")
        .arg("--port")
        .arg(port.to_string())
        .arg("--commands")
        .arg("33,34")
        .arg("--status")
        .arg("BUSY")
        .arg("--count")
        .arg("1")
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("listen should start");

    let stream = listener.accept().expect("listen should connect");
    let mut reader = FrameReader::new(stream.try_clone().expect("stream should clone"));
    let mut writer = FrameWriter::new(stream);

    writer
        .write_frame(&Frame::command(34, 5, &b"hello"[..]))
        .expect("command should be written");
    let answer = reader.read_frame().expect("listen should answer");
    assert_eq!(answer.kind, FrameKind::Response);
    assert_eq!(answer.command, 34);
    assert_eq!(answer.request_id, 5);
    assert_eq!(
        answer.response_status().map(|(status, _)| status),
        Some(emp_client::Status::BUSY.code())
    );

    let output = child.wait_with_output().expect("listen should exit");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("\"event\":\"inbound\""));
    assert!(stdout.contains("\"payload\":\"hello\""));
}

#[test]
fn envinfo_reports_effective_config() {
    let output = emp()
        .env("SWI_EMP_SERVER_PORT", "4100")
        .env("SWI_EMP_CMD_TIMEOUT", "0")
        .arg("--format")
        .arg("json")
        .arg("envinfo")
        .output()
        .expect("envinfo should run");

    assert!(output.status.success());
    let payload: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("envinfo should emit json");
    assert_eq!(payload["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(payload["config"]["address"], "127.0.0.1:4100");
    assert!(payload["config"]["request_timeout_secs"].is_null());
    assert_eq!(payload["environment"]["SWI_EMP_SERVER_PORT"], "4100");
}

#[test]
fn version_prints_package_version() {
    let output = emp().arg("version").output().expect("version should run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.trim(), format!("emp {}", env!("CARGO_PKG_VERSION")));
}
