//! End-to-end tests for the `agent-conduit` binary's interactive chat.

#![cfg(unix)]

use std::process::Stdio;
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdout, Command};

use agent_conduit::config::API_KEY_ENV;

const DEADLINE: Duration = Duration::from_secs(10);

/// No agent anywhere and an unreachable endpoint: every answer is local.
const CONFIG: &str = r#"
[agent]
binary_name = "agent-conduit-test-missing"
install_dirs = []
credential_paths = []

[fallback]
endpoint = "http://127.0.0.1:9/v1/messages"
timeout_seconds = 2
"#;

fn spawn_chat(dir: &std::path::Path) -> Child {
    let config = dir.join("config.toml");
    std::fs::write(&config, CONFIG).expect("write config");

    Command::new(env!("CARGO_BIN_EXE_agent-conduit"))
        .arg("--config")
        .arg(&config)
        .arg("--workspace")
        .arg(dir)
        .arg("chat")
        .env_remove(API_KEY_ENV)
        .env("HOME", dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .expect("spawn agent-conduit")
}

/// Read stdout until the next `> ` prompt appears.
async fn next_prompt(stdout: &mut ChildStdout) -> String {
    let mut seen = Vec::new();
    let mut buf = [0u8; 256];
    while !String::from_utf8_lossy(&seen).ends_with("> ") {
        let n = stdout.read(&mut buf).await.expect("read stdout");
        assert!(n > 0, "chat closed stdout: {}", String::from_utf8_lossy(&seen));
        seen.extend_from_slice(&buf[..n]);
    }
    String::from_utf8_lossy(&seen).into_owned()
}

fn interrupt(child: &Child) {
    let pid = child.id().expect("chat still running");
    let pid = i32::try_from(pid).expect("pid fits");
    kill(Pid::from_raw(pid), Signal::SIGINT).expect("deliver SIGINT");
}

#[tokio::test]
async fn ctrl_c_at_the_prompt_exits_after_an_answer() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut child = spawn_chat(dir.path());
    let mut stdin = child.stdin.take().expect("stdin");
    let mut stdout = child.stdout.take().expect("stdout");

    tokio::time::timeout(DEADLINE, next_prompt(&mut stdout))
        .await
        .expect("first prompt");
    stdin.write_all(b"hello\n").await.expect("write question");
    stdin.flush().await.expect("flush");
    tokio::time::timeout(DEADLINE, next_prompt(&mut stdout))
        .await
        .expect("answer, then the prompt again");

    tokio::time::sleep(Duration::from_millis(200)).await;
    interrupt(&child);

    let status = tokio::time::timeout(DEADLINE, child.wait())
        .await
        .expect("chat exits on Ctrl-C at the prompt")
        .expect("wait");
    assert!(status.success(), "{status}");
    drop(stdin);
}

#[tokio::test]
async fn quit_command_ends_the_chat() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut child = spawn_chat(dir.path());
    let mut stdin = child.stdin.take().expect("stdin");
    let mut stdout = child.stdout.take().expect("stdout");

    tokio::time::timeout(DEADLINE, next_prompt(&mut stdout))
        .await
        .expect("first prompt");
    stdin.write_all(b"/quit\n").await.expect("write command");
    stdin.flush().await.expect("flush");

    let status = tokio::time::timeout(DEADLINE, child.wait())
        .await
        .expect("chat exits on /quit")
        .expect("wait");
    assert!(status.success(), "{status}");
    drop(stdin);
}
