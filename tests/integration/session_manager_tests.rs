//! Integration tests for the agent session driver against scripted `sh`
//! agents: event ordering, turn handling, exit reporting, idle timeout,
//! environment isolation, and teardown.

#![cfg(unix)]

use std::time::Duration;

use futures_util::StreamExt;

use agent_conduit::agent::decoder::Event;
use agent_conduit::agent::session::{EventStream, SESSION_ID_ENV};
use agent_conduit::{AppError, Result};

use super::test_helpers::{fake_agent, options, CHATTY_AGENT, COUNTING_AGENT};

const TURN_DEADLINE: Duration = Duration::from_secs(10);

async fn collect(stream: EventStream) -> Vec<Result<Event>> {
    tokio::time::timeout(TURN_DEADLINE, stream.collect::<Vec<_>>())
        .await
        .expect("turn finishes in time")
}

#[tokio::test]
async fn events_arrive_in_wire_order_and_bad_lines_do_not_stop_the_turn() {
    let dir = tempfile::tempdir().expect("tempdir");
    let manager = fake_agent(dir.path(), CHATTY_AGENT, None);
    let session = manager.start(&options(dir.path())).await.expect("start");

    session.send("hi").await.expect("send");
    let events: Vec<Event> = collect(session.stream().await)
        .await
        .into_iter()
        .map(|item| item.expect("no stream error"))
        .collect();

    assert_eq!(events.len(), 6);
    assert!(matches!(&events[0], Event::SystemNotice { subtype, .. } if subtype == "init"));
    assert_eq!(
        events[1],
        Event::TextChunk {
            content: "Hello".to_owned()
        }
    );
    assert_eq!(
        events[2],
        Event::DecodeError {
            raw_line: "not json".to_owned()
        }
    );
    assert!(matches!(&events[3], Event::ToolUse { tool, .. } if tool == "Read"));
    assert_eq!(
        events[4],
        Event::TextChunk {
            content: " world".to_owned()
        }
    );
    assert_eq!(
        events[5],
        Event::Result {
            is_error: false,
            session_id: Some("s-1".to_owned()),
            turn_count: 1,
        }
    );

    session.stop().await;
}

#[tokio::test]
async fn process_persists_across_turns() {
    let dir = tempfile::tempdir().expect("tempdir");
    let manager = fake_agent(dir.path(), COUNTING_AGENT, None);
    let session = manager.start(&options(dir.path())).await.expect("start");

    for expected in ["turn 1", "turn 2"] {
        session.send("next").await.expect("send");
        let events = collect(session.stream().await).await;
        assert!(matches!(
            events.first(),
            Some(Ok(Event::TextChunk { content })) if content == expected
        ));
        assert!(!session.is_turn_open(), "result closes the turn");
    }

    assert!(session.is_alive());
    session.stop().await;
}

#[tokio::test]
async fn second_send_while_streaming_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let manager = fake_agent(dir.path(), COUNTING_AGENT, None);
    let session = manager.start(&options(dir.path())).await.expect("start");

    session.send("first").await.expect("send");
    let err = session.send("second").await.expect_err("turn still open");
    assert!(matches!(err, AppError::TurnInProgress(_)));

    let _ = collect(session.stream().await).await;
    session.send("third").await.expect("turn closed, send accepted");

    session.stop().await;
}

#[tokio::test]
async fn stop_is_idempotent_and_send_after_stop_fails() {
    let dir = tempfile::tempdir().expect("tempdir");
    let manager = fake_agent(dir.path(), COUNTING_AGENT, None);
    let session = manager.start(&options(dir.path())).await.expect("start");

    session.stop().await;
    session.stop().await;

    assert!(!session.is_alive());
    let err = session.send("anyone there?").await.expect_err("stopped");
    assert!(matches!(err, AppError::SessionNotStarted(_)));
    session.interrupt().expect("interrupt on a dead session is a no-op");
}

#[tokio::test]
async fn non_zero_exit_mid_turn_is_reported_with_stderr() {
    let dir = tempfile::tempdir().expect("tempdir");
    let script = r#"
IFS= read -r line
echo '{"type":"text","content":"partial"}'
echo 'fatal: model overloaded' >&2
sleep 0.2
exit 3
"#;
    let manager = fake_agent(dir.path(), script, None);
    let session = manager.start(&options(dir.path())).await.expect("start");

    session.send("go").await.expect("send");
    let events = collect(session.stream().await).await;

    assert!(matches!(
        events.first(),
        Some(Ok(Event::TextChunk { content })) if content == "partial"
    ));
    let Some(Err(AppError::AgentExited(msg))) = events.last() else {
        panic!("expected AgentExited, got {events:?}");
    };
    assert!(msg.contains("code 3"), "{msg}");
    assert!(msg.contains("model overloaded"), "{msg}");

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!session.is_alive());
    session.stop().await;
}

#[tokio::test]
async fn signal_killed_agent_mid_turn_is_reported() {
    let dir = tempfile::tempdir().expect("tempdir");
    let script = r#"
IFS= read -r line
echo '{"type":"text","content":"partial"}'
sleep 0.2
kill -9 $$
"#;
    let manager = fake_agent(dir.path(), script, None);
    let session = manager.start(&options(dir.path())).await.expect("start");

    session.send("go").await.expect("send");
    let events = collect(session.stream().await).await;

    assert_eq!(events.len(), 2, "{events:?}");
    assert!(matches!(
        &events[0],
        Ok(Event::TextChunk { content }) if content == "partial"
    ));
    let Err(AppError::AgentExited(msg)) = &events[1] else {
        panic!("expected AgentExited, got {events:?}");
    };
    assert!(msg.contains("signal 9"), "{msg}");
    assert!(!session.is_turn_open());
    session.stop().await;
}

#[tokio::test]
async fn stop_mid_turn_ends_the_stream_quietly() {
    let dir = tempfile::tempdir().expect("tempdir");
    let script = r#"
IFS= read -r line
echo '{"type":"text","content":"working"}'
sleep 30
"#;
    let manager = fake_agent(dir.path(), script, None);
    let session = manager.start(&options(dir.path())).await.expect("start");

    session.send("go").await.expect("send");
    let mut stream = session.stream().await;
    let first = tokio::time::timeout(TURN_DEADLINE, stream.next())
        .await
        .expect("first event in time");
    assert!(matches!(first, Some(Ok(Event::TextChunk { .. }))));

    session.stop().await;
    let rest = collect(stream).await;
    assert!(rest.is_empty(), "caller stop is not an error: {rest:?}");
}

#[tokio::test]
async fn fast_replies_leave_no_stale_timeout_between_turns() {
    let dir = tempfile::tempdir().expect("tempdir");
    let manager = fake_agent(dir.path(), COUNTING_AGENT, Some(Duration::from_millis(200)));
    let session = manager.start(&options(dir.path())).await.expect("start");

    for turn in 1..=5 {
        session.send("next").await.expect("send");
        let events = collect(session.stream().await).await;
        assert!(
            events.iter().all(Result::is_ok),
            "turn {turn} saw a stale timeout: {events:?}"
        );
        assert!(matches!(events.last(), Some(Ok(Event::Result { .. }))));

        // Idle longer than the threshold between turns.
        tokio::time::sleep(Duration::from_millis(400)).await;
    }

    session.stop().await;
}

#[tokio::test]
async fn clean_exit_without_result_ends_stream_quietly() {
    let dir = tempfile::tempdir().expect("tempdir");
    let script = r#"
IFS= read -r line
echo '{"type":"text","content":"bye"}'
exit 0
"#;
    let manager = fake_agent(dir.path(), script, None);
    let session = manager.start(&options(dir.path())).await.expect("start");

    session.send("go").await.expect("send");
    let events = collect(session.stream().await).await;

    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], Ok(Event::TextChunk { .. })));
    session.stop().await;
}

#[tokio::test]
async fn silent_agent_trips_idle_timeout() {
    let dir = tempfile::tempdir().expect("tempdir");
    let script = r"
IFS= read -r line
sleep 30
";
    let manager = fake_agent(dir.path(), script, Some(Duration::from_millis(300)));
    let session = manager.start(&options(dir.path())).await.expect("start");

    session.send("hello?").await.expect("send");
    let events = collect(session.stream().await).await;

    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], Err(AppError::Timeout(_))));
    assert!(!session.is_turn_open());

    session.stop().await;
    assert!(!session.is_alive());
}

#[tokio::test]
#[serial_test::serial]
#[allow(unsafe_code, unused_unsafe)]
async fn agent_environment_is_an_allowlist() {
    let dir = tempfile::tempdir().expect("tempdir");
    let script = r#"
IFS= read -r line
echo "{\"type\":\"text\",\"content\":\"${AGENT_CONDUIT_SESSION_ID}|${CONDUIT_TEST_SECRET:-absent}\"}"
echo '{"type":"result","is_error":false}'
"#;
    unsafe {
        std::env::set_var("CONDUIT_TEST_SECRET", "leaked");
    }

    let manager = fake_agent(dir.path(), script, None);
    let session = manager.start(&options(dir.path())).await.expect("start");
    unsafe {
        std::env::remove_var("CONDUIT_TEST_SECRET");
    }

    session.send("env").await.expect("send");
    let events = collect(session.stream().await).await;

    let expected = format!("{}|absent", session.id());
    assert!(
        matches!(events.first(), Some(Ok(Event::TextChunk { content })) if *content == expected),
        "{SESSION_ID_ENV} is exported and other variables are stripped: {events:?}"
    );
    session.stop().await;
}

#[tokio::test]
async fn missing_interpreter_is_a_spawn_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = super::test_helpers::sh_config(None);
    config.script_interpreter = "agent-conduit-no-such-interpreter".to_owned();
    let executable = agent_conduit::agent::locator::AgentExecutable {
        path: super::test_helpers::write_script(dir.path(), COUNTING_AGENT),
        kind: agent_conduit::agent::locator::ExecutableKind::BundledScript,
    };
    let manager = agent_conduit::agent::session::SessionManager::new(executable, config);

    let err = manager
        .start(&options(dir.path()))
        .await
        .expect_err("interpreter missing");
    assert!(matches!(err, AppError::Spawn(_)));
    assert!(err.is_unavailable());
}
