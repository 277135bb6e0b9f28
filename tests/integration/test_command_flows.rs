//! Integration Tests for Command Flows
//!
//! Multi-command scenarios: concurrent callers sharing one session, slow
//! and silent commands, output that shows up after its command ended, and
//! callers that walk away mid-command.

#[path = "../test_utils/mod.rs"]
mod test_utils;

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::future::join_all;
use shellmux::error::Error;
use test_utils::{open_session, FixtureShell};

const TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_concurrent_callers_are_serialized() {
    let fixture = FixtureShell::new();
    let session = Arc::new(open_session(&fixture).await);
    let accepted = Arc::new(Mutex::new(Vec::new()));

    let tasks = (0..8).map(|i| {
        let session = session.clone();
        let accepted = accepted.clone();
        tokio::spawn(async move {
            let command = format!("echo task-{}", i);
            let output = session.submit(&command, TIMEOUT).await.unwrap();
            // The next caller is admitted only after this output ends
            accepted.lock().unwrap().push(command);
            (i, output.collect().await.unwrap())
        })
    });

    for result in join_all(tasks).await {
        let (i, lines) = result.unwrap();
        // Each caller sees only its own output
        assert_eq!(lines, vec![format!("task-{}", i)]);
    }

    // Commands reached the shell exactly in acceptance order
    let accepted = accepted.lock().unwrap().clone();
    assert_eq!(accepted.len(), 8);
    assert_eq!(fixture.log().inputs(), accepted);

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_sequential_commands_reach_shell_in_order() {
    let fixture = FixtureShell::new();
    let session = open_session(&fixture).await;

    for command in ["echo one", "cd /tmp", "pwd", "echo two"] {
        session.execute(command, TIMEOUT).await.unwrap();
    }

    assert_eq!(
        fixture.log().inputs(),
        vec!["echo one", "cd /tmp", "pwd", "echo two"]
    );

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_silent_command_still_terminates() {
    let fixture = FixtureShell::new();
    let session = open_session(&fixture).await;

    let timeout = Duration::from_millis(500);
    let start = Instant::now();
    let lines = session.execute("silent", timeout).await.unwrap();

    // Ended by the retry budget, before the caller's own deadline
    assert!(lines.is_empty());
    assert!(start.elapsed() < timeout);

    // The session is still usable afterwards
    assert_eq!(session.execute("echo after", TIMEOUT).await.unwrap(), vec!["after"]);

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_late_output_does_not_leak_into_next_command() {
    let fixture = FixtureShell::new();
    let session = open_session(&fixture).await;

    // Budget is 4 polls, the output only shows up after 450ms
    let lines = session
        .execute("late STALE 450", Duration::from_millis(500))
        .await
        .unwrap();
    assert!(lines.is_empty());

    tokio::time::sleep(Duration::from_millis(300)).await;

    let lines = session.execute("echo fresh", TIMEOUT).await.unwrap();
    assert_eq!(lines, vec!["fresh"]);

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_stray_output_after_prompt_is_not_handed_out() {
    let fixture = FixtureShell::new();
    let session = open_session(&fixture).await;

    let lines = session.execute("stray LEFTOVER 50", TIMEOUT).await.unwrap();
    assert!(lines.is_empty());

    tokio::time::sleep(Duration::from_millis(150)).await;

    let lines = session.execute("echo next", TIMEOUT).await.unwrap();
    assert_eq!(lines, vec!["next"]);

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_abandoned_caller_does_not_block_session() {
    let fixture = FixtureShell::new();
    let session = open_session(&fixture).await;

    let output = session.submit("burst 20", TIMEOUT).await.unwrap();
    drop(output);

    let lines = session.execute("echo still-alive", TIMEOUT).await.unwrap();
    assert_eq!(lines, vec!["still-alive"]);

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_waiting_caller_times_out_while_shell_busy() {
    let fixture = FixtureShell::new();
    let session = Arc::new(open_session(&fixture).await);

    let busy = {
        let session = session.clone();
        tokio::spawn(async move { session.execute("sleep 1000", Duration::from_secs(3)).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    let result = session.execute("echo impatient", Duration::from_millis(200)).await;
    match result {
        Err(e @ Error::CommandTimeout { .. }) => assert!(e.is_timeout()),
        other => panic!("expected CommandTimeout, got {:?}", other),
    }

    assert!(busy.await.unwrap().unwrap().is_empty());
    // The impatient command never reached the shell
    assert_eq!(fixture.log().count_of("echo impatient"), 0);
    assert_eq!(session.execute("echo later", TIMEOUT).await.unwrap(), vec!["later"]);

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_incremental_output_handle() {
    let fixture = FixtureShell::new();
    let session = open_session(&fixture).await;

    let mut output = session.submit("burst 2", TIMEOUT).await.unwrap();
    assert_eq!(output.command(), "burst 2");
    assert_eq!(output.next_line().await.unwrap(), Some("line-1".to_string()));
    assert_eq!(output.next_line().await.unwrap(), Some("line-2".to_string()));
    assert_eq!(output.next_line().await.unwrap(), None);
    // Stays finished
    assert_eq!(output.next_line().await.unwrap(), None);

    session.close().await.unwrap();
}
