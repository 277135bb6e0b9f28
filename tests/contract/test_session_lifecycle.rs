//! Contract Tests for Session Lifecycle
//!
//! Contract: a session is ready once connect returns, close is idempotent
//! and sends `exit` exactly once, and every call after close fails with
//! `SessionClosed`.

#[path = "../test_utils/mod.rs"]
mod test_utils;

use std::sync::Arc;
use std::time::Duration;

use shellmux::error::Error;
use shellmux::models::ConnectTimeouts;
use shellmux::shell::ShellSession;
use tokio_util::sync::CancellationToken;
use test_utils::{open_session, test_properties, test_shell_config, FixtureShell};

const TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_close_is_idempotent() {
    let fixture = FixtureShell::new();
    let session = open_session(&fixture).await;

    session.close().await.unwrap();
    session.close().await.unwrap();
    session.close().await.unwrap();

    assert!(session.is_closed());
    assert_eq!(fixture.log().count_of("exit"), 1);
    assert_eq!(fixture.log().disconnects(), 1);
}

#[tokio::test]
async fn test_concurrent_close() {
    let fixture = FixtureShell::new();
    let session = Arc::new(open_session(&fixture).await);

    let a = {
        let session = session.clone();
        tokio::spawn(async move { session.close().await })
    };
    let b = {
        let session = session.clone();
        tokio::spawn(async move { session.close().await })
    };
    a.await.unwrap().unwrap();
    b.await.unwrap().unwrap();

    assert_eq!(fixture.log().count_of("exit"), 1);
    assert_eq!(fixture.log().disconnects(), 1);
}

#[tokio::test]
async fn test_execute_after_close() {
    let fixture = FixtureShell::new();
    let session = open_session(&fixture).await;
    session.close().await.unwrap();

    match session.execute("echo hi", TIMEOUT).await {
        Err(Error::SessionClosed { .. }) => {}
        other => panic!("expected SessionClosed, got {:?}", other),
    }
    assert_eq!(fixture.log().count_of("echo hi"), 0);
}

#[tokio::test]
async fn test_close_after_shell_exit() {
    let fixture = FixtureShell::new();
    let session = open_session(&fixture).await;

    assert!(session.execute("die", TIMEOUT).await.is_err());
    session.close().await.unwrap();

    // The shell was already gone, so no exit was sent
    assert_eq!(fixture.log().count_of("exit"), 0);
    assert_eq!(fixture.log().disconnects(), 1);
}

#[tokio::test]
async fn test_session_info() {
    let fixture = FixtureShell::new();
    let session = open_session(&fixture).await;

    let info = session.info();
    assert_eq!(info.label, "test@fixture.local:22");
    assert_eq!(info.transport, "fixture");
    assert!(info.ready);
    assert!(!info.closed);

    session.close().await.unwrap();
    let info = session.info();
    assert!(info.closed);
    assert!(!info.ready);
}

#[tokio::test]
async fn test_external_cancellation_stops_session() {
    let fixture = FixtureShell::new();
    let cancel = CancellationToken::new();
    let session = ShellSession::connect_with_cancel(
        &fixture,
        &test_properties(),
        &ConnectTimeouts::default(),
        &test_shell_config(),
        cancel.clone(),
    )
    .await
    .unwrap();

    assert_eq!(session.execute("echo before", TIMEOUT).await.unwrap(), vec!["before"]);
    cancel.cancel();

    match session.execute("echo after", TIMEOUT).await {
        Err(Error::SessionClosed { .. }) => {}
        other => panic!("expected SessionClosed, got {:?}", other),
    }

    // close still tears down the shell
    session.close().await.unwrap();
    assert_eq!(fixture.log().count_of("exit"), 1);
}

#[tokio::test]
async fn test_cancel_interrupts_in_flight_command() {
    let fixture = FixtureShell::new();
    let session = Arc::new(open_session(&fixture).await);

    let in_flight = {
        let session = session.clone();
        tokio::spawn(async move { session.execute("silent", Duration::from_secs(5)).await })
    };
    tokio::time::sleep(Duration::from_millis(150)).await;
    session.close().await.unwrap();

    match in_flight.await.unwrap() {
        Err(Error::SessionClosed { .. }) => {}
        other => panic!("expected SessionClosed, got {:?}", other),
    }
}

#[tokio::test]
async fn test_close_not_held_up_by_slow_reader() {
    let fixture = FixtureShell::new();
    let session = open_session(&fixture).await;

    // The caller takes one line and then stops reading for a long time
    let mut output = session
        .submit("burst 5", Duration::from_secs(30))
        .await
        .unwrap();
    assert!(output.next_line().await.unwrap().is_some());
    tokio::time::sleep(Duration::from_millis(50)).await;

    let start = std::time::Instant::now();
    session.close().await.unwrap();
    assert!(start.elapsed() < Duration::from_secs(2), "close took {:?}", start.elapsed());
    assert_eq!(fixture.log().count_of("exit"), 1);

    // Whatever was already handed over is readable, then the session is gone
    loop {
        match output.next_line().await {
            Ok(Some(_)) => continue,
            Err(Error::SessionClosed { .. }) => break,
            other => panic!("expected SessionClosed, got {:?}", other),
        }
    }
}
