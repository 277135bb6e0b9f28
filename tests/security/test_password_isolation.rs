//! Security Tests: Password Isolation
//!
//! These tests verify that login passwords never leak into debug output,
//! error messages or session metadata.

#[path = "../test_utils/mod.rs"]
mod test_utils;

use shellmux::config::{Config, ServerConfig};
use shellmux::error::Error;
use shellmux::models::ConnectionProperties;
use test_utils::{open_session, test_config, FixtureShell};

const SECRET: &str = "fixture-secret";

#[test]
fn test_connection_properties_debug_redacted() {
    let props = ConnectionProperties::new("db.internal", 22, "deploy", SECRET);
    let debug = format!("{:?}", props);
    assert!(!debug.contains(SECRET), "password leaked: {}", debug);
    assert!(debug.contains("<redacted>"));
    // The credential itself is still available to the transport
    assert_eq!(props.password(), SECRET);
}

#[test]
fn test_config_debug_redacted() {
    let config = test_config();
    let debug = format!("{:?}", config);
    assert!(!debug.contains(SECRET), "password leaked: {}", debug);

    let pretty = format!("{:#?}", config.server);
    assert!(!pretty.contains(SECRET));
}

#[test]
fn test_derived_properties_keep_password_out_of_address() {
    let server = ServerConfig {
        host: "db.internal".to_string(),
        username: "deploy".to_string(),
        password: SECRET.to_string(),
        ..ServerConfig::default()
    };
    let props = server.connection_properties();
    assert_eq!(props.address(), "db.internal:22");
    assert!(!props.address().contains(SECRET));
}

#[test]
fn test_connect_errors_do_not_carry_password() {
    let errors = [
        Error::AuthenticationFailed {
            host: "db.internal".to_string(),
            username: "deploy".to_string(),
        },
        Error::ConnectFailed {
            host: "db.internal".to_string(),
            port: 22,
            reason: "connection refused".to_string(),
        },
    ];
    for err in errors {
        assert!(!err.to_string().contains(SECRET));
        assert!(!format!("{:?}", err).contains(SECRET));
    }
}

#[tokio::test]
async fn test_session_metadata_has_no_password() {
    let fixture = FixtureShell::new();
    let session = open_session(&fixture).await;

    let info = session.info();
    assert!(!format!("{:?}", info).contains(SECRET));
    assert!(!info.label.contains(SECRET));

    session.close().await.unwrap();
    // The password was never typed into the shell
    assert!(fixture.log().inputs().iter().all(|line| !line.contains(SECRET)));
}

#[test]
fn test_default_config_has_no_password() {
    assert!(Config::default().server.password.is_empty());
}
