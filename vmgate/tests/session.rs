mod support;

use std::time::Duration;

use secrecy::Secret;
use serde_json::json;
use vmgate::{
    errors::{ConnectionCause, GatewayError},
    session::SessionManager,
    xapi::XapiError,
};

use support::{FakeXapi, hypervisor_settings};

#[tokio::test]
async fn missing_host_fails_before_any_call() {
    let fake = FakeXapi::new();
    let mut settings = hypervisor_settings(0);
    settings.host = String::new();
    let sessions = SessionManager::new(fake.clone(), settings);

    let err = sessions.open().await.unwrap_err();

    assert!(matches!(err, GatewayError::Config("host")));
    assert!(fake.calls().is_empty());
}

#[tokio::test]
async fn blank_username_fails_before_any_call() {
    let fake = FakeXapi::new();
    let mut settings = hypervisor_settings(0);
    settings.username = "  ".to_string();
    let sessions = SessionManager::new(fake.clone(), settings);

    let err = sessions.open().await.unwrap_err();

    assert!(matches!(err, GatewayError::Config("username")));
    assert!(fake.calls().is_empty());
}

#[tokio::test]
async fn missing_password_fails_before_any_call() {
    let fake = FakeXapi::new();
    let mut settings = hypervisor_settings(0);
    settings.password = Secret::new(String::new());
    let sessions = SessionManager::new(fake.clone(), settings);

    let err = sessions.open().await.unwrap_err();

    assert!(matches!(err, GatewayError::Config("password")));
    assert!(fake.calls().is_empty());
}

#[tokio::test]
async fn login_sends_configured_credentials() {
    let fake = FakeXapi::new();
    let sessions = SessionManager::new(fake.clone(), hypervisor_settings(0));

    let session = sessions.open().await.unwrap();

    assert_eq!(session.reference().as_str(), "OpaqueRef:session-1");
    assert_eq!(session.username(), "root");
    assert_eq!(
        fake.calls_to("session.login_with_password"),
        vec![vec![
            json!("root"),
            json!("xapi-secret"),
            json!("1.0"),
            json!("vmgate")
        ]]
    );
}

#[tokio::test]
async fn login_failures_are_classified() {
    let cases = [
        (
            XapiError::ConnectionRefused("https://xcp.test/jsonrpc".into()),
            ConnectionCause::Refused,
        ),
        (
            XapiError::failure("SESSION_AUTHENTICATION_FAILED", ["root", "bad"]),
            ConnectionCause::AuthenticationFailed,
        ),
        (
            XapiError::Transport("certificate verify failed".into()),
            ConnectionCause::Transport,
        ),
    ];

    for (failure, expected) in cases {
        let fake = FakeXapi::new();
        fake.fail("session.login_with_password", failure);
        let sessions = SessionManager::new(fake.clone(), hypervisor_settings(0));

        match sessions.open().await {
            Err(GatewayError::Connection { cause, .. }) => assert_eq!(cause, expected),
            other => panic!("unexpected result: {:?}", other.map(|s| s.username().to_string())),
        }
    }
}

#[tokio::test]
async fn close_empties_the_slot_even_when_logout_fails() {
    let fake = FakeXapi::new();
    fake.fail(
        "session.logout",
        XapiError::Transport("connection reset".into()),
    );
    let sessions = SessionManager::new(fake.clone(), hypervisor_settings(0));

    let mut slot = Some(sessions.open().await.unwrap());
    sessions.close(&mut slot).await;

    assert!(slot.is_none());
    assert_eq!(
        fake.calls_to("session.logout"),
        vec![vec![json!("OpaqueRef:session-1")]]
    );
}

#[tokio::test]
async fn closing_an_empty_slot_does_nothing() {
    let fake = FakeXapi::new();
    let sessions = SessionManager::new(fake.clone(), hypervisor_settings(0));

    sessions.close(&mut None).await;

    assert!(fake.calls().is_empty());
}

#[tokio::test]
async fn without_pooling_every_checkin_logs_out() {
    let fake = FakeXapi::new();
    let sessions = SessionManager::new(fake.clone(), hypervisor_settings(0));

    for _ in 0..2 {
        let mut slot = Some(sessions.checkout().await.unwrap());
        sessions.checkin(&mut slot, true).await;
        assert!(slot.is_none());
    }

    assert_eq!(fake.count("session.login_with_password"), 2);
    assert_eq!(fake.count("session.logout"), 2);
    assert_eq!(sessions.idle_sessions(), 0);
}

#[tokio::test]
async fn pooled_sessions_are_reused() {
    let fake = FakeXapi::new();
    let sessions = SessionManager::new(fake.clone(), hypervisor_settings(1));

    let mut slot = Some(sessions.checkout().await.unwrap());
    sessions.checkin(&mut slot, true).await;
    assert_eq!(sessions.idle_sessions(), 1);

    let session = sessions.checkout().await.unwrap();
    assert_eq!(session.reference().as_str(), "OpaqueRef:session-1");
    assert_eq!(fake.count("session.login_with_password"), 1);
    assert_eq!(fake.count("session.logout"), 0);
    assert_eq!(
        fake.calls_to("session.get_this_host"),
        vec![vec![
            json!("OpaqueRef:session-1"),
            json!("OpaqueRef:session-1")
        ]]
    );
}

#[tokio::test]
async fn rejected_idle_sessions_are_replaced() {
    let fake = FakeXapi::new();
    fake.once(
        "session.get_this_host",
        Err(XapiError::failure("SESSION_INVALID", ["OpaqueRef:session-1"])),
    );
    let sessions = SessionManager::new(fake.clone(), hypervisor_settings(1));

    let mut slot = Some(sessions.checkout().await.unwrap());
    sessions.checkin(&mut slot, true).await;
    let session = sessions.checkout().await.unwrap();

    assert_eq!(session.reference().as_str(), "OpaqueRef:session-2");
    assert_eq!(sessions.idle_sessions(), 0);
    assert_eq!(
        fake.calls_to("session.logout"),
        vec![vec![json!("OpaqueRef:session-1")]]
    );
}

#[tokio::test(start_paused = true)]
async fn expired_idle_sessions_are_logged_out_without_reuse() {
    let fake = FakeXapi::new();
    let mut settings = hypervisor_settings(1);
    settings.idle_session_ttl_seconds = 30;
    let sessions = SessionManager::new(fake.clone(), settings);

    let mut slot = Some(sessions.checkout().await.unwrap());
    sessions.checkin(&mut slot, true).await;
    tokio::time::advance(Duration::from_secs(31)).await;
    let session = sessions.checkout().await.unwrap();

    assert_eq!(session.reference().as_str(), "OpaqueRef:session-2");
    assert_eq!(fake.count("session.get_this_host"), 0);
    assert_eq!(
        fake.calls_to("session.logout"),
        vec![vec![json!("OpaqueRef:session-1")]]
    );
}

#[tokio::test(start_paused = true)]
async fn idle_sessions_within_their_ttl_are_reused() {
    let fake = FakeXapi::new();
    let mut settings = hypervisor_settings(1);
    settings.idle_session_ttl_seconds = 30;
    let sessions = SessionManager::new(fake.clone(), settings);

    let mut slot = Some(sessions.checkout().await.unwrap());
    sessions.checkin(&mut slot, true).await;
    tokio::time::advance(Duration::from_secs(29)).await;
    let session = sessions.checkout().await.unwrap();

    assert_eq!(session.reference().as_str(), "OpaqueRef:session-1");
    assert_eq!(fake.count("session.login_with_password"), 1);
}

#[tokio::test]
async fn pool_never_grows_past_its_limit() {
    let fake = FakeXapi::new();
    let sessions = SessionManager::new(fake.clone(), hypervisor_settings(1));

    let mut first = Some(sessions.checkout().await.unwrap());
    let mut second = Some(sessions.checkout().await.unwrap());
    sessions.checkin(&mut first, true).await;
    sessions.checkin(&mut second, true).await;

    assert_eq!(sessions.idle_sessions(), 1);
    assert_eq!(
        fake.calls_to("session.logout"),
        vec![vec![json!("OpaqueRef:session-2")]]
    );
}

#[tokio::test]
async fn unusable_sessions_are_closed_not_pooled() {
    let fake = FakeXapi::new();
    let sessions = SessionManager::new(fake.clone(), hypervisor_settings(4));

    let mut slot = Some(sessions.checkout().await.unwrap());
    sessions.checkin(&mut slot, false).await;

    assert_eq!(sessions.idle_sessions(), 0);
    assert_eq!(fake.count("session.logout"), 1);
}

#[tokio::test]
async fn drain_logs_out_idle_sessions() {
    let fake = FakeXapi::new();
    let sessions = SessionManager::new(fake.clone(), hypervisor_settings(2));

    let mut first = Some(sessions.checkout().await.unwrap());
    let mut second = Some(sessions.checkout().await.unwrap());
    sessions.checkin(&mut first, true).await;
    sessions.checkin(&mut second, true).await;
    sessions.drain().await;

    assert_eq!(sessions.idle_sessions(), 0);
    assert_eq!(fake.count("session.logout"), 2);
}
