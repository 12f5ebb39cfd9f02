//! Refresh tokens renew access tokens until the session is blocked or
//! expires.

use chrono::TimeDelta;

use crate::e2e_tests::helpers::*;
use crate::identity::register_user;
use crate::session::{ClientMetadata, SessionError};
use crate::storage::TimeSource;
use crate::token::TokenError;

async fn logged_in_bank() -> (TestBank, crate::session::LoginResult) {
    let bank = TestBank::new();
    register_user(&bank.store, &user_params("alice"))
        .await
        .expect("register");
    let client = ClientMetadata {
        user_agent: "curl/8.0".to_string(),
        client_ip: "10.0.0.1".to_string(),
    };
    let login = bank.sessions.login("alice", &client).await.expect("login");
    (bank, login)
}

#[tokio::test]
async fn test_renew_issues_fresh_access_token() {
    let (bank, login) = logged_in_bank().await;

    let session = bank
        .store
        .get_session(login.session_id)
        .await
        .expect("session stored");
    assert_eq!(session.user_agent, "curl/8.0");
    assert_eq!(session.client_ip, "10.0.0.1");
    assert_eq!(session.expires_at, login.refresh_token_expires_at);

    bank.time.advance(TimeDelta::hours(1));
    let renewed = bank
        .sessions
        .renew_access_token(&login.refresh_token)
        .await
        .expect("renew");
    assert_eq!(
        renewed.access_token_expires_at,
        bank.time.now() + TimeDelta::minutes(15)
    );
    let payload = bank
        .maker
        .verify_token(&renewed.access_token)
        .expect("valid access token");
    assert_eq!(payload.username, "alice");
}

#[tokio::test]
async fn test_blocked_session_cannot_renew() {
    let (bank, login) = logged_in_bank().await;

    bank.store
        .set_session_blocked(login.session_id, true)
        .await
        .expect("block");
    let err = bank
        .sessions
        .renew_access_token(&login.refresh_token)
        .await
        .expect_err("blocked");
    assert_eq!(err, SessionError::Blocked);
}

#[tokio::test]
async fn test_expired_refresh_token_cannot_renew() {
    let (bank, login) = logged_in_bank().await;

    bank.time.advance(TimeDelta::hours(25));
    let err = bank
        .sessions
        .renew_access_token(&login.refresh_token)
        .await
        .expect_err("expired");
    assert_eq!(err, SessionError::Token(TokenError::Expired));
}

#[tokio::test]
async fn test_access_token_is_not_a_refresh_token() {
    let (bank, login) = logged_in_bank().await;

    // Authentic token, but no session carries its id
    let err = bank
        .sessions
        .renew_access_token(&login.access_token)
        .await
        .expect_err("not a session");
    assert_eq!(err, SessionError::NotFound);
}
