//! A logged-in user's access token authorizes requests for their role only.

use chrono::TimeDelta;

use crate::auth::{AuthError, authorize};
use crate::e2e_tests::helpers::*;
use crate::errors::ErrorKind;
use crate::identity::register_user;
use crate::session::ClientMetadata;
use crate::token::Role;

#[tokio::test]
async fn test_login_then_authorize() {
    let bank = TestBank::new();
    register_user(&bank.store, &user_params("alice"))
        .await
        .expect("register");

    let login = bank
        .sessions
        .login("alice", &ClientMetadata::default())
        .await
        .expect("login");
    let header = format!("Bearer {}", login.access_token);

    let payload = authorize(Some(header.as_str()), bank.maker.as_ref(), &[Role::Depositor, Role::Banker])
        .expect("authorized");
    assert_eq!(payload.username, "alice");
    assert_eq!(payload.role, Role::Depositor);

    let err = authorize(Some(header.as_str()), bank.maker.as_ref(), &[Role::Banker])
        .expect_err("depositor is not a banker");
    assert_eq!(err, AuthError::PermissionDenied(Role::Depositor));
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
}

#[tokio::test]
async fn test_access_token_expires() {
    let bank = TestBank::new();
    register_user(&bank.store, &user_params("alice"))
        .await
        .expect("register");
    let login = bank
        .sessions
        .login("alice", &ClientMetadata::default())
        .await
        .expect("login");
    let header = format!("bearer {}", login.access_token);

    bank.time.advance(TimeDelta::minutes(16));
    let err = authorize(Some(header.as_str()), bank.maker.as_ref(), &[Role::Depositor])
        .expect_err("expired");
    assert_eq!(err.kind(), ErrorKind::ExpiredToken);
}

#[tokio::test]
async fn test_malformed_header_rejected() {
    let bank = TestBank::new();
    for header in [None, Some(""), Some("Bearer"), Some("Basic abc"), Some("Bearer a b")] {
        let err = authorize(header, bank.maker.as_ref(), &[Role::Depositor])
            .expect_err("malformed");
        assert_eq!(err.kind(), ErrorKind::MalformedAuthorization, "{header:?}");
    }
}
