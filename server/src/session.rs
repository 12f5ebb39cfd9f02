//! Session registry.
//!
//! A login mints an access token and a refresh token and records a session
//! whose id is the refresh token's payload id. Renewal trades a refresh
//! token for a new access token, after checking the session behind it.
//!
//! # Renewal
//! 1. Verify the refresh token.
//! 2. Load the session with the payload's id.
//! 3. Reject a blocked session.
//! 4. Reject a session whose username or stored refresh token differs from
//!    what was presented.
//! 5. Reject an expired session.
//! 6. Mint a new access token. The refresh token and session are unchanged.
//!
//! # Invariants
//! - Exactly one session per refresh token issued by [`SessionRegistry::login`].
//! - Renewal never writes.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use uuid::Uuid;

use crate::db::{CreateSessionParams, Session, Store, StoreError, User};
use crate::errors::ErrorKind;
use crate::storage::TimeSource;
use crate::token::{Maker, TokenError};

/// Session state derived from the stored blocked flag and expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Blocked,
    Expired,
}

/// Error returned by session operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The presented token failed verification.
    Token(TokenError),
    /// No session backs the token.
    NotFound,
    /// The session has been blocked.
    Blocked,
    /// The session belongs to another user or another refresh token.
    Mismatch,
    /// The session has expired.
    Expired,
    /// The store failed.
    Store(StoreError),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Token(e) => write!(f, "{e}"),
            Self::NotFound => write!(f, "session not found"),
            Self::Blocked => write!(f, "blocked session"),
            Self::Mismatch => write!(f, "mismatched session"),
            Self::Expired => write!(f, "expired session"),
            Self::Store(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Token(e) => Some(e),
            Self::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TokenError> for SessionError {
    fn from(e: TokenError) -> Self {
        Self::Token(e)
    }
}

impl From<StoreError> for SessionError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl SessionError {
    /// Outward error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Token(e) => e.kind(),
            Self::NotFound => ErrorKind::SessionNotFound,
            Self::Blocked => ErrorKind::SessionBlocked,
            Self::Mismatch => ErrorKind::SessionMismatch,
            Self::Expired => ErrorKind::SessionExpired,
            Self::Store(e) => e.kind(),
        }
    }
}

/// Token lifetimes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub access_token_duration: TimeDelta,
    pub refresh_token_duration: TimeDelta,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            access_token_duration: TimeDelta::minutes(15),
            refresh_token_duration: TimeDelta::hours(24),
        }
    }
}

/// Client details recorded with a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientMetadata {
    pub user_agent: String,
    pub client_ip: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginResult {
    pub user: User,
    pub session_id: Uuid,
    pub access_token: String,
    pub access_token_expires_at: DateTime<Utc>,
    pub refresh_token: String,
    pub refresh_token_expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenewResult {
    pub access_token: String,
    pub access_token_expires_at: DateTime<Utc>,
}

/// Issues and renews session-backed tokens.
pub struct SessionRegistry {
    store: Arc<Store>,
    maker: Arc<dyn Maker>,
    time: Arc<dyn TimeSource>,
    config: SessionConfig,
}

impl SessionRegistry {
    #[must_use]
    pub fn new(
        store: Arc<Store>,
        maker: Arc<dyn Maker>,
        time: Arc<dyn TimeSource>,
        config: SessionConfig,
    ) -> Self {
        Self {
            store,
            maker,
            time,
            config,
        }
    }

    /// Start a session for an already authenticated user.
    ///
    /// The role is taken from the stored user. Credentials are checked by
    /// the caller.
    pub async fn login(
        &self,
        username: &str,
        client: &ClientMetadata,
    ) -> Result<LoginResult, SessionError> {
        let user = self.store.get_user(username).await?;

        let (access_token, access_payload) =
            self.maker
                .create_token(&user.username, user.role, self.config.access_token_duration)?;
        let (refresh_token, refresh_payload) =
            self.maker
                .create_token(&user.username, user.role, self.config.refresh_token_duration)?;

        let session = self
            .create_session(&CreateSessionParams {
                id: refresh_payload.id,
                username: user.username.clone(),
                refresh_token: refresh_token.clone(),
                user_agent: client.user_agent.clone(),
                client_ip: client.client_ip.clone(),
                is_blocked: false,
                expires_at: refresh_payload.expired_at,
            })
            .await?;

        tracing::info!(username = %user.username, session_id = %session.id, "session created");
        Ok(LoginResult {
            user,
            session_id: session.id,
            access_token,
            access_token_expires_at: access_payload.expired_at,
            refresh_token,
            refresh_token_expires_at: refresh_payload.expired_at,
        })
    }

    /// Record a session. `params.id` must be the refresh token's payload id.
    pub async fn create_session(&self, params: &CreateSessionParams) -> Result<Session, SessionError> {
        Ok(self.store.create_session(params).await?)
    }

    /// Exchange a refresh token for a new access token.
    pub async fn renew_access_token(&self, refresh_token: &str) -> Result<RenewResult, SessionError> {
        let result = self.check_and_mint(refresh_token).await;
        if let Err(e) = &result {
            tracing::debug!(kind = %e.kind(), "access token renewal rejected");
        }
        result
    }

    async fn check_and_mint(&self, refresh_token: &str) -> Result<RenewResult, SessionError> {
        let payload = self.maker.verify_token(refresh_token)?;

        let session = match self.store.get_session(payload.id).await {
            Ok(session) => session,
            Err(StoreError::NotFound) => return Err(SessionError::NotFound),
            Err(e) => return Err(e.into()),
        };

        let state = session.state(self.time.now());
        if state == SessionState::Blocked {
            return Err(SessionError::Blocked);
        }
        if session.username != payload.username || session.refresh_token != refresh_token {
            return Err(SessionError::Mismatch);
        }
        if state == SessionState::Expired {
            return Err(SessionError::Expired);
        }

        let (access_token, access_payload) = self.maker.create_token(
            &payload.username,
            payload.role,
            self.config.access_token_duration,
        )?;
        Ok(RenewResult {
            access_token,
            access_token_expires_at: access_payload.expired_at,
        })
    }
}
