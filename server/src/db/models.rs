//! Row types.
//!
//! Rows are stored as JSON values keyed by their primary key.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::queue::{NewTask, TaskId};
use crate::session::SessionState;
use crate::token::Role;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    pub role: Role,
    pub hashed_password: String,
    pub full_name: String,
    pub email: String,
    pub is_email_verified: bool,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub password_changed_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

/// Input for a new user. Values are assumed validated by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateUserParams {
    pub username: String,
    pub role: Role,
    pub hashed_password: String,
    pub full_name: String,
    pub email: String,
}

/// A login session backing one refresh token.
///
/// `id` is the id embedded in that refresh token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub username: String,
    pub refresh_token: String,
    pub user_agent: String,
    pub client_ip: String,
    pub is_blocked: bool,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub expires_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// Derived state at `now`. Blocking takes precedence over expiry.
    #[must_use]
    pub fn state(&self, now: DateTime<Utc>) -> SessionState {
        if self.is_blocked {
            SessionState::Blocked
        } else if now > self.expires_at {
            SessionState::Expired
        } else {
            SessionState::Active
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateSessionParams {
    pub id: Uuid,
    pub username: String,
    pub refresh_token: String,
    pub user_agent: String,
    pub client_ip: String,
    pub is_blocked: bool,
    pub expires_at: DateTime<Utc>,
}

/// A task staged in the same transaction as the write that triggered it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxEntry {
    /// Same as the task id, so relaying an entry twice enqueues one task.
    pub id: TaskId,
    pub task: NewTask,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}
