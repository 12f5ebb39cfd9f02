//! Token payload.
//!
//! # Invariants
//! - `id` is a fresh random UUID per issuance.
//! - `issued_at < expired_at` whenever the requested duration is positive.
//! - The payload is never persisted; it only exists inside a token.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::TokenError;

/// Role carried by a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// A customer holding accounts.
    Depositor,
    /// Bank staff.
    Banker,
}

impl Role {
    /// Stable wire name of the role.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Depositor => "depositor",
            Self::Banker => "banker",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "depositor" => Ok(Self::Depositor),
            "banker" => Ok(Self::Banker),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

/// Claims embedded in every token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    /// Unique token identifier. For refresh tokens this is also the session id.
    pub id: Uuid,
    /// Identity the token was issued to.
    pub username: String,
    /// Role of the identity at issuance.
    pub role: Role,
    /// Issuance time.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub issued_at: DateTime<Utc>,
    /// Expiry time.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub expired_at: DateTime<Utc>,
}

impl Payload {
    /// Build a payload valid for `duration` from `now`.
    ///
    /// A negative duration yields an already-expired payload.
    ///
    /// # Errors
    /// `TokenError::Encoding` if `now + duration` is out of range.
    pub fn new(
        username: &str,
        role: Role,
        duration: TimeDelta,
        now: DateTime<Utc>,
    ) -> Result<Self, TokenError> {
        let expired_at = now.checked_add_signed(duration).ok_or_else(|| {
            TokenError::Encoding(format!("token duration {duration} is out of range"))
        })?;
        Ok(Self {
            id: Uuid::new_v4(),
            username: username.to_string(),
            role,
            issued_at: now,
            expired_at,
        })
    }

    /// Check the payload has not expired at `now`.
    pub fn valid(&self, now: DateTime<Utc>) -> Result<(), TokenError> {
        if self.expired_at <= now {
            return Err(TokenError::Expired);
        }
        Ok(())
    }
}
