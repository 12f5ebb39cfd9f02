//! Token authority.
//!
//! Mints and verifies bearer tokens bound to a username, a role and an
//! expiry. Two interchangeable schemes implement [`Maker`]:
//!
//! - [`JwtMaker`]: HS256-signed JSON Web Tokens.
//! - [`SealedMaker`]: XChaCha20-Poly1305 sealed tokens; the payload is
//!   encrypted as well as authenticated.
//!
//! # Invariants
//! - One symmetric key per process, fixed at construction.
//! - The authenticity check always runs before any embedded field is trusted.
//! - Makers are immutable and safe to share across threads without locking.

mod jwt_maker;
mod payload;
mod sealed_maker;

use std::sync::Arc;

use chrono::TimeDelta;

pub use jwt_maker::JwtMaker;
pub use payload::{Payload, Role};
pub use sealed_maker::SealedMaker;

use crate::errors::ErrorKind;
use crate::storage::TimeSource;

/// Creates and verifies tokens.
pub trait Maker: Send + Sync {
    /// Create a token for `username` with `role`, valid for `duration`.
    ///
    /// Returns the serialized token and the payload embedded in it.
    fn create_token(
        &self,
        username: &str,
        role: Role,
        duration: TimeDelta,
    ) -> Result<(String, Payload), TokenError>;

    /// Check a token's authenticity and expiry and return its payload.
    fn verify_token(&self, token: &str) -> Result<Payload, TokenError>;
}

/// Available token schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenScheme {
    /// HS256 JSON Web Token.
    Jwt,
    /// Authenticated-encryption sealed token.
    Sealed,
}

impl std::str::FromStr for TokenScheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "jwt" => Ok(Self::Jwt),
            "sealed" => Ok(Self::Sealed),
            other => Err(format!("unknown token scheme '{other}'")),
        }
    }
}

/// Build the maker for `scheme` keyed with `key`.
pub fn new_maker(
    scheme: TokenScheme,
    key: &[u8],
    time: Arc<dyn TimeSource>,
) -> Result<Arc<dyn Maker>, TokenError> {
    Ok(match scheme {
        TokenScheme::Jwt => Arc::new(JwtMaker::new(key, time)?),
        TokenScheme::Sealed => Arc::new(SealedMaker::new(key, time)?),
    })
}

/// Error returned when creating or verifying a token fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// The token is malformed or its authenticity check failed.
    Invalid,
    /// The token is authentic but has expired.
    Expired,
    /// The key does not meet the scheme's requirements.
    InvalidKey(String),
    /// The payload could not be encoded or sealed.
    Encoding(String),
}

impl std::fmt::Display for TokenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Invalid => write!(f, "token is invalid"),
            Self::Expired => write!(f, "token has expired"),
            Self::InvalidKey(reason) => write!(f, "invalid key: {reason}"),
            Self::Encoding(reason) => write!(f, "cannot encode token: {reason}"),
        }
    }
}

impl std::error::Error for TokenError {}

impl TokenError {
    /// Outward error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Invalid => ErrorKind::InvalidToken,
            Self::Expired => ErrorKind::ExpiredToken,
            Self::InvalidKey(_) | Self::Encoding(_) => ErrorKind::Internal,
        }
    }
}
