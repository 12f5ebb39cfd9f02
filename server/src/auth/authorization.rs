//! Bearer header parsing and role checks.

use crate::errors::ErrorKind;
use crate::token::{Maker, Payload, Role, TokenError};

/// Metadata key carrying the credential.
pub const AUTHORIZATION_HEADER: &str = "authorization";

/// The only accepted authorization type, compared case-insensitively.
pub const AUTHORIZATION_BEARER: &str = "bearer";

/// Error returned when authorizing a request fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// No authorization header was sent.
    MissingHeader,
    /// The header is not `<type> <token>`.
    InvalidFormat,
    /// The authorization type is not bearer.
    UnsupportedType(String),
    /// The token failed verification.
    Token(TokenError),
    /// The token's role may not access this operation.
    PermissionDenied(Role),
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingHeader => write!(f, "authorization header is not provided"),
            Self::InvalidFormat => write!(f, "invalid authorization header format"),
            Self::UnsupportedType(kind) => {
                write!(f, "unsupported authorization type '{kind}'")
            }
            Self::Token(e) => write!(f, "invalid access token: {e}"),
            Self::PermissionDenied(role) => write!(f, "role '{role}' is not permitted"),
        }
    }
}

impl std::error::Error for AuthError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Token(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TokenError> for AuthError {
    fn from(e: TokenError) -> Self {
        Self::Token(e)
    }
}

impl AuthError {
    /// Outward error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingHeader | Self::InvalidFormat | Self::UnsupportedType(_) => {
                ErrorKind::MalformedAuthorization
            }
            Self::Token(e) => e.kind(),
            Self::PermissionDenied(_) => ErrorKind::PermissionDenied,
        }
    }
}

/// Extract the bearer token from a header value.
///
/// The value must be exactly two whitespace-separated fields, the first of
/// which is `bearer` in any case.
pub fn bearer_token(header: Option<&str>) -> Result<&str, AuthError> {
    let header = header.ok_or(AuthError::MissingHeader)?;
    let mut fields = header.split_whitespace();
    let (Some(kind), Some(token), None) = (fields.next(), fields.next(), fields.next()) else {
        return Err(AuthError::InvalidFormat);
    };
    if !kind.eq_ignore_ascii_case(AUTHORIZATION_BEARER) {
        return Err(AuthError::UnsupportedType(kind.to_string()));
    }
    Ok(token)
}

/// Authorize a request from its `authorization` header value.
///
/// # Errors
/// - `MissingHeader`, `InvalidFormat` or `UnsupportedType` for a malformed header,
///   before the token is looked at.
/// - `Token` when verification fails.
/// - `PermissionDenied` when the role is not in `accessible_roles`.
pub fn authorize(
    header: Option<&str>,
    maker: &dyn Maker,
    accessible_roles: &[Role],
) -> Result<Payload, AuthError> {
    let token = bearer_token(header)?;
    let payload = maker.verify_token(token)?;
    if !accessible_roles.contains(&payload.role) {
        return Err(AuthError::PermissionDenied(payload.role));
    }
    Ok(payload)
}
