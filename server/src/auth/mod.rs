//! Request authorization.
//!
//! Turns an `Authorization` header value into a verified token payload.
//!
//! # Pre-conditions
//! - The header value is passed through unmodified by the transport.
//!
//! # Post-conditions
//! - On success the returned payload is authentic, unexpired, and carries one
//!   of the accessible roles.
//!
//! # Invariants
//! - The header shape is checked before any token verification is attempted.

mod authorization;

pub use authorization::{AUTHORIZATION_BEARER, AUTHORIZATION_HEADER, AuthError, authorize, bearer_token};
