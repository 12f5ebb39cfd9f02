//! JWT token maker.
//!
//! Signs tokens with HS256 over a symmetric secret.
//!
//! # Pre-conditions
//! - The secret must be at least [`MIN_SECRET_SIZE`] bytes.
//!
//! # Post-conditions
//! - On success, `verify_token` returns the exact payload embedded at creation.
//!
//! # Invariants
//! - Only HS256 is accepted on verification; `alg: none` and algorithm
//!   confusion fail the signature check.
//! - Expiry is checked by this module against the injected time source, after
//!   the signature has been verified.

use std::sync::Arc;

use chrono::TimeDelta;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};

use super::{Maker, Payload, Role, TokenError};
use crate::storage::TimeSource;

/// Minimum HS256 secret length in bytes.
pub const MIN_SECRET_SIZE: usize = 32;

/// Creates and verifies HS256 JSON Web Tokens.
pub struct JwtMaker {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    time: Arc<dyn TimeSource>,
}

impl JwtMaker {
    /// Create a maker keyed with `secret`.
    ///
    /// # Errors
    /// Returns `TokenError::InvalidKey` if the secret is shorter than [`MIN_SECRET_SIZE`].
    pub fn new(secret: &[u8], time: Arc<dyn TimeSource>) -> Result<Self, TokenError> {
        if secret.len() < MIN_SECRET_SIZE {
            return Err(TokenError::InvalidKey(format!(
                "secret must be at least {MIN_SECRET_SIZE} bytes"
            )));
        }

        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is enforced against our own clock in verify_token
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            time,
        })
    }
}

impl Maker for JwtMaker {
    fn create_token(
        &self,
        username: &str,
        role: Role,
        duration: TimeDelta,
    ) -> Result<(String, Payload), TokenError> {
        let payload = Payload::new(username, role, duration, self.time.now())?;
        let token = encode(&Header::new(Algorithm::HS256), &payload, &self.encoding_key)
            .map_err(|e| TokenError::Encoding(e.to_string()))?;
        Ok((token, payload))
    }

    fn verify_token(&self, token: &str) -> Result<Payload, TokenError> {
        let token_data = decode::<Payload>(token, &self.decoding_key, &self.validation)
            .map_err(|_| TokenError::Invalid)?;

        let payload = token_data.claims;
        payload.valid(self.time.now())?;
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SimulatedTimeSource;

    const SECRET: &[u8] = b"test-secret-key-that-is-long-enough";

    fn maker_with_clock() -> (JwtMaker, Arc<SimulatedTimeSource>) {
        let time = Arc::new(SimulatedTimeSource::default());
        let maker = JwtMaker::new(SECRET, Arc::clone(&time) as Arc<dyn TimeSource>)
            .expect("create maker");
        (maker, time)
    }

    #[test]
    fn test_verify_valid_token() {
        let (maker, time) = maker_with_clock();
        let (token, payload) = maker
            .create_token("user-123", Role::Depositor, TimeDelta::minutes(1))
            .expect("create token");

        assert_eq!(payload.issued_at, time.now());
        assert_eq!(payload.expired_at, time.now() + TimeDelta::minutes(1));

        let verified = maker.verify_token(&token).expect("verified token");
        assert_eq!(verified.username, "user-123");
        assert_eq!(verified.id, payload.id);
    }

    #[test]
    fn test_verify_expires_with_clock() {
        let (maker, time) = maker_with_clock();
        let (token, _) = maker
            .create_token("user-123", Role::Depositor, TimeDelta::minutes(1))
            .expect("create token");

        time.advance(TimeDelta::minutes(1));
        assert_eq!(maker.verify_token(&token), Err(TokenError::Expired));
    }

    #[test]
    fn test_verify_wrong_secret_is_invalid() {
        let (maker, _) = maker_with_clock();
        let (token, _) = maker
            .create_token("user-123", Role::Depositor, TimeDelta::minutes(1))
            .expect("create token");

        let other = JwtMaker::new(
            b"wrong-secret-key-that-is-different",
            Arc::new(SimulatedTimeSource::default()),
        )
        .expect("create maker");
        assert_eq!(other.verify_token(&token), Err(TokenError::Invalid));
    }

    #[test]
    fn test_verify_alg_none_is_invalid() {
        let (maker, _) = maker_with_clock();
        let (token, _) = maker
            .create_token("user-123", Role::Banker, TimeDelta::minutes(1))
            .expect("create token");

        // {"alg":"none","typ":"JWT"} with the original claims and no signature
        let claims = token.split('.').nth(1).expect("claims segment");
        let forged = format!("eyJhbGciOiJub25lIiwidHlwIjoiSldUIn0.{claims}.");
        assert_eq!(maker.verify_token(&forged), Err(TokenError::Invalid));
    }

    #[test]
    fn test_verify_malformed_token() {
        let (maker, _) = maker_with_clock();
        assert_eq!(maker.verify_token("not-a-valid-jwt"), Err(TokenError::Invalid));
        assert_eq!(maker.verify_token(""), Err(TokenError::Invalid));
    }

    #[test]
    fn test_short_secret_rejected() {
        let result = JwtMaker::new(b"short", Arc::new(SimulatedTimeSource::default()));
        assert!(matches!(result, Err(TokenError::InvalidKey(_))));
    }
}
