//! Sealed token maker.
//!
//! Tokens are the JSON payload encrypted with XChaCha20-Poly1305 under a
//! 32-byte symmetric key, with a fresh random 24-byte nonce per token:
//!
//! ```text
//! v1.sealed.<base64url(nonce || ciphertext || tag)>
//! ```
//!
//! The header is bound to the ciphertext as associated data, so it cannot be
//! swapped without failing the tag check. The payload is only parsed after
//! decryption succeeds.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng, Payload as AeadPayload};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use chrono::TimeDelta;

use super::{Maker, Payload, Role, TokenError};
use crate::storage::TimeSource;

/// Required key length in bytes.
pub const KEY_SIZE: usize = 32;

const HEADER: &str = "v1.sealed.";
const NONCE_SIZE: usize = 24;

/// Creates and verifies sealed tokens.
pub struct SealedMaker {
    cipher: XChaCha20Poly1305,
    time: Arc<dyn TimeSource>,
}

impl SealedMaker {
    /// Create a maker keyed with `key`.
    ///
    /// # Errors
    /// Returns `TokenError::InvalidKey` unless the key is exactly [`KEY_SIZE`] bytes.
    pub fn new(key: &[u8], time: Arc<dyn TimeSource>) -> Result<Self, TokenError> {
        if key.len() != KEY_SIZE {
            return Err(TokenError::InvalidKey(format!(
                "key must be exactly {KEY_SIZE} bytes"
            )));
        }
        let cipher = XChaCha20Poly1305::new_from_slice(key)
            .map_err(|e| TokenError::InvalidKey(e.to_string()))?;
        Ok(Self { cipher, time })
    }
}

impl Maker for SealedMaker {
    fn create_token(
        &self,
        username: &str,
        role: Role,
        duration: TimeDelta,
    ) -> Result<(String, Payload), TokenError> {
        let payload = Payload::new(username, role, duration, self.time.now())?;
        let plaintext =
            serde_json::to_vec(&payload).map_err(|e| TokenError::Encoding(e.to_string()))?;

        let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(
                &nonce,
                AeadPayload {
                    msg: &plaintext,
                    aad: HEADER.as_bytes(),
                },
            )
            .map_err(|e| TokenError::Encoding(e.to_string()))?;

        let mut body = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        body.extend_from_slice(&nonce);
        body.extend_from_slice(&ciphertext);

        Ok((format!("{HEADER}{}", URL_SAFE_NO_PAD.encode(body)), payload))
    }

    fn verify_token(&self, token: &str) -> Result<Payload, TokenError> {
        let encoded = token.strip_prefix(HEADER).ok_or(TokenError::Invalid)?;
        let body = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|_| TokenError::Invalid)?;
        if body.len() <= NONCE_SIZE {
            return Err(TokenError::Invalid);
        }

        let (nonce, ciphertext) = body.split_at(NONCE_SIZE);
        let plaintext = self
            .cipher
            .decrypt(
                XNonce::from_slice(nonce),
                AeadPayload {
                    msg: ciphertext,
                    aad: HEADER.as_bytes(),
                },
            )
            .map_err(|_| TokenError::Invalid)?;

        let payload: Payload =
            serde_json::from_slice(&plaintext).map_err(|_| TokenError::Invalid)?;
        payload.valid(self.time.now())?;
        Ok(payload)
    }
}
