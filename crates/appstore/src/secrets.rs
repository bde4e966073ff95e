//! At-rest protection for secret settings fields.
//!
//! With a cipher configured every secret is written as
//! `enc:v1:<key_id>:<nonce>:<ciphertext>` (base64url, no padding). Without
//! one, secrets are written as entered, so such values may not begin with
//! the envelope prefix.

use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use chacha20poly1305::aead::Aead;
use chacha20poly1305::{ChaCha20Poly1305, KeyInit, Nonce};
use uuid::Uuid;

use crate::error::{AppStoreError, Result};

const ENVELOPE_PREFIX: &str = "enc:v1:";
const DEFAULT_KEY_ID: &str = "v1";
const NONCE_LEN: usize = 12;

#[derive(Clone)]
pub struct SecretCipher {
    key_id: String,
    key: [u8; 32],
}

impl fmt::Debug for SecretCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretCipher")
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

impl SecretCipher {
    pub fn new(key_id: impl Into<String>, key: [u8; 32]) -> Self {
        Self {
            key_id: key_id.into(),
            key,
        }
    }

    /// Builds a cipher from a base64 (url-safe or standard) 32-byte key.
    /// Returns `None` and logs when the key is missing or malformed.
    pub fn from_encoded(encoded_key: Option<&str>, key_id: Option<&str>) -> Option<Self> {
        let encoded_key = encoded_key.map(str::trim).filter(|value| !value.is_empty())?;
        let key_id = key_id
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(DEFAULT_KEY_ID);

        let decoded = URL_SAFE_NO_PAD
            .decode(encoded_key.as_bytes())
            .or_else(|_| STANDARD.decode(encoded_key.as_bytes()));
        match decoded {
            Ok(bytes) => match <[u8; 32]>::try_from(bytes.as_slice()) {
                Ok(material) => Some(Self::new(key_id, material)),
                Err(_) => {
                    tracing::warn!(
                        target: "appstore.secrets",
                        key_bytes = bytes.len(),
                        "secret encryption key ignored: expected 32-byte base64 value",
                    );
                    None
                }
            },
            Err(error) => {
                tracing::warn!(
                    target: "appstore.secrets",
                    error = %error,
                    "secret encryption key ignored: invalid base64 payload",
                );
                None
            }
        }
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Always produces a fresh envelope, whatever `plaintext` looks like.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let nonce_source = Uuid::new_v4().into_bytes();
        let nonce = &nonce_source[..NONCE_LEN];
        let ciphertext = self
            .aead()?
            .encrypt(Nonce::from_slice(nonce), plaintext.as_bytes())
            .map_err(|error| AppStoreError::persistence(format!("failed to seal secret: {error}")))?;
        Ok(Envelope {
            key_id: &self.key_id,
            nonce: nonce.to_vec(),
            ciphertext,
        }
        .to_string())
    }

    pub fn decrypt(&self, stored: &str) -> Result<String> {
        let envelope = Envelope::parse(stored)?;
        if envelope.key_id != self.key_id {
            return Err(AppStoreError::persistence(format!(
                "secret key id {} is not configured",
                envelope.key_id
            )));
        }
        let plaintext = self
            .aead()?
            .decrypt(
                Nonce::from_slice(&envelope.nonce),
                envelope.ciphertext.as_slice(),
            )
            .map_err(|error| AppStoreError::persistence(format!("failed to open secret: {error}")))?;
        String::from_utf8(plaintext)
            .map_err(|error| AppStoreError::persistence(format!("secret is invalid utf8: {error}")))
    }

    fn aead(&self) -> Result<ChaCha20Poly1305> {
        ChaCha20Poly1305::new_from_slice(&self.key).map_err(|error| {
            AppStoreError::persistence(format!("failed to initialize secret cipher: {error}"))
        })
    }
}

struct Envelope<'a> {
    key_id: &'a str,
    nonce: Vec<u8>,
    ciphertext: Vec<u8>,
}

impl<'a> Envelope<'a> {
    fn parse(stored: &'a str) -> Result<Self> {
        let invalid = || AppStoreError::persistence("secret envelope is invalid");
        let body = stored.strip_prefix(ENVELOPE_PREFIX).ok_or_else(invalid)?;
        let parts = body.split(':').collect::<Vec<_>>();
        let [key_id, nonce, ciphertext] = parts[..] else {
            return Err(invalid());
        };

        let nonce = URL_SAFE_NO_PAD
            .decode(nonce.as_bytes())
            .map_err(|error| AppStoreError::persistence(format!("failed to decode nonce: {error}")))?;
        if nonce.len() != NONCE_LEN {
            return Err(AppStoreError::persistence("secret nonce length is invalid"));
        }
        let ciphertext = URL_SAFE_NO_PAD
            .decode(ciphertext.as_bytes())
            .map_err(|error| AppStoreError::persistence(format!("failed to decode secret: {error}")))?;
        Ok(Self {
            key_id,
            nonce,
            ciphertext,
        })
    }
}

impl fmt::Display for Envelope<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{ENVELOPE_PREFIX}{}:{}:{}",
            self.key_id,
            URL_SAFE_NO_PAD.encode(&self.nonce),
            URL_SAFE_NO_PAD.encode(&self.ciphertext)
        )
    }
}

pub fn is_sealed(stored: &str) -> bool {
    stored.starts_with(ENVELOPE_PREFIX)
}

/// Stored form of a secret entered by a user or returned by a provider.
pub fn protect(plaintext: &str, cipher: Option<&SecretCipher>) -> Result<String> {
    match cipher {
        Some(cipher) => cipher.encrypt(plaintext),
        None if is_sealed(plaintext) => Err(AppStoreError::invalid_argument(format!(
            "secret values may not start with '{ENVELOPE_PREFIX}' while secret encryption is disabled"
        ))),
        None => Ok(plaintext.to_string()),
    }
}

/// Plaintext of a stored secret. Values written without a cipher pass through.
pub fn reveal(stored: &str, cipher: Option<&SecretCipher>) -> Result<String> {
    if !is_sealed(stored) {
        return Ok(stored.to_string());
    }
    cipher
        .ok_or_else(|| {
            AppStoreError::persistence("secret is sealed but no decryption key is configured")
        })?
        .decrypt(stored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn protect_reveal_roundtrip_and_key_rotation_guard() {
        let cipher = SecretCipher::new("v1", [7u8; 32]);
        let rotated = SecretCipher::new("v2", [7u8; 32]);

        let stored = protect("hunter2", Some(&cipher)).expect("protect");
        assert!(is_sealed(&stored));
        assert!(!stored.contains("hunter2"));
        assert_eq!(reveal(&stored, Some(&cipher)).expect("reveal"), "hunter2");

        let wrong_key = reveal(&stored, Some(&rotated)).expect_err("key id mismatch must fail");
        assert!(matches!(wrong_key, AppStoreError::Persistence { .. }));
        let missing_key = reveal(&stored, None).expect_err("missing key must fail");
        assert!(matches!(missing_key, AppStoreError::Persistence { .. }));

        assert_eq!(reveal("legacy", None).expect("plaintext passthrough"), "legacy");
        assert_eq!(protect("plain", None).expect("no cipher"), "plain");
    }

    #[test]
    fn input_shaped_like_an_envelope_is_encrypted_again() {
        let cipher = SecretCipher::new("v1", [3u8; 32]);
        let first = protect("value", Some(&cipher)).expect("protect");
        let second = protect(&first, Some(&cipher)).expect("protect envelope-looking input");
        assert_ne!(first, second);
        assert_eq!(reveal(&second, Some(&cipher)).expect("reveal"), first);

        let literal = "enc:v1:my-literal-password";
        let stored = protect(literal, Some(&cipher)).expect("protect literal");
        assert_eq!(reveal(&stored, Some(&cipher)).expect("reveal literal"), literal);
    }

    #[test]
    fn reserved_prefix_is_rejected_without_cipher() {
        let error = protect("enc:v1:my-literal-password", None).expect_err("ambiguous plaintext");
        assert_eq!(error.code(), ErrorCode::InvalidArgument);
    }

    #[test]
    fn malformed_envelopes_fail_as_persistence_errors() {
        let cipher = SecretCipher::new("v1", [3u8; 32]);
        for stored in ["enc:v1:", "enc:v1:v1:abc", "enc:v1:v1:AAAA:AAAA", "enc:v1:v1:a:b:c"] {
            let error = reveal(stored, Some(&cipher)).expect_err("invalid envelope");
            assert_eq!(error.code(), ErrorCode::Persistence, "{stored}");
        }
    }

    #[test]
    fn encoded_key_must_be_32_bytes() {
        let good = URL_SAFE_NO_PAD.encode([9u8; 32]);
        let cipher = SecretCipher::from_encoded(Some(&good), None).expect("valid key");
        assert_eq!(cipher.key_id(), "v1");

        let short = STANDARD.encode([1u8; 16]);
        assert!(SecretCipher::from_encoded(Some(&short), Some("k2")).is_none());
        assert!(SecretCipher::from_encoded(Some("%%%"), None).is_none());
        assert!(SecretCipher::from_encoded(Some("  "), None).is_none());
        assert!(SecretCipher::from_encoded(None, None).is_none());
    }
}
