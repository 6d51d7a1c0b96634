//! AES-256-GCM encryption for stored OAuth tokens.
//!
//! Tokens are sealed into a versioned envelope:
//!
//! ```text
//! v1:{base64(nonce)}:{base64(ciphertext || tag)}
//! ```
//!
//! Each call uses a fresh 96-bit random nonce. Values without the `v1:` prefix
//! are rows written before encryption existed; `decrypt` hands them back
//! unchanged so they keep working until the next refresh re-seals them.

use crate::config::{EnvSource, ENCRYPTION_KEY_VAR};
use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Size of the encryption key in bytes (256 bits)
const KEY_SIZE: usize = 32;

/// Size of the nonce in bytes (96 bits, standard for GCM)
const NONCE_SIZE: usize = 12;

/// Envelope version prefix
const ENVELOPE_PREFIX: &str = "v1:";

/// Token encryption errors
#[derive(Debug, Clone, PartialEq)]
pub enum CryptoError {
    /// No master secret configured
    MissingKey,
    /// Sealing failed
    Encrypt(String),
    /// Envelope is malformed or failed authentication
    Decrypt(String),
}

impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CryptoError::MissingKey => {
                write!(f, "{} environment variable is not set", ENCRYPTION_KEY_VAR)
            }
            CryptoError::Encrypt(msg) => write!(f, "Encryption failed: {}", msg),
            CryptoError::Decrypt(msg) => write!(f, "Failed to decrypt token: {}", msg),
        }
    }
}

impl std::error::Error for CryptoError {}

/// Derives the 32-byte key from the configured secret.
///
/// A 64-character hex string is used as raw key bytes; anything else is
/// hashed with SHA-256.
pub fn derive_key(secret: &str) -> [u8; KEY_SIZE] {
    let mut key = [0u8; KEY_SIZE];

    if secret.len() == KEY_SIZE * 2 && secret.chars().all(|c| c.is_ascii_hexdigit()) {
        if hex::decode_to_slice(secret, &mut key).is_ok() {
            return key;
        }
    }

    key.copy_from_slice(&Sha256::digest(secret.as_bytes()));
    key
}

/// Owns the master secret and the cipher derived from it.
///
/// Built once at startup and shared; the cipher is derived on first use and
/// never changes afterwards.
pub struct KeyProvider {
    secret: Option<String>,
    cipher: OnceLock<Aes256Gcm>,
}

impl KeyProvider {
    pub fn new(secret: Option<String>) -> Self {
        Self {
            secret: secret.filter(|s| !s.is_empty()),
            cipher: OnceLock::new(),
        }
    }

    /// Reads the secret from `ENCRYPTION_KEY`.
    pub fn from_env(env: &dyn EnvSource) -> Self {
        Self::new(env.get(ENCRYPTION_KEY_VAR))
    }

    pub fn is_configured(&self) -> bool {
        self.secret.is_some()
    }

    fn cipher(&self) -> Result<&Aes256Gcm, CryptoError> {
        let secret = self.secret.as_deref().ok_or(CryptoError::MissingKey)?;
        Ok(self
            .cipher
            .get_or_init(|| Aes256Gcm::new(&derive_key(secret).into())))
    }
}

/// A token in its stored form: a `v1:` envelope, or a legacy plaintext value
/// read back from storage.
///
/// New values can only be produced by [`TokenCipher::encrypt`], so nothing
/// else can hand plaintext to the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncryptedToken(String);

impl EncryptedToken {
    /// Wraps a value read back from storage.
    pub(crate) fn from_stored(value: String) -> Self {
        Self(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the value is a versioned envelope (as opposed to legacy plaintext)
    pub fn is_sealed(&self) -> bool {
        self.0.starts_with(ENVELOPE_PREFIX)
    }
}

/// Encrypts and decrypts tokens with the shared key.
#[derive(Clone)]
pub struct TokenCipher {
    keys: Arc<KeyProvider>,
}

impl TokenCipher {
    pub fn new(keys: Arc<KeyProvider>) -> Self {
        Self { keys }
    }

    /// Seals `plaintext` into a fresh `v1:` envelope.
    pub fn encrypt(&self, plaintext: &str) -> Result<EncryptedToken, CryptoError> {
        let cipher = self.keys.cipher()?;

        // Generate random nonce (never reuse!)
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| CryptoError::Encrypt(e.to_string()))?;

        Ok(EncryptedToken(format!(
            "{}{}:{}",
            ENVELOPE_PREFIX,
            BASE64.encode(nonce),
            BASE64.encode(&ciphertext)
        )))
    }

    /// Opens a stored token.
    pub fn decrypt(&self, token: &EncryptedToken) -> Result<String, CryptoError> {
        self.decrypt_str(token.as_str())
    }

    /// Opens a raw envelope string. Unversioned input is returned unchanged.
    pub fn decrypt_str(&self, value: &str) -> Result<String, CryptoError> {
        if !value.starts_with(ENVELOPE_PREFIX) {
            return Ok(value.to_string());
        }

        let parts: Vec<&str> = value.split(':').collect();
        if parts.len() != 3 {
            return Err(CryptoError::Decrypt(format!(
                "expected 3 envelope parts, got {}",
                parts.len()
            )));
        }

        let nonce_bytes = BASE64
            .decode(parts[1])
            .map_err(|e| CryptoError::Decrypt(format!("invalid nonce encoding: {}", e)))?;
        let ciphertext = BASE64
            .decode(parts[2])
            .map_err(|e| CryptoError::Decrypt(format!("invalid ciphertext encoding: {}", e)))?;

        if nonce_bytes.len() != NONCE_SIZE {
            return Err(CryptoError::Decrypt(format!(
                "invalid nonce size: expected {}, got {}",
                NONCE_SIZE,
                nonce_bytes.len()
            )));
        }

        let cipher = self.keys.cipher()?;
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
            .map_err(|_| CryptoError::Decrypt("authentication failed".to_string()))?;

        String::from_utf8(plaintext)
            .map_err(|_| CryptoError::Decrypt("plaintext is not valid UTF-8".to_string()))
    }
}
