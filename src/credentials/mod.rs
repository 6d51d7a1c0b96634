//! Encrypted storage for linked platform connections.
//!
//! Tokens are sealed with AES-256-GCM before they reach SQLite and are only
//! opened again by the refresh path (and by downstream sync jobs).
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       ConnectionStore                    │
//! │  - upsert per (user, platform)           │
//! │  - filtered reads, conditional updates   │
//! └─────────────────────────────────────────┘
//!          ↑ EncryptedToken only
//! ┌─────────────────────────────────────────┐
//! │       TokenCipher                        │
//! │  - v1:<nonce>:<ciphertext> envelopes     │
//! │  - legacy plaintext passthrough          │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use revlink::config::ProcessEnv;
//! use revlink::credentials::{ConnectionStore, KeyProvider, NewConnection, TokenCipher};
//! use revlink::platform::Platform;
//! use chrono::{Duration, Utc};
//! use std::sync::Arc;
//!
//! # fn main() -> anyhow::Result<()> {
//! let cipher = TokenCipher::new(Arc::new(KeyProvider::from_env(&ProcessEnv)));
//! let store = ConnectionStore::new("revlink.db")?;
//!
//! let connection = store.create(&NewConnection {
//!     user_id: "user1".to_string(),
//!     platform: Platform::Patreon,
//!     access_token: cipher.encrypt("access")?,
//!     refresh_token: Some(cipher.encrypt("refresh")?),
//!     expires_at: Utc::now() + Duration::hours(1),
//! })?;
//! println!("Linked {}", connection.id);
//! # Ok(())
//! # }
//! ```

mod encryption;
mod storage;

pub use encryption::{derive_key, CryptoError, EncryptedToken, KeyProvider, TokenCipher};
pub use storage::{
    Connection, ConnectionFilter, ConnectionStore, NewConnection, SyncStatus, TokenUpdate,
};
