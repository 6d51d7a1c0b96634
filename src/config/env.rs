//! Environment/secret source.
//!
//! Provider client credentials and the encryption master secret are read
//! through this trait so handlers never touch `std::env` directly.

use std::collections::HashMap;

/// Name of the variable holding the token encryption secret.
pub const ENCRYPTION_KEY_VAR: &str = "ENCRYPTION_KEY";

/// Read-only lookup of named secrets.
pub trait EnvSource: Send + Sync {
    /// Returns the value for `name`, or `None` when unset or empty.
    fn get(&self, name: &str) -> Option<String>;
}

/// Process environment.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn get(&self, name: &str) -> Option<String> {
        std::env::var(name).ok().filter(|value| !value.is_empty())
    }
}

impl EnvSource for HashMap<String, String> {
    fn get(&self, name: &str) -> Option<String> {
        HashMap::get(self, name)
            .filter(|value| !value.is_empty())
            .cloned()
    }
}
