//! Caller identity.
//!
//! Dashboard requests carry the user's session as `Authorization: Bearer
//! <token>`. An [`IdentityProvider`] turns that header into a [`User`]; the
//! handlers never look at tokens themselves.

use crate::config::SessionSeed;
use axum::http::HeaderMap;
use dashmap::DashMap;
use serde::Serialize;

#[cfg(test)]
mod tests;

/// Authenticated end user
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: String,
    pub email: Option<String>,
}

/// Resolves the caller of a request.
pub trait IdentityProvider: Send + Sync {
    /// Returns the authenticated user, or `None` for anonymous callers.
    fn resolve(&self, headers: &HeaderMap) -> Option<User>;
}

/// In-process session directory mapping bearer tokens to users.
///
/// Seeded from `[[sessions]]` in the config file; embedders that front the
/// service with their own auth layer can implement [`IdentityProvider`]
/// instead.
#[derive(Default)]
pub struct SessionDirectory {
    sessions: DashMap<String, User>,
}

impl SessionDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seeds(seeds: &[SessionSeed]) -> Self {
        let directory = Self::new();
        for seed in seeds {
            directory.insert(
                seed.token.clone(),
                User {
                    id: seed.user_id.clone(),
                    email: seed.email.clone(),
                },
            );
        }
        directory
    }

    pub fn insert(&self, token: String, user: User) {
        self.sessions.insert(token, user);
    }

    pub fn revoke(&self, token: &str) -> bool {
        self.sessions.remove(token).is_some()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl IdentityProvider for SessionDirectory {
    fn resolve(&self, headers: &HeaderMap) -> Option<User> {
        let token = match extract_bearer_token(headers) {
            Ok(token) => token,
            Err(TokenError::Missing) => return None,
            Err(e) => {
                tracing::debug!("Rejected authorization header: {}", e);
                return None;
            }
        };

        self.sessions.get(&token).map(|entry| entry.value().clone())
    }
}

/// Extract bearer token from HTTP Authorization header
pub fn extract_bearer_token(headers: &HeaderMap) -> Result<String, TokenError> {
    let auth_header = headers
        .get("authorization")
        .ok_or(TokenError::Missing)?
        .to_str()
        .map_err(|_| TokenError::InvalidFormat)?;

    parse_bearer_token(auth_header)
}

fn parse_bearer_token(header_value: &str) -> Result<String, TokenError> {
    let (scheme, token) = header_value
        .split_once(' ')
        .ok_or(TokenError::InvalidFormat)?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(TokenError::InvalidFormat);
    }

    let token = token.trim();
    if token.is_empty() {
        return Err(TokenError::Empty);
    }

    Ok(token.to_string())
}

/// Token extraction errors
#[derive(Debug, PartialEq, Clone)]
pub enum TokenError {
    /// Authorization header not present
    Missing,
    /// Not "Bearer <token>" or not valid header text
    InvalidFormat,
    /// Token is empty string
    Empty,
}

impl std::fmt::Display for TokenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenError::Missing => write!(f, "Authorization token not provided"),
            TokenError::InvalidFormat => write!(f, "Invalid authorization token format"),
            TokenError::Empty => write!(f, "Authorization token is empty"),
        }
    }
}

impl std::error::Error for TokenError {}
