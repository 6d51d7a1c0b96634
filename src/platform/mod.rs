//! Revenue platforms and their OAuth token endpoints.
//!
//! Every supported provider is a [`PlatformAdapter`] registered in a
//! [`PlatformRegistry`]. Adapters know how to build the consent URL, trade an
//! authorization code for tokens, and (where the provider allows it) refresh
//! an access token. Adding a provider means adding an adapter, not touching
//! the callback or refresh handlers.

mod adapters;
mod registry;

pub use adapters::{AppCredentials, FormPostAdapter, NestedPayloadAdapter, QueryGetAdapter};
pub use registry::PlatformRegistry;

use crate::config::EnvSource;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported revenue platforms.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum Platform {
    /// Video host
    Youtube,
    /// Membership host
    Patreon,
    /// Payment processor
    Stripe,
    /// Photo host
    Instagram,
    /// Short-video host
    Tiktok,
}

impl Platform {
    pub const ALL: [Platform; 5] = [
        Platform::Youtube,
        Platform::Patreon,
        Platform::Stripe,
        Platform::Instagram,
        Platform::Tiktok,
    ];

    /// Wire identifier used in `state`, storage and config keys
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Youtube => "youtube",
            Platform::Patreon => "patreon",
            Platform::Stripe => "stripe",
            Platform::Instagram => "instagram",
            Platform::Tiktok => "tiktok",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string is not a known platform id
#[derive(Debug, Clone, PartialEq)]
pub struct UnknownPlatform(pub String);

impl fmt::Display for UnknownPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unknown platform '{}'", self.0)
    }
}

impl std::error::Error for UnknownPlatform {}

impl FromStr for Platform {
    type Err = UnknownPlatform;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Platform::ALL
            .into_iter()
            .find(|platform| platform.as_str() == s)
            .ok_or_else(|| UnknownPlatform(s.to_string()))
    }
}

impl TryFrom<String> for Platform {
    type Error = UnknownPlatform;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Tokens returned by a provider token endpoint.
#[derive(Clone, Debug, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Lifetime of the access token in seconds
    #[serde(default)]
    pub expires_in: Option<i64>,
}

/// Access token lifetime assumed when the provider does not report one
pub const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

impl TokenGrant {
    /// Absolute expiry of the access token, counted from `now`.
    ///
    /// Missing, non-positive or out-of-range `expires_in` values fall back
    /// to [`DEFAULT_TOKEN_LIFETIME_SECS`].
    pub fn expires_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.expires_in
            .filter(|secs| *secs > 0)
            .and_then(Duration::try_seconds)
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .unwrap_or_else(|| now + Duration::seconds(DEFAULT_TOKEN_LIFETIME_SECS))
    }
}

/// Static refresh settings for a platform that supports the refresh grant.
#[derive(Clone, Debug, PartialEq)]
pub struct RefreshConfig {
    pub token_url: String,
    pub client_id_env: &'static str,
    pub client_secret_env: &'static str,
}

/// Failure talking to a provider token endpoint (code exchange or refresh).
///
/// `Rejected` carries the provider's raw error body. It is meant for server
/// logs on the exchange path; only the refresh path hands it to the caller.
#[derive(Debug)]
pub enum ExchangeError {
    /// A client id or secret is missing from the environment
    NotConfigured {
        platform: Platform,
        variable: &'static str,
    },
    /// The platform has no refresh grant
    RefreshUnsupported(Platform),
    /// Non-success HTTP status from the provider
    Rejected { status: u16, body: String },
    /// Request could not be sent or the response could not be read
    Transport(reqwest::Error),
    /// Success status but the payload had no usable tokens
    Malformed(String),
}

impl fmt::Display for ExchangeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExchangeError::NotConfigured { platform, variable } => {
                write!(f, "OAuth not configured for {} ({} is not set)", platform, variable)
            }
            ExchangeError::RefreshUnsupported(platform) => {
                write!(f, "Token refresh not supported for {}", platform)
            }
            ExchangeError::Rejected { status, body } => {
                write!(f, "Token endpoint returned status {}: {}", status, body)
            }
            ExchangeError::Transport(e) => write!(f, "Token endpoint request failed: {}", e),
            ExchangeError::Malformed(msg) => write!(f, "Malformed token response: {}", msg),
        }
    }
}

impl std::error::Error for ExchangeError {}

impl From<reqwest::Error> for ExchangeError {
    fn from(e: reqwest::Error) -> Self {
        ExchangeError::Transport(e)
    }
}

/// Provider-specific OAuth behaviour.
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    /// Platform this adapter serves.
    fn platform(&self) -> Platform;

    /// Builds the provider consent URL for `state` and `redirect_uri`.
    fn authorize_url(
        &self,
        env: &dyn EnvSource,
        state: &str,
        redirect_uri: &str,
    ) -> Result<String, ExchangeError>;

    /// Trades a one-time authorization code for tokens.
    async fn exchange(
        &self,
        http: &reqwest::Client,
        env: &dyn EnvSource,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenGrant, ExchangeError>;

    /// Refresh settings, `None` when the provider cannot be refreshed.
    fn refresh_config(&self) -> Option<&RefreshConfig> {
        None
    }

    /// Exchanges a refresh token for a new access token.
    async fn refresh(
        &self,
        http: &reqwest::Client,
        env: &dyn EnvSource,
        refresh_token: &str,
    ) -> Result<TokenGrant, ExchangeError> {
        let config = self
            .refresh_config()
            .ok_or_else(|| ExchangeError::RefreshUnsupported(self.platform()))?;
        let platform = self.platform();
        let client_id = require(env, platform, config.client_id_env)?;
        let client_secret = require(env, platform, config.client_secret_env)?;

        let form = [
            ("client_id", client_id.as_str()),
            ("client_secret", client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];

        tracing::debug!(platform = %platform, "Refreshing access token at {}", config.token_url);

        let response = http
            .post(&config.token_url)
            .header("Accept", "application/json")
            .form(&form)
            .send()
            .await?;

        adapters::read_grant(response).await
    }
}

/// Reads a required credential from the environment.
pub(crate) fn require(
    env: &dyn EnvSource,
    platform: Platform,
    variable: &'static str,
) -> Result<String, ExchangeError> {
    env.get(variable)
        .ok_or(ExchangeError::NotConfigured { platform, variable })
}
