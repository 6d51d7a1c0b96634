//! Token exchange transports.
//!
//! Providers agree on the authorization-code grant but not on how to carry it:
//! - [`FormPostAdapter`]: POST form body, token JSON returned as-is
//! - [`QueryGetAdapter`]: same parameters sent as a GET query string
//! - [`NestedPayloadAdapter`]: POST with `client_key`, tokens nested under `data`

use super::{require, ExchangeError, Platform, PlatformAdapter, RefreshConfig, TokenGrant};
use crate::config::EnvSource;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;

/// Where a platform's app credentials live and how they are named on the wire.
#[derive(Clone, Debug)]
pub struct AppCredentials {
    /// Form/query field carrying the client id (`client_id` or `client_key`)
    pub id_field: &'static str,
    pub id_env: &'static str,
    pub secret_env: &'static str,
}

impl AppCredentials {
    pub const fn standard(id_env: &'static str, secret_env: &'static str) -> Self {
        Self {
            id_field: "client_id",
            id_env,
            secret_env,
        }
    }

    fn resolve(&self, env: &dyn EnvSource, platform: Platform) -> Result<(String, String), ExchangeError> {
        let id = require(env, platform, self.id_env)?;
        let secret = require(env, platform, self.secret_env)?;
        Ok((id, secret))
    }
}

/// Consent page settings shared by every transport
#[derive(Clone, Debug)]
struct Consent {
    auth_url: String,
    scope: &'static str,
    extra_params: &'static [(&'static str, &'static str)],
}

impl Consent {
    fn build_url(&self, id_field: &str, client_id: &str, state: &str, redirect_uri: &str) -> String {
        let mut url = format!(
            "{}?{}={}&redirect_uri={}&scope={}&state={}&response_type=code",
            self.auth_url,
            id_field,
            urlencoding::encode(client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(self.scope),
            urlencoding::encode(state)
        );
        for (key, value) in self.extra_params {
            url.push_str(&format!("&{}={}", key, urlencoding::encode(value)));
        }
        url
    }
}

/// Checks the status and decodes the JSON body of a token endpoint response.
async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ExchangeError> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<failed to read body>".to_string());
        return Err(ExchangeError::Rejected {
            status: status.as_u16(),
            body,
        });
    }

    let text = response.text().await?;
    serde_json::from_str(&text).map_err(|e| ExchangeError::Malformed(e.to_string()))
}

pub(super) async fn read_grant(response: reqwest::Response) -> Result<TokenGrant, ExchangeError> {
    read_json(response).await
}

/// Authorization-code grant as a form-encoded POST.
pub struct FormPostAdapter {
    platform: Platform,
    token_url: String,
    consent: Consent,
    credentials: AppCredentials,
    refresh: Option<RefreshConfig>,
}

impl FormPostAdapter {
    pub fn new(
        platform: Platform,
        auth_url: impl Into<String>,
        token_url: impl Into<String>,
        scope: &'static str,
        credentials: AppCredentials,
    ) -> Self {
        Self {
            platform,
            token_url: token_url.into(),
            consent: Consent {
                auth_url: auth_url.into(),
                scope,
                extra_params: &[],
            },
            credentials,
            refresh: None,
        }
    }

    /// Extra consent URL parameters (e.g. offline access)
    pub fn with_consent_params(mut self, params: &'static [(&'static str, &'static str)]) -> Self {
        self.consent.extra_params = params;
        self
    }

    /// Enables the refresh grant against the same token endpoint.
    pub fn refreshable(mut self) -> Self {
        self.refresh = Some(RefreshConfig {
            token_url: self.token_url.clone(),
            client_id_env: self.credentials.id_env,
            client_secret_env: self.credentials.secret_env,
        });
        self
    }
}

#[async_trait]
impl PlatformAdapter for FormPostAdapter {
    fn platform(&self) -> Platform {
        self.platform
    }

    fn authorize_url(
        &self,
        env: &dyn EnvSource,
        state: &str,
        redirect_uri: &str,
    ) -> Result<String, ExchangeError> {
        let client_id = require(env, self.platform, self.credentials.id_env)?;
        Ok(self
            .consent
            .build_url(self.credentials.id_field, &client_id, state, redirect_uri))
    }

    async fn exchange(
        &self,
        http: &reqwest::Client,
        env: &dyn EnvSource,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenGrant, ExchangeError> {
        let (client_id, client_secret) = self.credentials.resolve(env, self.platform)?;

        let form = [
            ("code", code),
            (self.credentials.id_field, client_id.as_str()),
            ("client_secret", client_secret.as_str()),
            ("redirect_uri", redirect_uri),
            ("grant_type", "authorization_code"),
        ];

        tracing::debug!(platform = %self.platform, "Exchanging authorization code at {}", self.token_url);

        let response = http
            .post(&self.token_url)
            .header("Accept", "application/json")
            .form(&form)
            .send()
            .await?;

        read_grant(response).await
    }

    fn refresh_config(&self) -> Option<&RefreshConfig> {
        self.refresh.as_ref()
    }
}

/// Authorization-code grant sent as GET query parameters.
pub struct QueryGetAdapter {
    platform: Platform,
    token_url: String,
    consent: Consent,
    credentials: AppCredentials,
}

impl QueryGetAdapter {
    pub fn new(
        platform: Platform,
        auth_url: impl Into<String>,
        token_url: impl Into<String>,
        scope: &'static str,
        credentials: AppCredentials,
    ) -> Self {
        Self {
            platform,
            token_url: token_url.into(),
            consent: Consent {
                auth_url: auth_url.into(),
                scope,
                extra_params: &[],
            },
            credentials,
        }
    }
}

#[async_trait]
impl PlatformAdapter for QueryGetAdapter {
    fn platform(&self) -> Platform {
        self.platform
    }

    fn authorize_url(
        &self,
        env: &dyn EnvSource,
        state: &str,
        redirect_uri: &str,
    ) -> Result<String, ExchangeError> {
        let client_id = require(env, self.platform, self.credentials.id_env)?;
        Ok(self
            .consent
            .build_url(self.credentials.id_field, &client_id, state, redirect_uri))
    }

    async fn exchange(
        &self,
        http: &reqwest::Client,
        env: &dyn EnvSource,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenGrant, ExchangeError> {
        let (client_id, client_secret) = self.credentials.resolve(env, self.platform)?;

        let query = [
            ("code", code),
            (self.credentials.id_field, client_id.as_str()),
            ("client_secret", client_secret.as_str()),
            ("redirect_uri", redirect_uri),
            ("grant_type", "authorization_code"),
        ];

        tracing::debug!(platform = %self.platform, "Exchanging authorization code at {}", self.token_url);

        let response = http
            .get(&self.token_url)
            .header("Accept", "application/json")
            .query(&query)
            .send()
            .await?;

        read_grant(response).await
    }
}

/// Envelope used by providers that wrap the token payload in `data`
#[derive(Deserialize)]
struct Nested {
    data: Option<TokenGrant>,
}

/// Form POST whose response nests the tokens one level down.
pub struct NestedPayloadAdapter {
    platform: Platform,
    token_url: String,
    consent: Consent,
    credentials: AppCredentials,
}

impl NestedPayloadAdapter {
    pub fn new(
        platform: Platform,
        auth_url: impl Into<String>,
        token_url: impl Into<String>,
        scope: &'static str,
        credentials: AppCredentials,
    ) -> Self {
        Self {
            platform,
            token_url: token_url.into(),
            consent: Consent {
                auth_url: auth_url.into(),
                scope,
                extra_params: &[],
            },
            credentials,
        }
    }
}

#[async_trait]
impl PlatformAdapter for NestedPayloadAdapter {
    fn platform(&self) -> Platform {
        self.platform
    }

    fn authorize_url(
        &self,
        env: &dyn EnvSource,
        state: &str,
        redirect_uri: &str,
    ) -> Result<String, ExchangeError> {
        let client_key = require(env, self.platform, self.credentials.id_env)?;
        Ok(self
            .consent
            .build_url(self.credentials.id_field, &client_key, state, redirect_uri))
    }

    async fn exchange(
        &self,
        http: &reqwest::Client,
        env: &dyn EnvSource,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenGrant, ExchangeError> {
        let (client_key, client_secret) = self.credentials.resolve(env, self.platform)?;

        let form = [
            (self.credentials.id_field, client_key.as_str()),
            ("client_secret", client_secret.as_str()),
            ("code", code),
            ("grant_type", "authorization_code"),
            ("redirect_uri", redirect_uri),
        ];

        tracing::debug!(platform = %self.platform, "Exchanging authorization code at {}", self.token_url);

        let response = http
            .post(&self.token_url)
            .header("Accept", "application/json")
            .form(&form)
            .send()
            .await?;

        let nested: Nested = read_json(response).await?;
        nested
            .data
            .ok_or_else(|| ExchangeError::Malformed("response has no 'data' object".to_string()))
    }
}
