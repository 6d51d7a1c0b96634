//! Token refresh endpoint.
//!
//! Renews the access token of one of the caller's connections using its
//! stored refresh token. Both tokens are re-sealed on success, so a legacy
//! plaintext refresh token comes out of this encrypted.

use crate::auth::{IdentityProvider, User};
use crate::config::EnvSource;
use crate::credentials::{ConnectionFilter, ConnectionStore, CryptoError, TokenCipher, TokenUpdate};
use crate::platform::{ExchangeError, Platform, PlatformRegistry};
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::post,
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Shared application state for the refresh route
#[derive(Clone)]
pub struct RefreshAppState {
    pub store: Arc<ConnectionStore>,
    pub cipher: TokenCipher,
    pub registry: Arc<PlatformRegistry>,
    pub env: Arc<dyn EnvSource>,
    pub http: reqwest::Client,
    pub identity: Arc<dyn IdentityProvider>,
}

/// Request body for POST /api/connections/refresh
#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    #[serde(rename = "connectionId", alias = "connection_id", default)]
    pub connection_id: Option<String>,
}

/// Successful refresh
#[derive(Debug, Serialize)]
pub struct RefreshOutcome {
    pub success: bool,
    pub message: String,
    pub expires_at: DateTime<Utc>,
}

/// Refresh failures, each mapped to the status the dashboard expects.
#[derive(Debug)]
pub enum RefreshError {
    MissingConnectionId,
    Unauthorized,
    /// Unknown id and someone else's id look the same
    NotFound,
    NoRefreshToken,
    Unsupported,
    NotConfigured(Platform),
    /// Provider rejected the refresh grant; its body is passed back
    Rejected(Value),
    /// Another refresh replaced the tokens first
    Conflict,
    Crypto(CryptoError),
    Internal(String),
}

impl fmt::Display for RefreshError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefreshError::MissingConnectionId => write!(f, "Connection ID is required"),
            RefreshError::Unauthorized => write!(f, "Unauthorized"),
            RefreshError::NotFound => write!(f, "Connection not found or unauthorized"),
            RefreshError::NoRefreshToken => write!(f, "No refresh token available"),
            RefreshError::Unsupported => write!(f, "Token refresh not supported for this platform"),
            RefreshError::NotConfigured(platform) => {
                write!(f, "OAuth not configured for {}", platform)
            }
            RefreshError::Rejected(_) => write!(f, "Failed to refresh token"),
            RefreshError::Conflict => write!(f, "Connection was refreshed concurrently"),
            RefreshError::Crypto(e) => write!(f, "{}", e),
            RefreshError::Internal(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for RefreshError {}

impl From<CryptoError> for RefreshError {
    fn from(e: CryptoError) -> Self {
        RefreshError::Crypto(e)
    }
}

impl RefreshError {
    pub fn status(&self) -> StatusCode {
        match self {
            RefreshError::MissingConnectionId
            | RefreshError::NoRefreshToken
            | RefreshError::Unsupported
            | RefreshError::Rejected(_) => StatusCode::BAD_REQUEST,
            RefreshError::Unauthorized => StatusCode::UNAUTHORIZED,
            RefreshError::NotFound => StatusCode::NOT_FOUND,
            RefreshError::Conflict => StatusCode::CONFLICT,
            RefreshError::NotConfigured(_) | RefreshError::Crypto(_) | RefreshError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for RefreshError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            RefreshError::Rejected(details) => json!({
                "error": self.to_string(),
                "details": details,
            }),
            RefreshError::Crypto(_) | RefreshError::Internal(_) => {
                error!(error = %self, "Token refresh failed");
                json!({ "error": "Token refresh failed" })
            }
            _ => json!({ "error": self.to_string() }),
        };

        (status, Json(body)).into_response()
    }
}

/// Provider error body as JSON when it parses, else as a plain string.
fn provider_details(body: &str) -> Value {
    serde_json::from_str(body).unwrap_or_else(|_| Value::String(body.to_string()))
}

/// Refreshes connection `connection_id` on behalf of `caller`.
pub async fn refresh_connection(
    state: &RefreshAppState,
    caller: &User,
    connection_id: &str,
) -> Result<RefreshOutcome, RefreshError> {
    let connection = state
        .store
        .filter(&ConnectionFilter::owned(connection_id, &caller.id))
        .map_err(|e| RefreshError::Internal(format!("Failed to load connection: {:#}", e)))?
        .into_iter()
        .next()
        .ok_or(RefreshError::NotFound)?;

    let stored_refresh = connection
        .refresh_token
        .clone()
        .ok_or(RefreshError::NoRefreshToken)?;
    let refresh_token = state.cipher.decrypt(&stored_refresh)?;

    let platform = connection.platform;
    let adapter = state
        .registry
        .get(platform)
        .filter(|adapter| adapter.refresh_config().is_some())
        .ok_or(RefreshError::Unsupported)?;

    debug!(platform = %platform, connection_id = %connection.id, "Refreshing token");
    let grant = adapter
        .refresh(&state.http, state.env.as_ref(), &refresh_token)
        .await
        .map_err(|e| match e {
            ExchangeError::NotConfigured { platform, variable } => {
                error!(platform = %platform, variable = %variable, "Refresh credentials missing");
                RefreshError::NotConfigured(platform)
            }
            ExchangeError::RefreshUnsupported(_) => RefreshError::Unsupported,
            ExchangeError::Rejected { status, body } => {
                warn!(
                    platform = %platform,
                    connection_id = %connection.id,
                    status = status,
                    "Provider rejected refresh grant"
                );
                RefreshError::Rejected(provider_details(&body))
            }
            other => RefreshError::Internal(other.to_string()),
        })?;

    let expires_at = grant.expires_at(Utc::now());
    let update = TokenUpdate {
        access_token: state.cipher.encrypt(&grant.access_token)?,
        // Providers that rotate refresh tokens send a new one; otherwise keep ours
        refresh_token: state
            .cipher
            .encrypt(grant.refresh_token.as_deref().unwrap_or(&refresh_token))?,
        expires_at,
        previous_refresh_token: stored_refresh,
    };

    let applied = state
        .store
        .update_tokens(&connection.id, &update)
        .map_err(|e| RefreshError::Internal(format!("Failed to store tokens: {:#}", e)))?;
    if !applied {
        warn!(platform = %platform, connection_id = %connection.id, "Lost refresh race");
        return Err(RefreshError::Conflict);
    }

    info!(
        platform = %platform,
        connection_id = %connection.id,
        user_id = %caller.id,
        rotated = grant.refresh_token.is_some(),
        "Token refreshed"
    );

    Ok(RefreshOutcome {
        success: true,
        message: "Token refreshed successfully".to_string(),
        expires_at,
    })
}

/// Create refresh router
pub fn create_refresh_router(state: RefreshAppState) -> Router {
    Router::new()
        .route("/api/connections/refresh", post(refresh_handler))
        .with_state(Arc::new(state))
}

/// POST /api/connections/refresh
async fn refresh_handler(
    State(state): State<Arc<RefreshAppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<RefreshOutcome>, RefreshError> {
    let user = state
        .identity
        .resolve(&headers)
        .ok_or(RefreshError::Unauthorized)?;

    let connection_id = serde_json::from_slice::<RefreshRequest>(&body)
        .ok()
        .and_then(|request| request.connection_id)
        .filter(|id| !id.is_empty())
        .ok_or(RefreshError::MissingConnectionId)?;

    refresh_connection(&state, &user, &connection_id)
        .await
        .map(Json)
}
