//! OAuth 2.0 authorization flow for revenue platforms.
//!
//! Implements the authorization code flow:
//! 1. Dashboard opens a popup on GET /api/platforms/:platform/oauth/start
//! 2. We set the `oauth_state` cookie and redirect to the provider
//! 3. User authorizes on the provider's site
//! 4. Provider redirects to GET /auth/callback?code=..&state=<platform>:<token>
//! 5. Code is exchanged for tokens, stored encrypted, initial sync kicked off
//! 6. Popup posts `oauth_success` to the dashboard and closes

mod callback;
pub mod csrf;

pub use callback::{complete_authorization, CallbackBody, CallbackOutcome};

use crate::auth::IdentityProvider;
use crate::config::EnvSource;
use crate::credentials::{ConnectionStore, TokenCipher};
use crate::platform::{ExchangeError, PlatformRegistry};
use crate::sync::SyncTrigger;
use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Json, Redirect, Response},
    routing::get,
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Application error types for the authorization start endpoint
enum AppError {
    BadRequest(String),
    Unauthorized(String),
    ServerError(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::ServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse {
            error: error_message,
        });

        (status, body).into_response()
    }
}

/// Shared application state for the OAuth routes
#[derive(Clone)]
pub struct OAuthAppState {
    pub store: Arc<ConnectionStore>,
    pub cipher: TokenCipher,
    pub registry: Arc<PlatformRegistry>,
    pub env: Arc<dyn EnvSource>,
    pub http: reqwest::Client,
    pub sync: Arc<dyn SyncTrigger>,
    pub identity: Arc<dyn IdentityProvider>,
    /// Redirect URI registered with every provider
    pub redirect_uri: String,
    pub state_cookie_max_age_seconds: i64,
    /// Target origin for the success postMessage
    pub post_message_origin: String,
}

/// Create OAuth router
pub fn create_oauth_router(state: OAuthAppState) -> Router {
    Router::new()
        .route("/api/platforms/:platform/oauth/start", get(oauth_start))
        .route("/auth/callback", get(oauth_callback))
        .with_state(Arc::new(state))
}

/// GET /api/platforms/:platform/oauth/start
///
/// Redirects the popup to the provider's consent page.
///
/// # Security
/// - Requires an authenticated caller
/// - Mints a CSRF token, sent both in `state` and in the `oauth_state` cookie
async fn oauth_start(
    State(state): State<Arc<OAuthAppState>>,
    Path(platform_id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let user = state
        .identity
        .resolve(&headers)
        .ok_or_else(|| AppError::Unauthorized("Unauthorized".to_string()))?;

    let adapter = state.registry.lookup(&platform_id).ok_or_else(|| {
        warn!(platform = %platform_id, "OAuth start for unknown platform");
        AppError::BadRequest("Unknown platform".to_string())
    })?;
    let platform = adapter.platform();

    let token = csrf::mint_token();
    let oauth_state = format!("{}:{}", platform, token);

    let auth_url = adapter
        .authorize_url(state.env.as_ref(), &oauth_state, &state.redirect_uri)
        .map_err(|e| match e {
            ExchangeError::NotConfigured { .. } => {
                error!(platform = %platform, error = %e, "OAuth client not configured");
                AppError::ServerError(format!("OAuth not configured for {}", platform))
            }
            other => {
                error!(platform = %platform, error = %other, "Failed to build authorization URL");
                AppError::ServerError("Internal Server Error".to_string())
            }
        })?;

    info!(platform = %platform, user_id = %user.id, "Redirecting to OAuth provider");

    let cookie = csrf::issue_cookie(&token, state.state_cookie_max_age_seconds);
    Ok((
        [(header::SET_COOKIE, cookie)],
        Redirect::temporary(&auth_url),
    )
        .into_response())
}

/// GET /auth/callback
///
/// Provider redirect target. See [`complete_authorization`].
async fn oauth_callback(
    State(state): State<Arc<OAuthAppState>>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    debug!("OAuth callback received");

    let caller = state.identity.resolve(&headers);
    // HTTP/2 clients may split cookies across several headers
    let cookies = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .collect::<Vec<_>>()
        .join("; ");
    let cookie_header = (!cookies.is_empty()).then_some(cookies.as_str());

    complete_authorization(&state, caller.as_ref(), uri.query(), cookie_header)
        .await
        .into_response()
}
