//! Completion of the authorization round trip.
//!
//! The provider redirects the browser popup here with `code` and `state`.
//! We check the caller and the CSRF token, trade the code for tokens, store
//! the encrypted connection and answer with a page that notifies the opener
//! window and closes itself.

use super::{csrf, OAuthAppState};
use crate::auth::User;
use crate::credentials::{CryptoError, NewConnection};
use crate::platform::{ExchangeError, Platform};
use crate::sync;
use axum::{
    http::{header, StatusCode},
    response::{Html, IntoResponse, Json, Response},
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::fmt;
use tracing::{debug, error, info, warn};

/// Query parameters of the callback URL
#[derive(Debug, Default, Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

/// Body of a callback response
#[derive(Debug, Clone, PartialEq)]
pub enum CallbackBody {
    /// `{"error": ...}` on every failure path
    Json(serde_json::Value),
    /// Popup page on success
    Html(String),
}

/// HTTP-level result of a callback: status, body and an optional `Set-Cookie`.
#[derive(Debug, Clone)]
pub struct CallbackOutcome {
    pub status: StatusCode,
    pub body: CallbackBody,
    pub set_cookie: Option<String>,
}

impl IntoResponse for CallbackOutcome {
    fn into_response(self) -> Response {
        let mut response = match self.body {
            CallbackBody::Json(value) => (self.status, Json(value)).into_response(),
            CallbackBody::Html(page) => (self.status, Html(page)).into_response(),
        };
        if let Some(cookie) = self.set_cookie {
            match cookie.parse() {
                Ok(value) => {
                    response.headers_mut().insert(header::SET_COOKIE, value);
                }
                Err(e) => error!("Invalid Set-Cookie value: {}", e),
            }
        }
        response
    }
}

/// Failure at one step of the callback.
#[derive(Debug)]
enum CallbackError {
    Unauthorized,
    Provider(String),
    MissingParams,
    SecurityValidation,
    UnknownPlatform,
    Exchange(Platform, ExchangeError),
    Crypto(CryptoError),
    Storage(anyhow::Error),
}

impl fmt::Display for CallbackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallbackError::Unauthorized => write!(f, "Unauthorized"),
            CallbackError::Provider(e) => write!(f, "OAuth error: {}", e),
            CallbackError::MissingParams => write!(f, "Missing code or state parameter"),
            CallbackError::SecurityValidation => write!(f, "Security validation failed"),
            CallbackError::UnknownPlatform => write!(f, "Unknown platform"),
            CallbackError::Exchange(platform, e) => {
                write!(f, "{} token exchange failed: {}", platform, e)
            }
            CallbackError::Crypto(e) => write!(f, "{}", e),
            CallbackError::Storage(e) => write!(f, "Failed to store connection: {:#}", e),
        }
    }
}

impl CallbackError {
    fn status(&self) -> StatusCode {
        match self {
            CallbackError::Unauthorized => StatusCode::UNAUTHORIZED,
            CallbackError::Provider(_)
            | CallbackError::MissingParams
            | CallbackError::SecurityValidation
            | CallbackError::UnknownPlatform => StatusCode::BAD_REQUEST,
            CallbackError::Exchange(..) | CallbackError::Crypto(_) | CallbackError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message safe to show the browser. Server-side failures stay generic.
    fn client_message(&self) -> String {
        match self.status() {
            StatusCode::INTERNAL_SERVER_ERROR => "Internal Server Error".to_string(),
            _ => self.to_string(),
        }
    }
}

impl From<CryptoError> for CallbackError {
    fn from(e: CryptoError) -> Self {
        CallbackError::Crypto(e)
    }
}

/// Runs the callback for `caller`, given the raw query string and `Cookie` header.
///
/// Every failure is converted here, once; server-side failures are logged in
/// full and reach the client only as a generic 500.
pub async fn complete_authorization(
    state: &OAuthAppState,
    caller: Option<&User>,
    query: Option<&str>,
    cookie_header: Option<&str>,
) -> CallbackOutcome {
    match run(state, caller, query, cookie_header).await {
        Ok(platform) => CallbackOutcome {
            status: StatusCode::OK,
            body: CallbackBody::Html(success_page(platform, &state.post_message_origin)),
            set_cookie: Some(csrf::clear_cookie()),
        },
        Err(e) => {
            let status = e.status();
            if status.is_server_error() {
                error!(error = %e, "OAuth callback failed");
            } else {
                debug!(status = %status, error = %e, "OAuth callback rejected");
            }
            CallbackOutcome {
                status,
                body: CallbackBody::Json(json!({ "error": e.client_message() })),
                set_cookie: None,
            }
        }
    }
}

async fn run(
    state: &OAuthAppState,
    caller: Option<&User>,
    query: Option<&str>,
    cookie_header: Option<&str>,
) -> Result<Platform, CallbackError> {
    let user = caller.ok_or(CallbackError::Unauthorized)?;

    let params: CallbackParams =
        serde_urlencoded::from_str(query.unwrap_or_default()).unwrap_or_else(|e| {
            debug!("Unreadable callback query: {}", e);
            CallbackParams::default()
        });

    if let Some(provider_error) = params.error {
        warn!(user_id = %user.id, error = %provider_error, "Provider returned an OAuth error");
        return Err(CallbackError::Provider(provider_error));
    }

    let (code, raw_state) = match (params.code, params.state) {
        (Some(code), Some(raw_state)) if !code.is_empty() && !raw_state.is_empty() => {
            (code, raw_state)
        }
        _ => return Err(CallbackError::MissingParams),
    };

    let parsed = csrf::parse_state(&raw_state);
    if let Err(failure) = csrf::verify(parsed.token, cookie_header) {
        warn!(
            user_id = %user.id,
            state_has_token = failure.state_has_token,
            cookie_has_token = failure.cookie_has_token,
            "CSRF validation failed"
        );
        return Err(CallbackError::SecurityValidation);
    }

    let adapter = state
        .registry
        .lookup(parsed.platform)
        .ok_or(CallbackError::UnknownPlatform)?;
    let platform = adapter.platform();

    debug!(platform = %platform, user_id = %user.id, "Exchanging authorization code");
    let grant = adapter
        .exchange(&state.http, state.env.as_ref(), &code, &state.redirect_uri)
        .await
        .map_err(|e| CallbackError::Exchange(platform, e))?;

    let expires_at = grant.expires_at(Utc::now());
    let access_token = state.cipher.encrypt(&grant.access_token)?;
    let refresh_token = grant
        .refresh_token
        .as_deref()
        .map(|token| state.cipher.encrypt(token))
        .transpose()?;

    let connection = state
        .store
        .create(&NewConnection {
            user_id: user.id.clone(),
            platform,
            access_token,
            refresh_token,
            expires_at,
        })
        .map_err(CallbackError::Storage)?;

    info!(
        platform = %platform,
        user_id = %user.id,
        connection_id = %connection.id,
        has_refresh_token = connection.refresh_token.is_some(),
        "Platform connected"
    );

    sync::dispatch(state.sync.clone(), platform, connection.id);

    Ok(platform)
}

/// Popup page that reports success to the opener and closes itself.
fn success_page(platform: Platform, target_origin: &str) -> String {
    let message = json!({ "type": "oauth_success", "platform": platform.as_str() });
    // `<` escaped so the origin cannot close the script element
    let origin = json!(target_origin).to_string().replace('<', "\\u003c");

    format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>Connected</title></head>
<body>
<p>Connection successful. You can close this window.</p>
<script>
if (window.opener) {{
  window.opener.postMessage({message}, {origin});
}}
window.close();
</script>
</body>
</html>
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callback_params_deserialization() {
        let params: CallbackParams =
            serde_urlencoded::from_str("code=auth_code_123&state=youtube%3Aabc").unwrap();
        assert_eq!(params.code.as_deref(), Some("auth_code_123"));
        assert_eq!(params.state.as_deref(), Some("youtube:abc"));
        assert!(params.error.is_none());

        let params: CallbackParams =
            serde_urlencoded::from_str("error=access_denied&error_description=User+cancelled")
                .unwrap();
        assert_eq!(params.error.as_deref(), Some("access_denied"));
        assert!(params.code.is_none());
    }

    #[test]
    fn test_success_page_posts_message() {
        let page = success_page(Platform::Patreon, "https://app.example.com");
        assert!(page.contains(r#"{"platform":"patreon","type":"oauth_success"}"#)
            || page.contains(r#"{"type":"oauth_success","platform":"patreon"}"#));
        assert!(page.contains(r#""https://app.example.com""#));
        assert!(page.contains("window.close()"));
    }

    #[test]
    fn test_success_page_escapes_origin() {
        let page = success_page(Platform::Stripe, "</script><script>alert(1)");
        assert!(!page.contains("</script><script>"));
    }

    #[test]
    fn test_server_errors_are_generic() {
        let e = CallbackError::Storage(anyhow::anyhow!("disk I/O error at /var/lib/db"));
        assert_eq!(e.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(e.client_message(), "Internal Server Error");

        let e = CallbackError::Exchange(
            Platform::Youtube,
            ExchangeError::Rejected {
                status: 400,
                body: "invalid_grant".to_string(),
            },
        );
        assert_eq!(e.client_message(), "Internal Server Error");

        let e = CallbackError::Provider("access_denied".to_string());
        assert_eq!(e.status(), StatusCode::BAD_REQUEST);
        assert_eq!(e.client_message(), "OAuth error: access_denied");
    }
}
