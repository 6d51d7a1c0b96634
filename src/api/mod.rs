// HTTP APIs: OAuth flow and token refresh

pub mod oauth;
pub mod refresh;

pub use oauth::{create_oauth_router, OAuthAppState};
pub use refresh::{create_refresh_router, RefreshAppState};

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, Method};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};

/// Combines the OAuth and refresh routers.
///
/// With a non-empty `allowed_origins` list the dashboard origins get a
/// credentialed CORS layer; otherwise no CORS headers are sent.
pub fn create_app(
    oauth: OAuthAppState,
    refresh: RefreshAppState,
    allowed_origins: &[String],
) -> Result<Router> {
    let router = create_oauth_router(oauth).merge(create_refresh_router(refresh));

    if allowed_origins.is_empty() {
        return Ok(router);
    }

    let origins = allowed_origins
        .iter()
        .map(|origin| {
            origin
                .parse::<HeaderValue>()
                .with_context(|| format!("Invalid allowed origin '{}'", origin))
        })
        .collect::<Result<Vec<_>>>()?;

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true);

    Ok(router.layer(cors))
}
