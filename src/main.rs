use anyhow::{Context, Result};
use revlink::api::{create_app, OAuthAppState, RefreshAppState};
use revlink::auth::{IdentityProvider, SessionDirectory};
use revlink::config::{load_config, EnvSource, ProcessEnv, ServiceConfig};
use revlink::credentials::{ConnectionStore, KeyProvider, TokenCipher};
use revlink::platform::PlatformRegistry;
use revlink::sync::{HttpSyncTrigger, SyncTrigger};
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "revlink=info".into()),
        )
        .init();

    info!("Revlink starting...");

    let config = match std::env::var("REVLINK_CONFIG") {
        Ok(path) => {
            let config = load_config(&path)
                .with_context(|| format!("Failed to load config from {}", path))?;
            info!(path = %path, "Configuration loaded");
            config
        }
        Err(_) => {
            info!("REVLINK_CONFIG not set, using defaults");
            ServiceConfig::default()
        }
    };

    let env: Arc<dyn EnvSource> = Arc::new(ProcessEnv);

    let keys = Arc::new(KeyProvider::from_env(env.as_ref()));
    if !keys.is_configured() {
        warn!("ENCRYPTION_KEY is not set; linking and refreshing will fail until it is");
    }
    let cipher = TokenCipher::new(keys);

    let store = Arc::new(
        ConnectionStore::new(&config.storage.database_path)
            .context("Failed to initialize connection store")?,
    );
    info!(database = %config.storage.database_path, "Connection store initialized");

    let registry = Arc::new(PlatformRegistry::with_defaults(&config.platforms));
    info!(platforms = registry.count(), "Platform registry initialized");

    let sessions = SessionDirectory::from_seeds(&config.sessions);
    info!(sessions = sessions.len(), "Session directory seeded");
    let identity: Arc<dyn IdentityProvider> = Arc::new(sessions);

    let http = reqwest::Client::new();
    let sync: Arc<dyn SyncTrigger> = Arc::new(HttpSyncTrigger::new(
        http.clone(),
        config.sync.endpoint.clone(),
        config.sync.function_name.clone(),
    ));

    let oauth_state = OAuthAppState {
        store: Arc::clone(&store),
        cipher: cipher.clone(),
        registry: Arc::clone(&registry),
        env: Arc::clone(&env),
        http: http.clone(),
        sync,
        identity: Arc::clone(&identity),
        redirect_uri: config.oauth.redirect_uri.clone(),
        state_cookie_max_age_seconds: config.oauth.state_cookie_max_age_seconds,
        post_message_origin: config.oauth.post_message_origin.clone(),
    };
    let refresh_state = RefreshAppState {
        store,
        cipher,
        registry,
        env,
        http,
        identity,
    };

    let app = create_app(oauth_state, refresh_state, &config.server.allowed_origins)?;

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(addr = %addr, "HTTP API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for ctrl_c signal");
            }
            info!("Shutdown signal received");
        })
        .await
        .context("HTTP server error")?;

    info!("Revlink stopped");
    Ok(())
}
