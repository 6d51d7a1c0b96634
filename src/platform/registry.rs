use super::{
    AppCredentials, FormPostAdapter, NestedPayloadAdapter, Platform, PlatformAdapter,
    QueryGetAdapter,
};
use crate::config::EndpointOverride;
use std::collections::HashMap;
use std::sync::Arc;

/// Registry of platform adapters, keyed by platform.
pub struct PlatformRegistry {
    adapters: HashMap<Platform, Arc<dyn PlatformAdapter>>,
}

impl PlatformRegistry {
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    /// Registry with every supported platform, applying endpoint overrides.
    pub fn with_defaults(overrides: &HashMap<Platform, EndpointOverride>) -> Self {
        let endpoint = |platform: Platform, auth_url: &str, token_url: &str| {
            let o = overrides.get(&platform);
            (
                o.and_then(|o| o.auth_url.clone())
                    .unwrap_or_else(|| auth_url.to_string()),
                o.and_then(|o| o.token_url.clone())
                    .unwrap_or_else(|| token_url.to_string()),
            )
        };

        let mut registry = Self::new();

        let (auth, token) = endpoint(
            Platform::Youtube,
            "https://accounts.google.com/o/oauth2/v2/auth",
            "https://oauth2.googleapis.com/token",
        );
        registry.register(Arc::new(
            FormPostAdapter::new(
                Platform::Youtube,
                auth,
                token,
                "https://www.googleapis.com/auth/yt-analytics.readonly https://www.googleapis.com/auth/youtube.readonly",
                AppCredentials::standard("YOUTUBE_CLIENT_ID", "YOUTUBE_CLIENT_SECRET"),
            )
            // Google only issues refresh tokens for offline access
            .with_consent_params(&[("access_type", "offline"), ("prompt", "consent")])
            .refreshable(),
        ));

        let (auth, token) = endpoint(
            Platform::Patreon,
            "https://www.patreon.com/oauth2/authorize",
            "https://www.patreon.com/api/oauth2/token",
        );
        registry.register(Arc::new(
            FormPostAdapter::new(
                Platform::Patreon,
                auth,
                token,
                "identity identity[email] campaigns campaigns.members",
                AppCredentials::standard("PATREON_CLIENT_ID", "PATREON_CLIENT_SECRET"),
            )
            .refreshable(),
        ));

        let (auth, token) = endpoint(
            Platform::Stripe,
            "https://connect.stripe.com/oauth/authorize",
            "https://connect.stripe.com/oauth/token",
        );
        registry.register(Arc::new(
            FormPostAdapter::new(
                Platform::Stripe,
                auth,
                token,
                "read_write",
                AppCredentials::standard("STRIPE_CLIENT_ID", "STRIPE_CLIENT_SECRET"),
            )
            .refreshable(),
        ));

        let (auth, token) = endpoint(
            Platform::Instagram,
            "https://www.facebook.com/v20.0/dialog/oauth",
            "https://graph.facebook.com/v20.0/oauth/access_token",
        );
        registry.register(Arc::new(QueryGetAdapter::new(
            Platform::Instagram,
            auth,
            token,
            "instagram_basic,instagram_manage_insights,pages_read_engagement",
            AppCredentials::standard("INSTAGRAM_CLIENT_ID", "INSTAGRAM_CLIENT_SECRET"),
        )));

        let (auth, token) = endpoint(
            Platform::Tiktok,
            "https://www.tiktok.com/v2/auth/authorize/",
            "https://open.tiktokapis.com/v2/oauth/token/",
        );
        registry.register(Arc::new(NestedPayloadAdapter::new(
            Platform::Tiktok,
            auth,
            token,
            "video.list,user.info.basic,video.insights",
            AppCredentials {
                id_field: "client_key",
                id_env: "TIKTOK_CLIENT_KEY",
                secret_env: "TIKTOK_CLIENT_SECRET",
            },
        )));

        registry
    }

    /// Register an adapter, replacing any previous one for the same platform.
    pub fn register(&mut self, adapter: Arc<dyn PlatformAdapter>) {
        self.adapters.insert(adapter.platform(), adapter);
    }

    /// Get the adapter for a platform.
    pub fn get(&self, platform: Platform) -> Option<Arc<dyn PlatformAdapter>> {
        self.adapters.get(&platform).cloned()
    }

    /// Resolve a wire id (e.g. the left half of `state`) to its adapter.
    pub fn lookup(&self, id: &str) -> Option<Arc<dyn PlatformAdapter>> {
        id.parse::<Platform>().ok().and_then(|platform| self.get(platform))
    }

    /// Number of registered platforms.
    pub fn count(&self) -> usize {
        self.adapters.len()
    }
}

impl Default for PlatformRegistry {
    fn default() -> Self {
        Self::with_defaults(&HashMap::new())
    }
}
