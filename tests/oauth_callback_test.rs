// Integration tests for the OAuth callback route

use anyhow::Result;
use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    response::Response,
    Router,
};
use chrono::{Duration, Utc};
use mockito::{Matcher, Server, ServerGuard};
use revlink::api::{create_oauth_router, OAuthAppState};
use revlink::auth::SessionDirectory;
use revlink::config::{EndpointOverride, SessionSeed};
use revlink::credentials::{ConnectionFilter, ConnectionStore, KeyProvider, SyncStatus, TokenCipher};
use revlink::platform::{Platform, PlatformRegistry};
use revlink::sync::SyncTrigger;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tower::ServiceExt;

const SESSION: &str = "Bearer tok-alice";

struct RecordingSync {
    calls: mpsc::UnboundedSender<(Platform, String)>,
}

#[async_trait]
impl SyncTrigger for RecordingSync {
    async fn trigger(&self, platform: Platform, connection_id: &str) -> Result<()> {
        let _ = self.calls.send((platform, connection_id.to_string()));
        Ok(())
    }
}

struct TestApp {
    router: Router,
    store: Arc<ConnectionStore>,
    cipher: TokenCipher,
    synced: mpsc::UnboundedReceiver<(Platform, String)>,
}

fn test_env() -> HashMap<String, String> {
    let mut env = HashMap::new();
    env.insert("ENCRYPTION_KEY".to_string(), "integration-test-secret".to_string());
    for (id, secret) in [
        ("YOUTUBE_CLIENT_ID", "YOUTUBE_CLIENT_SECRET"),
        ("PATREON_CLIENT_ID", "PATREON_CLIENT_SECRET"),
        ("STRIPE_CLIENT_ID", "STRIPE_CLIENT_SECRET"),
        ("INSTAGRAM_CLIENT_ID", "INSTAGRAM_CLIENT_SECRET"),
        ("TIKTOK_CLIENT_KEY", "TIKTOK_CLIENT_SECRET"),
    ] {
        env.insert(id.to_string(), format!("{}-value", id.to_lowercase()));
        env.insert(secret.to_string(), format!("{}-value", secret.to_lowercase()));
    }
    env
}

fn create_test_app(server: &ServerGuard, env: HashMap<String, String>) -> TestApp {
    let overrides: HashMap<Platform, EndpointOverride> = Platform::ALL
        .into_iter()
        .map(|platform| {
            (
                platform,
                EndpointOverride {
                    auth_url: None,
                    token_url: Some(format!("{}/{}/token", server.url(), platform)),
                },
            )
        })
        .collect();

    let keys = Arc::new(KeyProvider::new(env.get("ENCRYPTION_KEY").cloned()));
    let cipher = TokenCipher::new(keys);
    let store = Arc::new(ConnectionStore::in_memory().unwrap());
    let (calls, synced) = mpsc::unbounded_channel();

    let identity = SessionDirectory::from_seeds(&[SessionSeed {
        token: "tok-alice".to_string(),
        user_id: "user_alice".to_string(),
        email: Some("alice@example.com".to_string()),
    }]);

    let state = OAuthAppState {
        store: Arc::clone(&store),
        cipher: cipher.clone(),
        registry: Arc::new(PlatformRegistry::with_defaults(&overrides)),
        env: Arc::new(env),
        http: reqwest::Client::new(),
        sync: Arc::new(RecordingSync { calls }),
        identity: Arc::new(identity),
        redirect_uri: "https://app.example.com/auth/callback".to_string(),
        state_cookie_max_age_seconds: 600,
        post_message_origin: "https://app.example.com".to_string(),
    };

    TestApp {
        router: create_oauth_router(state),
        store,
        cipher,
        synced,
    }
}

async fn callback(
    app: &TestApp,
    query: &str,
    authorization: Option<&str>,
    cookie: Option<&str>,
) -> Response {
    let mut request = Request::builder().uri(format!("/auth/callback?{}", query));
    if let Some(value) = authorization {
        request = request.header(header::AUTHORIZATION, value);
    }
    if let Some(value) = cookie {
        request = request.header(header::COOKIE, value);
    }

    app.router
        .clone()
        .oneshot(request.body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn body_string(response: Response) -> String {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(body.to_vec()).unwrap()
}

async fn error_message(response: Response) -> String {
    let json: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    json["error"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_unauthenticated_caller() {
    let server = Server::new_async().await;
    let app = create_test_app(&server, test_env());

    let response = callback(&app, "code=abc&state=youtube:tok", None, Some("oauth_state=tok")).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_message(response).await, "Unauthorized");
}

#[tokio::test]
async fn test_provider_error_parameter() {
    let server = Server::new_async().await;
    let app = create_test_app(&server, test_env());

    let response = callback(
        &app,
        "error=access_denied&state=youtube:tok",
        Some(SESSION),
        Some("oauth_state=tok"),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_message(response).await, "OAuth error: access_denied");
}

#[tokio::test]
async fn test_missing_or_empty_parameters() {
    let server = Server::new_async().await;
    let app = create_test_app(&server, test_env());

    for query in ["state=youtube:tok", "code=abc", "code=&state=youtube:tok", "code=abc&state="] {
        let response = callback(&app, query, Some(SESSION), Some("oauth_state=tok")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "query {}", query);
        assert_eq!(
            error_message(response).await,
            "Missing code or state parameter"
        );
    }
}

#[tokio::test]
async fn test_csrf_failures_are_indistinguishable() {
    let server = Server::new_async().await;
    let app = create_test_app(&server, test_env());

    let cases = [
        // state without a colon carries no token
        ("code=abc&state=youtube", Some("oauth_state=tok")),
        // no cookie at all
        ("code=abc&state=youtube:tok", None),
        // cookie present, different token
        ("code=abc&state=youtube:tok", Some("oauth_state=other")),
        // empty token on both sides
        ("code=abc&state=youtube:", Some("oauth_state=")),
    ];

    for (query, cookie) in cases {
        let response = callback(&app, query, Some(SESSION), cookie).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(response.headers().get(header::SET_COOKIE).is_none());
        assert_eq!(error_message(response).await, "Security validation failed");
    }

    assert!(app.store.filter(&ConnectionFilter::default()).unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_platform_after_valid_csrf() {
    let server = Server::new_async().await;
    let app = create_test_app(&server, test_env());

    let response = callback(
        &app,
        "code=abc&state=myspace:tok",
        Some(SESSION),
        Some("oauth_state=tok"),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_message(response).await, "Unknown platform");
}

#[tokio::test]
async fn test_youtube_connection_created() {
    let mut server = Server::new_async().await;
    let token_mock = server
        .mock("POST", "/youtube/token")
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("code".into(), "abc".into()),
            Matcher::UrlEncoded("client_id".into(), "youtube_client_id-value".into()),
            Matcher::UrlEncoded(
                "redirect_uri".into(),
                "https://app.example.com/auth/callback".into(),
            ),
            Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token":"at_1","expires_in":3600}"#)
        .create_async()
        .await;

    let mut app = create_test_app(&server, test_env());
    let before = Utc::now();

    let response = callback(
        &app,
        "code=abc&state=youtube:tok123",
        Some(SESSION),
        Some("theme=dark; oauth_state=tok123"),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
    assert!(content_type.starts_with("text/html"));
    let set_cookie = response.headers()[header::SET_COOKIE].to_str().unwrap().to_string();
    assert!(set_cookie.starts_with("oauth_state=;"));
    assert!(set_cookie.contains("Max-Age=0"));

    let page = body_string(response).await;
    assert!(page.contains("oauth_success"));
    assert!(page.contains(r#""platform":"youtube""#));
    assert!(page.contains("postMessage"));
    token_mock.assert_async().await;

    let connections = app
        .store
        .filter(&ConnectionFilter {
            user_id: Some("user_alice".to_string()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(connections.len(), 1);

    let connection = &connections[0];
    assert_eq!(connection.platform, Platform::Youtube);
    assert_eq!(connection.sync_status, SyncStatus::Active);
    assert!(connection.refresh_token.is_none());
    assert!(connection.access_token.is_sealed());
    assert_ne!(connection.access_token.as_str(), "at_1");
    assert_eq!(app.cipher.decrypt(&connection.access_token).unwrap(), "at_1");

    let expected = before + Duration::hours(1);
    assert!((connection.expires_at - expected).num_seconds().abs() < 60);

    let (platform, connection_id) =
        tokio::time::timeout(std::time::Duration::from_secs(2), app.synced.recv())
            .await
            .unwrap()
            .unwrap();
    assert_eq!(platform, Platform::Youtube);
    assert_eq!(connection_id, connection.id);
}

#[tokio::test]
async fn test_relink_replaces_tokens() {
    let mut server = Server::new_async().await;
    let _first = server
        .mock("POST", "/patreon/token")
        .match_body(Matcher::UrlEncoded("code".into(), "first".into()))
        .with_status(200)
        .with_body(r#"{"access_token":"at_a","refresh_token":"rt_a","expires_in":1800}"#)
        .create_async()
        .await;
    let _second = server
        .mock("POST", "/patreon/token")
        .match_body(Matcher::UrlEncoded("code".into(), "second".into()))
        .with_status(200)
        .with_body(r#"{"access_token":"at_b","refresh_token":"rt_b","expires_in":1800}"#)
        .create_async()
        .await;

    let app = create_test_app(&server, test_env());

    for code in ["first", "second"] {
        let response = callback(
            &app,
            &format!("code={}&state=patreon:t", code),
            Some(SESSION),
            Some("oauth_state=t"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let connections = app.store.filter(&ConnectionFilter::default()).unwrap();
    assert_eq!(connections.len(), 1);
    assert_eq!(app.cipher.decrypt(&connections[0].access_token).unwrap(), "at_b");
    assert_eq!(
        app.cipher
            .decrypt(connections[0].refresh_token.as_ref().unwrap())
            .unwrap(),
        "rt_b"
    );
}

#[tokio::test]
async fn test_tiktok_nested_payload() {
    let mut server = Server::new_async().await;
    let token_mock = server
        .mock("POST", "/tiktok/token")
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("client_key".into(), "tiktok_client_key-value".into()),
            Matcher::UrlEncoded("code".into(), "tt_code".into()),
        ]))
        .with_status(200)
        .with_body(r#"{"data":{"access_token":"act.tt","refresh_token":"rft.tt","expires_in":86400}}"#)
        .create_async()
        .await;

    let app = create_test_app(&server, test_env());

    let response = callback(
        &app,
        "code=tt_code&state=tiktok:tok",
        Some(SESSION),
        Some("oauth_state=tok"),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    token_mock.assert_async().await;

    let connection = app.store.filter(&ConnectionFilter::default()).unwrap().remove(0);
    assert_eq!(connection.platform, Platform::Tiktok);
    assert_eq!(app.cipher.decrypt(&connection.access_token).unwrap(), "act.tt");
    assert!(connection.expires_at > Utc::now() + Duration::hours(23));
}

#[tokio::test]
async fn test_instagram_exchange_uses_query_string() {
    let mut server = Server::new_async().await;
    let token_mock = server
        .mock("GET", "/instagram/token")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("code".into(), "ig_code".into()),
            Matcher::UrlEncoded("client_id".into(), "instagram_client_id-value".into()),
        ]))
        .with_status(200)
        .with_body(r#"{"access_token":"ig_at"}"#)
        .create_async()
        .await;

    let app = create_test_app(&server, test_env());

    let response = callback(
        &app,
        "code=ig_code&state=instagram:tok",
        Some(SESSION),
        Some("oauth_state=tok"),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    token_mock.assert_async().await;
}

#[tokio::test]
async fn test_exchange_failure_is_generic_500() {
    let mut server = Server::new_async().await;
    let _token_mock = server
        .mock("POST", "/stripe/token")
        .with_status(400)
        .with_body(r#"{"error":"invalid_grant","error_description":"code sk_live_secret_detail"}"#)
        .create_async()
        .await;

    let app = create_test_app(&server, test_env());

    let response = callback(
        &app,
        "code=abc&state=stripe:tok",
        Some(SESSION),
        Some("oauth_state=tok"),
    )
    .await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_string(response).await;
    assert!(body.contains("Internal Server Error"));
    assert!(!body.contains("invalid_grant"));
    assert!(app.store.filter(&ConnectionFilter::default()).unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_client_secret_is_500() {
    let server = Server::new_async().await;
    let mut env = test_env();
    env.remove("PATREON_CLIENT_SECRET");
    let app = create_test_app(&server, env);

    let response = callback(
        &app,
        "code=abc&state=patreon:tok",
        Some(SESSION),
        Some("oauth_state=tok"),
    )
    .await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(error_message(response).await, "Internal Server Error");
}

#[tokio::test]
async fn test_missing_encryption_key_is_500() {
    let mut server = Server::new_async().await;
    let _token_mock = server
        .mock("POST", "/youtube/token")
        .with_status(200)
        .with_body(r#"{"access_token":"at_1"}"#)
        .create_async()
        .await;

    let mut env = test_env();
    env.remove("ENCRYPTION_KEY");
    let app = create_test_app(&server, env);

    let response = callback(
        &app,
        "code=abc&state=youtube:tok",
        Some(SESSION),
        Some("oauth_state=tok"),
    )
    .await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(app.store.filter(&ConnectionFilter::default()).unwrap().is_empty());
}
