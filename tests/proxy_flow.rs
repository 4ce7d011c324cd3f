//! End-to-end tests for the forwarding proxy
//!
//! A mock provider serves the token endpoint and a data endpoint that
//! only accepts the refreshed access token, so every test that reaches
//! it exercises the expiry-refresh-retry path.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::extract::{Form, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Html;
use axum::routing::{get, post};
use axum::{Json, Router};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};

use oauth_relay::config::{Config, ProviderConfig};
use oauth_relay::oauth::{
    Credential, CredentialManager, MemoryTokenStore, ProviderClient, SessionKey, TokenStore,
};
use oauth_relay::relay::NotificationRelay;
use oauth_relay::server::{AppState, create_router};

#[derive(Default)]
struct MockCounters {
    token_requests: AtomicUsize,
    data_requests: AtomicUsize,
}

struct MockProvider {
    base: String,
    counters: Arc<MockCounters>,
}

impl MockProvider {
    fn token_requests(&self) -> usize {
        self.counters.token_requests.load(Ordering::SeqCst)
    }

    fn data_requests(&self) -> usize {
        self.counters.data_requests.load(Ordering::SeqCst)
    }
}

async fn spawn_mock_provider() -> MockProvider {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let counters = Arc::new(MockCounters::default());

    let router = Router::new()
        .route("/token", post(mock_token_handler))
        .route("/data", get(mock_data_handler))
        .route("/error", get(mock_error_handler))
        .route("/page", get(mock_page_handler))
        .route("/plain-denial", get(mock_plain_denial_handler))
        .with_state(Arc::clone(&counters));

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    MockProvider { base, counters }
}

async fn mock_token_handler(
    State(counters): State<Arc<MockCounters>>,
    Form(params): Form<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    counters.token_requests.fetch_add(1, Ordering::SeqCst);

    let grant_type = params.get("grant_type").map(String::as_str);
    let refresh_token = params.get("refresh_token").map(String::as_str);

    if grant_type == Some("refresh_token") && refresh_token == Some("RT1") {
        // No instance_url here: the relay must keep the stored one
        (
            StatusCode::OK,
            Json(json!({"access_token": "AT2", "refresh_token": "RT2"})),
        )
    } else {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "invalid_grant",
                "error_description": "refresh token revoked",
            })),
        )
    }
}

async fn mock_data_handler(
    State(counters): State<Arc<MockCounters>>,
    headers: HeaderMap,
) -> (StatusCode, Json<Value>) {
    counters.data_requests.fetch_add(1, Ordering::SeqCst);

    let authorization = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if authorization == "Bearer AT2" {
        (StatusCode::OK, Json(json!({"records": [{"name": "Acme"}]})))
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!([{
                "message": "Session expired or invalid",
                "errorCode": "INVALID_SESSION_ID",
            }])),
        )
    }
}

async fn mock_error_handler() -> (StatusCode, Json<Value>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"message": "boom"})),
    )
}

/// A success response whose body is not JSON
async fn mock_page_handler() -> Html<&'static str> {
    Html("<!DOCTYPE html><html><body>Sign in to continue</body></html>")
}

/// A 401 whose body does not carry the expiry marker
async fn mock_plain_denial_handler() -> (StatusCode, Json<Value>) {
    (StatusCode::UNAUTHORIZED, Json(json!({"message": "nope"})))
}

struct TestApp {
    base: String,
    store: Arc<MemoryTokenStore>,
    http: reqwest::Client,
}

impl TestApp {
    fn seed(&self, token: &str, credential: Credential) -> SessionKey {
        let session = SessionKey::from(token);
        self.store.set(&session, credential).unwrap();
        session
    }

    async fn query(&self, target: &str, bearer: Option<&str>) -> reqwest::Response {
        let mut request = self.http.get(format!("{}/api/query?q={target}", self.base));
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        request.send().await.unwrap()
    }
}

fn relay_config(mock_base: &str) -> Config {
    Config {
        provider: ProviderConfig {
            authorize_url: format!("{mock_base}/authorize"),
            token_url: format!("{mock_base}/token"),
            client_id: "relay-client".to_string(),
            client_secret: "shh".to_string(),
            redirect_uri: "http://127.0.0.1/oauth/callback".to_string(),
            api_version: "v60.0".to_string(),
            ..ProviderConfig::default()
        },
        ..Config::default()
    }
}

fn credential(access_token: &str, refresh_token: Option<&str>, instance: &str) -> Credential {
    Credential {
        access_token: access_token.to_string(),
        refresh_token: refresh_token.map(ToString::to_string),
        instance_url: instance.to_string(),
        api_version: "v60.0".to_string(),
    }
}

async fn spawn_app(config: Config) -> TestApp {
    let http = reqwest::Client::new();
    let store = Arc::new(MemoryTokenStore::new());
    let relay = Arc::new(NotificationRelay::new());
    let provider = Arc::new(ProviderClient::new(config.provider.clone(), http.clone()));
    let manager = Arc::new(CredentialManager::new(store.clone(), provider.clone()));

    let state = Arc::new(AppState {
        config,
        store: store.clone(),
        relay,
        manager,
        provider,
        http: http.clone(),
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let router = create_router(state);

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    TestApp { base, store, http }
}

async fn error_code(response: reqwest::Response) -> String {
    let body: Value = response.json().await.unwrap();
    body["error"]["code"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_expired_token_is_refreshed_and_retried_once() {
    let mock = spawn_mock_provider().await;
    let app = spawn_app(relay_config(&mock.base)).await;
    let session = app.seed("sess_seeded", credential("AT1", Some("RT1"), &mock.base));

    let response = app
        .query(&format!("{}/data", mock.base), Some("sess_seeded"))
        .await;

    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["records"][0]["name"], "Acme");

    // One refresh, two upstream attempts
    assert_eq!(mock.token_requests(), 1);
    assert_eq!(mock.data_requests(), 2);

    // The stored credential was replaced, instance_url carried forward
    let stored = app.store.get(&session).unwrap();
    assert_eq!(stored.access_token, "AT2");
    assert_eq!(stored.refresh_token.as_deref(), Some("RT2"));
    assert_eq!(stored.instance_url, mock.base);

    // The next call goes straight through with the refreshed token
    let again = app
        .query(&format!("{}/data", mock.base), Some("sess_seeded"))
        .await;
    assert_eq!(again.status(), reqwest::StatusCode::OK);
    assert_eq!(mock.token_requests(), 1);
    assert_eq!(mock.data_requests(), 3);
}

#[tokio::test]
async fn test_revoked_refresh_token_clears_the_session() {
    let mock = spawn_mock_provider().await;
    let app = spawn_app(relay_config(&mock.base)).await;
    let session = app.seed("sess_seeded", credential("AT1", Some("WRONG"), &mock.base));

    let response = app
        .query(&format!("{}/data", mock.base), Some("sess_seeded"))
        .await;

    assert_eq!(response.status(), reqwest::StatusCode::FORBIDDEN);
    assert_eq!(error_code(response).await, "authorization_required");
    assert_eq!(mock.token_requests(), 1);
    assert_eq!(mock.data_requests(), 1);
    assert_eq!(app.store.get(&session), None);
}

#[tokio::test]
async fn test_missing_refresh_token_clears_the_session() {
    let mock = spawn_mock_provider().await;
    let app = spawn_app(relay_config(&mock.base)).await;
    let session = app.seed("sess_seeded", credential("AT1", None, &mock.base));

    let response = app
        .query(&format!("{}/data", mock.base), Some("sess_seeded"))
        .await;

    assert_eq!(response.status(), reqwest::StatusCode::FORBIDDEN);
    assert_eq!(error_code(response).await, "authorization_required");
    // Nothing to refresh with, so the token endpoint is never called
    assert_eq!(mock.token_requests(), 0);
    assert_eq!(app.store.get(&session), None);
}

#[tokio::test]
async fn test_missing_bearer_is_unauthorized() {
    let mock = spawn_mock_provider().await;
    let app = spawn_app(relay_config(&mock.base)).await;

    let response = app.query(&format!("{}/data", mock.base), None).await;

    assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);
    assert_eq!(
        response
            .headers()
            .get("www-authenticate")
            .and_then(|v| v.to_str().ok()),
        Some("Bearer")
    );
    assert_eq!(error_code(response).await, "unauthorized");
    assert_eq!(mock.data_requests(), 0);
}

#[tokio::test]
async fn test_unknown_session_requires_authorization() {
    let mock = spawn_mock_provider().await;
    let app = spawn_app(relay_config(&mock.base)).await;

    let response = app
        .query(&format!("{}/data", mock.base), Some("sess_unknown"))
        .await;

    assert_eq!(response.status(), reqwest::StatusCode::FORBIDDEN);
    assert_eq!(error_code(response).await, "authorization_required");
    assert_eq!(mock.token_requests(), 0);
    assert_eq!(mock.data_requests(), 0);
}

#[tokio::test]
async fn test_relative_target_is_rejected() {
    let mock = spawn_mock_provider().await;
    let app = spawn_app(relay_config(&mock.base)).await;
    app.seed("sess_seeded", credential("AT2", None, &mock.base));

    let response = app.query("not-a-url", Some("sess_seeded")).await;

    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    assert_eq!(error_code(response).await, "invalid_target");
}

#[tokio::test]
async fn test_missing_target_is_rejected() {
    let mock = spawn_mock_provider().await;
    let app = spawn_app(relay_config(&mock.base)).await;
    app.seed("sess_seeded", credential("AT2", None, &mock.base));

    let response = app
        .http
        .get(format!("{}/api/query", app.base))
        .bearer_auth("sess_seeded")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    assert_eq!(error_code(response).await, "invalid_target");
}

#[tokio::test]
async fn test_cross_instance_target_is_rejected() {
    let mock = spawn_mock_provider().await;
    let app = spawn_app(relay_config(&mock.base)).await;
    app.seed(
        "sess_seeded",
        credential("AT2", None, "https://na1.example.com"),
    );

    let response = app
        .query(&format!("{}/data", mock.base), Some("sess_seeded"))
        .await;

    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    assert_eq!(error_code(response).await, "invalid_target");
    assert_eq!(mock.data_requests(), 0);
}

#[tokio::test]
async fn test_instance_restriction_can_be_disabled() {
    let mock = spawn_mock_provider().await;
    let mut config = relay_config(&mock.base);
    config.proxy.restrict_to_instance = false;
    let app = spawn_app(config).await;
    app.seed(
        "sess_seeded",
        credential("AT2", None, "https://na1.example.com"),
    );

    let response = app
        .query(&format!("{}/data", mock.base), Some("sess_seeded"))
        .await;

    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(mock.data_requests(), 1);
}

#[tokio::test]
async fn test_upstream_failure_maps_to_bad_gateway() {
    let mock = spawn_mock_provider().await;
    let app = spawn_app(relay_config(&mock.base)).await;
    app.seed("sess_seeded", credential("AT2", None, &mock.base));

    let response = app
        .query(&format!("{}/error", mock.base), Some("sess_seeded"))
        .await;

    assert_eq!(response.status(), reqwest::StatusCode::BAD_GATEWAY);
    assert_eq!(error_code(response).await, "provider_rejected");
    assert_eq!(mock.token_requests(), 0);
}

#[tokio::test]
async fn test_non_json_success_body_is_an_upstream_format_error() {
    let mock = spawn_mock_provider().await;
    let app = spawn_app(relay_config(&mock.base)).await;
    app.seed("sess_seeded", credential("AT2", Some("RT1"), &mock.base));

    let response = app
        .query(&format!("{}/page", mock.base), Some("sess_seeded"))
        .await;

    assert_eq!(response.status(), reqwest::StatusCode::BAD_GATEWAY);
    assert_eq!(error_code(response).await, "upstream_format");

    // A readable 200 is not an expiry, so no refresh was attempted
    assert_eq!(mock.token_requests(), 0);
}

#[tokio::test]
async fn test_denial_without_expiry_marker_is_not_refreshed() {
    let mock = spawn_mock_provider().await;
    let app = spawn_app(relay_config(&mock.base)).await;
    let session = app.seed("sess_seeded", credential("AT1", Some("RT1"), &mock.base));

    let response = app
        .query(&format!("{}/plain-denial", mock.base), Some("sess_seeded"))
        .await;

    assert_eq!(response.status(), reqwest::StatusCode::BAD_GATEWAY);
    assert_eq!(error_code(response).await, "provider_rejected");
    assert_eq!(mock.token_requests(), 0);

    // The credential survives, it was never declared stale
    assert_eq!(app.store.get(&session).unwrap().access_token, "AT1");
}
