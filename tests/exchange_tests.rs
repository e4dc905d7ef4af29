//! Token-exchange and HTTP-boundary integration tests. A local axum
//! listener plays the platform token endpoint so the full install flow
//! (callback -> exchange -> provision -> session) runs without the real
//! platform.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::json;

use storegate::config::AppConfig;
use storegate::error::AppError;
use storegate::exchange::TokenExchanger;
use storegate::lifecycle::Lifecycle;
use storegate::server::{router, AppState};
use storegate::store::CredentialStore;

const SECRET: &str = "test-client-secret";

async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Mock token endpoint: accepts any code except "bad-code".
async fn mock_token_endpoint() -> SocketAddr {
    let app = Router::new().route(
        "/oauth2/token",
        post(|body: String| async move {
            if body.contains("code=bad-code") {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "error": "invalid authorization code" })),
                );
            }
            (
                StatusCode::OK,
                Json(json!({
                    "access_token": "tok-live",
                    "scope": "store_v2_products",
                    "user": { "id": 42, "email": "owner@example.com" }
                })),
            )
        }),
    );
    serve(app).await
}

fn config_with_token_url(token_url: String) -> AppConfig {
    AppConfig {
        client_id: "test-client-id".into(),
        client_secret: SECRET.into(),
        token_url,
        app_url: "http://localhost:7878".into(),
        listen_host: "127.0.0.1".into(),
        listen_port: 0,
        database_path: ":memory:".into(),
        exchange_timeout: Duration::from_secs(2),
        session_ttl: Duration::from_secs(3600),
        payload_max_age: None,
    }
}

fn exchanger(token_url: &str) -> TokenExchanger {
    TokenExchanger::new(
        token_url,
        "test-client-id",
        SECRET,
        "http://localhost:7878/auth/install",
        Duration::from_secs(2),
    )
    .unwrap()
}

#[tokio::test]
async fn exchange_parses_grant_and_derives_store_hash() -> Result<()> {
    let addr = mock_token_endpoint().await;
    let ex = exchanger(&format!("http://{}/oauth2/token", addr));

    let grant = ex.exchange("good-code", "stores/abc123", "store_v2_products").await?;
    assert_eq!(grant.store_hash, "abc123");
    assert_eq!(grant.access_token, "tok-live");
    assert_eq!(grant.user_id, 42);
    assert_eq!(grant.email, "owner@example.com");
    Ok(())
}

#[tokio::test]
async fn exchange_surfaces_upstream_status_and_body() {
    let addr = mock_token_endpoint().await;
    let ex = exchanger(&format!("http://{}/oauth2/token", addr));

    let err = ex.exchange("bad-code", "stores/abc123", "scope").await.unwrap_err();
    match err {
        AppError::Exchange { status, body, .. } => {
            assert_eq!(status, Some(400));
            assert!(body.unwrap().contains("invalid authorization code"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn exchange_rejects_malformed_response_body() {
    let app = Router::new().route("/oauth2/token", post(|| async { "this is not json" }));
    let addr = serve(app).await;
    let ex = exchanger(&format!("http://{}/oauth2/token", addr));

    let err = ex.exchange("good-code", "stores/abc123", "scope").await.unwrap_err();
    assert!(matches!(err, AppError::Exchange { status: Some(200), .. }));
}

#[tokio::test]
async fn exchange_timeout_is_an_exchange_error() {
    let app = Router::new().route(
        "/oauth2/token",
        post(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            "too late"
        }),
    );
    let addr = serve(app).await;
    let ex = TokenExchanger::new(
        &format!("http://{}/oauth2/token", addr),
        "test-client-id",
        SECRET,
        "http://localhost:7878/auth/install",
        Duration::from_millis(100),
    )
    .unwrap();

    let err = ex.exchange("good-code", "stores/abc123", "scope").await.unwrap_err();
    assert!(matches!(err, AppError::Exchange { status: None, .. }));
}

#[tokio::test]
async fn install_flow_provisions_store_and_binds_session() -> Result<()> {
    let addr = mock_token_endpoint().await;
    let store = Arc::new(CredentialStore::in_memory()?);
    let config = config_with_token_url(format!("http://{}/oauth2/token", addr));
    let lifecycle = Lifecycle::new(config, store.clone())?;

    let session = lifecycle.install("good-code", "stores/abc123", "store_v2_products").await?;
    assert!(session.identity.is_admin);
    assert_eq!(session.identity.store_hash, "abc123");
    assert_eq!(lifecycle.resolve(&session.token).unwrap().platform_user_id, 42);

    let s = store.find_store("abc123")?.unwrap();
    assert_eq!(s.access_token, "tok-live");
    Ok(())
}

#[tokio::test]
async fn failed_exchange_leaves_no_credential_state() -> Result<()> {
    let addr = mock_token_endpoint().await;
    let store = Arc::new(CredentialStore::in_memory()?);
    let config = config_with_token_url(format!("http://{}/oauth2/token", addr));
    let lifecycle = Lifecycle::new(config, store.clone())?;

    let err = lifecycle.install("bad-code", "stores/abc123", "scope").await.unwrap_err();
    assert!(matches!(err, AppError::Exchange { .. }));
    assert!(store.find_store("abc123")?.is_none());
    assert!(store.find_user(42)?.is_none());
    Ok(())
}

#[tokio::test]
async fn http_boundary_maps_outcomes_and_sets_the_session_cookie() -> Result<()> {
    let token_addr = mock_token_endpoint().await;
    let store = Arc::new(CredentialStore::in_memory()?);
    let config = config_with_token_url(format!("http://{}/oauth2/token", token_addr));
    let lifecycle = Arc::new(Lifecycle::new(config, store)?);
    let app_addr = serve(router(AppState { lifecycle })).await;

    let http = reqwest::Client::new();
    let base = format!("http://{}", app_addr);

    let ok = http.get(format!("{}/", base)).send().await?;
    assert_eq!(ok.status().as_u16(), 200);

    let installed = http
        .get(format!(
            "{}/auth/install?code=good-code&context=stores/abc123&scope=store_v2_products",
            base
        ))
        .send()
        .await?;
    assert_eq!(installed.status().as_u16(), 200);
    let cookie = installed
        .headers()
        .get(reqwest::header::SET_COOKIE)
        .expect("session cookie")
        .to_str()?;
    assert!(cookie.starts_with("storegate_session="));
    assert!(cookie.contains("HttpOnly"));

    // Authentic-looking but unverifiable payload -> 401, generic body
    let rejected = http
        .get(format!("{}/auth/load?signed_payload=broken", base))
        .send()
        .await?;
    assert_eq!(rejected.status().as_u16(), 401);
    let body: serde_json::Value = rejected.json().await?;
    assert_eq!(body["error"], "invalid_signed_payload");

    let missing_params = http.get(format!("{}/auth/install", base)).send().await?;
    assert_eq!(missing_params.status().as_u16(), 400);
    Ok(())
}

#[tokio::test]
async fn uninstall_over_http_returns_no_content() -> Result<()> {
    use storegate::payload::{self, PayloadUser, SignedClaims};

    let token_addr = mock_token_endpoint().await;
    let store = Arc::new(CredentialStore::in_memory()?);
    let config = config_with_token_url(format!("http://{}/oauth2/token", token_addr));
    let lifecycle = Arc::new(Lifecycle::new(config, store)?);
    let app_addr = serve(router(AppState { lifecycle })).await;

    let http = reqwest::Client::new();
    let base = format!("http://{}", app_addr);
    http.get(format!(
        "{}/auth/install?code=good-code&context=stores/abc123&scope=store_v2_products",
        base
    ))
    .send()
    .await?;

    let claims = SignedClaims {
        user: PayloadUser { id: 42, email: None },
        store_hash: "abc123".into(),
        scope: None,
        timestamp: None,
    };
    let payload = payload::sign(&claims, SECRET.as_bytes()).unwrap();
    let gone = http
        .get(format!("{}/auth/uninstall?signed_payload={}", base, payload))
        .send()
        .await?;
    assert_eq!(gone.status().as_u16(), 204);

    // Load after uninstall: authentic payload, no store
    let back = http
        .get(format!("{}/auth/load?signed_payload={}", base, payload))
        .send()
        .await?;
    assert_eq!(back.status().as_u16(), 401);
    let body: serde_json::Value = back.json().await?;
    assert_eq!(body["error"], "not_installed");
    Ok(())
}
