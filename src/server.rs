//!
//! storegate HTTP boundary
//! -----------------------
//! Thin axum router over the lifecycle orchestrator. Everything with an
//! invariant lives below this module; handlers only parse the query
//! shape, call the orchestrator and map outcomes:
//! - install/load success sets the session cookie,
//! - failures map through `AppError::http_status`, with a generic body
//!   (upstream diagnostics stay in the operator log).

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::error::AppError;
use crate::lifecycle::Lifecycle;
use crate::store::CredentialStore;

const SESSION_COOKIE: &str = "storegate_session";

#[derive(Clone)]
pub struct AppState {
    pub lifecycle: Arc<Lifecycle>,
}

/// Start the server with configuration from the environment.
pub async fn run() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    run_with_config(config).await
}

pub async fn run_with_config(config: AppConfig) -> anyhow::Result<()> {
    if let Some(dir) = std::path::Path::new(&config.database_path).parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)?;
        }
    }
    let store = Arc::new(CredentialStore::open(&config.database_path)?);
    let addr: SocketAddr = format!("{}:{}", config.listen_host, config.listen_port).parse()?;
    let lifecycle = Arc::new(Lifecycle::new(config, store)?);
    let app = router(AppState { lifecycle });

    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { "storegate ok" }))
        .route("/auth/install", get(install))
        .route("/auth/load", get(load))
        .route("/auth/uninstall", get(uninstall))
        .route("/auth/remove-user", get(remove_user))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct InstallQuery {
    code: String,
    context: String,
    scope: String,
}

#[derive(Debug, Deserialize)]
struct SignedQuery {
    signed_payload: String,
}

fn set_session_cookie(token: &str) -> HeaderValue {
    // HttpOnly cookie scoped to path / with SameSite=Strict
    HeaderValue::from_str(&format!(
        "{}={}; HttpOnly; Secure; SameSite=Strict; Path=/",
        SESSION_COOKIE, token
    ))
    .unwrap()
}

fn error_response(err: AppError) -> Response {
    // Full diagnostics (including any upstream exchange body) go to the
    // log; the caller only sees the code.
    if let AppError::Exchange { status, body, .. } = &err {
        warn!(
            code = err.code_str(),
            upstream_status = ?status,
            upstream_body = body.as_deref().unwrap_or(""),
            "request failed: {}",
            err
        );
    } else {
        warn!(code = err.code_str(), "request failed: {}", err);
    }
    let status =
        StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(serde_json::json!({ "error": err.code_str() }))).into_response()
}

fn session_response(token: &str, body: &'static str) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(header::SET_COOKIE, set_session_cookie(token));
    (StatusCode::OK, headers, body).into_response()
}

async fn install(State(state): State<AppState>, Query(q): Query<InstallQuery>) -> Response {
    match state.lifecycle.install(&q.code, &q.context, &q.scope).await {
        Ok(session) => session_response(&session.token, "installed"),
        Err(e) => error_response(e),
    }
}

async fn load(State(state): State<AppState>, Query(q): Query<SignedQuery>) -> Response {
    match state.lifecycle.load(&q.signed_payload) {
        Ok(session) => session_response(&session.token, "ok"),
        Err(e) => error_response(e),
    }
}

async fn uninstall(State(state): State<AppState>, Query(q): Query<SignedQuery>) -> Response {
    match state.lifecycle.uninstall(&q.signed_payload) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

async fn remove_user(State(state): State<AppState>, Query(q): Query<SignedQuery>) -> Response {
    match state.lifecycle.remove_user(&q.signed_payload) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}
