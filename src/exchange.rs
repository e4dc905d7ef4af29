//! OAuth2 authorization-code exchange against the platform token endpoint.
//!
//! The exchange is the only network call in the core and the only
//! inherently flaky dependency; it is bounded by a client timeout and is
//! never retried here. A failed or timed-out exchange surfaces as
//! `AppError::Exchange` with the upstream status and body preserved for
//! operator diagnostics, and no credential state is touched.

use serde::Deserialize;
use std::time::Duration;

use crate::error::{AppError, AppResult};

/// Everything a successful exchange yields: the long-lived token plus the
/// identity of the installing user.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenGrant {
    pub store_hash: String,
    pub access_token: String,
    pub scope: String,
    pub user_id: i64,
    pub email: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    scope: String,
    user: TokenResponseUser,
}

#[derive(Debug, Deserialize)]
struct TokenResponseUser {
    id: i64,
    email: String,
}

#[derive(Clone)]
pub struct TokenExchanger {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
}

impl TokenExchanger {
    pub fn new(
        token_url: &str,
        client_id: &str,
        client_secret: &str,
        redirect_uri: &str,
        timeout: Duration,
    ) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::internal("http_client", e.to_string()))?;
        Ok(Self {
            http,
            token_url: token_url.to_string(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            redirect_uri: redirect_uri.to_string(),
        })
    }

    /// The store-hash is the second segment of `context` (`stores/{hash}`).
    pub fn store_hash_from_context(context: &str) -> AppResult<&str> {
        match context.split('/').nth(1) {
            Some(hash) if !hash.is_empty() => Ok(hash),
            _ => Err(AppError::user(
                "bad_context",
                "context must look like stores/{store_hash}",
            )),
        }
    }

    /// Trade a short-lived authorization code for a long-lived access token.
    pub async fn exchange(&self, code: &str, context: &str, scope: &str) -> AppResult<TokenGrant> {
        let store_hash = Self::store_hash_from_context(context)?.to_string();
        let params = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("code", code),
            ("context", context),
            ("scope", scope),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("grant_type", "authorization_code"),
        ];

        let response = self
            .http
            .post(&self.token_url)
            .header("Accept", "application/json")
            .form(&params)
            .send()
            .await
            .map_err(|e| {
                // Timeouts and connection failures land here; same outcome
                // as an upstream rejection, with no partial state anywhere.
                AppError::exchange(None, format!("token endpoint unreachable: {}", e), None)
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AppError::exchange(Some(status.as_u16()), e.to_string(), None))?;

        if !status.is_success() {
            return Err(AppError::exchange(
                Some(status.as_u16()),
                "token endpoint rejected the authorization code",
                Some(body),
            ));
        }

        let parsed: TokenResponse = serde_json::from_str(&body).map_err(|_| {
            AppError::exchange(Some(status.as_u16()), "malformed token response", Some(body.clone()))
        })?;

        Ok(TokenGrant {
            store_hash,
            access_token: parsed.access_token,
            scope: parsed.scope,
            user_id: parsed.user.id,
            email: parsed.user.email,
        })
    }
}
