//! Unified application error model and mapping helpers.
//! One enum crosses all layers (payload verification, token exchange,
//! credential storage, HTTP boundary) so the boundary can map failures to
//! HTTP statuses without inspecting layer-specific types.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppError {
    /// Malformed request input (missing or bad callback parameters).
    UserInput { code: String, message: String },
    /// Signed-payload verification failure. Terminal for the request;
    /// nothing is mutated and nothing internal leaks to the caller.
    Auth { code: String, message: String },
    /// The payload or callback was authentic but names a store this app
    /// has no record of. Distinct from `Auth` on purpose.
    NotInstalled { code: String, message: String },
    /// The token endpoint rejected the exchange or returned garbage.
    /// Carries the upstream status and body for operator diagnostics;
    /// neither is ever shown to the end user.
    Exchange {
        message: String,
        status: Option<u16>,
        body: Option<String>,
    },
    /// The durable store rejected a transaction.
    Storage { code: String, message: String },
    Internal { code: String, message: String },
}

impl AppError {
    pub fn code_str(&self) -> &str {
        match self {
            AppError::UserInput { code, .. }
            | AppError::Auth { code, .. }
            | AppError::NotInstalled { code, .. }
            | AppError::Storage { code, .. }
            | AppError::Internal { code, .. } => code.as_str(),
            AppError::Exchange { .. } => "exchange_failed",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            AppError::UserInput { message, .. }
            | AppError::Auth { message, .. }
            | AppError::NotInstalled { message, .. }
            | AppError::Exchange { message, .. }
            | AppError::Storage { message, .. }
            | AppError::Internal { message, .. } => message.as_str(),
        }
    }

    pub fn user<C: Into<String>, M: Into<String>>(code: C, msg: M) -> Self {
        AppError::UserInput { code: code.into(), message: msg.into() }
    }
    pub fn auth<C: Into<String>, M: Into<String>>(code: C, msg: M) -> Self {
        AppError::Auth { code: code.into(), message: msg.into() }
    }
    pub fn not_installed<C: Into<String>, M: Into<String>>(code: C, msg: M) -> Self {
        AppError::NotInstalled { code: code.into(), message: msg.into() }
    }
    pub fn exchange<M: Into<String>>(status: Option<u16>, msg: M, body: Option<String>) -> Self {
        AppError::Exchange { message: msg.into(), status, body }
    }
    pub fn storage<C: Into<String>, M: Into<String>>(code: C, msg: M) -> Self {
        AppError::Storage { code: code.into(), message: msg.into() }
    }
    pub fn internal<C: Into<String>, M: Into<String>>(code: C, msg: M) -> Self {
        AppError::Internal { code: code.into(), message: msg.into() }
    }

    /// Map to HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            AppError::UserInput { .. } => 400,
            AppError::Auth { .. } => 401,
            // Authentic payload, unknown store: still a 401 to the caller.
            AppError::NotInstalled { .. } => 401,
            AppError::Exchange { .. } => 502,
            AppError::Storage { .. } => 503,
            AppError::Internal { .. } => 500,
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            AppError::Exchange { message, status, .. } => {
                write!(f, "exchange_failed: {}", message)?;
                if let Some(s) = status {
                    write!(f, " (upstream status {})", s)?;
                }
                Ok(())
            }
            _ => write!(f, "{}: {}", self.code_str(), self.message()),
        }
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self {
        AppError::Storage { code: "sqlite".into(), message: err.to_string() }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal { code: "internal".into(), message: err.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_mapping() {
        assert_eq!(AppError::user("bad_input", "oops").http_status(), 400);
        assert_eq!(AppError::auth("bad_signature", "no").http_status(), 401);
        assert_eq!(AppError::not_installed("not_installed", "missing").http_status(), 401);
        assert_eq!(AppError::exchange(Some(400), "rejected", None).http_status(), 502);
        assert_eq!(AppError::storage("sqlite", "locked").http_status(), 503);
        assert_eq!(AppError::internal("internal", "panic").http_status(), 500);
    }

    #[test]
    fn exchange_keeps_upstream_diagnostics() {
        let err = AppError::exchange(Some(403), "rejected", Some("{\"error\":\"bad code\"}".into()));
        match &err {
            AppError::Exchange { status, body, .. } => {
                assert_eq!(*status, Some(403));
                assert!(body.as_deref().unwrap().contains("bad code"));
            }
            other => panic!("unexpected variant: {:?}", other),
        }
        assert_eq!(err.code_str(), "exchange_failed");
        assert!(err.to_string().contains("upstream status 403"));
    }
}
