//! Signed SSO payload verification.
//!
//! The platform sends load/uninstall/remove-user events as
//! `base64url(claims JSON) + "." + base64url(HMAC-SHA256(claims segment))`,
//! keyed by the app's client secret. This module is a security boundary:
//! any malformed or mis-signed input becomes a single `Auth` rejection,
//! never a panic and never a partial decode. Verification is pure
//! computation; freshness policy belongs to the caller.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::{AppError, AppResult};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PayloadUser {
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Claims carried by a verified payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignedClaims {
    pub user: PayloadUser,
    pub store_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Issued-at, seconds since the epoch. The platform sends a float.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
}

fn rejected() -> AppError {
    // One opaque rejection for every failure mode; details would only
    // help an attacker probing the signature check.
    AppError::auth("invalid_signed_payload", "payload verification failed")
}

/// Verify and decode a signed payload. The signature is recomputed over
/// the raw base64url claims segment and compared in constant time.
pub fn verify(signed_payload: &str, secret: &[u8]) -> AppResult<SignedClaims> {
    let (claims_b64, sig_b64) = signed_payload.split_once('.').ok_or_else(rejected)?;
    let sig = URL_SAFE_NO_PAD.decode(sig_b64).map_err(|_| rejected())?;
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| rejected())?;
    mac.update(claims_b64.as_bytes());
    // verify_slice compares in constant time
    mac.verify_slice(&sig).map_err(|_| rejected())?;
    let raw = URL_SAFE_NO_PAD.decode(claims_b64).map_err(|_| rejected())?;
    serde_json::from_slice(&raw).map_err(|_| rejected())
}

/// Produce a signed payload for the given claims. Counterpart of
/// [`verify`]; used by tests and local tooling to fabricate platform
/// callbacks.
pub fn sign(claims: &SignedClaims, secret: &[u8]) -> AppResult<String> {
    let raw = serde_json::to_vec(claims)
        .map_err(|e| AppError::internal("claims_encode", e.to_string()))?;
    let claims_b64 = URL_SAFE_NO_PAD.encode(raw);
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| AppError::internal("hmac_key", e.to_string()))?;
    mac.update(claims_b64.as_bytes());
    let sig = mac.finalize().into_bytes();
    Ok(format!("{}.{}", claims_b64, URL_SAFE_NO_PAD.encode(sig)))
}
