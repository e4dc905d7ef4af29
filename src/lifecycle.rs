//! Lifecycle orchestrator: the four platform callbacks.
//!
//! Sequencing per event, with the invariants the rest of the crate
//! provides: verification/exchange failures happen before any mutation,
//! every credential mutation for one event commits in one transaction,
//! and sessions invalidated by uninstall/remove-user are revoked.
//!
//! State machine of a (store, user) pair as observed from outside:
//! `NotInstalled -> Installed(admin) -> Installed(new admin) -> Uninstalled`;
//! independently a non-admin membership moves `Absent -> Member -> Absent`
//! via load/remove-user without affecting the store's installed state.

use std::sync::Arc;

use tracing::info;

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::exchange::TokenExchanger;
use crate::identity::{Session, SessionManager, StoreIdentity};
use crate::payload::{self, SignedClaims};
use crate::store::{CredentialStore, Membership, StoreRecord, UserRecord};

/// What a downstream REST client is constructed from. The core's only
/// obligation to that collaborator is handing over a current token.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiCredentials {
    pub client_id: String,
    pub store_hash: String,
    pub access_token: String,
}

pub struct Lifecycle {
    config: AppConfig,
    exchanger: TokenExchanger,
    store: Arc<CredentialStore>,
    sessions: SessionManager,
}

impl Lifecycle {
    pub fn new(config: AppConfig, store: Arc<CredentialStore>) -> AppResult<Self> {
        let exchanger = TokenExchanger::new(
            &config.token_url,
            &config.client_id,
            &config.client_secret,
            &config.redirect_uri(),
            config.exchange_timeout,
        )?;
        let sessions = SessionManager::new(config.session_ttl);
        Ok(Self { config, exchanger, store, sessions })
    }

    /// Install callback: exchange the authorization code, then provision
    /// store + user + admin membership in one transaction. A reinstall
    /// replaces the token and reassigns admin to the caller.
    pub async fn install(&self, code: &str, context: &str, scope: &str) -> AppResult<Session> {
        let grant = self.exchanger.exchange(code, context, scope).await?;
        let (store, user, member) = self.store.install_grant(&grant)?;
        info!(
            store_hash = %store.store_hash,
            platform_user_id = user.platform_user_id,
            "app installed"
        );
        Ok(self.sessions.bind(identity_of(&store, &user, &member)))
    }

    /// Load (SSO) event: the store must already be installed; the user
    /// joins as a plain member on first sight.
    pub fn load(&self, signed_payload: &str) -> AppResult<Session> {
        let claims = self.verify(signed_payload)?;
        let store = self.require_store(&claims.store_hash)?;
        let (user, member) =
            self.store.load_grant(store.id, claims.user.id, claims.user.email.as_deref())?;
        info!(
            store_hash = %store.store_hash,
            platform_user_id = user.platform_user_id,
            admin = member.is_admin,
            "user loaded"
        );
        Ok(self.sessions.bind(identity_of(&store, &user, &member)))
    }

    /// Uninstall event: drop every membership and the store row
    /// atomically, then revoke the store's live sessions. Users survive.
    pub fn uninstall(&self, signed_payload: &str) -> AppResult<()> {
        let claims = self.verify(signed_payload)?;
        let store = self.require_store(&claims.store_hash)?;
        self.store.delete_store(store.id)?;
        let revoked = self.sessions.revoke_store(store.id);
        info!(store_hash = %store.store_hash, revoked_sessions = revoked, "app uninstalled");
        Ok(())
    }

    /// Remove-user event: delete that one membership if it exists. An
    /// unknown user or absent membership is a no-op, not an error.
    pub fn remove_user(&self, signed_payload: &str) -> AppResult<()> {
        let claims = self.verify(signed_payload)?;
        let store = self.require_store(&claims.store_hash)?;
        if let Some(user) = self.store.find_user(claims.user.id)? {
            if let Some(member) = self.store.find_store_user(store.id, user.id)? {
                self.store.delete_store_user(store.id, user.id)?;
                let revoked = self.sessions.revoke_member(member.id);
                info!(
                    store_hash = %store.store_hash,
                    platform_user_id = user.platform_user_id,
                    revoked_sessions = revoked,
                    "user removed"
                );
            }
        }
        Ok(())
    }

    /// Resolve an opaque session token back to its identity.
    pub fn resolve(&self, token: &str) -> Option<StoreIdentity> {
        self.sessions.resolve(token)
    }

    /// Hand a downstream REST client the triple it is constructed from.
    pub fn api_credentials(&self, store_hash: &str) -> AppResult<ApiCredentials> {
        let store = self.require_store(store_hash)?;
        Ok(ApiCredentials {
            client_id: self.config.client_id.clone(),
            store_hash: store.store_hash,
            access_token: store.access_token,
        })
    }

    fn require_store(&self, store_hash: &str) -> AppResult<StoreRecord> {
        self.store.find_store(store_hash)?.ok_or_else(|| {
            AppError::not_installed("not_installed", "app is not installed on this store")
        })
    }

    /// Verify the payload signature, then apply the freshness window if
    /// one is configured. The verifier itself stays pure; staleness is
    /// policy and lives here.
    fn verify(&self, signed_payload: &str) -> AppResult<SignedClaims> {
        let claims = payload::verify(signed_payload, self.config.client_secret.as_bytes())?;
        if let Some(max_age) = self.config.payload_max_age {
            let now = chrono::Utc::now().timestamp() as f64;
            let fresh = claims
                .timestamp
                .map(|issued| now - issued <= max_age.as_secs() as f64)
                .unwrap_or(false);
            if !fresh {
                return Err(AppError::auth("stale_payload", "signed payload is too old"));
            }
        }
        Ok(claims)
    }
}

fn identity_of(store: &StoreRecord, user: &UserRecord, member: &Membership) -> StoreIdentity {
    StoreIdentity {
        store_user_id: member.id,
        store_id: store.id,
        store_hash: store.store_hash.clone(),
        user_id: user.id,
        platform_user_id: user.platform_user_id,
        email: user.email.clone(),
        is_admin: member.is_admin,
    }
}
