use serde::{Deserialize, Serialize};

/// The identity a session binds to: a store membership, not a bare user.
/// One human installed on several stores gets one session per membership,
/// so downstream handlers always know which store's credentials apply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreIdentity {
    /// Membership row id; the session key.
    pub store_user_id: i64,
    pub store_id: i64,
    pub store_hash: String,
    /// Internal user row id.
    pub user_id: i64,
    /// The platform's global user id.
    pub platform_user_id: i64,
    pub email: String,
    pub is_admin: bool,
}
