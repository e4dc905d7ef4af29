use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::Engine;
use parking_lot::RwLock;

use crate::tprintln;

use super::principal::StoreIdentity;

pub type SessionToken = String;

#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: String,
    pub token: SessionToken,
    pub identity: StoreIdentity,
    pub issued_at: Instant,
    pub expires_at: Instant,
}

fn gen_id() -> String {
    // 256-bit random token, base64url without padding
    let mut buf = [0u8; 32];
    getrandom::getrandom(&mut buf).expect("os rng");
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf)
}

/// In-process session registry. Tokens index sessions directly; two
/// secondary indexes (by membership, by store) exist so uninstall and
/// remove-user events can revoke everything they invalidate.
#[derive(Clone)]
pub struct SessionManager {
    ttl: Duration,
    sessions: Arc<RwLock<HashMap<String, Session>>>,
    member_index: Arc<RwLock<HashMap<i64, HashSet<String>>>>,
    store_index: Arc<RwLock<HashMap<i64, HashSet<String>>>>,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(Duration::from_secs(60 * 60))
    }
}

impl SessionManager {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            member_index: Arc::new(RwLock::new(HashMap::new())),
            store_index: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Issue a session bound to a store membership.
    pub fn bind(&self, identity: StoreIdentity) -> Session {
        let now = Instant::now();
        let sid = gen_id();
        let token = gen_id();
        let sess = Session {
            session_id: sid.clone(),
            token: token.clone(),
            identity: identity.clone(),
            issued_at: now,
            expires_at: now + self.ttl,
        };
        self.sessions.write().insert(token.clone(), sess.clone());
        self.member_index
            .write()
            .entry(identity.store_user_id)
            .or_default()
            .insert(token.clone());
        self.store_index
            .write()
            .entry(identity.store_id)
            .or_default()
            .insert(token);
        tprintln!(
            "session.bind store={} member={} sid={} ttl_secs={}",
            identity.store_hash,
            identity.store_user_id,
            sid,
            self.ttl.as_secs()
        );
        sess
    }

    /// Resolve a token back to its identity; expired entries are pruned.
    pub fn resolve(&self, token: &str) -> Option<StoreIdentity> {
        let now = Instant::now();
        let mut drop_key: Option<String> = None;
        let out = {
            let map = self.sessions.read();
            match map.get(token) {
                Some(sess) if sess.expires_at > now => Some(sess.identity.clone()),
                Some(_) => {
                    drop_key = Some(token.to_string());
                    None
                }
                None => None,
            }
        };
        if let Some(k) = drop_key {
            self.remove(&k);
        }
        out
    }

    pub fn logout(&self, token: &str) -> bool {
        self.remove(token)
    }

    /// Drop every session bound to one membership (remove-user event).
    pub fn revoke_member(&self, store_user_id: i64) -> usize {
        let tokens = self
            .member_index
            .read()
            .get(&store_user_id)
            .cloned()
            .unwrap_or_default();
        let count = tokens.iter().filter(|t| self.remove(t)).count();
        tprintln!("session.revoke_member member={} count={}", store_user_id, count);
        count
    }

    /// Drop every session bound to any membership of one store (uninstall).
    pub fn revoke_store(&self, store_id: i64) -> usize {
        let tokens = self
            .store_index
            .read()
            .get(&store_id)
            .cloned()
            .unwrap_or_default();
        let count = tokens.iter().filter(|t| self.remove(t)).count();
        tprintln!("session.revoke_store store={} count={}", store_id, count);
        count
    }

    fn remove(&self, token: &str) -> bool {
        let Some(sess) = self.sessions.write().remove(token) else {
            return false;
        };
        prune_index(&self.member_index, sess.identity.store_user_id, token);
        prune_index(&self.store_index, sess.identity.store_id, token);
        true
    }

    #[cfg(test)]
    fn index_entries(&self) -> (usize, usize) {
        (self.member_index.read().len(), self.store_index.read().len())
    }
}

// Index entries for a drained membership or store would otherwise pile
// up as empty sets for the life of the process.
fn prune_index(index: &Arc<RwLock<HashMap<i64, HashSet<String>>>>, key: i64, token: &str) {
    let mut map = index.write();
    if let Some(set) = map.get_mut(&key) {
        set.remove(token);
        if set.is_empty() {
            map.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(member: i64, store: i64) -> StoreIdentity {
        StoreIdentity {
            store_user_id: member,
            store_id: store,
            store_hash: format!("hash{}", store),
            user_id: member,
            platform_user_id: member * 100,
            email: "u@example.com".into(),
            is_admin: false,
        }
    }

    #[test]
    fn bind_then_resolve() {
        let sm = SessionManager::default();
        let sess = sm.bind(identity(1, 10));
        let who = sm.resolve(&sess.token).unwrap();
        assert_eq!(who.store_user_id, 1);
        assert!(sm.resolve("not-a-token").is_none());
    }

    #[test]
    fn logout_invalidates_only_that_token() {
        let sm = SessionManager::default();
        let a = sm.bind(identity(1, 10));
        let b = sm.bind(identity(1, 10));
        assert!(sm.logout(&a.token));
        assert!(sm.resolve(&a.token).is_none());
        assert!(sm.resolve(&b.token).is_some());
        assert!(!sm.logout(&a.token));
    }

    #[test]
    fn revoke_store_drops_all_members_of_that_store_only() {
        let sm = SessionManager::default();
        let a = sm.bind(identity(1, 10));
        let b = sm.bind(identity(2, 10));
        let other = sm.bind(identity(3, 11));
        assert_eq!(sm.revoke_store(10), 2);
        assert!(sm.resolve(&a.token).is_none());
        assert!(sm.resolve(&b.token).is_none());
        assert!(sm.resolve(&other.token).is_some());
    }

    #[test]
    fn revocation_prunes_empty_index_entries() {
        let sm = SessionManager::default();
        let a = sm.bind(identity(1, 10));
        sm.bind(identity(2, 10));
        sm.bind(identity(3, 11));
        assert_eq!(sm.index_entries(), (3, 2));
        assert!(sm.logout(&a.token));
        assert_eq!(sm.index_entries(), (2, 2));
        sm.revoke_store(10);
        assert_eq!(sm.index_entries(), (1, 1));
        sm.revoke_member(3);
        assert_eq!(sm.index_entries(), (0, 0));
    }

    #[test]
    fn expired_sessions_do_not_resolve() {
        let sm = SessionManager::new(Duration::from_secs(0));
        let sess = sm.bind(identity(1, 10));
        std::thread::sleep(Duration::from_millis(5));
        assert!(sm.resolve(&sess.token).is_none());
    }
}
