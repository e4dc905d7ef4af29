//! Durable credential records: stores, users and store memberships.
//!
//! This module exclusively owns creation, mutation and deletion of the
//! three entities. Every multi-row transition runs inside one sqlite
//! transaction, and the single connection sits behind a mutex, so racing
//! lifecycle events for the same store serialize here and readers never
//! observe a half-applied transition (in particular: never two admins and
//! never a store without its membership rows half-deleted).
//!
//! Invariants enforced here:
//! - at most one store row per store-hash (unique index);
//! - at most one user row per platform user id (unique index);
//! - at most one membership per (store, user) pair (unique index);
//! - at most one admin membership per store, by demoting the previous
//!   admin inside the same transaction that re-provisions the store. A
//!   hard uniqueness constraint would forbid the transient zero-admin
//!   moment between demote and promote, so it is deliberately absent.

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::path::Path;

use crate::error::AppResult;
use crate::exchange::TokenGrant;

#[derive(Debug, Clone, PartialEq)]
pub struct StoreRecord {
    pub id: i64,
    pub store_hash: String,
    pub access_token: String,
    pub scope: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserRecord {
    pub id: i64,
    pub platform_user_id: i64,
    pub email: String,
}

/// Membership of a user in a store, with the admin flag.
#[derive(Debug, Clone, PartialEq)]
pub struct Membership {
    pub id: i64,
    pub store_id: i64,
    pub user_id: i64,
    pub is_admin: bool,
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS stores (
    id            INTEGER PRIMARY KEY,
    store_hash    TEXT NOT NULL UNIQUE,
    access_token  TEXT NOT NULL,
    scope         TEXT NOT NULL DEFAULT '',
    created_at    INTEGER NOT NULL,
    updated_at    INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS users (
    id                INTEGER PRIMARY KEY,
    platform_user_id  INTEGER NOT NULL UNIQUE,
    email             TEXT NOT NULL,
    created_at        INTEGER NOT NULL,
    updated_at        INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS store_users (
    id          INTEGER PRIMARY KEY,
    store_id    INTEGER NOT NULL REFERENCES stores(id),
    user_id     INTEGER NOT NULL REFERENCES users(id),
    is_admin    INTEGER NOT NULL DEFAULT 0,
    created_at  INTEGER NOT NULL,
    updated_at  INTEGER NOT NULL,
    UNIQUE (store_id, user_id)
);
CREATE INDEX IF NOT EXISTS idx_store_users_store ON store_users(store_id);
"#;

pub struct CredentialStore {
    conn: Mutex<Connection>,
}

impl CredentialStore {
    pub fn open<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let conn = Connection::open(path)?;
        Self::bootstrap(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn in_memory() -> AppResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::bootstrap(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn bootstrap(conn: &Connection) -> AppResult<()> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    // --- primitives (each its own transaction, idempotent under retry) ---

    /// Insert a store, or update token and scope in place. A pre-existing
    /// store means a reinstall: the previous admin membership is demoted
    /// in the same transaction so the incoming installer can take over.
    pub fn upsert_store(
        &self,
        store_hash: &str,
        access_token: &str,
        scope: &str,
    ) -> AppResult<StoreRecord> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let rec = upsert_store_tx(&tx, store_hash, access_token, scope)?;
        tx.commit()?;
        Ok(rec)
    }

    /// Insert a user, or update the email only when it actually changed.
    pub fn upsert_user(&self, platform_user_id: i64, email: &str) -> AppResult<UserRecord> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let rec = upsert_user_tx(&tx, platform_user_id, Some(email))?;
        tx.commit()?;
        Ok(rec)
    }

    /// Insert a membership with the given admin flag, or set the flag to
    /// the requested value. Install promotion goes through here; the load
    /// path must use [`ensure_membership`](Self::ensure_membership)
    /// instead, which never flips an existing flag.
    pub fn upsert_store_user(
        &self,
        store_id: i64,
        user_id: i64,
        is_admin: bool,
    ) -> AppResult<Membership> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let rec = upsert_store_user_tx(&tx, store_id, user_id, is_admin)?;
        tx.commit()?;
        Ok(rec)
    }

    /// Insert a non-admin membership only if none exists; an existing row
    /// is returned untouched, admin flag included.
    pub fn ensure_membership(&self, store_id: i64, user_id: i64) -> AppResult<Membership> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let rec = ensure_membership_tx(&tx, store_id, user_id)?;
        tx.commit()?;
        Ok(rec)
    }

    /// Delete all memberships of a store, then the store row, atomically.
    pub fn delete_store(&self, store_id: i64) -> AppResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM store_users WHERE store_id = ?1", params![store_id])?;
        tx.execute("DELETE FROM stores WHERE id = ?1", params![store_id])?;
        tx.commit()?;
        Ok(())
    }

    /// Delete one membership. Returns whether a row existed; absence is a
    /// no-op, not an error.
    pub fn delete_store_user(&self, store_id: i64, user_id: i64) -> AppResult<bool> {
        let conn = self.conn.lock();
        let n = conn.execute(
            "DELETE FROM store_users WHERE store_id = ?1 AND user_id = ?2",
            params![store_id, user_id],
        )?;
        Ok(n > 0)
    }

    // --- composed event transactions ---

    /// Apply one install event: upsert the store (demoting any previous
    /// admin), upsert the installing user, promote their membership. One
    /// transaction, so a reinstall either fully hands over or not at all.
    pub fn install_grant(&self, grant: &TokenGrant) -> AppResult<(StoreRecord, UserRecord, Membership)> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let store = upsert_store_tx(&tx, &grant.store_hash, &grant.access_token, &grant.scope)?;
        let user = upsert_user_tx(&tx, grant.user_id, Some(&grant.email))?;
        let member = upsert_store_user_tx(&tx, store.id, user.id, true)?;
        tx.commit()?;
        Ok((store, user, member))
    }

    /// Apply one load event for an existing store: upsert the user and
    /// ensure a membership, never touching an existing admin flag. A
    /// payload without an email claim leaves the stored address alone.
    pub fn load_grant(
        &self,
        store_id: i64,
        platform_user_id: i64,
        email: Option<&str>,
    ) -> AppResult<(UserRecord, Membership)> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let user = upsert_user_tx(&tx, platform_user_id, email)?;
        let member = ensure_membership_tx(&tx, store_id, user.id)?;
        tx.commit()?;
        Ok((user, member))
    }

    // --- reads ---

    pub fn find_store(&self, store_hash: &str) -> AppResult<Option<StoreRecord>> {
        let conn = self.conn.lock();
        let rec = conn
            .query_row(
                "SELECT id, store_hash, access_token, scope FROM stores WHERE store_hash = ?1",
                params![store_hash],
                map_store,
            )
            .optional()?;
        Ok(rec)
    }

    pub fn find_user(&self, platform_user_id: i64) -> AppResult<Option<UserRecord>> {
        let conn = self.conn.lock();
        let rec = conn
            .query_row(
                "SELECT id, platform_user_id, email FROM users WHERE platform_user_id = ?1",
                params![platform_user_id],
                map_user,
            )
            .optional()?;
        Ok(rec)
    }

    pub fn find_store_user(&self, store_id: i64, user_id: i64) -> AppResult<Option<Membership>> {
        let conn = self.conn.lock();
        let rec = conn
            .query_row(
                "SELECT id, store_id, user_id, is_admin FROM store_users \
                 WHERE store_id = ?1 AND user_id = ?2",
                params![store_id, user_id],
                map_membership,
            )
            .optional()?;
        Ok(rec)
    }

    pub fn store_members(&self, store_id: i64) -> AppResult<Vec<Membership>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, store_id, user_id, is_admin FROM store_users \
             WHERE store_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![store_id], map_membership)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

fn map_store(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoreRecord> {
    Ok(StoreRecord {
        id: row.get(0)?,
        store_hash: row.get(1)?,
        access_token: row.get(2)?,
        scope: row.get(3)?,
    })
}

fn map_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRecord> {
    Ok(UserRecord { id: row.get(0)?, platform_user_id: row.get(1)?, email: row.get(2)? })
}

fn map_membership(row: &rusqlite::Row<'_>) -> rusqlite::Result<Membership> {
    Ok(Membership {
        id: row.get(0)?,
        store_id: row.get(1)?,
        user_id: row.get(2)?,
        is_admin: row.get(3)?,
    })
}

fn upsert_store_tx(
    tx: &Transaction<'_>,
    store_hash: &str,
    access_token: &str,
    scope: &str,
) -> rusqlite::Result<StoreRecord> {
    let now = Utc::now().timestamp_millis();
    let existing: Option<i64> = tx
        .query_row("SELECT id FROM stores WHERE store_hash = ?1", params![store_hash], |r| r.get(0))
        .optional()?;
    let id = match existing {
        Some(id) => {
            // Reinstall: replace the token and demote the sitting admin so
            // the incoming installer can be promoted by the same event.
            tx.execute(
                "UPDATE stores SET access_token = ?1, scope = ?2, updated_at = ?3 WHERE id = ?4",
                params![access_token, scope, now, id],
            )?;
            tx.execute(
                "UPDATE store_users SET is_admin = 0, updated_at = ?1 \
                 WHERE store_id = ?2 AND is_admin = 1",
                params![now, id],
            )?;
            id
        }
        None => {
            tx.execute(
                "INSERT INTO stores (store_hash, access_token, scope, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                params![store_hash, access_token, scope, now],
            )?;
            tx.last_insert_rowid()
        }
    };
    Ok(StoreRecord {
        id,
        store_hash: store_hash.to_string(),
        access_token: access_token.to_string(),
        scope: scope.to_string(),
    })
}

fn upsert_user_tx(
    tx: &Transaction<'_>,
    platform_user_id: i64,
    email: Option<&str>,
) -> rusqlite::Result<UserRecord> {
    let now = Utc::now().timestamp_millis();
    let existing: Option<(i64, String)> = tx
        .query_row(
            "SELECT id, email FROM users WHERE platform_user_id = ?1",
            params![platform_user_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    match existing {
        Some((id, current_email)) => {
            // An absent claim is not a change; only a differing address
            // is written, and an unchanged one skips the write entirely.
            let stored = match email {
                Some(new_email) if new_email != current_email => {
                    tx.execute(
                        "UPDATE users SET email = ?1, updated_at = ?2 WHERE id = ?3",
                        params![new_email, now, id],
                    )?;
                    new_email.to_string()
                }
                _ => current_email,
            };
            Ok(UserRecord { id, platform_user_id, email: stored })
        }
        None => {
            let email = email.unwrap_or_default();
            tx.execute(
                "INSERT INTO users (platform_user_id, email, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?3)",
                params![platform_user_id, email, now],
            )?;
            Ok(UserRecord {
                id: tx.last_insert_rowid(),
                platform_user_id,
                email: email.to_string(),
            })
        }
    }
}

fn upsert_store_user_tx(
    tx: &Transaction<'_>,
    store_id: i64,
    user_id: i64,
    is_admin: bool,
) -> rusqlite::Result<Membership> {
    let now = Utc::now().timestamp_millis();
    let existing: Option<(i64, bool)> = tx
        .query_row(
            "SELECT id, is_admin FROM store_users WHERE store_id = ?1 AND user_id = ?2",
            params![store_id, user_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    let id = match existing {
        Some((id, current)) => {
            if current != is_admin {
                tx.execute(
                    "UPDATE store_users SET is_admin = ?1, updated_at = ?2 WHERE id = ?3",
                    params![is_admin, now, id],
                )?;
            }
            id
        }
        None => {
            tx.execute(
                "INSERT INTO store_users (store_id, user_id, is_admin, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                params![store_id, user_id, is_admin, now],
            )?;
            tx.last_insert_rowid()
        }
    };
    Ok(Membership { id, store_id, user_id, is_admin })
}

fn ensure_membership_tx(
    tx: &Transaction<'_>,
    store_id: i64,
    user_id: i64,
) -> rusqlite::Result<Membership> {
    let existing: Option<Membership> = tx
        .query_row(
            "SELECT id, store_id, user_id, is_admin FROM store_users \
             WHERE store_id = ?1 AND user_id = ?2",
            params![store_id, user_id],
            map_membership,
        )
        .optional()?;
    match existing {
        Some(member) => Ok(member),
        None => upsert_store_user_tx(tx, store_id, user_id, false),
    }
}
