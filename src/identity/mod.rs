//! Session binding: maps authenticated lifecycle events to a concrete
//! (store, user) identity and an opaque session token for downstream
//! request handlers. Keep the public surface thin and split
//! implementation across sub-modules.

mod principal;
mod session;

pub use principal::StoreIdentity;
pub use session::{Session, SessionManager, SessionToken};
