//! Session continuity: history fingerprints, the durable fingerprint →
//! session map, per-key locking, and per-session workspaces.

pub mod directives;
pub mod fingerprint;
pub mod locks;
pub mod store;
pub mod workspace;

pub use {
    directives::{Directives, extract_directives},
    fingerprint::{Fingerprint, fingerprint, next_fingerprint, prefix_fingerprint},
    locks::{KeyGuard, KeyedLocks},
    store::{SessionRecord, SessionStore, StoreError},
    workspace::{WorkspaceError, WorkspaceManager, remove_tree},
};
