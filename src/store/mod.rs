//! Credential persistence.
//!
//! The trait interface lives here; the file-backed implementation is in the
//! `file` submodule. One document per account with upsert semantics — a new
//! backend (e.g. a networked database) slots in behind `CredentialStore`
//! without touching the session layer.
//!
//! # Naming Conventions
//!
//! - `put` - create or update (upsert, must be atomic)
//! - `get` - read a single record, `None` if absent
//! - `is_usable` - validity check with purge-on-read of invalid state
//! - `delete` - remove, no-op if absent

use async_trait::async_trait;

pub mod error;
pub mod file;
mod record;

pub use error::{StorageError, StorageResult};
pub use file::FileCredentialStore;
pub use record::{
    CredentialRecord, EXPIRY_MARGIN_MINUTES, MIN_SESSION_TOKEN_LEN, PLACEHOLDER_SENTINELS, Profile,
};

/// Storage interface for credential persistence.
///
/// Operations on different accounts may run concurrently; operations on the
/// same account are serialized by the implementation, so the last `put` by
/// wall-clock order wins.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Create or update the record for an account (upsert semantics).
    ///
    /// The store stamps `updated_at`; the caller's value is ignored.
    async fn put(&self, account: &str, record: &CredentialRecord) -> StorageResult<()>;

    /// Load the most recent record for an account.
    ///
    /// Returns `Ok(None)` if no record exists. Malformed stored profile data
    /// degrades to a minimal profile rather than failing the read.
    async fn get(&self, account: &str) -> StorageResult<Option<CredentialRecord>>;

    /// Check whether the stored record is usable.
    ///
    /// Purges an unusable record as a side effect, so stale placeholder data
    /// never resurfaces on a later read.
    async fn is_usable(&self, account: &str) -> StorageResult<bool>;

    /// Delete the record for an account. No error if absent.
    async fn delete(&self, account: &str) -> StorageResult<()>;
}
