//! File-backed credential store.
//!
//! One JSON document per account under the store directory. Writes go
//! through a temp file + rename so a crash never leaves a partial document.
//! Same-account operations serialize through a per-account async lock;
//! different accounts proceed independently.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde::Deserialize;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::error::{StorageError, StorageResult};
use super::record::{CredentialRecord, Profile};

/// Optional fields added to the document schema after the first release.
/// `migrate` backfills them explicitly so every document on disk carries the
/// full column set; backfilling a document that already has them is a no-op.
const ADDITIVE_FIELDS: &[&str] = &["refresh_token", "expires_at"];

/// File-based implementation of `CredentialStore`.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    dir: PathBuf,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

/// Loose document shape used to salvage records with malformed profile data.
#[derive(Deserialize)]
struct LooseDocument {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    session_token: String,
    #[serde(default)]
    expires_at: Option<chrono::DateTime<Utc>>,
    #[serde(default)]
    profile: serde_json::Value,
    updated_at: chrono::DateTime<Utc>,
}

impl FileCredentialStore {
    /// Create a store rooted at `dir`. The directory is created lazily on the
    /// first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            locks: Arc::new(DashMap::new()),
        }
    }

    /// Backfill documents written by older releases with the current set of
    /// optional fields. Additive and non-destructive: a document that already
    /// carries every field is left untouched.
    ///
    /// Returns the number of documents rewritten.
    pub async fn migrate(&self) -> StorageResult<usize> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(StorageError::io(&self.dir, e)),
        };

        let mut rewritten = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::io(&self.dir, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let contents = fs::read_to_string(&path)
                .await
                .map_err(|e| StorageError::io(&path, e))?;
            let Ok(mut doc) = serde_json::from_str::<serde_json::Value>(&contents) else {
                // Unreadable documents are handled by the purge-on-read path.
                continue;
            };
            let Some(fields) = doc.as_object_mut() else {
                continue;
            };

            let mut changed = false;
            for field in ADDITIVE_FIELDS {
                if !fields.contains_key(*field) {
                    fields.insert((*field).to_string(), serde_json::Value::Null);
                    changed = true;
                }
            }
            if changed {
                let json = serde_json::to_string_pretty(&doc).map_err(|e| {
                    StorageError::Encode {
                        account: path
                            .file_stem()
                            .map(|s| s.to_string_lossy().to_string())
                            .unwrap_or_default(),
                        source: e,
                    }
                })?;
                write_atomic(&path, &json).await?;
                rewritten += 1;
                debug!(path = %path.display(), "Backfilled credential document");
            }
        }
        Ok(rewritten)
    }

    fn document_path(&self, account: &str) -> PathBuf {
        self.dir.join(format!("{account}.json"))
    }

    fn lock_for(&self, account: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(account.to_string())
            .or_default()
            .clone()
    }

    /// Read and decode the document without taking the account lock.
    async fn read_document(&self, account: &str) -> StorageResult<Option<CredentialRecord>> {
        let path = self.document_path(account);
        let contents = match fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::io(&path, e)),
        };

        if let Ok(record) = serde_json::from_str::<CredentialRecord>(&contents) {
            return Ok(Some(record));
        }

        // Salvage path: the record fields are intact but the profile is not.
        // Degrade to a minimal profile instead of failing the read.
        if let Ok(loose) = serde_json::from_str::<LooseDocument>(&contents) {
            let profile = serde_json::from_value::<Profile>(loose.profile)
                .unwrap_or_else(|_| Profile::minimal(account));
            warn!(account, "Malformed stored profile, degrading to minimal");
            return Ok(Some(CredentialRecord {
                access_token: loose.access_token,
                refresh_token: loose.refresh_token,
                session_token: loose.session_token,
                expires_at: loose.expires_at,
                profile,
                updated_at: loose.updated_at,
            }));
        }

        // The document itself is unreadable. Purge it so the acquirer runs
        // fresh next time instead of tripping over the same bytes forever.
        warn!(account, path = %path.display(), "Unreadable credential document, purging");
        remove_if_present(&path).await?;
        Ok(None)
    }
}

#[async_trait]
impl super::CredentialStore for FileCredentialStore {
    async fn put(&self, account: &str, record: &CredentialRecord) -> StorageResult<()> {
        let lock = self.lock_for(account);
        let _guard = lock.lock().await;

        let mut stamped = record.clone();
        stamped.updated_at = Utc::now();

        let json = serde_json::to_string_pretty(&stamped).map_err(|e| StorageError::Encode {
            account: account.to_string(),
            source: e,
        })?;

        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| StorageError::io(&self.dir, e))?;
        write_atomic(&self.document_path(account), &json).await
    }

    async fn get(&self, account: &str) -> StorageResult<Option<CredentialRecord>> {
        let lock = self.lock_for(account);
        let _guard = lock.lock().await;
        self.read_document(account).await
    }

    async fn is_usable(&self, account: &str) -> StorageResult<bool> {
        let lock = self.lock_for(account);
        let _guard = lock.lock().await;

        match self.read_document(account).await? {
            None => Ok(false),
            Some(record) if record.is_usable() => Ok(true),
            Some(_) => {
                // Delete-on-read: an invalid record must never be returned to
                // a caller, so purge it eagerly.
                debug!(account, "Purging unusable credential record");
                remove_if_present(&self.document_path(account)).await?;
                Ok(false)
            }
        }
    }

    async fn delete(&self, account: &str) -> StorageResult<()> {
        let lock = self.lock_for(account);
        let _guard = lock.lock().await;
        remove_if_present(&self.document_path(account)).await
    }
}

/// Write contents to `path` via temp file + rename.
async fn write_atomic(path: &Path, contents: &str) -> StorageResult<()> {
    let temp_path = path.with_extension("json.tmp");
    fs::write(&temp_path, contents.as_bytes())
        .await
        .map_err(|e| StorageError::io(&temp_path, e))?;
    fs::rename(&temp_path, path)
        .await
        .map_err(|e| StorageError::io(path, e))
}

async fn remove_if_present(path: &Path) -> StorageResult<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StorageError::io(path, e)),
    }
}

// ============================================================================
// Tests
// ============================================================================
