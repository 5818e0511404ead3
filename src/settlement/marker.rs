//! Pending Payment Marker
//!
//! A session-scoped record correlating an in-flight gateway payment with its
//! transaction. Lifecycle:
//!
//! ```text
//! write (payment initiation) → read (gateway return) → clear (confirmed success)
//! ```
//!
//! One writer (the workflow, on GATEWAY initiation) and one clearer (the
//! reconciler, on a successful outcome). The marker must survive a full
//! reload within the same session, so storage is pluggable: `FileSessionStorage`
//! persists per session id, `MemorySessionStorage` lives as long as the process.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tracing::{debug, warn};

use super::error::StorageError;
use super::types::TransactionId;

/// Storage key holding the transaction id
pub const PENDING_TRANSACTION_KEY: &str = "pendingPaymentTransaction";
/// Storage key holding the human-facing order code
pub const PENDING_ORDER_CODE_KEY: &str = "pendingPaymentOrderCode";

/// Key/value store scoped to one browser/user session
pub trait SessionStorage: Send + Sync {
    fn get_item(&self, key: &str) -> Option<String>;
    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove_item(&self, key: &str) -> Result<(), StorageError>;
}

impl<T: SessionStorage + ?Sized> SessionStorage for Arc<T> {
    fn get_item(&self, key: &str) -> Option<String> {
        (**self).get_item(key)
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        (**self).set_item(key, value)
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        (**self).remove_item(key)
    }
}

// ============================================================================
// In-memory storage
// ============================================================================

#[derive(Debug, Default)]
pub struct MemorySessionStorage {
    items: DashMap<String, String>,
}

impl MemorySessionStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStorage for MemorySessionStorage {
    fn get_item(&self, key: &str) -> Option<String> {
        self.items.get(key).map(|v| v.value().clone())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.items.remove(key);
        Ok(())
    }
}

// ============================================================================
// File-backed storage
// ============================================================================

/// One JSON file per session under `dir`: `<dir>/<session_id>.json`.
///
/// Every read goes to disk, so a restarted process sees what the previous
/// one wrote for the same session.
#[derive(Debug)]
pub struct FileSessionStorage {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileSessionStorage {
    pub fn open(dir: impl AsRef<Path>, session_id: &str) -> Result<Self, StorageError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let file_name: String = session_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        Ok(Self {
            path: dir.join(format!("{file_name}.json")),
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<HashMap<String, String>, StorageError> {
        match fs::read_to_string(&self.path) {
            Ok(content) if content.trim().is_empty() => Ok(HashMap::new()),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn store(&self, items: &HashMap<String, String>) -> Result<(), StorageError> {
        // Write-then-rename so a crash never leaves a torn file
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(items)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn mutate(
        &self,
        f: impl FnOnce(&mut HashMap<String, String>),
    ) -> Result<(), StorageError> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut items = self.load()?;
        f(&mut items);
        self.store(&items)
    }
}

impl SessionStorage for FileSessionStorage {
    fn get_item(&self, key: &str) -> Option<String> {
        match self.load() {
            Ok(mut items) => items.remove(key),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Session storage unreadable");
                None
            }
        }
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.mutate(|items| {
            items.insert(key.to_string(), value.to_string());
        })
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.mutate(|items| {
            items.remove(key);
        })
    }
}

// ============================================================================
// Typed marker access
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTransactionMarker {
    pub transaction_id: TransactionId,
    pub order_code: Option<String>,
}

impl PendingTransactionMarker {
    pub fn new(transaction_id: impl Into<TransactionId>, order_code: Option<String>) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            order_code,
        }
    }
}

/// Typed view of the two marker keys over a `SessionStorage`
#[derive(Debug, Clone)]
pub struct PendingMarkerStore<S> {
    storage: S,
}

impl<S: SessionStorage> PendingMarkerStore<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Absent means no payment was initiated in this session.
    pub fn read(&self) -> Option<PendingTransactionMarker> {
        let transaction_id = self
            .storage
            .get_item(PENDING_TRANSACTION_KEY)
            .filter(|id| !id.trim().is_empty())?;
        let order_code = self
            .storage
            .get_item(PENDING_ORDER_CODE_KEY)
            .filter(|code| !code.trim().is_empty());
        Some(PendingTransactionMarker::new(transaction_id, order_code))
    }

    pub fn write(&self, marker: &PendingTransactionMarker) -> Result<(), StorageError> {
        self.storage
            .set_item(PENDING_TRANSACTION_KEY, marker.transaction_id.as_str())?;
        match &marker.order_code {
            Some(code) => self.storage.set_item(PENDING_ORDER_CODE_KEY, code)?,
            None => self.storage.remove_item(PENDING_ORDER_CODE_KEY)?,
        }
        debug!(transaction_id = %marker.transaction_id, "Pending payment marker written");
        Ok(())
    }

    /// Idempotent: clearing an absent marker is a no-op.
    pub fn clear(&self) -> Result<(), StorageError> {
        self.storage.remove_item(PENDING_TRANSACTION_KEY)?;
        self.storage.remove_item(PENDING_ORDER_CODE_KEY)?;
        Ok(())
    }
}
