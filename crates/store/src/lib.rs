//! Storage backends and the typed stores built on the storage contract.

pub mod accounts;
pub mod file_backend;
pub mod history;
pub mod in_memory;
pub mod knowledge;
pub mod metrics;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use accounts::AccountStore;
pub use file_backend::FileStorage;
pub use history::{HistoryStore, Persistence};
pub use in_memory::MemoryStorage;
pub use knowledge::KnowledgeStore;
pub use metrics::{GrowthLedger, LedgerTotals};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStorage;

use clawdvc_core::error::StorageError;
use clawdvc_core::storage::Storage;
use std::path::Path;
use std::sync::Arc;

/// Open the backend named `backend` ("sqlite", "file" or "memory").
///
/// For "sqlite" `path` is the database file; for "file" it is the root
/// directory. Parent directories are created as needed.
pub async fn open(backend: &str, path: &Path) -> Result<Arc<dyn Storage>, StorageError> {
    match backend {
        "memory" => Ok(Arc::new(MemoryStorage::new())),
        "file" => {
            std::fs::create_dir_all(path).map_err(|e| StorageError::Io(format!("{}: {e}", path.display())))?;
            Ok(Arc::new(FileStorage::new(path.to_path_buf())))
        }
        #[cfg(feature = "sqlite")]
        "sqlite" => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StorageError::Io(format!("{}: {e}", parent.display())))?;
            }
            let path = path
                .to_str()
                .ok_or_else(|| StorageError::Io(format!("non-UTF-8 path: {}", path.display())))?;
            Ok(Arc::new(SqliteStorage::new(path).await?))
        }
        other => Err(StorageError::Io(format!("unknown storage backend: {other}"))),
    }
}
