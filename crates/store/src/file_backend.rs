//! File-based storage backend — one file per key.
//!
//! Documents live at `<root>/<collection>/<key>.json` and are replaced via a
//! temp file and rename. Appended lists live at `<root>/<collection>/<key>.jsonl`,
//! one JSON value per line. Human-inspectable and dependency-free.

use async_trait::async_trait;
use clawdvc_core::error::StorageError;
use clawdvc_core::storage::Storage;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub struct FileStorage {
    root: PathBuf,
    // Serializes writers so an append never interleaves with another.
    write_lock: Mutex<()>,
}

impl FileStorage {
    pub fn new(root: PathBuf) -> Self {
        debug!(root = %root.display(), "File storage backend opened");
        Self {
            root,
            write_lock: Mutex::new(()),
        }
    }

    fn doc_path(&self, collection: &str, key: &str) -> PathBuf {
        self.root.join(encode(collection)).join(format!("{}.json", encode(key)))
    }

    fn log_path(&self, collection: &str, key: &str) -> PathBuf {
        self.root.join(encode(collection)).join(format!("{}.jsonl", encode(key)))
    }
}

/// Keep `[A-Za-z0-9._-]`, percent-encode everything else.
fn encode(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for b in segment.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-') {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    if out.starts_with('.') {
        out.replace_range(..1, "%2E");
    }
    out
}

fn io_err(path: &Path, e: std::io::Error) -> StorageError {
    StorageError::Io(format!("{}: {e}", path.display()))
}

fn ensure_parent(path: &Path) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    Ok(())
}

fn read_log(path: &Path) -> Result<Vec<serde_json::Value>, StorageError> {
    let content = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    Ok(content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str(line) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping corrupted log line");
                None
            }
        })
        .collect())
}

#[async_trait]
impl Storage for FileStorage {
    fn name(&self) -> &str {
        "file"
    }

    async fn get(&self, collection: &str, key: &str) -> Result<Option<serde_json::Value>, StorageError> {
        let doc = self.doc_path(collection, key);
        if doc.exists() {
            let content = std::fs::read_to_string(&doc).map_err(|e| io_err(&doc, e))?;
            let value = serde_json::from_str(&content).map_err(|e| StorageError::Corrupt {
                key: format!("{collection}/{key}"),
                reason: e.to_string(),
            })?;
            return Ok(Some(value));
        }

        let log = self.log_path(collection, key);
        if log.exists() {
            return Ok(Some(serde_json::Value::Array(read_log(&log)?)));
        }
        Ok(None)
    }

    async fn put(&self, collection: &str, key: &str, value: serde_json::Value) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        let path = self.doc_path(collection, key);
        ensure_parent(&path)?;

        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec(&value).map_err(|e| StorageError::Io(e.to_string()))?;
        std::fs::write(&tmp, body).map_err(|e| io_err(&tmp, e))?;
        std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
        Ok(())
    }

    async fn append(&self, collection: &str, key: &str, value: serde_json::Value) -> Result<u64, StorageError> {
        let _guard = self.write_lock.lock().await;
        let path = self.log_path(collection, key);
        ensure_parent(&path)?;

        let mut line = serde_json::to_string(&value).map_err(|e| StorageError::Io(e.to_string()))?;
        line.push('\n');
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| io_err(&path, e))?;
        file.write_all(line.as_bytes()).map_err(|e| io_err(&path, e))?;
        file.flush().map_err(|e| io_err(&path, e))?;
        drop(file);

        Ok(read_log(&path)?.len() as u64)
    }

    async fn delete(&self, collection: &str, key: &str) -> Result<bool, StorageError> {
        let _guard = self.write_lock.lock().await;
        let mut existed = false;
        for path in [self.doc_path(collection, key), self.log_path(collection, key)] {
            match std::fs::remove_file(&path) {
                Ok(()) => existed = true,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(io_err(&path, e)),
            }
        }
        Ok(existed)
    }

    async fn health_check(&self) -> Result<bool, StorageError> {
        std::fs::create_dir_all(&self.root).map_err(|e| io_err(&self.root, e))?;
        Ok(true)
    }
}
