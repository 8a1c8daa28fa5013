//! Connection State Store
//!
//! Durable records for connections plus a per-name exclusive lock.
//!
//! ## Locking
//!
//! `lock` never blocks: a held lock is reported as
//! [`InterconnectError::Conflict`]. The returned [`StoreLock`] releases the
//! lock when dropped, on every exit path including panics and early returns.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::error::InterconnectError;
use super::types::VpnConnection;

type Result<T> = std::result::Result<T, InterconnectError>;

#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, name: &str) -> Result<Option<VpnConnection>>;

    /// Insert or replace the record keyed by `record.name`
    async fn put(&self, record: &VpnConnection) -> Result<()>;

    /// Remove a record; absent records are not an error
    async fn delete(&self, name: &str) -> Result<()>;

    async fn list(&self) -> Result<Vec<VpnConnection>>;

    /// Take the exclusive lock for `name`, failing fast if it is held
    async fn lock(&self, name: &str) -> Result<StoreLock>;
}

/// Scoped lock guard; releases on drop
pub struct StoreLock {
    name: String,
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl StoreLock {
    pub fn new(name: impl Into<String>, release: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            name: name.into(),
            release: Some(Box::new(release)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for StoreLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreLock").field("name", &self.name).finish()
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
            debug!(connection = %self.name, "Released connection lock");
        }
    }
}

fn conflict(name: &str) -> InterconnectError {
    InterconnectError::Conflict(format!("connection {} is locked by another operation", name))
}

/// In-process store, used by tests and single-shot tooling
#[derive(Default)]
pub struct MemoryStateStore {
    records: RwLock<HashMap<String, VpnConnection>>,
    locks: Arc<Mutex<HashSet<String>>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_locked(&self, name: &str) -> bool {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(name)
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get(&self, name: &str) -> Result<Option<VpnConnection>> {
        Ok(self.records.read().await.get(name).cloned())
    }

    async fn put(&self, record: &VpnConnection) -> Result<()> {
        self.records
            .write()
            .await
            .insert(record.name.clone(), record.clone());
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.records.write().await.remove(name);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<VpnConnection>> {
        let mut records: Vec<_> = self.records.read().await.values().cloned().collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }

    async fn lock(&self, name: &str) -> Result<StoreLock> {
        let inserted = self
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string());
        if !inserted {
            return Err(conflict(name));
        }

        let locks = Arc::clone(&self.locks);
        let key = name.to_string();
        Ok(StoreLock::new(name, move || {
            locks
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&key);
        }))
    }
}

/// One JSON document per connection in a directory.
///
/// Records are written to a temp file and renamed into place, so a crash
/// never leaves a half-written record. Locks are `{name}.lock` files created
/// exclusively. A holder touches its lock file every quarter of
/// `stale_after`; a lock left untouched for `stale_after` is assumed to
/// belong to a dead process and is broken.
pub struct FileStateStore {
    dir: PathBuf,
    stale_after: Duration,
}

impl FileStateStore {
    pub async fn open(dir: impl Into<PathBuf>, stale_after: Duration) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| InterconnectError::Store(format!("failed to create {:?}: {}", dir, e)))?;
        Ok(Self { dir, stale_after })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, name: &str) -> Result<PathBuf> {
        check_key(name)?;
        Ok(self.dir.join(format!("{}.json", name)))
    }

    fn lock_path(&self, name: &str) -> Result<PathBuf> {
        check_key(name)?;
        Ok(self.dir.join(format!("{}.lock", name)))
    }

    async fn try_create_lock(&self, path: &Path) -> std::io::Result<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await?;
        let owner = serde_json::json!({
            "pid": std::process::id(),
            "acquired_at": Utc::now(),
        });
        file.write_all(owner.to_string().as_bytes()).await?;
        file.flush().await
    }

    fn heartbeat_every(&self) -> Duration {
        (self.stale_after / 4).max(Duration::from_secs(1))
    }

    /// Move a stale lock aside before removing it.
    ///
    /// Two processes may both judge the same lock stale. Only one rename
    /// succeeds; if what was moved turns out to be fresh, another process
    /// re-acquired the lock in between and it is put back.
    async fn break_stale_lock(&self, name: &str, path: &Path) -> Result<()> {
        let aside = self
            .dir
            .join(format!("{}.lock.{}.stale", name, Uuid::new_v4().simple()));

        match tokio::fs::rename(path, &aside).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(InterconnectError::Store(format!("failed to break lock {}: {}", name, e))),
        }

        if !self.lock_is_stale(&aside).await {
            if let Err(e) = tokio::fs::hard_link(&aside, path).await {
                warn!(connection = %name, error = %e, "Failed to restore live lock");
            }
            remove_quietly(&aside).await;
            return Err(conflict(name));
        }

        remove_quietly(&aside).await;
        Ok(())
    }

    async fn lock_is_stale(&self, path: &Path) -> bool {
        let modified = match tokio::fs::metadata(path).await.and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(_) => return false,
        };
        SystemTime::now()
            .duration_since(modified)
            .map(|age| age >= self.stale_after)
            .unwrap_or(false)
    }
}

async fn remove_quietly(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = ?path, error = %e, "Failed to remove file"),
    }
}

/// Refresh a lock file's mtime without recreating it
async fn touch(path: &Path) -> std::io::Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        std::fs::OpenOptions::new()
            .write(true)
            .open(&path)?
            .set_modified(SystemTime::now())
    })
    .await
    .map_err(std::io::Error::other)?
}

/// Keys become file names; keep them inside the store directory.
fn check_key(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '+'));
    if valid {
        Ok(())
    } else {
        Err(InterconnectError::Store(format!("invalid record key {:?}", name)))
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn get(&self, name: &str) -> Result<Option<VpnConnection>> {
        let path = self.record_path(name)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(InterconnectError::Store(format!("failed to read {:?}: {}", path, e))),
        }
    }

    async fn put(&self, record: &VpnConnection) -> Result<()> {
        let path = self.record_path(&record.name)?;
        let tmp = self.dir.join(format!("{}.json.tmp", record.name));
        let body = serde_json::to_vec_pretty(record)?;

        // A leftover temp file would keep its old mode
        remove_quietly(&tmp).await;

        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create_new(true);
        // Records carry pre-shared keys
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options
            .open(&tmp)
            .await
            .map_err(|e| InterconnectError::Store(format!("failed to create {:?}: {}", tmp, e)))?;
        file.write_all(&body)
            .await
            .map_err(|e| InterconnectError::Store(format!("failed to write {:?}: {}", tmp, e)))?;
        file.sync_all().await.map_err(InterconnectError::store)?;
        drop(file);

        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| InterconnectError::Store(format!("failed to replace {:?}: {}", path, e)))?;

        debug!(connection = %record.name, state = %record.state, "Persisted connection record");
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let path = self.record_path(name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(InterconnectError::Store(format!("failed to remove {:?}: {}", path, e))),
        }
    }

    async fn list(&self) -> Result<Vec<VpnConnection>> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(InterconnectError::store)?;
        let mut records = Vec::new();

        while let Some(entry) = entries.next_entry().await.map_err(InterconnectError::store)? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = tokio::fs::read(&path).await.map_err(InterconnectError::store)?;
            records.push(serde_json::from_slice::<VpnConnection>(&bytes)?);
        }

        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }

    async fn lock(&self, name: &str) -> Result<StoreLock> {
        let path = self.lock_path(name)?;

        match self.try_create_lock(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                if !self.lock_is_stale(&path).await {
                    return Err(conflict(name));
                }
                warn!(connection = %name, path = ?path, "Breaking stale connection lock");
                self.break_stale_lock(name, &path).await?;
                self.try_create_lock(&path).await.map_err(|e| {
                    if e.kind() == std::io::ErrorKind::AlreadyExists {
                        conflict(name)
                    } else {
                        InterconnectError::store(e)
                    }
                })?;
            }
            Err(e) => return Err(InterconnectError::Store(format!("failed to lock {}: {}", name, e))),
        }

        let every = self.heartbeat_every();
        let beat_path = path.clone();
        let heartbeat = tokio::spawn(async move {
            loop {
                tokio::time::sleep(every).await;
                if let Err(e) = touch(&beat_path).await {
                    debug!(path = ?beat_path, error = %e, "Lock heartbeat missed");
                }
            }
        })
        .abort_handle();

        info!(connection = %name, "Acquired connection lock");
        Ok(StoreLock::new(name, move || {
            heartbeat.abort();
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(path = ?path, error = %e, "Failed to remove lock file");
            }
        }))
    }
}
