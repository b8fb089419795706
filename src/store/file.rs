// ABOUTME: File-backed state store under a state directory, one subdirectory per target.
// ABOUTME: JSON records are written atomically; the lock file uses create-new semantics.

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::deploy::DeploymentAttempt;
use crate::types::{AttemptId, TargetName};

use super::{LockInfo, StateStore, StoreError, TargetState};

const STATE_FILE: &str = "state.json";
const LOCK_FILE: &str = "deploy.lock";
const ATTEMPTS_DIR: &str = "attempts";

/// Layout:
///
/// ```text
/// <root>/<target>/state.json
/// <root>/<target>/deploy.lock
/// <root>/<target>/attempts/<attempt-id>.json
/// ```
#[derive(Debug, Clone)]
pub struct FileStateStore {
    root: PathBuf,
}

impl FileStateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn target_dir(&self, target: &TargetName) -> PathBuf {
        self.root.join(target.as_str())
    }

    fn state_path(&self, target: &TargetName) -> PathBuf {
        self.target_dir(target).join(STATE_FILE)
    }

    /// Path to the lock file for a target.
    pub fn lock_path(&self, target: &TargetName) -> PathBuf {
        self.target_dir(target).join(LOCK_FILE)
    }

    fn attempts_dir(&self, target: &TargetName) -> PathBuf {
        self.target_dir(target).join(ATTEMPTS_DIR)
    }

    fn attempt_path(&self, target: &TargetName, id: &AttemptId) -> PathBuf {
        self.attempts_dir(target).join(format!("{id}.json"))
    }

    async fn ensure_dir(path: &Path) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(path)
            .await
            .map_err(|source| StoreError::Io {
                action: "create directory",
                path: path.to_path_buf(),
                source,
            })
    }

    async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StoreError::Io {
                    action: "read",
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StoreError::Corrupt {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
    }

    /// Write via a temporary file and rename so readers never see a partial record.
    async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            Self::ensure_dir(parent).await?;
        }

        let json = serde_json::to_vec_pretty(value).map_err(|e| StoreError::Corrupt {
            path: path.to_path_buf(),
            reason: format!("failed to serialize: {e}"),
        })?;

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|source| StoreError::Io {
                action: "write",
                path: tmp.clone(),
                source,
            })?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|source| StoreError::Io {
                action: "rename",
                path: path.to_path_buf(),
                source,
            })
    }

    /// Atomically create the lock file. Returns false if it already exists.
    async fn create_lock_file(path: &Path, info: &LockInfo) -> Result<bool, StoreError> {
        use tokio::io::AsyncWriteExt;

        let json = serde_json::to_vec(info).map_err(|e| StoreError::Corrupt {
            path: path.to_path_buf(),
            reason: format!("failed to serialize lock: {e}"),
        })?;

        let mut file = match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
            Err(source) => {
                return Err(StoreError::Io {
                    action: "create lock",
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        file.write_all(&json)
            .await
            .map_err(|source| StoreError::Io {
                action: "write lock",
                path: path.to_path_buf(),
                source,
            })?;
        Ok(true)
    }

    async fn remove_lock_file(path: &Path) -> Result<(), StoreError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io {
                action: "remove lock",
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn load_target(&self, target: &TargetName) -> Result<TargetState, StoreError> {
        Ok(Self::read_json(&self.state_path(target))
            .await?
            .unwrap_or_default())
    }

    async fn save_target(
        &self,
        target: &TargetName,
        state: &TargetState,
    ) -> Result<(), StoreError> {
        Self::write_json(&self.state_path(target), state).await
    }

    async fn save_attempt(&self, attempt: &DeploymentAttempt) -> Result<(), StoreError> {
        let path = self.attempt_path(&attempt.target, &attempt.id);
        if let Some(existing) = Self::read_json::<DeploymentAttempt>(&path).await?
            && existing.is_terminal()
        {
            return Err(StoreError::TerminalAttempt(attempt.id.to_string()));
        }
        Self::write_json(&path, attempt).await
    }

    async fn load_attempt(
        &self,
        target: &TargetName,
        id: &AttemptId,
    ) -> Result<Option<DeploymentAttempt>, StoreError> {
        Self::read_json(&self.attempt_path(target, id)).await
    }

    async fn list_attempts(
        &self,
        target: &TargetName,
    ) -> Result<Vec<DeploymentAttempt>, StoreError> {
        let dir = self.attempts_dir(target);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    action: "list",
                    path: dir,
                    source,
                });
            }
        };

        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|source| StoreError::Io {
            action: "list",
            path: dir.clone(),
            source,
        })? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        // Attempt IDs embed their start time, so name order is start order.
        paths.sort();

        let mut attempts = Vec::with_capacity(paths.len());
        for path in paths {
            if let Some(attempt) = Self::read_json(&path).await? {
                attempts.push(attempt);
            }
        }
        Ok(attempts)
    }

    async fn try_lock(
        &self,
        target: &TargetName,
        info: &LockInfo,
        force: bool,
    ) -> Result<Option<LockInfo>, StoreError> {
        let lock_path = self.lock_path(target);
        Self::ensure_dir(&self.target_dir(target)).await?;

        if Self::create_lock_file(&lock_path, info).await? {
            return Ok(None);
        }

        // Lock acquisition failed - check if existing lock should be broken
        let existing = match Self::read_json::<LockInfo>(&lock_path).await {
            Ok(Some(existing)) => Some(existing),
            Ok(None) => None,
            Err(StoreError::Corrupt { .. }) => {
                tracing::warn!("Lock info corrupted, breaking lock");
                None
            }
            Err(e) => return Err(e),
        };

        if let Some(ref existing) = existing {
            if force {
                tracing::warn!(
                    "Breaking lock held by {} (pid {}) since {}",
                    existing.holder,
                    existing.pid,
                    existing.started_at
                );
            } else if existing.is_stale() {
                tracing::warn!(
                    "Auto-breaking stale lock held by {} (pid {}) since {}",
                    existing.holder,
                    existing.pid,
                    existing.started_at
                );
            } else {
                return Err(StoreError::LockHeld(Box::new(existing.clone())));
            }
        }

        tracing::debug!("Removing stale/forced lock at {}", lock_path.display());
        Self::remove_lock_file(&lock_path).await?;

        if !Self::create_lock_file(&lock_path, info).await? {
            // Someone else won the race while we were breaking the lock.
            let holder = Self::read_json::<LockInfo>(&lock_path)
                .await
                .ok()
                .flatten()
                .unwrap_or_else(|| info.clone());
            return Err(StoreError::LockHeld(Box::new(holder)));
        }

        Ok(existing)
    }

    async fn refresh_lock(
        &self,
        target: &TargetName,
        owner: &LockInfo,
    ) -> Result<(), StoreError> {
        let lock_path = self.lock_path(target);
        match Self::read_json::<LockInfo>(&lock_path).await? {
            Some(current) if current.is_held_by(owner) => {
                let refreshed = LockInfo {
                    heartbeat_at: Some(Utc::now()),
                    ..current
                };
                Self::write_json(&lock_path, &refreshed).await
            }
            _ => Err(StoreError::LockLost(target.to_string())),
        }
    }

    async fn unlock(&self, target: &TargetName, owner: &LockInfo) -> Result<(), StoreError> {
        let lock_path = self.lock_path(target);
        match Self::read_json::<LockInfo>(&lock_path).await? {
            None => Ok(()),
            Some(current) if current.is_held_by(owner) => {
                Self::remove_lock_file(&lock_path).await
            }
            Some(current) => {
                tracing::warn!(
                    "Leaving lock for {} in place; it is held by {} (pid {}) since {}",
                    target,
                    current.holder,
                    current.pid,
                    current.started_at
                );
                Err(StoreError::LockLost(target.to_string()))
            }
        }
    }
}
