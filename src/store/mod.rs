// ABOUTME: Persistent deployment state: active color, attempt records, and deploy lock.
// ABOUTME: File-backed store for the CLI, in-memory store for embedding and tests.

mod file;
mod lock;
mod memory;

pub use file::FileStateStore;
pub use lock::LockInfo;
pub use memory::MemoryStateStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::deploy::DeploymentAttempt;
use crate::types::{AttemptId, Color, TargetName};

/// Persisted per-target state shared across attempts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetState {
    /// Color the store believes is receiving traffic.
    pub active_color: Option<Color>,
    /// Set when the live routing can no longer be trusted.
    pub reconciliation_required: Option<String>,
    pub last_attempt: Option<AttemptId>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to {action} {}: {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt state file {}: {reason}", .path.display())]
    Corrupt { path: PathBuf, reason: String },

    #[error("deploy lock held by {} (pid {}) since {}", .0.holder, .0.pid, .0.started_at)]
    LockHeld(Box<LockInfo>),

    #[error("attempt {0} is terminal and cannot be modified")]
    TerminalAttempt(String),

    #[error("deploy lock for {0} is no longer held by this process")]
    LockLost(String),
}

/// Storage for target state, attempt history, and the per-target lock.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load target state; a target never deployed has the default state.
    async fn load_target(&self, target: &TargetName) -> Result<TargetState, StoreError>;

    async fn save_target(&self, target: &TargetName, state: &TargetState)
    -> Result<(), StoreError>;

    /// Persist an attempt. Overwriting a terminal record is rejected.
    async fn save_attempt(&self, attempt: &DeploymentAttempt) -> Result<(), StoreError>;

    async fn load_attempt(
        &self,
        target: &TargetName,
        id: &AttemptId,
    ) -> Result<Option<DeploymentAttempt>, StoreError>;

    /// All attempts for a target, oldest first.
    async fn list_attempts(
        &self,
        target: &TargetName,
    ) -> Result<Vec<DeploymentAttempt>, StoreError>;

    /// Acquire the target's deploy lock.
    ///
    /// Returns the previous holder's info if a stale (or, with `force`, live)
    /// lock had to be broken, so the caller can recover its attempt.
    async fn try_lock(
        &self,
        target: &TargetName,
        info: &LockInfo,
        force: bool,
    ) -> Result<Option<LockInfo>, StoreError>;

    /// Record a heartbeat on a lock `owner` still holds.
    ///
    /// Fails with [`StoreError::LockLost`] once the lock was broken or
    /// re-taken by someone else.
    async fn refresh_lock(&self, target: &TargetName, owner: &LockInfo)
    -> Result<(), StoreError>;

    /// Release the lock if `owner` still holds it.
    ///
    /// A lock that now belongs to someone else is left in place and reported
    /// as [`StoreError::LockLost`]. A missing lock is not an error.
    async fn unlock(&self, target: &TargetName, owner: &LockInfo) -> Result<(), StoreError>;
}
