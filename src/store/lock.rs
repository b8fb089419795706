// ABOUTME: Deploy lock metadata identifying which process holds a target.
// ABOUTME: Holders refresh a heartbeat; a lock whose heartbeat goes quiet is stale and may be broken.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{AttemptId, TargetName};

/// Minutes without a heartbeat before a lock counts as abandoned.
const STALE_AFTER_MINUTES: i64 = 15;

/// Information about who holds a deploy lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    /// Hostname of the machine that holds the lock.
    pub holder: String,
    /// Process ID of the lock holder.
    pub pid: u32,
    /// When the lock was acquired.
    pub started_at: DateTime<Utc>,
    pub target: String,
    /// Attempt running under the lock, if any.
    pub attempt: Option<AttemptId>,
    /// Last time the holder showed it was alive.
    #[serde(default)]
    pub heartbeat_at: Option<DateTime<Utc>>,
}

impl LockInfo {
    /// Create new lock info for the current process.
    pub fn new(target: &TargetName, attempt: Option<&AttemptId>) -> Self {
        Self {
            holder: gethostname::gethostname().to_string_lossy().into_owned(),
            pid: std::process::id(),
            started_at: Utc::now(),
            target: target.to_string(),
            attempt: attempt.cloned(),
            heartbeat_at: None,
        }
    }

    /// Latest sign of life: the heartbeat, or acquisition time before the first one.
    pub fn last_seen(&self) -> DateTime<Utc> {
        self.heartbeat_at.unwrap_or(self.started_at)
    }

    /// Check if the holder has gone quiet for longer than the stale window.
    pub fn is_stale(&self) -> bool {
        Utc::now() - self.last_seen() >= chrono::Duration::minutes(STALE_AFTER_MINUTES)
    }

    /// Whether this stored lock is still the one `owner` acquired.
    ///
    /// Heartbeats are ignored; a broken and re-taken lock differs in holder,
    /// pid, acquisition time or attempt.
    pub fn is_held_by(&self, owner: &LockInfo) -> bool {
        self.holder == owner.holder
            && self.pid == owner.pid
            && self.started_at == owner.started_at
            && self.attempt == owner.attempt
    }
}
