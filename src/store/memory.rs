// ABOUTME: In-memory state store for embedding the orchestrator and for tests.
// ABOUTME: Lock acquisition is atomic under a single mutex.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};

use crate::deploy::DeploymentAttempt;
use crate::types::{AttemptId, TargetName};

use super::{LockInfo, StateStore, StoreError, TargetState};

#[derive(Debug, Default)]
struct Inner {
    targets: HashMap<TargetName, TargetState>,
    attempts: HashMap<TargetName, BTreeMap<String, DeploymentAttempt>>,
    locks: HashMap<TargetName, LockInfo>,
}

/// Volatile store; everything is lost when dropped.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    inner: Mutex<Inner>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a target's state (e.g. an existing active color).
    pub fn with_target(self, target: &TargetName, state: TargetState) -> Self {
        self.inner.lock().targets.insert(target.clone(), state);
        self
    }

    /// Current lock holder for a target.
    pub fn lock_holder(&self, target: &TargetName) -> Option<LockInfo> {
        self.inner.lock().locks.get(target).cloned()
    }

    /// Install a lock as if held by another process.
    pub fn plant_lock(&self, target: &TargetName, info: LockInfo) {
        self.inner.lock().locks.insert(target.clone(), info);
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load_target(&self, target: &TargetName) -> Result<TargetState, StoreError> {
        Ok(self
            .inner
            .lock()
            .targets
            .get(target)
            .cloned()
            .unwrap_or_default())
    }

    async fn save_target(
        &self,
        target: &TargetName,
        state: &TargetState,
    ) -> Result<(), StoreError> {
        self.inner
            .lock()
            .targets
            .insert(target.clone(), state.clone());
        Ok(())
    }

    async fn save_attempt(&self, attempt: &DeploymentAttempt) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let attempts = inner.attempts.entry(attempt.target.clone()).or_default();
        if let Some(existing) = attempts.get(attempt.id.as_str())
            && existing.is_terminal()
        {
            return Err(StoreError::TerminalAttempt(attempt.id.to_string()));
        }
        attempts.insert(attempt.id.to_string(), attempt.clone());
        Ok(())
    }

    async fn load_attempt(
        &self,
        target: &TargetName,
        id: &AttemptId,
    ) -> Result<Option<DeploymentAttempt>, StoreError> {
        Ok(self
            .inner
            .lock()
            .attempts
            .get(target)
            .and_then(|a| a.get(id.as_str()))
            .cloned())
    }

    async fn list_attempts(
        &self,
        target: &TargetName,
    ) -> Result<Vec<DeploymentAttempt>, StoreError> {
        Ok(self
            .inner
            .lock()
            .attempts
            .get(target)
            .map(|a| a.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn try_lock(
        &self,
        target: &TargetName,
        info: &LockInfo,
        force: bool,
    ) -> Result<Option<LockInfo>, StoreError> {
        let mut inner = self.inner.lock();
        let broken = match inner.locks.get(target) {
            None => None,
            Some(existing) if force || existing.is_stale() => {
                tracing::warn!(
                    "Breaking lock held by {} (pid {}) since {}",
                    existing.holder,
                    existing.pid,
                    existing.started_at
                );
                Some(existing.clone())
            }
            Some(existing) => return Err(StoreError::LockHeld(Box::new(existing.clone()))),
        };
        inner.locks.insert(target.clone(), info.clone());
        Ok(broken)
    }

    async fn refresh_lock(
        &self,
        target: &TargetName,
        owner: &LockInfo,
    ) -> Result<(), StoreError> {
        match self.inner.lock().locks.get_mut(target) {
            Some(current) if current.is_held_by(owner) => {
                current.heartbeat_at = Some(Utc::now());
                Ok(())
            }
            _ => Err(StoreError::LockLost(target.to_string())),
        }
    }

    async fn unlock(&self, target: &TargetName, owner: &LockInfo) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let held = match inner.locks.get(target) {
            None => return Ok(()),
            Some(current) => current.is_held_by(owner),
        };
        if !held {
            return Err(StoreError::LockLost(target.to_string()));
        }
        inner.locks.remove(target);
        Ok(())
    }
}
