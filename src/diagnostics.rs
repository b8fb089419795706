// ABOUTME: Diagnostics accumulator for non-fatal warnings during deployment.
// ABOUTME: Warnings are persisted with the attempt and shown to users at the end.

use serde::{Deserialize, Serialize};

/// Collects non-fatal warnings during deployment operations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Diagnostics {
    warnings: Vec<Warning>,
}

impl Diagnostics {
    /// Record a warning, auto-logging it via tracing.
    pub fn warn(&mut self, warning: Warning) {
        tracing::warn!("{}", warning.message);
        self.warnings.push(warning);
    }

    /// Get all collected warnings.
    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    /// Check if any warnings were collected.
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// A non-fatal warning collected during deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    pub kind: WarningKind,
    pub message: String,
}

impl Warning {
    /// Old fleet could not be retired; the release itself stands.
    pub fn retirement(message: impl Into<String>) -> Self {
        Self {
            kind: WarningKind::Retirement,
            message: message.into(),
        }
    }

    /// Create a lock release warning.
    pub fn lock_release(message: impl Into<String>) -> Self {
        Self {
            kind: WarningKind::LockRelease,
            message: message.into(),
        }
    }

    pub fn state_persistence(message: impl Into<String>) -> Self {
        Self {
            kind: WarningKind::StatePersistence,
            message: message.into(),
        }
    }

    pub fn cancel_ignored(message: impl Into<String>) -> Self {
        Self {
            kind: WarningKind::CancelIgnored,
            message: message.into(),
        }
    }
}

/// Categories of warnings that can occur during deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WarningKind {
    /// Former fleet was left running.
    Retirement,
    /// Failed to release deploy lock (lock file may remain).
    LockRelease,
    /// An intermediate attempt record could not be written.
    StatePersistence,
    /// Cancellation arrived after the release was committed.
    CancelIgnored,
}
