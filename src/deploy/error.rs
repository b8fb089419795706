// ABOUTME: Error types for deployment orchestration.
// ABOUTME: Rejections before an attempt starts plus state store failures.

use crate::store::{LockInfo, StoreError};
use crate::types::{AttemptId, Color, TargetName, display_color};

use super::stage::{Stage, StageEvent};

/// Errors returned instead of a finished attempt.
///
/// Stage failures inside an attempt are not errors; they are recorded on the
/// attempt and reflected in its outcome.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    /// Another attempt holds the target's deploy lock.
    #[error(
        "deployment already in progress (held by {} pid {} since {})",
        .0.holder, .0.pid, .0.started_at
    )]
    AlreadyInProgress(Box<LockInfo>),

    /// Requested color is already active.
    #[error("{0} is already the active color")]
    NoOp(Color),

    #[error("target {target} requires reconciliation: {reason}")]
    ReconciliationRequired { target: TargetName, reason: String },

    #[error(
        "recorded active color {} does not match live color {}",
        display_color(.recorded),
        display_color(.live)
    )]
    ActiveColorMismatch {
        recorded: Option<Color>,
        live: Option<Color>,
    },

    /// The running attempt's lock was broken and another process took over.
    #[error("attempt {0} lost the deploy lock to another process and was abandoned")]
    LockLost(AttemptId),

    /// The traffic director could not be queried.
    #[error("traffic director unavailable: {0}")]
    Director(String),

    #[error("attempt not found: {0}")]
    AttemptNotFound(String),

    #[error("invalid transition from {from} on {event}")]
    InvalidTransition { from: Stage, event: StageEvent },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Coarse classification of deploy errors for exit handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployErrorKind {
    /// Nothing to do; callers treat this as success.
    NoOp,
    /// Another deployment holds the lock.
    Busy,
    /// Target needs operator reconciliation first.
    Blocked,
    /// Infrastructure or storage failure.
    Infrastructure,
    /// Caller error or internal bug.
    Invalid,
}

impl DeployError {
    pub fn kind(&self) -> DeployErrorKind {
        match self {
            DeployError::NoOp(_) => DeployErrorKind::NoOp,
            DeployError::AlreadyInProgress(_) => DeployErrorKind::Busy,
            DeployError::ReconciliationRequired { .. }
            | DeployError::ActiveColorMismatch { .. }
            | DeployError::LockLost(_) => DeployErrorKind::Blocked,
            DeployError::Director(_) | DeployError::Store(_) => DeployErrorKind::Infrastructure,
            DeployError::AttemptNotFound(_) | DeployError::InvalidTransition { .. } => {
                DeployErrorKind::Invalid
            }
        }
    }

    pub fn is_noop(&self) -> bool {
        self.kind() == DeployErrorKind::NoOp
    }

    /// Lock holder details when rejected as already in progress.
    pub fn lock_holder(&self) -> Option<&LockInfo> {
        match self {
            DeployError::AlreadyInProgress(info) => Some(info),
            _ => None,
        }
    }
}
