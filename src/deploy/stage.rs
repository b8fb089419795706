// ABOUTME: Deployment stages and the explicit transition table between them.
// ABOUTME: Every stage change on an attempt goes through Stage::next.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Position of an attempt in the release state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Idle,
    ProvisioningTarget,
    HealthChecking,
    SmokeTesting,
    SwitchingTraffic,
    Verifying,
    RetiringOld,
    RollingBack,
    Completed,
    Failed,
    RolledBack,
}

/// Result of running a stage's entry action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageEvent {
    Succeeded,
    Failed,
    Cancelled,
    /// Rollback found live traffic never moved.
    NothingToUndo,
}

impl Stage {
    pub const ALL: [Stage; 11] = [
        Stage::Idle,
        Stage::ProvisioningTarget,
        Stage::HealthChecking,
        Stage::SmokeTesting,
        Stage::SwitchingTraffic,
        Stage::Verifying,
        Stage::RetiringOld,
        Stage::RollingBack,
        Stage::Completed,
        Stage::Failed,
        Stage::RolledBack,
    ];

    /// The transition table. `None` means the event is not valid in this stage.
    pub fn next(self, event: StageEvent) -> Option<Stage> {
        use Stage::*;
        use StageEvent as E;

        match (self, event) {
            (Idle, E::Succeeded) => Some(ProvisioningTarget),

            (ProvisioningTarget, E::Succeeded) => Some(HealthChecking),
            (ProvisioningTarget, E::Failed | E::Cancelled) => Some(Failed),

            (HealthChecking, E::Succeeded) => Some(SmokeTesting),
            (SmokeTesting, E::Succeeded) => Some(SwitchingTraffic),
            (HealthChecking | SmokeTesting, E::Failed) => Some(RollingBack),
            (HealthChecking | SmokeTesting, E::Cancelled) => Some(Failed),

            (SwitchingTraffic, E::Succeeded) => Some(Verifying),
            (Verifying, E::Succeeded) => Some(RetiringOld),
            // Cancellation is deferred until the stage finishes, then undone.
            (SwitchingTraffic | Verifying, E::Failed | E::Cancelled) => Some(RollingBack),

            // Retirement failure is a warning on a committed release.
            (RetiringOld, E::Succeeded | E::Failed) => Some(Completed),

            (RollingBack, E::Succeeded) => Some(RolledBack),
            (RollingBack, E::Failed | E::NothingToUndo) => Some(Failed),

            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Completed | Stage::Failed | Stage::RolledBack)
    }

    /// Whether a cancellation interrupts this stage's entry action.
    ///
    /// Other stages run their action to completion first.
    pub fn honors_cancel(self) -> bool {
        matches!(self, Stage::HealthChecking | Stage::SmokeTesting)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Idle => "idle",
            Stage::ProvisioningTarget => "provisioning-target",
            Stage::HealthChecking => "health-checking",
            Stage::SmokeTesting => "smoke-testing",
            Stage::SwitchingTraffic => "switching-traffic",
            Stage::Verifying => "verifying",
            Stage::RetiringOld => "retiring-old",
            Stage::RollingBack => "rolling-back",
            Stage::Completed => "completed",
            Stage::Failed => "failed",
            Stage::RolledBack => "rolled-back",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for StageEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StageEvent::Succeeded => "succeeded",
            StageEvent::Failed => "failed",
            StageEvent::Cancelled => "cancelled",
            StageEvent::NothingToUndo => "nothing-to-undo",
        };
        f.write_str(s)
    }
}
