// ABOUTME: The persisted record of one deployment attempt.
// ABOUTME: Tracks stage history, failure cause, warnings and outcome.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::diagnostics::{Diagnostics, Warning};
use crate::types::{AttemptId, Color, TargetName};

use super::error::DeployError;
use super::stage::{Stage, StageEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    InProgress,
    Succeeded,
    Failed,
    RolledBack,
}

impl Outcome {
    pub fn is_terminal(self) -> bool {
        self != Outcome::InProgress
    }

    fn for_stage(stage: Stage) -> Self {
        match stage {
            Stage::Completed => Outcome::Succeeded,
            Stage::Failed => Outcome::Failed,
            Stage::RolledBack => Outcome::RolledBack,
            _ => Outcome::InProgress,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Outcome::InProgress => "in-progress",
            Outcome::Succeeded => "succeeded",
            Outcome::Failed => "failed",
            Outcome::RolledBack => "rolled-back",
        };
        f.write_str(s)
    }
}

/// Why a stage failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    ProvisionError,
    HealthCheckTimeout,
    SmokeTestFailure,
    TrafficSwitchError,
    RetirementWarning,
    Cancelled,
    /// The process driving the attempt died mid-flight.
    Interrupted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: Stage,
    pub entered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFailure {
    pub stage: Stage,
    pub kind: FailureKind,
    pub reason: String,
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} during {}: {}", self.kind, self.stage, self.reason)
    }
}

/// One end-to-end run of the state machine for a single target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentAttempt {
    pub id: AttemptId,
    pub target: TargetName,
    pub source_color: Option<Color>,
    pub target_color: Color,
    pub stage: Stage,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub outcome: Outcome,
    pub history: Vec<StageRecord>,
    /// First stage failure; later failures (e.g. during rollback) do not replace it.
    pub failure: Option<StageFailure>,
    pub rollback_error: Option<String>,
    #[serde(default)]
    pub warnings: Diagnostics,
    #[serde(default)]
    pub cancel_requested: bool,
    #[serde(default)]
    pub requires_reconciliation: bool,
}

impl DeploymentAttempt {
    pub fn new(
        id: AttemptId,
        target: TargetName,
        source_color: Option<Color>,
        target_color: Color,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            target,
            source_color,
            target_color,
            stage: Stage::Idle,
            started_at,
            ended_at: None,
            outcome: Outcome::InProgress,
            history: vec![StageRecord {
                stage: Stage::Idle,
                entered_at: started_at,
            }],
            failure: None,
            rollback_error: None,
            warnings: Diagnostics::default(),
            cancel_requested: false,
            requires_reconciliation: false,
        }
    }

    /// Apply an event through the transition table.
    pub fn advance(&mut self, event: StageEvent) -> Result<Stage, DeployError> {
        let next = self
            .stage
            .next(event)
            .ok_or(DeployError::InvalidTransition {
                from: self.stage,
                event,
            })?;

        let now = Utc::now();
        tracing::info!(attempt = %self.id, "{} --{}--> {}", self.stage, event, next);
        self.stage = next;
        self.history.push(StageRecord {
            stage: next,
            entered_at: now,
        });
        self.outcome = Outcome::for_stage(next);
        if next.is_terminal() {
            self.ended_at = Some(now);
        }
        Ok(next)
    }

    /// Record why the current stage failed. The first cause wins.
    pub fn record_failure(&mut self, kind: FailureKind, reason: impl Into<String>) {
        if self.failure.is_none() {
            self.failure = Some(StageFailure {
                stage: self.stage,
                kind,
                reason: reason.into(),
            });
        }
    }

    pub fn warn(&mut self, warning: Warning) {
        self.warnings.warn(warning);
    }

    pub fn is_terminal(&self) -> bool {
        self.outcome.is_terminal()
    }

    /// Stages visited so far, oldest first.
    pub fn stages(&self) -> Vec<Stage> {
        self.history.iter().map(|r| r.stage).collect()
    }

    /// Close out an attempt whose driver died. Traffic state is unknown.
    pub fn mark_interrupted(&mut self, reason: impl Into<String>) {
        if self.is_terminal() {
            return;
        }
        let now = Utc::now();
        self.record_failure(FailureKind::Interrupted, reason);
        self.requires_reconciliation = true;
        self.stage = Stage::Failed;
        self.history.push(StageRecord {
            stage: Stage::Failed,
            entered_at: now,
        });
        self.outcome = Outcome::Failed;
        self.ended_at = Some(now);
    }
}
