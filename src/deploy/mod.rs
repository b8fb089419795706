// ABOUTME: Deployment orchestration as an explicit, persisted state machine.
// ABOUTME: Exports the orchestrator, attempt records, stages and settings.

mod attempt;
mod cancel;
mod error;
mod orchestrator;
mod settings;
mod stage;

pub use attempt::{DeploymentAttempt, FailureKind, Outcome, StageFailure, StageRecord};
pub use cancel::{CancelHandle, CancelToken, cancel_pair};
pub use error::{DeployError, DeployErrorKind};
pub use orchestrator::Orchestrator;
pub use settings::DeploySettings;
pub use stage::{Stage, StageEvent};
