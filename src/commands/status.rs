// ABOUTME: Status command implementation.
// ABOUTME: Shows the target's active color and an attempt record.

use kuapo::config::Config;
use kuapo::error::{Error, Result};
use kuapo::output::Output;
use kuapo::store::{FileStateStore, StateStore};
use kuapo::types::{AttemptId, display_color};

use super::context::build_orchestrator;

pub async fn status(config: Config, attempt: Option<String>, output: Output) -> Result<()> {
    let store = FileStateStore::new(config.state_dir.clone());
    let state = store.load_target(&config.target).await?;

    output.progress(&format!(
        "Active:   {}",
        display_color(&state.active_color)
    ));
    if let Some(reason) = &state.reconciliation_required {
        output.warning(&format!(
            "{} is blocked until `kuapo reconcile`: {}",
            config.target, reason
        ));
    }

    let orchestrator = build_orchestrator(&config);
    let attempt = match attempt {
        Some(id) => {
            let id = AttemptId::parse(&config.target, &id)?;
            orchestrator.status(&id).await?
        }
        None => orchestrator
            .latest()
            .await?
            .ok_or_else(|| Error::NoAttempts(config.target.to_string()))?,
    };

    output.attempt(&attempt);
    Ok(())
}
