// ABOUTME: Deploy command implementation.
// ABOUTME: Runs one attempt with Ctrl-C cancellation and hook notifications.

use kuapo::config::Config;
use kuapo::deploy::{Outcome, cancel_pair};
use kuapo::error::{Error, Result};
use kuapo::notify::{HookNotifier, LogNotifier, MultiNotifier, spawn_dispatcher};
use kuapo::output::Output;
use kuapo::types::Color;
use std::path::Path;

use super::context::build_orchestrator;

/// Deploy `color` to the configured target.
pub async fn deploy(
    config: Config,
    color: Color,
    force: bool,
    project_dir: &Path,
    mut output: Output,
) -> Result<()> {
    output.start_timer();

    let mut notifier = MultiNotifier::new().with(LogNotifier);
    if config.notify.hooks {
        notifier = notifier.with(HookNotifier::new(project_dir));
    }
    let (notify, dispatcher) = spawn_dispatcher(notifier, config.notify.timeout);

    let orchestrator = build_orchestrator(&config)
        .with_notifier(notify)
        .force_unlock(force);

    output.progress(&format!("Deploying {} to {}", color, config.target));

    let (cancel, token) = cancel_pair();
    let result = {
        let run = orchestrator.deploy_with_cancel(color, token);
        tokio::pin!(run);
        tokio::select! {
            result = &mut run => result,
            Ok(()) = tokio::signal::ctrl_c() => {
                output.warning("Cancellation requested, waiting for the current stage to finish");
                cancel.cancel();
                run.await
            }
        }
    };

    // Dropping the orchestrator closes the queue so pending notifications drain.
    drop(orchestrator);
    if let Err(e) = dispatcher.await {
        tracing::warn!("notification dispatcher stopped abnormally: {}", e);
    }

    match result {
        Ok(attempt) => {
            output.attempt(&attempt);
            if attempt.outcome == Outcome::Succeeded {
                output.success(&format!("{} is live on {}", color, config.target));
                Ok(())
            } else {
                Err(Error::AttemptUnsuccessful(attempt.outcome.to_string()))
            }
        }
        Err(e) if e.is_noop() => {
            output.success(&format!(
                "{} is already live on {}, nothing to do",
                color, config.target
            ));
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
