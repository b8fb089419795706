// ABOUTME: Reconcile command implementation.
// ABOUTME: Records the load balancer's live color and clears the block flag.

use kuapo::config::Config;
use kuapo::error::Result;
use kuapo::output::Output;
use kuapo::types::display_color;

use super::context::build_orchestrator;

pub async fn reconcile(config: Config, mut output: Output) -> Result<()> {
    output.start_timer();
    output.progress(&format!("Reading live color for {}...", config.target));

    let live = build_orchestrator(&config).reconcile().await?;

    output.success(&format!(
        "{} reconciled, live color is {}",
        config.target,
        display_color(&live)
    ));
    Ok(())
}
