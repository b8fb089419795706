// ABOUTME: Builds the orchestrator and its command-backed collaborators from config.
// ABOUTME: Shared by every command that touches deployment state.

use kuapo::config::Config;
use kuapo::deploy::{DeploySettings, Orchestrator};
use kuapo::error::Result;
use kuapo::external::{CommandProvisioner, CommandTrafficDirector};
use kuapo::health::HttpChecker;
use kuapo::store::FileStateStore;
use std::path::Path;
use std::sync::Arc;

pub type CliOrchestrator =
    Orchestrator<CommandProvisioner, CommandTrafficDirector, FileStateStore, HttpChecker>;

/// Discover the config and resolve an optional target override.
pub fn load_config(dir: &Path, target: Option<&str>) -> Result<Config> {
    let config = Config::discover(dir)?;
    match target {
        Some(name) => config.for_target(name),
        None => Ok(config),
    }
}

pub fn build_orchestrator(config: &Config) -> CliOrchestrator {
    let target = config.target.clone();
    Orchestrator::new(
        target.clone(),
        DeploySettings::from_config(config),
        Arc::new(CommandProvisioner::new(
            target.clone(),
            config.provisioner.clone(),
        )),
        Arc::new(CommandTrafficDirector::new(target, config.traffic.clone())),
        Arc::new(FileStateStore::new(config.state_dir.clone())),
        Arc::new(HttpChecker::new().with_user_agent(concat!("kuapo/", env!("CARGO_PKG_VERSION")))),
    )
}
