// ABOUTME: Provisioner implementation that shells out to infrastructure scripts.
// ABOUTME: The ensure command prints instance addresses as JSON or one per line.

use async_trait::async_trait;

use crate::config::ProvisionerConfig;
use crate::provision::{ProvisionError, Provisioner};
use crate::types::{Color, TargetName};

use super::runner::run_command;

pub struct CommandProvisioner {
    target: TargetName,
    config: ProvisionerConfig,
}

impl CommandProvisioner {
    pub fn new(target: TargetName, config: ProvisionerConfig) -> Self {
        Self { target, config }
    }
}

#[async_trait]
impl Provisioner for CommandProvisioner {
    async fn ensure_fleet(
        &self,
        color: Color,
        desired_size: usize,
    ) -> Result<Vec<String>, ProvisionError> {
        let env = [
            ("KUAPO_TARGET", self.target.to_string()),
            ("KUAPO_COLOR", color.to_string()),
            ("KUAPO_DESIRED_SIZE", desired_size.to_string()),
        ];
        let stdout = run_command(&self.config.ensure, &env)
            .await
            .map_err(|e| ProvisionError::Failed(e.to_string()))?;
        parse_instances(&stdout).map_err(ProvisionError::Failed)
    }

    async fn deprovision(&self, color: Color) -> Result<(), ProvisionError> {
        let env = [
            ("KUAPO_TARGET", self.target.to_string()),
            ("KUAPO_COLOR", color.to_string()),
        ];
        run_command(&self.config.deprovision, &env)
            .await
            .map(|_| ())
            .map_err(|e| ProvisionError::Failed(e.to_string()))
    }
}

/// Parse instance addresses from a JSON array or newline-separated list.
pub fn parse_instances(stdout: &str) -> Result<Vec<String>, String> {
    let trimmed = stdout.trim();
    if trimmed.starts_with('[') {
        return serde_json::from_str::<Vec<String>>(trimmed)
            .map_err(|e| format!("invalid instance list: {e}"));
    }
    Ok(trimmed
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}
