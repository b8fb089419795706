// ABOUTME: Traffic Director implementation backed by load balancer commands.
// ABOUTME: The current command prints blue, green, or nothing.

use async_trait::async_trait;

use crate::config::{CommandSpec, TrafficConfig};
use crate::traffic::{DirectorError, TrafficDirector};
use crate::types::{Color, ParseColorError, TargetName};

use super::runner::run_command;

pub struct CommandTrafficDirector {
    target: TargetName,
    config: TrafficConfig,
}

impl CommandTrafficDirector {
    pub fn new(target: TargetName, config: TrafficConfig) -> Self {
        Self { target, config }
    }

    async fn run(
        &self,
        spec: &CommandSpec,
        color: Option<Color>,
        instances: &[String],
    ) -> Result<String, DirectorError> {
        let mut env = vec![("KUAPO_TARGET", self.target.to_string())];
        if let Some(color) = color {
            env.push(("KUAPO_COLOR", color.to_string()));
        }
        if !instances.is_empty() {
            env.push(("KUAPO_INSTANCES", instances.join(",")));
        }
        run_command(spec, &env)
            .await
            .map_err(|e| DirectorError::Failed(e.to_string()))
    }
}

#[async_trait]
impl TrafficDirector for CommandTrafficDirector {
    async fn register_targets(
        &self,
        color: Color,
        instances: &[String],
    ) -> Result<(), DirectorError> {
        self.run(&self.config.register, Some(color), instances)
            .await
            .map(|_| ())
    }

    async fn deregister_targets(
        &self,
        color: Color,
        instances: &[String],
    ) -> Result<(), DirectorError> {
        self.run(&self.config.deregister, Some(color), instances)
            .await
            .map(|_| ())
    }

    async fn activate_color(&self, color: Color) -> Result<(), DirectorError> {
        self.run(&self.config.activate, Some(color), &[])
            .await
            .map(|_| ())
    }

    async fn current_active_color(&self) -> Result<Option<Color>, DirectorError> {
        let stdout = self.run(&self.config.current, None, &[]).await?;
        parse_color(&stdout).map_err(|e| DirectorError::Failed(e.to_string()))
    }
}

/// Parse the `current` command's output. Empty or `none` means no color is live.
pub fn parse_color(stdout: &str) -> Result<Option<Color>, ParseColorError> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("none") {
        return Ok(None);
    }
    trimmed.parse().map(Some)
}
