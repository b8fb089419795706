// ABOUTME: Traffic Director trait: the load balancer's registration and switch API.
// ABOUTME: The orchestrator never touches routing except through this trait.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::types::Color;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DirectorError {
    #[error("traffic director failed: {0}")]
    Failed(String),

    #[error("traffic director timed out after {0:?}")]
    Timeout(Duration),
}

#[async_trait]
pub trait TrafficDirector: Send + Sync {
    /// Register instances as backends for a color.
    async fn register_targets(&self, color: Color, instances: &[String])
    -> Result<(), DirectorError>;

    /// Remove instances from a color's backends.
    async fn deregister_targets(
        &self,
        color: Color,
        instances: &[String],
    ) -> Result<(), DirectorError>;

    /// Route live traffic to a color.
    async fn activate_color(&self, color: Color) -> Result<(), DirectorError>;

    /// Color currently receiving live traffic, if any.
    async fn current_active_color(&self) -> Result<Option<Color>, DirectorError>;
}
