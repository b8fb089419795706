// ABOUTME: Provisioner seam for standing up and tearing down a color's fleet.
// ABOUTME: Implemented outside the core (see external::CommandProvisioner).

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::types::Color;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProvisionError {
    #[error("provisioner failed: {0}")]
    Failed(String),

    #[error("provisioner timed out after {0:?}")]
    Timeout(Duration),
}

/// Creates, resizes, and destroys the instance fleet for a color.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Bring the color's fleet to `desired_size` and return instance addresses.
    ///
    /// Idempotent: an already-converged fleet just reports its instances.
    async fn ensure_fleet(
        &self,
        color: Color,
        desired_size: usize,
    ) -> Result<Vec<String>, ProvisionError>;

    /// Remove the color's fleet entirely.
    async fn deprovision(&self, color: Color) -> Result<(), ProvisionError>;
}
