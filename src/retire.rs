// ABOUTME: Retirement manager for the fleet that no longer receives traffic.
// ABOUTME: Waits out the grace period, then deprovisions or scales to zero.

use std::time::Duration;
use thiserror::Error;

use crate::config::RetireMode;
use crate::provision::{ProvisionError, Provisioner};
use crate::types::Color;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("failed to retire {color} fleet: {source}")]
pub struct RetireError {
    pub color: Color,
    #[source]
    pub source: ProvisionError,
}

pub struct RetirementManager<'a, P: ?Sized> {
    provisioner: &'a P,
    mode: RetireMode,
    timeout: Duration,
}

impl<'a, P: Provisioner + ?Sized> RetirementManager<'a, P> {
    pub fn new(provisioner: &'a P, mode: RetireMode, timeout: Duration) -> Self {
        Self {
            provisioner,
            mode,
            timeout,
        }
    }

    /// Retire a color's fleet after `grace_period` lets in-flight requests drain.
    pub async fn retire(&self, color: Color, grace_period: Duration) -> Result<(), RetireError> {
        if !grace_period.is_zero() {
            tracing::info!("waiting {:?} before retiring {} fleet", grace_period, color);
            tokio::time::sleep(grace_period).await;
        }

        let result = match self.mode {
            RetireMode::Deprovision => {
                tokio::time::timeout(self.timeout, self.provisioner.deprovision(color)).await
            }
            RetireMode::ScaleToZero => {
                tokio::time::timeout(self.timeout, async {
                    self.provisioner.ensure_fleet(color, 0).await.map(|_| ())
                })
                .await
            }
        };

        result
            .unwrap_or(Err(ProvisionError::Timeout(self.timeout)))
            .map_err(|source| RetireError { color, source })?;

        tracing::info!("retired {} fleet ({:?})", color, self.mode);
        Ok(())
    }
}
