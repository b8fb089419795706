// ABOUTME: Single-instance health prober with retries and exponential backoff.
// ABOUTME: A whole probe cycle is bounded by the per-instance timeout.

use nonempty::NonEmpty;
use std::time::Duration;

use crate::config::HealthcheckConfig;
use crate::types::HealthState;

use super::check::{HttpCheck, ProbeError};

/// How an instance is probed.
#[derive(Debug, Clone)]
pub struct ProbePolicy {
    pub path: String,
    pub expected_status: NonEmpty<u16>,
    pub probe_timeout: Duration,
    pub retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl ProbePolicy {
    pub fn accepts(&self, status: u16) -> bool {
        self.expected_status.iter().any(|s| *s == status)
    }
}

impl From<&HealthcheckConfig> for ProbePolicy {
    fn from(config: &HealthcheckConfig) -> Self {
        Self {
            path: config.path.clone(),
            expected_status: config.expected_status.clone(),
            probe_timeout: config.probe_timeout,
            retries: config.retries,
            initial_backoff: config.initial_backoff,
            max_backoff: config.max_backoff,
        }
    }
}

/// Result of one probe cycle against a single instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub health: HealthState,
    pub attempts: u32,
    pub last_error: Option<String>,
}

/// Double the backoff, capped at `max`.
pub fn next_backoff(current: Duration, max: Duration) -> Duration {
    current.saturating_mul(2).min(max)
}

/// Probe one instance until it is healthy, retries run out, or
/// `instance_timeout` elapses.
pub async fn probe_instance<C: HttpCheck + ?Sized>(
    checker: &C,
    address: &str,
    policy: &ProbePolicy,
    instance_timeout: Duration,
) -> ProbeOutcome {
    let mut attempts = 0u32;
    let mut last_error: Option<String> = None;

    let cycle = tokio::time::timeout(instance_timeout, async {
        let mut backoff = policy.initial_backoff;

        loop {
            attempts += 1;

            let result =
                tokio::time::timeout(policy.probe_timeout, checker.get_status(address, &policy.path))
                    .await
                    .unwrap_or(Err(ProbeError::Timeout(policy.probe_timeout)));

            match result {
                Ok(status) if policy.accepts(status) => return HealthState::Healthy,
                Ok(status) => {
                    last_error = Some(format!("unexpected status {status}"));
                }
                Err(e) => {
                    last_error = Some(e.to_string());
                }
            }

            if attempts > policy.retries {
                return HealthState::Unhealthy;
            }

            tracing::debug!(
                "probe {} of {} failed ({}), retrying in {:?}",
                attempts,
                address,
                last_error.as_deref().unwrap_or("unknown"),
                backoff
            );
            tokio::time::sleep(backoff).await;
            backoff = next_backoff(backoff, policy.max_backoff);
        }
    })
    .await;

    let health = match cycle {
        Ok(health) => health,
        Err(_elapsed) => {
            last_error = Some(match last_error {
                Some(e) => format!("timed out after {instance_timeout:?} (last error: {e})"),
                None => format!("timed out after {instance_timeout:?}"),
            });
            HealthState::Unhealthy
        }
    };

    if health == HealthState::Healthy {
        last_error = None;
    }

    ProbeOutcome {
        health,
        attempts,
        last_error,
    }
}
