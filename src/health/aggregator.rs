// ABOUTME: Fleet health aggregation across all instances of one color.
// ABOUTME: Probes run concurrently; anything unresolved at the deadline is unhealthy.

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use serde::Serialize;
use std::time::Duration;

use crate::types::{HealthState, Instance};

use super::check::HttpCheck;
use super::prober::{ProbeOutcome, ProbePolicy, probe_instance};

/// Health of one instance after an aggregation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceHealth {
    pub address: String,
    pub health: HealthState,
    pub attempts: u32,
    pub error: Option<String>,
}

/// Fleet-level readiness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FleetHealth {
    pub all_healthy: bool,
    pub results: Vec<InstanceHealth>,
}

impl FleetHealth {
    /// Addresses that did not report healthy.
    pub fn unhealthy(&self) -> Vec<&InstanceHealth> {
        self.results
            .iter()
            .filter(|r| r.health != HealthState::Healthy)
            .collect()
    }

    /// One-line description of the unhealthy instances.
    pub fn summary(&self) -> String {
        let unhealthy = self.unhealthy();
        if unhealthy.is_empty() {
            return format!("{} instance(s) healthy", self.results.len());
        }
        let details: Vec<String> = unhealthy
            .iter()
            .map(|r| match &r.error {
                Some(e) => format!("{} ({})", r.address, e),
                None => r.address.clone(),
            })
            .collect();
        format!(
            "{} of {} instance(s) unhealthy: {}",
            unhealthy.len(),
            self.results.len(),
            details.join(", ")
        )
    }
}

/// Probe every instance concurrently and update each `last_health`.
///
/// `all_healthy` is true only if every instance reported healthy before
/// `overall_deadline`. An empty fleet is never healthy.
pub async fn check_fleet<C: HttpCheck + ?Sized>(
    checker: &C,
    instances: &mut [Instance],
    policy: &ProbePolicy,
    per_instance_timeout: Duration,
    overall_deadline: Duration,
) -> FleetHealth {
    let deadline = tokio::time::Instant::now() + overall_deadline;
    let mut outcomes: Vec<Option<ProbeOutcome>> = vec![None; instances.len()];

    {
        let mut pending: FuturesUnordered<_> = instances
            .iter()
            .enumerate()
            .map(|(idx, instance)| {
                let address = instance.address.clone();
                async move {
                    let outcome =
                        probe_instance(checker, &address, policy, per_instance_timeout).await;
                    (idx, outcome)
                }
            })
            .collect();

        loop {
            match tokio::time::timeout_at(deadline, pending.next()).await {
                Ok(Some((idx, outcome))) => outcomes[idx] = Some(outcome),
                Ok(None) => break,
                Err(_elapsed) => {
                    tracing::warn!(
                        "fleet health deadline of {:?} reached with {} instance(s) unresolved",
                        overall_deadline,
                        pending.len()
                    );
                    break;
                }
            }
        }
    }

    let mut results = Vec::with_capacity(instances.len());
    for (instance, outcome) in instances.iter_mut().zip(outcomes) {
        let outcome = outcome.unwrap_or_else(|| ProbeOutcome {
            health: HealthState::Unhealthy,
            attempts: 0,
            last_error: Some(format!(
                "unresolved at fleet deadline of {overall_deadline:?}"
            )),
        });

        instance.record_health(outcome.health);
        results.push(InstanceHealth {
            address: instance.address.clone(),
            health: outcome.health,
            attempts: outcome.attempts,
            error: outcome.last_error,
        });
    }

    let all_healthy =
        !results.is_empty() && results.iter().all(|r| r.health == HealthState::Healthy);

    FleetHealth {
        all_healthy,
        results,
    }
}
