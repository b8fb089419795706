// ABOUTME: Explicit orchestrator settings resolved from configuration.
// ABOUTME: The orchestrator reads nothing from the environment at run time.

use std::time::Duration;

use crate::config::{Config, RetireMode};
use crate::health::ProbePolicy;
use crate::smoke::SmokeSuite;

/// Timeouts, deadlines and stage options for one target.
#[derive(Debug, Clone)]
pub struct DeploySettings {
    pub fleet_size: usize,
    pub probe: ProbePolicy,
    /// Per-instance bound for a probe cycle.
    pub instance_timeout: Duration,
    /// Fleet readiness deadline before the switch.
    pub health_deadline: Duration,
    /// Re-verification deadline after the switch.
    pub verify_deadline: Duration,
    /// Public address probed alongside the fleet during verification.
    pub live_endpoint: Option<String>,
    pub smoke_suite: SmokeSuite,
    pub grace_period: Duration,
    pub retire_mode: RetireMode,
    pub provision_timeout: Duration,
    pub traffic_timeout: Duration,
}

impl DeploySettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            fleet_size: config.fleet_size,
            probe: ProbePolicy::from(&config.health),
            instance_timeout: config.health.instance_timeout,
            health_deadline: config.health.deadline,
            verify_deadline: config.verify.deadline,
            live_endpoint: config.verify.live_endpoint.clone(),
            smoke_suite: SmokeSuite::from(&config.smoke_tests),
            grace_period: config.retire.grace_period,
            retire_mode: config.retire.mode,
            provision_timeout: config.provisioner.timeout,
            traffic_timeout: config.traffic.timeout,
        }
    }
}
