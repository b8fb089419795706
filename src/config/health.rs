// ABOUTME: Health probe and post-switch verification configuration.
// ABOUTME: Defines HTTP health check parameters with sensible defaults.

use nonempty::NonEmpty;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct HealthcheckConfig {
    #[serde(default = "default_path")]
    pub path: String,

    #[serde(
        default = "default_expected_status",
        deserialize_with = "super::deserialize::deserialize_status_set"
    )]
    pub expected_status: NonEmpty<u16>,

    /// Bound on a single probe request.
    #[serde(default = "default_probe_timeout", with = "humantime_serde")]
    pub probe_timeout: Duration,

    /// Retries after the first failed probe.
    #[serde(default = "default_retries")]
    pub retries: u32,

    #[serde(default = "default_initial_backoff", with = "humantime_serde")]
    pub initial_backoff: Duration,

    #[serde(default = "default_max_backoff", with = "humantime_serde")]
    pub max_backoff: Duration,

    /// Bound on one instance's whole retry cycle.
    #[serde(default = "default_instance_timeout", with = "humantime_serde")]
    pub instance_timeout: Duration,

    /// Overall deadline for the fleet before switching.
    #[serde(default = "default_deadline", with = "humantime_serde")]
    pub deadline: Duration,
}

fn default_path() -> String {
    "/health".to_string()
}

fn default_expected_status() -> NonEmpty<u16> {
    NonEmpty::new(200)
}

fn default_probe_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_retries() -> u32 {
    5
}

fn default_initial_backoff() -> Duration {
    Duration::from_secs(1)
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(10)
}

fn default_instance_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_deadline() -> Duration {
    Duration::from_secs(300)
}

impl Default for HealthcheckConfig {
    fn default() -> Self {
        Self {
            path: default_path(),
            expected_status: default_expected_status(),
            probe_timeout: default_probe_timeout(),
            retries: default_retries(),
            initial_backoff: default_initial_backoff(),
            max_backoff: default_max_backoff(),
            instance_timeout: default_instance_timeout(),
            deadline: default_deadline(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct VerifyConfig {
    /// Overall deadline for post-switch verification.
    #[serde(default = "default_verify_deadline", with = "humantime_serde")]
    pub deadline: Duration,

    /// Public load balancer address probed alongside the fleet.
    #[serde(default)]
    pub live_endpoint: Option<String>,
}

fn default_verify_deadline() -> Duration {
    Duration::from_secs(120)
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            deadline: default_verify_deadline(),
            live_endpoint: None,
        }
    }
}
