// ABOUTME: Configuration for smoke tests, retirement, collaborators, and notifications.
// ABOUTME: Every external call carries its own timeout.

use nonempty::NonEmpty;
use serde::Deserialize;
use std::time::Duration;

use super::CommandSpec;

#[derive(Debug, Clone, Deserialize)]
pub struct SmokeTestConfig {
    /// Bound on each individual check.
    #[serde(default = "default_smoke_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    #[serde(default)]
    pub checks: Vec<SmokeCheckConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmokeCheckConfig {
    pub path: String,

    #[serde(
        default = "default_expect",
        deserialize_with = "super::deserialize::deserialize_status_set"
    )]
    pub expect: NonEmpty<u16>,
}

fn default_smoke_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_expect() -> NonEmpty<u16> {
    NonEmpty::new(200)
}

impl Default for SmokeTestConfig {
    fn default() -> Self {
        Self {
            timeout: default_smoke_timeout(),
            checks: Vec::new(),
        }
    }
}

/// How a retired fleet is taken down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RetireMode {
    #[default]
    Deprovision,
    ScaleToZero,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetireConfig {
    #[serde(default = "default_grace_period", with = "humantime_serde")]
    pub grace_period: Duration,

    #[serde(default)]
    pub mode: RetireMode,
}

fn default_grace_period() -> Duration {
    Duration::from_secs(30)
}

impl Default for RetireConfig {
    fn default() -> Self {
        Self {
            grace_period: default_grace_period(),
            mode: RetireMode::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProvisionerConfig {
    pub ensure: CommandSpec,
    pub deprovision: CommandSpec,

    #[serde(default = "default_provision_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

pub(super) fn default_provision_timeout() -> Duration {
    Duration::from_secs(30 * 60)
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrafficConfig {
    pub register: CommandSpec,
    pub deregister: CommandSpec,
    pub activate: CommandSpec,
    pub current: CommandSpec,

    #[serde(default = "default_traffic_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

pub(super) fn default_traffic_timeout() -> Duration {
    Duration::from_secs(60)
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotifyConfig {
    /// Run `.kuapo/hooks/on-<event>` scripts.
    #[serde(default = "default_hooks")]
    pub hooks: bool,

    #[serde(default = "default_notify_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

fn default_hooks() -> bool {
    true
}

fn default_notify_timeout() -> Duration {
    Duration::from_secs(10)
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            hooks: default_hooks(),
            timeout: default_notify_timeout(),
        }
    }
}
