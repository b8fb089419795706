// ABOUTME: Fleet and instance types for one color's set of instances.
// ABOUTME: Instance health is only mutated by the health prober.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Color;

/// Last observed health of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    #[default]
    Unknown,
    Healthy,
    Unhealthy,
}

/// A single provisioned instance, addressed as `host:port`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub address: String,
    pub color: Color,
    pub last_health: HealthState,
    pub last_checked_at: Option<DateTime<Utc>>,
}

impl Instance {
    pub fn new(address: impl Into<String>, color: Color) -> Self {
        Self {
            address: address.into(),
            color,
            last_health: HealthState::Unknown,
            last_checked_at: None,
        }
    }

    /// Record the outcome of a health check cycle.
    pub(crate) fn record_health(&mut self, health: HealthState) {
        self.last_health = health;
        self.last_checked_at = Some(Utc::now());
    }
}

/// The instances belonging to one color, as reported by the provisioner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fleet {
    pub color: Color,
    pub instances: Vec<Instance>,
    pub desired_size: usize,
}

impl Fleet {
    pub fn new(color: Color, addresses: Vec<String>, desired_size: usize) -> Self {
        Self {
            color,
            instances: addresses
                .into_iter()
                .map(|address| Instance::new(address, color))
                .collect(),
            desired_size,
        }
    }

    /// Instance addresses in fleet order.
    pub fn addresses(&self) -> Vec<String> {
        self.instances.iter().map(|i| i.address.clone()).collect()
    }

    /// Whether the provisioner delivered at least the desired size.
    pub fn is_complete(&self) -> bool {
        !self.instances.is_empty() && self.instances.len() >= self.desired_size
    }
}
