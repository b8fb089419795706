// ABOUTME: Configuration types and parsing for kuapo.yml.
// ABOUTME: Handles YAML parsing, discovery, and per-target override merging.

mod command;
mod deserialize;
mod health;
mod init;
mod stages;

pub use command::CommandSpec;
pub use health::{HealthcheckConfig, VerifyConfig};
pub use init::init_config;
pub use stages::{
    NotifyConfig, ProvisionerConfig, RetireConfig, RetireMode, SmokeCheckConfig, SmokeTestConfig,
    TrafficConfig,
};

use crate::error::{Error, Result};
use crate::types::TargetName;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const CONFIG_FILENAME: &str = "kuapo.yml";
pub const CONFIG_FILENAME_ALT: &str = "kuapo.yaml";
pub const CONFIG_FILENAME_DIR: &str = ".kuapo/config.yml";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Default deployment target.
    pub target: TargetName,

    #[serde(default = "default_fleet_size")]
    pub fleet_size: usize,

    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    #[serde(default)]
    pub health: HealthcheckConfig,

    #[serde(default)]
    pub verify: VerifyConfig,

    #[serde(default)]
    pub smoke_tests: SmokeTestConfig,

    #[serde(default)]
    pub retire: RetireConfig,

    pub provisioner: ProvisionerConfig,

    pub traffic: TrafficConfig,

    #[serde(default)]
    pub notify: NotifyConfig,

    /// Named targets that override parts of the base config.
    #[serde(default)]
    pub targets: HashMap<String, TargetOverrides>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TargetOverrides {
    #[serde(default)]
    pub fleet_size: Option<usize>,

    #[serde(default)]
    pub health: Option<HealthcheckConfig>,

    #[serde(default)]
    pub verify: Option<VerifyConfig>,

    #[serde(default)]
    pub smoke_tests: Option<SmokeTestConfig>,

    #[serde(default)]
    pub retire: Option<RetireConfig>,

    #[serde(default)]
    pub provisioner: Option<ProvisionerConfig>,

    #[serde(default)]
    pub traffic: Option<TrafficConfig>,
}

fn default_fleet_size() -> usize {
    2
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".kuapo/state")
}

impl Config {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn discover(dir: &Path) -> Result<Self> {
        let candidates = [
            dir.join(CONFIG_FILENAME),
            dir.join(CONFIG_FILENAME_ALT),
            dir.join(CONFIG_FILENAME_DIR),
        ];

        for path in &candidates {
            if path.exists() {
                let mut config = Self::load(path)?;
                if config.state_dir.is_relative() {
                    config.state_dir = dir.join(&config.state_dir);
                }
                return Ok(config);
            }
        }

        Err(Error::ConfigNotFound(dir.to_path_buf()))
    }

    /// Resolve the config for a named target.
    ///
    /// The base target resolves to itself; other names must appear under
    /// `targets` and replace whole sections they specify.
    pub fn for_target(&self, name: &str) -> Result<Config> {
        if name == self.target.as_str() {
            return Ok(self.clone());
        }

        let overrides = self
            .targets
            .get(name)
            .ok_or_else(|| Error::UnknownTarget(name.to_string()))?;

        let mut merged = self.clone();
        merged.target =
            TargetName::new(name).map_err(|e| Error::InvalidConfig(format!("{name}: {e}")))?;

        if let Some(size) = overrides.fleet_size {
            merged.fleet_size = size;
        }
        if let Some(ref health) = overrides.health {
            merged.health = health.clone();
        }
        if let Some(ref verify) = overrides.verify {
            merged.verify = verify.clone();
        }
        if let Some(ref smoke) = overrides.smoke_tests {
            merged.smoke_tests = smoke.clone();
        }
        if let Some(ref retire) = overrides.retire {
            merged.retire = retire.clone();
        }
        if let Some(ref provisioner) = overrides.provisioner {
            merged.provisioner = provisioner.clone();
        }
        if let Some(ref traffic) = overrides.traffic {
            merged.traffic = traffic.clone();
        }

        merged.validate()?;
        Ok(merged)
    }

    fn validate(&self) -> Result<()> {
        if self.fleet_size == 0 {
            return Err(Error::InvalidConfig(
                "fleet_size must be at least 1".to_string(),
            ));
        }
        if !self.health.path.starts_with('/') {
            return Err(Error::InvalidConfig(format!(
                "health.path must start with '/': {}",
                self.health.path
            )));
        }
        for check in &self.smoke_tests.checks {
            if !check.path.starts_with('/') {
                return Err(Error::InvalidConfig(format!(
                    "smoke test path must start with '/': {}",
                    check.path
                )));
            }
        }
        for (name, overrides) in &self.targets {
            TargetName::new(name).map_err(|e| Error::InvalidConfig(format!("{name}: {e}")))?;
            if overrides.fleet_size == Some(0) {
                return Err(Error::InvalidConfig(format!(
                    "targets.{name}.fleet_size must be at least 1"
                )));
            }
        }
        Ok(())
    }

    /// Starter config for `target`, written by `kuapo init`.
    pub fn template(target: TargetName) -> Self {
        Config {
            target,
            fleet_size: 3,
            state_dir: default_state_dir(),
            health: HealthcheckConfig::default(),
            verify: VerifyConfig::default(),
            smoke_tests: SmokeTestConfig::default(),
            retire: RetireConfig::default(),
            provisioner: ProvisionerConfig {
                ensure: CommandSpec::shell("./infra/ensure-fleet.sh"),
                deprovision: CommandSpec::shell("./infra/deprovision-fleet.sh"),
                timeout: stages::default_provision_timeout(),
            },
            traffic: TrafficConfig {
                register: CommandSpec::shell("./infra/lb.sh register"),
                deregister: CommandSpec::shell("./infra/lb.sh deregister"),
                activate: CommandSpec::shell("./infra/lb.sh activate"),
                current: CommandSpec::shell("./infra/lb.sh current"),
                timeout: stages::default_traffic_timeout(),
            },
            notify: NotifyConfig::default(),
            targets: HashMap::new(),
        }
    }
}
