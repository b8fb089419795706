// ABOUTME: Config scaffolding for new projects.
// ABOUTME: Creates kuapo.yml template files.

use std::path::Path;

use crate::error::{Error, Result};
use crate::types::TargetName;

use super::{CONFIG_FILENAME, Config};

const DEFAULT_TARGET: &str = "web-prod";

pub fn init_config(dir: &Path, target: Option<&str>, force: bool) -> Result<()> {
    let config_path = dir.join(CONFIG_FILENAME);

    if config_path.exists() && !force {
        return Err(Error::AlreadyExists(config_path));
    }

    let target = TargetName::new(target.unwrap_or(DEFAULT_TARGET))
        .map_err(|e| Error::InvalidConfig(e.to_string()))?;
    let config = Config::template(target);

    let yaml = generate_template_yaml(&config);
    std::fs::write(&config_path, yaml)?;

    Ok(())
}

fn generate_template_yaml(config: &Config) -> String {
    format!(
        r#"target: {}
fleet_size: {}

health:
  path: {}
  expected_status: [200]
  retries: {}
  deadline: 5m

verify:
  deadline: 2m
  # live_endpoint: lb.example.com:80

smoke_tests:
  timeout: 5s
  checks:
    - path: /
      expect: [200]

retire:
  grace_period: 30s
  mode: deprovision   # or scale-to-zero

# Commands receive KUAPO_TARGET, KUAPO_COLOR, KUAPO_DESIRED_SIZE and
# KUAPO_INSTANCES in their environment. `ensure` prints instance addresses.
provisioner:
  ensure: ./infra/ensure-fleet.sh
  deprovision: ./infra/deprovision-fleet.sh

traffic:
  register: ./infra/lb.sh register
  deregister: ./infra/lb.sh deregister
  activate: ./infra/lb.sh activate
  current: ./infra/lb.sh current
"#,
        config.target, config.fleet_size, config.health.path, config.health.retries,
    )
}
