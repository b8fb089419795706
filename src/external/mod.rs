// ABOUTME: Provisioner and Traffic Director backed by operator-supplied commands.
// ABOUTME: Context is passed to commands through KUAPO_* environment variables.

mod director;
mod provisioner;
mod runner;

pub use director::{CommandTrafficDirector, parse_color};
pub use provisioner::{CommandProvisioner, parse_instances};
pub use runner::{CommandError, run_command};
