// ABOUTME: Instance health probing and fleet-level readiness aggregation.
// ABOUTME: Exports the HTTP check seam, the retrying prober, and the fleet aggregator.

mod aggregator;
mod check;
mod prober;

pub use aggregator::{FleetHealth, InstanceHealth, check_fleet};
pub use check::{HttpCheck, HttpChecker, ProbeError};
pub use prober::{ProbeOutcome, ProbePolicy, next_backoff, probe_instance};
