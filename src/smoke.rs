// ABOUTME: Smoke test runner executing read-only endpoint checks against a fleet.
// ABOUTME: Stops at the first failure per instance but always checks every instance.

use futures::future::join_all;
use nonempty::NonEmpty;
use serde::Serialize;
use std::time::Duration;

use crate::config::SmokeTestConfig;
use crate::health::{HttpCheck, ProbeError};
use crate::types::Instance;

/// A single check: GET `path`, expect a status in `expect`.
#[derive(Debug, Clone)]
pub struct SmokeCheck {
    pub path: String,
    pub expect: NonEmpty<u16>,
}

/// Ordered battery of checks applied to every instance.
#[derive(Debug, Clone)]
pub struct SmokeSuite {
    pub checks: Vec<SmokeCheck>,
    /// Bound on each individual check.
    pub timeout: Duration,
}

impl From<&SmokeTestConfig> for SmokeSuite {
    fn from(config: &SmokeTestConfig) -> Self {
        Self {
            checks: config
                .checks
                .iter()
                .map(|c| SmokeCheck {
                    path: c.path.clone(),
                    expect: c.expect.clone(),
                })
                .collect(),
            timeout: config.timeout,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SmokeFailure {
    pub instance: String,
    pub test: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SmokeReport {
    pub passed: bool,
    pub failures: Vec<SmokeFailure>,
}

impl SmokeReport {
    pub fn summary(&self) -> String {
        if self.passed {
            return "all smoke tests passed".to_string();
        }
        let details: Vec<String> = self
            .failures
            .iter()
            .map(|f| format!("{} {}: {}", f.instance, f.test, f.reason))
            .collect();
        format!(
            "{} smoke test failure(s): {}",
            self.failures.len(),
            details.join("; ")
        )
    }
}

/// Run the suite against every instance concurrently.
pub async fn run_smoke_tests<C: HttpCheck + ?Sized>(
    checker: &C,
    instances: &[Instance],
    suite: &SmokeSuite,
) -> SmokeReport {
    let per_instance = instances
        .iter()
        .map(|instance| run_instance(checker, &instance.address, suite));

    let failures: Vec<SmokeFailure> = join_all(per_instance).await.into_iter().flatten().collect();

    SmokeReport {
        passed: failures.is_empty(),
        failures,
    }
}

async fn run_instance<C: HttpCheck + ?Sized>(
    checker: &C,
    address: &str,
    suite: &SmokeSuite,
) -> Option<SmokeFailure> {
    for check in &suite.checks {
        let result = tokio::time::timeout(suite.timeout, checker.get_status(address, &check.path))
            .await
            .unwrap_or(Err(ProbeError::Timeout(suite.timeout)));

        let reason = match result {
            Ok(status) if check.expect.iter().any(|s| *s == status) => continue,
            Ok(status) => format!(
                "unexpected status {} (expected one of {:?})",
                status,
                check.expect.iter().collect::<Vec<_>>()
            ),
            Err(e) => e.to_string(),
        };

        tracing::debug!("smoke test {} failed on {}: {}", check.path, address, reason);
        return Some(SmokeFailure {
            instance: address.to_string(),
            test: check.path.clone(),
            reason,
        });
    }
    None
}
