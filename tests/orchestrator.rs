// ABOUTME: Integration tests for the deployment orchestrator against in-memory fakes.
// ABOUTME: Covers the release scenarios, rejections, cancellation, and crash recovery.

mod support;

use async_trait::async_trait;
use chrono::Utc;
use kuapo::config::RetireMode;
use kuapo::deploy::{
    DeployError, DeploymentAttempt, FailureKind, Outcome, Stage, StageEvent, cancel_pair,
};
use kuapo::diagnostics::WarningKind;
use kuapo::notify::{Notification, NotifyError, NotifyEvent, Notifier, spawn_dispatcher};
use kuapo::store::{LockInfo, MemoryStateStore, StateStore, TargetState};
use kuapo::types::{AttemptId, Color};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use support::{
    FakeChecker, FakeDirector, FakeProvisioner, HANG, Harness, addresses, fast_settings, target,
};

async fn stored_state(h: &Harness) -> TargetState {
    h.store.load_target(&target()).await.unwrap()
}

/// Healthy green fleet replaces blue and blue is retired.
#[tokio::test]
async fn healthy_release_completes_and_retires_old_fleet() {
    let h = Harness::blue_live(3);

    let attempt = h.orchestrator.deploy(Color::Green).await.unwrap();

    assert_eq!(attempt.outcome, Outcome::Succeeded);
    assert_eq!(attempt.stage, Stage::Completed);
    assert_eq!(
        attempt.stages(),
        vec![
            Stage::Idle,
            Stage::ProvisioningTarget,
            Stage::HealthChecking,
            Stage::SmokeTesting,
            Stage::SwitchingTraffic,
            Stage::Verifying,
            Stage::RetiringOld,
            Stage::Completed,
        ]
    );
    assert!(attempt.failure.is_none());
    assert!(attempt.ended_at.is_some());

    assert_eq!(h.director.active(), Some(Color::Green));
    assert_eq!(h.director.registered(Color::Green), addresses(Color::Green, 3));
    assert_eq!(stored_state(&h).await.active_color, Some(Color::Green));
    assert!(h.provisioner.calls().contains(&"deprovision blue".to_string()));
    assert!(h.provisioner.fleet(Color::Blue).is_none());
    assert!(h.store.lock_holder(&target()).is_none());
}

/// One instance never becomes healthy; traffic is never touched.
#[tokio::test]
async fn unhealthy_instance_fails_without_touching_traffic() {
    let h = Harness::new(
        fast_settings(3),
        FakeProvisioner::new().with_fleet(Color::Blue, 3),
        FakeDirector::new(Some(Color::Blue)),
        FakeChecker::new().script("green-3:80", &[503]),
    );

    let attempt = h.orchestrator.deploy(Color::Green).await.unwrap();

    assert_eq!(attempt.outcome, Outcome::Failed);
    assert_eq!(
        attempt.stages(),
        vec![
            Stage::Idle,
            Stage::ProvisioningTarget,
            Stage::HealthChecking,
            Stage::RollingBack,
            Stage::Failed,
        ]
    );
    let failure = attempt.failure.unwrap();
    assert_eq!(failure.kind, FailureKind::HealthCheckTimeout);
    assert_eq!(failure.stage, Stage::HealthChecking);
    assert!(failure.reason.contains("green-3:80"));
    assert!(!attempt.requires_reconciliation);

    assert!(h.director.mutations().is_empty());
    assert_eq!(h.director.active(), Some(Color::Blue));
    assert_eq!(stored_state(&h).await.active_color, Some(Color::Blue));
    // Green stays up for inspection.
    assert_eq!(h.provisioner.fleet(Color::Green), Some(addresses(Color::Green, 3)));
    assert!(!h.provisioner.calls().iter().any(|c| c.starts_with("deprovision")));
}

/// Verification after the switch fails and traffic returns to blue.
#[tokio::test]
async fn post_switch_verification_failure_rolls_back() {
    let h = Harness::new(
        fast_settings(3),
        FakeProvisioner::new().with_fleet(Color::Blue, 3),
        FakeDirector::new(Some(Color::Blue)),
        FakeChecker::new().script("green-3:80", &[200, 503]),
    );

    let attempt = h.orchestrator.deploy(Color::Green).await.unwrap();

    assert_eq!(attempt.outcome, Outcome::RolledBack);
    assert_eq!(attempt.stage, Stage::RolledBack);
    let failure = attempt.failure.unwrap();
    assert_eq!(failure.stage, Stage::Verifying);
    assert_eq!(failure.kind, FailureKind::HealthCheckTimeout);
    assert!(!attempt.requires_reconciliation);

    assert_eq!(h.director.active(), Some(Color::Blue));
    assert_eq!(stored_state(&h).await.active_color, Some(Color::Blue));
    assert!(!h.provisioner.calls().iter().any(|c| c.starts_with("deprovision")));
}

/// The rollback switch itself fails and the target is blocked.
#[tokio::test]
async fn failed_rollback_blocks_target_until_reconcile() {
    let h = Harness::new(
        fast_settings(3),
        FakeProvisioner::new().with_fleet(Color::Blue, 3),
        FakeDirector::new(Some(Color::Blue)).fail_activate(Color::Blue),
        FakeChecker::new().script("green-3:80", &[200, 503]),
    );

    let attempt = h.orchestrator.deploy(Color::Green).await.unwrap();

    assert_eq!(attempt.outcome, Outcome::Failed);
    assert!(attempt.requires_reconciliation);
    assert!(attempt.rollback_error.as_deref().unwrap().contains("rollback to blue failed"));
    assert_eq!(attempt.failure.unwrap().stage, Stage::Verifying);

    let state = stored_state(&h).await;
    assert!(state.reconciliation_required.is_some());
    assert_eq!(state.active_color, Some(Color::Green));
    assert_eq!(h.director.active(), Some(Color::Green));

    for color in [Color::Blue, Color::Green] {
        let err = h.orchestrator.deploy(color).await.unwrap_err();
        assert!(matches!(err, DeployError::ReconciliationRequired { .. }));
    }

    let live = h.orchestrator.reconcile().await.unwrap();
    assert_eq!(live, Some(Color::Green));
    let state = stored_state(&h).await;
    assert!(state.reconciliation_required.is_none());
    assert_eq!(state.active_color, Some(Color::Green));

    assert!(h.orchestrator.deploy(Color::Green).await.unwrap_err().is_noop());
}

#[tokio::test]
async fn deploying_active_color_is_noop_without_side_effects() {
    let h = Harness::blue_live(2);

    let err = h.orchestrator.deploy(Color::Blue).await.unwrap_err();

    assert!(matches!(err, DeployError::NoOp(Color::Blue)));
    assert!(h.provisioner.calls().is_empty());
    assert!(h.director.calls().is_empty());
    assert!(h.store.list_attempts(&target()).await.unwrap().is_empty());
    assert!(h.store.lock_holder(&target()).is_none());
    assert_eq!(stored_state(&h).await.last_attempt, None);
}

#[tokio::test]
async fn held_lock_rejects_with_holder_info() {
    let h = Harness::blue_live(2);
    let mut holder = LockInfo::new(&target(), None);
    holder.holder = "ci-runner-7".to_string();
    h.store.plant_lock(&target(), holder);

    let err = h.orchestrator.deploy(Color::Green).await.unwrap_err();

    assert_eq!(err.lock_holder().unwrap().holder, "ci-runner-7");
    assert!(h.provisioner.calls().is_empty());
    assert!(h.director.mutations().is_empty());
}

#[tokio::test]
async fn concurrent_requests_admit_only_one_attempt() {
    let h = Harness::new(
        fast_settings(2),
        FakeProvisioner::new()
            .with_fleet(Color::Blue, 2)
            .ensure_delay(Duration::from_millis(100)),
        FakeDirector::new(Some(Color::Blue)),
        FakeChecker::new(),
    );

    let (first, second) = tokio::join!(
        h.orchestrator.deploy(Color::Green),
        h.orchestrator.deploy(Color::Green)
    );

    let results = [first, second];
    let completed = results.iter().filter(|r| r.is_ok()).count();
    let rejected = results
        .iter()
        .filter(|r| matches!(r, Err(DeployError::AlreadyInProgress(_))))
        .count();
    assert_eq!((completed, rejected), (1, 1));
    assert_eq!(h.store.list_attempts(&target()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn force_unlock_breaks_live_lock() {
    let h = Harness::blue_live(2);
    h.store.plant_lock(&target(), LockInfo::new(&target(), None));
    let orchestrator = h.orchestrator.force_unlock(true);

    let attempt = orchestrator.deploy(Color::Green).await.unwrap();

    assert_eq!(attempt.outcome, Outcome::Succeeded);
    assert!(h.store.lock_holder(&target()).is_none());
}

#[tokio::test]
async fn short_fleet_is_a_provision_error() {
    let h = Harness::new(
        fast_settings(3),
        FakeProvisioner::new().with_fleet(Color::Blue, 3).short_by(1),
        FakeDirector::new(Some(Color::Blue)),
        FakeChecker::new(),
    );

    let attempt = h.orchestrator.deploy(Color::Green).await.unwrap();

    assert_eq!(attempt.outcome, Outcome::Failed);
    assert_eq!(
        attempt.stages(),
        vec![Stage::Idle, Stage::ProvisioningTarget, Stage::Failed]
    );
    let failure = attempt.failure.unwrap();
    assert_eq!(failure.kind, FailureKind::ProvisionError);
    assert!(failure.reason.contains("2 of 3"));
    assert!(h.checker.calls().is_empty());
    assert!(h.director.mutations().is_empty());
}

#[tokio::test]
async fn provisioner_error_fails_before_health_checks() {
    let h = Harness::new(
        fast_settings(2),
        FakeProvisioner::new().fail_ensure("terraform apply failed"),
        FakeDirector::new(Some(Color::Blue)),
        FakeChecker::new(),
    );

    let attempt = h.orchestrator.deploy(Color::Green).await.unwrap();

    assert_eq!(attempt.outcome, Outcome::Failed);
    let failure = attempt.failure.unwrap();
    assert_eq!(failure.kind, FailureKind::ProvisionError);
    assert!(failure.reason.contains("terraform apply failed"));
    assert_eq!(h.director.active(), Some(Color::Blue));
}

#[tokio::test]
async fn smoke_failure_fails_before_switch() {
    let mut settings = fast_settings(2);
    settings.smoke_suite.checks.push(kuapo::smoke::SmokeCheck {
        path: "/api/version".to_string(),
        expect: nonempty::NonEmpty::new(200),
    });
    // Health probe passes, the smoke check sees a 500.
    let h = Harness::new(
        settings,
        FakeProvisioner::new().with_fleet(Color::Blue, 2),
        FakeDirector::new(Some(Color::Blue)),
        FakeChecker::new().script("green-2:80", &[200, 500]),
    );

    let attempt = h.orchestrator.deploy(Color::Green).await.unwrap();

    assert_eq!(attempt.outcome, Outcome::Failed);
    let failure = attempt.failure.unwrap();
    assert_eq!(failure.kind, FailureKind::SmokeTestFailure);
    assert_eq!(failure.stage, Stage::SmokeTesting);
    assert!(h.director.mutations().is_empty());
    assert_eq!(h.checker.calls_to("/api/version"), 2);
}

#[tokio::test]
async fn registration_failure_leaves_traffic_on_source() {
    let h = Harness::new(
        fast_settings(2),
        FakeProvisioner::new().with_fleet(Color::Blue, 2),
        FakeDirector::new(Some(Color::Blue)).fail_register(),
        FakeChecker::new(),
    );

    let attempt = h.orchestrator.deploy(Color::Green).await.unwrap();

    assert_eq!(attempt.outcome, Outcome::Failed);
    assert_eq!(attempt.failure.unwrap().kind, FailureKind::TrafficSwitchError);
    assert!(!attempt.requires_reconciliation);
    assert_eq!(h.director.active(), Some(Color::Blue));
    assert!(h.director.registered(Color::Green).is_empty());
    assert!(stored_state(&h).await.reconciliation_required.is_none());
}

#[tokio::test]
async fn live_endpoint_failure_during_verify_rolls_back() {
    let mut settings = fast_settings(2);
    settings.live_endpoint = Some("lb.internal:80".to_string());
    let h = Harness::new(
        settings,
        FakeProvisioner::new().with_fleet(Color::Blue, 2),
        FakeDirector::new(Some(Color::Blue)),
        FakeChecker::new().script("lb.internal:80", &[502]),
    );

    let attempt = h.orchestrator.deploy(Color::Green).await.unwrap();

    assert_eq!(attempt.outcome, Outcome::RolledBack);
    assert!(attempt.failure.unwrap().reason.contains("lb.internal:80"));
    assert_eq!(h.director.active(), Some(Color::Blue));
}

#[tokio::test]
async fn retirement_failure_is_a_warning_on_completed_attempt() {
    let h = Harness::new(
        fast_settings(2),
        FakeProvisioner::new()
            .with_fleet(Color::Blue, 2)
            .fail_deprovision("quota api down"),
        FakeDirector::new(Some(Color::Blue)),
        FakeChecker::new(),
    );

    let attempt = h.orchestrator.deploy(Color::Green).await.unwrap();

    assert_eq!(attempt.outcome, Outcome::Succeeded);
    assert_eq!(attempt.stage, Stage::Completed);
    assert_eq!(attempt.failure.unwrap().kind, FailureKind::RetirementWarning);
    assert!(
        attempt
            .warnings
            .warnings()
            .iter()
            .any(|w| w.kind == WarningKind::Retirement && w.message.contains("quota api down"))
    );
    assert_eq!(h.director.active(), Some(Color::Green));
}

#[tokio::test]
async fn scale_to_zero_retirement_shrinks_old_fleet() {
    let mut settings = fast_settings(2);
    settings.retire_mode = RetireMode::ScaleToZero;
    let h = Harness::new(
        settings,
        FakeProvisioner::new().with_fleet(Color::Blue, 2),
        FakeDirector::new(Some(Color::Blue)),
        FakeChecker::new(),
    );

    let attempt = h.orchestrator.deploy(Color::Green).await.unwrap();

    assert_eq!(attempt.outcome, Outcome::Succeeded);
    let calls = h.provisioner.calls();
    assert!(calls.contains(&"ensure blue 0".to_string()));
    assert!(!calls.contains(&"deprovision blue".to_string()));
}

#[tokio::test]
async fn first_deployment_has_nothing_to_retire() {
    let h = Harness::new(
        fast_settings(2),
        FakeProvisioner::new(),
        FakeDirector::new(None),
        FakeChecker::new(),
    );

    let attempt = h.orchestrator.deploy(Color::Blue).await.unwrap();

    assert_eq!(attempt.outcome, Outcome::Succeeded);
    assert_eq!(attempt.source_color, None);
    assert_eq!(h.provisioner.calls(), vec!["ensure blue 2".to_string()]);
    assert_eq!(stored_state(&h).await.active_color, Some(Color::Blue));
}

#[tokio::test]
async fn first_deployment_post_switch_failure_requires_reconciliation() {
    let h = Harness::new(
        fast_settings(2),
        FakeProvisioner::new(),
        FakeDirector::new(None),
        FakeChecker::new().script("blue-2:80", &[200, 503]),
    );

    let attempt = h.orchestrator.deploy(Color::Blue).await.unwrap();

    assert_eq!(attempt.outcome, Outcome::Failed);
    assert!(attempt.requires_reconciliation);
    assert!(stored_state(&h).await.reconciliation_required.is_some());
}

#[tokio::test]
async fn recorded_and_live_color_mismatch_fails_closed() {
    let h = Harness::blue_live(2);
    h.director.set_active(Some(Color::Green));

    let err = h.orchestrator.deploy(Color::Green).await.unwrap_err();
    assert!(matches!(
        err,
        DeployError::ActiveColorMismatch {
            recorded: Some(Color::Blue),
            live: Some(Color::Green),
        }
    ));
    assert!(h.provisioner.calls().is_empty());
    assert!(h.store.lock_holder(&target()).is_none());

    let err = h.orchestrator.deploy(Color::Green).await.unwrap_err();
    assert!(matches!(err, DeployError::ReconciliationRequired { .. }));

    assert_eq!(h.orchestrator.reconcile().await.unwrap(), Some(Color::Green));
    assert!(h.orchestrator.deploy(Color::Green).await.unwrap_err().is_noop());
}

#[tokio::test]
async fn unreachable_director_rejects_before_attempt() {
    let h = Harness::blue_live(2);
    h.director.set_fail_current(true);

    let err = h.orchestrator.deploy(Color::Green).await.unwrap_err();

    assert!(matches!(err, DeployError::Director(_)));
    assert!(h.store.list_attempts(&target()).await.unwrap().is_empty());
    assert!(h.store.lock_holder(&target()).is_none());
}

/// The provisioner is never interrupted; the cancel lands once it returns.
#[tokio::test]
async fn cancel_during_provisioning_lets_it_finish_then_fails() {
    let h = Harness::new(
        fast_settings(2),
        FakeProvisioner::new()
            .with_fleet(Color::Blue, 2)
            .ensure_delay(Duration::from_millis(500)),
        FakeDirector::new(Some(Color::Blue)),
        FakeChecker::new(),
    );
    let (handle, token) = cancel_pair();

    let (result, ()) = tokio::join!(
        h.orchestrator.deploy_with_cancel(Color::Green, token),
        async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            handle.cancel();
        }
    );
    let attempt = result.unwrap();

    assert_eq!(attempt.outcome, Outcome::Failed);
    assert!(attempt.cancel_requested);
    assert_eq!(
        attempt.stages(),
        vec![Stage::Idle, Stage::ProvisioningTarget, Stage::Failed]
    );
    let failure = attempt.failure.unwrap();
    assert_eq!(failure.kind, FailureKind::Cancelled);
    assert_eq!(failure.stage, Stage::ProvisioningTarget);
    assert_eq!(h.provisioner.calls(), vec!["ensure green 2"]);
    assert_eq!(h.provisioner.fleet(Color::Green), Some(addresses(Color::Green, 2)));
    assert!(h.director.mutations().is_empty());
}

#[tokio::test]
async fn cancel_during_health_checks_fails_with_traffic_untouched() {
    let mut settings = fast_settings(2);
    settings.probe.probe_timeout = Duration::from_secs(10);
    settings.instance_timeout = Duration::from_secs(10);
    settings.health_deadline = Duration::from_secs(10);
    let h = Harness::new(
        settings,
        FakeProvisioner::new().with_fleet(Color::Blue, 2),
        FakeDirector::new(Some(Color::Blue)),
        FakeChecker::new().script("green-1:80", &[HANG]),
    );
    let (handle, token) = cancel_pair();
    let started = tokio::time::Instant::now();

    let (result, ()) = tokio::join!(
        h.orchestrator.deploy_with_cancel(Color::Green, token),
        async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            handle.cancel();
        }
    );
    let attempt = result.unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(attempt.outcome, Outcome::Failed);
    assert!(attempt.cancel_requested);
    assert_eq!(
        attempt.stages(),
        vec![
            Stage::Idle,
            Stage::ProvisioningTarget,
            Stage::HealthChecking,
            Stage::Failed,
        ]
    );
    let failure = attempt.failure.unwrap();
    assert_eq!(failure.kind, FailureKind::Cancelled);
    assert_eq!(failure.stage, Stage::HealthChecking);
    assert!(h.director.mutations().is_empty());
    assert_eq!(stored_state(&h).await.active_color, Some(Color::Blue));
}

#[tokio::test]
async fn cancel_during_smoke_tests_fails_with_traffic_untouched() {
    let mut settings = fast_settings(2);
    settings.smoke_suite.timeout = Duration::from_secs(10);
    settings.smoke_suite.checks.push(kuapo::smoke::SmokeCheck {
        path: "/api/version".to_string(),
        expect: nonempty::NonEmpty::new(200),
    });
    // Health check passes, then the smoke check never answers.
    let h = Harness::new(
        settings,
        FakeProvisioner::new().with_fleet(Color::Blue, 2),
        FakeDirector::new(Some(Color::Blue)),
        FakeChecker::new().script("green-1:80", &[200, HANG]),
    );
    let (handle, token) = cancel_pair();
    let started = tokio::time::Instant::now();

    let (result, ()) = tokio::join!(
        h.orchestrator.deploy_with_cancel(Color::Green, token),
        async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            handle.cancel();
        }
    );
    let attempt = result.unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(attempt.outcome, Outcome::Failed);
    assert!(attempt.cancel_requested);
    assert_eq!(
        attempt.stages(),
        vec![
            Stage::Idle,
            Stage::ProvisioningTarget,
            Stage::HealthChecking,
            Stage::SmokeTesting,
            Stage::Failed,
        ]
    );
    let failure = attempt.failure.unwrap();
    assert_eq!(failure.kind, FailureKind::Cancelled);
    assert_eq!(failure.stage, Stage::SmokeTesting);
    assert!(h.checker.calls_to("/api/version") >= 1);
    assert!(h.director.mutations().is_empty());
}

#[tokio::test]
async fn cancel_during_retirement_is_ignored_with_warning() {
    let mut settings = fast_settings(2);
    settings.grace_period = Duration::from_millis(300);
    let h = Harness::new(
        settings,
        FakeProvisioner::new().with_fleet(Color::Blue, 2),
        FakeDirector::new(Some(Color::Blue)),
        FakeChecker::new(),
    );
    let (handle, token) = cancel_pair();

    let (result, ()) = tokio::join!(
        h.orchestrator.deploy_with_cancel(Color::Green, token),
        async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            handle.cancel();
        }
    );
    let attempt = result.unwrap();

    assert_eq!(attempt.outcome, Outcome::Succeeded);
    assert_eq!(attempt.stage, Stage::Completed);
    assert!(attempt.cancel_requested);
    assert!(attempt.failure.is_none());
    assert!(
        attempt
            .warnings
            .warnings()
            .iter()
            .any(|w| w.kind == WarningKind::CancelIgnored)
    );
    assert_eq!(h.director.active(), Some(Color::Green));
    assert_eq!(h.director.mutations(), vec!["register green", "activate green"]);
    assert!(h.provisioner.calls().contains(&"deprovision blue".to_string()));
}

#[tokio::test]
async fn cancel_during_switch_is_deferred_then_rolled_back() {
    let h = Harness::new(
        fast_settings(2),
        FakeProvisioner::new().with_fleet(Color::Blue, 2),
        FakeDirector::new(Some(Color::Blue)).activate_delay(Duration::from_millis(300)),
        FakeChecker::new(),
    );
    let (handle, token) = cancel_pair();

    let (result, ()) = tokio::join!(
        h.orchestrator.deploy_with_cancel(Color::Green, token),
        async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            handle.cancel();
        }
    );
    let attempt = result.unwrap();

    assert_eq!(attempt.outcome, Outcome::RolledBack);
    assert!(attempt.cancel_requested);
    let failure = attempt.failure.unwrap();
    assert_eq!(failure.kind, FailureKind::Cancelled);
    assert_eq!(failure.stage, Stage::SwitchingTraffic);
    // The switch completed before the rollback started.
    assert_eq!(
        h.director.mutations(),
        vec!["register green", "activate green", "activate blue"]
    );
    assert_eq!(h.director.active(), Some(Color::Blue));
}

#[tokio::test]
async fn stale_lock_from_crashed_run_blocks_until_reconcile() {
    let h = Harness::blue_live(2);

    // A previous process got as far as health checking and died.
    let crashed_at = Utc::now() - chrono::Duration::hours(2);
    let crashed_id = AttemptId::generate(&target(), crashed_at);
    let mut crashed = DeploymentAttempt::new(
        crashed_id.clone(),
        target(),
        Some(Color::Blue),
        Color::Green,
        crashed_at,
    );
    crashed.advance(StageEvent::Succeeded).unwrap();
    crashed.advance(StageEvent::Succeeded).unwrap();
    h.store.save_attempt(&crashed).await.unwrap();

    let mut lock = LockInfo::new(&target(), Some(&crashed_id));
    lock.started_at = crashed_at;
    h.store.plant_lock(&target(), lock);

    let err = h.orchestrator.deploy(Color::Green).await.unwrap_err();
    assert!(matches!(err, DeployError::ReconciliationRequired { .. }));
    assert!(h.store.lock_holder(&target()).is_none());

    let recovered = h.orchestrator.status(&crashed_id).await.unwrap();
    assert_eq!(recovered.outcome, Outcome::Failed);
    assert!(recovered.requires_reconciliation);
    let failure = recovered.failure.unwrap();
    assert_eq!(failure.kind, FailureKind::Interrupted);
    assert_eq!(failure.stage, Stage::HealthChecking);

    assert_eq!(h.orchestrator.reconcile().await.unwrap(), Some(Color::Blue));
    let attempt = h.orchestrator.deploy(Color::Green).await.unwrap();
    assert_eq!(attempt.outcome, Outcome::Succeeded);
}

/// An attempt whose lock was broken as abandoned stops at its next stage
/// boundary and leaves the successor's lock in place.
#[tokio::test]
async fn attempt_with_broken_lock_stops_before_switching() {
    let h = Harness::new(
        fast_settings(2),
        FakeProvisioner::new()
            .with_fleet(Color::Blue, 2)
            .ensure_delay(Duration::from_millis(400)),
        FakeDirector::new(Some(Color::Blue)),
        FakeChecker::new(),
    );

    let (original, (rejected, reconciled, successor)) = tokio::join!(
        h.orchestrator.deploy(Color::Green),
        async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            // The first run stops heartbeating long enough to look abandoned.
            let mut quiet = h.store.lock_holder(&target()).unwrap();
            quiet.heartbeat_at = Some(Utc::now() - chrono::Duration::hours(2));
            h.store.plant_lock(&target(), quiet);

            let rejected = h.orchestrator.deploy(Color::Green).await;
            let reconciled = h.orchestrator.reconcile().await;
            let successor = h.orchestrator.deploy(Color::Green).await;
            (rejected, reconciled, successor)
        }
    );

    assert!(matches!(rejected, Err(DeployError::ReconciliationRequired { .. })));
    assert_eq!(reconciled.unwrap(), Some(Color::Blue));
    let successor = successor.unwrap();
    assert_eq!(successor.outcome, Outcome::Succeeded);

    let lost_id = match original {
        Err(DeployError::LockLost(id)) => id,
        other => panic!("expected LockLost, got {other:?}"),
    };
    assert_ne!(lost_id, successor.id);
    let interrupted = h.orchestrator.status(&lost_id).await.unwrap();
    assert_eq!(interrupted.outcome, Outcome::Failed);
    assert_eq!(interrupted.failure.unwrap().kind, FailureKind::Interrupted);

    // Only the successor touched traffic.
    assert_eq!(h.director.mutations(), vec!["register green", "activate green"]);
    assert_eq!(stored_state(&h).await.active_color, Some(Color::Green));
    assert!(h.store.lock_holder(&target()).is_none());
}

#[tokio::test]
async fn status_and_latest_read_persisted_attempts() {
    let h = Harness::blue_live(2);
    assert!(h.orchestrator.latest().await.unwrap().is_none());

    let attempt = h.orchestrator.deploy(Color::Green).await.unwrap();

    let latest = h.orchestrator.latest().await.unwrap().unwrap();
    assert_eq!(latest.id, attempt.id);
    assert_eq!(latest.outcome, Outcome::Succeeded);
    assert_eq!(h.orchestrator.status(&attempt.id).await.unwrap(), latest);
    assert_eq!(stored_state(&h).await.last_attempt, Some(attempt.id.clone()));

    let err = h
        .orchestrator
        .status(&AttemptId::new("web-19700101T000000000Z".to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, DeployError::AttemptNotFound(_)));
}

#[tokio::test]
async fn back_to_back_releases_get_distinct_ids() {
    let h = Harness::new(
        fast_settings(1),
        FakeProvisioner::new().with_fleet(Color::Blue, 1),
        FakeDirector::new(Some(Color::Blue)),
        FakeChecker::new(),
    );

    let first = h.orchestrator.deploy(Color::Green).await.unwrap();
    let second = h.orchestrator.deploy(Color::Blue).await.unwrap();

    assert_ne!(first.id, second.id);
    assert_eq!(second.outcome, Outcome::Succeeded);
    assert_eq!(h.store.list_attempts(&target()).await.unwrap().len(), 2);
    assert_eq!(h.director.active(), Some(Color::Blue));
}

#[derive(Default)]
struct RecordingNotifier {
    events: Arc<Mutex<Vec<NotifyEvent>>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.events.lock().push(notification.event);
        Ok(())
    }
}

#[tokio::test]
async fn notifications_report_start_and_outcome() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let (handle, task) = spawn_dispatcher(
        RecordingNotifier {
            events: events.clone(),
        },
        Duration::from_secs(1),
    );

    let h = Harness::new(
        fast_settings(2),
        FakeProvisioner::new().with_fleet(Color::Blue, 2),
        FakeDirector::new(Some(Color::Blue)),
        FakeChecker::new().script("green-1:80", &[200, 503]),
    );
    let orchestrator = h.orchestrator.with_notifier(handle);

    let attempt = orchestrator.deploy(Color::Green).await.unwrap();
    assert_eq!(attempt.outcome, Outcome::RolledBack);

    drop(orchestrator);
    task.await.unwrap();
    assert_eq!(
        *events.lock(),
        vec![NotifyEvent::Started, NotifyEvent::RolledBack]
    );
}

#[tokio::test]
async fn failing_notifier_never_affects_the_attempt() {
    struct Broken;

    #[async_trait]
    impl Notifier for Broken {
        async fn notify(&self, _: &Notification) -> Result<(), NotifyError> {
            Err(NotifyError::Delivery("webhook 500".to_string()))
        }
    }

    let (handle, _task) = spawn_dispatcher(Broken, Duration::from_millis(100));
    let h = Harness::with_store(
        fast_settings(1),
        FakeProvisioner::new().with_fleet(Color::Blue, 1),
        FakeDirector::new(Some(Color::Blue)),
        FakeChecker::new(),
        MemoryStateStore::new().with_target(
            &target(),
            TargetState {
                active_color: Some(Color::Blue),
                ..TargetState::default()
            },
        ),
    );
    let orchestrator = h.orchestrator.with_notifier(handle);

    let attempt = orchestrator.deploy(Color::Green).await.unwrap();
    assert_eq!(attempt.outcome, Outcome::Succeeded);
}
