// ABOUTME: Deployment orchestrator driving one attempt through the release state machine.
// ABOUTME: Sequences provisioning, health, smoke, switch, verify and retirement with rollback.

use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::diagnostics::Warning;
use crate::health::{HttpCheck, check_fleet};
use crate::notify::{Notification, NotifyEvent, NotifyHandle};
use crate::provision::{ProvisionError, Provisioner};
use crate::retire::RetirementManager;
use crate::smoke::run_smoke_tests;
use crate::store::{LockInfo, StateStore, StoreError, TargetState};
use crate::traffic::{TrafficDirector, TrafficSwitcher};
use crate::types::{AttemptId, Color, Fleet, Instance, TargetName, display_color};

use super::attempt::{DeploymentAttempt, FailureKind, Outcome};
use super::cancel::CancelToken;
use super::error::DeployError;
use super::settings::DeploySettings;
use super::stage::{Stage, StageEvent};

/// How often a running stage refreshes the deploy lock heartbeat.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Facts gathered while an attempt runs that the rollback path needs.
struct RunContext {
    fleet: Fleet,
    switch_attempted: bool,
    switch_confirmed: bool,
}

/// Drives blue/green releases for a single target.
///
/// Collaborators are shared so the same provisioner or director can serve
/// several orchestrators.
pub struct Orchestrator<P: ?Sized, D: ?Sized, S: ?Sized, H: ?Sized> {
    target: TargetName,
    settings: DeploySettings,
    provisioner: Arc<P>,
    director: Arc<D>,
    store: Arc<S>,
    checker: Arc<H>,
    notifier: NotifyHandle,
    force_unlock: bool,
}

impl<P, D, S, H> Orchestrator<P, D, S, H>
where
    P: Provisioner + ?Sized,
    D: TrafficDirector + ?Sized,
    S: StateStore + ?Sized,
    H: HttpCheck + ?Sized,
{
    pub fn new(
        target: TargetName,
        settings: DeploySettings,
        provisioner: Arc<P>,
        director: Arc<D>,
        store: Arc<S>,
        checker: Arc<H>,
    ) -> Self {
        Self {
            target,
            settings,
            provisioner,
            director,
            store,
            checker,
            notifier: NotifyHandle::disabled(),
            force_unlock: false,
        }
    }

    pub fn with_notifier(mut self, notifier: NotifyHandle) -> Self {
        self.notifier = notifier;
        self
    }

    /// Break a live deploy lock held by someone else.
    pub fn force_unlock(mut self, force: bool) -> Self {
        self.force_unlock = force;
        self
    }

    pub fn target(&self) -> &TargetName {
        &self.target
    }

    /// Release `target_color`, running the attempt to a terminal stage.
    pub async fn deploy(&self, target_color: Color) -> Result<DeploymentAttempt, DeployError> {
        self.deploy_with_cancel(target_color, CancelToken::never())
            .await
    }

    /// Like [`deploy`](Self::deploy), honoring operator cancellation.
    ///
    /// Cancellation during health or smoke checks fails the attempt at once
    /// with traffic untouched. Provisioning is left to finish and then fails
    /// the attempt. Once the switch has started, cancellation is deferred to
    /// the end of the stage and then rolls traffic back. After verification it
    /// is ignored.
    ///
    /// If the deploy lock is broken by another process while the attempt
    /// runs, the attempt stops at the next stage boundary with
    /// [`DeployError::LockLost`].
    pub async fn deploy_with_cancel(
        &self,
        target_color: Color,
        cancel: CancelToken,
    ) -> Result<DeploymentAttempt, DeployError> {
        let state = self.store.load_target(&self.target).await?;
        self.check_preconditions(&state, target_color)?;

        let mut started_at = Utc::now();
        let mut id = AttemptId::generate(&self.target, started_at);
        // IDs have millisecond resolution; step past an attempt started in the same tick.
        while self.store.load_attempt(&self.target, &id).await?.is_some() {
            started_at += chrono::Duration::milliseconds(1);
            id = AttemptId::generate(&self.target, started_at);
        }
        let (lock, broken) = self.acquire_lock(Some(&id)).await?;

        let result = self
            .run_locked(target_color, id, started_at, &lock, broken, &cancel)
            .await;

        let unlock = self.store.unlock(&self.target, &lock).await;
        let mut attempt = match result {
            Ok(attempt) => attempt,
            Err(e) => {
                if let Err(unlock_err) = unlock {
                    tracing::warn!(
                        "failed to release deploy lock for {}: {}",
                        self.target,
                        unlock_err
                    );
                }
                return Err(e);
            }
        };
        if let Err(e) = unlock {
            attempt.warn(Warning::lock_release(format!(
                "failed to release deploy lock for {}: {}",
                self.target, e
            )));
        }

        let (event, details) = match attempt.outcome {
            Outcome::Succeeded => (
                NotifyEvent::Succeeded,
                format!("{} is now serving {}", attempt.target_color, self.target),
            ),
            Outcome::RolledBack => (NotifyEvent::RolledBack, failure_details(&attempt)),
            _ => (NotifyEvent::Failed, failure_details(&attempt)),
        };
        self.notify(event, &attempt, details);

        Ok(attempt)
    }

    /// Load a recorded attempt.
    pub async fn status(&self, id: &AttemptId) -> Result<DeploymentAttempt, DeployError> {
        self.store
            .load_attempt(&self.target, id)
            .await?
            .ok_or_else(|| DeployError::AttemptNotFound(id.to_string()))
    }

    /// Most recent attempt for the target, if any.
    pub async fn latest(&self) -> Result<Option<DeploymentAttempt>, DeployError> {
        Ok(self.store.list_attempts(&self.target).await?.pop())
    }

    /// Adopt the traffic director's live color and unblock the target.
    pub async fn reconcile(&self) -> Result<Option<Color>, DeployError> {
        let (lock, broken) = self.acquire_lock(None).await?;

        let result: Result<Option<Color>, DeployError> = async {
            if let Some(previous) = broken {
                self.recover(previous).await?;
            }

            let live = self
                .switcher()
                .current()
                .await
                .map_err(|e| DeployError::Director(e.to_string()))?;

            let mut state = self.store.load_target(&self.target).await?;
            if let Some(reason) = state.reconciliation_required.take() {
                tracing::info!("clearing reconciliation flag on {}: {}", self.target, reason);
            }
            state.active_color = live;
            state.updated_at = Some(Utc::now());
            self.store.save_target(&self.target, &state).await?;
            Ok(live)
        }
        .await;

        if let Err(e) = self.store.unlock(&self.target, &lock).await {
            tracing::warn!("failed to release deploy lock for {}: {}", self.target, e);
        }
        result
    }

    fn check_preconditions(&self, state: &TargetState, target_color: Color) -> Result<(), DeployError> {
        if let Some(reason) = &state.reconciliation_required {
            return Err(DeployError::ReconciliationRequired {
                target: self.target.clone(),
                reason: reason.clone(),
            });
        }
        if state.active_color == Some(target_color) {
            return Err(DeployError::NoOp(target_color));
        }
        Ok(())
    }

    /// Take the target's lock, returning it with any holder that had to be broken.
    async fn acquire_lock(
        &self,
        attempt: Option<&AttemptId>,
    ) -> Result<(LockInfo, Option<LockInfo>), DeployError> {
        let info = LockInfo::new(&self.target, attempt);
        match self.store.try_lock(&self.target, &info, self.force_unlock).await {
            Ok(broken) => Ok((info, broken)),
            Err(StoreError::LockHeld(holder)) => Err(DeployError::AlreadyInProgress(holder)),
            Err(e) => Err(e.into()),
        }
    }

    /// Close out an attempt whose lock was broken while it was still running.
    async fn recover(&self, previous: LockInfo) -> Result<(), DeployError> {
        let Some(previous_id) = previous.attempt.as_ref() else {
            return Ok(());
        };
        let Some(mut interrupted) = self.store.load_attempt(&self.target, previous_id).await? else {
            return Ok(());
        };
        if interrupted.is_terminal() {
            return Ok(());
        }

        let reason = format!(
            "interrupted during {} (lock held by {} pid {} was broken)",
            interrupted.stage, previous.holder, previous.pid
        );
        tracing::warn!("attempt {} {}", interrupted.id, reason);
        interrupted.mark_interrupted(reason.clone());
        self.store.save_attempt(&interrupted).await?;

        let mut state = self.store.load_target(&self.target).await?;
        state.reconciliation_required = Some(format!("attempt {} {}", interrupted.id, reason));
        state.updated_at = Some(Utc::now());
        self.store.save_target(&self.target, &state).await?;
        Ok(())
    }

    async fn run_locked(
        &self,
        target_color: Color,
        id: AttemptId,
        started_at: DateTime<Utc>,
        lock: &LockInfo,
        broken: Option<LockInfo>,
        cancel: &CancelToken,
    ) -> Result<DeploymentAttempt, DeployError> {
        if let Some(previous) = broken {
            self.recover(previous).await?;
        }

        // Another process may have finished an attempt while we waited.
        let mut state = self.store.load_target(&self.target).await?;
        self.check_preconditions(&state, target_color)?;

        let live = self
            .switcher()
            .current()
            .await
            .map_err(|e| DeployError::Director(e.to_string()))?;
        if live != state.active_color {
            let err = DeployError::ActiveColorMismatch {
                recorded: state.active_color,
                live,
            };
            state.reconciliation_required = Some(err.to_string());
            state.updated_at = Some(Utc::now());
            self.store.save_target(&self.target, &state).await?;
            return Err(err);
        }

        let mut attempt = DeploymentAttempt::new(
            id,
            self.target.clone(),
            state.active_color,
            target_color,
            started_at,
        );
        state.last_attempt = Some(attempt.id.clone());
        state.updated_at = Some(Utc::now());
        self.store.save_target(&self.target, &state).await?;
        self.store.save_attempt(&attempt).await?;

        tracing::info!(
            attempt = %attempt.id,
            "deploying {} to {} (active: {})",
            target_color,
            self.target,
            display_color(&state.active_color)
        );
        self.notify(
            NotifyEvent::Started,
            &attempt,
            format!("deploying {} to {}", target_color, self.target),
        );

        let mut ctx = RunContext {
            fleet: Fleet::new(target_color, Vec::new(), self.settings.fleet_size),
            switch_attempted: false,
            switch_confirmed: false,
        };

        let mut event = StageEvent::Succeeded;
        loop {
            attempt.advance(event)?;
            if attempt.stage.is_terminal() {
                self.hold_lock(&mut attempt, lock).await?;
                self.confirm_live_color(&mut attempt).await;
                self.persist(&mut attempt, lock).await?;
                break;
            }
            // Every stage, switching and rollback included, starts under a confirmed lock.
            self.persist(&mut attempt, lock).await?;
            event = self
                .with_heartbeat(lock, self.run_stage(&mut attempt, &mut ctx, lock, cancel))
                .await?;
        }

        Ok(attempt)
    }

    async fn run_stage(
        &self,
        attempt: &mut DeploymentAttempt,
        ctx: &mut RunContext,
        lock: &LockInfo,
        cancel: &CancelToken,
    ) -> Result<StageEvent, DeployError> {
        let stage = attempt.stage;
        let target_color = attempt.target_color;

        let result = match stage {
            // Runs to completion even when cancelled.
            Stage::ProvisioningTarget => match self.provision(target_color).await {
                Ok(fleet) => {
                    ctx.fleet = fleet;
                    Ok(())
                }
                Err(reason) => Err((FailureKind::ProvisionError, reason)),
            },
            Stage::HealthChecking => {
                let check = self.check_health(&mut ctx.fleet.instances, self.settings.health_deadline);
                match interruptible(cancel, check).await {
                    Some(result) => result.map_err(|r| (FailureKind::HealthCheckTimeout, r)),
                    None => return Ok(cancelled(attempt)),
                }
            }
            Stage::SmokeTesting => {
                match interruptible(cancel, self.smoke_test(&ctx.fleet)).await {
                    Some(result) => result.map_err(|r| (FailureKind::SmokeTestFailure, r)),
                    None => return Ok(cancelled(attempt)),
                }
            }
            Stage::SwitchingTraffic => {
                ctx.switch_attempted = true;
                let targets = ctx.fleet.addresses();
                match self
                    .switcher()
                    .switch(attempt.source_color, target_color, &targets)
                    .await
                {
                    Ok(()) => {
                        ctx.switch_confirmed = true;
                        self.record_active_color(attempt, lock, target_color).await?;
                        Ok(())
                    }
                    Err(e) => Err((FailureKind::TrafficSwitchError, e.to_string())),
                }
            }
            Stage::Verifying => self
                .verify(&mut ctx.fleet)
                .await
                .map_err(|r| (FailureKind::HealthCheckTimeout, r)),
            Stage::RetiringOld => {
                let result = match attempt.source_color {
                    Some(old) => self.retire(old).await,
                    None => Ok(()),
                };
                if cancel.is_cancelled() {
                    attempt.cancel_requested = true;
                    attempt.warn(Warning::cancel_ignored(
                        "cancellation ignored: release already committed",
                    ));
                }
                return Ok(match result {
                    Ok(()) => StageEvent::Succeeded,
                    Err(reason) => {
                        attempt.record_failure(FailureKind::RetirementWarning, reason.clone());
                        attempt.warn(Warning::retirement(reason));
                        StageEvent::Failed
                    }
                });
            }
            Stage::RollingBack => return self.roll_back(attempt, ctx, lock).await,
            Stage::Idle | Stage::Completed | Stage::Failed | Stage::RolledBack => {
                return Ok(StageEvent::Failed);
            }
        };

        Ok(match result {
            // Provisioning, switching and verifying finish before cancellation applies.
            Ok(()) if cancel.is_cancelled() => cancelled(attempt),
            Ok(()) => StageEvent::Succeeded,
            Err((kind, reason)) => {
                tracing::warn!(attempt = %attempt.id, "{} failed: {}", stage, reason);
                if cancel.is_cancelled() {
                    attempt.cancel_requested = true;
                }
                attempt.record_failure(kind, reason);
                StageEvent::Failed
            }
        })
    }

    async fn provision(&self, color: Color) -> Result<Fleet, String> {
        let timeout = self.settings.provision_timeout;
        let addresses = tokio::time::timeout(
            timeout,
            self.provisioner.ensure_fleet(color, self.settings.fleet_size),
        )
        .await
        .unwrap_or(Err(ProvisionError::Timeout(timeout)))
        .map_err(|e| e.to_string())?;

        let fleet = Fleet::new(color, addresses, self.settings.fleet_size);
        if !fleet.is_complete() {
            return Err(format!(
                "provisioner returned {} of {} {} instance(s)",
                fleet.instances.len(),
                fleet.desired_size,
                color
            ));
        }
        tracing::info!("{} fleet ready: {}", color, fleet.addresses().join(", "));
        Ok(fleet)
    }

    async fn check_health(&self, instances: &mut [Instance], deadline: Duration) -> Result<(), String> {
        let report = check_fleet(
            self.checker.as_ref(),
            instances,
            &self.settings.probe,
            self.settings.instance_timeout,
            deadline,
        )
        .await;
        if report.all_healthy {
            Ok(())
        } else {
            Err(report.summary())
        }
    }

    async fn smoke_test(&self, fleet: &Fleet) -> Result<(), String> {
        let report =
            run_smoke_tests(self.checker.as_ref(), &fleet.instances, &self.settings.smoke_suite)
                .await;
        if report.passed {
            Ok(())
        } else {
            Err(report.summary())
        }
    }

    /// Re-check the new fleet, plus the public endpoint when configured.
    async fn verify(&self, fleet: &mut Fleet) -> Result<(), String> {
        let fleet_len = fleet.instances.len();
        let mut instances = fleet.instances.clone();
        if let Some(endpoint) = &self.settings.live_endpoint {
            instances.push(Instance::new(endpoint.clone(), fleet.color));
        }

        let result = self
            .check_health(&mut instances, self.settings.verify_deadline)
            .await;

        instances.truncate(fleet_len);
        fleet.instances = instances;
        result
    }

    async fn retire(&self, color: Color) -> Result<(), String> {
        RetirementManager::new(
            self.provisioner.as_ref(),
            self.settings.retire_mode,
            self.settings.provision_timeout,
        )
        .retire(color, self.settings.grace_period)
        .await
        .map_err(|e| e.to_string())
    }

    async fn roll_back(
        &self,
        attempt: &mut DeploymentAttempt,
        ctx: &RunContext,
        lock: &LockInfo,
    ) -> Result<StageEvent, DeployError> {
        if !ctx.switch_attempted {
            tracing::info!("traffic was never switched; {} fleet left for inspection", attempt.target_color);
            return Ok(StageEvent::NothingToUndo);
        }

        let switcher = self.switcher();

        if !ctx.switch_confirmed {
            match switcher.current().await {
                Ok(live) if live == attempt.source_color => {
                    tracing::info!("switch never took effect; traffic untouched");
                    return Ok(StageEvent::NothingToUndo);
                }
                Ok(_) => {}
                Err(e) => {
                    self.block(attempt, format!("cannot read live color after failed switch: {e}"))
                        .await;
                    return Ok(StageEvent::Failed);
                }
            }
        }

        let Some(source) = attempt.source_color else {
            let reason = format!(
                "first deployment of {} cannot be undone; {} may be receiving traffic",
                self.target, attempt.target_color
            );
            self.block(attempt, reason).await;
            return Ok(StageEvent::Failed);
        };

        match switcher.switch(Some(attempt.target_color), source, &[]).await {
            Ok(()) => {
                self.record_active_color(attempt, lock, source).await?;
                Ok(StageEvent::Succeeded)
            }
            Err(e) => {
                self.block(attempt, format!("rollback to {source} failed: {e}"))
                    .await;
                Ok(StageEvent::Failed)
            }
        }
    }

    /// The stored and live colors must agree when an attempt ends.
    async fn confirm_live_color(&self, attempt: &mut DeploymentAttempt) {
        if attempt.requires_reconciliation {
            return;
        }
        let recorded = match self.store.load_target(&self.target).await {
            Ok(state) => state.active_color,
            Err(e) => {
                attempt.warn(Warning::state_persistence(format!(
                    "could not re-read target state: {e}"
                )));
                return;
            }
        };
        match self.switcher().current().await {
            Ok(live) if live == recorded => {}
            Ok(live) => {
                let err = DeployError::ActiveColorMismatch { recorded, live };
                self.block(attempt, err.to_string()).await;
            }
            Err(e) => {
                self.block(attempt, format!("could not confirm live color: {e}"))
                    .await;
            }
        }
    }

    /// Refuse further deployments until an operator reconciles.
    async fn block(&self, attempt: &mut DeploymentAttempt, reason: String) {
        tracing::error!(attempt = %attempt.id, "{}; target {} requires reconciliation", reason, self.target);
        attempt.requires_reconciliation = true;
        attempt.rollback_error.get_or_insert_with(|| reason.clone());

        let result = async {
            let mut state = self.store.load_target(&self.target).await?;
            state.reconciliation_required = Some(reason);
            state.updated_at = Some(Utc::now());
            self.store.save_target(&self.target, &state).await
        }
        .await;
        if let Err(e) = result {
            attempt.warn(Warning::state_persistence(format!(
                "failed to flag {} for reconciliation: {e}",
                self.target
            )));
        }
    }

    async fn record_active_color(
        &self,
        attempt: &mut DeploymentAttempt,
        lock: &LockInfo,
        color: Color,
    ) -> Result<(), DeployError> {
        self.hold_lock(attempt, lock).await?;
        let result = async {
            let mut state = self.store.load_target(&self.target).await?;
            state.active_color = Some(color);
            state.updated_at = Some(Utc::now());
            self.store.save_target(&self.target, &state).await
        }
        .await;
        if let Err(e) = result {
            attempt.warn(Warning::state_persistence(format!(
                "failed to record {color} as active: {e}"
            )));
        }
        Ok(())
    }

    /// Save the attempt under a refreshed lock.
    async fn persist(&self, attempt: &mut DeploymentAttempt, lock: &LockInfo) -> Result<(), DeployError> {
        self.hold_lock(attempt, lock).await?;
        match self.store.save_attempt(attempt).await {
            Ok(()) => Ok(()),
            // Another process closed this record after breaking the lock.
            Err(StoreError::TerminalAttempt(_)) => Err(self.abandon(attempt)),
            Err(e) => {
                attempt.warn(Warning::state_persistence(format!(
                    "failed to save attempt {} at {}: {e}",
                    attempt.id, attempt.stage
                )));
                Ok(())
            }
        }
    }

    /// Refresh the lock heartbeat, failing once another process holds the lock.
    async fn hold_lock(&self, attempt: &mut DeploymentAttempt, lock: &LockInfo) -> Result<(), DeployError> {
        match self.store.refresh_lock(&self.target, lock).await {
            Ok(()) => Ok(()),
            Err(StoreError::LockLost(_)) => Err(self.abandon(attempt)),
            Err(e) => {
                attempt.warn(Warning::state_persistence(format!(
                    "failed to refresh deploy lock for {}: {e}",
                    self.target
                )));
                Ok(())
            }
        }
    }

    fn abandon(&self, attempt: &DeploymentAttempt) -> DeployError {
        tracing::error!(
            attempt = %attempt.id,
            "deploy lock for {} was taken over during {}; abandoning attempt",
            self.target,
            attempt.stage
        );
        DeployError::LockLost(attempt.id.clone())
    }

    /// Drive `work` while keeping the lock heartbeat fresh.
    async fn with_heartbeat<T>(&self, lock: &LockInfo, work: impl Future<Output = T>) -> T {
        let start = tokio::time::Instant::now() + HEARTBEAT_INTERVAL;
        let mut ticker = tokio::time::interval_at(start, HEARTBEAT_INTERVAL);
        tokio::pin!(work);
        loop {
            tokio::select! {
                out = &mut work => return out,
                _ = ticker.tick() => {
                    if let Err(e) = self.store.refresh_lock(&self.target, lock).await {
                        tracing::warn!("failed to refresh deploy lock for {}: {}", self.target, e);
                    }
                }
            }
        }
    }

    fn switcher(&self) -> TrafficSwitcher<'_, D> {
        TrafficSwitcher::new(self.director.as_ref(), self.settings.traffic_timeout)
    }

    fn notify(&self, event: NotifyEvent, attempt: &DeploymentAttempt, details: String) {
        self.notifier.notify(Notification {
            event,
            attempt: attempt.id.clone(),
            target: attempt.target.clone(),
            source_color: attempt.source_color,
            target_color: attempt.target_color,
            details,
        });
    }
}

/// Run `fut` unless cancellation arrives first.
async fn interruptible<T>(cancel: &CancelToken, fut: impl Future<Output = T>) -> Option<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        out = fut => Some(out),
    }
}

fn cancelled(attempt: &mut DeploymentAttempt) -> StageEvent {
    tracing::warn!(attempt = %attempt.id, "cancelled during {}", attempt.stage);
    attempt.cancel_requested = true;
    attempt.record_failure(
        FailureKind::Cancelled,
        format!("cancelled by operator during {}", attempt.stage),
    );
    StageEvent::Cancelled
}

fn failure_details(attempt: &DeploymentAttempt) -> String {
    match (&attempt.failure, &attempt.rollback_error) {
        (Some(failure), Some(rollback)) => format!("{failure}; {rollback}"),
        (Some(failure), None) => failure.to_string(),
        (None, Some(rollback)) => rollback.clone(),
        (None, None) => attempt.outcome.to_string(),
    }
}
