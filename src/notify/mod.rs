// ABOUTME: Best-effort deployment notifications delivered off the state machine's path.
// ABOUTME: Events are queued to a detached task; delivery failures are only logged.

mod dispatcher;
mod hooks;

pub use dispatcher::{NotifyHandle, spawn_dispatcher};
pub use hooks::{HookNotifier, HookResult};

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::types::{AttemptId, Color, TargetName};

/// Lifecycle events reported for an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotifyEvent {
    Started,
    Succeeded,
    Failed,
    RolledBack,
}

impl NotifyEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotifyEvent::Started => "started",
            NotifyEvent::Succeeded => "succeeded",
            NotifyEvent::Failed => "failed",
            NotifyEvent::RolledBack => "rolled-back",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub event: NotifyEvent,
    pub attempt: AttemptId,
    pub target: TargetName,
    pub source_color: Option<Color>,
    pub target_color: Color,
    pub details: String,
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification delivery failed: {0}")]
    Delivery(String),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Writes each notification to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, n: &Notification) -> Result<(), NotifyError> {
        tracing::info!(
            event = n.event.as_str(),
            attempt = %n.attempt,
            target = %n.target,
            "{}",
            n.details
        );
        Ok(())
    }
}

/// Delivers to every inner notifier; the first error is reported after all ran.
#[derive(Default)]
pub struct MultiNotifier {
    notifiers: Vec<Box<dyn Notifier>>,
}

impl MultiNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, notifier: impl Notifier + 'static) -> Self {
        self.notifiers.push(Box::new(notifier));
        self
    }
}

#[async_trait]
impl Notifier for MultiNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        let mut first_error = None;
        for notifier in &self.notifiers {
            if let Err(e) = notifier.notify(notification).await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
