// ABOUTME: Detached notification dispatcher fed by an unbounded channel.
// ABOUTME: Sending never blocks or fails the caller.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{Notification, Notifier};

/// Cheap, cloneable sender side of the notification queue.
#[derive(Debug, Clone, Default)]
pub struct NotifyHandle {
    tx: Option<mpsc::UnboundedSender<Notification>>,
}

impl NotifyHandle {
    /// A handle that drops every notification.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Queue a notification. Never blocks.
    pub fn notify(&self, notification: Notification) {
        if let Some(tx) = &self.tx
            && tx.send(notification).is_err()
        {
            tracing::debug!("notification dispatcher has shut down, dropping event");
        }
    }
}

/// Spawn the delivery task.
///
/// The task exits once every handle is dropped and the queue is drained, so
/// callers that want pending notifications delivered before exit can await
/// the returned join handle.
pub fn spawn_dispatcher<N: Notifier + 'static>(
    notifier: N,
    timeout: Duration,
) -> (NotifyHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<Notification>();

    let task = tokio::spawn(async move {
        while let Some(notification) = rx.recv().await {
            match tokio::time::timeout(timeout, notifier.notify(&notification)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(
                    "{} notification for {} failed: {}",
                    notification.event.as_str(),
                    notification.attempt,
                    e
                ),
                Err(_) => tracing::warn!(
                    "{} notification for {} timed out after {:?}",
                    notification.event.as_str(),
                    notification.attempt,
                    timeout
                ),
            }
        }
    });

    (NotifyHandle { tx: Some(tx) }, task)
}
