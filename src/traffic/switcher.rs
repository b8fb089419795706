// ABOUTME: Traffic switcher repointing live traffic between colors.
// ABOUTME: Either the new color is confirmed live or previous routing is restored.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;

use crate::types::{Color, display_color};

use super::director::{DirectorError, TrafficDirector};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SwitchError {
    #[error("failed to register {color} targets: {source}")]
    Register {
        color: Color,
        #[source]
        source: DirectorError,
    },

    #[error("failed to activate {color}: {source}")]
    Activate {
        color: Color,
        #[source]
        source: DirectorError,
    },

    #[error("failed to read live color: {0}")]
    ReadBack(#[source] DirectorError),

    #[error(
        "switch to {expected} not confirmed (director reports {})",
        display_color(.actual)
    )]
    NotConfirmed {
        expected: Color,
        actual: Option<Color>,
    },
}

/// Switches live traffic through a [`TrafficDirector`], bounding every call.
pub struct TrafficSwitcher<'a, D: ?Sized> {
    director: &'a D,
    timeout: Duration,
}

impl<'a, D: TrafficDirector + ?Sized> TrafficSwitcher<'a, D> {
    pub fn new(director: &'a D, timeout: Duration) -> Self {
        Self { director, timeout }
    }

    async fn bounded<T>(
        &self,
        fut: impl Future<Output = Result<T, DirectorError>>,
    ) -> Result<T, DirectorError> {
        tokio::time::timeout(self.timeout, fut)
            .await
            .unwrap_or(Err(DirectorError::Timeout(self.timeout)))
    }

    /// Color currently receiving live traffic.
    pub async fn current(&self) -> Result<Option<Color>, SwitchError> {
        self.bounded(self.director.current_active_color())
            .await
            .map_err(SwitchError::ReadBack)
    }

    /// Move live traffic from `from` to `to`.
    ///
    /// `targets` are registered under `to` first; pass an empty slice when
    /// `to` still has its registrations (switching back). On failure any
    /// registration made here is removed and `from` is re-activated.
    /// Switching a color to itself is a no-op.
    pub async fn switch(
        &self,
        from: Option<Color>,
        to: Color,
        targets: &[String],
    ) -> Result<(), SwitchError> {
        if from == Some(to) {
            tracing::debug!("switch {} -> {} is a no-op", to, to);
            return Ok(());
        }

        if !targets.is_empty()
            && let Err(source) = self.bounded(self.director.register_targets(to, targets)).await
        {
            // Registration may have partially succeeded.
            self.deregister(to, targets).await;
            return Err(SwitchError::Register { color: to, source });
        }

        if let Err(source) = self.bounded(self.director.activate_color(to)).await {
            self.restore(from, to, targets).await;
            return Err(SwitchError::Activate { color: to, source });
        }

        match self.current().await {
            Ok(Some(live)) if live == to => {
                tracing::info!(
                    "traffic switched from {} to {}",
                    display_color(&from),
                    to
                );
                Ok(())
            }
            Ok(actual) => {
                self.restore(from, to, targets).await;
                Err(SwitchError::NotConfirmed {
                    expected: to,
                    actual,
                })
            }
            Err(e) => {
                self.restore(from, to, targets).await;
                Err(e)
            }
        }
    }

    /// Best effort: put `from` back and drop registrations made for `to`.
    async fn restore(&self, from: Option<Color>, to: Color, targets: &[String]) {
        if let Some(from) = from
            && let Err(e) = self.bounded(self.director.activate_color(from)).await
        {
            tracing::error!("failed to re-activate {} after aborted switch: {}", from, e);
        }
        self.deregister(to, targets).await;
    }

    async fn deregister(&self, color: Color, targets: &[String]) {
        if targets.is_empty() {
            return;
        }
        if let Err(e) = self
            .bounded(self.director.deregister_targets(color, targets))
            .await
        {
            tracing::warn!(
                "failed to deregister {} {} target(s) after aborted switch: {}",
                targets.len(),
                color,
                e
            );
        }
    }
}
