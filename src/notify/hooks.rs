// ABOUTME: Hook-script notifier for deployment lifecycle events.
// ABOUTME: Runs .kuapo/hooks/on-<event> with KUAPO_* environment variables.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

use super::{Notification, NotifyError, NotifyEvent, Notifier};

/// Result of running a hook.
#[derive(Debug)]
pub struct HookResult {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Discovers and runs hooks from a project directory.
#[derive(Debug, Clone)]
pub struct HookNotifier {
    hooks_dir: PathBuf,
}

impl HookNotifier {
    /// Look for hooks in `<project_dir>/.kuapo/hooks`.
    pub fn new(project_dir: &Path) -> Self {
        Self {
            hooks_dir: project_dir.join(".kuapo").join("hooks"),
        }
    }

    /// Hook filename for an event.
    pub fn filename(event: NotifyEvent) -> String {
        format!("on-{}", event.as_str())
    }

    /// Check if a hook exists for the given event.
    pub fn hook_exists(&self, event: NotifyEvent) -> bool {
        self.hook_path(event).is_file()
    }

    fn hook_path(&self, event: NotifyEvent) -> PathBuf {
        self.hooks_dir.join(Self::filename(event))
    }

    /// Environment passed to hook scripts.
    pub fn hook_env(notification: &Notification) -> HashMap<String, String> {
        let mut env = HashMap::new();
        env.insert(
            "KUAPO_EVENT".to_string(),
            notification.event.as_str().to_string(),
        );
        env.insert("KUAPO_ATTEMPT".to_string(), notification.attempt.to_string());
        env.insert("KUAPO_TARGET".to_string(), notification.target.to_string());
        env.insert(
            "KUAPO_TARGET_COLOR".to_string(),
            notification.target_color.to_string(),
        );
        if let Some(source) = notification.source_color {
            env.insert("KUAPO_SOURCE_COLOR".to_string(), source.to_string());
        }
        env.insert("KUAPO_DETAILS".to_string(), notification.details.clone());
        env
    }

    /// Run the hook for a notification if it exists.
    ///
    /// Returns None if the hook doesn't exist, or Some(HookResult) if it was run.
    pub async fn run(&self, notification: &Notification) -> Option<HookResult> {
        let hook_path = self.hook_path(notification.event);

        if !hook_path.is_file() {
            return None;
        }

        tracing::info!(
            "Running {} hook: {}",
            Self::filename(notification.event),
            hook_path.display()
        );

        let output = Command::new(&hook_path)
            .envs(Self::hook_env(notification))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await;

        Some(match output {
            Ok(output) => HookResult {
                success: output.status.success(),
                exit_code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            },
            Err(e) => HookResult {
                success: false,
                exit_code: None,
                stdout: String::new(),
                stderr: e.to_string(),
            },
        })
    }
}

#[async_trait]
impl Notifier for HookNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        match self.run(notification).await {
            None => Ok(()),
            Some(result) if result.success => Ok(()),
            Some(result) => Err(NotifyError::Delivery(format!(
                "{} hook exited with {:?}: {}",
                Self::filename(notification.event),
                result.exit_code,
                result.stderr.trim()
            ))),
        }
    }
}
