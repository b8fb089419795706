// ABOUTME: Runs a configured command and captures its stdout.
// ABOUTME: Non-zero exit is an error carrying the command's stderr.

use snafu::{ResultExt, Snafu, ensure};
use std::process::{ExitStatus, Stdio};
use tokio::process::Command;

use crate::config::CommandSpec;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CommandError {
    #[snafu(display("failed to run `{command}`: {source}"))]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[snafu(display("`{command}` exited with {status}: {stderr}"))]
    Exited {
        command: String,
        status: ExitStatus,
        stderr: String,
    },

    #[snafu(display("`{command}` produced unusable output: {reason}"))]
    Output { command: String, reason: String },
}

/// Run `spec` with extra environment and return its trimmed stdout.
///
/// The child is killed if the returned future is dropped, so callers can
/// bound it with a timeout.
pub async fn run_command(spec: &CommandSpec, env: &[(&str, String)]) -> Result<String, CommandError> {
    tracing::debug!("running {}", spec);

    let output = Command::new(spec.program())
        .args(spec.args())
        .envs(env.iter().map(|(k, v)| (*k, v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .context(SpawnSnafu {
            command: spec.to_string(),
        })?;

    ensure!(
        output.status.success(),
        ExitedSnafu {
            command: spec.to_string(),
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }
    );

    let stdout = String::from_utf8(output.stdout).map_err(|e| CommandError::Output {
        command: spec.to_string(),
        reason: e.to_string(),
    })?;
    Ok(stdout.trim().to_string())
}
