// ABOUTME: Application-wide error types for kuapo.
// ABOUTME: Uses thiserror for ergonomic error handling.

use std::path::PathBuf;
use thiserror::Error;

use crate::deploy::DeployError;
use crate::store::StoreError;
use crate::types::InvalidAttemptId;

#[derive(Debug, Error)]
pub enum Error {
    #[error("file already exists: {0}")]
    AlreadyExists(PathBuf),

    #[error("configuration file not found in {0}")]
    ConfigNotFound(PathBuf),

    #[error("unknown target: {0}")]
    UnknownTarget(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("no attempts recorded for target {0}")]
    NoAttempts(String),

    #[error("deployment finished as {0}")]
    AttemptUnsuccessful(String),

    #[error(transparent)]
    InvalidAttemptId(#[from] InvalidAttemptId),

    #[error(transparent)]
    Deploy(#[from] DeployError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
