use thiserror::Error;

use super::task::TaskError;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("task failed: {0}")]
    Task(#[from] TaskError),
    #[error("service setup failed: {0}")]
    Service(#[from] ServiceError),
    #[error("command failed: {0}")]
    Command(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

/// Failures while wiring collaborators from configuration.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("config error: {0}")]
    Config(String),
    #[error("plugin error: {0}")]
    Plugin(#[from] anyhow::Error),
}
