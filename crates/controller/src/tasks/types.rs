use crate::tasks::config::ControllerConfig;
use crate::tasks::status::StatusError;
use kube::Client;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Status commit failed: {0}")]
    StatusCommit(#[from] StatusError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("BuildRun {namespace}/{name} does not reference a TaskRun")]
    MissingTaskRun { namespace: String, name: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Shared state handed to every status sync
#[derive(Clone)]
pub struct Context {
    pub client: Client,
    pub namespace: String,
    pub config: Arc<ControllerConfig>,
}
