//! # BuildRun status persistence
//!
//! [`StatusWriter`] is the seam between status computation and the API
//! server. [`KubeStatusWriter`] talks to a cluster, [`fakes`] provides a
//! recording double, and [`StatusCommitter`] drives the optimistic
//! concurrency loop on top of either.

use crate::crds::{BuildRun, BuildRunStatus};
use async_trait::async_trait;
use kube::Resource;
use serde_json::{json, Map, Value};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub mod commit;
pub mod fakes;
pub mod kube_writer;

pub use commit::{CommitOutcome, StatusCommitter};
pub use kube_writer::KubeStatusWriter;

/// Errors returned by status writes
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StatusError {
    /// The object changed since it was read (stale resourceVersion)
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("API error {code} ({reason}): {message}")]
    Api {
        code: u16,
        reason: String,
        message: String,
    },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Object is missing {0}")]
    MissingObjectKey(&'static str),

    #[error("Status commit cancelled")]
    Cancelled,

    #[error("Status commit deadline exceeded")]
    DeadlineExceeded,

    #[error("Status commit gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<StatusError>,
    },
}

impl StatusError {
    /// Whether a refetch and retry can resolve the error
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

impl From<kube::Error> for StatusError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(ae) => match ae.code {
                409 if ae.reason == "AlreadyExists" => Self::AlreadyExists(ae.message),
                409 => Self::Conflict(ae.message),
                404 => Self::NotFound(ae.message),
                403 => Self::Forbidden(ae.message),
                code => Self::Api {
                    code,
                    reason: ae.reason,
                    message: ae.message,
                },
            },
            kube::Error::SerdeError(e) => Self::Serialization(e.to_string()),
            other => Self::Transport(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for StatusError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Cancellation and deadline for one status commit
#[derive(Debug, Clone, Default)]
pub struct CommitContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl CommitContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A context that expires `timeout` from now
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// Tie the context to an externally owned token
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Fails if the context is already cancelled or past its deadline
    pub fn check(&self) -> Result<(), StatusError> {
        if self.token.is_cancelled() {
            return Err(StatusError::Cancelled);
        }
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(StatusError::DeadlineExceeded);
        }
        Ok(())
    }

    /// Run `fut` until it completes, the context is cancelled, or the
    /// deadline passes, whichever happens first
    pub async fn run<T, F>(&self, fut: F) -> Result<T, StatusError>
    where
        F: Future<Output = Result<T, StatusError>>,
    {
        self.check()?;

        let deadline = self.deadline;
        let expired = async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            () = self.token.cancelled() => Err(StatusError::Cancelled),
            () = expired => Err(StatusError::DeadlineExceeded),
            result = fut => result,
        }
    }

    /// Sleep for `duration` unless the context ends first
    pub async fn sleep(&self, duration: Duration) -> Result<(), StatusError> {
        self.run(async {
            tokio::time::sleep(duration).await;
            Ok(())
        })
        .await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOption {
    DryRun,
    FieldManager(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOption {
    DryRun,
    FieldManager(String),
    /// Take ownership of conflicting fields; only honored for apply patches
    Force,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOption {
    DryRun,
    FieldManager(String),
}

/// A partial status update
#[derive(Debug, Clone, PartialEq)]
pub enum StatusPatch {
    /// JSON merge patch
    Merge(Value),
    /// Server-side apply
    Apply(Value),
}

impl StatusPatch {
    /// Merge patch of the result-derived status fields, guarded by the
    /// resourceVersion the object was read at
    pub fn merge_from(build_run: &BuildRun) -> Result<Self, StatusError> {
        Ok(Self::Merge(json!({
            "metadata": Self::version_guard(build_run)?,
            "status": Self::result_fields(build_run)?,
        })))
    }

    /// Apply configuration owning the result-derived status fields
    pub fn apply_from(build_run: &BuildRun) -> Result<Self, StatusError> {
        let mut metadata = Self::version_guard(build_run)?;
        metadata.insert(
            "name".to_string(),
            Value::String(
                build_run
                    .metadata
                    .name
                    .clone()
                    .ok_or(StatusError::MissingObjectKey("metadata.name"))?,
            ),
        );

        Ok(Self::Apply(json!({
            "apiVersion": BuildRun::api_version(&()),
            "kind": BuildRun::kind(&()),
            "metadata": metadata,
            "status": Self::result_fields(build_run)?,
        })))
    }

    #[must_use]
    pub fn body(&self) -> &Value {
        match self {
            Self::Merge(body) | Self::Apply(body) => body,
        }
    }

    fn version_guard(build_run: &BuildRun) -> Result<Map<String, Value>, StatusError> {
        let resource_version = build_run
            .metadata
            .resource_version
            .clone()
            .ok_or(StatusError::MissingObjectKey("metadata.resourceVersion"))?;

        let mut metadata = Map::new();
        metadata.insert(
            "resourceVersion".to_string(),
            Value::String(resource_version),
        );
        Ok(metadata)
    }

    fn result_fields(build_run: &BuildRun) -> Result<Map<String, Value>, StatusError> {
        let mut fields = Map::new();
        let Some(status) = build_run.status.as_ref() else {
            return Ok(fields);
        };

        if let Some(source) = &status.source {
            fields.insert("source".to_string(), serde_json::to_value(source)?);
        }
        if let Some(output) = &status.output {
            fields.insert("output".to_string(), serde_json::to_value(output)?);
        }
        if let Some(failure_details) = &status.failure_details {
            fields.insert(
                "failureDetails".to_string(),
                serde_json::to_value(failure_details)?,
            );
        }
        Ok(fields)
    }
}

/// Writes the status subresource of a `BuildRun`.
///
/// Implementations must be safe to call concurrently and must give up as
/// soon as `ctx` is cancelled or expires.
#[async_trait]
pub trait StatusWriter: Send + Sync {
    /// Initialize the status subresource of `owner`
    async fn create(
        &self,
        ctx: &CommitContext,
        owner: &BuildRun,
        status: &BuildRunStatus,
        options: &[CreateOption],
    ) -> Result<(), StatusError>;

    /// Apply a partial update to the status of `owner`
    async fn patch(
        &self,
        ctx: &CommitContext,
        owner: &BuildRun,
        patch: &StatusPatch,
        options: &[PatchOption],
    ) -> Result<(), StatusError>;

    /// Replace the status of `owner`; fails with a conflict when the
    /// object's resourceVersion is stale
    async fn update(
        &self,
        ctx: &CommitContext,
        owner: &BuildRun,
        options: &[UpdateOption],
    ) -> Result<(), StatusError>;
}

/// Reads the live `BuildRun` so a conflicting write can be redone
#[async_trait]
pub trait BuildRunReader: Send + Sync {
    async fn get(
        &self,
        ctx: &CommitContext,
        namespace: &str,
        name: &str,
    ) -> Result<BuildRun, StatusError>;
}
