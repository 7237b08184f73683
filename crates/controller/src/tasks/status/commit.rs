//! Optimistic-concurrency status commit
//!
//! A commit merges the task results into the `BuildRun`, writes the status
//! with the resourceVersion it read, and on a conflict refetches the live
//! object, merges again and retries. Results are always re-applied to the
//! fresh object, never to the stale copy.

use super::{
    BuildRunReader, CommitContext, CreateOption, PatchOption, StatusError, StatusPatch,
    StatusWriter, UpdateOption,
};
use crate::crds::{BuildRun, TaskRunResult};
use crate::tasks::buildrun::{update_build_run_using_task_results, ResultDiagnostic};
use crate::tasks::config::{CommitStrategy, StatusConfig};
use kube::ResourceExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

pub const DEFAULT_FIELD_MANAGER: &str = "buildrun-controller";

/// Result of a successful commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitOutcome {
    /// Number of write attempts it took, starting at 1
    pub attempts: u32,
    /// Results that were rejected during the final merge
    pub diagnostics: Vec<ResultDiagnostic>,
}

/// Commits `BuildRun` status through a [`StatusWriter`], retrying on
/// conflicts with a bounded number of attempts and exponential backoff
pub struct StatusCommitter {
    writer: Arc<dyn StatusWriter>,
    reader: Arc<dyn BuildRunReader>,
    strategy: CommitStrategy,
    max_attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
    field_manager: String,
    dry_run: bool,
}

impl StatusCommitter {
    #[must_use]
    pub fn new(writer: Arc<dyn StatusWriter>, reader: Arc<dyn BuildRunReader>) -> Self {
        Self::from_config(writer, reader, &StatusConfig::default())
    }

    #[must_use]
    pub fn from_config(
        writer: Arc<dyn StatusWriter>,
        reader: Arc<dyn BuildRunReader>,
        config: &StatusConfig,
    ) -> Self {
        Self {
            writer,
            reader,
            strategy: config.strategy,
            max_attempts: config.max_attempts.max(1),
            initial_backoff: config.initial_backoff(),
            max_backoff: config.max_backoff(),
            field_manager: config.field_manager.clone(),
            dry_run: false,
        }
    }

    #[must_use]
    pub fn with_strategy(mut self, strategy: CommitStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max.max(initial);
        self
    }

    /// Ask the API server to validate writes without persisting them
    #[must_use]
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Backoff before retry number `retry` (1-based)
    fn backoff_for(&self, retry: u32) -> Duration {
        let factor = 2_u32.saturating_pow(retry.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Merge `results` into `build_run` and persist the status.
    ///
    /// Gives up with [`StatusError::RetriesExhausted`] once every attempt
    /// ended in a conflict. Any other error, a cancelled context or an
    /// expired deadline ends the commit immediately.
    #[instrument(
        skip_all,
        fields(
            namespace = %build_run.namespace().unwrap_or_default(),
            build_run = %build_run.name_any(),
            strategy = ?self.strategy,
        )
    )]
    pub async fn commit(
        &self,
        ctx: &CommitContext,
        mut build_run: BuildRun,
        results: &[TaskRunResult],
    ) -> Result<CommitOutcome, StatusError> {
        let namespace = build_run
            .metadata
            .namespace
            .clone()
            .ok_or(StatusError::MissingObjectKey("metadata.namespace"))?;
        let name = build_run
            .metadata
            .name
            .clone()
            .ok_or(StatusError::MissingObjectKey("metadata.name"))?;

        let had_status = build_run.status.is_some();
        let mut diagnostics = update_build_run_using_task_results(&mut build_run, results);

        if !had_status
            && self.strategy == CommitStrategy::Update
            && self.initialize(ctx, &build_run).await?
        {
            // The initializing write moved the resourceVersion
            build_run = self.reader.get(ctx, &namespace, &name).await?;
            diagnostics = update_build_run_using_task_results(&mut build_run, results);
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            ctx.check()?;

            debug!(attempt, max_attempts = self.max_attempts, "Writing BuildRun status");
            let conflict = match self.write(ctx, &build_run).await {
                Ok(()) => {
                    info!(attempt, "BuildRun status committed");
                    return Ok(CommitOutcome {
                        attempts: attempt,
                        diagnostics,
                    });
                }
                Err(e) if e.is_conflict() => e,
                Err(e) => {
                    error!(attempt, error = %e, "Failed to write BuildRun status");
                    return Err(e);
                }
            };

            if attempt >= self.max_attempts {
                warn!(
                    attempts = attempt,
                    error = %conflict,
                    "Giving up on BuildRun status after repeated conflicts"
                );
                return Err(StatusError::RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(conflict),
                });
            }

            let backoff = self.backoff_for(attempt);
            warn!(
                attempt,
                backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                error = %conflict,
                "BuildRun status conflict, refetching and retrying"
            );
            ctx.sleep(backoff).await?;

            build_run = self.reader.get(ctx, &namespace, &name).await?;
            diagnostics = update_build_run_using_task_results(&mut build_run, results);
        }
    }

    /// Create the status subresource.
    ///
    /// Returns whether the object may have changed on the server, in which
    /// case the caller must refetch before writing again. An existing status
    /// or a server without a create endpoint for the subresource leaves
    /// nothing to initialize.
    async fn initialize(
        &self,
        ctx: &CommitContext,
        build_run: &BuildRun,
    ) -> Result<bool, StatusError> {
        let status = build_run.status.clone().unwrap_or_default();
        let mut options = vec![CreateOption::FieldManager(self.field_manager.clone())];
        if self.dry_run {
            options.push(CreateOption::DryRun);
        }

        match ctx
            .run(self.writer.create(ctx, build_run, &status, &options))
            .await
        {
            Ok(()) => {
                debug!("Initialized BuildRun status subresource");
                Ok(!self.dry_run)
            }
            Err(StatusError::AlreadyExists(_) | StatusError::Conflict(_)) => {
                debug!("BuildRun status subresource already initialized");
                Ok(true)
            }
            Err(StatusError::Api { code: 405, .. }) => {
                debug!("BuildRun status subresource cannot be created, updating in place");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn write(&self, ctx: &CommitContext, build_run: &BuildRun) -> Result<(), StatusError> {
        match self.strategy {
            CommitStrategy::Patch => {
                let patch = StatusPatch::merge_from(build_run)?;
                let options = self.patch_options(false);
                ctx.run(self.writer.patch(ctx, build_run, &patch, &options))
                    .await
            }
            CommitStrategy::Apply => {
                let patch = StatusPatch::apply_from(build_run)?;
                let options = self.patch_options(true);
                ctx.run(self.writer.patch(ctx, build_run, &patch, &options))
                    .await
            }
            CommitStrategy::Update => {
                let mut options = vec![UpdateOption::FieldManager(self.field_manager.clone())];
                if self.dry_run {
                    options.push(UpdateOption::DryRun);
                }
                ctx.run(self.writer.update(ctx, build_run, &options)).await
            }
        }
    }

    fn patch_options(&self, force: bool) -> Vec<PatchOption> {
        let mut options = vec![PatchOption::FieldManager(self.field_manager.clone())];
        if force {
            options.push(PatchOption::Force);
        }
        if self.dry_run {
            options.push(PatchOption::DryRun);
        }
        options
    }
}
