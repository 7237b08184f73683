use crate::crds::{BuildRun, TaskRun, TaskRunResult};
use crate::tasks::config::ControllerConfig;
use crate::tasks::status::{
    CommitContext, CommitOutcome, KubeStatusWriter, StatusCommitter, StatusError,
};
use crate::tasks::types::{Context, Error, Result};
use kube::{Api, Resource};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Copy the results of a `TaskRun` onto its `BuildRun` and commit the status.
///
/// `task_run_name` overrides the `TaskRun` recorded in the `BuildRun`
/// status. A `TaskRun` without results still produces a commit so the
/// status reflects that nothing was reported. Every API call, including the
/// initial reads, stops when `commit_ctx` is cancelled or expires.
#[instrument(skip(ctx, commit_ctx), fields(namespace = %ctx.namespace))]
pub async fn sync_build_run_status(
    ctx: &Context,
    build_run_name: &str,
    task_run_name: Option<&str>,
    commit_ctx: &CommitContext,
    dry_run: bool,
) -> Result<CommitOutcome> {
    check_config(&ctx.config)?;

    let build_runs: Api<BuildRun> = Api::namespaced(ctx.client.clone(), &ctx.namespace);
    let build_run = get_within(commit_ctx, &build_runs, build_run_name).await?;

    let task_run_name = resolve_task_run_name(&build_run, task_run_name)
        .ok_or_else(|| Error::MissingTaskRun {
            namespace: ctx.namespace.clone(),
            name: build_run_name.to_string(),
        })?;

    let task_runs: Api<TaskRun> = Api::namespaced(ctx.client.clone(), &ctx.namespace);
    let task_run = get_within(commit_ctx, &task_runs, &task_run_name).await?;
    let results = task_run_results(&task_run);
    debug!(task_run = %task_run_name, results = results.len(), "Loaded TaskRun results");
    if results.is_empty() {
        warn!(task_run = %task_run_name, "TaskRun has not reported any results");
    }

    let writer = Arc::new(
        KubeStatusWriter::new(ctx.client.clone())
            .with_field_manager(ctx.config.status.field_manager.clone()),
    );
    let committer = StatusCommitter::from_config(writer.clone(), writer, &ctx.config.status)
        .with_dry_run(dry_run);

    let outcome = committer.commit(commit_ctx, build_run, results).await?;
    info!(
        build_run = %build_run_name,
        task_run = %task_run_name,
        attempts = outcome.attempts,
        rejected = outcome.diagnostics.len(),
        "Synchronized BuildRun status from TaskRun results"
    );
    Ok(outcome)
}

pub(crate) fn check_config(config: &ControllerConfig) -> Result<()> {
    config
        .validate()
        .map_err(|e| Error::ConfigError(e.to_string()))
}

/// Read `name` unless `commit_ctx` ends first
async fn get_within<K>(commit_ctx: &CommitContext, api: &Api<K>, name: &str) -> Result<K>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    commit_ctx
        .run(async { api.get(name).await.map_err(StatusError::from) })
        .await
        .map_err(Error::from)
}

/// The `TaskRun` to read results from: the explicit override, else the one
/// recorded on the `BuildRun`
pub(crate) fn resolve_task_run_name(
    build_run: &BuildRun,
    explicit: Option<&str>,
) -> Option<String> {
    explicit
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .or_else(|| {
            build_run
                .status
                .as_ref()
                .and_then(|status| status.task_run_name.clone())
                .filter(|name| !name.is_empty())
        })
}

pub(crate) fn task_run_results(task_run: &TaskRun) -> &[TaskRunResult] {
    task_run
        .status
        .as_ref()
        .map_or(&[], |status| status.results.as_slice())
}
