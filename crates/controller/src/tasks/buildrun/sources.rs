//! Source provenance results written by the Git clone and bundle pull steps

use super::{reject, result_name, ResultDiagnostic, TaskResultDeclaration};
use crate::crds::{BuildRun, GitSourceResult, OciArtifactSourceResult, SourceResult, TaskRunResult};
use chrono::DateTime;

/// Name of the single source a build currently has
pub const DEFAULT_SOURCE_NAME: &str = "default";

const COMMIT_SHA_RESULT: &str = "commit-sha";
const COMMIT_AUTHOR_RESULT: &str = "commit-author";
const BRANCH_NAME_RESULT: &str = "branch-name";
const BUNDLE_IMAGE_DIGEST_RESULT: &str = "image-digest";
const SOURCE_TIMESTAMP_RESULT: &str = "source-timestamp";

fn source_result_name(key: &str) -> String {
    result_name(&format!("source-{DEFAULT_SOURCE_NAME}-{key}"))
}

/// Results the source steps declare on the generated `TaskRun`
#[must_use]
pub fn source_result_declarations() -> Vec<TaskResultDeclaration> {
    [
        (COMMIT_SHA_RESULT, "The commit SHA of the cloned source"),
        (COMMIT_AUTHOR_RESULT, "The author of the last commit of the cloned source"),
        (BRANCH_NAME_RESULT, "The name of the branch used of the cloned source"),
        (BUNDLE_IMAGE_DIGEST_RESULT, "The digest of the source bundle image"),
        (SOURCE_TIMESTAMP_RESULT, "The timestamp of the source content in seconds since epoch"),
    ]
    .into_iter()
    .map(|(key, description)| TaskResultDeclaration {
        name: source_result_name(key),
        description: description.to_string(),
    })
    .collect()
}

fn source_mut(build_run: &mut BuildRun) -> &mut SourceResult {
    build_run
        .status
        .get_or_insert_with(Default::default)
        .source
        .get_or_insert_with(Default::default)
}

fn git_mut(build_run: &mut BuildRun) -> &mut GitSourceResult {
    source_mut(build_run)
        .git
        .get_or_insert_with(Default::default)
}

fn oci_artifact_mut(build_run: &mut BuildRun) -> &mut OciArtifactSourceResult {
    source_mut(build_run)
        .oci_artifact
        .get_or_insert_with(Default::default)
}

fn parse_source_timestamp(value: &str) -> Result<String, String> {
    let seconds = value
        .trim()
        .parse::<i64>()
        .map_err(|e| format!("invalid source timestamp '{value}': {e}"))?;

    DateTime::from_timestamp(seconds, 0)
        .map(|ts| ts.to_rfc3339())
        .ok_or_else(|| format!("source timestamp {seconds} is out of range"))
}

/// Merge the source provenance results into `status.source`.
///
/// Same policy as the output results: absent results keep their field, an
/// invalid timestamp is logged and skipped.
pub fn update_status_with_source_result(
    build_run: &mut BuildRun,
    results: &[TaskRunResult],
) -> Vec<ResultDiagnostic> {
    let commit_sha = source_result_name(COMMIT_SHA_RESULT);
    let commit_author = source_result_name(COMMIT_AUTHOR_RESULT);
    let branch_name = source_result_name(BRANCH_NAME_RESULT);
    let bundle_digest = source_result_name(BUNDLE_IMAGE_DIGEST_RESULT);
    let timestamp = source_result_name(SOURCE_TIMESTAMP_RESULT);

    let mut diagnostics = Vec::new();

    for result in results {
        let value = result.value.as_str();
        let name = result.name.as_str();

        if name == commit_sha {
            git_mut(build_run).commit_sha = Some(value.to_string());
        } else if name == commit_author {
            git_mut(build_run).commit_author = Some(value.to_string());
        } else if name == branch_name {
            git_mut(build_run).branch_name = Some(value.to_string());
        } else if name == bundle_digest {
            oci_artifact_mut(build_run).digest = Some(value.to_string());
        } else if name == timestamp {
            match parse_source_timestamp(value) {
                Ok(ts) => source_mut(build_run).timestamp = Some(ts),
                Err(reason) => diagnostics.push(reject(build_run, name, reason)),
            }
        }
    }

    diagnostics
}
