//! # BuildRun result propagation
//!
//! Folds the named results of a finished (or partially finished) `TaskRun`
//! into the owning `BuildRun` status. Every extractor merges field by field:
//! a result that is missing or malformed never clears a value recorded by an
//! earlier pass.

use crate::crds::{BuildRun, TaskRunResult};
use kube::ResourceExt;
use std::fmt;
use tracing::warn;

pub mod controller;
pub mod failures;
pub mod results;
pub mod sources;
pub mod vulnerabilities;

pub use controller::sync_build_run_status;
pub use failures::update_status_with_failure_result;
pub use results::{output_result_declarations, update_status_with_output_result};
pub use sources::{source_result_declarations, update_status_with_source_result};
pub use vulnerabilities::{decode_vulnerabilities, DecodedVulnerabilities, VulnerabilityDecodeError};

/// Prefix shared by every result, param and volume the controller generates
pub const RESULT_PREFIX: &str = "shp";

/// Fully qualified result name for a logical result key
#[must_use]
pub fn result_name(key: &str) -> String {
    format!("{RESULT_PREFIX}-{key}")
}

/// A task result that is declared on the generated `TaskRun`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskResultDeclaration {
    pub name: String,
    pub description: String,
}

/// A result value that could not be applied to the status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultDiagnostic {
    /// Full name of the offending result
    pub result: String,
    /// Why the value was rejected
    pub reason: String,
}

impl fmt::Display for ResultDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.result, self.reason)
    }
}

/// Log a rejected result against its owning `BuildRun` and hand it back
pub(crate) fn reject(
    build_run: &BuildRun,
    result: &str,
    reason: impl Into<String>,
) -> ResultDiagnostic {
    let diagnostic = ResultDiagnostic {
        result: result.to_string(),
        reason: reason.into(),
    };
    warn!(
        namespace = %build_run.namespace().unwrap_or_default(),
        name = %build_run.name_any(),
        result = %diagnostic.result,
        error = %diagnostic.reason,
        "Ignoring invalid value from TaskRun result"
    );
    diagnostic
}

/// Surface the results of a `TaskRun` on its `BuildRun`.
///
/// Source results are applied before output results, and failure details
/// last. Only the in-memory object is touched; persisting it is the job of
/// [`crate::tasks::status::StatusCommitter`]. The returned diagnostics have
/// already been logged.
pub fn update_build_run_using_task_results(
    build_run: &mut BuildRun,
    results: &[TaskRunResult],
) -> Vec<ResultDiagnostic> {
    let mut diagnostics = update_status_with_source_result(build_run, results);
    diagnostics.extend(update_status_with_output_result(build_run, results));
    update_status_with_failure_result(build_run, results);
    diagnostics
}


#[cfg(test)]
mod tests {
    use super::test_support::build_run;
    use super::*;
    use crate::crds::VulnerabilitySeverity;

    #[test]
    fn result_names_carry_the_prefix() {
        assert_eq!(result_name("image-digest"), "shp-image-digest");
    }

    #[test]
    fn driver_applies_source_output_and_failure_results() {
        let mut br = build_run("driver");
        let results = vec![
            TaskRunResult::string("shp-source-default-commit-sha", "f00ba4"),
            TaskRunResult::string("shp-image-digest", "sha256:abcd"),
            TaskRunResult::string("shp-image-size", "10485760"),
            TaskRunResult::string("shp-image-vulnerabilities", "cve-9999:C"),
            TaskRunResult::string("shp-error-reason", "PushFailed"),
        ];

        let diagnostics = update_build_run_using_task_results(&mut br, &results);
        assert!(diagnostics.is_empty());

        let status = br.status.unwrap();
        let git = status.source.unwrap().git.unwrap();
        assert_eq!(git.commit_sha.as_deref(), Some("f00ba4"));

        let output = status.output.unwrap();
        assert_eq!(output.digest.as_deref(), Some("sha256:abcd"));
        assert_eq!(output.size, Some(10_485_760));
        let vulns = output.vulnerabilities.unwrap();
        assert_eq!(vulns.len(), 1);
        assert_eq!(vulns[0].id, "cve-9999");
        assert_eq!(vulns[0].severity, VulnerabilitySeverity::Critical);

        assert_eq!(
            status.failure_details.unwrap().reason.as_deref(),
            Some("PushFailed")
        );
    }

    #[test]
    fn driver_collects_diagnostics_from_every_extractor() {
        let mut br = build_run("diagnostics");
        let results = vec![
            TaskRunResult::string("shp-source-default-source-timestamp", "yesterday"),
            TaskRunResult::string("shp-image-size", "not-a-number"),
        ];

        let diagnostics = update_build_run_using_task_results(&mut br, &results);
        let names: Vec<_> = diagnostics.iter().map(|d| d.result.as_str()).collect();
        assert_eq!(
            names,
            vec!["shp-source-default-source-timestamp", "shp-image-size"]
        );
    }

    #[test]
    fn driver_without_results_leaves_status_untouched() {
        let mut br = build_run("empty");
        let diagnostics = update_build_run_using_task_results(&mut br, &[]);
        assert!(diagnostics.is_empty());
        assert!(br.status.is_none());
    }
}
