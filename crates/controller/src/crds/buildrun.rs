//! `BuildRun` Custom Resource Definition for image build executions

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Reference to the `Build` a `BuildRun` executes
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
pub struct BuildReference {
    /// Name of the `Build` in the same namespace
    pub name: String,
}

/// Output image override for a single run
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
pub struct OutputImage {
    /// Fully qualified image reference to push to
    pub image: String,
}

/// `BuildRun` CRD for a single build execution request
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(group = "shipwright.io", version = "v1beta1", kind = "BuildRun")]
#[kube(namespaced)]
#[kube(status = "BuildRunStatus")]
#[kube(printcolumn = r#"{"name":"Build","type":"string","jsonPath":".spec.build.name"}"#)]
#[kube(printcolumn = r#"{"name":"TaskRun","type":"string","jsonPath":".status.taskRunName"}"#)]
#[kube(printcolumn = r#"{"name":"Digest","type":"string","jsonPath":".status.output.digest"}"#)]
#[kube(printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#)]
pub struct BuildRunSpec {
    /// The `Build` this run executes
    pub build: BuildReference,

    /// `ServiceAccount` used by the generated `TaskRun`
    #[serde(rename = "serviceAccount", default, skip_serializing_if = "Option::is_none")]
    pub service_account: Option<String>,

    /// Maximum duration of the run (Go duration syntax, e.g. "10m")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,

    /// Overrides the output image declared on the `Build`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<OutputImage>,
}

/// Status of the `BuildRun`
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BuildRunStatus {
    /// Name of the `TaskRun` executing this build
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_run_name: Option<String>,

    /// Time the `TaskRun` started (RFC3339 format)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,

    /// Time the `TaskRun` finished (RFC3339 format)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<String>,

    /// Conditions for the `BuildRun`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Vec<BuildRunCondition>>,

    /// Provenance of the source that was built
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceResult>,

    /// Properties of the image that was produced
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Output>,

    /// Reason and message reported by a failing build step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_details: Option<FailureDetails>,
}

/// Properties of the produced image, each set independently
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Output {
    /// Content-addressable digest of the pushed image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,

    /// Compressed size of the image in bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,

    /// Vulnerabilities reported by the image scan
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vulnerabilities: Option<Vec<Vulnerability>>,
}

/// A single vulnerability found in the output image
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
pub struct Vulnerability {
    /// Identifier of the vulnerability (e.g. a CVE id)
    pub id: String,

    pub severity: VulnerabilitySeverity,
}

/// Severity of a [`Vulnerability`]
#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum VulnerabilitySeverity {
    Low,
    Medium,
    High,
    Critical,
    Unknown,
}

impl VulnerabilitySeverity {
    /// Maps the single-letter code emitted by the image scanner to a severity.
    ///
    /// `L`, `M`, `H` and `C` are accepted in either case; everything else is
    /// [`VulnerabilitySeverity::Unknown`].
    #[must_use]
    pub fn from_code(code: &str) -> Self {
        match code.to_ascii_uppercase().as_str() {
            "L" => Self::Low,
            "M" => Self::Medium,
            "H" => Self::High,
            "C" => Self::Critical,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for VulnerabilitySeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Provenance of the built source
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SourceResult {
    /// Result of a Git clone
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<GitSourceResult>,

    /// Result of an OCI artifact (source bundle) pull
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oci_artifact: Option<OciArtifactSourceResult>,

    /// Timestamp of the source content (RFC3339 format)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GitSourceResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_sha: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_author: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_name: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
pub struct OciArtifactSourceResult {
    /// Digest of the pulled source bundle image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

/// Failure information surfaced by the failing build step
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
pub struct FailureDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Condition for the `BuildRun`
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BuildRunCondition {
    /// Type of condition
    #[serde(rename = "type")]
    pub condition_type: String,

    /// Status of the condition (True, False, or Unknown)
    pub status: String,

    /// Last time the condition transitioned (RFC3339 format)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,

    /// Reason for the condition's last transition
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable message about the condition
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_codes_are_case_insensitive() {
        for (code, expected) in [
            ("L", VulnerabilitySeverity::Low),
            ("l", VulnerabilitySeverity::Low),
            ("M", VulnerabilitySeverity::Medium),
            ("m", VulnerabilitySeverity::Medium),
            ("H", VulnerabilitySeverity::High),
            ("h", VulnerabilitySeverity::High),
            ("C", VulnerabilitySeverity::Critical),
            ("c", VulnerabilitySeverity::Critical),
        ] {
            assert_eq!(VulnerabilitySeverity::from_code(code), expected, "code {code}");
        }
    }

    #[test]
    fn unrecognized_severity_codes_are_unknown() {
        for code in ["", "X", "LL", "low", "critical", " H", "1"] {
            assert_eq!(
                VulnerabilitySeverity::from_code(code),
                VulnerabilitySeverity::Unknown,
                "code {code:?}"
            );
        }
    }

    #[test]
    fn status_serializes_camel_case_and_skips_unset_fields() {
        let status = BuildRunStatus {
            task_run_name: Some("build-run-abc".to_string()),
            output: Some(Output {
                digest: Some("sha256:abcd".to_string()),
                size: Some(1024),
                vulnerabilities: Some(vec![Vulnerability {
                    id: "CVE-2024-0001".to_string(),
                    severity: VulnerabilitySeverity::Critical,
                }]),
            }),
            ..Default::default()
        };

        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "taskRunName": "build-run-abc",
                "output": {
                    "digest": "sha256:abcd",
                    "size": 1024,
                    "vulnerabilities": [{"id": "CVE-2024-0001", "severity": "critical"}]
                }
            })
        );
    }

    #[test]
    fn source_result_round_trips_through_json() {
        let raw = serde_json::json!({
            "git": {"commitSha": "f00ba4", "commitAuthor": "jane", "branchName": "main"},
            "ociArtifact": {"digest": "sha256:1234"},
            "timestamp": "2024-01-02T03:04:05+00:00"
        });

        let source: SourceResult = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(
            source.git.as_ref().and_then(|g| g.branch_name.as_deref()),
            Some("main")
        );
        assert_eq!(serde_json::to_value(&source).unwrap(), raw);
    }
}
