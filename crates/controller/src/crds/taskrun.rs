//! Read-only view of the Tekton `TaskRun` resource that executes a `BuildRun`
//!
//! Only the fields the controller consumes are modelled; the spec is kept as
//! free-form JSON because its composition belongs to the strategy templating.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// `TaskRun` spec, kept opaque
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(group = "tekton.dev", version = "v1", kind = "TaskRun")]
#[kube(namespaced)]
#[kube(status = "TaskRunStatus")]
pub struct TaskRunSpec {
    #[serde(flatten)]
    pub fields: BTreeMap<String, serde_json::Value>,
}

/// Status of the `TaskRun`
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TaskRunStatus {
    /// Pod executing the task steps
    #[serde(default)]
    pub pod_name: Option<String>,

    #[serde(default)]
    pub start_time: Option<String>,

    #[serde(default)]
    pub completion_time: Option<String>,

    /// Named results emitted by the task steps
    #[serde(default)]
    pub results: Vec<TaskRunResult>,

    #[serde(default)]
    pub conditions: Vec<TaskRunCondition>,
}

/// A named result produced by a `TaskRun`
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
pub struct TaskRunResult {
    /// Result name, e.g. `shp-image-digest`
    pub name: String,

    /// Declared result type (`string`, `array` or `object`)
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub result_type: Option<String>,

    pub value: ResultValue,
}

impl TaskRunResult {
    /// Builds a string-typed result
    pub fn string(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            result_type: Some("string".to_string()),
            value: ResultValue::String(value.into()),
        }
    }
}

/// Value of a [`TaskRunResult`]
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
#[serde(untagged)]
pub enum ResultValue {
    String(String),
    Array(Vec<String>),
    Object(BTreeMap<String, String>),
}

impl ResultValue {
    /// The string payload, or `""` for array and object values
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::String(value) => value,
            Self::Array(_) | Self::Object(_) => "",
        }
    }
}

/// Condition for the `TaskRun`
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskRunCondition {
    #[serde(rename = "type")]
    pub condition_type: String,

    pub status: String,

    #[serde(default)]
    pub reason: Option<String>,

    #[serde(default)]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn results_deserialize_from_tekton_status() {
        let status: TaskRunStatus = serde_json::from_value(serde_json::json!({
            "podName": "build-abc-pod",
            "results": [
                {"name": "shp-image-digest", "type": "string", "value": "sha256:abcd"},
                {"name": "shp-tags", "type": "array", "value": ["latest", "v1"]},
                {"name": "shp-labels", "type": "object", "value": {"team": "build"}}
            ],
            "conditions": [{"type": "Succeeded", "status": "True", "reason": "Succeeded"}]
        }))
        .unwrap();

        assert_eq!(status.pod_name.as_deref(), Some("build-abc-pod"));
        assert_eq!(status.results.len(), 3);
        assert_eq!(status.results[0].value.as_str(), "sha256:abcd");
        assert_eq!(status.results[1].value.as_str(), "");
        assert_eq!(status.results[2].value.as_str(), "");
        assert_eq!(status.conditions[0].condition_type, "Succeeded");
    }

    #[test]
    fn missing_results_default_to_empty() {
        let status: TaskRunStatus = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(status.results.is_empty());
        assert!(status.conditions.is_empty());
    }
}
