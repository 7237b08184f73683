//! Output image results: digest, size and vulnerabilities

use super::{reject, result_name, ResultDiagnostic, TaskResultDeclaration};
use crate::crds::{BuildRun, Output, TaskRunResult};
use crate::tasks::buildrun::vulnerabilities::decode_vulnerabilities;

const IMAGE_DIGEST_RESULT: &str = "image-digest";
const IMAGE_SIZE_RESULT: &str = "image-size";
const IMAGE_VULNERABILITIES_RESULT: &str = "image-vulnerabilities";

/// Results the output step declares on the generated `TaskRun`
#[must_use]
pub fn output_result_declarations() -> Vec<TaskResultDeclaration> {
    [
        (IMAGE_DIGEST_RESULT, "The digest of the image"),
        (IMAGE_SIZE_RESULT, "The compressed size of the image"),
        (IMAGE_VULNERABILITIES_RESULT, "List of vulnerabilities"),
    ]
    .into_iter()
    .map(|(key, description)| TaskResultDeclaration {
        name: result_name(key),
        description: description.to_string(),
    })
    .collect()
}

fn output_mut(build_run: &mut BuildRun) -> &mut Output {
    build_run
        .status
        .get_or_insert_with(Default::default)
        .output
        .get_or_insert_with(Default::default)
}

/// Merge the output image results into `status.output`.
///
/// Results that are absent leave their field as it was. An unparsable size
/// is logged and skipped without affecting the other fields; malformed
/// vulnerability entries are dropped from the list individually.
pub fn update_status_with_output_result(
    build_run: &mut BuildRun,
    results: &[TaskRunResult],
) -> Vec<ResultDiagnostic> {
    let digest_name = result_name(IMAGE_DIGEST_RESULT);
    let size_name = result_name(IMAGE_SIZE_RESULT);
    let vulnerabilities_name = result_name(IMAGE_VULNERABILITIES_RESULT);

    let mut diagnostics = Vec::new();

    for result in results {
        let value = result.value.as_str();

        if result.name == digest_name {
            output_mut(build_run).digest = Some(value.to_string());
        } else if result.name == size_name {
            match value.parse::<i64>() {
                Ok(size) => output_mut(build_run).size = Some(size),
                Err(e) => diagnostics.push(reject(
                    build_run,
                    &result.name,
                    format!("invalid image size '{value}': {e}"),
                )),
            }
        } else if result.name == vulnerabilities_name {
            let decoded = decode_vulnerabilities(value);
            for error in &decoded.errors {
                diagnostics.push(reject(build_run, &result.name, error.to_string()));
            }
            output_mut(build_run).vulnerabilities = Some(decoded.vulnerabilities);
        }
    }

    diagnostics
}
