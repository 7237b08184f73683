//! Failure details reported by a failing build step

use super::result_name;
use crate::crds::{BuildRun, FailureDetails, TaskRunResult};

const ERROR_REASON_RESULT: &str = "error-reason";
const ERROR_MESSAGE_RESULT: &str = "error-message";

fn failure_details_mut(build_run: &mut BuildRun) -> &mut FailureDetails {
    build_run
        .status
        .get_or_insert_with(Default::default)
        .failure_details
        .get_or_insert_with(Default::default)
}

/// Merge the step-reported error reason and message into
/// `status.failureDetails`. Empty values are ignored.
pub fn update_status_with_failure_result(
    build_run: &mut BuildRun,
    results: &[TaskRunResult],
) {
    let reason_name = result_name(ERROR_REASON_RESULT);
    let message_name = result_name(ERROR_MESSAGE_RESULT);

    for result in results {
        let value = result.value.as_str().trim();
        if value.is_empty() {
            continue;
        }

        if result.name == reason_name {
            failure_details_mut(build_run).reason = Some(value.to_string());
        } else if result.name == message_name {
            failure_details_mut(build_run).message = Some(value.to_string());
        }
    }
}
