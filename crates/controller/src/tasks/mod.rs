pub mod buildrun;
pub mod config;
pub mod status;
pub mod types;

// Re-export commonly used items
pub use buildrun::{sync_build_run_status, update_build_run_using_task_results};
pub use config::ControllerConfig;
pub use status::{CommitContext, CommitOutcome, StatusCommitter, StatusError};
pub use types::{Context, Error, Result};
