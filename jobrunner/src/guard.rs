//! Execution guard.
//!
//! Every run passes through [`guard`], which turns a returned error or a panic
//! inside the job into a logged [`RunStatus::Failed`].

use crate::job::{Job, RunStatus};
use futures::FutureExt;
use jobrunner_log::error;
use std::any::Any;
use std::panic::AssertUnwindSafe;

/// Name used in log records for jobs without an identity.
pub const ANONYMOUS: &str = "anonymous";

/// Run `job` once in the calling task and intercept any failure.
///
/// Emits exactly one error record per failed run and nothing on success.
pub async fn guard(job: &dyn Job, identity: Option<&str>) -> RunStatus {
    let name = identity.unwrap_or(ANONYMOUS);

    // `run` itself may panic before returning a future, so call it inside
    // the unwind boundary.
    match AssertUnwindSafe(async { job.run().await }).catch_unwind().await {
        Ok(Ok(())) => RunStatus::Completed,
        Ok(Err(e)) => {
            let detail = e.to_string();
            error!(target: "jobrunner::guard", "Job {} failed: {}", name, detail);
            RunStatus::Failed(detail)
        }
        Err(payload) => {
            let detail = format!("panic: {}", panic_message(payload.as_ref()));
            error!(target: "jobrunner::guard", "Job {} failed: {}", name, detail);
            RunStatus::Failed(detail)
        }
    }
}

/// Render a panic payload as text.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
