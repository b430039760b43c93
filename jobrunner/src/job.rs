//! Job definition.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

/// Error a job may return to report a failed run.
pub type JobError = Box<dyn std::error::Error + Send + Sync>;

/// Result of one job run.
pub type JobResult = Result<(), JobError>;

/// Shared handle to a job. The same value is reused for every run it gets.
pub type JobRef = Arc<dyn Job>;

/// A unit of work.
///
/// The guard layer owns no state of the job; anything the job mutates belongs
/// to whoever built it. A run fails by returning `Err` or by panicking; both
/// are intercepted before they reach the caller.
#[async_trait]
pub trait Job: Send + Sync + 'static {
    /// Execute the job once.
    async fn run(&self) -> JobResult;
}

#[async_trait]
impl<J> Job for Arc<J>
where
    J: Job + ?Sized,
{
    async fn run(&self) -> JobResult {
        (**self).run().await
    }
}

/// Adapter turning a closure into a [`Job`].
///
/// # Examples
///
/// ```
/// use jobrunner::job::{Func, Job};
///
/// # #[tokio::main]
/// # async fn main() {
/// let job = Func::new(|| async {
///     println!("refreshing caches");
///     Ok(())
/// });
///
/// assert!(job.run().await.is_ok());
/// # }
/// ```
pub struct Func<F> {
    function: F,
}

impl<F, Fut> Func<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = JobResult> + Send + 'static,
{
    /// Wrap `function` as a job.
    pub fn new(function: F) -> Self {
        Self { function }
    }
}

impl<F> std::fmt::Debug for Func<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Func").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F, Fut> Job for Func<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = JobResult> + Send + 'static,
{
    async fn run(&self) -> JobResult {
        (self.function)().await
    }
}

/// Outcome of one guarded run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    /// Job returned `Ok`
    Completed,

    /// Job returned an error or panicked
    Failed(String),
}

impl RunStatus {
    /// Whether the run failed.
    pub fn is_failed(&self) -> bool {
        matches!(self, RunStatus::Failed(_))
    }
}
