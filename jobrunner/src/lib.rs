//! Job execution guard layer.
//!
//! Sits between whatever decides *when* work runs (cron expressions,
//! intervals, direct calls) and the work itself, and makes "run this now"
//! safe under concurrency:
//! - 🛡️ Failures and panics inside a job are logged, never propagated
//! - 🚦 A process-wide limiter caps how many jobs run at once
//! - 🔒 Jobs sharing an identity never overlap; a trigger during a run is
//!   deferred into at most one rerun
//! - ⏰ Standard five-field cron syntax, `@descriptors` and `@every`
//!
//! ## Quick Start - Triggers
//!
//! ```
//! use jobrunner::Trigger;
//!
//! // Every weekday at 9 AM, classic cron syntax
//! let trigger = Trigger::parse("0 9 * * 1-5").unwrap();
//! assert!(matches!(trigger, Trigger::Cron(_)));
//!
//! // Malformed specs are rejected before anything is scheduled
//! assert!(Trigger::parse("not a valid expr").is_err());
//! ```
//!
//! ## Complete Example
//!
//! ```no_run
//! use jobrunner::prelude::*;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), RunnerError> {
//!     let dispatcher = Dispatcher::from_env()?;
//!
//!     // Never two overlapping reports; a late tick reruns once afterwards
//!     dispatcher.schedule(
//!         "*/10 * * * *",
//!         Func::new(|| async {
//!             println!("building report");
//!             Ok(())
//!         }),
//!         Some("report"),
//!     )?;
//!
//!     // Fire and forget
//!     dispatcher.after(Duration::from_secs(5), Func::new(|| async { Ok(()) }));
//!
//!     dispatcher.start()?;
//!     tokio::time::sleep(Duration::from_secs(3600)).await;
//!     dispatcher.stop()
//! }
//! ```

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod expression;
pub mod guard;
pub mod job;
pub mod limiter;
pub mod scheduler;
pub mod sequencer;

pub use config::RunnerConfig;
pub use dispatcher::Dispatcher;
pub use error::{RunnerError, RunnerResult};
pub use expression::{CronExpression, CronPresets, Trigger};
pub use guard::guard;
pub use job::{Func, Job, JobError, JobRef, JobResult, RunStatus};
pub use limiter::{Limiter, Slot};
pub use scheduler::{EntryId, Scheduler};
pub use sequencer::{Admission, Dispatch, Flight, FlightPhase, Sequencer};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::RunnerConfig;
    pub use crate::dispatcher::Dispatcher;
    pub use crate::error::{RunnerError, RunnerResult};
    pub use crate::expression::{CronExpression, Trigger};
    pub use crate::job::{Func, Job, JobResult, RunStatus};
    pub use crate::sequencer::Dispatch;
    pub use crate::scheduler::EntryId;
}
