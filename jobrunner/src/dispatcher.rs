//! Dispatcher entry points.
//!
//! Every run takes the same path: the sequencer for its identity (if it has
//! one), then a limiter slot, then the guard around the job itself.

use crate::config::RunnerConfig;
use crate::error::RunnerResult;
use crate::expression::Trigger;
use crate::guard::{ANONYMOUS, guard};
use crate::job::{Job, JobRef, RunStatus};
use crate::limiter::Limiter;
use crate::scheduler::{Callback, EntryId, Scheduler};
use crate::sequencer::{Dispatch, Sequencer};
use futures::FutureExt;
use jobrunner_log::{error, info, warn};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;

struct Inner {
    config: RunnerConfig,
    limiter: Limiter,
    sequencer: Sequencer,
    scheduler: Scheduler,
}

impl Inner {
    async fn guarded(&self, job: &dyn Job, identity: Option<&str>) -> RunStatus {
        let _slot = match self.limiter.acquire().await {
            Ok(slot) => slot,
            Err(e) => {
                error!("Job {} not run: {}", identity.unwrap_or(ANONYMOUS), e);
                return RunStatus::Failed(e.to_string());
            }
        };

        guard(job, identity).await
    }

    async fn route(&self, job: JobRef, identity: Option<&str>) -> Dispatch {
        match identity {
            None => {
                let status = self.guarded(&*job, None).await;
                Dispatch::Ran {
                    runs: 1,
                    failures: u32::from(status.is_failed()),
                }
            }
            Some(identity) => {
                self.sequencer
                    .run(identity, job, |job| async move {
                        self.guarded(&*job, Some(identity)).await
                    })
                    .await
            }
        }
    }
}

/// Runs jobs safely: failures are contained, total concurrency is capped,
/// and runs sharing an identity never overlap.
///
/// Cloning is cheap and shares the limiter, the flight table and the
/// registered entries.
///
/// # Examples
///
/// ```no_run
/// use jobrunner::prelude::*;
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() -> Result<(), RunnerError> {
///     let dispatcher = Dispatcher::with_config(RunnerConfig::new().pool_size(4));
///
///     dispatcher.schedule(
///         "*/5 * * * *",
///         Func::new(|| async {
///             println!("rotating logs");
///             Ok(())
///         }),
///         Some("rotate-logs"),
///     )?;
///     dispatcher.every(Duration::from_secs(30), Func::new(|| async { Ok(()) }), None);
///     dispatcher.now(Func::new(|| async { Ok(()) }));
///
///     dispatcher.start()?;
///     tokio::signal::ctrl_c().await.ok();
///     dispatcher.stop()
/// }
/// ```
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    /// Create a dispatcher with the default configuration.
    pub fn new() -> Self {
        Self::with_config(RunnerConfig::default())
    }

    /// Create a dispatcher with a custom configuration.
    pub fn with_config(config: RunnerConfig) -> Self {
        info!(
            "Initializing dispatcher - pool_size: {}, min_interval: {:?}, named schedules: {}",
            config.pool_size,
            config.min_interval,
            config.schedules.len()
        );

        Self {
            inner: Arc::new(Inner {
                limiter: Limiter::new(config.pool_size),
                sequencer: Sequencer::new(),
                scheduler: Scheduler::new(),
                config,
            }),
        }
    }

    /// Create a dispatcher configured from `JOBRUNNER_*` environment variables.
    pub fn from_env() -> RunnerResult<Self> {
        RunnerConfig::from_env().map(Self::with_config)
    }

    /// Active configuration.
    pub fn config(&self) -> &RunnerConfig {
        &self.inner.config
    }

    /// The concurrency limiter shared by all runs.
    pub fn limiter(&self) -> &Limiter {
        &self.inner.limiter
    }

    /// The per-identity flight table.
    pub fn sequencer(&self) -> &Sequencer {
        &self.inner.sequencer
    }

    /// The entry registry.
    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    /// Register `job` to fire on a calendar expression.
    ///
    /// `spec` may be a named schedule from the configuration, a five to seven
    /// field expression, a `@descriptor` or `@every <duration>`. Nothing is
    /// registered if it does not parse.
    pub fn schedule<J: Job>(
        &self,
        spec: &str,
        job: J,
        identity: Option<&str>,
    ) -> RunnerResult<EntryId> {
        let resolved = self.inner.config.resolve(spec);
        let trigger = match Trigger::parse(resolved)? {
            Trigger::Every(interval) => Trigger::Every(self.floor_interval(interval)),
            trigger => trigger,
        };

        Ok(self.register(trigger, Arc::new(job), identity))
    }

    /// Register `job` to run repeatedly, waiting `interval` after each run
    /// ends before starting the next.
    pub fn every<J: Job>(&self, interval: Duration, job: J, identity: Option<&str>) -> EntryId {
        let interval = self.floor_interval(interval);
        self.register(Trigger::Every(interval), Arc::new(job), identity)
    }

    /// Run `job` once, right away, in a new task.
    ///
    /// Anonymous: never subject to single-flight, only to the limiter.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn now<J: Job>(&self, job: J) -> JoinHandle<RunStatus> {
        let inner = self.inner.clone();
        tokio::spawn(async move { inner.guarded(&job, None).await })
    }

    /// Run `job` once after `delay`, in a new task.
    ///
    /// No limiter slot is held while waiting.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn after<J: Job>(&self, delay: Duration, job: J) -> JoinHandle<RunStatus> {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.guarded(&job, None).await
        })
    }

    /// Trigger `job` directly, in a new task, through the same path a
    /// scheduled fire takes.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn trigger<J: Job>(&self, job: J, identity: Option<&str>) -> JoinHandle<Dispatch> {
        let inner = self.inner.clone();
        let job: JobRef = Arc::new(job);
        let identity = identity.map(str::to_string);
        tokio::spawn(async move { inner.route(job, identity.as_deref()).await })
    }

    /// Start firing registered entries.
    pub fn start(&self) -> RunnerResult<()> {
        self.inner.scheduler.start()?;
        info!("Dispatcher started");
        Ok(())
    }

    /// Stop firing entries. Runs in progress are not interrupted.
    pub fn stop(&self) -> RunnerResult<()> {
        self.inner.scheduler.stop()?;
        info!("Dispatcher stopped");
        Ok(())
    }

    /// Whether entries are being fired.
    pub fn is_running(&self) -> bool {
        self.inner.scheduler.is_running()
    }

    /// Deregister an entry.
    pub fn remove(&self, id: EntryId) -> RunnerResult<()> {
        self.inner.scheduler.remove(id)
    }

    /// Ids of all registered entries.
    pub fn entry_ids(&self) -> Vec<EntryId> {
        self.inner.scheduler.entry_ids()
    }

    /// Look up an entry by the identity it was registered with.
    pub fn find(&self, identity: &str) -> Option<EntryId> {
        self.inner.scheduler.find(identity)
    }

    fn floor_interval(&self, interval: Duration) -> Duration {
        let floor = self.inner.config.min_interval;
        if interval < floor {
            warn!("Interval {:?} below minimum, using {:?}", interval, floor);
            floor
        } else {
            interval
        }
    }

    fn register(&self, trigger: Trigger, job: JobRef, identity: Option<&str>) -> EntryId {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let owned_identity = identity.map(str::to_string);
        let callback_identity = owned_identity.clone();

        let callback: Callback = Arc::new(move || {
            let weak = weak.clone();
            let job = job.clone();
            let identity = callback_identity.clone();
            async move {
                if let Some(inner) = weak.upgrade() {
                    inner.route(job, identity.as_deref()).await;
                }
            }
            .boxed()
        });

        let id = self.inner.scheduler.add(trigger, owned_identity, callback);
        info!(
            "Registered entry {} for {}",
            id,
            identity.unwrap_or(ANONYMOUS)
        );
        id
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}
