//! Trigger scheduler.
//!
//! Owns the registered entries and one driver task per entry while running.
//! The scheduler knows nothing about jobs: each entry fires an opaque
//! callback, and the dispatcher decides what that callback routes through.

use crate::error::{RunnerError, RunnerResult};
use crate::expression::{CronExpression, Trigger};
use chrono::Utc;
use futures::future::BoxFuture;
use jobrunner_log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Identifier of a registered entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryId(u64);

impl EntryId {
    /// Raw numeric value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Callback fired on every trigger.
pub type Callback = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

struct Entry {
    identity: Option<String>,
    trigger: Trigger,
    callback: Callback,
    driver: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct State {
    runtime: Option<Handle>,
    entries: HashMap<EntryId, Entry>,
}

/// Registry of trigger entries and their driver tasks.
#[derive(Default)]
pub struct Scheduler {
    state: Mutex<State>,
    next_id: AtomicU64,
}

impl Scheduler {
    /// Create an idle scheduler with no entries.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entry. It starts firing right away if the scheduler is
    /// running, otherwise on [`Scheduler::start`].
    pub fn add(&self, trigger: Trigger, identity: Option<String>, callback: Callback) -> EntryId {
        let id = EntryId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let mut state = self.state.lock();

        let driver = state
            .runtime
            .as_ref()
            .map(|runtime| runtime.spawn(drive(id, trigger.clone(), callback.clone())));

        debug!(
            "Entry {} registered ({}), identity: {}",
            id,
            describe(&trigger),
            identity.as_deref().unwrap_or("none")
        );
        state.entries.insert(
            id,
            Entry {
                identity,
                trigger,
                callback,
                driver,
            },
        );
        id
    }

    /// Deregister an entry and stop its driver. Runs already fired complete.
    pub fn remove(&self, id: EntryId) -> RunnerResult<()> {
        let entry = self
            .state
            .lock()
            .entries
            .remove(&id)
            .ok_or(RunnerError::EntryNotFound(id))?;

        if let Some(driver) = entry.driver {
            driver.abort();
        }
        debug!("Entry {} removed", id);
        Ok(())
    }

    /// Start firing all entries. Must be called from within a Tokio runtime.
    pub fn start(&self) -> RunnerResult<()> {
        let mut state = self.state.lock();
        if state.runtime.is_some() {
            warn!("Scheduler already running");
            return Err(RunnerError::SchedulerAlreadyRunning);
        }

        let runtime = Handle::try_current().map_err(|_| RunnerError::NoRuntime)?;
        for (id, entry) in state.entries.iter_mut() {
            entry.driver = Some(runtime.spawn(drive(*id, entry.trigger.clone(), entry.callback.clone())));
        }
        info!("Scheduler started with {} entries", state.entries.len());
        state.runtime = Some(runtime);
        Ok(())
    }

    /// Stop all drivers. Runs already fired complete on their own.
    pub fn stop(&self) -> RunnerResult<()> {
        let mut state = self.state.lock();
        if state.runtime.take().is_none() {
            return Err(RunnerError::SchedulerNotRunning);
        }

        for entry in state.entries.values_mut() {
            if let Some(driver) = entry.driver.take() {
                driver.abort();
            }
        }
        info!("Scheduler stopped");
        Ok(())
    }

    /// Whether the scheduler is running.
    pub fn is_running(&self) -> bool {
        self.state.lock().runtime.is_some()
    }

    /// Ids of all registered entries, oldest first.
    pub fn entry_ids(&self) -> Vec<EntryId> {
        let mut ids: Vec<EntryId> = self.state.lock().entries.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Find the oldest entry registered under `identity`.
    pub fn find(&self, identity: &str) -> Option<EntryId> {
        self.state
            .lock()
            .entries
            .iter()
            .filter(|(_, entry)| entry.identity.as_deref() == Some(identity))
            .map(|(id, _)| *id)
            .min()
    }

    /// Trigger of a registered entry.
    pub fn trigger(&self, id: EntryId) -> Option<Trigger> {
        self.state
            .lock()
            .entries
            .get(&id)
            .map(|entry| entry.trigger.clone())
    }

    /// Number of registered entries.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Whether no entries are registered.
    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        for entry in self.state.get_mut().entries.values_mut() {
            if let Some(driver) = entry.driver.take() {
                driver.abort();
            }
        }
    }
}

fn describe(trigger: &Trigger) -> String {
    match trigger {
        Trigger::Cron(expr) => format!("cron '{}'", expr.expression()),
        Trigger::Every(interval) => format!("every {:?}", interval),
    }
}

async fn drive(id: EntryId, trigger: Trigger, callback: Callback) {
    match trigger {
        Trigger::Cron(expr) => drive_cron(id, expr, callback).await,
        Trigger::Every(interval) => drive_every(id, interval, callback).await,
    }
}

// Each fire gets its own task, so fires of one entry may overlap.
async fn drive_cron(id: EntryId, expr: CronExpression, callback: Callback) {
    let mut after = Utc::now();
    loop {
        let Some(next) = expr.next_after(after) else {
            info!("Entry {} has no further fire times", id);
            return;
        };

        let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::time::sleep(wait).await;

        tokio::spawn(fire(id, callback.clone()));
        // Skip fire times missed while the process was stalled.
        after = next.max(Utc::now());
    }
}

// The gap starts when the previous run has ended. The run is spawned so that
// aborting the driver never cancels it.
async fn drive_every(id: EntryId, interval: Duration, callback: Callback) {
    loop {
        tokio::time::sleep(interval).await;
        fire(id, callback.clone()).await;
    }
}

async fn fire(id: EntryId, callback: Callback) {
    if let Err(e) = tokio::spawn(callback()).await {
        error!(target: "jobrunner::scheduler", "Entry {} run aborted: {}", id, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::AtomicU32;

    fn counting(counter: Arc<AtomicU32>) -> Callback {
        Arc::new(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            .boxed()
        })
    }

    #[tokio::test]
    async fn test_start_stop() {
        let scheduler = Scheduler::new();
        assert!(!scheduler.is_running());

        scheduler.start().unwrap();
        assert!(scheduler.is_running());
        assert!(matches!(
            scheduler.start(),
            Err(RunnerError::SchedulerAlreadyRunning)
        ));

        scheduler.stop().unwrap();
        assert!(!scheduler.is_running());
        assert!(matches!(scheduler.stop(), Err(RunnerError::SchedulerNotRunning)));
    }

    #[test]
    fn test_start_without_runtime() {
        let scheduler = Scheduler::new();
        assert!(matches!(scheduler.start(), Err(RunnerError::NoRuntime)));
        assert!(!scheduler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_entry_fires_after_start() {
        let scheduler = Scheduler::new();
        let counter = Arc::new(AtomicU32::new(0));
        scheduler.add(
            Trigger::Every(Duration::from_secs(10)),
            None,
            counting(counter.clone()),
        );

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        scheduler.start().unwrap();
        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_stops_entry() {
        let scheduler = Scheduler::new();
        scheduler.start().unwrap();

        let counter = Arc::new(AtomicU32::new(0));
        let id = scheduler.add(
            Trigger::Every(Duration::from_secs(1)),
            Some("sweeper".to_string()),
            counting(counter.clone()),
        );
        assert_eq!(scheduler.find("sweeper"), Some(id));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        scheduler.remove(id).unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(scheduler.is_empty());
        assert!(matches!(
            scheduler.remove(id),
            Err(RunnerError::EntryNotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_aborted_run_is_logged_and_entry_keeps_firing() {
        let scheduler = Scheduler::new();
        let counter = Arc::new(AtomicU32::new(0));
        let calls = counter.clone();
        let callback: Callback = Arc::new(move || -> BoxFuture<'static, ()> {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                panic!("callback blew up");
            }
            .boxed()
        });
        let id = scheduler.add(Trigger::Every(Duration::from_secs(10)), None, callback);

        let needle = format!("Entry {} run aborted", id);
        let seen = Arc::new(std::sync::Mutex::new(0u32));
        let captured = seen.clone();
        let sink = jobrunner_log::add_sink(Arc::new(move |record: &jobrunner_log::Record<'_>| {
            if record.level == jobrunner_log::Level::Error && record.message.contains(&needle) {
                *captured.lock().unwrap() += 1;
            }
        }));

        scheduler.start().unwrap();
        tokio::time::sleep(Duration::from_secs(25)).await;

        jobrunner_log::remove_sink(sink);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(*seen.lock().unwrap(), 2);
    }

    #[test]
    fn test_entry_bookkeeping() {
        let scheduler = Scheduler::new();
        let noop: Callback = Arc::new(|| async {}.boxed());

        let a = scheduler.add(Trigger::Every(Duration::from_secs(1)), None, noop.clone());
        let b = scheduler.add(
            Trigger::parse("@hourly").unwrap(),
            Some("hourly".to_string()),
            noop,
        );

        assert_eq!(scheduler.entry_ids(), vec![a, b]);
        assert_eq!(scheduler.len(), 2);
        assert_eq!(scheduler.find("hourly"), Some(b));
        assert_eq!(scheduler.find("missing"), None);
        assert!(matches!(scheduler.trigger(b), Some(Trigger::Cron(_))));
    }
}
