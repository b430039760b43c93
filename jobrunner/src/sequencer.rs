//! Single-flight sequencing per job identity.
//!
//! Each identity gets a tiny state machine behind its own lock:
//!
//! ```text
//! Idle --trigger--> Running --trigger--> RunningWithPending --trigger--> (coalesced)
//!   ^                  |                        |
//!   +-----finish-------+<-------finish (rerun)--+
//! ```
//!
//! Locks are held only for the transition itself, never across a run.

use crate::job::{JobRef, RunStatus};
use dashmap::DashMap;
use jobrunner_log::debug;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;

/// Observable phase of an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlightPhase {
    /// Nothing running
    Idle,
    /// One run in progress, nothing owed
    Running,
    /// One run in progress and exactly one rerun owed
    RunningWithPending,
}

// The pending job only exists while a run is in flight.
enum FlightState {
    Idle,
    Running,
    RunningWithPending(JobRef),
}

impl FlightState {
    fn phase(&self) -> FlightPhase {
        match self {
            FlightState::Idle => FlightPhase::Idle,
            FlightState::Running => FlightPhase::Running,
            FlightState::RunningWithPending(_) => FlightPhase::RunningWithPending,
        }
    }
}

type SharedState = Arc<Mutex<FlightState>>;

/// Result of offering a trigger to the sequencer.
pub enum Admission {
    /// The identity was idle; the caller now owns the flight and must run it.
    Start(Flight),
    /// A run is in progress; one rerun is now owed.
    Queued,
    /// A rerun was already owed; nothing new to do.
    Coalesced,
}

impl std::fmt::Debug for Admission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Admission::Start(flight) => f.debug_tuple("Start").field(flight).finish(),
            Admission::Queued => write!(f, "Queued"),
            Admission::Coalesced => write!(f, "Coalesced"),
        }
    }
}

/// Exclusive right to run one identity.
///
/// Dropping a flight without finishing it (e.g. its task was aborted) returns
/// the identity to idle and discards any owed rerun.
pub struct Flight {
    identity: String,
    job: JobRef,
    state: SharedState,
    finished: bool,
}

impl Flight {
    /// Identity this flight belongs to.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Job to run next.
    pub fn job(&self) -> &JobRef {
        &self.job
    }

    /// Record the end of a run.
    ///
    /// Returns `true` when a rerun was owed: the flight stays running and
    /// [`Flight::job`] now holds the job captured by the queued trigger.
    /// Returns `false` once the identity is back to idle.
    pub fn finish(&mut self) -> bool {
        if self.finished {
            return false;
        }

        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, FlightState::Idle) {
            FlightState::RunningWithPending(job) => {
                *state = FlightState::Running;
                self.job = job;
                true
            }
            FlightState::Running | FlightState::Idle => {
                self.finished = true;
                false
            }
        }
    }
}

impl Drop for Flight {
    fn drop(&mut self) {
        if !self.finished {
            *self.state.lock() = FlightState::Idle;
        }
    }
}

impl std::fmt::Debug for Flight {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Flight")
            .field("identity", &self.identity)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

/// What happened to one trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// This trigger started the flight; `runs` includes owed reruns.
    Ran {
        /// Total runs executed by this flight
        runs: u32,
        /// How many of them failed
        failures: u32,
    },
    /// Deferred into the owed rerun
    Queued,
    /// Merged into an already owed rerun
    Coalesced,
}

/// Table of per-identity flight states.
///
/// Entries are created on first use and kept for the life of the sequencer.
#[derive(Default)]
pub struct Sequencer {
    flights: DashMap<String, SharedState>,
}

impl Sequencer {
    /// Create an empty sequencer.
    pub fn new() -> Self {
        Self::default()
    }

    fn state_for(&self, identity: &str) -> SharedState {
        if let Some(state) = self.flights.get(identity) {
            return state.clone();
        }

        self.flights
            .entry(identity.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(FlightState::Idle)))
            .clone()
    }

    /// Offer a trigger for `identity` carrying `job`.
    pub fn admit(&self, identity: &str, job: JobRef) -> Admission {
        let state = self.state_for(identity);
        let mut guard = state.lock();

        match guard.phase() {
            FlightPhase::Idle => {
                *guard = FlightState::Running;
                drop(guard);
                debug!(target: "jobrunner::sequencer", "Flight started for {}", identity);
                Admission::Start(Flight {
                    identity: identity.to_string(),
                    job,
                    state,
                    finished: false,
                })
            }
            FlightPhase::Running => {
                *guard = FlightState::RunningWithPending(job);
                debug!(target: "jobrunner::sequencer", "Rerun queued for {}", identity);
                Admission::Queued
            }
            FlightPhase::RunningWithPending => {
                debug!(target: "jobrunner::sequencer", "Trigger coalesced for {}", identity);
                Admission::Coalesced
            }
        }
    }

    /// Admit a trigger and, if it starts the flight, drive it to idle.
    ///
    /// `execute` is called once per run, outside any lock.
    pub async fn run<F, Fut>(&self, identity: &str, job: JobRef, mut execute: F) -> Dispatch
    where
        F: FnMut(JobRef) -> Fut,
        Fut: Future<Output = RunStatus>,
    {
        let mut flight = match self.admit(identity, job) {
            Admission::Start(flight) => flight,
            Admission::Queued => return Dispatch::Queued,
            Admission::Coalesced => return Dispatch::Coalesced,
        };

        let mut runs = 0;
        let mut failures = 0;
        loop {
            let status = execute(flight.job().clone()).await;
            runs += 1;
            if status.is_failed() {
                failures += 1;
            }
            if !flight.finish() {
                break;
            }
        }

        debug!(target: "jobrunner::sequencer", "Flight for {} landed after {} runs", identity, runs);
        Dispatch::Ran { runs, failures }
    }

    /// Current phase of `identity`, `None` if it was never triggered.
    pub fn phase(&self, identity: &str) -> Option<FlightPhase> {
        self.flights.get(identity).map(|state| state.lock().phase())
    }

    /// Number of identities seen so far.
    pub fn len(&self) -> usize {
        self.flights.len()
    }

    /// Whether no identity was ever triggered.
    pub fn is_empty(&self) -> bool {
        self.flights.is_empty()
    }
}
