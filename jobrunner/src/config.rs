//! Dispatcher configuration.

use crate::error::{RunnerError, RunnerResult};
use std::collections::HashMap;
use std::env;
use std::time::Duration;

/// Default number of jobs allowed to run at once.
pub const DEFAULT_POOL_SIZE: usize = 10;

/// Default floor for `every` intervals.
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_secs(1);

const SCHEDULE_ENV_PREFIX: &str = "JOBRUNNER_SCHEDULE_";

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Maximum concurrent runs across all jobs, `0` for unlimited
    pub pool_size: usize,

    /// Smallest interval accepted by `every`; shorter ones are raised to it
    pub min_interval: Duration,

    /// Named calendar expressions, e.g. `cron.frequent`
    pub schedules: HashMap<String, String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            min_interval: DEFAULT_MIN_INTERVAL,
            schedules: HashMap::new(),
        }
    }
}

impl RunnerConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the limiter capacity (`0` disables the limiter).
    pub fn pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    /// Set the floor for `every` intervals.
    pub fn min_interval(mut self, min_interval: Duration) -> Self {
        self.min_interval = min_interval;
        self
    }

    /// Register a named calendar expression.
    pub fn with_schedule(mut self, name: impl Into<String>, expression: impl Into<String>) -> Self {
        self.schedules.insert(name.into(), expression.into());
        self
    }

    /// Resolve `spec` against the named schedules. Unknown names are returned
    /// unchanged so they can be parsed as expressions.
    pub fn resolve<'a>(&'a self, spec: &'a str) -> &'a str {
        self.schedules.get(spec).map(String::as_str).unwrap_or(spec)
    }

    /// Load configuration from the environment.
    ///
    /// - `JOBRUNNER_POOL_SIZE` - limiter capacity
    /// - `JOBRUNNER_MIN_INTERVAL` - interval floor, e.g. `500ms`
    /// - `JOBRUNNER_SCHEDULE_<NAME>` - named expression `cron.<name>`
    pub fn from_env() -> RunnerResult<Self> {
        Self::from_vars(env::vars())
    }

    /// Build a configuration from `(key, value)` pairs shaped like the
    /// environment.
    pub fn from_vars<I, K, V>(vars: I) -> RunnerResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::default();

        for (key, value) in vars {
            let (key, value) = (key.as_ref(), value.as_ref().trim());

            if key == "JOBRUNNER_POOL_SIZE" {
                config.pool_size = value.parse().map_err(|_| {
                    RunnerError::Config(format!("JOBRUNNER_POOL_SIZE: '{}' is not a count", value))
                })?;
            } else if key == "JOBRUNNER_MIN_INTERVAL" {
                config.min_interval = humantime::parse_duration(value).map_err(|e| {
                    RunnerError::Config(format!("JOBRUNNER_MIN_INTERVAL: {}", e))
                })?;
            } else if let Some(name) = key.strip_prefix(SCHEDULE_ENV_PREFIX) {
                if name.is_empty() || value.is_empty() {
                    return Err(RunnerError::Config(format!("{}: empty schedule", key)));
                }
                config
                    .schedules
                    .insert(format!("cron.{}", name.to_lowercase()), value.to_string());
            }
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RunnerConfig::default();
        assert_eq!(config.pool_size, DEFAULT_POOL_SIZE);
        assert_eq!(config.min_interval, DEFAULT_MIN_INTERVAL);
        assert!(config.schedules.is_empty());
    }

    #[test]
    fn test_builder() {
        let config = RunnerConfig::new()
            .pool_size(0)
            .min_interval(Duration::from_millis(5))
            .with_schedule("cron.frequent", "*/5 * * * *");

        assert_eq!(config.pool_size, 0);
        assert_eq!(config.min_interval, Duration::from_millis(5));
        assert_eq!(config.resolve("cron.frequent"), "*/5 * * * *");
        assert_eq!(config.resolve("0 0 * * *"), "0 0 * * *");
    }

    #[test]
    fn test_from_vars() {
        let config = RunnerConfig::from_vars([
            ("JOBRUNNER_POOL_SIZE", "4"),
            ("JOBRUNNER_MIN_INTERVAL", "250ms"),
            ("JOBRUNNER_SCHEDULE_NIGHTLY", "0 3 * * *"),
            ("PATH", "/usr/bin"),
        ])
        .unwrap();

        assert_eq!(config.pool_size, 4);
        assert_eq!(config.min_interval, Duration::from_millis(250));
        assert_eq!(config.resolve("cron.nightly"), "0 3 * * *");
    }

    #[test]
    fn test_from_vars_rejects_bad_values() {
        assert!(matches!(
            RunnerConfig::from_vars([("JOBRUNNER_POOL_SIZE", "many")]),
            Err(RunnerError::Config(_))
        ));
        assert!(matches!(
            RunnerConfig::from_vars([("JOBRUNNER_MIN_INTERVAL", "soon")]),
            Err(RunnerError::Config(_))
        ));
        assert!(matches!(
            RunnerConfig::from_vars([("JOBRUNNER_SCHEDULE_", "0 * * * *")]),
            Err(RunnerError::Config(_))
        ));
    }
}
