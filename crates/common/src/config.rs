//! Core configuration.

use crate::error::{GlError, GlResult};
use serde::{Deserialize, Serialize};

/// Which thread GPU work is funneled to when single-threaded mode is on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadingStrategy {
    /// The windowing toolkit's own event thread.
    Toolkit,
    /// A dedicated, process-wide worker thread.
    Worker,
}

/// Threading configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadingConfig {
    /// Whether all GPU work must run on a single thread.
    pub single_threaded: bool,
    /// Where that work runs.
    pub strategy: ThreadingStrategy,
}

impl Default for ThreadingConfig {
    fn default() -> Self {
        Self {
            single_threaded: false,
            strategy: ThreadingStrategy::Worker,
        }
    }
}

/// Core configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlConfig {
    /// Whether contended context locks fail immediately instead of blocking.
    pub fail_fast_locking: bool,
    /// Threading configuration.
    pub threading: ThreadingConfig,
    /// How long the worker thread sleeps before rechecking its current context.
    pub worker_poll_interval_ms: u64,
    /// Trace every native call.
    pub debug: bool,
}

impl GlConfig {
    /// Create a new configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overlaid with `GLCORE_*` environment variables.
    pub fn from_env() -> GlResult<Self> {
        Self::default().overlay(|key| std::env::var(key).ok())
    }

    /// Parse a JSON document; missing fields keep their defaults.
    pub fn from_json(json: &str) -> GlResult<Self> {
        serde_json::from_str(json).map_err(|e| GlError::config(e.to_string()))
    }

    /// Overlay values obtained from `lookup`, keyed by environment variable name.
    pub fn overlay<F>(mut self, lookup: F) -> GlResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("GLCORE_FAIL_FAST") {
            self.fail_fast_locking = parse_bool("GLCORE_FAIL_FAST", &value)?;
        }
        if let Some(value) = lookup("GLCORE_SINGLE_THREAD") {
            self.threading.single_threaded = parse_bool("GLCORE_SINGLE_THREAD", &value)?;
        }
        if let Some(value) = lookup("GLCORE_THREADING") {
            self.threading.strategy = match value.trim().to_ascii_lowercase().as_str() {
                "toolkit" => ThreadingStrategy::Toolkit,
                "worker" => ThreadingStrategy::Worker,
                other => {
                    return Err(GlError::config(format!(
                        "GLCORE_THREADING: expected toolkit or worker, got {:?}",
                        other
                    )))
                }
            };
        }
        if let Some(value) = lookup("GLCORE_WORKER_POLL_MS") {
            self.worker_poll_interval_ms = value.trim().parse().map_err(|_| {
                GlError::config(format!("GLCORE_WORKER_POLL_MS: not a number: {:?}", value))
            })?;
        }
        if let Some(value) = lookup("GLCORE_DEBUG") {
            self.debug = parse_bool("GLCORE_DEBUG", &value)?;
        }
        Ok(self)
    }

    /// Set fail-fast locking.
    pub fn with_fail_fast(mut self, enabled: bool) -> Self {
        self.fail_fast_locking = enabled;
        self
    }

    /// Enable single-threaded mode with the given strategy.
    pub fn with_single_thread(mut self, strategy: ThreadingStrategy) -> Self {
        self.threading.single_threaded = true;
        self.threading.strategy = strategy;
        self
    }

    /// Set the worker poll interval.
    pub fn with_worker_poll_interval(mut self, millis: u64) -> Self {
        self.worker_poll_interval_ms = millis;
        self
    }

    /// Set debug tracing.
    pub fn with_debug(mut self, enabled: bool) -> Self {
        self.debug = enabled;
        self
    }
}

impl Default for GlConfig {
    fn default() -> Self {
        Self {
            fail_fast_locking: cfg!(debug_assertions),
            threading: ThreadingConfig::default(),
            worker_poll_interval_ms: 100,
            debug: false,
        }
    }
}

fn parse_bool(key: &str, value: &str) -> GlResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(GlError::config(format!("{}: expected a boolean, got {:?}", key, value))),
    }
}
