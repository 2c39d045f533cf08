//! Tracker configuration.
//!
//! Two switches matter:
//! - **tracking**: when off, allocate/resize/release are pure pass-through to
//!   the real allocator with no bookkeeping, and heap dumps print nothing.
//! - **verbose**: when off, per-operation log lines are suppressed; tracking
//!   and dumps are unaffected.
//!
//! Both default to on. The process-wide values come from the environment:
//! - `MEMLEDGER_TRACKING` = `on` | `off` (also `1`/`0`, `true`/`false`, `yes`/`no`)
//! - `MEMLEDGER_VERBOSE` = same vocabulary
//! - `MEMLEDGER_LOG_FORMAT` = `text` (default) | `json`
//! - `MEMLEDGER_INITIAL_BUCKETS` = positive integer
//! - `MEMLEDGER_INVALID_POINTER_EXIT_STATUS` = exit status for invalid
//!   pointer faults (default 10)
//! - `MEMLEDGER_OOM_EXIT_STATUS` = exit status for out-of-memory faults
//!   (default 11)
//!
//! Unrecognised values fall back to the defaults.

use std::sync::OnceLock;

use memledger_registry::registry::DEFAULT_BUCKETS;
use serde::Serialize;

use crate::fault::{INVALID_POINTER_EXIT_STATUS, OUT_OF_MEMORY_EXIT_STATUS};

pub const ENV_TRACKING: &str = "MEMLEDGER_TRACKING";
pub const ENV_VERBOSE: &str = "MEMLEDGER_VERBOSE";
pub const ENV_LOG_FORMAT: &str = "MEMLEDGER_LOG_FORMAT";
pub const ENV_INITIAL_BUCKETS: &str = "MEMLEDGER_INITIAL_BUCKETS";
pub const ENV_INVALID_POINTER_EXIT_STATUS: &str = "MEMLEDGER_INVALID_POINTER_EXIT_STATUS";
pub const ENV_OOM_EXIT_STATUS: &str = "MEMLEDGER_OOM_EXIT_STATUS";

/// Output format for operation logs and heap dumps.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

impl LogFormat {
    /// Parse from string (case-insensitive).
    #[must_use]
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "plain" | "human" => Some(Self::Text),
            "json" | "jsonl" | "ndjson" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Parse an on/off switch (case-insensitive).
#[must_use]
pub fn parse_switch(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "on" | "true" | "yes" | "enabled" => Some(true),
        "0" | "off" | "false" | "no" | "disabled" | "none" => Some(false),
        _ => None,
    }
}

/// Settings for one [`Tracker`](crate::Tracker).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrackerConfig {
    pub tracking: bool,
    pub verbose: bool,
    pub log_format: LogFormat,
    pub initial_buckets: usize,
    /// Process exit status after an invalid pointer fault.
    pub invalid_pointer_exit_status: i32,
    /// Process exit status after an out-of-memory fault.
    pub out_of_memory_exit_status: i32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            tracking: true,
            verbose: true,
            log_format: LogFormat::Text,
            initial_buckets: DEFAULT_BUCKETS,
            invalid_pointer_exit_status: INVALID_POINTER_EXIT_STATUS,
            out_of_memory_exit_status: OUT_OF_MEMORY_EXIT_STATUS,
        }
    }
}

impl TrackerConfig {
    /// Tracking on, per-operation logging off.
    #[must_use]
    pub fn quiet() -> Self {
        Self::default().verbose(false)
    }

    #[must_use]
    pub const fn tracking(mut self, on: bool) -> Self {
        self.tracking = on;
        self
    }

    #[must_use]
    pub const fn verbose(mut self, on: bool) -> Self {
        self.verbose = on;
        self
    }

    #[must_use]
    pub const fn log_format(mut self, format: LogFormat) -> Self {
        self.log_format = format;
        self
    }

    #[must_use]
    pub const fn initial_buckets(mut self, buckets: usize) -> Self {
        self.initial_buckets = buckets;
        self
    }

    #[must_use]
    pub const fn invalid_pointer_exit_status(mut self, status: i32) -> Self {
        self.invalid_pointer_exit_status = status;
        self
    }

    #[must_use]
    pub const fn out_of_memory_exit_status(mut self, status: i32) -> Self {
        self.out_of_memory_exit_status = status;
        self
    }

    /// Read `MEMLEDGER_*` variables from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let switch = |key: &str, default: bool| {
            lookup(key)
                .as_deref()
                .and_then(parse_switch)
                .unwrap_or(default)
        };
        let status = |key: &str, default: i32| {
            lookup(key)
                .and_then(|v| v.trim().parse::<i32>().ok())
                .unwrap_or(default)
        };
        Self {
            tracking: switch(ENV_TRACKING, defaults.tracking),
            verbose: switch(ENV_VERBOSE, defaults.verbose),
            log_format: lookup(ENV_LOG_FORMAT)
                .as_deref()
                .and_then(LogFormat::from_str_loose)
                .unwrap_or(defaults.log_format),
            initial_buckets: lookup(ENV_INITIAL_BUCKETS)
                .and_then(|v| v.trim().parse::<usize>().ok())
                .filter(|&n| n > 0)
                .unwrap_or(defaults.initial_buckets),
            invalid_pointer_exit_status: status(
                ENV_INVALID_POINTER_EXIT_STATUS,
                defaults.invalid_pointer_exit_status,
            ),
            out_of_memory_exit_status: status(
                ENV_OOM_EXIT_STATUS,
                defaults.out_of_memory_exit_status,
            ),
        }
    }
}

static GLOBAL_CONFIG: OnceLock<TrackerConfig> = OnceLock::new();

/// Process-wide configuration (reads the environment on first call, caches thereafter).
#[must_use]
pub fn global_config() -> TrackerConfig {
    *GLOBAL_CONFIG.get_or_init(TrackerConfig::from_env)
}
