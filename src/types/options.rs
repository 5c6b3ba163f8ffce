//! Store configuration. Every field has a default so a partial JSON file is enough.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::verification::CheckKind;
use crate::constants::{
    DEFAULT_LOCK_TIMEOUT_MS, DEFAULT_MAX_BACKUPS, DEFAULT_MAX_POOL_ENTRIES,
    DEFAULT_SWEEP_INTERVAL_MS,
};
use crate::error::{Result, StoreError};

fn default_true() -> bool {
    true
}

fn default_lock_timeout_ms() -> u64 {
    DEFAULT_LOCK_TIMEOUT_MS
}

fn default_max_entries() -> usize {
    DEFAULT_MAX_POOL_ENTRIES
}

fn default_sweep_interval_ms() -> u64 {
    DEFAULT_SWEEP_INTERVAL_MS
}

fn default_max_backups() -> Option<usize> {
    Some(DEFAULT_MAX_BACKUPS)
}

fn default_checks() -> Vec<CheckPolicy> {
    CheckPolicy::defaults()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolOptions {
    /// Longest wait for a slot lock before `PoolTimeout`.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
    /// Idle entries beyond this count are evicted, least recently used first.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    /// Period of the background validation sweep; `0` disables the sweeper thread.
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
            max_entries: DEFAULT_MAX_POOL_ENTRIES,
            sweep_interval_ms: DEFAULT_SWEEP_INTERVAL_MS,
        }
    }
}

impl PoolOptions {
    #[must_use]
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    #[must_use]
    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_ms > 0).then(|| Duration::from_millis(self.sweep_interval_ms))
    }
}

/// How many backups survive per slot. Both limits apply when both are set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    #[serde(default = "default_max_backups")]
    pub max_backups: Option<usize>,
    #[serde(default)]
    pub max_age_secs: Option<u64>,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_backups: default_max_backups(),
            max_age_secs: None,
        }
    }
}

impl RetentionPolicy {
    #[must_use]
    pub fn keep_last(count: usize) -> Self {
        Self {
            max_backups: Some(count),
            max_age_secs: None,
        }
    }

    #[must_use]
    pub fn max_age(&self) -> Option<Duration> {
        self.max_age_secs.map(Duration::from_secs)
    }
}

/// When a check runs and whether its errors refuse a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckPolicy {
    pub check: CheckKind,
    #[serde(default = "default_true")]
    pub on_load: bool,
    #[serde(default = "default_true")]
    pub on_save: bool,
    /// Error diagnostics from a blocking check abort a commit with `Corruption`.
    /// Warnings and info never block.
    #[serde(default)]
    pub blocking: bool,
}

impl CheckPolicy {
    #[must_use]
    pub fn default_for(check: CheckKind) -> Self {
        Self {
            check,
            on_load: true,
            on_save: true,
            blocking: !matches!(check, CheckKind::OrphanedRecords),
        }
    }

    #[must_use]
    pub fn defaults() -> Vec<Self> {
        CheckKind::ALL.iter().copied().map(Self::default_for).collect()
    }

    #[must_use]
    pub fn advisory(mut self) -> Self {
        self.blocking = false;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreOptions {
    /// Directory holding one sub-directory per document.
    pub root: PathBuf,
    #[serde(default)]
    pub pool: PoolOptions,
    #[serde(default)]
    pub retention: RetentionPolicy,
    #[serde(default = "default_checks")]
    pub checks: Vec<CheckPolicy>,
}

impl StoreOptions {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            pool: PoolOptions::default(),
            retention: RetentionPolicy::default(),
            checks: CheckPolicy::defaults(),
        }
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path.as_ref())?;
        let options: Self = serde_json::from_str(&raw).map_err(|err| StoreError::Config {
            reason: format!("{}: {err}", path.as_ref().display()),
        })?;
        options.validate()?;
        Ok(options)
    }

    pub fn retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    pub fn lock_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.pool.lock_timeout_ms = timeout_ms;
        self
    }

    pub fn max_pool_entries(mut self, max_entries: usize) -> Self {
        self.pool.max_entries = max_entries;
        self
    }

    pub fn sweep_interval_ms(mut self, interval_ms: u64) -> Self {
        self.pool.sweep_interval_ms = interval_ms;
        self
    }

    pub fn checks(mut self, checks: Vec<CheckPolicy>) -> Self {
        self.checks = checks;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.root.as_os_str().is_empty() {
            return Err(StoreError::Config {
                reason: "root directory must be set".into(),
            });
        }
        if self.pool.max_entries == 0 {
            return Err(StoreError::Config {
                reason: "pool.max_entries must be at least 1".into(),
            });
        }
        if self.retention.max_backups == Some(0) {
            return Err(StoreError::Config {
                reason: "retention.max_backups must be at least 1 when set".into(),
            });
        }
        let mut seen = Vec::with_capacity(self.checks.len());
        for policy in &self.checks {
            if seen.contains(&policy.check) {
                return Err(StoreError::Config {
                    reason: format!("check {} configured twice", policy.check),
                });
            }
            seen.push(policy.check);
        }
        Ok(())
    }
}
