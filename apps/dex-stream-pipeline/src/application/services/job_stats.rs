//! Job Statistics
//!
//! Live counters for each long-running job, shared between the job task and
//! the health server.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

/// Shared job statistics handle.
pub type SharedJobStats = Arc<JobStats>;

/// Counters for one job.
#[derive(Debug)]
pub struct JobStats {
    name: String,
    processed: AtomicU64,
    failures: AtomicU64,
    consecutive_failures: AtomicU32,
    last_success_at: RwLock<Option<DateTime<Utc>>>,
    last_error: RwLock<Option<String>>,
}

impl JobStats {
    /// Create counters for a named job.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            processed: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            consecutive_failures: AtomicU32::new(0),
            last_success_at: RwLock::new(None),
            last_error: RwLock::new(None),
        }
    }

    /// Create shared counters for a named job.
    #[must_use]
    pub fn shared(name: impl Into<String>) -> SharedJobStats {
        Arc::new(Self::new(name))
    }

    /// Record a successful iteration that handled `count` items.
    pub fn record_success(&self, count: u64) {
        self.processed.fetch_add(count, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
        *self.last_success_at.write() = Some(Utc::now());
    }

    /// Record a failed iteration.
    pub fn record_failure(&self, message: impl Into<String>) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
        *self.last_error.write() = Some(message.into());
    }

    /// Job name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Items handled since start.
    #[must_use]
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Failed iterations since start.
    #[must_use]
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Failures since the last success.
    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    /// Whether the most recent iteration failed.
    #[must_use]
    pub fn is_failing(&self) -> bool {
        self.consecutive_failures() > 0
    }

    /// Point-in-time copy for reporting.
    #[must_use]
    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            name: self.name.clone(),
            processed: self.processed(),
            failures: self.failures(),
            consecutive_failures: self.consecutive_failures(),
            last_success_at: *self.last_success_at.read(),
            last_error: self.last_error.read().clone(),
        }
    }
}

/// Serializable copy of [`JobStats`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobSnapshot {
    /// Job name.
    pub name: String,
    /// Items handled since start.
    pub processed: u64,
    /// Failed iterations since start.
    pub failures: u64,
    /// Failures since the last success.
    pub consecutive_failures: u32,
    /// Time of the last successful iteration.
    pub last_success_at: Option<DateTime<Utc>>,
    /// Most recent failure message.
    pub last_error: Option<String>,
}
