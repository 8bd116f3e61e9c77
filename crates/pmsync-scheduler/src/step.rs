//! Step context handed to a workflow on every (re)execution.

use chrono::{DateTime, Utc};
use pmsync_core::error::{Result, SyncError};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;

use crate::persistence::SchedulerDb;

/// Result of [`StepContext::sleep_until`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sleep {
    /// The wake-up instant has passed; carry on.
    Elapsed,
    /// Still in the future; the workflow should return `RunOutcome::Sleeping(at)`.
    Pending(DateTime<Utc>),
}

/// Journaled step runner bound to one run.
pub struct StepContext<'a> {
    db: &'a SchedulerDb,
    run_id: String,
    now: DateTime<Utc>,
}

impl<'a> StepContext<'a> {
    pub fn new(db: &'a SchedulerDb, run_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            db,
            run_id: run_id.to_string(),
            now,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Instant this execution started at. Use it instead of `Utc::now()` so
    /// replays and tests see a consistent clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Run `f` once per run. If the step already completed, its journaled
    /// output is returned and `f` is not called. A failing step is not
    /// journaled, and its error is returned unchanged.
    pub async fn run<T, F, Fut>(&self, name: &str, f: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(saved) = self.db.load_step(&self.run_id, name)? {
            tracing::debug!("⏭️ [{}] step '{name}' already done, using journaled output", self.run_id);
            return serde_json::from_value(saved)
                .map_err(|e| SyncError::Scheduler(format!("Decode step '{name}': {e}")));
        }

        let output = f().await?;
        let value = serde_json::to_value(&output)
            .map_err(|e| SyncError::Scheduler(format!("Encode step '{name}': {e}")))?;
        self.db.save_step(&self.run_id, name, &value)?;
        tracing::debug!("✅ [{}] step '{name}' completed", self.run_id);
        Ok(output)
    }

    /// Durable wait. Elapsed if this sleep was already journaled or `at` has
    /// passed (in which case the wake-up is journaled now); otherwise pending.
    pub fn sleep_until(&self, name: &str, at: DateTime<Utc>) -> Result<Sleep> {
        if self.db.load_step(&self.run_id, name)?.is_some() {
            return Ok(Sleep::Elapsed);
        }
        if at <= self.now {
            self.db.save_step(
                &self.run_id,
                name,
                &serde_json::json!({ "until": at.to_rfc3339(), "woke_at": self.now.to_rfc3339() }),
            )?;
            return Ok(Sleep::Elapsed);
        }
        Ok(Sleep::Pending(at))
    }
}
