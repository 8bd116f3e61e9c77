//! Workflow trait: a replayable function driven by the engine.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pmsync_core::error::Result;

use crate::step::StepContext;

/// How an execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    /// Park the run until the given instant.
    Sleeping(DateTime<Utc>),
}

/// A durable workflow.
///
/// `execute` is called on the trigger and again on every wake-up, always
/// from the top. Anything with side effects belongs inside `step.run`.
#[async_trait]
pub trait Workflow: Send + Sync {
    /// Stable function id, persisted with each run.
    fn function_id(&self) -> &str;

    /// Event name that starts this workflow.
    fn trigger(&self) -> &str;

    async fn execute(&self, data: &serde_json::Value, step: &StepContext<'_>) -> Result<RunOutcome>;
}
