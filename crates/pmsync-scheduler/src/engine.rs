//! Scheduler Engine: starts workflow runs and wakes sleeping ones.
//! Uses tokio::interval for ticking; between ticks a sleeping run costs one DB row.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use pmsync_core::error::{Result, SyncError};
use pmsync_core::events::Event;
use serde::Serialize;

use crate::persistence::{RunStatus, SchedulerDb, WorkflowRun};
use crate::step::StepContext;
use crate::workflow::{RunOutcome, Workflow};

/// What happened to a run after one execution.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub function_id: String,
    pub status: RunStatus,
    pub resume_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// The scheduler engine: owns the workflow table and the run store.
pub struct SchedulerEngine {
    db: Arc<SchedulerDb>,
    workflows: HashMap<String, Arc<dyn Workflow>>,
}

impl SchedulerEngine {
    pub fn new(db: Arc<SchedulerDb>) -> Self {
        Self {
            db,
            workflows: HashMap::new(),
        }
    }

    /// Register a workflow under its function id.
    pub fn register(&mut self, workflow: Arc<dyn Workflow>) {
        tracing::info!(
            "📋 Workflow registered: '{}' (trigger {})",
            workflow.function_id(),
            workflow.trigger()
        );
        self.workflows
            .insert(workflow.function_id().to_string(), workflow);
    }

    /// Create a run for `event` and execute it until it completes, sleeps or fails.
    pub async fn start(&self, function_id: &str, event: &Event) -> Result<RunReport> {
        self.start_at(function_id, event, Utc::now()).await
    }

    /// [`Self::start`] with an explicit clock.
    pub async fn start_at(
        &self,
        function_id: &str,
        event: &Event,
        now: DateTime<Utc>,
    ) -> Result<RunReport> {
        let workflow = self
            .workflows
            .get(function_id)
            .cloned()
            .ok_or_else(|| SyncError::Scheduler(format!("Unknown workflow '{function_id}'")))?;
        let run = self.db.create_run(function_id, &event.name, &event.data)?;
        tracing::info!("▶️ [{}] '{}' started by {}", run.id, function_id, event.name);
        self.execute(workflow.as_ref(), &run, now).await
    }

    /// Execute (or replay) one run and persist its outcome.
    async fn execute(
        &self,
        workflow: &dyn Workflow,
        run: &WorkflowRun,
        now: DateTime<Utc>,
    ) -> Result<RunReport> {
        let ctx = StepContext::new(&self.db, &run.id, now);
        match workflow.execute(&run.event_data, &ctx).await {
            Ok(RunOutcome::Completed) => {
                self.db.mark_completed(&run.id)?;
                tracing::info!("🏁 [{}] '{}' completed", run.id, run.function_id);
                Ok(RunReport {
                    run_id: run.id.clone(),
                    function_id: run.function_id.clone(),
                    status: RunStatus::Completed,
                    resume_at: None,
                    error: None,
                })
            }
            Ok(RunOutcome::Sleeping(at)) => {
                self.db.mark_sleeping(&run.id, at)?;
                tracing::info!("💤 [{}] '{}' sleeping until {}", run.id, run.function_id, at.to_rfc3339());
                Ok(RunReport {
                    run_id: run.id.clone(),
                    function_id: run.function_id.clone(),
                    status: RunStatus::Sleeping,
                    resume_at: Some(at),
                    error: None,
                })
            }
            Err(e) => {
                if let Err(mark_err) = self.db.mark_failed(&run.id, &e.to_string()) {
                    tracing::warn!("⚠️ [{}] could not record failure: {mark_err}", run.id);
                }
                tracing::error!("❌ [{}] '{}' failed: {e}", run.id, run.function_id);
                Err(e)
            }
        }
    }

    /// Tick: wake every sleeping run that is due. Runs are replayed concurrently.
    pub async fn tick(&self) -> Vec<RunReport> {
        self.tick_at(Utc::now()).await
    }

    /// [`Self::tick`] with an explicit clock.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Vec<RunReport> {
        let due = match self.db.claim_due(now) {
            Ok(runs) => runs,
            Err(e) => {
                tracing::warn!("⚠️ Failed to claim due runs: {e}");
                return Vec::new();
            }
        };
        if due.is_empty() {
            return Vec::new();
        }
        tracing::debug!("⏰ {} run(s) due", due.len());

        let resumes = due.iter().map(|run| async move {
            let result = match self.workflows.get(&run.function_id) {
                Some(workflow) => self.execute(workflow.as_ref(), run, now).await,
                None => {
                    let e = SyncError::Scheduler(format!(
                        "No workflow registered for '{}'",
                        run.function_id
                    ));
                    if let Err(mark_err) = self.db.mark_failed(&run.id, &e.to_string()) {
                        tracing::warn!("⚠️ [{}] could not record failure: {mark_err}", run.id);
                    }
                    Err(e)
                }
            };
            result.unwrap_or_else(|e| RunReport {
                run_id: run.id.clone(),
                function_id: run.function_id.clone(),
                status: RunStatus::Failed,
                resume_at: None,
                error: Some(e.to_string()),
            })
        });
        futures::future::join_all(resumes).await
    }

    /// Requeue runs interrupted by a previous crash. Call once at startup.
    pub fn recover(&self) -> Result<usize> {
        let count = self.db.requeue_interrupted(Utc::now())?;
        if count > 0 {
            tracing::warn!("🔄 Requeued {count} interrupted run(s)");
        }
        Ok(count)
    }

    pub fn list_runs(&self, limit: usize) -> Result<Vec<WorkflowRun>> {
        self.db.list_runs(limit)
    }

    pub fn get_run(&self, id: &str) -> Result<Option<WorkflowRun>> {
        self.db.get_run(id)
    }
}

/// Spawn-able resume loop: ticks the engine every `check_interval_secs`.
pub async fn spawn_scheduler(engine: Arc<SchedulerEngine>, check_interval_secs: u64) {
    tracing::info!("⏰ Scheduler started (check every {}s)", check_interval_secs);

    let mut interval =
        tokio::time::interval(std::time::Duration::from_secs(check_interval_secs.max(1)));

    loop {
        interval.tick().await;
        for report in engine.tick().await {
            match report.status {
                RunStatus::Failed => tracing::warn!(
                    "⚠️ [{}] resume failed: {}",
                    report.run_id,
                    report.error.as_deref().unwrap_or("unknown")
                ),
                status => tracing::info!("📣 [{}] resumed → {}", report.run_id, status.as_str()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::Sleep;
    use async_trait::async_trait;
    use chrono::Duration;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts how often each step body actually runs.
    #[derive(Default)]
    struct Counting {
        before: AtomicUsize,
        after: AtomicUsize,
    }

    #[async_trait]
    impl Workflow for Counting {
        fn function_id(&self) -> &str {
            "counting"
        }

        fn trigger(&self) -> &str {
            "test/counting"
        }

        async fn execute(&self, data: &serde_json::Value, step: &StepContext<'_>) -> Result<RunOutcome> {
            let wake_at: DateTime<Utc> = step
                .run("before", || async {
                    self.before.fetch_add(1, Ordering::SeqCst);
                    serde_json::from_value(data["wake_at"].clone())
                        .map_err(|e| SyncError::InvalidPayload(e.to_string()))
                })
                .await?;

            if let Sleep::Pending(at) = step.sleep_until("wait", wake_at)? {
                return Ok(RunOutcome::Sleeping(at));
            }

            step.run("after", || async {
                self.after.fetch_add(1, Ordering::SeqCst);
                if data["fail"].as_bool().unwrap_or(false) {
                    return Err(SyncError::MailSend("relay down".into()));
                }
                Ok(())
            })
            .await?;
            Ok(RunOutcome::Completed)
        }
    }

    fn engine_with(workflow: Arc<Counting>) -> SchedulerEngine {
        let mut engine = SchedulerEngine::new(Arc::new(SchedulerDb::open_in_memory().unwrap()));
        engine.register(workflow);
        engine
    }

    #[tokio::test]
    async fn test_sleep_then_resume() {
        let wf = Arc::new(Counting::default());
        let engine = engine_with(wf.clone());
        let now = Utc::now();
        let wake = now + Duration::days(1);
        let event = Event::new("test/counting", serde_json::json!({"wake_at": wake}));

        let report = engine.start_at("counting", &event, now).await.unwrap();
        assert_eq!(report.status, RunStatus::Sleeping);
        assert_eq!(report.resume_at, Some(wake));
        assert_eq!(wf.before.load(Ordering::SeqCst), 1);
        assert_eq!(wf.after.load(Ordering::SeqCst), 0);

        // not yet due
        assert!(engine.tick_at(now + Duration::hours(1)).await.is_empty());

        let reports = engine.tick_at(wake).await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].status, RunStatus::Completed);
        assert_eq!(wf.before.load(Ordering::SeqCst), 1, "journaled step must not re-run");
        assert_eq!(wf.after.load(Ordering::SeqCst), 1);

        // nothing left to wake
        assert!(engine.tick_at(wake + Duration::days(1)).await.is_empty());
    }

    #[tokio::test]
    async fn test_past_wakeup_completes_immediately() {
        let wf = Arc::new(Counting::default());
        let engine = engine_with(wf.clone());
        let now = Utc::now();
        let event = Event::new(
            "test/counting",
            serde_json::json!({"wake_at": now - Duration::minutes(5)}),
        );
        let report = engine.start_at("counting", &event, now).await.unwrap();
        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(wf.after.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_is_recorded_and_not_retried() {
        let wf = Arc::new(Counting::default());
        let engine = engine_with(wf.clone());
        let now = Utc::now();
        let wake = now + Duration::hours(2);
        let event = Event::new("test/counting", serde_json::json!({"wake_at": wake, "fail": true}));

        let started = engine.start_at("counting", &event, now).await.unwrap();
        let reports = engine.tick_at(wake).await;
        assert_eq!(reports[0].status, RunStatus::Failed);
        assert!(reports[0].error.as_deref().unwrap().contains("relay down"));

        let run = engine.get_run(&started.run_id).unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert!(engine.tick_at(wake + Duration::days(1)).await.is_empty());
        assert_eq!(wf.after.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_overlapping_ticks_resume_once() {
        let wf = Arc::new(Counting::default());
        let engine = engine_with(wf.clone());
        let now = Utc::now();
        let wake = now + Duration::hours(1);
        for _ in 0..3 {
            let event = Event::new("test/counting", serde_json::json!({"wake_at": wake}));
            engine.start_at("counting", &event, now).await.unwrap();
        }

        let (a, b) = tokio::join!(engine.tick_at(wake), engine.tick_at(wake));
        assert_eq!(a.len() + b.len(), 3);
        assert_eq!(wf.after.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_resume_without_registered_workflow_fails_run() {
        let db = Arc::new(SchedulerDb::open_in_memory().unwrap());
        let mut first = SchedulerEngine::new(db.clone());
        first.register(Arc::new(Counting::default()));
        let now = Utc::now();
        let wake = now + Duration::hours(1);
        let event = Event::new("test/counting", serde_json::json!({"wake_at": wake}));
        let started = first.start_at("counting", &event, now).await.unwrap();
        drop(first);

        let bare = SchedulerEngine::new(db);
        let reports = bare.tick_at(wake).await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].status, RunStatus::Failed);
        assert!(reports[0].error.as_deref().unwrap().contains("No workflow registered"));

        let run = bare.get_run(&started.run_id).unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.last_error.is_some());
        assert!(bare.tick_at(wake + Duration::days(1)).await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_workflow() {
        let engine = engine_with(Arc::new(Counting::default()));
        let err = engine
            .start("nope", &Event::new("x", serde_json::json!({})))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "scheduler");
    }
}
