//! Task assignment notification: a durable workflow.
//!
//! ```text
//! app/task.assigned
//!   └─ send-assignment-mail        load task, mail assignee, remember due date
//!        ├─ no due date / due today ──────────────────────────► done
//!        └─ wait-for-the-due-date   (run sleeps in the scheduler DB)
//!             └─ check-if-task-is-completed
//!                  ├─ DONE or deleted ────────────────────────► done
//!                  └─ send-task-reminder-mail ────────────────► done
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Local, Utc};
use pmsync_core::error::{Result, SyncError};
use pmsync_core::events::{Event, TASK_ASSIGNED, TaskAssignedPayload};
use pmsync_core::traits::Mailer;
use pmsync_core::types::TaskDetail;
use pmsync_mail::templates::{self, EmailMessage};
use pmsync_scheduler::{RunOutcome, SchedulerDb, SchedulerEngine, Sleep, StepContext, Workflow};
use pmsync_store::AppDb;
use serde::{Deserialize, Serialize};

use crate::dispatch::EventHandler;

pub const FUNCTION_ID: &str = "send-task-assignment-mail";

pub const STEP_SEND_ASSIGNMENT: &str = "send-assignment-mail";
pub const STEP_WAIT_FOR_DUE_DATE: &str = "wait-for-the-due-date";
pub const STEP_CHECK_COMPLETED: &str = "check-if-task-is-completed";
pub const STEP_SEND_REMINDER: &str = "send-task-reminder-mail";

/// Journaled output of the first step. Later decisions are made from this
/// snapshot, so edits to the task's due date after assignment are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Assignment {
    due_date: Option<DateTime<Utc>>,
    due_today: bool,
}

/// Same calendar day in the server's local timezone.
fn same_local_day(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    a.with_timezone(&Local).date_naive() == b.with_timezone(&Local).date_naive()
}

pub struct TaskNotificationWorkflow {
    db: Arc<AppDb>,
    mailer: Arc<dyn Mailer>,
}

impl TaskNotificationWorkflow {
    pub fn new(db: Arc<AppDb>, mailer: Arc<dyn Mailer>) -> Self {
        Self { db, mailer }
    }

    async fn deliver(&self, message: EmailMessage) -> Result<()> {
        self.mailer
            .send(&message.to, &message.subject, &message.html_body)
            .await?;
        tracing::info!("📧 '{}' sent to {} via {}", message.subject, message.to, self.mailer.name());
        Ok(())
    }
}

#[async_trait]
impl Workflow for TaskNotificationWorkflow {
    fn function_id(&self) -> &str {
        FUNCTION_ID
    }

    fn trigger(&self) -> &str {
        TASK_ASSIGNED
    }

    async fn execute(&self, data: &serde_json::Value, step: &StepContext<'_>) -> Result<RunOutcome> {
        let payload: TaskAssignedPayload = serde_json::from_value(data.clone())
            .map_err(|e| SyncError::InvalidPayload(format!("{TASK_ASSIGNED}: {e}")))?;
        let now = step.now();

        let assignment: Assignment = step
            .run(STEP_SEND_ASSIGNMENT, || async {
                let detail = self
                    .db
                    .find_task_detail(&payload.task_id)?
                    .ok_or_else(|| SyncError::not_found("task", &payload.task_id))?;
                self.deliver(templates::assignment_email(&detail, &payload.origin)?)
                    .await?;
                let due_date = detail.task.due_date;
                Ok(Assignment {
                    due_date,
                    due_today: due_date.is_some_and(|due| same_local_day(due, now)),
                })
            })
            .await?;

        // no due date means no reminder
        let Some(due) = assignment.due_date else {
            tracing::debug!("[{}] task {} has no due date", step.run_id(), payload.task_id);
            return Ok(RunOutcome::Completed);
        };
        if assignment.due_today {
            return Ok(RunOutcome::Completed);
        }

        if let Sleep::Pending(at) = step.sleep_until(STEP_WAIT_FOR_DUE_DATE, due)? {
            return Ok(RunOutcome::Sleeping(at));
        }

        let pending: Option<TaskDetail> = step
            .run(STEP_CHECK_COMPLETED, || async {
                Ok(match self.db.find_task_detail(&payload.task_id)? {
                    None => {
                        tracing::info!("🗑️ Task {} no longer exists, no reminder", payload.task_id);
                        None
                    }
                    Some(detail) if detail.task.status.is_terminal() => None,
                    Some(detail) => Some(detail),
                })
            })
            .await?;

        let Some(detail) = pending else {
            return Ok(RunOutcome::Completed);
        };
        step.run(STEP_SEND_REMINDER, || async {
            self.deliver(templates::reminder_email(&detail, &payload.origin)?)
                .await
        })
        .await?;
        Ok(RunOutcome::Completed)
    }
}

/// Scheduler engine with the notification workflow registered.
pub fn notification_engine(
    scheduler_db: Arc<SchedulerDb>,
    db: Arc<AppDb>,
    mailer: Arc<dyn Mailer>,
) -> SchedulerEngine {
    let mut engine = SchedulerEngine::new(scheduler_db);
    engine.register(Arc::new(TaskNotificationWorkflow::new(db, mailer)));
    engine
}

/// Starts a notification run for each `app/task.assigned` event.
pub struct TaskAssignedHandler {
    engine: Arc<SchedulerEngine>,
}

impl TaskAssignedHandler {
    pub fn new(engine: Arc<SchedulerEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl EventHandler for TaskAssignedHandler {
    fn id(&self) -> &str {
        FUNCTION_ID
    }

    fn event(&self) -> &str {
        TASK_ASSIGNED
    }

    async fn handle(&self, event: &Event) -> Result<()> {
        // reject malformed payloads before a run is created
        let _: TaskAssignedPayload = event.payload()?;
        self.engine.start(FUNCTION_ID, event).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveTime, TimeZone};
    use pmsync_core::types::{Project, Task, TaskStatus, User, Workspace};
    use pmsync_mail::RecordingMailer;
    use pmsync_scheduler::RunStatus;
    use serde_json::json;

    struct Fixture {
        db: Arc<AppDb>,
        mailer: Arc<RecordingMailer>,
        engine: SchedulerEngine,
    }

    fn seeded_db() -> Arc<AppDb> {
        let db = Arc::new(AppDb::open_in_memory().unwrap());
        db.create_user(&User {
            id: "user_1".into(),
            email: Some("ada@example.com".into()),
            name: "Ada Lovelace".into(),
            image: None,
        })
        .unwrap();
        db.create_workspace_with_owner(&Workspace {
            id: "org_1".into(),
            name: "Acme".into(),
            slug: "acme".into(),
            owner_id: "user_1".into(),
            image_url: None,
        })
        .unwrap();
        db.create_project(&Project {
            id: "proj_1".into(),
            workspace_id: "org_1".into(),
            name: "Launch".into(),
        })
        .unwrap();
        db
    }

    fn fixture_with(scheduler_db: SchedulerDb) -> Fixture {
        let db = seeded_db();
        let mailer = Arc::new(RecordingMailer::new());
        let engine = notification_engine(Arc::new(scheduler_db), db.clone(), mailer.clone());
        Fixture { db, mailer, engine }
    }

    fn fixture() -> Fixture {
        fixture_with(SchedulerDb::open_in_memory().unwrap())
    }

    /// Today at `hour`:00 in the server's timezone.
    fn local_today_at(hour: u32) -> DateTime<Utc> {
        let today = Local::now().date_naive();
        let time = NaiveTime::from_hms_opt(hour, 0, 0).unwrap();
        Local
            .from_local_datetime(&today.and_time(time))
            .earliest()
            .unwrap()
            .with_timezone(&Utc)
    }

    impl Fixture {
        fn add_task(&self, id: &str, due_date: Option<DateTime<Utc>>) {
            self.db
                .create_task(&Task {
                    id: id.into(),
                    project_id: "proj_1".into(),
                    title: "Write launch post".into(),
                    description: "Draft and publish".into(),
                    status: TaskStatus::Todo,
                    due_date,
                    assignee_id: "user_1".into(),
                })
                .unwrap();
        }
    }

    fn assigned(task_id: &str) -> Event {
        Event::new(
            TASK_ASSIGNED,
            json!({"taskId": task_id, "origin": "https://pm.example.com"}),
        )
    }

    #[tokio::test]
    async fn test_due_today_sends_one_mail_and_never_sleeps() {
        let f = fixture();
        let now = Utc::now();
        f.add_task("task_1", Some(now));

        let report = f.engine.start_at(FUNCTION_ID, &assigned("task_1"), now).await.unwrap();
        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(f.mailer.count(), 1);
        assert!(f.mailer.sent()[0].subject.starts_with("New Task Assigned"));
        assert!(f.engine.tick_at(now + Duration::days(2)).await.is_empty());
    }

    #[tokio::test]
    async fn test_due_later_today_ignores_time_of_day() {
        let f = fixture();
        let start = local_today_at(1);
        f.add_task("task_1", Some(local_today_at(23)));

        let report = f.engine.start_at(FUNCTION_ID, &assigned("task_1"), start).await.unwrap();
        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(report.resume_at, None);
        assert_eq!(f.mailer.count(), 1);
        assert!(f.engine.tick_at(local_today_at(23) + Duration::hours(1)).await.is_empty());
        assert_eq!(f.mailer.count(), 1);
    }

    #[tokio::test]
    async fn test_due_earlier_today_ignores_time_of_day() {
        let f = fixture();
        let start = local_today_at(23);
        f.add_task("task_1", Some(local_today_at(1)));

        let report = f.engine.start_at(FUNCTION_ID, &assigned("task_1"), start).await.unwrap();
        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(f.mailer.count(), 1);
        assert!(f.mailer.sent()[0].subject.starts_with("New Task Assigned"));
    }

    #[tokio::test]
    async fn test_sleeping_run_survives_restart() {
        let dir = std::env::temp_dir().join(format!("pmsync-restart-{}", std::process::id()));
        std::fs::remove_dir_all(&dir).ok();
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("scheduler.db");

        let now = Utc::now();
        let due = now + Duration::days(3);
        let before = fixture_with(SchedulerDb::open(&path).unwrap());
        before.add_task("task_1", Some(due));
        let report = before
            .engine
            .start_at(FUNCTION_ID, &assigned("task_1"), now)
            .await
            .unwrap();
        assert_eq!(report.status, RunStatus::Sleeping);
        assert_eq!(before.mailer.count(), 1);
        let Fixture { db, mailer: old_mailer, engine } = before;
        drop(engine);

        let mailer = Arc::new(RecordingMailer::new());
        let engine = notification_engine(
            Arc::new(SchedulerDb::open(&path).unwrap()),
            db,
            mailer.clone(),
        );
        assert_eq!(engine.recover().unwrap(), 0);
        let run = engine.get_run(&report.run_id).unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Sleeping);

        let reports = engine.tick_at(due).await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].status, RunStatus::Completed);
        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].subject.starts_with("Task Reminder"));
        assert_eq!(old_mailer.count(), 1);

        drop(engine);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_no_due_date_completes_after_assignment() {
        let f = fixture();
        f.add_task("task_1", None);
        let report = f.engine.start(FUNCTION_ID, &assigned("task_1")).await.unwrap();
        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(f.mailer.count(), 1);
    }

    #[tokio::test]
    async fn test_due_tomorrow_sends_reminder_at_due_date() {
        let f = fixture();
        let now = Utc::now();
        let due = now + Duration::days(1);
        f.add_task("task_1", Some(due));

        let report = f.engine.start_at(FUNCTION_ID, &assigned("task_1"), now).await.unwrap();
        assert_eq!(report.status, RunStatus::Sleeping);
        assert_eq!(report.resume_at, Some(due));
        assert_eq!(f.mailer.count(), 1);

        assert!(f.engine.tick_at(due - Duration::minutes(1)).await.is_empty());
        let reports = f.engine.tick_at(due).await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].status, RunStatus::Completed);

        let sent = f.mailer.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent[1].subject.starts_with("Task Reminder"));
        assert_eq!(sent[1].to, "ada@example.com");
    }

    #[tokio::test]
    async fn test_done_before_due_date_skips_reminder() {
        let f = fixture();
        let now = Utc::now();
        let due = now + Duration::days(1);
        f.add_task("task_1", Some(due));
        f.engine.start_at(FUNCTION_ID, &assigned("task_1"), now).await.unwrap();

        f.db.set_task_status("task_1", TaskStatus::Done).unwrap();
        let reports = f.engine.tick_at(due).await;
        assert_eq!(reports[0].status, RunStatus::Completed);
        assert_eq!(f.mailer.count(), 1);
    }

    #[tokio::test]
    async fn test_deleted_before_due_date_ends_quietly() {
        let f = fixture();
        let now = Utc::now();
        let due = now + Duration::days(3);
        f.add_task("task_1", Some(due));
        f.engine.start_at(FUNCTION_ID, &assigned("task_1"), now).await.unwrap();

        f.db.delete_task("task_1").unwrap();
        let reports = f.engine.tick_at(due).await;
        assert_eq!(reports[0].status, RunStatus::Completed);
        assert_eq!(reports[0].error, None);
        assert_eq!(f.mailer.count(), 1);
    }

    #[tokio::test]
    async fn test_past_due_date_reminds_immediately() {
        let f = fixture();
        let now = Utc::now();
        f.add_task("task_1", Some(now - Duration::days(2)));

        let report = f.engine.start_at(FUNCTION_ID, &assigned("task_1"), now).await.unwrap();
        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(f.mailer.count(), 2);
    }

    #[tokio::test]
    async fn test_missing_task_fails_the_run() {
        let f = fixture();
        let err = f.engine.start(FUNCTION_ID, &assigned("task_x")).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(f.mailer.count(), 0);

        let runs = f.engine.list_runs(10).unwrap();
        assert_eq!(runs[0].status, RunStatus::Failed);
    }

    #[tokio::test]
    async fn test_assignment_not_resent_when_reminder_fails() {
        let f = fixture();
        let now = Utc::now();
        let due = now + Duration::days(1);
        f.add_task("task_1", Some(due));
        f.engine.start_at(FUNCTION_ID, &assigned("task_1"), now).await.unwrap();

        f.mailer.set_failure(Some("relay down"));
        let reports = f.engine.tick_at(due).await;
        assert_eq!(reports[0].status, RunStatus::Failed);
        assert!(reports[0].error.as_deref().unwrap().contains("relay down"));
        assert_eq!(f.mailer.count(), 1);
    }

    #[tokio::test]
    async fn test_due_date_change_after_assignment_is_ignored() {
        let f = fixture();
        let now = Utc::now();
        let due = now + Duration::days(1);
        f.add_task("task_1", Some(due));
        let report = f.engine.start_at(FUNCTION_ID, &assigned("task_1"), now).await.unwrap();

        // moving the task does not move the wake-up
        f.db.delete_task("task_1").unwrap();
        f.add_task("task_1", Some(now + Duration::days(10)));
        assert_eq!(report.resume_at, Some(due));
        assert_eq!(f.engine.tick_at(due).await.len(), 1);
        assert_eq!(f.mailer.count(), 2);
    }

    #[tokio::test]
    async fn test_handler_rejects_bad_payload_without_a_run() {
        let f = fixture();
        let handler = TaskAssignedHandler::new(Arc::new(f.engine));
        let err = handler
            .handle(&Event::new(TASK_ASSIGNED, json!({"origin": "x"})))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_payload");
        assert!(handler.engine.list_runs(10).unwrap().is_empty());
    }
}
