//! # pmsync scheduler
//!
//! Durable execution for workflows that must wait for hours or months.
//!
//! A workflow is re-executed from the top every time it is woken up. Work
//! that must happen once is wrapped in a named step whose output is journaled;
//! on replay the journaled output is returned instead of running the step
//! again. Waiting is a journaled `sleep_until`: when the instant is still in
//! the future the run is parked as a `sleeping` row with `resume_at`, and no
//! thread, task or timer is held for it.
//!
//! ## Architecture
//! ```text
//! event ──► SchedulerEngine::start ──► Workflow::execute(step ctx)
//!                                        ├── step.run("name", fut)  → journal
//!                                        └── step.sleep_until(at)   → sleeping row
//!
//! tokio interval ──► SchedulerEngine::tick
//!                      ├── claim sleeping runs with resume_at <= now
//!                      └── replay each run (journaled steps are skipped)
//! ```

pub mod engine;
pub mod persistence;
pub mod step;
pub mod workflow;

pub use engine::{RunReport, SchedulerEngine, spawn_scheduler};
pub use persistence::{RunStatus, SchedulerDb, WorkflowRun};
pub use step::{Sleep, StepContext};
pub use workflow::{RunOutcome, Workflow};
