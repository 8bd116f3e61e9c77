//! Event dispatch: a fixed name → handler table built at startup.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use pmsync_core::error::{Result, SyncError};
use pmsync_core::events::{self, Event};
use pmsync_scheduler::SchedulerEngine;
use pmsync_store::AppDb;

use crate::notify::TaskAssignedHandler;
use crate::{users, workspaces};

/// A handler bound to exactly one event name.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Stable function id, used in logs and run records.
    fn id(&self) -> &str;

    /// Event name this handler subscribes to.
    fn event(&self) -> &str;

    async fn handle(&self, event: &Event) -> Result<()>;
}

/// Signature shared by the single-write identity sync handlers.
pub type StoreFn = fn(&AppDb, &Event) -> Result<()>;

/// Adapts a plain store function into an [`EventHandler`].
pub struct StoreHandler {
    id: &'static str,
    event: &'static str,
    db: Arc<AppDb>,
    apply: StoreFn,
}

impl StoreHandler {
    pub fn new(id: &'static str, event: &'static str, db: Arc<AppDb>, apply: StoreFn) -> Self {
        Self {
            id,
            event,
            db,
            apply,
        }
    }
}

#[async_trait]
impl EventHandler for StoreHandler {
    fn id(&self) -> &str {
        self.id
    }

    fn event(&self) -> &str {
        self.event
    }

    async fn handle(&self, event: &Event) -> Result<()> {
        (self.apply)(&self.db, event)
    }
}

/// Routes each event to the one handler registered for its name.
#[derive(Default)]
pub struct Dispatcher {
    handlers: HashMap<String, Arc<dyn EventHandler>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// The eight production handlers.
    pub fn with_defaults(db: Arc<AppDb>, engine: Arc<SchedulerEngine>) -> Self {
        let table: [(&'static str, &'static str, StoreFn); 7] = [
            ("sync-user-from-clerk", events::USER_CREATED, users::sync_user_creation),
            ("update-user-from-clerk", events::USER_UPDATED, users::sync_user_update),
            ("delete-user-with-clerk", events::USER_DELETED, users::sync_user_deletion),
            (
                "sync-workspace-from-clerk",
                events::ORGANIZATION_CREATED,
                workspaces::sync_workspace_creation,
            ),
            (
                "update-workspace-from-clerk",
                events::ORGANIZATION_UPDATED,
                workspaces::sync_workspace_update,
            ),
            (
                "delete-workspace-with-clerk",
                events::ORGANIZATION_DELETED,
                workspaces::sync_workspace_deletion,
            ),
            (
                "sync-workspace-member-from-clerk",
                events::INVITATION_ACCEPTED,
                workspaces::sync_workspace_member_creation,
            ),
        ];

        let mut dispatcher = Self::new();
        for (id, event, apply) in table {
            dispatcher.register(Arc::new(StoreHandler::new(id, event, db.clone(), apply)));
        }
        dispatcher.register(Arc::new(TaskAssignedHandler::new(engine)));
        dispatcher
    }

    /// Register a handler, replacing any previous one for the same event.
    pub fn register(&mut self, handler: Arc<dyn EventHandler>) {
        let event = handler.event().to_string();
        if let Some(old) = self.handlers.insert(event.clone(), handler) {
            tracing::warn!("⚠️ Handler '{}' for {event} was replaced", old.id());
        }
    }

    pub fn handler_for(&self, event_name: &str) -> Option<&Arc<dyn EventHandler>> {
        self.handlers.get(event_name)
    }

    /// Registered event names, sorted.
    pub fn event_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Run the handler for `event.name`. Handler errors propagate unchanged.
    pub async fn dispatch(&self, event: &Event) -> Result<()> {
        let Some(handler) = self.handlers.get(&event.name) else {
            tracing::warn!("📭 No handler for event {}", event.name);
            return Err(SyncError::UnknownEvent(event.name.clone()));
        };

        tracing::info!(
            "📨 {} → '{}'{}",
            event.name,
            handler.id(),
            event.id.as_deref().map(|id| format!(" ({id})")).unwrap_or_default()
        );
        match handler.handle(event).await {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::warn!("❌ '{}' failed on {}: {e}", handler.id(), event.name);
                Err(e)
            }
        }
    }
}
