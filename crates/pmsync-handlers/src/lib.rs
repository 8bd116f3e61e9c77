//! # pmsync handlers
//!
//! - [`users`] / [`workspaces`]: one store write per identity-provider event
//! - [`notify`]: the durable task assignment + reminder workflow
//! - [`dispatch`]: the event-name → handler table built at startup

pub mod dispatch;
pub mod notify;
pub mod users;
pub mod workspaces;

pub use dispatch::{Dispatcher, EventHandler, StoreHandler};
pub use notify::{TaskAssignedHandler, TaskNotificationWorkflow};
