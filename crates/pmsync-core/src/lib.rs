//! # pmsync core
//!
//! Shared pieces used by every other pmsync crate:
//! configuration, the error taxonomy, the record types mirrored from the
//! identity provider, the inbound event envelope and the collaborator traits
//! (mail sending) that the handlers are written against.

pub mod config;
pub mod error;
pub mod events;
pub mod traits;
pub mod types;

pub use config::PmsyncConfig;
pub use error::{Result, SyncError};
pub use events::Event;
