//! Error taxonomy shared by the store, mail, scheduler and handler crates.

/// Result alias used across pmsync.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors raised while syncing identity events or running workflows.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// A referenced record does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A write violated a uniqueness or foreign-key constraint.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The record store could not be reached or failed internally.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// The mail transport rejected or failed to deliver a message.
    #[error("mail send failed: {0}")]
    MailSend(String),

    /// The event payload could not be decoded into the expected shape.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// No handler is registered for this event name.
    #[error("no handler registered for event '{0}'")]
    UnknownEvent(String),

    /// Durable run bookkeeping failed.
    #[error("scheduler error: {0}")]
    Scheduler(String),

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SyncError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// True for the "referenced entity absent" condition.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Short machine-readable kind, used in HTTP responses and run records.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Conflict(_) => "conflict",
            Self::StoreUnavailable(_) => "store_unavailable",
            Self::MailSend(_) => "mail_send",
            Self::InvalidPayload(_) => "invalid_payload",
            Self::UnknownEvent(_) => "unknown_event",
            Self::Scheduler(_) => "scheduler",
            Self::Config(_) => "config",
            Self::Io(_) => "io",
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        Self::InvalidPayload(e.to_string())
    }
}
