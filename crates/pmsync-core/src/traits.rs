//! Collaborator traits the handlers are written against.

use async_trait::async_trait;

use crate::error::Result;

/// Outbound mail transport: `send(to, subject, html_body)`.
///
/// Failures surface as [`crate::SyncError::MailSend`] and are not retried by callers.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Transport name for logs ("smtp", "log", "recording").
    fn name(&self) -> &str;

    async fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<()>;
}
