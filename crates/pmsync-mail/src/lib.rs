//! # pmsync mail
//!
//! Implementations of [`pmsync_core::traits::Mailer`] and the HTML templates
//! for task assignment and reminder emails.
//!
//! - [`SmtpMailer`]: async SMTP via lettre (STARTTLS relay)
//! - [`LogMailer`]: logs instead of sending, for setups without SMTP
//! - [`RecordingMailer`]: keeps sent messages in memory

pub mod outbox;
pub mod smtp;
pub mod templates;

use std::sync::Arc;

use pmsync_core::config::MailConfig;
use pmsync_core::error::Result;
use pmsync_core::traits::Mailer;

pub use outbox::{LogMailer, RecordingMailer, SentMail};
pub use smtp::SmtpMailer;
pub use templates::EmailMessage;

/// Pick the transport described by config: SMTP when enabled, otherwise log-only.
pub fn mailer_from_config(config: &MailConfig) -> Result<Arc<dyn Mailer>> {
    if config.enabled {
        Ok(Arc::new(SmtpMailer::new(config)?))
    } else {
        tracing::warn!("mail disabled, notifications will only be logged");
        Ok(Arc::new(LogMailer))
    }
}
