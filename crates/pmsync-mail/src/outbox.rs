//! Mailers that never touch the network.

use async_trait::async_trait;
use pmsync_core::error::{Result, SyncError};
use pmsync_core::traits::Mailer;
use std::sync::Mutex;

/// Logs each message instead of sending it.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<()> {
        tracing::info!("📧 [mail disabled] to={to} subject=\"{subject}\" ({} bytes)", html_body.len());
        Ok(())
    }
}

/// A message captured by [`RecordingMailer`].
#[derive(Debug, Clone)]
pub struct SentMail {
    pub to: String,
    pub subject: String,
    pub html_body: String,
}

/// Keeps every message in memory. Can be switched into a failing mode.
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<SentMail>>,
    fail_with: Mutex<Option<String>>,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `send` fail with `reason`; `None` restores delivery.
    pub fn set_failure(&self, reason: Option<&str>) {
        *self.fail_with.lock().unwrap_or_else(|e| e.into_inner()) = reason.map(String::from);
    }

    pub fn sent(&self) -> Vec<SentMail> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<()> {
        if let Some(reason) = self.fail_with.lock().unwrap_or_else(|e| e.into_inner()).clone() {
            return Err(SyncError::MailSend(reason));
        }
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(SentMail {
                to: to.to_string(),
                subject: subject.to_string(),
                html_body: html_body.to_string(),
            });
        Ok(())
    }
}
