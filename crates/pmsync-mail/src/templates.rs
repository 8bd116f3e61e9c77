//! HTML bodies for task assignment and reminder emails.

use chrono::Local;
use pmsync_core::error::{Result, SyncError};
use pmsync_core::types::TaskDetail;

/// A rendered email ready for [`pmsync_core::traits::Mailer::send`].
#[derive(Debug, Clone, PartialEq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html_body: String,
}

const BUTTON_STYLE: &str = "display: inline-block; padding: 10px 20px; background-color: #4CAF50; color: white; text-decoration: none; border-radius: 5px;";

/// Minimal escaping for text interpolated into HTML.
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

/// `{origin}/projects/{projectId}/tasks/{taskId}`.
pub fn task_link(origin: &str, detail: &TaskDetail) -> String {
    format!(
        "{}/projects/{}/tasks/{}",
        origin.trim_end_matches('/'),
        detail.project.id,
        detail.task.id
    )
}

/// Due date in the process-local timezone, or "No due date".
pub fn format_due_date(detail: &TaskDetail) -> String {
    match detail.task.due_date {
        Some(due) => due.with_timezone(&Local).format("%-m/%-d/%Y").to_string(),
        None => "No due date".to_string(),
    }
}

fn recipient(detail: &TaskDetail) -> Result<String> {
    detail
        .assignee
        .email
        .clone()
        .filter(|e| !e.is_empty())
        .ok_or_else(|| {
            SyncError::MailSend(format!("assignee {} has no email address", detail.assignee.id))
        })
}

fn render(detail: &TaskDetail, origin: &str, heading: &str, due_line: Option<String>) -> String {
    let mut body = String::new();
    body.push_str("<div style=\"max-width: 600px;\">\n");
    body.push_str(&format!("  <h2>Hi {}</h2>\n", escape_html(&detail.assignee.name)));
    body.push_str(&format!("  <h2>{heading}</h2>\n"));
    body.push_str(&format!(
        "  <p><strong>Project:</strong> {}</p>\n",
        escape_html(&detail.project.name)
    ));
    body.push_str(&format!(
        "  <p><strong>Task Title:</strong> {}</p>\n",
        escape_html(&detail.task.title)
    ));
    body.push_str(&format!(
        "  <p><strong>Description:</strong> {}</p>\n",
        escape_html(&detail.task.description)
    ));
    if let Some(due) = due_line {
        body.push_str(&format!("  <p><strong>Due Date:</strong> {due}</p>\n"));
    }
    body.push_str(&format!(
        "  <a href=\"{}\" style=\"{BUTTON_STYLE}\">View Task</a>\n",
        escape_html(&task_link(origin, detail))
    ));
    body.push_str("  <p>Best Regards,<br/>Project Management Team</p>\n");
    body.push_str("</div>");
    body
}

/// Email sent as soon as a task is assigned.
pub fn assignment_email(detail: &TaskDetail, origin: &str) -> Result<EmailMessage> {
    Ok(EmailMessage {
        to: recipient(detail)?,
        subject: format!("New Task Assigned: {}", detail.project.name),
        html_body: render(
            detail,
            origin,
            "You have been assigned a new task!",
            Some(format_due_date(detail)),
        ),
    })
}

/// Email sent at the due date when the task is still open. Same layout, no due-date line.
pub fn reminder_email(detail: &TaskDetail, origin: &str) -> Result<EmailMessage> {
    Ok(EmailMessage {
        to: recipient(detail)?,
        subject: format!("Task Reminder: {}", detail.project.name),
        html_body: render(detail, origin, "This is a reminder for your pending task!", None),
    })
}
