//! Inbound event envelope and the payload shapes each handler expects.
//!
//! Envelope on the wire:
//! ```json
//! { "name": "clerk/user.created", "data": { ... }, "id": "evt_1", "ts": 1700000000000 }
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

pub const USER_CREATED: &str = "clerk/user.created";
pub const USER_UPDATED: &str = "clerk/user.updated";
pub const USER_DELETED: &str = "clerk/user.deleted";
pub const ORGANIZATION_CREATED: &str = "clerk/organization.created";
pub const ORGANIZATION_UPDATED: &str = "clerk/organization.updated";
pub const ORGANIZATION_DELETED: &str = "clerk/organization.deleted";
pub const INVITATION_ACCEPTED: &str = "clerk/organizationInvitation.accepted";
pub const TASK_ASSIGNED: &str = "app/task.assigned";

/// An event delivered by the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub name: String,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<i64>,
}

impl Event {
    pub fn new(name: &str, data: serde_json::Value) -> Self {
        Self {
            name: name.to_string(),
            data,
            id: None,
            ts: None,
        }
    }

    /// Decode `data` into the handler's payload type.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.data.clone())
            .map_err(|e| SyncError::InvalidPayload(format!("{}: {e}", self.name)))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmailAddress {
    #[serde(default)]
    pub email_address: Option<String>,
}

/// `clerk/user.created` and `clerk/user.updated`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPayload {
    pub id: String,
    #[serde(default)]
    pub email_addresses: Vec<EmailAddress>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
}

impl UserPayload {
    /// First listed email address, if any.
    pub fn primary_email(&self) -> Option<String> {
        self.email_addresses
            .first()
            .and_then(|e| e.email_address.clone())
    }

    /// `first + " " + last`; an absent part counts as empty, the space is always kept.
    pub fn display_name(&self) -> String {
        format!(
            "{} {}",
            self.first_name.as_deref().unwrap_or(""),
            self.last_name.as_deref().unwrap_or("")
        )
    }
}

/// Payloads that only carry the record id (`*.deleted`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletedPayload {
    pub id: String,
}

/// `clerk/organization.created` and `clerk/organization.updated`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizationPayload {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub slug: String,
    /// Only present on creation.
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
}

/// `clerk/organizationInvitation.accepted`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvitationAcceptedPayload {
    pub user_id: String,
    pub organization_id: String,
    pub role_name: String,
}

/// `app/task.assigned`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskAssignedPayload {
    pub task_id: String,
    /// Base URL of the web app, used to build the deep link.
    pub origin: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_display_name_keeps_single_space() {
        let p: UserPayload = serde_json::from_value(json!({
            "id": "u1", "first_name": "Ada", "last_name": "Lovelace"
        }))
        .unwrap();
        assert_eq!(p.display_name(), "Ada Lovelace");

        let p: UserPayload = serde_json::from_value(json!({"id": "u1", "first_name": "Ada"})).unwrap();
        assert_eq!(p.display_name(), "Ada ");

        let p: UserPayload = serde_json::from_value(json!({"id": "u1", "last_name": null})).unwrap();
        assert_eq!(p.display_name(), " ");
    }

    #[test]
    fn test_primary_email() {
        let p: UserPayload = serde_json::from_value(json!({
            "id": "u1",
            "email_addresses": [{"email_address": "a@x.io"}, {"email_address": "b@x.io"}]
        }))
        .unwrap();
        assert_eq!(p.primary_email().as_deref(), Some("a@x.io"));

        let p: UserPayload = serde_json::from_value(json!({"id": "u1"})).unwrap();
        assert_eq!(p.primary_email(), None);
    }

    #[test]
    fn test_envelope_payload_error_names_event() {
        let event = Event::new(TASK_ASSIGNED, json!({"origin": "https://app"}));
        let err = event.payload::<TaskAssignedPayload>().unwrap_err();
        assert_eq!(err.kind(), "invalid_payload");
        assert!(err.to_string().contains("app/task.assigned"));
    }

    #[test]
    fn test_task_assigned_is_camel_case() {
        let event = Event::new(TASK_ASSIGNED, json!({"taskId": "t1", "origin": "https://app"}));
        let p: TaskAssignedPayload = event.payload().unwrap();
        assert_eq!(p.task_id, "t1");
    }
}
