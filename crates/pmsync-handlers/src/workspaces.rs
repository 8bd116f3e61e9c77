//! Organization and membership handlers (`clerk/organization.*`,
//! `clerk/organizationInvitation.accepted`).

use pmsync_core::error::{Result, SyncError};
use pmsync_core::events::{DeletedPayload, Event, InvitationAcceptedPayload, OrganizationPayload};
use pmsync_core::types::{MemberRole, Workspace};
use pmsync_store::AppDb;

/// `clerk/organization.created` → workspace plus the creator as ADMIN, in one write.
pub fn sync_workspace_creation(db: &AppDb, event: &Event) -> Result<()> {
    let data: OrganizationPayload = event.payload()?;
    let owner_id = data.created_by.ok_or_else(|| {
        SyncError::InvalidPayload(format!("organization '{}' has no created_by", data.id))
    })?;
    db.create_workspace_with_owner(&Workspace {
        id: data.id,
        name: data.name,
        slug: data.slug,
        owner_id,
        image_url: data.image_url,
    })
}

/// `clerk/organization.updated` → overwrite name, slug, image.
pub fn sync_workspace_update(db: &AppDb, event: &Event) -> Result<()> {
    let data: OrganizationPayload = event.payload()?;
    db.update_workspace(&data.id, &data.name, &data.slug, data.image_url.as_deref())
}

/// `clerk/organization.deleted` → delete; dependents cascade.
pub fn sync_workspace_deletion(db: &AppDb, event: &Event) -> Result<()> {
    let data: DeletedPayload = event.payload()?;
    db.delete_workspace(&data.id)
}

/// `clerk/organizationInvitation.accepted` → membership with the upper-cased role.
pub fn sync_workspace_member_creation(db: &AppDb, event: &Event) -> Result<()> {
    let data: InvitationAcceptedPayload = event.payload()?;
    let role = MemberRole::parse(&data.role_name).ok_or_else(|| {
        SyncError::InvalidPayload(format!("unknown member role '{}'", data.role_name))
    })?;
    db.add_workspace_member(&data.user_id, &data.organization_id, role)
}
