//! User lifecycle handlers (`clerk/user.*`).

use pmsync_core::error::Result;
use pmsync_core::events::{DeletedPayload, Event, UserPayload};
use pmsync_core::types::User;
use pmsync_store::AppDb;

fn user_from(data: &UserPayload) -> User {
    User {
        id: data.id.clone(),
        email: data.primary_email(),
        name: data.display_name(),
        image: data.image_url.clone(),
    }
}

/// `clerk/user.created` → insert user.
pub fn sync_user_creation(db: &AppDb, event: &Event) -> Result<()> {
    let data: UserPayload = event.payload()?;
    db.create_user(&user_from(&data))
}

/// `clerk/user.updated` → overwrite email, name, image.
pub fn sync_user_update(db: &AppDb, event: &Event) -> Result<()> {
    let data: UserPayload = event.payload()?;
    db.update_user(&user_from(&data))
}

/// `clerk/user.deleted` → delete by id.
pub fn sync_user_deletion(db: &AppDb, event: &Event) -> Result<()> {
    let data: DeletedPayload = event.payload()?;
    db.delete_user(&data.id)
}
