//! Current user id provisioning
//!
//! The dashboard has no accounts; a random id is generated on first visit and
//! kept in local storage so engagement survives reloads.

use tracing::info;
use uuid::Uuid;

use crate::error::StorageError;
use crate::storage::KeyValueStore;

/// Return the stored user id, generating and persisting one if absent.
pub fn ensure_user_id<S>(store: &mut S, key: &str) -> Result<String, StorageError>
where
    S: KeyValueStore + ?Sized,
{
    if let Some(existing) = store.get(key)? {
        if !existing.trim().is_empty() {
            return Ok(existing);
        }
    }
    let id = format!("user_{}", Uuid::new_v4().simple());
    store.set(key, &id)?;
    info!(user_id = %id, "generated user id");
    Ok(id)
}
