//! Identity and duplicate-name resolution for one remote item.

use crate::google::GoogleMedia;
use crate::state::{LocalStore, StateError};

/// What [`resolve_and_store`] did with an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// First sighting; row inserted with the returned id.
    Inserted(i64),
    /// Known item with a newer remote date; row updated in place.
    Updated(i64),
    /// Known item, nothing changed.
    Unchanged,
}

/// Assign `media.duplicate_number` and write the item to the store.
///
/// A known `remote_id` keeps its stored folder and duplicate number and is
/// rewritten only when the remote modify date is newer. A new item gets one past the highest
/// number already used for its folder and name. Items are resolved in the
/// order the remote listing returns them, so that order decides which of
/// several same-named items gets the bare name.
pub async fn resolve_and_store(
    store: &dyn LocalStore,
    media: &mut GoogleMedia,
) -> Result<Resolution, StateError> {
    let (duplicate_number, existing) = store
        .file_duplicate_no(&media.orig_name(), media.relative_folder(), media.id())
        .await?;
    media.duplicate_number = duplicate_number;

    match existing {
        Some(row) if media.modify_date() > row.modify_date => {
            tracing::debug!(
                id = %media.id(),
                stored = %row.modify_date,
                remote = %media.modify_date(),
                "Remote item changed, updating"
            );
            // A new date may map to another month; the stored path wins so
            // the row keeps pointing at the file that was downloaded.
            media.set_relative_folder(&row.relative_folder);
            let id = store.put_row(&media.to_record(), true).await?;
            Ok(Resolution::Updated(id))
        }
        Some(_) => Ok(Resolution::Unchanged),
        None => {
            let id = store.put_row(&media.to_record(), false).await?;
            tracing::debug!(
                id = %media.id(),
                path = %format!("{}/{}", media.relative_folder(), media.filename()),
                "Indexed"
            );
            Ok(Resolution::Inserted(id))
        }
    }
}
