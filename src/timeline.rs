//! Per-viewer timeline index.
//!
//! A row links one canonical status to one viewer's home timeline. Rows are
//! separate from statuses so the same status can sit in many timelines
//! without being duplicated. [`create_row`] does not deduplicate; the merge
//! path goes through [`find_or_create_row`].

use crate::error::Result;
use crate::model::{EntityKey, Status, TimelineIndex};
use crate::preload::{PreloadCache, ViewerLookup};
use crate::store::MergeStore;
use tracing::warn;

/// Create a row for `status` in `viewer_id`'s timeline with `has_more` unset.
///
/// # Errors
///
/// Returns an error if the insert fails.
pub fn create_row<S: MergeStore>(
    store: &mut S,
    domain: &str,
    viewer_id: &str,
    status: &Status,
) -> Result<TimelineIndex> {
    store.insert_timeline_row(domain, viewer_id, &status.key.id, status.created_at)
}

/// The row linking `viewer_id` to `status`, created if there is none.
///
/// Rows preloaded into `cache` for this viewer answer without a store read;
/// otherwise [`find_row`] asks the store. A created row is added to the cache
/// so a status listed twice in one page still gets a single row.
///
/// # Errors
///
/// Returns an error if the lookup or insert fails.
pub fn find_or_create_row<S: MergeStore>(
    store: &mut S,
    cache: &mut PreloadCache,
    domain: &str,
    viewer_id: &str,
    status: &Status,
) -> Result<TimelineIndex> {
    let existing = match cache.timeline_row(viewer_id, &status.key.id) {
        ViewerLookup::Found(row) => Some(row.clone()),
        ViewerLookup::Absent => None,
        ViewerLookup::NotLoaded => find_row(store, viewer_id, &status.key)?,
    };
    if let Some(row) = existing {
        return Ok(row);
    }
    let row = create_row(store, domain, viewer_id, status)?;
    cache.insert_timeline_row(row.clone());
    Ok(row)
}

/// Set the continuity flag of one row.
///
/// # Errors
///
/// Returns an error if the update fails.
pub fn set_has_more<S: MergeStore>(store: &mut S, row: &mut TimelineIndex, has_more: bool) -> Result<()> {
    if row.has_more != has_more {
        store.set_has_more(row.id, has_more)?;
        row.has_more = has_more;
    }
    Ok(())
}

/// The row linking `viewer_id` to `key`, if any.
///
/// Finding more than one row is an invariant violation: it is logged and the
/// oldest row is returned so the merge can continue.
///
/// # Errors
///
/// Returns an error if the lookup fails.
pub fn find_row<S: MergeStore>(
    store: &mut S,
    viewer_id: &str,
    key: &EntityKey,
) -> Result<Option<TimelineIndex>> {
    let mut rows = store.timeline_rows(viewer_id, key)?;
    if rows.len() > 1 {
        warn!(
            viewer = viewer_id,
            status = %key,
            rows = rows.len(),
            "Invariant violation: duplicate timeline rows for status"
        );
    }
    rows.sort_by_key(|row| row.id);
    Ok(rows.into_iter().next())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Storage;
    use crate::test_support::{DOMAIN, base_time, remote_status, seed_status};

    #[test]
    fn created_row_copies_timestamp_and_starts_without_more() {
        let mut storage = Storage::open_memory().unwrap();
        let status = Status::from_remote(DOMAIN, &remote_status("7", "alice", 3), base_time());

        let row = storage
            .with_store(|store| {
                seed_status(store, &status)?;
                create_row(store, DOMAIN, "viewer", &status)
            })
            .unwrap();

        assert!(!row.has_more);
        assert_eq!(row.created_at, status.created_at);
        assert_eq!(row.status_id, "7");
    }

    #[test]
    fn find_row_prefers_oldest_duplicate() {
        let mut storage = Storage::open_memory().unwrap();
        let status = Status::from_remote(DOMAIN, &remote_status("7", "alice", 3), base_time());

        storage
            .with_store(|store| {
                seed_status(store, &status)?;
                let first = create_row(store, DOMAIN, "viewer", &status)?;
                create_row(store, DOMAIN, "viewer", &status)?;
                let found = find_row(store, "viewer", &status.key)?.unwrap();
                assert_eq!(found.id, first.id);
                assert!(find_row(store, "someone-else", &status.key)?.is_none());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn set_has_more_round_trips() {
        let mut storage = Storage::open_memory().unwrap();
        let status = Status::from_remote(DOMAIN, &remote_status("7", "alice", 3), base_time());

        storage
            .with_store(|store| {
                seed_status(store, &status)?;
                let mut row = create_row(store, DOMAIN, "viewer", &status)?;
                set_has_more(store, &mut row, true)?;
                let reread = find_row(store, "viewer", &status.key)?.unwrap();
                assert!(reread.has_more);
                Ok(())
            })
            .unwrap();
    }
}
