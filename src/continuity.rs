//! Pagination continuity ("hasMore") resolution.
//!
//! After a home timeline page is merged, at most one row is flagged as having
//! unfetched older data directly below it: the row of the oldest status in
//! the page. The only reliable signal for a gap is identity overlap with what
//! was stored before the merge, since remote positions shift between fetches.

use crate::error::Result;
use crate::model::{EntityKey, PageQuery, Status};
use crate::reconcile::ReconciliationNode;
use crate::store::MergeStore;
use crate::timeline;
use tracing::{debug, warn};

/// What the resolver wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContinuityOutcome {
    /// The anchor status was found in the viewer's timeline and its flag cleared.
    pub anchor_cleared: bool,
    /// Status whose row was flagged `has_more = true`.
    pub flagged_status: Option<String>,
}

/// Whether the oldest status of a page should carry `has_more`.
///
/// `overlap` holds the statuses that were linked to the viewer's timeline
/// before the merge began. With an anchor, only overlap at or below the
/// anchor counts, and the anchor itself does not.
#[must_use]
pub fn should_mark_has_more(anchor: Option<&Status>, oldest: &Status, overlap: &[Status]) -> bool {
    match anchor {
        Some(anchor) => {
            if oldest.key == anchor.key {
                return false;
            }
            overlap
                .iter()
                .filter(|status| status.created_at <= anchor.created_at)
                .all(|status| status.key == anchor.key)
        }
        None => overlap.is_empty(),
    }
}

/// The oldest top-level status of a page. Ties go to the entry later in the
/// page, which is how the server orders older entries.
#[must_use]
pub fn oldest_of_page(nodes: &[ReconciliationNode]) -> Option<&Status> {
    nodes
        .iter()
        .rev()
        .min_by_key(|node| node.status.created_at)
        .map(|node| &node.status)
}

/// Run once per merged home timeline page.
///
/// # Errors
///
/// Returns an error only if a store read or write fails. A missing row for the
/// oldest status is logged and skipped.
pub fn resolve<S: MergeStore>(
    store: &mut S,
    domain: &str,
    viewer_id: &str,
    query: &PageQuery,
    nodes: &[ReconciliationNode],
    overlap: &[Status],
) -> Result<ContinuityOutcome> {
    let mut outcome = ContinuityOutcome::default();

    let anchor = match query.max_id.as_deref() {
        Some(max_id) => store.fetch_status(&EntityKey::new(domain, max_id))?,
        None => None,
    };

    if let Some(anchor) = &anchor {
        if let Some(mut row) = timeline::find_row(store, viewer_id, &anchor.key)? {
            timeline::set_has_more(store, &mut row, false)?;
            outcome.anchor_cleared = true;
        }
    }

    let Some(oldest) = oldest_of_page(nodes) else {
        return Ok(outcome);
    };

    if !should_mark_has_more(anchor.as_ref(), oldest, overlap) {
        debug!(
            viewer = viewer_id,
            oldest = %oldest.key,
            overlap = overlap.len(),
            anchored = anchor.is_some(),
            "Timeline contiguous below page"
        );
        return Ok(outcome);
    }

    match timeline::find_row(store, viewer_id, &oldest.key)? {
        Some(mut row) => {
            timeline::set_has_more(store, &mut row, true)?;
            debug!(viewer = viewer_id, oldest = %oldest.key, "Marked gap below page");
            outcome.flagged_status = Some(oldest.key.id.clone());
        }
        None => {
            warn!(
                viewer = viewer_id,
                status = %oldest.key,
                "Invariant violation: oldest status of page has no timeline row"
            );
        }
    }

    Ok(outcome)
}
