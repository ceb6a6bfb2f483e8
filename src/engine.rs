//! Page merge orchestration.
//!
//! `merge_page` runs preload, reconciliation (with timeline registration) and
//! continuity resolution against one open [`MergeStore`]. It never commits;
//! see [`crate::storage::Storage::merge_page`] for the transactional wrapper.

use crate::continuity::{self, ContinuityOutcome};
use crate::error::Result;
use crate::model::{MergeResult, PageQuery, PageVariant, RemoteStatus, StatusField};
use crate::preload::PreloadCache;
use crate::reconcile::{ReconciliationNode, build_node, count_outcomes};
use crate::store::MergeStore;
use crate::upsert::MergeContext;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::debug;

/// One page as handed over by the fetch collaborator.
#[derive(Debug, Clone, Copy)]
pub struct PageRequest<'a> {
    pub domain: &'a str,
    pub viewer_id: Option<&'a str>,
    pub query: &'a PageQuery,
    pub variant: PageVariant,
    pub entities: &'a [RemoteStatus],
    pub observed_at: DateTime<Utc>,
}

/// Aggregate result of a page merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageOutcome {
    pub counts: MergeResult,
    /// How many statuses had each column rewritten by the merge path.
    pub field_writes: BTreeMap<StatusField, usize>,
    /// Present only for home pages merged on behalf of a viewer.
    pub continuity: Option<ContinuityOutcome>,
}

/// Merge one page into `store`.
///
/// # Errors
///
/// Any store failure or malformed entity aborts the pass; the caller must
/// roll back the transaction.
pub fn merge_page<S: MergeStore>(store: &mut S, request: &PageRequest<'_>) -> Result<PageOutcome> {
    let ctx = MergeContext {
        domain: request.domain,
        viewer_id: request.viewer_id,
        observed_at: request.observed_at,
    };

    let mut cache = PreloadCache::load(store, request.domain, request.entities)?;

    let tracks_continuity = request.variant == PageVariant::Home;
    if let Some(viewer_id) = request.viewer_id {
        cache.load_viewer(store, request.domain, viewer_id, tracks_continuity)?;
    }
    // Statuses linked to the viewer's timeline before anything is written.
    let overlap = match (tracks_continuity, request.viewer_id) {
        (true, Some(viewer_id)) => cache.linked_statuses(viewer_id),
        _ => Vec::new(),
    };

    let mut nodes = Vec::with_capacity(request.entities.len());
    for remote in request.entities {
        nodes.push(build_node(store, &mut cache, &ctx, remote, request.variant)?);
    }

    let continuity = match (tracks_continuity, request.viewer_id) {
        (true, Some(viewer_id)) => Some(continuity::resolve(
            store,
            request.domain,
            viewer_id,
            request.query,
            &nodes,
            &overlap,
        )?),
        _ => None,
    };

    let outcome = PageOutcome {
        counts: count_outcomes(&nodes),
        field_writes: count_field_writes(&nodes),
        continuity,
    };
    debug!(
        domain = request.domain,
        variant = %request.variant,
        entities = request.entities.len(),
        cached_statuses = cache.status_count(),
        cached_accounts = cache.account_count(),
        overlap = overlap.len(),
        "Merged page"
    );
    Ok(outcome)
}

fn count_field_writes(nodes: &[ReconciliationNode]) -> BTreeMap<StatusField, usize> {
    let mut writes = BTreeMap::new();
    for node in nodes.iter().flat_map(ReconciliationNode::iter) {
        for field in &node.changed_fields {
            *writes.entry(*field).or_insert(0) += 1;
        }
    }
    writes
}
