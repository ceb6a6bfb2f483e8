//! Reconciliation tree builder.
//!
//! Each top-level entry of a page becomes a [`ReconciliationNode`]. A repost
//! gets a child node for the status it wraps, built first so the wrapper's
//! reference always points at an existing record.

use crate::error::{FeedError, Result};
use crate::model::{MergeResult, PageVariant, RemoteStatus, Status, StatusField, TimelineIndex};
use crate::preload::PreloadCache;
use crate::store::MergeStore;
use crate::timeline;
use crate::upsert::{MergeContext, upsert_status};
use tracing::trace;

/// The create/merge decision made for one status and its author.
#[derive(Debug, Clone)]
pub struct ReconciliationNode {
    pub status: Status,
    pub variant: PageVariant,
    pub status_created: bool,
    pub author_created: bool,
    pub changed_fields: Vec<StatusField>,
    /// Home timeline row, when this node registered into (or was already in)
    /// the viewer's timeline.
    pub timeline_row: Option<TimelineIndex>,
    pub wrapped: Option<Box<ReconciliationNode>>,
}

impl ReconciliationNode {
    /// This node followed by its wrapped node, if any.
    pub fn iter(&self) -> impl Iterator<Item = &Self> {
        std::iter::once(self).chain(self.wrapped.as_deref())
    }
}

/// Build the node for one top-level entry of a page.
///
/// # Errors
///
/// Returns [`FeedError::MalformedEntity`] when a wrapped status wraps another
/// status, or any store error raised while upserting.
pub fn build_node<S: MergeStore>(
    store: &mut S,
    cache: &mut PreloadCache,
    ctx: &MergeContext<'_>,
    remote: &RemoteStatus,
    variant: PageVariant,
) -> Result<ReconciliationNode> {
    let wrapped = match remote.reblog.as_deref() {
        Some(inner) if variant == PageVariant::Wrapped => {
            return Err(FeedError::malformed(
                &inner.id,
                "wrapped status wraps another status",
            ));
        }
        Some(inner) => {
            if inner.id.is_empty() {
                return Err(FeedError::malformed(&remote.id, "wrapped status has no id"));
            }
            Some(Box::new(build_node(
                store,
                cache,
                ctx,
                inner,
                PageVariant::Wrapped,
            )?))
        }
        None => None,
    };

    let outcome = upsert_status(store, cache, ctx, remote)?;

    let timeline_row = match (variant, ctx.viewer_id) {
        (PageVariant::Home, Some(viewer_id)) => Some(timeline::find_or_create_row(
            store,
            cache,
            ctx.domain,
            viewer_id,
            &outcome.status,
        )?),
        _ => None,
    };

    trace!(
        status = %outcome.status.key,
        %variant,
        created = outcome.status_created,
        wrapped = wrapped.is_some(),
        "Built reconciliation node"
    );

    Ok(ReconciliationNode {
        status: outcome.status,
        variant,
        status_created: outcome.status_created,
        author_created: outcome.author_created,
        changed_fields: outcome.changed_fields,
        timeline_row,
        wrapped,
    })
}

/// Aggregate create/merge counts over every node, wrapped ones included.
#[must_use]
pub fn count_outcomes(nodes: &[ReconciliationNode]) -> MergeResult {
    let mut counts = MergeResult::default();
    for node in nodes.iter().flat_map(ReconciliationNode::iter) {
        if node.status_created {
            counts.created_count += 1;
        } else {
            counts.merged_count += 1;
        }
        if node.author_created {
            counts.created_authors += 1;
        } else {
            counts.merged_authors += 1;
        }
    }
    counts
}
