//! Persistence seam used by the merge engine.
//!
//! A [`MergeStore`] is one open transactional context. The engine reads and
//! writes through it and never commits; whoever opened the context decides
//! whether it commits or rolls back. [`crate::storage::SqliteStore`] is the
//! `SQLite` implementation.

use crate::error::Result;
use crate::model::{Account, EntityKey, InteractionFlags, Status, StatusField, TimelineIndex};

/// Reads and writes the engine needs from the underlying store.
pub trait MergeStore {
    /// Bulk read of statuses with `id ∈ ids` on `domain`.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn fetch_statuses(&mut self, domain: &str, ids: &[String]) -> Result<Vec<Status>>;

    /// Bulk read of accounts with `id ∈ ids` on `domain`.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn fetch_accounts(&mut self, domain: &str, ids: &[String]) -> Result<Vec<Account>>;

    /// Point read of one status.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn fetch_status(&mut self, key: &EntityKey) -> Result<Option<Status>>;

    /// # Errors
    ///
    /// Returns an error if the write fails, including a key conflict.
    fn insert_status(&mut self, status: &Status) -> Result<()>;

    /// Write `fields` plus the last-observed timestamp of `status`. Columns not
    /// listed in `fields` are left untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn update_status(&mut self, status: &Status, fields: &[StatusField]) -> Result<()>;

    /// # Errors
    ///
    /// Returns an error if the write fails, including a key conflict.
    fn insert_account(&mut self, account: &Account) -> Result<()>;

    /// Stored viewer-relative flags for a status, if any were ever recorded.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn fetch_interaction(&mut self, key: &EntityKey, viewer_id: &str)
    -> Result<Option<InteractionFlags>>;

    /// Bulk read of `viewer_id`'s stored flags for statuses with `id ∈ ids`,
    /// keyed by status id.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn fetch_interactions(
        &mut self,
        viewer_id: &str,
        domain: &str,
        ids: &[String],
    ) -> Result<Vec<(String, InteractionFlags)>>;

    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn store_interaction(
        &mut self,
        key: &EntityKey,
        viewer_id: &str,
        flags: &InteractionFlags,
    ) -> Result<()>;

    /// All timeline rows linking `viewer_id` to the status `key`. More than
    /// one row is an invariant violation the caller reports.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn timeline_rows(&mut self, viewer_id: &str, key: &EntityKey) -> Result<Vec<TimelineIndex>>;

    /// Bulk read of `viewer_id`'s timeline rows for statuses with `id ∈ ids`,
    /// ordered by row id.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn fetch_timeline_rows(
        &mut self,
        viewer_id: &str,
        domain: &str,
        ids: &[String],
    ) -> Result<Vec<TimelineIndex>>;

    /// Insert a timeline row; the store assigns the row id.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn insert_timeline_row(
        &mut self,
        domain: &str,
        viewer_id: &str,
        status_id: &str,
        created_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<TimelineIndex>;

    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn set_has_more(&mut self, row_id: i64, has_more: bool) -> Result<()>;
}
