//! Request-scoped preload cache.
//!
//! Before a page is merged every id it could touch is gathered: each status,
//! the status it reposts, and the authors of both. One bulk read per entity
//! type then fills the cache, so the merge itself never does per-entity
//! lookups. Records created during the pass are added back so repeated
//! references within the same page resolve to the same record.
//!
//! When a viewer is present, that viewer's timeline rows and interaction
//! flags for the preloaded statuses are read the same way. A status created
//! during the pass has neither, so a miss in a loaded viewer section is a
//! definite "absent".

use crate::error::Result;
use crate::model::{Account, EntityKey, InteractionFlags, RemoteStatus, Status, TimelineIndex};
use crate::store::MergeStore;
use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, warn};

/// Ids referenced by a batch of remote statuses.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReferencedIds {
    pub statuses: BTreeSet<String>,
    pub accounts: BTreeSet<String>,
}

impl ReferencedIds {
    /// Walk the batch, including one level of wrapped statuses.
    #[must_use]
    pub fn collect(entities: &[RemoteStatus]) -> Self {
        let mut ids = Self::default();
        for status in entities {
            ids.add(status);
        }
        ids
    }

    fn add(&mut self, status: &RemoteStatus) {
        self.statuses.insert(status.id.clone());
        self.accounts.insert(status.account.id.clone());
        if let Some(wrapped) = status.reblog.as_deref() {
            self.add(wrapped);
        }
    }
}

/// Result of a viewer-scoped cache lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerLookup<T> {
    Found(T),
    /// Loaded for this viewer and known not to exist.
    Absent,
    /// Nothing was preloaded for this viewer; ask the store.
    NotLoaded,
}

/// One viewer's rows and flags, keyed by status id.
#[derive(Debug, Default)]
struct ViewerSection {
    viewer_id: String,
    /// `None` when only interactions were loaded (non-home pages).
    rows: Option<HashMap<String, TimelineIndex>>,
    interactions: HashMap<String, InteractionFlags>,
}

/// Records already materialized in the store, keyed by identity.
#[derive(Debug, Default)]
pub struct PreloadCache {
    statuses: HashMap<EntityKey, Status>,
    accounts: HashMap<EntityKey, Account>,
    viewer: Option<ViewerSection>,
}

impl PreloadCache {
    /// Read every record the batch could touch.
    ///
    /// # Errors
    ///
    /// Returns an error if either bulk read fails; the merge pass must abort.
    pub fn load<S: MergeStore>(store: &mut S, domain: &str, entities: &[RemoteStatus]) -> Result<Self> {
        let ids = ReferencedIds::collect(entities);
        let status_ids: Vec<String> = ids.statuses.into_iter().collect();
        let account_ids: Vec<String> = ids.accounts.into_iter().collect();

        let statuses = store.fetch_statuses(domain, &status_ids)?;
        let accounts = store.fetch_accounts(domain, &account_ids)?;

        debug!(
            domain,
            requested_statuses = status_ids.len(),
            found_statuses = statuses.len(),
            requested_accounts = account_ids.len(),
            found_accounts = accounts.len(),
            "Preloaded merge cache"
        );

        Ok(Self {
            statuses: statuses.into_iter().map(|s| (s.key.clone(), s)).collect(),
            accounts: accounts.into_iter().map(|a| (a.key.clone(), a)).collect(),
            viewer: None,
        })
    }

    /// Read `viewer_id`'s interaction flags, and with `with_rows` its timeline
    /// rows, for every cached status. Replaces any earlier viewer section.
    ///
    /// Duplicate rows for one status are an invariant violation: each extra
    /// row is logged and the lowest row id is kept.
    ///
    /// # Errors
    ///
    /// Returns an error if a bulk read fails; the merge pass must abort.
    pub fn load_viewer<S: MergeStore>(
        &mut self,
        store: &mut S,
        domain: &str,
        viewer_id: &str,
        with_rows: bool,
    ) -> Result<()> {
        let ids: Vec<String> = self
            .statuses
            .keys()
            .filter(|key| key.domain == domain)
            .map(|key| key.id.clone())
            .collect();

        let interactions: HashMap<String, InteractionFlags> = if ids.is_empty() {
            HashMap::new()
        } else {
            store
                .fetch_interactions(viewer_id, domain, &ids)?
                .into_iter()
                .collect()
        };

        let rows = if !with_rows {
            None
        } else if ids.is_empty() {
            Some(HashMap::new())
        } else {
            let mut by_status: HashMap<String, TimelineIndex> = HashMap::new();
            for row in store.fetch_timeline_rows(viewer_id, domain, &ids)? {
                match by_status.entry(row.status_id.clone()) {
                    Entry::Occupied(kept) => {
                        warn!(
                            viewer = viewer_id,
                            status = %row.status_id,
                            kept = kept.get().id,
                            ignored = row.id,
                            "Invariant violation: duplicate timeline rows for status"
                        );
                    }
                    Entry::Vacant(slot) => {
                        slot.insert(row);
                    }
                }
            }
            Some(by_status)
        };

        debug!(
            viewer = viewer_id,
            statuses = ids.len(),
            rows = rows.as_ref().map_or(0, HashMap::len),
            interactions = interactions.len(),
            "Preloaded viewer state"
        );

        self.viewer = Some(ViewerSection {
            viewer_id: viewer_id.to_string(),
            rows,
            interactions,
        });
        Ok(())
    }

    fn section(&self, viewer_id: &str) -> Option<&ViewerSection> {
        self.viewer
            .as_ref()
            .filter(|section| section.viewer_id == viewer_id)
    }

    fn section_mut(&mut self, viewer_id: &str) -> Option<&mut ViewerSection> {
        self.viewer
            .as_mut()
            .filter(|section| section.viewer_id == viewer_id)
    }

    #[must_use]
    pub fn timeline_row(&self, viewer_id: &str, status_id: &str) -> ViewerLookup<&TimelineIndex> {
        match self.section(viewer_id).and_then(|section| section.rows.as_ref()) {
            Some(rows) => rows.get(status_id).map_or(ViewerLookup::Absent, ViewerLookup::Found),
            None => ViewerLookup::NotLoaded,
        }
    }

    /// Record a row created during the pass. Ignored if rows for its viewer
    /// were never loaded.
    pub fn insert_timeline_row(&mut self, row: TimelineIndex) {
        if let Some(rows) = self
            .section_mut(&row.viewer_id)
            .and_then(|section| section.rows.as_mut())
        {
            rows.insert(row.status_id.clone(), row);
        }
    }

    #[must_use]
    pub fn interaction(&self, viewer_id: &str, status_id: &str) -> ViewerLookup<InteractionFlags> {
        match self.section(viewer_id) {
            Some(section) => section
                .interactions
                .get(status_id)
                .copied()
                .map_or(ViewerLookup::Absent, ViewerLookup::Found),
            None => ViewerLookup::NotLoaded,
        }
    }

    /// Record flags written during the pass. Ignored for a viewer that was
    /// never loaded.
    pub fn insert_interaction(&mut self, viewer_id: &str, status_id: &str, flags: InteractionFlags) {
        if let Some(section) = self.section_mut(viewer_id) {
            section.interactions.insert(status_id.to_string(), flags);
        }
    }

    /// Cached statuses that had a row in `viewer_id`'s timeline when rows
    /// were loaded. Empty if rows were not loaded for this viewer.
    #[must_use]
    pub fn linked_statuses(&self, viewer_id: &str) -> Vec<Status> {
        let Some(rows) = self.section(viewer_id).and_then(|section| section.rows.as_ref()) else {
            return Vec::new();
        };
        self.statuses
            .values()
            .filter(|status| rows.contains_key(&status.key.id))
            .cloned()
            .collect()
    }

    pub fn status_mut(&mut self, key: &EntityKey) -> Option<&mut Status> {
        self.statuses.get_mut(key)
    }

    #[must_use]
    pub fn account(&self, key: &EntityKey) -> Option<&Account> {
        self.accounts.get(key)
    }

    pub fn insert_status(&mut self, status: Status) {
        self.statuses.insert(status.key.clone(), status);
    }

    pub fn insert_account(&mut self, account: Account) {
        self.accounts.insert(account.key.clone(), account);
    }

    #[must_use]
    pub fn status_count(&self) -> usize {
        self.statuses.len()
    }

    #[must_use]
    pub fn account_count(&self) -> usize {
        self.accounts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Storage;
    use crate::test_support::{DOMAIN, base_time, remote_account, remote_status, seed_status};
    use crate::timeline::create_row;

    #[test]
    fn collects_wrapped_ids_and_authors() {
        let original = remote_status("1", "alice", 10);
        let mut repost = remote_status("2", "bob", 20);
        repost.reblog = Some(Box::new(original));
        let plain = remote_status("3", "bob", 30);

        let ids = ReferencedIds::collect(&[repost, plain]);

        let statuses: Vec<&str> = ids.statuses.iter().map(String::as_str).collect();
        let accounts: Vec<&str> = ids.accounts.iter().map(String::as_str).collect();
        assert_eq!(statuses, vec!["1", "2", "3"]);
        assert_eq!(accounts, vec!["alice", "bob"]);
    }

    #[test]
    fn collect_handles_empty_batch() {
        let ids = ReferencedIds::collect(&[]);
        assert!(ids.statuses.is_empty());
        assert!(ids.accounts.is_empty());
    }

    #[test]
    fn inserted_records_are_found_by_key() {
        let mut cache = PreloadCache::default();
        let observed = chrono::Utc::now();
        let account = Account::from_remote("example.social", &remote_account("alice"), observed);
        cache.insert_account(account);
        assert!(
            cache
                .account(&EntityKey::new("example.social", "alice"))
                .is_some()
        );
        assert!(cache.account(&EntityKey::new("other.social", "alice")).is_none());
        assert_eq!(cache.account_count(), 1);
        assert_eq!(cache.status_count(), 0);
    }

    #[test]
    fn viewer_section_answers_row_and_flag_lookups() {
        let mut storage = Storage::open_memory().unwrap();
        let remote = remote_status("7", "alice", 0);
        let status = Status::from_remote(DOMAIN, &remote, base_time());
        let liked = InteractionFlags {
            favourited: Some(true),
            ..InteractionFlags::default()
        };

        storage
            .with_store(|store| {
                seed_status(store, &status)?;
                let first = create_row(store, DOMAIN, "viewer", &status)?;
                create_row(store, DOMAIN, "viewer", &status)?;
                store.store_interaction(&status.key, "viewer", &liked)?;

                let batch = [remote.clone(), remote_status("8", "alice", 1)];
                let mut cache = PreloadCache::load(store, DOMAIN, &batch)?;
                assert_eq!(cache.timeline_row("viewer", "7"), ViewerLookup::NotLoaded);

                cache.load_viewer(store, DOMAIN, "viewer", true)?;
                match cache.timeline_row("viewer", "7") {
                    ViewerLookup::Found(row) => assert_eq!(row.id, first.id),
                    other => panic!("expected the first row, got {other:?}"),
                }
                assert_eq!(cache.timeline_row("viewer", "8"), ViewerLookup::Absent);
                assert_eq!(cache.timeline_row("someone-else", "7"), ViewerLookup::NotLoaded);
                assert_eq!(cache.interaction("viewer", "7"), ViewerLookup::Found(liked));
                assert_eq!(cache.interaction("viewer", "8"), ViewerLookup::Absent);
                assert_eq!(cache.linked_statuses("viewer").len(), 1);

                cache.load_viewer(store, DOMAIN, "viewer", false)?;
                assert_eq!(cache.timeline_row("viewer", "7"), ViewerLookup::NotLoaded);
                assert!(cache.linked_statuses("viewer").is_empty());
                Ok(())
            })
            .unwrap();
    }
}
