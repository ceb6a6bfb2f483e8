//! Create-or-merge of a single remote status.
//!
//! A status missing from the preload cache is materialized; a cached one is
//! compared field by field and only differing columns are written. The
//! last-observed timestamp is always advanced. Authors are resolved the same
//! cache-or-create way but an existing author is never overwritten here.

use crate::error::{FeedError, Result};
use crate::model::{Account, InteractionFlags, RemoteAccount, RemoteStatus, Status, StatusField};
use crate::preload::{PreloadCache, ViewerLookup};
use crate::store::MergeStore;
use chrono::{DateTime, Utc};
use tracing::trace;

/// Everything about a merge pass that is the same for every entity.
#[derive(Debug, Clone, Copy)]
pub struct MergeContext<'a> {
    pub domain: &'a str,
    /// Absent for anonymous fetches such as a logged-out public timeline.
    pub viewer_id: Option<&'a str>,
    /// Network-observation time, supplied by the caller.
    pub observed_at: DateTime<Utc>,
}

/// Result of upserting one status.
#[derive(Debug, Clone)]
pub struct UpsertOutcome {
    pub status: Status,
    pub status_created: bool,
    pub author_created: bool,
    /// Columns written by the merge path. Always empty for created records.
    pub changed_fields: Vec<StatusField>,
}

/// Create or merge `remote` into the store.
///
/// A wrapped status must already have been upserted; this function only
/// records the reference.
///
/// # Errors
///
/// Returns [`FeedError::MalformedEntity`] for an entity without an id, or a
/// store error if a write fails.
pub fn upsert_status<S: MergeStore>(
    store: &mut S,
    cache: &mut PreloadCache,
    ctx: &MergeContext<'_>,
    remote: &RemoteStatus,
) -> Result<UpsertOutcome> {
    if remote.id.is_empty() {
        return Err(FeedError::malformed(&remote.uri, "status has no id"));
    }

    let (_, author_created) = resolve_author(store, cache, ctx, &remote.account)?;
    let key = remote.key(ctx.domain);

    let outcome = if let Some(local) = cache.status_mut(&key) {
        let changed_fields = diff_fields(local, remote);
        apply_fields(local, remote, &changed_fields);
        local.updated_at = ctx.observed_at;
        store.update_status(local, &changed_fields)?;
        trace!(status = %key, changed = changed_fields.len(), "Merged status");
        UpsertOutcome {
            status: local.clone(),
            status_created: false,
            author_created,
            changed_fields,
        }
    } else {
        let status = Status::from_remote(ctx.domain, remote, ctx.observed_at);
        store.insert_status(&status)?;
        cache.insert_status(status.clone());
        trace!(status = %key, "Created status");
        UpsertOutcome {
            status,
            status_created: true,
            author_created,
            changed_fields: Vec::new(),
        }
    };

    if let Some(viewer_id) = ctx.viewer_id {
        merge_interaction(store, cache, &outcome.status, viewer_id, remote.interaction())?;
    }

    Ok(outcome)
}

/// Resolve the author from the cache or create it.
///
/// Returns the local account and whether it was created.
fn resolve_author<S: MergeStore>(
    store: &mut S,
    cache: &mut PreloadCache,
    ctx: &MergeContext<'_>,
    remote: &RemoteAccount,
) -> Result<(Account, bool)> {
    if remote.id.is_empty() {
        return Err(FeedError::malformed(&remote.acct, "account has no id"));
    }

    let key = crate::model::EntityKey::new(ctx.domain, &remote.id);
    if let Some(account) = cache.account(&key) {
        return Ok((account.clone(), false));
    }

    let account = Account::from_remote(ctx.domain, remote, ctx.observed_at);
    store.insert_account(&account)?;
    cache.insert_account(account.clone());
    trace!(account = %key, "Created account");
    Ok((account, true))
}

fn merge_interaction<S: MergeStore>(
    store: &mut S,
    cache: &mut PreloadCache,
    status: &Status,
    viewer_id: &str,
    observed: InteractionFlags,
) -> Result<()> {
    if observed.is_empty() {
        return Ok(());
    }
    let stored = match cache.interaction(viewer_id, &status.key.id) {
        ViewerLookup::Found(flags) => flags,
        ViewerLookup::Absent => InteractionFlags::default(),
        ViewerLookup::NotLoaded => store
            .fetch_interaction(&status.key, viewer_id)?
            .unwrap_or_default(),
    };
    let merged = stored.overlay(observed);
    if merged != stored {
        store.store_interaction(&status.key, viewer_id, &merged)?;
        cache.insert_interaction(viewer_id, &status.key.id, merged);
    }
    Ok(())
}

/// Mutable fields whose remote value differs from the local record.
#[must_use]
pub fn diff_fields(local: &Status, remote: &RemoteStatus) -> Vec<StatusField> {
    let mut fields = Vec::new();
    let mut check = |differs: bool, field: StatusField| {
        if differs {
            fields.push(field);
        }
    };

    check(local.content != remote.content, StatusField::Content);
    check(local.spoiler_text != remote.spoiler_text, StatusField::SpoilerText);
    check(local.visibility != remote.visibility, StatusField::Visibility);
    check(local.sensitive != remote.sensitive, StatusField::Sensitive);
    check(local.reblogs_count != remote.reblogs_count, StatusField::ReblogsCount);
    check(
        local.favourites_count != remote.favourites_count,
        StatusField::FavouritesCount,
    );
    check(local.replies_count != remote.replies_count, StatusField::RepliesCount);
    check(local.language != remote.language, StatusField::Language);
    check(local.edited_at != remote.edited_at, StatusField::EditedAt);
    check(
        local.media_attachments != remote.media_attachments,
        StatusField::MediaAttachments,
    );
    check(local.mentions != remote.mentions, StatusField::Mentions);
    check(local.tags != remote.tags, StatusField::Tags);
    check(local.poll != remote.poll, StatusField::Poll);

    fields
}

fn apply_fields(local: &mut Status, remote: &RemoteStatus, fields: &[StatusField]) {
    for field in fields {
        match field {
            StatusField::Content => local.content.clone_from(&remote.content),
            StatusField::SpoilerText => local.spoiler_text.clone_from(&remote.spoiler_text),
            StatusField::Visibility => local.visibility = remote.visibility,
            StatusField::Sensitive => local.sensitive = remote.sensitive,
            StatusField::ReblogsCount => local.reblogs_count = remote.reblogs_count,
            StatusField::FavouritesCount => local.favourites_count = remote.favourites_count,
            StatusField::RepliesCount => local.replies_count = remote.replies_count,
            StatusField::Language => local.language.clone_from(&remote.language),
            StatusField::EditedAt => local.edited_at = remote.edited_at,
            StatusField::MediaAttachments => {
                local.media_attachments.clone_from(&remote.media_attachments);
            }
            StatusField::Mentions => local.mentions.clone_from(&remote.mentions),
            StatusField::Tags => local.tags.clone_from(&remote.tags),
            StatusField::Poll => local.poll.clone_from(&remote.poll),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EntityKey, Visibility};
    use crate::storage::Storage;
    use crate::test_support::{DOMAIN, base_time, remote_status};
    use chrono::Duration;

    fn ctx(observed_at: DateTime<Utc>) -> MergeContext<'static> {
        MergeContext {
            domain: DOMAIN,
            viewer_id: Some("viewer"),
            observed_at,
        }
    }

    #[test]
    fn diff_reports_only_changed_fields() {
        let remote = remote_status("1", "alice", 0);
        let local = Status::from_remote(DOMAIN, &remote, base_time());
        assert!(diff_fields(&local, &remote).is_empty());

        let mut newer = remote;
        newer.reblogs_count = 4;
        newer.visibility = Visibility::Unlisted;
        assert_eq!(
            diff_fields(&local, &newer),
            vec![StatusField::Visibility, StatusField::ReblogsCount]
        );
    }

    #[test]
    fn upsert_creates_then_merges() {
        let mut storage = Storage::open_memory().unwrap();
        let mut remote = remote_status("1", "alice", 0);

        storage
            .with_store(|store| {
                let mut cache = PreloadCache::load(store, DOMAIN, std::slice::from_ref(&remote))?;
                let first = upsert_status(store, &mut cache, &ctx(base_time()), &remote)?;
                assert!(first.status_created);
                assert!(first.author_created);

                remote.favourites_count = 9;
                let later = base_time() + Duration::minutes(5);
                let second = upsert_status(store, &mut cache, &ctx(later), &remote)?;
                assert!(!second.status_created);
                assert!(!second.author_created);
                assert_eq!(second.changed_fields, vec![StatusField::FavouritesCount]);
                assert_eq!(second.status.updated_at, later);
                Ok(())
            })
            .unwrap();

        let stored = storage
            .get_status(&EntityKey::new(DOMAIN, "1"))
            .unwrap()
            .unwrap();
        assert_eq!(stored.favourites_count, 9);
    }

    #[test]
    fn upsert_rejects_missing_id() {
        let mut storage = Storage::open_memory().unwrap();
        let remote = remote_status("", "alice", 0);
        let err = storage
            .with_store(|store| {
                let mut cache = PreloadCache::default();
                upsert_status(store, &mut cache, &ctx(base_time()), &remote).map(|_| ())
            })
            .unwrap_err();
        assert!(matches!(err, FeedError::MalformedEntity { .. }));
    }

    #[test]
    fn existing_author_is_not_overwritten() {
        let mut storage = Storage::open_memory().unwrap();
        let first = remote_status("1", "alice", 0);
        let mut second = remote_status("2", "alice", 1);
        second.account.display_name = "Renamed".to_string();

        storage
            .with_store(|store| {
                let batch = [first.clone(), second.clone()];
                let mut cache = PreloadCache::load(store, DOMAIN, &batch)?;
                upsert_status(store, &mut cache, &ctx(base_time()), &first)?;
                let outcome = upsert_status(store, &mut cache, &ctx(base_time()), &second)?;
                assert!(outcome.status_created);
                assert!(!outcome.author_created);
                Ok(())
            })
            .unwrap();

        let author = storage
            .get_account(&EntityKey::new(DOMAIN, "alice"))
            .unwrap()
            .unwrap();
        assert_eq!(author.display_name, "ALICE");
    }

    #[test]
    fn interaction_flags_are_merged_for_viewer() {
        let mut storage = Storage::open_memory().unwrap();
        let mut remote = remote_status("1", "alice", 0);
        remote.favourited = Some(true);
        remote.bookmarked = Some(true);

        storage
            .with_store(|store| {
                let mut cache = PreloadCache::default();
                upsert_status(store, &mut cache, &ctx(base_time()), &remote)?;
                remote.favourited = Some(false);
                remote.bookmarked = None;
                upsert_status(store, &mut cache, &ctx(base_time()), &remote)?;
                Ok(())
            })
            .unwrap();

        let flags = storage
            .get_interaction(&EntityKey::new(DOMAIN, "1"), "viewer")
            .unwrap()
            .unwrap();
        assert_eq!(flags.favourited, Some(false));
        assert_eq!(flags.bookmarked, Some(true));
    }
}
