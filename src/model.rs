//! Data models for remote feed entries and their local records.
//!
//! Remote types (`Remote*`) are what the decoding boundary hands to the
//! engine. Local types are what the store materializes. Everything is keyed
//! by [`EntityKey`]: the origin server domain plus the remote id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Composite identity of every remote entity: origin domain and remote id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    pub domain: String,
    pub id: String,
}

impl EntityKey {
    pub fn new(domain: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            id: id.into(),
        }
    }
}

impl std::fmt::Display for EntityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.id, self.domain)
    }
}

/// Who can see a status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    #[default]
    Public,
    Unlisted,
    Private,
    Direct,
}

impl Visibility {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Unlisted => "unlisted",
            Self::Private => "private",
            Self::Direct => "direct",
        }
    }
}

impl std::str::FromStr for Visibility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(Self::Public),
            "unlisted" => Ok(Self::Unlisted),
            "private" => Ok(Self::Private),
            "direct" => Ok(Self::Direct),
            _ => Err(format!("Invalid visibility: {s}")),
        }
    }
}

/// Which feed a page (or a node of a reconciliation tree) came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageVariant {
    /// The viewer's personal aggregated feed. Only this variant registers
    /// timeline index rows.
    Home,
    Public,
    Account,
    Favourites,
    Lookup,
    /// A status reached through another status' repost reference.
    Wrapped,
}

impl std::fmt::Display for PageVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Home => write!(f, "home"),
            Self::Public => write!(f, "public"),
            Self::Account => write!(f, "account"),
            Self::Favourites => write!(f, "favourites"),
            Self::Lookup => write!(f, "lookup"),
            Self::Wrapped => write!(f, "wrapped"),
        }
    }
}

// =============================================================================
// Remote representations
// =============================================================================

/// An account as decoded from the remote server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteAccount {
    pub id: String,
    pub username: String,
    pub acct: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub header: Option<String>,
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub bot: bool,
    #[serde(default)]
    pub followers_count: i64,
    #[serde(default)]
    pub following_count: i64,
    #[serde(default)]
    pub statuses_count: i64,
    pub created_at: DateTime<Utc>,
}

/// Media attached to a status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaAttachment {
    pub id: String,
    #[serde(rename = "type")]
    pub media_type: String,
    pub url: String,
    #[serde(default)]
    pub preview_url: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// A mentioned account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mention {
    pub id: String,
    pub username: String,
    pub acct: String,
    #[serde(default)]
    pub url: Option<String>,
}

/// A hashtag used in a status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    #[serde(default)]
    pub url: Option<String>,
}

/// One option of a poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollOption {
    pub title: String,
    #[serde(default)]
    pub votes_count: Option<i64>,
}

/// A poll attached to a status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Poll {
    pub id: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expired: bool,
    #[serde(default)]
    pub multiple: bool,
    #[serde(default)]
    pub votes_count: i64,
    #[serde(default)]
    pub options: Vec<PollOption>,
}

/// A status as decoded from the remote server.
///
/// `reblog` is at most one level deep; the decoding boundary rejects
/// anything deeper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteStatus {
    pub id: String,
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub url: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub edited_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub spoiler_text: String,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default)]
    pub sensitive: bool,
    #[serde(default)]
    pub reblogs_count: i64,
    #[serde(default)]
    pub favourites_count: i64,
    #[serde(default)]
    pub replies_count: i64,
    #[serde(default)]
    pub in_reply_to_id: Option<String>,
    #[serde(default)]
    pub in_reply_to_account_id: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    pub account: RemoteAccount,
    #[serde(default)]
    pub reblog: Option<Box<RemoteStatus>>,
    #[serde(default)]
    pub media_attachments: Vec<MediaAttachment>,
    #[serde(default)]
    pub mentions: Vec<Mention>,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub poll: Option<Poll>,

    // Viewer-relative state; only meaningful when fetched on behalf of a viewer.
    #[serde(default)]
    pub favourited: Option<bool>,
    #[serde(default)]
    pub reblogged: Option<bool>,
    #[serde(default)]
    pub bookmarked: Option<bool>,
    #[serde(default)]
    pub muted: Option<bool>,
    #[serde(default)]
    pub pinned: Option<bool>,
}

impl RemoteStatus {
    #[must_use]
    pub fn key(&self, domain: &str) -> EntityKey {
        EntityKey::new(domain, &self.id)
    }

    /// The viewer-relative flags carried by this observation.
    #[must_use]
    pub const fn interaction(&self) -> InteractionFlags {
        InteractionFlags {
            favourited: self.favourited,
            reblogged: self.reblogged,
            bookmarked: self.bookmarked,
            muted: self.muted,
            pinned: self.pinned,
        }
    }
}

/// The pagination request that produced a page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageQuery {
    /// Upper-bound id: the server was asked for entries older than this.
    pub max_id: Option<String>,
}

impl PageQuery {
    #[must_use]
    pub fn anchored(max_id: impl Into<String>) -> Self {
        Self {
            max_id: Some(max_id.into()),
        }
    }
}

// =============================================================================
// Local records
// =============================================================================

/// A locally materialized account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub key: EntityKey,
    pub username: String,
    pub acct: String,
    pub display_name: String,
    pub note: String,
    pub url: Option<String>,
    pub avatar: Option<String>,
    pub header: Option<String>,
    pub locked: bool,
    pub bot: bool,
    pub followers_count: i64,
    pub following_count: i64,
    pub statuses_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Materialize a new local account from a remote observation.
    #[must_use]
    pub fn from_remote(domain: &str, remote: &RemoteAccount, observed_at: DateTime<Utc>) -> Self {
        Self {
            key: EntityKey::new(domain, &remote.id),
            username: remote.username.clone(),
            acct: remote.acct.clone(),
            display_name: remote.display_name.clone(),
            note: remote.note.clone(),
            url: remote.url.clone(),
            avatar: remote.avatar.clone(),
            header: remote.header.clone(),
            locked: remote.locked,
            bot: remote.bot,
            followers_count: remote.followers_count,
            following_count: remote.following_count,
            statuses_count: remote.statuses_count,
            created_at: remote.created_at,
            updated_at: observed_at,
        }
    }
}

/// A locally materialized status: the canonical, deduplicated entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub key: EntityKey,
    pub uri: String,
    pub url: Option<String>,
    pub account_id: String,
    pub content: String,
    pub spoiler_text: String,
    pub visibility: Visibility,
    pub sensitive: bool,
    pub reblogs_count: i64,
    pub favourites_count: i64,
    pub replies_count: i64,
    pub in_reply_to_id: Option<String>,
    pub in_reply_to_account_id: Option<String>,
    pub reblog_id: Option<String>,
    pub language: Option<String>,
    pub media_attachments: Vec<MediaAttachment>,
    pub mentions: Vec<Mention>,
    pub tags: Vec<Tag>,
    pub poll: Option<Poll>,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    /// Last time this record was observed from the network.
    pub updated_at: DateTime<Utc>,
    /// Tombstone; set only by the deletion collaborator.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Status {
    /// Materialize a new local status from a remote observation.
    ///
    /// The repost reference is taken from the remote wrapped status; callers
    /// must have upserted that status before the wrapper.
    #[must_use]
    pub fn from_remote(domain: &str, remote: &RemoteStatus, observed_at: DateTime<Utc>) -> Self {
        Self {
            key: remote.key(domain),
            uri: remote.uri.clone(),
            url: remote.url.clone(),
            account_id: remote.account.id.clone(),
            content: remote.content.clone(),
            spoiler_text: remote.spoiler_text.clone(),
            visibility: remote.visibility,
            sensitive: remote.sensitive,
            reblogs_count: remote.reblogs_count,
            favourites_count: remote.favourites_count,
            replies_count: remote.replies_count,
            in_reply_to_id: remote.in_reply_to_id.clone(),
            in_reply_to_account_id: remote.in_reply_to_account_id.clone(),
            reblog_id: remote.reblog.as_ref().map(|r| r.id.clone()),
            language: remote.language.clone(),
            media_attachments: remote.media_attachments.clone(),
            mentions: remote.mentions.clone(),
            tags: remote.tags.clone(),
            poll: remote.poll.clone(),
            created_at: remote.created_at,
            edited_at: remote.edited_at,
            updated_at: observed_at,
            deleted_at: None,
        }
    }

    #[must_use]
    pub fn author_key(&self) -> EntityKey {
        EntityKey::new(&self.key.domain, &self.account_id)
    }
}

/// A mutable status attribute that the merge path may overwrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusField {
    Content,
    SpoilerText,
    Visibility,
    Sensitive,
    ReblogsCount,
    FavouritesCount,
    RepliesCount,
    Language,
    EditedAt,
    MediaAttachments,
    Mentions,
    Tags,
    Poll,
}

impl StatusField {
    /// Column name in the `statuses` table.
    #[must_use]
    pub const fn column(self) -> &'static str {
        match self {
            Self::Content => "content",
            Self::SpoilerText => "spoiler_text",
            Self::Visibility => "visibility",
            Self::Sensitive => "sensitive",
            Self::ReblogsCount => "reblogs_count",
            Self::FavouritesCount => "favourites_count",
            Self::RepliesCount => "replies_count",
            Self::Language => "language",
            Self::EditedAt => "edited_at",
            Self::MediaAttachments => "media_json",
            Self::Mentions => "mentions_json",
            Self::Tags => "tags_json",
            Self::Poll => "poll_json",
        }
    }
}

/// Viewer-relative flags. `None` means "not observed", never "false".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionFlags {
    pub favourited: Option<bool>,
    pub reblogged: Option<bool>,
    pub bookmarked: Option<bool>,
    pub muted: Option<bool>,
    pub pinned: Option<bool>,
}

impl InteractionFlags {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.favourited.is_none()
            && self.reblogged.is_none()
            && self.bookmarked.is_none()
            && self.muted.is_none()
            && self.pinned.is_none()
    }

    /// Overlay observed flags on top of stored ones.
    #[must_use]
    pub const fn overlay(self, observed: Self) -> Self {
        Self {
            favourited: match observed.favourited {
                Some(v) => Some(v),
                None => self.favourited,
            },
            reblogged: match observed.reblogged {
                Some(v) => Some(v),
                None => self.reblogged,
            },
            bookmarked: match observed.bookmarked {
                Some(v) => Some(v),
                None => self.bookmarked,
            },
            muted: match observed.muted {
                Some(v) => Some(v),
                None => self.muted,
            },
            pinned: match observed.pinned {
                Some(v) => Some(v),
                None => self.pinned,
            },
        }
    }
}

/// A row of a viewer's home timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineIndex {
    pub id: i64,
    pub domain: String,
    pub viewer_id: String,
    pub status_id: String,
    /// Copied from the status so the timeline sorts without a join.
    pub created_at: DateTime<Utc>,
    pub has_more: bool,
}

/// Aggregate counts returned by a page merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeResult {
    pub created_count: usize,
    pub merged_count: usize,
    pub created_authors: usize,
    pub merged_authors: usize,
}

/// Row counts of the local store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStats {
    pub statuses_count: i64,
    pub accounts_count: i64,
    pub timeline_rows_count: i64,
    pub deleted_statuses_count: i64,
    pub viewers_count: i64,
    pub newest_status_date: Option<DateTime<Utc>>,
    pub oldest_status_date: Option<DateTime<Utc>>,
}
