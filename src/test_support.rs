//! Builders shared by unit tests.

use crate::error::Result;
use crate::model::{Account, RemoteAccount, RemoteStatus, Status, Visibility};
use crate::store::MergeStore;
use chrono::{DateTime, Duration, TimeZone, Utc};

pub const DOMAIN: &str = "example.social";

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).single().unwrap()
}

pub fn remote_account(id: &str) -> RemoteAccount {
    RemoteAccount {
        id: id.to_string(),
        username: id.to_string(),
        acct: format!("{id}@{DOMAIN}"),
        display_name: id.to_uppercase(),
        note: String::new(),
        url: Some(format!("https://{DOMAIN}/@{id}")),
        avatar: None,
        header: None,
        locked: false,
        bot: false,
        followers_count: 1,
        following_count: 1,
        statuses_count: 1,
        created_at: base_time(),
    }
}

/// A status created `minute` minutes after [`base_time`].
pub fn remote_status(id: &str, author: &str, minute: i64) -> RemoteStatus {
    RemoteStatus {
        id: id.to_string(),
        uri: format!("https://{DOMAIN}/statuses/{id}"),
        url: None,
        created_at: base_time() + Duration::minutes(minute),
        edited_at: None,
        content: format!("<p>status {id}</p>"),
        spoiler_text: String::new(),
        visibility: Visibility::Public,
        sensitive: false,
        reblogs_count: 0,
        favourites_count: 0,
        replies_count: 0,
        in_reply_to_id: None,
        in_reply_to_account_id: None,
        language: Some("en".to_string()),
        account: remote_account(author),
        reblog: None,
        media_attachments: vec![],
        mentions: vec![],
        tags: vec![],
        poll: None,
        favourited: None,
        reblogged: None,
        bookmarked: None,
        muted: None,
        pinned: None,
    }
}

/// A newest-first page of statuses `first..=last`, where a higher number is
/// older. Status `n` is created `1000 - n` minutes after [`base_time`].
pub fn page(first: u32, last: u32) -> Vec<RemoteStatus> {
    (first..=last)
        .map(|n| remote_status(&format!("{n:04}"), "alice", 1000 - i64::from(n)))
        .collect()
}

/// Insert `status` together with a fresh author record.
pub fn seed_status<S: MergeStore>(store: &mut S, status: &Status) -> Result<()> {
    let author = Account::from_remote(&status.key.domain, &remote_account(&status.account_id), base_time());
    store.insert_account(&author)?;
    store.insert_status(status)
}
