//! feedstore - local persistence for federated social timelines
//!
//! Merges pages of statuses fetched from a remote server into a local
//! `SQLite` store: one canonical record per (domain, id), field-level merges
//! on re-observation, a per-viewer home timeline index, and "has more"
//! markers for gaps between fetched pages.
//!
//! # Modules
//!
//! - [`model`] - Remote and local data models
//! - [`store`] - The persistence seam the merge engine runs against
//! - [`preload`], [`upsert`], [`reconcile`], [`timeline`], [`continuity`] -
//!   the merge pipeline, orchestrated by [`engine`]
//! - [`storage`] - `SQLite` storage layer
//! - [`parser`] - Page payload decoding
//! - [`cli`] - Command-line interface definitions
//! - [`error`] - Custom error types with rich context

pub mod cli;
pub mod config;
pub mod continuity;
pub mod engine;
pub mod error;
pub mod logging;
pub mod model;
pub mod parser;
pub mod preload;
pub mod reconcile;
pub mod storage;
pub mod store;
pub mod timeline;
pub mod upsert;

#[cfg(test)]
mod test_support;

pub use cli::*;
pub use config::Config;
pub use engine::{PageOutcome, PageRequest, merge_page};
pub use error::{FeedError, Result, ResultExt, format_error};
pub use model::*;
pub use parser::{DecodedPage, PageParser, decode_page};
pub use storage::{SqliteStore, Storage, TimelineEntry};
pub use store::MergeStore;

use chrono::{DateTime, Datelike, Utc};

/// File name of the store inside [`default_data_dir`].
pub const DEFAULT_DB_NAME: &str = "feedstore.db";

/// Width of the rule printed between statuses in text output.
pub const CONTENT_DIVIDER_WIDTH: usize = 60;

/// `<data_local_dir>/feedstore`, or `./feedstore` when the platform has none.
#[must_use]
pub fn default_data_dir() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("feedstore")
}

#[must_use]
pub fn default_db_path() -> std::path::PathBuf {
    default_data_dir().join(DEFAULT_DB_NAME)
}

/// Thousands-separated integer, e.g. `-12,345`.
#[must_use]
pub fn format_number(value: i64) -> String {
    let digits = value.unsigned_abs().to_string();
    let groups: Vec<&str> = digits
        .as_bytes()
        .rchunks(3)
        .rev()
        .filter_map(|chunk| std::str::from_utf8(chunk).ok())
        .collect();
    let sign = if value < 0 { "-" } else { "" };
    format!("{sign}{}", groups.join(","))
}

#[must_use]
pub fn format_number_usize(value: usize) -> String {
    format_number(i64::try_from(value).unwrap_or(i64::MAX))
}

/// Status age relative to now, as shown in timeline listings.
#[must_use]
pub fn format_relative_date(dt: DateTime<Utc>) -> String {
    format_relative_date_with_base(dt, Utc::now())
}

/// Status age relative to `now`.
///
/// Under a minute is "just now", then minutes, hours and days up to a week.
/// Older dates (and future ones, from clock skew) print as a calendar date,
/// with the year only when it differs from `now`'s.
#[must_use]
pub fn format_relative_date_with_base(dt: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let age = now.signed_duration_since(dt);
    match age.num_seconds() {
        0..60 => "just now".to_string(),
        60..3_600 => format!("{}m ago", age.num_minutes()),
        3_600..86_400 => format!("{}h ago", age.num_hours()),
        86_400..604_800 => format!("{}d ago", age.num_days()),
        _ if age.num_seconds() > 0 && dt.year() == now.year() => dt.format("%b %d").to_string(),
        _ => dt.format("%b %d, %Y").to_string(),
    }
}

/// Relative date, or "unknown" for a store with no statuses yet.
#[must_use]
pub fn format_optional_date(value: Option<DateTime<Utc>>) -> String {
    value.map_or_else(|| "unknown".to_string(), format_relative_date)
}

/// Reduce status HTML to one line of plain text for terminal output.
#[must_use]
pub fn plain_text(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => {
                in_tag = true;
                out.push(' ');
            }
            '>' => in_tag = false,
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
