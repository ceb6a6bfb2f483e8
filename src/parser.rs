//! Page payload decoding.
//!
//! A page file is either a bare JSON array of statuses, as returned by the
//! timeline endpoints, or an envelope `{"max_id": "...", "statuses": [...]}`
//! that also records the pagination anchor the page was fetched with.

use crate::error::{FeedError, Result};
use crate::model::{PageQuery, RemoteStatus};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A decoded page and the query that produced it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedPage {
    pub query: PageQuery,
    pub statuses: Vec<RemoteStatus>,
}

/// Reads page files from disk.
pub struct PageParser {
    path: PathBuf,
}

impl PageParser {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Read and decode the page file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or does not decode.
    pub fn read_page(&self) -> Result<DecodedPage> {
        let content = std::fs::read_to_string(&self.path)
            .map_err(|e| FeedError::path_error("read", &self.path, e))?;
        decode_page(&content, &self.path.display().to_string())
    }
}

/// Decode a page payload.
///
/// # Errors
///
/// Returns [`FeedError::Decode`] for invalid JSON or an unexpected shape, and
/// [`FeedError::MalformedEntity`] for statuses the merge engine cannot accept.
pub fn decode_page(json: &str, source_name: &str) -> Result<DecodedPage> {
    let value: Value =
        serde_json::from_str(json).map_err(|e| FeedError::decode(source_name, e.to_string()))?;

    let (query, items) = match value {
        Value::Array(items) => (PageQuery::default(), items),
        Value::Object(mut map) => {
            let max_id = match map.remove("max_id") {
                None | Some(Value::Null) => None,
                Some(Value::String(s)) => Some(s),
                Some(Value::Number(n)) => Some(n.to_string()),
                Some(_) => {
                    return Err(FeedError::decode(source_name, "max_id must be a string"));
                }
            };
            let Some(Value::Array(items)) = map.remove("statuses") else {
                return Err(FeedError::decode(
                    source_name,
                    "expected a 'statuses' array in page object",
                ));
            };
            (PageQuery { max_id }, items)
        }
        _ => {
            return Err(FeedError::decode(
                source_name,
                "expected a JSON array or an object with 'statuses'",
            ));
        }
    };

    let mut statuses = Vec::with_capacity(items.len());
    for (idx, item) in items.into_iter().enumerate() {
        let status: RemoteStatus = serde_json::from_value(item)
            .map_err(|e| FeedError::decode(source_name, format!("entry {idx}: {e}")))?;
        validate_status(&status)?;
        statuses.push(status);
    }

    debug!(
        source = source_name,
        statuses = statuses.len(),
        anchored = query.max_id.is_some(),
        "Decoded page"
    );
    Ok(DecodedPage { query, statuses })
}

/// Enforce non-empty identities and the one-level wrap depth.
///
/// # Errors
///
/// Returns [`FeedError::MalformedEntity`] on the first violation.
pub fn validate_status(status: &RemoteStatus) -> Result<()> {
    if status.id.is_empty() {
        return Err(FeedError::malformed("", "status has no id"));
    }
    if status.account.id.is_empty() {
        return Err(FeedError::malformed(&status.id, "author has no id"));
    }
    if let Some(inner) = status.reblog.as_deref() {
        if inner.id.is_empty() {
            return Err(FeedError::malformed(&status.id, "wrapped status has no id"));
        }
        if inner.account.id.is_empty() {
            return Err(FeedError::malformed(&inner.id, "author has no id"));
        }
        if inner.reblog.is_some() {
            return Err(FeedError::malformed(
                &inner.id,
                "wrapped status wraps another status",
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ACCOUNT: &str = r#"{"id": "alice", "username": "alice", "acct": "alice",
        "created_at": "2024-01-01T00:00:00Z"}"#;

    fn status_json(id: &str, reblog: Option<&str>) -> String {
        let reblog = reblog.unwrap_or("null");
        format!(
            r#"{{"id": "{id}", "created_at": "2025-01-01T10:00:00Z", "content": "<p>hi</p>",
                "visibility": "unlisted", "reblogs_count": 2, "account": {ACCOUNT},
                "reblog": {reblog}}}"#
        )
    }

    #[test]
    fn decodes_bare_array() {
        let json = format!("[{}, {}]", status_json("2", None), status_json("1", None));
        let page = decode_page(&json, "test").unwrap();
        assert_eq!(page.statuses.len(), 2);
        assert!(page.query.max_id.is_none());
        let first = &page.statuses[0];
        assert_eq!(first.id, "2");
        assert_eq!(first.reblogs_count, 2);
        assert_eq!(first.visibility, crate::model::Visibility::Unlisted);
        assert!(first.media_attachments.is_empty());
    }

    #[test]
    fn decodes_envelope_with_anchor() {
        let json = format!(r#"{{"max_id": "20", "statuses": [{}]}}"#, status_json("19", None));
        let page = decode_page(&json, "test").unwrap();
        assert_eq!(page.query, PageQuery::anchored("20"));
        assert_eq!(page.statuses.len(), 1);
    }

    #[test]
    fn decodes_single_level_repost() {
        let inner = status_json("1", None);
        let json = format!("[{}]", status_json("2", Some(&inner)));
        let page = decode_page(&json, "test").unwrap();
        assert_eq!(page.statuses[0].reblog.as_ref().unwrap().id, "1");
    }

    #[test]
    fn rejects_nested_repost() {
        let innermost = status_json("1", None);
        let middle = status_json("2", Some(&innermost));
        let json = format!("[{}]", status_json("3", Some(&middle)));
        let err = decode_page(&json, "test").unwrap_err();
        assert!(matches!(err, FeedError::MalformedEntity { ref id, .. } if id == "2"));
    }

    #[test]
    fn rejects_empty_id() {
        let json = format!("[{}]", status_json("", None));
        let err = decode_page(&json, "test").unwrap_err();
        assert!(matches!(err, FeedError::MalformedEntity { .. }));
    }

    #[test]
    fn reports_entry_index_on_bad_shape() {
        let json = format!(r#"[{}, {{"id": "x"}}]"#, status_json("1", None));
        let err = decode_page(&json, "page.json").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("page.json"));
        assert!(message.contains("entry 1"));
    }

    #[test]
    fn rejects_non_page_json() {
        assert!(matches!(
            decode_page("42", "test"),
            Err(FeedError::Decode { .. })
        ));
        assert!(matches!(
            decode_page("{not json", "test"),
            Err(FeedError::Decode { .. })
        ));
        assert!(matches!(
            decode_page(r#"{"items": []}"#, "test"),
            Err(FeedError::Decode { .. })
        ));
    }

    #[test]
    fn read_page_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = PageParser::new(dir.path().join("nope.json"))
            .read_page()
            .unwrap_err();
        assert!(matches!(err, FeedError::PathError { .. }));
    }
}
