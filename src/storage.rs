//! `SQLite` storage for statuses, accounts and per-viewer timelines.
//!
//! [`Storage`] owns the connection and the schema. Every page merge runs in
//! one transaction through [`SqliteStore`], the [`MergeStore`] implementation
//! the engine talks to.

use crate::engine::{self, PageOutcome, PageRequest};
use crate::error::{FeedError, Result, ResultExt};
use crate::model::{
    Account, EntityKey, InteractionFlags, Status, StatusField, StoreStats, TimelineIndex,
};
use crate::store::MergeStore;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Value;
use rusqlite::{
    Connection, OptionalExtension, Row, TransactionBehavior, params, params_from_iter,
};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

const SCHEMA_VERSION: i32 = 1;
// SQLite default limit on host parameters is usually 999 or 32766.
// Stay under the low one; each bulk query spends two extra on domain/viewer.
pub const SQLITE_BATCH_SIZE: usize = 900;

/// How long a connection waits for another connection's write lock.
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const STATUS_COLUMNS: &str = "s.domain, s.id, s.uri, s.url, s.account_id, s.content, \
    s.spoiler_text, s.visibility, s.sensitive, s.reblogs_count, s.favourites_count, \
    s.replies_count, s.in_reply_to_id, s.in_reply_to_account_id, s.reblog_id, s.language, \
    s.media_json, s.mentions_json, s.tags_json, s.poll_json, s.created_at, s.edited_at, \
    s.updated_at, s.deleted_at";

const ACCOUNT_COLUMNS: &str = "domain, id, username, acct, display_name, note, url, avatar, \
    header, locked, bot, followers_count, following_count, statuses_count, created_at, updated_at";

const TIMELINE_COLUMNS: &str = "t.id, t.domain, t.viewer_id, t.status_id, t.created_at, t.has_more";

const fn epoch_utc() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

/// Fixed-width timestamps so text ordering matches time ordering.
fn format_ts(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_rfc3339_or_epoch(value: Option<String>) -> DateTime<Utc> {
    value
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map_or_else(epoch_utc, |dt| dt.with_timezone(&Utc))
}

fn parse_rfc3339_opt(value: Option<String>) -> Option<DateTime<Utc>> {
    value
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(",")
}

fn status_from_row(row: &Row<'_>, base: usize) -> rusqlite::Result<Status> {
    let json = |idx: usize| -> rusqlite::Result<Option<String>> { row.get(base + idx) };
    Ok(Status {
        key: EntityKey::new(row.get::<_, String>(base)?, row.get::<_, String>(base + 1)?),
        uri: row.get(base + 2)?,
        url: row.get(base + 3)?,
        account_id: row.get(base + 4)?,
        content: row.get(base + 5)?,
        spoiler_text: row.get(base + 6)?,
        visibility: row
            .get::<_, String>(base + 7)?
            .parse()
            .unwrap_or_default(),
        sensitive: row.get(base + 8)?,
        reblogs_count: row.get(base + 9)?,
        favourites_count: row.get(base + 10)?,
        replies_count: row.get(base + 11)?,
        in_reply_to_id: row.get(base + 12)?,
        in_reply_to_account_id: row.get(base + 13)?,
        reblog_id: row.get(base + 14)?,
        language: row.get(base + 15)?,
        media_attachments: json(16)?
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default(),
        mentions: json(17)?
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default(),
        tags: json(18)?
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default(),
        poll: json(19)?.and_then(|s| serde_json::from_str(&s).ok()),
        created_at: parse_rfc3339_or_epoch(row.get(base + 20)?),
        edited_at: parse_rfc3339_opt(row.get(base + 21)?),
        updated_at: parse_rfc3339_or_epoch(row.get(base + 22)?),
        deleted_at: parse_rfc3339_opt(row.get(base + 23)?),
    })
}

fn account_from_row(row: &Row<'_>) -> rusqlite::Result<Account> {
    Ok(Account {
        key: EntityKey::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?),
        username: row.get(2)?,
        acct: row.get(3)?,
        display_name: row.get(4)?,
        note: row.get(5)?,
        url: row.get(6)?,
        avatar: row.get(7)?,
        header: row.get(8)?,
        locked: row.get(9)?,
        bot: row.get(10)?,
        followers_count: row.get(11)?,
        following_count: row.get(12)?,
        statuses_count: row.get(13)?,
        created_at: parse_rfc3339_or_epoch(row.get(14)?),
        updated_at: parse_rfc3339_or_epoch(row.get(15)?),
    })
}

fn timeline_from_row(row: &Row<'_>) -> rusqlite::Result<TimelineIndex> {
    Ok(TimelineIndex {
        id: row.get(0)?,
        domain: row.get(1)?,
        viewer_id: row.get(2)?,
        status_id: row.get(3)?,
        created_at: parse_rfc3339_or_epoch(row.get(4)?),
        has_more: row.get(5)?,
    })
}

/// Column value for one mutable status field.
fn field_value(status: &Status, field: StatusField) -> Result<Value> {
    let text = |s: &str| Value::Text(s.to_string());
    let opt_text = |s: Option<&str>| s.map_or(Value::Null, |s| Value::Text(s.to_string()));
    Ok(match field {
        StatusField::Content => text(&status.content),
        StatusField::SpoilerText => text(&status.spoiler_text),
        StatusField::Visibility => text(status.visibility.as_str()),
        StatusField::Sensitive => Value::Integer(i64::from(status.sensitive)),
        StatusField::ReblogsCount => Value::Integer(status.reblogs_count),
        StatusField::FavouritesCount => Value::Integer(status.favourites_count),
        StatusField::RepliesCount => Value::Integer(status.replies_count),
        StatusField::Language => opt_text(status.language.as_deref()),
        StatusField::EditedAt => opt_text(status.edited_at.map(format_ts).as_deref()),
        StatusField::MediaAttachments => Value::Text(serde_json::to_string(&status.media_attachments)?),
        StatusField::Mentions => Value::Text(serde_json::to_string(&status.mentions)?),
        StatusField::Tags => Value::Text(serde_json::to_string(&status.tags)?),
        StatusField::Poll => match &status.poll {
            Some(poll) => Value::Text(serde_json::to_string(poll)?),
            None => Value::Null,
        },
    })
}

/// A home timeline row joined with its status.
#[derive(Debug, Clone)]
pub struct TimelineEntry {
    pub row: TimelineIndex,
    pub status: Status,
}

/// `SQLite` storage manager
#[derive(Debug)]
pub struct Storage {
    conn: Connection,
    batch_size: usize,
}

impl Storage {
    /// Open or create the database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let path = db_path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database {}", path.display()))?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA cache_size = -64000;
            PRAGMA temp_store = MEMORY;
            ",
        )?;

        let storage = Self {
            conn,
            batch_size: SQLITE_BATCH_SIZE,
        };
        storage.migrate()?;
        Ok(storage)
    }

    /// Open an existing database, failing if the file is missing.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::DatabaseNotFound`] if there is no file at `db_path`.
    pub fn open_existing(db_path: impl AsRef<Path>) -> Result<Self> {
        if !db_path.as_ref().exists() {
            return Err(FeedError::DatabaseNotFound {
                path: db_path.as_ref().to_path_buf(),
            });
        }
        Self::open(db_path)
    }

    /// Open an in-memory database (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be initialized.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
            ",
        )?;
        let storage = Self {
            conn,
            batch_size: SQLITE_BATCH_SIZE,
        };
        storage.migrate()?;
        Ok(storage)
    }

    /// Cap the number of ids bound per bulk read.
    pub fn set_batch_size(&mut self, batch_size: usize) {
        self.batch_size = batch_size.clamp(1, SQLITE_BATCH_SIZE);
    }

    /// Get a reference to the underlying database connection.
    #[must_use]
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }

    fn migrate(&self) -> Result<()> {
        let current_version = self.get_schema_version();

        if current_version > SCHEMA_VERSION {
            return Err(FeedError::SchemaMismatch {
                expected: SCHEMA_VERSION,
                found: current_version,
            });
        }

        if current_version < SCHEMA_VERSION {
            info!(
                "Migrating database from version {} to {}",
                current_version, SCHEMA_VERSION
            );
            self.create_schema()?;
            self.set_schema_version(SCHEMA_VERSION)?;
        }

        Ok(())
    }

    fn get_schema_version(&self) -> i32 {
        let result: rusqlite::Result<i32> = self.conn.query_row(
            "SELECT value FROM meta WHERE key = 'schema_version'",
            [],
            |row| {
                let value: String = row.get(0)?;
                Ok(value.parse().unwrap_or(0))
            },
        );

        // Treat missing schema table as version 0.
        result.unwrap_or_default()
    }

    fn set_schema_version(&self, version: i32) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES ('schema_version', ?)",
            params![version.to_string()],
        )?;
        Ok(())
    }

    fn create_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r"
            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS accounts (
                domain TEXT NOT NULL,
                id TEXT NOT NULL,
                username TEXT NOT NULL,
                acct TEXT NOT NULL,
                display_name TEXT NOT NULL DEFAULT '',
                note TEXT NOT NULL DEFAULT '',
                url TEXT,
                avatar TEXT,
                header TEXT,
                locked INTEGER NOT NULL DEFAULT 0,
                bot INTEGER NOT NULL DEFAULT 0,
                followers_count INTEGER NOT NULL DEFAULT 0,
                following_count INTEGER NOT NULL DEFAULT 0,
                statuses_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (domain, id)
            );

            CREATE TABLE IF NOT EXISTS statuses (
                domain TEXT NOT NULL,
                id TEXT NOT NULL,
                uri TEXT NOT NULL,
                url TEXT,
                account_id TEXT NOT NULL,
                content TEXT NOT NULL,
                spoiler_text TEXT NOT NULL DEFAULT '',
                visibility TEXT NOT NULL,
                sensitive INTEGER NOT NULL DEFAULT 0,
                reblogs_count INTEGER NOT NULL DEFAULT 0,
                favourites_count INTEGER NOT NULL DEFAULT 0,
                replies_count INTEGER NOT NULL DEFAULT 0,
                in_reply_to_id TEXT,
                in_reply_to_account_id TEXT,
                reblog_id TEXT,
                language TEXT,
                media_json TEXT,
                mentions_json TEXT,
                tags_json TEXT,
                poll_json TEXT,
                created_at TEXT NOT NULL,
                edited_at TEXT,
                updated_at TEXT NOT NULL,
                deleted_at TEXT,
                PRIMARY KEY (domain, id),
                FOREIGN KEY (domain, account_id) REFERENCES accounts(domain, id),
                FOREIGN KEY (domain, reblog_id) REFERENCES statuses(domain, id)
            );
            CREATE INDEX IF NOT EXISTS idx_statuses_created_at ON statuses(domain, created_at);
            CREATE INDEX IF NOT EXISTS idx_statuses_reblog ON statuses(domain, reblog_id);

            CREATE TABLE IF NOT EXISTS status_interactions (
                domain TEXT NOT NULL,
                status_id TEXT NOT NULL,
                viewer_id TEXT NOT NULL,
                favourited INTEGER,
                reblogged INTEGER,
                bookmarked INTEGER,
                muted INTEGER,
                pinned INTEGER,
                PRIMARY KEY (domain, status_id, viewer_id),
                FOREIGN KEY (domain, status_id) REFERENCES statuses(domain, id)
            );

            -- No UNIQUE on (viewer, status): the merge path checks before inserting.
            CREATE TABLE IF NOT EXISTS timeline_index (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                domain TEXT NOT NULL,
                viewer_id TEXT NOT NULL,
                status_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                has_more INTEGER NOT NULL DEFAULT 0,
                FOREIGN KEY (domain, status_id) REFERENCES statuses(domain, id)
            );
            CREATE INDEX IF NOT EXISTS idx_timeline_lookup
                ON timeline_index(viewer_id, domain, status_id);
            CREATE INDEX IF NOT EXISTS idx_timeline_order
                ON timeline_index(domain, viewer_id, created_at);
            ",
        )?;

        Ok(())
    }

    /// Run `f` against one transaction. Commits if `f` succeeds, rolls back
    /// otherwise.
    ///
    /// The write lock is taken at `BEGIN`, so reads made inside `f` stay valid
    /// for its writes. Other connections wait up to [`BUSY_TIMEOUT`] for it.
    ///
    /// # Errors
    ///
    /// Returns the error from `f`, or a database error from begin/commit.
    pub fn with_store<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut SqliteStore<'_>) -> Result<T>,
    {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = {
            let mut store = SqliteStore {
                conn: &tx,
                batch_size: self.batch_size,
            };
            f(&mut store)?
        };
        tx.commit()?;
        Ok(value)
    }

    /// Merge one page atomically: every status, account and timeline update
    /// of the page becomes visible together or not at all.
    ///
    /// # Errors
    ///
    /// Returns an error if any step fails; nothing from the page is kept.
    pub fn merge_page(&mut self, request: &PageRequest<'_>) -> Result<PageOutcome> {
        let outcome = self.with_store(|store| engine::merge_page(store, request))?;
        info!(
            domain = request.domain,
            variant = %request.variant,
            created = outcome.counts.created_count,
            merged = outcome.counts.merged_count,
            created_authors = outcome.counts.created_authors,
            merged_authors = outcome.counts.merged_authors,
            flagged = outcome
                .continuity
                .as_ref()
                .and_then(|c| c.flagged_status.as_deref())
                .unwrap_or("-"),
            "Merged page"
        );
        Ok(outcome)
    }

    /// Retrieve one status by key, tombstoned or not.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_status(&self, key: &EntityKey) -> Result<Option<Status>> {
        let sql = format!("SELECT {STATUS_COLUMNS} FROM statuses s WHERE s.domain = ? AND s.id = ?");
        Ok(self
            .conn
            .query_row(&sql, params![key.domain, key.id], |row| {
                status_from_row(row, 0)
            })
            .optional()?)
    }

    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_account(&self, key: &EntityKey) -> Result<Option<Account>> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE domain = ? AND id = ?");
        Ok(self
            .conn
            .query_row(&sql, params![key.domain, key.id], account_from_row)
            .optional()?)
    }

    /// Stored viewer-relative flags of a status.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_interaction(
        &self,
        key: &EntityKey,
        viewer_id: &str,
    ) -> Result<Option<InteractionFlags>> {
        SqliteStore {
            conn: &self.conn,
            batch_size: self.batch_size,
        }
        .fetch_interaction(key, viewer_id)
    }

    /// The viewer's home timeline, newest first, without tombstoned statuses.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn home_timeline(
        &self,
        domain: &str,
        viewer_id: &str,
        limit: usize,
    ) -> Result<Vec<TimelineEntry>> {
        let sql = format!(
            "SELECT {TIMELINE_COLUMNS}, {STATUS_COLUMNS}
             FROM timeline_index t
             JOIN statuses s ON s.domain = t.domain AND s.id = t.status_id
             WHERE t.domain = ? AND t.viewer_id = ? AND s.deleted_at IS NULL
             ORDER BY t.created_at DESC, t.id DESC
             LIMIT ?"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![domain, viewer_id, limit], |row| {
            Ok(TimelineEntry {
                row: timeline_from_row(row)?,
                status: status_from_row(row, 6)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// All timeline rows of a viewer, tombstoned statuses included.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn timeline_rows(&self, domain: &str, viewer_id: &str) -> Result<Vec<TimelineIndex>> {
        let sql = format!(
            "SELECT {TIMELINE_COLUMNS} FROM timeline_index t
             WHERE t.domain = ? AND t.viewer_id = ?
             ORDER BY t.created_at DESC, t.id DESC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![domain, viewer_id], timeline_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Tombstone a status. Reconciliation never clears the tombstone.
    ///
    /// Returns `false` if no such status is stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn mark_status_deleted(&self, key: &EntityKey, deleted_at: DateTime<Utc>) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE statuses SET deleted_at = ? WHERE domain = ? AND id = ?",
            params![format_ts(deleted_at), key.domain, key.id],
        )?;
        if changed > 0 {
            debug!(status = %key, "Tombstoned status");
        }
        Ok(changed > 0)
    }

    /// Get row counts and date bounds.
    ///
    /// # Errors
    ///
    /// Returns an error if any database query fails.
    pub fn stats(&self) -> Result<StoreStats> {
        let count = |sql: &str| -> Result<i64> { Ok(self.conn.query_row(sql, [], |row| row.get(0))?) };

        let (oldest, newest): (Option<String>, Option<String>) = self.conn.query_row(
            "SELECT MIN(created_at), MAX(created_at) FROM statuses",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        Ok(StoreStats {
            statuses_count: count("SELECT COUNT(*) FROM statuses")?,
            accounts_count: count("SELECT COUNT(*) FROM accounts")?,
            timeline_rows_count: count("SELECT COUNT(*) FROM timeline_index")?,
            deleted_statuses_count: count(
                "SELECT COUNT(*) FROM statuses WHERE deleted_at IS NOT NULL",
            )?,
            viewers_count: count("SELECT COUNT(DISTINCT viewer_id) FROM timeline_index")?,
            newest_status_date: parse_rfc3339_opt(newest),
            oldest_status_date: parse_rfc3339_opt(oldest),
        })
    }
}

/// One open transaction seen through the [`MergeStore`] seam.
pub struct SqliteStore<'conn> {
    conn: &'conn Connection,
    batch_size: usize,
}

impl MergeStore for SqliteStore<'_> {
    fn fetch_statuses(&mut self, domain: &str, ids: &[String]) -> Result<Vec<Status>> {
        let mut statuses = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(self.batch_size) {
            let sql = format!(
                "SELECT {STATUS_COLUMNS} FROM statuses s WHERE s.domain = ? AND s.id IN ({})",
                placeholders(chunk.len())
            );
            let mut stmt = self.conn.prepare_cached(&sql)?;
            let params = std::iter::once(domain).chain(chunk.iter().map(String::as_str));
            let rows = stmt.query_map(params_from_iter(params), |row| status_from_row(row, 0))?;
            for row in rows {
                statuses.push(row?);
            }
        }
        Ok(statuses)
    }

    fn fetch_accounts(&mut self, domain: &str, ids: &[String]) -> Result<Vec<Account>> {
        let mut accounts = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(self.batch_size) {
            let sql = format!(
                "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE domain = ? AND id IN ({})",
                placeholders(chunk.len())
            );
            let mut stmt = self.conn.prepare_cached(&sql)?;
            let params = std::iter::once(domain).chain(chunk.iter().map(String::as_str));
            let rows = stmt.query_map(params_from_iter(params), account_from_row)?;
            for row in rows {
                accounts.push(row?);
            }
        }
        Ok(accounts)
    }

    fn fetch_status(&mut self, key: &EntityKey) -> Result<Option<Status>> {
        let sql = format!("SELECT {STATUS_COLUMNS} FROM statuses s WHERE s.domain = ? AND s.id = ?");
        Ok(self
            .conn
            .query_row(&sql, params![key.domain, key.id], |row| {
                status_from_row(row, 0)
            })
            .optional()?)
    }

    fn insert_status(&mut self, status: &Status) -> Result<()> {
        self.conn.execute(
            r"
            INSERT INTO statuses
            (domain, id, uri, url, account_id, content, spoiler_text, visibility, sensitive,
             reblogs_count, favourites_count, replies_count, in_reply_to_id,
             in_reply_to_account_id, reblog_id, language, media_json, mentions_json, tags_json,
             poll_json, created_at, edited_at, updated_at, deleted_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
            params![
                status.key.domain,
                status.key.id,
                status.uri,
                status.url,
                status.account_id,
                status.content,
                status.spoiler_text,
                status.visibility.as_str(),
                status.sensitive,
                status.reblogs_count,
                status.favourites_count,
                status.replies_count,
                status.in_reply_to_id,
                status.in_reply_to_account_id,
                status.reblog_id,
                status.language,
                serde_json::to_string(&status.media_attachments)?,
                serde_json::to_string(&status.mentions)?,
                serde_json::to_string(&status.tags)?,
                status.poll.as_ref().map(serde_json::to_string).transpose()?,
                format_ts(status.created_at),
                status.edited_at.map(format_ts),
                format_ts(status.updated_at),
                status.deleted_at.map(format_ts),
            ],
        )?;
        Ok(())
    }

    fn update_status(&mut self, status: &Status, fields: &[StatusField]) -> Result<()> {
        let mut sql = String::from("UPDATE statuses SET updated_at = ?");
        let mut values = vec![Value::Text(format_ts(status.updated_at))];
        for field in fields {
            sql.push_str(", ");
            sql.push_str(field.column());
            sql.push_str(" = ?");
            values.push(field_value(status, *field)?);
        }
        sql.push_str(" WHERE domain = ? AND id = ?");
        values.push(Value::Text(status.key.domain.clone()));
        values.push(Value::Text(status.key.id.clone()));

        self.conn.execute(&sql, params_from_iter(values))?;
        Ok(())
    }

    fn insert_account(&mut self, account: &Account) -> Result<()> {
        let sql = format!(
            "INSERT INTO accounts ({ACCOUNT_COLUMNS})
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        );
        self.conn.execute(
            &sql,
            params![
                account.key.domain,
                account.key.id,
                account.username,
                account.acct,
                account.display_name,
                account.note,
                account.url,
                account.avatar,
                account.header,
                account.locked,
                account.bot,
                account.followers_count,
                account.following_count,
                account.statuses_count,
                format_ts(account.created_at),
                format_ts(account.updated_at),
            ],
        )?;
        Ok(())
    }

    fn fetch_interaction(
        &mut self,
        key: &EntityKey,
        viewer_id: &str,
    ) -> Result<Option<InteractionFlags>> {
        Ok(self
            .conn
            .query_row(
                "SELECT favourited, reblogged, bookmarked, muted, pinned
                 FROM status_interactions
                 WHERE domain = ? AND status_id = ? AND viewer_id = ?",
                params![key.domain, key.id, viewer_id],
                |row| {
                    Ok(InteractionFlags {
                        favourited: row.get(0)?,
                        reblogged: row.get(1)?,
                        bookmarked: row.get(2)?,
                        muted: row.get(3)?,
                        pinned: row.get(4)?,
                    })
                },
            )
            .optional()?)
    }

    fn fetch_interactions(
        &mut self,
        viewer_id: &str,
        domain: &str,
        ids: &[String],
    ) -> Result<Vec<(String, InteractionFlags)>> {
        let mut found = Vec::new();
        for chunk in ids.chunks(self.batch_size) {
            let sql = format!(
                "SELECT status_id, favourited, reblogged, bookmarked, muted, pinned
                 FROM status_interactions
                 WHERE viewer_id = ? AND domain = ? AND status_id IN ({})",
                placeholders(chunk.len())
            );
            let mut stmt = self.conn.prepare_cached(&sql)?;
            let params = [viewer_id, domain]
                .into_iter()
                .chain(chunk.iter().map(String::as_str));
            let rows = stmt.query_map(params_from_iter(params), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    InteractionFlags {
                        favourited: row.get(1)?,
                        reblogged: row.get(2)?,
                        bookmarked: row.get(3)?,
                        muted: row.get(4)?,
                        pinned: row.get(5)?,
                    },
                ))
            })?;
            for row in rows {
                found.push(row?);
            }
        }
        Ok(found)
    }

    fn store_interaction(
        &mut self,
        key: &EntityKey,
        viewer_id: &str,
        flags: &InteractionFlags,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO status_interactions
             (domain, status_id, viewer_id, favourited, reblogged, bookmarked, muted, pinned)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                key.domain,
                key.id,
                viewer_id,
                flags.favourited,
                flags.reblogged,
                flags.bookmarked,
                flags.muted,
                flags.pinned,
            ],
        )?;
        Ok(())
    }

    fn timeline_rows(&mut self, viewer_id: &str, key: &EntityKey) -> Result<Vec<TimelineIndex>> {
        let sql = format!(
            "SELECT {TIMELINE_COLUMNS} FROM timeline_index t
             WHERE t.viewer_id = ? AND t.domain = ? AND t.status_id = ?
             ORDER BY t.id"
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(params![viewer_id, key.domain, key.id], timeline_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn fetch_timeline_rows(
        &mut self,
        viewer_id: &str,
        domain: &str,
        ids: &[String],
    ) -> Result<Vec<TimelineIndex>> {
        let mut found = Vec::new();
        for chunk in ids.chunks(self.batch_size) {
            let sql = format!(
                "SELECT {TIMELINE_COLUMNS} FROM timeline_index t
                 WHERE t.viewer_id = ? AND t.domain = ? AND t.status_id IN ({})",
                placeholders(chunk.len())
            );
            let mut stmt = self.conn.prepare_cached(&sql)?;
            let params = [viewer_id, domain]
                .into_iter()
                .chain(chunk.iter().map(String::as_str));
            let rows = stmt.query_map(params_from_iter(params), timeline_from_row)?;
            for row in rows {
                found.push(row?);
            }
        }
        found.sort_by_key(|row| row.id);
        Ok(found)
    }

    fn insert_timeline_row(
        &mut self,
        domain: &str,
        viewer_id: &str,
        status_id: &str,
        created_at: DateTime<Utc>,
    ) -> Result<TimelineIndex> {
        self.conn.execute(
            "INSERT INTO timeline_index (domain, viewer_id, status_id, created_at, has_more)
             VALUES (?, ?, ?, ?, 0)",
            params![domain, viewer_id, status_id, format_ts(created_at)],
        )?;
        Ok(TimelineIndex {
            id: self.conn.last_insert_rowid(),
            domain: domain.to_string(),
            viewer_id: viewer_id.to_string(),
            status_id: status_id.to_string(),
            created_at,
            has_more: false,
        })
    }

    fn set_has_more(&mut self, row_id: i64, has_more: bool) -> Result<()> {
        self.conn.execute(
            "UPDATE timeline_index SET has_more = ? WHERE id = ?",
            params![has_more, row_id],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MediaAttachment, Poll, PollOption};
    use crate::test_support::{DOMAIN, base_time, remote_status, seed_status};
    use chrono::Duration;

    fn seed(storage: &mut Storage, status: &Status) {
        storage.with_store(|store| seed_status(store, status)).unwrap();
    }

    #[test]
    fn test_create_database() {
        let storage = Storage::open_memory().unwrap();
        let stats = storage.stats().unwrap();
        assert_eq!(stats.statuses_count, 0);
        assert_eq!(stats.timeline_rows_count, 0);
        assert!(stats.newest_status_date.is_none());
    }

    #[test]
    fn test_store_and_retrieve_status() {
        let mut storage = Storage::open_memory().unwrap();
        let mut remote = remote_status("1", "alice", 0);
        remote.media_attachments = vec![MediaAttachment {
            id: "m1".to_string(),
            media_type: "image".to_string(),
            url: "https://example.social/m1.png".to_string(),
            preview_url: None,
            description: Some("a cat".to_string()),
        }];
        remote.poll = Some(Poll {
            id: "p1".to_string(),
            expires_at: None,
            expired: false,
            multiple: false,
            votes_count: 3,
            options: vec![PollOption {
                title: "yes".to_string(),
                votes_count: Some(3),
            }],
        });
        let status = Status::from_remote(DOMAIN, &remote, base_time());
        seed(&mut storage, &status);

        let stored = storage.get_status(&status.key).unwrap().unwrap();
        assert_eq!(stored, status);
    }

    #[test]
    fn test_get_status_not_found() {
        let storage = Storage::open_memory().unwrap();
        let key = EntityKey::new(DOMAIN, "missing");
        assert!(storage.get_status(&key).unwrap().is_none());
    }

    #[test]
    fn test_same_id_on_other_domain_is_distinct() {
        let mut storage = Storage::open_memory().unwrap();
        let status = Status::from_remote(DOMAIN, &remote_status("1", "alice", 0), base_time());
        seed(&mut storage, &status);
        assert!(
            storage
                .get_status(&EntityKey::new("other.social", "1"))
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_duplicate_insert_fails_and_rolls_back() {
        let mut storage = Storage::open_memory().unwrap();
        let status = Status::from_remote(DOMAIN, &remote_status("1", "alice", 0), base_time());
        seed(&mut storage, &status);

        let result = storage.with_store(|store| {
            let other = Status::from_remote(DOMAIN, &remote_status("2", "alice", 1), base_time());
            store.insert_status(&other)?;
            store.insert_status(&status)
        });
        assert!(matches!(result, Err(FeedError::Database(_))));
        let key = EntityKey::new(DOMAIN, "2");
        assert!(storage.get_status(&key).unwrap().is_none());
    }

    #[test]
    fn test_update_writes_only_listed_fields() {
        let mut storage = Storage::open_memory().unwrap();
        let status = Status::from_remote(DOMAIN, &remote_status("1", "alice", 0), base_time());
        seed(&mut storage, &status);

        let mut changed = status.clone();
        changed.reblogs_count = 5;
        changed.favourites_count = 8;
        changed.updated_at = base_time() + Duration::hours(1);
        storage
            .with_store(|store| store.update_status(&changed, &[StatusField::ReblogsCount]))
            .unwrap();

        let stored = storage.get_status(&status.key).unwrap().unwrap();
        assert_eq!(stored.reblogs_count, 5);
        assert_eq!(stored.favourites_count, 0);
        assert_eq!(stored.updated_at, changed.updated_at);
    }

    #[test]
    fn test_bulk_fetch_spans_batches() {
        let mut storage = Storage::open_memory().unwrap();
        storage.set_batch_size(2);
        for n in 0..5 {
            let status =
                Status::from_remote(DOMAIN, &remote_status(&n.to_string(), "alice", n), base_time());
            if n == 0 {
                seed(&mut storage, &status);
            } else {
                storage.with_store(|store| store.insert_status(&status)).unwrap();
            }
        }

        let ids: Vec<String> = ["0", "2", "4", "9"].iter().map(ToString::to_string).collect();
        let found = storage
            .with_store(|store| store.fetch_statuses(DOMAIN, &ids))
            .unwrap();
        assert_eq!(found.len(), 3);
    }

    #[test]
    fn test_home_timeline_hides_tombstoned() {
        let mut storage = Storage::open_memory().unwrap();
        let first = Status::from_remote(DOMAIN, &remote_status("1", "alice", 0), base_time());
        let second = Status::from_remote(DOMAIN, &remote_status("2", "alice", 5), base_time());
        seed(&mut storage, &first);
        storage
            .with_store(|store| {
                store.insert_status(&second)?;
                store.insert_timeline_row(DOMAIN, "v", "1", first.created_at)?;
                store.insert_timeline_row(DOMAIN, "v", "2", second.created_at)?;
                Ok(())
            })
            .unwrap();

        let timeline = storage.home_timeline(DOMAIN, "v", 10).unwrap();
        let ids: Vec<&str> = timeline.iter().map(|e| e.status.key.id.as_str()).collect();
        assert_eq!(ids, vec!["2", "1"]);

        assert!(storage.mark_status_deleted(&second.key, base_time()).unwrap());
        let timeline = storage.home_timeline(DOMAIN, "v", 10).unwrap();
        assert_eq!(timeline.len(), 1);
        assert_eq!(storage.timeline_rows(DOMAIN, "v").unwrap().len(), 2);
        assert_eq!(storage.stats().unwrap().deleted_statuses_count, 1);
    }

    #[test]
    fn test_mark_missing_status_deleted() {
        let storage = Storage::open_memory().unwrap();
        let key = EntityKey::new(DOMAIN, "nope");
        assert!(!storage.mark_status_deleted(&key, base_time()).unwrap());
    }

    #[test]
    fn test_open_existing_requires_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Storage::open_existing(dir.path().join("missing.db"))
            .err()
            .unwrap();
        assert!(matches!(err, FeedError::DatabaseNotFound { .. }));
    }

    #[test]
    fn test_reopen_keeps_schema_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feedstore.db");
        drop(Storage::open(&path).unwrap());
        let storage = Storage::open(&path).unwrap();
        assert_eq!(storage.get_schema_version(), SCHEMA_VERSION);
    }
}
