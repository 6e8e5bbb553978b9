//! SQLite replica backend.

use crate::error::StorageError;
use crate::{CheckpointStore, ReplicaStore, ReplicaTransaction};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, Transaction};
use std::path::Path;
use std::str::FromStr;
use sync_core::{
    ArchivedPageId, ArchivedRevisionRow, MergeRange, RevisionRow, StorageOp, TagLink, TextRow,
    Visibility,
};
use sync_types::time::{format_timestamp, parse_timestamp};
use sync_types::{PageId, PageTitle, RevisionId, TextId};

/// SQLite-based replica.
///
/// Uses WAL mode; tag-link foreign keys are deferred to commit so a restore
/// can move tag links before the revisions they reference.
#[derive(Clone)]
pub struct SqliteReplica {
    pool: SqlitePool,
}

impl SqliteReplica {
    /// Open (or create) a replica database file.
    pub async fn new(path: &Path) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(StorageError::Database)?;

        let replica = Self { pool };
        replica.run_migrations().await?;
        tracing::debug!("opened replica at {}", path.display());
        Ok(replica)
    }

    /// Create an in-memory replica (for testing).
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(":memory:")
            .map_err(StorageError::Database)?
            .foreign_keys(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(StorageError::Database)?;

        let replica = Self { pool };
        replica.run_migrations().await?;
        Ok(replica)
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> Result<(), StorageError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(StorageError::Database)?;
        }
        Ok(())
    }

    /// Insert or rename a page. Pages belong to the page-sync side; the
    /// mirror only reads them to resolve merge destinations.
    pub async fn upsert_page(&self, page_id: PageId, title: &PageTitle) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO page (page_id, page_namespace, page_title)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(page_id) DO UPDATE SET
                page_namespace = excluded.page_namespace,
                page_title = excluded.page_title
            "#,
        )
        .bind(page_id.value() as i64)
        .bind(title.namespace().value())
        .bind(title.db_title())
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;
        Ok(())
    }

    /// Look up a revision in either relation.
    pub async fn find_revision(
        &self,
        id: RevisionId,
    ) -> Result<Option<StoredRevision>, StorageError> {
        let live = sqlx::query_as::<_, StoredRow>(
            r#"
            SELECT rev_id AS id, rev_page AS page_id, rev_text_id AS text_id,
                   rev_deleted AS deleted, rev_timestamp AS timestamp, 0 AS archived
            FROM revision WHERE rev_id = ?1
            "#,
        )
        .bind(id.value() as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        let row = match live {
            Some(row) => Some(row),
            None => sqlx::query_as::<_, StoredRow>(
                r#"
                SELECT ar_rev_id AS id, ar_page_id AS page_id, ar_text_id AS text_id,
                       ar_deleted AS deleted, ar_timestamp AS timestamp, 1 AS archived
                FROM archive WHERE ar_rev_id = ?1
                "#,
            )
            .bind(id.value() as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::Database)?,
        };

        Ok(row.map(StoredRevision::from))
    }

    /// Tags of a revision, from whichever relation holds them.
    pub async fn tags_of(&self, id: RevisionId) -> Result<Vec<String>, StorageError> {
        sqlx::query_scalar(
            r#"
            SELECT tag_name FROM tagged_revision WHERE rev_id = ?1
            UNION ALL
            SELECT tag_name FROM tagged_archived_revision WHERE ar_rev_id = ?1
            ORDER BY tag_name
            "#,
        )
        .bind(id.value() as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::Database)
    }

    /// Content of a text blob.
    pub async fn text(&self, id: TextId) -> Result<Option<String>, StorageError> {
        sqlx::query_scalar("SELECT old_text FROM text WHERE old_id = ?1")
            .bind(id.value() as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::Database)
    }

    /// Row counts of every mirrored relation.
    pub async fn stats(&self) -> Result<ReplicaStats, StorageError> {
        let row = sqlx::query_as::<_, ReplicaStats>(
            r#"
            SELECT
                (SELECT COUNT(*) FROM page) AS pages,
                (SELECT COUNT(*) FROM revision) AS revisions,
                (SELECT COUNT(*) FROM archive) AS archived_revisions,
                (SELECT COUNT(*) FROM text) AS texts,
                (SELECT COUNT(*) FROM tagged_revision) AS tag_links,
                (SELECT COUNT(*) FROM tagged_archived_revision) AS archived_tag_links,
                (SELECT COUNT(*) FROM revision JOIN archive ON ar_rev_id = rev_id) AS duplicated
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(StorageError::Database)?;
        Ok(row)
    }

    /// Close the pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl ReplicaStore for SqliteReplica {
    async fn begin(&self) -> Result<Box<dyn ReplicaTransaction>, StorageError> {
        let tx = self.pool.begin().await.map_err(StorageError::Database)?;
        Ok(Box::new(SqliteTransaction { tx }))
    }
}

#[async_trait]
impl CheckpointStore for SqliteReplica {
    async fn read_checkpoint(&self, key: &str) -> Result<Option<DateTime<Utc>>, StorageError> {
        let value: Option<String> = sqlx::query_scalar(
            "SELECT checkpoint_timestamp FROM sync_checkpoint WHERE checkpoint_key = ?1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        value
            .map(|text| {
                parse_timestamp(&text).map_err(|_| StorageError::CorruptCheckpoint {
                    key: key.to_string(),
                    value: text.clone(),
                })
            })
            .transpose()
    }

    async fn write_checkpoint(&self, key: &str, at: DateTime<Utc>) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO sync_checkpoint (checkpoint_key, checkpoint_timestamp)
            VALUES (?1, ?2)
            ON CONFLICT(checkpoint_key) DO UPDATE SET
                checkpoint_timestamp = excluded.checkpoint_timestamp
            "#,
        )
        .bind(key)
        .bind(format_timestamp(&at))
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;
        Ok(())
    }
}

/// The open transaction of one run.
pub struct SqliteTransaction {
    tx: Transaction<'static, Sqlite>,
}

#[async_trait]
impl ReplicaTransaction for SqliteTransaction {
    async fn max_text_id(&mut self) -> Result<Option<TextId>, StorageError> {
        let max: Option<i64> = sqlx::query_scalar("SELECT MAX(old_id) FROM text")
            .fetch_one(&mut *self.tx)
            .await
            .map_err(StorageError::Database)?;
        Ok(max.map(|id| TextId::new(id as u64)))
    }

    async fn clear_revisions(&mut self) -> Result<(), StorageError> {
        for table in [
            "tagged_revision",
            "tagged_archived_revision",
            "revision",
            "archive",
            "text",
        ] {
            sqlx::query(&format!("DELETE FROM {table}"))
                .execute(&mut *self.tx)
                .await
                .map_err(StorageError::Database)?;
        }
        tracing::debug!("cleared revision relations");
        Ok(())
    }

    async fn execute(&mut self, op: &StorageOp) -> Result<u64, StorageError> {
        let conn: &mut SqliteConnection = &mut self.tx;
        let written = match op {
            StorageOp::UpsertText(row) => upsert_text(conn, row).await?,
            StorageOp::UpsertRevision(row) => upsert_revision(conn, row).await?,
            StorageOp::UpsertArchivedRevision(row) => upsert_archived_revision(conn, row).await?,
            StorageOp::InsertTagLink(link) => insert_tag_link(conn, LIVE_TAGS, link).await?,
            StorageOp::InsertArchivedTagLink(link) => {
                insert_tag_link(conn, ARCHIVED_TAGS, link).await?
            }
            StorageOp::InsertTagLinkWhereHeld(link) => insert_tag_link_where_held(conn, link).await?,
            StorageOp::DeleteTagLink(link) => delete_tag_link(conn, LIVE_TAGS, link).await?,
            StorageOp::DeleteArchivedTagLink(link) => {
                delete_tag_link(conn, ARCHIVED_TAGS, link).await?
            }
            StorageOp::SetArchivedPageId(params) => set_archived_page_id(conn, params).await?,
            StorageOp::MoveArchivedTagLinks { page_id } => {
                move_archived_tag_links(conn, *page_id).await?
            }
            StorageOp::MoveArchivedRevisions { page_id } => {
                move_archived_revisions(conn, *page_id).await?
            }
            StorageOp::MergeRevisions(range) => merge_revisions(conn, range).await?,
            StorageOp::SetRevisionVisibility(v) => {
                set_visibility(conn, "UPDATE revision SET rev_deleted = ?1 WHERE rev_id = ?2", v)
                    .await?
            }
            StorageOp::SetArchivedRevisionVisibility(v) => {
                set_visibility(
                    conn,
                    "UPDATE archive SET ar_deleted = ?1 WHERE ar_rev_id = ?2",
                    v,
                )
                .await?
            }
        };
        tracing::trace!("{} wrote {} rows", op, written);
        Ok(written)
    }

    async fn commit(self: Box<Self>) -> Result<(), StorageError> {
        self.tx.commit().await.map_err(StorageError::Database)
    }
}

/// Which relation a tag statement targets.
struct TagTable {
    name: &'static str,
    column: &'static str,
}

const LIVE_TAGS: TagTable = TagTable {
    name: "tagged_revision",
    column: "rev_id",
};

const ARCHIVED_TAGS: TagTable = TagTable {
    name: "tagged_archived_revision",
    column: "ar_rev_id",
};

async fn upsert_text(conn: &mut SqliteConnection, row: &TextRow) -> Result<u64, StorageError> {
    // A revision keeps the blob it already references.
    let existing: Option<i64> = sqlx::query_scalar(
        r#"
        SELECT rev_text_id FROM revision WHERE rev_id = ?1 AND rev_text_id IS NOT NULL
        UNION ALL
        SELECT ar_text_id FROM archive WHERE ar_rev_id = ?1 AND ar_text_id IS NOT NULL
        LIMIT 1
        "#,
    )
    .bind(row.revision.value() as i64)
    .fetch_optional(&mut *conn)
    .await
    .map_err(StorageError::Database)?;

    let result = sqlx::query(
        r#"
        INSERT INTO text (old_id, old_text, old_flags)
        VALUES (?1, ?2, ?3)
        ON CONFLICT(old_id) DO UPDATE SET
            old_text = excluded.old_text,
            old_flags = excluded.old_flags
        "#,
    )
    .bind(existing.unwrap_or(row.id.value() as i64))
    .bind(&row.text)
    .bind(&row.flags)
    .execute(conn)
    .await
    .map_err(StorageError::Database)?;
    Ok(result.rows_affected())
}

async fn upsert_revision(conn: &mut SqliteConnection, row: &RevisionRow) -> Result<u64, StorageError> {
    let f = &row.fields;
    let result = sqlx::query(
        r#"
        INSERT INTO revision (
            rev_id, rev_page, rev_text_id, rev_comment, rev_user, rev_user_text,
            rev_timestamp, rev_minor_edit, rev_deleted, rev_len, rev_parent_id,
            rev_sha1, rev_content_model, rev_content_format
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
        ON CONFLICT(rev_id) DO UPDATE SET
            rev_text_id = COALESCE(revision.rev_text_id, excluded.rev_text_id)
        "#,
    )
    .bind(f.id.value() as i64)
    .bind(row.page_id.value() as i64)
    .bind(f.text_id.map(|id| id.value() as i64))
    .bind(&f.comment)
    .bind(f.user_id as i64)
    .bind(&f.user_text)
    .bind(format_timestamp(&f.timestamp))
    .bind(f.minor_edit)
    .bind(f.deleted as i64)
    .bind(f.len.map(|len| len as i64))
    .bind(f.parent_id.map(|id| id.value() as i64))
    .bind(&f.sha1)
    .bind(&f.content_model)
    .bind(&f.content_format)
    .execute(conn)
    .await
    .map_err(StorageError::Database)?;
    Ok(result.rows_affected())
}

async fn upsert_archived_revision(
    conn: &mut SqliteConnection,
    row: &ArchivedRevisionRow,
) -> Result<u64, StorageError> {
    let f = &row.fields;
    let result = sqlx::query(
        r#"
        INSERT INTO archive (
            ar_rev_id, ar_namespace, ar_title, ar_page_id, ar_text_id, ar_comment,
            ar_user, ar_user_text, ar_timestamp, ar_minor_edit, ar_deleted, ar_len,
            ar_parent_id, ar_sha1, ar_content_model, ar_content_format
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
        ON CONFLICT(ar_rev_id) DO UPDATE SET
            ar_text_id = COALESCE(archive.ar_text_id, excluded.ar_text_id)
        "#,
    )
    .bind(f.id.value() as i64)
    .bind(row.title.namespace().value())
    .bind(row.title.db_title())
    .bind(row.page_id.map(|id| id.value() as i64))
    .bind(f.text_id.map(|id| id.value() as i64))
    .bind(&f.comment)
    .bind(f.user_id as i64)
    .bind(&f.user_text)
    .bind(format_timestamp(&f.timestamp))
    .bind(f.minor_edit)
    .bind(f.deleted as i64)
    .bind(f.len.map(|len| len as i64))
    .bind(f.parent_id.map(|id| id.value() as i64))
    .bind(&f.sha1)
    .bind(&f.content_model)
    .bind(&f.content_format)
    .execute(conn)
    .await
    .map_err(StorageError::Database)?;
    Ok(result.rows_affected())
}

async fn insert_tag_link(
    conn: &mut SqliteConnection,
    table: TagTable,
    link: &TagLink,
) -> Result<u64, StorageError> {
    let sql = format!(
        "INSERT INTO {} ({}, tag_name) VALUES (?1, ?2) ON CONFLICT DO NOTHING",
        table.name, table.column
    );
    let result = sqlx::query(&sql)
        .bind(link.revision.value() as i64)
        .bind(&link.tag)
        .execute(conn)
        .await
        .map_err(StorageError::Database)?;
    Ok(result.rows_affected())
}

async fn insert_tag_link_where_held(
    conn: &mut SqliteConnection,
    link: &TagLink,
) -> Result<u64, StorageError> {
    let (live, archived): (i64, i64) = sqlx::query_as(
        r#"
        SELECT
            EXISTS(SELECT 1 FROM revision WHERE rev_id = ?1),
            EXISTS(SELECT 1 FROM archive WHERE ar_rev_id = ?1)
        "#,
    )
    .bind(link.revision.value() as i64)
    .fetch_one(&mut *conn)
    .await
    .map_err(StorageError::Database)?;

    match (live != 0, archived != 0) {
        (true, _) => insert_tag_link(conn, LIVE_TAGS, link).await,
        (false, true) => insert_tag_link(conn, ARCHIVED_TAGS, link).await,
        (false, false) => Err(StorageError::UnknownRevision {
            revision: link.revision,
        }),
    }
}

async fn delete_tag_link(
    conn: &mut SqliteConnection,
    table: TagTable,
    link: &TagLink,
) -> Result<u64, StorageError> {
    let sql = format!(
        "DELETE FROM {} WHERE {} = ?1 AND tag_name = ?2",
        table.name, table.column
    );
    let result = sqlx::query(&sql)
        .bind(link.revision.value() as i64)
        .bind(&link.tag)
        .execute(conn)
        .await
        .map_err(StorageError::Database)?;
    Ok(result.rows_affected())
}

async fn set_archived_page_id(
    conn: &mut SqliteConnection,
    params: &ArchivedPageId,
) -> Result<u64, StorageError> {
    let result = sqlx::query(
        r#"
        UPDATE archive SET ar_page_id = ?1
        WHERE ar_namespace = ?2 AND ar_title = ?3 AND ar_page_id IS NULL
        "#,
    )
    .bind(params.page_id.value() as i64)
    .bind(params.namespace.value())
    .bind(&params.db_title)
    .execute(conn)
    .await
    .map_err(StorageError::Database)?;
    Ok(result.rows_affected())
}

async fn move_archived_tag_links(
    conn: &mut SqliteConnection,
    page_id: PageId,
) -> Result<u64, StorageError> {
    let links: Vec<(i64, String)> = sqlx::query_as(
        r#"
        DELETE FROM tagged_archived_revision
        WHERE ar_rev_id IN (SELECT ar_rev_id FROM archive WHERE ar_page_id = ?1)
        RETURNING ar_rev_id, tag_name
        "#,
    )
    .bind(page_id.value() as i64)
    .fetch_all(&mut *conn)
    .await
    .map_err(StorageError::Database)?;

    for (rev_id, tag) in &links {
        sqlx::query("INSERT INTO tagged_revision (rev_id, tag_name) VALUES (?1, ?2) ON CONFLICT DO NOTHING")
            .bind(rev_id)
            .bind(tag)
            .execute(&mut *conn)
            .await
            .map_err(StorageError::Database)?;
    }
    Ok(links.len() as u64)
}

async fn move_archived_revisions(
    conn: &mut SqliteConnection,
    page_id: PageId,
) -> Result<u64, StorageError> {
    let rows = sqlx::query_as::<_, ArchivedRow>(
        r#"
        DELETE FROM archive WHERE ar_page_id = ?1
        RETURNING ar_rev_id, ar_text_id, ar_comment, ar_user, ar_user_text, ar_timestamp,
                  ar_minor_edit, ar_deleted, ar_len, ar_parent_id, ar_sha1,
                  ar_content_model, ar_content_format
        "#,
    )
    .bind(page_id.value() as i64)
    .fetch_all(&mut *conn)
    .await
    .map_err(StorageError::Database)?;

    // A revision already live wins over its archived copy.
    for row in &rows {
        sqlx::query(
            r#"
            INSERT INTO revision (
                rev_id, rev_page, rev_text_id, rev_comment, rev_user, rev_user_text,
                rev_timestamp, rev_minor_edit, rev_deleted, rev_len, rev_parent_id,
                rev_sha1, rev_content_model, rev_content_format
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            ON CONFLICT(rev_id) DO NOTHING
            "#,
        )
        .bind(row.ar_rev_id)
        .bind(page_id.value() as i64)
        .bind(row.ar_text_id)
        .bind(&row.ar_comment)
        .bind(row.ar_user)
        .bind(&row.ar_user_text)
        .bind(&row.ar_timestamp)
        .bind(row.ar_minor_edit)
        .bind(row.ar_deleted)
        .bind(row.ar_len)
        .bind(row.ar_parent_id)
        .bind(&row.ar_sha1)
        .bind(&row.ar_content_model)
        .bind(&row.ar_content_format)
        .execute(&mut *conn)
        .await
        .map_err(StorageError::Database)?;
    }
    Ok(rows.len() as u64)
}

async fn merge_revisions(conn: &mut SqliteConnection, range: &MergeRange) -> Result<u64, StorageError> {
    let result = sqlx::query(
        r#"
        UPDATE revision
        SET rev_page = (
            SELECT page_id FROM page WHERE page_namespace = ?1 AND page_title = ?2
        )
        WHERE rev_page = ?3 AND rev_timestamp <= ?4
        "#,
    )
    .bind(range.destination.namespace().value())
    .bind(range.destination.db_title())
    .bind(range.source.value() as i64)
    .bind(format_timestamp(&range.merge_point))
    .execute(conn)
    .await
    .map_err(StorageError::Database)?;
    Ok(result.rows_affected())
}

async fn set_visibility(
    conn: &mut SqliteConnection,
    sql: &str,
    visibility: &Visibility,
) -> Result<u64, StorageError> {
    let result = sqlx::query(sql)
        .bind(visibility.bitmask as i64)
        .bind(visibility.revision.value() as i64)
        .execute(conn)
        .await
        .map_err(StorageError::Database)?;
    Ok(result.rows_affected())
}

/// Archived row returned by a move.
#[derive(sqlx::FromRow)]
struct ArchivedRow {
    ar_rev_id: i64,
    ar_text_id: Option<i64>,
    ar_comment: String,
    ar_user: i64,
    ar_user_text: String,
    ar_timestamp: String,
    ar_minor_edit: i64,
    ar_deleted: i64,
    ar_len: Option<i64>,
    ar_parent_id: Option<i64>,
    ar_sha1: Option<String>,
    ar_content_model: Option<String>,
    ar_content_format: Option<String>,
}

/// Where a stored revision currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevisionLocation {
    /// The live revision relation.
    Live,
    /// The archive relation.
    Archived,
}

/// Summary of a stored revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRevision {
    /// Revision ID.
    pub id: RevisionId,
    /// Which relation holds it.
    pub location: RevisionLocation,
    /// Owning page, when known.
    pub page_id: Option<PageId>,
    /// Content blob.
    pub text_id: Option<TextId>,
    /// Deletion bitmask.
    pub deleted: u32,
    /// Stored timestamp text.
    pub timestamp: String,
}

#[derive(sqlx::FromRow)]
struct StoredRow {
    id: i64,
    page_id: Option<i64>,
    text_id: Option<i64>,
    deleted: i64,
    timestamp: String,
    archived: i64,
}

impl From<StoredRow> for StoredRevision {
    fn from(row: StoredRow) -> Self {
        StoredRevision {
            id: RevisionId::new(row.id as u64),
            location: if row.archived != 0 {
                RevisionLocation::Archived
            } else {
                RevisionLocation::Live
            },
            page_id: row.page_id.map(|id| PageId::new(id as u64)),
            text_id: row.text_id.map(|id| TextId::new(id as u64)),
            deleted: row.deleted as u32,
            timestamp: row.timestamp,
        }
    }
}

/// Row counts of the replica.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, sqlx::FromRow)]
pub struct ReplicaStats {
    /// Pages.
    pub pages: i64,
    /// Live revisions.
    pub revisions: i64,
    /// Archived revisions.
    pub archived_revisions: i64,
    /// Text blobs.
    pub texts: i64,
    /// Live tag links.
    pub tag_links: i64,
    /// Archived tag links.
    pub archived_tag_links: i64,
    /// Revision IDs present in both relations (always 0 for a healthy replica).
    pub duplicated: i64,
}

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS page (
        page_id INTEGER PRIMARY KEY,
        page_namespace INTEGER NOT NULL,
        page_title TEXT NOT NULL,
        UNIQUE(page_namespace, page_title)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS text (
        old_id INTEGER PRIMARY KEY,
        old_text TEXT NOT NULL,
        old_flags TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS revision (
        rev_id INTEGER PRIMARY KEY,
        rev_page INTEGER NOT NULL,
        rev_text_id INTEGER REFERENCES text(old_id) DEFERRABLE INITIALLY DEFERRED,
        rev_comment TEXT NOT NULL DEFAULT '',
        rev_user INTEGER NOT NULL DEFAULT 0,
        rev_user_text TEXT NOT NULL DEFAULT '',
        rev_timestamp TEXT NOT NULL,
        rev_minor_edit INTEGER NOT NULL DEFAULT 0,
        rev_deleted INTEGER NOT NULL DEFAULT 0,
        rev_len INTEGER,
        rev_parent_id INTEGER,
        rev_sha1 TEXT,
        rev_content_model TEXT,
        rev_content_format TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_revision_page_timestamp ON revision(rev_page, rev_timestamp)",
    r#"
    CREATE TABLE IF NOT EXISTS archive (
        ar_rev_id INTEGER PRIMARY KEY,
        ar_namespace INTEGER NOT NULL,
        ar_title TEXT NOT NULL,
        ar_page_id INTEGER,
        ar_text_id INTEGER REFERENCES text(old_id) DEFERRABLE INITIALLY DEFERRED,
        ar_comment TEXT NOT NULL DEFAULT '',
        ar_user INTEGER NOT NULL DEFAULT 0,
        ar_user_text TEXT NOT NULL DEFAULT '',
        ar_timestamp TEXT NOT NULL,
        ar_minor_edit INTEGER NOT NULL DEFAULT 0,
        ar_deleted INTEGER NOT NULL DEFAULT 0,
        ar_len INTEGER,
        ar_parent_id INTEGER,
        ar_sha1 TEXT,
        ar_content_model TEXT,
        ar_content_format TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_archive_title ON archive(ar_namespace, ar_title)",
    "CREATE INDEX IF NOT EXISTS idx_archive_page ON archive(ar_page_id)",
    r#"
    CREATE TABLE IF NOT EXISTS tagged_revision (
        rev_id INTEGER NOT NULL REFERENCES revision(rev_id) DEFERRABLE INITIALLY DEFERRED,
        tag_name TEXT NOT NULL,
        PRIMARY KEY (rev_id, tag_name)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tagged_archived_revision (
        ar_rev_id INTEGER NOT NULL REFERENCES archive(ar_rev_id) DEFERRABLE INITIALLY DEFERRED,
        tag_name TEXT NOT NULL,
        PRIMARY KEY (ar_rev_id, tag_name)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sync_checkpoint (
        checkpoint_key TEXT PRIMARY KEY,
        checkpoint_timestamp TEXT NOT NULL
    )
    "#,
];

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use sync_core::{RevisionFields, TEXT_FLAGS};
    use sync_types::Namespace;

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 1, day, 0, 0, 0).unwrap()
    }

    fn fields(id: u64, day: u32, text_id: Option<u64>) -> RevisionFields {
        RevisionFields {
            id: RevisionId::new(id),
            text_id: text_id.map(TextId::new),
            comment: format!("edit {id}"),
            user_id: 1,
            user_text: "Alice".into(),
            timestamp: ts(day),
            minor_edit: false,
            deleted: 0,
            len: Some(10),
            parent_id: None,
            sha1: None,
            content_model: Some("wikitext".into()),
            content_format: None,
        }
    }

    fn live(id: u64, page: u64, day: u32) -> StorageOp {
        StorageOp::UpsertRevision(RevisionRow {
            page_id: PageId::new(page),
            fields: fields(id, day, None),
        })
    }

    fn archived(id: u64, title: &str, day: u32) -> StorageOp {
        StorageOp::UpsertArchivedRevision(ArchivedRevisionRow {
            title: PageTitle::new(Namespace::MAIN, title),
            page_id: None,
            fields: fields(id, day, None),
        })
    }

    fn tag(id: u64, name: &str) -> TagLink {
        TagLink {
            revision: RevisionId::new(id),
            tag: name.into(),
        }
    }

    async fn apply(replica: &SqliteReplica, ops: &[StorageOp]) -> Result<u64, StorageError> {
        let mut tx = replica.begin().await?;
        let mut total = 0;
        for op in ops {
            total += tx.execute(op).await?;
        }
        tx.commit().await?;
        Ok(total)
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let replica = SqliteReplica::in_memory().await.unwrap();
        replica.run_migrations().await.unwrap();
        assert_eq!(replica.stats().await.unwrap(), ReplicaStats::default());
    }

    #[tokio::test]
    async fn revision_upsert_only_updates_text_reference() {
        let replica = SqliteReplica::in_memory().await.unwrap();
        apply(
            &replica,
            &[
                StorageOp::UpsertText(TextRow {
                    id: TextId::new(1),
                    revision: RevisionId::new(100),
                    text: "v1".into(),
                    flags: TEXT_FLAGS.into(),
                }),
                StorageOp::UpsertRevision(RevisionRow {
                    page_id: PageId::new(1),
                    fields: fields(100, 1, Some(1)),
                }),
            ],
        )
        .await
        .unwrap();

        // Second write: different page, no text. Neither may clobber the row.
        apply(&replica, &[live(100, 2, 1)]).await.unwrap();

        let stored = replica
            .find_revision(RevisionId::new(100))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.page_id, Some(PageId::new(1)));
        assert_eq!(stored.text_id, Some(TextId::new(1)));
    }

    #[tokio::test]
    async fn text_upsert_overwrites_content() {
        let replica = SqliteReplica::in_memory().await.unwrap();
        for text in ["first", "second"] {
            apply(
                &replica,
                &[StorageOp::UpsertText(TextRow {
                    id: TextId::new(5),
                    revision: RevisionId::new(1),
                    text: text.into(),
                    flags: TEXT_FLAGS.into(),
                })],
            )
            .await
            .unwrap();
        }
        assert_eq!(
            replica.text(TextId::new(5)).await.unwrap().as_deref(),
            Some("second")
        );

        let mut tx = replica.begin().await.unwrap();
        assert_eq!(tx.max_text_id().await.unwrap(), Some(TextId::new(5)));
    }

    #[tokio::test]
    async fn rewriting_content_reuses_the_referenced_blob() {
        let replica = SqliteReplica::in_memory().await.unwrap();
        let write = |id: u64, text: &str| {
            vec![
                StorageOp::UpsertText(TextRow {
                    id: TextId::new(id),
                    revision: RevisionId::new(100),
                    text: text.into(),
                    flags: TEXT_FLAGS.into(),
                }),
                StorageOp::UpsertRevision(RevisionRow {
                    page_id: PageId::new(1),
                    fields: fields(100, 1, Some(id)),
                }),
            ]
        };
        apply(&replica, &write(1, "v1")).await.unwrap();
        apply(&replica, &write(2, "v2")).await.unwrap();

        let stored = replica
            .find_revision(RevisionId::new(100))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.text_id, Some(TextId::new(1)));
        assert_eq!(replica.stats().await.unwrap().texts, 1);
        assert_eq!(
            replica.text(TextId::new(1)).await.unwrap().as_deref(),
            Some("v2")
        );
        assert_eq!(replica.text(TextId::new(2)).await.unwrap(), None);

        // Same for a revision held in the archive.
        let archived_write = |id: u64| {
            vec![
                StorageOp::UpsertText(TextRow {
                    id: TextId::new(id),
                    revision: RevisionId::new(200),
                    text: "gone".into(),
                    flags: TEXT_FLAGS.into(),
                }),
                StorageOp::UpsertArchivedRevision(ArchivedRevisionRow {
                    title: PageTitle::new(Namespace::MAIN, "Gone"),
                    page_id: None,
                    fields: fields(200, 1, Some(id)),
                }),
            ]
        };
        apply(&replica, &archived_write(3)).await.unwrap();
        apply(&replica, &archived_write(4)).await.unwrap();
        assert_eq!(replica.stats().await.unwrap().texts, 2);
        assert_eq!(
            replica
                .find_revision(RevisionId::new(200))
                .await
                .unwrap()
                .unwrap()
                .text_id,
            Some(TextId::new(3))
        );
    }

    #[tokio::test]
    async fn duplicate_tag_links_are_ignored() {
        let replica = SqliteReplica::in_memory().await.unwrap();
        let ops = [live(1, 1, 1), StorageOp::InsertTagLink(tag(1, "t"))];
        apply(&replica, &ops).await.unwrap();
        let written = apply(&replica, &[StorageOp::InsertTagLink(tag(1, "t"))])
            .await
            .unwrap();
        assert_eq!(written, 0);
        assert_eq!(replica.stats().await.unwrap().tag_links, 1);
    }

    #[tokio::test]
    async fn tag_goes_where_revision_is_held() {
        let replica = SqliteReplica::in_memory().await.unwrap();
        apply(&replica, &[live(1, 1, 1), archived(2, "Gone", 1)])
            .await
            .unwrap();

        apply(
            &replica,
            &[
                StorageOp::InsertTagLinkWhereHeld(tag(1, "a")),
                StorageOp::InsertTagLinkWhereHeld(tag(2, "b")),
            ],
        )
        .await
        .unwrap();

        let stats = replica.stats().await.unwrap();
        assert_eq!(stats.tag_links, 1);
        assert_eq!(stats.archived_tag_links, 1);
    }

    #[tokio::test]
    async fn tag_on_unknown_revision_fails() {
        let replica = SqliteReplica::in_memory().await.unwrap();
        let err = apply(&replica, &[StorageOp::InsertTagLinkWhereHeld(tag(9, "x"))])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::UnknownRevision { .. }));
        assert!(err.is_constraint_violation());
    }

    #[tokio::test]
    async fn restore_moves_rows_and_tags() {
        let replica = SqliteReplica::in_memory().await.unwrap();
        apply(
            &replica,
            &[
                archived(10, "Back", 1),
                archived(11, "Back", 2),
                archived(12, "Other", 2),
                StorageOp::InsertArchivedTagLink(tag(10, "t")),
            ],
        )
        .await
        .unwrap();

        let moved = apply(
            &replica,
            &[
                StorageOp::SetArchivedPageId(ArchivedPageId {
                    namespace: Namespace::MAIN,
                    db_title: "Back".into(),
                    page_id: PageId::new(7),
                }),
                StorageOp::MoveArchivedTagLinks {
                    page_id: PageId::new(7),
                },
                StorageOp::MoveArchivedRevisions {
                    page_id: PageId::new(7),
                },
            ],
        )
        .await
        .unwrap();
        assert_eq!(moved, 2 + 1 + 2);

        let stats = replica.stats().await.unwrap();
        assert_eq!(stats.revisions, 2);
        assert_eq!(stats.archived_revisions, 1);
        assert_eq!(stats.tag_links, 1);
        assert_eq!(stats.archived_tag_links, 0);
        assert_eq!(stats.duplicated, 0);

        let restored = replica
            .find_revision(RevisionId::new(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(restored.location, RevisionLocation::Live);
        assert_eq!(restored.page_id, Some(PageId::new(7)));
        assert_eq!(replica.tags_of(RevisionId::new(10)).await.unwrap(), vec!["t"]);
    }

    #[tokio::test]
    async fn archived_page_id_is_only_filled_when_unknown() {
        let replica = SqliteReplica::in_memory().await.unwrap();
        apply(
            &replica,
            &[StorageOp::UpsertArchivedRevision(ArchivedRevisionRow {
                title: PageTitle::new(Namespace::MAIN, "Back"),
                page_id: Some(PageId::new(3)),
                fields: fields(1, 1, None),
            })],
        )
        .await
        .unwrap();

        let written = apply(
            &replica,
            &[StorageOp::SetArchivedPageId(ArchivedPageId {
                namespace: Namespace::MAIN,
                db_title: "Back".into(),
                page_id: PageId::new(7),
            })],
        )
        .await
        .unwrap();
        assert_eq!(written, 0);
    }

    #[tokio::test]
    async fn merge_moves_revisions_up_to_merge_point() {
        let replica = SqliteReplica::in_memory().await.unwrap();
        replica
            .upsert_page(PageId::new(2), &PageTitle::new(Namespace::MAIN, "Dest"))
            .await
            .unwrap();
        apply(&replica, &[live(1, 1, 1), live(2, 1, 2), live(3, 1, 3)])
            .await
            .unwrap();

        let merged = apply(
            &replica,
            &[StorageOp::MergeRevisions(MergeRange {
                source: PageId::new(1),
                destination: PageTitle::new(Namespace::MAIN, "Dest"),
                merge_point: ts(2),
            })],
        )
        .await
        .unwrap();
        assert_eq!(merged, 2);

        let third = replica
            .find_revision(RevisionId::new(3))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(third.page_id, Some(PageId::new(1)));
    }

    #[tokio::test]
    async fn merge_into_unknown_page_violates_constraint() {
        let replica = SqliteReplica::in_memory().await.unwrap();
        apply(&replica, &[live(1, 1, 1)]).await.unwrap();

        let err = apply(
            &replica,
            &[StorageOp::MergeRevisions(MergeRange {
                source: PageId::new(1),
                destination: PageTitle::new(Namespace::MAIN, "Nowhere"),
                merge_point: ts(5),
            })],
        )
        .await
        .unwrap_err();
        assert!(err.is_constraint_violation());

        let unchanged = replica
            .find_revision(RevisionId::new(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(unchanged.page_id, Some(PageId::new(1)));
    }

    #[tokio::test]
    async fn visibility_updates_either_relation() {
        let replica = SqliteReplica::in_memory().await.unwrap();
        apply(&replica, &[live(1, 1, 1), archived(2, "Gone", 1)])
            .await
            .unwrap();

        let mut written = 0;
        for rev in [1, 2] {
            let v = Visibility {
                revision: RevisionId::new(rev),
                bitmask: 6,
            };
            written += apply(
                &replica,
                &[
                    StorageOp::SetRevisionVisibility(v),
                    StorageOp::SetArchivedRevisionVisibility(v),
                ],
            )
            .await
            .unwrap();
        }
        assert_eq!(written, 2);
        for rev in [1, 2] {
            let stored = replica
                .find_revision(RevisionId::new(rev))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(stored.deleted, 6);
        }
    }

    #[tokio::test]
    async fn dropped_transaction_rolls_back() {
        let replica = SqliteReplica::in_memory().await.unwrap();
        {
            let mut tx = replica.begin().await.unwrap();
            tx.execute(&live(1, 1, 1)).await.unwrap();
        }
        assert_eq!(replica.stats().await.unwrap().revisions, 0);
    }

    #[tokio::test]
    async fn clear_revisions_empties_mirror_tables() {
        let replica = SqliteReplica::in_memory().await.unwrap();
        replica
            .upsert_page(PageId::new(1), &PageTitle::new(Namespace::MAIN, "Kept"))
            .await
            .unwrap();
        apply(
            &replica,
            &[
                live(1, 1, 1),
                StorageOp::InsertTagLink(tag(1, "t")),
                archived(2, "Gone", 1),
            ],
        )
        .await
        .unwrap();

        let mut tx = replica.begin().await.unwrap();
        tx.clear_revisions().await.unwrap();
        tx.commit().await.unwrap();

        let stats = replica.stats().await.unwrap();
        assert_eq!(stats.revisions + stats.archived_revisions + stats.tag_links, 0);
        assert_eq!(stats.pages, 1);
    }

    #[tokio::test]
    async fn checkpoint_round_trips_through_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mirror.db");

        {
            let replica = SqliteReplica::new(&path).await.unwrap();
            assert_eq!(replica.read_checkpoint("revisions").await.unwrap(), None);
            replica.write_checkpoint("revisions", ts(1)).await.unwrap();
            replica.write_checkpoint("revisions", ts(2)).await.unwrap();
            replica.close().await;
        }

        let reopened = SqliteReplica::new(&path).await.unwrap();
        assert_eq!(
            reopened.read_checkpoint("revisions").await.unwrap(),
            Some(ts(2))
        );
        assert_eq!(reopened.read_checkpoint("other").await.unwrap(), None);
    }
}
