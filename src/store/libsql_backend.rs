//! libSQL backend for the async `MetadataStore`.
//!
//! Supports local file and in-memory databases. Attachment lists and
//! common headers are stored as JSON text columns; a NULL `attachments`
//! column means extraction has not run yet.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::mail::model::{AttachmentMeta, CommonHeaders, MailAddress, MailRecord};
use crate::store::migrations;
use crate::store::traits::MetadataStore;

/// libSQL metadata store.
///
/// Holds a single connection reused for all operations;
/// `libsql::Connection` is safe for concurrent async use.
pub struct LibSqlMetadataStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlMetadataStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let store = Self::from_database(db)?;
        store.run_migrations().await?;
        info!(path = %path.display(), "Metadata store opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let store = Self::from_database(db)?;
        store.run_migrations().await?;
        Ok(store)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Map a libsql error, surfacing lock contention as throttling.
fn query_error(op: &str, e: libsql::Error) -> DatabaseError {
    let message = e.to_string();
    if message.contains("database is locked") || message.contains("SQLITE_BUSY") {
        DatabaseError::Throttled(format!("{op}: {message}"))
    } else {
        DatabaseError::Query(format!("{op}: {message}"))
    }
}

fn mail_not_found(destination: &str, message_id: &str) -> DatabaseError {
    DatabaseError::NotFound {
        entity: "mail".to_string(),
        id: format!("{destination}/{message_id}"),
    }
}

/// Convert `Option<String>` to libsql Value.
fn opt_text_owned(s: Option<String>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s),
        None => libsql::Value::Null,
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, DatabaseError> {
    serde_json::to_string(value).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

fn row_to_address(row: &libsql::Row) -> Result<MailAddress, libsql::Error> {
    Ok(MailAddress {
        address: row.get(0)?,
        user_sub: row.get(1)?,
        summarize_emails: row.get::<i64>(2)? != 0,
    })
}

/// Map a libsql Row to a MailRecord. Column order matches `MAIL_COLUMNS`.
fn row_to_mail(row: &libsql::Row) -> Result<MailRecord, DatabaseError> {
    let get_err = |e: libsql::Error| DatabaseError::Query(format!("row parse: {e}"));

    let headers_json: String = row.get(4).map_err(get_err)?;
    let common_headers: CommonHeaders = serde_json::from_str(&headers_json)
        .map_err(|e| DatabaseError::Serialization(format!("common_headers: {e}")))?;

    let attachments = match row.get::<String>(9).ok() {
        Some(json) => Some(
            serde_json::from_str::<Vec<AttachmentMeta>>(&json)
                .map_err(|e| DatabaseError::Serialization(format!("attachments: {e}")))?,
        ),
        None => None,
    };

    Ok(MailRecord {
        destination: row.get(0).map_err(get_err)?,
        message_id: row.get(1).map_err(get_err)?,
        timestamp: row.get(2).map_err(get_err)?,
        source: row.get(3).map_err(get_err)?,
        common_headers,
        bucket_name: row.get(5).map_err(get_err)?,
        bucket_object_key: row.get(6).map_err(get_err)?,
        is_read: row.get::<i64>(7).map_err(get_err)? != 0,
        is_processed: row.get::<i64>(8).map_err(get_err)? != 0,
        attachments,
        summary_text: row.get::<String>(10).ok(),
    })
}

// ── Trait implementation ────────────────────────────────────────────

const MAIL_COLUMNS: &str = "destination, message_id, timestamp, source, common_headers, bucket_name, bucket_object_key, is_read, is_processed, attachments, summary_text";

/// Fail with `NotFound` when an UPDATE touched no mail record.
fn ensure_updated(
    op: &str,
    affected: u64,
    destination: &str,
    message_id: &str,
) -> Result<(), DatabaseError> {
    if affected == 0 {
        return Err(mail_not_found(destination, message_id));
    }
    debug!(destination, message_id, op, "Mail record updated");
    Ok(())
}

#[async_trait]
impl MetadataStore for LibSqlMetadataStore {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Addresses ───────────────────────────────────────────────────

    async fn get_address(&self, address: &str) -> Result<Option<MailAddress>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT address, user_sub, summarize_emails FROM addresses WHERE address = ?1",
                params![address],
            )
            .await
            .map_err(|e| query_error("get_address", e))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let addr = row_to_address(&row)
                    .map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?;
                Ok(Some(addr))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(query_error("get_address", e)),
        }
    }

    async fn create_address(&self, address: &MailAddress) -> Result<bool, DatabaseError> {
        let inserted = self
            .conn()
            .execute(
                "INSERT OR IGNORE INTO addresses (address, user_sub, summarize_emails) VALUES (?1, ?2, ?3)",
                params![
                    address.address.clone(),
                    address.user_sub.clone(),
                    address.summarize_emails as i64
                ],
            )
            .await
            .map_err(|e| query_error("create_address", e))?;
        Ok(inserted > 0)
    }

    async fn delete_address(&self, address: &str) -> Result<(), DatabaseError> {
        self.conn()
            .execute("DELETE FROM addresses WHERE address = ?1", params![address])
            .await
            .map_err(|e| query_error("delete_address", e))?;
        Ok(())
    }

    // ── Mail ────────────────────────────────────────────────────────

    async fn get_mail(
        &self,
        destination: &str,
        message_id: &str,
    ) -> Result<Option<MailRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {MAIL_COLUMNS} FROM mails WHERE destination = ?1 AND message_id = ?2"),
                params![destination, message_id],
            )
            .await
            .map_err(|e| query_error("get_mail", e))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_mail(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(query_error("get_mail", e)),
        }
    }

    async fn create_mail_if_absent(&self, record: &MailRecord) -> Result<bool, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let attachments = record.attachments.as_ref().map(to_json).transpose()?;

        let inserted = self
            .conn()
            .execute(
                "INSERT OR IGNORE INTO mails (destination, message_id, timestamp, source, common_headers, bucket_name, bucket_object_key, is_read, is_processed, attachments, summary_text, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    record.destination.clone(),
                    record.message_id.clone(),
                    record.timestamp.clone(),
                    record.source.clone(),
                    to_json(&record.common_headers)?,
                    record.bucket_name.clone(),
                    record.bucket_object_key.clone(),
                    record.is_read as i64,
                    record.is_processed as i64,
                    opt_text_owned(attachments),
                    opt_text_owned(record.summary_text.clone()),
                    now.clone(),
                    now,
                ],
            )
            .await
            .map_err(|e| query_error("create_mail_if_absent", e))?;
        Ok(inserted > 0)
    }

    async fn set_attachments(
        &self,
        destination: &str,
        message_id: &str,
        attachments: &[AttachmentMeta],
    ) -> Result<(), DatabaseError> {
        let json = to_json(&attachments)?;
        let affected = self
            .conn()
            .execute(
                "UPDATE mails SET attachments = ?1, updated_at = ?2 WHERE destination = ?3 AND message_id = ?4",
                params![json, Utc::now().to_rfc3339(), destination, message_id],
            )
            .await
            .map_err(|e| query_error("set_attachments", e))?;
        ensure_updated("set_attachments", affected, destination, message_id)
    }

    async fn set_summary(
        &self,
        destination: &str,
        message_id: &str,
        summary: &str,
    ) -> Result<(), DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE mails SET summary_text = ?1, updated_at = ?2 WHERE destination = ?3 AND message_id = ?4",
                params![summary, Utc::now().to_rfc3339(), destination, message_id],
            )
            .await
            .map_err(|e| query_error("set_summary", e))?;
        ensure_updated("set_summary", affected, destination, message_id)
    }

    async fn mark_processed(
        &self,
        destination: &str,
        message_id: &str,
    ) -> Result<(), DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE mails SET is_processed = 1, updated_at = ?1 WHERE destination = ?2 AND message_id = ?3",
                params![Utc::now().to_rfc3339(), destination, message_id],
            )
            .await
            .map_err(|e| query_error("mark_processed", e))?;
        ensure_updated("mark_processed", affected, destination, message_id)
    }

    async fn mark_read(&self, destination: &str, message_id: &str) -> Result<(), DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE mails SET is_read = 1, updated_at = ?1 WHERE destination = ?2 AND message_id = ?3",
                params![Utc::now().to_rfc3339(), destination, message_id],
            )
            .await
            .map_err(|e| query_error("mark_read", e))?;
        ensure_updated("mark_read", affected, destination, message_id)
    }

    async fn list_mail(&self, destination: &str) -> Result<Vec<MailRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {MAIL_COLUMNS} FROM mails WHERE destination = ?1 ORDER BY timestamp DESC, message_id"
                ),
                params![destination],
            )
            .await
            .map_err(|e| query_error("list_mail", e))?;

        let mut records = Vec::new();
        loop {
            match rows.next().await {
                Ok(Some(row)) => records.push(row_to_mail(&row)?),
                Ok(None) => break,
                Err(e) => return Err(query_error("list_mail", e)),
            }
        }
        Ok(records)
    }

    async fn delete_mail(
        &self,
        destination: &str,
        message_id: &str,
    ) -> Result<bool, DatabaseError> {
        let deleted = self
            .conn()
            .execute(
                "DELETE FROM mails WHERE destination = ?1 AND message_id = ?2",
                params![destination, message_id],
            )
            .await
            .map_err(|e| query_error("delete_mail", e))?;
        Ok(deleted > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_db() -> LibSqlMetadataStore {
        LibSqlMetadataStore::new_memory().await.unwrap()
    }

    fn make_record(destination: &str, message_id: &str, timestamp: &str) -> MailRecord {
        MailRecord {
            destination: destination.to_string(),
            message_id: message_id.to_string(),
            timestamp: timestamp.to_string(),
            source: "sender@example.org".to_string(),
            common_headers: CommonHeaders {
                subject: Some("Hello".into()),
                from: vec!["sender@example.org".into()],
                ..Default::default()
            },
            bucket_name: "inbox".to_string(),
            bucket_object_key: format!("stored_emails/{destination}/{message_id}/{message_id}.eml"),
            is_read: false,
            is_processed: false,
            attachments: None,
            summary_text: None,
        }
    }

    #[tokio::test]
    async fn address_create_and_lookup() {
        let db = test_db().await;
        let addr = MailAddress::new("Box@Catcher.dev", "user-1", true);

        assert!(db.create_address(&addr).await.unwrap());
        assert!(!db.create_address(&addr).await.unwrap());

        let loaded = db.get_address("box@catcher.dev").await.unwrap().unwrap();
        assert_eq!(loaded, addr);
        assert!(db.get_address("nobody@catcher.dev").await.unwrap().is_none());

        db.delete_address("box@catcher.dev").await.unwrap();
        assert!(db.get_address("box@catcher.dev").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn mail_create_is_idempotent_per_key() {
        let db = test_db().await;
        let record = make_record("a@x.com", "m1", "2026-01-01T00:00:00Z");

        assert!(db.create_mail_if_absent(&record).await.unwrap());

        let mut changed = record.clone();
        changed.source = "someone-else@example.org".into();
        assert!(!db.create_mail_if_absent(&changed).await.unwrap());

        let loaded = db.get_mail("a@x.com", "m1").await.unwrap().unwrap();
        assert_eq!(loaded, record);
        assert_eq!(db.list_mail("a@x.com").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn attachments_absent_versus_empty() {
        let db = test_db().await;
        db.create_mail_if_absent(&make_record("a@x.com", "m1", "t"))
            .await
            .unwrap();

        let loaded = db.get_mail("a@x.com", "m1").await.unwrap().unwrap();
        assert!(loaded.attachments.is_none());

        db.set_attachments("a@x.com", "m1", &[]).await.unwrap();
        let loaded = db.get_mail("a@x.com", "m1").await.unwrap().unwrap();
        assert_eq!(loaded.attachments, Some(vec![]));

        let meta = AttachmentMeta {
            filename: "a.pdf".into(),
            content_type: "application/pdf".into(),
            transfer_encoding: Some("base64".into()),
            content_id: None,
            attachment_id: Some("f_1".into()),
        };
        db.set_attachments("a@x.com", "m1", std::slice::from_ref(&meta))
            .await
            .unwrap();
        let loaded = db.get_mail("a@x.com", "m1").await.unwrap().unwrap();
        assert_eq!(loaded.attachments, Some(vec![meta]));
    }

    #[tokio::test]
    async fn summary_processed_and_read_flags() {
        let db = test_db().await;
        db.create_mail_if_absent(&make_record("a@x.com", "m1", "t"))
            .await
            .unwrap();

        db.set_summary("a@x.com", "m1", "Short summary").await.unwrap();
        db.mark_processed("a@x.com", "m1").await.unwrap();
        db.mark_read("a@x.com", "m1").await.unwrap();

        let loaded = db.get_mail("a@x.com", "m1").await.unwrap().unwrap();
        assert_eq!(loaded.summary_text.as_deref(), Some("Short summary"));
        assert!(loaded.is_processed);
        assert!(loaded.is_read);
    }

    #[tokio::test]
    async fn updates_on_missing_record_are_not_found() {
        let db = test_db().await;
        let err = db.mark_processed("a@x.com", "missing").await.unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));

        let err = db.set_summary("a@x.com", "missing", "x").await.unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));
    }

    #[tokio::test]
    async fn list_is_newest_first_and_scoped() {
        let db = test_db().await;
        for (id, ts) in [("m1", "2026-01-01T00:00:00Z"), ("m2", "2026-03-01T00:00:00Z"), ("m3", "2026-02-01T00:00:00Z")] {
            db.create_mail_if_absent(&make_record("a@x.com", id, ts))
                .await
                .unwrap();
        }
        db.create_mail_if_absent(&make_record("b@x.com", "other", "2026-04-01T00:00:00Z"))
            .await
            .unwrap();

        let ids: Vec<String> = db
            .list_mail("a@x.com")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.message_id)
            .collect();
        assert_eq!(ids, vec!["m2", "m3", "m1"]);
    }

    #[tokio::test]
    async fn delete_mail_reports_existence() {
        let db = test_db().await;
        db.create_mail_if_absent(&make_record("a@x.com", "m1", "t"))
            .await
            .unwrap();

        assert!(db.delete_mail("a@x.com", "m1").await.unwrap());
        assert!(!db.delete_mail("a@x.com", "m1").await.unwrap());
        assert!(db.get_mail("a@x.com", "m1").await.unwrap().is_none());
    }
}
