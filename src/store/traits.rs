//! Storage contracts the pipeline depends on.
//!
//! Both stores are shared across concurrent executions. Writes are per-key
//! with last-write-wins semantics; there are no cross-record transactions.

use async_trait::async_trait;

use crate::error::{DatabaseError, StorageError};
use crate::mail::model::{AttachmentMeta, MailAddress, MailRecord};

/// Blob storage addressed by `(bucket, key)`.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store (or overwrite) an object.
    async fn put(&self, bucket: &str, key: &str, data: Vec<u8>) -> Result<(), StorageError>;

    /// Fetch an object. Missing objects are `StorageError::NotFound`.
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Server-side copy. Fails with `NotFound` if the source is missing.
    async fn copy(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> Result<(), StorageError>;

    /// Delete an object. Deleting a missing object succeeds.
    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StorageError>;

    /// List keys under a prefix, sorted.
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StorageError>;
}

/// Record storage for mailbox addresses and mail metadata.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Addresses ───────────────────────────────────────────────────

    /// Point lookup by (already normalized) address.
    async fn get_address(&self, address: &str) -> Result<Option<MailAddress>, DatabaseError>;

    /// Create an address if absent. Returns `false` if it already existed.
    async fn create_address(&self, address: &MailAddress) -> Result<bool, DatabaseError>;

    /// Delete an address record.
    async fn delete_address(&self, address: &str) -> Result<(), DatabaseError>;

    // ── Mail ────────────────────────────────────────────────────────

    /// Get one mail record by composite key.
    async fn get_mail(
        &self,
        destination: &str,
        message_id: &str,
    ) -> Result<Option<MailRecord>, DatabaseError>;

    /// Insert a mail record unless one already exists for its key.
    /// Returns `false` when an existing record was left untouched.
    async fn create_mail_if_absent(&self, record: &MailRecord) -> Result<bool, DatabaseError>;

    /// Replace the attachments list of an existing record.
    async fn set_attachments(
        &self,
        destination: &str,
        message_id: &str,
        attachments: &[AttachmentMeta],
    ) -> Result<(), DatabaseError>;

    /// Set the summary text of an existing record.
    async fn set_summary(
        &self,
        destination: &str,
        message_id: &str,
        summary: &str,
    ) -> Result<(), DatabaseError>;

    /// Flag an existing record as fully processed.
    async fn mark_processed(&self, destination: &str, message_id: &str)
    -> Result<(), DatabaseError>;

    /// Flag an existing record as read.
    async fn mark_read(&self, destination: &str, message_id: &str) -> Result<(), DatabaseError>;

    /// All records for a destination, newest timestamp first.
    async fn list_mail(&self, destination: &str) -> Result<Vec<MailRecord>, DatabaseError>;

    /// Delete one record. Returns whether it existed.
    async fn delete_mail(&self, destination: &str, message_id: &str)
    -> Result<bool, DatabaseError>;
}
