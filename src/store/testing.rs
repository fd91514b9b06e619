//! Test doubles for the storage traits.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;

use crate::error::DatabaseError;
use crate::mail::model::{AttachmentMeta, MailAddress, MailRecord};
use crate::store::traits::MetadataStore;

/// Metadata store that throttles selected writes a set number of times
/// before delegating to the wrapped store.
pub(crate) struct FlakyMetadataStore {
    inner: Arc<dyn MetadataStore>,
    create_mail_failures: AtomicU32,
    mark_processed_failures: AtomicU32,
}

impl FlakyMetadataStore {
    pub(crate) fn new(inner: Arc<dyn MetadataStore>) -> Self {
        Self {
            inner,
            create_mail_failures: AtomicU32::new(0),
            mark_processed_failures: AtomicU32::new(0),
        }
    }

    pub(crate) fn failing_create_mail(self, times: u32) -> Self {
        self.create_mail_failures.store(times, Ordering::SeqCst);
        self
    }

    pub(crate) fn failing_mark_processed(self, times: u32) -> Self {
        self.mark_processed_failures.store(times, Ordering::SeqCst);
        self
    }
}

fn throttle(remaining: &AtomicU32, op: &str) -> Result<(), DatabaseError> {
    let took = remaining
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if took {
        Err(DatabaseError::Throttled(format!("{op} throttled")))
    } else {
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for FlakyMetadataStore {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        self.inner.run_migrations().await
    }

    async fn get_address(&self, address: &str) -> Result<Option<MailAddress>, DatabaseError> {
        self.inner.get_address(address).await
    }

    async fn create_address(&self, address: &MailAddress) -> Result<bool, DatabaseError> {
        self.inner.create_address(address).await
    }

    async fn delete_address(&self, address: &str) -> Result<(), DatabaseError> {
        self.inner.delete_address(address).await
    }

    async fn get_mail(
        &self,
        destination: &str,
        message_id: &str,
    ) -> Result<Option<MailRecord>, DatabaseError> {
        self.inner.get_mail(destination, message_id).await
    }

    async fn create_mail_if_absent(&self, record: &MailRecord) -> Result<bool, DatabaseError> {
        throttle(&self.create_mail_failures, "create_mail_if_absent")?;
        self.inner.create_mail_if_absent(record).await
    }

    async fn set_attachments(
        &self,
        destination: &str,
        message_id: &str,
        attachments: &[AttachmentMeta],
    ) -> Result<(), DatabaseError> {
        self.inner
            .set_attachments(destination, message_id, attachments)
            .await
    }

    async fn set_summary(
        &self,
        destination: &str,
        message_id: &str,
        summary: &str,
    ) -> Result<(), DatabaseError> {
        self.inner.set_summary(destination, message_id, summary).await
    }

    async fn mark_processed(
        &self,
        destination: &str,
        message_id: &str,
    ) -> Result<(), DatabaseError> {
        throttle(&self.mark_processed_failures, "mark_processed")?;
        self.inner.mark_processed(destination, message_id).await
    }

    async fn mark_read(&self, destination: &str, message_id: &str) -> Result<(), DatabaseError> {
        self.inner.mark_read(destination, message_id).await
    }

    async fn list_mail(&self, destination: &str) -> Result<Vec<MailRecord>, DatabaseError> {
        self.inner.list_mail(destination).await
    }

    async fn delete_mail(
        &self,
        destination: &str,
        message_id: &str,
    ) -> Result<bool, DatabaseError> {
        self.inner.delete_mail(destination, message_id).await
    }
}
