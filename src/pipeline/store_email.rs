//! Store stage: move the raw message to its canonical key and create the record.
//!
//! Order is copy, record write (create-if-absent), then transient delete,
//! so a retry after any failure still finds its source. Once the transient
//! object is gone, a further retry fails with a terminal `NotFound`.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::StageError;
use crate::mail::keys::KeyLayout;
use crate::mail::model::MailRecord;
use crate::pipeline::context::{ObjectRef, PipelineContext};
use crate::pipeline::orchestrator::{Stage, StageKind};
use crate::store::{MetadataStore, ObjectStore};

pub struct StoreEmailStage {
    objects: Arc<dyn ObjectStore>,
    metadata: Arc<dyn MetadataStore>,
    layout: KeyLayout,
    keep_original_copy: bool,
}

impl StoreEmailStage {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
        layout: KeyLayout,
    ) -> Self {
        Self {
            objects,
            metadata,
            layout,
            keep_original_copy: false,
        }
    }

    /// Also keep a `{canonical}.original` copy of every received document.
    pub fn with_original_copy(mut self, keep: bool) -> Self {
        self.keep_original_copy = keep;
        self
    }
}

#[async_trait]
impl Stage for StoreEmailStage {
    fn kind(&self) -> StageKind {
        StageKind::StoreEmail
    }

    async fn run(&self, mut ctx: PipelineContext) -> Result<PipelineContext, StageError> {
        let bucket = ctx.receipt.bucket.clone();
        let canonical_key = self.layout.message_key(&ctx.destination, &ctx.message_id);

        info!(
            destination = %ctx.destination,
            message_id = %ctx.message_id,
            from = %ctx.receipt.key,
            to = %canonical_key,
            "Storing email"
        );

        self.objects
            .copy(&bucket, &ctx.receipt.key, &bucket, &canonical_key)
            .await?;

        if self.keep_original_copy {
            let original_key = self
                .layout
                .original_copy_key(&ctx.destination, &ctx.message_id);
            self.objects
                .copy(&bucket, &ctx.receipt.key, &bucket, &original_key)
                .await?;
            debug!(key = %original_key, "Kept original copy");
        }

        let record = MailRecord {
            destination: ctx.destination.clone(),
            message_id: ctx.message_id.clone(),
            timestamp: ctx.timestamp.clone(),
            source: ctx.source.clone(),
            common_headers: ctx.common_headers.clone(),
            bucket_name: bucket.clone(),
            bucket_object_key: canonical_key.clone(),
            is_read: false,
            is_processed: false,
            attachments: None,
            summary_text: None,
        };
        if !self.metadata.create_mail_if_absent(&record).await? {
            debug!(
                destination = %ctx.destination,
                message_id = %ctx.message_id,
                "Mail record already exists, keeping it"
            );
        }

        self.objects.delete(&bucket, &ctx.receipt.key).await?;

        ctx.stored = Some(ObjectRef {
            bucket,
            key: canonical_key,
        });
        Ok(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DatabaseError, StorageError};
    use crate::mail::model::CommonHeaders;
    use crate::store::testing::FlakyMetadataStore;
    use crate::store::{InMemoryObjectStore, LibSqlMetadataStore};

    fn context() -> PipelineContext {
        PipelineContext {
            destination: "a@x.com".into(),
            message_id: "m1".into(),
            timestamp: "2026-01-01T00:00:00Z".into(),
            source: "bob@y.com".into(),
            common_headers: CommonHeaders::default(),
            receipt: ObjectRef {
                bucket: "inbox".into(),
                key: "incoming/m1".into(),
            },
            stored: None,
            attachments: None,
            summary: None,
            processed: false,
        }
    }

    async fn setup() -> (Arc<InMemoryObjectStore>, Arc<LibSqlMetadataStore>) {
        let objects = Arc::new(InMemoryObjectStore::new());
        objects
            .put("inbox", "incoming/m1", b"raw message".to_vec())
            .await
            .unwrap();
        let metadata = Arc::new(LibSqlMetadataStore::new_memory().await.unwrap());
        (objects, metadata)
    }

    #[tokio::test]
    async fn moves_blob_and_creates_unprocessed_record() {
        let (objects, metadata) = setup().await;
        let stage = StoreEmailStage::new(objects.clone(), metadata.clone(), KeyLayout::default());

        let ctx = stage.run(context()).await.unwrap();
        let stored = ctx.stored.clone().unwrap();
        assert_eq!(stored.key, "stored_emails/a@x.com/m1/m1.eml");
        assert_eq!(objects.get("inbox", &stored.key).await.unwrap(), b"raw message");
        assert!(!objects.contains("inbox", "incoming/m1").await);

        let record = metadata.get_mail("a@x.com", "m1").await.unwrap().unwrap();
        assert!(!record.is_read);
        assert!(!record.is_processed);
        assert!(record.attachments.is_none());
        assert_eq!(record.bucket_object_key, stored.key);
    }

    #[tokio::test]
    async fn keeps_original_copy_when_enabled() {
        let (objects, metadata) = setup().await;
        let stage = StoreEmailStage::new(objects.clone(), metadata, KeyLayout::default())
            .with_original_copy(true);

        stage.run(context()).await.unwrap();
        assert!(
            objects
                .contains("inbox", "stored_emails/a@x.com/m1/m1.eml.original")
                .await
        );
    }

    #[tokio::test]
    async fn rerun_after_success_is_terminal_not_found() {
        let (objects, metadata) = setup().await;
        let stage = StoreEmailStage::new(objects, metadata.clone(), KeyLayout::default());

        stage.run(context()).await.unwrap();
        let err = stage.run(context()).await.unwrap_err();
        assert!(matches!(err, StageError::Storage(StorageError::NotFound { .. })));
        assert!(!err.is_retryable());
        assert_eq!(metadata.list_mail("a@x.com").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_record_write_keeps_source_for_retry() {
        let (objects, metadata) = setup().await;
        let flaky = Arc::new(FlakyMetadataStore::new(metadata.clone()).failing_create_mail(1));
        let stage = StoreEmailStage::new(objects.clone(), flaky, KeyLayout::default());

        let err = stage.run(context()).await.unwrap_err();
        assert!(matches!(err, StageError::Database(DatabaseError::Throttled(_))));
        assert!(err.is_retryable());
        assert!(objects.contains("inbox", "incoming/m1").await);
        assert!(metadata.get_mail("a@x.com", "m1").await.unwrap().is_none());

        let ctx = stage.run(context()).await.unwrap();
        assert!(ctx.stored.is_some());
        assert!(!objects.contains("inbox", "incoming/m1").await);
        assert_eq!(metadata.list_mail("a@x.com").await.unwrap().len(), 1);
    }
}
