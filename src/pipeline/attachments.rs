//! Extraction stage: persist attachment parts and shrink the stored document.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::StageError;
use crate::mail::keys::KeyLayout;
use crate::mail::mime;
use crate::pipeline::context::PipelineContext;
use crate::pipeline::orchestrator::{Stage, StageKind};
use crate::store::{MetadataStore, ObjectStore};

pub struct ExtractAttachmentsStage {
    objects: Arc<dyn ObjectStore>,
    metadata: Arc<dyn MetadataStore>,
    layout: KeyLayout,
}

impl ExtractAttachmentsStage {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
        layout: KeyLayout,
    ) -> Self {
        Self {
            objects,
            metadata,
            layout,
        }
    }
}

#[async_trait]
impl Stage for ExtractAttachmentsStage {
    fn kind(&self) -> StageKind {
        StageKind::ExtractAttachments
    }

    async fn run(&self, mut ctx: PipelineContext) -> Result<PipelineContext, StageError> {
        let stored = ctx.stored_object()?.clone();
        let raw = self.objects.get(&stored.bucket, &stored.key).await?;
        let extraction = mime::extract_attachments(&raw, &stored.key)?;

        let mut metas = Vec::with_capacity(extraction.attachments.len());
        for attachment in extraction.attachments {
            let key = self.layout.attachment_key(
                &ctx.destination,
                &ctx.message_id,
                &attachment.meta.filename,
            );
            debug!(
                key = %key,
                content_type = %attachment.meta.content_type,
                size = attachment.payload.len(),
                "Saving attachment"
            );
            self.objects
                .put(&stored.bucket, &key, attachment.payload)
                .await?;
            metas.push(attachment.meta);
        }

        // Rewritten even when nothing was extracted.
        self.objects
            .put(&stored.bucket, &stored.key, extraction.stripped)
            .await?;

        self.metadata
            .set_attachments(&ctx.destination, &ctx.message_id, &metas)
            .await?;

        info!(
            destination = %ctx.destination,
            message_id = %ctx.message_id,
            count = metas.len(),
            "Attachments extracted"
        );
        ctx.attachments = Some(metas);
        Ok(ctx)
    }
}
