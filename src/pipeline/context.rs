//! Execution context threaded through the pipeline stages.
//!
//! Each stage receives the full context and returns it enriched; no field
//! is dropped between stages. The context is ephemeral and distinct from
//! the persisted `MailRecord`.

use serde::{Deserialize, Serialize};

use crate::error::MailError;
use crate::mail::event::InboundNotification;
use crate::mail::model::{AttachmentMeta, CommonHeaders, normalize_address};

/// Location of a blob in the object store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRef {
    pub bucket: String,
    pub key: String,
}

/// Result of the best-effort summarization sub-operation.
///
/// Kept apart from stage success: a `Failed` outcome still completes the stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SummaryOutcome {
    /// The mailbox did not ask for summaries (or no longer exists).
    Skipped,
    Completed { text: String },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineContext {
    /// Lowercased first recipient.
    pub destination: String,
    pub message_id: String,
    pub timestamp: String,
    pub source: String,
    pub common_headers: CommonHeaders,
    /// Where the receipt service dropped the raw message.
    pub receipt: ObjectRef,
    /// Canonical location, set by the store stage.
    pub stored: Option<ObjectRef>,
    /// Set by the extraction stage.
    pub attachments: Option<Vec<AttachmentMeta>>,
    /// Set by the summarization stage.
    pub summary: Option<SummaryOutcome>,
    pub processed: bool,
}

impl PipelineContext {
    /// Canonical blob location, failing if the store stage has not run.
    pub fn stored_object(&self) -> Result<&ObjectRef, MailError> {
        self.stored
            .as_ref()
            .ok_or(MailError::MissingField("stored object location"))
    }
}

impl TryFrom<&InboundNotification> for PipelineContext {
    type Error = MailError;

    fn try_from(notification: &InboundNotification) -> Result<Self, Self::Error> {
        let destination = notification
            .primary_destination()
            .map(normalize_address)
            .ok_or(MailError::MissingField("mail.destination"))?;

        let mail = &notification.mail;
        if mail.message_id.trim().is_empty() {
            return Err(MailError::MissingField("mail.messageId"));
        }
        let action = &notification.receipt.action;
        if action.bucket_name.trim().is_empty() {
            return Err(MailError::MissingField("receipt.action.bucketName"));
        }
        if action.object_key.trim().is_empty() {
            return Err(MailError::MissingField("receipt.action.objectKey"));
        }

        Ok(Self {
            destination,
            message_id: mail.message_id.clone(),
            timestamp: mail.timestamp.clone(),
            source: mail.source.clone(),
            common_headers: mail.common_headers.clone(),
            receipt: ObjectRef {
                bucket: action.bucket_name.clone(),
                key: action.object_key.clone(),
            },
            stored: None,
            attachments: None,
            summary: None,
            processed: false,
        })
    }
}
