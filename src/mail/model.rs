//! Persisted records: mailbox addresses, received mail and attachment metadata.

use serde::{Deserialize, Serialize};

/// A registered disposable mailbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailAddress {
    /// Lowercased address, globally unique.
    pub address: String,
    /// Principal that owns the mailbox. Immutable once created.
    pub user_sub: String,
    /// Whether incoming mail should get an AI summary.
    #[serde(default)]
    pub summarize_emails: bool,
}

impl MailAddress {
    pub fn new(address: &str, user_sub: impl Into<String>, summarize_emails: bool) -> Self {
        Self {
            address: normalize_address(address),
            user_sub: user_sub.into(),
            summarize_emails,
        }
    }
}

/// Case-normalize an address for use as a primary key.
pub fn normalize_address(address: &str) -> String {
    address.trim().to_lowercase()
}

/// Subset of message headers captured at receipt time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommonHeaders {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub from: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub to: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cc: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_path: Option<String>,
}

/// Metadata for one attachment extracted from a stored message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentMeta {
    pub filename: String,
    #[serde(rename = "Content-Type")]
    pub content_type: String,
    #[serde(rename = "Content-Transfer-Encoding", default)]
    pub transfer_encoding: Option<String>,
    #[serde(rename = "Content-ID", default)]
    pub content_id: Option<String>,
    #[serde(rename = "X-Attachment-Id", default)]
    pub attachment_id: Option<String>,
}

/// Metadata entry for one received message, keyed by `(destination, message_id)`.
///
/// `attachments == None` means extraction has not run yet; `Some(vec![])`
/// means it ran and found nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailRecord {
    pub destination: String,
    #[serde(rename = "messageId")]
    pub message_id: String,
    pub timestamp: String,
    pub source: String,
    #[serde(rename = "commonHeaders", default)]
    pub common_headers: CommonHeaders,
    #[serde(rename = "bucketName")]
    pub bucket_name: String,
    #[serde(rename = "bucketObjectKey")]
    pub bucket_object_key: String,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub is_processed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<AttachmentMeta>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary_text: Option<String>,
}
