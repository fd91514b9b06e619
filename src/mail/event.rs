//! Inbound event shapes delivered by the mail-receipt service.
//!
//! Two hooks exist: a synchronous receipt event used for admission, and an
//! asynchronous notification (optionally wrapped in a topic envelope) that
//! starts one pipeline execution.

use serde::{Deserialize, Serialize};

use crate::error::MailError;
use crate::mail::model::CommonHeaders;

/// Notification describing a message that has been written to transient storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundNotification {
    pub mail: MailInfo,
    pub receipt: Receipt,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailInfo {
    #[serde(default)]
    pub destination: Vec<String>,
    pub message_id: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub common_headers: CommonHeaders,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub action: ReceiptAction,
}

/// Where the receipt service dropped the raw message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptAction {
    pub bucket_name: String,
    pub object_key: String,
}

impl InboundNotification {
    /// First recipient. Only the first one is ever processed.
    pub fn primary_destination(&self) -> Option<&str> {
        self.mail
            .destination
            .first()
            .map(String::as_str)
            .filter(|d| !d.trim().is_empty())
    }
}

// ── Admission event ─────────────────────────────────────────────────

/// Synchronous receipt-rule event handed to the admission filter.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReceiptEvent {
    #[serde(rename = "Records", default)]
    pub records: Vec<ReceiptRecord>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReceiptRecord {
    pub ses: ReceiptRecordPayload,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReceiptRecordPayload {
    pub mail: ReceiptMail,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReceiptMail {
    #[serde(default)]
    pub destination: Vec<String>,
}

impl ReceiptEvent {
    /// Recipient of the first record, if any.
    pub fn first_recipient(&self) -> Option<&str> {
        self.records
            .first()
            .and_then(|r| r.ses.mail.destination.first())
            .map(String::as_str)
    }
}

// ── Topic envelope ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TopicEnvelope {
    #[serde(rename = "Records")]
    records: Vec<TopicRecord>,
}

#[derive(Debug, Deserialize)]
struct TopicRecord {
    #[serde(rename = "Sns")]
    sns: TopicMessage,
}

#[derive(Debug, Deserialize)]
struct TopicMessage {
    #[serde(rename = "Message")]
    message: String,
}

/// Parse an incoming-mail hook body.
///
/// Accepts either a topic envelope whose records carry JSON-encoded
/// notifications, or a bare notification object.
pub fn parse_notifications(body: &[u8]) -> Result<Vec<InboundNotification>, MailError> {
    let value: serde_json::Value = serde_json::from_slice(body)?;

    if value.get("Records").is_some() {
        let envelope: TopicEnvelope = serde_json::from_value(value)?;
        if envelope.records.is_empty() {
            return Err(MailError::MalformedNotification(
                "envelope has no records".into(),
            ));
        }
        return envelope
            .records
            .into_iter()
            .map(|r| serde_json::from_str(&r.sns.message).map_err(MailError::from))
            .collect();
    }

    let notification: InboundNotification = serde_json::from_value(value)?;
    Ok(vec![notification])
}
