//! Admission filter: decides whether the receipt service should keep a message.
//!
//! Runs synchronously on the receipt path, before any pipeline work. The
//! filter never fails: lookup errors resolve to `STOP_RULE_SET`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::mail::event::ReceiptEvent;
use crate::mail::model::normalize_address;
use crate::store::MetadataStore;

/// Verdict returned to the receipt service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Disposition {
    #[serde(rename = "CONTINUE")]
    Continue,
    #[serde(rename = "STOP_RULE_SET")]
    Stop,
}

/// Wire body of the admission hook response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionResponse {
    pub disposition: Disposition,
}

impl From<Disposition> for AdmissionResponse {
    fn from(disposition: Disposition) -> Self {
        Self { disposition }
    }
}

pub struct AdmissionFilter {
    store: Arc<dyn MetadataStore>,
}

impl AdmissionFilter {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self { store }
    }

    /// Continue iff a mailbox exists for the recipient with a non-empty address.
    pub async fn check_recipient(&self, recipient: &str) -> Disposition {
        let address = normalize_address(recipient);
        if address.is_empty() {
            return Disposition::Stop;
        }

        match self.store.get_address(&address).await {
            Ok(Some(record)) if !record.address.is_empty() => {
                info!(recipient = %address, "Recipient admitted");
                Disposition::Continue
            }
            Ok(_) => {
                info!(recipient = %address, "Unknown recipient, stopping receipt");
                Disposition::Stop
            }
            Err(e) => {
                warn!(recipient = %address, error = %e, "Address lookup failed, stopping receipt");
                Disposition::Stop
            }
        }
    }

    /// Evaluate a receipt event. Only the first recipient of the first record counts.
    pub async fn evaluate(&self, event: &ReceiptEvent) -> AdmissionResponse {
        let disposition = match event.first_recipient() {
            Some(recipient) => self.check_recipient(recipient).await,
            None => {
                warn!("Receipt event has no recipient, stopping receipt");
                Disposition::Stop
            }
        };
        disposition.into()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::error::DatabaseError;
    use crate::mail::model::{AttachmentMeta, MailAddress, MailRecord};
    use crate::store::LibSqlMetadataStore;

    async fn filter_with(addresses: &[&str]) -> AdmissionFilter {
        let store = LibSqlMetadataStore::new_memory().await.unwrap();
        for address in addresses {
            store
                .create_address(&MailAddress::new(address, "owner", false))
                .await
                .unwrap();
        }
        AdmissionFilter::new(Arc::new(store))
    }

    fn event(recipients: &[&str]) -> ReceiptEvent {
        let body = serde_json::json!({
            "Records": [{ "ses": { "mail": { "destination": recipients } } }]
        });
        serde_json::from_value(body).unwrap()
    }

    #[tokio::test]
    async fn known_recipient_continues_regardless_of_case() {
        let filter = filter_with(&["a@x.com"]).await;
        assert_eq!(filter.check_recipient("A@X.com").await, Disposition::Continue);
        assert_eq!(
            filter.evaluate(&event(&["a@x.com"])).await.disposition,
            Disposition::Continue
        );
    }

    #[tokio::test]
    async fn unknown_or_missing_recipient_stops() {
        let filter = filter_with(&["a@x.com"]).await;
        assert_eq!(filter.check_recipient("b@x.com").await, Disposition::Stop);
        assert_eq!(filter.check_recipient("  ").await, Disposition::Stop);
        assert_eq!(
            filter.evaluate(&ReceiptEvent::default()).await.disposition,
            Disposition::Stop
        );
    }

    #[tokio::test]
    async fn only_first_recipient_is_evaluated() {
        let filter = filter_with(&["a@x.com"]).await;
        let response = filter.evaluate(&event(&["b@x.com", "a@x.com"])).await;
        assert_eq!(response.disposition, Disposition::Stop);
    }

    /// Store whose every call fails.
    struct BrokenStore;

    #[async_trait]
    impl MetadataStore for BrokenStore {
        async fn run_migrations(&self) -> Result<(), DatabaseError> {
            Ok(())
        }
        async fn get_address(&self, _: &str) -> Result<Option<MailAddress>, DatabaseError> {
            Err(DatabaseError::Throttled("busy".into()))
        }
        async fn create_address(&self, _: &MailAddress) -> Result<bool, DatabaseError> {
            unimplemented!()
        }
        async fn delete_address(&self, _: &str) -> Result<(), DatabaseError> {
            unimplemented!()
        }
        async fn get_mail(&self, _: &str, _: &str) -> Result<Option<MailRecord>, DatabaseError> {
            unimplemented!()
        }
        async fn create_mail_if_absent(&self, _: &MailRecord) -> Result<bool, DatabaseError> {
            unimplemented!()
        }
        async fn set_attachments(
            &self,
            _: &str,
            _: &str,
            _: &[AttachmentMeta],
        ) -> Result<(), DatabaseError> {
            unimplemented!()
        }
        async fn set_summary(&self, _: &str, _: &str, _: &str) -> Result<(), DatabaseError> {
            unimplemented!()
        }
        async fn mark_processed(&self, _: &str, _: &str) -> Result<(), DatabaseError> {
            unimplemented!()
        }
        async fn mark_read(&self, _: &str, _: &str) -> Result<(), DatabaseError> {
            unimplemented!()
        }
        async fn list_mail(&self, _: &str) -> Result<Vec<MailRecord>, DatabaseError> {
            unimplemented!()
        }
        async fn delete_mail(&self, _: &str, _: &str) -> Result<bool, DatabaseError> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn lookup_errors_fail_safe_to_stop() {
        let filter = AdmissionFilter::new(Arc::new(BrokenStore));
        assert_eq!(filter.check_recipient("a@x.com").await, Disposition::Stop);
    }

    #[test]
    fn disposition_wire_names() {
        let json = serde_json::to_value(AdmissionResponse::from(Disposition::Stop)).unwrap();
        assert_eq!(json, serde_json::json!({ "disposition": "STOP_RULE_SET" }));
        let json = serde_json::to_value(AdmissionResponse::from(Disposition::Continue)).unwrap();
        assert_eq!(json["disposition"], "CONTINUE");
    }
}
