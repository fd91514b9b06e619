//! Mailbox operations used by the read/manage surface.
//!
//! Owner checks are the caller's job; these functions only enforce data
//! invariants (normalized unique addresses, blob/record cascade on delete).

use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::{info, warn};

use crate::error::AddressError;
use crate::mail::keys::KeyLayout;
use crate::mail::model::{MailAddress, MailRecord, normalize_address};
use crate::store::{MetadataStore, ObjectStore};

static ADDRESS_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[_a-z0-9-]+(\.[_a-z0-9-]+)*@[a-z0-9-]+(\.[a-z0-9-]+)*(\.[a-z]{2,4})$")
        .expect("valid regex")
});

/// A stored message together with its raw document.
#[derive(Debug, Clone)]
pub struct OpenedMail {
    pub record: MailRecord,
    pub raw: Vec<u8>,
}

pub struct MailboxService {
    objects: Arc<dyn ObjectStore>,
    metadata: Arc<dyn MetadataStore>,
    layout: KeyLayout,
    /// Domain new addresses must belong to, lowercased.
    domain: Option<String>,
}

impl MailboxService {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
        layout: KeyLayout,
    ) -> Self {
        Self {
            objects,
            metadata,
            layout,
            domain: None,
        }
    }

    pub fn with_domain(mut self, domain: Option<String>) -> Self {
        self.domain = domain.map(|d| d.trim().to_lowercase());
        self
    }

    /// Check syntax and, when configured, the domain of an address.
    pub fn validate_address(&self, address: &str) -> Result<String, AddressError> {
        let address = normalize_address(address);
        if !ADDRESS_PATTERN.is_match(&address) {
            return Err(AddressError::Invalid(address));
        }
        if let Some(domain) = &self.domain {
            let actual = address.rsplit_once('@').map(|(_, d)| d);
            if actual != Some(domain.as_str()) {
                return Err(AddressError::Invalid(format!(
                    "{address} is not in domain {domain}"
                )));
            }
        }
        Ok(address)
    }

    /// Register a new mailbox for `owner`.
    pub async fn register_address(
        &self,
        address: &str,
        owner: &str,
        summarize: bool,
    ) -> Result<MailAddress, AddressError> {
        let address = self.validate_address(address)?;
        if self.metadata.get_address(&address).await?.is_some() {
            return Err(AddressError::AlreadyExists(address));
        }

        let record = MailAddress::new(&address, owner, summarize);
        if !self.metadata.create_address(&record).await? {
            // Lost a race with a concurrent registration.
            return Err(AddressError::AlreadyExists(address));
        }
        info!(address = %record.address, summarize, "Address registered");
        Ok(record)
    }

    /// All messages for an address, newest first.
    pub async fn list_mail(&self, address: &str) -> Result<Vec<MailRecord>, AddressError> {
        Ok(self.metadata.list_mail(&normalize_address(address)).await?)
    }

    /// Fetch a message and its document, marking it read on first open.
    pub async fn open_mail(
        &self,
        address: &str,
        message_id: &str,
    ) -> Result<Option<OpenedMail>, AddressError> {
        let destination = normalize_address(address);
        let Some(mut record) = self.metadata.get_mail(&destination, message_id).await? else {
            return Ok(None);
        };

        let raw = self
            .objects
            .get(&record.bucket_name, &record.bucket_object_key)
            .await?;

        if !record.is_read {
            self.metadata.mark_read(&destination, message_id).await?;
            record.is_read = true;
        }
        Ok(Some(OpenedMail { record, raw }))
    }

    /// Delete one message: its document, attachments, then its record.
    /// Returns whether the record existed.
    pub async fn delete_mail(&self, address: &str, message_id: &str) -> Result<bool, AddressError> {
        let destination = normalize_address(address);
        let Some(record) = self.metadata.get_mail(&destination, message_id).await? else {
            return Ok(false);
        };

        self.delete_blobs(&record).await?;
        let existed = self.metadata.delete_mail(&destination, message_id).await?;
        info!(destination = %destination, message_id, "Mail deleted");
        Ok(existed)
    }

    /// Remove an address and everything received for it.
    ///
    /// Blob deletion is best effort; record deletion failures propagate.
    /// Returns the number of messages removed.
    pub async fn remove_address(&self, address: &str) -> Result<usize, AddressError> {
        let destination = normalize_address(address);
        let records = self.metadata.list_mail(&destination).await?;

        for record in &records {
            if let Err(e) = self.delete_blobs(record).await {
                warn!(
                    destination = %destination,
                    message_id = %record.message_id,
                    error = %e,
                    "Failed to delete stored objects, continuing"
                );
            }
            self.metadata
                .delete_mail(&destination, &record.message_id)
                .await?;
        }

        self.metadata.delete_address(&destination).await?;
        info!(address = %destination, removed = records.len(), "Address removed");
        Ok(records.len())
    }

    /// Delete the stored document and every object under the message prefix.
    async fn delete_blobs(&self, record: &MailRecord) -> Result<(), AddressError> {
        let bucket = &record.bucket_name;
        self.objects
            .delete(bucket, &record.bucket_object_key)
            .await?;

        let prefix = self
            .layout
            .message_prefix(&record.destination, &record.message_id);
        for key in self.objects.list(bucket, &prefix).await? {
            self.objects.delete(bucket, &key).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::model::CommonHeaders;
    use crate::error::StorageError;
    use crate::store::{FsObjectStore, InMemoryObjectStore, LibSqlMetadataStore};

    async fn service() -> (MailboxService, Arc<InMemoryObjectStore>, Arc<LibSqlMetadataStore>) {
        let objects = Arc::new(InMemoryObjectStore::new());
        let metadata = Arc::new(LibSqlMetadataStore::new_memory().await.unwrap());
        let service = MailboxService::new(objects.clone(), metadata.clone(), KeyLayout::default());
        (service, objects, metadata)
    }

    async fn seed_mail(
        objects: &InMemoryObjectStore,
        metadata: &LibSqlMetadataStore,
        message_id: &str,
        timestamp: &str,
    ) {
        let layout = KeyLayout::default();
        let key = layout.message_key("a@x.com", message_id);
        objects.put("inbox", &key, b"raw".to_vec()).await.unwrap();
        objects
            .put(
                "inbox",
                &layout.attachment_key("a@x.com", message_id, "f.txt"),
                b"att".to_vec(),
            )
            .await
            .unwrap();
        metadata
            .create_mail_if_absent(&MailRecord {
                destination: "a@x.com".into(),
                message_id: message_id.into(),
                timestamp: timestamp.into(),
                source: "bob@y.com".into(),
                common_headers: CommonHeaders::default(),
                bucket_name: "inbox".into(),
                bucket_object_key: key,
                is_read: false,
                is_processed: true,
                attachments: Some(vec![]),
                summary_text: None,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn register_validates_and_rejects_duplicates() {
        let (service, _, metadata) = service().await;
        let service = service.with_domain(Some("X.com".into()));

        let created = service.register_address("New.Box@x.com", "u1", true).await.unwrap();
        assert_eq!(created.address, "new.box@x.com");
        assert!(metadata.get_address("new.box@x.com").await.unwrap().is_some());

        let err = service.register_address("new.box@X.COM", "u2", false).await.unwrap_err();
        assert!(matches!(err, AddressError::AlreadyExists(_)));

        for bad in ["no-at-sign", "a@b", "a b@x.com", "box@other.com"] {
            let err = service.register_address(bad, "u1", false).await.unwrap_err();
            assert!(matches!(err, AddressError::Invalid(_)), "{bad} should be invalid");
        }
    }

    #[tokio::test]
    async fn open_marks_read_once() {
        let (service, objects, metadata) = service().await;
        seed_mail(&objects, &metadata, "m1", "2026-01-01T00:00:00Z").await;

        let opened = service.open_mail("A@x.com", "m1").await.unwrap().unwrap();
        assert_eq!(opened.raw, b"raw");
        assert!(opened.record.is_read);
        assert!(metadata.get_mail("a@x.com", "m1").await.unwrap().unwrap().is_read);

        assert!(service.open_mail("a@x.com", "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_mail_removes_blobs_and_record() {
        let (service, objects, metadata) = service().await;
        seed_mail(&objects, &metadata, "m1", "2026-01-01T00:00:00Z").await;

        assert!(service.delete_mail("a@x.com", "m1").await.unwrap());
        assert!(objects.is_empty().await);
        assert!(metadata.get_mail("a@x.com", "m1").await.unwrap().is_none());
        assert!(!service.delete_mail("a@x.com", "m1").await.unwrap());
    }

    #[tokio::test]
    async fn remove_address_cascades() {
        let (service, objects, metadata) = service().await;
        service.register_address("a@x.com", "u1", false).await.unwrap();
        seed_mail(&objects, &metadata, "m1", "2026-01-01T00:00:00Z").await;
        seed_mail(&objects, &metadata, "m2", "2026-02-01T00:00:00Z").await;

        let listed: Vec<_> = service
            .list_mail("a@x.com")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.message_id)
            .collect();
        assert_eq!(listed, vec!["m2", "m1"]);

        assert_eq!(service.remove_address("a@x.com").await.unwrap(), 2);
        assert!(objects.is_empty().await);
        assert!(metadata.list_mail("a@x.com").await.unwrap().is_empty());
        assert!(metadata.get_address("a@x.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_mail_on_filesystem_removes_tmp_named_attachments() {
        let dir = tempfile::tempdir().unwrap();
        let objects = Arc::new(FsObjectStore::new(dir.path()));
        let metadata = Arc::new(LibSqlMetadataStore::new_memory().await.unwrap());
        let service = MailboxService::new(objects.clone(), metadata.clone(), KeyLayout::default());

        let layout = KeyLayout::default();
        let key = layout.message_key("a@x.com", "m1");
        let attachment = layout.attachment_key("a@x.com", "m1", "backup.tmp");
        objects.put("inbox", &key, b"raw".to_vec()).await.unwrap();
        objects.put("inbox", &attachment, b"payload".to_vec()).await.unwrap();
        metadata
            .create_mail_if_absent(&MailRecord {
                destination: "a@x.com".into(),
                message_id: "m1".into(),
                timestamp: "2026-01-01T00:00:00Z".into(),
                source: "bob@y.com".into(),
                common_headers: CommonHeaders::default(),
                bucket_name: "inbox".into(),
                bucket_object_key: key.clone(),
                is_read: false,
                is_processed: true,
                attachments: None,
                summary_text: None,
            })
            .await
            .unwrap();

        assert!(service.delete_mail("a@x.com", "m1").await.unwrap());
        for gone in [&key, &attachment] {
            let err = objects.get("inbox", gone).await.unwrap_err();
            assert!(matches!(err, StorageError::NotFound { .. }), "{gone} survived");
        }
        assert!(objects.list("inbox", "").await.unwrap().is_empty());
    }
}
