//! Object-store key layout for stored messages.
//!
//! ```text
//! {namespace}/{destination}/{message_id}/{message_id}.eml
//! {namespace}/{destination}/{message_id}/attachments/{filename}
//! ```
//!
//! Read and delete paths depend on this layout, so it must stay stable.

/// Default key namespace.
pub const DEFAULT_NAMESPACE: &str = "stored_emails";

/// Key builder bound to one namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyLayout {
    namespace: String,
}

impl Default for KeyLayout {
    fn default() -> Self {
        Self::new(DEFAULT_NAMESPACE)
    }
}

impl KeyLayout {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into().trim_matches('/').to_string(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Prefix shared by the raw message and all of its attachments.
    pub fn message_prefix(&self, destination: &str, message_id: &str) -> String {
        format!("{}/{}/{}/", self.namespace, destination, message_id)
    }

    /// Canonical key of the raw (later attachment-stripped) message.
    pub fn message_key(&self, destination: &str, message_id: &str) -> String {
        format!(
            "{}{}.eml",
            self.message_prefix(destination, message_id),
            message_id
        )
    }

    /// Key of one extracted attachment.
    pub fn attachment_key(&self, destination: &str, message_id: &str, filename: &str) -> String {
        format!(
            "{}attachments/{}",
            self.message_prefix(destination, message_id),
            filename
        )
    }

    /// Key of the debug copy kept next to the canonical message.
    pub fn original_copy_key(&self, destination: &str, message_id: &str) -> String {
        format!("{}.original", self.message_key(destination, message_id))
    }
}
