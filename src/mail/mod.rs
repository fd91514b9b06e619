//! Mail domain: persisted records, inbound event shapes, key layout and MIME helpers.

pub mod event;
pub mod keys;
pub mod mime;
pub mod model;

pub use event::{InboundNotification, ReceiptEvent, parse_notifications};
pub use keys::KeyLayout;
pub use model::{AttachmentMeta, CommonHeaders, MailAddress, MailRecord, normalize_address};
