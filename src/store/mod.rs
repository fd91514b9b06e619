//! Persistence layer: blob storage for raw documents and attachments,
//! libSQL-backed records for addresses and mail metadata.

pub mod libsql_backend;
pub mod memory;
pub mod migrations;
pub mod objects;
pub mod traits;

#[cfg(test)]
pub(crate) mod testing;

pub use libsql_backend::LibSqlMetadataStore;
pub use memory::InMemoryObjectStore;
pub use objects::FsObjectStore;
pub use traits::{MetadataStore, ObjectStore};
