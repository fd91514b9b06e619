//! Email Catcher: disposable mailbox service core.

pub mod admission;
pub mod config;
pub mod error;
pub mod llm;
pub mod mail;
pub mod mailbox;
pub mod pipeline;
pub mod server;
pub mod store;
