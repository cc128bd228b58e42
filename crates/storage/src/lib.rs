//! Conversation and message persistence.
//!
//! The engine only depends on the [`MessageStore`] trait. [`MemoryStore`] is
//! the in-process implementation used by the CLI and the test suites.

pub mod error;
pub mod memory;
pub mod store;

pub use error::StorageError;
pub use memory::MemoryStore;
pub use store::{Conversation, MessageStore, NewMessage, StoredMessage};
