//! # Infrastructure Adapters
//!
//! Infrastructure implementations of the dead-letter store interface.

pub mod filesystem_dead_letter;
pub mod memory_dead_letter;

pub use filesystem_dead_letter::FilesystemDeadLetterStore;
pub use memory_dead_letter::InMemoryDeadLetterStore;
