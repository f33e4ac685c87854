//! Legacy document store adapters.

pub mod json_file_store;
pub mod memory_store;

pub use json_file_store::JsonFileDocumentStore;
pub use memory_store::InMemoryDocumentStore;
