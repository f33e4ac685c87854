//! Infrastructure adapters for external systems.

pub mod artifacts;
pub mod documents;
pub mod intelligence;
pub mod sqlite;
