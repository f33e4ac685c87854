//! CLI command implementations.

pub mod init;
pub mod ledger;
pub mod project;
pub mod store;
