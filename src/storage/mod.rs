//! Storage engine for Stratum: an embedded SQLite store with file-based,
//! checksum-verified migrations and a process-safe migration lock.

mod connection;
mod migrations;
pub mod queries;
pub mod runtime_meta;

pub use connection::Store;
pub use migrations::{run_migrations, MigrationError};
