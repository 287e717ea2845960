//! Stratum - a hierarchical memory store with write-admission control,
//! tiered retrieval, and background consolidation.

pub mod auth;
pub mod concurrency;
pub mod config;
pub mod consolidation;
pub mod embedding;
pub mod error;
pub mod guard;
pub mod http;
pub mod llm;
pub mod mcp;
pub mod memory;
pub mod observability;
pub mod retrieval;
pub mod storage;
pub mod types;
pub mod vitality;

pub use error::{Result, StratumError};
pub use storage::Store;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
