pub mod api;
pub mod assembler;
pub mod config;
pub mod error;
pub mod ingestion;
pub mod query;
pub mod store;

pub const BYTES_IN_1MB: usize = 1_000_000;
