//! DocVault application crate.
//!
//! Wires SQLite stores, the filesystem blob store, external-service
//! providers, the processing queue, and the Axum HTTP API around the
//! engine logic in `docvault-core`.

pub mod answer;
pub mod blob;
pub mod config;
pub mod db;
pub mod dedup;
pub mod embedding;
pub mod extractor;
pub mod ingest;
pub mod migrate;
pub mod pipeline;
pub mod query;
pub mod queue;
pub mod server;
pub mod sqlite_store;
pub mod vector_index;
