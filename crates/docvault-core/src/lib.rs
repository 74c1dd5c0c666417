//! DocVault core: models, chunking, keyword extraction, rank fusion,
//! storage traits, and in-memory store implementations.
//!
//! This crate contains the algorithmic heart of DocVault with no database,
//! HTTP, or runtime dependencies. The application crate (`docvault`) plugs
//! SQLite, filesystem, and HTTP implementations into the traits defined
//! here.

pub mod backoff;
pub mod chunk;
pub mod error;
pub mod fusion;
pub mod keywords;
pub mod models;
pub mod services;
pub mod store;
pub mod vectors;
