//! In-memory document storage backend for docstore.
//!
//! This crate provides a thread-safe, in-memory implementation of the `StoreBackend` trait.
//! It uses async-aware read-write locks for concurrent access and is intended for
//! development, tests, and small embedded datasets.
//!
//! # Features
//!
//! - **Thread-safe access** - Concurrent reads and writes using async-aware RwLock
//! - **Full query support** - Dotted-path filters, sorting, offsets, limits and projections
//! - **Updates** - `$set`, `$unset`, `$inc`, `$push` and `$rename` semantics
//! - **Aggregation** - Match, group, sort, limit, skip, project, unwind and count stages
//! - **Transactions** - Snapshot isolation with write-conflict detection on commit
//!
//! # Quick Start
//!
//! ```ignore
//! use docstore::{prelude::*, memory::InMemoryStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = DocumentStoreClient::connect(InMemoryStore::builder()).await?;
//!     let restaurants = client.collection("restaurants");
//!
//!     restaurants.insert_one(doc! { "name": "Nick's", "borough": "Brooklyn" }).await?;
//!     let found = restaurants.find_many(Filter::eq("borough", "Brooklyn")).await?;
//!     assert_eq!(found.total_count, 1);
//!
//!     client.shutdown().await?;
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docstore_memory;

mod evaluator;
mod path;
mod pipeline;
mod projection;
mod update;

pub mod store;

pub use store::{InMemoryStore, InMemoryStoreBuilder, MemorySession};
