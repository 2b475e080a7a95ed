//! MongoDB backend implementation for docstore.
//!
//! This crate provides a MongoDB-based implementation of the `StoreBackend` trait, translating
//! docstore filters, updates and pipelines into MongoDB's query language.
//!
//! To use this backend, include the `mongodb` feature in your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! docstore = { version = "x.y.z", features = ["mongodb"] }
//! ```
//!
//! # Features
//!
//! - **Persistent storage** - Data lives in MongoDB Atlas or a self-hosted deployment
//! - **Full query support** - Filters, projections, sorts and aggregations run server-side
//! - **Transactions** - Each transaction runs in its own driver session
//! - **Stable API** - Server API version 1 is pinned in strict mode unless disabled
//!
//! # Connection
//!
//! The connection string always comes from configuration, either directly through
//! [`MongoDbStore::builder`] or from a [`ClientConfig`](docstore_core::config::ClientConfig)
//! through [`MongoDbStoreBuilder::from_config`].
//!
//! # Example
//!
//! ```ignore
//! use docstore::{prelude::*, config::ClientConfig, mongodb::MongoDbStoreBuilder};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::from_env()?;
//!     let client = DocumentStoreClient::connect(MongoDbStoreBuilder::from_config(&config)).await?;
//!
//!     client.shutdown().await?;
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docstore_mongodb;

mod error;
mod pipeline;
mod query;

pub mod store;

pub use store::{MongoDbStore, MongoDbStoreBuilder};
