//! Main docstore crate providing a unified interface to document databases.
//!
//! This crate is the primary entry point for users of docstore. It re-exports the core
//! types from the sub-crates and provides access to the storage backends.
//!
//! # Features
//!
//! - **Managed connections** - One long-lived connection per client, released only after
//!   in-flight operations settle
//! - **CRUD and aggregation** - Filters, projections, sorts, updates and pipelines as typed
//!   values instead of raw query documents
//! - **Transactions** - Explicit session binding with commit-or-abort semantics
//! - **Multiple backends** - In-memory and MongoDB storage behind one trait
//!
//! # Quick Start
//!
//! ```ignore
//! use docstore::{prelude::*, memory::InMemoryStore};
//! use futures::FutureExt;
//!
//! #[tokio::main]
//! async fn main() -> DocumentStoreResult<()> {
//!     let client = DocumentStoreClient::connect(InMemoryStore::builder()).await?;
//!
//!     client
//!         .run_scoped(|client| {
//!             async move {
//!                 let restaurants = client.collection("restaurants");
//!
//!                 restaurants
//!                     .insert_many(vec![
//!                         doc! { "name": "Nick's", "borough": "Brooklyn", "cuisine": "Pizza" },
//!                         doc! { "name": "Tony's", "borough": "Brooklyn", "cuisine": "Pizza" },
//!                     ])
//!                     .await?;
//!
//!                 let by_cuisine = restaurants
//!                     .aggregate(
//!                         Pipeline::new()
//!                             .filter(Filter::eq("borough", "Brooklyn"))
//!                             .group(Group::by("cuisine").count("count"))
//!                             .sort("count", SortDirection::Desc),
//!                     )
//!                     .await?;
//!
//!                 println!("{by_cuisine:?}");
//!                 Ok(())
//!             }
//!             .boxed()
//!         })
//!         .await
//! }
//! ```
//!
//! # Transactions
//!
//! ```ignore
//! client
//!     .run_transaction(|tx| {
//!         async move {
//!             tx.collection("restaurants")
//!                 .update_one(Filter::key(first), Update::new().set("name", "New Restaurant Name"))
//!                 .await?;
//!
//!             let deleted = tx.collection("restaurants").delete_one(Filter::key(second)).await?;
//!             if deleted.deleted_count == 0 {
//!                 return Err(DocumentStoreError::Query("nothing to delete".into()));
//!             }
//!             Ok(())
//!         }
//!         .boxed()
//!     })
//!     .await?;
//! ```
//!
//! # Backends
//!
//! - [`memory`] - In-memory storage for development and testing
//! - `mongodb` - MongoDB backend (requires the `mongodb` feature)

pub mod prelude;

pub use docstore_core::{
    backend, client, collection, config, document, error, outcome, pipeline, query, transaction,
    update,
};

// Re-export BSON types for convenience
pub use bson;

/// In-memory storage backend implementations.
pub mod memory {
    pub use docstore_memory::{InMemoryStore, InMemoryStoreBuilder, MemorySession};
}

/// MongoDB storage backend implementations.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use docstore_mongodb::{MongoDbStore, MongoDbStoreBuilder};

    use docstore_core::{client::DocumentStoreClient, config::ClientConfig, error::DocumentStoreResult};

    /// Connects to the MongoDB deployment described by `config` and verifies it answers.
    pub async fn connect(config: &ClientConfig) -> DocumentStoreResult<DocumentStoreClient<MongoDbStore>> {
        DocumentStoreClient::connect(MongoDbStoreBuilder::from_config(config)).await
    }
}
