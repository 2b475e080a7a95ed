//! A typed, connection-managed client layer for document databases.
//!
//! This crate is the core of the docstore project and provides:
//!
//! - **Documents** ([`document`]) - Key handling and serialization helpers
//! - **Queries** ([`query`]) - Filter expressions, projections, sorts and limits
//! - **Updates** ([`update`]) - Field-update operators
//! - **Pipelines** ([`pipeline`]) - Aggregation stages and accumulators
//! - **Backends** ([`backend`]) - The driver-level trait concrete stores implement
//! - **Client** ([`client`]) - Connection lifecycle and transactions
//! - **Collections** ([`collection`]) - The CRUD and aggregation operations
//! - **Results** ([`outcome`]) - Structured counts returned by operations
//! - **Errors** ([`error`]) - The error taxonomy
//! - **Configuration** ([`config`]) - Endpoint and database settings
//!
//! # Example
//!
//! ```ignore
//! use docstore::prelude::*;
//!
//! let client = DocumentStoreClient::connect(builder).await?;
//! let restaurants = client.collection("restaurants");
//!
//! let key = restaurants.insert_one(doc! { "name": "Nick's", "borough": "Brooklyn" }).await?;
//! let found = restaurants.find_one(Filter::key(key)).await?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as docstore_core;

pub mod backend;
pub mod client;
pub mod collection;
pub mod config;
pub mod document;
pub mod error;
pub mod outcome;
pub mod pipeline;
pub mod query;
pub mod transaction;
pub mod update;
