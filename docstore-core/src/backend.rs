//! Driver-level abstraction over a document database.
//!
//! # Overview
//!
//! The [`StoreBackend`] trait is the only seam between the client and a concrete store.
//! Every data operation receives `session: Option<&mut Self::Session>`: `None` runs the
//! operation on its own, `Some` binds it to an open transaction. The binding is therefore
//! visible in every call rather than captured implicitly.
//!
//! Backends perform exactly one remote interaction per call. Argument validation, key
//! generation, logging and connection gating happen in [`crate::client`], so backends stay
//! thin and interchangeable.
//!
//! # Traits
//!
//! - [`StoreBackend`]: The core trait for storage backends
//! - [`StoreBackendBuilder`]: Factory trait for creating backend instances

use async_trait::async_trait;
use bson::{Bson, Document};
use std::fmt::Debug;

use crate::{
    error::DocumentStoreResult,
    outcome::{DeleteOutcome, UpdateOutcome},
    pipeline::Pipeline,
    query::{Expr, Query},
    update::Update,
};

/// Abstract interface for document storage backends.
///
/// # Thread Safety
///
/// Implementations must be thread-safe and support concurrent access from multiple
/// async tasks.
///
/// # Error Handling
///
/// Implementations map their native failures onto the
/// [`DocumentStoreError`](crate::error::DocumentStoreError) taxonomy: unreachable or closed
/// stores are `Connection`, rejected operations are `Query`, key collisions are
/// `DuplicateKey`.
#[async_trait]
pub trait StoreBackend: Send + Sync + Debug {
    /// Server-side context binding operations into a transaction.
    type Session: Send;

    /// Verifies that the store is reachable.
    async fn ping(&self) -> DocumentStoreResult<()>;

    /// Returns the first document matching the query's filter (honoring sort and projection).
    async fn find_one(
        &self,
        collection: &str,
        query: &Query,
        session: Option<&mut Self::Session>,
    ) -> DocumentStoreResult<Option<Document>>;

    /// Returns every document matching the query, after sort, offset, limit and projection.
    async fn find(
        &self,
        collection: &str,
        query: &Query,
        session: Option<&mut Self::Session>,
    ) -> DocumentStoreResult<Vec<Document>>;

    /// Counts documents matching the filter.
    async fn count(
        &self,
        collection: &str,
        filter: &Expr,
        session: Option<&mut Self::Session>,
    ) -> DocumentStoreResult<u64>;

    /// Inserts one document. The document always carries its key; the key is returned.
    async fn insert_one(
        &self,
        collection: &str,
        document: Document,
        session: Option<&mut Self::Session>,
    ) -> DocumentStoreResult<Bson>;

    /// Inserts documents in order, stopping at the first failure.
    ///
    /// Every document carries its key. On failure after some documents were written the
    /// backend returns [`DocumentStoreError::PartialInsert`](crate::error::DocumentStoreError::PartialInsert).
    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Document>,
        session: Option<&mut Self::Session>,
    ) -> DocumentStoreResult<Vec<Bson>>;

    /// Applies `update` to the first document matching `filter`.
    async fn update_one(
        &self,
        collection: &str,
        filter: &Expr,
        update: &Update,
        session: Option<&mut Self::Session>,
    ) -> DocumentStoreResult<UpdateOutcome>;

    /// Applies `update` to every document matching `filter`.
    async fn update_many(
        &self,
        collection: &str,
        filter: &Expr,
        update: &Update,
        session: Option<&mut Self::Session>,
    ) -> DocumentStoreResult<UpdateOutcome>;

    /// Deletes the first document matching `filter`.
    async fn delete_one(
        &self,
        collection: &str,
        filter: &Expr,
        session: Option<&mut Self::Session>,
    ) -> DocumentStoreResult<DeleteOutcome>;

    /// Deletes every document matching `filter`.
    async fn delete_many(
        &self,
        collection: &str,
        filter: &Expr,
        session: Option<&mut Self::Session>,
    ) -> DocumentStoreResult<DeleteOutcome>;

    /// Runs an aggregation pipeline over the collection.
    async fn aggregate(
        &self,
        collection: &str,
        pipeline: &Pipeline,
        session: Option<&mut Self::Session>,
    ) -> DocumentStoreResult<Vec<Document>>;

    /// Opens a session with a started transaction.
    async fn start_transaction(&self) -> DocumentStoreResult<Self::Session>;

    /// Commits the session's transaction, making its writes visible atomically.
    async fn commit_transaction(&self, session: &mut Self::Session) -> DocumentStoreResult<()>;

    /// Aborts the session's transaction, discarding its writes.
    async fn abort_transaction(&self, session: &mut Self::Session) -> DocumentStoreResult<()>;

    /// A printable identifier of the session, for logs.
    fn session_id(&self, session: &Self::Session) -> String;

    /// Lists the names of all collections in the store.
    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>>;

    /// Drops a collection and all its documents. Dropping a missing collection succeeds.
    async fn drop_collection(&self, name: &str) -> DocumentStoreResult<()>;

    /// Releases the connection. Later operations fail with a connection error.
    async fn shutdown(&self) -> DocumentStoreResult<()>;
}

/// Factory for backends, typically holding connection settings.
#[async_trait]
pub trait StoreBackendBuilder {
    type Backend: StoreBackend;

    async fn build(self) -> DocumentStoreResult<Self::Backend>;
}
