//! Error types and result types for document store operations.
//!
//! Every fallible operation in the workspace returns [`DocumentStoreResult<T>`]. The client
//! logs an error once and hands it back unchanged; no variant is ever retried internally.

use bson::{Bson, error::Error as BsonError};
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// Represents all possible errors that can occur when interacting with a document store.
#[derive(Error, Debug)]
pub enum DocumentStoreError {
    /// The store could not be reached, the connection was lost, or the client was shut down.
    #[error("Connection error: {0}")]
    Connection(String),
    /// The store rejected the operation as malformed.
    #[error("Query error: {0}")]
    Query(String),
    /// A document with the given key already exists in the collection.
    #[error("Duplicate key {key} in collection {collection}")]
    DuplicateKey {
        /// Rendered form of the colliding `_id`.
        key: String,
        /// The collection the insert targeted.
        collection: String,
    },
    /// An operation inside a transaction failed (or the commit itself failed) and the
    /// transaction was aborted. `source` is the triggering error.
    #[error("Transaction aborted: {source}")]
    TransactionAborted {
        #[source]
        source: Box<DocumentStoreError>,
    },
    /// A non-atomic batch insert stopped part way through.
    ///
    /// `inserted` holds the keys of the documents that were written before `source` occurred.
    #[error("Inserted {} documents before failure: {source}", .inserted.len())]
    PartialInsert {
        inserted: Vec<Bson>,
        #[source]
        source: Box<DocumentStoreError>,
    },
    /// A non-atomic multi-document update or delete stopped after `completed` documents.
    #[error("Completed {completed} writes before failure: {source}")]
    PartialWrite {
        completed: u64,
        #[source]
        source: Box<DocumentStoreError>,
    },
    /// A transaction could not commit because a concurrent write touched the same data.
    #[error("Write conflict: {0}")]
    WriteConflict(String),
    /// Serialization/deserialization error when converting between document formats (BSON, JSON).
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// The value does not have the shape of a document.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),
    /// Error during configuration or backend construction.
    #[error("Initialization error: {0}")]
    Initialization(String),
    /// Any other failure reported by the underlying backend.
    #[error("Backend error: {0}")]
    Backend(String),
}

/// A specialized `Result` type for document store operations.
pub type DocumentStoreResult<T> = Result<T, DocumentStoreError>;

impl DocumentStoreError {
    /// Wraps `self` as the cause of an aborted transaction.
    ///
    /// Errors that are already `TransactionAborted` are returned unchanged so nested
    /// wrapping never happens.
    pub fn into_aborted(self) -> Self {
        match self {
            aborted @ DocumentStoreError::TransactionAborted { .. } => aborted,
            other => DocumentStoreError::TransactionAborted { source: Box::new(other) },
        }
    }

    /// Follows `TransactionAborted`, `PartialInsert` and `PartialWrite` down to the error that
    /// actually caused the failure.
    pub fn root_cause(&self) -> &DocumentStoreError {
        match self {
            DocumentStoreError::TransactionAborted { source }
            | DocumentStoreError::PartialInsert { source, .. }
            | DocumentStoreError::PartialWrite { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Returns `true` if the root cause is a [`DocumentStoreError::Connection`].
    pub fn is_connection(&self) -> bool {
        matches!(self.root_cause(), DocumentStoreError::Connection(_))
    }

    /// Returns `true` if the root cause is a [`DocumentStoreError::DuplicateKey`].
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self.root_cause(), DocumentStoreError::DuplicateKey { .. })
    }
}

impl From<BsonError> for DocumentStoreError {
    fn from(err: BsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for DocumentStoreError {
    fn from(err: SerdeJsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}
