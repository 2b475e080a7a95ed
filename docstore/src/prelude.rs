//! Convenient re-exports of commonly used types from docstore.
//!
//! ```ignore
//! use docstore::prelude::*;
//! ```
//!
//! This provides access to:
//! - The client, collection and transaction handles
//! - Backend traits and builders
//! - Filter, query, update and pipeline construction
//! - Result and error types

pub use bson::{Bson, doc};

pub use docstore_core::{
    backend::{StoreBackend, StoreBackendBuilder},
    client::DocumentStoreClient,
    collection::{Collection, SessionCollection},
    config::ClientConfig,
    document::{Document, DocumentExt, KEY_FIELD},
    error::{DocumentStoreError, DocumentStoreResult},
    outcome::{DeleteOutcome, FindResult, UpdateOutcome},
    pipeline::{Accumulator, AccumulatorInput, Group, GroupKey, Pipeline, Stage},
    query::{Expr, FieldOp, Filter, Projection, Query, QueryBuilder, Sort, SortDirection},
    transaction::Transaction,
    update::Update,
};
