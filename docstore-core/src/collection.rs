//! Collection handles exposing the document operations.
//!
//! - [`Collection`] runs each operation on its own, through the client's shared connection.
//! - [`SessionCollection`] runs each operation inside an open transaction; it is obtained from
//!   [`Transaction::collection`](crate::transaction::Transaction::collection).
//!
//! Both delegate to the same operation functions, which validate arguments, call the
//! backend once, and log a summary of the outcome (or the error) before returning it.
//!
//! # Example
//!
//! ```ignore
//! let restaurants = client.collection("restaurants");
//!
//! let key = restaurants.insert_one(doc! { "name": "Nick's", "borough": "Brooklyn" }).await?;
//! let found = restaurants.find_one(Filter::key(key.clone())).await?;
//! restaurants.update_one(Filter::key(key), Update::new().set("cuisine", "Pizza")).await?;
//! ```

use bson::{Bson, Document};
use tracing::{error, info};

use crate::{
    backend::StoreBackend,
    client::DocumentStoreClient,
    document::{DocumentExt, display_key, document_key, ensure_key},
    error::{DocumentStoreError, DocumentStoreResult},
    outcome::{DeleteOutcome, FindResult, UpdateOutcome},
    pipeline::Pipeline,
    query::{Expr, Query},
    update::Update,
};

/// A named collection reached through a [`DocumentStoreClient`].
///
/// # Type Parameters
///
/// * `'a` - Lifetime of the client reference
/// * `B` - The storage backend type
#[derive(Debug)]
pub struct Collection<'a, B: StoreBackend> {
    name: String,
    client: &'a DocumentStoreClient<B>,
}

impl<'a, B: StoreBackend> Collection<'a, B> {
    pub(crate) fn new(name: String, client: &'a DocumentStoreClient<B>) -> Self {
        Self { name, client }
    }

    /// Returns the name of this collection.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the first document matching `query`, or `None`.
    ///
    /// Without a sort in the query, which of several matches is returned is unspecified.
    ///
    /// # Errors
    ///
    /// `Connection` if the store is unreachable or the client is shut down, `Query` if the
    /// store rejects the query.
    pub async fn find_one(&self, query: impl Into<Query>) -> DocumentStoreResult<Option<Document>> {
        let query = query.into();
        self.client
            .guarded(|backend| find_one(backend, &self.name, query, None))
            .await
    }

    /// Like [`Collection::find_one`], deserializing the document into `T`.
    pub async fn find_one_as<T: DocumentExt>(&self, query: impl Into<Query>) -> DocumentStoreResult<Option<T>> {
        self.find_one(query)
            .await?
            .map(T::from_document)
            .transpose()
    }

    /// Returns the documents matching `query` after projection, sort, offset and limit,
    /// together with the total number of matches.
    ///
    /// Each call re-executes the query; the result is a finite, owned sequence.
    pub async fn find_many(&self, query: impl Into<Query>) -> DocumentStoreResult<FindResult> {
        let query = query.into();
        self.client
            .guarded(|backend| find_many(backend, &self.name, query, None))
            .await
    }

    /// Like [`Collection::find_many`], deserializing every document into `T`.
    pub async fn find_many_as<T: DocumentExt>(&self, query: impl Into<Query>) -> DocumentStoreResult<FindResult<T>> {
        self.find_many(query)
            .await?
            .try_map(T::from_document)
    }

    /// Counts the documents matching `filter`.
    pub async fn count(&self, filter: Expr) -> DocumentStoreResult<u64> {
        self.client
            .guarded(|backend| count(backend, &self.name, filter, None))
            .await
    }

    /// Inserts a document and returns its key, generating one if the document has none.
    ///
    /// # Errors
    ///
    /// `DuplicateKey` if a document with the same key already exists.
    pub async fn insert_one(&self, document: Document) -> DocumentStoreResult<Bson> {
        self.client
            .guarded(|backend| insert_one(backend, &self.name, document, None))
            .await
    }

    /// Inserts documents in order and returns their keys.
    ///
    /// The batch is not atomic: on failure the error is
    /// [`DocumentStoreError::PartialInsert`] carrying the keys written before the failure.
    pub async fn insert_many(&self, documents: Vec<Document>) -> DocumentStoreResult<Vec<Bson>> {
        self.client
            .guarded(|backend| insert_many(backend, &self.name, documents, None))
            .await
    }

    /// Updates the first document matching `filter`. A filter matching nothing is not an error.
    pub async fn update_one(&self, filter: Expr, update: Update) -> DocumentStoreResult<UpdateOutcome> {
        self.client
            .guarded(|backend| update_one(backend, &self.name, filter, update, None))
            .await
    }

    /// Updates every document matching `filter`.
    pub async fn update_many(&self, filter: Expr, update: Update) -> DocumentStoreResult<UpdateOutcome> {
        self.client
            .guarded(|backend| update_many(backend, &self.name, filter, update, None))
            .await
    }

    /// Deletes the first document matching `filter`.
    pub async fn delete_one(&self, filter: Expr) -> DocumentStoreResult<DeleteOutcome> {
        self.client
            .guarded(|backend| delete_one(backend, &self.name, filter, None))
            .await
    }

    /// Deletes every document matching `filter`; [`Filter::all`](crate::query::Filter::all)
    /// empties the collection.
    pub async fn delete_many(&self, filter: Expr) -> DocumentStoreResult<DeleteOutcome> {
        self.client
            .guarded(|backend| delete_many(backend, &self.name, filter, None))
            .await
    }

    /// Runs an aggregation pipeline over the collection.
    pub async fn aggregate(&self, pipeline: Pipeline) -> DocumentStoreResult<Vec<Document>> {
        self.client
            .guarded(|backend| aggregate(backend, &self.name, pipeline, None))
            .await
    }
}

/// A named collection bound to an open transaction.
///
/// Every operation passes the transaction's session to the backend, so its effects stay
/// invisible to other readers until the transaction commits.
pub struct SessionCollection<'t, B: StoreBackend> {
    name: String,
    backend: &'t B,
    session: &'t mut B::Session,
}

impl<'t, B: StoreBackend> SessionCollection<'t, B> {
    pub(crate) fn new(name: String, backend: &'t B, session: &'t mut B::Session) -> Self {
        Self { name, backend, session }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn find_one(&mut self, query: impl Into<Query>) -> DocumentStoreResult<Option<Document>> {
        find_one(self.backend, &self.name, query.into(), Some(&mut *self.session)).await
    }

    pub async fn find_many(&mut self, query: impl Into<Query>) -> DocumentStoreResult<FindResult> {
        find_many(self.backend, &self.name, query.into(), Some(&mut *self.session)).await
    }

    pub async fn count(&mut self, filter: Expr) -> DocumentStoreResult<u64> {
        count(self.backend, &self.name, filter, Some(&mut *self.session)).await
    }

    pub async fn insert_one(&mut self, document: Document) -> DocumentStoreResult<Bson> {
        insert_one(self.backend, &self.name, document, Some(&mut *self.session)).await
    }

    pub async fn insert_many(&mut self, documents: Vec<Document>) -> DocumentStoreResult<Vec<Bson>> {
        insert_many(self.backend, &self.name, documents, Some(&mut *self.session)).await
    }

    pub async fn update_one(&mut self, filter: Expr, update: Update) -> DocumentStoreResult<UpdateOutcome> {
        update_one(self.backend, &self.name, filter, update, Some(&mut *self.session)).await
    }

    pub async fn update_many(&mut self, filter: Expr, update: Update) -> DocumentStoreResult<UpdateOutcome> {
        update_many(self.backend, &self.name, filter, update, Some(&mut *self.session)).await
    }

    pub async fn delete_one(&mut self, filter: Expr) -> DocumentStoreResult<DeleteOutcome> {
        delete_one(self.backend, &self.name, filter, Some(&mut *self.session)).await
    }

    pub async fn delete_many(&mut self, filter: Expr) -> DocumentStoreResult<DeleteOutcome> {
        delete_many(self.backend, &self.name, filter, Some(&mut *self.session)).await
    }

    pub async fn aggregate(&mut self, pipeline: Pipeline) -> DocumentStoreResult<Vec<Document>> {
        aggregate(self.backend, &self.name, pipeline, Some(&mut *self.session)).await
    }
}

fn report_failure(operation: &'static str, collection: &str, transactional: bool, err: &DocumentStoreError) {
    error!(collection, operation, transactional, error = %err, "document operation failed");
}

async fn find_one<B: StoreBackend>(
    backend: &B,
    collection: &str,
    query: Query,
    session: Option<&mut B::Session>,
) -> DocumentStoreResult<Option<Document>> {
    let transactional = session.is_some();

    match backend.find_one(collection, &query, session).await {
        Ok(Some(document)) => {
            info!(
                collection,
                transactional,
                key = %document_key(&document).map(display_key).unwrap_or_default(),
                "found one document"
            );
            Ok(Some(document))
        }
        Ok(None) => {
            info!(collection, transactional, "no document matched");
            Ok(None)
        }
        Err(err) => {
            report_failure("find_one", collection, transactional, &err);
            Err(err)
        }
    }
}

async fn find_many<B: StoreBackend>(
    backend: &B,
    collection: &str,
    query: Query,
    mut session: Option<&mut B::Session>,
) -> DocumentStoreResult<FindResult> {
    let transactional = session.is_some();

    let result = async {
        let total_count = backend
            .count(collection, &query.filter_or_all(), session.as_deref_mut())
            .await?;

        // A zero limit means "nothing", never "no limit".
        let documents = if query.limit == Some(0) {
            Vec::new()
        } else {
            backend
                .find(collection, &query, session.as_deref_mut())
                .await?
        };

        Ok::<_, DocumentStoreError>(FindResult::new(documents, total_count))
    }
    .await;

    match &result {
        Ok(found) => info!(
            collection,
            transactional,
            total = found.total_count,
            returned = found.len(),
            "found documents"
        ),
        Err(err) => report_failure("find_many", collection, transactional, err),
    }

    result
}

async fn count<B: StoreBackend>(
    backend: &B,
    collection: &str,
    filter: Expr,
    session: Option<&mut B::Session>,
) -> DocumentStoreResult<u64> {
    let transactional = session.is_some();
    let result = backend.count(collection, &filter, session).await;

    match &result {
        Ok(total) => info!(collection, transactional, total = *total, "counted documents"),
        Err(err) => report_failure("count", collection, transactional, err),
    }

    result
}

async fn insert_one<B: StoreBackend>(
    backend: &B,
    collection: &str,
    mut document: Document,
    session: Option<&mut B::Session>,
) -> DocumentStoreResult<Bson> {
    let transactional = session.is_some();
    ensure_key(&mut document);

    let result = backend.insert_one(collection, document, session).await;

    match &result {
        Ok(key) => info!(collection, transactional, key = %display_key(key), "inserted document"),
        Err(err) => report_failure("insert_one", collection, transactional, err),
    }

    result
}

async fn insert_many<B: StoreBackend>(
    backend: &B,
    collection: &str,
    mut documents: Vec<Document>,
    session: Option<&mut B::Session>,
) -> DocumentStoreResult<Vec<Bson>> {
    let transactional = session.is_some();

    if documents.is_empty() {
        info!(collection, transactional, "no documents to insert");
        return Ok(Vec::new());
    }

    for document in documents.iter_mut() {
        ensure_key(document);
    }

    let result = backend.insert_many(collection, documents, session).await;

    match &result {
        Ok(keys) => info!(collection, transactional, inserted = keys.len(), "inserted documents"),
        Err(DocumentStoreError::PartialInsert { inserted, source }) => error!(
            collection,
            transactional,
            inserted = inserted.len(),
            error = %source,
            "batch insert stopped part way"
        ),
        Err(err) => report_failure("insert_many", collection, transactional, err),
    }

    result
}

async fn update_one<B: StoreBackend>(
    backend: &B,
    collection: &str,
    filter: Expr,
    update: Update,
    session: Option<&mut B::Session>,
) -> DocumentStoreResult<UpdateOutcome> {
    let transactional = session.is_some();

    let result = match update.validate() {
        Ok(()) => backend.update_one(collection, &filter, &update, session).await,
        Err(err) => Err(err),
    };

    match &result {
        Ok(outcome) if outcome.modified_count == 1 => {
            info!(collection, transactional, matched = outcome.matched_count, "updated one document")
        }
        Ok(outcome) => {
            info!(collection, transactional, matched = outcome.matched_count, "no documents updated")
        }
        Err(err) => report_failure("update_one", collection, transactional, err),
    }

    result
}

async fn update_many<B: StoreBackend>(
    backend: &B,
    collection: &str,
    filter: Expr,
    update: Update,
    session: Option<&mut B::Session>,
) -> DocumentStoreResult<UpdateOutcome> {
    let transactional = session.is_some();

    let result = match update.validate() {
        Ok(()) => backend.update_many(collection, &filter, &update, session).await,
        Err(err) => Err(err),
    };

    match &result {
        Ok(outcome) => info!(
            collection,
            transactional,
            matched = outcome.matched_count,
            modified = outcome.modified_count,
            "updated documents"
        ),
        Err(err) => report_failure("update_many", collection, transactional, err),
    }

    result
}

async fn delete_one<B: StoreBackend>(
    backend: &B,
    collection: &str,
    filter: Expr,
    session: Option<&mut B::Session>,
) -> DocumentStoreResult<DeleteOutcome> {
    let transactional = session.is_some();
    let result = backend.delete_one(collection, &filter, session).await;

    match &result {
        Ok(outcome) if outcome.deleted_count == 1 => {
            info!(collection, transactional, "deleted one document")
        }
        Ok(_) => info!(collection, transactional, filter = ?filter, "no documents deleted"),
        Err(err) => report_failure("delete_one", collection, transactional, err),
    }

    result
}

async fn delete_many<B: StoreBackend>(
    backend: &B,
    collection: &str,
    filter: Expr,
    session: Option<&mut B::Session>,
) -> DocumentStoreResult<DeleteOutcome> {
    let transactional = session.is_some();
    let result = backend.delete_many(collection, &filter, session).await;

    match &result {
        Ok(outcome) => info!(collection, transactional, deleted = outcome.deleted_count, "deleted documents"),
        Err(err) => report_failure("delete_many", collection, transactional, err),
    }

    result
}

async fn aggregate<B: StoreBackend>(
    backend: &B,
    collection: &str,
    pipeline: Pipeline,
    session: Option<&mut B::Session>,
) -> DocumentStoreResult<Vec<Document>> {
    let transactional = session.is_some();

    let result = match pipeline.validate() {
        Ok(()) => backend.aggregate(collection, &pipeline, session).await,
        Err(err) => Err(err),
    };

    match &result {
        Ok(documents) => info!(
            collection,
            transactional,
            stages = pipeline.stages().len(),
            returned = documents.len(),
            "aggregation completed"
        ),
        Err(err) => report_failure("aggregate", collection, transactional, err),
    }

    result
}
