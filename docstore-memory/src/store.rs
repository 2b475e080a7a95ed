//! In-memory storage implementation for document stores.
//!
//! Collections are ordered vectors of BSON documents behind an async-aware read-write lock.
//! Transactions work on a private snapshot of every collection; on commit the snapshot of
//! each collection the transaction wrote to replaces the shared copy, provided nobody else
//! wrote to that collection in the meantime.

use async_trait::async_trait;
use bson::{Bson, Document};
use mea::rwlock::RwLock;
use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};
use tracing::{debug, warn};
use uuid::Uuid;

use docstore_core::{
    backend::{StoreBackend, StoreBackendBuilder},
    document::{display_key, document_key, ensure_key},
    error::{DocumentStoreError, DocumentStoreResult},
    outcome::{DeleteOutcome, UpdateOutcome},
    pipeline::Pipeline,
    query::{Expr, Query},
    update::Update,
};

use crate::{
    evaluator::{DocumentEvaluator, compare_documents, same_value},
    pipeline, projection, update,
};

type Collections = HashMap<String, CollectionData>;

#[derive(Debug, Clone, Default)]
struct CollectionData {
    /// Value of the store clock at the last committed write.
    version: u64,
    documents: Vec<Document>,
}

#[derive(Debug, Default)]
struct StoreState {
    collections: Collections,
    clock: u64,
}

impl StoreState {
    fn bump(&mut self, collection: &str) {
        self.clock += 1;
        if let Some(data) = self.collections.get_mut(collection) {
            data.version = self.clock;
        }
    }

    fn version(&self, collection: &str) -> u64 {
        self.collections.get(collection).map_or(0, |data| data.version)
    }
}

/// Thread-safe in-memory document storage backend.
///
/// `InMemoryStore` is cloneable and uses `Arc`-wrapped internal state, so clones share the
/// same data and the same connection state. Once [`StoreBackend::shutdown`] has been called
/// every clone reports `Connection` errors.
///
/// Queries scan all documents in a collection; there are no indexes.
///
/// # Example
///
/// ```ignore
/// use docstore_memory::InMemoryStore;
/// use docstore_core::{backend::StoreBackend, query::Filter};
/// use bson::doc;
///
/// let store = InMemoryStore::new();
/// store.insert_one("restaurants", doc! { "_id": 1, "name": "Nick's" }, None).await?;
///
/// assert_eq!(store.count("restaurants", &Filter::all(), None).await?, 1);
/// ```
#[derive(Default, Clone, Debug)]
pub struct InMemoryStore {
    state: Arc<RwLock<StoreState>>,
    closed: Arc<AtomicBool>,
}

/// A transaction over an [`InMemoryStore`].
///
/// Dropping a session without committing discards its writes.
#[derive(Debug)]
pub struct MemorySession {
    id: Uuid,
    staged: Collections,
    touched: HashSet<String>,
    status: SessionStatus,
}

#[derive(Debug, Clone, PartialEq)]
enum SessionStatus {
    Active,
    /// A write inside the transaction failed; the transaction can only be aborted.
    Failed(String),
    Committed,
    Aborted,
}

impl MemorySession {
    pub fn id(&self) -> Uuid {
        self.id
    }

    fn ensure_active(&self) -> DocumentStoreResult<()> {
        let reason = match &self.status {
            SessionStatus::Active => return Ok(()),
            SessionStatus::Failed(reason) => format!("was aborted by an earlier failure: {reason}"),
            SessionStatus::Committed => "has already been committed".to_string(),
            SessionStatus::Aborted => "has been aborted".to_string(),
        };

        Err(DocumentStoreError::Query(format!("transaction {} {reason}", self.id)))
    }
}

impl InMemoryStore {
    /// Creates a new empty in-memory document store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a builder for constructing an `InMemoryStore` with seed data.
    pub fn builder() -> InMemoryStoreBuilder {
        InMemoryStoreBuilder::default()
    }

    fn ensure_open(&self) -> DocumentStoreResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DocumentStoreError::Connection(
                "in-memory store has been shut down".to_string(),
            ));
        }

        Ok(())
    }

    /// Runs `op` against the transaction snapshot, or the shared collections.
    async fn read<T>(
        &self,
        session: Option<&mut MemorySession>,
        op: impl FnOnce(&Collections) -> DocumentStoreResult<T>,
    ) -> DocumentStoreResult<T> {
        self.ensure_open()?;

        match session {
            Some(session) => {
                session.ensure_active()?;
                op(&session.staged)
            }
            None => {
                let state = self.state.read().await;
                op(&state.collections)
            }
        }
    }

    /// Runs `op` against the transaction snapshot, or the shared collections.
    ///
    /// A failed write marks the transaction failed. Outside a transaction the collection's
    /// version moves even on failure, since earlier documents of a batch may have changed.
    async fn write<T>(
        &self,
        collection: &str,
        session: Option<&mut MemorySession>,
        op: impl FnOnce(&mut Collections) -> DocumentStoreResult<T>,
    ) -> DocumentStoreResult<T> {
        self.ensure_open()?;

        match session {
            Some(session) => {
                session.ensure_active()?;
                session.touched.insert(collection.to_string());

                let result = op(&mut session.staged);
                if let Err(err) = &result {
                    session.status = SessionStatus::Failed(err.to_string());
                }
                result
            }
            None => {
                let mut state = self.state.write().await;
                let result = op(&mut state.collections);
                state.bump(collection);
                result
            }
        }
    }
}

fn matching<'a>(documents: &'a [Document], filter: &Expr) -> DocumentStoreResult<Vec<&'a Document>> {
    let mut found = Vec::new();
    for document in documents {
        if DocumentEvaluator::matches(document, filter)? {
            found.push(document);
        }
    }
    Ok(found)
}

fn select(
    collections: &Collections,
    collection: &str,
    query: &Query,
    limit: Option<usize>,
) -> DocumentStoreResult<Vec<Document>> {
    let Some(data) = collections.get(collection) else {
        return Ok(Vec::new());
    };

    let mut found = match &query.filter {
        Some(filter) => matching(&data.documents, filter)?,
        None => data.documents.iter().collect(),
    };

    if !query.sort.is_empty() {
        found.sort_by(|a, b| compare_documents(a, b, &query.sort));
    }

    found
        .into_iter()
        .skip(query.offset.unwrap_or(0))
        .take(limit.unwrap_or(usize::MAX))
        .map(|document| match &query.projection {
            Some(shape) => projection::project(document, shape),
            None => Ok(document.clone()),
        })
        .collect()
}

fn insert_document(data: &mut CollectionData, collection: &str, mut document: Document) -> DocumentStoreResult<Bson> {
    let key = ensure_key(&mut document);

    let taken = data
        .documents
        .iter()
        .any(|existing| document_key(existing).is_some_and(|existing| same_value(existing, &key)));
    if taken {
        return Err(DocumentStoreError::DuplicateKey {
            key: display_key(&key),
            collection: collection.to_string(),
        });
    }

    data.documents.push(document);
    Ok(key)
}

fn insert(collections: &mut Collections, collection: &str, documents: Vec<Document>) -> DocumentStoreResult<Vec<Bson>> {
    let data = collections.entry(collection.to_string()).or_default();
    let mut inserted = Vec::with_capacity(documents.len());

    for document in documents {
        match insert_document(data, collection, document) {
            Ok(key) => inserted.push(key),
            Err(err) => {
                return Err(DocumentStoreError::PartialInsert { inserted, source: Box::new(err) });
            }
        }
    }

    Ok(inserted)
}

fn apply_update(
    collections: &mut Collections,
    collection: &str,
    filter: &Expr,
    changes: &Update,
    multi: bool,
) -> DocumentStoreResult<UpdateOutcome> {
    let mut outcome = UpdateOutcome::default();
    let Some(data) = collections.get_mut(collection) else {
        return Ok(outcome);
    };

    for document in data.documents.iter_mut() {
        if !DocumentEvaluator::matches(document, filter)? {
            continue;
        }

        let mut updated = document.clone();
        match update::apply(&mut updated, changes) {
            Ok(changed) => {
                outcome.matched_count += 1;
                if changed {
                    *document = updated;
                    outcome.modified_count += 1;
                }
            }
            Err(err) if outcome.matched_count > 0 => {
                return Err(DocumentStoreError::PartialWrite {
                    completed: outcome.matched_count,
                    source: Box::new(err),
                });
            }
            Err(err) => return Err(err),
        }

        if !multi {
            break;
        }
    }

    Ok(outcome)
}

fn delete(collections: &mut Collections, collection: &str, filter: &Expr, multi: bool) -> DocumentStoreResult<DeleteOutcome> {
    let Some(data) = collections.get_mut(collection) else {
        return Ok(DeleteOutcome::default());
    };

    let mut doomed = Vec::new();
    for (index, document) in data.documents.iter().enumerate() {
        if DocumentEvaluator::matches(document, filter)? {
            doomed.push(index);
            if !multi {
                break;
            }
        }
    }

    for index in doomed.iter().rev() {
        data.documents.remove(*index);
    }

    Ok(DeleteOutcome { deleted_count: doomed.len() as u64 })
}

#[async_trait]
impl StoreBackend for InMemoryStore {
    type Session = MemorySession;

    async fn ping(&self) -> DocumentStoreResult<()> {
        self.ensure_open()
    }

    async fn find_one(
        &self,
        collection: &str,
        query: &Query,
        session: Option<&mut MemorySession>,
    ) -> DocumentStoreResult<Option<Document>> {
        self.read(session, |collections| {
            Ok(select(collections, collection, query, Some(1))?.into_iter().next())
        })
        .await
    }

    async fn find(
        &self,
        collection: &str,
        query: &Query,
        session: Option<&mut MemorySession>,
    ) -> DocumentStoreResult<Vec<Document>> {
        self.read(session, |collections| select(collections, collection, query, query.limit))
            .await
    }

    async fn count(
        &self,
        collection: &str,
        filter: &Expr,
        session: Option<&mut MemorySession>,
    ) -> DocumentStoreResult<u64> {
        self.read(session, |collections| match collections.get(collection) {
            Some(data) => Ok(matching(&data.documents, filter)?.len() as u64),
            None => Ok(0),
        })
        .await
    }

    async fn insert_one(
        &self,
        collection: &str,
        document: Document,
        session: Option<&mut MemorySession>,
    ) -> DocumentStoreResult<Bson> {
        self.write(collection, session, |collections| {
            let data = collections.entry(collection.to_string()).or_default();
            insert_document(data, collection, document)
        })
        .await
    }

    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Document>,
        session: Option<&mut MemorySession>,
    ) -> DocumentStoreResult<Vec<Bson>> {
        self.write(collection, session, |collections| insert(collections, collection, documents))
            .await
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: &Expr,
        update: &Update,
        session: Option<&mut MemorySession>,
    ) -> DocumentStoreResult<UpdateOutcome> {
        self.write(collection, session, |collections| {
            apply_update(collections, collection, filter, update, false)
        })
        .await
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: &Expr,
        update: &Update,
        session: Option<&mut MemorySession>,
    ) -> DocumentStoreResult<UpdateOutcome> {
        self.write(collection, session, |collections| {
            apply_update(collections, collection, filter, update, true)
        })
        .await
    }

    async fn delete_one(
        &self,
        collection: &str,
        filter: &Expr,
        session: Option<&mut MemorySession>,
    ) -> DocumentStoreResult<DeleteOutcome> {
        self.write(collection, session, |collections| delete(collections, collection, filter, false))
            .await
    }

    async fn delete_many(
        &self,
        collection: &str,
        filter: &Expr,
        session: Option<&mut MemorySession>,
    ) -> DocumentStoreResult<DeleteOutcome> {
        self.write(collection, session, |collections| delete(collections, collection, filter, true))
            .await
    }

    async fn aggregate(
        &self,
        collection: &str,
        pipeline: &Pipeline,
        session: Option<&mut MemorySession>,
    ) -> DocumentStoreResult<Vec<Document>> {
        let documents = self
            .read(session, |collections| {
                Ok(collections
                    .get(collection)
                    .map(|data| data.documents.clone())
                    .unwrap_or_default())
            })
            .await?;

        pipeline::run(documents, pipeline)
    }

    async fn start_transaction(&self) -> DocumentStoreResult<MemorySession> {
        self.ensure_open()?;

        let staged = self.state.read().await.collections.clone();

        Ok(MemorySession {
            id: Uuid::new_v4(),
            staged,
            touched: HashSet::new(),
            status: SessionStatus::Active,
        })
    }

    async fn commit_transaction(&self, session: &mut MemorySession) -> DocumentStoreResult<()> {
        self.ensure_open()?;
        session.ensure_active()?;

        let mut state = self.state.write().await;

        for name in &session.touched {
            let base = session.staged.get(name).map_or(0, |data| data.version);
            if state.version(name) != base {
                warn!(session = %session.id, collection = %name, "write conflict on commit");
                session.status = SessionStatus::Aborted;
                session.staged.clear();
                return Err(DocumentStoreError::WriteConflict(format!(
                    "collection '{name}' was modified outside transaction {}",
                    session.id
                )));
            }
        }

        for name in std::mem::take(&mut session.touched) {
            match session.staged.remove(&name) {
                Some(data) => {
                    state.collections.insert(name.clone(), data);
                    state.bump(&name);
                }
                None => {
                    state.collections.remove(&name);
                }
            }
        }

        session.staged.clear();
        session.status = SessionStatus::Committed;
        debug!(session = %session.id, "applied transaction writes");

        Ok(())
    }

    async fn abort_transaction(&self, session: &mut MemorySession) -> DocumentStoreResult<()> {
        if session.status == SessionStatus::Committed {
            return Err(DocumentStoreError::Query(format!(
                "transaction {} has already been committed",
                session.id
            )));
        }

        session.staged.clear();
        session.touched.clear();
        session.status = SessionStatus::Aborted;

        Ok(())
    }

    fn session_id(&self, session: &MemorySession) -> String {
        session.id.to_string()
    }

    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>> {
        self.ensure_open()?;

        let mut names: Vec<String> = self.state.read().await.collections.keys().cloned().collect();
        names.sort();

        Ok(names)
    }

    async fn drop_collection(&self, name: &str) -> DocumentStoreResult<()> {
        self.ensure_open()?;

        self.state.write().await.collections.remove(name);

        Ok(())
    }

    async fn shutdown(&self) -> DocumentStoreResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        debug!("in-memory store closed");

        Ok(())
    }
}

/// Builder for constructing [`InMemoryStore`] instances.
///
/// # Example
///
/// ```ignore
/// use docstore_memory::InMemoryStore;
/// use docstore_core::client::DocumentStoreClient;
///
/// let client = DocumentStoreClient::connect(
///     InMemoryStore::builder().with_documents("restaurants", vec![doc! { "name": "Nick's" }]),
/// )
/// .await?;
/// ```
#[derive(Default)]
pub struct InMemoryStoreBuilder {
    seed: Vec<(String, Vec<Document>)>,
}

impl InMemoryStoreBuilder {
    /// Pre-populates `collection` with `documents`. Documents without a key receive one.
    pub fn with_documents(mut self, collection: impl Into<String>, documents: Vec<Document>) -> Self {
        self.seed.push((collection.into(), documents));
        self
    }
}

#[async_trait]
impl StoreBackendBuilder for InMemoryStoreBuilder {
    type Backend = InMemoryStore;

    /// Builds a new [`InMemoryStore`] holding the seed documents.
    ///
    /// Fails with `Initialization` if the seed documents contain duplicate keys.
    async fn build(self) -> DocumentStoreResult<Self::Backend> {
        let store = InMemoryStore::new();

        {
            let mut state = store.state.write().await;
            for (name, documents) in self.seed {
                insert(&mut state.collections, &name, documents).map_err(|err| {
                    DocumentStoreError::Initialization(format!("could not seed collection '{name}': {err}"))
                })?;
                state.bump(&name);
            }
        }

        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use docstore_core::query::{Filter, Projection, SortDirection};

    async fn seeded() -> InMemoryStore {
        InMemoryStore::builder()
            .with_documents(
                "restaurants",
                vec![
                    doc! { "_id": 1, "name": "Nick's", "borough": "Brooklyn", "stars": 3 },
                    doc! { "_id": 2, "name": "Wendy's", "borough": "Brooklyn", "stars": 4 },
                    doc! { "_id": 3, "name": "Tony's", "borough": "Queens", "stars": 5 },
                ],
            )
            .build()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn find_sorts_skips_limits_and_projects() {
        let store = seeded().await;
        let query = Query::builder()
            .filter(Filter::eq("borough", "Brooklyn").or(Filter::gt("stars", 4)))
            .sort("stars", SortDirection::Desc)
            .offset(1)
            .limit(1)
            .projection(Projection::include(["name"]).without_key())
            .build();

        let found = store.find("restaurants", &query, None).await.unwrap();
        assert_eq!(found, vec![doc! { "name": "Wendy's" }]);
    }

    #[tokio::test]
    async fn find_sort_places_nan_before_numbers() {
        let documents = (0..200)
            .map(|i| match i % 3 {
                0 => doc! { "_id": i, "stars": f64::NAN },
                _ => doc! { "_id": i, "stars": (i * 7919) % 101 },
            })
            .collect();
        let store = InMemoryStore::builder()
            .with_documents("restaurants", documents)
            .build()
            .await
            .unwrap();

        let query = Query::builder().sort("stars", SortDirection::Asc).build();
        let found = store.find("restaurants", &query, None).await.unwrap();
        assert_eq!(found.len(), 200);

        let stars: Vec<f64> = found
            .iter()
            .map(|document| match document.get("stars") {
                Some(Bson::Double(value)) => *value,
                Some(Bson::Int32(value)) => f64::from(*value),
                other => panic!("unexpected stars value: {other:?}"),
            })
            .collect();
        let nan_count = stars.iter().take_while(|value| value.is_nan()).count();
        assert_eq!(nan_count, 67);
        assert!(stars[nan_count..].windows(2).all(|pair| pair[0] <= pair[1]));
    }

    #[tokio::test]
    async fn missing_collection_reads_as_empty() {
        let store = InMemoryStore::new();

        assert!(store.find("nothing", &Query::new(), None).await.unwrap().is_empty());
        assert_eq!(store.count("nothing", &Filter::all(), None).await.unwrap(), 0);
        assert_eq!(
            store.delete_many("nothing", &Filter::all(), None).await.unwrap(),
            DeleteOutcome { deleted_count: 0 }
        );
    }

    #[tokio::test]
    async fn insert_many_stops_at_duplicate() {
        let store = seeded().await;
        let err = store
            .insert_many(
                "restaurants",
                vec![doc! { "_id": 4 }, doc! { "_id": 1 }, doc! { "_id": 5 }],
                None,
            )
            .await
            .unwrap_err();

        match err {
            DocumentStoreError::PartialInsert { inserted, source } => {
                assert_eq!(inserted, vec![Bson::Int32(4)]);
                assert!(source.is_duplicate_key());
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(store.count("restaurants", &Filter::all(), None).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn update_one_touches_first_match_only() {
        let store = seeded().await;
        let outcome = store
            .update_one("restaurants", &Filter::eq("borough", "Brooklyn"), &Update::new().inc("stars", 1), None)
            .await
            .unwrap();

        assert_eq!(outcome, UpdateOutcome { matched_count: 1, modified_count: 1 });
        let nick = store.find_one("restaurants", &Filter::key(1).into(), None).await.unwrap();
        assert_eq!(nick.and_then(|d| d.get("stars").cloned()), Some(Bson::Int32(4)));
    }

    #[tokio::test]
    async fn update_many_reports_partial_progress() {
        let store = InMemoryStore::builder()
            .with_documents("items", vec![doc! { "_id": 1, "n": 1 }, doc! { "_id": 2, "n": "x" }])
            .build()
            .await
            .unwrap();

        let err = store
            .update_many("items", &Filter::all(), &Update::new().inc("n", 1), None)
            .await
            .unwrap_err();

        assert!(matches!(err, DocumentStoreError::PartialWrite { completed: 1, .. }));
    }

    #[tokio::test]
    async fn transaction_writes_are_isolated_until_commit() {
        let store = seeded().await;
        let mut session = store.start_transaction().await.unwrap();

        store
            .delete_one("restaurants", &Filter::key(3), Some(&mut session))
            .await
            .unwrap();

        assert_eq!(store.count("restaurants", &Filter::all(), Some(&mut session)).await.unwrap(), 2);
        assert_eq!(store.count("restaurants", &Filter::all(), None).await.unwrap(), 3);

        store.commit_transaction(&mut session).await.unwrap();
        assert_eq!(store.count("restaurants", &Filter::all(), None).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn aborted_transaction_leaves_no_trace() {
        let store = seeded().await;
        let mut session = store.start_transaction().await.unwrap();

        store
            .insert_one("restaurants", doc! { "_id": 9 }, Some(&mut session))
            .await
            .unwrap();
        store.abort_transaction(&mut session).await.unwrap();

        assert_eq!(store.count("restaurants", &Filter::all(), None).await.unwrap(), 3);
        assert!(store.commit_transaction(&mut session).await.is_err());
    }

    #[tokio::test]
    async fn concurrent_write_conflicts_on_commit() {
        let store = seeded().await;
        let mut session = store.start_transaction().await.unwrap();

        store
            .update_one("restaurants", &Filter::key(1), &Update::new().set("name", "Mine"), Some(&mut session))
            .await
            .unwrap();
        store
            .update_one("restaurants", &Filter::key(2), &Update::new().set("name", "Theirs"), None)
            .await
            .unwrap();

        let err = store.commit_transaction(&mut session).await.unwrap_err();
        assert!(matches!(err, DocumentStoreError::WriteConflict(_)));

        let nick = store.find_one("restaurants", &Filter::key(1).into(), None).await.unwrap();
        assert_eq!(nick.and_then(|d| d.get("name").cloned()), Some(Bson::String("Nick's".into())));
    }

    #[tokio::test]
    async fn failed_write_poisons_the_transaction() {
        let store = seeded().await;
        let mut session = store.start_transaction().await.unwrap();

        assert!(
            store
                .insert_one("restaurants", doc! { "_id": 1 }, Some(&mut session))
                .await
                .is_err()
        );
        assert!(store.count("restaurants", &Filter::all(), Some(&mut session)).await.is_err());
        assert!(store.commit_transaction(&mut session).await.is_err());
    }

    #[tokio::test]
    async fn shutdown_rejects_later_operations() {
        let store = seeded().await;
        let clone = store.clone();

        store.shutdown().await.unwrap();

        assert!(clone.ping().await.unwrap_err().is_connection());
        assert!(
            clone
                .find("restaurants", &Query::new(), None)
                .await
                .unwrap_err()
                .is_connection()
        );
    }

    #[tokio::test]
    async fn seeding_duplicates_fails_to_build() {
        let result = InMemoryStore::builder()
            .with_documents("items", vec![doc! { "_id": 1 }, doc! { "_id": 1 }])
            .build()
            .await;

        assert!(matches!(result, Err(DocumentStoreError::Initialization(_))));
    }
}
