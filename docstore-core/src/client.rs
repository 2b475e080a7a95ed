//! The document store client.
//!
//! [`DocumentStoreClient`] owns one long-lived backend connection for the lifetime of the
//! process. Every operation holds a shared permit on an internal gate while it runs;
//! [`DocumentStoreClient::shutdown`] takes the gate exclusively, so the connection is only
//! released once all outstanding operations have settled. Operations started after shutdown
//! fail with [`DocumentStoreError::Connection`].
//!
//! # Example
//!
//! ```ignore
//! use docstore::{prelude::*, memory::InMemoryStore};
//!
//! let client = DocumentStoreClient::connect(InMemoryStore::builder()).await?;
//! let restaurants = client.collection("restaurants");
//!
//! restaurants.insert_one(doc! { "name": "Nick's", "borough": "Brooklyn" }).await?;
//!
//! client.shutdown().await?;
//! ```

use futures::future::BoxFuture;
use mea::rwlock::RwLock;
use std::future::Future;
use tracing::{debug, error, info, warn};

use crate::{
    backend::{StoreBackend, StoreBackendBuilder},
    collection::Collection,
    error::{DocumentStoreError, DocumentStoreResult},
    transaction::Transaction,
};

/// A connection-managed client over a [`StoreBackend`].
///
/// The client is `Sync`; share it across tasks by reference or inside an `Arc`.
#[derive(Debug)]
pub struct DocumentStoreClient<B: StoreBackend> {
    backend: B,
    /// `true` once the backend has been released.
    closed: RwLock<bool>,
}

impl<B: StoreBackend> DocumentStoreClient<B> {
    /// Wraps an already constructed backend.
    pub fn new(backend: B) -> Self {
        Self { backend, closed: RwLock::new(false) }
    }

    /// Builds the backend and verifies the store is reachable.
    ///
    /// # Errors
    ///
    /// `Initialization` if the backend cannot be built, `Connection` if the store does not
    /// answer.
    pub async fn connect<T>(builder: T) -> DocumentStoreResult<Self>
    where
        T: StoreBackendBuilder<Backend = B> + Send,
    {
        let backend = match builder.build().await {
            Ok(backend) => backend,
            Err(err) => {
                error!(error = %err, "could not create document store backend");
                return Err(err);
            }
        };

        if let Err(err) = backend.ping().await {
            error!(error = %err, "document store is not reachable");
            // The ping failure is what the caller needs to see.
            let _ = backend.shutdown().await;
            return Err(err);
        }

        info!("connected to document store");
        Ok(Self::new(backend))
    }

    /// Returns the underlying backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Gets a handle on the collection with the given name.
    pub fn collection<'a>(&'a self, name: &str) -> Collection<'a, B> {
        Collection::new(name.to_string(), self)
    }

    /// Verifies the store is reachable.
    pub async fn ping(&self) -> DocumentStoreResult<()> {
        self.guarded(|backend| async move {
            let result = backend.ping().await;
            match &result {
                Ok(()) => debug!("document store answered ping"),
                Err(err) => error!(error = %err, "ping failed"),
            }
            result
        })
        .await
    }

    /// Lists all collections in the store.
    pub async fn list_collections(&self) -> DocumentStoreResult<Vec<String>> {
        self.guarded(|backend| backend.list_collections()).await
    }

    /// Drops a collection and all its documents.
    pub async fn drop_collection(&self, name: &str) -> DocumentStoreResult<()> {
        self.guarded(|backend| async move {
            let result = backend.drop_collection(name).await;
            match &result {
                Ok(()) => info!(collection = name, "dropped collection"),
                Err(err) => error!(collection = name, error = %err, "could not drop collection"),
            }
            result
        })
        .await
    }

    /// Runs `body` inside a transaction.
    ///
    /// A session is opened and a transaction started; `body` receives the [`Transaction`] and
    /// performs its operations through it. If `body` succeeds the transaction commits and its
    /// value is returned. Otherwise the transaction is aborted and the triggering error is
    /// returned wrapped in [`DocumentStoreError::TransactionAborted`]; a failed commit is
    /// reported the same way. Either way no partial effect is visible outside the
    /// transaction. The body is never retried.
    pub async fn run_transaction<'c, T, F>(&'c self, body: F) -> DocumentStoreResult<T>
    where
        F: for<'t> FnOnce(&'t mut Transaction<'c, B>) -> BoxFuture<'t, DocumentStoreResult<T>>,
    {
        self.guarded(|backend| async move {
            let session = match backend.start_transaction().await {
                Ok(session) => session,
                Err(err) => {
                    error!(error = %err, "could not start transaction");
                    return Err(err);
                }
            };

            let mut transaction = Transaction::new(backend, session);
            let id = transaction.id();
            debug!(session = %id, "transaction started");

            match body(&mut transaction).await {
                Ok(value) => match backend.commit_transaction(transaction.session_mut()).await {
                    Ok(()) => {
                        info!(session = %id, "transaction committed");
                        Ok(value)
                    }
                    Err(err) => {
                        warn!(session = %id, error = %err, "transaction commit failed");
                        Err(err.into_aborted())
                    }
                },
                Err(err) => {
                    if let Err(abort_err) = backend.abort_transaction(transaction.session_mut()).await {
                        error!(session = %id, error = %abort_err, "could not abort transaction");
                    }
                    warn!(session = %id, error = %err, "transaction aborted");
                    Err(err.into_aborted())
                }
            }
        })
        .await
    }

    /// Releases the connection once every in-flight operation has settled.
    ///
    /// Calling this more than once is harmless.
    pub async fn shutdown(&self) -> DocumentStoreResult<()> {
        let mut closed = self.closed.write().await;

        if *closed {
            return Ok(());
        }

        match self.backend.shutdown().await {
            Ok(()) => {
                *closed = true;
                info!("document store connection released");
                Ok(())
            }
            Err(err) => {
                error!(error = %err, "could not release document store connection");
                Err(err)
            }
        }
    }

    /// Returns `true` once [`DocumentStoreClient::shutdown`] has completed.
    pub async fn is_closed(&self) -> bool {
        *self.closed.read().await
    }

    /// Runs `body` with this client, then shuts the client down on every exit path.
    ///
    /// The body's error takes precedence over a shutdown error.
    pub async fn run_scoped<T, F>(self, body: F) -> DocumentStoreResult<T>
    where
        F: for<'c> FnOnce(&'c DocumentStoreClient<B>) -> BoxFuture<'c, DocumentStoreResult<T>>,
    {
        let result = body(&self).await;
        let released = self.shutdown().await;

        match (result, released) {
            (Err(err), _) => Err(err),
            (Ok(_), Err(err)) => Err(err),
            (Ok(value), Ok(())) => Ok(value),
        }
    }

    /// Runs `operation` while holding a shared permit on the connection.
    pub(crate) async fn guarded<'a, T, F, Fut>(&'a self, operation: F) -> DocumentStoreResult<T>
    where
        F: FnOnce(&'a B) -> Fut,
        Fut: Future<Output = DocumentStoreResult<T>>,
    {
        let closed = self.closed.read().await;

        if *closed {
            warn!("operation attempted after the client was shut down");
            return Err(DocumentStoreError::Connection(
                "client has been shut down".to_string(),
            ));
        }

        let result = operation(&self.backend).await;
        drop(closed);

        result
    }
}
