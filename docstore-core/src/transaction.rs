//! Transactions bound to an explicit session.
//!
//! A [`Transaction`] is created by
//! [`DocumentStoreClient::run_transaction`](crate::client::DocumentStoreClient::run_transaction)
//! and handed to the transaction body. Every operation performed through
//! [`Transaction::collection`] carries the session, and the body's operations execute in the
//! order they are awaited.
//!
//! # Example
//!
//! ```ignore
//! use futures::FutureExt;
//!
//! client
//!     .run_transaction(|tx| {
//!         async move {
//!             tx.collection("restaurants")
//!                 .update_one(Filter::key(a), Update::new().set("name", "New Restaurant Name"))
//!                 .await?;
//!             tx.collection("restaurants").delete_one(Filter::key(b)).await?;
//!             Ok(())
//!         }
//!         .boxed()
//!     })
//!     .await?;
//! ```

use crate::{backend::StoreBackend, collection::SessionCollection};

/// An open transaction.
pub struct Transaction<'c, B: StoreBackend> {
    backend: &'c B,
    session: B::Session,
}

impl<'c, B: StoreBackend> Transaction<'c, B> {
    pub(crate) fn new(backend: &'c B, session: B::Session) -> Self {
        Self { backend, session }
    }

    /// Identifier of the underlying session.
    pub fn id(&self) -> String {
        self.backend.session_id(&self.session)
    }

    /// Returns a handle on `name` whose operations run inside this transaction.
    pub fn collection(&mut self, name: &str) -> SessionCollection<'_, B> {
        SessionCollection::new(name.to_string(), self.backend, &mut self.session)
    }

    pub(crate) fn session_mut(&mut self) -> &mut B::Session {
        &mut self.session
    }
}
