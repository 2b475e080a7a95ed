use async_trait::async_trait;
use bson::{Bson, Document, doc};
use futures::TryStreamExt;
use mongodb::{
    Client, ClientSession, Collection as MongoCollection,
    options::{ClientOptions, FindOneOptions, FindOptions, ServerApi, ServerApiVersion},
};
use tracing::debug;

use docstore_core::{
    backend::{StoreBackend, StoreBackendBuilder},
    config::ClientConfig,
    document::KEY_FIELD,
    error::{DocumentStoreError, DocumentStoreResult},
    outcome::{DeleteOutcome, UpdateOutcome},
    pipeline::Pipeline,
    query::{Expr, Query},
    update::Update,
};

use crate::{
    error::{Failed, NAMESPACE_NOT_FOUND_CODE, command_code, translate, translate_insert_many},
    pipeline::MongoStageTranslator,
    query::{MongoQueryTranslator, projection_document, sort_document, update_document},
};

/// A [`StoreBackend`] over a MongoDB deployment.
///
/// The driver client is internally pooled and cheap to clone; one store owns it for the
/// lifetime of the process.
#[derive(Debug)]
pub struct MongoDbStore {
    client: Client,
    database: String,
}

impl MongoDbStore {
    pub fn new(client: Client, database: String) -> Self {
        Self { client, database }
    }

    pub fn builder(uri: &str, database: &str) -> MongoDbStoreBuilder {
        MongoDbStoreBuilder::new(uri, database)
    }

    fn get_collection(&self, collection_name: &str) -> MongoCollection<Document> {
        self.client.database(&self.database).collection(collection_name)
    }

    fn find_options(query: &Query) -> FindOptions {
        let mut options = FindOptions::default();

        options.limit = query.limit.map(|limit| limit as i64);
        options.skip = query.offset.map(|skip| skip as u64);
        if !query.sort.is_empty() {
            options.sort = Some(sort_document(&query.sort));
        }
        options.projection = query.projection.as_ref().map(projection_document);

        options
    }

    fn find_one_options(query: &Query) -> FindOneOptions {
        let mut options = FindOneOptions::default();

        options.skip = query.offset.map(|skip| skip as u64);
        if !query.sort.is_empty() {
            options.sort = Some(sort_document(&query.sort));
        }
        options.projection = query.projection.as_ref().map(projection_document);

        options
    }
}

#[async_trait]
impl StoreBackend for MongoDbStore {
    type Session = ClientSession;

    async fn ping(&self) -> DocumentStoreResult<()> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| translate(e, Failed::on("admin")))?;

        Ok(())
    }

    async fn find_one(
        &self,
        collection: &str,
        query: &Query,
        session: Option<&mut ClientSession>,
    ) -> DocumentStoreResult<Option<Document>> {
        let filter = MongoQueryTranslator::filter(query.filter.as_ref())?;
        debug!(collection, %filter, "find one");

        let handle = self.get_collection(collection);
        let action = handle
            .find_one(filter)
            .with_options(Self::find_one_options(query));

        match session {
            Some(session) => action.session(session).await,
            None => action.await,
        }
        .map_err(|e| translate(e, Failed::on(collection)))
    }

    async fn find(
        &self,
        collection: &str,
        query: &Query,
        session: Option<&mut ClientSession>,
    ) -> DocumentStoreResult<Vec<Document>> {
        let filter = MongoQueryTranslator::filter(query.filter.as_ref())?;
        debug!(collection, %filter, "find");

        let handle = self.get_collection(collection);
        let action = handle
            .find(filter)
            .with_options(Self::find_options(query));

        match session {
            Some(session) => {
                let mut cursor = action
                    .session(&mut *session)
                    .await
                    .map_err(|e| translate(e, Failed::on(collection)))?;
                cursor.stream(session).try_collect::<Vec<Document>>().await
            }
            None => action
                .await
                .map_err(|e| translate(e, Failed::on(collection)))?
                .try_collect::<Vec<Document>>()
                .await,
        }
        .map_err(|e| translate(e, Failed::on(collection)))
    }

    async fn count(
        &self,
        collection: &str,
        filter: &Expr,
        session: Option<&mut ClientSession>,
    ) -> DocumentStoreResult<u64> {
        let handle = self.get_collection(collection);
        let action = handle.count_documents(MongoQueryTranslator::filter(Some(filter))?);

        match session {
            Some(session) => action.session(session).await,
            None => action.await,
        }
        .map_err(|e| translate(e, Failed::on(collection)))
    }

    async fn insert_one(
        &self,
        collection: &str,
        document: Document,
        session: Option<&mut ClientSession>,
    ) -> DocumentStoreResult<Bson> {
        let key = document.get(KEY_FIELD).cloned().unwrap_or(Bson::Null);
        let handle = self.get_collection(collection);
        let action = handle.insert_one(document);

        let inserted = match session {
            Some(session) => action.session(session).await,
            None => action.await,
        }
        .map_err(|e| translate(e, Failed::on(collection).with_key(&key)))?;

        Ok(inserted.inserted_id)
    }

    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Document>,
        session: Option<&mut ClientSession>,
    ) -> DocumentStoreResult<Vec<Bson>> {
        let keys: Vec<Bson> = documents
            .iter()
            .map(|document| document.get(KEY_FIELD).cloned().unwrap_or(Bson::Null))
            .collect();
        let handle = self.get_collection(collection);
        let action = handle.insert_many(documents);

        match session {
            Some(session) => action.session(session).await,
            None => action.await,
        }
        .map_err(|e| translate_insert_many(e, collection, &keys))?;

        Ok(keys)
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: &Expr,
        update: &Update,
        session: Option<&mut ClientSession>,
    ) -> DocumentStoreResult<UpdateOutcome> {
        let handle = self.get_collection(collection);
        let action = handle
            .update_one(MongoQueryTranslator::filter(Some(filter))?, update_document(update));

        let result = match session {
            Some(session) => action.session(session).await,
            None => action.await,
        }
        .map_err(|e| translate(e, Failed::on(collection)))?;

        Ok(UpdateOutcome { matched_count: result.matched_count, modified_count: result.modified_count })
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: &Expr,
        update: &Update,
        session: Option<&mut ClientSession>,
    ) -> DocumentStoreResult<UpdateOutcome> {
        let handle = self.get_collection(collection);
        let action = handle
            .update_many(MongoQueryTranslator::filter(Some(filter))?, update_document(update));

        let result = match session {
            Some(session) => action.session(session).await,
            None => action.await,
        }
        .map_err(|e| translate(e, Failed::on(collection)))?;

        Ok(UpdateOutcome { matched_count: result.matched_count, modified_count: result.modified_count })
    }

    async fn delete_one(
        &self,
        collection: &str,
        filter: &Expr,
        session: Option<&mut ClientSession>,
    ) -> DocumentStoreResult<DeleteOutcome> {
        let handle = self.get_collection(collection);
        let action = handle.delete_one(MongoQueryTranslator::filter(Some(filter))?);

        let result = match session {
            Some(session) => action.session(session).await,
            None => action.await,
        }
        .map_err(|e| translate(e, Failed::on(collection)))?;

        Ok(DeleteOutcome { deleted_count: result.deleted_count })
    }

    async fn delete_many(
        &self,
        collection: &str,
        filter: &Expr,
        session: Option<&mut ClientSession>,
    ) -> DocumentStoreResult<DeleteOutcome> {
        let handle = self.get_collection(collection);
        let action = handle.delete_many(MongoQueryTranslator::filter(Some(filter))?);

        let result = match session {
            Some(session) => action.session(session).await,
            None => action.await,
        }
        .map_err(|e| translate(e, Failed::on(collection)))?;

        Ok(DeleteOutcome { deleted_count: result.deleted_count })
    }

    async fn aggregate(
        &self,
        collection: &str,
        pipeline: &Pipeline,
        session: Option<&mut ClientSession>,
    ) -> DocumentStoreResult<Vec<Document>> {
        let stages = MongoStageTranslator::pipeline(pipeline)?;
        debug!(collection, stages = stages.len(), "aggregate");

        let handle = self.get_collection(collection);
        let action = handle.aggregate(stages);

        match session {
            Some(session) => {
                let mut cursor = action
                    .session(&mut *session)
                    .await
                    .map_err(|e| translate(e, Failed::on(collection)))?;
                cursor.stream(session).try_collect::<Vec<Document>>().await
            }
            None => action
                .await
                .map_err(|e| translate(e, Failed::on(collection)))?
                .try_collect::<Vec<Document>>()
                .await,
        }
        .map_err(|e| translate(e, Failed::on(collection)))
    }

    async fn start_transaction(&self) -> DocumentStoreResult<ClientSession> {
        let mut session = self
            .client
            .start_session()
            .await
            .map_err(|e| translate(e, Failed::on(&self.database)))?;

        session
            .start_transaction()
            .await
            .map_err(|e| translate(e, Failed::on(&self.database)))?;

        Ok(session)
    }

    async fn commit_transaction(&self, session: &mut ClientSession) -> DocumentStoreResult<()> {
        session
            .commit_transaction()
            .await
            .map_err(|e| translate(e, Failed::on(&self.database)))
    }

    async fn abort_transaction(&self, session: &mut ClientSession) -> DocumentStoreResult<()> {
        session
            .abort_transaction()
            .await
            .map_err(|e| translate(e, Failed::on(&self.database)))
    }

    fn session_id(&self, session: &ClientSession) -> String {
        match session.id().get("id") {
            Some(Bson::Binary(binary)) => binary
                .bytes
                .iter()
                .map(|byte| format!("{byte:02x}"))
                .collect(),
            _ => session.id().to_string(),
        }
    }

    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>> {
        self.client
            .database(&self.database)
            .list_collection_names()
            .await
            .map_err(|e| translate(e, Failed::on(&self.database)))
    }

    async fn drop_collection(&self, name: &str) -> DocumentStoreResult<()> {
        match self.get_collection(name).drop().await {
            Ok(()) => Ok(()),
            // Servers before 7.0 refuse to drop a missing collection.
            Err(err) if command_code(&err) == Some(NAMESPACE_NOT_FOUND_CODE) => Ok(()),
            Err(err) => Err(translate(err, Failed::on(name))),
        }
    }

    async fn shutdown(&self) -> DocumentStoreResult<()> {
        self.client.clone().shutdown().await;

        Ok(())
    }
}

/// Builder for [`MongoDbStore`], holding the connection settings.
pub struct MongoDbStoreBuilder {
    uri: String,
    database: String,
    app_name: Option<String>,
    strict_api: bool,
}

impl MongoDbStoreBuilder {
    pub fn new(uri: &str, database: &str) -> Self {
        Self {
            uri: uri.to_string(),
            database: database.to_string(),
            app_name: None,
            strict_api: true,
        }
    }

    /// Takes the endpoint, database and client options from `config`.
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            uri: config.uri.clone(),
            database: config.database.clone(),
            app_name: config.app_name.clone(),
            strict_api: config.strict_api,
        }
    }

    pub fn app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = Some(app_name.into());
        self
    }

    /// Pins server API version 1 with strict checking and deprecation errors.
    pub fn strict_api(mut self, strict_api: bool) -> Self {
        self.strict_api = strict_api;
        self
    }
}

#[async_trait]
impl StoreBackendBuilder for MongoDbStoreBuilder {
    type Backend = MongoDbStore;

    async fn build(self) -> DocumentStoreResult<Self::Backend> {
        let mut options = ClientOptions::parse(&self.uri)
            .await
            .map_err(|e| DocumentStoreError::Initialization(e.to_string()))?;

        if self.app_name.is_some() {
            options.app_name = self.app_name;
        }
        if self.strict_api {
            options.server_api = Some(
                ServerApi::builder()
                    .version(ServerApiVersion::V1)
                    .strict(true)
                    .deprecation_errors(true)
                    .build(),
            );
        }

        Ok(MongoDbStore::new(
            Client::with_options(options)
                .map_err(|e| DocumentStoreError::Initialization(e.to_string()))?,
            self.database,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docstore_core::query::{Filter, Projection, SortDirection};

    #[test]
    fn find_options_carry_paging_sort_and_projection() {
        let query = Query::builder()
            .filter(Filter::eq("borough", "Brooklyn"))
            .sort("stars", SortDirection::Desc)
            .offset(2)
            .limit(3)
            .projection(Projection::include(["name"]))
            .build();

        let options = MongoDbStore::find_options(&query);
        assert_eq!(options.limit, Some(3));
        assert_eq!(options.skip, Some(2));
        assert_eq!(options.sort, Some(doc! { "stars": -1 }));
        assert_eq!(options.projection, Some(doc! { "name": 1 }));

        let options = MongoDbStore::find_one_options(&query);
        assert_eq!(options.skip, Some(2));
        assert_eq!(options.sort, Some(doc! { "stars": -1 }));
    }

    #[test]
    fn unsorted_query_leaves_options_empty() {
        let options = MongoDbStore::find_options(&Query::new());

        assert_eq!(options.limit, None);
        assert_eq!(options.sort, None);
        assert_eq!(options.projection, None);
    }

    #[tokio::test]
    async fn builder_creates_store_without_contacting_server() {
        let config = ClientConfig::new("mongodb://localhost:27017", "sample_restaurants")
            .with_app_name("docstore-tests");

        let store = MongoDbStoreBuilder::from_config(&config).build().await.unwrap();
        assert_eq!(store.database, "sample_restaurants");
        assert_eq!(store.get_collection("restaurants").name(), "restaurants");
    }

    #[tokio::test]
    async fn malformed_uri_is_an_initialization_error() {
        let result = MongoDbStore::builder("not-a-mongodb-uri", "sample_restaurants").build().await;

        assert!(matches!(result, Err(DocumentStoreError::Initialization(_))));
    }
}
