use futures::{FutureExt, channel::oneshot};
use serde::{Deserialize, Serialize};

use docstore::{memory::InMemoryStore, prelude::*};

const RESTAURANTS: &str = "restaurants";

fn sample_restaurants() -> Vec<Document> {
    vec![
        doc! { "name": "Riviera Caterer", "borough": "Brooklyn", "cuisine": "American", "stars": 4 },
        doc! { "name": "Wendy's", "borough": "Brooklyn", "cuisine": "American", "stars": 2 },
        doc! { "name": "Nick's", "borough": "Brooklyn", "cuisine": "Pizza", "stars": 5 },
        doc! { "name": "Tony's", "borough": "Brooklyn", "cuisine": "Pizza", "stars": 3 },
        doc! { "name": "Sal's", "borough": "Brooklyn", "cuisine": "Pizza", "stars": 4 },
        doc! { "name": "Wok Inn", "borough": "Brooklyn", "cuisine": "Chinese", "stars": 3 },
        doc! { "name": "Morris Park Bake Shop", "borough": "Bronx", "cuisine": "Bakery", "stars": 5 },
        doc! { "name": "Taste The Tropics", "borough": "Queens", "cuisine": "Caribbean", "stars": 4 },
        doc! { "name": "Queens Pizza", "borough": "Queens", "cuisine": "Pizza", "stars": 1 },
        doc! { "name": "Dj Reynolds Pub", "borough": "Manhattan", "cuisine": "Irish", "stars": 3 },
    ]
}

async fn connect_with(documents: Vec<Document>) -> DocumentStoreClient<InMemoryStore> {
    DocumentStoreClient::connect(InMemoryStore::builder().with_documents(RESTAURANTS, documents))
        .await
        .unwrap()
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct Restaurant {
    name: String,
    borough: String,
    cuisine: String,
}

#[tokio::test]
async fn inserted_document_is_found_by_its_key() {
    let client = connect_with(Vec::new()).await;
    let restaurants = client.collection(RESTAURANTS);

    let key = restaurants
        .insert_one(doc! { "name": "Nick's", "borough": "Brooklyn" })
        .await
        .unwrap();

    let found = restaurants.find_one(Filter::key(key.clone())).await.unwrap();
    assert_eq!(found, Some(doc! { "name": "Nick's", "borough": "Brooklyn", "_id": key }));
}

#[tokio::test]
async fn find_one_without_match_is_none() {
    let client = connect_with(sample_restaurants()).await;

    let found = client
        .collection(RESTAURANTS)
        .find_one(Filter::eq("borough", "Staten Island"))
        .await
        .unwrap();

    assert_eq!(found, None);
}

#[tokio::test]
async fn find_many_limits_and_reports_total() {
    let client = connect_with(sample_restaurants()).await;
    let restaurants = client.collection(RESTAURANTS);

    let limited = restaurants
        .find_many(Query::builder().filter(Filter::eq("borough", "Brooklyn")).limit(3).build())
        .await
        .unwrap();
    assert_eq!(limited.len(), 3);
    assert_eq!(limited.total_count, 6);

    let everything = restaurants.find_many(Query::new()).await.unwrap();
    assert_eq!(everything.len() as u64, restaurants.count(Filter::all()).await.unwrap());
    assert_eq!(everything.total_count, 10);

    let none = restaurants
        .find_many(Query::builder().limit(0).build())
        .await
        .unwrap();
    assert!(none.is_empty());
    assert_eq!(none.total_count, 10);
}

#[tokio::test]
async fn find_many_sorts_projects_and_deserializes() {
    let client = connect_with(sample_restaurants()).await;

    let found = client
        .collection(RESTAURANTS)
        .find_many_as::<Restaurant>(
            Query::builder()
                .filter(Filter::eq("cuisine", "Pizza"))
                .sort("stars", SortDirection::Desc)
                .projection(Projection::include(["name", "borough", "cuisine"]))
                .limit(2)
                .build(),
        )
        .await
        .unwrap();

    let names: Vec<&str> = found.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["Nick's", "Sal's"]);
    assert_eq!(found.total_count, 4);
}

#[tokio::test]
async fn insert_many_returns_keys_in_order() {
    let client = connect_with(Vec::new()).await;
    let restaurants = client.collection(RESTAURANTS);

    let keys = restaurants
        .insert_many(vec![doc! { "_id": "a", "name": "First" }, doc! { "name": "Second" }])
        .await
        .unwrap();

    assert_eq!(keys.len(), 2);
    assert_eq!(keys[0], Bson::String("a".into()));
    assert!(matches!(keys[1], Bson::ObjectId(_)));
    assert!(restaurants.insert_many(Vec::new()).await.unwrap().is_empty());
}

#[tokio::test]
async fn duplicate_keys_are_rejected() {
    let client = connect_with(vec![doc! { "_id": 1, "name": "Nick's" }]).await;
    let restaurants = client.collection(RESTAURANTS);

    let err = restaurants.insert_one(doc! { "_id": 1, "name": "Other" }).await.unwrap_err();
    assert!(matches!(err, DocumentStoreError::DuplicateKey { ref collection, .. } if collection == RESTAURANTS));

    let err = restaurants
        .insert_many(vec![doc! { "_id": 2 }, doc! { "_id": 1 }, doc! { "_id": 3 }])
        .await
        .unwrap_err();
    match err {
        DocumentStoreError::PartialInsert { inserted, source } => {
            assert_eq!(inserted, vec![Bson::Int32(2)]);
            assert!(source.is_duplicate_key());
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(restaurants.count(Filter::all()).await.unwrap(), 2);
}

#[tokio::test]
async fn update_one_without_match_changes_nothing() {
    let client = connect_with(sample_restaurants()).await;

    let outcome = client
        .collection(RESTAURANTS)
        .update_one(Filter::eq("name", "Nowhere"), Update::new().set("cuisine", "Thai"))
        .await
        .unwrap();

    assert_eq!(outcome, UpdateOutcome { matched_count: 0, modified_count: 0 });
}

#[tokio::test]
async fn update_many_counts_matches_and_modifications() {
    let client = connect_with(sample_restaurants()).await;
    let restaurants = client.collection(RESTAURANTS);

    let outcome = restaurants
        .update_many(Filter::eq("cuisine", "Pizza"), Update::new().set("borough", "Brooklyn"))
        .await
        .unwrap();
    assert_eq!(outcome, UpdateOutcome { matched_count: 4, modified_count: 1 });

    let outcome = restaurants
        .update_one(Filter::eq("name", "Nick's"), Update::new().set("name", "New Restaurant Name"))
        .await
        .unwrap();
    assert_eq!(outcome, UpdateOutcome { matched_count: 1, modified_count: 1 });
    assert_eq!(restaurants.count(Filter::eq("name", "New Restaurant Name")).await.unwrap(), 1);
}

#[tokio::test]
async fn malformed_updates_never_reach_the_store() {
    let client = connect_with(sample_restaurants()).await;
    let restaurants = client.collection(RESTAURANTS);

    let err = restaurants.update_one(Filter::all(), Update::new()).await.unwrap_err();
    assert!(matches!(err, DocumentStoreError::Query(_)));

    let err = restaurants
        .update_many(Filter::all(), Update::new().set(KEY_FIELD, 5))
        .await
        .unwrap_err();
    assert!(matches!(err, DocumentStoreError::Query(_)));
}

#[tokio::test]
async fn delete_one_and_delete_many() {
    let client = connect_with(sample_restaurants()).await;
    let restaurants = client.collection(RESTAURANTS);

    let deleted = restaurants.delete_one(Filter::eq("borough", "Queens")).await.unwrap();
    assert_eq!(deleted.deleted_count, 1);

    let deleted = restaurants.delete_one(Filter::eq("borough", "Staten Island")).await.unwrap();
    assert_eq!(deleted.deleted_count, 0);

    let deleted = restaurants.delete_many(Filter::all()).await.unwrap();
    assert_eq!(deleted.deleted_count, 9);
    assert_eq!(restaurants.count(Filter::all()).await.unwrap(), 0);
}

#[tokio::test]
async fn brooklyn_cuisine_counts() {
    let client = connect_with(sample_restaurants()).await;

    let counts = client
        .collection(RESTAURANTS)
        .aggregate(
            Pipeline::new()
                .filter(Filter::eq("borough", "Brooklyn"))
                .group(Group::by("cuisine").count("count"))
                .sort("count", SortDirection::Desc)
                .limit(10),
        )
        .await
        .unwrap();

    assert!(counts.len() <= 10);
    assert_eq!(
        counts,
        vec![
            doc! { "_id": "Pizza", "count": 3 },
            doc! { "_id": "American", "count": 2 },
            doc! { "_id": "Chinese", "count": 1 },
        ]
    );
}

#[tokio::test]
async fn empty_pipeline_is_rejected() {
    let client = connect_with(sample_restaurants()).await;

    let err = client.collection(RESTAURANTS).aggregate(Pipeline::new()).await.unwrap_err();
    assert!(matches!(err, DocumentStoreError::Query(_)));
}

#[tokio::test]
async fn transaction_commits_all_operations() {
    let client = connect_with(vec![doc! { "_id": 1, "name": "Old Name" }, doc! { "_id": 2, "name": "Doomed" }]).await;

    let deleted = client
        .run_transaction(|tx| {
            async move {
                tx.collection(RESTAURANTS)
                    .update_one(Filter::key(1), Update::new().set("name", "New Restaurant Name"))
                    .await?;
                let outcome = tx.collection(RESTAURANTS).delete_one(Filter::key(2)).await?;
                Ok::<_, DocumentStoreError>(outcome.deleted_count)
            }
            .boxed()
        })
        .await
        .unwrap();

    assert_eq!(deleted, 1);
    let restaurants = client.collection(RESTAURANTS);
    assert_eq!(
        restaurants.find_many(Query::new()).await.unwrap().documents,
        vec![doc! { "_id": 1, "name": "New Restaurant Name" }]
    );
}

#[tokio::test]
async fn transaction_rolls_back_when_the_body_fails() {
    let client = connect_with(vec![doc! { "_id": 1, "name": "Old Name" }]).await;

    let err = client
        .run_transaction(|tx| {
            async move {
                tx.collection(RESTAURANTS)
                    .update_one(Filter::key(1), Update::new().set("name", "New Restaurant Name"))
                    .await?;

                let outcome = tx.collection(RESTAURANTS).delete_one(Filter::key(404)).await?;
                if outcome.deleted_count == 0 {
                    return Err(DocumentStoreError::Query("no restaurant to delete".into()));
                }
                Ok::<_, DocumentStoreError>(())
            }
            .boxed()
        })
        .await
        .unwrap_err();

    assert!(matches!(err, DocumentStoreError::TransactionAborted { .. }));
    assert!(matches!(err.root_cause(), DocumentStoreError::Query(_)));

    let unchanged = client.collection(RESTAURANTS).find_one(Filter::key(1)).await.unwrap();
    assert_eq!(unchanged, Some(doc! { "_id": 1, "name": "Old Name" }));
}

#[tokio::test]
async fn failed_operation_inside_transaction_aborts_it() {
    let client = connect_with(vec![doc! { "_id": 1, "name": "Nick's" }]).await;

    let err = client
        .run_transaction(|tx| {
            async move {
                tx.collection(RESTAURANTS).insert_one(doc! { "_id": 2, "name": "Tony's" }).await?;
                tx.collection(RESTAURANTS).insert_one(doc! { "_id": 1, "name": "Again" }).await?;
                Ok::<_, DocumentStoreError>(())
            }
            .boxed()
        })
        .await
        .unwrap_err();

    assert!(err.root_cause().is_duplicate_key());
    assert_eq!(client.collection(RESTAURANTS).count(Filter::all()).await.unwrap(), 1);
}

#[tokio::test]
async fn operations_after_shutdown_fail_with_connection_errors() {
    let client = connect_with(sample_restaurants()).await;

    client.shutdown().await.unwrap();
    client.shutdown().await.unwrap();
    assert!(client.is_closed().await);

    let restaurants = client.collection(RESTAURANTS);
    assert!(restaurants.find_one(Filter::all()).await.unwrap_err().is_connection());
    assert!(restaurants.insert_one(doc! { "name": "Late" }).await.unwrap_err().is_connection());
    assert!(client.ping().await.unwrap_err().is_connection());

    let err = client
        .run_transaction(|_| async move { Ok::<_, DocumentStoreError>(()) }.boxed())
        .await
        .unwrap_err();
    assert!(err.is_connection());
}

#[tokio::test]
async fn shutdown_waits_for_in_flight_operations() {
    let client = connect_with(sample_restaurants()).await;
    let (started, body_started) = oneshot::channel::<()>();
    let (release, body_released) = oneshot::channel::<()>();

    let transaction = client.run_transaction(move |tx| {
        async move {
            let _ = started.send(());
            body_released
                .await
                .map_err(|_| DocumentStoreError::Backend("release signal dropped".into()))?;
            tx.collection(RESTAURANTS).count(Filter::all()).await
        }
        .boxed()
    });

    let closing = async {
        body_started.await.unwrap();

        let shutdown = client.shutdown();
        futures::pin_mut!(shutdown);
        assert!(futures::poll!(shutdown.as_mut()).is_pending());
        assert!(client.backend().ping().await.is_ok());

        release.send(()).unwrap();
        shutdown.await
    };

    let (counted, closed) = tokio::join!(transaction, closing);

    assert_eq!(counted.unwrap(), 10);
    closed.unwrap();
    assert!(client.is_closed().await);
    assert!(client.collection(RESTAURANTS).count(Filter::all()).await.unwrap_err().is_connection());
}

#[tokio::test]
async fn lost_connection_surfaces_as_connection_error() {
    let client = connect_with(sample_restaurants()).await;

    client.backend().shutdown().await.unwrap();

    let err = client.collection(RESTAURANTS).count(Filter::all()).await.unwrap_err();
    assert!(err.is_connection());
    assert!(!client.is_closed().await);
}

#[tokio::test]
async fn run_scoped_shuts_down_on_every_path() {
    let store = InMemoryStore::new();

    let client = DocumentStoreClient::connect(InMemoryStore::builder()).await.unwrap();
    let value = client
        .run_scoped(|client| {
            async move {
                client.collection(RESTAURANTS).insert_one(doc! { "name": "Nick's" }).await?;
                client.collection(RESTAURANTS).count(Filter::all()).await
            }
            .boxed()
        })
        .await
        .unwrap();
    assert_eq!(value, 1);

    let client = DocumentStoreClient::new(store.clone());
    let err = client
        .run_scoped(|_| async move { Err::<(), _>(DocumentStoreError::Query("boom".into())) }.boxed())
        .await
        .unwrap_err();
    assert!(matches!(err, DocumentStoreError::Query(_)));
    assert!(store.ping().await.unwrap_err().is_connection());
}

#[tokio::test]
async fn connect_reports_bad_seed_data() {
    let result = DocumentStoreClient::connect(
        InMemoryStore::builder().with_documents(RESTAURANTS, vec![doc! { "_id": 1 }, doc! { "_id": 1 }]),
    )
    .await;

    assert!(matches!(result, Err(DocumentStoreError::Initialization(_))));
}

#[tokio::test]
async fn collections_can_be_listed_and_dropped() {
    let client = connect_with(sample_restaurants()).await;
    client.collection("neighborhoods").insert_one(doc! { "name": "Bedford" }).await.unwrap();

    assert_eq!(client.list_collections().await.unwrap(), vec!["neighborhoods", RESTAURANTS]);

    client.drop_collection("neighborhoods").await.unwrap();
    client.drop_collection("never-existed").await.unwrap();
    assert_eq!(client.list_collections().await.unwrap(), vec![RESTAURANTS]);
}
