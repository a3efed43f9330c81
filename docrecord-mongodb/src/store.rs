use async_trait::async_trait;
use bson::{Bson, Document, doc};
use futures::TryStreamExt;
use mongodb::{
    Client, Collection as MongoCollection,
    error::{Error as MongoError, ErrorKind},
    options::{ClientOptions, FindOptions as MongoFindOptions},
};

use docrecord_core::{
    backend::{FindOptions, StoreBackend, StoreBackendBuilder},
    error::{OdmError, OdmResult},
};

/// Server error code returned when creating a collection that already exists.
const NAMESPACE_EXISTS: i32 = 48;
/// Server error code returned when dropping a collection that does not exist.
const NAMESPACE_NOT_FOUND: i32 = 26;

#[derive(Debug)]
pub struct MongoDbStore {
    client: Client,
    database: String,
}

impl MongoDbStore {
    pub fn new(client: Client, database: String) -> Self {
        Self { client, database }
    }

    pub fn builder(dsn: &str, database: &str) -> MongoDbStoreBuilder {
        MongoDbStoreBuilder::new(dsn, database)
    }

    fn get_collection(&self, collection_name: &str) -> MongoCollection<Document> {
        self.client
            .database(&self.database)
            .collection(collection_name)
    }
}

fn query_error(err: MongoError) -> OdmError {
    OdmError::Query(err.to_string())
}

fn is_command_error(err: &MongoError, code: i32) -> bool {
    matches!(err.kind.as_ref(), ErrorKind::Command(command) if command.code == code)
}

fn driver_options(options: FindOptions) -> MongoFindOptions {
    let mut driver = MongoFindOptions::default();

    driver.projection = options.projection;
    driver.sort = options.sort;
    driver.limit = options
        .limit
        .map(|limit| i64::try_from(limit).unwrap_or(i64::MAX));
    driver.skip = options.skip;

    driver
}

#[async_trait]
impl StoreBackend for MongoDbStore {
    async fn find(
        &self,
        collection: &str,
        filter: Document,
        options: FindOptions,
    ) -> OdmResult<Vec<Document>> {
        self.get_collection(collection)
            .find(filter)
            .with_options(driver_options(options))
            .await
            .map_err(query_error)?
            .try_collect::<Vec<Document>>()
            .await
            .map_err(query_error)
    }

    async fn count_documents(&self, collection: &str, filter: Document) -> OdmResult<u64> {
        self.get_collection(collection)
            .count_documents(filter)
            .await
            .map_err(query_error)
    }

    async fn insert_one(&self, collection: &str, document: Document) -> OdmResult<Bson> {
        let result = self
            .get_collection(collection)
            .insert_one(document)
            .await
            .map_err(query_error)?;

        Ok(result.inserted_id)
    }

    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> OdmResult<Vec<Bson>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let mut inserted: Vec<(usize, Bson)> = self
            .get_collection(collection)
            .insert_many(documents)
            .await
            .map_err(query_error)?
            .inserted_ids
            .into_iter()
            .collect();

        inserted.sort_by_key(|(index, _)| *index);

        Ok(inserted.into_iter().map(|(_, id)| id).collect())
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> OdmResult<u64> {
        let result = self
            .get_collection(collection)
            .update_many(filter, update)
            .await
            .map_err(query_error)?;

        Ok(result.modified_count)
    }

    async fn delete_many(&self, collection: &str, filter: Document) -> OdmResult<u64> {
        let result = self
            .get_collection(collection)
            .delete_many(filter)
            .await
            .map_err(query_error)?;

        Ok(result.deleted_count)
    }

    async fn aggregate(
        &self,
        collection: &str,
        pipeline: Vec<Document>,
    ) -> OdmResult<Vec<Document>> {
        self.get_collection(collection)
            .aggregate(pipeline)
            .await
            .map_err(query_error)?
            .try_collect::<Vec<Document>>()
            .await
            .map_err(query_error)
    }

    async fn create_collection(&self, name: &str) -> OdmResult<()> {
        match self
            .client
            .database(&self.database)
            .create_collection(name)
            .await
        {
            Err(err) if !is_command_error(&err, NAMESPACE_EXISTS) => Err(query_error(err)),
            _ => Ok(()),
        }
    }

    async fn drop_collection(&self, name: &str) -> OdmResult<()> {
        match self.get_collection(name).drop().await {
            Err(err) if !is_command_error(&err, NAMESPACE_NOT_FOUND) => Err(query_error(err)),
            _ => Ok(()),
        }
    }

    async fn list_collections(&self) -> OdmResult<Vec<String>> {
        self.client
            .database(&self.database)
            .list_collection_names()
            .await
            .map_err(query_error)
    }

    async fn close(&self) -> OdmResult<()> {
        self.client
            .clone()
            .shutdown()
            .await;

        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct MongoDbStoreBuilder {
    dsn: String,
    database: String,
}

impl MongoDbStoreBuilder {
    pub fn new(dsn: &str, database: &str) -> Self {
        Self {
            dsn: dsn.to_string(),
            database: database.to_string(),
        }
    }
}

#[async_trait]
impl StoreBackendBuilder for MongoDbStoreBuilder {
    type Backend = MongoDbStore;

    /// Parses the connection string and pings the server before handing out the store.
    async fn build(&self) -> OdmResult<Self::Backend> {
        let options = ClientOptions::parse(&self.dsn)
            .await
            .map_err(|e| OdmError::Backend(e.to_string()))?;
        let client = Client::with_options(options)
            .map_err(|e| OdmError::Backend(e.to_string()))?;

        client
            .database(&self.database)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| OdmError::Backend(e.to_string()))?;

        tracing::debug!(database = %self.database, "connected to mongodb");

        Ok(MongoDbStore::new(client, self.database.clone()))
    }
}
