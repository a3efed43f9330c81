//! Named connections and the database handle.
//!
//! A [`Database`] is a cheap, cloneable handle over a registry of named [`Connection`]s.
//! Connections are lazy: the backend is only built the first time a query needs it, or when
//! [`Connection::connect`] is called explicitly. Models pick their connection through
//! [`Model::connection_name`](crate::model::Model::connection_name), falling back to the
//! default connection.
//!
//! # Example
//!
//! ```ignore
//! use docrecord::{connection::Database, memory::InMemoryStore};
//!
//! let db = Database::builder()
//!     .connection("primary", InMemoryStore::builder())
//!     .connection("analytics", InMemoryStore::builder())
//!     .default_connection("primary")
//!     .build();
//!
//! let users = db.collection("users").where_eq("active", true).exec().await?;
//! ```

use mea::rwlock::RwLock;
use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use crate::{
    backend::{DynStoreBackendBuilder, StoreBackend, StoreBackendBuilder},
    error::{OdmError, OdmResult},
    event::{ConnectionEvent, Emitter, EventListener},
    query::QueryBuilder,
};

const DEFAULT_CONNECTION: &str = "primary";

/// Handle over the registry of named connections.
///
/// Cloning is cheap; all clones share the same connections and listeners. Pass it explicitly
/// to model finders and records instead of keeping a global client.
#[derive(Debug, Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

#[derive(Debug)]
struct DatabaseInner {
    default: String,
    connections: HashMap<String, Connection>,
    emitter: Emitter,
}

impl Database {
    /// Creates a builder for registering connections and listeners.
    pub fn builder() -> DatabaseBuilder {
        DatabaseBuilder::default()
    }

    /// Returns the name of the default connection.
    pub fn default_connection(&self) -> &str {
        &self.inner.default
    }

    /// Looks up a connection by name, or the default connection when `name` is `None`.
    ///
    /// # Errors
    ///
    /// Returns [`OdmError::ConnectionNotFound`] if no connection with that name was registered.
    pub fn connection(&self, name: Option<&str>) -> OdmResult<&Connection> {
        let name = name.unwrap_or(&self.inner.default);

        self.inner
            .connections
            .get(name)
            .ok_or_else(|| OdmError::ConnectionNotFound(name.to_string()))
    }

    /// Names of all registered connections.
    pub fn connection_names(&self) -> Vec<&str> {
        self.inner
            .connections
            .keys()
            .map(String::as_str)
            .collect()
    }

    /// Returns an unbound query builder over a collection of the default connection.
    pub fn collection(&self, name: &str) -> QueryBuilder {
        QueryBuilder::new(self, None, name)
    }

    /// Returns an unbound query builder over a collection of a named connection.
    pub fn collection_on(&self, connection: &str, name: &str) -> QueryBuilder {
        QueryBuilder::new(self, Some(connection), name)
    }

    /// Disconnects every connection that is currently connected.
    pub async fn close(&self) -> OdmResult<()> {
        for connection in self.inner.connections.values() {
            connection.disconnect().await?;
        }

        Ok(())
    }

    pub(crate) fn emitter(&self) -> &Emitter {
        &self.inner.emitter
    }
}

/// A named, lazily connected backend.
#[derive(Debug, Clone)]
pub struct Connection {
    name: String,
    builder: Arc<dyn DynStoreBackendBuilder>,
    backend: Arc<RwLock<Option<Arc<dyn StoreBackend>>>>,
    ready: Arc<AtomicBool>,
    emitter: Emitter,
}

impl Connection {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the backend has been built and not closed since.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Builds the backend if it is not connected yet and returns it.
    ///
    /// Concurrent callers wait for a single connect attempt.
    ///
    /// # Errors
    ///
    /// Returns [`OdmError::ConnectionRefused`] carrying the cause when the backend cannot be
    /// built. A `connection:error` event is emitted in that case.
    pub async fn connect(&self) -> OdmResult<Arc<dyn StoreBackend>> {
        let mut backend = self.backend.write().await;

        if let Some(existing) = backend.as_ref() {
            return Ok(existing.clone());
        }

        match self.builder.build_dyn().await {
            Ok(built) => {
                *backend = Some(built.clone());
                self.ready.store(true, Ordering::Release);
                self.emitter.connection(ConnectionEvent::Connect {
                    connection: self.name.clone(),
                });

                Ok(built)
            }
            Err(err) => {
                self.emitter.connection(ConnectionEvent::Error {
                    connection: self.name.clone(),
                    error: err.to_string(),
                });

                Err(OdmError::ConnectionRefused(self.name.clone(), err.to_string()))
            }
        }
    }

    /// Returns the connected backend, connecting first if needed.
    pub async fn backend(&self) -> OdmResult<Arc<dyn StoreBackend>> {
        let existing = self.backend.read().await.as_ref().cloned();

        match existing {
            Some(backend) => Ok(backend),
            None => self.connect().await,
        }
    }

    /// Closes the backend. A later query connects again.
    pub async fn disconnect(&self) -> OdmResult<()> {
        let closed = self.backend.write().await.take();

        if let Some(backend) = closed {
            self.ready.store(false, Ordering::Release);

            if let Err(err) = backend.close().await {
                self.emitter.connection(ConnectionEvent::Error {
                    connection: self.name.clone(),
                    error: err.to_string(),
                });

                return Err(err);
            }

            self.emitter.connection(ConnectionEvent::Disconnect {
                connection: self.name.clone(),
            });
        }

        Ok(())
    }

    /// Creates a collection, ignoring collections that already exist.
    pub async fn create_collection(&self, name: &str) -> OdmResult<()> {
        self.backend().await?.create_collection(name).await
    }

    /// Drops a collection, ignoring collections that do not exist.
    pub async fn drop_collection(&self, name: &str) -> OdmResult<()> {
        self.backend().await?.drop_collection(name).await
    }

    /// Lists the collections of this connection.
    pub async fn list_collections(&self) -> OdmResult<Vec<String>> {
        self.backend().await?.list_collections().await
    }
}

/// Builder for [`Database`].
#[derive(Debug, Default)]
pub struct DatabaseBuilder {
    default: Option<String>,
    connections: Vec<(String, Arc<dyn DynStoreBackendBuilder>)>,
    listeners: Vec<Arc<dyn EventListener>>,
}

impl DatabaseBuilder {
    /// Registers a named connection. Registering a name twice replaces the earlier builder.
    pub fn connection<B>(mut self, name: impl Into<String>, builder: B) -> Self
    where
        B: StoreBackendBuilder + 'static,
    {
        let name = name.into();

        self.connections.retain(|(existing, _)| existing != &name);
        self.connections.push((name, Arc::new(builder)));
        self
    }

    /// Sets the default connection. Defaults to the first registered connection.
    pub fn default_connection(mut self, name: impl Into<String>) -> Self {
        self.default = Some(name.into());
        self
    }

    /// Adds a listener receiving query and connection events.
    pub fn listener<L>(mut self, listener: L) -> Self
    where
        L: EventListener + 'static,
    {
        self.listeners.push(Arc::new(listener));
        self
    }

    /// Adds an already shared listener.
    pub fn shared_listener(mut self, listener: Arc<dyn EventListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn build(self) -> Database {
        let emitter = Emitter::new(self.listeners);
        let default = self
            .default
            .or_else(|| self.connections.first().map(|(name, _)| name.clone()))
            .unwrap_or_else(|| DEFAULT_CONNECTION.to_string());

        let connections = self
            .connections
            .into_iter()
            .map(|(name, builder)| {
                let connection = Connection {
                    name: name.clone(),
                    builder,
                    backend: Arc::new(RwLock::new(None)),
                    ready: Arc::new(AtomicBool::new(false)),
                    emitter: emitter.clone(),
                };

                (name, connection)
            })
            .collect();

        Database {
            inner: Arc::new(DatabaseInner { default, connections, emitter }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::FindOptions,
        event::{ConnectionEvent, QueryEvent, QueryOperation},
        filter::Filtered,
    };
    use async_trait::async_trait;
    use bson::{Bson, Document};
    use std::sync::Mutex;

    #[derive(Debug)]
    struct NullBackend;

    #[async_trait]
    impl StoreBackend for NullBackend {
        async fn find(&self, _: &str, _: Document, _: FindOptions) -> OdmResult<Vec<Document>> {
            Ok(Vec::new())
        }

        async fn count_documents(&self, _: &str, _: Document) -> OdmResult<u64> {
            Ok(0)
        }

        async fn insert_one(&self, _: &str, _: Document) -> OdmResult<Bson> {
            Ok(Bson::Null)
        }

        async fn insert_many(&self, _: &str, documents: Vec<Document>) -> OdmResult<Vec<Bson>> {
            Ok(documents.iter().map(|_| Bson::Null).collect())
        }

        async fn update_many(&self, _: &str, _: Document, _: Document) -> OdmResult<u64> {
            Ok(0)
        }

        async fn delete_many(&self, _: &str, _: Document) -> OdmResult<u64> {
            Ok(0)
        }

        async fn aggregate(&self, _: &str, _: Vec<Document>) -> OdmResult<Vec<Document>> {
            Ok(Vec::new())
        }

        async fn create_collection(&self, _: &str) -> OdmResult<()> {
            Ok(())
        }

        async fn drop_collection(&self, _: &str) -> OdmResult<()> {
            Ok(())
        }

        async fn list_collections(&self) -> OdmResult<Vec<String>> {
            Ok(Vec::new())
        }
    }

    #[derive(Debug)]
    struct NullBuilder {
        reachable: bool,
    }

    #[async_trait]
    impl StoreBackendBuilder for NullBuilder {
        type Backend = NullBackend;

        async fn build(&self) -> OdmResult<NullBackend> {
            match self.reachable {
                true => Ok(NullBackend),
                false => Err(OdmError::Backend("host unreachable".to_string())),
            }
        }
    }

    #[derive(Debug, Default)]
    struct Recorder {
        queries: Mutex<Vec<QueryEvent>>,
        connections: Mutex<Vec<ConnectionEvent>>,
    }

    impl EventListener for Recorder {
        fn on_query(&self, event: &QueryEvent) {
            self.queries.lock().unwrap().push(event.clone());
        }

        fn on_connection(&self, event: &ConnectionEvent) {
            self.connections.lock().unwrap().push(event.clone());
        }
    }

    fn database(recorder: &Arc<Recorder>) -> Database {
        Database::builder()
            .connection("primary", NullBuilder { reachable: true })
            .connection("offline", NullBuilder { reachable: false })
            .shared_listener(recorder.clone())
            .build()
    }

    #[test]
    fn test_default_connection_and_lookup() {
        let db = database(&Arc::new(Recorder::default()));

        assert_eq!(db.default_connection(), "primary");
        assert!(db.connection(None).is_ok());
        assert!(matches!(
            db.connection(Some("missing")),
            Err(OdmError::ConnectionNotFound(name)) if name == "missing"
        ));
    }

    #[tokio::test]
    async fn test_lazy_connect_and_disconnect() {
        let recorder = Arc::new(Recorder::default());
        let db = database(&recorder);
        let connection = db.connection(None).unwrap();

        assert!(!connection.is_ready());
        assert!(recorder.connections.lock().unwrap().is_empty());

        db.collection("users").exec().await.unwrap();
        assert!(connection.is_ready());

        db.close().await.unwrap();
        assert!(!connection.is_ready());

        let names: Vec<&str> = recorder
            .connections
            .lock()
            .unwrap()
            .iter()
            .map(ConnectionEvent::name)
            .collect();
        assert_eq!(names, vec!["connection:connect", "connection:disconnect"]);
    }

    #[tokio::test]
    async fn test_refused_connection_emits_error() {
        let recorder = Arc::new(Recorder::default());
        let db = database(&recorder);

        let result = db.collection_on("offline", "users").count().await;

        assert!(matches!(result, Err(OdmError::ConnectionRefused(name, _)) if name == "offline"));
        assert_eq!(
            recorder.connections.lock().unwrap().first().map(ConnectionEvent::name),
            Some("connection:error")
        );

        let queries = recorder.queries.lock().unwrap();
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].operation, QueryOperation::Count);
        assert!(queries[0].is_error());
    }

    #[tokio::test]
    async fn test_every_execution_emits_one_event() {
        let recorder = Arc::new(Recorder::default());
        let db = database(&recorder);

        let users = db
            .collection("users")
            .where_op("age", ">", 18)
            .limit(Some(5));
        users.exec().await.unwrap();
        users.first().await.unwrap();
        users.count().await.unwrap();

        let missing = db
            .collection_on("missing", "users")
            .delete()
            .await;
        assert!(matches!(missing, Err(OdmError::ConnectionNotFound(_))));

        let queries = recorder.queries.lock().unwrap();
        let operations: Vec<QueryOperation> = queries.iter().map(|event| event.operation).collect();

        assert_eq!(
            operations,
            vec![
                QueryOperation::Find,
                QueryOperation::Find,
                QueryOperation::Count,
                QueryOperation::Delete,
            ]
        );
        assert_eq!(queries[0].collection, "users");
        assert_eq!(
            queries[0].description.get_i64("limit").ok(),
            Some(5)
        );
        assert_eq!(queries[3].connection, "missing");
        assert!(queries[3].is_error());
    }
}
