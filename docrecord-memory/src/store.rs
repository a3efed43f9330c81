//! In-memory storage implementation for document stores.
//!
//! This module provides a simple but complete in-memory backend that keeps collections as
//! ordered vectors of BSON documents behind an async-safe read-write lock.

use async_trait::async_trait;
use bson::{Bson, Document, oid::ObjectId};
use mea::rwlock::RwLock;
use std::{collections::HashMap, sync::Arc};

use docrecord_core::{
    backend::{FindOptions, StoreBackend, StoreBackendBuilder},
    error::{OdmError, OdmResult},
};

use crate::evaluator::{DocumentEvaluator, apply_update, compare_documents, project};

type StoreMap = HashMap<String, Vec<Document>>;

/// Thread-safe in-memory document storage backend.
///
/// This struct implements the [`StoreBackend`] trait to provide a fully functional document
/// store that operates entirely in memory. Documents keep their insertion order, which is the
/// natural order of unsorted queries.
///
/// # Thread Safety
///
/// `InMemoryStore` is cloneable and uses an `Arc`-wrapped internal state, allowing it to be
/// safely shared across async tasks. Multiple clones of the same instance share the same
/// underlying data.
///
/// # Performance
///
/// Queries scan all documents in a collection (no indexing). For small to medium datasets
/// this is typically acceptable. For larger datasets, use the MongoDB backend.
///
/// # Example
///
/// ```ignore
/// use docrecord_memory::InMemoryStore;
/// use docrecord::backend::{FindOptions, StoreBackend};
/// use bson::doc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = InMemoryStore::new();
///
///     store.insert_one("users", doc! { "name": "Alice", "age": 30 }).await?;
///
///     let adults = store
///         .find("users", doc! { "age": { "$gte": 18 } }, FindOptions::default())
///         .await?;
///     assert_eq!(adults.len(), 1);
///
///     Ok(())
/// }
/// ```
#[derive(Default, Clone, Debug)]
pub struct InMemoryStore {
    /// collection name -> documents in insertion order
    store: Arc<RwLock<StoreMap>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory document store.
    pub fn new() -> Self {
        Self {
            store: Arc::new(RwLock::new(StoreMap::new())),
        }
    }

    /// Creates a builder backed by a new empty store.
    ///
    /// Every backend built by the returned builder shares the same data, so a connection
    /// that is closed and reconnected still sees its documents.
    ///
    /// # Example
    ///
    /// ```ignore
    /// use docrecord::prelude::*;
    ///
    /// let db = Database::builder()
    ///     .connection("primary", InMemoryStore::builder())
    ///     .build();
    /// ```
    pub fn builder() -> InMemoryStoreBuilder {
        InMemoryStoreBuilder::default()
    }
}

/// Assigns an `ObjectId` when `_id` is missing, keeping `_id` as the first field.
fn with_id(document: Document) -> (Bson, Document) {
    match document.get("_id") {
        Some(id) => (id.clone(), document),
        None => {
            let id = Bson::ObjectId(ObjectId::new());
            let mut stored = Document::new();

            stored.insert("_id", id.clone());
            stored.extend(document);

            (id, stored)
        }
    }
}

fn duplicate_key(collection: &str, id: &Bson) -> OdmError {
    OdmError::Query(format!("duplicate key {id} in collection {collection}"))
}

fn window(documents: Vec<Document>, skip: Option<u64>, limit: Option<u64>) -> Vec<Document> {
    let skip = usize::try_from(skip.unwrap_or(0)).unwrap_or(usize::MAX);
    // A limit of zero means no limit.
    let limit = match limit {
        None | Some(0) => usize::MAX,
        Some(limit) => usize::try_from(limit).unwrap_or(usize::MAX),
    };

    documents
        .into_iter()
        .skip(skip)
        .take(limit)
        .collect()
}

fn stage_u64(stage: &str, value: &Bson) -> OdmResult<u64> {
    let number = match value {
        Bson::Int32(value) => i64::from(*value),
        Bson::Int64(value) => *value,
        Bson::Double(value) if value.fract() == 0.0 => *value as i64,
        _ => return Err(OdmError::Query(format!("{stage} requires an integer"))),
    };

    u64::try_from(number).map_err(|_| OdmError::Query(format!("{stage} must not be negative")))
}

fn run_pipeline(mut documents: Vec<Document>, pipeline: &[Document]) -> OdmResult<Vec<Document>> {
    for stage in pipeline {
        let mut entries = stage.iter();

        let (Some((name, argument)), None) = (entries.next(), entries.next()) else {
            return Err(OdmError::Query(
                "aggregation stages must have exactly one field".to_string(),
            ));
        };

        documents = match (name.as_str(), argument) {
            ("$match", Bson::Document(filter)) => {
                DocumentEvaluator::filter_documents(documents.iter(), filter)?
            }
            ("$sort", Bson::Document(sort)) => {
                documents.sort_by(|a, b| compare_documents(a, b, sort));
                documents
            }
            ("$skip", value) => window(documents, Some(stage_u64("$skip", value)?), None),
            ("$limit", value) => match stage_u64("$limit", value)? {
                0 => return Err(OdmError::Query("$limit must be positive".to_string())),
                limit => window(documents, None, Some(limit)),
            },
            ("$project", Bson::Document(projection)) => documents
                .iter()
                .map(|document| project(document, projection))
                .collect(),
            ("$count", Bson::String(field)) => match documents.len() {
                0 => Vec::new(),
                count => {
                    let mut counted = Document::new();
                    counted.insert(field.as_str(), i64::try_from(count).unwrap_or(i64::MAX));
                    vec![counted]
                }
            },
            (name, _) => {
                return Err(OdmError::Query(format!(
                    "unsupported aggregation stage {name}"
                )));
            }
        };
    }

    Ok(documents)
}

#[async_trait]
impl StoreBackend for InMemoryStore {
    async fn find(
        &self,
        collection: &str,
        filter: Document,
        options: FindOptions,
    ) -> OdmResult<Vec<Document>> {
        let store = self.store.read().await;
        let Some(documents) = store.get(collection) else {
            return Ok(vec![]);
        };

        let mut matched = DocumentEvaluator::filter_documents(documents.iter(), &filter)?;
        drop(store);

        if let Some(sort) = &options.sort {
            matched.sort_by(|a, b| compare_documents(a, b, sort));
        }

        let matched = window(matched, options.skip, options.limit);

        Ok(match &options.projection {
            Some(projection) => matched
                .iter()
                .map(|document| project(document, projection))
                .collect(),
            None => matched,
        })
    }

    async fn count_documents(&self, collection: &str, filter: Document) -> OdmResult<u64> {
        let store = self.store.read().await;
        let Some(documents) = store.get(collection) else {
            return Ok(0);
        };

        let mut count = 0;
        for document in documents {
            if DocumentEvaluator::new(document).matches(&filter)? {
                count += 1;
            }
        }

        Ok(count)
    }

    async fn insert_one(&self, collection: &str, document: Document) -> OdmResult<Bson> {
        let (id, document) = with_id(document);

        let mut store = self.store.write().await;
        let documents = store
            .entry(collection.to_string())
            .or_default();

        if documents.iter().any(|existing| existing.get("_id") == Some(&id)) {
            return Err(duplicate_key(collection, &id));
        }

        documents.push(document);

        Ok(id)
    }

    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> OdmResult<Vec<Bson>> {
        let prepared: Vec<(Bson, Document)> = documents
            .into_iter()
            .map(with_id)
            .collect();

        let mut store = self.store.write().await;
        let existing = store
            .entry(collection.to_string())
            .or_default();

        // Validate the whole batch before writing any of it.
        for (index, (id, _)) in prepared.iter().enumerate() {
            let taken = existing.iter().any(|document| document.get("_id") == Some(id))
                || prepared[..index].iter().any(|(other, _)| other == id);

            if taken {
                return Err(duplicate_key(collection, id));
            }
        }

        let mut ids = Vec::with_capacity(prepared.len());
        for (id, document) in prepared {
            existing.push(document);
            ids.push(id);
        }

        Ok(ids)
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> OdmResult<u64> {
        let mut store = self.store.write().await;
        let Some(documents) = store.get_mut(collection) else {
            return Ok(0);
        };

        let mut modified = 0;
        for document in documents.iter_mut() {
            if !DocumentEvaluator::new(document).matches(&filter)? {
                continue;
            }

            let mut updated = document.clone();
            if apply_update(&mut updated, &update)? {
                *document = updated;
                modified += 1;
            }
        }

        Ok(modified)
    }

    async fn delete_many(&self, collection: &str, filter: Document) -> OdmResult<u64> {
        let mut store = self.store.write().await;
        let Some(documents) = store.get_mut(collection) else {
            return Ok(0);
        };

        // Evaluate everything first so a bad filter leaves the collection untouched.
        let mut matched = Vec::with_capacity(documents.len());
        for document in documents.iter() {
            matched.push(DocumentEvaluator::new(document).matches(&filter)?);
        }

        let deleted = matched.iter().filter(|m| **m).count() as u64;
        let mut matched = matched.into_iter();
        documents.retain(|_| !matched.next().unwrap_or(false));

        Ok(deleted)
    }

    async fn aggregate(
        &self,
        collection: &str,
        pipeline: Vec<Document>,
    ) -> OdmResult<Vec<Document>> {
        let documents = self
            .store
            .read()
            .await
            .get(collection)
            .cloned()
            .unwrap_or_default();

        run_pipeline(documents, &pipeline)
    }

    async fn create_collection(&self, name: &str) -> OdmResult<()> {
        tracing::trace!(collection = name, "creating in-memory collection");

        self.store
            .write()
            .await
            .entry(name.to_string())
            .or_default();

        Ok(())
    }

    async fn drop_collection(&self, name: &str) -> OdmResult<()> {
        tracing::trace!(collection = name, "dropping in-memory collection");

        self.store
            .write()
            .await
            .remove(name);

        Ok(())
    }

    async fn list_collections(&self) -> OdmResult<Vec<String>> {
        let mut names: Vec<String> = self
            .store
            .read()
            .await
            .keys()
            .cloned()
            .collect();

        names.sort();

        Ok(names)
    }
}

/// Builder for connecting to an [`InMemoryStore`].
///
/// The builder owns a store handle and hands out clones of it, so every backend it builds
/// shares the same documents.
///
/// # Example
///
/// ```ignore
/// use docrecord_memory::{InMemoryStore, InMemoryStoreBuilder};
///
/// let store = InMemoryStore::new();
/// let db = Database::builder()
///     .connection("primary", InMemoryStoreBuilder::from_store(store.clone()))
///     .build();
/// ```
#[derive(Default, Clone, Debug)]
pub struct InMemoryStoreBuilder {
    store: InMemoryStore,
}

impl InMemoryStoreBuilder {
    /// A builder handing out clones of an existing store.
    pub fn from_store(store: InMemoryStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl StoreBackendBuilder for InMemoryStoreBuilder {
    type Backend = InMemoryStore;

    /// Returns a handle to the builder's store. This always succeeds.
    async fn build(&self) -> OdmResult<Self::Backend> {
        Ok(self.store.clone())
    }
}
