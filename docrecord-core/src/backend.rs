//! Storage backend abstraction for the mapper.
//!
//! This module defines the traits that abstract over document store drivers. A backend speaks
//! the MongoDB filter dialect: filters, projections, sorts and update documents are passed
//! through as [`Document`] values produced by the [`filter`](crate::filter) translator.
//!
//! # Traits
//!
//! - [`StoreBackend`]: The core trait for storage backends
//! - [`StoreBackendBuilder`]: Factory trait for creating backend instances lazily
//!
//! # Examples
//!
//! ```ignore
//! use docrecord::backend::{FindOptions, StoreBackend};
//! use bson::doc;
//!
//! let backend = MyBackendImpl::new();
//!
//! let id = backend.insert_one("users", doc! { "name": "Alice", "age": 30 }).await?;
//! let adults = backend
//!     .find("users", doc! { "age": { "$gte": 18 } }, FindOptions::default())
//!     .await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use async_trait::async_trait;
use bson::{Bson, Document};
use std::{fmt::Debug, sync::Arc};

use crate::error::OdmResult;

/// Options applied to a `find` call.
///
/// Empty projection and sort documents are never sent; the query builder only sets them
/// when at least one field was selected or ordered.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    /// Fields to include, as `{ field: 1 }` entries.
    pub projection: Option<Document>,
    /// Sort specification, as `{ field: 1 | -1 }` entries in priority order.
    pub sort: Option<Document>,
    /// Maximum number of documents to return.
    pub limit: Option<u64>,
    /// Number of documents to skip.
    pub skip: Option<u64>,
}

/// Abstract interface for document storage backends.
///
/// Implementers provide the primitives of a MongoDB-style collection: find with options,
/// counting, single and bulk inserts, multi-document updates and deletes, and aggregation
/// pipelines. All filters are native filter documents.
///
/// # Thread Safety
///
/// Implementations must be thread-safe. A backend is shared behind an `Arc` by every query
/// issued against its connection.
///
/// # Error Handling
///
/// Driver failures must be mapped into [`OdmError`](crate::error::OdmError), usually
/// [`OdmError::Query`](crate::error::OdmError::Query).
#[async_trait]
pub trait StoreBackend: Send + Sync + Debug {
    /// Returns every document of `collection` matching `filter`, shaped by `options`.
    async fn find(
        &self,
        collection: &str,
        filter: Document,
        options: FindOptions,
    ) -> OdmResult<Vec<Document>>;

    /// Counts the documents of `collection` matching `filter`.
    async fn count_documents(&self, collection: &str, filter: Document) -> OdmResult<u64>;

    /// Inserts a single document and returns its identifier.
    ///
    /// If the document has no `_id`, the backend assigns one.
    async fn insert_one(&self, collection: &str, document: Document) -> OdmResult<Bson>;

    /// Inserts documents and returns their identifiers in insertion order.
    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> OdmResult<Vec<Bson>>;

    /// Applies `update` to every document matching `filter` and returns the modified count.
    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> OdmResult<u64>;

    /// Deletes every document matching `filter` and returns the deleted count.
    async fn delete_many(&self, collection: &str, filter: Document) -> OdmResult<u64>;

    /// Runs an aggregation pipeline and returns the resulting documents.
    async fn aggregate(
        &self,
        collection: &str,
        pipeline: Vec<Document>,
    ) -> OdmResult<Vec<Document>>;

    /// Creates a collection. Creating a collection that already exists is not an error.
    async fn create_collection(&self, name: &str) -> OdmResult<()>;

    /// Drops a collection and all its documents. Dropping a missing collection is not an error.
    async fn drop_collection(&self, name: &str) -> OdmResult<()>;

    /// Lists the names of all collections in the store.
    async fn list_collections(&self) -> OdmResult<Vec<String>>;

    /// Releases the resources held by the backend.
    ///
    /// The default implementation is a no-op, but backends with external connections
    /// should override this.
    async fn close(&self) -> OdmResult<()> {
        Ok(())
    }
}

/// Factory for backends, used by connections to connect lazily.
///
/// `build` may be called again after a connection was closed, so builders keep their
/// configuration instead of consuming it.
#[async_trait]
pub trait StoreBackendBuilder: Send + Sync + Debug {
    type Backend: StoreBackend + 'static;

    async fn build(&self) -> OdmResult<Self::Backend>;
}

/// Object-safe form of [`StoreBackendBuilder`] stored by the connection registry.
#[async_trait]
pub(crate) trait DynStoreBackendBuilder: Send + Sync + Debug {
    async fn build_dyn(&self) -> OdmResult<Arc<dyn StoreBackend>>;
}

#[async_trait]
impl<B: StoreBackendBuilder> DynStoreBackendBuilder for B {
    async fn build_dyn(&self) -> OdmResult<Arc<dyn StoreBackend>> {
        Ok(Arc::new(self.build().await?))
    }
}
