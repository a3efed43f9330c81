//! Fluent query construction and execution.
//!
//! A [`QueryBuilder`] targets one collection on one named connection and accumulates a filter,
//! projection, sort and bounds. Filtering comes from the [`Filtered`] trait. Execution methods
//! resolve the connection lazily and emit exactly one
//! [`QueryEvent`](crate::event::QueryEvent) per call, on success and on failure.
//!
//! [`ModelQuery`] wraps a builder bound to a [`Model`] and hydrates results into
//! [`Record`]s.
//!
//! # Example
//!
//! ```ignore
//! use docrecord::prelude::*;
//!
//! let recent = db
//!     .collection("posts")
//!     .where_op("views", ">=", 100)
//!     .or_where_eq("pinned", true)
//!     .select(["title", "views"])
//!     .order_by("created_at", SortDirection::Desc)
//!     .limit(Some(10))
//!     .exec()
//!     .await?;
//! ```

use bson::{Bson, Document, doc};
use std::{fmt, future::Future, marker::PhantomData, sync::Arc, time::Instant};

use crate::{
    backend::{FindOptions, StoreBackend},
    connection::Database,
    error::OdmResult,
    event::{QueryEvent, QueryOperation},
    filter::{Filter, Filtered, normalize_pipeline},
    model::Model,
    page::{Page, PaginationParams},
    record::Record,
};

/// Sort direction for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    /// Ascending order (A to Z, 0 to 9, earliest to latest).
    Asc,
    /// Descending order (Z to A, 9 to 0, latest to earliest).
    Desc,
}

impl SortDirection {
    fn as_i32(self) -> i32 {
        match self {
            SortDirection::Asc => 1,
            SortDirection::Desc => -1,
        }
    }
}

/// A query over one collection of a named connection.
///
/// Cloning yields an independent copy; fluent methods consume and return the builder.
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    db: Database,
    connection: Option<String>,
    collection: String,
    filter: Filter,
    projection: Document,
    sort: Document,
    limit: Option<u64>,
    skip: Option<u64>,
}

impl QueryBuilder {
    pub(crate) fn new(db: &Database, connection: Option<&str>, collection: &str) -> Self {
        Self {
            db: db.clone(),
            connection: connection.map(str::to_string),
            collection: collection.to_string(),
            filter: Filter::new(),
            projection: Document::new(),
            sort: Document::new(),
            limit: None,
            skip: None,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// The connection this query runs on, resolving the default connection.
    pub fn connection_name(&self) -> &str {
        self.connection
            .as_deref()
            .unwrap_or_else(|| self.db.default_connection())
    }

    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    /// Adds fields to the projection. Repeated calls accumulate.
    pub fn select<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for field in fields {
            self.projection.insert(field.into(), 1);
        }
        self
    }

    /// Appends a sort key. Earlier keys take priority.
    pub fn order_by(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.sort.insert(field.into(), direction.as_i32());
        self
    }

    pub fn order_by_asc(self, field: impl Into<String>) -> Self {
        self.order_by(field, SortDirection::Asc)
    }

    pub fn order_by_desc(self, field: impl Into<String>) -> Self {
        self.order_by(field, SortDirection::Desc)
    }

    /// Sets the maximum number of results; `None` removes the bound.
    pub fn limit(mut self, limit: Option<u64>) -> Self {
        self.limit = limit;
        self
    }

    /// Sets the number of results to skip; `None` removes the bound.
    pub fn offset(mut self, skip: Option<u64>) -> Self {
        self.skip = skip;
        self
    }

    /// Structured description of the query, as carried by query events.
    pub fn describe(&self) -> Document {
        let mut description = doc! { "filter": self.filter.document().clone() };

        if !self.projection.is_empty() {
            description.insert("projection", self.projection.clone());
        }
        if !self.sort.is_empty() {
            description.insert("sort", self.sort.clone());
        }
        if let Some(limit) = self.limit {
            description.insert("limit", as_i64(limit));
        }
        if let Some(skip) = self.skip {
            description.insert("skip", as_i64(skip));
        }

        description
    }

    fn find_options(&self) -> FindOptions {
        FindOptions {
            projection: (!self.projection.is_empty()).then(|| self.projection.clone()),
            sort: (!self.sort.is_empty()).then(|| self.sort.clone()),
            limit: self.limit,
            skip: self.skip,
        }
    }

    /// Executes the query and returns the raw documents.
    pub async fn exec(&self) -> OdmResult<Vec<Document>> {
        let collection = self.collection.clone();
        let filter = self.filter.document().clone();
        let options = self.find_options();

        self.observe(QueryOperation::Find, self.describe(), move |backend| async move {
            backend.find(&collection, filter, options).await
        })
        .await
    }

    /// Alias of [`QueryBuilder::exec`].
    pub async fn all(&self) -> OdmResult<Vec<Document>> {
        self.exec().await
    }

    /// Executes the query with a limit of one.
    pub async fn first(&self) -> OdmResult<Option<Document>> {
        let documents = self.clone().limit(Some(1)).exec().await?;

        Ok(documents.into_iter().next())
    }

    /// Counts the matching documents. Projection, sort and bounds are ignored.
    pub async fn count(&self) -> OdmResult<u64> {
        let collection = self.collection.clone();
        let filter = self.filter.document().clone();

        self.observe(
            QueryOperation::Count,
            doc! { "filter": filter.clone() },
            move |backend| async move { backend.count_documents(&collection, filter).await },
        )
        .await
    }

    /// Inserts one document and returns its identifier.
    pub async fn insert(&self, document: Document) -> OdmResult<Bson> {
        let collection = self.collection.clone();

        self.observe(
            QueryOperation::Insert,
            doc! { "document": document.clone() },
            move |backend| async move { backend.insert_one(&collection, document).await },
        )
        .await
    }

    /// Inserts documents and returns their identifiers in insertion order.
    pub async fn insert_many(&self, documents: Vec<Document>) -> OdmResult<Vec<Bson>> {
        let collection = self.collection.clone();
        let payload: Vec<Bson> = documents.iter().cloned().map(Bson::Document).collect();
        let description = doc! { "documents": payload };

        self.observe(QueryOperation::InsertMany, description, move |backend| async move {
            backend.insert_many(&collection, documents).await
        })
        .await
    }

    /// Updates every matching document and returns the modified count.
    ///
    /// A document without top-level operators is applied as `{ "$set": update }`.
    pub async fn update(&self, update: Document) -> OdmResult<u64> {
        let update = match update.keys().any(|key| key.starts_with('$')) {
            true => update,
            false => doc! { "$set": update },
        };
        let collection = self.collection.clone();
        let filter = self.filter.document().clone();
        let description = doc! { "filter": filter.clone(), "update": update.clone() };

        self.observe(QueryOperation::Update, description, move |backend| async move {
            backend.update_many(&collection, filter, update).await
        })
        .await
    }

    /// Deletes every matching document and returns the deleted count.
    pub async fn delete(&self) -> OdmResult<u64> {
        let collection = self.collection.clone();
        let filter = self.filter.document().clone();

        self.observe(
            QueryOperation::Delete,
            doc! { "filter": filter.clone() },
            move |backend| async move { backend.delete_many(&collection, filter).await },
        )
        .await
    }

    /// Counts the matching documents, then fetches one page of them.
    pub async fn paginate(&self, page: u64, per_page: u64) -> OdmResult<Page<Document>> {
        self.paginate_with(PaginationParams::new(page, per_page))
            .await
    }

    pub async fn paginate_with(&self, params: PaginationParams) -> OdmResult<Page<Document>> {
        let total = self.count().await?;
        let data = self
            .clone()
            .offset(Some(params.offset()))
            .limit(Some(params.per_page))
            .exec()
            .await?;

        Ok(Page::new(data, total, params))
    }

    /// Runs an aggregation pipeline over the collection.
    ///
    /// `None` stages are dropped so stages can be included conditionally. The filter of this
    /// builder is not applied; add a `$match` stage instead.
    ///
    /// ```ignore
    /// let totals = db
    ///     .collection("orders")
    ///     .aggregate([
    ///         Some(doc! { "$match": { "status": "paid" } }),
    ///         since.map(|date| doc! { "$match": { "created_at": { "$gte": date } } }),
    ///         Some(doc! { "$count": "total" }),
    ///     ])
    ///     .await?;
    /// ```
    pub async fn aggregate<I, S>(&self, stages: I) -> OdmResult<Vec<Document>>
    where
        I: IntoIterator<Item = S>,
        S: Into<Option<Document>>,
    {
        let pipeline = normalize_pipeline(
            stages
                .into_iter()
                .filter_map(Into::into)
                .collect(),
        );
        let collection = self.collection.clone();
        let stages: Vec<Bson> = pipeline.iter().cloned().map(Bson::Document).collect();
        let description = doc! { "pipeline": stages };

        self.observe(QueryOperation::Aggregate, description, move |backend| async move {
            backend.aggregate(&collection, pipeline).await
        })
        .await
    }

    /// Resolves the backend, runs `operation` on it and emits one query event for the outcome.
    async fn observe<T, F, Fut>(
        &self,
        operation: QueryOperation,
        description: Document,
        run: F,
    ) -> OdmResult<T>
    where
        F: FnOnce(Arc<dyn StoreBackend>) -> Fut,
        Fut: Future<Output = OdmResult<T>>,
    {
        let started = Instant::now();

        let result = match self.backend().await {
            Ok(backend) => run(backend).await,
            Err(err) => Err(err),
        };

        self.db.emitter().query(QueryEvent {
            connection: self.connection_name().to_string(),
            collection: self.collection.clone(),
            operation,
            description,
            duration: started.elapsed(),
            error: result
                .as_ref()
                .err()
                .map(ToString::to_string),
        });

        result
    }

    async fn backend(&self) -> OdmResult<Arc<dyn StoreBackend>> {
        self.db
            .connection(self.connection.as_deref())?
            .backend()
            .await
    }
}

impl Filtered for QueryBuilder {
    fn filter_mut(&mut self) -> &mut Filter {
        &mut self.filter
    }
}

fn as_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// A query bound to a model; reads hydrate into [`Record`]s.
///
/// Created by [`ModelExt::query`](crate::model::ModelExt::query). Every hydrated record passes
/// through [`Model::after_find`].
pub struct ModelQuery<M> {
    builder: QueryBuilder,
    _model: PhantomData<fn() -> M>,
}

impl<M> Clone for ModelQuery<M> {
    fn clone(&self) -> Self {
        Self {
            builder: self.builder.clone(),
            _model: PhantomData,
        }
    }
}

impl<M> fmt::Debug for ModelQuery<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelQuery")
            .field("model", &std::any::type_name::<M>())
            .field("builder", &self.builder)
            .finish()
    }
}

impl<M: Model> ModelQuery<M> {
    pub(crate) fn new(builder: QueryBuilder) -> Self {
        Self { builder, _model: PhantomData }
    }

    pub fn builder(&self) -> &QueryBuilder {
        &self.builder
    }

    /// Drops the model binding; reads then return raw documents.
    pub fn into_builder(self) -> QueryBuilder {
        self.builder
    }

    fn map(self, f: impl FnOnce(QueryBuilder) -> QueryBuilder) -> Self {
        Self::new(f(self.builder))
    }

    /// Restricts the stored fields loaded into each record.
    ///
    /// Projected documents are still hydrated into `M`, so every field left out must be an
    /// `Option` or carry `#[serde(default)]`; otherwise the read fails with
    /// [`OdmError::Serialization`](crate::error::OdmError::Serialization). Use
    /// `into_builder().select(..)` to read raw projected documents instead.
    pub fn select<I, S>(self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.map(|builder| builder.select(fields))
    }

    pub fn order_by(self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.map(|builder| builder.order_by(field, direction))
    }

    pub fn order_by_asc(self, field: impl Into<String>) -> Self {
        self.order_by(field, SortDirection::Asc)
    }

    pub fn order_by_desc(self, field: impl Into<String>) -> Self {
        self.order_by(field, SortDirection::Desc)
    }

    pub fn limit(self, limit: Option<u64>) -> Self {
        self.map(|builder| builder.limit(limit))
    }

    pub fn offset(self, skip: Option<u64>) -> Self {
        self.map(|builder| builder.offset(skip))
    }

    /// Executes the query and hydrates every document.
    pub async fn exec(&self) -> OdmResult<Vec<Record<M>>> {
        let documents = self.builder.exec().await?;

        self.hydrate_all(documents).await
    }

    pub async fn all(&self) -> OdmResult<Vec<Record<M>>> {
        self.exec().await
    }

    pub async fn first(&self) -> OdmResult<Option<Record<M>>> {
        match self.builder.first().await? {
            Some(document) => Ok(Some(self.hydrate(document).await?)),
            None => Ok(None),
        }
    }

    pub async fn count(&self) -> OdmResult<u64> {
        self.builder.count().await
    }

    /// Updates every matching document without loading records or running hooks.
    pub async fn update(&self, update: Document) -> OdmResult<u64> {
        self.builder.update(update).await
    }

    /// Deletes every matching document without loading records or running hooks.
    pub async fn delete(&self) -> OdmResult<u64> {
        self.builder.delete().await
    }

    pub async fn paginate(&self, page: u64, per_page: u64) -> OdmResult<Page<Record<M>>> {
        self.paginate_with(PaginationParams::new(page, per_page))
            .await
    }

    pub async fn paginate_with(&self, params: PaginationParams) -> OdmResult<Page<Record<M>>> {
        let page = self.builder.paginate_with(params).await?;
        let data = self.hydrate_all(page.data).await?;

        Ok(Page::new(data, page.total, params))
    }

    /// Runs an aggregation pipeline; results are raw documents.
    pub async fn aggregate<I, S>(&self, stages: I) -> OdmResult<Vec<Document>>
    where
        I: IntoIterator<Item = S>,
        S: Into<Option<Document>>,
    {
        self.builder.aggregate(stages).await
    }

    async fn hydrate(&self, document: Document) -> OdmResult<Record<M>> {
        let mut record = Record::hydrate(self.builder.database(), document)?;
        M::after_find(&mut record).await?;

        Ok(record)
    }

    async fn hydrate_all(&self, documents: Vec<Document>) -> OdmResult<Vec<Record<M>>> {
        let mut records = Vec::with_capacity(documents.len());

        for document in documents {
            records.push(self.hydrate(document).await?);
        }

        Ok(records)
    }
}

impl<M> Filtered for ModelQuery<M> {
    fn filter_mut(&mut self) -> &mut Filter {
        &mut self.builder.filter
    }
}
