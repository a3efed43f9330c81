//! Active-record models.
//!
//! A [`Model`] is a plain serde struct bound to a collection. It declares its metadata in
//! [`Model::boot`] and may override lifecycle hooks. The static finders and creators live on
//! [`ModelExt`], which is implemented for every model.
//!
//! # Hook order
//!
//! - create: pre-persist steps, `before_save`, `before_create`, insert, refresh, post-persist
//!   steps, `after_create`, `after_save`
//! - update: pre-persist steps, `before_save`, `before_update`, `$set` by primary key, refresh,
//!   post-persist steps, `after_update`, `after_save`
//! - delete: `before_delete`, delete by primary key, `after_delete`
//! - find: `before_find` on the query, then `after_find` on every hydrated record
//!
//! Hooks run in sequence. A failing hook aborts the remaining steps; completed steps are not
//! rolled back.
//!
//! # Example
//!
//! ```ignore
//! use docrecord::prelude::*;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! pub struct User {
//!     pub name: String,
//!     pub email: String,
//! }
//!
//! #[async_trait]
//! impl Model for User {
//!     fn collection_name() -> &'static str {
//!         "users"
//!     }
//!
//!     async fn before_save(record: &mut Record<Self>) -> OdmResult<()> {
//!         match record.email.contains('@') {
//!             true => Ok(()),
//!             false => Err(OdmError::hook("invalid email")),
//!         }
//!     }
//! }
//!
//! let user = User::create(&db, User { name: "Ada".into(), email: "ada@example.com".into() }).await?;
//! let found = User::find(&db, user.id().cloned().unwrap_or_default()).await?;
//! ```

use async_trait::async_trait;
use bson::{Bson, Document};
use futures::future::join_all;
use serde::{Serialize, de::DeserializeOwned};
use std::sync::Arc;

use crate::{
    connection::Database,
    error::OdmResult,
    filter::{Filtered, is_operator_document},
    metadata::{ModelMeta, metadata},
    query::{ModelQuery, QueryBuilder},
    record::{Record, normalize_id},
};

/// Core trait of every mapped model.
///
/// Only [`Model::collection_name`] is required. Every hook defaults to a no-op.
#[async_trait]
pub trait Model: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Name of the collection holding the model's documents.
    fn collection_name() -> &'static str;

    /// Name of the connection the model uses; `None` selects the default connection.
    fn connection_name() -> Option<&'static str> {
        None
    }

    /// Name of the model, used for default relation keys and error messages.
    fn model_name() -> &'static str {
        let name = std::any::type_name::<Self>();
        name.rsplit("::").next().unwrap_or(name)
    }

    /// Registers columns, computed properties, timestamps and persist steps.
    ///
    /// Called once per model type, the first time its metadata is needed.
    fn boot(meta: &mut ModelMeta<Self>) {
        let _ = meta;
    }

    async fn before_save(record: &mut Record<Self>) -> OdmResult<()> {
        let _ = record;
        Ok(())
    }

    async fn after_save(record: &mut Record<Self>) -> OdmResult<()> {
        let _ = record;
        Ok(())
    }

    async fn before_create(record: &mut Record<Self>) -> OdmResult<()> {
        let _ = record;
        Ok(())
    }

    async fn after_create(record: &mut Record<Self>) -> OdmResult<()> {
        let _ = record;
        Ok(())
    }

    async fn before_update(record: &mut Record<Self>) -> OdmResult<()> {
        let _ = record;
        Ok(())
    }

    async fn after_update(record: &mut Record<Self>) -> OdmResult<()> {
        let _ = record;
        Ok(())
    }

    async fn before_delete(record: &mut Record<Self>) -> OdmResult<()> {
        let _ = record;
        Ok(())
    }

    async fn after_delete(record: &mut Record<Self>) -> OdmResult<()> {
        let _ = record;
        Ok(())
    }

    /// May add constraints to the query of `find`, `find_by`, `first` and `all`.
    async fn before_find(query: ModelQuery<Self>) -> OdmResult<ModelQuery<Self>> {
        Ok(query)
    }

    async fn after_find(record: &mut Record<Self>) -> OdmResult<()> {
        let _ = record;
        Ok(())
    }
}

/// Static finders and creators, implemented for every [`Model`].
#[async_trait]
pub trait ModelExt: Model {
    /// The metadata of this model, booting it on first use.
    fn metadata() -> Arc<ModelMeta<Self>>;

    /// Storage name of the primary key.
    fn primary_key() -> String;

    /// A query over the model's collection on its connection.
    fn query(db: &Database) -> ModelQuery<Self>;

    /// Finds a record by primary key. A string id is parsed as an `ObjectId` when possible.
    async fn find<I>(db: &Database, id: I) -> OdmResult<Option<Record<Self>>>
    where
        I: Into<Bson> + Send;

    /// Finds the first record whose `key` equals `value`.
    async fn find_by<V>(db: &Database, key: &str, value: V) -> OdmResult<Option<Record<Self>>>
    where
        V: Into<Bson> + Send;

    async fn all(db: &Database) -> OdmResult<Vec<Record<Self>>>;

    async fn first(db: &Database) -> OdmResult<Option<Record<Self>>>;

    /// Saves a new record built from `model`.
    async fn create(db: &Database, model: Self) -> OdmResult<Record<Self>>;

    /// Saves a new record built from a property document.
    async fn create_from(db: &Database, document: Document) -> OdmResult<Record<Self>>;

    /// Creates records concurrently. The result keeps the input order.
    ///
    /// Every create runs to completion before the first error, if any, is returned.
    async fn create_many(db: &Database, models: Vec<Self>) -> OdmResult<Vec<Record<Self>>>;

    /// Updates the first record matching `search` with `data`, or creates one from both.
    async fn update_or_create(
        db: &Database,
        search: Document,
        data: Document,
    ) -> OdmResult<Record<Self>>;

    /// Returns the first record matching `search`, or creates one from both documents.
    async fn first_or_create(
        db: &Database,
        search: Document,
        data: Document,
    ) -> OdmResult<Record<Self>>;

    /// Returns the first record matching `search`, or a new unsaved record from both documents.
    async fn first_or_new(
        db: &Database,
        search: Document,
        data: Document,
    ) -> OdmResult<Record<Self>>;

    /// Deletes every document of the collection and returns the deleted count.
    async fn truncate(db: &Database) -> OdmResult<u64>;
}

#[async_trait]
impl<M: Model> ModelExt for M {
    fn metadata() -> Arc<ModelMeta<Self>> {
        metadata::<M>()
    }

    fn primary_key() -> String {
        metadata::<M>().primary_key().to_string()
    }

    fn query(db: &Database) -> ModelQuery<Self> {
        ModelQuery::new(QueryBuilder::new(
            db,
            M::connection_name(),
            M::collection_name(),
        ))
    }

    async fn find<I>(db: &Database, id: I) -> OdmResult<Option<Record<Self>>>
    where
        I: Into<Bson> + Send,
    {
        let key = Self::primary_key();
        let id = normalize_id(&key, id.into());
        let query = Self::query(db).where_eq(key, id);

        M::before_find(query).await?.first().await
    }

    async fn find_by<V>(db: &Database, key: &str, value: V) -> OdmResult<Option<Record<Self>>>
    where
        V: Into<Bson> + Send,
    {
        let query = Self::query(db).where_eq(key, value);

        M::before_find(query).await?.first().await
    }

    async fn all(db: &Database) -> OdmResult<Vec<Record<Self>>> {
        M::before_find(Self::query(db)).await?.exec().await
    }

    async fn first(db: &Database) -> OdmResult<Option<Record<Self>>> {
        M::before_find(Self::query(db)).await?.first().await
    }

    async fn create(db: &Database, model: Self) -> OdmResult<Record<Self>> {
        let mut record = Record::new(db, model);
        record.save().await?;

        Ok(record)
    }

    async fn create_from(db: &Database, document: Document) -> OdmResult<Record<Self>> {
        let mut record: Record<Self> = Record::from_document(db, document)?;
        record.save().await?;

        Ok(record)
    }

    async fn create_many(db: &Database, models: Vec<Self>) -> OdmResult<Vec<Record<Self>>> {
        join_all(
            models
                .into_iter()
                .map(|model| Self::create(db, model)),
        )
        .await
        .into_iter()
        .collect()
    }

    async fn update_or_create(
        db: &Database,
        search: Document,
        data: Document,
    ) -> OdmResult<Record<Self>> {
        let existing = Self::query(db)
            .where_doc(search.clone())
            .first()
            .await?;

        match existing {
            Some(mut record) => {
                record.fill(data)?;
                record.save().await?;

                Ok(record)
            }
            None => Self::create_from(db, seed_document(search, data)).await,
        }
    }

    async fn first_or_create(
        db: &Database,
        search: Document,
        data: Document,
    ) -> OdmResult<Record<Self>> {
        let existing = Self::query(db)
            .where_doc(search.clone())
            .first()
            .await?;

        match existing {
            Some(record) => Ok(record),
            None => Self::create_from(db, seed_document(search, data)).await,
        }
    }

    async fn first_or_new(
        db: &Database,
        search: Document,
        data: Document,
    ) -> OdmResult<Record<Self>> {
        let existing = Self::query(db)
            .where_doc(search.clone())
            .first()
            .await?;

        match existing {
            Some(record) => Ok(record),
            None => Record::from_document(db, seed_document(search, data)),
        }
    }

    async fn truncate(db: &Database) -> OdmResult<u64> {
        Self::query(db).delete().await
    }
}

/// Plain field values of a search document overlaid with `data`.
///
/// Operator keys and operator conditions of the search are left out of the new record.
fn seed_document(search: Document, data: Document) -> Document {
    let mut seed: Document = search
        .into_iter()
        .filter(|(key, value)| {
            !key.starts_with('$')
                && !matches!(value, Bson::Document(condition) if is_operator_document(condition))
        })
        .collect();

    seed.extend(data);
    seed
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn test_seed_document_skips_conditions() {
        let seed = seed_document(
            doc! { "email": "a@b.c", "age": { "$gt": 18 }, "$or": [{ "x": 1 }] },
            doc! { "name": "Ada", "email": "ada@b.c" },
        );

        assert_eq!(seed, doc! { "email": "ada@b.c", "name": "Ada" });
    }
}
