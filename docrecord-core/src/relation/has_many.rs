use bson::{Bson, Document, doc};
use futures::future::join_all;
use std::marker::PhantomData;

use crate::{
    error::OdmResult,
    filter::Filtered,
    metadata::metadata,
    model::{Model, ModelExt},
    query::ModelQuery,
    record::{Record, normalize_id},
};

use super::{assign_key, default_foreign_key, primary_key, relation_name, require_key};

/// One-to-many relation where the related records hold the foreign key.
#[derive(Debug)]
pub struct HasMany<'a, M: Model, R: Model> {
    owner: &'a Record<M>,
    foreign_key: String,
    local_key: String,
    _related: PhantomData<fn() -> R>,
}

impl<'a, M: Model, R: Model> HasMany<'a, M, R> {
    pub(crate) fn new(owner: &'a Record<M>) -> Self {
        metadata::<R>();

        Self {
            owner,
            foreign_key: default_foreign_key::<M>(),
            local_key: primary_key::<M>(),
            _related: PhantomData,
        }
    }

    /// Sets the key on the related records referencing the owner.
    pub fn foreign_key(mut self, key: impl Into<String>) -> Self {
        self.foreign_key = key.into();
        self
    }

    /// Sets the key on the owner the foreign key refers to.
    pub fn local_key(mut self, key: impl Into<String>) -> Self {
        self.local_key = key.into();
        self
    }

    fn owner_key(&self) -> OdmResult<Bson> {
        require_key(self.owner, &self.local_key, &relation_name::<M, R>("has_many"))
    }

    /// The query selecting the related records; further constraints can be chained.
    pub fn query(&self) -> OdmResult<ModelQuery<R>> {
        Ok(R::query(self.owner.database()).where_eq(self.foreign_key.as_str(), self.owner_key()?))
    }

    pub async fn exec(&self) -> OdmResult<Vec<Record<R>>> {
        self.query()?.exec().await
    }

    /// Creates a related record pointing to the owner.
    pub async fn create(&self, model: R) -> OdmResult<Record<R>> {
        let mut record = Record::new(self.owner.database(), model);
        self.save(&mut record).await?;

        Ok(record)
    }

    /// Creates related records concurrently, keeping the input order.
    pub async fn create_many(&self, models: Vec<R>) -> OdmResult<Vec<Record<R>>> {
        self.owner_key()?;

        join_all(
            models
                .into_iter()
                .map(|model| self.create(model)),
        )
        .await
        .into_iter()
        .collect()
    }

    /// Points `record` at the owner and saves it.
    pub async fn save(&self, record: &mut Record<R>) -> OdmResult<()> {
        assign_key(record, &self.foreign_key, self.owner_key()?)?;
        record.save().await
    }

    /// Saves records concurrently after pointing them at the owner.
    pub async fn save_many(&self, records: &mut [Record<R>]) -> OdmResult<()> {
        self.owner_key()?;

        join_all(
            records
                .iter_mut()
                .map(|record| self.save(record)),
        )
        .await
        .into_iter()
        .collect()
    }

    /// Same as [`HasMany::save`].
    pub async fn associate(&self, record: &mut Record<R>) -> OdmResult<()> {
        self.save(record).await
    }

    /// Same as [`HasMany::save_many`].
    pub async fn associate_many(&self, records: &mut [Record<R>]) -> OdmResult<()> {
        self.save_many(records).await
    }

    /// Clears the foreign key of every related record and returns the modified count.
    pub async fn dissociate(&self) -> OdmResult<u64> {
        let mut cleared = Document::new();
        cleared.insert(self.foreign_key.as_str(), Bson::Null);

        self.query()?
            .update(doc! { "$set": cleared })
            .await
    }

    /// Deletes every related record and returns the deleted count. Delete hooks do not run.
    pub async fn delete(&self) -> OdmResult<u64> {
        self.query()?.delete().await
    }

    /// Deletes the related records with the given identifiers.
    pub async fn delete_many<I, V>(&self, ids: I) -> OdmResult<u64>
    where
        I: IntoIterator<Item = V>,
        V: Into<Bson>,
    {
        let key = primary_key::<R>();
        let ids: Vec<Bson> = ids
            .into_iter()
            .map(|id| normalize_id(&key, id.into()))
            .collect();

        self.query()?
            .where_in(key, ids)
            .delete()
            .await
    }
}
