use bson::Bson;
use std::marker::PhantomData;

use crate::{
    error::OdmResult,
    filter::Filtered,
    metadata::metadata,
    model::{Model, ModelExt},
    query::ModelQuery,
    record::Record,
};

use super::{assign_key, default_foreign_key, primary_key, relation_name, require_key};

/// One-to-one relation where the related record holds the foreign key.
#[derive(Debug)]
pub struct HasOne<'a, M: Model, R: Model> {
    owner: &'a Record<M>,
    foreign_key: String,
    local_key: String,
    _related: PhantomData<fn() -> R>,
}

impl<'a, M: Model, R: Model> HasOne<'a, M, R> {
    pub(crate) fn new(owner: &'a Record<M>) -> Self {
        metadata::<R>();

        Self {
            owner,
            foreign_key: default_foreign_key::<M>(),
            local_key: primary_key::<M>(),
            _related: PhantomData,
        }
    }

    /// Sets the key on the related record referencing the owner.
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
        require_key(self.owner, &self.local_key, &relation_name::<M, R>("has_one"))
    }

    /// The query selecting the related record.
    pub fn query(&self) -> OdmResult<ModelQuery<R>> {
        Ok(R::query(self.owner.database()).where_eq(self.foreign_key.as_str(), self.owner_key()?))
    }

    pub async fn exec(&self) -> OdmResult<Option<Record<R>>> {
        self.query()?.first().await
    }

    /// Creates a related record pointing to the owner.
    pub async fn create(&self, model: R) -> OdmResult<Record<R>> {
        let mut record = Record::new(self.owner.database(), model);
        self.save(&mut record).await?;

        Ok(record)
    }

    /// Points `record` at the owner and saves it.
    pub async fn save(&self, record: &mut Record<R>) -> OdmResult<()> {
        assign_key(record, &self.foreign_key, self.owner_key()?)?;
        record.save().await
    }

    /// Same as [`HasOne::save`].
    pub async fn associate(&self, record: &mut Record<R>) -> OdmResult<()> {
        self.save(record).await
    }

    /// Clears the foreign key of the related record, if any. Returns whether one was found.
    pub async fn dissociate(&self) -> OdmResult<bool> {
        let Some(mut record) = self.exec().await? else {
            return Ok(false);
        };

        assign_key(&mut record, &self.foreign_key, Bson::Null)?;
        record.save().await?;

        Ok(true)
    }
}
