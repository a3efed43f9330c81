use bson::Bson;
use std::marker::PhantomData;

use crate::{
    error::OdmResult,
    filter::Filtered,
    metadata::metadata,
    model::{Model, ModelExt},
    record::Record,
};

use super::{assign_key, default_foreign_key, key_value, primary_key, relation_name, require_key};

/// Inverse side of a one-to-one or one-to-many relation.
///
/// The owner holds the foreign key (default `<related>_id`) referencing the local key of the
/// related model (default its primary key).
#[derive(Debug)]
pub struct BelongsTo<'a, M: Model, R: Model> {
    owner: &'a mut Record<M>,
    foreign_key: String,
    local_key: String,
    _related: PhantomData<fn() -> R>,
}

impl<'a, M: Model, R: Model> BelongsTo<'a, M, R> {
    pub(crate) fn new(owner: &'a mut Record<M>) -> Self {
        metadata::<R>();

        Self {
            owner,
            foreign_key: default_foreign_key::<R>(),
            local_key: primary_key::<R>(),
            _related: PhantomData,
        }
    }

    /// Sets the key on the owner referencing the related record.
    pub fn foreign_key(mut self, key: impl Into<String>) -> Self {
        self.foreign_key = key.into();
        self
    }

    /// Sets the key on the related record the foreign key refers to.
    pub fn local_key(mut self, key: impl Into<String>) -> Self {
        self.local_key = key.into();
        self
    }

    /// Loads the related record. Returns `None` when the foreign key is unset.
    pub async fn exec(&self) -> OdmResult<Option<Record<R>>> {
        let Some(value) = key_value(&*self.owner, &self.foreign_key)? else {
            return Ok(None);
        };

        R::query(self.owner.database())
            .where_eq(self.local_key.as_str(), value)
            .first()
            .await
    }

    /// Points the owner at `related` and saves the owner.
    pub async fn associate(&mut self, related: &Record<R>) -> OdmResult<()> {
        let value = require_key(related, &self.local_key, &relation_name::<M, R>("belongs_to"))?;

        assign_key(&mut *self.owner, &self.foreign_key, value)?;
        self.owner.save().await
    }

    /// Clears the foreign key and saves the owner.
    pub async fn dissociate(&mut self) -> OdmResult<()> {
        assign_key(&mut *self.owner, &self.foreign_key, Bson::Null)?;
        self.owner.save().await
    }
}
