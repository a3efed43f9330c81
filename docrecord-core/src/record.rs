//! Model instances and their persistence.
//!
//! A [`Record`] wraps a model value with its identifier, its lifecycle state and the snapshot
//! of its attributes at the last load or save. It dereferences to the model, so fields are
//! read and assigned directly:
//!
//! ```ignore
//! let mut user = User::find(&db, id).await?.ok_or(NotFound)?;
//!
//! user.name = "Grace".into();
//! assert!(user.is_dirty_key("name"));
//!
//! user.save().await?;
//! assert!(!user.is_dirty());
//! ```

use bson::{Bson, Document, de::deserialize_from_bson, doc, oid::ObjectId, ser::serialize_to_bson};
use serde::{Serialize, Serializer, ser::Error as _};
use std::{
    collections::BTreeSet,
    ops::{Deref, DerefMut},
    sync::Arc,
};

use crate::{
    connection::Database,
    error::{OdmError, OdmResult},
    filter::Filtered,
    metadata::{DEFAULT_PRIMARY_KEY, ModelMeta, metadata},
    model::Model,
    persist::{PersistContext, PersistKind, PersistStep},
    query::QueryBuilder,
};

/// Lifecycle state of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
    /// Never saved; has no identifier.
    New,
    /// Loaded from or written to the store.
    Persisted,
    /// Deleted from the store; keeps its identifier.
    Deleted,
}

/// A model instance bound to a database.
#[derive(Debug, Clone)]
pub struct Record<M> {
    db: Database,
    meta: Arc<ModelMeta<M>>,
    attributes: M,
    id: Option<Bson>,
    state: RecordState,
    original: Option<Document>,
}

impl<M: Model> Record<M> {
    /// Creates a new, unsaved record.
    pub fn new(db: &Database, attributes: M) -> Self {
        Self {
            db: db.clone(),
            meta: metadata::<M>(),
            attributes,
            id: None,
            state: RecordState::New,
            original: None,
        }
    }

    /// Creates a new, unsaved record from a document, applying `consume` transforms.
    pub fn from_document(db: &Database, document: Document) -> OdmResult<Self> {
        let meta = metadata::<M>();
        let attributes = from_document(meta.consume_document(document))?;

        Ok(Self {
            db: db.clone(),
            meta,
            attributes,
            id: None,
            state: RecordState::New,
            original: None,
        })
    }

    /// Builds a persisted record from a stored document.
    pub(crate) fn hydrate(db: &Database, document: Document) -> OdmResult<Self> {
        let meta = metadata::<M>();
        let id = document
            .get(meta.primary_key())
            .cloned();
        let attributes: M = from_document(meta.consume_document(document))?;
        let original = to_document(&attributes)?;

        Ok(Self {
            db: db.clone(),
            meta,
            attributes,
            id,
            state: RecordState::Persisted,
            original: Some(original),
        })
    }

    pub fn id(&self) -> Option<&Bson> {
        self.id.as_ref()
    }

    pub fn state(&self) -> RecordState {
        self.state
    }

    pub fn is_new(&self) -> bool {
        self.state == RecordState::New
    }

    pub fn is_persisted(&self) -> bool {
        self.state == RecordState::Persisted
    }

    pub fn is_deleted(&self) -> bool {
        self.state == RecordState::Deleted
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn meta(&self) -> &Arc<ModelMeta<M>> {
        &self.meta
    }

    pub fn model(&self) -> &M {
        &self.attributes
    }

    pub fn into_model(self) -> M {
        self.attributes
    }

    /// The attributes of the model as a property document.
    pub fn attributes(&self) -> OdmResult<Document> {
        to_document(&self.attributes)
    }

    /// Reads one attribute. The `_id` key returns the identifier.
    pub fn get_attribute(&self, key: &str) -> OdmResult<Option<Bson>> {
        if key == DEFAULT_PRIMARY_KEY {
            return Ok(self.id.clone());
        }

        Ok(self.attributes()?.get(key).cloned())
    }

    /// Assigns one attribute. Assigning `_id` sets the identifier.
    pub fn set_attribute(&mut self, key: &str, value: impl Into<Bson>) -> OdmResult<()> {
        let value = value.into();

        if key == DEFAULT_PRIMARY_KEY {
            self.id = Some(value);
            return Ok(());
        }

        let mut attributes = self.attributes()?;
        attributes.insert(key, value);
        self.attributes = from_document(attributes)?;

        Ok(())
    }

    /// Assigns every entry of a document, applying `consume` transforms.
    pub fn fill(&mut self, document: Document) -> OdmResult<()> {
        let mut attributes = self.attributes()?;
        attributes.extend(self.meta.consume_document(document));
        self.attributes = from_document(attributes)?;

        Ok(())
    }

    /// Chaining form of [`Record::fill`].
    pub fn merge(mut self, document: Document) -> OdmResult<Self> {
        self.fill(document)?;
        Ok(self)
    }

    /// The persistence form: `prepare` transforms and storage names, without `_id`.
    pub fn to_object(&self) -> OdmResult<Document> {
        Ok(self
            .meta
            .prepare_document(self.attributes()?))
    }

    /// The external form: serialization policy, computed properties and the identifier.
    pub fn serialize(&self) -> OdmResult<Document> {
        let mut serialized = Document::new();

        if self.meta.primary_key() == DEFAULT_PRIMARY_KEY {
            if let Some(id) = &self.id {
                serialized.insert(DEFAULT_PRIMARY_KEY, id.clone());
            }
        }

        serialized.extend(
            self.meta
                .serialize_document(self.attributes()?, &self.attributes),
        );

        Ok(serialized)
    }

    /// The external form as JSON.
    pub fn to_json(&self) -> OdmResult<serde_json::Value> {
        Ok(serde_json::to_value(self.serialize()?)?)
    }

    /// Attributes that differ from the last loaded or saved snapshot.
    ///
    /// A new record reports every attribute. Removed attributes are reported as `null`.
    pub fn dirty(&self) -> OdmResult<Document> {
        let current = self.attributes()?;

        let Some(original) = &self.original else {
            return Ok(current);
        };

        let keys: BTreeSet<&String> = current
            .keys()
            .chain(original.keys())
            .collect();

        Ok(keys
            .into_iter()
            .filter(|key| current.get(key.as_str()) != original.get(key.as_str()))
            .map(|key| {
                let value = current
                    .get(key.as_str())
                    .cloned()
                    .unwrap_or(Bson::Null);

                (key.clone(), value)
            })
            .collect())
    }

    /// Whether any attribute changed. Always `true` for a new record.
    pub fn is_dirty(&self) -> bool {
        self.is_new()
            || self
                .dirty()
                .map(|dirty| !dirty.is_empty())
                .unwrap_or(true)
    }

    pub fn is_dirty_key(&self, key: &str) -> bool {
        self.dirty()
            .map(|dirty| dirty.contains_key(key))
            .unwrap_or(true)
    }

    pub fn is_dirty_any<I, S>(&self, keys: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        match self.dirty() {
            Ok(dirty) => keys
                .into_iter()
                .any(|key| dirty.contains_key(key.as_ref())),
            Err(_) => true,
        }
    }

    /// Inserts a new record or updates a persisted one, then reloads it from the store.
    ///
    /// # Errors
    ///
    /// Returns [`OdmError::ModelPrimaryKeyMissing`] when updating a record without identifier,
    /// the error of the first failing step or hook, or the store error.
    pub async fn save(&mut self) -> OdmResult<()> {
        let kind = match self.state {
            RecordState::New => PersistKind::Create,
            RecordState::Persisted | RecordState::Deleted => PersistKind::Update,
        };
        let context = PersistContext::new(kind);
        let meta = self.meta.clone();

        self.run_steps(meta.pre_persist_steps(), &context)?;
        M::before_save(self).await?;

        match kind {
            PersistKind::Create => self.perform_insert(&context).await?,
            PersistKind::Update => self.perform_update(&context).await?,
        }

        M::after_save(self).await
    }

    async fn perform_insert(&mut self, context: &PersistContext) -> OdmResult<()> {
        M::before_create(self).await?;

        let object = self.to_object()?;
        let inserted = self.builder().insert(object.clone()).await?;

        self.id = match self.meta.primary_key() {
            DEFAULT_PRIMARY_KEY => Some(inserted),
            key => Some(object.get(key).cloned().unwrap_or(inserted)),
        };
        self.state = RecordState::Persisted;
        self.refresh().await?;

        let meta = self.meta.clone();
        self.run_steps(meta.post_persist_steps(), context)?;

        M::after_create(self).await
    }

    async fn perform_update(&mut self, context: &PersistContext) -> OdmResult<()> {
        M::before_update(self).await?;

        let id = self.require_id("update")?;
        let object = self.to_object()?;

        if !object.is_empty() {
            self.by_id(id)
                .update(doc! { "$set": object })
                .await?;
        }

        self.refresh().await?;

        let meta = self.meta.clone();
        self.run_steps(meta.post_persist_steps(), context)?;

        M::after_update(self).await
    }

    /// Deletes the record by identifier.
    pub async fn delete(&mut self) -> OdmResult<()> {
        let id = self.require_id("delete")?;

        M::before_delete(self).await?;
        self.by_id(id).delete().await?;
        self.state = RecordState::Deleted;

        M::after_delete(self).await
    }

    /// Reloads the attributes from the store and resets the dirty snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`OdmError::DocumentNotFound`] if the document no longer exists.
    pub async fn refresh(&mut self) -> OdmResult<()> {
        let id = self.require_id("refresh")?;

        let Some(document) = self.by_id(id.clone()).first().await? else {
            return Err(OdmError::DocumentNotFound(
                id.to_string(),
                M::collection_name().to_string(),
            ));
        };

        let fresh = Self::hydrate(&self.db, document)?;

        self.attributes = fresh.attributes;
        self.original = fresh.original;
        self.id = fresh.id.or(Some(id));
        self.state = RecordState::Persisted;

        Ok(())
    }

    fn run_steps(&mut self, steps: &[PersistStep<M>], context: &PersistContext) -> OdmResult<()> {
        for step in steps {
            step(self, context)?;
        }

        Ok(())
    }

    pub(crate) fn require_id(&self, operation: &str) -> OdmResult<Bson> {
        self.id
            .clone()
            .filter(|id| *id != Bson::Null)
            .ok_or_else(|| {
                OdmError::ModelPrimaryKeyMissing(M::model_name().to_string(), operation.to_string())
            })
    }

    fn builder(&self) -> QueryBuilder {
        QueryBuilder::new(&self.db, M::connection_name(), M::collection_name())
    }

    fn by_id(&self, id: Bson) -> QueryBuilder {
        self.builder()
            .where_eq(self.meta.primary_key(), id)
    }
}

impl<M> Deref for Record<M> {
    type Target = M;

    fn deref(&self) -> &M {
        &self.attributes
    }
}

impl<M> DerefMut for Record<M> {
    fn deref_mut(&mut self) -> &mut M {
        &mut self.attributes
    }
}

impl<M: Model> Serialize for Record<M> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        Record::serialize(self)
            .map_err(S::Error::custom)?
            .serialize(serializer)
    }
}

/// Parses a string identifier into an `ObjectId` when `key` is `_id` and the string is a
/// valid hex id. Values of any other key are left as given.
pub(crate) fn normalize_id(key: &str, id: Bson) -> Bson {
    match id {
        Bson::String(hex) if key == DEFAULT_PRIMARY_KEY => match ObjectId::parse_str(&hex) {
            Ok(oid) => Bson::ObjectId(oid),
            Err(_) => Bson::String(hex),
        },
        other => other,
    }
}

pub(crate) fn to_document<T: Serialize>(value: &T) -> OdmResult<Document> {
    match serialize_to_bson(value)? {
        Bson::Document(document) => Ok(document),
        other => Err(OdmError::Serialization(format!(
            "expected a document, found {:?}",
            other.element_type()
        ))),
    }
}

pub(crate) fn from_document<T: serde::de::DeserializeOwned>(document: Document) -> OdmResult<T> {
    Ok(deserialize_from_bson(Bson::Document(document))?)
}
