//! Per-model column, computed-property and timestamp metadata.
//!
//! Every [`Model`] owns one [`ModelMeta`], built the first time [`metadata`] is requested for
//! the model type by calling [`Model::boot`]. The registry is keyed by [`TypeId`], written once
//! per model and read afterwards.
//!
//! Columns describe how a model property maps to the stored document:
//!
//! - the storage name (defaults to the property name),
//! - whether the property is the primary key (the default primary key is `_id`),
//! - the external serialization policy ([`SerializeAs`]),
//! - `prepare` and `consume` transforms, applied on write and read respectively.
//!
//! # Example
//!
//! ```ignore
//! impl Model for User {
//!     fn collection_name() -> &'static str {
//!         "users"
//!     }
//!
//!     fn boot(meta: &mut ModelMeta<Self>) {
//!         meta.column("email", Column::new().named("email_address"))
//!             .column("password", Column::new().serialize_as(SerializeAs::Hidden))
//!             .computed("display_name", Computed::new(|user: &User| Ok(user.name.to_uppercase().into())))
//!             .timestamp("created_at", Timestamp::created())
//!             .timestamp("updated_at", Timestamp::updated());
//!     }
//! }
//! ```

use bson::{Bson, Document};
use std::{
    any::{Any, TypeId},
    collections::{BTreeMap, HashMap},
    fmt,
    sync::{Arc, LazyLock, PoisonError, RwLock},
};

use crate::{
    error::OdmResult,
    model::Model,
    persist::{PersistContext, PersistStep, timestamp_step},
    record::Record,
};

pub const DEFAULT_PRIMARY_KEY: &str = "_id";

type Registry = RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>;

static REGISTRY: LazyLock<Registry> = LazyLock::new(|| RwLock::new(HashMap::new()));

/// Returns the metadata of `M`, booting it on first use.
///
/// `M::boot` runs outside the registry lock; if two threads boot concurrently the first
/// registration wins and both observe it.
pub fn metadata<M: Model>() -> Arc<ModelMeta<M>> {
    let id = TypeId::of::<M>();

    let registered = REGISTRY
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&id)
        .cloned();

    if let Some(Ok(meta)) = registered.map(|meta| meta.downcast::<ModelMeta<M>>()) {
        return meta;
    }

    let booted: Arc<dyn Any + Send + Sync> = Arc::new(boot::<M>());
    let stored = REGISTRY
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .entry(id)
        .or_insert(booted)
        .clone();

    match stored.downcast::<ModelMeta<M>>() {
        Ok(meta) => meta,
        Err(_) => Arc::new(boot::<M>()),
    }
}

fn boot<M: Model>() -> ModelMeta<M> {
    let mut meta = ModelMeta::new();
    M::boot(&mut meta);

    tracing::trace!(
        model = M::model_name(),
        columns = meta.columns.len(),
        computed = meta.computed.len(),
        timestamps = meta.timestamps.len(),
        "booted model metadata"
    );

    meta
}

type Transform = Arc<dyn Fn(Bson) -> Bson + Send + Sync>;

/// How a property appears in the external (serialized) form of a record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SerializeAs {
    /// Keep the property name.
    #[default]
    Keep,
    /// Serialize under another name.
    Rename(String),
    /// Exclude from the external form.
    Hidden,
}

/// Definition of a stored property.
#[derive(Clone)]
pub struct Column {
    name: Option<String>,
    primary: bool,
    serialize: bool,
    serialize_as: SerializeAs,
    prepare: Option<Transform>,
    consume: Option<Transform>,
}

impl Column {
    pub fn new() -> Self {
        Self {
            name: None,
            primary: false,
            serialize: true,
            serialize_as: SerializeAs::Keep,
            prepare: None,
            consume: None,
        }
    }

    /// Marks the column as the primary key of the model.
    pub fn primary(mut self) -> Self {
        self.primary = true;
        self
    }

    /// Sets the storage name of the column.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Whether the property is part of the external form. Defaults to `true`.
    pub fn serialize(mut self, serialize: bool) -> Self {
        self.serialize = serialize;
        self
    }

    pub fn serialize_as(mut self, serialize_as: SerializeAs) -> Self {
        self.serialize_as = serialize_as;
        self
    }

    /// Transform applied to the value before it is written.
    pub fn prepare<F>(mut self, prepare: F) -> Self
    where
        F: Fn(Bson) -> Bson + Send + Sync + 'static,
    {
        self.prepare = Some(Arc::new(prepare));
        self
    }

    /// Transform applied to the stored value when it is read.
    pub fn consume<F>(mut self, consume: F) -> Self
    where
        F: Fn(Bson) -> Bson + Send + Sync + 'static,
    {
        self.consume = Some(Arc::new(consume));
        self
    }

    pub fn is_primary(&self) -> bool {
        self.primary
    }

    pub fn storage_name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The external name of the property, `None` if it is not serialized.
    fn external_name<'a>(&'a self, property: &'a str) -> Option<&'a str> {
        match (self.serialize, &self.serialize_as) {
            (false, _) | (_, SerializeAs::Hidden) => None,
            (true, SerializeAs::Rename(name)) => Some(name),
            (true, SerializeAs::Keep) => Some(property),
        }
    }
}

impl Default for Column {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Column")
            .field("name", &self.name)
            .field("primary", &self.primary)
            .field("serialize", &self.serialize)
            .field("serialize_as", &self.serialize_as)
            .field("prepare", &self.prepare.is_some())
            .field("consume", &self.consume.is_some())
            .finish()
    }
}

type Getter<M> = Arc<dyn Fn(&M) -> OdmResult<Bson> + Send + Sync>;

/// A derived property, only present in the external form.
pub struct Computed<M> {
    getter: Getter<M>,
    serialize: bool,
    serialize_as: SerializeAs,
}

impl<M> Computed<M> {
    pub fn new<F>(getter: F) -> Self
    where
        F: Fn(&M) -> OdmResult<Bson> + Send + Sync + 'static,
    {
        Self {
            getter: Arc::new(getter),
            serialize: true,
            serialize_as: SerializeAs::Keep,
        }
    }

    pub fn serialize(mut self, serialize: bool) -> Self {
        self.serialize = serialize;
        self
    }

    pub fn serialize_as(mut self, serialize_as: SerializeAs) -> Self {
        self.serialize_as = serialize_as;
        self
    }

    pub fn get(&self, model: &M) -> OdmResult<Bson> {
        (self.getter)(model)
    }
}

impl<M> Clone for Computed<M> {
    fn clone(&self) -> Self {
        Self {
            getter: self.getter.clone(),
            serialize: self.serialize,
            serialize_as: self.serialize_as.clone(),
        }
    }
}

impl<M> fmt::Debug for Computed<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("serialize", &self.serialize)
            .field("serialize_as", &self.serialize_as)
            .finish_non_exhaustive()
    }
}

/// A column stamped with the save time.
#[derive(Debug, Clone)]
pub struct Timestamp {
    column: Column,
    auto_create: bool,
    auto_update: bool,
}

impl Timestamp {
    /// A timestamp that is never stamped automatically.
    pub fn new() -> Self {
        Self {
            column: Column::new(),
            auto_create: false,
            auto_update: false,
        }
    }

    /// Stamped when the record is created.
    pub fn created() -> Self {
        Self::new().auto_create(true)
    }

    /// Stamped when the record is created and on every update.
    pub fn updated() -> Self {
        Self::new()
            .auto_create(true)
            .auto_update(true)
    }

    pub fn column(mut self, column: Column) -> Self {
        self.column = column;
        self
    }

    pub fn auto_create(mut self, auto_create: bool) -> Self {
        self.auto_create = auto_create;
        self
    }

    pub fn auto_update(mut self, auto_update: bool) -> Self {
        self.auto_update = auto_update;
        self
    }

    pub fn is_auto_create(&self) -> bool {
        self.auto_create
    }

    pub fn is_auto_update(&self) -> bool {
        self.auto_update
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::new()
    }
}

/// Metadata of one model type.
pub struct ModelMeta<M> {
    primary_key: String,
    columns: BTreeMap<String, Column>,
    storage_index: HashMap<String, String>,
    computed: BTreeMap<String, Computed<M>>,
    timestamps: BTreeMap<String, Timestamp>,
    pre_persist: Vec<PersistStep<M>>,
    post_persist: Vec<PersistStep<M>>,
    stamps_installed: bool,
}

impl<M: Model> ModelMeta<M> {
    pub fn new() -> Self {
        Self {
            primary_key: DEFAULT_PRIMARY_KEY.to_string(),
            columns: BTreeMap::new(),
            storage_index: HashMap::new(),
            computed: BTreeMap::new(),
            timestamps: BTreeMap::new(),
            pre_persist: Vec::new(),
            post_persist: Vec::new(),
            stamps_installed: false,
        }
    }

    /// Storage name of the primary key, `_id` unless a column is marked primary.
    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    /// Registers a column. Registering a property again replaces its column.
    pub fn column(&mut self, property: impl Into<String>, column: Column) -> &mut Self {
        let property = property.into();
        let storage = column
            .storage_name()
            .unwrap_or(&property)
            .to_string();

        if column.is_primary() {
            self.primary_key = storage.clone();
        }

        self.storage_index
            .retain(|_, existing| *existing != property);
        self.storage_index
            .insert(storage, property.clone());
        self.columns.insert(property, column);
        self
    }

    pub fn computed(&mut self, property: impl Into<String>, computed: Computed<M>) -> &mut Self {
        self.computed
            .insert(property.into(), computed);
        self
    }

    /// Registers a timestamp column and installs the stamping step once.
    pub fn timestamp(&mut self, property: impl Into<String>, timestamp: Timestamp) -> &mut Self {
        let property = property.into();

        self.column(property.clone(), timestamp.column.clone());
        self.timestamps.insert(property, timestamp);

        if !self.stamps_installed {
            self.stamps_installed = true;
            self.pre_persist.push(timestamp_step::<M>());
        }

        self
    }

    /// Adds a step run before the save hooks, in registration order.
    pub fn pre_persist<F>(&mut self, step: F) -> &mut Self
    where
        F: Fn(&mut Record<M>, &PersistContext) -> OdmResult<()> + Send + Sync + 'static,
    {
        self.pre_persist.push(Arc::new(step));
        self
    }

    /// Adds a step run after the record was written and refreshed, in registration order.
    pub fn post_persist<F>(&mut self, step: F) -> &mut Self
    where
        F: Fn(&mut Record<M>, &PersistContext) -> OdmResult<()> + Send + Sync + 'static,
    {
        self.post_persist.push(Arc::new(step));
        self
    }

    pub fn column_for(&self, property: &str) -> Option<&Column> {
        self.columns.get(property)
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &Column)> {
        self.columns
            .iter()
            .map(|(property, column)| (property.as_str(), column))
    }

    pub fn timestamps(&self) -> impl Iterator<Item = (&str, &Timestamp)> {
        self.timestamps
            .iter()
            .map(|(property, timestamp)| (property.as_str(), timestamp))
    }

    pub(crate) fn pre_persist_steps(&self) -> &[PersistStep<M>] {
        &self.pre_persist
    }

    pub(crate) fn post_persist_steps(&self) -> &[PersistStep<M>] {
        &self.post_persist
    }

    /// Storage name of a property.
    pub fn storage_name<'a>(&'a self, property: &'a str) -> &'a str {
        self.columns
            .get(property)
            .and_then(Column::storage_name)
            .unwrap_or(property)
    }

    /// Property name of a storage key.
    pub fn property_name<'a>(&'a self, storage: &'a str) -> &'a str {
        self.storage_index
            .get(storage)
            .map(String::as_str)
            .unwrap_or(storage)
    }

    /// Maps a stored document to property names, applying `consume` transforms.
    ///
    /// The `_id` key is dropped; records carry their identifier separately.
    pub fn consume_document(&self, document: Document) -> Document {
        document
            .into_iter()
            .filter(|(key, _)| key != DEFAULT_PRIMARY_KEY)
            .map(|(key, value)| {
                let property = self.property_name(&key).to_string();
                let value = match self
                    .columns
                    .get(&property)
                    .and_then(|column| column.consume.as_ref())
                {
                    Some(consume) => consume(value),
                    None => value,
                };

                (property, value)
            })
            .collect()
    }

    /// Maps a property document to storage names, applying `prepare` transforms.
    ///
    /// The `_id` key and keys starting with `$` are skipped.
    pub fn prepare_document(&self, document: Document) -> Document {
        document
            .into_iter()
            .filter(|(key, _)| key != DEFAULT_PRIMARY_KEY && !key.starts_with('$'))
            .map(|(property, value)| {
                let column = self.columns.get(&property);
                let value = match column.and_then(|column| column.prepare.as_ref()) {
                    Some(prepare) => prepare(value),
                    None => value,
                };

                (self.storage_name(&property).to_string(), value)
            })
            .collect()
    }

    /// Applies the serialization policy to a property document and appends computed values.
    ///
    /// Computed getters that fail are skipped.
    pub fn serialize_document(&self, document: Document, model: &M) -> Document {
        let mut serialized: Document = document
            .into_iter()
            .filter_map(|(property, value)| {
                let name = match self.columns.get(&property) {
                    Some(column) => column.external_name(&property)?.to_string(),
                    None => property,
                };

                Some((name, value))
            })
            .collect();

        for (property, computed) in &self.computed {
            let name = match (computed.serialize, &computed.serialize_as) {
                (false, _) | (_, SerializeAs::Hidden) => continue,
                (true, SerializeAs::Rename(name)) => name,
                (true, SerializeAs::Keep) => property,
            };

            match computed.get(model) {
                Ok(value) => {
                    serialized.insert(name.clone(), value);
                }
                Err(err) => {
                    tracing::debug!(model = M::model_name(), property = %property, error = %err, "skipped computed property");
                }
            }
        }

        serialized
    }
}

impl<M: Model> Default for ModelMeta<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> fmt::Debug for ModelMeta<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelMeta")
            .field("primary_key", &self.primary_key)
            .field("columns", &self.columns)
            .field("computed", &self.computed)
            .field("timestamps", &self.timestamps)
            .field("pre_persist", &self.pre_persist.len())
            .field("post_persist", &self.post_persist.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bson::doc;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Account {
        email: String,
        secret: String,
        nickname: String,
    }

    #[async_trait]
    impl Model for Account {
        fn collection_name() -> &'static str {
            "accounts"
        }

        fn boot(meta: &mut ModelMeta<Self>) {
            meta.column(
                "email",
                Column::new()
                    .named("email_address")
                    .prepare(|value| match value {
                        Bson::String(email) => Bson::String(email.to_uppercase()),
                        other => other,
                    })
                    .consume(|value| match value {
                        Bson::String(email) => Bson::String(email.to_lowercase()),
                        other => other,
                    }),
            )
            .column("secret", Column::new().serialize_as(SerializeAs::Hidden))
            .column("nickname", Column::new().serialize_as(SerializeAs::Rename("alias".into())))
            .computed(
                "domain",
                Computed::new(|account: &Account| {
                    Ok(account.email.split('@').nth(1).unwrap_or_default().into())
                }),
            )
            .computed(
                "broken",
                Computed::new(|_: &Account| Err(crate::error::OdmError::hook("unavailable"))),
            )
            .timestamp("created_at", Timestamp::created())
            .timestamp("updated_at", Timestamp::updated());
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Keyed {
        code: String,
    }

    #[async_trait]
    impl Model for Keyed {
        fn collection_name() -> &'static str {
            "keyed"
        }

        fn boot(meta: &mut ModelMeta<Self>) {
            meta.column("code", Column::new().primary().named("sku"));
        }
    }

    #[test]
    fn test_metadata_is_booted_once() {
        let first = metadata::<Account>();
        let second = metadata::<Account>();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.primary_key(), DEFAULT_PRIMARY_KEY);
        assert_eq!(first.pre_persist_steps().len(), 1);
        assert_eq!(first.timestamps().count(), 2);
    }

    #[test]
    fn test_primary_column_sets_primary_key() {
        assert_eq!(metadata::<Keyed>().primary_key(), "sku");
    }

    #[test]
    fn test_prepare_and_consume_documents() {
        let meta = metadata::<Account>();

        let prepared = meta.prepare_document(doc! {
            "_id": 1,
            "$hint": true,
            "email": "Ada@Example.com",
            "secret": "x",
        });
        assert_eq!(prepared, doc! { "email_address": "ADA@EXAMPLE.COM", "secret": "x" });

        let consumed = meta.consume_document(doc! {
            "_id": 1,
            "email_address": "ADA@EXAMPLE.COM",
            "secret": "x",
        });
        assert_eq!(consumed, doc! { "email": "ada@example.com", "secret": "x" });
    }

    #[test]
    fn test_serialization_policy() {
        let meta = metadata::<Account>();
        let account = Account {
            email: "ada@example.com".into(),
            secret: "hunter2".into(),
            nickname: "ada".into(),
        };

        let serialized = meta.serialize_document(
            doc! { "email": "ada@example.com", "secret": "hunter2", "nickname": "ada" },
            &account,
        );

        assert_eq!(
            serialized,
            doc! { "email": "ada@example.com", "alias": "ada", "domain": "example.com" }
        );
    }

    #[test]
    fn test_reregistering_a_column_replaces_it() {
        let mut meta = ModelMeta::<Keyed>::new();
        meta.column("code", Column::new().named("old"))
            .column("code", Column::new().named("new"));

        assert_eq!(meta.storage_name("code"), "new");
        assert_eq!(meta.property_name("new"), "code");
        assert_eq!(meta.property_name("old"), "old");
    }
}
