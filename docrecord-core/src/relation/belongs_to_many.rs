use bson::{Bson, Document, doc};
use std::marker::PhantomData;

use crate::{
    error::{OdmError, OdmResult},
    filter::Filtered,
    metadata::{DEFAULT_PRIMARY_KEY, metadata},
    model::{Model, ModelExt},
    query::QueryBuilder,
    record::{Record, from_document, normalize_id},
};

use super::{default_foreign_key, primary_key, relation_name, require_key};

/// Many-to-many relation through pivot records of `P`.
///
/// Each pivot document holds the owner key under the pivot foreign key (default `<owner>_id`)
/// and the related key under the pivot related key (default `<related>_id`). Any other pivot
/// field is pivot data.
#[derive(Debug)]
pub struct BelongsToMany<'a, M: Model, R: Model, P: Model> {
    owner: &'a Record<M>,
    local_key: String,
    pivot_foreign_key: String,
    pivot_related_key: String,
    related_key: String,
    _models: PhantomData<fn() -> (R, P)>,
}

impl<'a, M: Model, R: Model, P: Model> BelongsToMany<'a, M, R, P> {
    pub(crate) fn new(owner: &'a Record<M>) -> Self {
        metadata::<R>();
        metadata::<P>();

        Self {
            owner,
            local_key: primary_key::<M>(),
            pivot_foreign_key: default_foreign_key::<M>(),
            pivot_related_key: default_foreign_key::<R>(),
            related_key: DEFAULT_PRIMARY_KEY.to_string(),
            _models: PhantomData,
        }
    }

    /// Sets the key on the owner stored in the pivot.
    pub fn local_key(mut self, key: impl Into<String>) -> Self {
        self.local_key = key.into();
        self
    }

    /// Sets the pivot key holding the owner key.
    pub fn pivot_foreign_key(mut self, key: impl Into<String>) -> Self {
        self.pivot_foreign_key = key.into();
        self
    }

    /// Sets the pivot key holding the related key.
    pub fn pivot_related_key(mut self, key: impl Into<String>) -> Self {
        self.pivot_related_key = key.into();
        self
    }

    /// Sets the key on the related model stored in the pivot.
    pub fn related_key(mut self, key: impl Into<String>) -> Self {
        self.related_key = key.into();
        self
    }

    fn name(&self) -> String {
        relation_name::<M, R>("belongs_to_many")
    }

    fn owner_key(&self) -> OdmResult<Bson> {
        if self.pivot_foreign_key == self.pivot_related_key {
            return Err(OdmError::InvalidRelation(format!(
                "{}: pivot keys must differ, both are {}",
                self.name(),
                self.pivot_foreign_key
            )));
        }

        require_key(self.owner, &self.local_key, &self.name())
    }

    /// Pivot documents of the owner.
    fn pivots(&self) -> OdmResult<QueryBuilder> {
        let owner_key = self.owner_key()?;

        Ok(P::query(self.owner.database())
            .into_builder()
            .where_eq(self.pivot_foreign_key.as_str(), owner_key))
    }

    /// Loads the related records linked to the owner.
    pub async fn exec(&self) -> OdmResult<Vec<Record<R>>> {
        let pivots = self.pivots()?.exec().await?;

        let mut keys: Vec<Bson> = Vec::with_capacity(pivots.len());
        for pivot in pivots {
            if let Some(key) = pivot.get(&self.pivot_related_key) {
                if !keys.contains(key) {
                    keys.push(key.clone());
                }
            }
        }

        if keys.is_empty() {
            return Ok(Vec::new());
        }

        R::query(self.owner.database())
            .where_in(self.related_key.as_str(), keys)
            .exec()
            .await
    }

    /// Creates a pivot record per related key.
    pub async fn attach<I, V>(&self, ids: I) -> OdmResult<Vec<Record<P>>>
    where
        I: IntoIterator<Item = V>,
        V: Into<Bson>,
    {
        self.attach_with_pivot_data(ids.into_iter().map(|id| (id, Document::new())))
            .await
    }

    /// Creates a pivot record per `(related key, data)` entry, merging the entry's data into
    /// its own pivot record.
    ///
    /// The records are written with a single bulk insert. Data fields are stored as given, even
    /// when `P` does not declare them; the two key fields of the data are ignored.
    pub async fn attach_with_pivot_data<I, V>(&self, entries: I) -> OdmResult<Vec<Record<P>>>
    where
        I: IntoIterator<Item = (V, Document)>,
        V: Into<Bson>,
    {
        let owner_key = self.owner_key()?;
        let db = self.owner.database();
        let meta = metadata::<P>();

        let mut documents = Vec::new();
        for (id, data) in entries {
            let mut document = self.strip_keys(data);
            document.insert(self.pivot_foreign_key.as_str(), owner_key.clone());
            document.insert(self.pivot_related_key.as_str(), self.related_id(id));

            // Nothing is written unless every pivot hydrates.
            from_document::<P>(meta.consume_document(document.clone()))?;
            documents.push(document);
        }

        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let ids = P::query(db)
            .into_builder()
            .insert_many(documents.clone())
            .await?;

        documents
            .into_iter()
            .zip(ids)
            .map(|(mut document, id)| {
                document.insert(DEFAULT_PRIMARY_KEY, id);
                Record::hydrate(db, document)
            })
            .collect()
    }

    /// Deletes the pivot records of the given related keys, or all of them for `None`.
    pub async fn detach<I, V>(&self, ids: Option<I>) -> OdmResult<u64>
    where
        I: IntoIterator<Item = V>,
        V: Into<Bson>,
    {
        let pivots = self.pivots()?;

        let pivots = match ids {
            Some(ids) => pivots.where_in(
                self.pivot_related_key.as_str(),
                normalize_ids(&self.related_key, ids),
            ),
            None => pivots,
        };

        pivots.delete().await
    }

    /// Replaces every pivot record of the owner with the given related keys.
    ///
    /// Not atomic: a failure after the detach leaves the owner with fewer links.
    pub async fn sync<I, V>(&self, ids: I) -> OdmResult<Vec<Record<P>>>
    where
        I: IntoIterator<Item = V>,
        V: Into<Bson>,
    {
        self.sync_with_pivot_data(ids.into_iter().map(|id| (id, Document::new())))
            .await
    }

    /// Replaces every pivot record of the owner with the given `(related key, data)` entries.
    pub async fn sync_with_pivot_data<I, V>(&self, entries: I) -> OdmResult<Vec<Record<P>>>
    where
        I: IntoIterator<Item = (V, Document)>,
        V: Into<Bson>,
    {
        let entries: Vec<(Bson, Document)> = entries
            .into_iter()
            .map(|(id, data)| (id.into(), data))
            .collect();

        self.detach(None::<Vec<Bson>>).await?;
        self.attach_with_pivot_data(entries)
            .await
    }

    /// Whether the owner is linked to the related key.
    pub async fn exists(&self, id: impl Into<Bson>) -> OdmResult<bool> {
        let count = self
            .pivots()?
            .where_eq(self.pivot_related_key.as_str(), self.related_id(id))
            .count()
            .await?;

        Ok(count > 0)
    }

    /// Pivot data of the link to the related key, without the two key fields.
    pub async fn pivot_data(&self, id: impl Into<Bson>) -> OdmResult<Option<Document>> {
        let pivot = self
            .pivots()?
            .where_eq(self.pivot_related_key.as_str(), self.related_id(id))
            .first()
            .await?;

        Ok(pivot.map(|pivot| self.strip_keys(pivot)))
    }

    /// Sets pivot data on the link to the related key and returns the modified count.
    ///
    /// The two key fields are ignored; nothing is written when no other field remains.
    pub async fn update_pivot_data(&self, id: impl Into<Bson>, data: Document) -> OdmResult<u64> {
        let data = self.strip_keys(data);

        if data.is_empty() {
            return Ok(0);
        }

        self.pivots()?
            .where_eq(self.pivot_related_key.as_str(), self.related_id(id))
            .update(doc! { "$set": data })
            .await
    }

    fn related_id(&self, id: impl Into<Bson>) -> Bson {
        normalize_id(&self.related_key, id.into())
    }

    fn strip_keys(&self, mut document: Document) -> Document {
        document.remove(&self.pivot_foreign_key);
        document.remove(&self.pivot_related_key);
        document
    }
}

fn normalize_ids<I, V>(key: &str, ids: I) -> Vec<Bson>
where
    I: IntoIterator<Item = V>,
    V: Into<Bson>,
{
    ids.into_iter()
        .map(|id| normalize_id(key, id.into()))
        .collect()
}
