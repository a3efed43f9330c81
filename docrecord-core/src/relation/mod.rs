//! Relationships between models.
//!
//! Relations are capability objects created fresh by factory methods on [`Record`]. They hold
//! no state beyond their key configuration and emulate joins with additional queries.
//!
//! | factory                         | owner key       | related key             |
//! |---------------------------------|-----------------|-------------------------|
//! | [`Record::belongs_to`]          | `<related>_id`  | related primary key     |
//! | [`Record::has_one`]             | primary key     | `<owner>_id`            |
//! | [`Record::has_many`]            | primary key     | `<owner>_id`            |
//! | [`Record::belongs_to_many`]     | primary key     | `_id`, via a pivot model holding `<owner>_id` and `<related>_id` |
//!
//! Default key names use the snake-cased [`Model::model_name`]. Every key can be overridden
//! with the builder methods of the relation.
//!
//! # Example
//!
//! ```ignore
//! let author = User::find(&db, id).await?.ok_or(NotFound)?;
//!
//! let post = author.has_many::<Post>().create(Post::draft("Hello")).await?;
//! let posts = author.has_many::<Post>().exec().await?;
//!
//! let roles = author
//!     .belongs_to_many::<Role, UserRole>()
//!     .sync([admin_id, editor_id])
//!     .await?;
//! ```

mod belongs_to;
mod belongs_to_many;
mod has_many;
mod has_one;

pub use belongs_to::BelongsTo;
pub use belongs_to_many::BelongsToMany;
pub use has_many::HasMany;
pub use has_one::HasOne;

use bson::Bson;

use crate::{
    error::{OdmError, OdmResult},
    metadata::metadata,
    model::Model,
    record::Record,
};

impl<M: Model> Record<M> {
    /// The record this one points to through a foreign key it holds.
    pub fn belongs_to<R: Model>(&mut self) -> BelongsTo<'_, M, R> {
        BelongsTo::new(self)
    }

    /// The single record pointing to this one.
    pub fn has_one<R: Model>(&self) -> HasOne<'_, M, R> {
        HasOne::new(self)
    }

    /// The records pointing to this one.
    pub fn has_many<R: Model>(&self) -> HasMany<'_, M, R> {
        HasMany::new(self)
    }

    /// The records linked to this one through pivot records of `P`.
    pub fn belongs_to_many<R: Model, P: Model>(&self) -> BelongsToMany<'_, M, R, P> {
        BelongsToMany::new(self)
    }
}

/// `<snake_case model name>_id`.
pub(crate) fn default_foreign_key<M: Model>() -> String {
    format!("{}_id", snake_case(M::model_name()))
}

pub(crate) fn primary_key<M: Model>() -> String {
    metadata::<M>()
        .primary_key()
        .to_string()
}

pub(crate) fn relation_name<M: Model, R: Model>(kind: &str) -> String {
    format!("{}::{}::<{}>", M::model_name(), kind, R::model_name())
}

/// Value of a storage key on a record; `None` when absent or null.
pub(crate) fn key_value<M: Model>(record: &Record<M>, key: &str) -> OdmResult<Option<Bson>> {
    let value = record.get_attribute(record.meta().property_name(key))?;

    Ok(value.filter(|value| *value != Bson::Null))
}

pub(crate) fn require_key<M: Model>(
    record: &Record<M>,
    key: &str,
    relation: &str,
) -> OdmResult<Bson> {
    key_value(record, key)?
        .ok_or_else(|| OdmError::RelationKeyMissing(relation.to_string(), key.to_string()))
}

pub(crate) fn assign_key<M: Model>(
    record: &mut Record<M>,
    key: &str,
    value: Bson,
) -> OdmResult<()> {
    let property = record
        .meta()
        .property_name(key)
        .to_string();

    record.set_attribute(&property, value)
}

fn snake_case(name: &str) -> String {
    let mut snake = String::with_capacity(name.len() + 4);

    for (index, ch) in name.char_indices() {
        if ch.is_uppercase() {
            if index > 0 {
                snake.push('_');
            }
            snake.extend(ch.to_lowercase());
        } else {
            snake.push(ch);
        }
    }

    snake
}
