//! Convenient re-exports of commonly used types from docrecord.
//!
//! Import this prelude module to access the most frequently used types and traits without
//! importing from multiple sub-modules:
//!
//! ```ignore
//! use docrecord::prelude::*;
//! ```

pub use async_trait::async_trait;
pub use bson::{Bson, Document, doc, oid::ObjectId};

pub use docrecord_core::{
    backend::{FindOptions, StoreBackend, StoreBackendBuilder},
    connection::{Connection, Database, DatabaseBuilder},
    error::{OdmError, OdmResult},
    event::{ConnectionEvent, EventListener, QueryEvent, QueryOperation},
    filter::{Filter, Filtered, Operator},
    metadata::{Column, Computed, ModelMeta, SerializeAs, Timestamp},
    model::{Model, ModelExt},
    page::{Page, PaginationParams},
    persist::{PersistContext, PersistKind},
    query::{ModelQuery, QueryBuilder, SortDirection},
    record::{Record, RecordState},
    relation::{BelongsTo, BelongsToMany, HasMany, HasOne},
};

pub use crate::{
    config::{ConnectionConfig, DatabaseConfig},
    memory::InMemoryStore,
};
