//! Main docrecord crate providing an active-record object document mapper.
//!
//! This crate is the primary entry point for users of docrecord. It re-exports the core types
//! from the sub-crates, provides declarative [`config`], and gives access to the storage
//! backends.
//!
//! # Features
//!
//! - **Active-record models** - Serde structs with finders, `save`, `delete` and lifecycle hooks
//! - **Column metadata** - Storage names, prepare/consume transforms, serialization policy,
//!   computed properties and automatic timestamps
//! - **Fluent queries** - Composable filters translated into MongoDB filter documents
//! - **Relations** - Belongs-to, has-one, has-many and many-to-many through a pivot model
//! - **Named connections** - Lazily connected backends with query and connection events
//!
//! # Quick Start
//!
//! ```ignore
//! use docrecord::prelude::*;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! pub struct User {
//!     pub name: String,
//!     pub email: String,
//!     pub created_at: Option<bson::DateTime>,
//! }
//!
//! #[async_trait]
//! impl Model for User {
//!     fn collection_name() -> &'static str {
//!         "users"
//!     }
//!
//!     fn boot(meta: &mut ModelMeta<Self>) {
//!         meta.column("email", Column::new().prepare(|v| match v {
//!             Bson::String(s) => Bson::String(s.to_lowercase()),
//!             other => other,
//!         }))
//!         .timestamp("created_at", Timestamp::created());
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::builder()
//!         .connection("primary", InMemoryStore::builder())
//!         .build();
//!
//!     let mut user = User::create(&db, User {
//!         name: "Alice".to_string(),
//!         email: "Alice@Example.com".to_string(),
//!         created_at: None,
//!     })
//!     .await?;
//!
//!     user.name = "Alice Liddell".to_string();
//!     user.save().await?;
//!
//!     let page = User::query(&db)
//!         .where_like("name", "^alice")
//!         .order_by_desc("created_at")
//!         .paginate(1, 20)
//!         .await?;
//!
//!     println!("{} users", page.total);
//!
//!     db.close().await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Backends
//!
//! - [`memory`] - In-memory storage for development and testing
//! - `mongodb` - Persistent MongoDB backend (requires the `mongodb` feature)

pub mod config;
pub mod prelude;

pub use docrecord_core::{
    backend, connection, error, event, filter, metadata, model, page, persist, query, record,
    relation,
};

// Re-export for model definitions
pub use async_trait::async_trait;
pub use bson;

/// In-memory storage backend implementations.
pub mod memory {
    pub use docrecord_memory::{InMemoryStore, InMemoryStoreBuilder};
}

/// MongoDB storage backend implementations.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use docrecord_mongodb::{MongoDbStore, MongoDbStoreBuilder};
}
