//! In-memory document storage backend for docrecord.
//!
//! This crate provides a thread-safe, in-memory implementation of the `StoreBackend` trait.
//! It evaluates the same MongoDB filter dialect the query builder emits, which makes it ideal
//! for development, testing, and small-scale deployments.
//!
//! # Features
//!
//! - **Thread-safe access** - Concurrent reads and writes using an async-aware RwLock
//! - **MongoDB filter dialect** - Comparison, set, regex, existence and logical operators
//! - **Find options** - Projection, multi-key sorting, skip and limit
//! - **Updates** - `$set`, `$unset` and `$inc`
//! - **Aggregation** - `$match`, `$sort`, `$skip`, `$limit`, `$project` and `$count` stages
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
//! }
//!
//! #[async_trait]
//! impl Model for User {
//!     fn collection_name() -> &'static str {
//!         "users"
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::builder()
//!         .connection("primary", InMemoryStore::builder())
//!         .build();
//!
//!     User::create(&db, User { name: "Alice".to_string() }).await?;
//!
//!     Ok(())
//! }
//! ```

mod evaluator;
pub mod store;

pub use store::{InMemoryStore, InMemoryStoreBuilder};
