//! An active-record object document mapper over MongoDB-dialect document stores.
//!
//! This crate is the core of the docrecord project and provides:
//!
//! - **Models** ([`model`], [`record`]) - The [`Model`](model::Model) trait, static finders and
//!   creators, and [`Record`](record::Record) instances with dirty tracking and lifecycle hooks
//! - **Metadata** ([`metadata`], [`persist`]) - Column, computed-property and timestamp
//!   registration, and the steps run around every save
//! - **Query and filtering API** ([`query`], [`filter`]) - Fluent queries translated into
//!   MongoDB filter documents
//! - **Relations** ([`relation`]) - One-to-one, one-to-many and many-to-many relations
//! - **Connections** ([`connection`], [`event`]) - Named, lazily connected backends and the
//!   query and connection events they emit
//! - **Store backend abstraction** ([`backend`]) - Traits for implementing storage backends
//! - **Error handling** ([`error`]) - Error types and result types
//! - **Pagination** ([`page`]) - Page results
//!
//! # Example
//!
//! ```ignore
//! use docrecord::prelude::*;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! pub struct Post {
//!     pub title: String,
//!     pub user_id: Option<ObjectId>,
//! }
//!
//! #[async_trait]
//! impl Model for Post {
//!     fn collection_name() -> &'static str {
//!         "posts"
//!     }
//! }
//!
//! let db = Database::builder()
//!     .connection("primary", InMemoryStore::builder())
//!     .build();
//!
//! let post = Post::create(&db, Post { title: "Hello".into(), user_id: None }).await?;
//! let titles = Post::query(&db).where_like("title", "^hel").exec().await?;
//! ```

pub mod backend;
pub mod connection;
pub mod error;
pub mod event;
pub mod filter;
pub mod metadata;
pub mod model;
pub mod page;
pub mod persist;
pub mod query;
pub mod record;
pub mod relation;
