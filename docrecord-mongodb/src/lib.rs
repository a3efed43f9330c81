//! MongoDB backend implementation for docrecord.
//!
//! This crate provides a MongoDB-based implementation of the `StoreBackend` trait. Filter,
//! projection, sort and update documents are handed to the official driver unchanged.
//!
//! To use this backend, include the `mongodb` feature in your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! docrecord = { version = "x.y.z", features = ["mongodb"] }
//! ```
//!
//! # Connection
//!
//! The builder keeps the connection string and database name. Connections build it lazily on
//! first use: the string is parsed, a client is created and the server is pinged, so an
//! unreachable server surfaces as a refused connection.
//!
//! # Example
//!
//! ```ignore
//! use docrecord::{prelude::*, mongodb::MongoDbStore};
//!
//! let db = Database::builder()
//!     .connection("primary", MongoDbStore::builder("mongodb://localhost:27017", "app"))
//!     .build();
//! ```

pub mod store;

pub use store::{MongoDbStore, MongoDbStoreBuilder};
