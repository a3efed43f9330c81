//! Declarative database configuration.
//!
//! A [`DatabaseConfig`] describes the named connections of a [`Database`] and which one is the
//! default. It derives serde so it can be embedded in an application's own configuration file.
//!
//! ```ignore
//! use docrecord::config::DatabaseConfig;
//!
//! let config = DatabaseConfig::from_json(r#"{
//!     "default": "primary",
//!     "connections": {
//!         "primary": { "driver": "mongodb", "url": "mongodb://localhost:27017", "database": "app" },
//!         "cache": { "driver": "memory" }
//!     }
//! }"#)?;
//!
//! let db = config.into_database()?;
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use docrecord_core::{
    connection::{Database, DatabaseBuilder},
    error::{OdmError, OdmResult},
};
use docrecord_memory::InMemoryStore;

fn default_connection_name() -> String {
    "primary".to_string()
}

/// Named connections and the default connection name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_connection_name")]
    pub default: String,
    #[serde(default)]
    pub connections: HashMap<String, ConnectionConfig>,
}

/// Backend of one connection, tagged by `driver`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "driver", rename_all = "lowercase")]
pub enum ConnectionConfig {
    /// A fresh in-memory store.
    Memory,
    /// A MongoDB deployment. Requires the `mongodb` feature.
    Mongodb { url: String, database: String },
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            default: default_connection_name(),
            connections: HashMap::new(),
        }
    }
}

impl DatabaseConfig {
    /// Parses a configuration from JSON.
    pub fn from_json(json: &str) -> OdmResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Adds or replaces a connection.
    pub fn with_connection(mut self, name: impl Into<String>, connection: ConnectionConfig) -> Self {
        self.connections.insert(name.into(), connection);
        self
    }

    /// A database builder with every configured connection registered.
    ///
    /// Listeners can still be added to the returned builder.
    ///
    /// # Errors
    ///
    /// Returns [`OdmError::ConnectionNotFound`] when the default connection is not configured,
    /// and [`OdmError::Backend`] for a mongodb connection without the `mongodb` feature.
    pub fn builder(&self) -> OdmResult<DatabaseBuilder> {
        if !self.connections.contains_key(&self.default) {
            return Err(OdmError::ConnectionNotFound(self.default.clone()));
        }

        let mut builder = Database::builder().default_connection(self.default.clone());

        for (name, connection) in &self.connections {
            tracing::debug!(connection = %name, config = ?connection, "registering connection");

            builder = match connection {
                ConnectionConfig::Memory => builder.connection(name.clone(), InMemoryStore::builder()),
                ConnectionConfig::Mongodb { url, database } => {
                    mongodb_connection(builder, name, url, database)?
                }
            };
        }

        Ok(builder)
    }

    pub fn into_database(self) -> OdmResult<Database> {
        Ok(self.builder()?.build())
    }
}

#[cfg(feature = "mongodb")]
fn mongodb_connection(
    builder: DatabaseBuilder,
    name: &str,
    url: &str,
    database: &str,
) -> OdmResult<DatabaseBuilder> {
    Ok(builder.connection(name, docrecord_mongodb::MongoDbStore::builder(url, database)))
}

#[cfg(not(feature = "mongodb"))]
fn mongodb_connection(
    _builder: DatabaseBuilder,
    name: &str,
    _url: &str,
    _database: &str,
) -> OdmResult<DatabaseBuilder> {
    Err(OdmError::Backend(format!(
        "connection {name} uses the mongodb driver, which requires the `mongodb` feature"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tagged_connections() {
        let config = DatabaseConfig::from_json(
            r#"{
                "default": "cache",
                "connections": {
                    "cache": { "driver": "memory" },
                    "main": { "driver": "mongodb", "url": "mongodb://localhost", "database": "app" }
                }
            }"#,
        )
        .unwrap();

        assert_eq!(config.default, "cache");
        assert_eq!(config.connections.get("cache"), Some(&ConnectionConfig::Memory));
        assert_eq!(
            config.connections.get("main"),
            Some(&ConnectionConfig::Mongodb {
                url: "mongodb://localhost".to_string(),
                database: "app".to_string(),
            })
        );
    }

    #[test]
    fn test_default_name_and_unknown_driver() {
        let config = DatabaseConfig::from_json(r#"{ "connections": {} }"#).unwrap();
        assert_eq!(config.default, "primary");

        let err = DatabaseConfig::from_json(r#"{ "connections": { "x": { "driver": "redis" } } }"#)
            .unwrap_err();
        assert!(matches!(err, OdmError::Serialization(_)));
    }

    #[test]
    fn test_memory_database() {
        let db = DatabaseConfig::default()
            .with_connection("primary", ConnectionConfig::Memory)
            .with_connection("cache", ConnectionConfig::Memory)
            .into_database()
            .unwrap();

        let mut names = db.connection_names();
        names.sort();

        assert_eq!(db.default_connection(), "primary");
        assert_eq!(names, vec!["cache", "primary"]);
    }

    #[test]
    fn test_missing_default_connection() {
        let err = DatabaseConfig::default()
            .with_connection("cache", ConnectionConfig::Memory)
            .into_database()
            .unwrap_err();

        assert!(matches!(err, OdmError::ConnectionNotFound(name) if name == "primary"));
    }

    #[cfg(not(feature = "mongodb"))]
    #[test]
    fn test_mongodb_requires_feature() {
        let err = DatabaseConfig::default()
            .with_connection(
                "primary",
                ConnectionConfig::Mongodb {
                    url: "mongodb://localhost".to_string(),
                    database: "app".to_string(),
                },
            )
            .into_database()
            .unwrap_err();

        assert!(matches!(err, OdmError::Backend(_)));
    }
}
