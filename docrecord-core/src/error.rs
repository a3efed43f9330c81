//! Error types and result types for model, query and connection operations.
//!
//! Use [`OdmResult<T>`] as the return type for fallible operations. A lookup that finds
//! nothing is never an error; finders return `Option` instead.

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// Represents all possible errors raised by the mapper.
#[derive(Error, Debug)]
pub enum OdmError {
    /// The backend of a named connection could not be built or reached.
    /// The first argument is the connection name, the second the underlying cause.
    #[error("Connection {0} refused: {1}")]
    ConnectionRefused(String, String),
    /// An operation referenced a connection that was never registered.
    #[error("Connection not found: {0}")]
    ConnectionNotFound(String),
    /// An update, delete or refresh was attempted on a record without an identifier.
    /// The first argument is the model name, the second the attempted operation.
    #[error("Model {0} has no primary key value, cannot {1}")]
    ModelPrimaryKeyMissing(String, String),
    /// A persisted record could no longer be found in its collection.
    /// The first argument is the document id, the second is the collection name.
    #[error("Document not found {0} in collection {1}")]
    DocumentNotFound(String, String),
    /// A store operation failed.
    #[error("Query error: {0}")]
    Query(String),
    /// A relationship is misconfigured.
    #[error("Invalid relation: {0}")]
    InvalidRelation(String),
    /// A relation operation needs a key value on its owner that is not set.
    /// The first argument is the relation, the second the missing key.
    #[error("Relation {0} requires a value for key {1}")]
    RelationKeyMissing(String, String),
    /// A lifecycle hook rejected the operation.
    #[error("Hook error: {0}")]
    Hook(String),
    /// Serialization/deserialization error when mapping between models and documents.
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// An error occurred in the underlying storage backend.
    #[error("Backend error: {0}")]
    Backend(String),
}

/// A specialized `Result` type for mapper operations.
pub type OdmResult<T> = Result<T, OdmError>;

impl OdmError {
    /// Builds a hook failure from any displayable reason.
    ///
    /// ```ignore
    /// if !user.email.contains('@') {
    ///     return Err(OdmError::hook("invalid email"));
    /// }
    /// ```
    pub fn hook(reason: impl std::fmt::Display) -> Self {
        OdmError::Hook(reason.to_string())
    }
}

impl From<BsonError> for OdmError {
    fn from(err: BsonError) -> Self {
        OdmError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for OdmError {
    fn from(err: SerdeJsonError) -> Self {
        OdmError::Serialization(err.to_string())
    }
}
