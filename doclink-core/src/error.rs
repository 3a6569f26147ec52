//! Error types and result types for object-document mapping operations.
//!
//! Every fallible operation in this crate returns [`OdmResult<T>`]. Store-level failures are
//! translated once, at the boundary where a write command or a pipeline is executed, into the
//! variants below and re-raised. Nothing is retried.

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// Represents all possible errors raised while mapping objects to and from a document store.
#[derive(Error, Debug)]
pub enum OdmError {
    /// A single-result query or a delete-by-identifier matched nothing.
    ///
    /// `description` carries the filter, sort and skip state needed to reproduce the miss.
    #[error("{class} not found: {description}")]
    NotFound {
        /// Name of the queried class.
        class: String,
        /// Human readable rendering of the query shape.
        description: String,
    },
    /// A write violated a declared unique or compound-unique index.
    #[error("{class} violates unique constraint on {}{}", .fields.join(", "), render_value(.value))]
    UniqueConstraint {
        /// Name of the class whose document was rejected.
        class: String,
        /// Offending field names, or the compound index name when fields cannot be derived.
        fields: Vec<String>,
        /// Offending value as reported by the store, when available.
        value: Option<String>,
    },
    /// A collection operation was attempted before the owning graph was connected.
    #[error("Graph {0} is not connected")]
    NotConnected(String),
    /// Establishing the underlying connection failed.
    #[error("Cannot connect graph {graph}: {message}")]
    Connection {
        /// Name of the graph being connected.
        graph: String,
        /// Driver supplied reason.
        message: String,
    },
    /// An object failed validation before encoding.
    #[error("{class}.{field} is invalid: {message}")]
    Validation {
        /// Name of the validated class.
        class: String,
        /// Name of the offending field.
        field: String,
        /// What is wrong with the value.
        message: String,
    },
    /// A delete was refused by a `Deny` policy.
    #[error("Cannot delete {class} {id}: related {field} records exist")]
    DeleteDenied {
        /// Class of the object being deleted.
        class: String,
        /// Identifier of the object being deleted.
        id: String,
        /// Relation field that denied the delete.
        field: String,
    },
    /// An attempt was made to change the identifier of a persisted object.
    #[error("Identifier of {class} {id} is immutable once persisted")]
    ImmutableId {
        /// Name of the class.
        class: String,
        /// Current identifier.
        id: String,
    },
    /// An identifier value cannot be converted to the class's store-native identifier type.
    #[error("Invalid identifier {value} for {class}")]
    InvalidId {
        /// Name of the class.
        class: String,
        /// The rejected value.
        value: String,
    },
    /// The named class is not registered in the graph's schema.
    #[error("Unknown class: {0}")]
    UnknownClass(String),
    /// The named field is not declared on the class.
    #[error("Unknown field {field} on {class}")]
    UnknownField {
        /// Name of the class.
        class: String,
        /// The undeclared field name.
        field: String,
    },
    /// Class definitions are inconsistent with each other.
    #[error("Invalid schema: {0}")]
    InvalidSchema(String),
    /// A stored document cannot be converted back to the declared type.
    #[error("Cannot decode {class}.{field}: {message}")]
    Decode {
        /// Name of the class being decoded.
        class: String,
        /// Name of the field being decoded.
        field: String,
        /// What did not match.
        message: String,
    },
    /// The store rejected a write because of a duplicate key on the named index.
    ///
    /// Backends raise this; the write executor translates it into [`OdmError::UniqueConstraint`].
    #[error("Duplicate key in {collection} on index {index}")]
    DuplicateKey {
        /// Collection the write targeted.
        collection: String,
        /// Name of the violated index.
        index: String,
        /// Offending key value as reported by the store.
        value: Option<String>,
    },
    /// Serialization/deserialization error when converting between document formats (BSON, JSON).
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// An error occurred in the underlying storage backend.
    #[error("Backend error: {0}")]
    Backend(String),
}

/// A specialized `Result` type for object-document mapping operations.
pub type OdmResult<T> = Result<T, OdmError>;

fn render_value(value: &Option<String>) -> String {
    value
        .as_ref()
        .map(|v| format!(" (value {v})"))
        .unwrap_or_default()
}

impl OdmError {
    /// Returns `true` for the not-found variant.
    pub fn is_not_found(&self) -> bool {
        matches!(self, OdmError::NotFound { .. })
    }

    pub(crate) fn validation(class: &str, field: &str, message: impl Into<String>) -> Self {
        OdmError::Validation {
            class: class.to_string(),
            field: field.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn decode(class: &str, field: &str, message: impl Into<String>) -> Self {
        OdmError::Decode {
            class: class.to_string(),
            field: field.to_string(),
            message: message.into(),
        }
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
