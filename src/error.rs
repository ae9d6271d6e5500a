use std::io;

#[cfg(feature = "service")]
use std::{borrow::Cow, error::Error as StdError};

use http::status::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[cfg(feature = "service")]
use sqlx::{
    error::{DatabaseError, ErrorKind as DatabaseErrorKind},
    Error as SqlxError,
};

use serde_json::Error as JsonError;

use crate::properties::Relation;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum TetherError {
    #[error("Schema configuration error: {0}")]
    Configuration(String),
    #[error("{operation} is not supported on {table}.{field} ({relation} relationship)")]
    InvalidRelation {
        table: String,
        field: String,
        relation: Relation,
        operation: String,
    },
    #[error("Compliance check failed: {0}")]
    Compliance(String),
    #[error("Invalid mutation input: {0}")]
    InvalidInput(String),
    #[error("Item Not Found: {0}")]
    NotFound(String),
    #[error("Document store error: {0}")]
    Store(String),
    #[error("(De)Serialization error: {0}")]
    Serialization(String),
    #[error("File System error: {0}")]
    Io(String),
}

impl TetherError {
    pub fn invalid_relation(
        table: &str,
        field: &str,
        relation: Relation,
        operation: &str,
    ) -> TetherError {
        TetherError::InvalidRelation {
            table: table.to_string(),
            field: field.to_string(),
            relation,
            operation: operation.to_string(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            TetherError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            TetherError::InvalidRelation { .. } => StatusCode::BAD_REQUEST,
            TetherError::Compliance(_) => StatusCode::CONFLICT,
            TetherError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            TetherError::NotFound(_) => StatusCode::NOT_FOUND,
            TetherError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
            TetherError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
            TetherError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<toml::de::Error> for TetherError {
    fn from(src: toml::de::Error) -> TetherError {
        TetherError::Serialization(format!("Toml deserialization error: {src}"))
    }
}

impl From<toml::ser::Error> for TetherError {
    fn from(src: toml::ser::Error) -> TetherError {
        TetherError::Serialization(format!("Toml serialization error: {src}"))
    }
}

impl From<JsonError> for TetherError {
    fn from(src: JsonError) -> TetherError {
        TetherError::Serialization(format!("JSON (de)serialization error: {src}"))
    }
}

impl From<io::Error> for TetherError {
    fn from(x: io::Error) -> Self {
        match x.kind() {
            io::ErrorKind::NotFound => TetherError::NotFound(format!("{x}")),
            _ => TetherError::Io(format!("IOError: {}", x.kind())),
        }
    }
}

#[cfg(feature = "service")]
impl From<SqlxError> for TetherError {
    fn from(db_error: SqlxError) -> Self {
        TetherError::Store(format!("database error: {db_error:?}"))
    }
}

#[cfg(feature = "service")]
impl From<sqlx::migrate::MigrateError> for TetherError {
    fn from(migrate_error: sqlx::migrate::MigrateError) -> Self {
        TetherError::Store(format!("migration error: {migrate_error}"))
    }
}

#[cfg(feature = "service")]
impl DatabaseError for TetherError {
    fn message(&self) -> &str {
        "Tether FromRow parsing failure"
    }

    fn kind(&self) -> sqlx::error::ErrorKind {
        DatabaseErrorKind::Other
    }

    /// The extended result code.
    #[inline]
    fn code(&self) -> Option<Cow<'_, str>> {
        None
    }

    #[doc(hidden)]
    fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
        self
    }

    #[doc(hidden)]
    fn as_error_mut(&mut self) -> &mut (dyn StdError + Send + Sync + 'static) {
        self
    }

    #[doc(hidden)]
    fn into_error(self: Box<Self>) -> Box<dyn StdError + Send + Sync + 'static> {
        self
    }
}
