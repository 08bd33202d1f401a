//! Error types for the record layer
//!
//! Every failure surfaces as a [`ModelError`] except validation, which is
//! recorded in the record's error map and reported as `false` by `save`.

use thiserror::Error;

/// Result type alias for model operations
pub type ModelResult<T> = Result<T, ModelError>;

/// ORM error type alias
pub type OrmError = ModelError;

/// ORM result type alias
pub type OrmResult<T> = ModelResult<T>;

/// Error types for ORM operations
#[derive(Debug, Clone, Error)]
pub enum ModelError {
    /// The driver rejected a statement (malformed SQL, parameter mismatch, constraint)
    #[error("Database error: {message} [{sql}]")]
    Database { message: String, sql: String },

    /// Opening or talking to a connection failed
    #[error("Connection error: {0}")]
    Connection(String),

    /// Missing or inconsistent configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// No relation with that name or alias is declared
    #[error("Undefined relation '{name}' for {model}")]
    UndefinedRelation { model: String, name: String },

    /// No column, confirmation field or relation with that name
    #[error("Undefined attribute '{attribute}' for {model}")]
    UndefinedAttribute { model: String, attribute: String },

    /// Name is not present in the model's dispatch table
    #[error("Undefined method '{name}' for {model}")]
    UndefinedMethod { model: String, name: String },

    /// Mass assignment touched a protected (or non-accessible) attribute
    #[error("Attribute '{attribute}' of {model} is protected from mass assignment")]
    ProtectedAttribute { model: String, attribute: String },

    /// Write attempted on a record loaded as read-only
    #[error("{model} record is read-only")]
    ReadOnlyRecord { model: String },

    /// The adapter cannot perform the requested capability
    #[error("{capability} is not supported by the {adapter} adapter")]
    Unsupported { adapter: String, capability: String },

    /// Lookup by primary key matched nothing
    #[error("{model} not found for ids [{ids}]")]
    NotFound { model: String, ids: String },

    /// Operation needs a persisted primary key
    #[error("{model} record has no primary key value")]
    MissingPrimaryKey { model: String },

    /// Relationship metadata or loading error
    #[error("Relationship error: {0}")]
    Relationship(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Transaction or savepoint error
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Migration error
    #[error("Migration error: {0}")]
    Migration(String),

    /// Schema introspection or DDL error
    #[error("Schema error: {0}")]
    Schema(String),

    /// Query construction error
    #[error("Query error: {0}")]
    Query(String),
}

impl ModelError {
    /// Wrap a driver error together with the statement that caused it
    pub fn database(sql: impl Into<String>, err: impl std::fmt::Display) -> Self {
        ModelError::Database {
            message: err.to_string(),
            sql: sql.into(),
        }
    }

    pub fn unsupported(adapter: impl Into<String>, capability: impl Into<String>) -> Self {
        ModelError::Unsupported {
            adapter: adapter.into(),
            capability: capability.into(),
        }
    }

    pub fn undefined_relation(model: impl Into<String>, name: impl Into<String>) -> Self {
        ModelError::UndefinedRelation {
            model: model.into(),
            name: name.into(),
        }
    }

    pub fn undefined_attribute(model: impl Into<String>, attribute: impl Into<String>) -> Self {
        ModelError::UndefinedAttribute {
            model: model.into(),
            attribute: attribute.into(),
        }
    }

    /// True for errors that indicate a programming or schema mismatch
    pub fn is_definition_error(&self) -> bool {
        matches!(
            self,
            ModelError::UndefinedRelation { .. }
                | ModelError::UndefinedAttribute { .. }
                | ModelError::UndefinedMethod { .. }
                | ModelError::Configuration(_)
        )
    }
}

impl From<sqlx::Error> for ModelError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(e) => ModelError::Configuration(e.to_string()),
            sqlx::Error::Io(e) => ModelError::Connection(e.to_string()),
            sqlx::Error::Tls(e) => ModelError::Connection(e.to_string()),
            other => ModelError::database(String::new(), other),
        }
    }
}

impl From<serde_json::Error> for ModelError {
    fn from(err: serde_json::Error) -> Self {
        ModelError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for ModelError {
    fn from(err: serde_yaml::Error) -> Self {
        ModelError::Configuration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = ModelError::undefined_relation("User", "friends");
        assert_eq!(err.to_string(), "Undefined relation 'friends' for User");

        let err = ModelError::unsupported("sqlite", "query cache");
        assert_eq!(err.to_string(), "query cache is not supported by the sqlite adapter");

        let err = ModelError::database("select * from nope", "no such table: nope");
        assert!(err.to_string().contains("select * from nope"));
    }

    #[test]
    fn test_definition_errors() {
        assert!(ModelError::undefined_attribute("Tag", "colour").is_definition_error());
        assert!(!ModelError::Connection("refused".into()).is_definition_error());
    }
}
