//! Error types for pgqb

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

/// Result type alias for pgqb operations
pub type OrmResult<T> = Result<T, OrmError>;

/// Structured error reported by the database engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbError {
    /// SQLSTATE code, e.g. `23505`.
    pub code: String,
    pub message: String,
    pub constraint: Option<String>,
    pub detail: Option<String>,
    pub table: Option<String>,
}

impl DbError {
    /// Create an engine error with just a code and a message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            constraint: None,
            detail: None,
            table: None,
        }
    }

    pub fn with_constraint(mut self, constraint: impl Into<String>) -> Self {
        self.constraint = Some(constraint.into());
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Column names listed in a `Key (a, b)=(...)` detail message.
    pub fn detail_columns(&self) -> Vec<String> {
        static KEY_RE: LazyLock<Option<Regex>> =
            LazyLock::new(|| Regex::new(r"Key \(([^)]*)\)=").ok());

        let (Some(detail), Some(re)) = (self.detail.as_deref(), KEY_RE.as_ref()) else {
            return Vec::new();
        };
        re.captures(detail)
            .and_then(|caps| caps.get(1))
            .map(|m| {
                m.as_str()
                    .split(',')
                    .map(|c| c.trim().trim_matches('"').to_string())
                    .filter(|c| !c.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl std::fmt::Display for DbError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

/// Error types for database operations
#[derive(Debug, Error)]
pub enum OrmError {
    /// Malformed or impossible query descriptor
    #[error("Build error: {0}")]
    Build(String),

    /// Database connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Driver-level query error
    #[error("Query error: {0}")]
    Query(#[from] tokio_postgres::Error),

    /// Error reported by the database engine
    #[error("Database error: {0}")]
    Database(DbError),

    /// Row not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Unique or foreign key constraint violation
    #[error("Conflict on {table}.{constraint} ({columns:?}): {message}")]
    Conflict {
        table: String,
        constraint: String,
        columns: Vec<String>,
        is_unique: bool,
        message: String,
    },

    /// Row decode/mapping error
    #[error("Decode error on column '{column}': {message}")]
    Decode { column: String, message: String },

    /// Invalid transaction usage
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Pool error
    #[cfg(feature = "pool")]
    #[error("Pool error: {0}")]
    Pool(String),

    /// Query timeout error
    #[error("Query timeout after {0:?}")]
    Timeout(std::time::Duration),

    /// Other errors
    #[error("{0}")]
    Other(String),
}

impl OrmError {
    /// Create a build error
    pub fn build(message: impl Into<String>) -> Self {
        Self::Build(message.into())
    }

    /// Create a decode error for a specific column
    pub fn decode(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            column: column.into(),
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Check if this is a build error
    pub fn is_build(&self) -> bool {
        matches!(self, Self::Build(_))
    }

    /// Check if this is a conflict error (unique or foreign key)
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Check if this is a unique violation error
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Self::Conflict { is_unique, .. } => *is_unique,
            Self::Database(db) => db.code == "23505",
            _ => false,
        }
    }

    /// Check if this is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Check if this is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// SQLSTATE code of an engine error, if any.
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Self::Database(db) => Some(&db.code),
            Self::Query(err) => err.as_db_error().map(|db| db.code().code()),
            _ => None,
        }
    }

    /// Parse a tokio_postgres error into a structured OrmError
    pub fn from_db_error(err: tokio_postgres::Error) -> Self {
        if let Some(db_err) = err.as_db_error() {
            return Self::Database(DbError {
                code: db_err.code().code().to_string(),
                message: db_err.message().to_string(),
                constraint: db_err.constraint().map(str::to_string),
                detail: db_err.detail().map(str::to_string),
                table: db_err.table().map(str::to_string),
            });
        }
        if err.is_closed() {
            return Self::Connection(err.to_string());
        }
        Self::Query(err)
    }
}

#[cfg(feature = "pool")]
impl From<deadpool_postgres::PoolError> for OrmError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        Self::Pool(err.to_string())
    }
}

impl From<serde_json::Error> for OrmError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
