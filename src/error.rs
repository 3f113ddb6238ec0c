//! Error types for rowmap.

use thiserror::Error;

use crate::value::ConversionError;

/// The main error type for rowmap operations.
#[derive(Debug, Error)]
pub enum RowmapError {
    /// Bad or missing shape metadata.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A column value could not be written into its target field.
    #[error("Mapping error at row {row}, column {index} ('{column}'): {source}")]
    Mapping {
        row: usize,
        index: usize,
        column: String,
        #[source]
        source: ConversionError,
    },

    /// A value conversion failed outside of a row scan.
    #[error("Conversion error: {0}")]
    Conversion(#[from] ConversionError),

    /// A multi-shape result could not be split or linked.
    #[error("Composition error: {0}")]
    Composition(String),

    /// A named placeholder matched no argument property.
    #[error(
        "Parameter '@{name}' specified but none of the passed arguments have a property with this name (in '{sql}')"
    )]
    NameResolution { name: String, sql: String },

    /// A numbered placeholder is not a valid argument position.
    #[error("Parameter '@{index}' specified but only {count} parameters supplied (in '{sql}')")]
    OutOfRange {
        index: String,
        count: usize,
        sql: String,
    },

    /// The SQL text could not be split for paging.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Database error.
    #[error("Database error: {0}")]
    Database(String),

    /// Connection error.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Query execution error.
    #[error("Execution error: {0}")]
    Execution(String),

    /// Configuration file error.
    #[error("Config error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RowmapError {
    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create a composition error.
    pub fn composition(message: impl Into<String>) -> Self {
        Self::Composition(message.into())
    }

    /// Create a parse error.
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }

    /// Create a row-level mapping error.
    pub fn mapping(
        row: usize,
        index: usize,
        column: impl Into<String>,
        source: ConversionError,
    ) -> Self {
        Self::Mapping {
            row,
            index,
            column: column.into(),
            source,
        }
    }
}

impl From<sqlx::Error> for RowmapError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(e) => Self::Connection(e.to_string()),
            sqlx::Error::Io(e) => Self::Io(e),
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                Self::Connection(err.to_string())
            }
            other => Self::Database(other.to_string()),
        }
    }
}

/// Result type alias for rowmap operations.
pub type RowmapResult<T> = Result<T, RowmapError>;
