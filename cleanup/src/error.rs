use thiserror::Error;

/// Result type used across the cleanup library.
pub type CleanupResult<T> = Result<T, CleanupError>;

/// Failure categories of a cleanup run.
#[derive(Debug, Error)]
pub enum CleanupError {
    /// Missing or invalid argument or environment value.
    #[error("configuration error: {0}")]
    Config(String),

    /// The database could not be reached.
    #[error("failed to connect to database: {0}")]
    Connect(#[source] sqlx::Error),

    /// A statement failed. `statement` is the last one attempted.
    #[error("query failed: {statement}")]
    Query {
        statement: String,
        #[source]
        source: sqlx::Error,
    },

    /// Rendered statements could not be written out.
    #[error("failed to write statement: {0}")]
    Output(#[source] std::io::Error),

    /// The selected ID sets do not match what the deleter expects.
    #[error("contract violation: {0}")]
    Contract(String),
}

impl CleanupError {
    pub fn query(statement: impl Into<String>, source: sqlx::Error) -> Self {
        Self::Query {
            statement: statement.into(),
            source,
        }
    }

    /// Statement text to report when the run aborts, if one was attempted.
    pub fn last_statement(&self) -> Option<&str> {
        match self {
            Self::Query { statement, .. } => Some(statement),
            _ => None,
        }
    }
}
