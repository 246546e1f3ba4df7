//! Error types for the pgprobe client library

use thiserror::Error;

/// Result type alias for pgprobe client operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when using the pgprobe client
#[derive(Debug, Error)]
pub enum Error {
    /// Connection failed
    #[error("Failed to connect to PostgreSQL: {0}")]
    Connection(String),

    /// Connection settings could not be assembled
    #[error("Invalid connection configuration: {0}")]
    Config(String),

    /// The query string or its arguments are malformed
    #[error("{0}")]
    Programming(String),

    /// A parameterized call was given more than one SQL command
    #[error("cannot insert multiple commands into a parameterized query")]
    MultipleStatements,

    /// Operation attempted on a closed cursor
    #[error("cursor already closed")]
    CursorClosed,

    /// Fetch attempted without a result set
    #[error("no results to fetch")]
    NoResults,

    /// A result column has a type with no registered binary typecaster
    #[error("no binary typecast from OID={oid}")]
    Typecast { oid: u32 },

    /// A binary result value could not be decoded
    #[error("Failed to decode {type_name} value: {message}")]
    Decode { type_name: String, message: String },

    /// A parameter could not be encoded for the server
    #[error("Failed to encode parameter: {0}")]
    Encode(String),

    /// Query execution failed on the server
    #[error("Query execution failed: {0}")]
    Query(String),

    /// Deserialization error
    #[error("Failed to deserialize result: {0}")]
    Deserialization(#[from] serde_json::Error),

    /// PostgreSQL protocol error
    #[error("PostgreSQL protocol error: {0}")]
    Protocol(#[from] tokio_postgres::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn programming(msg: impl Into<String>) -> Self {
        Error::Programming(msg.into())
    }

    pub(crate) fn decode(type_name: &str, message: impl std::fmt::Display) -> Self {
        Error::Decode {
            type_name: type_name.to_string(),
            message: message.to_string(),
        }
    }

    /// Map a server-side failure, keeping the server's message text
    pub(crate) fn from_server(err: tokio_postgres::Error) -> Self {
        match err.as_db_error() {
            Some(db) => Error::Query(db.message().to_string()),
            None => Error::Protocol(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typecast_message_names_oid() {
        let err = Error::Typecast { oid: 790 };
        assert_eq!(err.to_string(), "no binary typecast from OID=790");
    }

    #[test]
    fn test_programming_message_is_verbatim() {
        let err = Error::programming("argument formats can't be mixed");
        assert_eq!(err.to_string(), "argument formats can't be mixed");
    }
}
