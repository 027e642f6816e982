//! Error types for the PostgreSQL driver.

use std::collections::HashMap;
use std::io;

use thiserror::Error;

/// Result type for PostgreSQL operations.
pub type PgResult<T> = Result<T, PgError>;

/// Error/notice fields from the server, keyed by the single-byte field code
/// ('S' severity, 'C' code, 'M' message, ...).
pub type ServerFields = HashMap<u8, String>;

/// Errors that can occur during PostgreSQL operations.
#[derive(Error, Debug)]
pub enum PgError {
    /// I/O error during communication.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The transport closed mid-frame or mid-operation.
    #[error("transport closed")]
    TransportClosed,

    /// A transport read or write exceeded its timeout.
    #[error("transport timed out")]
    TransportTimeout,

    /// Unexpected message, invalid framing, or other protocol violation.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// The server requested an authentication method we do not speak.
    #[error("unsupported authentication method: {0}")]
    UnsupportedAuth(String),

    /// The server rejected our credentials during startup.
    #[error("authentication failed: {}", message_from_fields(.0))]
    AuthFailed(ServerFields),

    /// The server returned an error for a query.
    #[error("{severity}: {message} ({code})")]
    Server {
        severity: String,
        code: String,
        message: String,
        detail: Option<String>,
        hint: Option<String>,
        position: Option<String>,
    },

    /// The outstanding query was cancelled (SQLSTATE 57014).
    #[error("query canceled")]
    QueryCanceled,

    /// The connection is closed, fatal, or was lost mid-operation.
    #[error("connection lost")]
    ConnectionLost,

    /// A by-name column lookup was attempted on a row without metadata.
    #[error("row has no metadata")]
    MissingRowMeta,

    /// No column with the given name or index.
    #[error("column not present: {0}")]
    ColumnNotPresent(String),

    /// No converter registered for the target type.
    #[error("no conversion for target type {0}")]
    NoConversion(String),

    /// A converter failed on non-null input.
    #[error("conversion to {target} failed for oid {oid}: {cause}")]
    ConvertToFailed {
        target: String,
        oid: i32,
        cause: Box<PgError>,
    },

    /// A converter produced null for non-null input.
    #[error("converter for {target} returned null for non-null data (oid {oid})")]
    InvalidConvertDataType { target: String, oid: i32 },

    /// The pool has been closed.
    #[error("pool closed")]
    PoolClosed,

    /// Waited longer than the borrow timeout for a pooled connection.
    #[error("timed out borrowing a connection from the pool")]
    BorrowTimeout,

    /// Three successive connections failed the pool validation query.
    #[error("pool validation query failed")]
    ValidationFailed,

    /// The server accepted SSL but no TLS upgrader is configured, or the
    /// upgrade itself failed.
    #[error("TLS error: {0}")]
    Tls(String),
}

impl PgError {
    /// Build a `Server` (or `QueryCanceled`) error from ErrorResponse fields.
    pub(crate) fn from_server_fields(fields: &ServerFields) -> PgError {
        let code = fields.get(&b'C').cloned().unwrap_or_default();
        if code == "57014" {
            return PgError::QueryCanceled;
        }
        PgError::Server {
            severity: fields.get(&b'S').cloned().unwrap_or_default(),
            code,
            message: fields.get(&b'M').cloned().unwrap_or_default(),
            detail: fields.get(&b'D').cloned(),
            hint: fields.get(&b'H').cloned(),
            position: fields.get(&b'P').cloned(),
        }
    }

    /// True when this error means the connection can no longer be used.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PgError::Io(_)
                | PgError::TransportClosed
                | PgError::TransportTimeout
                | PgError::ProtocolViolation(_)
                | PgError::ConnectionLost
        )
    }

    /// SQLSTATE code for server errors, if any.
    pub fn code(&self) -> Option<&str> {
        match self {
            PgError::Server { code, .. } => Some(code),
            PgError::QueryCanceled => Some("57014"),
            _ => None,
        }
    }
}

fn message_from_fields(fields: &ServerFields) -> String {
    fields.get(&b'M').cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_error_from_fields() {
        let mut fields = ServerFields::new();
        fields.insert(b'S', "ERROR".to_string());
        fields.insert(b'C', "42P01".to_string());
        fields.insert(b'M', "relation \"foo\" does not exist".to_string());

        let err = PgError::from_server_fields(&fields);
        match err {
            PgError::Server {
                severity, code, ..
            } => {
                assert_eq!(severity, "ERROR");
                assert_eq!(code, "42P01");
            }
            _ => panic!("expected Server error"),
        }
    }

    #[test]
    fn cancel_code_maps_to_query_canceled() {
        let mut fields = ServerFields::new();
        fields.insert(b'C', "57014".to_string());
        fields.insert(b'M', "canceling statement due to user request".to_string());

        assert!(matches!(
            PgError::from_server_fields(&fields),
            PgError::QueryCanceled
        ));
    }

    #[test]
    fn fatality_classification() {
        assert!(PgError::TransportClosed.is_fatal());
        assert!(PgError::TransportTimeout.is_fatal());
        assert!(PgError::ProtocolViolation("bad tag".into()).is_fatal());
        assert!(!PgError::Server {
            severity: "ERROR".into(),
            code: "42P01".into(),
            message: String::new(),
            detail: None,
            hint: None,
            position: None,
        }
        .is_fatal());
        assert!(!PgError::QueryCanceled.is_fatal());
    }
}
