//! PostgreSQL wire protocol message encoding and decoding.
//!
//! This module implements the PostgreSQL v3 protocol messages.
//! Reference: https://www.postgresql.org/docs/current/protocol-message-formats.html

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{PgError, PgResult, ServerFields};
use crate::row::Column;
use crate::types::{Format, Oid, PgValue};

// ============================================================================
// Protocol Constants
// ============================================================================

/// PostgreSQL protocol version 3.0
pub const PROTOCOL_VERSION: i32 = 196608; // (3 << 16) | 0

/// Magic "protocol version" of the SSLRequest startup packet
pub const SSL_REQUEST_CODE: i32 = 80877103;

/// Magic "protocol version" of the CancelRequest startup packet
pub const CANCEL_REQUEST_CODE: i32 = 80877102;

/// Transaction status indicators carried by ReadyForQuery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Idle (not in a transaction block)
    Idle,
    /// In a transaction block
    InTransaction,
    /// In a failed transaction block
    InFailedTransaction,
}

impl From<u8> for TransactionStatus {
    fn from(b: u8) -> Self {
        match b {
            b'T' => TransactionStatus::InTransaction,
            b'E' => TransactionStatus::InFailedTransaction,
            _ => TransactionStatus::Idle,
        }
    }
}

// ============================================================================
// Frontend (Client -> Server) Messages
// ============================================================================

/// Trait for encoding frontend messages
pub trait FrontendMessage {
    fn encode(&self) -> BytesMut;
}

/// Startup message sent at connection start (no tag byte)
#[derive(Debug, Clone)]
pub struct StartupMessage {
    pub user: String,
    pub database: String,
    pub options: Vec<(String, String)>,
}

impl FrontendMessage for StartupMessage {
    fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();

        // Placeholder for length (filled in at the end)
        buf.put_i32(0);

        buf.put_i32(PROTOCOL_VERSION);

        buf.put_slice(b"user\0");
        buf.put_slice(self.user.as_bytes());
        buf.put_u8(0);

        buf.put_slice(b"database\0");
        buf.put_slice(self.database.as_bytes());
        buf.put_u8(0);

        for (key, value) in &self.options {
            buf.put_slice(key.as_bytes());
            buf.put_u8(0);
            buf.put_slice(value.as_bytes());
            buf.put_u8(0);
        }

        // Terminator
        buf.put_u8(0);

        // Length includes the length field itself
        let len = buf.len() as i32;
        buf[0..4].copy_from_slice(&len.to_be_bytes());

        buf
    }
}

/// SSLRequest handshake packet (no tag byte)
#[derive(Debug, Clone, Copy)]
pub struct SslRequest;

impl FrontendMessage for SslRequest {
    fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(8);
        buf.put_i32(8);
        buf.put_i32(SSL_REQUEST_CODE);
        buf
    }
}

/// CancelRequest packet, sent on a dedicated transport (no tag byte)
#[derive(Debug, Clone, Copy)]
pub struct CancelRequest {
    pub process_id: i32,
    pub secret_key: i32,
}

impl FrontendMessage for CancelRequest {
    fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(16);
        buf.put_i32(16);
        buf.put_i32(CANCEL_REQUEST_CODE);
        buf.put_i32(self.process_id);
        buf.put_i32(self.secret_key);
        buf
    }
}

/// Password message (for MD5 or cleartext auth)
#[derive(Debug, Clone)]
pub struct PasswordMessage {
    pub password: String,
}

impl FrontendMessage for PasswordMessage {
    fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u8(b'p');

        let len = 4 + self.password.len() as i32 + 1;
        buf.put_i32(len);

        buf.put_slice(self.password.as_bytes());
        buf.put_u8(0);

        buf
    }
}

/// Simple query message ('Q')
#[derive(Debug, Clone)]
pub struct QueryMessage {
    pub query: String,
}

impl FrontendMessage for QueryMessage {
    fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u8(b'Q');

        let len = 4 + self.query.len() as i32 + 1;
        buf.put_i32(len);

        buf.put_slice(self.query.as_bytes());
        buf.put_u8(0);

        buf
    }
}

/// Parse message ('P') - Creates a prepared statement
#[derive(Debug, Clone)]
pub struct ParseMessage {
    pub name: String,
    pub query: String,
    pub param_types: Vec<Oid>,
}

impl FrontendMessage for ParseMessage {
    fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u8(b'P');

        let mut body = BytesMut::new();

        body.put_slice(self.name.as_bytes());
        body.put_u8(0);

        body.put_slice(self.query.as_bytes());
        body.put_u8(0);

        body.put_i16(self.param_types.len() as i16);
        for oid in &self.param_types {
            body.put_i32(oid.as_i32());
        }

        buf.put_i32(body.len() as i32 + 4);
        buf.put_slice(&body);

        buf
    }
}

/// Bind message ('B') - Binds parameters to a prepared statement
#[derive(Debug, Clone)]
pub struct BindMessage {
    pub portal: String,
    pub statement: String,
    pub params: Vec<PgValue>,
    pub result_formats: Vec<Format>,
}

impl BindMessage {
    /// Per-parameter wire encodings; NULL carries no bytes.
    fn encoded_params(&self) -> Vec<Option<(Format, Vec<u8>)>> {
        self.params
            .iter()
            .map(|p| {
                if p.is_null() {
                    None
                } else {
                    // to_bytes only fails for converter-registry targets,
                    // never for concrete values
                    Some(p.to_bytes().unwrap_or((Format::Text, Vec::new())))
                }
            })
            .collect()
    }
}

impl FrontendMessage for BindMessage {
    fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u8(b'B');

        let mut body = BytesMut::new();

        body.put_slice(self.portal.as_bytes());
        body.put_u8(0);

        body.put_slice(self.statement.as_bytes());
        body.put_u8(0);

        let encoded = self.encoded_params();

        // One format code per parameter
        body.put_i16(encoded.len() as i16);
        for param in &encoded {
            let format = param.as_ref().map(|(f, _)| *f).unwrap_or(Format::Binary);
            body.put_i16(format as i16);
        }

        body.put_i16(encoded.len() as i16);
        for param in &encoded {
            match param {
                None => body.put_i32(-1),
                Some((_, bytes)) => {
                    body.put_i32(bytes.len() as i32);
                    body.put_slice(bytes);
                }
            }
        }

        body.put_i16(self.result_formats.len() as i16);
        for fmt in &self.result_formats {
            body.put_i16(*fmt as i16);
        }

        buf.put_i32(body.len() as i32 + 4);
        buf.put_slice(&body);

        buf
    }
}

/// Execute message ('E') - Executes a bound portal
#[derive(Debug, Clone)]
pub struct ExecuteMessage {
    pub portal: String,
    /// 0 = no limit
    pub max_rows: i32,
}

impl FrontendMessage for ExecuteMessage {
    fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u8(b'E');

        let mut body = BytesMut::new();

        body.put_slice(self.portal.as_bytes());
        body.put_u8(0);
        body.put_i32(self.max_rows);

        buf.put_i32(body.len() as i32 + 4);
        buf.put_slice(&body);

        buf
    }
}

/// Describe message ('D') - Request description of statement or portal
#[derive(Debug, Clone)]
pub struct DescribeMessage {
    /// 'S' for statement, 'P' for portal
    pub kind: u8,
    pub name: String,
}

impl FrontendMessage for DescribeMessage {
    fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u8(b'D');

        let len = 4 + 1 + self.name.len() as i32 + 1;
        buf.put_i32(len);

        buf.put_u8(self.kind);
        buf.put_slice(self.name.as_bytes());
        buf.put_u8(0);

        buf
    }
}

/// Close message ('C') - Close a prepared statement or portal
#[derive(Debug, Clone)]
pub struct CloseMessage {
    /// 'S' for statement, 'P' for portal
    pub kind: u8,
    pub name: String,
}

impl FrontendMessage for CloseMessage {
    fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u8(b'C');

        let len = 4 + 1 + self.name.len() as i32 + 1;
        buf.put_i32(len);

        buf.put_u8(self.kind);
        buf.put_slice(self.name.as_bytes());
        buf.put_u8(0);

        buf
    }
}

/// Sync message ('S') - Marks end of an extended query
#[derive(Debug, Clone, Copy)]
pub struct SyncMessage;

impl FrontendMessage for SyncMessage {
    fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u8(b'S');
        buf.put_i32(4);
        buf
    }
}

/// Flush message ('H') - Request server to flush output buffer
#[derive(Debug, Clone, Copy)]
pub struct FlushMessage;

impl FrontendMessage for FlushMessage {
    fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u8(b'H');
        buf.put_i32(4);
        buf
    }
}

/// Terminate message ('X') - Close the connection
#[derive(Debug, Clone, Copy)]
pub struct TerminateMessage;

impl FrontendMessage for TerminateMessage {
    fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u8(b'X');
        buf.put_i32(4);
        buf
    }
}

/// CopyData message ('d') - One chunk of COPY payload (passthrough)
#[derive(Debug, Clone)]
pub struct CopyDataMessage {
    pub data: Bytes,
}

impl FrontendMessage for CopyDataMessage {
    fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(5 + self.data.len());
        buf.put_u8(b'd');
        buf.put_i32(4 + self.data.len() as i32);
        buf.put_slice(&self.data);
        buf
    }
}

/// CopyDone message ('c')
#[derive(Debug, Clone, Copy)]
pub struct CopyDoneMessage;

impl FrontendMessage for CopyDoneMessage {
    fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u8(b'c');
        buf.put_i32(4);
        buf
    }
}

/// CopyFail message ('f')
#[derive(Debug, Clone)]
pub struct CopyFailMessage {
    pub message: String,
}

impl FrontendMessage for CopyFailMessage {
    fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u8(b'f');
        buf.put_i32(4 + self.message.len() as i32 + 1);
        buf.put_slice(self.message.as_bytes());
        buf.put_u8(0);
        buf
    }
}

/// SASL Initial Response message ('p') - First SCRAM message
#[derive(Debug, Clone)]
pub struct SaslInitialResponseMessage {
    /// SASL mechanism name (e.g., "SCRAM-SHA-256")
    pub mechanism: String,
    /// Initial client response data
    pub data: Vec<u8>,
}

impl FrontendMessage for SaslInitialResponseMessage {
    fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u8(b'p');

        let len = 4 + self.mechanism.len() as i32 + 1 + 4 + self.data.len() as i32;
        buf.put_i32(len);

        buf.put_slice(self.mechanism.as_bytes());
        buf.put_u8(0);

        buf.put_i32(self.data.len() as i32);
        buf.put_slice(&self.data);

        buf
    }
}

/// SASL Response message ('p') - Subsequent SCRAM messages
#[derive(Debug, Clone)]
pub struct SaslResponseMessage {
    pub data: Vec<u8>,
}

impl FrontendMessage for SaslResponseMessage {
    fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u8(b'p');

        let len = 4 + self.data.len() as i32;
        buf.put_i32(len);
        buf.put_slice(&self.data);

        buf
    }
}

// ============================================================================
// Backend (Server -> Client) Messages
// ============================================================================

/// Backend message types
#[derive(Debug, Clone)]
pub enum BackendMessage {
    // Authentication
    AuthenticationOk,
    AuthenticationCleartextPassword,
    AuthenticationMD5Password {
        salt: [u8; 4],
    },
    AuthenticationSASL {
        mechanisms: Vec<String>,
    },
    AuthenticationSASLContinue {
        data: Bytes,
    },
    AuthenticationSASLFinal {
        data: Bytes,
    },
    /// An authentication request we do not implement (kerberos, sspi, ...)
    AuthenticationUnsupported {
        method: i32,
    },

    // Query responses
    RowDescription {
        columns: Vec<Column>,
    },
    DataRow {
        values: Vec<Option<Bytes>>,
    },
    CommandComplete {
        tag: String,
    },
    EmptyQueryResponse,

    // Extended query protocol
    ParseComplete,
    BindComplete,
    CloseComplete,
    NoData,
    PortalSuspended,

    // COPY framing (payload semantics are passthrough)
    CopyInResponse {
        binary: bool,
        column_formats: Vec<Format>,
    },
    CopyOutResponse {
        binary: bool,
        column_formats: Vec<Format>,
    },
    CopyBothResponse {
        binary: bool,
        column_formats: Vec<Format>,
    },
    CopyData {
        data: Bytes,
    },
    CopyDone,

    // Status
    ReadyForQuery {
        status: TransactionStatus,
    },
    ParameterStatus {
        name: String,
        value: String,
    },
    BackendKeyData {
        process_id: i32,
        secret_key: i32,
    },

    // Errors and notices
    ErrorResponse {
        fields: ServerFields,
    },
    NoticeResponse {
        fields: ServerFields,
    },

    // Other
    NotificationResponse {
        process_id: i32,
        channel: String,
        payload: String,
    },
    ParameterDescription {
        type_oids: Vec<Oid>,
    },
}

impl BackendMessage {
    /// Decode a backend message from its tag and framed body.
    pub fn decode(tag: u8, body: Bytes) -> PgResult<Self> {
        match tag {
            b'R' => Self::decode_auth(body),
            b'T' => Self::decode_row_description(body),
            b'D' => Self::decode_data_row(body),
            b'C' => Self::decode_command_complete(body),
            b'Z' => Self::decode_ready_for_query(body),
            b'E' => Self::decode_error_response(body),
            b'N' => Self::decode_notice_response(body),
            b'S' => Self::decode_parameter_status(body),
            b'K' => Self::decode_backend_key_data(body),
            b'1' => Ok(BackendMessage::ParseComplete),
            b'2' => Ok(BackendMessage::BindComplete),
            b'3' => Ok(BackendMessage::CloseComplete),
            b'I' => Ok(BackendMessage::EmptyQueryResponse),
            b'n' => Ok(BackendMessage::NoData),
            b's' => Ok(BackendMessage::PortalSuspended),
            b't' => Self::decode_parameter_description(body),
            b'A' => Self::decode_notification_response(body),
            b'G' => Self::decode_copy_response(body, CopyDirection::In),
            b'H' => Self::decode_copy_response(body, CopyDirection::Out),
            b'W' => Self::decode_copy_response(body, CopyDirection::Both),
            b'd' => Ok(BackendMessage::CopyData { data: body }),
            b'c' => Ok(BackendMessage::CopyDone),
            _ => Err(PgError::ProtocolViolation(format!(
                "Unknown message type: {}",
                tag as char
            ))),
        }
    }

    fn decode_auth(mut body: Bytes) -> PgResult<Self> {
        if body.remaining() < 4 {
            return Err(PgError::ProtocolViolation(
                "Truncated authentication message".to_string(),
            ));
        }
        let auth_type = body.get_i32();

        match auth_type {
            0 => Ok(BackendMessage::AuthenticationOk),
            3 => Ok(BackendMessage::AuthenticationCleartextPassword),
            5 => {
                if body.remaining() < 4 {
                    return Err(PgError::ProtocolViolation(
                        "Truncated MD5 salt".to_string(),
                    ));
                }
                let mut salt = [0u8; 4];
                salt.copy_from_slice(&body[..4]);
                Ok(BackendMessage::AuthenticationMD5Password { salt })
            }
            10 => {
                let mut mechanisms = Vec::new();
                while body.remaining() > 0 {
                    let mech = read_cstring(&mut body)?;
                    if mech.is_empty() {
                        break;
                    }
                    mechanisms.push(mech);
                }
                Ok(BackendMessage::AuthenticationSASL { mechanisms })
            }
            11 => Ok(BackendMessage::AuthenticationSASLContinue { data: body }),
            12 => Ok(BackendMessage::AuthenticationSASLFinal { data: body }),
            method => Ok(BackendMessage::AuthenticationUnsupported { method }),
        }
    }

    fn decode_row_description(mut body: Bytes) -> PgResult<Self> {
        let num_fields = body.get_i16() as usize;
        let mut columns = Vec::with_capacity(num_fields);

        for index in 0..num_fields {
            let name = read_cstring(&mut body)?;
            let table_oid = body.get_i32();
            let column_attr = body.get_i16();
            let type_oid = Oid::from_i32(body.get_i32());
            let type_size = body.get_i16();
            let type_modifier = body.get_i32();
            let format = Format::from_i16(body.get_i16());

            columns.push(Column {
                index,
                name,
                table_oid,
                column_attr,
                type_oid,
                type_size,
                type_modifier,
                format,
            });
        }

        Ok(BackendMessage::RowDescription { columns })
    }

    fn decode_data_row(mut body: Bytes) -> PgResult<Self> {
        let num_cols = body.get_i16() as usize;
        let mut values = Vec::with_capacity(num_cols);

        for _ in 0..num_cols {
            let len = body.get_i32();
            if len < 0 {
                values.push(None);
            } else {
                let data = body.split_to(len as usize);
                values.push(Some(data));
            }
        }

        Ok(BackendMessage::DataRow { values })
    }

    fn decode_command_complete(mut body: Bytes) -> PgResult<Self> {
        let tag = read_cstring(&mut body)?;
        Ok(BackendMessage::CommandComplete { tag })
    }

    fn decode_ready_for_query(mut body: Bytes) -> PgResult<Self> {
        if body.remaining() < 1 {
            return Err(PgError::ProtocolViolation(
                "Truncated ReadyForQuery".to_string(),
            ));
        }
        let status = TransactionStatus::from(body.get_u8());
        Ok(BackendMessage::ReadyForQuery { status })
    }

    fn decode_error_response(body: Bytes) -> PgResult<Self> {
        let fields = read_error_fields(body)?;
        Ok(BackendMessage::ErrorResponse { fields })
    }

    fn decode_notice_response(body: Bytes) -> PgResult<Self> {
        let fields = read_error_fields(body)?;
        Ok(BackendMessage::NoticeResponse { fields })
    }

    fn decode_parameter_status(mut body: Bytes) -> PgResult<Self> {
        let name = read_cstring(&mut body)?;
        let value = read_cstring(&mut body)?;
        Ok(BackendMessage::ParameterStatus { name, value })
    }

    fn decode_backend_key_data(mut body: Bytes) -> PgResult<Self> {
        let process_id = body.get_i32();
        let secret_key = body.get_i32();
        Ok(BackendMessage::BackendKeyData {
            process_id,
            secret_key,
        })
    }

    fn decode_parameter_description(mut body: Bytes) -> PgResult<Self> {
        let num_params = body.get_i16() as usize;
        let mut type_oids = Vec::with_capacity(num_params);

        for _ in 0..num_params {
            type_oids.push(Oid::from_i32(body.get_i32()));
        }

        Ok(BackendMessage::ParameterDescription { type_oids })
    }

    fn decode_notification_response(mut body: Bytes) -> PgResult<Self> {
        let process_id = body.get_i32();
        let channel = read_cstring(&mut body)?;
        let payload = read_cstring(&mut body)?;

        Ok(BackendMessage::NotificationResponse {
            process_id,
            channel,
            payload,
        })
    }

    fn decode_copy_response(mut body: Bytes, direction: CopyDirection) -> PgResult<Self> {
        if body.remaining() < 3 {
            return Err(PgError::ProtocolViolation(
                "Truncated copy response".to_string(),
            ));
        }
        let binary = body.get_u8() == 1;
        let num_cols = body.get_i16() as usize;
        let mut column_formats = Vec::with_capacity(num_cols);
        for _ in 0..num_cols {
            column_formats.push(Format::from_i16(body.get_i16()));
        }
        Ok(match direction {
            CopyDirection::In => BackendMessage::CopyInResponse {
                binary,
                column_formats,
            },
            CopyDirection::Out => BackendMessage::CopyOutResponse {
                binary,
                column_formats,
            },
            CopyDirection::Both => BackendMessage::CopyBothResponse {
                binary,
                column_formats,
            },
        })
    }
}

enum CopyDirection {
    In,
    Out,
    Both,
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Read a null-terminated string from the buffer.
fn read_cstring(buf: &mut Bytes) -> PgResult<String> {
    let mut end = 0;
    while end < buf.remaining() && buf[end] != 0 {
        end += 1;
    }

    if end >= buf.remaining() {
        return Err(PgError::ProtocolViolation(
            "Missing null terminator in string".to_string(),
        ));
    }

    let s = std::str::from_utf8(&buf[..end])
        .map(|s| s.to_owned())
        .unwrap_or_else(|_| String::from_utf8_lossy(&buf[..end]).into_owned());

    buf.advance(end + 1); // Skip the null terminator
    Ok(s)
}

/// Read error/notice response fields
fn read_error_fields(mut body: Bytes) -> PgResult<ServerFields> {
    let mut fields = ServerFields::new();

    while body.remaining() > 0 {
        let field_type = body.get_u8();
        if field_type == 0 {
            break;
        }
        let value = read_cstring(&mut body)?;
        fields.insert(field_type, value);
    }

    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn startup_message_structure() {
        let msg = StartupMessage {
            user: "test".to_string(),
            database: "testdb".to_string(),
            options: vec![("client_encoding".to_string(), "UTF8".to_string())],
        };

        let encoded = msg.encode();
        assert!(encoded.len() >= 8);

        let len = i32::from_be_bytes([encoded[0], encoded[1], encoded[2], encoded[3]]);
        assert_eq!(len as usize, encoded.len());

        let version = i32::from_be_bytes([encoded[4], encoded[5], encoded[6], encoded[7]]);
        assert_eq!(version, PROTOCOL_VERSION);
    }

    #[test]
    fn ssl_request_structure() {
        let encoded = SslRequest.encode();
        assert_eq!(encoded.len(), 8);
        assert_eq!(
            i32::from_be_bytes([encoded[4], encoded[5], encoded[6], encoded[7]]),
            SSL_REQUEST_CODE
        );
    }

    #[test]
    fn cancel_request_structure() {
        let encoded = CancelRequest {
            process_id: 1234,
            secret_key: -99,
        }
        .encode();
        assert_eq!(encoded.len(), 16);
        assert_eq!(
            i32::from_be_bytes([encoded[4], encoded[5], encoded[6], encoded[7]]),
            CANCEL_REQUEST_CODE
        );
        assert_eq!(
            i32::from_be_bytes([encoded[8], encoded[9], encoded[10], encoded[11]]),
            1234
        );
    }

    #[test]
    fn query_message_structure() {
        let msg = QueryMessage {
            query: "SELECT 1".to_string(),
        };

        let encoded = msg.encode();
        assert_eq!(encoded[0], b'Q');

        let len = i32::from_be_bytes([encoded[1], encoded[2], encoded[3], encoded[4]]);
        assert_eq!(len as usize, encoded.len() - 1);
    }

    #[test]
    fn bind_message_mixed_formats() {
        let msg = BindMessage {
            portal: String::new(),
            statement: "s1".to_string(),
            params: vec![
                PgValue::Int4(42),
                PgValue::Null,
                PgValue::Numeric("1.5".to_string()),
            ],
            result_formats: vec![Format::Binary],
        };

        let encoded = msg.encode();
        assert_eq!(encoded[0], b'B');

        // Skip tag, length, empty portal (1 byte), "s1\0" (3 bytes)
        let body = &encoded[5..];
        assert_eq!(body[0], 0); // portal terminator
        assert_eq!(&body[1..4], b"s1\0");
        // Three format codes: binary, binary (null placeholder), text
        let formats = &body[4..];
        assert_eq!(i16::from_be_bytes([formats[0], formats[1]]), 3);
        assert_eq!(i16::from_be_bytes([formats[2], formats[3]]), 1);
        assert_eq!(i16::from_be_bytes([formats[4], formats[5]]), 1);
        assert_eq!(i16::from_be_bytes([formats[6], formats[7]]), 0);
    }

    #[test]
    fn sync_and_terminate_are_five_bytes() {
        assert_eq!(SyncMessage.encode().len(), 5);
        assert_eq!(SyncMessage.encode()[0], b'S');
        assert_eq!(TerminateMessage.encode().len(), 5);
        assert_eq!(TerminateMessage.encode()[0], b'X');
        assert_eq!(FlushMessage.encode()[0], b'H');
    }

    #[test]
    fn close_message_structure() {
        let encoded = CloseMessage {
            kind: b'S',
            name: "__pgkit_0".to_string(),
        }
        .encode();
        assert_eq!(encoded[0], b'C');
        assert_eq!(encoded[5], b'S');
    }

    #[test]
    fn authentication_ok_decoding() {
        let msg = BackendMessage::decode(b'R', Bytes::from_static(&[0, 0, 0, 0])).unwrap();
        assert!(matches!(msg, BackendMessage::AuthenticationOk));
    }

    #[test]
    fn authentication_md5_decoding() {
        let msg = BackendMessage::decode(
            b'R',
            Bytes::from_static(&[0, 0, 0, 5, 0x12, 0x34, 0x56, 0x78]),
        )
        .unwrap();
        match msg {
            BackendMessage::AuthenticationMD5Password { salt } => {
                assert_eq!(salt, [0x12, 0x34, 0x56, 0x78]);
            }
            _ => panic!("Should decode as AuthenticationMD5Password"),
        }
    }

    #[test]
    fn authentication_sasl_decoding() {
        let mut body = BytesMut::new();
        body.put_i32(10);
        body.put_slice(b"SCRAM-SHA-256\0");
        body.put_u8(0);

        let msg = BackendMessage::decode(b'R', body.freeze()).unwrap();
        match msg {
            BackendMessage::AuthenticationSASL { mechanisms } => {
                assert_eq!(mechanisms, vec!["SCRAM-SHA-256".to_string()]);
            }
            _ => panic!("Should decode as AuthenticationSASL"),
        }
    }

    #[test]
    fn unknown_auth_method_is_reported_not_fatal() {
        let mut body = BytesMut::new();
        body.put_i32(2); // kerberos v5
        let msg = BackendMessage::decode(b'R', body.freeze()).unwrap();
        assert!(matches!(
            msg,
            BackendMessage::AuthenticationUnsupported { method: 2 }
        ));
    }

    #[test]
    fn ready_for_query_decoding() {
        for (byte, status) in [
            (b'I', TransactionStatus::Idle),
            (b'T', TransactionStatus::InTransaction),
            (b'E', TransactionStatus::InFailedTransaction),
        ] {
            let msg = BackendMessage::decode(b'Z', Bytes::copy_from_slice(&[byte])).unwrap();
            match msg {
                BackendMessage::ReadyForQuery { status: s } => assert_eq!(s, status),
                _ => panic!("Should decode as ReadyForQuery"),
            }
        }
    }

    #[test]
    fn row_description_decoding() {
        let mut body = BytesMut::new();
        body.put_i16(1);
        body.put_slice(b"id\0");
        body.put_i32(0); // table oid
        body.put_i16(0); // attr
        body.put_i32(23); // int4
        body.put_i16(4);
        body.put_i32(-1);
        body.put_i16(1); // binary

        let msg = BackendMessage::decode(b'T', body.freeze()).unwrap();
        match msg {
            BackendMessage::RowDescription { columns } => {
                assert_eq!(columns.len(), 1);
                assert_eq!(columns[0].index, 0);
                assert_eq!(columns[0].name, "id");
                assert_eq!(columns[0].type_oid, Oid::INT4);
                assert_eq!(columns[0].format, Format::Binary);
            }
            _ => panic!("Should decode as RowDescription"),
        }
    }

    #[test]
    fn data_row_decoding() {
        let mut body = BytesMut::new();
        body.put_i16(2);
        body.put_i32(4);
        body.put_i32(42);
        body.put_i32(-1); // NULL

        let msg = BackendMessage::decode(b'D', body.freeze()).unwrap();
        match msg {
            BackendMessage::DataRow { values } => {
                assert_eq!(values.len(), 2);
                assert_eq!(values[0], Some(Bytes::copy_from_slice(&42i32.to_be_bytes())));
                assert_eq!(values[1], None);
            }
            _ => panic!("Should decode as DataRow"),
        }
    }

    #[test]
    fn error_response_decoding() {
        let mut body = BytesMut::new();
        body.put_slice(b"SERROR\0");
        body.put_slice(b"C42P01\0");
        body.put_slice(b"Mrelation \"foo\" does not exist\0");
        body.put_u8(0);

        let msg = BackendMessage::decode(b'E', body.freeze()).unwrap();
        match msg {
            BackendMessage::ErrorResponse { fields } => {
                assert_eq!(fields.get(&b'C'), Some(&"42P01".to_string()));
                assert_eq!(fields.get(&b'S'), Some(&"ERROR".to_string()));
            }
            _ => panic!("Should decode as ErrorResponse"),
        }
    }

    #[test]
    fn notification_decoding() {
        let mut body = BytesMut::new();
        body.put_i32(4242);
        body.put_slice(b"jobs\0");
        body.put_slice(b"payload-1\0");

        let msg = BackendMessage::decode(b'A', body.freeze()).unwrap();
        match msg {
            BackendMessage::NotificationResponse {
                process_id,
                channel,
                payload,
            } => {
                assert_eq!(process_id, 4242);
                assert_eq!(channel, "jobs");
                assert_eq!(payload, "payload-1");
            }
            _ => panic!("Should decode as NotificationResponse"),
        }
    }

    #[test]
    fn copy_responses_decode_formats() {
        let mut body = BytesMut::new();
        body.put_u8(0); // text overall
        body.put_i16(2);
        body.put_i16(0);
        body.put_i16(0);

        let msg = BackendMessage::decode(b'G', body.freeze()).unwrap();
        match msg {
            BackendMessage::CopyInResponse {
                binary,
                column_formats,
            } => {
                assert!(!binary);
                assert_eq!(column_formats, vec![Format::Text, Format::Text]);
            }
            _ => panic!("Should decode as CopyInResponse"),
        }

        let data = BackendMessage::decode(b'd', Bytes::from_static(b"1\tfoo\n")).unwrap();
        assert!(matches!(data, BackendMessage::CopyData { .. }));
        assert!(matches!(
            BackendMessage::decode(b'c', Bytes::new()).unwrap(),
            BackendMessage::CopyDone
        ));
    }

    #[test]
    fn unknown_tag_is_protocol_violation() {
        assert!(matches!(
            BackendMessage::decode(b'?', Bytes::new()),
            Err(PgError::ProtocolViolation(_))
        ));
    }
}
