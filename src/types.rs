//! PostgreSQL type encoding and decoding.
//!
//! Binary and text codecs for the built-in types.
//! Reference: https://www.postgresql.org/docs/current/protocol-overview.html#PROTOCOL-FORMAT-CODES

use crate::error::{PgError, PgResult};

// ============================================================================
// Format codes
// ============================================================================

/// Wire format of a field or parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i16)]
pub enum Format {
    Text = 0,
    Binary = 1,
}

impl Format {
    pub fn from_i16(code: i16) -> Format {
        if code == 1 {
            Format::Binary
        } else {
            Format::Text
        }
    }
}

// ============================================================================
// Type OIDs
// ============================================================================

/// PostgreSQL type object identifiers (OIDs).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Oid(pub i32);

impl Oid {
    /// Let the server infer the type.
    pub const UNSPECIFIED: Oid = Oid(0);

    pub const BOOL: Oid = Oid(16);
    pub const BYTEA: Oid = Oid(17);
    pub const CHAR: Oid = Oid(18);
    pub const NAME: Oid = Oid(19);
    pub const INT8: Oid = Oid(20);
    pub const INT2: Oid = Oid(21);
    pub const INT4: Oid = Oid(23);
    pub const TEXT: Oid = Oid(25);
    pub const OID_TYPE: Oid = Oid(26);
    pub const JSON: Oid = Oid(114);
    pub const FLOAT4: Oid = Oid(700);
    pub const FLOAT8: Oid = Oid(701);
    pub const VARCHAR: Oid = Oid(1043);
    pub const BPCHAR: Oid = Oid(1042);
    pub const DATE: Oid = Oid(1082);
    pub const TIME: Oid = Oid(1083);
    pub const TIMESTAMP: Oid = Oid(1114);
    pub const TIMESTAMPTZ: Oid = Oid(1184);
    pub const INTERVAL: Oid = Oid(1186);
    pub const TIMETZ: Oid = Oid(1266);
    pub const NUMERIC: Oid = Oid(1700);
    pub const UUID: Oid = Oid(2950);
    pub const JSONB: Oid = Oid(3802);

    // Array types
    pub const NAME_ARRAY: Oid = Oid(1003);
    pub const BOOL_ARRAY: Oid = Oid(1000);
    pub const BYTEA_ARRAY: Oid = Oid(1001);
    pub const INT2_ARRAY: Oid = Oid(1005);
    pub const INT4_ARRAY: Oid = Oid(1007);
    pub const TEXT_ARRAY: Oid = Oid(1009);
    pub const BPCHAR_ARRAY: Oid = Oid(1014);
    pub const VARCHAR_ARRAY: Oid = Oid(1015);
    pub const INT8_ARRAY: Oid = Oid(1016);
    pub const FLOAT4_ARRAY: Oid = Oid(1021);
    pub const FLOAT8_ARRAY: Oid = Oid(1022);
    pub const OID_ARRAY: Oid = Oid(1028);
    pub const TIMESTAMP_ARRAY: Oid = Oid(1115);
    pub const DATE_ARRAY: Oid = Oid(1182);
    pub const TIME_ARRAY: Oid = Oid(1183);
    pub const TIMESTAMPTZ_ARRAY: Oid = Oid(1185);
    pub const INTERVAL_ARRAY: Oid = Oid(1187);
    pub const NUMERIC_ARRAY: Oid = Oid(1231);
    pub const UUID_ARRAY: Oid = Oid(2951);
    pub const JSON_ARRAY: Oid = Oid(199);
    pub const JSONB_ARRAY: Oid = Oid(3807);

    /// Create from raw i32 value
    #[inline]
    pub fn from_i32(oid: i32) -> Self {
        Oid(oid)
    }

    /// Get the raw i32 value
    #[inline]
    pub fn as_i32(self) -> i32 {
        self.0
    }

    /// Check if this is a text-like type
    pub fn is_text_like(self) -> bool {
        matches!(
            self,
            Oid::TEXT | Oid::VARCHAR | Oid::BPCHAR | Oid::CHAR | Oid::NAME
        )
    }

    /// Check if this is an integer type
    pub fn is_integer(self) -> bool {
        matches!(self, Oid::INT2 | Oid::INT4 | Oid::INT8 | Oid::OID_TYPE)
    }

    /// Check if this is a floating point type
    pub fn is_float(self) -> bool {
        matches!(self, Oid::FLOAT4 | Oid::FLOAT8)
    }

    /// Component type of an array OID, if this is a known array type.
    pub fn array_component(self) -> Option<Oid> {
        let component = match self {
            Oid::BOOL_ARRAY => Oid::BOOL,
            Oid::BYTEA_ARRAY => Oid::BYTEA,
            Oid::NAME_ARRAY => Oid::NAME,
            Oid::INT2_ARRAY => Oid::INT2,
            Oid::INT4_ARRAY => Oid::INT4,
            Oid::INT8_ARRAY => Oid::INT8,
            Oid::TEXT_ARRAY => Oid::TEXT,
            Oid::BPCHAR_ARRAY => Oid::BPCHAR,
            Oid::VARCHAR_ARRAY => Oid::VARCHAR,
            Oid::FLOAT4_ARRAY => Oid::FLOAT4,
            Oid::FLOAT8_ARRAY => Oid::FLOAT8,
            Oid::OID_ARRAY => Oid::OID_TYPE,
            Oid::TIMESTAMP_ARRAY => Oid::TIMESTAMP,
            Oid::TIMESTAMPTZ_ARRAY => Oid::TIMESTAMPTZ,
            Oid::DATE_ARRAY => Oid::DATE,
            Oid::TIME_ARRAY => Oid::TIME,
            Oid::INTERVAL_ARRAY => Oid::INTERVAL,
            Oid::NUMERIC_ARRAY => Oid::NUMERIC,
            Oid::UUID_ARRAY => Oid::UUID,
            Oid::JSON_ARRAY => Oid::JSON,
            Oid::JSONB_ARRAY => Oid::JSONB,
            _ => return None,
        };
        Some(component)
    }

    /// Check if this is a known array type.
    pub fn is_array(self) -> bool {
        self.array_component().is_some()
    }
}

// ============================================================================
// PostgreSQL Values
// ============================================================================

/// A PostgreSQL value with type information.
#[derive(Debug, Clone, PartialEq)]
pub enum PgValue {
    Null,
    Bool(bool),
    Int2(i16),
    Int4(i32),
    Int8(i64),
    Float4(f32),
    Float8(f64),
    Text(String),
    Bytea(Vec<u8>),
    Uuid([u8; 16]),
    /// Microseconds since 2000-01-01 00:00:00 (UTC for timestamptz)
    Timestamp(i64),
    /// Days since 2000-01-01
    Date(i32),
    /// Microseconds since midnight
    Time(i64),
    Interval {
        months: i32,
        days: i32,
        micros: i64,
    },
    /// Canonical decimal string, or "NaN"
    Numeric(String),
    Json(String),
    Array(Vec<PgValue>),
    /// For types we don't handle specially - store raw bytes
    Raw {
        oid: Oid,
        data: Vec<u8>,
    },
}

impl PgValue {
    /// Check if this value is NULL
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, PgValue::Null)
    }

    /// Get the OID for this value's type
    pub fn type_oid(&self) -> Oid {
        match self {
            PgValue::Null => Oid::UNSPECIFIED,
            PgValue::Bool(_) => Oid::BOOL,
            PgValue::Int2(_) => Oid::INT2,
            PgValue::Int4(_) => Oid::INT4,
            PgValue::Int8(_) => Oid::INT8,
            PgValue::Float4(_) => Oid::FLOAT4,
            PgValue::Float8(_) => Oid::FLOAT8,
            PgValue::Text(_) => Oid::TEXT,
            PgValue::Bytea(_) => Oid::BYTEA,
            PgValue::Uuid(_) => Oid::UUID,
            PgValue::Timestamp(_) => Oid::TIMESTAMP,
            PgValue::Date(_) => Oid::DATE,
            PgValue::Time(_) => Oid::TIME,
            PgValue::Interval { .. } => Oid::INTERVAL,
            PgValue::Numeric(_) => Oid::NUMERIC,
            PgValue::Json(_) => Oid::JSONB,
            // Component type is not known here; let the server infer
            PgValue::Array(_) => Oid::UNSPECIFIED,
            PgValue::Raw { oid, .. } => *oid,
        }
    }

    /// Pick the wire format and bytes for sending this value as a
    /// parameter. Fixed-size types go binary; the rest go text.
    pub fn to_bytes(&self) -> PgResult<(Format, Vec<u8>)> {
        match self {
            PgValue::Null => Ok((Format::Binary, Vec::new())),
            PgValue::Bool(_)
            | PgValue::Int2(_)
            | PgValue::Int4(_)
            | PgValue::Int8(_)
            | PgValue::Float4(_)
            | PgValue::Float8(_)
            | PgValue::Text(_)
            | PgValue::Bytea(_)
            | PgValue::Uuid(_)
            | PgValue::Timestamp(_)
            | PgValue::Date(_)
            | PgValue::Time(_)
            | PgValue::Interval { .. }
            | PgValue::Json(_)
            | PgValue::Raw { .. } => Ok((Format::Binary, self.encode_binary())),
            PgValue::Numeric(_) | PgValue::Array(_) => {
                Ok((Format::Text, self.encode_text().into_bytes()))
            }
        }
    }

    /// Encode this value to binary format.
    pub fn encode_binary(&self) -> Vec<u8> {
        match self {
            PgValue::Null => vec![],
            PgValue::Bool(v) => vec![if *v { 1 } else { 0 }],
            PgValue::Int2(v) => v.to_be_bytes().to_vec(),
            PgValue::Int4(v) => v.to_be_bytes().to_vec(),
            PgValue::Int8(v) => v.to_be_bytes().to_vec(),
            PgValue::Float4(v) => v.to_be_bytes().to_vec(),
            PgValue::Float8(v) => v.to_be_bytes().to_vec(),
            PgValue::Text(v) => v.as_bytes().to_vec(),
            PgValue::Bytea(v) => v.clone(),
            PgValue::Uuid(v) => v.to_vec(),
            PgValue::Timestamp(v) => v.to_be_bytes().to_vec(),
            PgValue::Date(v) => v.to_be_bytes().to_vec(),
            PgValue::Time(v) => v.to_be_bytes().to_vec(),
            PgValue::Interval {
                months,
                days,
                micros,
            } => {
                let mut out = Vec::with_capacity(16);
                out.extend_from_slice(&micros.to_be_bytes());
                out.extend_from_slice(&days.to_be_bytes());
                out.extend_from_slice(&months.to_be_bytes());
                out
            }
            PgValue::Json(v) => {
                // JSONB on the wire carries a version byte
                let mut out = Vec::with_capacity(v.len() + 1);
                out.push(1);
                out.extend_from_slice(v.as_bytes());
                out
            }
            PgValue::Numeric(_) | PgValue::Array(_) => self.encode_text().into_bytes(),
            PgValue::Raw { data, .. } => data.clone(),
        }
    }

    /// Encode this value in the canonical text representation.
    pub fn encode_text(&self) -> String {
        match self {
            PgValue::Null => String::new(),
            PgValue::Bool(v) => (if *v { "t" } else { "f" }).to_string(),
            PgValue::Int2(v) => v.to_string(),
            PgValue::Int4(v) => v.to_string(),
            PgValue::Int8(v) => v.to_string(),
            PgValue::Float4(v) => format_float(f64::from(*v)),
            PgValue::Float8(v) => format_float(*v),
            PgValue::Text(v) => v.clone(),
            PgValue::Bytea(v) => {
                let mut out = String::with_capacity(2 + v.len() * 2);
                out.push_str("\\x");
                for b in v {
                    out.push_str(&format!("{:02x}", b));
                }
                out
            }
            PgValue::Uuid(v) => format_uuid(v),
            PgValue::Timestamp(v) => format_timestamp(*v),
            PgValue::Date(v) => format_date(*v),
            PgValue::Time(v) => format_time_of_day(*v),
            PgValue::Interval {
                months,
                days,
                micros,
            } => format_interval(*months, *days, *micros),
            PgValue::Numeric(v) => v.clone(),
            PgValue::Json(v) => v.clone(),
            PgValue::Array(elems) => {
                let mut out = String::from("{");
                for (i, elem) in elems.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    match elem {
                        PgValue::Null => out.push_str("NULL"),
                        PgValue::Array(_) => out.push_str(&elem.encode_text()),
                        other => {
                            // Always quote scalars; the escapes keep commas
                            // and braces in text elements unambiguous
                            out.push('"');
                            for c in other.encode_text().chars() {
                                if c == '"' || c == '\\' {
                                    out.push('\\');
                                }
                                out.push(c);
                            }
                            out.push('"');
                        }
                    }
                }
                out.push('}');
                out
            }
            PgValue::Raw { data, .. } => String::from_utf8_lossy(data).into_owned(),
        }
    }

    /// Decode a value in the given wire format.
    ///
    /// Array OIDs in text format are returned as `Text` here; the converter
    /// layer owns the array grammar.
    pub fn decode(oid: Oid, format: Format, data: &[u8]) -> PgResult<Self> {
        match format {
            Format::Binary => Self::decode_binary(oid, data),
            Format::Text => Self::decode_text(oid, data),
        }
    }

    /// Decode a value from binary format.
    pub fn decode_binary(oid: Oid, data: &[u8]) -> PgResult<Self> {
        match oid {
            Oid::BOOL => {
                if data.is_empty() {
                    return Err(type_error("Empty data for BOOL"));
                }
                Ok(PgValue::Bool(data[0] != 0))
            }

            Oid::INT2 => Ok(PgValue::Int2(i16::from_be_bytes(fixed(oid, data)?))),
            Oid::INT4 => Ok(PgValue::Int4(i32::from_be_bytes(fixed(oid, data)?))),
            Oid::OID_TYPE => Ok(PgValue::Int4(i32::from_be_bytes(fixed(oid, data)?))),
            Oid::INT8 => Ok(PgValue::Int8(i64::from_be_bytes(fixed(oid, data)?))),
            Oid::FLOAT4 => Ok(PgValue::Float4(f32::from_be_bytes(fixed(oid, data)?))),
            Oid::FLOAT8 => Ok(PgValue::Float8(f64::from_be_bytes(fixed(oid, data)?))),

            Oid::TEXT | Oid::VARCHAR | Oid::BPCHAR | Oid::CHAR | Oid::NAME => {
                let s = std::str::from_utf8(data)
                    .map_err(|e| type_error(format!("Invalid UTF-8 in TEXT: {}", e)))?;
                Ok(PgValue::Text(s.to_owned()))
            }

            Oid::BYTEA => Ok(PgValue::Bytea(data.to_vec())),

            Oid::UUID => {
                if data.len() != 16 {
                    return Err(type_error(format!("Invalid UUID length: {}", data.len())));
                }
                let mut uuid = [0u8; 16];
                uuid.copy_from_slice(data);
                Ok(PgValue::Uuid(uuid))
            }

            Oid::TIMESTAMP | Oid::TIMESTAMPTZ => {
                Ok(PgValue::Timestamp(i64::from_be_bytes(fixed(oid, data)?)))
            }

            Oid::DATE => Ok(PgValue::Date(i32::from_be_bytes(fixed(oid, data)?))),

            Oid::TIME | Oid::TIMETZ => {
                if data.len() < 8 {
                    return Err(type_error(format!("Invalid TIME length: {}", data.len())));
                }
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&data[..8]);
                Ok(PgValue::Time(i64::from_be_bytes(buf)))
            }

            Oid::INTERVAL => {
                if data.len() != 16 {
                    return Err(type_error(format!(
                        "Invalid INTERVAL length: {}",
                        data.len()
                    )));
                }
                let micros = i64::from_be_bytes(data[..8].try_into().expect("sliced to 8"));
                let days = i32::from_be_bytes(data[8..12].try_into().expect("sliced to 4"));
                let months = i32::from_be_bytes(data[12..16].try_into().expect("sliced to 4"));
                Ok(PgValue::Interval {
                    months,
                    days,
                    micros,
                })
            }

            Oid::NUMERIC => decode_numeric_binary(data),

            Oid::JSON | Oid::JSONB => {
                // JSONB has a version byte prefix
                let json_data = if oid == Oid::JSONB && !data.is_empty() {
                    &data[1..]
                } else {
                    data
                };
                let s = std::str::from_utf8(json_data)
                    .map_err(|e| type_error(format!("Invalid UTF-8 in JSON: {}", e)))?;
                Ok(PgValue::Json(s.to_owned()))
            }

            // For unknown types, store raw bytes
            _ => Ok(PgValue::Raw {
                oid,
                data: data.to_vec(),
            }),
        }
    }

    /// Decode from text format (simple query protocol and text columns).
    pub fn decode_text(oid: Oid, data: &[u8]) -> PgResult<Self> {
        let text = std::str::from_utf8(data)
            .map_err(|e| type_error(format!("Invalid UTF-8: {}", e)))?;

        match oid {
            Oid::BOOL => parse_bool(text).map(PgValue::Bool),

            Oid::INT2 => text
                .parse::<i16>()
                .map(PgValue::Int2)
                .map_err(|e| type_error(format!("Invalid INT2: {}", e))),

            Oid::INT4 | Oid::OID_TYPE => text
                .parse::<i32>()
                .map(PgValue::Int4)
                .map_err(|e| type_error(format!("Invalid INT4: {}", e))),

            Oid::INT8 => text
                .parse::<i64>()
                .map(PgValue::Int8)
                .map_err(|e| type_error(format!("Invalid INT8: {}", e))),

            Oid::FLOAT4 => text
                .parse::<f32>()
                .map(PgValue::Float4)
                .map_err(|e| type_error(format!("Invalid FLOAT4: {}", e))),

            Oid::FLOAT8 => text
                .parse::<f64>()
                .map(PgValue::Float8)
                .map_err(|e| type_error(format!("Invalid FLOAT8: {}", e))),

            Oid::BYTEA => parse_bytea(text).map(PgValue::Bytea),

            Oid::UUID => parse_uuid(text).map(PgValue::Uuid),

            Oid::TIMESTAMP | Oid::TIMESTAMPTZ => parse_timestamp(text).map(PgValue::Timestamp),

            Oid::DATE => parse_date(text).map(PgValue::Date),

            Oid::TIME => parse_time_of_day(text).map(PgValue::Time),

            Oid::INTERVAL => parse_interval(text),

            Oid::NUMERIC => parse_numeric_text(text),

            Oid::JSON | Oid::JSONB => Ok(PgValue::Json(text.to_owned())),

            // Text types and everything else: UTF-8 passthrough
            _ => Ok(PgValue::Text(text.to_owned())),
        }
    }
}

fn fixed<const N: usize>(oid: Oid, data: &[u8]) -> PgResult<[u8; N]> {
    data.try_into()
        .map_err(|_| type_error(format!("Invalid length {} for oid {}", data.len(), oid.0)))
}

fn type_error(msg: impl Into<String>) -> PgError {
    PgError::ProtocolViolation(msg.into())
}

// ============================================================================
// Text parsing helpers
// ============================================================================

fn parse_bool(text: &str) -> PgResult<bool> {
    match text.to_ascii_lowercase().as_str() {
        "t" | "true" | "y" | "yes" | "on" | "1" => Ok(true),
        "f" | "false" | "n" | "no" | "off" | "0" => Ok(false),
        other => Err(type_error(format!("Invalid BOOL: {:?}", other))),
    }
}

fn parse_bytea(text: &str) -> PgResult<Vec<u8>> {
    let hex = text
        .strip_prefix("\\x")
        .ok_or_else(|| type_error("BYTEA text must start with \\x"))?;
    if hex.len() % 2 != 0 {
        return Err(type_error("Odd-length BYTEA hex"));
    }
    let mut out = Vec::with_capacity(hex.len() / 2);
    let bytes = hex.as_bytes();
    for pair in bytes.chunks(2) {
        let hi = hex_digit(pair[0])?;
        let lo = hex_digit(pair[1])?;
        out.push((hi << 4) | lo);
    }
    Ok(out)
}

fn hex_digit(b: u8) -> PgResult<u8> {
    match b {
        b'0'..=b'9' => Ok(b - b'0'),
        b'a'..=b'f' => Ok(b - b'a' + 10),
        b'A'..=b'F' => Ok(b - b'A' + 10),
        _ => Err(type_error(format!("Invalid hex digit: {}", b as char))),
    }
}

fn parse_uuid(text: &str) -> PgResult<[u8; 16]> {
    let mut out = [0u8; 16];
    let mut nibbles = 0usize;
    for b in text.bytes() {
        if b == b'-' {
            continue;
        }
        let digit = hex_digit(b)?;
        if nibbles >= 32 {
            return Err(type_error("UUID too long"));
        }
        let byte = nibbles / 2;
        if nibbles % 2 == 0 {
            out[byte] = digit << 4;
        } else {
            out[byte] |= digit;
        }
        nibbles += 1;
    }
    if nibbles != 32 {
        return Err(type_error("UUID too short"));
    }
    Ok(out)
}

fn format_uuid(bytes: &[u8; 16]) -> String {
    let mut out = String::with_capacity(36);
    for (i, b) in bytes.iter().enumerate() {
        if matches!(i, 4 | 6 | 8 | 10) {
            out.push('-');
        }
        out.push_str(&format!("{:02x}", b));
    }
    out
}

fn format_float(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if v.is_infinite() {
        if v > 0.0 {
            "Infinity".to_string()
        } else {
            "-Infinity".to_string()
        }
    } else {
        v.to_string()
    }
}

// ============================================================================
// Date/time math
//
// All stored values are relative to the PostgreSQL epoch 2000-01-01.
// ============================================================================

/// Days between 1970-01-01 and 2000-01-01.
const PG_EPOCH_UNIX_DAYS: i64 = 10_957;
const MICROS_PER_SEC: i64 = 1_000_000;
const SECS_PER_DAY: i64 = 86_400;

/// Days since 1970-01-01 for a proleptic Gregorian civil date.
fn days_from_civil(y: i32, m: u32, d: u32) -> i64 {
    let y = i64::from(y) - i64::from(m <= 2);
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = y - era * 400;
    let mp = i64::from(if m > 2 { m - 3 } else { m + 9 });
    let doy = (153 * mp + 2) / 5 + i64::from(d) - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

/// Inverse of `days_from_civil`.
fn civil_from_days(z: i64) -> (i32, u32, u32) {
    let z = z + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    ((y + i64::from(m <= 2)) as i32, m, d)
}

/// Parse `YYYY-MM-DD` into days since 2000-01-01.
fn parse_date(text: &str) -> PgResult<i32> {
    let (days, rest) = parse_date_prefix(text)?;
    if !rest.is_empty() {
        return Err(type_error(format!("Invalid DATE: {:?}", text)));
    }
    Ok(days)
}

fn parse_date_prefix(text: &str) -> PgResult<(i32, &str)> {
    let err = || type_error(format!("Invalid date: {:?}", text));
    if text.len() < 10 {
        return Err(err());
    }
    let (date, rest) = text.split_at(10);
    let bytes = date.as_bytes();
    if bytes[4] != b'-' || bytes[7] != b'-' {
        return Err(err());
    }
    let y: i32 = date[..4].parse().map_err(|_| err())?;
    let m: u32 = date[5..7].parse().map_err(|_| err())?;
    let d: u32 = date[8..10].parse().map_err(|_| err())?;
    if !(1..=12).contains(&m) || !(1..=31).contains(&d) {
        return Err(err());
    }
    let days = days_from_civil(y, m, d) - PG_EPOCH_UNIX_DAYS;
    Ok((days as i32, rest))
}

fn format_date(days: i32) -> String {
    let (y, m, d) = civil_from_days(i64::from(days) + PG_EPOCH_UNIX_DAYS);
    format!("{:04}-{:02}-{:02}", y, m, d)
}

/// Parse `HH:MM:SS[.ffffff]` into microseconds since midnight; returns the
/// unparsed remainder (a possible timezone offset).
fn parse_clock_prefix(text: &str) -> PgResult<(i64, &str)> {
    let err = || type_error(format!("Invalid time: {:?}", text));
    if text.len() < 8 {
        return Err(err());
    }
    let bytes = text.as_bytes();
    if bytes[2] != b':' || bytes[5] != b':' {
        return Err(err());
    }
    let h: i64 = text[..2].parse().map_err(|_| err())?;
    let m: i64 = text[3..5].parse().map_err(|_| err())?;
    let s: i64 = text[6..8].parse().map_err(|_| err())?;
    if h > 24 || m > 59 || s > 60 {
        return Err(err());
    }
    let mut micros = (h * 3600 + m * 60 + s) * MICROS_PER_SEC;
    let mut rest = &text[8..];
    if let Some(frac) = rest.strip_prefix('.') {
        let digits: String = frac.chars().take_while(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            return Err(err());
        }
        // Scale to microseconds; extra digits are truncated
        let mut value: i64 = 0;
        for (i, c) in digits.chars().enumerate() {
            if i >= 6 {
                break;
            }
            value = value * 10 + i64::from(c.to_digit(10).unwrap_or(0));
        }
        for _ in digits.len().min(6)..6 {
            value *= 10;
        }
        micros += value;
        rest = &frac[digits.len()..];
    }
    Ok((micros, rest))
}

fn parse_time_of_day(text: &str) -> PgResult<i64> {
    let (micros, rest) = parse_clock_prefix(text)?;
    if !rest.is_empty() {
        return Err(type_error(format!("Invalid TIME: {:?}", text)));
    }
    Ok(micros)
}

fn format_time_of_day(micros: i64) -> String {
    let secs = micros.div_euclid(MICROS_PER_SEC);
    let frac = micros.rem_euclid(MICROS_PER_SEC);
    let h = secs / 3600;
    let m = (secs % 3600) / 60;
    let s = secs % 60;
    let mut out = format!("{:02}:{:02}:{:02}", h, m, s);
    if frac != 0 {
        let mut f = format!(".{:06}", frac);
        while f.ends_with('0') {
            f.pop();
        }
        out.push_str(&f);
    }
    out
}

/// Parse `[+-]HH[:MM[:SS]]` timezone offset into seconds east of UTC.
fn parse_offset(text: &str) -> PgResult<i64> {
    let err = || type_error(format!("Invalid timezone offset: {:?}", text));
    let (sign, rest) = match text.as_bytes().first() {
        Some(b'+') => (1i64, &text[1..]),
        Some(b'-') => (-1i64, &text[1..]),
        _ => return Err(err()),
    };
    let mut parts = rest.split(':');
    let h: i64 = parts.next().ok_or_else(err)?.parse().map_err(|_| err())?;
    let m: i64 = match parts.next() {
        Some(p) => p.parse().map_err(|_| err())?,
        None => 0,
    };
    let s: i64 = match parts.next() {
        Some(p) => p.parse().map_err(|_| err())?,
        None => 0,
    };
    if parts.next().is_some() {
        return Err(err());
    }
    Ok(sign * (h * 3600 + m * 60 + s))
}

/// Parse `YYYY-MM-DD HH:MM:SS[.ffffff][+HH[:MM[:SS]]]` into microseconds
/// since 2000-01-01 UTC.
fn parse_timestamp(text: &str) -> PgResult<i64> {
    let (days, rest) = parse_date_prefix(text)?;
    let rest = rest
        .strip_prefix(' ')
        .or_else(|| rest.strip_prefix('T'))
        .ok_or_else(|| type_error(format!("Invalid TIMESTAMP: {:?}", text)))?;
    let (clock_micros, rest) = parse_clock_prefix(rest)?;
    let offset_secs = if rest.is_empty() {
        0
    } else {
        parse_offset(rest)?
    };
    Ok(i64::from(days) * SECS_PER_DAY * MICROS_PER_SEC + clock_micros
        - offset_secs * MICROS_PER_SEC)
}

fn format_timestamp(micros: i64) -> String {
    let days = micros.div_euclid(SECS_PER_DAY * MICROS_PER_SEC);
    let day_micros = micros.rem_euclid(SECS_PER_DAY * MICROS_PER_SEC);
    format!(
        "{} {}",
        format_date(days as i32),
        format_time_of_day(day_micros)
    )
}

// ============================================================================
// Intervals (PostgreSQL default output style)
// ============================================================================

fn parse_interval(text: &str) -> PgResult<PgValue> {
    let err = || type_error(format!("Invalid INTERVAL: {:?}", text));
    let mut months = 0i32;
    let mut days = 0i32;
    let mut micros = 0i64;

    let mut tokens = text.split_whitespace().peekable();
    while let Some(token) = tokens.next() {
        if token.contains(':') {
            // Clock part, possibly signed: [-+]HH:MM:SS[.f]
            let (sign, clock) = match token.as_bytes()[0] {
                b'-' => (-1i64, &token[1..]),
                b'+' => (1, &token[1..]),
                _ => (1, token),
            };
            let (value, rest) = parse_clock_prefix(clock)?;
            if !rest.is_empty() {
                return Err(err());
            }
            micros += sign * value;
        } else {
            let quantity: i64 = token.parse().map_err(|_| err())?;
            let unit = tokens.next().ok_or_else(err)?;
            match unit {
                "year" | "years" => months += (quantity * 12) as i32,
                "mon" | "mons" => months += quantity as i32,
                "day" | "days" => days += quantity as i32,
                _ => return Err(err()),
            }
        }
    }

    Ok(PgValue::Interval {
        months,
        days,
        micros,
    })
}

fn format_interval(months: i32, days: i32, micros: i64) -> String {
    let mut parts: Vec<String> = Vec::new();
    let years = months / 12;
    let mons = months % 12;
    if years != 0 {
        parts.push(format!(
            "{} year{}",
            years,
            if years.abs() == 1 { "" } else { "s" }
        ));
    }
    if mons != 0 {
        parts.push(format!(
            "{} mon{}",
            mons,
            if mons.abs() == 1 { "" } else { "s" }
        ));
    }
    if days != 0 {
        parts.push(format!(
            "{} day{}",
            days,
            if days.abs() == 1 { "" } else { "s" }
        ));
    }
    if micros != 0 || parts.is_empty() {
        let sign = if micros < 0 { "-" } else { "" };
        parts.push(format!("{}{}", sign, format_time_of_day(micros.abs())));
    }
    parts.join(" ")
}

// ============================================================================
// Numeric
// ============================================================================

fn parse_numeric_text(text: &str) -> PgResult<PgValue> {
    let trimmed = text.trim();
    if trimmed.eq_ignore_ascii_case("nan") {
        return Ok(PgValue::Numeric("NaN".to_string()));
    }
    let unsigned = trimmed
        .strip_prefix('-')
        .or_else(|| trimmed.strip_prefix('+'))
        .unwrap_or(trimmed);
    let valid = !unsigned.is_empty()
        && unsigned.chars().all(|c| c.is_ascii_digit() || c == '.')
        && unsigned.chars().filter(|&c| c == '.').count() <= 1
        && unsigned.chars().any(|c| c.is_ascii_digit());
    if !valid {
        return Err(type_error(format!("Invalid NUMERIC: {:?}", text)));
    }
    Ok(PgValue::Numeric(trimmed.to_string()))
}

/// Decode the base-10000 binary numeric representation into its canonical
/// decimal string.
fn decode_numeric_binary(data: &[u8]) -> PgResult<PgValue> {
    if data.len() < 8 {
        return Err(type_error(format!(
            "Invalid NUMERIC length: {}",
            data.len()
        )));
    }
    let ndigits = i16::from_be_bytes(data[..2].try_into().expect("sliced to 2")) as usize;
    let weight = i16::from_be_bytes(data[2..4].try_into().expect("sliced to 2")) as i32;
    let sign = u16::from_be_bytes(data[4..6].try_into().expect("sliced to 2"));
    let dscale = i16::from_be_bytes(data[6..8].try_into().expect("sliced to 2")) as usize;

    if sign == 0xC000 {
        return Ok(PgValue::Numeric("NaN".to_string()));
    }
    if data.len() < 8 + ndigits * 2 {
        return Err(type_error("Truncated NUMERIC digits"));
    }

    let mut digits = Vec::with_capacity(ndigits);
    for i in 0..ndigits {
        let off = 8 + i * 2;
        digits.push(u16::from_be_bytes(
            data[off..off + 2].try_into().expect("sliced to 2"),
        ));
    }

    // Integer part: digit groups with weight >= 0
    let mut int_part = String::new();
    if weight >= 0 {
        for i in 0..=(weight as usize) {
            let group = digits.get(i).copied().unwrap_or(0);
            if int_part.is_empty() {
                int_part.push_str(&group.to_string());
            } else {
                int_part.push_str(&format!("{:04}", group));
            }
        }
    }
    if int_part.is_empty() {
        int_part.push('0');
    }

    // Fractional part: groups after the weight, to dscale digits
    let mut frac_part = String::new();
    if dscale > 0 {
        let mut group_index = weight + 1;
        while frac_part.len() < dscale {
            let group = if group_index >= 0 {
                digits.get(group_index as usize).copied().unwrap_or(0)
            } else {
                0
            };
            frac_part.push_str(&format!("{:04}", group));
            group_index += 1;
        }
        frac_part.truncate(dscale);
    }

    let mut out = String::new();
    if sign == 0x4000 {
        out.push('-');
    }
    out.push_str(&int_part);
    if !frac_part.is_empty() {
        out.push('.');
        out.push_str(&frac_part);
    }
    Ok(PgValue::Numeric(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oid_classification() {
        assert!(Oid::TEXT.is_text_like());
        assert!(Oid::VARCHAR.is_text_like());
        assert!(!Oid::INT4.is_text_like());

        assert!(Oid::INT4.is_integer());
        assert!(Oid::INT8.is_integer());
        assert!(!Oid::FLOAT8.is_integer());

        assert!(Oid::FLOAT4.is_float());
        assert!(!Oid::INT4.is_float());
    }

    #[test]
    fn array_component_mapping() {
        assert_eq!(Oid::INT4_ARRAY.array_component(), Some(Oid::INT4));
        assert_eq!(Oid::TEXT_ARRAY.array_component(), Some(Oid::TEXT));
        assert_eq!(Oid::UUID_ARRAY.array_component(), Some(Oid::UUID));
        assert_eq!(Oid::INT4.array_component(), None);
        assert!(Oid::NUMERIC_ARRAY.is_array());
    }

    #[test]
    fn int4_binary_roundtrip() {
        let original = PgValue::Int4(12345);
        let encoded = original.encode_binary();
        let decoded = PgValue::decode_binary(Oid::INT4, &encoded).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn interval_binary_roundtrip() {
        let original = PgValue::Interval {
            months: 14,
            days: 3,
            micros: 4 * 3600 * MICROS_PER_SEC + 5 * 60 * MICROS_PER_SEC + 6_789_000,
        };
        let encoded = original.encode_binary();
        let decoded = PgValue::decode_binary(Oid::INTERVAL, &encoded).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn bool_text_forms() {
        for t in ["t", "true", "TRUE", "yes", "on", "1"] {
            assert_eq!(PgValue::decode_text(Oid::BOOL, t.as_bytes()).unwrap(), PgValue::Bool(true));
        }
        for f in ["f", "false", "no", "OFF", "0"] {
            assert_eq!(PgValue::decode_text(Oid::BOOL, f.as_bytes()).unwrap(), PgValue::Bool(false));
        }
        assert!(PgValue::decode_text(Oid::BOOL, b"maybe").is_err());
        assert_eq!(PgValue::Bool(true).encode_text(), "t");
        assert_eq!(PgValue::Bool(false).encode_text(), "f");
    }

    #[test]
    fn float_specials() {
        assert_eq!(PgValue::Float8(f64::INFINITY).encode_text(), "Infinity");
        assert_eq!(PgValue::Float8(f64::NEG_INFINITY).encode_text(), "-Infinity");
        assert_eq!(PgValue::Float8(f64::NAN).encode_text(), "NaN");
        match PgValue::decode_text(Oid::FLOAT8, b"Infinity").unwrap() {
            PgValue::Float8(v) => assert!(v.is_infinite() && v > 0.0),
            other => panic!("unexpected: {:?}", other),
        }
        match PgValue::decode_text(Oid::FLOAT8, b"NaN").unwrap() {
            PgValue::Float8(v) => assert!(v.is_nan()),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn bytea_text_roundtrip() {
        let value = PgValue::Bytea(vec![0xDE, 0xAD, 0xBE, 0xEF]);
        let text = value.encode_text();
        assert_eq!(text, "\\xdeadbeef");
        assert_eq!(PgValue::decode_text(Oid::BYTEA, text.as_bytes()).unwrap(), value);
    }

    #[test]
    fn uuid_text_roundtrip() {
        let text = "550e8400-e29b-41d4-a716-446655440000";
        let value = PgValue::decode_text(Oid::UUID, text.as_bytes()).unwrap();
        assert_eq!(value.encode_text(), text);
    }

    #[test]
    fn date_text_roundtrip() {
        // 2000-01-01 is day zero of the PostgreSQL epoch
        assert_eq!(PgValue::decode_text(Oid::DATE, b"2000-01-01").unwrap(), PgValue::Date(0));
        assert_eq!(PgValue::decode_text(Oid::DATE, b"2000-01-02").unwrap(), PgValue::Date(1));
        assert_eq!(PgValue::decode_text(Oid::DATE, b"1999-12-31").unwrap(), PgValue::Date(-1));

        for text in ["2024-02-29", "1970-01-01", "2000-03-01"] {
            let value = PgValue::decode_text(Oid::DATE, text.as_bytes()).unwrap();
            assert_eq!(value.encode_text(), text);
        }
    }

    #[test]
    fn timestamp_text_roundtrip() {
        let value = PgValue::decode_text(Oid::TIMESTAMP, b"2000-01-01 00:00:00").unwrap();
        assert_eq!(value, PgValue::Timestamp(0));

        for text in [
            "2023-06-15 12:34:56",
            "2023-06-15 12:34:56.789",
            "1999-12-31 23:59:59.999999",
        ] {
            let value = PgValue::decode_text(Oid::TIMESTAMP, text.as_bytes()).unwrap();
            assert_eq!(value.encode_text(), text);
        }
    }

    #[test]
    fn timestamp_offset_applied() {
        // 12:00 at +02 is 10:00 UTC
        let with_offset = PgValue::decode_text(Oid::TIMESTAMPTZ, b"2023-06-15 12:00:00+02").unwrap();
        let utc = PgValue::decode_text(Oid::TIMESTAMP, b"2023-06-15 10:00:00").unwrap();
        assert_eq!(with_offset, utc);

        let negative = PgValue::decode_text(Oid::TIMESTAMPTZ, b"2023-06-15 12:00:00-05:30").unwrap();
        let utc = PgValue::decode_text(Oid::TIMESTAMP, b"2023-06-15 17:30:00").unwrap();
        assert_eq!(negative, utc);
    }

    #[test]
    fn interval_text_parse_and_format() {
        let value = PgValue::decode_text(Oid::INTERVAL, b"1 year 2 mons 3 days 04:05:06.789").unwrap();
        assert_eq!(
            value,
            PgValue::Interval {
                months: 14,
                days: 3,
                micros: (4 * 3600 + 5 * 60 + 6) * MICROS_PER_SEC + 789_000,
            }
        );
        assert_eq!(value.encode_text(), "1 year 2 mons 3 days 04:05:06.789");

        let zero = PgValue::Interval { months: 0, days: 0, micros: 0 };
        assert_eq!(zero.encode_text(), "00:00:00");
        assert_eq!(PgValue::decode_text(Oid::INTERVAL, b"00:00:00").unwrap(), zero);

        let negative_clock = PgValue::decode_text(Oid::INTERVAL, b"3 days -04:00:00").unwrap();
        assert_eq!(
            negative_clock,
            PgValue::Interval { months: 0, days: 3, micros: -4 * 3600 * MICROS_PER_SEC }
        );
    }

    #[test]
    fn numeric_text_validation() {
        assert_eq!(
            PgValue::decode_text(Oid::NUMERIC, b"-1234.5678").unwrap(),
            PgValue::Numeric("-1234.5678".to_string())
        );
        assert_eq!(
            PgValue::decode_text(Oid::NUMERIC, b"NaN").unwrap(),
            PgValue::Numeric("NaN".to_string())
        );
        assert!(PgValue::decode_text(Oid::NUMERIC, b"12.3.4").is_err());
        assert!(PgValue::decode_text(Oid::NUMERIC, b"abc").is_err());
    }

    #[test]
    fn numeric_binary_decoding() {
        // 1234.56: ndigits=2, weight=0, sign=0, dscale=2, digits=[1234, 5600]
        let mut data = Vec::new();
        data.extend_from_slice(&2i16.to_be_bytes());
        data.extend_from_slice(&0i16.to_be_bytes());
        data.extend_from_slice(&0u16.to_be_bytes());
        data.extend_from_slice(&2i16.to_be_bytes());
        data.extend_from_slice(&1234u16.to_be_bytes());
        data.extend_from_slice(&5600u16.to_be_bytes());
        assert_eq!(
            PgValue::decode_binary(Oid::NUMERIC, &data).unwrap(),
            PgValue::Numeric("1234.56".to_string())
        );

        // -0.007: ndigits=1, weight=-1, sign=0x4000, dscale=3, digits=[70]
        let mut data = Vec::new();
        data.extend_from_slice(&1i16.to_be_bytes());
        data.extend_from_slice(&(-1i16).to_be_bytes());
        data.extend_from_slice(&0x4000u16.to_be_bytes());
        data.extend_from_slice(&3i16.to_be_bytes());
        data.extend_from_slice(&70u16.to_be_bytes());
        assert_eq!(
            PgValue::decode_binary(Oid::NUMERIC, &data).unwrap(),
            PgValue::Numeric("-0.007".to_string())
        );
    }

    #[test]
    fn array_text_encoding_quotes_scalars() {
        let value = PgValue::Array(vec![
            PgValue::Int4(1),
            PgValue::Null,
            PgValue::Text("a,\"b\"".to_string()),
        ]);
        assert_eq!(value.encode_text(), "{\"1\",NULL,\"a,\\\"b\\\"\"}");
    }
}
