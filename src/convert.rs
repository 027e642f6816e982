//! Type-directed value conversion and row reading.
//!
//! A converter registry maps stable target-type identifiers ("int4",
//! "text", "uuid", "int4[]", ...) to converter objects. The row reader
//! resolves a converter for a column and delivers typed values, assembling
//! arrays from the PostgreSQL text representation when the registry has no
//! direct entry for an array target.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use crate::error::{PgError, PgResult};
use crate::row::{Column, Row};
use crate::types::{Format, Oid, PgValue};

/// The unconstrained target: whatever the column's declared type produces.
pub const ANY: &str = "any";

/// A stateless bidirectional codec between raw field bytes and `PgValue`.
///
/// Text format is mandatory for every converter; binary is handled where
/// the type has a binary representation. `raw` is never null here; the
/// reader short-circuits SQL NULL before converters run.
pub trait Converter: Send + Sync {
    /// Target-type identifier this converter produces.
    fn target(&self) -> &str;

    /// Decode raw bytes from the given column into the target type.
    fn from_bytes(&self, col: &Column, raw: &[u8]) -> PgResult<PgValue>;

    /// Encode a value for sending as a parameter.
    fn to_bytes(&self, value: &PgValue) -> PgResult<(Format, Vec<u8>)> {
        value.to_bytes()
    }
}

/// Default converter: decodes the column's natural value, then coerces it
/// to the target type.
struct ScalarConverter {
    target: &'static str,
}

impl Converter for ScalarConverter {
    fn target(&self) -> &str {
        self.target
    }

    fn from_bytes(&self, col: &Column, raw: &[u8]) -> PgResult<PgValue> {
        // Text is UTF-8 passthrough: a text-format field read as text never
        // goes through the column's declared type
        if self.target == "text" && col.format == Format::Text {
            let s = std::str::from_utf8(raw).map_err(|e| {
                PgError::ProtocolViolation(format!("Invalid UTF-8: {}", e))
            })?;
            return Ok(PgValue::Text(s.to_owned()));
        }
        let natural = PgValue::decode(col.type_oid, col.format, raw)?;
        coerce(self.target, natural)
    }
}

/// Canonical OID for a scalar target identifier.
fn canonical_oid(target: &str) -> Option<Oid> {
    let oid = match target {
        "bool" => Oid::BOOL,
        "int2" => Oid::INT2,
        "int4" => Oid::INT4,
        "int8" => Oid::INT8,
        "float4" => Oid::FLOAT4,
        "float8" => Oid::FLOAT8,
        "text" => Oid::TEXT,
        "bytea" => Oid::BYTEA,
        "uuid" => Oid::UUID,
        "timestamp" => Oid::TIMESTAMP,
        "date" => Oid::DATE,
        "time" => Oid::TIME,
        "interval" => Oid::INTERVAL,
        "numeric" => Oid::NUMERIC,
        "json" => Oid::JSONB,
        _ => return None,
    };
    Some(oid)
}

/// Coerce a naturally decoded value into the target type.
fn coerce(target: &str, natural: PgValue) -> PgResult<PgValue> {
    let mismatch = |v: &PgValue| {
        PgError::ProtocolViolation(format!("cannot read {:?} as {}", v.type_oid(), target))
    };
    match (target, natural) {
        (ANY, v) => Ok(v),
        ("text", v) => Ok(PgValue::Text(v.encode_text())),
        // Textual input (unspecified columns, simple protocol): re-parse
        // under the target's canonical type
        (_, PgValue::Text(s)) => {
            let oid = canonical_oid(target)
                .ok_or_else(|| PgError::NoConversion(target.to_string()))?;
            PgValue::decode_text(oid, s.as_bytes())
        }
        ("bool", v @ PgValue::Bool(_)) => Ok(v),
        ("int2", v @ PgValue::Int2(_)) => Ok(v),
        ("int2", PgValue::Int4(v)) => i16::try_from(v)
            .map(PgValue::Int2)
            .map_err(|_| PgError::ProtocolViolation(format!("{} out of range for int2", v))),
        ("int2", PgValue::Int8(v)) => i16::try_from(v)
            .map(PgValue::Int2)
            .map_err(|_| PgError::ProtocolViolation(format!("{} out of range for int2", v))),
        ("int4", v @ PgValue::Int4(_)) => Ok(v),
        ("int4", PgValue::Int2(v)) => Ok(PgValue::Int4(i32::from(v))),
        ("int4", PgValue::Int8(v)) => i32::try_from(v)
            .map(PgValue::Int4)
            .map_err(|_| PgError::ProtocolViolation(format!("{} out of range for int4", v))),
        ("int8", v @ PgValue::Int8(_)) => Ok(v),
        ("int8", PgValue::Int2(v)) => Ok(PgValue::Int8(i64::from(v))),
        ("int8", PgValue::Int4(v)) => Ok(PgValue::Int8(i64::from(v))),
        ("float4", v @ PgValue::Float4(_)) => Ok(v),
        ("float4", PgValue::Float8(v)) => Ok(PgValue::Float4(v as f32)),
        ("float4", PgValue::Int2(v)) => Ok(PgValue::Float4(f32::from(v))),
        ("float4", PgValue::Int4(v)) => Ok(PgValue::Float4(v as f32)),
        ("float8", v @ PgValue::Float8(_)) => Ok(v),
        ("float8", PgValue::Float4(v)) => Ok(PgValue::Float8(f64::from(v))),
        ("float8", PgValue::Int2(v)) => Ok(PgValue::Float8(f64::from(v))),
        ("float8", PgValue::Int4(v)) => Ok(PgValue::Float8(f64::from(v))),
        ("float8", PgValue::Int8(v)) => Ok(PgValue::Float8(v as f64)),
        ("float4" | "float8", PgValue::Numeric(s)) => {
            let oid = if target == "float4" {
                Oid::FLOAT4
            } else {
                Oid::FLOAT8
            };
            PgValue::decode_text(oid, s.as_bytes())
        }
        ("numeric", v @ PgValue::Numeric(_)) => Ok(v),
        ("numeric", PgValue::Int2(v)) => Ok(PgValue::Numeric(v.to_string())),
        ("numeric", PgValue::Int4(v)) => Ok(PgValue::Numeric(v.to_string())),
        ("numeric", PgValue::Int8(v)) => Ok(PgValue::Numeric(v.to_string())),
        ("bytea", v @ PgValue::Bytea(_)) => Ok(v),
        ("bytea", PgValue::Raw { data, .. }) => Ok(PgValue::Bytea(data)),
        ("uuid", v @ PgValue::Uuid(_)) => Ok(v),
        ("timestamp", v @ PgValue::Timestamp(_)) => Ok(v),
        ("date", v @ PgValue::Date(_)) => Ok(v),
        ("time", v @ PgValue::Time(_)) => Ok(v),
        ("interval", v @ PgValue::Interval { .. }) => Ok(v),
        ("json", v @ PgValue::Json(_)) => Ok(v),
        (_, v) => Err(mismatch(&v)),
    }
}

const DEFAULT_TARGETS: &[&str] = &[
    ANY, "bool", "int2", "int4", "int8", "float4", "float8", "text", "bytea", "uuid",
    "timestamp", "date", "time", "interval", "numeric", "json",
];

/// Reads typed values out of rows via the converter registry.
///
/// The registry is immutable once built. `RowReader::default_reader()`
/// covers the built-in types; `with_converters` extends or replaces them.
pub struct RowReader {
    converters: HashMap<String, Arc<dyn Converter>>,
}

impl RowReader {
    /// Reader with the default converters.
    pub fn new() -> Self {
        let mut converters: HashMap<String, Arc<dyn Converter>> = HashMap::new();
        for &target in DEFAULT_TARGETS {
            converters.insert(target.to_string(), Arc::new(ScalarConverter { target }));
        }
        Self { converters }
    }

    /// Reader with user converters; when `prepend_defaults` is set the
    /// defaults are registered first and the overrides win on collision.
    pub fn with_converters(
        overrides: HashMap<String, Arc<dyn Converter>>,
        prepend_defaults: bool,
    ) -> Self {
        let mut reader = if prepend_defaults {
            Self::new()
        } else {
            Self {
                converters: HashMap::with_capacity(overrides.len()),
            }
        };
        reader.converters.extend(overrides);
        reader
    }

    /// Shared reader with the default registry.
    pub fn default_reader() -> &'static RowReader {
        static DEFAULT: OnceLock<RowReader> = OnceLock::new();
        DEFAULT.get_or_init(RowReader::new)
    }

    /// Read a field by zero-based index.
    ///
    /// Rows without metadata (simple-protocol edge case) get a synthesized
    /// unspecified-type column.
    pub fn get(&self, row: &Row, index: usize, target: &str) -> PgResult<PgValue> {
        let raw = row.raw(index)?;
        match row.description() {
            Some(desc) => {
                let col = desc
                    .column(index)
                    .ok_or_else(|| {
                        PgError::ColumnNotPresent(format!("No column at index {}", index))
                    })?;
                self.convert(col, raw, target)
            }
            None => self.convert(&Column::unspecified(index), raw, target),
        }
    }

    /// Read a field by name (case-insensitive, first match wins).
    pub fn get_by_name(&self, row: &Row, name: &str, target: &str) -> PgResult<PgValue> {
        let desc = row.description().ok_or(PgError::MissingRowMeta)?;
        let col = desc
            .column_by_name(name)
            .ok_or_else(|| PgError::ColumnNotPresent(format!("No column for name {}", name)))?;
        let raw = row.raw(col.index)?;
        self.convert(col, raw, target)
    }

    /// Typed wrapper over `get`.
    pub fn get_as<T: FromValue>(&self, row: &Row, index: usize) -> PgResult<T> {
        T::from_value(self.get(row, index, &T::target())?)
    }

    /// Typed wrapper over `get_by_name`.
    pub fn get_as_by_name<T: FromValue>(&self, row: &Row, name: &str) -> PgResult<T> {
        T::from_value(self.get_by_name(row, name, &T::target())?)
    }

    /// Resolve a converter and decode; `None` raw is SQL NULL.
    pub fn convert(&self, col: &Column, raw: Option<&[u8]>, target: &str) -> PgResult<PgValue> {
        let raw = match raw {
            None => return Ok(PgValue::Null),
            Some(raw) => raw,
        };

        // Unconstrained target over an array column: parse the array and
        // propagate "any" to the components
        if target == ANY && col.type_oid.is_array() {
            return self.parse_array(col, raw, ANY);
        }

        if let Some(conv) = self.converters.get(target) {
            let value = conv.from_bytes(col, raw).map_err(|cause| {
                PgError::ConvertToFailed {
                    target: target.to_string(),
                    oid: col.type_oid.as_i32(),
                    cause: Box::new(cause),
                }
            })?;
            if value.is_null() {
                return Err(PgError::InvalidConvertDataType {
                    target: target.to_string(),
                    oid: col.type_oid.as_i32(),
                });
            }
            return Ok(value);
        }

        // No direct converter: an array-shaped target assembles from the
        // component converter
        if let Some(component) = target.strip_suffix("[]") {
            return self
                .parse_array(col, raw, component)
                .map_err(|cause| match cause {
                    wrapped @ PgError::ConvertToFailed { .. } => wrapped,
                    cause => PgError::ConvertToFailed {
                        target: target.to_string(),
                        oid: col.type_oid.as_i32(),
                        cause: Box::new(cause),
                    },
                });
        }

        Err(PgError::NoConversion(target.to_string()))
    }

    /// Encode a value for the given target, e.g. for Bind parameters.
    pub fn to_bytes(&self, target: &str, value: &PgValue) -> PgResult<(Format, Vec<u8>)> {
        match self.converters.get(target) {
            Some(conv) => conv.to_bytes(value),
            None => Err(PgError::NoConversion(target.to_string())),
        }
    }

    // ========================================================================
    // Array text format
    // ========================================================================

    /// Parse the PostgreSQL array text representation, converting each
    /// component with the converter for `component_target`.
    fn parse_array(&self, col: &Column, raw: &[u8], component_target: &str) -> PgResult<PgValue> {
        if col.format == Format::Binary {
            return Err(PgError::ProtocolViolation(
                "binary array format is not supported".to_string(),
            ));
        }
        let text = std::str::from_utf8(raw)
            .map_err(|e| PgError::ProtocolViolation(format!("Invalid UTF-8 in array: {}", e)))?;
        let chars: Vec<char> = text.chars().collect();
        let mut pos = 0usize;
        let value = self.read_array(col, &chars, &mut pos, component_target)?;
        if pos != chars.len() {
            return Err(PgError::ProtocolViolation(
                "Unexpected chars after array end".to_string(),
            ));
        }
        Ok(value)
    }

    fn read_array(
        &self,
        col: &Column,
        chars: &[char],
        pos: &mut usize,
        component_target: &str,
    ) -> PgResult<PgValue> {
        let violation = |msg: &str| PgError::ProtocolViolation(msg.to_string());

        if chars.get(*pos) != Some(&'{') {
            return Err(violation("Array must start with an opening brace"));
        }
        *pos += 1;
        skip_whitespace(chars, pos);

        let component_oid = col.type_oid.array_component().unwrap_or(Oid::UNSPECIFIED);
        let sub_col = col.child(component_oid);
        let mut out = Vec::new();
        let mut first = true;

        loop {
            match chars.get(*pos) {
                None => return Err(violation("Unexpected end of array")),
                Some('}') => {
                    *pos += 1;
                    return Ok(PgValue::Array(out));
                }
                Some(_) => {}
            }

            if !first {
                if chars[*pos] != ',' {
                    return Err(violation("Missing comma between array elements"));
                }
                *pos += 1;
                skip_whitespace(chars, pos);
            }
            first = false;

            let c = *chars.get(*pos).ok_or_else(|| violation("Unexpected end of array"))?;
            if c == 'N' && is_null_literal(chars, *pos) {
                out.push(PgValue::Null);
                *pos += 4;
            } else if c == '"' {
                let elem = read_quoted(chars, pos)?;
                out.push(self.convert(&sub_col, Some(elem.as_bytes()), component_target)?);
            } else if c == '{' {
                let sub_target = if component_target == ANY {
                    ANY
                } else if let Some(inner) = component_target.strip_suffix("[]") {
                    inner
                } else {
                    return Err(violation(
                        "Found sub-array but expected type is not an array type",
                    ));
                };
                let nested =
                    self.read_array(&col.child(Oid::UNSPECIFIED), chars, pos, sub_target)?;
                out.push(nested);
            } else {
                // Unquoted token runs to the next comma or closing brace
                let start = *pos;
                while *pos < chars.len() && chars[*pos] != ',' && chars[*pos] != '}' {
                    *pos += 1;
                }
                if *pos >= chars.len() {
                    return Err(violation("Unexpected value end"));
                }
                let token: String = chars[start..*pos].iter().collect();
                let token = token.trim_end();
                out.push(self.convert(&sub_col, Some(token.as_bytes()), component_target)?);
            }

            skip_whitespace(chars, pos);
        }
    }
}

impl Default for RowReader {
    fn default() -> Self {
        Self::new()
    }
}

/// `NULL` followed by a terminator (comma, closing brace, or whitespace).
fn is_null_literal(chars: &[char], pos: usize) -> bool {
    chars.len() > pos + 4
        && chars[pos + 1] == 'U'
        && chars[pos + 2] == 'L'
        && chars[pos + 3] == 'L'
        && (chars[pos + 4] == ',' || chars[pos + 4] == '}' || chars[pos + 4].is_whitespace())
}

/// Quoted string with backslash escapes; `pos` enters at the opening quote
/// and leaves past the closing one.
fn read_quoted(chars: &[char], pos: &mut usize) -> PgResult<String> {
    *pos += 1;
    let mut out = String::new();
    loop {
        match chars.get(*pos) {
            None => {
                return Err(PgError::ProtocolViolation(
                    "Unexpected end of quoted string".to_string(),
                ))
            }
            Some('"') => {
                *pos += 1;
                return Ok(out);
            }
            Some('\\') => {
                *pos += 1;
                let escaped = chars.get(*pos).ok_or_else(|| {
                    PgError::ProtocolViolation("Unexpected end of quoted string".to_string())
                })?;
                out.push(*escaped);
                *pos += 1;
            }
            Some(c) => {
                out.push(*c);
                *pos += 1;
            }
        }
    }
}

fn skip_whitespace(chars: &[char], pos: &mut usize) {
    while *pos < chars.len() && chars[*pos].is_whitespace() {
        *pos += 1;
    }
}

// ============================================================================
// Typed extraction
// ============================================================================

/// Conversion from a decoded `PgValue` into a Rust type, with the target
/// identifier used for registry lookup.
pub trait FromValue: Sized {
    fn target() -> Cow<'static, str>;
    fn from_value(value: PgValue) -> PgResult<Self>;
}

macro_rules! impl_from_value {
    ($ty:ty, $target:expr, $variant:ident) => {
        impl FromValue for $ty {
            fn target() -> Cow<'static, str> {
                Cow::Borrowed($target)
            }

            fn from_value(value: PgValue) -> PgResult<Self> {
                match value {
                    PgValue::$variant(v) => Ok(v),
                    other => Err(PgError::NoConversion(format!(
                        "{} from {:?}",
                        $target, other
                    ))),
                }
            }
        }
    };
}

impl_from_value!(bool, "bool", Bool);
impl_from_value!(i16, "int2", Int2);
impl_from_value!(i32, "int4", Int4);
impl_from_value!(i64, "int8", Int8);
impl_from_value!(f32, "float4", Float4);
impl_from_value!(f64, "float8", Float8);
impl_from_value!(String, "text", Text);
impl_from_value!(Vec<u8>, "bytea", Bytea);
impl_from_value!([u8; 16], "uuid", Uuid);

impl FromValue for PgValue {
    fn target() -> Cow<'static, str> {
        Cow::Borrowed(ANY)
    }

    fn from_value(value: PgValue) -> PgResult<Self> {
        Ok(value)
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn target() -> Cow<'static, str> {
        T::target()
    }

    fn from_value(value: PgValue) -> PgResult<Self> {
        match value {
            PgValue::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

macro_rules! impl_from_value_vec {
    ($($ty:ty),+) => {
        $(
            impl FromValue for Vec<$ty> {
                fn target() -> Cow<'static, str> {
                    Cow::Owned(format!("{}[]", <$ty as FromValue>::target()))
                }

                fn from_value(value: PgValue) -> PgResult<Self> {
                    match value {
                        PgValue::Array(elems) => {
                            elems.into_iter().map(<$ty as FromValue>::from_value).collect()
                        }
                        other => Err(PgError::NoConversion(format!(
                            "array from {:?}",
                            other
                        ))),
                    }
                }
            }

            impl FromValue for Vec<Option<$ty>> {
                fn target() -> Cow<'static, str> {
                    Cow::Owned(format!("{}[]", <$ty as FromValue>::target()))
                }

                fn from_value(value: PgValue) -> PgResult<Self> {
                    match value {
                        PgValue::Array(elems) => elems
                            .into_iter()
                            .map(<Option<$ty> as FromValue>::from_value)
                            .collect(),
                        other => Err(PgError::NoConversion(format!(
                            "array from {:?}",
                            other
                        ))),
                    }
                }
            }
        )+
    };
}

impl_from_value_vec!(bool, i16, i32, i64, f32, f64, String);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::RowDescription;
    use bytes::Bytes;
    use std::sync::Arc;

    fn text_col(type_oid: Oid) -> Column {
        Column {
            index: 0,
            name: "value".to_string(),
            table_oid: 0,
            column_attr: 0,
            type_oid,
            type_size: -1,
            type_modifier: -1,
            format: Format::Text,
        }
    }

    fn reader() -> &'static RowReader {
        RowReader::default_reader()
    }

    #[test]
    fn null_raw_yields_null_for_every_converter() {
        let col = text_col(Oid::INT4);
        for target in DEFAULT_TARGETS {
            let value = reader().convert(&col, None, target).unwrap();
            assert!(value.is_null(), "target {}", target);
        }
        assert!(reader().convert(&col, None, "int4[]").unwrap().is_null());
    }

    #[test]
    fn scalar_conversion_from_text() {
        let col = text_col(Oid::INT4);
        assert_eq!(
            reader().convert(&col, Some(b"42"), "int4").unwrap(),
            PgValue::Int4(42)
        );
        assert_eq!(
            reader().convert(&col, Some(b"42"), "int8").unwrap(),
            PgValue::Int8(42)
        );
        assert_eq!(
            reader().convert(&col, Some(b"42"), "text").unwrap(),
            PgValue::Text("42".to_string())
        );
    }

    #[test]
    fn unknown_target_is_no_conversion() {
        let col = text_col(Oid::INT4);
        assert!(matches!(
            reader().convert(&col, Some(b"42"), "point"),
            Err(PgError::NoConversion(_))
        ));
    }

    #[test]
    fn narrowing_out_of_range_fails() {
        let col = Column {
            format: Format::Binary,
            ..text_col(Oid::INT8)
        };
        let raw = 100_000i64.to_be_bytes();
        assert!(matches!(
            reader().convert(&col, Some(&raw), "int2"),
            Err(PgError::ConvertToFailed { .. })
        ));
    }

    #[test]
    fn array_simple() {
        let col = text_col(Oid::INT4_ARRAY);
        let value = reader().convert(&col, Some(b"{1,2,3}"), "int4[]").unwrap();
        assert_eq!(
            value,
            PgValue::Array(vec![PgValue::Int4(1), PgValue::Int4(2), PgValue::Int4(3)])
        );
    }

    #[test]
    fn array_with_nulls_and_quotes() {
        let col = text_col(Oid::TEXT_ARRAY);
        let value = reader()
            .convert(&col, Some(br#"{a,NULL,"with,comma","esc\"q\\b"}"#), "text[]")
            .unwrap();
        assert_eq!(
            value,
            PgValue::Array(vec![
                PgValue::Text("a".to_string()),
                PgValue::Null,
                PgValue::Text("with,comma".to_string()),
                PgValue::Text("esc\"q\\b".to_string()),
            ])
        );
    }

    #[test]
    fn array_quoted_element_follows_component_type() {
        // {1,2,NULL,"4,5"}: the quoted element is one token; whether it
        // decodes depends on the requested component type
        let col = text_col(Oid::INT4_ARRAY);
        let raw: &[u8] = br#"{1,2,NULL,"4,5"}"#;

        assert!(matches!(
            reader().convert(&col, Some(raw), "int4[]"),
            Err(PgError::ConvertToFailed { .. })
        ));

        let as_text = reader().convert(&col, Some(raw), "text[]").unwrap();
        assert_eq!(
            as_text,
            PgValue::Array(vec![
                PgValue::Text("1".to_string()),
                PgValue::Text("2".to_string()),
                PgValue::Null,
                PgValue::Text("4,5".to_string()),
            ])
        );
    }

    #[test]
    fn array_quoted_null_is_a_value() {
        let col = text_col(Oid::TEXT_ARRAY);
        let value = reader()
            .convert(&col, Some(br#"{"NULL",NULL}"#), "text[]")
            .unwrap();
        assert_eq!(
            value,
            PgValue::Array(vec![PgValue::Text("NULL".to_string()), PgValue::Null])
        );
    }

    #[test]
    fn array_nested() {
        let col = text_col(Oid::INT4_ARRAY);
        let value = reader()
            .convert(&col, Some(b"{{1,2},{3,4}}"), "int4[][]")
            .unwrap();
        assert_eq!(
            value,
            PgValue::Array(vec![
                PgValue::Array(vec![PgValue::Int4(1), PgValue::Int4(2)]),
                PgValue::Array(vec![PgValue::Int4(3), PgValue::Int4(4)]),
            ])
        );
    }

    #[test]
    fn array_whitespace_between_tokens() {
        let col = text_col(Oid::INT4_ARRAY);
        let value = reader()
            .convert(&col, Some(b"{ 1 , 2 , NULL , 4 }"), "int4[]")
            .unwrap();
        assert_eq!(
            value,
            PgValue::Array(vec![
                PgValue::Int4(1),
                PgValue::Int4(2),
                PgValue::Null,
                PgValue::Int4(4),
            ])
        );
    }

    #[test]
    fn array_trailing_garbage_rejected() {
        let col = text_col(Oid::INT4_ARRAY);
        assert!(reader().convert(&col, Some(b"{1,2}x"), "int4[]").is_err());
        assert!(reader().convert(&col, Some(b"{1,2}}"), "int4[]").is_err());
        assert!(reader().convert(&col, Some(b"{1,2"), "int4[]").is_err());
        assert!(reader().convert(&col, Some(b"1,2}"), "int4[]").is_err());
    }

    #[test]
    fn array_scalar_target_rejects_sub_array() {
        let col = text_col(Oid::INT4_ARRAY);
        assert!(reader().convert(&col, Some(b"{{1},{2}}"), "int4[]").is_err());
    }

    #[test]
    fn any_target_follows_column_type() {
        let col = text_col(Oid::INT4_ARRAY);
        let value = reader().convert(&col, Some(b"{1,NULL}"), ANY).unwrap();
        assert_eq!(value, PgValue::Array(vec![PgValue::Int4(1), PgValue::Null]));

        let nested = reader().convert(&col, Some(b"{{1},{2}}"), ANY).unwrap();
        assert_eq!(
            nested,
            PgValue::Array(vec![
                PgValue::Array(vec![PgValue::Text("1".to_string())]),
                PgValue::Array(vec![PgValue::Text("2".to_string())]),
            ])
        );
    }

    #[test]
    fn array_roundtrip_through_text() {
        let original = PgValue::Array(vec![
            PgValue::Text("plain".to_string()),
            PgValue::Null,
            PgValue::Text("needs \"quoting\", badly\\".to_string()),
        ]);
        let encoded = original.encode_text();
        let col = text_col(Oid::TEXT_ARRAY);
        let decoded = reader()
            .convert(&col, Some(encoded.as_bytes()), "text[]")
            .unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn nested_array_roundtrip_through_text() {
        let original = PgValue::Array(vec![
            PgValue::Array(vec![PgValue::Int4(1), PgValue::Null]),
            PgValue::Array(vec![PgValue::Int4(3), PgValue::Int4(4)]),
        ]);
        let encoded = original.encode_text();
        let col = text_col(Oid::INT4_ARRAY);
        let decoded = reader()
            .convert(&col, Some(encoded.as_bytes()), "int4[][]")
            .unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn row_reader_by_name_and_index() {
        let desc = Arc::new(RowDescription::new(vec![Column {
            index: 0,
            name: "PID".to_string(),
            table_oid: 0,
            column_attr: 0,
            type_oid: Oid::INT4,
            type_size: 4,
            type_modifier: -1,
            format: Format::Text,
        }]));
        let row = Row::new(Some(desc), vec![Some(Bytes::from_static(b"7"))]);

        assert_eq!(
            reader().get_by_name(&row, "pid", "int4").unwrap(),
            PgValue::Int4(7)
        );
        assert_eq!(reader().get(&row, 0, "int4").unwrap(), PgValue::Int4(7));
        assert!(matches!(
            reader().get_by_name(&row, "other", "int4"),
            Err(PgError::ColumnNotPresent(_))
        ));

        let value: i32 = reader().get_as(&row, 0).unwrap();
        assert_eq!(value, 7);
        let named: Option<i32> = reader().get_as_by_name(&row, "pid").unwrap();
        assert_eq!(named, Some(7));
    }

    #[test]
    fn row_without_meta_uses_unspecified_column() {
        let row = Row::new(None, vec![Some(Bytes::from_static(b"11"))]);
        assert_eq!(reader().get(&row, 0, "int4").unwrap(), PgValue::Int4(11));
        assert!(matches!(
            reader().get_by_name(&row, "x", "int4"),
            Err(PgError::MissingRowMeta)
        ));
    }

    #[test]
    fn typed_vec_extraction() {
        let col = text_col(Oid::INT4_ARRAY);
        let row = Row::new(
            Some(Arc::new(RowDescription::new(vec![col]))),
            vec![Some(Bytes::from_static(b"{1,2,NULL}"))],
        );
        let values: Vec<Option<i32>> = reader().get_as(&row, 0).unwrap();
        assert_eq!(values, vec![Some(1), Some(2), None]);
    }
}
