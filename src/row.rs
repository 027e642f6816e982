//! Row data model: column descriptors, row descriptions, raw rows.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;

use crate::convert::{FromValue, RowReader};
use crate::error::{PgError, PgResult};
use crate::types::{Format, Oid};

/// One column of a result set, as described by RowDescription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Zero-based position within the row
    pub index: usize,
    /// Column name as returned by the server
    pub name: String,
    /// OID of the source table, 0 if none
    pub table_oid: i32,
    /// Attribute number within the source table, 0 if none
    pub column_attr: i16,
    /// Data type OID
    pub type_oid: Oid,
    /// Type size; negative means variable length
    pub type_size: i16,
    /// Type modifier
    pub type_modifier: i32,
    /// Wire format of the values in this column
    pub format: Format,
}

impl Column {
    /// Placeholder column for rows without metadata (simple-protocol edge
    /// case) and for unconstrained targets.
    pub fn unspecified(index: usize) -> Self {
        Self {
            index,
            name: String::new(),
            table_oid: 0,
            column_attr: 0,
            type_oid: Oid::UNSPECIFIED,
            type_size: 0,
            type_modifier: 0,
            format: Format::Text,
        }
    }

    /// Derive a column for an element of this column, e.g. the component of
    /// an array. Text format: array elements are re-encoded text tokens.
    pub fn child(&self, type_oid: Oid) -> Self {
        Self {
            index: self.index,
            name: self.name.clone(),
            table_oid: self.table_oid,
            column_attr: self.column_attr,
            type_oid,
            type_size: 0,
            type_modifier: 0,
            format: Format::Text,
        }
    }
}

/// Ordered column descriptors plus a case-folded name index, built once.
///
/// Names need not be unique; lookup returns the first match.
#[derive(Debug, Clone)]
pub struct RowDescription {
    columns: Vec<Column>,
    by_name: HashMap<String, usize>,
}

impl RowDescription {
    pub fn new(columns: Vec<Column>) -> Self {
        let mut by_name = HashMap::with_capacity(columns.len());
        for col in &columns {
            by_name.entry(col.name.to_lowercase()).or_insert(col.index);
        }
        Self { columns, by_name }
    }

    pub fn empty() -> Arc<Self> {
        Arc::new(Self::new(Vec::new()))
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn column(&self, index: usize) -> Option<&Column> {
        self.columns.get(index)
    }

    /// Case-insensitive lookup; first column with the folded name wins.
    pub fn column_by_name(&self, name: &str) -> Option<&Column> {
        self.by_name
            .get(&name.to_lowercase())
            .map(|&idx| &self.columns[idx])
    }
}

/// One row of raw field payloads; `None` marks SQL NULL.
///
/// Immutable after assembly. Decoding is the row reader's business.
#[derive(Debug, Clone)]
pub struct Row {
    description: Option<Arc<RowDescription>>,
    raw: Vec<Option<Bytes>>,
}

impl Row {
    pub fn new(description: Option<Arc<RowDescription>>, raw: Vec<Option<Bytes>>) -> Self {
        debug_assert!(description
            .as_ref()
            .map(|d| d.len() == raw.len())
            .unwrap_or(true));
        Self { description, raw }
    }

    pub fn description(&self) -> Option<&Arc<RowDescription>> {
        self.description.as_ref()
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Raw payload of a field; `Ok(None)` is SQL NULL.
    pub fn raw(&self, index: usize) -> PgResult<Option<&[u8]>> {
        self.raw
            .get(index)
            .map(|v| v.as_deref())
            .ok_or_else(|| PgError::ColumnNotPresent(format!("No column at index {}", index)))
    }

    /// Decode a field by index with the default reader.
    pub fn get<T: FromValue>(&self, index: usize) -> PgResult<T> {
        RowReader::default_reader().get_as(self, index)
    }

    /// Decode a field by name with the default reader (case-insensitive,
    /// first match).
    pub fn get_by_name<T: FromValue>(&self, name: &str) -> PgResult<T> {
        RowReader::default_reader().get_as_by_name(self, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(index: usize, name: &str, type_oid: Oid) -> Column {
        Column {
            index,
            name: name.to_string(),
            table_oid: 0,
            column_attr: 0,
            type_oid,
            type_size: 4,
            type_modifier: -1,
            format: Format::Text,
        }
    }

    #[test]
    fn name_lookup_is_case_insensitive() {
        let desc = RowDescription::new(vec![col(0, "ID", Oid::INT4), col(1, "Name", Oid::TEXT)]);
        assert_eq!(desc.column_by_name("id").unwrap().index, 0);
        assert_eq!(desc.column_by_name("NAME").unwrap().index, 1);
        assert!(desc.column_by_name("missing").is_none());
    }

    #[test]
    fn duplicate_names_resolve_to_first() {
        let desc = RowDescription::new(vec![
            col(0, "v", Oid::INT4),
            col(1, "V", Oid::TEXT),
            col(2, "v", Oid::BOOL),
        ]);
        assert_eq!(desc.column_by_name("v").unwrap().index, 0);
        assert_eq!(desc.column_by_name("V").unwrap().index, 0);
    }

    #[test]
    fn raw_access_bounds_checked() {
        let row = Row::new(None, vec![Some(Bytes::from_static(b"1")), None]);
        assert_eq!(row.raw(0).unwrap(), Some(&b"1"[..]));
        assert_eq!(row.raw(1).unwrap(), None);
        assert!(matches!(
            row.raw(2),
            Err(PgError::ColumnNotPresent(_))
        ));
    }
}
