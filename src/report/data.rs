//! Cell values and rows as read from the result database.

use indexmap::IndexMap;
use rusqlite::types::ValueRef;

/// A single cell value.
///
/// `Absent` is distinct from the empty string and from zero.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Cell {
    #[default]
    Absent,
    Int(i64),
    Float(f64),
    Text(String),
}

impl Cell {
    pub fn is_absent(&self) -> bool {
        matches!(self, Cell::Absent)
    }

    /// Returns the text content, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Cell::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Whether the cell carries no usable value for substitution.
    pub fn is_blank(&self) -> bool {
        match self {
            Cell::Absent => true,
            Cell::Text(s) => s.is_empty() || s == "{}",
            _ => false,
        }
    }

    /// Numeric interpretation of the cell, parsing text where possible.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Int(i) => Some(*i as f64),
            Cell::Float(f) => Some(*f),
            Cell::Text(s) => s.trim().parse().ok(),
            Cell::Absent => None,
        }
    }

    /// Convert into a JSON value; `Absent` becomes `null`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Cell::Absent => serde_json::Value::Null,
            Cell::Int(i) => serde_json::Value::from(*i),
            Cell::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Cell::Text(s) => serde_json::Value::String(s.clone()),
        }
    }

    /// Convert from a JSON value as produced by gene summarizers.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Cell::Absent,
            serde_json::Value::Bool(b) => Cell::Int(i64::from(*b)),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Cell::Int(i),
                None => n.as_f64().map(Cell::Float).unwrap_or(Cell::Absent),
            },
            serde_json::Value::String(s) => Cell::Text(s.clone()),
            other => Cell::Text(other.to_string()),
        }
    }
}

impl std::fmt::Display for Cell {
    /// Formats the cell for text output, `Absent` as the empty string.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Cell::Absent => Ok(()),
            Cell::Int(i) => write!(f, "{}", i),
            Cell::Float(v) => write!(f, "{}", v),
            Cell::Text(s) => write!(f, "{}", s),
        }
    }
}

impl serde::Serialize for Cell {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            Cell::Absent => serializer.serialize_none(),
            Cell::Int(i) => serializer.serialize_i64(*i),
            Cell::Float(f) => serializer.serialize_f64(*f),
            Cell::Text(s) => serializer.serialize_str(s),
        }
    }
}

impl From<ValueRef<'_>> for Cell {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Cell::Absent,
            ValueRef::Integer(i) => Cell::Int(i),
            ValueRef::Real(f) => Cell::Float(f),
            ValueRef::Text(t) => Cell::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Cell::Text(String::from_utf8_lossy(b).into_owned()),
        }
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::Text(value.to_string())
    }
}

impl From<String> for Cell {
    fn from(value: String) -> Self {
        Cell::Text(value)
    }
}

impl From<i64> for Cell {
    fn from(value: i64) -> Self {
        Cell::Int(value)
    }
}

/// One data record, column name to value.
pub type Row = IndexMap<String, Cell>;

/// Read a cell from a row; missing keys read as `Absent`.
pub fn cell<'a>(row: &'a Row, name: &str) -> &'a Cell {
    static ABSENT: Cell = Cell::Absent;
    row.get(name).unwrap_or(&ABSENT)
}
