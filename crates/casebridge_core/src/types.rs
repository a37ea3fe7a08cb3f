//! Wire-level types shared by the marshaler, the store and the materializer.

use chrono::NaiveDateTime;
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// Declared type tag of a procedure parameter or result column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SqlType {
    /// Boolean flag.
    Bool,
    /// 32-bit signed integer.
    Int,
    /// 64-bit signed integer.
    BigInt,
    /// 64-bit float.
    Float,
    /// Unicode text.
    Text,
    /// Raw bytes.
    Binary,
    /// Date and time without zone.
    DateTime,
    /// 128-bit unique identifier.
    Guid,
}

impl SqlType {
    /// Returns the storage width in bytes for fixed-width types.
    pub fn fixed_width(self) -> Option<u32> {
        match self {
            SqlType::Bool => Some(1),
            SqlType::Int => Some(4),
            SqlType::BigInt | SqlType::Float | SqlType::DateTime => Some(8),
            SqlType::Guid => Some(16),
            SqlType::Text | SqlType::Binary => None,
        }
    }

    /// Returns true for text and binary types, whose size is declared per parameter.
    pub fn is_variable_length(self) -> bool {
        self.fixed_width().is_none()
    }

    /// Returns the size a parameter of this type gets when none is declared.
    pub fn default_size(self) -> ParamSize {
        match self.fixed_width() {
            Some(width) => ParamSize::Bounded(width),
            None => ParamSize::Unbounded,
        }
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SqlType::Bool => "bool",
            SqlType::Int => "int",
            SqlType::BigInt => "bigint",
            SqlType::Float => "float",
            SqlType::Text => "text",
            SqlType::Binary => "binary",
            SqlType::DateTime => "datetime",
            SqlType::Guid => "guid",
        };
        f.write_str(name)
    }
}

/// Declared maximum size of a parameter.
///
/// Text sizes count characters, binary sizes count bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamSize {
    /// At most this many units.
    Bounded(u32),
    /// No declared maximum; bound with a streaming encoding.
    Unbounded,
}

impl ParamSize {
    /// Returns true if a value of `len` units fits.
    pub fn admits(self, len: usize) -> bool {
        match self {
            ParamSize::Bounded(max) => len <= max as usize,
            ParamSize::Unbounded => true,
        }
    }
}

impl fmt::Display for ParamSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamSize::Bounded(n) => write!(f, "{n}"),
            ParamSize::Unbounded => f.write_str("max"),
        }
    }
}

/// Direction of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Supplied by the caller.
    Input,
    /// Produced by the store, read after execution.
    Output,
}

/// How a bound value travels to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Sent in-line with the declared length.
    Inline,
    /// Sent as a length-unbounded stream (text/binary with `ParamSize::Unbounded`).
    Streamed,
}

/// A raw value exchanged with the store.
///
/// `Null` is the typed null sentinel: the surrounding parameter or column
/// carries the type, the value carries only "no value".
#[derive(Debug, Clone, PartialEq)]
pub enum StoreValue {
    /// No value.
    Null,
    /// Boolean flag.
    Bool(bool),
    /// 32-bit signed integer.
    Int(i32),
    /// 64-bit signed integer.
    BigInt(i64),
    /// 64-bit float.
    Float(f64),
    /// Unicode text.
    Text(String),
    /// Raw bytes.
    Binary(Vec<u8>),
    /// Date and time without zone.
    DateTime(NaiveDateTime),
    /// Unique identifier.
    Guid(Uuid),
}

impl StoreValue {
    /// Returns true for the null sentinel.
    pub fn is_null(&self) -> bool {
        matches!(self, StoreValue::Null)
    }

    /// Returns the type of a non-null value.
    pub fn sql_type(&self) -> Option<SqlType> {
        match self {
            StoreValue::Null => None,
            StoreValue::Bool(_) => Some(SqlType::Bool),
            StoreValue::Int(_) => Some(SqlType::Int),
            StoreValue::BigInt(_) => Some(SqlType::BigInt),
            StoreValue::Float(_) => Some(SqlType::Float),
            StoreValue::Text(_) => Some(SqlType::Text),
            StoreValue::Binary(_) => Some(SqlType::Binary),
            StoreValue::DateTime(_) => Some(SqlType::DateTime),
            StoreValue::Guid(_) => Some(SqlType::Guid),
        }
    }

    /// Returns the length in size units for text (characters) and binary (bytes).
    pub fn length(&self) -> Option<usize> {
        match self {
            StoreValue::Text(s) => Some(s.chars().count()),
            StoreValue::Binary(b) => Some(b.len()),
            _ => None,
        }
    }

    /// Returns the value as an `i64` if it is an integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            StoreValue::Int(n) => Some(i64::from(*n)),
            StoreValue::BigInt(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the value as text if it is text.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            StoreValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_width_types_have_default_bounded_size() {
        assert_eq!(SqlType::Int.default_size(), ParamSize::Bounded(4));
        assert_eq!(SqlType::BigInt.default_size(), ParamSize::Bounded(8));
        assert_eq!(SqlType::Guid.default_size(), ParamSize::Bounded(16));
        assert_eq!(SqlType::Text.default_size(), ParamSize::Unbounded);
        assert!(SqlType::Binary.is_variable_length());
    }

    #[test]
    fn size_admits() {
        assert!(ParamSize::Bounded(5).admits(5));
        assert!(!ParamSize::Bounded(5).admits(6));
        assert!(ParamSize::Unbounded.admits(usize::MAX));
    }

    #[test]
    fn text_length_counts_characters() {
        let value = StoreValue::Text("déjà vu".into());
        assert_eq!(value.length(), Some(7));
        assert_eq!(StoreValue::Binary(vec![0; 3]).length(), Some(3));
        assert_eq!(StoreValue::Int(3).length(), None);
    }

    #[test]
    fn null_has_no_type() {
        assert!(StoreValue::Null.is_null());
        assert_eq!(StoreValue::Null.sql_type(), None);
        assert_eq!(StoreValue::Int(0).sql_type(), Some(SqlType::Int));
        assert!(!StoreValue::Int(0).is_null());
    }
}
