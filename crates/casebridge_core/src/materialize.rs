//! Result materialization.
//!
//! Rows bind to records by position: a [`FromRow`] implementation reads its
//! fields in order through a [`RowReader`]. A store null becomes `None` for
//! `Option<T>` fields and an error for anything else, so "unknown" never
//! turns into a zero value.

use crate::error::{MaterializeError, MaterializeResult};
use crate::store::ResultRow;
use crate::types::StoreValue;
use chrono::NaiveDateTime;
use std::marker::PhantomData;
use uuid::Uuid;

/// Field types that can be read from a raw column value.
pub trait FromStoreValue: Sized {
    /// Rust type name used in mismatch errors.
    const TYPE_NAME: &'static str;

    /// Converts a non-null value, returning `None` on a type mismatch.
    fn from_value(value: &StoreValue) -> Option<Self>;

    /// Converts a column value, treating null as absent only for `Option<T>`.
    fn from_column(value: &StoreValue, column: &str, position: usize) -> MaterializeResult<Self> {
        let Some(found) = value.sql_type() else {
            return Err(MaterializeError::UnexpectedNull {
                column: column.to_string(),
                position,
            });
        };
        Self::from_value(value).ok_or_else(|| MaterializeError::TypeMismatch {
            column: column.to_string(),
            position,
            expected: Self::TYPE_NAME,
            found,
        })
    }
}

macro_rules! from_store_value {
    ($ty:ty, $name:literal, $($pat:pat => $out:expr),+ $(,)?) => {
        impl FromStoreValue for $ty {
            const TYPE_NAME: &'static str = $name;

            fn from_value(value: &StoreValue) -> Option<Self> {
                match value {
                    $($pat => Some($out),)+
                    _ => None,
                }
            }
        }
    };
}

from_store_value!(bool, "bool", StoreValue::Bool(b) => *b);
from_store_value!(i32, "i32", StoreValue::Int(n) => *n);
from_store_value!(i64, "i64", StoreValue::BigInt(n) => *n, StoreValue::Int(n) => i64::from(*n));
from_store_value!(f64, "f64", StoreValue::Float(n) => *n);
from_store_value!(String, "String", StoreValue::Text(s) => s.clone());
from_store_value!(Vec<u8>, "Vec<u8>", StoreValue::Binary(b) => b.clone());
from_store_value!(NaiveDateTime, "NaiveDateTime", StoreValue::DateTime(d) => *d);
from_store_value!(Uuid, "Uuid", StoreValue::Guid(g) => *g);

impl<T: FromStoreValue> FromStoreValue for Option<T> {
    const TYPE_NAME: &'static str = T::TYPE_NAME;

    fn from_value(value: &StoreValue) -> Option<Self> {
        T::from_value(value).map(Some)
    }

    fn from_column(value: &StoreValue, column: &str, position: usize) -> MaterializeResult<Self> {
        if value.is_null() {
            return Ok(None);
        }
        T::from_column(value, column, position).map(Some)
    }
}

/// Reads the columns of one row in order.
#[derive(Debug)]
pub struct RowReader<'a> {
    row: &'a ResultRow,
    position: usize,
}

impl<'a> RowReader<'a> {
    /// Creates a reader positioned at the first column.
    pub fn new(row: &'a ResultRow) -> Self {
        Self { row, position: 0 }
    }

    /// Reads the next column as `T`.
    pub fn next<T: FromStoreValue>(&mut self) -> MaterializeResult<T> {
        let position = self.position;
        let (column, value) =
            self.row
                .column(position)
                .ok_or(MaterializeError::MissingColumn {
                    position,
                    available: self.row.len(),
                })?;
        self.position += 1;
        T::from_column(value, column, position)
    }

    /// Returns the underlying row.
    pub fn row(&self) -> &'a ResultRow {
        self.row
    }

    /// Returns the number of columns not yet read.
    pub fn remaining(&self) -> usize {
        self.row.len().saturating_sub(self.position)
    }
}

/// Records that can be built from a result row.
///
/// # Example
///
/// ```
/// use casebridge_core::{FromRow, MaterializeResult, RowReader};
///
/// struct CaseRef {
///     case_id: i32,
///     title: Option<String>,
/// }
///
/// impl FromRow for CaseRef {
///     fn from_row(row: &mut RowReader<'_>) -> MaterializeResult<Self> {
///         Ok(Self {
///             case_id: row.next()?,
///             title: row.next()?,
///         })
///     }
/// }
/// ```
pub trait FromRow: Sized {
    /// Builds the record, reading fields in column order.
    fn from_row(row: &mut RowReader<'_>) -> MaterializeResult<Self>;
}

impl FromRow for ResultRow {
    fn from_row(row: &mut RowReader<'_>) -> MaterializeResult<Self> {
        Ok(row.row().clone())
    }
}

/// Materializes a single row.
pub fn materialize<T: FromRow>(row: &ResultRow) -> MaterializeResult<T> {
    T::from_row(&mut RowReader::new(row))
}

/// A lazy, single-pass sequence of records.
///
/// Each row is materialized when the iterator reaches it and is dropped
/// afterwards. The sequence cannot be restarted.
#[derive(Debug)]
pub struct Records<T> {
    rows: std::vec::IntoIter<ResultRow>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: FromRow> Records<T> {
    /// Wraps an owned row set.
    pub fn new(rows: Vec<ResultRow>) -> Self {
        Self {
            rows: rows.into_iter(),
            _marker: PhantomData,
        }
    }

    /// Materializes every remaining row, stopping at the first failure.
    pub fn try_collect(self) -> MaterializeResult<Vec<T>> {
        self.collect()
    }
}

impl<T: FromRow> Iterator for Records<T> {
    type Item = MaterializeResult<T>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rows.next().map(|row| materialize(&row))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.rows.size_hint()
    }
}

impl<T: FromRow> ExactSizeIterator for Records<T> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SqlType;

    #[derive(Debug, PartialEq)]
    struct CaseRow {
        case_id: i32,
        owner_id: Option<i32>,
        title: String,
    }

    impl FromRow for CaseRow {
        fn from_row(row: &mut RowReader<'_>) -> MaterializeResult<Self> {
            Ok(Self {
                case_id: row.next()?,
                owner_id: row.next()?,
                title: row.next()?,
            })
        }
    }

    fn row(case_id: i32, owner: StoreValue, title: StoreValue) -> ResultRow {
        ResultRow::new()
            .with("caseId", StoreValue::Int(case_id))
            .with("ownerId", owner)
            .with("title", title)
    }

    #[test]
    fn null_maps_to_none_not_zero() {
        let record: CaseRow =
            materialize(&row(1, StoreValue::Null, StoreValue::Text("Audit".into()))).unwrap();
        assert_eq!(record.owner_id, None);

        let record: CaseRow =
            materialize(&row(1, StoreValue::Int(0), StoreValue::Text("Audit".into()))).unwrap();
        assert_eq!(record.owner_id, Some(0));
    }

    #[test]
    fn null_in_required_field_is_an_error() {
        let err = materialize::<CaseRow>(&row(1, StoreValue::Null, StoreValue::Null)).unwrap_err();
        assert_eq!(
            err,
            MaterializeError::UnexpectedNull {
                column: "title".into(),
                position: 2
            }
        );
    }

    #[test]
    fn type_mismatch_reports_column() {
        let err = materialize::<CaseRow>(&row(
            1,
            StoreValue::Text("seven".into()),
            StoreValue::Text("x".into()),
        ))
        .unwrap_err();
        assert!(matches!(
            err,
            MaterializeError::TypeMismatch {
                position: 1,
                expected: "i32",
                found: SqlType::Text,
                ..
            }
        ));
    }

    #[test]
    fn short_row_is_missing_column() {
        let short = ResultRow::new().with("caseId", StoreValue::Int(1));
        assert!(matches!(
            materialize::<CaseRow>(&short),
            Err(MaterializeError::MissingColumn {
                position: 1,
                available: 1
            })
        ));
    }

    #[test]
    fn int_widens_to_i64() {
        let r = ResultRow::new().with("n", StoreValue::Int(5));
        let mut reader = RowReader::new(&r);
        assert_eq!(reader.next::<i64>().unwrap(), 5);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn records_are_lazy_and_single_pass() {
        let rows = vec![
            row(1, StoreValue::Null, StoreValue::Text("a".into())),
            row(2, StoreValue::Int(9), StoreValue::Null),
            row(3, StoreValue::Null, StoreValue::Text("c".into())),
        ];
        let mut records: Records<CaseRow> = Records::new(rows);
        assert_eq!(records.len(), 3);

        assert_eq!(records.next().unwrap().unwrap().case_id, 1);
        assert!(records.next().unwrap().is_err());
        assert_eq!(records.next().unwrap().unwrap().case_id, 3);
        assert!(records.next().is_none());
    }

    #[test]
    fn raw_rows_pass_through() {
        let original = row(4, StoreValue::Null, StoreValue::Text("d".into()));
        let copy: ResultRow = materialize(&original).unwrap();
        assert_eq!(copy, original);
    }
}
