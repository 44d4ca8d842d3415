//! ClickHouse Row Helpers
//!
//! A `Row` is one materialized row of a result set: the values in column
//! order plus the shared column names.

use crate::error::{ChError, ChResult};
use crate::types::{ChRow, FromRow, FromValue, TypeError, Value};
use std::sync::Arc;

/// One row of a result set.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub(crate) columns: Arc<[String]>,
    pub(crate) values: Vec<Value>,
}

fn column_error(column: &str, e: TypeError) -> ChError {
    ChError::mismatch(column, e.expected(), e.got())
}

impl Row {
    pub fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    /// Get a raw value by position.
    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }

    /// Get a raw value by column name.
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.get(self.column_index(name)?)
    }

    /// Find column index by name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Convert the value at `idx` into `T`.
    pub fn try_get<T: FromValue>(&self, idx: usize) -> ChResult<T> {
        let value = self.values.get(idx).ok_or(ChError::ColumnCountMismatch {
            expected: idx + 1,
            got: self.values.len(),
        })?;
        T::from_value(value.clone()).map_err(|e| column_error(&self.columns[idx], e))
    }

    /// Convert the value of column `name` into `T`.
    pub fn try_get_by_name<T: FromValue>(&self, name: &str) -> ChResult<T> {
        let idx = self
            .column_index(name)
            .ok_or_else(|| ChError::mismatch(name, "existing column", "no such column"))?;
        self.try_get(idx)
    }

    /// Scan the row by position into a tuple with one element per column.
    pub fn scan<T: FromRow>(&self) -> ChResult<T> {
        if T::WIDTH != self.values.len() {
            return Err(ChError::ColumnCountMismatch {
                expected: self.values.len(),
                got: T::WIDTH,
            });
        }
        T::from_row(self.values.clone()).map_err(|(idx, e)| column_error(&self.columns[idx], e))
    }

    /// Map the row onto a struct by column name.
    pub fn scan_struct<T: ChRow>(&self) -> ChResult<T> {
        T::from_row(self)
    }

    /// Check if a column is NULL. Missing columns count as NULL.
    pub fn is_null(&self, idx: usize) -> bool {
        self.values.get(idx).is_none_or(Value::is_null)
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Get a column value as String.
    pub fn get_string(&self, idx: usize) -> Option<String> {
        self.try_get(idx).ok()
    }

    /// Get a column value as i64.
    pub fn get_i64(&self, idx: usize) -> Option<i64> {
        self.try_get(idx).ok()
    }

    /// Get a column value as u64.
    pub fn get_u64(&self, idx: usize) -> Option<u64> {
        self.try_get(idx).ok()
    }

    /// Get a column value as f64.
    pub fn get_f64(&self, idx: usize) -> Option<f64> {
        self.try_get(idx).ok()
    }

    /// Get a column value as bool.
    pub fn get_bool(&self, idx: usize) -> Option<bool> {
        self.try_get(idx).ok()
    }

    pub fn get_string_by_name(&self, name: &str) -> Option<String> {
        self.try_get_by_name(name).ok()
    }

    pub fn get_i64_by_name(&self, name: &str) -> Option<i64> {
        self.try_get_by_name(name).ok()
    }

    pub fn get_u64_by_name(&self, name: &str) -> Option<u64> {
        self.try_get_by_name(name).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> Row {
        Row::new(
            Arc::from(vec!["id".to_string(), "name".to_string(), "note".to_string()]),
            vec![
                Value::UInt64(7),
                Value::String("seven".to_string()),
                Value::Null,
            ],
        )
    }

    #[test]
    fn test_positional_access() {
        let row = row();
        assert_eq!(row.get_u64(0), Some(7));
        assert_eq!(row.get_string(1), Some("seven".to_string()));
        assert!(row.is_null(2));
        assert!(row.is_null(9));
        assert_eq!(row.column_index("name"), Some(1));
        assert_eq!(row.get_string_by_name("name"), Some("seven".to_string()));
    }

    #[test]
    fn test_scan_tuple() {
        let row = row();
        let (id, name, note): (u64, String, Option<String>) = row.scan().unwrap();
        assert_eq!((id, name.as_str(), note), (7, "seven", None));
    }

    #[test]
    fn test_scan_needs_every_column() {
        let row = row();
        match row.scan::<(u64, String)>() {
            Err(ChError::ColumnCountMismatch { expected, got }) => {
                assert_eq!((expected, got), (3, 2));
            }
            other => panic!("unexpected {:?}", other),
        }
        match row.scan::<(u64,)>() {
            Err(ChError::ColumnCountMismatch { expected, got }) => {
                assert_eq!((expected, got), (3, 1));
            }
            other => panic!("unexpected {:?}", other),
        }
        // Single columns stay reachable by index.
        assert_eq!(row.try_get::<u64>(0).unwrap(), 7);
    }

    #[test]
    fn test_scan_errors_name_the_column() {
        let row = row();
        match row.scan::<(u64, i64, Option<String>)>() {
            Err(ChError::ColumnType { column, .. }) => assert_eq!(column, "name"),
            other => panic!("unexpected {:?}", other),
        }
        match row.try_get_by_name::<String>("note") {
            Err(ChError::ColumnType { column, got, .. }) => {
                assert_eq!(column, "note");
                assert_eq!(got, "NULL");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            row.scan::<(u64, String, String, String)>(),
            Err(ChError::ColumnCountMismatch { .. })
        ));
    }
}
