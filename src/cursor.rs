//! Forward-only row cursors.

use crate::value::{ConversionError, Value, ValueType};

/// Name and type of one result column.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnSchema {
    pub name: String,
    pub value_type: ValueType,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
        }
    }
}

/// A forward-only view over materialized rows.
///
/// The cursor starts before the first row; `advance` moves onto the next
/// row and returns `false` once the rows are exhausted.
pub trait RowCursor {
    fn has_next_row(&self) -> bool;

    fn advance(&mut self) -> bool;

    fn field_count(&self) -> usize;

    fn field_name(&self, index: usize) -> &str;

    fn field_type(&self, index: usize) -> ValueType;

    fn is_null(&self, index: usize) -> bool;

    fn value(&self, index: usize) -> Result<Value, ConversionError>;

    fn schema(&self) -> Vec<ColumnSchema> {
        (0..self.field_count())
            .map(|i| ColumnSchema::new(self.field_name(i), self.field_type(i)))
            .collect()
    }
}

/// In-memory cursor, mostly for tests and pre-fetched data.
#[derive(Debug, Clone, Default)]
pub struct VecCursor {
    columns: Vec<ColumnSchema>,
    rows: Vec<Vec<Value>>,
    position: Option<usize>,
}

impl VecCursor {
    pub fn new(columns: Vec<ColumnSchema>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            columns,
            rows,
            position: None,
        }
    }

    /// Columns typed from the first non-null value in each position.
    pub fn from_rows(names: &[&str], rows: Vec<Vec<Value>>) -> Self {
        let columns = names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let value_type = rows
                    .iter()
                    .filter_map(|row| row.get(i))
                    .find(|v| !v.is_null())
                    .map(Value::value_type)
                    .unwrap_or(ValueType::Unknown);
                ColumnSchema::new(*name, value_type)
            })
            .collect();
        Self::new(columns, rows)
    }

    fn current(&self) -> Option<&Vec<Value>> {
        self.position.and_then(|p| self.rows.get(p))
    }
}

impl RowCursor for VecCursor {
    fn has_next_row(&self) -> bool {
        self.position.map_or(0, |p| p + 1) < self.rows.len()
    }

    fn advance(&mut self) -> bool {
        let next = self.position.map_or(0, |p| p + 1);
        self.position = Some(next.min(self.rows.len()));
        next < self.rows.len()
    }

    fn field_count(&self) -> usize {
        self.columns.len()
    }

    fn field_name(&self, index: usize) -> &str {
        self.columns.get(index).map_or("", |c| c.name.as_str())
    }

    fn field_type(&self, index: usize) -> ValueType {
        self.columns
            .get(index)
            .map_or(ValueType::Unknown, |c| c.value_type)
    }

    fn is_null(&self, index: usize) -> bool {
        self.current()
            .and_then(|row| row.get(index))
            .is_none_or(Value::is_null)
    }

    fn value(&self, index: usize) -> Result<Value, ConversionError> {
        let row = self
            .current()
            .ok_or_else(|| ConversionError::new("cursor is not positioned on a row"))?;
        row.get(index)
            .cloned()
            .ok_or_else(|| ConversionError::new(format!("no column at index {}", index)))
    }

    fn schema(&self) -> Vec<ColumnSchema> {
        self.columns.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iterates_forward() {
        let mut cursor = VecCursor::from_rows(
            &["id", "name"],
            vec![
                vec![Value::Int(1), Value::Null],
                vec![Value::Int(2), Value::from("b")],
            ],
        );
        assert_eq!(cursor.field_type(1), ValueType::String);
        assert!(cursor.has_next_row());
        assert!(cursor.advance());
        assert!(cursor.is_null(1));
        assert!(cursor.advance());
        assert_eq!(cursor.value(1).unwrap(), Value::from("b"));
        assert!(!cursor.has_next_row());
        assert!(!cursor.advance());
        assert!(!cursor.advance());
    }

    #[test]
    fn test_value_before_first_row_fails() {
        let cursor = VecCursor::from_rows(&["id"], vec![vec![Value::Int(1)]]);
        assert!(cursor.value(0).is_err());
    }
}
