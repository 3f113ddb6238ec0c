//! Pluggable table and column resolution.

use std::sync::Arc;

use crate::shape::{FieldDescriptor, ShapeDescriptor};
use crate::value::{ConversionError, Value, ValueType};

/// Converts a value between its database and field representation.
pub type Converter = Arc<dyn Fn(Value) -> Result<Value, ConversionError> + Send + Sync>;

/// Table-level metadata for a shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableInfo {
    pub table_name: String,
    pub primary_key: String,
    pub auto_increment: bool,
    pub sequence_name: Option<String>,
}

impl TableInfo {
    /// Defaults: declared table or the type name, declared key or `id`.
    pub fn from_shape(shape: &ShapeDescriptor) -> Self {
        Self {
            table_name: shape.table.clone().unwrap_or_else(|| shape.name.clone()),
            primary_key: shape.primary_key.clone().unwrap_or_else(|| "id".to_string()),
            auto_increment: shape.auto_increment,
            sequence_name: shape.sequence_name.clone(),
        }
    }
}

/// Column-level metadata for one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub column_name: String,
    pub result_column: bool,
    pub force_to_utc: bool,
}

impl ColumnInfo {
    /// `None` when the field is ignored, or unmarked on an explicit-columns shape.
    pub fn from_field(field: &FieldDescriptor, explicit_columns: bool) -> Option<Self> {
        if field.ignore || (explicit_columns && !field.declared) {
            return None;
        }
        Some(Self {
            column_name: field.column.clone().unwrap_or_else(|| field.name.clone()),
            result_column: field.result_only,
            force_to_utc: field.force_utc,
        })
    }
}

/// Resolves table and column names and supplies custom converters.
///
/// Every method has a default, so a custom mapper only overrides what it
/// changes.
pub trait Mapper: Send + Sync {
    fn table_info(&self, shape: &ShapeDescriptor) -> TableInfo {
        TableInfo::from_shape(shape)
    }

    /// Return `None` to leave the field unmapped.
    fn column_info(&self, shape: &ShapeDescriptor, field: &FieldDescriptor) -> Option<ColumnInfo> {
        ColumnInfo::from_field(field, shape.explicit_columns)
    }

    /// Converter from a column of type `source` into `field`.
    fn read_converter(&self, _field: &FieldDescriptor, _source: ValueType) -> Option<Converter> {
        None
    }

    /// Converter applied to `field` before it is written by insert or update.
    fn write_converter(&self, _field: &FieldDescriptor) -> Option<Converter> {
        None
    }
}

/// Uses the shape's own declarations unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardMapper;

impl Mapper for StandardMapper {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{Customer, Order, Tagged};
    use crate::shape::ShapeType;

    #[test]
    fn test_table_info_defaults() {
        let desc = ShapeType::of::<Tagged>().describe();
        let info = StandardMapper.table_info(&desc);
        assert_eq!(info.table_name, "Tagged");
        assert_eq!(info.primary_key, "id");
        assert!(!info.auto_increment);
    }

    #[test]
    fn test_table_info_declared() {
        let desc = ShapeType::of::<Order>().describe();
        let info = StandardMapper.table_info(&desc);
        assert_eq!(info.table_name, "orders");
        assert_eq!(info.primary_key, "id");
        assert!(info.auto_increment);
    }

    #[test]
    fn test_column_info_honors_markers() {
        let desc = ShapeType::of::<Customer>().describe();
        let columns: Vec<Option<ColumnInfo>> = desc
            .fields
            .iter()
            .map(|f| StandardMapper.column_info(&desc, f))
            .collect();
        assert_eq!(columns[0].as_ref().unwrap().column_name, "id");
        assert_eq!(columns[1].as_ref().unwrap().column_name, "name");
        assert!(columns[2].is_none(), "ignored field must not be mapped");
    }

    #[test]
    fn test_explicit_columns_require_opt_in() {
        let desc = ShapeType::of::<Tagged>().describe();
        let mapped: Vec<String> = desc
            .fields
            .iter()
            .filter_map(|f| StandardMapper.column_info(&desc, f))
            .map(|c| c.column_name)
            .collect();
        assert_eq!(mapped, vec!["id".to_string(), "label".to_string()]);
    }
}
