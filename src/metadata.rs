//! Per-shape metadata: table info and column bindings.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{RowmapError, RowmapResult};
use crate::mapper::{Mapper, TableInfo};
use crate::shape::{FieldDescriptor, LinkDescriptor, ShapeDescriptor, ShapeType};
use crate::value::{ConversionError, Value};

/// The association between a column and a shape field.
#[derive(Debug, Clone)]
pub struct FieldBinding {
    pub column_name: String,
    pub field: FieldDescriptor,
    /// Computed column: read but never inserted or updated.
    pub result_column: bool,
    pub force_utc: bool,
}

impl FieldBinding {
    pub fn get(&self, instance: &dyn Any) -> Value {
        self.field.get(instance)
    }

    pub fn set(&self, instance: &mut dyn Any, value: Value) -> Result<(), ConversionError> {
        self.field.set(instance, value)
    }
}

/// Everything the engine knows about one shape.
pub struct ShapeMetadata {
    pub shape: ShapeType,
    pub descriptor: ShapeDescriptor,
    pub table_info: TableInfo,
    bindings: Vec<Arc<FieldBinding>>,
    by_column: HashMap<String, usize>,
    query_columns: Vec<String>,
    mapper: Arc<dyn Mapper>,
}

impl ShapeMetadata {
    /// Build metadata for `shape` through `mapper`.
    pub fn build(shape: ShapeType, mapper: Arc<dyn Mapper>) -> RowmapResult<Self> {
        let descriptor = shape.describe();
        let table_info = mapper.table_info(&descriptor);

        let mut bindings = Vec::new();
        let mut by_column = HashMap::new();
        for field in &descriptor.fields {
            let Some(info) = mapper.column_info(&descriptor, field) else {
                continue;
            };
            let key = info.column_name.to_lowercase();
            if by_column.contains_key(&key) {
                return Err(RowmapError::configuration(format!(
                    "Column '{}' is bound more than once on {}",
                    info.column_name, descriptor.name
                )));
            }
            by_column.insert(key, bindings.len());
            bindings.push(Arc::new(FieldBinding {
                column_name: info.column_name,
                field: field.clone(),
                result_column: info.result_column,
                force_utc: info.force_to_utc,
            }));
        }

        let query_columns = bindings
            .iter()
            .filter(|b| !b.result_column)
            .map(|b| b.column_name.clone())
            .collect();

        Ok(Self {
            shape,
            descriptor,
            table_info,
            bindings,
            by_column,
            query_columns,
            mapper,
        })
    }

    pub fn table_name(&self) -> &str {
        &self.table_info.table_name
    }

    pub fn primary_key(&self) -> &str {
        &self.table_info.primary_key
    }

    /// Bindings in declaration order.
    pub fn bindings(&self) -> &[Arc<FieldBinding>] {
        &self.bindings
    }

    /// Look up a binding by column name, ignoring case.
    pub fn binding(&self, column: &str) -> Option<&Arc<FieldBinding>> {
        self.by_column
            .get(&column.to_lowercase())
            .map(|&i| &self.bindings[i])
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.by_column.contains_key(&column.to_lowercase())
    }

    /// The binding for the primary key, required by keyed statements.
    pub fn primary_key_binding(&self) -> RowmapResult<&Arc<FieldBinding>> {
        self.binding(self.primary_key()).ok_or_else(|| {
            RowmapError::configuration(format!(
                "Primary key '{}' of {} has no bound field",
                self.primary_key(),
                self.descriptor.name
            ))
        })
    }

    /// Non-result-only columns in declaration order.
    pub fn query_columns(&self) -> &[String] {
        &self.query_columns
    }

    /// Reference fields available to auto-link.
    pub fn links(&self) -> &[LinkDescriptor] {
        &self.descriptor.links
    }

    pub fn mapper(&self) -> &Arc<dyn Mapper> {
        &self.mapper
    }

    /// Read a binding for writing to the database, applying the mapper's
    /// write converter.
    pub fn write_value(&self, binding: &FieldBinding, instance: &dyn Any) -> RowmapResult<Value> {
        let value = binding.get(instance);
        match self.mapper.write_converter(&binding.field) {
            Some(convert) => Ok(convert(value)?),
            None => Ok(value),
        }
    }

    /// Whether `instance` has not been inserted yet, judged by its
    /// auto-increment key.
    pub fn is_new(&self, instance: &dyn Any) -> RowmapResult<bool> {
        if !self.table_info.auto_increment {
            return Err(RowmapError::configuration(format!(
                "is_new() needs an auto-increment primary key on {}",
                self.descriptor.name
            )));
        }
        let key = self.primary_key_binding()?;
        Ok(match key.get(instance) {
            Value::Null => true,
            Value::Int(i) => i == 0,
            Value::Float(f) => f == 0.0,
            Value::Uuid(u) => u.is_nil(),
            _ => false,
        })
    }
}

impl std::fmt::Debug for ShapeMetadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShapeMetadata")
            .field("shape", &self.shape)
            .field("table_info", &self.table_info)
            .field("bindings", &self.bindings)
            .finish()
    }
}
