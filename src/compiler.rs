//! Mapping compiler: turns a column layout into a reusable row mapper.
//!
//! A [`RowMapper`] is built once per (shape, sql, source, first column,
//! column count) and cached on the [`Catalog`]. Building resolves each
//! column in the window to a field binding and picks its converter, so
//! mapping a row is a straight loop over pre-resolved columns.

use std::any::TypeId;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use tracing::debug;

use crate::catalog::Catalog;
use crate::cursor::{ColumnSchema, RowCursor};
use crate::error::{RowmapError, RowmapResult};
use crate::mapper::{Converter, Mapper, StandardMapper};
use crate::metadata::{FieldBinding, ShapeMetadata};
use crate::shape::{FieldDescriptor, Instance, Shape, ShapeType};
use crate::value::{ConversionError, FieldValue, Value, ValueType};

/// One schema column resolved to a field.
#[derive(Clone)]
pub struct BoundColumn {
    pub index: usize,
    pub column: String,
    pub binding: Arc<FieldBinding>,
    converter: Option<Converter>,
}

/// A compiled row-to-value function.
#[derive(Clone)]
pub enum RowMapper {
    /// Fills a fresh shape instance from the matching columns.
    Composite {
        metadata: Arc<ShapeMetadata>,
        first: usize,
        count: usize,
        columns: Vec<BoundColumn>,
    },
    /// Reads a single column as a plain value.
    Scalar {
        index: usize,
        column: String,
        converter: Option<Converter>,
    },
}

impl RowMapper {
    /// Build a mapper for `metadata` over `schema[first..first + count]`.
    pub fn composite(
        metadata: Arc<ShapeMetadata>,
        schema: &[ColumnSchema],
        first: usize,
        count: usize,
    ) -> Self {
        let mapper = Arc::clone(metadata.mapper());
        let columns = schema
            .iter()
            .enumerate()
            .skip(first)
            .take(count)
            .filter_map(|(index, col)| {
                let binding = metadata.binding(&col.name)?;
                let converter = select_converter(
                    mapper.as_ref(),
                    Some(&binding.field),
                    binding.force_utc,
                    col.value_type,
                    binding.field.value_type,
                );
                Some(BoundColumn {
                    index,
                    column: col.name.clone(),
                    binding: Arc::clone(binding),
                    converter,
                })
            })
            .collect();
        RowMapper::Composite {
            metadata,
            first,
            count,
            columns,
        }
    }

    /// Build a mapper reading column `index` into a `target` value.
    pub fn scalar(schema: &[ColumnSchema], index: usize, target: ValueType) -> Self {
        let (column, source) = match schema.get(index) {
            Some(col) => (col.name.clone(), col.value_type),
            None => (String::new(), ValueType::Unknown),
        };
        let converter = select_converter(&StandardMapper, None, false, source, target);
        RowMapper::Scalar {
            index,
            column,
            converter,
        }
    }

    /// The column window this mapper reads.
    pub fn span(&self) -> (usize, usize) {
        match self {
            RowMapper::Composite { first, count, .. } => (*first, *count),
            RowMapper::Scalar { index, .. } => (*index, 1),
        }
    }

    /// Map the current row into a new shape instance. `row` is the 1-based
    /// row number used in error reports.
    pub fn map_row(&self, cursor: &dyn RowCursor, row: usize) -> RowmapResult<Instance> {
        let RowMapper::Composite {
            metadata, columns, ..
        } = self
        else {
            return Err(RowmapError::configuration(
                "a scalar row mapper cannot produce a shape instance",
            ));
        };

        let mut instance = metadata.descriptor.construct();
        for col in columns {
            if cursor.is_null(col.index) {
                continue;
            }
            let fail = |e: ConversionError| RowmapError::mapping(row, col.index, &col.column, e);
            let raw = cursor.value(col.index).map_err(fail)?;
            let value = convert(&col.converter, raw).map_err(fail)?;
            col.binding.set(instance.as_mut(), value).map_err(fail)?;
        }
        metadata.descriptor.run_on_loaded(instance.as_mut());
        Ok(instance)
    }

    /// Read the current row's scalar value, already converted.
    pub fn map_value(&self, cursor: &dyn RowCursor, row: usize) -> RowmapResult<Value> {
        let RowMapper::Scalar {
            index,
            column,
            converter,
        } = self
        else {
            return Err(RowmapError::configuration(
                "a shape row mapper cannot produce a scalar value",
            ));
        };

        if cursor.is_null(*index) {
            return Ok(Value::Null);
        }
        let fail = |e: ConversionError| RowmapError::mapping(row, *index, column, e);
        let raw = cursor.value(*index).map_err(fail)?;
        convert(converter, raw).map_err(fail)
    }
}

fn convert(converter: &Option<Converter>, value: Value) -> Result<Value, ConversionError> {
    match converter {
        Some(convert) => convert(value),
        None => Ok(value),
    }
}

/// Whether every column in the window is NULL on the current row.
pub fn span_is_null(cursor: &dyn RowCursor, first: usize, count: usize) -> bool {
    (first..first + count).all(|i| cursor.is_null(i))
}

/// Pick the converter for a column, in priority order: the mapper's own,
/// forced UTC, enum, then generic conversion when the types differ.
pub fn select_converter(
    mapper: &dyn Mapper,
    field: Option<&FieldDescriptor>,
    force_utc: bool,
    source: ValueType,
    target: ValueType,
) -> Option<Converter> {
    if let Some(convert) = field.and_then(|f| mapper.read_converter(f, source)) {
        return Some(convert);
    }

    if force_utc && source.is_timestamp() && target.is_timestamp() {
        return Some(Arc::new(|value: Value| -> Result<Value, ConversionError> {
            match value {
                Value::DateTime(naive) => Ok(Value::DateTimeUtc(Utc.from_utc_datetime(&naive))),
                other => Ok(other),
            }
        }));
    }

    if let ValueType::Enum(info) = target {
        match source {
            ValueType::Int => return None,
            ValueType::String => {
                return Some(Arc::new(move |value: Value| match value {
                    Value::String(text) => info.discriminant_of(&text).map(Value::Int).ok_or_else(
                        || {
                            ConversionError::new(format!(
                                "'{}' is not a defined enumerator of {}",
                                text, info.name
                            ))
                        },
                    ),
                    other => other.convert_to(target),
                }));
            }
            _ => {}
        }
    }

    if !target.accepts(source) {
        return Some(Arc::new(move |value: Value| value.convert_to(target)));
    }

    None
}

impl Catalog {
    /// Get or build the row mapper for a shape over a column window.
    pub fn row_mapper(
        &self,
        shape: ShapeType,
        source: &str,
        sql: &str,
        first: usize,
        count: usize,
        schema: &[ColumnSchema],
    ) -> RowmapResult<Arc<RowMapper>> {
        let key = (shape.id, sql.to_string(), source.to_string(), first, count);
        self.row_mappers.get_or_try_insert_with(key, || {
            let metadata = self.metadata_for(shape)?;
            let mapper = RowMapper::composite(metadata, schema, first, count);
            debug!(shape = shape.name, first, count, "compiled row mapper");
            Ok(Arc::new(mapper))
        })
    }

    /// Get or build the mapper reading the first column as `T`.
    pub fn scalar_mapper<T: FieldValue>(
        &self,
        source: &str,
        sql: &str,
        schema: &[ColumnSchema],
    ) -> RowmapResult<Arc<RowMapper>> {
        let key = (TypeId::of::<T>(), sql.to_string(), source.to_string(), 0, schema.len());
        self.row_mappers.get_or_try_insert_with(key, || {
            Ok::<_, RowmapError>(Arc::new(RowMapper::scalar(schema, 0, T::value_type())))
        })
    }

    /// Map every remaining row of `cursor` into `T`.
    pub fn map_rows<T: Shape>(
        &self,
        source: &str,
        sql: &str,
        cursor: &mut dyn RowCursor,
    ) -> RowmapResult<Vec<T>> {
        let schema = cursor.schema();
        let mapper = self.row_mapper(ShapeType::of::<T>(), source, sql, 0, schema.len(), &schema)?;
        let mut results = Vec::new();
        let mut row = 0;
        while cursor.advance() {
            row += 1;
            let instance = mapper.map_row(cursor, row)?;
            results.push(downcast::<T>(instance)?);
        }
        Ok(results)
    }

    /// Map the first column of every remaining row into `T`.
    pub fn map_values<T: FieldValue>(
        &self,
        source: &str,
        sql: &str,
        cursor: &mut dyn RowCursor,
    ) -> RowmapResult<Vec<T>> {
        let schema = cursor.schema();
        let mapper = self.scalar_mapper::<T>(source, sql, &schema)?;
        let column = schema.first().map_or("", |c| c.name.as_str());
        let mut results = Vec::new();
        let mut row = 0;
        while cursor.advance() {
            row += 1;
            let value = mapper.map_value(cursor, row)?;
            let value = T::from_value(value).map_err(|e| RowmapError::mapping(row, 0, column, e))?;
            results.push(value);
        }
        Ok(results)
    }
}

pub(crate) fn downcast<T: 'static>(instance: Instance) -> RowmapResult<T> {
    instance.downcast::<T>().map(|b| *b).map_err(|_| {
        RowmapError::configuration(format!(
            "row mapper produced a value that is not a {}",
            std::any::type_name::<T>()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::VecCursor;
    use crate::fixtures::{Customer, Event, Order, Status};
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    fn order_cursor(rows: Vec<Vec<Value>>) -> VecCursor {
        VecCursor::new(
            vec![
                ColumnSchema::new("ID", ValueType::Int),
                ColumnSchema::new("customer_id", ValueType::Int),
                ColumnSchema::new("status", ValueType::String),
                ColumnSchema::new("total", ValueType::String),
                ColumnSchema::new("unrelated", ValueType::Bool),
            ],
            rows,
        )
    }

    #[test]
    fn test_maps_matching_columns_and_ignores_extra() {
        let catalog = Catalog::new();
        let mut cursor = order_cursor(vec![vec![
            Value::Int(7),
            Value::Int(3),
            Value::from("shipped"),
            Value::from("12.5"),
            Value::Bool(true),
        ]]);
        let orders: Vec<Order> = catalog.map_rows("test", "q", &mut cursor).unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].id, 7);
        assert_eq!(orders[0].customer, 3);
        assert_eq!(orders[0].status, Status::Shipped);
        assert_eq!(orders[0].total, 12.5);
        assert_eq!(orders[0].line_count, 0);
    }

    #[test]
    fn test_null_leaves_default() {
        let catalog = Catalog::new();
        let mut cursor = order_cursor(vec![vec![
            Value::Int(1),
            Value::Null,
            Value::Null,
            Value::Null,
            Value::Null,
        ]]);
        let orders: Vec<Order> = catalog.map_rows("test", "q", &mut cursor).unwrap();
        assert_eq!(orders[0].customer, 0);
        assert_eq!(orders[0].status, Status::Pending);
    }

    #[test]
    fn test_unknown_enumerator_reports_row_and_column() {
        let catalog = Catalog::new();
        let mut cursor = order_cursor(vec![
            vec![Value::Int(1), Value::Int(1), Value::from("pending"), Value::Null, Value::Null],
            vec![Value::Int(2), Value::Int(1), Value::from("lost"), Value::Null, Value::Null],
        ]);
        let err = catalog.map_rows::<Order>("test", "q", &mut cursor).unwrap_err();
        match err {
            RowmapError::Mapping { row, index, column, source } => {
                assert_eq!((row, index, column.as_str()), (2, 2, "status"));
                assert_eq!(source.to_string(), "'lost' is not a defined enumerator of Status");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_on_loaded_runs_after_population() {
        let catalog = Catalog::new();
        let mut cursor = VecCursor::from_rows(
            &["id", "name"],
            vec![vec![Value::Int(1), Value::from("  Ada ")]],
        );
        let customers: Vec<Customer> = catalog.map_rows("test", "q", &mut cursor).unwrap();
        assert_eq!(customers[0].name, "Ada");
        assert!(customers[0].loaded);
    }

    #[test]
    fn test_force_utc_converter() {
        let catalog = Catalog::new();
        let at = NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(3, 4, 5)
            .unwrap();
        let mut cursor = VecCursor::from_rows(
            &["id", "happened_at"],
            vec![vec![Value::Int(1), Value::DateTime(at)]],
        );
        let events: Vec<Event> = catalog.map_rows("test", "q", &mut cursor).unwrap();
        assert_eq!(events[0].happened_at, Utc.from_utc_datetime(&at));
    }

    #[test]
    fn test_bound_values_read_back_unchanged() {
        let catalog = Catalog::new();
        let meta = catalog.metadata::<Order>().unwrap();
        let original = Order {
            id: 12,
            customer: 4,
            status: Status::Cancelled,
            total: 19.75,
            placed_at: NaiveDate::from_ymd_opt(2023, 11, 5)
                .unwrap()
                .and_hms_opt(8, 15, 0)
                .unwrap(),
            line_count: 2,
            ..Order::default()
        };

        let names: Vec<&str> = meta.bindings().iter().map(|b| b.column_name.as_str()).collect();
        let row = meta.bindings().iter().map(|b| b.get(&original)).collect();
        let mut cursor = VecCursor::from_rows(&names, vec![row]);
        let read: Vec<Order> = catalog.map_rows("test", "all order columns", &mut cursor).unwrap();

        let got = &read[0];
        assert_eq!(
            (got.id, got.customer, got.status, got.total, got.placed_at, got.line_count),
            (
                original.id,
                original.customer,
                original.status,
                original.total,
                original.placed_at,
                original.line_count
            )
        );
    }

    #[test]
    fn test_force_utc_is_idempotent() {
        let catalog = Catalog::new();
        let meta = catalog.metadata::<Event>().unwrap();
        let names: Vec<&str> = meta.bindings().iter().map(|b| b.column_name.as_str()).collect();
        let at = NaiveDate::from_ymd_opt(2024, 6, 30)
            .unwrap()
            .and_hms_opt(23, 59, 1)
            .unwrap();

        let mut cursor = VecCursor::from_rows(&names, vec![vec![Value::Int(5), Value::DateTime(at)]]);
        let first: Vec<Event> = catalog.map_rows("test", "naive", &mut cursor).unwrap();

        let row = meta.bindings().iter().map(|b| b.get(&first[0])).collect();
        let mut cursor = VecCursor::from_rows(&names, vec![row]);
        let second: Vec<Event> = catalog.map_rows("test", "utc", &mut cursor).unwrap();

        assert_eq!(first[0].happened_at, Utc.from_utc_datetime(&at));
        assert_eq!(second[0].happened_at, first[0].happened_at);
        assert_eq!(second[0].id, 5);
    }

    #[test]
    fn test_mapper_cached_per_window() {
        let catalog = Catalog::new();
        let schema = order_cursor(vec![]).schema();
        let shape = ShapeType::of::<Order>();
        let a = catalog.row_mapper(shape, "s", "q", 0, 5, &schema).unwrap();
        let b = catalog.row_mapper(shape, "s", "q", 0, 5, &schema).unwrap();
        let c = catalog.row_mapper(shape, "s", "q", 0, 2, &schema).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(c.span(), (0, 2));
    }

    #[test]
    fn test_scalar_values() {
        let catalog = Catalog::new();
        let mut cursor = VecCursor::from_rows(
            &["n"],
            vec![vec![Value::from("4")], vec![Value::Null]],
        );
        let values: Vec<Option<i64>> = catalog.map_values("test", "q", &mut cursor).unwrap();
        assert_eq!(values, vec![Some(4), None]);
    }

    #[test]
    fn test_converter_priority() {
        let mapper = StandardMapper;
        assert!(select_converter(&mapper, None, false, ValueType::Int, ValueType::Int).is_none());
        assert!(select_converter(&mapper, None, false, ValueType::Unknown, ValueType::Int).is_none());
        let convert =
            select_converter(&mapper, None, false, ValueType::String, ValueType::Int).unwrap();
        assert_eq!(convert(Value::from("9")).unwrap(), Value::Int(9));
        let status = ValueType::Enum(<Status as crate::value::DbEnum>::INFO);
        assert!(select_converter(&mapper, None, false, ValueType::Int, status).is_none());
    }
}
