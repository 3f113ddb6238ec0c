//! INSERT, UPDATE, DELETE, and EXISTS text built from shape metadata.
//!
//! Statements use `@N` placeholders; the engine rewrites them into the
//! dialect's style before binding.

use std::any::Any;

use crate::catalog::Catalog;
use crate::dialect::Dialect;
use crate::error::{RowmapError, RowmapResult};
use crate::metadata::ShapeMetadata;
use crate::paging::add_select_clause;
use crate::params::Statement;
use crate::shape::Shape;
use crate::value::Value;

fn is_key(meta: &ShapeMetadata, column: &str) -> bool {
    column.eq_ignore_ascii_case(meta.primary_key())
}

fn key_condition(meta: &ShapeMetadata, dialect: &dyn Dialect, index: usize) -> RowmapResult<String> {
    let key = meta.primary_key_binding()?;
    Ok(format!("{}=@{}", dialect.quote_identifier(&key.column_name), index))
}

/// Insert every non-result column, leaving an auto-increment key to the
/// database.
pub fn insert(meta: &ShapeMetadata, dialect: &dyn Dialect, instance: &dyn Any) -> RowmapResult<Statement> {
    let auto_increment = meta.table_info.auto_increment;
    if auto_increment {
        meta.primary_key_binding()?;
    }

    let mut names = Vec::new();
    let mut values = Vec::new();
    let mut args = Vec::new();
    for binding in meta.bindings() {
        if binding.result_column || (auto_increment && is_key(meta, &binding.column_name)) {
            continue;
        }
        names.push(dialect.quote_identifier(&binding.column_name));
        values.push(format!("@{}", args.len()));
        args.push(meta.write_value(binding, instance)?);
    }

    let (output, returning) = if auto_increment {
        (
            dialect.insert_output_clause(meta.primary_key()),
            dialect.insert_returning_clause(meta.primary_key()),
        )
    } else {
        (String::new(), String::new())
    };

    let table = dialect.escape_table_name(meta.table_name());
    let sql = if names.is_empty() {
        format!("INSERT INTO {}{} DEFAULT VALUES{}", table, output, returning)
    } else {
        format!(
            "INSERT INTO {} ({}){} VALUES ({}){}",
            table,
            names.join(","),
            output,
            values.join(","),
            returning
        )
    };
    Ok(Statement::new(sql, args))
}

/// Update all non-key, non-result columns, or only `columns` when given.
///
/// Naming a result column in `columns` is a configuration error.
pub fn update(
    meta: &ShapeMetadata,
    dialect: &dyn Dialect,
    instance: &dyn Any,
    columns: Option<&[&str]>,
) -> RowmapResult<Statement> {
    let key = meta.primary_key_binding()?;

    let targets = match columns {
        None => meta
            .bindings()
            .iter()
            .filter(|b| !b.result_column && !is_key(meta, &b.column_name))
            .collect::<Vec<_>>(),
        Some(names) => names
            .iter()
            .map(|name| match meta.binding(name) {
                Some(binding) if binding.result_column => Err(RowmapError::configuration(format!(
                    "{}.{} is a result column and can't be updated",
                    meta.descriptor.name, binding.column_name
                ))),
                Some(binding) => Ok(binding),
                None => Err(RowmapError::configuration(format!(
                    "{} has no column named '{}'",
                    meta.descriptor.name, name
                ))),
            })
            .collect::<RowmapResult<Vec<_>>>()?,
    };

    let mut sets = Vec::with_capacity(targets.len());
    let mut args = Vec::with_capacity(targets.len() + 1);
    for binding in targets {
        sets.push(format!(
            "{} = @{}",
            dialect.quote_identifier(&binding.column_name),
            args.len()
        ));
        args.push(meta.write_value(binding, instance)?);
    }
    if sets.is_empty() {
        return Err(RowmapError::configuration(format!(
            "{} has no columns to update",
            meta.descriptor.name
        )));
    }

    let sql = format!(
        "UPDATE {} SET {} WHERE {} = @{}",
        dialect.escape_table_name(meta.table_name()),
        sets.join(", "),
        dialect.quote_identifier(&key.column_name),
        args.len()
    );
    args.push(meta.write_value(key, instance)?);
    Ok(Statement::new(sql, args))
}

/// Delete the row holding this instance's key.
pub fn delete(meta: &ShapeMetadata, dialect: &dyn Dialect, instance: &dyn Any) -> RowmapResult<Statement> {
    let key = meta.primary_key_binding()?;
    let value = meta.write_value(key, instance)?;
    delete_by_key(meta, dialect, value)
}

pub fn delete_by_key(meta: &ShapeMetadata, dialect: &dyn Dialect, key: Value) -> RowmapResult<Statement> {
    let sql = format!(
        "DELETE FROM {} WHERE {}",
        dialect.escape_table_name(meta.table_name()),
        key_condition(meta, dialect, 0)?
    );
    Ok(Statement::new(sql, vec![key]))
}

/// Existence check for an arbitrary condition on the shape's table.
pub fn exists(meta: &ShapeMetadata, dialect: &dyn Dialect, condition: &str, args: Vec<Value>) -> Statement {
    let sql = dialect.exists_sql(&dialect.escape_table_name(meta.table_name()), condition);
    Statement::new(sql, args)
}

pub fn exists_by_key(meta: &ShapeMetadata, dialect: &dyn Dialect, key: Value) -> RowmapResult<Statement> {
    let condition = key_condition(meta, dialect, 0)?;
    Ok(exists(meta, dialect, &condition, vec![key]))
}

/// `SELECT <columns> FROM <table> WHERE <key>=@0`.
pub fn select_by_key<T: Shape>(catalog: &Catalog, dialect: &dyn Dialect, key: Value) -> RowmapResult<Statement> {
    let meta = catalog.metadata::<T>()?;
    let condition = format!("WHERE {}", key_condition(&meta, dialect, 0)?);
    let sql = add_select_clause::<T>(catalog, dialect, &condition)?;
    Ok(Statement::new(sql, vec![key]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{PostgresDialect, SqlServerDialect, SqliteDialect};
    use crate::fixtures::{Customer, Keyless, Order, Status};
    use pretty_assertions::assert_eq;

    fn order() -> Order {
        Order {
            id: 4,
            customer: 9,
            status: Status::Shipped,
            total: 2.5,
            line_count: 3,
            ..Order::default()
        }
    }

    #[test]
    fn test_insert_skips_auto_key_and_result_columns() {
        let catalog = Catalog::new();
        let meta = catalog.metadata::<Order>().unwrap();
        let stmt = insert(&meta, &PostgresDialect, &order()).unwrap();
        assert_eq!(
            stmt.sql,
            "INSERT INTO \"orders\" (\"customer_id\",\"status\",\"total\",\"placed_at\") VALUES (@0,@1,@2,@3) RETURNING \"id\""
        );
        assert_eq!(stmt.args[0], Value::Int(9));
        assert_eq!(stmt.args[1], Value::Int(1));
        assert_eq!(stmt.args.len(), 4);
    }

    #[test]
    fn test_insert_output_clause() {
        let catalog = Catalog::new();
        let meta = catalog.metadata::<Order>().unwrap();
        let stmt = insert(&meta, &SqlServerDialect, &order()).unwrap();
        assert!(stmt.sql.starts_with(
            "INSERT INTO [orders] ([customer_id],[status],[total],[placed_at]) OUTPUT INSERTED.[id] VALUES"
        ));
    }

    #[test]
    fn test_insert_keeps_manual_key() {
        let catalog = Catalog::new();
        let meta = catalog.metadata::<Customer>().unwrap();
        let customer = Customer {
            id: 3,
            name: "Bo".into(),
            ..Customer::default()
        };
        let stmt = insert(&meta, &SqliteDialect, &customer).unwrap();
        assert_eq!(stmt.sql, "INSERT INTO \"customers\" (\"id\",\"name\") VALUES (@0,@1)");
        assert_eq!(stmt.args, vec![Value::Int(3), Value::from("Bo")]);
    }

    #[test]
    fn test_update_all_columns() {
        let catalog = Catalog::new();
        let meta = catalog.metadata::<Order>().unwrap();
        let stmt = update(&meta, &SqlServerDialect, &order(), None).unwrap();
        assert_eq!(
            stmt.sql,
            "UPDATE [orders] SET [customer_id] = @0, [status] = @1, [total] = @2, [placed_at] = @3 WHERE [id] = @4"
        );
        assert_eq!(stmt.args[4], Value::Int(4));
    }

    #[test]
    fn test_update_named_columns() {
        let catalog = Catalog::new();
        let meta = catalog.metadata::<Order>().unwrap();
        let stmt = update(&meta, &PostgresDialect, &order(), Some(&["TOTAL"])).unwrap();
        assert_eq!(stmt.sql, "UPDATE \"orders\" SET \"total\" = @0 WHERE \"id\" = @1");
        assert_eq!(stmt.args, vec![Value::Float(2.5), Value::Int(4)]);

        let err = update(&meta, &PostgresDialect, &order(), Some(&["nope"])).unwrap_err();
        assert!(matches!(err, RowmapError::Configuration(_)));
    }

    #[test]
    fn test_update_rejects_result_columns() {
        let catalog = Catalog::new();
        let meta = catalog.metadata::<Order>().unwrap();
        let err = update(&meta, &PostgresDialect, &order(), Some(&["total", "line_count"]))
            .unwrap_err();
        assert!(matches!(err, RowmapError::Configuration(ref m) if m.contains("line_count")));
    }

    #[test]
    fn test_keyed_statements() {
        let catalog = Catalog::new();
        let meta = catalog.metadata::<Order>().unwrap();
        let stmt = delete(&meta, &SqliteDialect, &order()).unwrap();
        assert_eq!(stmt.sql, "DELETE FROM \"orders\" WHERE \"id\"=@0");
        assert_eq!(stmt.args, vec![Value::Int(4)]);

        let stmt = exists_by_key(&meta, &SqlServerDialect, Value::Int(4)).unwrap();
        assert_eq!(
            stmt.sql,
            "IF EXISTS (SELECT 1 FROM [orders] WHERE [id]=@0) SELECT 1 ELSE SELECT 0"
        );

        let stmt = select_by_key::<Customer>(&catalog, &SqliteDialect, Value::Int(1)).unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT \"customers\".\"id\", \"customers\".\"name\" FROM \"customers\" WHERE \"id\"=@0"
        );
    }

    #[test]
    fn test_missing_key_binding_is_configuration_error() {
        let catalog = Catalog::new();
        let meta = catalog.metadata::<Keyless>().unwrap();
        assert!(matches!(
            delete_by_key(&meta, &SqliteDialect, Value::Int(1)),
            Err(RowmapError::Configuration(_))
        ));
        assert!(matches!(
            update(&meta, &SqliteDialect, &Keyless::default(), None),
            Err(RowmapError::Configuration(_))
        ));
        assert!(exists_by_key(&meta, &SqliteDialect, Value::Int(1)).is_err());
    }
}
