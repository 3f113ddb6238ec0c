//! Per-database SQL text: identifier quoting, placeholders, and paging.

use std::sync::Arc;

use crate::error::{RowmapError, RowmapResult};
use crate::paging::SqlParts;
use crate::value::Value;

/// The per-database strategy for identifiers, placeholders, and paging.
///
/// Paging templates always use `@N` placeholders; statements are rewritten
/// into the dialect's own style by parameter substitution afterwards.
pub trait Dialect: Send + Sync {
    fn name(&self) -> &'static str;

    fn quote_identifier(&self, id: &str) -> String {
        format!("\"{}\"", id)
    }

    /// Names containing a `.` are assumed to be quoted already.
    fn escape_table_name(&self, table: &str) -> String {
        if table.contains('.') {
            table.to_string()
        } else {
            self.quote_identifier(table)
        }
    }

    /// Placeholder text for the argument at `index` (0-based).
    fn placeholder(&self, index: usize) -> String {
        format!("@{}", index)
    }

    /// Window the query to rows `(skip, skip + take]`, appending the two
    /// bounds to `args`.
    fn build_page_query(&self, skip: i64, take: i64, parts: &SqlParts, args: &mut Vec<Value>) -> String {
        row_number_page_query(skip, take, parts, args)
    }

    fn exists_sql(&self, table: &str, condition: &str) -> String {
        format!("SELECT COUNT(*) FROM {} WHERE {}", table, condition)
    }

    /// Clause between the column list and `VALUES` that yields the new key.
    fn insert_output_clause(&self, _primary_key: &str) -> String {
        String::new()
    }

    /// Clause after `VALUES (...)` that yields the new key.
    fn insert_returning_clause(&self, _primary_key: &str) -> String {
        String::new()
    }

    /// Query run on the same connection after an insert when neither
    /// insert clause yields the new key.
    fn last_insert_id_sql(&self) -> Option<&'static str> {
        None
    }

    /// Adjust an argument before it is bound.
    fn map_parameter(&self, value: Value) -> Value {
        match value {
            Value::Bool(b) => Value::Int(i64::from(b)),
            other => other,
        }
    }
}

/// Windowing with `ROW_NUMBER()` over the preserved ORDER BY.
pub fn row_number_page_query(skip: i64, take: i64, parts: &SqlParts, args: &mut Vec<Value>) -> String {
    let body = if parts.is_distinct() {
        format!("rowmap_inner.* FROM (SELECT {}) rowmap_inner", parts.page_body)
    } else {
        parts.page_body.clone()
    };
    let order_by = parts.order_by.as_deref().unwrap_or("ORDER BY (SELECT NULL)");
    let sql = format!(
        "SELECT * FROM (SELECT ROW_NUMBER() OVER ({}) rowmap_rn, {}) rowmap_paged WHERE rowmap_rn>@{} AND rowmap_rn<=@{}",
        order_by,
        body,
        args.len(),
        args.len() + 1
    );
    args.push(Value::Int(skip));
    args.push(Value::Int(skip.saturating_add(take)));
    sql
}

/// Windowing with a trailing `LIMIT ... OFFSET ...`.
pub fn limit_offset_page_query(skip: i64, take: i64, parts: &SqlParts, args: &mut Vec<Value>) -> String {
    let sql = format!("{}\nLIMIT @{} OFFSET @{}", parts.sql, args.len(), args.len() + 1);
    args.push(Value::Int(take));
    args.push(Value::Int(skip));
    sql
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SqlServerDialect;

impl Dialect for SqlServerDialect {
    fn name(&self) -> &'static str {
        "sqlserver"
    }

    fn quote_identifier(&self, id: &str) -> String {
        format!("[{}]", id)
    }

    fn placeholder(&self, index: usize) -> String {
        format!("@p{}", index)
    }

    fn exists_sql(&self, table: &str, condition: &str) -> String {
        format!(
            "IF EXISTS (SELECT 1 FROM {} WHERE {}) SELECT 1 ELSE SELECT 0",
            table, condition
        )
    }

    fn insert_output_clause(&self, primary_key: &str) -> String {
        format!(" OUTPUT INSERTED.[{}]", primary_key)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl Dialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${}", index + 1)
    }

    fn build_page_query(&self, skip: i64, take: i64, parts: &SqlParts, args: &mut Vec<Value>) -> String {
        limit_offset_page_query(skip, take, parts, args)
    }

    fn insert_returning_clause(&self, primary_key: &str) -> String {
        format!(" RETURNING {}", self.quote_identifier(primary_key))
    }

    fn map_parameter(&self, value: Value) -> Value {
        value
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlDialect;

impl Dialect for MySqlDialect {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn quote_identifier(&self, id: &str) -> String {
        format!("`{}`", id)
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn build_page_query(&self, skip: i64, take: i64, parts: &SqlParts, args: &mut Vec<Value>) -> String {
        limit_offset_page_query(skip, take, parts, args)
    }

    fn last_insert_id_sql(&self) -> Option<&'static str> {
        Some("SELECT LAST_INSERT_ID()")
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn build_page_query(&self, skip: i64, take: i64, parts: &SqlParts, args: &mut Vec<Value>) -> String {
        limit_offset_page_query(skip, take, parts, args)
    }

    fn insert_returning_clause(&self, primary_key: &str) -> String {
        format!(" RETURNING {}", self.quote_identifier(primary_key))
    }
}

/// Pick a dialect by configured name.
pub fn dialect_by_name(name: &str) -> RowmapResult<Arc<dyn Dialect>> {
    match name.to_ascii_lowercase().as_str() {
        "postgres" | "postgresql" | "pg" => Ok(Arc::new(PostgresDialect)),
        "mysql" | "mariadb" => Ok(Arc::new(MySqlDialect)),
        "sqlite" => Ok(Arc::new(SqliteDialect)),
        "sqlserver" | "mssql" => Ok(Arc::new(SqlServerDialect)),
        other => Err(RowmapError::Config(format!("Unknown dialect: {}", other))),
    }
}

/// Pick a dialect from a connection URL scheme.
pub fn dialect_for_url(url: &str) -> RowmapResult<Arc<dyn Dialect>> {
    let scheme = url
        .split_once(':')
        .map(|(scheme, _)| scheme)
        .ok_or_else(|| RowmapError::Config(format!("No scheme in database URL: {}", url)))?;
    dialect_by_name(scheme)
}
