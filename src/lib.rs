//! # rowmap
//!
//! > **Declare the shape once. Read rows into it anywhere.**
//!
//! rowmap turns query results into typed values. A shape declares its table,
//! key, and fields; the catalog compiles a per-query row mapper from that
//! declaration and caches it, so repeated queries pay for reflection once.
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use rowmap::prelude::*;
//!
//! #[derive(Debug, Default)]
//! struct Customer {
//!     id: i64,
//!     name: String,
//! }
//!
//! impl Shape for Customer {
//!     fn describe(shape: &mut ShapeBuilder<Self>) {
//!         shape.table("customers").primary_key("id").auto_increment();
//!         shape.field("id", |c| &c.id, |c| &mut c.id);
//!         shape.field("name", |c| &c.name, |c| &mut c.name);
//!     }
//! }
//!
//! let db = Database::connect("sqlite::memory:").await?;
//! // => SELECT "customers"."id", "customers"."name" FROM "customers" WHERE name LIKE ?
//! let found: Vec<Customer> = db.fetch("WHERE name LIKE @0", &["A%".into()]).await?;
//! ```
//!
//! ## Placeholders
//!
//! | Form     | Meaning                                        |
//! |----------|------------------------------------------------|
//! | `@0`     | Argument by position                           |
//! | `@name`  | Property of the first record argument with it  |
//! | `@@`     | A literal `@`                                  |
//!
//! A list argument expands to one placeholder per element.

pub mod cache;
pub mod catalog;
pub mod compiler;
pub mod compose;
pub mod config;
pub mod cursor;
pub mod dialect;
pub mod engine;
pub mod error;
pub mod mapper;
pub mod metadata;
pub mod paging;
pub mod params;
pub mod shape;
pub mod statements;
pub mod value;

pub mod prelude {
    pub use crate::catalog::{Catalog, MapperScope};
    pub use crate::compose::ShapeSet;
    pub use crate::config::Config;
    pub use crate::cursor::{ColumnSchema, RowCursor, VecCursor};
    pub use crate::dialect::{
        Dialect, MySqlDialect, PostgresDialect, SqlServerDialect, SqliteDialect,
    };
    pub use crate::engine::Database;
    pub use crate::error::*;
    pub use crate::mapper::{ColumnInfo, Mapper, StandardMapper, TableInfo};
    pub use crate::paging::Page;
    pub use crate::params::Statement;
    pub use crate::shape::{Shape, ShapeBuilder};
    pub use crate::value::{DbEnum, EnumInfo, FieldValue, Value, ValueType};
}
