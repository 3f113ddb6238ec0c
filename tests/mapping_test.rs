//! End-to-end mapping over in-memory cursors.

use std::sync::Arc;

use pretty_assertions::assert_eq;
use rowmap::catalog::Catalog;
use rowmap::cursor::VecCursor;
use rowmap::mapper::{ColumnInfo, Converter, Mapper};
use rowmap::paging::{add_select_clause, build_page_queries};
use rowmap::params::substitute_with;
use rowmap::prelude::*;
use rowmap::shape::{FieldDescriptor, ShapeDescriptor};
use rowmap::value::ConversionError;

#[derive(Debug, Default, Clone, PartialEq)]
struct Author {
    id: i64,
    name: String,
}

impl Shape for Author {
    fn describe(shape: &mut ShapeBuilder<Self>) {
        shape.table("authors");
        shape.field("id", |a| &a.id, |a| &mut a.id);
        shape.field("name", |a| &a.name, |a| &mut a.name);
    }
}

#[derive(Debug, Default)]
struct Book {
    id: i64,
    author_id: i64,
    title: String,
    price: f64,
    author: Option<Author>,
}

impl Shape for Book {
    fn describe(shape: &mut ShapeBuilder<Self>) {
        shape.table("books").auto_increment();
        shape.field("id", |b| &b.id, |b| &mut b.id);
        shape.field("author_id", |b| &b.author_id, |b| &mut b.author_id);
        shape.field("title", |b| &b.title, |b| &mut b.title);
        shape.field("price", |b| &b.price, |b| &mut b.price);
        shape.link::<Author, _>("author", |b, a| b.author = Some(a));
    }
}

/// Prefixes every column with `a_` and upper-cases names on read.
struct LegacyAuthors;

impl Mapper for LegacyAuthors {
    fn column_info(&self, shape: &ShapeDescriptor, field: &FieldDescriptor) -> Option<ColumnInfo> {
        let mut info = ColumnInfo::from_field(field, shape.explicit_columns)?;
        info.column_name = format!("a_{}", info.column_name);
        Some(info)
    }

    fn read_converter(&self, field: &FieldDescriptor, _source: ValueType) -> Option<Converter> {
        if field.name != "name" {
            return None;
        }
        Some(Arc::new(|value: Value| -> Result<Value, ConversionError> {
            match value {
                Value::String(s) => Ok(Value::String(s.to_uppercase())),
                other => Ok(other),
            }
        }))
    }
}

#[test]
fn test_fetch_shapes_from_cursor() -> RowmapResult<()> {
    let catalog = Catalog::new();
    let mut cursor = VecCursor::from_rows(
        &["ID", "Title", "price", "author_id", "rating"],
        vec![
            vec![1.into(), "Dune".into(), Value::Float(9.5), 3.into(), 5.into()],
            vec![2.into(), "Emma".into(), Value::Null, 4.into(), 4.into()],
        ],
    );

    let books: Vec<Book> = catalog.map_rows("mem", "books", &mut cursor)?;
    assert_eq!(books.len(), 2);
    assert_eq!(books[0].title, "Dune");
    assert_eq!(books[0].price, 9.5);
    assert_eq!(books[1].author_id, 4);
    assert_eq!(books[1].price, 0.0);
    Ok(())
}

#[test]
fn test_registered_mapper_applies_until_revoked() -> RowmapResult<()> {
    let catalog = Catalog::new();
    catalog.register_shape::<Author>(Arc::new(LegacyAuthors))?;

    let rows = || {
        VecCursor::from_rows(
            &["a_id", "a_name", "name"],
            vec![vec![7.into(), "le guin".into(), "ursula".into()]],
        )
    };

    let authors: Vec<Author> = catalog.map_rows("mem", "authors", &mut rows())?;
    assert_eq!(authors[0], Author { id: 7, name: "LE GUIN".into() });

    catalog.revoke_shape::<Author>();
    let authors: Vec<Author> = catalog.map_rows("mem", "authors", &mut rows())?;
    assert_eq!(authors[0], Author { id: 0, name: "ursula".into() });
    Ok(())
}

#[test]
fn test_duplicate_registration_is_rejected() {
    let catalog = Catalog::new();
    catalog
        .register_shape::<Author>(Arc::new(LegacyAuthors))
        .unwrap();
    let err = catalog
        .register_shape::<Author>(Arc::new(StandardMapper))
        .unwrap_err();
    assert!(matches!(err, RowmapError::Configuration(_)));
}

#[test]
fn test_compose_books_with_authors() -> RowmapResult<()> {
    let catalog = Catalog::new();
    let mut cursor = VecCursor::from_rows(
        &["id", "author_id", "title", "price", "id", "name"],
        vec![
            vec![1.into(), 3.into(), "Dune".into(), Value::Float(9.5), 3.into(), "Herbert".into()],
            vec![2.into(), 0.into(), "Anon".into(), Value::Float(1.0), Value::Null, Value::Null],
        ],
    );

    let books = catalog.compose_auto::<(Book, Author)>("mem", "joined", &mut cursor)?;
    assert_eq!(books.len(), 2);
    assert_eq!(books[0].author.as_ref().map(|a| a.name.as_str()), Some("Herbert"));
    assert!(books[1].author.is_none());
    Ok(())
}

#[test]
fn test_compose_with_custom_link() -> RowmapResult<()> {
    let catalog = Catalog::new();
    let mut cursor = VecCursor::from_rows(
        &["id", "author_id", "title", "price", "id", "name"],
        vec![vec![1.into(), 3.into(), "Dune".into(), Value::Float(9.5), 3.into(), "Herbert".into()]],
    );

    let pairs = catalog.compose_with::<(Book, Author), _, _>("mem", "pairs", &mut cursor, |(book, author)| {
        Some(format!("{} by {}", book?.title, author?.name))
    })?;
    assert_eq!(pairs, vec!["Dune by Herbert".to_string()]);
    Ok(())
}

#[test]
fn test_paged_statement_for_postgres() -> RowmapResult<()> {
    let catalog = Catalog::new();
    let dialect = PostgresDialect;
    let sql = add_select_clause::<Book>(&catalog, &dialect, "WHERE author_id IN (@ids) ORDER BY title")?;
    assert_eq!(
        sql,
        "SELECT \"books\".\"id\", \"books\".\"author_id\", \"books\".\"title\", \"books\".\"price\" FROM \"books\" WHERE author_id IN (@ids) ORDER BY title"
    );

    let args = vec![Value::record([("ids", Value::list([3, 4]))])];
    let queries = build_page_queries(&dialect, 10, 5, &sql, args)?;
    assert_eq!(
        queries.count.sql,
        "SELECT COUNT(*) FROM \"books\" WHERE author_id IN (@ids)"
    );

    let page = substitute_with(&queries.page.sql, &queries.page.args, |i| dialect.placeholder(i))?;
    assert!(page.sql.ends_with("WHERE author_id IN ($1,$2) ORDER BY title\nLIMIT $3 OFFSET $4"));
    assert_eq!(
        page.args,
        vec![Value::Int(3), Value::Int(4), Value::Int(5), Value::Int(10)]
    );
    Ok(())
}
