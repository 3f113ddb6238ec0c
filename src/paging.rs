//! Structural SELECT parsing for paging and automatic column lists.
//!
//! Only as much of the statement is understood as paging needs: where the
//! column list sits between `SELECT` and the first top-level `FROM`, and
//! where the last top-level `ORDER BY` clause starts and ends. Text inside
//! parentheses and quotes is never scanned for keywords.

use nom::{
    branch::alt,
    bytes::complete::{is_not, tag, take, take_while, take_while1},
    character::complete::{char, multispace1},
    combinator::{map, recognize},
    multi::many0,
    sequence::{delimited, tuple},
    IResult,
};

use crate::catalog::Catalog;
use crate::dialect::Dialect;
use crate::error::{RowmapError, RowmapResult};
use crate::params::Statement;
use crate::shape::Shape;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Space,
    Word,
    Open,
    Close,
    Quoted,
    Punct,
}

#[derive(Debug, Clone, Copy)]
struct Token<'a> {
    kind: Kind,
    text: &'a str,
    start: usize,
}

impl Token<'_> {
    fn end(&self) -> usize {
        self.start + self.text.len()
    }

    fn is_word(&self, keyword: &str) -> bool {
        self.kind == Kind::Word && self.text.eq_ignore_ascii_case(keyword)
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '$' | '#' | '@')
}

fn single_quoted(input: &str) -> IResult<&str, &str> {
    recognize(tuple((
        char('\''),
        many0(alt((tag("''"), is_not("'")))),
        char('\''),
    )))(input)
}

fn double_quoted(input: &str) -> IResult<&str, &str> {
    recognize(delimited(char('"'), take_while(|c: char| c != '"'), char('"')))(input)
}

fn backticked(input: &str) -> IResult<&str, &str> {
    recognize(delimited(char('`'), take_while(|c: char| c != '`'), char('`')))(input)
}

fn bracketed(input: &str) -> IResult<&str, &str> {
    recognize(delimited(char('['), take_while(|c: char| c != ']'), char(']')))(input)
}

fn parse_token(input: &str) -> IResult<&str, (Kind, &str)> {
    alt((
        map(multispace1, |s| (Kind::Space, s)),
        map(take_while1(is_word_char), |s| (Kind::Word, s)),
        map(tag("("), |s| (Kind::Open, s)),
        map(tag(")"), |s| (Kind::Close, s)),
        map(single_quoted, |s| (Kind::Quoted, s)),
        map(double_quoted, |s| (Kind::Quoted, s)),
        map(backticked, |s| (Kind::Quoted, s)),
        map(bracketed, |s| (Kind::Quoted, s)),
        map(take(1usize), |s| (Kind::Punct, s)),
    ))(input)
}

fn tokenize(sql: &str) -> Vec<Token<'_>> {
    let pieces = match many0(parse_token)(sql) {
        Ok((_, pieces)) => pieces,
        Err(_) => Vec::new(),
    };
    let mut start = 0;
    pieces
        .into_iter()
        .map(|(kind, text)| {
            let token = Token { kind, text, start };
            start += text.len();
            token
        })
        .collect()
}

/// Paren depth before each token.
fn depths(tokens: &[Token<'_>]) -> Vec<usize> {
    let mut depth = 0usize;
    tokens
        .iter()
        .map(|t| {
            let before = match t.kind {
                Kind::Close => depth.saturating_sub(1),
                _ => depth,
            };
            match t.kind {
                Kind::Open => depth += 1,
                Kind::Close => depth = depth.saturating_sub(1),
                _ => {}
            }
            before
        })
        .collect()
}

/// A SELECT split into the pieces paging needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlParts {
    /// The statement as given.
    pub sql: String,
    /// The column list between `SELECT` and `FROM`, trimmed.
    pub columns: String,
    /// Everything from the column list to the end.
    pub select_removed: String,
    /// `select_removed` without its last `ORDER BY`.
    pub page_body: String,
    /// The row-count query.
    pub count: String,
    /// The last top-level `ORDER BY` clause, if any.
    pub order_by: Option<String>,
}

impl SqlParts {
    /// Whether the column list starts with `DISTINCT`.
    pub fn is_distinct(&self) -> bool {
        starts_with_keyword(&self.select_removed, "DISTINCT")
    }
}

/// Whether `sql` starts with `keyword` followed by whitespace, ignoring case
/// and leading whitespace.
pub fn starts_with_keyword(sql: &str, keyword: &str) -> bool {
    let text = sql.trim_start();
    let Some(head) = text.get(..keyword.len()) else {
        return false;
    };
    head.eq_ignore_ascii_case(keyword)
        && text[keyword.len()..]
            .chars()
            .next()
            .is_some_and(char::is_whitespace)
}

/// Locate the column list: `(start, end)` byte offsets, `end` being where
/// `FROM` begins.
fn find_columns(tokens: &[Token<'_>]) -> Option<(usize, usize)> {
    let mut iter = tokens.iter().enumerate().skip_while(|(_, t)| t.kind == Kind::Space);
    let (_, select) = iter.next()?;
    if !select.is_word("SELECT") {
        return None;
    }
    let (_, space) = iter.next()?;
    if space.kind != Kind::Space {
        return None;
    }
    let start = space.end();

    let depth = depths(tokens);
    let mut previous: Option<&Token<'_>> = None;
    for (i, token) in iter {
        if depth[i] == 0 && token.is_word("FROM") && !previous.is_some_and(|p| p.text == ",") {
            return Some((start, token.start));
        }
        if token.kind != Kind::Space {
            previous = Some(token);
        }
    }
    None
}

/// Match one ORDER BY item starting at token `i`: a run of names, dots,
/// quoted identifiers, and parenthesized groups, then an optional
/// `ASC`/`DESC`. Returns the index after the item.
fn match_order_item(tokens: &[Token<'_>], mut i: usize) -> Option<usize> {
    let begin = i;
    while let Some(token) = tokens.get(i) {
        match token.kind {
            Kind::Word | Kind::Quoted => i += 1,
            Kind::Punct if token.text == "." => i += 1,
            Kind::Open => {
                let mut depth = 0usize;
                loop {
                    let t = tokens.get(i)?;
                    match t.kind {
                        Kind::Open => depth += 1,
                        Kind::Close => depth -= 1,
                        _ => {}
                    }
                    i += 1;
                    if depth == 0 {
                        break;
                    }
                }
            }
            _ => break,
        }
    }
    if i == begin {
        return None;
    }
    if let (Some(space), Some(dir)) = (tokens.get(i), tokens.get(i + 1)) {
        if space.kind == Kind::Space && (dir.is_word("ASC") || dir.is_word("DESC")) {
            i += 2;
        }
    }
    Some(i)
}

/// Match a full ORDER BY clause whose `ORDER` token is at `i`. Returns the
/// index after the clause.
fn match_order_by(tokens: &[Token<'_>], i: usize) -> Option<usize> {
    let kind_at = |j: usize| tokens.get(j).map(|t| t.kind);
    if kind_at(i + 1) != Some(Kind::Space)
        || !tokens.get(i + 2)?.is_word("BY")
        || kind_at(i + 3) != Some(Kind::Space)
    {
        return None;
    }
    let mut end = match_order_item(tokens, i + 4)?;
    loop {
        let mut j = end;
        if kind_at(j) == Some(Kind::Space) {
            j += 1;
        }
        if tokens.get(j).is_none_or(|t| t.text != ",") {
            break;
        }
        j += 1;
        if kind_at(j) == Some(Kind::Space) {
            j += 1;
        }
        match match_order_item(tokens, j) {
            Some(next) => end = next,
            None => break,
        }
    }
    Some(end)
}

/// Find the last top-level ORDER BY clause in `sql` as byte offsets.
fn find_order_by(sql: &str) -> Option<(usize, usize)> {
    let tokens = tokenize(sql);
    let depth = depths(&tokens);
    (0..tokens.len())
        .rev()
        .filter(|&i| depth[i] == 0 && tokens[i].is_word("ORDER"))
        .find_map(|i| {
            let end = match_order_by(&tokens, i)?;
            // An ORDER BY followed by an alias belongs to a window expression
            if (end..tokens.len()).any(|j| is_alias_keyword(&tokens, j)) {
                return None;
            }
            Some((tokens[i].start, tokens[end - 1].end()))
        })
}

/// `AS` after whitespace or `)` and before whitespace.
fn is_alias_keyword(tokens: &[Token<'_>], j: usize) -> bool {
    let kind_at = |k: usize| tokens.get(k).map(|t| t.kind);
    tokens[j].is_word("AS")
        && j > 0
        && matches!(kind_at(j - 1), Some(Kind::Space | Kind::Close))
        && kind_at(j + 1) == Some(Kind::Space)
}

/// Remove `start..end` from `sql`, joining what is left with one space.
fn cut(sql: &str, start: usize, end: usize) -> String {
    let before = sql[..start].trim_end();
    let after = sql[end..].trim_start();
    if after.is_empty() {
        before.to_string()
    } else {
        format!("{} {}", before, after)
    }
}

fn without_order_by(sql: &str) -> String {
    match find_order_by(sql) {
        Some((start, end)) => cut(sql, start, end),
        None => sql.to_string(),
    }
}

/// Split a SELECT for paging.
pub fn split_sql(sql: &str) -> RowmapResult<SqlParts> {
    let tokens = tokenize(sql);
    let (start, end) = find_columns(&tokens)
        .ok_or_else(|| RowmapError::parse("Unable to parse SQL statement for paged query"))?;

    let columns = sql[start..end].trim().to_string();
    let select_removed = sql[start..].to_string();

    let replacement = if starts_with_keyword(&select_removed, "DISTINCT") {
        format!("COUNT({}) ", columns)
    } else {
        "COUNT(*) ".to_string()
    };
    let count = format!("{}{}{}", &sql[..start], replacement, &sql[end..]);

    let (count, order_by) = match find_order_by(&count) {
        Some((s, e)) => (cut(&count, s, e), Some(count[s..e].to_string())),
        None => (count, None),
    };
    let page_body = without_order_by(&select_removed);

    Ok(SqlParts {
        sql: sql.to_string(),
        columns,
        select_removed,
        page_body,
        count,
        order_by,
    })
}

/// Prefix `sql` with a SELECT over the shape's columns unless it already
/// is a complete statement.
pub fn add_select_clause<T: Shape>(
    catalog: &Catalog,
    dialect: &dyn Dialect,
    sql: &str,
) -> RowmapResult<String> {
    if let Some(rest) = sql.strip_prefix(';') {
        return Ok(rest.to_string());
    }
    if ["SELECT", "EXECUTE", "CALL"]
        .iter()
        .any(|kw| starts_with_keyword(sql, kw))
    {
        return Ok(sql.to_string());
    }

    let meta = catalog.metadata::<T>()?;
    let table = dialect.escape_table_name(meta.table_name());
    let columns = if meta.query_columns().is_empty() {
        "NULL".to_string()
    } else {
        meta.query_columns()
            .iter()
            .map(|c| format!("{}.{}", table, dialect.quote_identifier(c)))
            .collect::<Vec<_>>()
            .join(", ")
    };

    if starts_with_keyword(sql, "FROM") {
        Ok(format!("SELECT {} {}", columns, sql))
    } else {
        Ok(format!("SELECT {} FROM {} {}", columns, table, sql))
    }
}

/// The two statements behind a page: total count and the page itself.
#[derive(Debug, Clone, PartialEq)]
pub struct PageQueries {
    pub count: Statement,
    pub page: Statement,
}

/// Build count and page statements for `sql`, skipping `skip` rows and
/// taking `take`.
pub fn build_page_queries(
    dialect: &dyn Dialect,
    skip: i64,
    take: i64,
    sql: &str,
    args: Vec<Value>,
) -> RowmapResult<PageQueries> {
    let parts = split_sql(sql)?;
    let mut page_args = args.clone();
    let page_sql = dialect.build_page_query(skip, take, &parts, &mut page_args);
    Ok(PageQueries {
        count: Statement::new(parts.count, args),
        page: Statement::new(page_sql, page_args),
    })
}

/// One page of results plus totals.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    /// 1-based page number.
    pub current_page: i64,
    pub total_pages: i64,
    pub total_items: i64,
    pub items_per_page: i64,
    pub items: Vec<T>,
}

impl<T> Page<T> {
    pub fn new(current_page: i64, items_per_page: i64, total_items: i64, items: Vec<T>) -> Self {
        let total_pages = if items_per_page > 0 {
            total_items / items_per_page + i64::from(total_items % items_per_page != 0)
        } else {
            0
        };
        Self {
            current_page,
            total_pages,
            total_items,
            items_per_page,
            items,
        }
    }

    /// Rows to skip to reach `page`.
    pub fn skip_for(page: i64, items_per_page: i64) -> i64 {
        page.saturating_sub(1).max(0).saturating_mul(items_per_page)
    }
}
