//! Parameter substitution using nom.
//!
//! Rewrites `@0` / `@name` placeholders into positional placeholders over an
//! ordered argument list:
//!
//! ```text
//! SELECT * FROM t WHERE id IN (@ids) AND kind = @0 AND mail LIKE '%@@%'
//!                              ─┬──             ─┬          ─┬
//!                               │                │           └── escaped, becomes a literal '@'
//!                               │                └── argument by position
//!                               └── property of a record argument; lists expand to @n,@n+1,...
//! ```

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::char,
    combinator::{map, value},
    multi::many0,
    sequence::preceded,
    IResult,
};

use crate::error::{RowmapError, RowmapResult};
use crate::value::Value;

/// SQL text plus the arguments its positional placeholders refer to.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub args: Vec<Value>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            args,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token<'a> {
    Text(&'a str),
    EscapedAt,
    Placeholder(&'a str),
    LoneAt,
}

fn is_word(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn parse_token(input: &str) -> IResult<&str, Token<'_>> {
    alt((
        value(Token::EscapedAt, tag("@@")),
        map(preceded(char('@'), take_while1(is_word)), Token::Placeholder),
        value(Token::LoneAt, char('@')),
        map(take_while1(|c: char| c != '@'), Token::Text),
    ))(input)
}

fn tokenize(sql: &str) -> Vec<Token<'_>> {
    match many0(parse_token)(sql) {
        Ok((_, tokens)) => tokens,
        Err(_) => vec![Token::Text(sql)],
    }
}

fn resolve<'a>(name: &str, args: &'a [Value], sql: &str) -> RowmapResult<&'a Value> {
    if name.chars().all(|c| c.is_ascii_digit()) {
        return name
            .parse::<usize>()
            .ok()
            .and_then(|i| args.get(i))
            .ok_or_else(|| RowmapError::OutOfRange {
                index: name.to_string(),
                count: args.len(),
                sql: sql.to_string(),
            });
    }
    args.iter()
        .find_map(|arg| arg.property(name))
        .ok_or_else(|| RowmapError::NameResolution {
            name: name.to_string(),
            sql: sql.to_string(),
        })
}

/// Substitute placeholders, emitting `@0`, `@1`, ...
pub fn substitute(sql: &str, args: &[Value]) -> RowmapResult<Statement> {
    substitute_with(sql, args, |i| format!("@{}", i))
}

/// Substitute placeholders, letting `placeholder` render each position.
pub fn substitute_with(
    sql: &str,
    args: &[Value],
    placeholder: impl Fn(usize) -> String,
) -> RowmapResult<Statement> {
    let mut out = String::with_capacity(sql.len());
    let mut bound: Vec<Value> = Vec::new();
    let mut after_escape = false;

    for token in tokenize(sql) {
        match token {
            Token::Text(text) => out.push_str(text),
            Token::EscapedAt | Token::LoneAt => out.push('@'),
            // `@@@x` is an escaped '@' followed by literal text
            Token::Placeholder(name) if after_escape => {
                out.push('@');
                out.push_str(name);
            }
            Token::Placeholder(name) => match resolve(name, args, sql)? {
                Value::List(items) => {
                    for (k, item) in items.iter().enumerate() {
                        if k > 0 {
                            out.push(',');
                        }
                        out.push_str(&placeholder(bound.len()));
                        bound.push(item.clone());
                    }
                }
                other => {
                    out.push_str(&placeholder(bound.len()));
                    bound.push(other.clone());
                }
            },
        }
        after_escape = token == Token::EscapedAt;
    }

    Ok(Statement::new(out, bound))
}

/// Collapse `@@` escapes without touching placeholders.
pub fn collapse_escapes(sql: &str) -> String {
    sql.replace("@@", "@")
}

/// Render a statement and its arguments for logs.
pub fn format_command(sql: &str, args: &[Value]) -> String {
    let mut out = sql.to_string();
    for (i, arg) in args.iter().enumerate() {
        out.push_str(&format!("\n\t -> @{} [{}] = \"{}\"", i, arg.type_name(), arg));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_positional() {
        let stmt = substitute("SELECT * FROM t WHERE a=@1 AND b=@0", &[1.into(), "x".into()]).unwrap();
        assert_eq!(stmt.sql, "SELECT * FROM t WHERE a=@0 AND b=@1");
        assert_eq!(stmt.args, vec![Value::from("x"), Value::Int(1)]);
    }

    #[test]
    fn test_repeated_placeholder_binds_twice() {
        let stmt = substitute("@0 + @0", &[Value::Int(3)]).unwrap();
        assert_eq!(stmt.sql, "@0 + @1");
        assert_eq!(stmt.args.len(), 2);
    }

    #[test]
    fn test_named_from_first_record_with_property() {
        let args = vec![
            Value::Int(5),
            Value::record([("name", Value::from("ann"))]),
            Value::record([("name", Value::from("bob")), ("age", Value::Int(30))]),
        ];
        let stmt = substitute("name=@name AND age>@age", &args).unwrap();
        assert_eq!(stmt.sql, "name=@0 AND age>@1");
        assert_eq!(stmt.args, vec![Value::from("ann"), Value::Int(30)]);
    }

    #[test]
    fn test_named_is_case_sensitive() {
        let args = vec![Value::record([("Name", Value::from("ann"))])];
        let err = substitute("@name", &args).unwrap_err();
        assert!(matches!(err, RowmapError::NameResolution { ref name, .. } if name == "name"));
    }

    #[test]
    fn test_out_of_range() {
        let err = substitute("x=@2", &[Value::Int(1)]).unwrap_err();
        assert!(matches!(err, RowmapError::OutOfRange { count: 1, .. }));
    }

    #[test]
    fn test_escaped_at_is_literal() {
        let stmt = substitute("SELECT '@@foo', @@@0, a@@b FROM t WHERE x=@0", &[Value::Int(1)]).unwrap();
        assert_eq!(stmt.sql, "SELECT '@foo', @@0, a@b FROM t WHERE x=@0");
        assert_eq!(stmt.args, vec![Value::Int(1)]);
    }

    #[test]
    fn test_list_expands_in_order() {
        let args = vec![Value::record([("ids", Value::list([4, 5, 6]))]), Value::Int(9)];
        let stmt = substitute("id IN (@ids) AND x=@1", &args).unwrap();
        assert_eq!(stmt.sql, "id IN (@0,@1,@2) AND x=@3");
        assert_eq!(
            stmt.args,
            vec![Value::Int(4), Value::Int(5), Value::Int(6), Value::Int(9)]
        );
    }

    #[test]
    fn test_empty_and_single_lists() {
        let stmt = substitute("IN (@0)", &[Value::List(vec![])]).unwrap();
        assert_eq!(stmt.sql, "IN ()");
        assert!(stmt.args.is_empty());

        let stmt = substitute("IN (@0)", &[Value::list(["a"])]).unwrap();
        assert_eq!(stmt.sql, "IN (@0)");
    }

    #[test]
    fn test_strings_and_bytes_are_scalars() {
        let stmt = substitute("@0 @1", &[Value::from("abc"), Value::Bytes(vec![1, 2])]).unwrap();
        assert_eq!(stmt.sql, "@0 @1");
        assert_eq!(stmt.args.len(), 2);
    }

    #[test]
    fn test_custom_placeholder_style() {
        let stmt = substitute_with("a=@0 AND b=@0", &[Value::Int(1)], |i| format!("${}", i + 1)).unwrap();
        assert_eq!(stmt.sql, "a=$1 AND b=$2");
    }

    #[test]
    fn test_lone_at_passes_through() {
        let stmt = substitute("SELECT @ FROM t", &[]).unwrap();
        assert_eq!(stmt.sql, "SELECT @ FROM t");
    }

    #[test]
    fn test_format_command() {
        let text = format_command("SELECT @0, @1", &[Value::Int(1), Value::from("a")]);
        assert_eq!(text, "SELECT @0, @1\n\t -> @0 [Int] = \"1\"\n\t -> @1 [String] = \"a\"");
    }
}
