//! EDN text form for queries and values.
//!
//! Text is first read into a small [`Form`] tree with `nom`, then shaped
//! into a [`Query`], [`Subquery`] or [`Value`]. Printing goes through the
//! `Display` impls of those types, so anything printed parses back.

use crate::error::QueryError;
use crate::query::{Expr, Key, Params, Query, Recursion, Subquery, Union};
use crate::value::{Ident, Keyword, Symbol, TempId, Value};
use core::str::FromStr;
use nom::{
    Err as ParseErr, IResult,
    branch::alt,
    bytes::complete::{escaped_transform, is_not, tag, take_while, take_while1},
    character::complete::{char, digit1},
    combinator::{map, map_res, opt, recognize, value},
    error::Error as ParseError,
    multi::many0,
    sequence::{delimited, pair, preceded, terminated},
};
use uuid::Uuid;

/// Raw EDN read from text, before any query interpretation.
#[derive(Clone, Debug, PartialEq, Eq)]
enum Form {
    Nil,
    Bool(bool),
    Int(i64),
    Str(String),
    Keyword(Keyword),
    Symbol(Symbol),
    TempId(TempId),
    Vector(Vec<Form>),
    List(Vec<Form>),
    Map(Vec<(Form, Form)>),
}

impl Form {
    /// Whether this form may be the id half of `[:table id]`. Keywords are
    /// excluded so `[:a :b]` stays a sequence of keywords.
    const fn is_ident_id(&self) -> bool {
        !matches!(
            self,
            Self::Vector(_) | Self::List(_) | Self::Map(_) | Self::Keyword(_)
        )
    }
}

fn is_symbol_char(character: char) -> bool {
    character.is_alphanumeric() || "*+!-_?<>=/.&%$'".contains(character)
}

/// Whitespace; commas count as whitespace in EDN.
fn whitespace(input: &str) -> IResult<&str, &str> {
    take_while(|character: char| character.is_whitespace() || character == ',')(input)
}

fn string_literal(input: &str) -> IResult<&str, String> {
    let escapes = alt((
        value("\\", tag("\\")),
        value("\"", tag("\"")),
        value("\n", tag("n")),
    ));
    map(
        delimited(
            char('"'),
            opt(escaped_transform(is_not("\\\""), '\\', escapes)),
            char('"'),
        ),
        Option::unwrap_or_default,
    )(input)
}

fn tempid(input: &str) -> IResult<&str, Form> {
    map_res(
        preceded(pair(tag("#tempid"), whitespace), string_literal),
        |text: String| Uuid::parse_str(&text).map(|uuid| Form::TempId(TempId::from_uuid(uuid))),
    )(input)
}

fn keyword(input: &str) -> IResult<&str, Form> {
    map(preceded(char(':'), take_while1(is_symbol_char)), |name: &str| {
        Form::Keyword(Keyword::new(name))
    })(input)
}

fn integer(input: &str) -> IResult<&str, Form> {
    map_res(recognize(pair(opt(char('-')), digit1)), |digits: &str| {
        digits.parse::<i64>().map(Form::Int)
    })(input)
}

fn symbol(input: &str) -> IResult<&str, Form> {
    map(take_while1(is_symbol_char), |name: &str| match name {
        "nil" => Form::Nil,
        "true" => Form::Bool(true),
        "false" => Form::Bool(false),
        other => Form::Symbol(Symbol::new(other)),
    })(input)
}

fn vector(input: &str) -> IResult<&str, Form> {
    map(
        delimited(char('['), many0(form), preceded(whitespace, char(']'))),
        Form::Vector,
    )(input)
}

fn list(input: &str) -> IResult<&str, Form> {
    map(
        delimited(char('('), many0(form), preceded(whitespace, char(')'))),
        Form::List,
    )(input)
}

fn map_literal(input: &str) -> IResult<&str, Form> {
    map(
        delimited(
            char('{'),
            many0(pair(form, form)),
            preceded(whitespace, char('}')),
        ),
        Form::Map,
    )(input)
}

fn form(input: &str) -> IResult<&str, Form> {
    preceded(
        whitespace,
        alt((
            map(string_literal, Form::Str),
            tempid,
            keyword,
            vector,
            list,
            map_literal,
            integer,
            symbol,
        )),
    )(input)
}

fn syntax_error(error: &ParseErr<ParseError<&str>>) -> QueryError {
    match error {
        ParseErr::Error(inner) | ParseErr::Failure(inner) => QueryError::Syntax {
            fragment: inner.input.chars().take(24).collect(),
            message: inner.code.description().to_owned(),
        },
        ParseErr::Incomplete(_) => QueryError::Syntax {
            fragment: String::new(),
            message: "unexpected end of input".to_owned(),
        },
    }
}

fn read_form(text: &str) -> Result<Form, QueryError> {
    let (rest, parsed) = terminated(form, whitespace)(text).map_err(|error| syntax_error(&error))?;
    if rest.is_empty() {
        Ok(parsed)
    } else {
        Err(QueryError::Syntax {
            fragment: rest.chars().take(24).collect(),
            message: "trailing input".to_owned(),
        })
    }
}

fn into_value(form: Form) -> Value {
    match form {
        Form::Nil => Value::Nil,
        Form::Bool(flag) => Value::Bool(flag),
        Form::Int(number) => Value::Int(number),
        Form::Str(text) => Value::Str(text),
        Form::Keyword(keyword) => Value::Keyword(keyword),
        Form::Symbol(symbol) => Value::Symbol(symbol),
        Form::TempId(tempid) => Value::TempId(tempid),
        Form::Vector(items) => match <[Form; 2]>::try_from(items) {
            Ok([Form::Keyword(table), id]) if id.is_ident_id() => Value::Ident(Ident {
                table,
                id: Box::new(into_value(id)),
            }),
            Ok(pair) => Value::Seq(pair.into_iter().map(into_value).collect()),
            Err(items) => Value::Seq(items.into_iter().map(into_value).collect()),
        },
        Form::List(items) => Value::Seq(items.into_iter().map(into_value).collect()),
        Form::Map(entries) => Value::Map(
            entries
                .into_iter()
                .map(|(key, item)| (into_value(key), into_value(item)))
                .collect(),
        ),
    }
}

fn malformed(what: &str, form: Form) -> QueryError {
    QueryError::Malformed(format!("{what}, found {}", into_value(form)))
}

fn into_key(form: Form) -> Result<Key, QueryError> {
    match form {
        Form::Keyword(keyword) => Ok(Key::Prop(keyword)),
        Form::Symbol(symbol) => Ok(Key::Mutation(symbol)),
        vector @ Form::Vector(_) => match into_value(vector) {
            Value::Ident(ident) => Ok(Key::Ident(ident)),
            _ => Err(QueryError::Malformed(
                "a vector key must be an ident like [:table id]".to_owned(),
            )),
        },
        other => Err(malformed("expected a keyword, symbol or ident key", other)),
    }
}

fn into_params(form: Form) -> Result<Params, QueryError> {
    match form {
        Form::Map(entries) => entries
            .into_iter()
            .map(|(key, item)| match key {
                Form::Keyword(name) => Ok((name, into_value(item))),
                other => Err(malformed("parameter names must be keywords", other)),
            })
            .collect(),
        other => Err(malformed("call parameters must be a map", other)),
    }
}

fn into_expr(form: Form) -> Result<Expr, QueryError> {
    match form {
        Form::Keyword(_) | Form::Symbol(_) | Form::Vector(_) => into_key(form).map(Expr::Prop),
        Form::Map(entries) => {
            let Ok([(key, target)]) = <[(Form, Form); 1]>::try_from(entries) else {
                return Err(QueryError::Malformed(
                    "a join must be a map with exactly one entry".to_owned(),
                ));
            };
            Ok(Expr::Join(into_key(key)?, into_subquery(target)?))
        }
        Form::List(items) => {
            let mut items = items.into_iter();
            let head = items
                .next()
                .ok_or_else(|| QueryError::Malformed("empty call".to_owned()))?;
            let params = items.next().map_or_else(|| Ok(Params::new()), into_params)?;
            if let Some(extra) = items.next() {
                return Err(malformed("a call takes a single parameter map", extra));
            }
            Ok(Expr::Call(Box::new(into_expr(head)?), params))
        }
        other => Err(malformed("expected a query expression", other)),
    }
}

fn into_query(form: Form) -> Result<Query, QueryError> {
    match form {
        Form::Vector(items) => items.into_iter().map(into_expr).collect(),
        other => Err(malformed("a query must be a vector", other)),
    }
}

fn into_subquery(form: Form) -> Result<Subquery, QueryError> {
    match form {
        Form::Vector(_) => into_query(form).map(Subquery::Query),
        Form::Symbol(symbol) if symbol.name() == Symbol::RECURSION => {
            Ok(Subquery::Recur(Recursion::Unbounded))
        }
        Form::Int(depth) => u32::try_from(depth)
            .map(|depth| Subquery::Recur(Recursion::Depth(depth)))
            .map_err(|_| malformed("recursion depth must be non-negative", Form::Int(depth))),
        Form::Map(entries) => entries
            .into_iter()
            .map(|(tag, branch)| match tag {
                Form::Keyword(tag) => Ok((tag, into_query(branch)?)),
                other => Err(malformed("union tags must be keywords", other)),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(|branches| Subquery::Union(Union::new(branches))),
        other => Err(malformed("expected a query, union or recursion marker", other)),
    }
}

/// Read a query (`[...]`).
///
/// # Errors
/// [`QueryError::Syntax`] for unreadable text, [`QueryError::Malformed`]
/// for readable text that is not a query.
pub fn parse_query(text: &str) -> Result<Query, QueryError> {
    into_query(read_form(text)?)
}

/// Read a query or a union (`{:tag [...] ...}`), the two shapes a class
/// may declare.
///
/// # Errors
/// Same as [`parse_query`].
pub fn parse_subquery(text: &str) -> Result<Subquery, QueryError> {
    into_subquery(read_form(text)?)
}

/// Read a data value.
///
/// A two-element vector of a keyword and a non-keyword scalar, like
/// `[:person/by-id 1]`, reads as an [`Ident`]. Any other vector is a
/// sequence, so `[:a :b]` stays two keywords.
///
/// # Errors
/// [`QueryError::Syntax`] for unreadable text.
pub fn parse_value(text: &str) -> Result<Value, QueryError> {
    read_form(text).map(into_value)
}

impl FromStr for Query {
    type Err = QueryError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        parse_query(text)
    }
}

impl FromStr for Value {
    type Err = QueryError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        parse_value(text)
    }
}
