//! Query language of the Trellis data layer.
//!
//! Consumers describe the data they need as a [`Query`]: an ordered list of
//! property reads, joins into nested queries, unions keyed by entity table,
//! recursion markers and parameterised calls. This crate provides:
//! - The EDN-shaped [`Value`] model shared with the graph store
//! - Query expressions, their text form and a structural [`Ast`]
//! - Parameter binding
//! - Focusing a query on a key path and splicing sub-queries back
//! - [`ComponentClass`] capability records and the [`Registry`] holding them
//!
//! # Example
//!
//! ```
//! use trellis_query::{focus, parse_query, Key};
//!
//! let query = parse_query("[:title {:people [:name {:friends [:name]}]}]").unwrap();
//! let focused = focus(&query, &[Key::prop("people")]);
//! assert_eq!(focused.to_string(), "[{:people [:name {:friends [:name]}]}]");
//! ```

#![allow(
    clippy::module_name_repetitions,
    reason = "Types like QueryError read better than bare Error"
)]
#![allow(clippy::missing_errors_doc, reason = "Errors are documented per type")]

mod ast;
mod component;
mod error;
mod focus;
mod query;
mod syntax;
mod value;

pub use ast::{Ast, AstKind, AstNode, JoinTarget, UnionAst, from_ast, to_ast};
pub use component::{ClassId, ComponentClass, IdentFn, Registry};
pub use error::QueryError;
pub use focus::{PathBound, TemplateCursor, focus, path_from_focused, template};
pub use query::{Expr, Key, Params, Query, Recursion, Subquery, Union, bind_value};
pub use syntax::{parse_query, parse_subquery, parse_value};
pub use value::{Ident, Keyword, Map, Symbol, TempId, Value};
