use crate::component::ClassId;
use thiserror::Error;

/// Failures while reading, shaping or owning queries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    /// The text is not a well-formed EDN form.
    #[error("syntax error near `{fragment}`: {message}")]
    Syntax { fragment: String, message: String },

    /// The form is valid EDN but not a valid query or value.
    #[error("malformed query: {0}")]
    Malformed(String),

    /// A query already owned by one class was handed to another.
    #[error("query reuse violation: {owner} returned the query owned by {reused}")]
    QueryReuseViolation { owner: ClassId, reused: ClassId },

    #[error("component class {0} declares no query")]
    NoQuery(ClassId),

    #[error("unknown component class {0}")]
    UnknownClass(ClassId),
}
