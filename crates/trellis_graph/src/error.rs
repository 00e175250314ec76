use thiserror::Error;
use trellis_query::{Keyword, QueryError};

/// Failures while moving data between tree and graph form.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// Union data whose identity no class could compute.
    #[error("union data has no identity; branches are {branches:?}")]
    UnionWithoutIdentity { branches: Vec<Keyword> },

    /// An identity whose table is not one of the union's branches.
    #[error("union has no branch for table {table}")]
    UnknownBranch { table: Keyword },

    #[error("expected a map at the root of the tree")]
    NotAMap,

    #[error(transparent)]
    Query(#[from] QueryError),
}
