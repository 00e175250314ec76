use crate::queue::QueueKey;
use thiserror::Error;
use trellis_graph::GraphError;
use trellis_query::{ClassId, QueryError};

/// Failures while indexing consumers or flushing work.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The key names no instance, entity bucket or indexed property.
    #[error("invalid key {0}: no consumer is indexed under it")]
    InvalidKey(QueueKey),

    /// No indexed template leads to the consumer's data path.
    #[error("no queries for class path {class_path} at data path {path}")]
    NoQueriesForPath { class_path: String, path: String },

    #[error("no root has been added")]
    NoRoot,

    /// Root queries must be sequences; a union cannot be rendered at the root.
    #[error("root class {0} declares a union query")]
    RootNotSequence(ClassId),

    #[error("no transport is configured")]
    NoTransport,

    #[error("parser failed: {0:#}")]
    Parser(anyhow::Error),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Graph(#[from] GraphError),
}
