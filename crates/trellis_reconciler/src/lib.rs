//! Keeps mounted consumers in step with a normalized graph store.
//!
//! A host component runtime mounts consumers, each an instance of a
//! [`trellis_query::ComponentClass`] with a query. The [`Reconciler`] owns
//! the state and:
//! - indexes which consumers read which properties and idents ([`Indexer`])
//! - runs transactions through a [`Parser`] and queues what they touched
//! - re-renders exactly the consumers whose props changed ([`Reconciler::reconcile`])
//! - ships remote fragments through a [`Transport`] and merges the answers
//!
//! The host is passed into every operation that touches instances; nothing
//! here holds on to it.

#![allow(
    clippy::module_name_repetitions,
    reason = "ReconcilerConfig and ReconcileError read better than Config and Error"
)]

mod config;
mod error;
mod history;
mod host;
mod indexer;
mod parser;
mod queue;
mod reconciler;
mod schedule;
mod transport;

pub use config::ReconcilerConfig;
pub use error::ReconcileError;
pub use history::{History, TxHistory, TxId};
pub use host::{DataPath, FlushKind, Host, InstanceId, PathSegment, display_path, get_in, path_keys};
pub use indexer::{ClassPath, IndexStats, Indexer, InstanceView};
pub use parser::{KEYS_KEY, MutateEnv, MutationFn, Parser, RESULT_KEY, ReadEnv, StoreParser, affected_keys};
pub use queue::{QueueKey, SendQueue, WorkQueue};
pub use reconciler::{ReconcileReport, Reconciler, TxListener, TxOrigin, TxReport};
pub use schedule::Schedule;
pub use transport::{RemoteResponse, ResponseSink, Transport};
