//! Graph store and normalization for the Trellis data layer.
//!
//! Application state lives in a [`GraphStore`]: a flat map of tables keyed
//! by entity id, plus root properties that point into those tables with
//! idents. This crate moves data between that graph form and the nested
//! tree form consumers read:
//! - [`normalize`] pulls identified objects out of a tree into tables
//! - [`denormalize`] follows idents back out into a tree shaped by a query
//! - [`sift`] and [`migrate`] fold server deltas and tempid mappings in
//!
//! Every store mutation advances the store's [`Revision`].

#![allow(
    clippy::module_name_repetitions,
    reason = "GraphStore and GraphError read better than Store and Error"
)]

mod denormalize;
mod error;
mod merge;
mod normalize;
mod revision;
mod store;

pub use denormalize::{db_to_tree, denormalize, denormalize_with};
pub use error::GraphError;
pub use merge::{Sifted, TEMPIDS_KEY, TempIds, migrate, rewrite_value, sift};
pub use normalize::{Normalized, normalize, normalize_union, tree_to_db};
pub use revision::Revision;
pub use store::{GraphStore, Tables};
