//! The seam between the reconciler and the component runtime hosting the
//! consumers.
//!
//! The reconciler never owns consumer instances. It names them by
//! [`InstanceId`] and asks the [`Host`] about their class, place in the tree
//! and last rendered value, and tells it when to re-render.

use core::fmt;
use core::time::Duration;
use smallvec::SmallVec;
use trellis_query::{ClassId, Key, Map, Subquery, Value};

/// Identity of a mounted consumer, assigned by the host.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstanceId(pub u64);

impl fmt::Display for InstanceId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "#{}", self.0)
    }
}

/// One step from the root data to the data a consumer renders.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Key(Key),
    /// Position inside a sequence of joined entities.
    Index(usize),
}

impl From<Key> for PathSegment {
    fn from(key: Key) -> Self {
        Self::Key(key)
    }
}

impl From<&str> for PathSegment {
    fn from(name: &str) -> Self {
        Self::Key(Key::prop(name))
    }
}

impl From<usize> for PathSegment {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

/// Path from the root result to a consumer's data.
pub type DataPath = SmallVec<PathSegment, 4>;

/// The keys of `path`, with sequence indices dropped.
pub fn path_keys(path: &[PathSegment]) -> Vec<Key> {
    path.iter()
        .filter_map(|segment| match segment {
            PathSegment::Key(key) => Some(key.clone()),
            PathSegment::Index(_) => None,
        })
        .collect()
}

/// The value at `path` inside `value`.
pub fn get_in<'value>(value: &'value Value, path: &[PathSegment]) -> Option<&'value Value> {
    path.iter().try_fold(value, |current, segment| match (segment, current) {
        (PathSegment::Key(key), Value::Map(map)) => map.get(&key.to_value()),
        (PathSegment::Index(index), Value::Seq(items)) => items.get(*index),
        _ => None,
    })
}

/// Render path in the `:a 0 :b` form used in log lines and errors.
pub fn display_path(path: &[PathSegment]) -> String {
    let parts: Vec<String> = path
        .iter()
        .map(|segment| match segment {
            PathSegment::Key(key) => key.to_string(),
            PathSegment::Index(index) => index.to_string(),
        })
        .collect();
    format!("[{}]", parts.join(" "))
}

/// Which flush the reconciler wants run.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum FlushKind {
    /// Run [`crate::Reconciler::reconcile`].
    Render,
    /// Run [`crate::Reconciler::send`].
    Send,
}

/// The component runtime as the reconciler sees it.
pub trait Host {
    /// The mounted root consumer, if any.
    fn root(&self) -> Option<InstanceId>;

    fn class_of(&self, instance: InstanceId) -> Option<ClassId>;

    fn parent(&self, instance: InstanceId) -> Option<InstanceId>;

    /// Distance from the root consumer, which has depth 0.
    fn depth(&self, instance: InstanceId) -> usize;

    fn is_mounted(&self, instance: InstanceId) -> bool;

    /// Props the instance was last rendered with.
    fn props(&self, instance: InstanceId) -> Option<Map>;

    /// Where the instance's props sit inside the root result.
    fn path(&self, instance: InstanceId) -> DataPath;

    /// The instance's own query, when it overrides its class query.
    fn query(&self, _instance: InstanceId) -> Option<Subquery> {
        None
    }

    fn rendered_value(&self, instance: InstanceId) -> Option<Value>;

    /// Whether rendering `next` would change what the instance shows.
    fn should_update(&self, instance: InstanceId, next: &Value) -> bool {
        self.rendered_value(instance).as_ref() != Some(next)
    }

    fn force_rerender(&mut self, instance: InstanceId, next: Value);

    /// Render the whole tree again from `data`.
    fn render_root(&mut self, data: Value);

    /// Ask for `kind` to be run after `delay`.
    fn request_flush(&mut self, _kind: FlushKind, _delay: Duration) {}
}
