//! Pending render work and pending remote sends.

use crate::host::InstanceId;
use core::fmt;
use core::mem;
use rustc_hash::FxHashSet;
use std::collections::BTreeMap;
use trellis_graph::TempIds;
use trellis_query::{Ident, Key, Keyword, Query};

/// Something whose consumers must be refreshed.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum QueueKey {
    /// The whole tree.
    Root,
    Instance(InstanceId),
    /// Every consumer showing this entity.
    Ident(Ident),
    /// Every consumer whose class reads this property.
    Prop(Keyword),
}

impl QueueKey {
    /// The queue key for a result or query key; mutations name nothing to refresh.
    pub fn from_key(key: &Key) -> Option<Self> {
        match key {
            Key::Prop(keyword) => Some(Self::Prop(keyword.clone())),
            Key::Ident(ident) if ident.is_link() => Some(Self::Prop(ident.table.clone())),
            Key::Ident(ident) => Some(Self::Ident(ident.clone())),
            Key::Mutation(_) => None,
        }
    }
}

impl From<InstanceId> for QueueKey {
    fn from(instance: InstanceId) -> Self {
        Self::Instance(instance)
    }
}

impl From<Ident> for QueueKey {
    fn from(ident: Ident) -> Self {
        Self::Ident(ident)
    }
}

impl From<Keyword> for QueueKey {
    fn from(keyword: Keyword) -> Self {
        Self::Prop(keyword)
    }
}

impl fmt::Display for QueueKey {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Root => formatter.write_str("root"),
            Self::Instance(instance) => write!(formatter, "{instance}"),
            Self::Ident(ident) => write!(formatter, "{ident}"),
            Self::Prop(keyword) => write!(formatter, "{keyword}"),
        }
    }
}

/// Keys waiting for the next render flush, in arrival order, each once.
#[derive(Clone, Debug, Default)]
pub struct WorkQueue {
    order: Vec<QueueKey>,
    seen: FxHashSet<QueueKey>,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a key; returns false if it was already queued.
    pub fn push(&mut self, key: QueueKey) -> bool {
        if !self.seen.insert(key.clone()) {
            return false;
        }
        self.order.push(key);
        true
    }

    pub fn extend(&mut self, keys: impl IntoIterator<Item = QueueKey>) {
        for key in keys {
            self.push(key);
        }
    }

    /// Take every queued key, leaving the queue empty.
    pub fn take(&mut self) -> Vec<QueueKey> {
        self.seen.clear();
        mem::take(&mut self.order)
    }

    pub fn contains(&self, key: &QueueKey) -> bool {
        self.seen.contains(key)
    }

    /// The queued keys in arrival order.
    pub fn keys(&self) -> &[QueueKey] {
        &self.order
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.seen.clear();
    }

    /// Point queued temporary idents at their permanent idents.
    pub fn rewrite(&mut self, tempids: &TempIds) {
        if tempids.is_empty() {
            return;
        }
        let keys = self.take();
        self.extend(keys.into_iter().map(|key| match key {
            QueueKey::Ident(ident) => {
                QueueKey::Ident(tempids.get(&ident).cloned().unwrap_or(ident))
            }
            other => other,
        }));
    }
}

/// Query fragments waiting to be sent, per remote target.
#[derive(Clone, Debug, Default)]
pub struct SendQueue {
    fragments: BTreeMap<Keyword, Query>,
}

impl SendQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `fragment` for `target` after what is already queued.
    pub fn push(&mut self, target: Keyword, fragment: Query) {
        match self.fragments.get_mut(&target) {
            Some(queued) => queued.absorb(fragment),
            None => {
                self.fragments.insert(target, fragment);
            }
        }
    }

    /// Swap out every queued fragment.
    pub fn take(&mut self) -> BTreeMap<Keyword, Query> {
        mem::take(&mut self.fragments)
    }

    pub fn clear(&mut self) {
        self.fragments.clear();
    }

    pub fn get(&self, target: &Keyword) -> Option<&Query> {
        self.fragments.get(target)
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }
}
