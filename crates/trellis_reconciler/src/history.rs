//! Pre-transaction snapshots, kept so a host can step back in time.

use core::fmt;
use std::collections::VecDeque;
use trellis_graph::GraphStore;
use uuid::Uuid;

/// Identity of one transaction.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TxId(Uuid);

impl TxId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub const fn uuid(self) -> Uuid {
        self.0
    }
}

impl Default for TxId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "tx:{}", self.0)
    }
}

/// A bounded store of snapshots keyed by transaction.
pub trait History {
    /// Keep `snapshot` as the state before `tx`, evicting the oldest entry
    /// when full.
    fn record(&mut self, tx: TxId, snapshot: GraphStore);

    fn get(&self, tx: TxId) -> Option<&GraphStore>;

    /// Every kept snapshot, oldest first.
    fn all(&self) -> Vec<(TxId, &GraphStore)>;

    fn last(&self) -> Option<(TxId, &GraphStore)>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn capacity(&self) -> usize;
}

/// FIFO [`History`] with a fixed capacity.
#[derive(Clone, Debug)]
pub struct TxHistory {
    capacity: usize,
    entries: VecDeque<(TxId, GraphStore)>,
}

impl TxHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }
}

impl History for TxHistory {
    fn record(&mut self, tx: TxId, snapshot: GraphStore) {
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back((tx, snapshot));
    }

    fn get(&self, tx: TxId) -> Option<&GraphStore> {
        self.entries
            .iter()
            .find(|(id, _)| *id == tx)
            .map(|(_, snapshot)| snapshot)
    }

    fn all(&self) -> Vec<(TxId, &GraphStore)> {
        self.entries
            .iter()
            .map(|(id, snapshot)| (*id, snapshot))
            .collect()
    }

    fn last(&self) -> Option<(TxId, &GraphStore)> {
        self.entries.back().map(|(id, snapshot)| (*id, snapshot))
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}
