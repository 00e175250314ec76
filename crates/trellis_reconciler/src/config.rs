//! Configuration settings for the reconciler.
//!
//! This module defines whether merged data is normalized, how much
//! transaction history is kept, which remote targets exist and how long
//! flush requests are coalesced. Configuration can be loaded from
//! environment variables or constructed programmatically.

use core::time::Duration;
use std::env;
use trellis_query::Keyword;

/// Runtime configuration for a [`crate::Reconciler`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// Whether initial trees and merged novelty are normalized against the root query
    pub normalize: bool,
    /// Number of pre-transaction snapshots kept in history (minimum 1)
    pub history_capacity: usize,
    /// Remote targets a transaction may produce fragments for
    pub remotes: Vec<Keyword>,
    /// Key set to the permanent id on entities migrated from a tempid
    pub id_key: Option<Keyword>,
    /// Delay the host is asked to wait before running a requested flush
    pub coalesce_ms: u64,
    /// Whether queued consumers are refreshed in ascending depth order
    pub optimize: bool,
}

impl ReconcilerConfig {
    /// Construct a new `ReconcilerConfig` with explicit values.
    ///
    /// # Arguments
    ///
    /// * `normalize` - Whether to normalize initial trees and merged novelty
    /// * `history_capacity` - Snapshots kept in history (minimum 1)
    /// * `remotes` - Remote targets transactions may be sent to
    /// * `id_key` - Optional key set to the permanent id on migration
    /// * `coalesce_ms` - Flush coalescing delay in milliseconds
    /// * `optimize` - Whether to refresh consumers in depth order
    ///
    /// # Returns
    ///
    /// A new `ReconcilerConfig` instance with the specified settings
    #[inline]
    #[must_use]
    pub const fn new(
        normalize: bool,
        history_capacity: usize,
        remotes: Vec<Keyword>,
        id_key: Option<Keyword>,
        coalesce_ms: u64,
        optimize: bool,
    ) -> Self {
        let capacity = if history_capacity < 1 {
            1
        } else {
            history_capacity
        };
        Self {
            normalize,
            history_capacity: capacity,
            remotes,
            id_key,
            coalesce_ms,
            optimize,
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Reads the following environment variables:
    /// - `TRELLIS_NORMALIZE`: Set to "0" to disable normalization (default: enabled)
    /// - `TRELLIS_HISTORY`: History capacity (default: 100)
    /// - `TRELLIS_REMOTES`: Comma-separated remote targets (default: "remote")
    /// - `TRELLIS_ID_KEY`: Keyword set to permanent ids on migration (default: none)
    /// - `TRELLIS_COALESCE_MS`: Flush coalescing delay in milliseconds (default: 0)
    /// - `TRELLIS_OPTIMIZE`: Set to "0" to disable depth ordering (default: enabled)
    ///
    /// # Returns
    ///
    /// A new `ReconcilerConfig` instance populated from environment variables
    #[inline]
    #[must_use]
    pub fn from_env() -> Self {
        let normalize = env::var("TRELLIS_NORMALIZE").ok().as_deref() != Some("0");
        let history_capacity = env::var("TRELLIS_HISTORY")
            .ok()
            .and_then(|val| val.parse::<usize>().ok())
            .unwrap_or(100)
            .max(1);
        let remotes = env::var("TRELLIS_REMOTES")
            .map_or_else(|_| vec![Keyword::new("remote")], |val| parse_remotes(&val));
        let id_key = env::var("TRELLIS_ID_KEY")
            .ok()
            .map(|val| Keyword::new(val.trim_start_matches(':')))
            .filter(|key| !key.name().is_empty());
        let coalesce_ms = env::var("TRELLIS_COALESCE_MS")
            .ok()
            .and_then(|val| val.parse::<u64>().ok())
            .unwrap_or(0);
        let optimize = env::var("TRELLIS_OPTIMIZE").ok().as_deref() != Some("0");
        Self::new(
            normalize,
            history_capacity,
            remotes,
            id_key,
            coalesce_ms,
            optimize,
        )
    }

    /// Get the flush coalescing delay as a `Duration`.
    ///
    /// # Returns
    ///
    /// The coalescing delay
    #[inline]
    #[must_use]
    pub const fn coalesce_delay(&self) -> Duration {
        Duration::from_millis(self.coalesce_ms)
    }

    /// Whether `target` is one of the configured remotes.
    #[inline]
    #[must_use]
    pub fn is_remote(&self, target: &Keyword) -> bool {
        self.remotes.contains(target)
    }
}

fn parse_remotes(list: &str) -> Vec<Keyword> {
    list.split(',')
        .map(|name| name.trim().trim_start_matches(':'))
        .filter(|name| !name.is_empty())
        .map(Keyword::new)
        .collect()
}

impl Default for ReconcilerConfig {
    #[inline]
    fn default() -> Self {
        Self::new(true, 100, vec![Keyword::new("remote")], None, 0, true)
    }
}
