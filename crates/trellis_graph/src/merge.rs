//! Merging deltas into the store and migrating temporary ids.

use crate::store::GraphStore;
use core::mem;
use log::{debug, warn};
use std::collections::BTreeMap;
use trellis_query::{Ident, Keyword, Map, Symbol, Value};

/// Temporary ident -> permanent ident.
pub type TempIds = BTreeMap<Ident, Ident>;

/// Name of the entry carrying tempid mappings.
pub const TEMPIDS_KEY: &str = "tempids";

/// A delta split by what each entry means to the store.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Sifted {
    /// Ident-keyed maps, merged into the entity they name.
    pub patches: Vec<(Ident, Map)>,
    /// Everything else that belongs in the root.
    pub novelty: Map,
    /// Tempid mappings from the top level and from mutation results.
    pub tempids: TempIds,
    /// Mutations that reported a result; their results are not state.
    pub mutations: Vec<Symbol>,
}

/// Split `delta` into patches, novelty, tempid mappings and mutation
/// results.
pub fn sift(delta: Map) -> Sifted {
    let mut sifted = Sifted::default();
    for (key, value) in delta {
        match key {
            Value::Keyword(ref keyword) if keyword.name() == TEMPIDS_KEY => {
                collect_tempids(&value, &mut sifted.tempids);
            }
            Value::Symbol(symbol) => {
                if let Some(tempids) = value.get(TEMPIDS_KEY) {
                    collect_tempids(tempids, &mut sifted.tempids);
                }
                sifted.mutations.push(symbol);
            }
            Value::Ident(ident) => match value {
                Value::Map(props) => sifted.patches.push((ident, props)),
                other => {
                    sifted.novelty.insert(Value::Ident(ident), other);
                }
            },
            other => {
                sifted.novelty.insert(other, value);
            }
        }
    }
    sifted
}

fn collect_tempids(mappings: &Value, tempids: &mut TempIds) {
    let Some(mappings) = mappings.as_map() else {
        warn!("ignoring tempids that are not a map: {mappings}");
        return;
    };
    for (old, new) in mappings {
        match (old, new) {
            (Value::Ident(old), Value::Ident(new)) => {
                tempids.insert(old.clone(), new.clone());
            }
            _ => warn!("ignoring tempid mapping {old} -> {new}"),
        }
    }
}

/// Move every entity named by a temporary ident to its permanent ident
/// and rewrite every reference to it, anywhere in the store.
///
/// The temporary entity is merged under the permanent one, whose own
/// fields win. With `id_key`, migrated entities get that key set to the
/// permanent id. Nothing happens for an empty mapping.
pub fn migrate(store: &mut GraphStore, tempids: &TempIds, id_key: Option<&Keyword>) {
    if tempids.is_empty() {
        return;
    }
    for (old, new) in tempids {
        let moved = store.remove_entity(old);
        let existing = store.entity(new).cloned();
        if moved.is_none() && existing.is_none() {
            debug!("no entity at {old} to migrate");
            continue;
        }
        let mut entity = moved.unwrap_or_default();
        entity.extend(existing.unwrap_or_default());
        if let Some(key) = id_key {
            entity.insert(Value::Keyword(key.clone()), (*new.id).clone());
        }
        debug!("migrated {old} to {new}");
        store.merge_entity(new, entity);
    }
    store.update(|root| rewrite_map(root, tempids));
}

/// Replace temporary idents inside `value`, keys included.
pub fn rewrite_value(value: &mut Value, tempids: &TempIds) {
    match value {
        Value::Ident(ident) => {
            if let Some(permanent) = tempids.get(ident) {
                *ident = permanent.clone();
            }
        }
        Value::Seq(items) => {
            for item in items {
                rewrite_value(item, tempids);
            }
        }
        Value::Map(map) => rewrite_map(map, tempids),
        _ => {}
    }
}

fn rewrite_map(map: &mut Map, tempids: &TempIds) {
    *map = mem::take(map)
        .into_iter()
        .map(|(mut key, mut value)| {
            rewrite_value(&mut key, tempids);
            rewrite_value(&mut value, tempids);
            (key, value)
        })
        .collect();
}
