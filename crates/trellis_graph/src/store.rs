//! The normalized graph store.
//!
//! The store is one root map. A root key whose value is a map of
//! `id -> entity` is a table; every other root key is a root property,
//! which may hold plain data or idents pointing into tables.

use crate::revision::Revision;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use trellis_query::{Ident, Keyword, Map, Value};

/// Entities grouped by table, then by id.
pub type Tables = BTreeMap<Keyword, BTreeMap<Value, Map>>;

/// Flat, identity-addressed application state.
///
/// Equality compares contents only; two stores holding the same data at
/// different revisions are equal.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GraphStore {
    root: Map,
    revision: Revision,
}

impl PartialEq for GraphStore {
    fn eq(&self, other: &Self) -> bool {
        self.root == other.root
    }
}

impl Eq for GraphStore {}

/// Shallow merge: keys of `props` overwrite those of the slot, and a
/// slot that is not a map is replaced.
pub(crate) fn merge_into(slot: &mut Value, props: Map) {
    match slot {
        Value::Map(existing) => existing.extend(props),
        other => *other = Value::Map(props),
    }
}

impl GraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(root: Map) -> Self {
        Self {
            root,
            revision: Revision::INITIAL,
        }
    }

    #[inline]
    pub const fn root(&self) -> &Map {
        &self.root
    }

    #[inline]
    pub fn into_root(self) -> Map {
        self.root
    }

    /// Basis-t of the current contents.
    #[inline]
    pub const fn revision(&self) -> Revision {
        self.revision
    }

    fn touch(&mut self) {
        self.revision = self.revision.next();
    }

    /// A root property.
    pub fn get(&self, key: &Keyword) -> Option<&Value> {
        self.root.get(&Value::Keyword(key.clone()))
    }

    pub fn set(&mut self, key: Keyword, value: Value) {
        self.root.insert(Value::Keyword(key), value);
        self.touch();
    }

    pub fn table(&self, table: &Keyword) -> Option<&Map> {
        self.get(table).and_then(Value::as_map)
    }

    /// The entity an ident names. Links name root properties, not
    /// entities, and resolve to `None` here.
    pub fn entity(&self, ident: &Ident) -> Option<&Map> {
        if ident.is_link() {
            return None;
        }
        self.table(&ident.table)?.get(&ident.id).and_then(Value::as_map)
    }

    /// What an ident points at: the root property for a link, the table
    /// entry otherwise.
    pub fn resolve(&self, ident: &Ident) -> Option<&Value> {
        if ident.is_link() {
            self.get(&ident.table)
        } else {
            self.table(&ident.table)?.get(&ident.id)
        }
    }

    /// Shallow-merge `props` into the entity named by `ident`, creating
    /// the table and entity as needed.
    pub fn merge_entity(&mut self, ident: &Ident, props: Map) {
        if ident.is_link() {
            let slot = self
                .root
                .entry(Value::Keyword(ident.table.clone()))
                .or_default();
            merge_into(slot, props);
        } else {
            let slot = self
                .root
                .entry(Value::Keyword(ident.table.clone()))
                .or_insert_with(|| Value::Map(Map::new()));
            match slot {
                Value::Map(entities) => {
                    merge_into(entities.entry((*ident.id).clone()).or_default(), props);
                }
                other => {
                    let mut entities = Map::new();
                    entities.insert((*ident.id).clone(), Value::Map(props));
                    *other = Value::Map(entities);
                }
            }
        }
        self.touch();
    }

    /// Remove and return the entity named by `ident`.
    pub fn remove_entity(&mut self, ident: &Ident) -> Option<Map> {
        if ident.is_link() {
            return None;
        }
        let removed = self
            .root
            .get_mut(&Value::Keyword(ident.table.clone()))
            .and_then(Value::as_map_mut)?
            .remove(&ident.id);
        self.touch();
        match removed {
            Some(Value::Map(entity)) => Some(entity),
            _ => None,
        }
    }

    /// Merge every entity of `tables` into the store.
    pub fn merge_tables(&mut self, tables: Tables) {
        for (table, entities) in tables {
            for (id, props) in entities {
                self.merge_entity(&Ident { table: table.clone(), id: Box::new(id) }, props);
            }
        }
    }

    /// Shallow-merge `novelty` into the root: its keys replace root keys.
    pub fn merge_root(&mut self, novelty: Map) {
        self.root.extend(novelty);
        self.touch();
    }

    /// Run `edit` over the whole root map.
    pub fn update(&mut self, edit: impl FnOnce(&mut Map)) {
        edit(&mut self.root);
        self.touch();
    }

    /// Every ident that names an existing entity.
    pub fn idents(&self) -> impl Iterator<Item = Ident> + '_ {
        self.root.iter().flat_map(|(key, value)| {
            let table = key.as_keyword().cloned();
            value
                .as_map()
                .into_iter()
                .flat_map(|entities| entities.iter())
                .filter(|(_, entity)| entity.as_map().is_some())
                .filter_map(move |(id, _)| {
                    table.clone().map(|table| Ident {
                        table,
                        id: Box::new(id.clone()),
                    })
                })
        })
    }
}
