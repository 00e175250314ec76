//! Tree to graph.
//!
//! Walks a tree of nested data alongside the query that describes it.
//! Wherever a join's sub-query belongs to a class that can name its data,
//! the nested object is moved into its table and replaced by its ident.

use crate::error::GraphError;
use crate::store::{GraphStore, Tables};
use log::trace;
use trellis_query::{Ident, Map, Query, Registry, Subquery, Union, Value};

/// A normalized tree and the entities pulled out of it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Normalized {
    /// The input with every identified object replaced by its ident.
    pub tree: Map,
    /// Every identified object, merged shallowly per ident.
    pub tables: Tables,
}

impl Normalized {
    /// The tree as root properties with the tables merged alongside.
    pub fn into_store(self) -> GraphStore {
        let mut store = GraphStore::from_map(self.tree);
        store.merge_tables(self.tables);
        store
    }
}

/// Normalize `tree` against `query`.
///
/// Plain properties pass through unchanged and `nil` values are dropped.
///
/// # Errors
/// [`GraphError::UnionWithoutIdentity`] when union data has no identity,
/// [`GraphError::UnknownBranch`] when its identity names no branch, and
/// [`GraphError::Query`] when a query names an unregistered class.
pub fn normalize(query: &Query, tree: &Map, registry: &Registry) -> Result<Normalized, GraphError> {
    let mut normalizer = Normalizer::new(registry);
    let tree = normalizer.normalize_map(query, tree)?;
    Ok(Normalized {
        tree,
        tables: normalizer.tables,
    })
}

/// Normalize a tree whose root is itself union data: the branch is chosen
/// by the identity the tree resolves to.
///
/// # Errors
/// Same as [`normalize`].
pub fn normalize_union(union: &Union, tree: &Map, registry: &Registry) -> Result<Normalized, GraphError> {
    let mut normalizer = Normalizer::new(registry);
    let ident = normalizer.union_ident(union, tree)?;
    let branch = union
        .branch(&ident.table)
        .ok_or_else(|| GraphError::UnknownBranch {
            table: ident.table.clone(),
        })?;
    let tree = normalizer.normalize_map(branch, tree)?;
    Ok(Normalized {
        tree,
        tables: normalizer.tables,
    })
}

/// Normalize a whole tree into a fresh store.
///
/// # Errors
/// [`GraphError::NotAMap`] when `tree` is not a map, otherwise as
/// [`normalize`].
pub fn tree_to_db(query: &Query, tree: &Value, registry: &Registry) -> Result<GraphStore, GraphError> {
    let Value::Map(map) = tree else {
        return Err(GraphError::NotAMap);
    };
    normalize(query, map, registry).map(Normalized::into_store)
}

struct Normalizer<'reg> {
    registry: &'reg Registry,
    tables: Tables,
}

impl<'reg> Normalizer<'reg> {
    const fn new(registry: &'reg Registry) -> Self {
        Self {
            registry,
            tables: Tables::new(),
        }
    }

    fn normalize_map(&mut self, query: &Query, data: &Map) -> Result<Map, GraphError> {
        let mut normalized = data.clone();
        normalized.retain(|_, value| !value.is_nil());
        for expr in query.exprs() {
            let Some(subquery) = expr.join_value() else {
                continue;
            };
            let key = expr.key().to_value();
            let Some(value) = data.get(&key).filter(|value| !value.is_nil()) else {
                continue;
            };
            let joined = self.normalize_join(subquery, query, value)?;
            normalized.insert(key, joined);
        }
        Ok(normalized)
    }

    fn normalize_join(
        &mut self,
        subquery: &Subquery,
        enclosing: &Query,
        value: &Value,
    ) -> Result<Value, GraphError> {
        match value {
            Value::Map(entity) => self.normalize_entity(subquery, enclosing, entity),
            Value::Seq(items) => items
                .iter()
                .filter(|item| !item.is_nil())
                .map(|item| match item {
                    Value::Map(entity) => self.normalize_entity(subquery, enclosing, entity),
                    other => Ok(other.clone()),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Seq),
            // Already an ident, or a scalar where a join was expected.
            other => Ok(other.clone()),
        }
    }

    fn normalize_entity(
        &mut self,
        subquery: &Subquery,
        enclosing: &Query,
        entity: &Map,
    ) -> Result<Value, GraphError> {
        match subquery {
            Subquery::Query(query) => self.normalize_owned(query, entity),
            Subquery::Recur(_) => self.normalize_owned(enclosing, entity),
            Subquery::Union(union) => {
                let ident = self.union_ident(union, entity)?;
                let branch = union
                    .branch(&ident.table)
                    .ok_or_else(|| GraphError::UnknownBranch {
                        table: ident.table.clone(),
                    })?;
                let normalized = self.normalize_map(branch, entity)?;
                self.merge(&ident, normalized);
                Ok(Value::Ident(ident))
            }
        }
    }

    /// Normalize `entity` and, when the owning class names it, move it
    /// into its table. The ident comes from the un-normalized entity.
    fn normalize_owned(&mut self, query: &Query, entity: &Map) -> Result<Value, GraphError> {
        let ident = match query.component() {
            Some(class) => self.registry.ident_for(class, entity)?,
            None => None,
        };
        let normalized = self.normalize_map(query, entity)?;
        Ok(match ident {
            Some(ident) => {
                self.merge(&ident, normalized);
                Value::Ident(ident)
            }
            None => Value::Map(normalized),
        })
    }

    /// Identity of union data: the union's own class first, then any branch
    /// class whose ident lands in that branch's table.
    fn union_ident(&self, union: &Union, entity: &Map) -> Result<Ident, GraphError> {
        if let Some(class) = union.component()
            && let Some(ident) = self.registry.ident_for(class, entity)?
        {
            return Ok(ident);
        }
        for (tag, branch) in union.branches() {
            let Some(class) = branch.component() else {
                continue;
            };
            match self.registry.ident_for(class, entity)? {
                Some(ident) if ident.table == *tag => return Ok(ident),
                _ => {}
            }
        }
        Err(GraphError::UnionWithoutIdentity {
            branches: union.branches().keys().cloned().collect(),
        })
    }

    fn merge(&mut self, ident: &Ident, props: Map) {
        trace!("normalized {ident}");
        self.tables
            .entry(ident.table.clone())
            .or_default()
            .entry((*ident.id).clone())
            .or_default()
            .extend(props);
    }
}
