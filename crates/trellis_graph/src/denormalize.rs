//! Graph to tree.
//!
//! The inverse of normalization: follows idents through the store and
//! projects each entity onto the query found at its position.

use crate::store::GraphStore;
use trellis_query::{Ident, Key, Map, Query, Recursion, Subquery, Union, Value};

/// Read `data` through `query`, resolving idents against `store`.
///
/// Idents that resolve to nothing are left out of the result. An ident
/// whose table has no branch in the union read at its position is kept
/// as the bare ident, so sequence positions stay stable.
pub fn denormalize(query: &Query, data: &Value, store: &GraphStore) -> Value {
    denormalize_with(query, data, store, &Ident::clone)
}

/// Like [`denormalize`], passing every ident through `map_ref` before it is
/// resolved.
pub fn denormalize_with(
    query: &Query,
    data: &Value,
    store: &GraphStore,
    map_ref: &dyn Fn(&Ident) -> Ident,
) -> Value {
    Reader::new(store, map_ref)
        .value(Shape::Seq(query), data, false)
        .unwrap_or_default()
}

/// Read the whole store root through `query`.
pub fn db_to_tree(query: &Query, store: &GraphStore) -> Map {
    Reader::new(store, &Ident::clone).map(query, store.root())
}

#[derive(Copy, Clone)]
enum Shape<'query> {
    Seq(&'query Query),
    Union(&'query Union),
}

struct Reader<'store> {
    store: &'store GraphStore,
    map_ref: &'store dyn Fn(&Ident) -> Ident,
    /// Idents being expanded along the current path.
    expanding: Vec<Ident>,
}

impl<'store> Reader<'store> {
    fn new(store: &'store GraphStore, map_ref: &'store dyn Fn(&Ident) -> Ident) -> Self {
        Self {
            store,
            map_ref,
            expanding: Vec::new(),
        }
    }

    fn value(&mut self, shape: Shape<'_>, data: &Value, recursive: bool) -> Option<Value> {
        match data {
            Value::Nil => None,
            Value::Ident(ident) => {
                let target = (self.map_ref)(ident);
                if recursive && self.expanding.contains(&target) {
                    return Some(Value::Ident(target));
                }
                let store = self.store;
                let resolved = store.resolve(&target)?;
                let shape = match shape {
                    Shape::Union(union) => match union.branch(&target.table) {
                        Some(branch) => Shape::Seq(branch),
                        None => return Some(Value::Ident(target)),
                    },
                    seq @ Shape::Seq(_) => seq,
                };
                self.expanding.push(target);
                let result = self.value(shape, resolved, recursive);
                self.expanding.pop();
                result
            }
            Value::Seq(items) => Some(Value::Seq(
                items
                    .iter()
                    .filter_map(|item| self.value(shape, item, recursive))
                    .collect(),
            )),
            Value::Map(entity) => Some(Value::Map(match shape {
                Shape::Seq(query) => self.map(query, entity),
                Shape::Union(union) => self.map(&union.merged(), entity),
            })),
            other => Some(other.clone()),
        }
    }

    fn map(&mut self, query: &Query, data: &Map) -> Map {
        let store = self.store;
        let mut projected = Map::new();
        for expr in query.exprs() {
            let key = expr.key();
            let owned;
            let target = match key {
                Key::Prop(keyword) => data.get(&Value::Keyword(keyword.clone())),
                Key::Ident(ident) if ident.is_link() => store.get(&ident.table),
                Key::Ident(ident) => {
                    owned = Value::Ident(ident.clone());
                    Some(&owned)
                }
                Key::Mutation(_) => continue,
            };
            let Some(target) = target else {
                continue;
            };
            let result = match expr.join_value() {
                None => match key {
                    Key::Ident(ident) if !ident.is_link() => store.resolve(ident).cloned(),
                    _ => Some(target.clone()),
                },
                Some(Subquery::Query(sub)) => self.value(Shape::Seq(sub), target, false),
                Some(Subquery::Union(union)) => self.value(Shape::Union(union), target, false),
                Some(Subquery::Recur(Recursion::Unbounded)) => {
                    self.value(Shape::Seq(query), target, true)
                }
                Some(Subquery::Recur(Recursion::Depth(0))) => None,
                Some(Subquery::Recur(Recursion::Depth(depth))) => {
                    let shallower = with_depth(query, key, depth - 1);
                    self.value(Shape::Seq(&shallower), target, true)
                }
            };
            if let Some(result) = result {
                projected.insert(key.to_value(), result);
            }
        }
        projected
    }
}

/// `query` with the recursive join on `key` limited to `depth`.
fn with_depth(query: &Query, key: &Key, depth: u32) -> Query {
    query
        .exprs()
        .iter()
        .map(|expr| {
            if expr.key() == key {
                expr.with_join_value(Subquery::Recur(Recursion::Depth(depth)))
            } else {
                expr.clone()
            }
        })
        .collect()
}
