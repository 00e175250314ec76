//! Focusing a query on a path, and putting sub-queries back.
//!
//! [`focus`] keeps only the spine of a query that leads along a key path.
//! [`template`] remembers a position inside a query as a list of steps, and
//! [`TemplateCursor::splice`] rebuilds the query with a new sub-query at that
//! position while every sibling stays as it was. [`path_from_focused`]
//! reads the key path back out of a focused query.

use crate::error::QueryError;
use crate::query::{Key, Query, Subquery};
use crate::value::Keyword;

/// Reduce `query` to the entries lying on `path`.
///
/// Call wrappers on the way are kept. A recursion marker met before the
/// path ends is expanded to the query that contains it, and a union is
/// narrowed to the branch named by the next key and marked as focused.
/// Keys that match nothing produce an empty sequence at that level.
pub fn focus(query: &Query, path: &[Key]) -> Query {
    let Some((head, rest)) = path.split_first() else {
        return query.clone();
    };
    let kept = query.find(head).map(|expr| match expr.join_value() {
        Some(subquery) if !rest.is_empty() => {
            expr.with_join_value(focus_subquery(subquery, rest, query))
        }
        _ => expr.clone(),
    });
    query.retagged(kept.into_iter().collect())
}

fn focus_subquery(subquery: &Subquery, path: &[Key], enclosing: &Query) -> Subquery {
    match subquery {
        Subquery::Query(query) => Subquery::Query(focus(query, path)),
        Subquery::Recur(_) => Subquery::Query(focus(enclosing, path)),
        Subquery::Union(union) => {
            let branch = match path.split_first() {
                Some((Key::Prop(tag), rest)) => union
                    .branch(tag)
                    .map(|branch| (tag.clone(), focus(branch, rest))),
                _ => None,
            };
            Subquery::Union(union.focused_on(branch))
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum Step {
    /// Into the join value of the expression at this index.
    Expr(usize),
    /// Into the union branch with this tag.
    Branch(Keyword),
}

/// A remembered position inside a query.
///
/// The position is always a sub-query slot: the root sequence, the value of
/// a join, or a union branch.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TemplateCursor {
    root: Query,
    steps: Vec<Step>,
    path: Vec<Key>,
}

/// Mark the sub-query slot `path` designates in `query`.
///
/// Returns `None` when the path leaves the query or ends on a plain
/// property.
pub fn template(query: &Query, path: &[Key]) -> Option<TemplateCursor> {
    let mut steps = Vec::with_capacity(path.len());
    locate_in_query(query, path, &mut steps).then(|| TemplateCursor {
        root: query.clone(),
        steps,
        path: path.to_vec(),
    })
}

fn locate_in_query(query: &Query, path: &[Key], steps: &mut Vec<Step>) -> bool {
    let Some((head, rest)) = path.split_first() else {
        return true;
    };
    let Some(index) = query.exprs().iter().position(|expr| expr.key() == head) else {
        return false;
    };
    steps.push(Step::Expr(index));
    query.exprs()[index]
        .join_value()
        .is_some_and(|subquery| locate_in_subquery(subquery, rest, steps))
}

fn locate_in_subquery(subquery: &Subquery, path: &[Key], steps: &mut Vec<Step>) -> bool {
    if path.is_empty() {
        return true;
    }
    match subquery {
        Subquery::Query(query) => locate_in_query(query, path, steps),
        Subquery::Union(union) => {
            let Some((Key::Prop(tag), rest)) = path.split_first() else {
                return false;
            };
            let Some(branch) = union.branch(tag) else {
                return false;
            };
            steps.push(Step::Branch(tag.clone()));
            locate_in_query(branch, rest, steps)
        }
        Subquery::Recur(_) => false,
    }
}

fn stale() -> QueryError {
    QueryError::Malformed("template cursor does not fit its query".to_owned())
}

impl TemplateCursor {
    /// The whole query the cursor points into.
    #[inline]
    pub const fn root(&self) -> &Query {
        &self.root
    }

    /// The key path the cursor was built from.
    #[inline]
    pub fn path(&self) -> &[Key] {
        &self.path
    }

    /// The sub-query currently at the cursor.
    pub fn node(&self) -> Option<Subquery> {
        node_in_query(&self.root, &self.steps)
    }

    /// Rebuild the root with `replacement` at the cursor.
    ///
    /// # Errors
    /// [`QueryError::Malformed`] when a union or recursion marker is given
    /// for a slot that must hold a sequence.
    pub fn splice(&self, replacement: Subquery) -> Result<Query, QueryError> {
        splice_query(&self.root, &self.steps, replacement)
    }
}

fn node_in_query(query: &Query, steps: &[Step]) -> Option<Subquery> {
    match steps.split_first() {
        None => Some(Subquery::Query(query.clone())),
        Some((Step::Expr(index), rest)) => {
            node_in_subquery(query.exprs().get(*index)?.join_value()?, rest)
        }
        Some((Step::Branch(_), _)) => None,
    }
}

fn node_in_subquery(subquery: &Subquery, steps: &[Step]) -> Option<Subquery> {
    match (steps.split_first(), subquery) {
        (None, _) => Some(subquery.clone()),
        (Some((Step::Branch(tag), rest)), Subquery::Union(union)) => {
            node_in_query(union.branch(tag)?, rest)
        }
        (Some((Step::Expr(_), _)), Subquery::Query(query)) => node_in_query(query, steps),
        _ => None,
    }
}

fn splice_query(query: &Query, steps: &[Step], replacement: Subquery) -> Result<Query, QueryError> {
    match steps.split_first() {
        None => match replacement {
            Subquery::Query(spliced) => Ok(spliced),
            other => Err(QueryError::Malformed(format!(
                "{other} cannot stand where a sequence is expected"
            ))),
        },
        Some((Step::Expr(index), rest)) => {
            let expr = query.exprs().get(*index).ok_or_else(stale)?;
            let subquery = expr.join_value().ok_or_else(stale)?;
            let mut exprs = query.exprs().to_vec();
            exprs[*index] = expr.with_join_value(splice_subquery(subquery, rest, replacement)?);
            Ok(query.retagged(exprs))
        }
        Some((Step::Branch(_), _)) => Err(stale()),
    }
}

fn splice_subquery(
    subquery: &Subquery,
    steps: &[Step],
    replacement: Subquery,
) -> Result<Subquery, QueryError> {
    match (steps.split_first(), subquery) {
        (None, _) => Ok(replacement),
        (Some((Step::Branch(tag), rest)), Subquery::Union(union)) => {
            let branch = union.branch(tag).ok_or_else(stale)?;
            let spliced = splice_query(branch, rest, replacement)?;
            Ok(Subquery::Union(union.with_branch(tag.clone(), spliced)))
        }
        (Some((Step::Expr(_), _)), Subquery::Query(query)) => {
            splice_query(query, steps, replacement).map(Subquery::Query)
        }
        _ => Err(stale()),
    }
}

/// How far [`path_from_focused`] may walk.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PathBound<'path> {
    /// Walk until the query stops looking like a focused spine; a
    /// recursion marker ends the walk.
    Any,
    /// Walk at most as far as this path is long, following recursion
    /// markers as fixed points.
    Exact(&'path [Key]),
}

impl PathBound<'_> {
    fn reached(&self, path: &[Key]) -> bool {
        match self {
            Self::Any => false,
            Self::Exact(target) => path.len() >= target.len(),
        }
    }
}

/// Recover the key path that produced a focused query.
///
/// Union branch tags are not part of a data path, so a focused union is
/// passed through without adding its tag.
pub fn path_from_focused(focused: &Query, bound: PathBound<'_>) -> Vec<Key> {
    let mut path = Vec::new();
    let mut current = focused;
    while !bound.reached(&path) {
        let [expr] = current.exprs() else {
            break;
        };
        let Some(subquery) = expr.join_value() else {
            break;
        };
        path.push(expr.key().clone());
        match subquery {
            Subquery::Query(next) => current = next,
            Subquery::Union(union) if union.is_focused() => {
                match union.branches().values().next() {
                    Some(branch) => current = branch,
                    None => break,
                }
            }
            Subquery::Recur(_) if matches!(bound, PathBound::Exact(_)) => {}
            Subquery::Union(_) | Subquery::Recur(_) => break,
        }
    }
    path
}
