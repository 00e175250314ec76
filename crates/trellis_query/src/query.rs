//! Query expressions.
//!
//! A [`Query`] is an ordered sequence of [`Expr`]s. Each expression is a
//! property read, a join into a [`Subquery`], or a parameterised call
//! wrapping either of those (or a mutation). Joins and unions carry the
//! class that owns them in their `component` tag.

use crate::component::ClassId;
use crate::error::QueryError;
use crate::value::{Ident, Keyword, Map, Symbol, Value, write_map, write_spaced};
use core::fmt;
use std::collections::BTreeMap;

/// Parameters of a call expression.
pub type Params = BTreeMap<Keyword, Value>;

/// The key an expression reads or runs.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Key {
    /// A plain property such as `:name`.
    Prop(Keyword),
    /// An ident (`[:person 1]`) or link (`[:current-user _]`).
    Ident(Ident),
    /// A mutation symbol such as `add-person!`.
    Mutation(Symbol),
}

impl Key {
    #[inline]
    pub fn prop(name: &str) -> Self {
        Self::Prop(Keyword::new(name))
    }

    /// The keyword a parser dispatches on: the property itself, or the
    /// table of an ident. Mutations dispatch on their symbol instead.
    pub const fn dispatch_key(&self) -> Option<&Keyword> {
        match self {
            Self::Prop(keyword) => Some(keyword),
            Self::Ident(ident) => Some(&ident.table),
            Self::Mutation(_) => None,
        }
    }

    /// The key as it appears in a result map.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Prop(keyword) => Value::Keyword(keyword.clone()),
            Self::Ident(ident) => Value::Ident(ident.clone()),
            Self::Mutation(symbol) => Value::Symbol(symbol.clone()),
        }
    }

    /// Read a result-map key back into a query key.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Keyword(keyword) => Some(Self::Prop(keyword.clone())),
            Value::Ident(ident) => Some(Self::Ident(ident.clone())),
            Value::Symbol(symbol) => Some(Self::Mutation(symbol.clone())),
            _ => None,
        }
    }

    #[inline]
    pub const fn is_mutation(&self) -> bool {
        matches!(self, Self::Mutation(_))
    }
}

impl From<Keyword> for Key {
    fn from(keyword: Keyword) -> Self {
        Self::Prop(keyword)
    }
}

impl From<Ident> for Key {
    fn from(ident: Ident) -> Self {
        Self::Ident(ident)
    }
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        Self::prop(name)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Prop(keyword) => write!(formatter, "{keyword}"),
            Self::Ident(ident) => write!(formatter, "{ident}"),
            Self::Mutation(symbol) => write!(formatter, "{symbol}"),
        }
    }
}

/// How deep a recursive join may expand.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Recursion {
    /// `...`: expand until the data runs out.
    Unbounded,
    /// A non-negative depth limit.
    Depth(u32),
}

/// A union: one query per variant tag, chosen by the table of the
/// identity found at the join position.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Union {
    branches: BTreeMap<Keyword, Query>,
    component: Option<ClassId>,
    focused: bool,
}

impl Union {
    pub fn new(branches: impl IntoIterator<Item = (Keyword, Query)>) -> Self {
        Self {
            branches: branches.into_iter().collect(),
            component: None,
            focused: false,
        }
    }

    #[inline]
    pub const fn branches(&self) -> &BTreeMap<Keyword, Query> {
        &self.branches
    }

    #[inline]
    pub fn branch(&self, tag: &Keyword) -> Option<&Query> {
        self.branches.get(tag)
    }

    #[inline]
    pub const fn component(&self) -> Option<&ClassId> {
        self.component.as_ref()
    }

    /// Whether this union was produced by focusing on one branch.
    #[inline]
    pub const fn is_focused(&self) -> bool {
        self.focused
    }

    /// A union holding at most `branch`, marked as focused.
    pub(crate) fn focused_on(&self, branch: Option<(Keyword, Query)>) -> Self {
        Self {
            branches: branch.into_iter().collect(),
            component: self.component.clone(),
            focused: true,
        }
    }

    pub(crate) fn with_owner(mut self, owner: Option<ClassId>) -> Self {
        self.component = owner;
        self
    }

    pub(crate) fn into_focused(mut self) -> Self {
        self.focused = true;
        self
    }

    pub(crate) fn with_branch(&self, tag: Keyword, branch: Query) -> Self {
        let mut rebuilt = self.clone();
        rebuilt.branches.insert(tag, branch);
        rebuilt
    }

    /// Tag this union with its owning class.
    ///
    /// # Errors
    /// Returns [`QueryError::QueryReuseViolation`] when the union already
    /// belongs to a different class.
    pub fn tagged(mut self, owner: &ClassId) -> Result<Self, QueryError> {
        self.component = Some(claim(self.component.take(), owner)?);
        Ok(self)
    }

    /// All branch expressions merged into one sequence, first occurrence of
    /// each key winning. Used to project data whose branch is unknown.
    pub fn merged(&self) -> Query {
        let mut exprs: Vec<Expr> = Vec::new();
        for expr in self.branches.values().flat_map(Query::exprs) {
            if !exprs.iter().any(|seen| seen.key() == expr.key()) {
                exprs.push(expr.clone());
            }
        }
        Query::new(exprs)
    }
}

/// The value side of a join.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Subquery {
    Query(Query),
    Union(Union),
    Recur(Recursion),
}

impl Subquery {
    pub const fn component(&self) -> Option<&ClassId> {
        match self {
            Self::Query(query) => query.component(),
            Self::Union(union) => union.component(),
            Self::Recur(_) => None,
        }
    }

    #[inline]
    pub const fn as_query(&self) -> Option<&Query> {
        match self {
            Self::Query(query) => Some(query),
            _ => None,
        }
    }

    /// Tag this subquery with its owning class.
    ///
    /// # Errors
    /// Fails on a reuse violation, or when asked to tag a recursion marker.
    pub fn tagged(self, owner: &ClassId) -> Result<Self, QueryError> {
        match self {
            Self::Query(query) => query.tagged(owner).map(Self::Query),
            Self::Union(union) => union.tagged(owner).map(Self::Union),
            Self::Recur(_) => Err(QueryError::Malformed(format!(
                "{owner} cannot own a recursion marker"
            ))),
        }
    }

    #[must_use]
    pub fn bind(&self, bindings: &Params) -> Self {
        match self {
            Self::Query(query) => Self::Query(query.bind(bindings)),
            Self::Union(union) => Self::Union(Union {
                branches: union
                    .branches
                    .iter()
                    .map(|(tag, query)| (tag.clone(), query.bind(bindings)))
                    .collect(),
                component: union.component.clone(),
                focused: union.focused,
            }),
            Self::Recur(recursion) => Self::Recur(*recursion),
        }
    }
}

impl From<Query> for Subquery {
    fn from(query: Query) -> Self {
        Self::Query(query)
    }
}

impl From<Union> for Subquery {
    fn from(union: Union) -> Self {
        Self::Union(union)
    }
}

impl From<Recursion> for Subquery {
    fn from(recursion: Recursion) -> Self {
        Self::Recur(recursion)
    }
}

/// One entry of a query.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Expr {
    Prop(Key),
    Join(Key, Subquery),
    Call(Box<Expr>, Params),
}

impl Expr {
    #[inline]
    pub fn prop(name: &str) -> Self {
        Self::Prop(Key::prop(name))
    }

    #[inline]
    pub fn join(key: impl Into<Key>, subquery: impl Into<Subquery>) -> Self {
        Self::Join(key.into(), subquery.into())
    }

    /// A mutation call `(name params)`.
    pub fn mutation(name: &str, params: Params) -> Self {
        Self::Call(Box::new(Self::Prop(Key::Mutation(Symbol::new(name)))), params)
    }

    /// Wrap this expression in a call with `params`.
    #[must_use]
    pub fn with_params(self, params: Params) -> Self {
        Self::Call(Box::new(self), params)
    }

    /// The expression under any call wrappers.
    pub fn unwrapped(&self) -> &Self {
        let mut current = self;
        while let Self::Call(inner, _) = current {
            current = inner;
        }
        current
    }

    pub fn key(&self) -> &Key {
        match self {
            Self::Prop(key) | Self::Join(key, _) => key,
            Self::Call(inner, _) => inner.key(),
        }
    }

    pub fn join_value(&self) -> Option<&Subquery> {
        match self {
            Self::Join(_, subquery) => Some(subquery),
            Self::Call(inner, _) => inner.join_value(),
            Self::Prop(_) => None,
        }
    }

    #[inline]
    pub fn is_join(&self) -> bool {
        self.join_value().is_some()
    }

    /// Parameters of the outermost call wrapper.
    pub const fn params(&self) -> Option<&Params> {
        match self {
            Self::Call(_, params) => Some(params),
            Self::Prop(_) | Self::Join(..) => None,
        }
    }

    /// The same expression with its join value replaced, call wrappers kept.
    #[must_use]
    pub fn with_join_value(&self, subquery: Subquery) -> Self {
        match self {
            Self::Call(inner, params) => {
                Self::Call(Box::new(inner.with_join_value(subquery)), params.clone())
            }
            Self::Prop(key) | Self::Join(key, _) => Self::Join(key.clone(), subquery),
        }
    }

    #[must_use]
    pub fn bind(&self, bindings: &Params) -> Self {
        match self {
            Self::Prop(key) => Self::Prop(key.clone()),
            Self::Join(key, subquery) => Self::Join(key.clone(), subquery.bind(bindings)),
            Self::Call(inner, params) => Self::Call(
                Box::new(inner.bind(bindings)),
                params
                    .iter()
                    .map(|(name, value)| (name.clone(), bind_value(value, bindings)))
                    .collect(),
            ),
        }
    }
}

/// Replace every placeholder symbol in `value` with its binding, leaving
/// unbound placeholders in place.
pub fn bind_value(value: &Value, bindings: &Params) -> Value {
    match value {
        Value::Symbol(symbol) => symbol
            .placeholder()
            .and_then(|name| bindings.get(&name))
            .cloned()
            .unwrap_or_else(|| value.clone()),
        Value::Seq(items) => Value::Seq(items.iter().map(|item| bind_value(item, bindings)).collect()),
        Value::Map(map) => Value::Map(
            map.iter()
                .map(|(key, item)| (bind_value(key, bindings), bind_value(item, bindings)))
                .collect::<Map>(),
        ),
        other => other.clone(),
    }
}

/// An ordered sequence of expressions, optionally owned by a class.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Query {
    exprs: Vec<Expr>,
    component: Option<ClassId>,
}

impl Query {
    #[inline]
    pub const fn new(exprs: Vec<Expr>) -> Self {
        Self {
            exprs,
            component: None,
        }
    }

    #[inline]
    pub fn exprs(&self) -> &[Expr] {
        &self.exprs
    }

    #[inline]
    pub fn into_exprs(self) -> Vec<Expr> {
        self.exprs
    }

    #[inline]
    pub const fn component(&self) -> Option<&ClassId> {
        self.component.as_ref()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.exprs.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.exprs.is_empty()
    }

    /// The expression reading `key`, if any.
    pub fn find(&self, key: &Key) -> Option<&Expr> {
        self.exprs.iter().find(|expr| expr.key() == key)
    }

    /// Tag this query with its owning class.
    ///
    /// # Errors
    /// Returns [`QueryError::QueryReuseViolation`] when the query already
    /// belongs to a different class.
    pub fn tagged(mut self, owner: &ClassId) -> Result<Self, QueryError> {
        self.component = Some(claim(self.component.take(), owner)?);
        Ok(self)
    }

    pub(crate) fn with_owner(mut self, owner: Option<ClassId>) -> Self {
        self.component = owner;
        self
    }

    /// New expressions under the same owner.
    #[must_use]
    pub(crate) fn retagged(&self, exprs: Vec<Expr>) -> Self {
        Self {
            exprs,
            component: self.component.clone(),
        }
    }

    /// Replace the parameter placeholders of every call, at every depth.
    #[must_use]
    pub fn bind(&self, bindings: &Params) -> Self {
        self.retagged(self.exprs.iter().map(|expr| expr.bind(bindings)).collect())
    }

    /// Append the expressions of `other`, skipping exact duplicates.
    /// Calls sharing a key but not their parameters are all kept.
    pub fn absorb(&mut self, other: Self) {
        for expr in other.exprs {
            if !self.exprs.contains(&expr) {
                self.exprs.push(expr);
            }
        }
    }
}

impl FromIterator<Expr> for Query {
    fn from_iter<I: IntoIterator<Item = Expr>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

fn claim(current: Option<ClassId>, owner: &ClassId) -> Result<ClassId, QueryError> {
    match current {
        Some(existing) if existing != *owner => Err(QueryError::QueryReuseViolation {
            owner: owner.clone(),
            reused: existing,
        }),
        _ => Ok(owner.clone()),
    }
}

fn write_params(formatter: &mut fmt::Formatter<'_>, params: &Params) -> fmt::Result {
    write_map(formatter, params)
}

impl fmt::Display for Query {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("[")?;
        write_spaced(formatter, &self.exprs)?;
        formatter.write_str("]")
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Prop(key) => write!(formatter, "{key}"),
            Self::Join(key, subquery) => write!(formatter, "{{{key} {subquery}}}"),
            Self::Call(inner, params) => {
                write!(formatter, "({inner} ")?;
                write_params(formatter, params)?;
                formatter.write_str(")")
            }
        }
    }
}

impl fmt::Display for Subquery {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Query(query) => write!(formatter, "{query}"),
            Self::Union(union) => write_map(formatter, &union.branches),
            Self::Recur(Recursion::Unbounded) => formatter.write_str(Symbol::RECURSION),
            Self::Recur(Recursion::Depth(depth)) => write!(formatter, "{depth}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(entries: &[(&str, Value)]) -> Params {
        entries
            .iter()
            .map(|(name, value)| (Keyword::new(name), value.clone()))
            .collect()
    }

    #[test]
    fn key_sees_through_calls() {
        let expr = Expr::join("friends", Query::new(vec![Expr::prop("name")]))
            .with_params(params(&[("limit", Value::Int(3))]));
        assert_eq!(expr.key(), &Key::prop("friends"));
        assert!(expr.is_join());
        assert_eq!(expr.params().map(Params::len), Some(1));
    }

    #[test]
    fn bind_replaces_nested_placeholders() {
        let mut nested = Map::new();
        nested.insert(Value::keyword("term"), Value::Symbol(Symbol::new("?q")));
        let query = Query::new(vec![
            Expr::prop("search").with_params(params(&[
                ("filter", Value::Map(nested)),
                ("page", Value::Symbol(Symbol::new("?page"))),
            ])),
        ]);
        let bound = query.bind(&params(&[("q", Value::from("ada"))]));
        let call = bound.exprs()[0].params().cloned().unwrap_or_default();
        assert_eq!(
            call.get(&Keyword::new("filter")).and_then(|filter| filter.get("term")),
            Some(&Value::from("ada"))
        );
        assert_eq!(
            call.get(&Keyword::new("page")),
            Some(&Value::Symbol(Symbol::new("?page")))
        );
        // The source query is untouched.
        assert_ne!(bound, query);
    }

    #[test]
    fn retagging_to_another_owner_is_a_reuse_violation() {
        let query = Query::new(vec![Expr::prop("name")]);
        let owned = query.tagged(&ClassId::new("Person")).unwrap_or_default();
        assert!(owned.clone().tagged(&ClassId::new("Person")).is_ok());
        assert!(matches!(
            owned.tagged(&ClassId::new("Friend")),
            Err(QueryError::QueryReuseViolation { .. })
        ));
    }
}
