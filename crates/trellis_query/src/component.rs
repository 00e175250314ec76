//! Capability records for consumer classes.
//!
//! A [`ComponentClass`] states what a class can do: whether it declares a
//! query (and with which parameters) and whether it can compute an
//! identity from its props. The [`Registry`] is the explicit context the
//! indexer, the normalizer and the reconciler share in place of any
//! process-wide lookup.

use crate::error::QueryError;
use crate::query::{Params, Subquery};
use crate::value::{Ident, Map};
use core::fmt;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Name of a consumer class.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClassId(Arc<str>);

impl ClassId {
    #[inline]
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ClassId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

/// Computes the identity of an instance from its props.
pub type IdentFn = Arc<dyn Fn(&Map) -> Option<Ident> + Send + Sync>;

/// What a consumer class declares about itself.
#[derive(Clone)]
pub struct ComponentClass {
    id: ClassId,
    query: Option<Subquery>,
    params: Params,
    ident: Option<IdentFn>,
}

impl ComponentClass {
    pub fn new(name: &str) -> Self {
        Self {
            id: ClassId::new(name),
            query: None,
            params: Params::new(),
            ident: None,
        }
    }

    /// Declare the class query (a sequence or a union), unbound.
    #[must_use]
    pub fn with_query(mut self, query: impl Into<Subquery>) -> Self {
        self.query = Some(query.into());
        self
    }

    /// Declare the parameters bound into the query by [`Self::get_query`].
    #[must_use]
    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    #[must_use]
    pub fn with_ident(
        mut self,
        ident: impl Fn(&Map) -> Option<Ident> + Send + Sync + 'static,
    ) -> Self {
        self.ident = Some(Arc::new(ident));
        self
    }

    #[inline]
    pub const fn id(&self) -> &ClassId {
        &self.id
    }

    #[inline]
    pub const fn has_query(&self) -> bool {
        self.query.is_some()
    }

    #[inline]
    pub const fn has_ident(&self) -> bool {
        self.ident.is_some()
    }

    #[inline]
    pub const fn params(&self) -> &Params {
        &self.params
    }

    /// The declared query before parameter binding.
    #[inline]
    pub const fn unbound_query(&self) -> Option<&Subquery> {
        self.query.as_ref()
    }

    /// Identity of an instance with `props`, if the class has one.
    pub fn ident(&self, props: &Map) -> Option<Ident> {
        self.ident.as_ref().and_then(|ident| ident(props))
    }

    /// The class query with its own parameters bound, tagged with this
    /// class as owner.
    ///
    /// # Errors
    /// [`QueryError::NoQuery`] when the class declares none, and
    /// [`QueryError::QueryReuseViolation`] when the declared query is
    /// owned by another class.
    pub fn get_query(&self) -> Result<Subquery, QueryError> {
        self.query_with(&self.params)
    }

    /// Like [`Self::get_query`] with explicit parameters, as used when an
    /// instance overrides the class defaults.
    ///
    /// # Errors
    /// Same as [`Self::get_query`].
    pub fn query_with(&self, params: &Params) -> Result<Subquery, QueryError> {
        let query = self
            .query
            .as_ref()
            .ok_or_else(|| QueryError::NoQuery(self.id.clone()))?;
        query.bind(params).tagged(&self.id)
    }
}

impl fmt::Debug for ComponentClass {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ComponentClass")
            .field("id", &self.id)
            .field("query", &self.query)
            .field("params", &self.params)
            .field("has_ident", &self.ident.is_some())
            .finish()
    }
}

/// All known classes, keyed by id.
#[derive(Clone, Debug, Default)]
pub struct Registry {
    classes: FxHashMap<ClassId, Arc<ComponentClass>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `class`, replacing any class with the same id.
    pub fn register(&mut self, class: ComponentClass) -> Arc<ComponentClass> {
        let class = Arc::new(class);
        self.classes.insert(class.id().clone(), Arc::clone(&class));
        class
    }

    #[inline]
    pub fn get(&self, id: &ClassId) -> Option<&Arc<ComponentClass>> {
        self.classes.get(id)
    }

    /// # Errors
    /// [`QueryError::UnknownClass`] when `id` was never registered.
    pub fn require(&self, id: &ClassId) -> Result<&Arc<ComponentClass>, QueryError> {
        self.classes
            .get(id)
            .ok_or_else(|| QueryError::UnknownClass(id.clone()))
    }

    /// Identity computed by class `id` for `props`.
    ///
    /// # Errors
    /// [`QueryError::UnknownClass`] when `id` was never registered.
    pub fn ident_for(&self, id: &ClassId, props: &Map) -> Result<Option<Ident>, QueryError> {
        Ok(self.require(id)?.ident(props))
    }

    /// Whether `id` names a registered class that declares a query.
    pub fn has_query(&self, id: &ClassId) -> bool {
        self.classes.get(id).is_some_and(|class| class.has_query())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}
