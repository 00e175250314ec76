//! Index of which consumers read what.
//!
//! Walking the root query once records, for every class path, where in the
//! root query that class's query sits (as a [`TemplateCursor`]), and for
//! every property, which classes read it. Mounted instances are then
//! bucketed by class and by the ident they show, which is all
//! [`Indexer::resolve`] needs to turn a changed key into consumers.

use crate::error::ReconcileError;
use crate::host::{DataPath, Host, InstanceId, display_path, path_keys};
use crate::queue::QueueKey;
use core::fmt;
use log::trace;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::collections::{BTreeMap, BTreeSet, btree_map};
use trellis_graph::TempIds;
use trellis_query::{
    ClassId, Ident, Key, Keyword, PathBound, Query, Registry, Subquery, TemplateCursor, Union,
    focus, path_from_focused, template,
};

/// The classes with queries between the root and a consumer, each at most
/// once.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ClassPath(SmallVec<ClassId, 4>);

impl ClassPath {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `class`. Returns false and leaves the path alone if the class
    /// is already on it.
    pub fn push(&mut self, class: ClassId) -> bool {
        if self.0.contains(&class) {
            return false;
        }
        self.0.push(class);
        true
    }

    /// The path extended by `class`, and whether `class` was a repeat.
    pub fn with(&self, class: &ClassId) -> (Self, bool) {
        let mut extended = self.clone();
        let repeated = !extended.push(class.clone());
        (extended, repeated)
    }

    /// Build from classes ordered root first. The path stops at the first
    /// class seen twice; the flag says whether that happened.
    pub fn from_ancestry(classes: impl IntoIterator<Item = ClassId>) -> (Self, bool) {
        let mut path = Self::new();
        for class in classes {
            if !path.push(class) {
                return (path, true);
            }
        }
        (path, false)
    }

    pub fn classes(&self) -> &[ClassId] {
        &self.0
    }

    pub fn last(&self) -> Option<&ClassId> {
        self.0.last()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ClassPath {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (position, class) in self.0.iter().enumerate() {
            if position > 0 {
                formatter.write_str(" > ")?;
            }
            write!(formatter, "{class}")?;
        }
        Ok(())
    }
}

/// What the indexer needs to know about one mounted consumer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstanceView {
    pub class: ClassId,
    pub class_path: ClassPath,
    /// Whether the consumer sits below another instance of a class on its path.
    pub recursive: bool,
    pub path: DataPath,
    /// The consumer's own query, owned by its class.
    pub query: Subquery,
}

impl InstanceView {
    /// Gather the view of `instance` from the host.
    ///
    /// # Errors
    /// [`ReconcileError::InvalidKey`] when the host does not know the
    /// instance's class, and [`ReconcileError::Query`] when its class is
    /// unregistered, declares no query, or its query is owned elsewhere.
    pub fn of(host: &dyn Host, registry: &Registry, instance: InstanceId) -> Result<Self, ReconcileError> {
        let class = host
            .class_of(instance)
            .ok_or_else(|| ReconcileError::InvalidKey(QueueKey::Instance(instance)))?;
        let query = match host.query(instance) {
            Some(own) => own.tagged(&class)?,
            None => registry.require(&class)?.get_query()?,
        };
        let mut ancestry = Vec::new();
        let mut current = Some(instance);
        while let Some(id) = current {
            if let Some(ancestor) = host.class_of(id).filter(|ancestor| registry.has_query(ancestor)) {
                ancestry.push(ancestor);
            }
            current = host.parent(id);
        }
        ancestry.reverse();
        let (class_path, recursive) = ClassPath::from_ancestry(ancestry);
        Ok(Self {
            class,
            class_path,
            recursive,
            path: host.path(instance),
            query,
        })
    }
}

/// Sizes of the index tables.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct IndexStats {
    pub class_paths: usize,
    pub templates: usize,
    pub props: usize,
    pub instances: usize,
    pub idents: usize,
}

#[derive(Copy, Clone)]
enum Node<'query> {
    Query(&'query Query),
    Union(&'query Union),
}

impl<'query> Node<'query> {
    const fn component(self) -> Option<&'query ClassId> {
        match self {
            Self::Query(query) => query.component(),
            Self::Union(union) => union.component(),
        }
    }
}

#[derive(Debug)]
struct Indexed {
    class: ClassId,
    ident: Option<Ident>,
}

/// Index tables for one root.
#[derive(Debug, Default)]
pub struct Indexer {
    root_query: Option<Query>,
    prop_classes: FxHashMap<Keyword, BTreeSet<ClassId>>,
    templates: FxHashMap<ClassPath, Vec<TemplateCursor>>,
    class_instances: FxHashMap<ClassId, BTreeSet<InstanceId>>,
    ident_instances: BTreeMap<Ident, BTreeSet<InstanceId>>,
    indexed: FxHashMap<InstanceId, Indexed>,
}

impl Indexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Walk `root_query` and rebuild the property and template tables.
    /// Indexed instances are kept.
    pub fn index_root(&mut self, root_query: Query) {
        self.prop_classes.clear();
        self.templates.clear();
        let mut path = Vec::new();
        self.visit(
            &root_query,
            Node::Query(&root_query),
            None,
            &mut path,
            &ClassPath::new(),
        );
        trace!(
            "indexed root query: {} class paths, {} props",
            self.templates.len(),
            self.prop_classes.len()
        );
        self.root_query = Some(root_query);
    }

    fn visit(
        &mut self,
        root: &Query,
        node: Node<'_>,
        owner: Option<&ClassId>,
        path: &mut Vec<Key>,
        class_path: &ClassPath,
    ) {
        let class = node.component();
        let (class_path, recursive) = match class {
            Some(class) => class_path.with(class),
            None => (class_path.clone(), false),
        };
        if class.is_some() {
            self.record_template(root, path, &class_path);
        }
        if recursive && has_repeated_keys(path) {
            trace!("not re-expanding {class_path} at {path:?}");
            return;
        }
        let owner = class.or(owner);
        match node {
            Node::Query(query) => self.visit_exprs(root, query, owner, path, &class_path),
            Node::Union(union) => {
                for (tag, branch) in union.branches() {
                    path.push(Key::Prop(tag.clone()));
                    self.visit(root, Node::Query(branch), owner, path, &class_path);
                    path.pop();
                }
            }
        }
    }

    fn visit_exprs(
        &mut self,
        root: &Query,
        query: &Query,
        owner: Option<&ClassId>,
        path: &mut Vec<Key>,
        class_path: &ClassPath,
    ) {
        for expr in query.exprs() {
            let key = expr.key();
            if let (Some(owner), Some(prop)) = (owner, key.dispatch_key()) {
                self.prop_classes
                    .entry(prop.clone())
                    .or_default()
                    .insert(owner.clone());
            }
            let node = match expr.join_value() {
                Some(Subquery::Query(sub)) => Node::Query(sub),
                Some(Subquery::Union(union)) => Node::Union(union),
                Some(Subquery::Recur(_)) | None => continue,
            };
            path.push(key.clone());
            self.visit(root, node, owner, path, class_path);
            path.pop();
        }
    }

    fn record_template(&mut self, root: &Query, path: &[Key], class_path: &ClassPath) {
        let Some(cursor) = template(&focus(root, path), path) else {
            return;
        };
        let templates = self.templates.entry(class_path.clone()).or_default();
        if templates.iter().all(|known| known.path() != path) {
            templates.push(cursor);
        }
    }

    /// Drop the root and every table.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Add `instance` to the class bucket and, if it has one, the ident
    /// bucket. Re-indexing an instance moves it.
    pub fn index_instance(&mut self, instance: InstanceId, class: ClassId, ident: Option<Ident>) {
        self.drop_instance(instance);
        self.class_instances
            .entry(class.clone())
            .or_default()
            .insert(instance);
        if let Some(ident) = &ident {
            self.ident_instances
                .entry(ident.clone())
                .or_default()
                .insert(instance);
        }
        self.indexed.insert(instance, Indexed { class, ident });
    }

    /// Remove `instance` from the buckets it was indexed under. Returns
    /// false if it was not indexed.
    pub fn drop_instance(&mut self, instance: InstanceId) -> bool {
        let Some(Indexed { class, ident }) = self.indexed.remove(&instance) else {
            return false;
        };
        if let Some(instances) = self.class_instances.get_mut(&class) {
            instances.remove(&instance);
            if instances.is_empty() {
                self.class_instances.remove(&class);
            }
        }
        if let Some(ident) = ident
            && let btree_map::Entry::Occupied(mut bucket) = self.ident_instances.entry(ident)
        {
            bucket.get_mut().remove(&instance);
            if bucket.get().is_empty() {
                bucket.remove();
            }
        }
        true
    }

    /// Move instances indexed under temporary idents to the permanent ones.
    pub fn migrate_idents(&mut self, tempids: &TempIds) {
        for (temp, permanent) in tempids {
            if let Some(instances) = self.ident_instances.remove(temp) {
                for instance in &instances {
                    if let Some(indexed) = self.indexed.get_mut(instance) {
                        indexed.ident = Some(permanent.clone());
                    }
                }
                self.ident_instances
                    .entry(permanent.clone())
                    .or_default()
                    .extend(instances);
            }
        }
    }

    /// The consumers a queued key stands for.
    ///
    /// # Errors
    /// [`ReconcileError::InvalidKey`] for the root sentinel, for an ident
    /// no mounted consumer shows and for a property no class reads.
    pub fn resolve(&self, key: &QueueKey) -> Result<BTreeSet<InstanceId>, ReconcileError> {
        match key {
            QueueKey::Instance(instance) => Ok(BTreeSet::from([*instance])),
            QueueKey::Ident(ident) => match self.ident_instances.get(ident) {
                Some(instances) if !instances.is_empty() => Ok(instances.clone()),
                _ => Err(ReconcileError::InvalidKey(key.clone())),
            },
            QueueKey::Prop(prop) => match self.prop_classes.get(prop) {
                Some(classes) if !classes.is_empty() => Ok(classes
                    .iter()
                    .filter_map(|class| self.class_instances.get(class))
                    .flatten()
                    .copied()
                    .collect()),
                _ => Err(ReconcileError::InvalidKey(key.clone())),
            },
            QueueKey::Root => Err(ReconcileError::InvalidKey(QueueKey::Root)),
        }
    }

    /// The root query with `view`'s own query put where its class sits.
    ///
    /// # Errors
    /// [`ReconcileError::NoQueriesForPath`] when no template recorded for
    /// the class path leads to the view's data path.
    pub fn full_query(&self, view: &InstanceView) -> Result<Query, ReconcileError> {
        let keys = path_keys(&view.path);
        let candidates = self.templates_for(&view.class_path);
        let exact = candidates
            .iter()
            .find(|cursor| path_from_focused(cursor.root(), PathBound::Exact(&keys)) == keys);
        let chosen = exact.or_else(|| {
            candidates.iter().find(|cursor| {
                view.recursive && unrolled(&path_from_focused(cursor.root(), PathBound::Any), &keys)
            })
        });
        let cursor = chosen.ok_or_else(|| ReconcileError::NoQueriesForPath {
            class_path: view.class_path.to_string(),
            path: display_path(&view.path),
        })?;
        Ok(cursor.splice(view.query.clone())?)
    }

    #[inline]
    pub const fn root_query(&self) -> Option<&Query> {
        self.root_query.as_ref()
    }

    pub fn templates_for(&self, class_path: &ClassPath) -> &[TemplateCursor] {
        self.templates.get(class_path).map_or(&[], Vec::as_slice)
    }

    pub fn classes_for_prop(&self, prop: &Keyword) -> Option<&BTreeSet<ClassId>> {
        self.prop_classes.get(prop)
    }

    pub fn class_instances(&self, class: &ClassId) -> Option<&BTreeSet<InstanceId>> {
        self.class_instances.get(class)
    }

    pub fn ident_instances(&self, ident: &Ident) -> Option<&BTreeSet<InstanceId>> {
        self.ident_instances.get(ident)
    }

    pub fn is_indexed(&self, instance: InstanceId) -> bool {
        self.indexed.contains_key(&instance)
    }

    /// The ident `instance` was indexed under.
    pub fn ident_of(&self, instance: InstanceId) -> Option<&Ident> {
        self.indexed.get(&instance)?.ident.as_ref()
    }

    /// Every indexed instance, in no particular order.
    pub fn instances(&self) -> impl Iterator<Item = InstanceId> + '_ {
        self.indexed.keys().copied()
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            class_paths: self.templates.len(),
            templates: self.templates.values().map(Vec::len).sum(),
            props: self.prop_classes.len(),
            instances: self.indexed.len(),
            idents: self.ident_instances.len(),
        }
    }
}

fn has_repeated_keys(path: &[Key]) -> bool {
    path.iter()
        .enumerate()
        .any(|(position, key)| path[..position].contains(key))
}

/// Whether `keys` is `prefix` followed by one key repeated, as a recursive
/// join unrolls.
fn unrolled(prefix: &[Key], keys: &[Key]) -> bool {
    let Some(rest) = keys.strip_prefix(prefix) else {
        return false;
    };
    rest.first()
        .is_some_and(|first| rest.iter().all(|key| key == first))
}
