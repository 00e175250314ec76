//! The reconciler: owns application state and keeps consumers in step with it.
//!
//! Every operation runs to completion on `&mut self`. Work that should not
//! happen inline (re-rendering and sending to remotes) is queued, and the
//! host is asked once per batch to run [`Reconciler::reconcile`] or
//! [`Reconciler::send`] later.

use crate::config::ReconcilerConfig;
use crate::error::ReconcileError;
use crate::history::{History, TxHistory, TxId};
use crate::host::{FlushKind, Host, InstanceId, display_path, get_in};
use crate::indexer::{Indexer, InstanceView};
use crate::parser::{MutateEnv, Parser, ReadEnv, affected_keys};
use crate::queue::{QueueKey, SendQueue, WorkQueue};
use crate::schedule::Schedule;
use crate::transport::{RemoteResponse, ResponseSink, Transport};
use log::{debug, trace, warn};
use std::collections::BTreeSet;
use tokio::sync::mpsc;
use trellis_graph::{GraphStore, Revision, migrate, normalize, sift};
use trellis_query::{ClassId, Ident, Key, Map, Query, Registry, Subquery, Value};

/// Who issued a transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TxOrigin {
    /// The reconciler itself, on behalf of no consumer.
    Reconciler,
    Instance(InstanceId),
    /// Every consumer showing this entity.
    Ident(Ident),
}

/// What a transaction listener is told.
#[derive(Debug)]
pub struct TxReport<'tx> {
    pub id: TxId,
    pub origin: &'tx TxOrigin,
    pub tx: &'tx Query,
    pub result: &'tx Map,
}

/// Called after every successful transaction.
pub type TxListener = Box<dyn FnMut(&TxReport<'_>)>;

/// The outcome of one render flush.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub root_rendered: bool,
    /// Consumers re-rendered with new props, in flush order.
    pub updated: Vec<InstanceId>,
    /// Consumers left alone: unmounted, or their props did not change.
    pub skipped: Vec<InstanceId>,
    /// Consumers whose props could not be computed.
    pub failed: Vec<InstanceId>,
}

pub struct Reconciler {
    config: ReconcilerConfig,
    registry: Registry,
    state: GraphStore,
    /// Initial tree, normalized into `state` when the root is added.
    initial_tree: Option<Map>,
    indexer: Indexer,
    parser: Box<dyn Parser>,
    transport: Option<Box<dyn Transport>>,
    history: Box<dyn History>,
    shared: Value,
    root_class: Option<ClassId>,
    work: WorkQueue,
    sends: SendQueue,
    render_schedule: Schedule,
    send_schedule: Schedule,
    responses_tx: mpsc::UnboundedSender<RemoteResponse>,
    responses_rx: mpsc::UnboundedReceiver<RemoteResponse>,
    tx_listener: Option<TxListener>,
}

impl Reconciler {
    pub fn new(config: ReconcilerConfig, registry: Registry, parser: impl Parser + 'static) -> Self {
        let (responses_tx, responses_rx) = mpsc::unbounded_channel();
        let history = TxHistory::new(config.history_capacity);
        Self {
            config,
            registry,
            state: GraphStore::new(),
            initial_tree: None,
            indexer: Indexer::new(),
            parser: Box::new(parser),
            transport: None,
            history: Box::new(history),
            shared: Value::Nil,
            root_class: None,
            work: WorkQueue::new(),
            sends: SendQueue::new(),
            render_schedule: Schedule::new(),
            send_schedule: Schedule::new(),
            responses_tx,
            responses_rx,
            tx_listener: None,
        }
    }

    /// Start from an already normalized store.
    #[must_use]
    pub fn with_state(mut self, state: GraphStore) -> Self {
        self.state = state;
        self.initial_tree = None;
        self
    }

    /// Start from a tree, normalized against the root query when the root
    /// is added (if normalization is enabled).
    #[must_use]
    pub fn with_initial_tree(mut self, tree: Map) -> Self {
        self.initial_tree = Some(tree);
        self
    }

    #[must_use]
    pub fn with_transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Box::new(transport));
        self
    }

    #[must_use]
    pub fn with_history(mut self, history: impl History + 'static) -> Self {
        self.history = Box::new(history);
        self
    }

    /// Data handed to the parser alongside the state on every read.
    #[must_use]
    pub fn with_shared(mut self, shared: Value) -> Self {
        self.shared = shared;
        self
    }

    #[must_use]
    pub fn with_tx_listener(mut self, listener: impl FnMut(&TxReport<'_>) + 'static) -> Self {
        self.tx_listener = Some(Box::new(listener));
        self
    }

    #[inline]
    pub const fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    #[inline]
    pub const fn registry(&self) -> &Registry {
        &self.registry
    }

    #[inline]
    pub const fn state(&self) -> &GraphStore {
        &self.state
    }

    /// Revision of the current state.
    #[inline]
    pub const fn basis_t(&self) -> Revision {
        self.state.revision()
    }

    #[inline]
    pub const fn indexer(&self) -> &Indexer {
        &self.indexer
    }

    pub fn history(&self) -> &dyn History {
        self.history.as_ref()
    }

    /// The state as it was before transaction `tx`, while still in history.
    pub fn state_before(&self, tx: TxId) -> Option<&GraphStore> {
        self.history.get(tx)
    }

    /// Keys waiting for the next render flush.
    pub fn pending(&self) -> &[QueueKey] {
        self.work.keys()
    }

    /// Fragments waiting for the next send.
    pub const fn pending_sends(&self) -> &SendQueue {
        &self.sends
    }

    pub const fn root_class(&self) -> Option<&ClassId> {
        self.root_class.as_ref()
    }

    fn read_env(&self) -> ReadEnv<'_> {
        ReadEnv {
            state: &self.state,
            shared: &self.shared,
            registry: &self.registry,
        }
    }

    fn root_query_of(&self, host: &dyn Host, class: &ClassId) -> Result<Query, ReconcileError> {
        let own = host.root().and_then(|root| host.query(root));
        let subquery = match own {
            Some(own) => own.tagged(class)?,
            None => self.registry.require(class)?.get_query()?,
        };
        match subquery {
            Subquery::Query(query) => Ok(query),
            Subquery::Union(_) | Subquery::Recur(_) => {
                Err(ReconcileError::RootNotSequence(class.clone()))
            }
        }
    }

    fn read_root(&self) -> Result<Value, ReconcileError> {
        let query = self.indexer.root_query().ok_or(ReconcileError::NoRoot)?;
        self.parser
            .read(&self.read_env(), query)
            .map_err(ReconcileError::Parser)
    }

    /// Make `class` the root: normalize the initial tree, index the root
    /// query and render the root once.
    ///
    /// # Errors
    /// [`ReconcileError::RootNotSequence`] for a union root query,
    /// [`ReconcileError::Graph`] when the initial tree does not normalize,
    /// and [`ReconcileError::Parser`] when the first read fails.
    pub fn add_root(&mut self, host: &mut dyn Host, class: &ClassId) -> Result<(), ReconcileError> {
        let root_query = self.root_query_of(host, class)?;
        if let Some(tree) = self.initial_tree.take() {
            self.state = if self.config.normalize {
                normalize(&root_query, &tree, &self.registry)?.into_store()
            } else {
                GraphStore::from_map(tree)
            };
        }
        self.indexer.clear();
        self.indexer.index_root(root_query);
        self.root_class = Some(class.clone());
        debug!("added root {class}: {:?}", self.indexer.stats());
        let data = self.read_root()?;
        host.render_root(data);
        Ok(())
    }

    /// Forget the root, every indexed consumer and all pending work.
    pub fn remove_root(&mut self) {
        if let Some(class) = self.root_class.take() {
            debug!("removed root {class}");
        }
        self.indexer.clear();
        self.work.clear();
        self.sends.clear();
        self.render_schedule.complete();
        self.send_schedule.complete();
    }

    /// Index a consumer the host mounted, or re-index one whose props
    /// changed. Consumers of classes without a query are not indexed.
    ///
    /// # Errors
    /// [`ReconcileError::InvalidKey`] when the host does not know the
    /// instance's class.
    pub fn mount(&mut self, host: &dyn Host, instance: InstanceId) -> Result<(), ReconcileError> {
        let class = host
            .class_of(instance)
            .ok_or_else(|| ReconcileError::InvalidKey(QueueKey::Instance(instance)))?;
        let Some(definition) = self.registry.get(&class) else {
            trace!("{instance} of unregistered class {class} is not indexed");
            return Ok(());
        };
        if !definition.has_query() {
            return Ok(());
        }
        let ident = host
            .props(instance)
            .and_then(|props| definition.ident(&props));
        trace!("indexing {instance} ({class}) under {ident:?}");
        self.indexer.index_instance(instance, class, ident);
        Ok(())
    }

    /// Drop a consumer the host unmounted.
    pub fn unmount(&mut self, instance: InstanceId) {
        if self.indexer.drop_instance(instance) {
            trace!("dropped {instance} from the index");
        }
    }

    /// Re-walk the root query and re-index every consumer still mounted,
    /// then queue a root render.
    ///
    /// # Errors
    /// [`ReconcileError::NoRoot`] before [`Self::add_root`], otherwise as
    /// [`Self::mount`].
    pub fn reindex(&mut self, host: &mut dyn Host) -> Result<(), ReconcileError> {
        let class = self.root_class.clone().ok_or(ReconcileError::NoRoot)?;
        let root_query = self.root_query_of(host, &class)?;
        self.indexer.index_root(root_query);
        let instances: Vec<InstanceId> = self.indexer.instances().collect();
        for instance in instances {
            if host.is_mounted(instance) {
                self.mount(host, instance)?;
            } else {
                self.indexer.drop_instance(instance);
            }
        }
        self.queue(host, [QueueKey::Root]);
        Ok(())
    }

    /// The host changed the query or parameters of `instance`: re-index
    /// and refresh it.
    ///
    /// # Errors
    /// As [`Self::reindex`].
    pub fn query_changed(&mut self, host: &mut dyn Host, instance: InstanceId) -> Result<(), ReconcileError> {
        let class = self.root_class.clone().ok_or(ReconcileError::NoRoot)?;
        let root_query = self.root_query_of(host, &class)?;
        self.indexer.index_root(root_query);
        self.mount(host, instance)?;
        self.queue(host, [QueueKey::Instance(instance)]);
        Ok(())
    }

    /// Queue keys for the next render and make sure one is scheduled.
    pub fn queue(&mut self, host: &mut dyn Host, keys: impl IntoIterator<Item = QueueKey>) {
        self.work.extend(keys);
        self.schedule_render(host);
    }

    /// Ask the host for a render flush unless one is already pending.
    /// Returns true if this call made the request.
    pub fn schedule_render(&mut self, host: &mut dyn Host) -> bool {
        let requested = self.render_schedule.request();
        if requested {
            host.request_flush(FlushKind::Render, self.config.coalesce_delay());
        }
        requested
    }

    /// Ask the host for a send flush unless one is already pending.
    /// Returns true if this call made the request.
    pub fn schedule_sends(&mut self, host: &mut dyn Host) -> bool {
        let requested = self.send_schedule.request();
        if requested {
            host.request_flush(FlushKind::Send, self.config.coalesce_delay());
        }
        requested
    }

    /// Run `tx` through the parser against the state.
    ///
    /// The state before the transaction is kept in history, the origin and
    /// every key the result names are queued for rendering, and any
    /// fragment a remote must see is queued for sending.
    ///
    /// # Errors
    /// [`ReconcileError::Parser`] when the parser fails to run the
    /// transaction or to split out a remote fragment. The state is left
    /// as it was before the transaction.
    pub fn transact(
        &mut self,
        host: &mut dyn Host,
        origin: TxOrigin,
        tx: &Query,
    ) -> Result<Map, ReconcileError> {
        let id = TxId::new();
        let snapshot = self.state.clone();
        let ran = {
            let mut env = MutateEnv {
                state: &mut self.state,
                shared: &self.shared,
                registry: &self.registry,
            };
            self.parser.transact(&mut env, tx)
        };
        let split = ran.and_then(|result| {
            let env = ReadEnv {
                state: &self.state,
                shared: &self.shared,
                registry: &self.registry,
            };
            let mut fragments = Vec::new();
            for target in &self.config.remotes {
                if let Some(fragment) = self.parser.remote(&env, tx, target)? {
                    fragments.push((target.clone(), fragment));
                }
            }
            Ok((result, fragments))
        });
        let (result, fragments) = match split {
            Ok(split) => split,
            Err(error) => {
                warn!("{id} failed, restoring {:?}: {error:#}", snapshot.revision());
                self.state = snapshot;
                return Err(ReconcileError::Parser(error));
            }
        };
        for (target, fragment) in fragments {
            trace!("{id} sends {fragment} to {target}");
            self.sends.push(target, fragment);
        }
        self.history.record(id, snapshot);

        let mut keys = match &origin {
            TxOrigin::Reconciler => Vec::new(),
            TxOrigin::Instance(instance) => {
                let mut keys = vec![QueueKey::Instance(*instance)];
                keys.extend(self.indexer.ident_of(*instance).cloned().map(QueueKey::Ident));
                keys
            }
            TxOrigin::Ident(ident) => vec![QueueKey::Ident(ident.clone())],
        };
        keys.extend(affected_keys(&result).iter().filter_map(QueueKey::from_key));
        debug!("{id} from {origin:?} queues {} keys", keys.len());
        self.queue(host, keys);
        if !self.sends.is_empty() {
            self.schedule_sends(host);
        }
        if let Some(listener) = self.tx_listener.as_mut() {
            listener(&TxReport {
                id,
                origin: &origin,
                tx,
                result: &result,
            });
        }
        Ok(result)
    }

    /// Fold `delta` into the state.
    ///
    /// Ident-keyed maps patch the entity they name. Everything else is
    /// novelty, normalized against `query` (or the root query) when
    /// normalization is on. Tempid mappings then move entities, references,
    /// queued keys and indexed consumers to their permanent idents. Every
    /// touched key is queued.
    ///
    /// # Errors
    /// [`ReconcileError::Graph`] when the novelty does not normalize.
    pub fn merge(
        &mut self,
        host: &mut dyn Host,
        delta: Map,
        query: Option<&Query>,
    ) -> Result<(), ReconcileError> {
        let sifted = sift(delta);
        let mut keys = Vec::new();
        for (ident, props) in sifted.patches {
            self.state.merge_entity(&ident, props);
            keys.push(QueueKey::Ident(ident));
        }
        if !sifted.novelty.is_empty() {
            keys.extend(
                sifted
                    .novelty
                    .keys()
                    .filter_map(Key::from_value)
                    .filter_map(|key| QueueKey::from_key(&key)),
            );
            match query.or_else(|| self.indexer.root_query()) {
                Some(query) if self.config.normalize => {
                    let normalized = normalize(query, &sifted.novelty, &self.registry)?;
                    self.state.merge_tables(normalized.tables);
                    self.state.merge_root(normalized.tree);
                }
                _ => self.state.merge_root(sifted.novelty),
            }
        }
        if !sifted.mutations.is_empty() {
            trace!("mutation results not merged: {:?}", sifted.mutations);
        }
        if !sifted.tempids.is_empty() {
            debug!("migrating {} tempids", sifted.tempids.len());
            migrate(&mut self.state, &sifted.tempids, self.config.id_key.as_ref());
            self.work.rewrite(&sifted.tempids);
            self.indexer.migrate_idents(&sifted.tempids);
            keys.extend(sifted.tempids.values().cloned().map(QueueKey::Ident));
        }
        self.queue(host, keys);
        Ok(())
    }

    /// The props `instance` should render with now: its full query read
    /// from the state, at its data path.
    ///
    /// # Errors
    /// [`ReconcileError::NoQueriesForPath`] when the index has no template
    /// for the instance, and [`ReconcileError::Parser`] when the read fails.
    pub fn props_for(&self, host: &dyn Host, instance: InstanceId) -> Result<Value, ReconcileError> {
        let view = InstanceView::of(host, &self.registry, instance)?;
        let query = self.indexer.full_query(&view)?;
        let data = self
            .parser
            .read(&self.read_env(), &query)
            .map_err(ReconcileError::Parser)?;
        trace!("{instance} reads {query} at {}", display_path(&view.path));
        Ok(get_in(&data, &view.path).cloned().unwrap_or_default())
    }

    /// Re-render the root from the current state, whatever is queued.
    ///
    /// # Errors
    /// [`ReconcileError::NoRoot`] before [`Self::add_root`], and
    /// [`ReconcileError::Parser`] when the read fails.
    pub fn force_root_render(&mut self, host: &mut dyn Host) -> Result<(), ReconcileError> {
        let data = self.read_root()?;
        host.render_root(data);
        Ok(())
    }

    /// Run a render flush: turn the queued keys into consumers and
    /// re-render those whose props changed, or the root when the queue
    /// asks for it. The queue is empty afterwards.
    ///
    /// # Errors
    /// [`ReconcileError::NoRoot`] before [`Self::add_root`], and
    /// [`ReconcileError::Parser`] when a root read fails. Failures for
    /// single consumers are logged and listed in the report instead.
    pub fn reconcile(&mut self, host: &mut dyn Host) -> Result<ReconcileReport, ReconcileError> {
        self.render_schedule.complete();
        let keys = self.work.take();
        if self.root_class.is_none() {
            return Err(ReconcileError::NoRoot);
        }
        let mut report = ReconcileReport::default();
        let mut instances = BTreeSet::new();
        let mut root = keys.is_empty();
        for key in &keys {
            if *key == QueueKey::Root {
                root = true;
                continue;
            }
            match self.indexer.resolve(key) {
                Ok(resolved) => instances.extend(resolved),
                Err(error) => warn!("skipping queued key: {error}"),
            }
        }
        root = root || instances.iter().any(|instance| host.depth(*instance) == 0);
        if root {
            debug!("re-rendering from the root for {} queued keys", keys.len());
            self.force_root_render(host)?;
            report.root_rendered = true;
            return Ok(report);
        }

        let mut ordered: Vec<InstanceId> = instances.into_iter().collect();
        if self.config.optimize {
            ordered.sort_by_key(|instance| (host.depth(*instance), *instance));
        }
        debug!("refreshing {} consumers", ordered.len());
        for instance in ordered {
            if !host.is_mounted(instance) {
                trace!("{instance} unmounted before the flush");
                report.skipped.push(instance);
                continue;
            }
            match self.props_for(&*host, instance) {
                Ok(next) if host.should_update(instance, &next) => {
                    host.force_rerender(instance, next);
                    report.updated.push(instance);
                }
                Ok(_) => report.skipped.push(instance),
                Err(error) => {
                    warn!("not refreshing {instance}: {error}");
                    report.failed.push(instance);
                }
            }
        }
        Ok(report)
    }

    /// Hand every queued fragment to the transport. Returns the number of
    /// targets sent to.
    ///
    /// # Errors
    /// [`ReconcileError::NoTransport`] when fragments are queued but no
    /// transport is configured; they stay queued.
    pub fn send(&mut self) -> Result<usize, ReconcileError> {
        self.send_schedule.complete();
        if self.sends.is_empty() {
            return Ok(0);
        }
        let transport = self.transport.as_mut().ok_or(ReconcileError::NoTransport)?;
        let fragments = self.sends.take();
        let targets = fragments.len();
        debug!("sending fragments to {targets} targets");
        transport.send(fragments, ResponseSink::new(self.responses_tx.clone()));
        Ok(targets)
    }

    /// A sink that feeds [`Self::process_responses`], for responses that
    /// arrive outside a [`Transport::send`] call.
    pub fn response_sink(&self) -> ResponseSink {
        ResponseSink::new(self.responses_tx.clone())
    }

    /// Merge every response delivered so far, each normalized against the
    /// fragment it answers. Returns how many merged.
    pub fn process_responses(&mut self, host: &mut dyn Host) -> usize {
        let mut merged = 0usize;
        while let Ok(response) = self.responses_rx.try_recv() {
            let RemoteResponse {
                target,
                query,
                novelty,
            } = response;
            match self.merge(host, novelty, Some(&query)) {
                Ok(()) => merged = merged.saturating_add(1),
                Err(error) => warn!("dropping response from {target}: {error}"),
            }
        }
        merged
    }
}
