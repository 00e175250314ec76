//! Transactions, render flushes and remote round trips over a roster of
//! people.

mod support;

use core::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use support::{ROSTER, TestHost, map, roster_host, roster_parser, roster_registry};
use trellis_query::{ClassId, Expr, Ident, Keyword, Map, Params, Query, Symbol, TempId, Value};
use trellis_reconciler::{
    FlushKind, InstanceId, MutateEnv, Parser, QueueKey, ReadEnv, ReconcileError, Reconciler,
    ReconcilerConfig, ResponseSink, StoreParser, TxId, TxOrigin,
};

fn rename(id: i64, name: &str) -> Query {
    let params: Params = [
        (Keyword::new("id"), Value::Int(id)),
        (Keyword::new("name"), Value::from(name)),
    ]
    .into_iter()
    .collect();
    Query::new(vec![Expr::mutation("rename!", params)])
}

fn add_person(id: Value, name: &str) -> Query {
    let params: Params = [
        (Keyword::new("id"), id),
        (Keyword::new("name"), Value::from(name)),
    ]
    .into_iter()
    .collect();
    Query::new(vec![Expr::mutation("add-person!", params)])
}

/// Reconciler over the roster, root added and every consumer mounted.
fn started(config: ReconcilerConfig) -> anyhow::Result<(Reconciler, TestHost)> {
    let mut host = roster_host()?;
    let mut reconciler = Reconciler::new(config, roster_registry()?, roster_parser())
        .with_initial_tree(map(ROSTER)?);
    reconciler.add_root(&mut host, &ClassId::new("Root"))?;
    for id in 0..3 {
        reconciler.mount(&host, InstanceId(id))?;
    }
    Ok((reconciler, host))
}

/// Runs the roster mutations locally but cannot reach any remote.
struct Offline(StoreParser);

impl Parser for Offline {
    fn read(&self, env: &ReadEnv<'_>, query: &Query) -> anyhow::Result<Value> {
        self.0.read(env, query)
    }

    fn transact(&self, env: &mut MutateEnv<'_>, tx: &Query) -> anyhow::Result<Map> {
        self.0.transact(env, tx)
    }

    fn remote(&self, _env: &ReadEnv<'_>, _tx: &Query, target: &Keyword) -> anyhow::Result<Option<Query>> {
        anyhow::bail!("{target} is unreachable")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// # Panics
    /// Panics if the first root render does not see the normalized roster.
    #[test]
    fn adding_the_root_normalizes_and_renders() -> anyhow::Result<()> {
        let (reconciler, host) = started(ReconcilerConfig::default())?;
        assert_eq!(host.root_renders.len(), 1);
        assert_eq!(host.root_renders[0], Value::Map(map(ROSTER)?));
        let ada = Ident::new("person/by-id", 1);
        assert_eq!(
            reconciler.state().entity(&ada).and_then(|props| props.get(&Value::keyword("name"))),
            Some(&Value::from("Ada"))
        );
        assert_eq!(reconciler.root_class(), Some(&ClassId::new("Root")));
        Ok(())
    }

    /// # Panics
    /// Panics if a change to one person refreshes anyone but that person.
    #[test]
    fn only_changed_consumers_rerender() -> anyhow::Result<()> {
        let (mut reconciler, mut host) = started(ReconcilerConfig::default())?;
        reconciler.transact(&mut host, TxOrigin::Instance(InstanceId(1)), &rename(1, "Ada L"))?;
        assert!(reconciler.pending().contains(&QueueKey::Instance(InstanceId(1))));
        assert!(reconciler
            .pending()
            .contains(&QueueKey::Ident(Ident::new("person/by-id", 1))));
        assert!(reconciler.pending().contains(&QueueKey::Prop(Keyword::new("name"))));

        let report = reconciler.reconcile(&mut host)?;
        assert!(!report.root_rendered);
        assert_eq!(report.updated, vec![InstanceId(1)]);
        assert_eq!(report.skipped, vec![InstanceId(2)]);
        assert!(report.failed.is_empty());
        assert_eq!(host.rerenders[0].1, Value::Map(map(r#"{:id 1 :name "Ada L"}"#)?));
        assert!(reconciler.pending().is_empty());
        Ok(())
    }

    /// # Panics
    /// Panics if a batch of transactions asks for more than one flush.
    #[test]
    fn one_flush_is_requested_per_batch() -> anyhow::Result<()> {
        let (mut reconciler, mut host) = started(ReconcilerConfig::default())?;
        reconciler.transact(&mut host, TxOrigin::Reconciler, &rename(1, "Ada L"))?;
        reconciler.transact(&mut host, TxOrigin::Reconciler, &rename(2, "Bob B"))?;
        reconciler.transact(&mut host, TxOrigin::Reconciler, &rename(1, "Ada K"))?;
        assert_eq!(host.count_flushes(FlushKind::Render), 1);
        assert_eq!(host.count_flushes(FlushKind::Send), 1);
        let batched: Query = [rename(1, "Ada L"), rename(2, "Bob B"), rename(1, "Ada K")]
            .iter()
            .flat_map(|tx| tx.exprs().iter().cloned())
            .collect();
        assert_eq!(reconciler.pending_sends().get(&Keyword::new("remote")), Some(&batched));

        let report = reconciler.reconcile(&mut host)?;
        assert_eq!(report.updated, vec![InstanceId(1), InstanceId(2)]);

        reconciler.transact(&mut host, TxOrigin::Reconciler, &rename(2, "Bob C"))?;
        assert_eq!(host.count_flushes(FlushKind::Render), 2);
        Ok(())
    }

    /// # Panics
    /// Panics if unmounting leaves the instance in any bucket.
    #[test]
    fn unmounted_consumers_leave_the_index() -> anyhow::Result<()> {
        let (mut reconciler, mut host) = started(ReconcilerConfig::default())?;
        let bob = Ident::new("person/by-id", 2);
        assert!(reconciler.indexer().is_indexed(InstanceId(2)));
        assert_eq!(reconciler.indexer().ident_of(InstanceId(2)), Some(&bob));

        reconciler.unmount(InstanceId(2));
        host.take_down(InstanceId(2));
        assert!(!reconciler.indexer().is_indexed(InstanceId(2)));
        assert!(reconciler.indexer().ident_instances(&bob).is_none());
        assert!(matches!(
            reconciler.indexer().resolve(&QueueKey::Ident(bob)),
            Err(ReconcileError::InvalidKey(_))
        ));
        let readers = reconciler.indexer().resolve(&QueueKey::Prop(Keyword::new("name")))?;
        assert_eq!(readers.into_iter().collect::<Vec<_>>(), vec![InstanceId(1)]);
        Ok(())
    }

    /// # Panics
    /// Panics if a queued consumer that is no longer mounted gets rendered.
    #[test]
    fn consumers_unmounted_before_the_flush_are_skipped() -> anyhow::Result<()> {
        let (mut reconciler, mut host) = started(ReconcilerConfig::default())?;
        reconciler.transact(&mut host, TxOrigin::Reconciler, &rename(2, "Bob B"))?;
        host.take_down(InstanceId(2));
        let report = reconciler.reconcile(&mut host)?;
        assert!(report.updated.is_empty());
        assert_eq!(report.skipped, vec![InstanceId(1), InstanceId(2)]);
        assert!(host.rerenders.is_empty());
        Ok(())
    }

    /// # Panics
    /// Panics if queueing the root, or nothing at all, does not render from the root.
    #[test]
    fn root_keys_render_from_the_root() -> anyhow::Result<()> {
        let (mut reconciler, mut host) = started(ReconcilerConfig::default())?;
        let report = reconciler.reconcile(&mut host)?;
        assert!(report.root_rendered);

        reconciler.queue(&mut host, [QueueKey::Instance(InstanceId(0))]);
        assert!(reconciler.reconcile(&mut host)?.root_rendered);

        reconciler.queue(&mut host, [QueueKey::Root, QueueKey::Instance(InstanceId(1))]);
        let report = reconciler.reconcile(&mut host)?;
        assert!(report.root_rendered);
        assert!(report.updated.is_empty());
        assert_eq!(host.root_renders.len(), 4);
        Ok(())
    }

    /// # Panics
    /// Panics if a patch from outside does not reach the person showing it.
    #[test]
    fn merged_patches_refresh_their_entity() -> anyhow::Result<()> {
        let (mut reconciler, mut host) = started(ReconcilerConfig::default())?;
        let bob = Ident::new("person/by-id", 2);
        let mut delta = Map::new();
        delta.insert(Value::Ident(bob.clone()), Value::Map(map(r#"{:name "Robert"}"#)?));
        reconciler.merge(&mut host, delta, None)?;
        assert_eq!(reconciler.pending(), [QueueKey::Ident(bob)]);

        let report = reconciler.reconcile(&mut host)?;
        assert_eq!(report.updated, vec![InstanceId(2)]);
        assert_eq!(
            host.rerenders[0].1.get("name"),
            Some(&Value::from("Robert"))
        );
        Ok(())
    }

    /// # Panics
    /// Panics if history does not hold the state from before each transaction.
    #[test]
    fn history_keeps_the_state_before_each_transaction() -> anyhow::Result<()> {
        let seen: Rc<RefCell<Vec<TxId>>> = Rc::default();
        let listener_seen = Rc::clone(&seen);
        let (reconciler, mut host) = started(ReconcilerConfig::default())?;
        let mut reconciler = reconciler.with_tx_listener(move |report| {
            listener_seen.borrow_mut().push(report.id);
        });
        let before = reconciler.basis_t();
        reconciler.transact(&mut host, TxOrigin::Reconciler, &rename(1, "Ada L"))?;
        assert!(reconciler.basis_t() > before);

        let ids = seen.borrow().clone();
        assert_eq!(ids.len(), 1);
        let ada = Ident::new("person/by-id", 1);
        let earlier = reconciler
            .state_before(ids[0])
            .and_then(|state| state.entity(&ada))
            .and_then(|props| props.get(&Value::keyword("name")));
        assert_eq!(earlier, Some(&Value::from("Ada")));
        assert_eq!(reconciler.history().len(), 1);
        Ok(())
    }

    /// # Panics
    /// Panics if history grows past its capacity.
    #[test]
    fn history_evicts_the_oldest_state() -> anyhow::Result<()> {
        let config = ReconcilerConfig {
            history_capacity: 1,
            ..ReconcilerConfig::default()
        };
        let seen: Rc<RefCell<Vec<TxId>>> = Rc::default();
        let listener_seen = Rc::clone(&seen);
        let (reconciler, mut host) = started(config)?;
        let mut reconciler = reconciler.with_tx_listener(move |report| {
            listener_seen.borrow_mut().push(report.id);
        });
        reconciler.transact(&mut host, TxOrigin::Reconciler, &rename(1, "Ada L"))?;
        reconciler.transact(&mut host, TxOrigin::Reconciler, &rename(1, "Ada K"))?;
        let ids = seen.borrow().clone();
        assert!(reconciler.state_before(ids[0]).is_none());
        assert!(reconciler.state_before(ids[1]).is_some());
        assert_eq!(reconciler.history().len(), 1);
        Ok(())
    }

    /// # Panics
    /// Panics if fragments are lost when there is nothing to send them with.
    #[test]
    fn sends_wait_for_a_transport() -> anyhow::Result<()> {
        let (mut reconciler, mut host) = started(ReconcilerConfig::default())?;
        assert_eq!(reconciler.send()?, 0);
        reconciler.transact(&mut host, TxOrigin::Reconciler, &rename(1, "Ada L"))?;
        assert!(matches!(reconciler.send(), Err(ReconcileError::NoTransport)));
        assert!(reconciler
            .pending_sends()
            .get(&Keyword::new("remote"))
            .is_some());
        Ok(())
    }

    /// # Panics
    /// Panics if a remote's tempid mapping does not move the new person
    /// everywhere it is referenced.
    #[test]
    fn remote_tempids_migrate_everywhere() -> anyhow::Result<()> {
        let config = ReconcilerConfig {
            id_key: Some(Keyword::new("id")),
            ..ReconcilerConfig::default()
        };
        let temp_id = TempId::new();
        let temp = Ident::new("person/by-id", temp_id);
        let permanent = Ident::new("person/by-id", 3);
        let mut tempids = Map::new();
        tempids.insert(Value::Ident(temp.clone()), Value::Ident(permanent.clone()));
        let mut answer = Map::new();
        answer.insert(Value::keyword("tempids"), Value::Map(tempids));
        let mut response = Map::new();
        response.insert(Value::from(Symbol::new("add-person!")), Value::Map(answer));

        let (reconciler, mut host) = started(config)?;
        let mut reconciler = reconciler.with_transport(
            move |fragments: BTreeMap<Keyword, Query>, sink: ResponseSink| {
                for (target, query) in fragments {
                    sink.respond(target, query, response.clone());
                }
            },
        );
        reconciler.transact(&mut host, TxOrigin::Reconciler, &add_person(Value::TempId(temp_id), "Cy"))?;
        assert!(reconciler.reconcile(&mut host)?.root_rendered);
        let mut cy = map(r#"{:name "Cy"}"#)?;
        cy.insert(Value::keyword("id"), Value::TempId(temp_id));
        host.place(3, "Person", Some(0), &["people".into(), 2.into()], cy);
        reconciler.mount(&host, InstanceId(3))?;
        assert_eq!(reconciler.indexer().ident_of(InstanceId(3)), Some(&temp));

        assert_eq!(reconciler.send()?, 1);
        assert_eq!(reconciler.process_responses(&mut host), 1);

        let migrated = reconciler.state().entity(&permanent);
        assert_eq!(migrated.and_then(|props| props.get(&Value::keyword("id"))), Some(&Value::Int(3)));
        assert!(reconciler.state().entity(&temp).is_none());
        let people = reconciler
            .state()
            .get(&Keyword::new("people"))
            .and_then(Value::as_seq)
            .unwrap_or_default();
        assert_eq!(people.last(), Some(&Value::Ident(permanent.clone())));
        assert_eq!(reconciler.indexer().ident_of(InstanceId(3)), Some(&permanent));
        assert!(reconciler.pending().contains(&QueueKey::Ident(permanent)));

        let report = reconciler.reconcile(&mut host)?;
        assert_eq!(report.updated, vec![InstanceId(3)]);
        Ok(())
    }

    /// # Panics
    /// Panics if a transaction whose remote split fails leaves any trace.
    #[test]
    fn failed_remote_splits_restore_the_state() -> anyhow::Result<()> {
        let mut host = roster_host()?;
        let mut reconciler = Reconciler::new(ReconcilerConfig::default(), roster_registry()?, Offline(roster_parser()))
            .with_initial_tree(map(ROSTER)?);
        reconciler.add_root(&mut host, &ClassId::new("Root"))?;
        let before = reconciler.basis_t();
        let flushes = host.flushes.len();

        let failed = reconciler.transact(&mut host, TxOrigin::Reconciler, &rename(1, "Ada L"));
        assert!(matches!(failed, Err(ReconcileError::Parser(_))));
        assert_eq!(reconciler.basis_t(), before);
        let ada = reconciler.state().entity(&Ident::new("person/by-id", 1));
        assert_eq!(ada.and_then(|ada| ada.get(&Value::keyword("name"))), Some(&Value::from("Ada")));
        assert!(reconciler.history().is_empty());
        assert!(reconciler.pending().is_empty());
        assert!(reconciler.pending_sends().is_empty());
        assert_eq!(host.flushes.len(), flushes);
        Ok(())
    }

    /// # Panics
    /// Panics if a queued property nobody reads fails the flush.
    #[test]
    fn unread_properties_are_skipped() -> anyhow::Result<()> {
        let (mut reconciler, mut host) = started(ReconcilerConfig::default())?;
        assert!(matches!(
            reconciler.indexer().resolve(&QueueKey::Prop(Keyword::new("motto"))),
            Err(ReconcileError::InvalidKey(_))
        ));
        reconciler.queue(&mut host, [QueueKey::Prop(Keyword::new("motto"))]);
        let report = reconciler.reconcile(&mut host)?;
        assert!(!report.root_rendered);
        assert!(report.updated.is_empty());
        assert!(report.failed.is_empty());
        Ok(())
    }
}
