//! The parser seam: reading queries against state and running transactions.
//!
//! The reconciler does not interpret queries itself. Reads, mutations and
//! the split of a transaction into remote fragments all go through a
//! [`Parser`]. [`StoreParser`] is the stock implementation over a
//! [`GraphStore`], with mutations registered as closures.

use anyhow::{Context as _, bail};
use log::{debug, trace};
use rustc_hash::FxHashMap;
use trellis_graph::{GraphStore, db_to_tree};
use trellis_query::{Expr, Key, Keyword, Map, Params, Query, Registry, Symbol, Value};

/// Name of the entry in a mutation result listing the keys it touched.
pub const KEYS_KEY: &str = "keys";

/// Name of the entry in a mutation result holding the action's return value.
pub const RESULT_KEY: &str = "result";

/// What a parser may look at while reading.
#[derive(Clone, Copy, Debug)]
pub struct ReadEnv<'env> {
    pub state: &'env GraphStore,
    /// Host-provided data shared by every consumer.
    pub shared: &'env Value,
    pub registry: &'env Registry,
}

/// What a parser may touch while transacting.
#[derive(Debug)]
pub struct MutateEnv<'env> {
    pub state: &'env mut GraphStore,
    pub shared: &'env Value,
    pub registry: &'env Registry,
}

impl MutateEnv<'_> {
    /// A read-only view of the same environment.
    pub fn reader(&self) -> ReadEnv<'_> {
        ReadEnv {
            state: &*self.state,
            shared: self.shared,
            registry: self.registry,
        }
    }
}

/// Interprets queries and transactions.
pub trait Parser {
    /// The value `query` selects from the current state.
    fn read(&self, env: &ReadEnv<'_>, query: &Query) -> anyhow::Result<Value>;

    /// Run every mutation of `tx` against the state, then read its other
    /// expressions. Returns a map keyed like `tx`.
    fn transact(&self, env: &mut MutateEnv<'_>, tx: &Query) -> anyhow::Result<Map>;

    /// The part of `tx` that must also go to `target`, if any.
    fn remote(&self, env: &ReadEnv<'_>, tx: &Query, target: &Keyword) -> anyhow::Result<Option<Query>>;
}

/// A mutation body: edits the store and returns a result.
pub type MutationFn = Box<dyn Fn(&mut GraphStore, &Params) -> anyhow::Result<Value> + Send + Sync>;

struct Mutation {
    action: MutationFn,
    keys: Vec<Key>,
    remotes: Vec<Keyword>,
}

/// [`Parser`] that reads by denormalizing the store and runs registered
/// mutation closures.
#[derive(Default)]
pub struct StoreParser {
    mutations: FxHashMap<Symbol, Mutation>,
    /// Property -> remotes that serve it.
    remote_reads: FxHashMap<Keyword, Vec<Keyword>>,
}

impl StoreParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register mutation `name`. `keys` are reported as affected so their
    /// consumers refresh.
    #[must_use]
    pub fn with_mutation(
        mut self,
        name: &str,
        keys: impl IntoIterator<Item = Key>,
        action: impl Fn(&mut GraphStore, &Params) -> anyhow::Result<Value> + Send + Sync + 'static,
    ) -> Self {
        self.mutations.insert(
            Symbol::new(name),
            Mutation {
                action: Box::new(action),
                keys: keys.into_iter().collect(),
                remotes: Vec::new(),
            },
        );
        self
    }

    /// Forward mutation `name` to `target` as well as running it locally.
    #[must_use]
    pub fn with_remote_mutation(mut self, name: &str, target: &str) -> Self {
        if let Some(mutation) = self.mutations.get_mut(&Symbol::new(name)) {
            mutation.remotes.push(Keyword::new(target));
        }
        self
    }

    /// Reads of `prop` also go to `target`.
    #[must_use]
    pub fn with_remote_read(mut self, prop: &str, target: &str) -> Self {
        self.remote_reads
            .entry(Keyword::new(prop))
            .or_default()
            .push(Keyword::new(target));
        self
    }

    fn goes_remote(&self, expr: &Expr, target: &Keyword) -> bool {
        match expr.key() {
            Key::Mutation(symbol) => self
                .mutations
                .get(symbol)
                .is_some_and(|mutation| mutation.remotes.contains(target)),
            key => key
                .dispatch_key()
                .and_then(|prop| self.remote_reads.get(prop))
                .is_some_and(|targets| targets.contains(target)),
        }
    }
}

fn mutation_result(value: Value, keys: &[Key]) -> Value {
    let mut result = Map::new();
    result.insert(Value::keyword(RESULT_KEY), value);
    if !keys.is_empty() {
        result.insert(
            Value::keyword(KEYS_KEY),
            Value::Seq(keys.iter().map(Key::to_value).collect()),
        );
    }
    Value::Map(result)
}

impl Parser for StoreParser {
    fn read(&self, env: &ReadEnv<'_>, query: &Query) -> anyhow::Result<Value> {
        Ok(Value::Map(db_to_tree(query, env.state)))
    }

    fn transact(&self, env: &mut MutateEnv<'_>, tx: &Query) -> anyhow::Result<Map> {
        let mut result = Map::new();
        let mut reads = Vec::new();
        for expr in tx.exprs() {
            match expr.key() {
                Key::Mutation(symbol) => {
                    let Some(mutation) = self.mutations.get(symbol) else {
                        bail!("no mutation registered for {symbol}");
                    };
                    let params = expr.params().cloned().unwrap_or_default();
                    debug!("running {symbol} with {} params", params.len());
                    let value = (mutation.action)(env.state, &params)
                        .with_context(|| format!("mutation {symbol} failed"))?;
                    result.insert(Value::Symbol(symbol.clone()), mutation_result(value, &mutation.keys));
                }
                _ => reads.push(expr.clone()),
            }
        }
        if !reads.is_empty() {
            let follow_on = Query::new(reads);
            trace!("reading follow-on keys {follow_on}");
            if let Value::Map(read) = self.read(&env.reader(), &follow_on)? {
                result.extend(read);
            }
        }
        Ok(result)
    }

    fn remote(&self, _env: &ReadEnv<'_>, tx: &Query, target: &Keyword) -> anyhow::Result<Option<Query>> {
        let fragment: Query = tx
            .exprs()
            .iter()
            .filter(|expr| self.goes_remote(expr, target))
            .cloned()
            .collect();
        Ok((!fragment.is_empty()).then_some(fragment))
    }
}

/// Keys a transaction result says were touched: its non-mutation keys and
/// the `:keys` every mutation reported.
pub fn affected_keys(result: &Map) -> Vec<Key> {
    let mut keys = Vec::new();
    for (entry, value) in result {
        match Key::from_value(entry) {
            Some(Key::Mutation(_)) => {
                let reported = value.get(KEYS_KEY).and_then(Value::as_seq).unwrap_or_default();
                keys.extend(reported.iter().filter_map(Key::from_value));
            }
            Some(key) => keys.push(key),
            None => {}
        }
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_query::{parse_query, parse_value};

    fn counter_store() -> GraphStore {
        let mut store = GraphStore::new();
        store.set(Keyword::new("count"), Value::Int(0));
        store
    }

    fn counter_parser() -> StoreParser {
        StoreParser::new()
            .with_mutation("increment!", [Key::prop("count")], |state, params| {
                let by = params.get(&Keyword::new("by")).and_then(Value::as_int).unwrap_or(1);
                let count = state.get(&Keyword::new("count")).and_then(Value::as_int).unwrap_or(0);
                state.set(Keyword::new("count"), Value::Int(count + by));
                Ok(Value::Int(count + by))
            })
            .with_remote_mutation("increment!", "remote")
            .with_remote_read("stats", "remote")
    }

    #[test]
    fn transact_runs_mutations_then_reads() -> anyhow::Result<()> {
        let parser = counter_parser();
        let mut state = counter_store();
        let registry = Registry::new();
        let mut env = MutateEnv {
            state: &mut state,
            shared: &Value::Nil,
            registry: &registry,
        };
        let result = parser.transact(&mut env, &parse_query("[(increment! {:by 2}) :count]")?)?;
        assert_eq!(result.get(&Value::keyword("count")), Some(&Value::Int(2)));
        assert_eq!(
            affected_keys(&result),
            vec![Key::prop("count"), Key::prop("count")]
        );
        Ok(())
    }

    #[test]
    fn unknown_mutations_fail() -> anyhow::Result<()> {
        let parser = StoreParser::new();
        let mut state = counter_store();
        let registry = Registry::new();
        let mut env = MutateEnv {
            state: &mut state,
            shared: &Value::Nil,
            registry: &registry,
        };
        assert!(parser.transact(&mut env, &parse_query("[(missing! {})]")?).is_err());
        Ok(())
    }

    #[test]
    fn remote_fragments_keep_only_remote_entries() -> anyhow::Result<()> {
        let parser = counter_parser();
        let state = counter_store();
        let registry = Registry::new();
        let env = ReadEnv {
            state: &state,
            shared: &Value::Nil,
            registry: &registry,
        };
        let tx = parse_query("[(increment! {}) :count :stats]")?;
        assert_eq!(
            parser.remote(&env, &tx, &Keyword::new("remote"))?,
            Some(parse_query("[(increment! {}) :stats]")?)
        );
        assert_eq!(parser.remote(&env, &tx, &Keyword::new("search"))?, None);
        assert_eq!(
            parser.read(&env, &parse_query("[:count]")?)?,
            parse_value("{:count 0}")?
        );
        Ok(())
    }
}
