//! A scripted host and the fixtures the reconciler tests share.

#![allow(dead_code, reason = "each test file uses a different part of the fixtures")]

use anyhow::Context as _;
use core::time::Duration;
use std::collections::BTreeMap;
use trellis_graph::GraphStore;
use trellis_query::{
    ClassId, ComponentClass, Expr, Ident, Key, Keyword, Map, Params, Query, Registry, Subquery,
    Value, parse_query, parse_value,
};
use trellis_reconciler::{DataPath, FlushKind, Host, InstanceId, PathSegment, StoreParser};

pub struct Mounted {
    pub class: ClassId,
    pub parent: Option<InstanceId>,
    pub depth: usize,
    pub path: DataPath,
    pub props: Map,
    pub rendered: Option<Value>,
    pub mounted: bool,
}

/// Records everything the reconciler asks of it.
#[derive(Default)]
pub struct TestHost {
    pub instances: BTreeMap<InstanceId, Mounted>,
    pub root: Option<InstanceId>,
    pub root_renders: Vec<Value>,
    pub rerenders: Vec<(InstanceId, Value)>,
    pub flushes: Vec<FlushKind>,
}

impl TestHost {
    /// Mount `class` at `path` below `parent`, as rendered with `props`.
    pub fn place(
        &mut self,
        id: u64,
        class: &str,
        parent: Option<u64>,
        path: &[PathSegment],
        props: Map,
    ) -> InstanceId {
        let instance = InstanceId(id);
        let parent = parent.map(InstanceId);
        let depth = parent
            .and_then(|parent| self.instances.get(&parent))
            .map_or(0, |parent| parent.depth + 1);
        if parent.is_none() {
            self.root = Some(instance);
        }
        self.instances.insert(
            instance,
            Mounted {
                class: ClassId::new(class),
                parent,
                depth,
                path: path.iter().cloned().collect(),
                rendered: Some(Value::Map(props.clone())),
                props,
                mounted: true,
            },
        );
        instance
    }

    pub fn take_down(&mut self, instance: InstanceId) {
        if let Some(mounted) = self.instances.get_mut(&instance) {
            mounted.mounted = false;
        }
    }

    pub fn count_flushes(&self, kind: FlushKind) -> usize {
        self.flushes.iter().filter(|flush| **flush == kind).count()
    }
}

impl Host for TestHost {
    fn root(&self) -> Option<InstanceId> {
        self.root
    }

    fn class_of(&self, instance: InstanceId) -> Option<ClassId> {
        self.instances.get(&instance).map(|mounted| mounted.class.clone())
    }

    fn parent(&self, instance: InstanceId) -> Option<InstanceId> {
        self.instances.get(&instance)?.parent
    }

    fn depth(&self, instance: InstanceId) -> usize {
        self.instances.get(&instance).map_or(0, |mounted| mounted.depth)
    }

    fn is_mounted(&self, instance: InstanceId) -> bool {
        self.instances.get(&instance).is_some_and(|mounted| mounted.mounted)
    }

    fn props(&self, instance: InstanceId) -> Option<Map> {
        self.instances.get(&instance).map(|mounted| mounted.props.clone())
    }

    fn path(&self, instance: InstanceId) -> DataPath {
        self.instances
            .get(&instance)
            .map(|mounted| mounted.path.clone())
            .unwrap_or_default()
    }

    fn rendered_value(&self, instance: InstanceId) -> Option<Value> {
        self.instances.get(&instance)?.rendered.clone()
    }

    fn force_rerender(&mut self, instance: InstanceId, next: Value) {
        if let Some(mounted) = self.instances.get_mut(&instance) {
            if let Value::Map(props) = &next {
                mounted.props = props.clone();
            }
            mounted.rendered = Some(next.clone());
        }
        self.rerenders.push((instance, next));
    }

    fn render_root(&mut self, data: Value) {
        self.root_renders.push(data);
    }

    fn request_flush(&mut self, kind: FlushKind, _delay: Duration) {
        self.flushes.push(kind);
    }
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn map(text: &str) -> anyhow::Result<Map> {
    parse_value(text)?
        .as_map()
        .cloned()
        .with_context(|| format!("{text} is not a map"))
}

pub fn by_id(table: &'static str) -> impl Fn(&Map) -> Option<Ident> + Send + Sync + 'static {
    move |props| {
        props
            .get(&Value::keyword("id"))
            .map(|id| Ident::new(table, id.clone()))
    }
}

pub fn param(params: &Params, name: &str) -> anyhow::Result<Value> {
    params
        .get(&Keyword::new(name))
        .cloned()
        .with_context(|| format!("missing parameter :{name}"))
}

/// Root `[:title {:people Person}]` over Person `[:id :name]`.
pub fn roster_registry() -> anyhow::Result<Registry> {
    let mut registry = Registry::new();
    let person = registry.register(
        ComponentClass::new("Person")
            .with_query(parse_query("[:id :name]")?)
            .with_ident(by_id("person/by-id")),
    );
    registry.register(ComponentClass::new("Root").with_query(Query::new(vec![
        Expr::prop("title"),
        Expr::join("people", person.get_query()?),
    ])));
    Ok(registry)
}

pub const ROSTER: &str = r#"{:title "Roster" :people [{:id 1 :name "Ada"} {:id 2 :name "Bob"}]}"#;

fn rename(state: &mut GraphStore, params: &Params) -> anyhow::Result<Value> {
    let id = param(params, "id")?;
    let mut props = Map::new();
    props.insert(Value::keyword("name"), param(params, "name")?);
    state.merge_entity(&Ident::new("person/by-id", id), props);
    Ok(Value::Nil)
}

fn add_person(state: &mut GraphStore, params: &Params) -> anyhow::Result<Value> {
    let id = param(params, "id")?;
    let ident = Ident::new("person/by-id", id.clone());
    let mut props = Map::new();
    props.insert(Value::keyword("id"), id);
    props.insert(Value::keyword("name"), param(params, "name")?);
    state.merge_entity(&ident, props);
    state.update(|root| {
        if let Some(Value::Seq(people)) = root.get_mut(&Value::keyword("people")) {
            people.push(Value::Ident(ident));
        }
    });
    Ok(Value::Nil)
}

/// `rename!` reports `:name` as touched and `add-person!` reports
/// `:people`; both also go to the remote.
pub fn roster_parser() -> StoreParser {
    StoreParser::new()
        .with_mutation("rename!", [Key::prop("name")], rename)
        .with_mutation("add-person!", [Key::prop("people")], add_person)
        .with_remote_mutation("rename!", "remote")
        .with_remote_mutation("add-person!", "remote")
}

/// Host with the roster root (0) and one consumer per person (1, 2).
pub fn roster_host() -> anyhow::Result<TestHost> {
    init_logging();
    let mut host = TestHost::default();
    host.place(0, "Root", None, &[], Map::new());
    host.place(1, "Person", Some(0), &["people".into(), 0.into()], map(r#"{:id 1 :name "Ada"}"#)?);
    host.place(2, "Person", Some(0), &["people".into(), 1.into()], map(r#"{:id 2 :name "Bob"}"#)?);
    Ok(host)
}

pub fn class_query(registry: &Registry, class: &str) -> anyhow::Result<Subquery> {
    Ok(registry.require(&ClassId::new(class))?.get_query()?)
}
