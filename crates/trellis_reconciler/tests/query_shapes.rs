//! Consumers below unions and inside recursive joins.

mod support;

use support::{TestHost, by_id, class_query, init_logging, map};
use trellis_query::{
    ClassId, ComponentClass, Expr, Ident, Keyword, Map, Query, Registry, Union, Value, parse_query,
};
use trellis_reconciler::{InstanceId, ReconcileError, Reconciler, ReconcilerConfig, StoreParser};

fn by_type(props: &Map) -> Option<Ident> {
    let table = props.get(&Value::keyword("type"))?.as_keyword()?.clone();
    let id = props.get(&Value::keyword("id"))?.clone();
    Some(Ident::new(table, id))
}

/// Root `[{:items Item}]` where Item is a union of Photo and Video.
fn feed_registry() -> anyhow::Result<Registry> {
    init_logging();
    let mut registry = Registry::new();
    registry.register(ComponentClass::new("Photo").with_query(parse_query("[:id :type :url]")?));
    registry.register(ComponentClass::new("Video").with_query(parse_query("[:id :type :stream]")?));
    let branch = |class: &str| -> anyhow::Result<Query> {
        class_query(&registry, class)?
            .as_query()
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("{class} query is not a sequence"))
    };
    let union = Union::new([
        (Keyword::new("photo"), branch("Photo")?),
        (Keyword::new("video"), branch("Video")?),
    ]);
    let item = registry.register(ComponentClass::new("Item").with_query(union).with_ident(by_type));
    registry.register(
        ComponentClass::new("Feed").with_query(Query::new(vec![Expr::join("items", item.get_query()?)])),
    );
    Ok(registry)
}

const FEED: &str = r#"{:items [{:id 1 :type :photo :url "a.png"} {:id 2 :type :video :stream "b.m3u8"}]}"#;

/// Feed root (0), one Item per entry (10, 11) and the branch component
/// each Item renders (20, 21).
fn feed_host() -> anyhow::Result<TestHost> {
    let photo = map(r#"{:id 1 :type :photo :url "a.png"}"#)?;
    let video = map(r#"{:id 2 :type :video :stream "b.m3u8"}"#)?;
    let mut host = TestHost::default();
    host.place(0, "Feed", None, &[], Map::new());
    host.place(10, "Item", Some(0), &["items".into(), 0.into()], photo.clone());
    host.place(11, "Item", Some(0), &["items".into(), 1.into()], video.clone());
    host.place(20, "Photo", Some(10), &["items".into(), 0.into()], photo);
    host.place(21, "Video", Some(11), &["items".into(), 1.into()], video);
    Ok(host)
}

/// Root `[{:tree Node}]` where Node joins its own query under `:children`.
fn tree_registry() -> anyhow::Result<Registry> {
    init_logging();
    let mut registry = Registry::new();
    let node = registry.register(
        ComponentClass::new("Node")
            .with_query(parse_query("[:id :name {:children ...}]")?)
            .with_ident(by_id("node/by-id")),
    );
    registry.register(
        ComponentClass::new("Tree").with_query(Query::new(vec![Expr::join("tree", node.get_query()?)])),
    );
    Ok(registry)
}

const TREE: &str = r#"{:tree {:id 1 :name "a" :children [{:id 2 :name "b" :children [{:id 3 :name "c"}]}]}}"#;

#[cfg(test)]
mod tests {
    use super::*;

    /// # Panics
    /// Panics if union consumers read anything but their own item.
    #[test]
    fn union_consumers_read_their_own_item() -> anyhow::Result<()> {
        let mut host = feed_host()?;
        let mut reconciler = Reconciler::new(ReconcilerConfig::default(), feed_registry()?, StoreParser::new())
            .with_initial_tree(map(FEED)?);
        reconciler.add_root(&mut host, &ClassId::new("Feed"))?;
        for id in [0, 10, 11, 20, 21] {
            reconciler.mount(&host, InstanceId(id))?;
        }
        assert_eq!(
            reconciler.indexer().ident_of(InstanceId(11)),
            Some(&Ident::new("video", 2))
        );
        assert!(reconciler.state().entity(&Ident::new("photo", 1)).is_some());

        let photo = reconciler.props_for(&host, InstanceId(20))?;
        assert_eq!(photo.get("url"), Some(&Value::from("a.png")));
        let video = reconciler.props_for(&host, InstanceId(21))?;
        assert_eq!(video.get("stream"), Some(&Value::from("b.m3u8")));
        let item = reconciler.props_for(&host, InstanceId(10))?;
        assert_eq!(item, Value::Map(map(r#"{:id 1 :type :photo :url "a.png"}"#)?));
        Ok(())
    }

    /// # Panics
    /// Panics if a change to one union entry refreshes the other.
    #[test]
    fn union_entries_refresh_alone() -> anyhow::Result<()> {
        let mut host = feed_host()?;
        let mut reconciler = Reconciler::new(ReconcilerConfig::default(), feed_registry()?, StoreParser::new())
            .with_initial_tree(map(FEED)?);
        reconciler.add_root(&mut host, &ClassId::new("Feed"))?;
        for id in [0, 10, 11, 20, 21] {
            reconciler.mount(&host, InstanceId(id))?;
        }
        let mut delta = Map::new();
        delta.insert(
            Value::Ident(Ident::new("photo", 1)),
            Value::Map(map(r#"{:url "c.png"}"#)?),
        );
        reconciler.merge(&mut host, delta, None)?;
        let report = reconciler.reconcile(&mut host)?;
        assert_eq!(report.updated, vec![InstanceId(10)]);
        assert!(report.failed.is_empty());
        Ok(())
    }

    /// # Panics
    /// Panics if nested consumers of a recursive join cannot find their query.
    #[test]
    fn recursive_consumers_fall_back_to_the_outer_template() -> anyhow::Result<()> {
        let mut host = TestHost::default();
        host.place(0, "Tree", None, &[], Map::new());
        host.place(1, "Node", Some(0), &["tree".into()], map(r#"{:id 1 :name "a"}"#)?);
        host.place(
            2,
            "Node",
            Some(1),
            &["tree".into(), "children".into(), 0.into()],
            map(r#"{:id 2 :name "b"}"#)?,
        );
        host.place(
            3,
            "Node",
            Some(2),
            &["tree".into(), "children".into(), 0.into(), "children".into(), 0.into()],
            map(r#"{:id 3 :name "c"}"#)?,
        );
        let mut reconciler = Reconciler::new(ReconcilerConfig::default(), tree_registry()?, StoreParser::new())
            .with_initial_tree(map(TREE)?);
        reconciler.add_root(&mut host, &ClassId::new("Tree"))?;
        for id in 0..4 {
            reconciler.mount(&host, InstanceId(id))?;
        }

        let top = reconciler.props_for(&host, InstanceId(1))?;
        assert_eq!(top.get("name"), Some(&Value::from("a")));
        let middle = reconciler.props_for(&host, InstanceId(2))?;
        assert_eq!(middle.get("name"), Some(&Value::from("b")));
        let leaf = reconciler.props_for(&host, InstanceId(3))?;
        assert_eq!(leaf.get("name"), Some(&Value::from("c")));
        assert_eq!(leaf.get("id"), Some(&Value::Int(3)));
        Ok(())
    }

    /// # Panics
    /// Panics if a union is accepted as the root query.
    #[test]
    fn union_roots_are_rejected() -> anyhow::Result<()> {
        let mut host = feed_host()?;
        let mut reconciler = Reconciler::new(ReconcilerConfig::default(), feed_registry()?, StoreParser::new());
        let added = reconciler.add_root(&mut host, &ClassId::new("Item"));
        assert!(matches!(added, Err(ReconcileError::RootNotSequence(_))));
        assert!(host.root_renders.is_empty());
        assert!(matches!(reconciler.reconcile(&mut host), Err(ReconcileError::NoRoot)));
        Ok(())
    }
}
