use std::time::Duration;

use tokio::sync::broadcast;

use livestate::{
    diff::Change,
    observable::root::StateRoot,
    runtime::events::{EventBroadcaster, StateEvent},
    value::Value,
};

#[tokio::test]
async fn changes_are_broadcast_in_revision_order() {
    let root = StateRoot::declare(Value::mapping([("n", 0)])).expect("declare");
    let events = EventBroadcaster::attach(&root, 16);
    let mut sub = events.subscribe();

    let node = root.node();
    node.set("n", 1).expect("set");
    node.set("n", 1).expect("no-op");
    node.set("label", "x").expect("set");

    let mut seen = Vec::new();
    for _ in 0..2 {
        let evt = tokio::time::timeout(Duration::from_secs(1), sub.recv())
            .await
            .expect("event")
            .expect("recv");
        seen.push(evt);
    }

    assert_eq!(seen.iter().map(StateEvent::revision).collect::<Vec<_>>(), vec![1, 2]);
    match &seen[1] {
        StateEvent::Changed { diff, .. } => {
            assert!(matches!(diff.changes(), [Change::Added { value, .. }] if *value == Value::from("x")));
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert!(sub.try_recv().is_err());
}

#[tokio::test]
async fn snapshots_follow_changes_when_requested() {
    let root = StateRoot::declare(Value::mapping([("n", 0)])).expect("declare");
    let (events_tx, mut sub) = broadcast::channel(8);
    root.subscribe(EventBroadcaster::new(events_tx).with_snapshots());

    root.node().set("n", 5).expect("set");

    let first = sub.recv().await.expect("changed");
    assert!(matches!(first, StateEvent::Changed { revision: 1, .. }));
    match sub.recv().await.expect("snapshot") {
        StateEvent::Snapshot { revision, value } => {
            assert_eq!(revision, 1);
            assert_eq!(*value, Value::mapping([("n", 5)]));
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn writes_succeed_without_receivers() {
    let root = StateRoot::declare(Value::mapping([("n", 0)])).expect("declare");
    drop(EventBroadcaster::attach(&root, 4));

    root.node().set("n", 1).expect("set with nobody listening");
    assert_eq!(root.revision(), 1);
}
