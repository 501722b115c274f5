use std::sync::{Arc, Mutex};

use livestate::{
    diff::{Change, Diff},
    observable::{
        StateError,
        node::Entry,
        root::StateRoot,
        sink::{Notification, NotifyError, Observer, observer_fn},
        wrap,
    },
    types::{Revision, StatePath},
    value::{Record, Value, ValueKind},
};

#[derive(Clone, Default)]
struct Recorder {
    seen: Arc<Mutex<Vec<(Revision, Value, Diff)>>>,
}

impl Observer for Recorder {
    fn name(&self) -> &str {
        "recorder"
    }

    fn notify(&mut self, notification: &Notification<'_>) -> Result<(), NotifyError> {
        self.seen.lock().expect("lock").push((
            notification.revision,
            notification.new.clone(),
            notification.diff.clone(),
        ));
        Ok(())
    }
}

impl Recorder {
    fn count(&self) -> usize {
        self.seen.lock().expect("lock").len()
    }

    fn last_diff(&self) -> Diff {
        self.seen.lock().expect("lock").last().expect("notification").2.clone()
    }

    fn revisions(&self) -> Vec<Revision> {
        self.seen.lock().expect("lock").iter().map(|(r, _, _)| *r).collect()
    }
}

fn user(name: &str) -> Value {
    Value::mapping([("name", name)])
}

fn observed(initial: Value) -> (StateRoot, Recorder) {
    let root = StateRoot::declare(initial).expect("declare");
    let recorder = Recorder::default();
    root.subscribe(recorder.clone());
    (root, recorder)
}

fn abc() -> Value {
    Value::mapping([("a", Value::from(1)), ("b", Value::mapping([("c", 3)]))])
}

#[test]
fn appending_a_user_reports_one_added_entry() {
    let (root, recorder) = observed(Value::mapping([(
        "users",
        Value::sequence([user("Alice"), user("Bob")]),
    )]));

    let users = root.node().child("users").expect("users");
    users.push(user("Eve")).expect("push");

    assert_eq!(
        root.snapshot(),
        Value::mapping([(
            "users",
            Value::sequence([user("Alice"), user("Bob"), user("Eve")]),
        )])
    );
    assert_eq!(recorder.count(), 1);
    let diff = recorder.last_diff();
    assert_eq!(
        diff.changes(),
        &[Change::Added {
            path: StatePath::root().key("users").index(2),
            value: user("Eve"),
        }]
    );
    assert_eq!(diff.changes()[0].path().to_string(), "users[2]");
}

#[test]
fn writing_the_current_value_is_silent() {
    let (root, recorder) = observed(abc());

    let b = root.node().child("b").expect("b");
    b.set("c", 3).expect("set");
    root.node().set("b", Value::mapping([("c", 3)])).expect("set subtree");

    assert_eq!(recorder.count(), 0);
    assert_eq!(root.revision(), 0);
    assert!(b.snapshot().is_ok(), "no-op write must not detach handles");
}

#[test]
fn changing_a_leaf_reports_one_changed_entry() {
    let (root, recorder) = observed(abc());

    root.node().child("b").expect("b").set("c", 5).expect("set");

    assert_eq!(recorder.count(), 1);
    assert_eq!(
        recorder.last_diff().changes(),
        &[Change::Changed {
            path: "b.c".parse().expect("path"),
            old: Value::from(3),
            new: Value::from(5),
        }]
    );
    assert_eq!(
        root.snapshot(),
        Value::mapping([("a", Value::from(1)), ("b", Value::mapping([("c", 5)]))])
    );
}

#[test]
fn undeclared_record_field_is_rejected_without_notifying() {
    let point = Record::new("Point", [("x", 0), ("y", 0)]);
    let (root, recorder) = observed(Value::Record(point.clone()));
    let node = root.node();

    let err = node.set("z", 1).expect_err("undeclared field");
    assert!(matches!(
        err,
        StateError::NoSuchField { ref record, ref field } if record == "Point" && field == "z"
    ));
    assert!(matches!(node.get("z"), Err(StateError::NoSuchField { .. })));
    assert!(matches!(node.remove("x"), Err(StateError::FixedFields { .. })));
    assert_eq!(recorder.count(), 0);
    assert_eq!(root.snapshot(), Value::Record(point));

    node.set("x", 4).expect("declared field");
    assert_eq!(recorder.count(), 1);
}

#[test]
fn absent_mapping_key_reads_as_missing() {
    let (root, _) = observed(abc());
    let entry = root.node().get("nope").expect("get");
    assert!(entry.is_missing());
    assert_eq!(entry.to_value().expect("value"), None);
    assert!(matches!(
        root.node().get("a").expect("get"),
        Entry::Scalar(ref s) if Value::from(s.clone()) == Value::from(1)
    ));
}

#[test]
fn nested_containers_come_back_wrapped() {
    let (root, recorder) = observed(abc());

    let b = root.node().get("b").expect("get").into_node().expect("wrapped");
    b.set("d", "new").expect("set through child");

    assert_eq!(recorder.count(), 1);
    assert_eq!(
        root.snapshot().at(&"b.d".parse().expect("path")),
        Some(&Value::from("new"))
    );
}

#[test]
fn wrapping_is_idempotent() {
    let (root, recorder) = observed(abc());
    let b = root.node().child("b").expect("b");

    let again = wrap(&b).expect("wrap").into_node().expect("node");
    assert!(again.same_node(&b));

    root.node().set("b", &b).expect("assign same node");
    assert_eq!(recorder.count(), 0);
    assert!(root.node().child("b").expect("b").same_node(&b));

    let value = abc();
    let fresh = wrap(value.clone()).expect("wrap").into_node().expect("node");
    assert_eq!(fresh.snapshot().expect("snapshot"), value);
}

#[test]
fn assigning_another_node_copies_it() {
    let (root, recorder) = observed(abc());
    let b = root.node().child("b").expect("b");

    root.node().set("copy", &b).expect("copy");
    b.set("c", 9).expect("set original");

    assert_eq!(recorder.count(), 2);
    let copy = root.node().child("copy").expect("copy");
    assert!(!copy.same_node(&b));
    assert_eq!(copy.snapshot().expect("snapshot"), Value::mapping([("c", 3)]));

    let other = StateRoot::declare(Value::mapping([("k", "v")])).expect("other");
    root.node().set("foreign", other.node()).expect("foreign");
    assert_eq!(
        root.node().child("foreign").expect("foreign").snapshot().expect("snapshot"),
        Value::mapping([("k", "v")])
    );
}

#[test]
fn every_distinct_write_notifies_exactly_once() {
    let (root, recorder) = observed(Value::mapping([("n", 0)]));
    let node = root.node();

    for i in 1..=25 {
        node.set("n", i).expect("set");
    }

    assert_eq!(recorder.count(), 25);
    assert_eq!(root.revision(), 25);
    assert_eq!(recorder.revisions(), (1..=25).collect::<Vec<_>>());
}

#[test]
fn update_batches_nested_edits_into_one_notification() {
    let (root, recorder) = observed(abc());
    let b = root.node().child("b").expect("b");

    root.node()
        .update(|value| {
            *value.at_mut(&"a".parse().expect("path")).expect("a") = Value::from(2);
            *value.at_mut(&"b.c".parse().expect("path")).expect("c") = Value::from(4);
        })
        .expect("update");

    assert_eq!(recorder.count(), 1);
    assert_eq!(recorder.last_diff().len(), 2);
    assert_eq!(b.snapshot().expect("b survives"), Value::mapping([("c", 4)]));
}

#[test]
fn replaced_subtree_detaches_old_handles() {
    let (root, _) = observed(Value::mapping([("b", Value::mapping([("inner", Value::mapping([("c", 1)]))]))]));
    let inner = root.node().child("b").expect("b").child("inner").expect("inner");

    root.node().set("b", Value::sequence([1, 2])).expect("set");

    assert!(matches!(inner.snapshot(), Err(StateError::Detached(_))));
    assert!(matches!(inner.set("c", 2), Err(StateError::Detached(_))));
}

#[test]
fn sequence_edits_run_through_the_pipeline() {
    let (root, recorder) = observed(Value::mapping([("xs", Value::sequence([1, 2, 3]))]));
    let xs = root.node().child("xs").expect("xs");

    xs.insert(0, 0).expect("insert");
    assert_eq!(xs.remove(3usize).expect("remove"), Some(Value::from(3)));
    xs.retain(|v| v.as_i64() != Some(1)).expect("retain");
    xs.set(0usize, 10).expect("set index");

    assert_eq!(recorder.count(), 4);
    assert_eq!(xs.snapshot().expect("snapshot"), Value::sequence([10, 2]));
    assert!(matches!(xs.set(5usize, 1), Err(StateError::IndexOutOfBounds { index: 5, len: 2 })));
    assert!(matches!(xs.insert(3, 1), Err(StateError::IndexOutOfBounds { .. })));
    assert!(matches!(xs.set("k", 1), Err(StateError::KeyKind { .. })));
    assert!(matches!(
        root.node().push(1),
        Err(StateError::WrongKind { expected: ValueKind::Sequence, found: ValueKind::Mapping })
    ));
    assert_eq!(recorder.count(), 4);
}

#[test]
fn removing_an_absent_key_is_silent() {
    let (root, recorder) = observed(abc());
    assert_eq!(root.node().remove("missing").expect("remove"), None);
    assert_eq!(root.node().remove("a").expect("remove"), Some(Value::from(1)));
    assert_eq!(recorder.count(), 1);
}

#[test]
fn unrepresentable_values_are_rejected_before_writing() {
    let (root, recorder) = observed(abc());

    let err = root.node().set("a", f64::INFINITY).expect_err("non-finite");
    assert!(matches!(err, StateError::UnsupportedValueKind(_)));
    assert_eq!(recorder.count(), 0);
    assert_eq!(root.snapshot(), abc());

    assert!(matches!(
        StateRoot::declare(Value::from(1)),
        Err(StateError::NotContainer(ValueKind::Scalar))
    ));
}

#[test]
fn failing_observer_does_not_stop_the_others() {
    let root = StateRoot::declare(abc()).expect("declare");
    root.subscribe(observer_fn("audit", |_n: &Notification<'_>| {
        Err(NotifyError::Rejected("audit offline".to_string()))
    }));
    let recorder = Recorder::default();
    root.subscribe(recorder.clone());

    let err = root.node().set("a", 2).expect_err("observer failure");
    match err {
        StateError::ObserversFailed(failures) => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].observer, "audit");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(recorder.count(), 1);
    assert_eq!(root.snapshot().at(&"a".parse().expect("path")), Some(&Value::from(2)));
    assert_eq!(root.observer_count(), 2);
}

#[test]
fn replace_keeps_surviving_nested_handles() {
    let (root, recorder) = observed(abc());
    let b = root.node().child("b").expect("b");

    root.node()
        .replace(Value::mapping([("b", Value::mapping([("c", 7)])), ("z", Value::from(true))]))
        .expect("replace");

    assert_eq!(recorder.count(), 1);
    assert_eq!(b.snapshot().expect("b survives"), Value::mapping([("c", 7)]));
    assert_eq!(
        root.snapshot(),
        Value::mapping([("b", Value::mapping([("c", 7)])), ("z", Value::from(true))])
    );
}

#[test]
fn concurrent_writers_are_serialized_per_state() {
    let root = StateRoot::declare(Value::mapping([("n", 0)])).expect("declare");
    let pairs: Arc<Mutex<Vec<(Revision, Value, Value)>>> = Arc::default();
    let sink = Arc::clone(&pairs);
    root.subscribe(observer_fn("pairs", move |n: &Notification<'_>| {
        sink.lock()
            .expect("lock")
            .push((n.revision, n.old.clone(), n.new.clone()));
        Ok(())
    }));

    let writers: Vec<_> = (0..8i64)
        .map(|t| {
            let node = root.node();
            std::thread::spawn(move || {
                for i in 0..100i64 {
                    node.set("n", t * 1_000 + i + 1).expect("set");
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().expect("writer");
    }

    let pairs = pairs.lock().expect("lock");
    assert_eq!(pairs.len(), 800);
    assert_eq!(root.revision(), 800);
    assert_eq!(pairs[0].1, Value::mapping([("n", 0)]));
    for (expected, window) in (2..).zip(pairs.windows(2)) {
        assert_eq!(window[1].0, expected);
        assert_eq!(window[1].1, window[0].2, "old must equal the previous new");
    }
    assert_eq!(pairs.last().map(|p| p.2.clone()), Some(root.snapshot()));
}

#[test]
fn panicking_observer_is_contained() {
    let root = StateRoot::declare(abc()).expect("declare");
    root.subscribe(observer_fn("fragile", |_n: &Notification<'_>| -> Result<(), NotifyError> {
        panic!("fragile observer gave up")
    }));
    let recorder = Recorder::default();
    root.subscribe(recorder.clone());

    match root.node().set("a", 2).expect_err("panic reported") {
        StateError::ObserversFailed(failures) => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].observer, "fragile");
            assert!(matches!(
                &failures[0].error,
                NotifyError::Panicked(msg) if msg == "fragile observer gave up"
            ));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(recorder.count(), 1);

    assert!(root.node().set("a", 3).is_err());
    assert_eq!(recorder.count(), 2);
    assert_eq!(root.revision(), 2);
}
