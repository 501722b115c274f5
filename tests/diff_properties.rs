use std::sync::{Arc, Mutex};

use proptest::prelude::*;

use livestate::{
    diff::diff,
    observable::{
        root::StateRoot,
        sink::{Notification, observer_fn},
        wrap,
    },
    value::{Record, Value},
};

fn scalar_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::NULL),
        any::<bool>().prop_map(Value::from),
        (-1000i64..1000).prop_map(Value::from),
        (-1.0e6f64..1.0e6).prop_map(Value::from),
        "[a-z]{0,6}".prop_map(Value::from),
    ]
}

fn value_strategy() -> impl Strategy<Value = Value> {
    scalar_strategy().prop_recursive(4, 48, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Sequence),
            prop::collection::vec(("[a-e]", inner.clone()), 0..6)
                .prop_map(|entries| Value::mapping(entries)),
            (0u8..2, prop::collection::vec(inner, 0..4)).prop_map(|(tag, fields)| {
                let name = if tag == 0 { "Left" } else { "Right" };
                Value::Record(Record::new(
                    name,
                    fields.into_iter().enumerate().map(|(i, v)| (format!("f{i}"), v)),
                ))
            }),
        ]
    })
}

fn container_strategy() -> impl Strategy<Value = Value> {
    prop::collection::vec(("[a-e]", value_strategy()), 0..6).prop_map(|entries| Value::mapping(entries))
}

proptest! {
    #[test]
    fn diff_against_itself_is_empty(value in value_strategy()) {
        prop_assert!(diff(&value, &value).is_empty());
    }

    #[test]
    fn applying_a_diff_reconstructs_the_new_value(old in value_strategy(), new in value_strategy()) {
        let delta = diff(&old, &new);
        let mut replayed = old.clone();
        prop_assert!(delta.apply_to(&mut replayed).is_ok(), "replay failed:\n{delta}");
        prop_assert_eq!(replayed, new);
    }

    #[test]
    fn unwrap_of_wrap_is_identity(value in value_strategy()) {
        let entry = wrap(value.clone()).expect("wrap");
        prop_assert_eq!(entry.to_value().expect("unwrap"), Some(value));
    }

    #[test]
    fn notifications_match_effective_writes(
        initial in container_strategy(),
        writes in prop::collection::vec(("[a-e]", value_strategy()), 1..20),
    ) {
        let root = StateRoot::declare(initial).expect("declare");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        root.subscribe(observer_fn("log", move |n: &Notification<'_>| {
            log.lock().expect("lock").push((n.old.clone(), n.new.clone(), n.diff.clone()));
            Ok(())
        }));

        let mut effective = 0;
        for (key, value) in writes {
            let before = root.snapshot();
            root.node().set(key.as_str(), value).expect("set");
            if root.snapshot() != before {
                effective += 1;
            }
        }

        let seen = seen.lock().expect("lock");
        prop_assert_eq!(seen.len(), effective);
        prop_assert_eq!(root.revision(), effective as u64);
        for (old, new, delta) in seen.iter() {
            prop_assert!(!delta.is_empty());
            let mut replayed = old.clone();
            prop_assert!(delta.apply_to(&mut replayed).is_ok());
            prop_assert_eq!(&replayed, new);
        }
    }
}
