use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

use livestate::{
    declare_persistent,
    diff::diff,
    observable::root::StateRoot,
    persist::memory::MemoryStateStore,
    value::Value,
};

fn users(n: usize) -> Value {
    Value::mapping([(
        "users",
        Value::sequence((0..n).map(|i| {
            Value::mapping([("name", Value::from(format!("U{i}"))), ("score", Value::from(i as i64))])
        })),
    )])
}

fn bench_leaf_sets(c: &mut Criterion) {
    c.bench_function("leaf_set_1k_users", |b| {
        let root = StateRoot::declare(users(1_000)).expect("declare");
        let user = root
            .node()
            .child("users")
            .expect("users")
            .child(500usize)
            .expect("user");
        let mut score = 0i64;
        b.iter(|| {
            score += 1;
            user.set("score", score).expect("set");
        });
    });
}

fn bench_persisted_appends(c: &mut Criterion) {
    c.bench_function("persisted_append_1k", |b| {
        b.iter(|| {
            let root = declare_persistent(users(0), MemoryStateStore::new()).expect("declare");
            let list = root.node().child("users").expect("users");
            for i in 0..1_000i64 {
                list.push(Value::mapping([("score", i)])).expect("push");
            }
        });
    });
}

fn bench_diff(c: &mut Criterion) {
    let mut group = c.benchmark_group("diff");
    for n in [10usize, 100usize, 1000usize] {
        let old = users(n);
        let mut new = old.clone();
        if let Some(Value::Sequence(items)) = new.at_mut(&"users".parse().expect("path")) {
            items.push(Value::mapping([("name", "tail")]));
        }
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| diff(&old, &new));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_leaf_sets, bench_persisted_appends, bench_diff);
criterion_main!(benches);
