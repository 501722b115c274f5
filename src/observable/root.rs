use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};

use hashbrown::HashMap;
use indexmap::IndexMap;

use crate::{
    diff::diff,
    types::{NodeId, PathSegment, Revision},
    value::{Record, Scalar, Value, ValueKind},
};

use super::{
    node::ObservableNode,
    sink::{Notification, Observer, Sink},
    StateError,
};

/// Child reference held by a wrapped node.
#[derive(Debug, Clone)]
pub(crate) enum Slot {
    Scalar(Scalar),
    Node(NodeId),
}

/// Contents of one wrapped container.
#[derive(Debug)]
pub(crate) enum Body {
    Sequence(Vec<Slot>),
    Mapping(IndexMap<String, Slot>),
    Record {
        name: String,
        fields: IndexMap<String, Slot>,
    },
}

impl Body {
    pub(crate) fn kind(&self) -> ValueKind {
        match self {
            Self::Sequence(_) => ValueKind::Sequence,
            Self::Mapping(_) => ValueKind::Mapping,
            Self::Record { .. } => ValueKind::Record,
        }
    }

    fn into_slots(self) -> Vec<Slot> {
        match self {
            Self::Sequence(items) => items,
            Self::Mapping(map) | Self::Record { fields: map, .. } => map.into_values().collect(),
        }
    }
}

/// Every wrapped node of one root, addressed by id. Each node has exactly one parent slot.
#[derive(Debug)]
pub(crate) struct Arena {
    nodes: HashMap<NodeId, Body>,
    next_id: NodeId,
}

impl Arena {
    fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            next_id: 1,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Recursively wraps every nested container of `value`.
    pub(crate) fn wrap(&mut self, value: Value) -> Slot {
        let body = match value {
            Value::Scalar(scalar) => return Slot::Scalar(scalar),
            Value::Sequence(items) => {
                Body::Sequence(items.into_iter().map(|v| self.wrap(v)).collect())
            }
            Value::Mapping(map) => {
                Body::Mapping(map.into_iter().map(|(k, v)| (k, self.wrap(v))).collect())
            }
            Value::Record(record) => {
                let (name, fields) = record.into_parts();
                Body::Record {
                    name,
                    fields: fields.into_iter().map(|(k, v)| (k, self.wrap(v))).collect(),
                }
            }
        };
        Slot::Node(self.alloc(body))
    }

    fn alloc(&mut self, body: Body) -> NodeId {
        let id = self.next_id;
        self.next_id += 1;
        self.nodes.insert(id, body);
        id
    }

    /// Drops a slot's subtree from the arena.
    pub(crate) fn release(&mut self, slot: Slot) {
        if let Slot::Node(id) = slot {
            if let Some(body) = self.nodes.remove(&id) {
                for child in body.into_slots() {
                    self.release(child);
                }
            }
        }
    }

    pub(crate) fn body(&self, id: NodeId) -> Result<&Body, StateError> {
        self.nodes.get(&id).ok_or(StateError::Detached(id))
    }

    pub(crate) fn body_mut(&mut self, id: NodeId) -> Result<&mut Body, StateError> {
        self.nodes.get_mut(&id).ok_or(StateError::Detached(id))
    }

    /// Unwrapped copy of the subtree rooted at `id`.
    pub(crate) fn snapshot(&self, id: NodeId) -> Result<Value, StateError> {
        Ok(self.body_value(self.body(id)?))
    }

    pub(crate) fn slot_value(&self, slot: &Slot) -> Value {
        match slot {
            Slot::Scalar(scalar) => Value::Scalar(scalar.clone()),
            // Slots never reference released nodes.
            Slot::Node(id) => self
                .nodes
                .get(id)
                .map_or(Value::NULL, |body| self.body_value(body)),
        }
    }

    fn body_value(&self, body: &Body) -> Value {
        match body {
            Body::Sequence(items) => {
                Value::Sequence(items.iter().map(|s| self.slot_value(s)).collect())
            }
            Body::Mapping(map) => Value::Mapping(
                map.iter()
                    .map(|(k, s)| (k.clone(), self.slot_value(s)))
                    .collect(),
            ),
            Body::Record { name, fields } => Value::Record(Record::new(
                name.clone(),
                fields.iter().map(|(k, s)| (k.clone(), self.slot_value(s))),
            )),
        }
    }

    /// Child slot at `key`; `None` only for an absent mapping key.
    pub(crate) fn child_slot(&self, id: NodeId, key: &PathSegment) -> Result<Option<Slot>, StateError> {
        match (self.body(id)?, key) {
            (Body::Mapping(map), PathSegment::Key(k)) => Ok(map.get(k).cloned()),
            (Body::Record { name, fields }, PathSegment::Key(k)) => fields
                .get(k)
                .cloned()
                .map(Some)
                .ok_or_else(|| StateError::NoSuchField {
                    record: name.clone(),
                    field: k.clone(),
                }),
            (Body::Sequence(items), PathSegment::Index(i)) => items
                .get(*i)
                .cloned()
                .map(Some)
                .ok_or(StateError::IndexOutOfBounds {
                    index: *i,
                    len: items.len(),
                }),
            (body, key) => Err(StateError::KeyKind {
                kind: body.kind(),
                key: key.clone(),
            }),
        }
    }

    /// Stores `slot` at `key`, returning the slot it displaced.
    pub(crate) fn put_child(
        &mut self,
        id: NodeId,
        key: &PathSegment,
        slot: Slot,
    ) -> Result<Option<Slot>, StateError> {
        match (self.body_mut(id)?, key) {
            (Body::Mapping(map), PathSegment::Key(k)) => Ok(map.insert(k.clone(), slot)),
            (Body::Record { name, fields }, PathSegment::Key(k)) => match fields.get_mut(k) {
                Some(existing) => Ok(Some(std::mem::replace(existing, slot))),
                None => Err(StateError::NoSuchField {
                    record: name.clone(),
                    field: k.clone(),
                }),
            },
            (Body::Sequence(items), PathSegment::Index(i)) => {
                let len = items.len();
                match items.get_mut(*i) {
                    Some(existing) => Ok(Some(std::mem::replace(existing, slot))),
                    None => Err(StateError::IndexOutOfBounds { index: *i, len }),
                }
            }
            (body, key) => Err(StateError::KeyKind {
                kind: body.kind(),
                key: key.clone(),
            }),
        }
    }

    /// Replaces the contents of node `id` with `value`, keeping the ids of
    /// nested nodes whose address and kind survive.
    pub(crate) fn reconcile(&mut self, id: NodeId, value: Value) -> Result<(), StateError> {
        if let Body::Record { name, fields } = self.body(id)? {
            let same_shape = match &value {
                Value::Record(record) => {
                    record.name() == name
                        && record.fields().len() == fields.len()
                        && fields.keys().all(|k| record.has_field(k))
                }
                _ => false,
            };
            if !same_shape {
                return Err(StateError::FixedFields {
                    record: name.clone(),
                });
            }
        }
        if !value.is_container() {
            return Err(StateError::NotContainer(value.kind()));
        }
        self.rebuild(id, value);
        Ok(())
    }

    fn rebuild(&mut self, id: NodeId, value: Value) {
        let Some(old) = self.nodes.remove(&id) else {
            return;
        };
        let body = match (old, value) {
            (Body::Sequence(old_items), Value::Sequence(items)) => {
                let mut old_items = old_items.into_iter();
                let mut slots = Vec::with_capacity(items.len());
                for item in items {
                    let slot = match old_items.next() {
                        Some(prev) => self.reuse(prev, item),
                        None => self.wrap(item),
                    };
                    slots.push(slot);
                }
                for leftover in old_items {
                    self.release(leftover);
                }
                Body::Sequence(slots)
            }
            (Body::Mapping(old_map), Value::Mapping(map)) => {
                Body::Mapping(self.rebuild_keyed(old_map, map))
            }
            (Body::Record { name, fields: old_fields }, Value::Record(record))
                if record.name() == name =>
            {
                let (name, fields) = record.into_parts();
                Body::Record {
                    name,
                    fields: self.rebuild_keyed(old_fields, fields),
                }
            }
            (old, value) => {
                for slot in old.into_slots() {
                    self.release(slot);
                }
                match self.wrap(value) {
                    Slot::Node(fresh) => match self.nodes.remove(&fresh) {
                        Some(body) => body,
                        None => return,
                    },
                    Slot::Scalar(_) => return,
                }
            }
        };
        self.nodes.insert(id, body);
    }

    fn rebuild_keyed(
        &mut self,
        mut old: IndexMap<String, Slot>,
        new: IndexMap<String, Value>,
    ) -> IndexMap<String, Slot> {
        let mut slots = IndexMap::with_capacity(new.len());
        for (key, value) in new {
            let slot = match old.shift_remove(&key) {
                Some(prev) => self.reuse(prev, value),
                None => self.wrap(value),
            };
            slots.insert(key, slot);
        }
        for (_, leftover) in old {
            self.release(leftover);
        }
        slots
    }

    fn reuse(&mut self, prev: Slot, value: Value) -> Slot {
        match prev {
            Slot::Node(id) if self.kind_matches(id, &value) => {
                self.rebuild(id, value);
                Slot::Node(id)
            }
            prev => {
                self.release(prev);
                self.wrap(value)
            }
        }
    }

    fn kind_matches(&self, id: NodeId, value: &Value) -> bool {
        match (self.nodes.get(&id), value) {
            (Some(Body::Record { name, .. }), Value::Record(record)) => record.name() == name,
            (Some(body), value) => body.kind() == value.kind(),
            (None, _) => false,
        }
    }
}

pub(crate) struct RootState {
    pub(crate) arena: Arena,
    root: NodeId,
    sink: Sink,
    revision: Revision,
}

/// One declared application state: the root of a wrapped node tree and the
/// sink its changes are delivered to.
///
/// Cloning yields another handle to the same state. Mutations on any node of
/// the tree are serialized by a single lock held from the pre-change snapshot
/// until every observer has returned.
#[derive(Clone)]
pub struct StateRoot {
    shared: Arc<Mutex<RootState>>,
}

impl StateRoot {
    /// Declares a state from an initial container value, wrapping it eagerly.
    pub fn declare(initial: Value) -> Result<Self, StateError> {
        initial.validate()?;
        let mut arena = Arena::new();
        let root = match arena.wrap(initial) {
            Slot::Node(id) => id,
            Slot::Scalar(_) => return Err(StateError::NotContainer(ValueKind::Scalar)),
        };
        tracing::debug!(nodes = arena.len(), "state declared");
        Ok(Self {
            shared: Arc::new(Mutex::new(RootState {
                arena,
                root,
                sink: Sink::default(),
                revision: 0,
            })),
        })
    }

    /// Handle to the root node.
    pub fn node(&self) -> ObservableNode {
        let root = self.lock().root;
        ObservableNode::new(self.clone(), root)
    }

    /// Registers an observer; it sees every later change, after earlier observers.
    pub fn subscribe(&self, observer: impl Observer + 'static) {
        self.lock().sink.subscribe(Box::new(observer));
    }

    /// Number of registered observers.
    pub fn observer_count(&self) -> usize {
        self.lock().sink.len()
    }

    /// Unwrapped copy of the whole state.
    pub fn snapshot(&self) -> Value {
        let state = self.lock();
        state.arena.snapshot(state.root).unwrap_or(Value::NULL)
    }

    /// Number of changes notified so far.
    pub fn revision(&self) -> Revision {
        self.lock().revision
    }

    /// True when both handles refer to the same declared state.
    pub fn same_root(&self, other: &StateRoot) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, RootState> {
        // The arena is only written between validation and notification, never
        // while user code runs, so a poisoned lock still guards a whole tree.
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs one mutation of node `target` through the full pipeline: snapshot,
    /// apply, snapshot, diff, notify. `apply` must validate before it writes.
    pub(crate) fn mutate<T, F>(&self, target: NodeId, apply: F) -> Result<T, StateError>
    where
        F: FnOnce(&mut Arena, NodeId) -> Result<T, StateError>,
    {
        let mut guard = self.lock();
        let state = &mut *guard;
        state.arena.body(target)?;

        let old = state.arena.snapshot(state.root)?;
        let out = apply(&mut state.arena, target)?;
        let new = state.arena.snapshot(state.root)?;

        let diff = diff(&old, &new);
        if diff.is_empty() {
            return Ok(out);
        }

        state.revision += 1;
        tracing::debug!(
            revision = state.revision,
            changes = diff.len(),
            nodes = state.arena.len(),
            "state changed"
        );
        let notification = Notification {
            revision: state.revision,
            old: &old,
            new: &new,
            diff: &diff,
        };
        let failures = state.sink.notify(&notification);
        if failures.is_empty() {
            Ok(out)
        } else {
            Err(StateError::from_failures(failures))
        }
    }
}

impl std::fmt::Debug for StateRoot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut out = f.debug_struct("StateRoot");
        match self.shared.try_lock() {
            Ok(state) => out
                .field("revision", &state.revision)
                .field("nodes", &state.arena.len())
                .field("observers", &state.sink),
            Err(TryLockError::Poisoned(_)) => out.field("state", &"<poisoned>"),
            Err(TryLockError::WouldBlock) => out.field("state", &"<locked>"),
        };
        out.finish_non_exhaustive()
    }
}
