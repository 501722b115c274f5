use crate::{
    types::{NodeId, PathSegment},
    value::{Record, Scalar, Value, ValueKind},
};

use super::{
    root::{Arena, Body, Slot, StateRoot},
    StateError,
};

/// Result of reading a child: a wrapped container, a scalar, or nothing.
#[derive(Debug, Clone)]
pub enum Entry {
    /// Container child, already wrapped.
    Node(ObservableNode),
    /// Scalar child.
    Scalar(Scalar),
    /// Absent mapping key.
    Missing,
}

impl Entry {
    /// The wrapped node, if the child is a container.
    pub fn into_node(self) -> Option<ObservableNode> {
        match self {
            Self::Node(node) => Some(node),
            _ => None,
        }
    }

    /// The scalar, if the child is one.
    pub fn as_scalar(&self) -> Option<&Scalar> {
        match self {
            Self::Scalar(scalar) => Some(scalar),
            _ => None,
        }
    }

    /// True for an absent mapping key.
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }

    /// Unwrapped copy of the child; `None` when missing.
    pub fn to_value(&self) -> Result<Option<Value>, StateError> {
        match self {
            Self::Node(node) => node.snapshot().map(Some),
            Self::Scalar(scalar) => Ok(Some(Value::Scalar(scalar.clone()))),
            Self::Missing => Ok(None),
        }
    }
}

/// Anything that can be written into an observable node.
#[derive(Debug, Clone)]
pub enum Assign {
    /// A plain value, wrapped on write.
    Value(Value),
    /// An already wrapped node.
    Node(ObservableNode),
}

macro_rules! assign_from_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Assign {
                fn from(value: $ty) -> Self {
                    Self::Value(Value::from(value))
                }
            }
        )*
    };
}

assign_from_value!(Value, Scalar, Record, Vec<Value>, bool, i64, i32, u32, f64, &str, String);

impl From<ObservableNode> for Assign {
    fn from(value: ObservableNode) -> Self {
        Self::Node(value)
    }
}

impl From<&ObservableNode> for Assign {
    fn from(value: &ObservableNode) -> Self {
        Self::Node(value.clone())
    }
}

/// An [`Assign`] checked against the root it is written into.
enum Pending {
    Value(Value),
    Local(NodeId),
}

impl Assign {
    /// Validates plain values and snapshots nodes of other roots before the
    /// target root is locked.
    fn resolve(self, root: &StateRoot) -> Result<Pending, StateError> {
        match self {
            Self::Value(value) => {
                value.validate()?;
                Ok(Pending::Value(value))
            }
            Self::Node(node) if node.root.same_root(root) => Ok(Pending::Local(node.id)),
            Self::Node(node) => Ok(Pending::Value(node.snapshot()?)),
        }
    }
}

impl Pending {
    fn into_value(self, arena: &Arena) -> Result<Value, StateError> {
        match self {
            Self::Value(value) => Ok(value),
            Self::Local(id) => arena.snapshot(id),
        }
    }
}

/// Handle to one wrapped mapping, sequence or record inside a [`StateRoot`].
///
/// The only way to mutate state: every write goes through the root's
/// snapshot/diff/notify pipeline. Reads return children already wrapped, so no
/// unobserved reference to a container ever escapes.
#[derive(Clone)]
pub struct ObservableNode {
    root: StateRoot,
    id: NodeId,
}

impl ObservableNode {
    pub(crate) fn new(root: StateRoot, id: NodeId) -> Self {
        Self { root, id }
    }

    /// Arena id, stable for the node's lifetime.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The state this node belongs to.
    pub fn root(&self) -> &StateRoot {
        &self.root
    }

    /// Node identity: same state and same node.
    pub fn same_node(&self, other: &ObservableNode) -> bool {
        self.id == other.id && self.root.same_root(&other.root)
    }

    /// Kind of the wrapped container.
    pub fn kind(&self) -> Result<ValueKind, StateError> {
        Ok(self.root.lock().arena.body(self.id)?.kind())
    }

    /// Number of items, entries or fields.
    pub fn len(&self) -> Result<usize, StateError> {
        let state = self.root.lock();
        Ok(match state.arena.body(self.id)? {
            Body::Sequence(items) => items.len(),
            Body::Mapping(map) => map.len(),
            Body::Record { fields, .. } => fields.len(),
        })
    }

    /// True when [`len`](Self::len) is zero.
    pub fn is_empty(&self) -> Result<bool, StateError> {
        self.len().map(|len| len == 0)
    }

    /// Keys in order: field names, mapping keys, or indices.
    pub fn keys(&self) -> Result<Vec<PathSegment>, StateError> {
        let state = self.root.lock();
        Ok(match state.arena.body(self.id)? {
            Body::Sequence(items) => (0..items.len()).map(PathSegment::Index).collect(),
            Body::Mapping(map) | Body::Record { fields: map, .. } => {
                map.keys().cloned().map(PathSegment::Key).collect()
            }
        })
    }

    /// Reads the child at `key`.
    ///
    /// Absent mapping keys yield [`Entry::Missing`]; undeclared record fields
    /// fail with [`StateError::NoSuchField`].
    pub fn get(&self, key: impl Into<PathSegment>) -> Result<Entry, StateError> {
        let key = key.into();
        let state = self.root.lock();
        Ok(match state.arena.child_slot(self.id, &key)? {
            None => Entry::Missing,
            Some(Slot::Scalar(scalar)) => Entry::Scalar(scalar),
            Some(Slot::Node(id)) => Entry::Node(ObservableNode::new(self.root.clone(), id)),
        })
    }

    /// Reads the container child at `key`.
    pub fn child(&self, key: impl Into<PathSegment>) -> Result<ObservableNode, StateError> {
        let key = key.into();
        match self.get(key.clone())? {
            Entry::Node(node) => Ok(node),
            Entry::Scalar(_) => Err(StateError::NotContainer(ValueKind::Scalar)),
            Entry::Missing => Err(StateError::Missing(key)),
        }
    }

    /// Writes `value` at `key`.
    ///
    /// Mappings accept new keys; records only their declared fields; sequences
    /// only existing indices. Writing a deep-equal value, or the node already
    /// stored at `key`, changes nothing and notifies no one.
    pub fn set(&self, key: impl Into<PathSegment>, value: impl Into<Assign>) -> Result<(), StateError> {
        let key = key.into();
        let pending = value.into().resolve(&self.root)?;
        self.root.mutate(self.id, |arena, id| {
            let current = arena.child_slot(id, &key)?;
            if let (Pending::Local(new_id), Some(Slot::Node(cur))) = (&pending, &current) {
                if new_id == cur {
                    return Ok(());
                }
            }
            let value = pending.into_value(arena)?;
            if current.as_ref().is_some_and(|slot| arena.slot_value(slot) == value) {
                return Ok(());
            }
            let slot = arena.wrap(value);
            if let Some(previous) = arena.put_child(id, &key, slot)? {
                arena.release(previous);
            }
            Ok(())
        })
    }

    /// Appends `value` to a sequence.
    pub fn push(&self, value: impl Into<Assign>) -> Result<(), StateError> {
        let pending = value.into().resolve(&self.root)?;
        self.root.mutate(self.id, |arena, id| {
            expect_sequence(arena, id)?;
            let value = pending.into_value(arena)?;
            let slot = arena.wrap(value);
            if let Body::Sequence(items) = arena.body_mut(id)? {
                items.push(slot);
            }
            Ok(())
        })
    }

    /// Inserts `value` into a sequence at `index` (at most the current length).
    pub fn insert(&self, index: usize, value: impl Into<Assign>) -> Result<(), StateError> {
        let pending = value.into().resolve(&self.root)?;
        self.root.mutate(self.id, |arena, id| {
            let len = expect_sequence(arena, id)?;
            if index > len {
                return Err(StateError::IndexOutOfBounds { index, len });
            }
            let value = pending.into_value(arena)?;
            let slot = arena.wrap(value);
            if let Body::Sequence(items) = arena.body_mut(id)? {
                items.insert(index, slot);
            }
            Ok(())
        })
    }

    /// Removes the child at `key`, returning its unwrapped value.
    ///
    /// An absent mapping key returns `None` without notifying. Record fields
    /// cannot be removed.
    pub fn remove(&self, key: impl Into<PathSegment>) -> Result<Option<Value>, StateError> {
        let key = key.into();
        self.root.mutate(self.id, |arena, id| {
            let removed = match (arena.body_mut(id)?, &key) {
                (Body::Mapping(map), PathSegment::Key(k)) => map.shift_remove(k),
                (Body::Sequence(items), PathSegment::Index(i)) => {
                    if *i >= items.len() {
                        return Err(StateError::IndexOutOfBounds {
                            index: *i,
                            len: items.len(),
                        });
                    }
                    Some(items.remove(*i))
                }
                (Body::Record { name, .. }, PathSegment::Key(_)) => {
                    return Err(StateError::FixedFields {
                        record: name.clone(),
                    });
                }
                (body, key) => {
                    return Err(StateError::KeyKind {
                        kind: body.kind(),
                        key: key.clone(),
                    });
                }
            };
            Ok(removed.map(|slot| {
                let value = arena.slot_value(&slot);
                arena.release(slot);
                value
            }))
        })
    }

    /// Replaces this node's contents with `value` as one change.
    ///
    /// Nested nodes whose address and kind survive keep their identity. A
    /// record node only accepts a record of the same name and fields.
    pub fn replace(&self, value: impl Into<Assign>) -> Result<(), StateError> {
        let pending = value.into().resolve(&self.root)?;
        self.root.mutate(self.id, |arena, id| {
            let value = pending.into_value(arena)?;
            arena.reconcile(id, value)
        })
    }

    /// Edits an unwrapped copy of this node and writes it back as one change,
    /// however many nested values `edit` touches.
    ///
    /// `edit` runs while the state is locked and must not use its handles.
    pub fn update<F>(&self, edit: F) -> Result<(), StateError>
    where
        F: FnOnce(&mut Value),
    {
        self.root.mutate(self.id, |arena, id| {
            let mut value = arena.snapshot(id)?;
            edit(&mut value);
            value.validate()?;
            arena.reconcile(id, value)
        })
    }

    /// Keeps only the sequence items for which `keep` returns true.
    pub fn retain<F>(&self, mut keep: F) -> Result<(), StateError>
    where
        F: FnMut(&Value) -> bool,
    {
        self.root.mutate(self.id, |arena, id| {
            expect_sequence(arena, id)?;
            let mut value = arena.snapshot(id)?;
            if let Value::Sequence(items) = &mut value {
                items.retain(|item| keep(item));
            }
            arena.reconcile(id, value)
        })
    }

    /// Unwrapped copy of this node's subtree.
    pub fn snapshot(&self) -> Result<Value, StateError> {
        self.root.lock().arena.snapshot(self.id)
    }
}

fn expect_sequence(arena: &Arena, id: NodeId) -> Result<usize, StateError> {
    match arena.body(id)? {
        Body::Sequence(items) => Ok(items.len()),
        body => Err(StateError::WrongKind {
            expected: ValueKind::Sequence,
            found: body.kind(),
        }),
    }
}

impl std::fmt::Debug for ObservableNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservableNode").field("id", &self.id).finish()
    }
}
