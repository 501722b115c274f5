//! Observable state: wrapped node trees that notify on every change.

/// Node handles and the values they accept.
pub mod node;
/// State roots: wrapped-node arena and the mutation pipeline.
pub mod root;
/// Observers and the per-root fan-out sink.
pub mod sink;

use crate::{
    persist::PersistError,
    types::{NodeId, PathSegment},
    value::{Value, ValueError, ValueKind},
};

use self::{
    node::{Assign, Entry},
    root::StateRoot,
    sink::{NotifyError, ObserverFailure},
};

/// Errors raised by reads and writes on observable nodes.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// The written value cannot be represented.
    #[error(transparent)]
    UnsupportedValueKind(#[from] ValueError),
    /// The record does not declare this field.
    #[error("record `{record}` has no field `{field}`")]
    NoSuchField {
        /// Record name.
        record: String,
        /// Requested field.
        field: String,
    },
    /// Fields cannot be added to or removed from a record.
    #[error("record `{record}` has a fixed field set")]
    FixedFields {
        /// Record name.
        record: String,
    },
    /// Sequence index past the end.
    #[error("index {index} out of bounds for sequence of length {len}")]
    IndexOutOfBounds {
        /// Requested index.
        index: usize,
        /// Current length.
        len: usize,
    },
    /// A key was used on a sequence or an index on a mapping/record.
    #[error("{kind:?} node cannot be addressed by {key}")]
    KeyKind {
        /// Kind of the addressed node.
        kind: ValueKind,
        /// Offending key.
        key: PathSegment,
    },
    /// The operation needs a different node kind.
    #[error("expected {expected:?} node, found {found:?}")]
    WrongKind {
        /// Kind the operation works on.
        expected: ValueKind,
        /// Kind of the node.
        found: ValueKind,
    },
    /// The mapping has no entry at this key.
    #[error("no entry at {0}")]
    Missing(PathSegment),
    /// A mapping, sequence or record was required.
    #[error("expected a mapping, sequence or record, found {0:?}")]
    NotContainer(ValueKind),
    /// The handle's node was dropped by a structural write.
    #[error("node {0} is no longer part of its state")]
    Detached(NodeId),
    /// The change was applied in memory but the backing store write failed.
    #[error("state synchronisation failed: {source}")]
    SyncFailed {
        /// Storage failure reported by the persistence observer.
        source: PersistError,
        /// Failures of other observers during the same notification.
        others: Vec<ObserverFailure>,
    },
    /// One or more non-storage observers failed; the change was applied.
    #[error("{} observer(s) failed", .0.len())]
    ObserversFailed(Vec<ObserverFailure>),
}

impl StateError {
    pub(crate) fn from_failures(failures: Vec<ObserverFailure>) -> Self {
        let mut source = None;
        let mut others = Vec::new();
        for failure in failures {
            match failure.error {
                NotifyError::Sync(err) if source.is_none() => source = Some(err),
                error => others.push(ObserverFailure {
                    observer: failure.observer,
                    error,
                }),
            }
        }
        match source {
            Some(source) => Self::SyncFailed { source, others },
            None => Self::ObserversFailed(others),
        }
    }
}

/// Wraps a value for observation.
///
/// Containers become the root node of a fresh, unobserved state; scalars pass
/// through. An [`ObservableNode`](node::ObservableNode) is returned as is.
pub fn wrap(value: impl Into<Assign>) -> Result<Entry, StateError> {
    match value.into() {
        Assign::Node(node) => Ok(Entry::Node(node)),
        Assign::Value(Value::Scalar(scalar)) => {
            scalar.validate()?;
            Ok(Entry::Scalar(scalar))
        }
        Assign::Value(value) => Ok(Entry::Node(StateRoot::declare(value)?.node())),
    }
}
