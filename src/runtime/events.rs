//! Change event stream payloads.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::{
    diff::Diff,
    observable::{
        root::StateRoot,
        sink::{Notification, NotifyError, Observer},
    },
    types::Revision,
    value::Value,
};

/// Events emitted after each notified mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum StateEvent {
    /// The state changed.
    Changed {
        /// Revision the mutation produced.
        revision: Revision,
        /// Edits the mutation made.
        diff: Arc<Diff>,
    },
    /// Full state after the change, for subscribers that asked for snapshots.
    Snapshot {
        /// Revision the snapshot belongs to.
        revision: Revision,
        /// Whole-root snapshot.
        value: Arc<Value>,
    },
}

impl StateEvent {
    /// Revision the event belongs to.
    pub fn revision(&self) -> Revision {
        match self {
            Self::Changed { revision, .. } | Self::Snapshot { revision, .. } => *revision,
        }
    }
}

/// Observer forwarding every change into a [`broadcast`] channel.
///
/// Sends never block the mutating thread; with no receivers the event is
/// dropped, and lagging receivers lose the oldest events.
pub struct EventBroadcaster {
    events_tx: broadcast::Sender<StateEvent>,
    snapshots: bool,
}

impl EventBroadcaster {
    /// Broadcaster over an existing channel.
    pub fn new(events_tx: broadcast::Sender<StateEvent>) -> Self {
        Self {
            events_tx,
            snapshots: false,
        }
    }

    /// Also emits a [`StateEvent::Snapshot`] after each [`StateEvent::Changed`].
    pub fn with_snapshots(mut self) -> Self {
        self.snapshots = true;
        self
    }

    /// Subscribes a broadcaster with a fresh channel of `capacity` to `root`
    /// and returns the sender, from which receivers are created.
    pub fn attach(root: &StateRoot, capacity: usize) -> broadcast::Sender<StateEvent> {
        let (events_tx, _) = broadcast::channel(capacity);
        root.subscribe(Self::new(events_tx.clone()));
        events_tx
    }
}

impl Observer for EventBroadcaster {
    fn name(&self) -> &str {
        "events"
    }

    fn notify(&mut self, notification: &Notification<'_>) -> Result<(), NotifyError> {
        let revision = notification.revision;
        let _ = self.events_tx.send(StateEvent::Changed {
            revision,
            diff: Arc::new(notification.diff.clone()),
        });
        if self.snapshots {
            let _ = self.events_tx.send(StateEvent::Snapshot {
                revision,
                value: Arc::new(notification.new.clone()),
            });
        }
        Ok(())
    }
}
