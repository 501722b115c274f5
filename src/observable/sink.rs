use std::panic::{self, AssertUnwindSafe};

use crate::{diff::Diff, persist::PersistError, types::Revision, value::Value};

/// What every observer receives after a mutation that changed the state.
#[derive(Debug, Clone, Copy)]
pub struct Notification<'a> {
    /// Revision the mutation produced.
    pub revision: Revision,
    /// Whole-root snapshot before the mutation.
    pub old: &'a Value,
    /// Whole-root snapshot after the mutation.
    pub new: &'a Value,
    /// Edits from `old` to `new`.
    pub diff: &'a Diff,
}

/// Failure reported by one observer.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// The backing store rejected or could not receive the write.
    #[error("storage write failed: {0}")]
    Sync(#[source] PersistError),
    /// Any other observer-specific failure.
    #[error("{0}")]
    Rejected(String),
    /// The observer panicked; the panic was contained.
    #[error("observer panicked: {0}")]
    Panicked(String),
}

/// A named observer failure, collected while the remaining observers still run.
#[derive(Debug)]
pub struct ObserverFailure {
    /// [`Observer::name`] of the failing observer.
    pub observer: String,
    /// What it reported.
    pub error: NotifyError,
}

/// Subscriber to one state root.
///
/// Called synchronously, on the mutating thread, while the root is locked.
/// Implementations must not call back into the root they observe.
pub trait Observer: Send {
    /// Label used in failure reports.
    fn name(&self) -> &str {
        "observer"
    }

    /// Handles one change.
    fn notify(&mut self, notification: &Notification<'_>) -> Result<(), NotifyError>;
}

/// Observer backed by a closure; see [`observer_fn`].
pub struct FnObserver<F> {
    name: String,
    f: F,
}

/// Wraps `f` as an observer reported as `name`.
pub fn observer_fn<F>(name: impl Into<String>, f: F) -> FnObserver<F>
where
    F: FnMut(&Notification<'_>) -> Result<(), NotifyError> + Send,
{
    FnObserver {
        name: name.into(),
        f,
    }
}

impl<F> Observer for FnObserver<F>
where
    F: FnMut(&Notification<'_>) -> Result<(), NotifyError> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn notify(&mut self, notification: &Notification<'_>) -> Result<(), NotifyError> {
        (self.f)(notification)
    }
}

/// Fan-out point delivering notifications to the observers of one root.
#[derive(Default)]
pub struct Sink {
    observers: Vec<Box<dyn Observer>>,
}

impl Sink {
    /// Appends an observer; observers run in registration order.
    pub fn subscribe(&mut self, observer: Box<dyn Observer>) {
        self.observers.push(observer);
    }

    /// Number of registered observers.
    pub fn len(&self) -> usize {
        self.observers.len()
    }

    /// True when nothing is subscribed.
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// Runs every observer, collecting failures instead of stopping at the first.
    ///
    /// A panicking observer is reported as [`NotifyError::Panicked`] and the
    /// remaining observers still run.
    pub fn notify(&mut self, notification: &Notification<'_>) -> Vec<ObserverFailure> {
        let mut failures = Vec::new();
        for observer in &mut self.observers {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| observer.notify(notification)))
                .unwrap_or_else(|payload| Err(NotifyError::Panicked(panic_message(payload.as_ref()))));
            if let Err(error) = outcome {
                tracing::warn!(
                    observer = observer.name(),
                    revision = notification.revision,
                    %error,
                    "observer failed"
                );
                failures.push(ObserverFailure {
                    observer: observer.name().to_string(),
                    error,
                });
            }
        }
        failures
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

impl std::fmt::Debug for Sink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.observers.iter().map(|o| o.name()))
            .finish()
    }
}
