use crate::{
    codec,
    observable::{
        root::StateRoot,
        sink::{Notification, NotifyError, Observer},
        StateError,
    },
    value::Value,
};

use super::{PersistError, PersistResult, StateStore};

/// Failure while bringing up a persistent state.
#[derive(Debug, thiserror::Error)]
pub enum BootError {
    /// The store could not be initialised or read.
    #[error(transparent)]
    Persist(#[from] PersistError),
    /// The restored value could not be declared.
    #[error(transparent)]
    State(#[from] StateError),
}

/// Observer writing every new snapshot to a [`StateStore`].
///
/// One notification produces exactly one `update` call carrying the whole
/// encoded snapshot. A failed write is reported as [`NotifyError::Sync`]; the
/// in-memory change stays applied.
pub struct PersistenceBridge<S> {
    store: S,
}

impl<S: StateStore> PersistenceBridge<S> {
    /// Bridge over an already initialised store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Initialises `store` and picks the value to declare: the stored snapshot
    /// reshaped onto `initial` when one exists, `initial` otherwise.
    pub fn bootstrap(mut store: S, initial: Value) -> PersistResult<(Self, Value)> {
        store.init()?;
        let value = match store.load()? {
            Some(text) => {
                let restored = codec::decode_as(&initial, &text)?;
                tracing::info!(bytes = text.len(), "state restored from store");
                restored
            }
            None => initial,
        };
        Ok((Self::new(store), value))
    }

    /// Backing store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Consumes the bridge, returning its store.
    pub fn into_store(self) -> S {
        self.store
    }

    fn sync(&mut self, value: &Value) -> PersistResult<()> {
        let data = codec::encode(value)?;
        self.store.update(&data)
    }
}

impl<S: StateStore> Observer for PersistenceBridge<S> {
    fn name(&self) -> &str {
        "persistence"
    }

    fn notify(&mut self, notification: &Notification<'_>) -> Result<(), NotifyError> {
        self.sync(notification.new).map_err(NotifyError::Sync)?;
        tracing::debug!(revision = notification.revision, "state persisted");
        Ok(())
    }
}

/// Declares a state backed by `store`, restoring a previously stored snapshot.
///
/// The persistence observer is subscribed first, so it runs before any
/// observer added later.
pub fn declare_persistent<S>(initial: Value, store: S) -> Result<StateRoot, BootError>
where
    S: StateStore + 'static,
{
    let (bridge, value) = PersistenceBridge::bootstrap(store, initial)?;
    let root = StateRoot::declare(value)?;
    root.subscribe(bridge);
    Ok(root)
}
