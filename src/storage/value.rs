// ValueStore - a single typed value mirrored into a KvStore
//
// The value is loaded once at construction and written back on every
// mutation. Storage failures never reach the caller; they are routed through
// a replaceable error handler.

use crate::storage::{KvStore, StoreError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error};

/// Whether the host can persist data at all.
///
/// Injected at construction; a disabled store never touches storage.
#[derive(Clone)]
pub enum Persistence {
    /// Keep everything in memory for the lifetime of the store
    Disabled,
    /// Read and write through the given backend
    Enabled(Arc<dyn KvStore>),
}

impl Persistence {
    /// Persist through `store`
    pub fn enabled<S: KvStore + 'static>(store: S) -> Self {
        Self::Enabled(Arc::new(store))
    }

    /// Check if persistence is available
    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Enabled(_))
    }

    /// Get the backend, if any
    pub fn backend(&self) -> Option<&Arc<dyn KvStore>> {
        match self {
            Self::Enabled(backend) => Some(backend),
            Self::Disabled => None,
        }
    }
}

impl fmt::Debug for Persistence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => write!(f, "Persistence::Disabled"),
            Self::Enabled(_) => write!(f, "Persistence::Enabled"),
        }
    }
}

/// Which storage operation failed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageOp {
    Load,
    Save,
}

/// A storage failure handed to an [`ErrorHandler`].
///
/// The handler may install a recovery value with [`StorageFailure::recover_with`];
/// otherwise the in-memory value is left as it is.
pub struct StorageFailure<'a, T> {
    error: &'a StoreError,
    key: &'a str,
    initial: &'a T,
    operation: StorageOp,
    recovery: Option<T>,
}

impl<'a, T> StorageFailure<'a, T> {
    /// The underlying error
    pub fn error(&self) -> &StoreError {
        self.error
    }

    /// The storage key of the value
    pub fn key(&self) -> &str {
        self.key
    }

    /// The default the store was constructed with
    pub fn initial(&self) -> &T {
        self.initial
    }

    /// The failed operation
    pub fn operation(&self) -> StorageOp {
        self.operation
    }

    /// Replace the in-memory value once the handler returns
    pub fn recover_with(&mut self, value: T) {
        self.recovery = Some(value);
    }
}

/// Callback invoked on every storage failure
pub type ErrorHandler<T> = Box<dyn FnMut(&mut StorageFailure<'_, T>) + Send>;

/// Log the failure; fall back to the initial value when loading failed.
///
/// Save failures keep the in-memory value, so they only cost durability.
pub fn default_error_handler<T: Clone + 'static>() -> ErrorHandler<T> {
    Box::new(|failure: &mut StorageFailure<'_, T>| {
        error!(
            key = %failure.key(),
            operation = ?failure.operation(),
            error = %failure.error(),
            "Storage failure"
        );
        if failure.operation() == StorageOp::Load {
            let initial = failure.initial().clone();
            failure.recover_with(initial);
        }
    })
}

/// The set-side capability of a store.
///
/// Layers compose by wrapping: a syncing store holds a persisting store and
/// adds its own stages around the inner `mutate`.
pub trait Mutator<T> {
    /// The current value
    fn current(&self) -> &T;

    /// Replace the value, running every stage of this layer
    fn mutate(&mut self, value: T);
}

/// A single value persisted as JSON under one key
pub struct ValueStore<T> {
    key: String,
    initial: T,
    value: T,
    backend: Option<Arc<dyn KvStore>>,
    on_error: ErrorHandler<T>,
}

impl<T> ValueStore<T>
where
    T: Serialize + DeserializeOwned + Clone + 'static,
{
    /// Load `key`, falling back to `initial`, with the default error handler
    pub fn new(key: impl Into<String>, initial: T, persistence: Persistence) -> Self {
        Self::with_error_handler(key, initial, persistence, default_error_handler())
    }

    /// Load `key`, falling back to `initial`, with a custom error handler
    pub fn with_error_handler(
        key: impl Into<String>,
        initial: T,
        persistence: Persistence,
        on_error: ErrorHandler<T>,
    ) -> Self {
        let backend = match persistence {
            Persistence::Enabled(backend) => Some(backend),
            Persistence::Disabled => None,
        };

        let mut store = Self {
            key: key.into(),
            value: initial.clone(),
            initial,
            backend,
            on_error,
        };
        store.load();
        store
    }

    fn load(&mut self) {
        let Some(backend) = self.backend.clone() else {
            debug!(key = %self.key, "Persistence disabled, using initial value");
            return;
        };

        let raw = match backend.get(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                // First run: nothing is written until the first mutation
                debug!(key = %self.key, "No stored value, using initial value");
                return;
            }
            Err(e) => {
                self.handle_error(e, StorageOp::Load);
                return;
            }
        };

        match serde_json::from_str::<T>(&raw) {
            Ok(value) => {
                debug!(key = %self.key, "Loaded stored value");
                self.value = value;
            }
            Err(e) => {
                self.handle_error(StoreError::DeserializationFailed(e.to_string()), StorageOp::Load)
            }
        }
    }

    /// Get the current value
    pub fn get(&self) -> &T {
        &self.value
    }

    /// Get the value for in-place edits; call [`ValueStore::flush`] afterwards
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.value
    }

    /// Replace the value and write it back before returning
    pub fn set(&mut self, value: T) {
        self.value = value;
        self.write();
    }

    /// Write the current value back to storage
    pub fn flush(&mut self) {
        self.write();
    }

    /// The storage key
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The value the store falls back to
    pub fn initial(&self) -> &T {
        &self.initial
    }

    /// Check if writes reach a backend
    pub fn is_persistent(&self) -> bool {
        self.backend.is_some()
    }

    /// Swap the error handler
    pub fn set_error_handler(&mut self, on_error: ErrorHandler<T>) {
        self.on_error = on_error;
    }

    fn write(&mut self) {
        let Some(backend) = self.backend.clone() else {
            return;
        };

        let raw = match serde_json::to_string(&self.value) {
            Ok(raw) => raw,
            Err(e) => {
                self.handle_error(StoreError::SerializationFailed(e.to_string()), StorageOp::Save);
                return;
            }
        };

        if let Err(e) = backend.set(&self.key, &raw) {
            self.handle_error(e, StorageOp::Save);
        }
    }

    fn handle_error(&mut self, error: StoreError, operation: StorageOp) {
        let mut failure = StorageFailure {
            error: &error,
            key: &self.key,
            initial: &self.initial,
            operation,
            recovery: None,
        };
        (self.on_error)(&mut failure);

        if let Some(value) = failure.recovery {
            self.value = value;
        }
    }
}

impl<T> Mutator<T> for ValueStore<T>
where
    T: Serialize + DeserializeOwned + Clone + 'static,
{
    fn current(&self) -> &T {
        self.get()
    }

    fn mutate(&mut self, value: T) {
        self.set(value);
    }
}

impl<T: fmt::Debug> fmt::Debug for ValueStore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueStore")
            .field("key", &self.key)
            .field("value", &self.value)
            .field("persistent", &self.backend.is_some())
            .finish()
    }
}
