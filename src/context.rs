use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::handle::{FactoryId, ResourceHandle};
use crate::{PersistenceError, PersistenceResult};

type BindingTable = HashMap<FactoryId, Arc<dyn ResourceHandle>>;

/// The resource handles bound to one logical operation.
///
/// One context exists per request or proxied call and is passed explicitly
/// to everything that needs the current handle. Handles are keyed by the
/// factory that created them, so at most one handle per factory is bound at
/// any time.
///
/// The table is created on first bind and dropped again once its last entry
/// is removed. Cleanup may run on a different worker than the one that bound
/// the handle, so every transition happens under the lock.
pub struct ExecutionContext {
    id: Uuid,
    bindings: Mutex<Option<BindingTable>>,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionContext {
    /// A context with no bindings and a fresh id.
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            bindings: Mutex::new(None),
        }
    }

    /// Identifier used in log fields.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Bind a handle under its factory.
    ///
    /// Returns any handle previously bound for that factory (normally none).
    pub fn bind(&self, handle: Arc<dyn ResourceHandle>) -> Option<Arc<dyn ResourceHandle>> {
        let factory = handle.factory_id();
        let previous = self
            .bindings
            .lock()
            .get_or_insert_with(HashMap::new)
            .insert(factory, handle);

        if previous.is_some() {
            warn!(context = %self.id, factory = %factory, "replaced a handle that was still bound");
        } else {
            debug!(context = %self.id, factory = %factory, "bound resource handle");
        }
        previous
    }

    /// Remove the handle bound for `factory`, if any.
    pub fn unbind(&self, factory: FactoryId) -> Option<Arc<dyn ResourceHandle>> {
        let mut bindings = self.bindings.lock();
        let table = bindings.as_mut()?;
        let existing = table.remove(&factory);
        if table.is_empty() {
            *bindings = None;
        }
        if existing.is_some() {
            debug!(context = %self.id, factory = %factory, "unbound resource handle");
        }
        existing
    }

    /// Remove every binding, passing each handle to `release`.
    ///
    /// `release` runs after the lock is dropped.
    pub fn unbind_all<F>(&self, mut release: F)
    where
        F: FnMut(Arc<dyn ResourceHandle>),
    {
        let table = self.bindings.lock().take();
        if let Some(table) = table {
            debug!(context = %self.id, count = table.len(), "unbinding all resource handles");
            for (_, handle) in table {
                release(handle);
            }
        }
    }

    /// The handle bound for `factory`.
    pub fn current(&self, factory: FactoryId) -> PersistenceResult<Arc<dyn ResourceHandle>> {
        self.bindings
            .lock()
            .as_ref()
            .and_then(|table| table.get(&factory).cloned())
            .ok_or(PersistenceError::NoHandleBound { factory })
    }

    /// Whether a handle is bound for `factory`.
    pub fn has_binding(&self, factory: FactoryId) -> bool {
        self.bindings
            .lock()
            .as_ref()
            .is_some_and(|table| table.contains_key(&factory))
    }

    /// Whether the binding table currently exists.
    pub fn is_empty(&self) -> bool {
        self.bindings.lock().is_none()
    }
}
