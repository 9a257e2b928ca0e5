use std::any::{Any, TypeId};
use std::convert::Infallible;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::trace;

use crate::context::ExecutionContext;
use crate::handle::{EntityKey, FactoryId, Operation, OperationKind, Outcome, Record, ResourceHandle};
use crate::{PersistenceError, PersistenceResult};

struct SharedInner {
    unit: String,
    factory: FactoryId,
}

/// A long-lived handle for one persistence unit.
///
/// It never owns a resource handle. Every call is forwarded to whatever
/// handle the given [`ExecutionContext`] has bound for the unit's factory, so
/// application code can keep one `SharedHandle` for the whole process and
/// still reach the handle of the operation it is serving.
///
/// Transaction boundaries belong to the unit-of-work aspect. Mutating calls
/// are refused unless the bound handle has an active transaction, and the
/// shared handle can neither be closed nor used to start a transaction.
#[derive(Clone)]
pub struct SharedHandle {
    inner: Arc<SharedInner>,
}

/// Result of [`SharedHandle::unwrap`].
pub enum Unwrapped<'a> {
    Shared(&'a SharedHandle),
    Delegate(Arc<dyn ResourceHandle>),
}

impl Unwrapped<'_> {
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Unwrapped::Shared(shared) => (*shared as &dyn Any).downcast_ref(),
            Unwrapped::Delegate(handle) => handle.unwrap(TypeId::of::<T>()).ok()?.downcast_ref(),
        }
    }
}

impl SharedHandle {
    pub(crate) fn new(unit: String, factory: FactoryId) -> Self {
        Self {
            inner: Arc::new(SharedInner { unit, factory }),
        }
    }

    /// Name the unit was registered under.
    pub fn unit(&self) -> &str {
        &self.inner.unit
    }

    pub fn factory_id(&self) -> FactoryId {
        self.inner.factory
    }

    /// Always `true`: the shared handle itself is never closed.
    pub fn is_open(&self) -> bool {
        true
    }

    /// Suppressed. The bound handle is released by its unit of work only.
    pub fn close(&self) {
        trace!(unit = %self.inner.unit, "ignored close on shared handle");
    }

    /// Always fails; transactions are owned by the unit of work.
    pub fn transaction(&self) -> PersistenceResult<Infallible> {
        Err(PersistenceError::TransactionBoundaryMisuse)
    }

    /// Resolve to a concrete object.
    ///
    /// With no target the bound handle is returned. Asking for
    /// `SharedHandle` returns this handle without touching the context; any
    /// other type is delegated to the bound handle.
    pub fn unwrap(
        &self,
        cx: &ExecutionContext,
        target: Option<TypeId>,
    ) -> PersistenceResult<Unwrapped<'_>> {
        match target {
            None => Ok(Unwrapped::Delegate(self.current(cx)?)),
            Some(target) if target == TypeId::of::<SharedHandle>() => Ok(Unwrapped::Shared(self)),
            Some(target) => {
                let handle = self.current(cx)?;
                handle.unwrap(target)?;
                Ok(Unwrapped::Delegate(handle))
            }
        }
    }

    /// Forward an operation to the handle bound in `cx`.
    pub async fn invoke(
        &self,
        cx: &ExecutionContext,
        operation: Operation,
    ) -> PersistenceResult<Outcome> {
        let target = self.current(cx)?;

        // Without a transaction a mutation would be accepted but never flushed.
        if operation.kind() == OperationKind::Mutating && !target.transaction_active() {
            return Err(PersistenceError::TransactionRequired {
                operation: operation.name(),
            });
        }

        target.execute(operation).await
    }

    /// Look up an entity by key; `None` if there is no such row.
    pub async fn find(
        &self,
        cx: &ExecutionContext,
        key: EntityKey,
    ) -> PersistenceResult<Option<Record>> {
        match self.invoke(cx, Operation::Find(key)).await? {
            Outcome::Found(record) => Ok(record),
            _ => Err(PersistenceError::UnexpectedOutcome("find")),
        }
    }

    /// Whether an entity with this key exists.
    pub async fn contains(&self, cx: &ExecutionContext, key: EntityKey) -> PersistenceResult<bool> {
        match self.invoke(cx, Operation::Contains(key)).await? {
            Outcome::Contains(found) => Ok(found),
            _ => Err(PersistenceError::UnexpectedOutcome("contains")),
        }
    }

    /// Run raw SQL, returning the number of rows affected.
    pub async fn native_query(
        &self,
        cx: &ExecutionContext,
        sql: impl Into<String>,
    ) -> PersistenceResult<u64> {
        match self.invoke(cx, Operation::NativeQuery(sql.into())).await? {
            Outcome::Rows(rows) => Ok(rows),
            _ => Err(PersistenceError::UnexpectedOutcome("native_query")),
        }
    }

    /// Insert a new entity. Requires an active transaction.
    pub async fn persist(&self, cx: &ExecutionContext, record: Record) -> PersistenceResult<()> {
        self.invoke(cx, Operation::Persist(record)).await.map(|_| ())
    }

    /// Insert or replace an entity, returning the stored record. Requires an
    /// active transaction.
    pub async fn merge(&self, cx: &ExecutionContext, record: Record) -> PersistenceResult<Record> {
        match self.invoke(cx, Operation::Merge(record)).await? {
            Outcome::Merged(record) => Ok(record),
            _ => Err(PersistenceError::UnexpectedOutcome("merge")),
        }
    }

    /// Delete an entity. Requires an active transaction.
    pub async fn remove(&self, cx: &ExecutionContext, key: EntityKey) -> PersistenceResult<()> {
        self.invoke(cx, Operation::Remove(key)).await.map(|_| ())
    }

    /// Reload an entity from the store. Fails with `EntityNotFound` when the
    /// row is gone.
    pub async fn refresh(&self, cx: &ExecutionContext, key: EntityKey) -> PersistenceResult<Record> {
        match self.invoke(cx, Operation::Refresh(key)).await? {
            Outcome::Found(Some(record)) => Ok(record),
            _ => Err(PersistenceError::UnexpectedOutcome("refresh")),
        }
    }

    /// Push pending changes to the store.
    pub async fn flush(&self, cx: &ExecutionContext) -> PersistenceResult<()> {
        self.invoke(cx, Operation::Flush).await.map(|_| ())
    }

    /// Enlist the bound handle in the active transaction.
    pub async fn join_transaction(&self, cx: &ExecutionContext) -> PersistenceResult<()> {
        self.invoke(cx, Operation::JoinTransaction).await.map(|_| ())
    }

    fn current(&self, cx: &ExecutionContext) -> PersistenceResult<Arc<dyn ResourceHandle>> {
        cx.current(self.inner.factory)
    }
}

impl PartialEq for SharedHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for SharedHandle {}

impl Hash for SharedHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.inner) as usize).hash(state);
    }
}

impl fmt::Debug for SharedHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedHandle")
            .field("unit", &self.inner.unit)
            .field("factory", &self.inner.factory)
            .finish()
    }
}
