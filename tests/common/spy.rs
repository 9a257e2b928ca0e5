use async_trait::async_trait;
use parking_lot::RwLock;
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use scoped_unit_of_work::{
    FactoryId, Operation, Outcome, PersistenceError, PersistenceResult, PersistenceUnitFactory,
    ResourceHandle, SessionOptions,
};

/// Everything a spy handle was asked to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateHandle,
    Configure(SessionOptions),
    Begin,
    Commit,
    Rollback,
    Execute(&'static str),
    Close,
}

/// Failure knobs shared by a factory and its handles
#[derive(Debug, Clone, Copy, Default)]
pub struct Behavior {
    pub fail_configure: bool,
    pub fail_begin: bool,
    pub fail_commit: bool,
    pub fail_rollback: bool,
    pub fail_execute: bool,
    /// Begin succeeds but the transaction never reports itself active
    pub inactive_transactions: bool,
}

type Journal = Arc<RwLock<Vec<Call>>>;

/// Factory that records every call made on it and its handles
pub struct SpyFactory {
    id: FactoryId,
    behavior: Behavior,
    journal: Journal,
    handles: RwLock<Vec<Arc<SpyHandle>>>,
}

impl SpyFactory {
    pub fn new() -> Arc<Self> {
        Self::with_behavior(Behavior::default())
    }

    pub fn with_behavior(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            id: FactoryId::new(),
            behavior,
            journal: Arc::new(RwLock::new(Vec::new())),
            handles: RwLock::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.journal.read().clone()
    }

    pub fn count(&self, call: &Call) -> usize {
        self.journal.read().iter().filter(|c| *c == call).count()
    }

    pub fn executed(&self) -> usize {
        self.journal
            .read()
            .iter()
            .filter(|c| matches!(c, Call::Execute(_)))
            .count()
    }

    pub fn last_handle(&self) -> Option<Arc<SpyHandle>> {
        self.handles.read().last().cloned()
    }

    /// A handle created outside any unit of work, for binding by hand
    pub fn open_handle(&self) -> Arc<SpyHandle> {
        let handle = Arc::new(SpyHandle {
            factory: self.id,
            behavior: self.behavior,
            journal: self.journal.clone(),
            active: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });
        self.handles.write().push(handle.clone());
        handle
    }
}

#[async_trait]
impl PersistenceUnitFactory for SpyFactory {
    fn id(&self) -> FactoryId {
        self.id
    }

    async fn create_handle(&self) -> PersistenceResult<Arc<dyn ResourceHandle>> {
        self.journal.write().push(Call::CreateHandle);
        Ok(self.open_handle())
    }
}

pub struct SpyHandle {
    factory: FactoryId,
    behavior: Behavior,
    journal: Journal,
    active: AtomicBool,
    closed: AtomicBool,
}

impl SpyHandle {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Simulate a transaction started outside the aspect
    pub fn force_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }

    fn record(&self, call: Call) {
        self.journal.write().push(call);
    }
}

#[async_trait]
impl ResourceHandle for SpyHandle {
    fn factory_id(&self) -> FactoryId {
        self.factory
    }

    async fn configure(&self, options: &SessionOptions) -> PersistenceResult<()> {
        self.record(Call::Configure(*options));
        if self.behavior.fail_configure {
            return Err(PersistenceError::UnsupportedUnwrap);
        }
        Ok(())
    }

    async fn begin(&self) -> PersistenceResult<()> {
        self.record(Call::Begin);
        if self.behavior.fail_begin {
            return Err(PersistenceError::TransactionInProgress);
        }
        if !self.behavior.inactive_transactions {
            self.active.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn commit(&self) -> PersistenceResult<()> {
        self.record(Call::Commit);
        if self.behavior.fail_commit {
            return Err(PersistenceError::CommitFailed("constraint violated".into()));
        }
        self.active.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&self) -> PersistenceResult<()> {
        self.record(Call::Rollback);
        self.active.store(false, Ordering::SeqCst);
        if self.behavior.fail_rollback {
            return Err(PersistenceError::RollbackFailed("connection reset".into()));
        }
        Ok(())
    }

    fn transaction_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    async fn execute(&self, operation: Operation) -> PersistenceResult<Outcome> {
        self.record(Call::Execute(operation.name()));
        if self.behavior.fail_execute {
            return Err(PersistenceError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(match operation {
            Operation::Find(_) => Outcome::Found(None),
            Operation::Contains(_) => Outcome::Contains(false),
            Operation::NativeQuery(_) => Outcome::Rows(1),
            Operation::Merge(record) => Outcome::Merged(record),
            Operation::Refresh(key) => Outcome::Found(Some(scoped_unit_of_work::Record::new(
                key.entity,
                key.id,
                serde_json::Value::Null,
            ))),
            Operation::Persist(_)
            | Operation::Remove(_)
            | Operation::Flush
            | Operation::JoinTransaction => Outcome::Unit,
        })
    }

    fn close(&self) {
        self.record(Call::Close);
        self.closed.store(true, Ordering::SeqCst);
        self.active.store(false, Ordering::SeqCst);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
