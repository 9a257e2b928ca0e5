use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::{PersistenceError, PersistenceResult};

/// Identity of one configured persistence unit.
///
/// Stable for the lifetime of the factory that minted it; bindings in an
/// [`ExecutionContext`](crate::ExecutionContext) are keyed by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FactoryId(Uuid);

impl FactoryId {
    /// Mint a fresh, random identity.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for FactoryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FactoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Second-level cache interaction for a handle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
    #[default]
    Normal,
    Ignore,
    Get,
    Put,
    Refresh,
}

/// When pending changes are pushed to the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlushMode {
    #[default]
    Auto,
    Always,
    Commit,
    Manual,
}

/// Session policy applied to a freshly created handle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionOptions {
    pub read_only: bool,
    pub cache_mode: CacheMode,
    pub flush_mode: FlushMode,
}

/// Key of a single entity row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityKey {
    pub entity: String,
    pub id: Uuid,
}

impl EntityKey {
    pub fn new(entity: impl Into<String>, id: Uuid) -> Self {
        Self {
            entity: entity.into(),
            id,
        }
    }
}

/// An entity row: its key plus a JSON document.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub entity: String,
    pub id: Uuid,
    pub data: serde_json::Value,
}

impl Record {
    pub fn new(entity: impl Into<String>, id: Uuid, data: serde_json::Value) -> Self {
        Self {
            entity: entity.into(),
            id,
            data,
        }
    }

    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.entity.clone(), self.id)
    }
}

/// Whether an operation may run outside an active transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Read,
    Mutating,
}

/// A persistence call forwarded to a bound handle.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Find(EntityKey),
    Contains(EntityKey),
    NativeQuery(String),
    Persist(Record),
    Merge(Record),
    Remove(EntityKey),
    Refresh(EntityKey),
    Flush,
    JoinTransaction,
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::Find(_) | Operation::Contains(_) | Operation::NativeQuery(_) => {
                OperationKind::Read
            }
            Operation::Persist(_)
            | Operation::Merge(_)
            | Operation::Remove(_)
            | Operation::Refresh(_)
            | Operation::Flush
            | Operation::JoinTransaction => OperationKind::Mutating,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operation::Find(_) => "find",
            Operation::Contains(_) => "contains",
            Operation::NativeQuery(_) => "native_query",
            Operation::Persist(_) => "persist",
            Operation::Merge(_) => "merge",
            Operation::Remove(_) => "remove",
            Operation::Refresh(_) => "refresh",
            Operation::Flush => "flush",
            Operation::JoinTransaction => "join_transaction",
        }
    }
}

/// Result of a forwarded persistence call.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Unit,
    Found(Option<Record>),
    Contains(bool),
    Rows(u64),
    Merged(Record),
}

/// A live persistence context bound to exactly one factory.
///
/// Not meant to be shared between concurrent operations: the aspect hands one
/// handle to one logical operation at a time. Methods take `&self` so the
/// handle can sit behind an `Arc` in an execution context.
#[async_trait]
pub trait ResourceHandle: Send + Sync {
    /// The factory this handle was created from.
    fn factory_id(&self) -> FactoryId;

    /// Apply read-only, cache and flush policy before any work starts.
    async fn configure(&self, options: &SessionOptions) -> PersistenceResult<()>;

    /// Start a transaction. Fails if one is already in progress.
    async fn begin(&self) -> PersistenceResult<()>;

    /// Commit the current transaction. It is no longer active afterwards,
    /// unless the commit failed and a rollback is still owed.
    async fn commit(&self) -> PersistenceResult<()>;

    /// Roll back the current transaction; it is inactive afterwards.
    async fn rollback(&self) -> PersistenceResult<()>;

    /// Whether a transaction is open and not yet finalized.
    fn transaction_active(&self) -> bool;

    /// Run one persistence call, inside the transaction if one is active.
    async fn execute(&self, operation: Operation) -> PersistenceResult<Outcome>;

    /// Release the handle. Any open transaction is abandoned.
    fn close(&self);

    /// The handle as `Any`, for downcasting to the provider type.
    fn as_any(&self) -> &dyn Any;

    /// Access the provider-specific object behind this handle.
    ///
    /// The default only knows the handle's own concrete type.
    fn unwrap(&self, target: TypeId) -> PersistenceResult<&dyn Any> {
        let any = self.as_any();
        if (*any).type_id() == target {
            Ok(any)
        } else {
            Err(PersistenceError::UnsupportedUnwrap)
        }
    }
}

/// Produces resource handles for one persistence unit.
#[async_trait]
pub trait PersistenceUnitFactory: Send + Sync {
    /// Identity shared by every handle this factory creates.
    fn id(&self) -> FactoryId;

    /// Open a new, unbound handle.
    async fn create_handle(&self) -> PersistenceResult<Arc<dyn ResourceHandle>>;
}
