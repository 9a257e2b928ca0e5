use crate::handle::FactoryId;

/// Error type for unit-of-work and shared-handle operations
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("No resource handle currently bound to execution context for persistence unit {factory}")]
    NoHandleBound { factory: FactoryId },

    #[error("Unregistered persistence unit: '{0}'")]
    UnregisteredUnit(String),

    #[error("Persistence unit '{0}' is already registered")]
    DuplicateUnit(String),

    #[error("Method '{0}' has more than one unit of work declaration")]
    ConflictingDeclaration(String),

    #[error("No resource handle with an active transaction available - cannot reliably process '{operation}' call")]
    TransactionRequired { operation: &'static str },

    #[error("Not allowed to obtain a transaction on a shared handle - declare a unit of work instead")]
    TransactionBoundaryMisuse,

    #[error("A transaction is already in progress on this handle")]
    TransactionInProgress,

    #[error("Transaction commit failed: {0}")]
    CommitFailed(String),

    #[error("Transaction rollback failed: {0}")]
    RollbackFailed(String),

    #[error("Resource handle is closed")]
    HandleClosed,

    #[error("Entity '{entity}' with id {id} not found")]
    EntityNotFound { entity: String, id: uuid::Uuid },

    #[error("Invalid SQL identifier: '{0}'")]
    InvalidIdentifier(String),

    #[error("Resource handle cannot be unwrapped to the requested type")]
    UnsupportedUnwrap,

    #[error("Unexpected outcome for '{0}' call")]
    UnexpectedOutcome(&'static str),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Unit of work failed while preparing the response: {0}")]
    Mappable(#[source] Box<PersistenceError>),
}

/// Result type for unit-of-work operations
pub type PersistenceResult<T> = Result<T, PersistenceError>;
