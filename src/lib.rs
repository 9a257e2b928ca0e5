//! Scoped Unit of Work Module
//!
//! This module binds a request pipeline to transactional persistence-unit
//! handles. Operations declare a [`UnitOfWorkSpec`]; the pipeline listener or
//! the out-of-pipeline proxy opens a handle for them, binds it into the
//! operation's [`ExecutionContext`], demarcates the transaction and releases
//! the handle on every exit path. Application code keeps a long-lived
//! [`SharedHandle`] that resolves to whichever handle the context has bound.

pub mod aspect;
pub mod bundle;
pub mod config;
pub mod context;
pub mod error;
pub mod handle;
pub mod health;
pub mod listener;
pub mod postgres;
pub mod proxy;
pub mod registry;
pub mod shared;
pub mod unit_of_work;

pub use aspect::{ReleaseMode, UnitOfWorkAspect};
pub use bundle::PersistenceBundle;
pub use config::PersistenceUnitConfig;
pub use context::ExecutionContext;
pub use error::{PersistenceError, PersistenceResult};
pub use handle::{
    CacheMode, EntityKey, FactoryId, FlushMode, Operation, OperationKind, Outcome,
    PersistenceUnitFactory, Record, ResourceHandle, SessionOptions,
};
pub use health::{FactoryHealthCheck, HealthStatus};
pub use listener::{MethodDeclaration, PipelineListener, RequestEvent, RequestListener};
pub use postgres::{PostgresHandle, PostgresUnitFactory};
pub use proxy::{UnitOfWorkAware, UnitOfWorkProxyFactory};
pub use registry::FactoryRegistry;
pub use shared::{SharedHandle, Unwrapped};
pub use unit_of_work::{UnitOfWorkSpec, DEFAULT_UNIT_NAME};
