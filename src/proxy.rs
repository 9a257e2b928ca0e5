use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use crate::aspect::{ReleaseMode, UnitOfWorkAspect};
use crate::context::ExecutionContext;
use crate::handle::PersistenceUnitFactory;
use crate::registry::FactoryRegistry;
use crate::unit_of_work::UnitOfWorkSpec;
use crate::{PersistenceError, PersistenceResult};

/// Creates unit-of-work aware wrappers for components used outside the
/// request pipeline, such as background jobs.
pub struct UnitOfWorkProxyFactory {
    registry: Arc<FactoryRegistry>,
}

impl UnitOfWorkProxyFactory {
    /// A factory serving a single persistence unit.
    pub fn new(
        name: impl Into<String>,
        factory: Arc<dyn PersistenceUnitFactory>,
    ) -> PersistenceResult<Self> {
        let registry = FactoryRegistry::new();
        registry.register(name, factory)?;
        Ok(Self::from_registry(Arc::new(registry)))
    }

    /// A factory sharing an existing registry, e.g. the pipeline listener's.
    pub fn from_registry(registry: Arc<FactoryRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<FactoryRegistry> {
        &self.registry
    }

    /// Wrap `target`. No method runs in a unit of work until declared.
    pub fn create<T>(&self, target: T) -> UnitOfWorkAware<T> {
        UnitOfWorkAware {
            target: Arc::new(target),
            registry: self.registry.clone(),
            methods: HashMap::new(),
        }
    }
}

/// A component whose declared methods run inside a unit of work.
///
/// There is no pipeline finish step out here, so the handle is closed and
/// unbound as soon as each call completes.
pub struct UnitOfWorkAware<T> {
    target: Arc<T>,
    registry: Arc<FactoryRegistry>,
    methods: HashMap<String, UnitOfWorkSpec>,
}

impl<T> UnitOfWorkAware<T> {
    /// Run `method` inside a unit of work described by `spec`.
    pub fn declare(mut self, method: impl Into<String>, spec: UnitOfWorkSpec) -> Self {
        self.methods.insert(method.into(), spec);
        self
    }

    pub fn target(&self) -> &Arc<T> {
        &self.target
    }

    /// Call `method` in a fresh execution context.
    pub async fn invoke<F, Fut, R, E>(&self, method: &str, call: F) -> Result<R, E>
    where
        F: FnOnce(Arc<T>, Arc<ExecutionContext>) -> Fut,
        Fut: Future<Output = Result<R, E>>,
        E: From<PersistenceError>,
    {
        self.invoke_in(Arc::new(ExecutionContext::new()), method, call)
            .await
    }

    /// Call `method` in the given execution context.
    pub async fn invoke_in<F, Fut, R, E>(
        &self,
        cx: Arc<ExecutionContext>,
        method: &str,
        call: F,
    ) -> Result<R, E>
    where
        F: FnOnce(Arc<T>, Arc<ExecutionContext>) -> Fut,
        Fut: Future<Output = Result<R, E>>,
        E: From<PersistenceError>,
    {
        let mut scope = AspectScope {
            aspect: UnitOfWorkAspect::new(self.registry.clone(), ReleaseMode::Immediate),
            cx: &cx,
        };
        scope
            .aspect
            .before_start(scope.cx, self.methods.get(method))
            .await?;

        match call(self.target.clone(), cx.clone()).await {
            Ok(value) => {
                scope.aspect.after_end(scope.cx).await?;
                Ok(value)
            }
            Err(e) => {
                scope.aspect.on_error(scope.cx).await;
                Err(e)
            }
        }
    }
}

/// Releases the handle of a call whose future was dropped mid-flight.
///
/// Out here there is no pipeline finish step to fall back on.
struct AspectScope<'a> {
    aspect: UnitOfWorkAspect,
    cx: &'a ExecutionContext,
}

impl Drop for AspectScope<'_> {
    fn drop(&mut self) {
        if self.aspect.is_open() {
            self.aspect.release_abandoned(self.cx);
        }
    }
}
