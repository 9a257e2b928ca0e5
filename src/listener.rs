use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::aspect::{ReleaseMode, UnitOfWorkAspect};
use crate::context::ExecutionContext;
use crate::handle::PersistenceUnitFactory;
use crate::registry::FactoryRegistry;
use crate::shared::SharedHandle;
use crate::unit_of_work::UnitOfWorkSpec;
use crate::{PersistenceError, PersistenceResult};

/// Where a pipeline method's unit of work is declared.
///
/// A method may be declared on its definition (the route or trait method) or
/// on its handler, but not on both.
#[derive(Debug, Clone)]
pub struct MethodDeclaration {
    method: String,
    definition: Option<UnitOfWorkSpec>,
    handler: Option<UnitOfWorkSpec>,
}

impl MethodDeclaration {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            definition: None,
            handler: None,
        }
    }

    pub fn definition(mut self, spec: UnitOfWorkSpec) -> Self {
        self.definition = Some(spec);
        self
    }

    pub fn handler(mut self, spec: UnitOfWorkSpec) -> Self {
        self.handler = Some(spec);
        self
    }

    pub fn method(&self) -> &str {
        &self.method
    }
}

/// Lifecycle events delivered by the request pipeline, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestEvent<'a> {
    /// The matched method is about to be dispatched.
    MethodStart(&'a str),
    /// The method returned; response filters are about to run.
    ResponseFiltersStart,
    /// The method or a later stage failed.
    Exception,
    /// The response has been written. Fires exactly once per request.
    Finished,
}

/// Process-wide listener that gives declared pipeline methods a unit of work.
pub struct PipelineListener {
    registry: Arc<FactoryRegistry>,
    methods: Arc<RwLock<HashMap<String, UnitOfWorkSpec>>>,
}

impl Default for PipelineListener {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineListener {
    /// A listener with its own, empty registry.
    pub fn new() -> Self {
        Self::with_registry(Arc::new(FactoryRegistry::new()))
    }

    /// A listener sharing `registry`, e.g. with a proxy factory.
    pub fn with_registry(registry: Arc<FactoryRegistry>) -> Self {
        Self {
            registry,
            methods: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn registry(&self) -> &Arc<FactoryRegistry> {
        &self.registry
    }

    /// Register a persistence unit. Fails if the name is taken.
    pub fn register_factory(
        &self,
        name: impl Into<String>,
        factory: Arc<dyn PersistenceUnitFactory>,
    ) -> PersistenceResult<SharedHandle> {
        self.registry.register(name, factory)
    }

    /// Attach a unit of work to a pipeline method.
    pub fn declare(&self, declaration: MethodDeclaration) -> PersistenceResult<()> {
        let MethodDeclaration {
            method,
            definition,
            handler,
        } = declaration;

        let spec = match (definition, handler) {
            (Some(_), Some(_)) => return Err(PersistenceError::ConflictingDeclaration(method)),
            (Some(spec), None) | (None, Some(spec)) => spec,
            (None, None) => return Ok(()),
        };

        let mut methods = self.methods.write();
        if methods.contains_key(&method) {
            return Err(PersistenceError::ConflictingDeclaration(method));
        }
        info!(method = %method, unit = %spec.unit, "declared unit of work");
        methods.insert(method, spec);
        Ok(())
    }

    pub fn declaration(&self, method: &str) -> Option<UnitOfWorkSpec> {
        self.methods.read().get(method).cloned()
    }

    /// Start listening to a new request.
    pub fn on_request(&self) -> RequestListener {
        RequestListener {
            methods: self.methods.clone(),
            aspect: UnitOfWorkAspect::new(self.registry.clone(), ReleaseMode::Deferred),
            cx: Arc::new(ExecutionContext::new()),
            finished: false,
        }
    }
}

/// Per-request listener owning the request's execution context.
pub struct RequestListener {
    methods: Arc<RwLock<HashMap<String, UnitOfWorkSpec>>>,
    aspect: UnitOfWorkAspect,
    cx: Arc<ExecutionContext>,
    finished: bool,
}

impl RequestListener {
    /// The context handlers pass to shared handles.
    pub fn context(&self) -> &Arc<ExecutionContext> {
        &self.cx
    }

    pub async fn on_event(&mut self, event: RequestEvent<'_>) -> PersistenceResult<()> {
        match event {
            RequestEvent::MethodStart(method) => {
                let spec = self.methods.read().get(method).cloned();
                self.aspect.before_start(&self.cx, spec.as_ref()).await
            }
            RequestEvent::ResponseFiltersStart => self
                .aspect
                .after_end(&self.cx)
                .await
                .map_err(|e| PersistenceError::Mappable(Box::new(e))),
            RequestEvent::Exception => {
                self.aspect.on_error(&self.cx).await;
                Ok(())
            }
            RequestEvent::Finished => {
                self.finish();
                Ok(())
            }
        }
    }

    fn finish(&mut self) {
        self.aspect.abandon();
        self.cx.unbind_all(|handle| handle.close());
        self.finished = true;
    }
}

impl Drop for RequestListener {
    fn drop(&mut self) {
        if !self.finished && !self.cx.is_empty() {
            warn!(context = %self.cx.id(), "request dropped before finishing, releasing bound handles");
            self.finish();
        }
    }
}
