use std::sync::Arc;
use tracing::{debug, warn};

use crate::context::ExecutionContext;
use crate::handle::{PersistenceUnitFactory, ResourceHandle};
use crate::registry::FactoryRegistry;
use crate::unit_of_work::UnitOfWorkSpec;
use crate::PersistenceResult;

/// When the aspect gives its handle back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseMode {
    /// Leave the handle bound after the unit of work ends; the pipeline's
    /// finish step releases it. Lazy access during response serialization
    /// still finds a live handle.
    Deferred,
    /// Close and unbind the handle as soon as the unit of work ends.
    Immediate,
}

struct AspectState {
    spec: UnitOfWorkSpec,
    handle: Arc<dyn ResourceHandle>,
    factory: Arc<dyn PersistenceUnitFactory>,
}

/// Operations around a method that declared a unit of work.
///
/// Opens a handle, binds it into the caller's execution context and
/// optionally starts a transaction; later commits or rolls back. Create one
/// aspect per invocation.
pub struct UnitOfWorkAspect {
    registry: Arc<FactoryRegistry>,
    release: ReleaseMode,
    state: Option<AspectState>,
}

impl UnitOfWorkAspect {
    /// An idle aspect resolving units through `registry`.
    pub fn new(registry: Arc<FactoryRegistry>, release: ReleaseMode) -> Self {
        Self {
            registry,
            release,
            state: None,
        }
    }

    /// Whether a handle is currently held.
    pub fn is_open(&self) -> bool {
        self.state.is_some()
    }

    /// Open, bind and configure a handle for `spec`, starting a transaction
    /// if the unit is transactional. Does nothing without a declaration.
    ///
    /// On failure the handle is closed and unbound again.
    pub async fn before_start(
        &mut self,
        cx: &ExecutionContext,
        spec: Option<&UnitOfWorkSpec>,
    ) -> PersistenceResult<()> {
        let Some(spec) = spec else {
            return Ok(());
        };

        let factory = self.registry.resolve(&spec.unit)?;
        let handle = factory.create_handle().await?;

        if let Err(e) = open(cx, spec, &handle).await {
            handle.close();
            cx.unbind(factory.id());
            return Err(e);
        }

        debug!(
            context = %cx.id(),
            unit = %spec.unit,
            transactional = spec.transactional,
            "unit of work started"
        );
        self.state = Some(AspectState {
            spec: spec.clone(),
            handle,
            factory,
        });
        Ok(())
    }

    /// Commit the transaction, if any is still active.
    ///
    /// A failed commit is followed by a rollback and the commit error is
    /// returned.
    pub async fn after_end(&mut self, cx: &ExecutionContext) -> PersistenceResult<()> {
        // State stays in place until the transaction is finalized, so a
        // cancelled commit can still be released by `release_abandoned`.
        let Some(state) = self.state.as_ref() else {
            return Ok(());
        };

        let result = commit_transaction(state).await;
        if let Err(e) = &result {
            warn!(context = %cx.id(), unit = %state.spec.unit, error = %e, "commit failed, rolling back");
            rollback_transaction(state).await;
        }

        self.finish(cx);
        result
    }

    /// Roll back the transaction, if any is still active.
    pub async fn on_error(&mut self, cx: &ExecutionContext) {
        let Some(state) = self.state.as_ref() else {
            return;
        };

        rollback_transaction(state).await;
        self.finish(cx);
    }

    /// Close and unbind a handle whose unit of work never reached
    /// `after_end` or `on_error`, e.g. because the calling future was
    /// dropped. Closing abandons any open transaction.
    pub(crate) fn release_abandoned(&mut self, cx: &ExecutionContext) {
        if let Some(state) = self.state.take() {
            warn!(
                context = %cx.id(),
                unit = %state.spec.unit,
                "unit of work cancelled before completion, releasing handle"
            );
            release(cx, &state);
        }
    }

    fn finish(&mut self, cx: &ExecutionContext) {
        if let Some(state) = self.state.take() {
            if self.release == ReleaseMode::Immediate {
                release(cx, &state);
            }
        }
    }

    /// Forget the current state without touching the handle.
    ///
    /// Used when the execution context is being torn down wholesale.
    pub(crate) fn abandon(&mut self) {
        if let Some(state) = self.state.take() {
            if state.handle.transaction_active() {
                warn!(unit = %state.spec.unit, "unit of work abandoned with an active transaction");
            }
        }
    }
}

async fn open(
    cx: &ExecutionContext,
    spec: &UnitOfWorkSpec,
    handle: &Arc<dyn ResourceHandle>,
) -> PersistenceResult<()> {
    handle.configure(&spec.session_options()).await?;
    cx.bind(handle.clone());
    if spec.transactional {
        handle.begin().await?;
    }
    Ok(())
}

async fn commit_transaction(state: &AspectState) -> PersistenceResult<()> {
    if state.spec.transactional && state.handle.transaction_active() {
        state.handle.commit().await?;
        debug!(unit = %state.spec.unit, "transaction committed");
    }
    Ok(())
}

async fn rollback_transaction(state: &AspectState) {
    if state.spec.transactional && state.handle.transaction_active() {
        match state.handle.rollback().await {
            Ok(()) => debug!(unit = %state.spec.unit, "transaction rolled back"),
            Err(e) => warn!(unit = %state.spec.unit, error = %e, "rollback failed"),
        }
    }
}

fn release(cx: &ExecutionContext, state: &AspectState) {
    state.handle.close();
    cx.unbind(state.factory.id());
    debug!(context = %cx.id(), unit = %state.spec.unit, "resource handle released");
}
