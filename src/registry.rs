use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::handle::PersistenceUnitFactory;
use crate::shared::SharedHandle;
use crate::unit_of_work::DEFAULT_UNIT_NAME;
use crate::{PersistenceError, PersistenceResult};

struct RegisteredUnit {
    factory: Arc<dyn PersistenceUnitFactory>,
    shared: SharedHandle,
}

/// Process-wide map of persistence unit names to their factories.
///
/// Registration is expected during startup; lookups afterwards only take the
/// read lock.
#[derive(Default)]
pub struct FactoryRegistry {
    units: RwLock<HashMap<String, RegisteredUnit>>,
}

impl FactoryRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under a unique name and return its shared handle.
    pub fn register(
        &self,
        name: impl Into<String>,
        factory: Arc<dyn PersistenceUnitFactory>,
    ) -> PersistenceResult<SharedHandle> {
        let name = name.into();
        let mut units = self.units.write();
        if units.contains_key(&name) {
            return Err(PersistenceError::DuplicateUnit(name));
        }

        let shared = SharedHandle::new(name.clone(), factory.id());
        info!(unit = %name, factory = %factory.id(), "registered persistence unit");
        units.insert(
            name,
            RegisteredUnit {
                factory,
                shared: shared.clone(),
            },
        );
        Ok(shared)
    }

    /// Find the factory a unit of work targets.
    ///
    /// If the default name was declared and exactly one factory is
    /// registered, that factory is assumed to be the right one.
    pub fn resolve(&self, name: &str) -> PersistenceResult<Arc<dyn PersistenceUnitFactory>> {
        let units = self.units.read();
        if let Some(unit) = units.get(name) {
            return Ok(unit.factory.clone());
        }
        if name == DEFAULT_UNIT_NAME && units.len() == 1 {
            if let Some(unit) = units.values().next() {
                return Ok(unit.factory.clone());
            }
        }
        Err(PersistenceError::UnregisteredUnit(name.to_string()))
    }

    /// The shared handle built when `name` was registered.
    pub fn shared_handle(&self, name: &str) -> PersistenceResult<SharedHandle> {
        self.units
            .read()
            .get(name)
            .map(|unit| unit.shared.clone())
            .ok_or_else(|| PersistenceError::UnregisteredUnit(name.to_string()))
    }

    /// Names of all registered units, in no particular order.
    pub fn names(&self) -> Vec<String> {
        self.units.read().keys().cloned().collect()
    }

    /// Number of registered units.
    pub fn len(&self) -> usize {
        self.units.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.read().is_empty()
    }
}
