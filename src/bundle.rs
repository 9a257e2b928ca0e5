use std::sync::Arc;
use tracing::info;

use crate::config::PersistenceUnitConfig;
use crate::health::FactoryHealthCheck;
use crate::listener::PipelineListener;
use crate::postgres::PostgresUnitFactory;
use crate::shared::SharedHandle;
use crate::PersistenceResult;

/// One configured persistence unit, wired into a pipeline listener.
///
/// Connecting a bundle builds the unit's connection pool, registers it with
/// the listener under the configured name and prepares a health check from
/// the configured validation settings. Call [`close`](Self::close) on
/// shutdown to release the pool.
pub struct PersistenceBundle {
    name: String,
    factory: Arc<PostgresUnitFactory>,
    shared: SharedHandle,
    health: FactoryHealthCheck,
}

impl PersistenceBundle {
    /// Connect the unit described by `config` and register it with `listener`.
    ///
    /// If the name is already taken the freshly built pool is closed before
    /// the error is returned.
    pub async fn connect(
        config: &PersistenceUnitConfig,
        listener: &PipelineListener,
    ) -> PersistenceResult<Self> {
        let factory = Arc::new(PostgresUnitFactory::connect(config).await?);

        let shared = match listener.register_factory(config.name.clone(), factory.clone()) {
            Ok(shared) => shared,
            Err(e) => {
                factory.close().await;
                return Err(e);
            }
        };

        let health = FactoryHealthCheck::new(
            factory.clone(),
            config.validation_query.clone(),
            config.validation_timeout(),
        );

        info!(unit = %config.name, max_connections = config.max_connections, "persistence unit ready");
        Ok(Self {
            name: config.name.clone(),
            factory,
            shared,
            health,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The shared handle application code keeps for this unit.
    pub fn shared_handle(&self) -> &SharedHandle {
        &self.shared
    }

    pub fn health_check(&self) -> &FactoryHealthCheck {
        &self.health
    }

    pub fn factory(&self) -> &Arc<PostgresUnitFactory> {
        &self.factory
    }

    /// Close the unit's connection pool.
    ///
    /// The unit stays registered; units of work opened afterwards fail when
    /// they first touch the database.
    pub async fn close(&self) {
        self.factory.close().await;
    }
}
