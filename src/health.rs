use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::handle::{Operation, PersistenceUnitFactory, ResourceHandle};
use crate::PersistenceResult;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Unhealthy(String),
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

/// Checks a persistence unit by running a validation query in its own
/// short transaction.
pub struct FactoryHealthCheck {
    factory: Arc<dyn PersistenceUnitFactory>,
    validation_query: String,
    timeout: Duration,
}

impl FactoryHealthCheck {
    pub fn new(
        factory: Arc<dyn PersistenceUnitFactory>,
        validation_query: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            factory,
            validation_query: validation_query.into(),
            timeout,
        }
    }

    pub fn validation_query(&self) -> &str {
        &self.validation_query
    }

    pub async fn check(&self) -> HealthStatus {
        match tokio::time::timeout(self.timeout, self.validate()).await {
            Ok(Ok(())) => HealthStatus::Healthy,
            Ok(Err(e)) => {
                warn!(factory = %self.factory.id(), error = %e, "health check failed");
                HealthStatus::Unhealthy(e.to_string())
            }
            Err(_) => {
                warn!(factory = %self.factory.id(), timeout = ?self.timeout, "health check timed out");
                HealthStatus::Unhealthy(format!("timed out after {:?}", self.timeout))
            }
        }
    }

    async fn validate(&self) -> PersistenceResult<()> {
        let handle = self.factory.create_handle().await?;
        let result = self.run_validation(handle.as_ref()).await;
        handle.close();
        result
    }

    async fn run_validation(&self, handle: &dyn ResourceHandle) -> PersistenceResult<()> {
        handle.begin().await?;
        match handle
            .execute(Operation::NativeQuery(self.validation_query.clone()))
            .await
        {
            Ok(_) => handle.commit().await,
            Err(e) => {
                if handle.transaction_active() {
                    if let Err(rollback) = handle.rollback().await {
                        warn!(error = %rollback, "rollback after failed validation query failed");
                    }
                }
                Err(e)
            }
        }
    }
}
