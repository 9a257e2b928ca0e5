use async_trait::async_trait;
use sqlx::postgres::{PgConnection, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::any::{Any, TypeId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::PersistenceUnitConfig;
use crate::handle::{
    EntityKey, FactoryId, Operation, Outcome, PersistenceUnitFactory, Record, ResourceHandle,
    SessionOptions,
};
use crate::{PersistenceError, PersistenceResult};

/// Persistence unit backed by a PostgreSQL connection pool.
pub struct PostgresUnitFactory {
    id: FactoryId,
    pool: Arc<PgPool>,
}

impl PostgresUnitFactory {
    /// Create a factory over an existing connection pool.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self {
            id: FactoryId::new(),
            pool,
        }
    }

    /// Build the connection pool described by `config`.
    pub async fn connect(config: &PersistenceUnitConfig) -> PersistenceResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout())
            .connect(&config.url)
            .await?;
        Ok(Self::new(Arc::new(pool)))
    }

    pub fn pool(&self) -> &Arc<PgPool> {
        &self.pool
    }

    /// Close the pool, waiting for checked-out connections to come back.
    ///
    /// Handles created afterwards fail on their first database call.
    pub async fn close(&self) {
        self.pool.close().await;
        info!(factory = %self.id, "connection pool closed");
    }
}

#[async_trait]
impl PersistenceUnitFactory for PostgresUnitFactory {
    fn id(&self) -> FactoryId {
        self.id
    }

    async fn create_handle(&self) -> PersistenceResult<Arc<dyn ResourceHandle>> {
        Ok(Arc::new(PostgresHandle::new(self.id, self.pool.clone())))
    }
}

/// A persistence context over one pooled PostgreSQL transaction.
///
/// Entities live in one table per entity name with the layout
/// `(id UUID PRIMARY KEY, data JSONB NOT NULL)`. Statements are sent as soon
/// as they are issued, so `flush` has nothing left to do. Outside a
/// transaction each operation runs on its own pooled connection.
///
/// Of the session options only `read_only` has an effect: transactions are
/// started read-only, and so is every statement run outside one. PostgreSQL
/// has no second-level cache and no deferred flush, so `cache_mode` and
/// `flush_mode` are recorded but otherwise ignored.
pub struct PostgresHandle {
    factory: FactoryId,
    pool: Arc<PgPool>,
    tx: Mutex<Option<Transaction<'static, Postgres>>>,
    options: parking_lot::Mutex<SessionOptions>,
    active: AtomicBool,
    closed: AtomicBool,
}

impl PostgresHandle {
    fn new(factory: FactoryId, pool: Arc<PgPool>) -> Self {
        Self {
            factory,
            pool,
            tx: Mutex::new(None),
            options: parking_lot::Mutex::new(SessionOptions::default()),
            active: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    pub fn session_options(&self) -> SessionOptions {
        *self.options.lock()
    }

    fn ensure_open(&self) -> PersistenceResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(PersistenceError::HandleClosed)
        } else {
            Ok(())
        }
    }

    /// Takes ownership of the transaction, leaving None in its place.
    /// This should only be called when committing or rolling back.
    async fn take_transaction(&self) -> Option<Transaction<'static, Postgres>> {
        self.active.store(false, Ordering::SeqCst);
        self.tx.lock().await.take()
    }
}

#[async_trait]
impl ResourceHandle for PostgresHandle {
    fn factory_id(&self) -> FactoryId {
        self.factory
    }

    async fn configure(&self, options: &SessionOptions) -> PersistenceResult<()> {
        self.ensure_open()?;
        *self.options.lock() = *options;
        Ok(())
    }

    async fn begin(&self) -> PersistenceResult<()> {
        self.ensure_open()?;
        let read_only = self.options.lock().read_only;

        let mut guard = self.tx.lock().await;
        if guard.is_some() {
            return Err(PersistenceError::TransactionInProgress);
        }

        let mut tx = self.pool.begin().await?;
        if read_only {
            sqlx::query("SET TRANSACTION READ ONLY")
                .execute(&mut *tx)
                .await?;
        }
        *guard = Some(tx);
        self.active.store(true, Ordering::SeqCst);
        debug!(factory = %self.factory, read_only, "transaction started");
        Ok(())
    }

    async fn commit(&self) -> PersistenceResult<()> {
        let tx = self
            .take_transaction()
            .await
            .ok_or_else(|| PersistenceError::CommitFailed("no transaction in progress".into()))?;
        tx.commit()
            .await
            .map_err(|e| PersistenceError::CommitFailed(e.to_string()))
    }

    async fn rollback(&self) -> PersistenceResult<()> {
        let tx = self
            .take_transaction()
            .await
            .ok_or_else(|| PersistenceError::RollbackFailed("no transaction in progress".into()))?;
        tx.rollback()
            .await
            .map_err(|e| PersistenceError::RollbackFailed(e.to_string()))
    }

    fn transaction_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    async fn execute(&self, operation: Operation) -> PersistenceResult<Outcome> {
        self.ensure_open()?;

        let mut guard = self.tx.lock().await;
        if let Some(tx) = guard.as_mut() {
            return run(&mut **tx, operation).await;
        }
        drop(guard);

        if self.options.lock().read_only {
            // Outside a unit's transaction a read-only handle still gets a
            // read-only transaction per statement.
            let mut tx = self.pool.begin().await?;
            sqlx::query("SET TRANSACTION READ ONLY")
                .execute(&mut *tx)
                .await?;
            let outcome = run(&mut *tx, operation).await?;
            tx.commit().await?;
            return Ok(outcome);
        }

        let mut conn = self.pool.acquire().await?;
        run(&mut *conn, operation).await
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.active.store(false, Ordering::SeqCst);
        // Dropping an unfinished transaction makes sqlx roll it back.
        if let Ok(mut guard) = self.tx.try_lock() {
            guard.take();
        }
        debug!(factory = %self.factory, "handle closed");
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn unwrap(&self, target: TypeId) -> PersistenceResult<&dyn Any> {
        if target == TypeId::of::<PgPool>() {
            Ok(&*self.pool as &dyn Any)
        } else if target == TypeId::of::<PostgresHandle>() {
            Ok(self as &dyn Any)
        } else {
            Err(PersistenceError::UnsupportedUnwrap)
        }
    }
}

async fn run(conn: &mut PgConnection, operation: Operation) -> PersistenceResult<Outcome> {
    match operation {
        Operation::Find(key) => Ok(Outcome::Found(fetch(conn, &key).await?)),
        Operation::Contains(key) => Ok(Outcome::Contains(fetch(conn, &key).await?.is_some())),
        Operation::NativeQuery(sql) => {
            let result = sqlx::query(&sql).execute(&mut *conn).await?;
            Ok(Outcome::Rows(result.rows_affected()))
        }
        Operation::Persist(record) => {
            let sql = format!(
                "INSERT INTO {} (id, data) VALUES ($1, $2)",
                table_name(&record.entity)?
            );
            sqlx::query(&sql)
                .bind(record.id)
                .bind(Json(&record.data))
                .execute(&mut *conn)
                .await?;
            Ok(Outcome::Unit)
        }
        Operation::Merge(record) => {
            let sql = format!(
                "INSERT INTO {} (id, data) VALUES ($1, $2) \
                 ON CONFLICT (id) DO UPDATE SET data = EXCLUDED.data",
                table_name(&record.entity)?
            );
            sqlx::query(&sql)
                .bind(record.id)
                .bind(Json(&record.data))
                .execute(&mut *conn)
                .await?;
            Ok(Outcome::Merged(record))
        }
        Operation::Remove(key) => {
            let sql = format!("DELETE FROM {} WHERE id = $1", table_name(&key.entity)?);
            sqlx::query(&sql).bind(key.id).execute(&mut *conn).await?;
            Ok(Outcome::Unit)
        }
        Operation::Refresh(key) => match fetch(conn, &key).await? {
            Some(record) => Ok(Outcome::Found(Some(record))),
            None => Err(PersistenceError::EntityNotFound {
                entity: key.entity,
                id: key.id,
            }),
        },
        Operation::Flush | Operation::JoinTransaction => Ok(Outcome::Unit),
    }
}

async fn fetch(conn: &mut PgConnection, key: &EntityKey) -> PersistenceResult<Option<Record>> {
    let sql = format!("SELECT data FROM {} WHERE id = $1", table_name(&key.entity)?);
    let row = sqlx::query(&sql)
        .bind(key.id)
        .fetch_optional(&mut *conn)
        .await?;

    row.map(|row| -> PersistenceResult<Record> {
        let Json(data): Json<serde_json::Value> = row.try_get("data")?;
        Ok(Record::new(key.entity.clone(), key.id, data))
    })
    .transpose()
}

fn table_name(entity: &str) -> PersistenceResult<&str> {
    let mut chars = entity.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(entity)
    } else {
        Err(PersistenceError::InvalidIdentifier(entity.to_string()))
    }
}
