use std::collections::HashMap;

use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::StoreError;
use splitbook_types::{BalanceStatus, InstanceId};

/// Balance persistence backend configuration.
#[derive(Debug, Clone)]
pub enum BalanceStorageConfig {
    /// Keep running balances in process memory only.
    Memory,
    /// Persist balances in PostgreSQL and hydrate on startup.
    Postgres {
        database_url: String,
        max_connections: u32,
    },
}

impl BalanceStorageConfig {
    pub fn memory() -> Self {
        Self::Memory
    }

    pub fn postgres(database_url: impl Into<String>, max_connections: u32) -> Self {
        Self::Postgres {
            database_url: database_url.into(),
            max_connections,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Postgres { .. } => "postgres",
        }
    }
}

impl Default for BalanceStorageConfig {
    fn default() -> Self {
        Self::Memory
    }
}

#[derive(Debug)]
enum BalanceBackend {
    Memory,
    Postgres(PostgresBalanceStore),
}

/// Outcome of one atomic balance update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceChange {
    pub previous_minor: i64,
    pub next_minor: i64,
}

/// One running carry-forward balance per smoothed player instance.
///
/// The in-memory map is authoritative for the process; a Postgres backend
/// mirrors every write inside a row-locked transaction so concurrent runs
/// against the same database cannot lose updates. All read-modify-write goes
/// through [`BalanceStore::apply`], serialized behind one async mutex.
#[derive(Debug)]
pub struct BalanceStore {
    balances: Mutex<HashMap<InstanceId, i64>>,
    backend: BalanceBackend,
}

impl BalanceStore {
    /// In-memory store with no persistence.
    pub fn in_memory() -> Self {
        Self {
            balances: Mutex::new(HashMap::new()),
            backend: BalanceBackend::Memory,
        }
    }

    pub async fn bootstrap(config: BalanceStorageConfig) -> Result<Self, StoreError> {
        match config {
            BalanceStorageConfig::Memory => Ok(Self::in_memory()),
            BalanceStorageConfig::Postgres {
                database_url,
                max_connections,
            } => {
                let store = PostgresBalanceStore::connect(&database_url, max_connections).await?;
                store.ensure_schema().await?;
                let balances = store.load_balances().await?;
                Ok(Self {
                    balances: Mutex::new(balances),
                    backend: BalanceBackend::Postgres(store),
                })
            }
        }
    }

    pub fn backend_label(&self) -> &'static str {
        match self.backend {
            BalanceBackend::Memory => "memory",
            BalanceBackend::Postgres(_) => "postgres",
        }
    }

    /// Current balance, zero when the instance has no row yet.
    pub async fn balance(&self, instance: InstanceId) -> i64 {
        self.balances
            .lock()
            .await
            .get(&instance)
            .copied()
            .unwrap_or(0)
    }

    /// Atomically read, transform, and write one instance's balance.
    ///
    /// The Postgres mirror is written before the in-memory commit; a failed
    /// write rolls back and leaves the in-memory value untouched.
    pub async fn apply<F>(&self, instance: InstanceId, f: F) -> Result<BalanceChange, StoreError>
    where
        F: FnOnce(i64) -> i64,
    {
        let mut balances = self.balances.lock().await;
        let previous_minor = balances.get(&instance).copied().unwrap_or(0);
        let next_minor = f(previous_minor);

        if let BalanceBackend::Postgres(store) = &self.backend {
            store
                .write_balance(instance, previous_minor, next_minor)
                .await?;
        }

        balances.insert(instance, next_minor);
        debug!(%instance, previous_minor, next_minor, "balance updated");
        Ok(BalanceChange {
            previous_minor,
            next_minor,
        })
    }

    pub async fn status(&self, instance: InstanceId, threshold_minor: i64) -> BalanceStatus {
        let balance_minor = self.balance(instance).await;
        BalanceStatus {
            balance_minor,
            threshold_minor,
            active: balance_minor != 0,
        }
    }
}

#[derive(Debug)]
struct PostgresBalanceStore {
    pool: PgPool,
}

impl PostgresBalanceStore {
    async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Storage(format!("postgres connect failed: {e}")))?;
        Ok(Self { pool })
    }

    async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS splitbook_balances (
                instance_id UUID PRIMARY KEY,
                balance_minor BIGINT NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("postgres schema create failed: {e}")))?;
        Ok(())
    }

    async fn load_balances(&self) -> Result<HashMap<InstanceId, i64>, StoreError> {
        let rows = sqlx::query("SELECT instance_id, balance_minor FROM splitbook_balances")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("postgres load failed: {e}")))?;

        let mut balances = HashMap::with_capacity(rows.len());
        for row in rows {
            let id: uuid::Uuid = row
                .try_get("instance_id")
                .map_err(|e| StoreError::Storage(format!("postgres decode instance_id failed: {e}")))?;
            let balance_minor: i64 = row
                .try_get("balance_minor")
                .map_err(|e| StoreError::Storage(format!("postgres decode balance_minor failed: {e}")))?;
            balances.insert(InstanceId(id), balance_minor);
        }
        Ok(balances)
    }

    /// Compare-and-swap write under a row lock. Another writer having moved
    /// the row since our read is surfaced as a storage error, never absorbed.
    async fn write_balance(
        &self,
        instance: InstanceId,
        expected_minor: i64,
        next_minor: i64,
    ) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Storage(format!("postgres begin failed: {e}")))?;

        let row = sqlx::query(
            "SELECT balance_minor FROM splitbook_balances WHERE instance_id = $1 FOR UPDATE",
        )
        .bind(instance.0)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| StoreError::Storage(format!("postgres select failed: {e}")))?;

        let stored_minor = match row {
            Some(row) => row
                .try_get::<i64, _>("balance_minor")
                .map_err(|e| StoreError::Storage(format!("postgres decode balance_minor failed: {e}")))?,
            None => 0,
        };

        if stored_minor != expected_minor {
            return Err(StoreError::Storage(format!(
                "concurrent balance update for {instance}: expected {expected_minor}, found {stored_minor}"
            )));
        }

        sqlx::query(
            r#"
            INSERT INTO splitbook_balances (instance_id, balance_minor, updated_at)
            VALUES ($1, $2, now())
            ON CONFLICT (instance_id)
            DO UPDATE SET balance_minor = EXCLUDED.balance_minor, updated_at = now()
            "#,
        )
        .bind(instance.0)
        .bind(next_minor)
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Storage(format!("postgres upsert failed: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| StoreError::Storage(format!("postgres commit failed: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_instance_reads_zero() {
        let store = BalanceStore::in_memory();
        assert_eq!(store.balance(InstanceId::new()).await, 0);
    }

    #[tokio::test]
    async fn apply_accumulates_from_zero() {
        let store = BalanceStore::in_memory();
        let instance = InstanceId::new();

        let change = store.apply(instance, |prev| prev + 7_500).await.unwrap();
        assert_eq!(change.previous_minor, 0);
        assert_eq!(change.next_minor, 7_500);

        let change = store.apply(instance, |prev| prev - 5_000).await.unwrap();
        assert_eq!(change.previous_minor, 7_500);
        assert_eq!(change.next_minor, 2_500);
        assert_eq!(store.balance(instance).await, 2_500);
    }

    #[tokio::test]
    async fn balances_are_tracked_per_instance() {
        let store = BalanceStore::in_memory();
        let a = InstanceId::new();
        let b = InstanceId::new();

        store.apply(a, |prev| prev + 100).await.unwrap();
        store.apply(b, |prev| prev - 200).await.unwrap();

        assert_eq!(store.balance(a).await, 100);
        assert_eq!(store.balance(b).await, -200);
    }

    #[tokio::test]
    async fn status_reports_activity() {
        let store = BalanceStore::in_memory();
        let instance = InstanceId::new();

        let idle = store.status(instance, 10_000).await;
        assert!(!idle.active);
        assert_eq!(idle.balance_minor, 0);

        store.apply(instance, |prev| prev + 2_500).await.unwrap();
        let active = store.status(instance, 10_000).await;
        assert!(active.active);
        assert_eq!(active.balance_minor, 2_500);
        assert_eq!(active.threshold_minor, 10_000);
    }

    #[test]
    fn config_labels() {
        assert_eq!(BalanceStorageConfig::memory().label(), "memory");
        assert_eq!(
            BalanceStorageConfig::postgres("postgres://localhost/settle", 4).label(),
            "postgres"
        );
    }
}
