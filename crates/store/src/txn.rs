//! Nested transactions, savepoints, and recovery helpers.
//!
//! Only a root transaction owns a real pooled connection. A "nested"
//! transaction is logical: it runs against its parent's connection inside a
//! SQL `SAVEPOINT`, and tracks its own operation log and savepoint list
//! in memory. On commit, that log is spliced onto the parent's; on
//! rollback, the database-level `ROLLBACK TO SAVEPOINT` undoes its writes
//! and its log is discarded without touching the parent's. This is what
//! lets cascade deletes open a scratch transaction per phase without ever
//! opening a second database connection.

use ingest_core::error::{IngestError, Result};
use ingest_core::id::new_id;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sqlx::{Database, Pool, Transaction};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxnStatus {
    Active,
    Committed,
    RolledBack,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxnOp {
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavepointRecord {
    pub id: String,
    pub name: String,
    pub metadata: Option<HashMap<String, String>>,
    /// Index into the owning transaction's op log at the moment this
    /// savepoint was created; `rollbackToSavepoint` truncates back to it.
    ops_len_before: usize,
}

#[derive(Debug, Clone)]
pub struct TxnCtx {
    pub transaction_id: String,
}

struct TxnEntry<DB: Database> {
    parent: Option<String>,
    status: TxnStatus,
    ops: Vec<TxnOp>,
    savepoints: Vec<SavepointRecord>,
    /// `Some` only for an active root transaction; taken (set to `None`) on
    /// commit/rollback, since the underlying connection is released then.
    root: Option<Transaction<'static, DB>>,
    created_at: Instant,
    completed_at: Option<Instant>,
}

/// CLOSED/OPEN/HALF_OPEN circuit breaker usable around any fallible async op.
pub struct CircuitBreaker {
    failure_threshold: u32,
    reset_timeout: Duration,
    state: Mutex<CircuitState>,
}

struct CircuitState {
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    half_open: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitStatus {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            reset_timeout,
            state: Mutex::new(CircuitState {
                consecutive_failures: 0,
                opened_at: None,
                half_open: false,
            }),
        }
    }

    pub fn status(&self) -> CircuitStatus {
        let mut state = self.state.lock();
        if let Some(opened_at) = state.opened_at {
            if opened_at.elapsed() >= self.reset_timeout {
                state.half_open = true;
                return CircuitStatus::HalfOpen;
            }
            return CircuitStatus::Open;
        }
        CircuitStatus::Closed
    }

    pub async fn call<F, Fut, T>(&self, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if self.status() == CircuitStatus::Open {
            return Err(IngestError::dependency_unavailable("circuit breaker open"));
        }
        match op().await {
            Ok(v) => {
                let mut state = self.state.lock();
                state.consecutive_failures = 0;
                state.opened_at = None;
                state.half_open = false;
                Ok(v)
            }
            Err(e) => {
                let mut state = self.state.lock();
                state.consecutive_failures += 1;
                if state.half_open || state.consecutive_failures >= self.failure_threshold {
                    state.opened_at = Some(Instant::now());
                    state.half_open = false;
                }
                Err(e)
            }
        }
    }
}

/// `delay = min(maxDelay, base * backoff^attempt)`; jitter is added by the
/// caller (the retry scheduler owns jitter policy, §4.7).
pub fn exponential_backoff(attempt: u32, base_ms: u64, factor: f64, max_ms: u64) -> Duration {
    let raw = (base_ms as f64) * factor.powi(attempt as i32);
    Duration::from_millis(raw.min(max_ms as f64) as u64)
}

/// Retries `op` while `retriable` returns true, using exponential backoff,
/// up to `max_attempts` total tries (the first try plus `max_attempts - 1`
/// retries).
pub async fn retry_with_backoff<F, Fut, T>(
    max_attempts: u32,
    base_ms: u64,
    factor: f64,
    max_ms: u64,
    retriable: impl Fn(&IngestError) -> bool,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if attempt + 1 < max_attempts && retriable(&e) => {
                tokio::time::sleep(exponential_backoff(attempt, base_ms, factor, max_ms)).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Wraps `op` with a deadline; a timeout is surfaced as `IngestError::Timeout`.
pub async fn with_timeout<F, T>(duration: Duration, op: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(duration, op).await {
        Ok(result) => result,
        Err(_) => Err(IngestError::timeout(format!("operation exceeded {duration:?}"))),
    }
}

/// Runs `primary`; on failure falls back to `fallback` rather than
/// propagating the primary's error.
pub async fn execute_with_fallback<F1, F2, T>(primary: F1, fallback: F2) -> Result<T>
where
    F1: Future<Output = Result<T>>,
    F2: Future<Output = Result<T>>,
{
    match primary.await {
        Ok(v) => Ok(v),
        Err(_) => fallback.await,
    }
}

/// Nested transactions, savepoints, and idempotent commit/rollback for one
/// database backend. Instantiated once per `RelationalStore` binding
/// (`TransactionManager<sqlx::Sqlite>` or `TransactionManager<sqlx::Postgres>`).
pub struct TransactionManager<DB: Database> {
    pool: Pool<DB>,
    entries: Mutex<HashMap<String, TxnEntry<DB>>>,
    reaper_max_age: Duration,
}

impl<DB> TransactionManager<DB>
where
    DB: Database,
{
    pub fn new(pool: Pool<DB>) -> Self {
        Self {
            pool,
            entries: Mutex::new(HashMap::new()),
            reaper_max_age: Duration::from_secs(30 * 60),
        }
    }

    pub fn with_reaper_max_age(mut self, max_age: Duration) -> Self {
        self.reaper_max_age = max_age;
        self
    }

    /// Opens a root transaction, runs `f`, and commits or rolls back based
    /// on its result.
    pub async fn execute_in_transaction<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(TxnCtx) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let tx = self.pool.begin().await.map_err(IngestError::from)?;
        let id = new_id("tx");
        self.entries.lock().insert(
            id.clone(),
            TxnEntry {
                parent: None,
                status: TxnStatus::Active,
                ops: Vec::new(),
                savepoints: Vec::new(),
                root: Some(tx),
                created_at: Instant::now(),
                completed_at: None,
            },
        );

        let ctx = TxnCtx {
            transaction_id: id.clone(),
        };
        match f(ctx).await {
            Ok(value) => {
                self.commit(&id).await?;
                Ok(value)
            }
            Err(err) => {
                let _ = self.rollback(&id).await;
                Err(err)
            }
        }
    }

    /// Opens a logical nested transaction under `parent_id`. Never opens a
    /// second connection; runs inside a SQL savepoint on the parent's
    /// connection instead.
    pub async fn execute_in_nested_transaction<F, Fut, T>(
        &self,
        parent_id: &str,
        f: F,
    ) -> Result<T>
    where
        F: FnOnce(TxnCtx) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if !self.is_active(parent_id) {
            return Err(IngestError::internal(format!(
                "parent transaction {parent_id} is not active"
            )));
        }

        let auto_savepoint = format!("nested_{}", new_id("sp"));
        self.execute_raw_on_root(parent_id, &format!("SAVEPOINT {auto_savepoint}"))
            .await?;

        let child_id = new_id("tx");
        self.entries.lock().insert(
            child_id.clone(),
            TxnEntry {
                parent: Some(parent_id.to_string()),
                status: TxnStatus::Active,
                ops: Vec::new(),
                savepoints: Vec::new(),
                root: None,
                created_at: Instant::now(),
                completed_at: None,
            },
        );

        let ctx = TxnCtx {
            transaction_id: child_id.clone(),
        };
        match f(ctx).await {
            Ok(value) => {
                self.execute_raw_on_root(parent_id, &format!("RELEASE SAVEPOINT {auto_savepoint}"))
                    .await?;
                self.merge_nested_into_parent(&child_id, parent_id)?;
                Ok(value)
            }
            Err(err) => {
                let _ = self
                    .execute_raw_on_root(parent_id, &format!("ROLLBACK TO SAVEPOINT {auto_savepoint}"))
                    .await;
                self.discard_nested(&child_id)?;
                Err(err)
            }
        }
    }

    fn merge_nested_into_parent(&self, child_id: &str, parent_id: &str) -> Result<()> {
        let mut entries = self.entries.lock();
        let child = entries
            .remove(child_id)
            .ok_or_else(|| IngestError::internal("missing nested transaction"))?;
        let parent = entries
            .get_mut(parent_id)
            .ok_or_else(|| IngestError::internal("missing parent transaction"))?;
        parent.ops.extend(child.ops);
        parent.savepoints.extend(child.savepoints);
        Ok(())
    }

    fn discard_nested(&self, child_id: &str) -> Result<()> {
        let mut entries = self.entries.lock();
        if let Some(mut child) = entries.remove(child_id) {
            child.status = TxnStatus::RolledBack;
        }
        Ok(())
    }

    /// Records a logical operation against a transaction's op log. Callers
    /// (repository methods) call this alongside issuing real SQL so the
    /// nested-commit-merge invariant (§8.9) is observable without replaying
    /// queries.
    pub fn record_op(&self, tx_id: &str, description: impl Into<String>) {
        if let Some(entry) = self.entries.lock().get_mut(tx_id) {
            entry.ops.push(TxnOp {
                description: description.into(),
            });
        }
    }

    pub fn op_log(&self, tx_id: &str) -> Vec<TxnOp> {
        self.entries
            .lock()
            .get(tx_id)
            .map(|e| e.ops.clone())
            .unwrap_or_default()
    }

    pub async fn create_savepoint(
        &self,
        tx_id: &str,
        name: &str,
        metadata: Option<HashMap<String, String>>,
    ) -> Result<String> {
        let root_id = self.get_root_transaction_id(tx_id)?;
        self.execute_raw_on_root(&root_id, &format!("SAVEPOINT {name}")).await?;

        let sp_id = new_id("sp");
        let mut entries = self.entries.lock();
        let entry = entries
            .get_mut(tx_id)
            .ok_or_else(|| IngestError::internal("unknown transaction"))?;
        let ops_len_before = entry.ops.len();
        entry.savepoints.push(SavepointRecord {
            id: sp_id.clone(),
            name: name.to_string(),
            metadata,
            ops_len_before,
        });
        Ok(sp_id)
    }

    pub async fn release_savepoint(&self, tx_id: &str, savepoint_id: &str) -> Result<()> {
        let root_id = self.get_root_transaction_id(tx_id)?;
        let name = {
            let mut entries = self.entries.lock();
            let entry = entries
                .get_mut(tx_id)
                .ok_or_else(|| IngestError::internal("unknown transaction"))?;
            let idx = entry
                .savepoints
                .iter()
                .position(|sp| sp.id == savepoint_id)
                .ok_or_else(|| IngestError::not_found("savepoint", savepoint_id))?;
            entry.savepoints.remove(idx).name
        };
        self.execute_raw_on_root(&root_id, &format!("RELEASE SAVEPOINT {name}")).await
    }

    pub async fn rollback_to_savepoint(&self, tx_id: &str, savepoint_id: &str) -> Result<()> {
        let root_id = self.get_root_transaction_id(tx_id)?;
        let (name, ops_len_before) = {
            let entries = self.entries.lock();
            let entry = entries
                .get(tx_id)
                .ok_or_else(|| IngestError::internal("unknown transaction"))?;
            let sp = entry
                .savepoints
                .iter()
                .find(|sp| sp.id == savepoint_id)
                .ok_or_else(|| IngestError::not_found("savepoint", savepoint_id))?;
            (sp.name.clone(), sp.ops_len_before)
        };

        self.execute_raw_on_root(&root_id, &format!("ROLLBACK TO SAVEPOINT {name}"))
            .await?;

        let mut entries = self.entries.lock();
        let entry = entries
            .get_mut(tx_id)
            .ok_or_else(|| IngestError::internal("unknown transaction"))?;
        entry.ops.truncate(ops_len_before);
        // Drop savepoints created strictly after this one; the database has
        // already forgotten them.
        let keep_until = entry
            .savepoints
            .iter()
            .position(|sp| sp.id == savepoint_id)
            .map(|idx| idx + 1)
            .unwrap_or(entry.savepoints.len());
        entry.savepoints.truncate(keep_until);
        Ok(())
    }

    pub fn get_active_transactions(&self) -> Vec<String> {
        self.entries
            .lock()
            .iter()
            .filter(|(_, e)| e.status == TxnStatus::Active)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn get_savepoints(&self, tx_id: &str) -> Vec<SavepointRecord> {
        self.entries
            .lock()
            .get(tx_id)
            .map(|e| e.savepoints.clone())
            .unwrap_or_default()
    }

    pub fn is_nested(&self, tx_id: &str) -> bool {
        self.entries
            .lock()
            .get(tx_id)
            .map(|e| e.parent.is_some())
            .unwrap_or(false)
    }

    pub fn get_root_transaction_id(&self, tx_id: &str) -> Result<String> {
        let entries = self.entries.lock();
        let mut current = tx_id.to_string();
        loop {
            let entry = entries
                .get(&current)
                .ok_or_else(|| IngestError::internal(format!("unknown transaction {current}")))?;
            match &entry.parent {
                Some(parent) => current = parent.clone(),
                None => return Ok(current),
            }
        }
    }

    fn is_active(&self, tx_id: &str) -> bool {
        self.entries
            .lock()
            .get(tx_id)
            .map(|e| e.status == TxnStatus::Active)
            .unwrap_or(false)
    }

    /// Runs `f` against the real connection backing `tx_id`'s root
    /// transaction, for typed, parameter-bound queries. Repository methods
    /// use this instead of `execute_raw_on_root` whenever they need bind
    /// parameters rather than a literal SQL statement.
    pub async fn with_root_connection<F, Fut, T>(&self, tx_id: &str, f: F) -> Result<T>
    where
        F: FnOnce(&mut Transaction<'static, DB>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let root_id = self.get_root_transaction_id(tx_id)?;
        let mut root = {
            let mut entries = self.entries.lock();
            let entry = entries
                .get_mut(&root_id)
                .ok_or_else(|| IngestError::internal("missing root transaction"))?;
            entry
                .root
                .take()
                .ok_or_else(|| IngestError::internal("root transaction connection unavailable"))?
        };
        let result = f(&mut root).await;
        self.entries.lock().get_mut(&root_id).unwrap().root = Some(root);
        result
    }

    async fn execute_raw_on_root(&self, tx_id: &str, sql: &str) -> Result<()> {
        let root_id = self.get_root_transaction_id(tx_id)?;
        // The root's `sqlx::Transaction` cannot be cloned or shared across
        // an `.await` while the lock is held, so it is taken out briefly,
        // used, and put back; nested callers are serialized by this lock,
        // matching the "one connection per root" rule.
        let mut root = {
            let mut entries = self.entries.lock();
            let entry = entries
                .get_mut(&root_id)
                .ok_or_else(|| IngestError::internal("missing root transaction"))?;
            entry
                .root
                .take()
                .ok_or_else(|| IngestError::internal("root transaction connection unavailable"))?
        };
        let result = sqlx::query(sql).execute(&mut *root).await;
        self.entries.lock().get_mut(&root_id).unwrap().root = Some(root);
        result.map(|_| ()).map_err(IngestError::from)
    }

    async fn commit(&self, tx_id: &str) -> Result<()> {
        let root = {
            let mut entries = self.entries.lock();
            let entry = entries
                .get_mut(tx_id)
                .ok_or_else(|| IngestError::internal("unknown transaction"))?;
            entry.root.take()
        };
        if let Some(root) = root {
            root.commit().await.map_err(IngestError::from)?;
        }
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(tx_id) {
            entry.status = TxnStatus::Committed;
            entry.completed_at = Some(Instant::now());
        }
        Ok(())
    }

    async fn rollback(&self, tx_id: &str) -> Result<()> {
        let root = {
            let mut entries = self.entries.lock();
            let entry = entries
                .get_mut(tx_id)
                .ok_or_else(|| IngestError::internal("unknown transaction"))?;
            entry.root.take()
        };
        if let Some(root) = root {
            root.rollback().await.map_err(IngestError::from)?;
        }
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(tx_id) {
            entry.status = TxnStatus::RolledBack;
            entry.completed_at = Some(Instant::now());
        }
        Ok(())
    }

    /// Drops completed transaction bookkeeping older than `maxAge`. Actual
    /// connections are already released at commit/rollback time; this only
    /// bounds the size of the in-memory ledger.
    pub fn reap(&self) {
        let max_age = self.reaper_max_age;
        self.entries.lock().retain(|_, entry| {
            entry
                .completed_at
                .map(|t| t.elapsed() < max_age)
                .unwrap_or(true)
        });
    }

    pub fn spawn_reaper(self: &Arc<Self>, period: Duration) -> tokio::task::JoinHandle<()>
    where
        DB: 'static,
        DB::Connection: Send,
    {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                manager.reap();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_bounded_by_max() {
        let d = exponential_backoff(10, 1000, 2.0, 60_000);
        assert_eq!(d, Duration::from_millis(60_000));
    }

    #[test]
    fn backoff_grows_with_attempt() {
        let a = exponential_backoff(0, 1000, 2.0, 60_000);
        let b = exponential_backoff(1, 1000, 2.0, 60_000);
        assert!(b > a);
    }

    #[tokio::test]
    async fn circuit_breaker_opens_after_threshold() {
        let breaker = CircuitBreaker::new(2, Duration::from_millis(50));
        for _ in 0..2 {
            let _ = breaker
                .call(|| async { Err::<(), _>(IngestError::internal("boom")) })
                .await;
        }
        assert_eq!(breaker.status(), CircuitStatus::Open);
    }

    #[tokio::test]
    async fn circuit_breaker_half_opens_after_timeout() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(10));
        let _ = breaker
            .call(|| async { Err::<(), _>(IngestError::internal("boom")) })
            .await;
        assert_eq!(breaker.status(), CircuitStatus::Open);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(breaker.status(), CircuitStatus::HalfOpen);
    }

    #[tokio::test]
    async fn with_timeout_surfaces_timeout_error() {
        let result: Result<()> = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(IngestError::Timeout(_))));
    }

    #[tokio::test]
    async fn fallback_runs_only_on_primary_failure() {
        let result = execute_with_fallback(
            async { Err::<i32, _>(IngestError::internal("boom")) },
            async { Ok(42) },
        )
        .await
        .unwrap();
        assert_eq!(result, 42);
    }
}
