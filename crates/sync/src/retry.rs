//! Delayed, classified, bounded retry scheduling.
//!
//! The scheduler's task map lives in memory only: a process restart loses
//! every armed timer. Recovery after a restart is not this module's job — it
//! is driven entirely by the sync state machine re-arming or re-queuing the
//! non-terminal `SyncJob` rows it loads from the relational store at
//! startup, so losing in-flight timers here is harmless.

use ingest_core::id::new_id;
use ingest_core::types::ErrorCategory;
use rand::Rng;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Backoff and retry-bound parameters for a single document's retry run.
#[derive(Debug, Clone, Copy)]
pub struct RetryStrategy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay_ms: 500,
            backoff_factor: 2.0,
            max_delay_ms: 60_000,
            jitter: true,
        }
    }
}

impl RetryStrategy {
    /// `delay = min(maxDelay, base * backoff^attempt) + jitter`.
    fn delay_for(&self, attempt: u32) -> Duration {
        let raw = self.base_delay_ms as f64 * self.backoff_factor.powi(attempt as i32);
        let bounded = raw.min(self.max_delay_ms as f64);
        let with_jitter = if self.jitter {
            let jitter_ms = rand::thread_rng().gen_range(0..=(bounded * 0.2) as u64);
            bounded as u64 + jitter_ms
        } else {
            bounded as u64
        };
        Duration::from_millis(with_jitter)
    }
}

pub type RetryCallback =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = Result<(), String>> + Send>> + Send + Sync>;

#[derive(Debug, Default, Clone)]
pub struct RetryStats {
    pub total_retries: u64,
    pub successful_retries: u64,
    pub failed_retries: u64,
    pub average_retry_time_ms: f64,
    pub retry_count_by_category: HashMap<&'static str, u64>,
    pub success_count_by_category: HashMap<&'static str, u64>,
    pub last_retry_at: Option<chrono::DateTime<chrono::Utc>>,
}

struct ScheduledTask {
    doc_id: String,
    category: ErrorCategory,
    armed_at: Instant,
    handle: JoinHandle<()>,
}

/// In-memory scheduler that arms a delayed callback per retry attempt.
pub struct RetryScheduler {
    tasks: Arc<dashmap::DashMap<String, ScheduledTask>>,
    stats: Arc<parking_lot::Mutex<RetryStats>>,
}

impl Default for RetryScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryScheduler {
    pub fn new() -> Self {
        Self {
            tasks: Arc::new(dashmap::DashMap::new()),
            stats: Arc::new(parking_lot::Mutex::new(RetryStats::default())),
        }
    }

    /// Arms `callback` to run after the strategy's backoff delay for
    /// `attempt_no`. Returns the task id immediately; the caller does not
    /// wait on the callback. `err` is the failure that triggered this retry,
    /// kept only for the arm-time log line.
    pub fn schedule(
        &self,
        doc_id: impl Into<String>,
        err: impl Into<String>,
        category: ErrorCategory,
        attempt_no: u32,
        strategy: RetryStrategy,
        callback: RetryCallback,
    ) -> String {
        let doc_id = doc_id.into();
        let task_id = new_id("retry");
        let delay = strategy.delay_for(attempt_no);
        debug!(doc_id = %doc_id, err = %err.into(), attempt = attempt_no, ?delay, "arming retry");

        let tasks = Arc::clone(&self.tasks);
        let stats = Arc::clone(&self.stats);
        let task_id_for_task = task_id.clone();
        let doc_id_for_log = doc_id.clone();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let started = Instant::now();
            let outcome = callback().await;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            {
                let mut stats = stats.lock();
                stats.total_retries += 1;
                stats.last_retry_at = Some(chrono::Utc::now());
                *stats
                    .retry_count_by_category
                    .entry(category.as_str())
                    .or_insert(0) += 1;
                let n = stats.total_retries as f64;
                stats.average_retry_time_ms =
                    stats.average_retry_time_ms + (elapsed_ms as f64 - stats.average_retry_time_ms) / n;

                match outcome {
                    Ok(()) => {
                        stats.successful_retries += 1;
                        *stats
                            .success_count_by_category
                            .entry(category.as_str())
                            .or_insert(0) += 1;
                    }
                    Err(err) => {
                        stats.failed_retries += 1;
                        warn!(doc_id = %doc_id_for_log, %err, "retry callback failed");
                    }
                }
            }

            tasks.remove(&task_id_for_task);
        });

        self.tasks.insert(
            task_id.clone(),
            ScheduledTask {
                doc_id,
                category,
                armed_at: Instant::now(),
                handle,
            },
        );

        task_id
    }

    /// Aborts a scheduled task before it fires. A no-op if the task already
    /// fired or does not exist.
    pub fn cancel(&self, task_id: &str) {
        if let Some((_, task)) = self.tasks.remove(task_id) {
            task.handle.abort();
        }
    }

    /// Aborts every scheduled task for `doc_id`.
    pub fn cancel_all_for_doc(&self, doc_id: &str) {
        let ids: Vec<String> = self
            .tasks
            .iter()
            .filter(|entry| entry.value().doc_id == doc_id)
            .map(|entry| entry.key().clone())
            .collect();
        for id in ids {
            self.cancel(&id);
        }
    }

    pub fn get_tasks_by_doc_id(&self, doc_id: &str) -> Vec<String> {
        self.tasks
            .iter()
            .filter(|entry| entry.value().doc_id == doc_id)
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn get_active_task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn stats(&self) -> RetryStats {
        self.stats.lock().clone()
    }

    /// Discards tasks armed more than 24h ago that never fired. A task this
    /// stale indicates the tokio runtime lost track of its timer (e.g. a
    /// suspended process); the sync state machine's own recovery path, not
    /// this leftover handle, is what eventually re-arms the document.
    pub fn sweep_stuck(&self) {
        const STUCK_AGE: Duration = Duration::from_secs(24 * 60 * 60);
        let now = Instant::now();
        let stuck: Vec<String> = self
            .tasks
            .iter()
            .filter(|entry| now.duration_since(entry.value().armed_at) > STUCK_AGE)
            .map(|entry| entry.key().clone())
            .collect();
        for id in &stuck {
            self.cancel(id);
        }
        if !stuck.is_empty() {
            debug!(count = stuck.len(), "swept stuck retry tasks");
        }
    }

    /// Spawns the periodic sweep loop; returns a handle the owner can abort
    /// on shutdown.
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                scheduler.sweep_stuck();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_strategy() -> RetryStrategy {
        RetryStrategy {
            max_retries: 3,
            base_delay_ms: 1,
            backoff_factor: 1.0,
            max_delay_ms: 5,
            jitter: false,
        }
    }

    #[tokio::test]
    async fn schedule_fires_callback_after_delay() {
        let scheduler = RetryScheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = Arc::clone(&count);

        let task_id = scheduler.schedule(
            "doc-1",
            "connection reset",
            ErrorCategory::TransientNetwork,
            0,
            fast_strategy(),
            Arc::new(move || {
                let count = Arc::clone(&count2);
                Box::pin(async move {
                    count.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            }),
        );
        assert!(!task_id.is_empty());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        let stats = scheduler.stats();
        assert_eq!(stats.total_retries, 1);
        assert_eq!(stats.successful_retries, 1);
    }

    #[tokio::test]
    async fn cancel_prevents_callback_from_firing() {
        let scheduler = RetryScheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = Arc::clone(&count);

        let strategy = RetryStrategy {
            base_delay_ms: 200,
            max_delay_ms: 200,
            jitter: false,
            ..fast_strategy()
        };
        let task_id = scheduler.schedule(
            "doc-1",
            "timed out",
            ErrorCategory::Timeout,
            0,
            strategy,
            Arc::new(move || {
                let count = Arc::clone(&count2);
                Box::pin(async move {
                    count.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            }),
        );

        scheduler.cancel(&task_id);
        tokio::time::sleep(Duration::from_millis(260)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancel_all_for_doc_clears_only_that_docs_tasks() {
        let scheduler = RetryScheduler::new();
        let strategy = RetryStrategy {
            base_delay_ms: 200,
            max_delay_ms: 200,
            jitter: false,
            ..fast_strategy()
        };
        let noop: RetryCallback = Arc::new(|| Box::pin(async { Ok(()) }));

        scheduler.schedule("doc-a", "err", ErrorCategory::Timeout, 0, strategy, Arc::clone(&noop));
        scheduler.schedule("doc-a", "err", ErrorCategory::Timeout, 1, strategy, Arc::clone(&noop));
        scheduler.schedule("doc-b", "err", ErrorCategory::Timeout, 0, strategy, Arc::clone(&noop));

        assert_eq!(scheduler.get_active_task_count(), 3);
        scheduler.cancel_all_for_doc("doc-a");
        assert_eq!(scheduler.get_active_task_count(), 1);
        assert_eq!(scheduler.get_tasks_by_doc_id("doc-b").len(), 1);
    }

    #[tokio::test]
    async fn failed_callback_is_counted_separately() {
        let scheduler = RetryScheduler::new();
        let failing: RetryCallback = Arc::new(|| Box::pin(async { Err("boom".to_string()) }));

        scheduler.schedule("doc-1", "rate limited", ErrorCategory::RateLimited, 0, fast_strategy(), failing);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let stats = scheduler.stats();
        assert_eq!(stats.failed_retries, 1);
        assert_eq!(stats.successful_retries, 0);
    }
}
