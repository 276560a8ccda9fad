//! Retry scheduling and per-document sync state tracking.

pub mod retry;
pub mod state_machine;

pub use retry::{RetryCallback, RetryScheduler, RetryStats, RetryStrategy};
pub use state_machine::{RetryDecision, SyncStateMachine};
