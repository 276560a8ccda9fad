pub mod relational;
pub mod schema;
pub mod store_impl;
pub mod txn;

pub use relational::{DocListFilter, KeywordHit, PageRequest, RelationalStore};
pub use store_impl::SqlStore;
pub use txn::{CircuitBreaker, CircuitStatus, TransactionManager, TxnCtx};
