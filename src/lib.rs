pub mod errors;
pub mod config;
pub mod data_store;
pub mod columns;
pub mod lock;
pub mod store;
pub mod coprocessor;
pub mod oracle;
pub mod twopc;
pub mod lock_manager;
pub mod conflict;
pub mod transaction;
pub mod scanner;
pub mod thoth;

// Re-export key types and structs for easier access
pub use config::TxnConfig;
pub use conflict::resolution::LockResolver;
pub use data_store::cell::{Cell, Column, ColumnCoordinate, MutationType, ResultRow};
pub use data_store::mutation_cache::{ColumnMutationCache, RowMutation};
pub use errors::{Result, ThothError};
pub use lock::{Lock, PrimaryLock, SecondaryLock};
pub use lock_manager::{LockManager, StoreLockManager};
pub use oracle::{LocalOracle, Oracle};
pub use scanner::Scanner;
pub use store::{Delete, Get, Put, Scan, ScanCursor, Store};
pub use thoth::{prelude, Thoth};
pub use transaction::{Transaction, TransactionState};
pub use twopc::TwoPhaseRpc;
