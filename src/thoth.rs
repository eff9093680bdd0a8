use std::sync::Arc;

use crate::config::TxnConfig;
use crate::conflict::resolution::LockResolver;
use crate::errors::Result;
use crate::lock_manager::{LockManager, StoreLockManager};
use crate::oracle::Oracle;
use crate::store::Store;
use crate::transaction::Transaction;
use crate::twopc::TwoPhaseRpc;

/// Thoth Prelude
pub mod prelude {
    pub use crate::config::*;
    pub use crate::data_store::cell::*;
    pub use crate::errors::*;
    pub use crate::lock_manager::*;
    pub use crate::oracle::*;
    pub use crate::store::*;
    pub use crate::transaction::*;
    pub use crate::{
        ColumnMutationCache, Lock, LockResolver, PrimaryLock, RowMutation, Scanner,
        SecondaryLock, Thoth, TwoPhaseRpc,
    };
}

/// The main entry point: binds a store and an oracle and starts transactions.
pub struct Thoth {
    store: Arc<dyn Store>,
    oracle: Arc<dyn Oracle>,
    rpc: Arc<TwoPhaseRpc>,
    lock_manager: Arc<dyn LockManager>,
    config: TxnConfig,
}

impl Thoth {
    /// Creates an instance with the default [`TxnConfig`].
    pub fn new(store: Arc<dyn Store>, oracle: Arc<dyn Oracle>) -> Self {
        Self::with_config(store, oracle, TxnConfig::default())
    }

    pub fn with_config(store: Arc<dyn Store>, oracle: Arc<dyn Oracle>, config: TxnConfig) -> Self {
        let rpc = Arc::new(TwoPhaseRpc::new(Arc::clone(&store)));
        let lock_manager = Arc::new(StoreLockManager::new(Arc::clone(&rpc)));
        Self {
            store,
            oracle,
            rpc,
            lock_manager,
            config,
        }
    }

    /// Replaces the lock manager used for cleanup and rollback.
    pub fn with_lock_manager(mut self, lock_manager: Arc<dyn LockManager>) -> Self {
        self.lock_manager = lock_manager;
        self
    }

    pub fn config(&self) -> &TxnConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Starts a transaction at a fresh timestamp from the oracle.
    pub fn begin(&self) -> Result<Transaction> {
        let start_ts = self.oracle.get_timestamp()?;
        let resolver = LockResolver::new(
            Arc::clone(&self.rpc),
            Arc::clone(&self.lock_manager),
            Arc::clone(&self.oracle),
            &self.config,
        );
        Ok(Transaction::new(
            start_ts,
            self.config.clone(),
            Arc::clone(&self.store),
            Arc::clone(&self.oracle),
            Arc::clone(&self.rpc),
            resolver,
        ))
    }
}
