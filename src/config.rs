use serde::{Deserialize, Serialize};

/// Knobs of the transaction coordinator.
///
/// Every field has a default, so partial documents deserialize cleanly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TxnConfig {
    /// Prewrite and commit secondaries grouped by region, one thread per group.
    /// When false, secondary rows are handled one by one.
    pub concurrent_prewrite_and_commit: bool,
    /// Block `commit` until secondary commits finish.
    pub wait_secondary_commit: bool,
    /// Lease of a lock. After it runs out other clients may clean the lock.
    pub ttl_in_ms: u64,
    /// Let the region server holding a lock judge its expiry with its own
    /// clock and lease instead of the oracle.
    pub check_expiry_on_store: bool,
    /// Commit fails fast when more rows than this are buffered.
    pub max_rows_in_one_txn: usize,
    pub max_clean_lock_retry: usize,
    pub clean_lock_pause_ms: u64,
    /// Written into every lock for diagnostics.
    pub client_addr: String,
}

impl Default for TxnConfig {
    fn default() -> Self {
        Self {
            concurrent_prewrite_and_commit: true,
            wait_secondary_commit: false,
            ttl_in_ms: 5000,
            check_expiry_on_store: false,
            max_rows_in_one_txn: 50000,
            max_clean_lock_retry: 30,
            clean_lock_pause_ms: 300,
            client_addr: String::new(),
        }
    }
}
