use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{info, warn};

use crate::config::TxnConfig;
use crate::data_store::cell::{ColumnCoordinate, MutationType};
use crate::data_store::mutation_cache::ColumnMutation;
use crate::errors::{Result, ThothError};
use crate::lock::{Lock, PrimaryLock, SecondaryLock};
use crate::lock_manager::LockManager;
use crate::oracle::Oracle;
use crate::twopc::TwoPhaseRpc;

/// Resolves locks left by other transactions.
///
/// A lock is rolled forward when its transaction's primary committed, rolled
/// back when the primary is gone without a commit record or has outlived its
/// lease, and waited on otherwise.
#[derive(Clone)]
pub struct LockResolver {
    rpc: Arc<TwoPhaseRpc>,
    lock_manager: Arc<dyn LockManager>,
    oracle: Arc<dyn Oracle>,
    ttl_in_ms: u64,
    expiry_on_store: bool,
    max_retry: usize,
    pause: Duration,
}

impl LockResolver {
    pub fn new(
        rpc: Arc<TwoPhaseRpc>,
        lock_manager: Arc<dyn LockManager>,
        oracle: Arc<dyn Oracle>,
        config: &TxnConfig,
    ) -> Self {
        Self {
            rpc,
            lock_manager,
            oracle,
            ttl_in_ms: config.ttl_in_ms,
            expiry_on_store: config.check_expiry_on_store,
            max_retry: config.max_clean_lock_retry,
            pause: Duration::from_millis(config.clean_lock_pause_ms),
        }
    }

    pub fn lock_manager(&self) -> &Arc<dyn LockManager> {
        &self.lock_manager
    }

    /// Cleans `lock`, pausing and retrying while its owner's lease is live.
    ///
    /// # Errors
    ///
    /// `ThothError::CleanLockFailed` once the retry budget is spent on a
    /// lock that never expired.
    pub fn clean_lock_with_retry(&self, reader_ts: u64, lock: &mut Lock) -> Result<()> {
        let Some(coordinate) = lock.coordinate().cloned() else {
            return Err(ThothError::InvalidLock("lock without coordinate".into()));
        };
        for _ in 0..self.max_retry {
            if !self
                .lock_manager
                .is_lock_exists(&coordinate, 0, lock.timestamp())?
            {
                return Ok(());
            }
            warn!(
                "lock exists txn: {reader_ts} lock-txn: {} column: {coordinate}",
                lock.timestamp()
            );
            match self.try_clean_lock(lock) {
                Err(ThothError::LockNotExpired) => {
                    warn!(
                        "lock of txn {} not expired, retry after {:?}",
                        lock.timestamp(),
                        self.pause
                    );
                    thread::sleep(self.pause);
                }
                other => return other,
            }
        }
        Err(ThothError::CleanLockFailed {
            attempts: self.max_retry,
        })
    }

    /// One cleanup attempt. Returns `ThothError::LockNotExpired` when the
    /// lock must be left alone for now.
    pub fn try_clean_lock(&self, lock: &mut Lock) -> Result<()> {
        if let Lock::Secondary(secondary) = &*lock {
            if self.resolve_by_primary(secondary)? {
                return Ok(());
            }
        }

        let expired = self.check_expired(lock)?;
        lock.set_expired(expired);
        if !expired {
            return Err(ThothError::LockNotExpired);
        }

        let primary = lock.primary();
        let Some(primary_coordinate) = primary.meta.coordinate.clone() else {
            return Err(ThothError::InvalidLock("primary without coordinate".into()));
        };
        let prewrite_ts = primary.meta.timestamp;

        match self.lock_manager.clean_lock(&primary_coordinate, prewrite_ts)? {
            Some(cleaned) => {
                info!("txn {prewrite_ts} never committed, rolling back its locks");
                self.lock_manager
                    .erase_lock_and_data(&primary_coordinate, prewrite_ts)?;
                for (coordinate, _) in cleaned.secondary_columns() {
                    self.lock_manager.erase_lock_and_data(coordinate, prewrite_ts)?;
                }
            }
            None => {
                let commit_ts = self
                    .lock_manager
                    .get_commit_timestamp(&primary_coordinate, prewrite_ts)?;
                self.finish_secondaries(&primary, commit_ts)?;
            }
        }
        Ok(())
    }

    fn check_expired(&self, lock: &Lock) -> Result<bool> {
        if !self.expiry_on_store {
            return Ok(self.oracle.is_expired(lock.timestamp(), self.ttl_in_ms));
        }
        let Some(coordinate) = lock.coordinate() else {
            return Err(ThothError::InvalidLock("lock without coordinate".into()));
        };
        self.rpc.is_lock_expired(coordinate, lock.timestamp())
    }

    /// Rolls a secondary forward when its primary already committed. Returns
    /// false when the primary still holds its lock or left no commit record;
    /// such a secondary is only touched once it expired.
    fn resolve_by_primary(&self, secondary: &SecondaryLock) -> Result<bool> {
        let prewrite_ts = secondary.meta.timestamp;
        if self
            .lock_manager
            .is_lock_exists(&secondary.primary, 0, prewrite_ts)?
        {
            return Ok(false);
        }
        let commit_ts = self
            .lock_manager
            .get_commit_timestamp(&secondary.primary, prewrite_ts)?;
        if commit_ts == 0 {
            return Ok(false);
        }
        self.finish_secondaries(&secondary.primary_lock(), commit_ts)?;
        Ok(true)
    }

    /// Rolls every secondary listed in `primary` forward at `commit_ts`, or
    /// erases them when the transaction has no commit record.
    fn finish_secondaries(&self, primary: &PrimaryLock, commit_ts: u64) -> Result<()> {
        let prewrite_ts = primary.meta.timestamp;
        if commit_ts > 0 {
            info!("txn {prewrite_ts} committed at {commit_ts}, rolling secondaries forward");
        } else {
            info!("txn {prewrite_ts} was rolled back, erasing its secondaries");
        }
        for (coordinate, mutation_type) in primary.secondary_columns() {
            if commit_ts > 0 {
                self.commit_forward(coordinate, *mutation_type, prewrite_ts, commit_ts)?;
            } else {
                self.lock_manager.erase_lock_and_data(coordinate, prewrite_ts)?;
            }
        }
        Ok(())
    }

    fn commit_forward(
        &self,
        coordinate: &ColumnCoordinate,
        mutation_type: MutationType,
        prewrite_ts: u64,
        commit_ts: u64,
    ) -> Result<()> {
        let mutation = ColumnMutation {
            column: coordinate.column.clone(),
            mutation_type,
            value: Vec::new(),
        };
        self.rpc.commit_secondary_row(
            &coordinate.table,
            &coordinate.row,
            vec![mutation],
            prewrite_ts,
            commit_ts,
        )
    }
}
