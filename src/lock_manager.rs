use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder};
use log::debug;

use crate::columns;
use crate::data_store::cell::ColumnCoordinate;
use crate::errors::Result;
use crate::lock::PrimaryLock;
use crate::lock::Lock;
use crate::store::{Delete, Get, Store};
use crate::twopc::TwoPhaseRpc;

/// Store-side bookkeeping used by lock cleanup.
///
/// Implementations must be `Send` and `Sync`; a commit calls into the lock
/// manager from its per-region worker threads.
pub trait LockManager: Send + Sync {
    /// True when `coordinate` carries a lock with a version in `[start_ts, end_ts]`.
    fn is_lock_exists(
        &self,
        coordinate: &ColumnCoordinate,
        start_ts: u64,
        end_ts: u64,
    ) -> Result<bool>;

    /// Commit timestamp of the write record that points at `prewrite_ts`,
    /// or 0 when the column holds none.
    fn get_commit_timestamp(&self, coordinate: &ColumnCoordinate, prewrite_ts: u64) -> Result<u64>;

    /// Atomically fetches and erases the primary lock at `prewrite_ts`.
    ///
    /// `Some` means the transaction never committed and the caller owns its
    /// rollback. `None` means the lock was already gone, so the caller must
    /// look for a commit record.
    fn clean_lock(
        &self,
        coordinate: &ColumnCoordinate,
        prewrite_ts: u64,
    ) -> Result<Option<PrimaryLock>>;

    /// Deletes the lock and the data cell written at `prewrite_ts`. Idempotent.
    fn erase_lock_and_data(&self, coordinate: &ColumnCoordinate, prewrite_ts: u64) -> Result<()>;
}

/// Lock manager backed by plain store reads and deletes plus the
/// `getLockAndErase` coprocessor call.
pub struct StoreLockManager {
    rpc: Arc<TwoPhaseRpc>,
}

impl StoreLockManager {
    pub fn new(rpc: Arc<TwoPhaseRpc>) -> Self {
        Self { rpc }
    }

    fn store(&self) -> &Arc<dyn Store> {
        self.rpc.store()
    }
}

impl LockManager for StoreLockManager {
    fn is_lock_exists(
        &self,
        coordinate: &ColumnCoordinate,
        start_ts: u64,
        end_ts: u64,
    ) -> Result<bool> {
        let lock_column = columns::lock_column(&coordinate.column);
        let get = Get::new(coordinate.row.clone())
            .with_columns([lock_column])
            .time_range(start_ts, end_ts.saturating_add(1));
        let result = self.store().get(&coordinate.table, &get)?;
        Ok(!result.is_empty())
    }

    fn get_commit_timestamp(&self, coordinate: &ColumnCoordinate, prewrite_ts: u64) -> Result<u64> {
        let get = Get::new(coordinate.row.clone())
            .with_columns([
                columns::put_column(&coordinate.column),
                columns::delete_column(&coordinate.column),
            ])
            .time_range(prewrite_ts, u64::MAX)
            .max_versions(u32::MAX);
        let result = self.store().get(&coordinate.table, &get)?;
        for cell in &result.cells {
            if cell.value.len() == 8 && BigEndian::read_u64(&cell.value) == prewrite_ts {
                return Ok(cell.timestamp);
            }
        }
        Ok(0)
    }

    fn clean_lock(
        &self,
        coordinate: &ColumnCoordinate,
        prewrite_ts: u64,
    ) -> Result<Option<PrimaryLock>> {
        match self.rpc.get_lock_and_erase(coordinate, prewrite_ts)? {
            Some(Lock::Primary(primary)) => Ok(Some(primary)),
            Some(Lock::Secondary(_)) => {
                debug!("{coordinate} held a secondary lock where a primary was expected");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn erase_lock_and_data(&self, coordinate: &ColumnCoordinate, prewrite_ts: u64) -> Result<()> {
        let delete = Delete::new(coordinate.row.clone())
            .add_column_version(columns::lock_column(&coordinate.column), prewrite_ts)
            .add_column_version(coordinate.column.clone(), prewrite_ts);
        debug!("erase lock and data of {coordinate} at {prewrite_ts}");
        self.store().delete(&coordinate.table, &delete)
    }
}
