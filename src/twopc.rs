use std::sync::Arc;

use ahash::AHashMap as HashMap;
use log::{debug, error, warn};

use crate::coprocessor::{
    self, BATCH_COMMIT_SECONDARY_ROWS, BATCH_PREWRITE_SECONDARY_ROWS, BatchCommitSecondaryRequest,
    BatchCommitSecondaryResponse, BatchGetRequest, BatchGetResponse, BatchPrewriteSecondaryRequest,
    BatchPrewriteSecondaryResponse, COMMIT_ROW, CommitRequest, CommitResponse, EraseLockRequest,
    EraseLockResponse, GET_LOCK_AND_ERASE, GetRequest, GetResponse, IS_LOCK_EXPIRED,
    LockExpiredRequest, LockExpiredResponse, PREWRITE_ROW, PrewriteConflict, PrewriteRequest,
    PrewriteResponse, SECONDARY_INDEX, SecondaryRow, THEMIS_BATCH_GET, THEMIS_GET,
};
use crate::data_store::cell::{ColumnCoordinate, ResultRow};
use crate::data_store::mutation_cache::{ColumnMutation, RowMutation};
use crate::errors::{Result, ThothError};
use crate::lock::Lock;
use crate::store::{Get, ServiceCall, Store};

/// Outcome of a batched secondary prewrite for one region.
#[derive(Debug, Default)]
pub struct BatchPrewriteOutcome {
    /// Rows held by another transaction's lock, keyed by row.
    pub locked: HashMap<Vec<u8>, Lock>,
    /// Rows with a write committed after our start timestamp.
    pub newer_write: Vec<Vec<u8>>,
    /// Rows whose individual retry failed outright. They may or may not hold
    /// our lock.
    pub failed: Vec<Vec<u8>>,
}

impl BatchPrewriteOutcome {
    pub fn is_clean(&self) -> bool {
        self.locked.is_empty() && self.newer_write.is_empty() && self.failed.is_empty()
    }

    /// True when `row` carries our lock after the call.
    pub fn prewrote(&self, row: &[u8]) -> bool {
        !self.locked.contains_key(row)
            && !self.newer_write.iter().any(|r| r == row)
            && !self.failed.iter().any(|r| r == row)
    }
}

/// Typed client of the transaction coprocessor.
///
/// Each method frames one request, sends it through `Store::service_call` to
/// the region that holds the row, and interprets the answer.
pub struct TwoPhaseRpc {
    store: Arc<dyn Store>,
}

impl TwoPhaseRpc {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    fn call<Req, Resp>(
        &self,
        method: &'static str,
        table: &[u8],
        row: &[u8],
        request: &Req,
    ) -> Result<Resp>
    where
        Req: serde::Serialize,
        Resp: serde::de::DeserializeOwned,
    {
        let call = ServiceCall {
            row: row.to_vec(),
            method,
            request: coprocessor::encode(request)?,
        };
        let response = self.store.service_call(table, &call)?;
        coprocessor::decode(&response)
    }

    pub fn themis_get(
        &self,
        table: &[u8],
        get: &Get,
        start_ts: u64,
        ignore_lock: bool,
    ) -> Result<ResultRow> {
        let request = GetRequest {
            get: get.clone(),
            start_ts,
            ignore_lock,
        };
        let response: GetResponse = self.call(THEMIS_GET, table, &get.row, &request)?;
        Ok(response.result)
    }

    pub fn themis_batch_get(
        &self,
        table: &[u8],
        gets: &[Get],
        start_ts: u64,
        ignore_lock: bool,
    ) -> Result<Vec<ResultRow>> {
        let Some(first) = gets.first() else {
            return Ok(Vec::new());
        };
        let request = BatchGetRequest {
            gets: gets.to_vec(),
            start_ts,
            ignore_lock,
        };
        let response: BatchGetResponse = self.call(THEMIS_BATCH_GET, table, &first.row, &request)?;
        Ok(response.results)
    }

    /// Prewrites one row. Returns the lock that blocked us, or `None` once
    /// our locks are in place.
    ///
    /// # Errors
    ///
    /// `ThothError::Retryable` when a column was committed at or after
    /// `prewrite_ts`.
    pub fn prewrite_row(
        &self,
        table: &[u8],
        row: &[u8],
        mutations: Vec<ColumnMutation>,
        prewrite_ts: u64,
        primary_lock: Option<&[u8]>,
        secondary_lock: Option<&[u8]>,
        primary_index: i32,
    ) -> Result<Option<Lock>> {
        let request = PrewriteRequest {
            row: row.to_vec(),
            mutations,
            prewrite_ts,
            primary_lock: primary_lock.unwrap_or_default().to_vec(),
            secondary_lock: secondary_lock.unwrap_or_default().to_vec(),
            primary_index,
        };
        let response: PrewriteResponse = self.call(PREWRITE_ROW, table, row, &request)?;
        match response.conflict {
            None => Ok(None),
            Some(conflict) => judge_conflict(table, row, prewrite_ts, conflict).map(Some),
        }
    }

    pub fn prewrite_secondary_row(
        &self,
        table: &[u8],
        row: &[u8],
        mutations: Vec<ColumnMutation>,
        prewrite_ts: u64,
        secondary_lock: Option<&[u8]>,
    ) -> Result<Option<Lock>> {
        self.prewrite_row(
            table,
            row,
            mutations,
            prewrite_ts,
            None,
            secondary_lock,
            SECONDARY_INDEX,
        )
    }

    /// Prewrites secondary rows of one region in a single call. Rows the
    /// region no longer serves (after a split) are retried one by one.
    pub fn batch_prewrite_secondary_rows(
        &self,
        table: &[u8],
        rows: &[&RowMutation],
        prewrite_ts: u64,
        secondary_lock: Option<&[u8]>,
    ) -> Result<BatchPrewriteOutcome> {
        let mut outcome = BatchPrewriteOutcome::default();
        let Some(last) = rows.last() else {
            return Ok(outcome);
        };
        let request = BatchPrewriteSecondaryRequest {
            rows: rows
                .iter()
                .map(|r| SecondaryRow {
                    row: r.row.clone(),
                    mutations: r.mutation_list(true),
                })
                .collect(),
            prewrite_ts,
            secondary_lock: secondary_lock.unwrap_or_default().to_vec(),
        };
        let response: BatchPrewriteSecondaryResponse =
            self.call(BATCH_PREWRITE_SECONDARY_ROWS, table, &last.row, &request)?;

        for row in response.rows_not_in_region {
            let Some(mutation) = rows.iter().find(|r| r.row == row) else {
                continue;
            };
            debug!("row {:?} left the region, prewriting it alone", String::from_utf8_lossy(&row));
            match self.prewrite_secondary_row(
                table,
                &row,
                mutation.mutation_list(true),
                prewrite_ts,
                secondary_lock,
            ) {
                Ok(None) => {}
                Ok(Some(lock)) => {
                    outcome.locked.insert(row, lock);
                }
                Err(ThothError::Retryable) => outcome.newer_write.push(row),
                Err(e) => {
                    warn!("prewrite of row {:?} failed: {e}", String::from_utf8_lossy(&row));
                    outcome.failed.push(row);
                }
            }
        }

        for (row, conflict) in response.conflicts {
            match judge_conflict(table, &row, prewrite_ts, conflict) {
                Ok(lock) => {
                    outcome.locked.insert(row, lock);
                }
                Err(ThothError::Retryable) => outcome.newer_write.push(row),
                Err(e) => return Err(e),
            }
        }
        Ok(outcome)
    }

    /// Commits one row.
    ///
    /// # Errors
    ///
    /// `ThothError::CommitRejected` when the store refuses the commit,
    /// typically because our lock is gone.
    pub fn commit_row(
        &self,
        table: &[u8],
        row: &[u8],
        mutations: Vec<ColumnMutation>,
        prewrite_ts: u64,
        commit_ts: u64,
        primary_index: i32,
    ) -> Result<()> {
        let request = CommitRequest {
            row: row.to_vec(),
            mutations,
            prewrite_ts,
            commit_ts,
            primary_index,
        };
        let response: CommitResponse = self.call(COMMIT_ROW, table, row, &request)?;
        if !response.ok {
            return Err(ThothError::CommitRejected {
                table: String::from_utf8_lossy(table).into_owned(),
                row: String::from_utf8_lossy(row).into_owned(),
                commit_ts,
                primary: primary_index != SECONDARY_INDEX,
            });
        }
        Ok(())
    }

    pub fn commit_secondary_row(
        &self,
        table: &[u8],
        row: &[u8],
        mutations: Vec<ColumnMutation>,
        prewrite_ts: u64,
        commit_ts: u64,
    ) -> Result<()> {
        self.commit_row(table, row, mutations, prewrite_ts, commit_ts, SECONDARY_INDEX)
    }

    /// Commits secondary rows of one region. Returns the rows the store
    /// refused to commit.
    pub fn batch_commit_secondary_rows(
        &self,
        table: &[u8],
        rows: &[&RowMutation],
        prewrite_ts: u64,
        commit_ts: u64,
    ) -> Result<Vec<Vec<u8>>> {
        let Some(last) = rows.last() else {
            return Ok(Vec::new());
        };
        let request = BatchCommitSecondaryRequest {
            rows: rows
                .iter()
                .map(|r| SecondaryRow {
                    row: r.row.clone(),
                    mutations: r.mutation_list(false),
                })
                .collect(),
            prewrite_ts,
            commit_ts,
        };
        let response: BatchCommitSecondaryResponse =
            self.call(BATCH_COMMIT_SECONDARY_ROWS, table, &last.row, &request)?;
        debug!(
            "batch commit of {} secondary rows, {} failed",
            rows.len(),
            response.failed_rows.len()
        );
        Ok(response.failed_rows)
    }

    /// Asks the region server holding `coordinate` whether a lock written at
    /// `ts` has outlived the server's lease.
    pub fn is_lock_expired(&self, coordinate: &ColumnCoordinate, ts: u64) -> Result<bool> {
        let request = LockExpiredRequest { timestamp: ts };
        let response: LockExpiredResponse =
            self.call(IS_LOCK_EXPIRED, &coordinate.table, &coordinate.row, &request)?;
        Ok(response.expired)
    }

    /// Reads and erases the lock of `coordinate` at exactly `prewrite_ts`.
    pub fn get_lock_and_erase(
        &self,
        coordinate: &ColumnCoordinate,
        prewrite_ts: u64,
    ) -> Result<Option<Lock>> {
        let request = EraseLockRequest {
            row: coordinate.row.clone(),
            column: coordinate.column.clone(),
            prewrite_ts,
        };
        let response: EraseLockResponse =
            self.call(GET_LOCK_AND_ERASE, &coordinate.table, &coordinate.row, &request)?;
        match response.lock {
            Some(bytes) if !bytes.is_empty() => {
                let mut lock = Lock::decode(&bytes)?;
                lock.set_coordinate(coordinate.clone());
                Ok(Some(lock))
            }
            _ => Ok(None),
        }
    }
}

fn judge_conflict(
    table: &[u8],
    row: &[u8],
    prewrite_ts: u64,
    conflict: PrewriteConflict,
) -> Result<Lock> {
    match conflict {
        PrewriteConflict::NewerWrite { column, commit_ts } => {
            error!(
                "write conflict on {}: commit at {commit_ts} is newer than prewrite {prewrite_ts}",
                ColumnCoordinate::new(table, row, column)
            );
            Err(ThothError::Retryable)
        }
        PrewriteConflict::Locked { column, lock } => {
            let mut lock = Lock::decode(&lock)?;
            lock.set_coordinate(ColumnCoordinate::new(table, row, column));
            Ok(lock)
        }
    }
}
