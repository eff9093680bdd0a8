//! Request and response messages of the transaction coprocessor.
//!
//! The store runs the conflict checks of prewrite and commit next to the
//! data. Messages are framed with bincode and carried by `Store::service_call`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::data_store::cell::{Column, ResultRow};
use crate::data_store::mutation_cache::ColumnMutation;
use crate::errors::Result;
use crate::store::Get;

pub const SERVICE_NAME: &str = "ThemisService";

pub const THEMIS_GET: &str = "themisGet";
pub const THEMIS_BATCH_GET: &str = "themisBatchGet";
pub const PREWRITE_ROW: &str = "prewriteRow";
pub const BATCH_PREWRITE_SECONDARY_ROWS: &str = "batchPrewriteSecondaryRows";
pub const COMMIT_ROW: &str = "commitRow";
pub const BATCH_COMMIT_SECONDARY_ROWS: &str = "batchCommitSecondaryRows";
pub const IS_LOCK_EXPIRED: &str = "isLockExpired";
pub const GET_LOCK_AND_ERASE: &str = "getLockAndErase";

/// `primary_index` of a row that holds no primary column.
pub const SECONDARY_INDEX: i32 = -1;

/// Snapshot read at `start_ts`. Unless `ignore_lock` is set, a row holding a
/// lock older than `start_ts` is answered with its lock cells instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetRequest {
    pub get: Get,
    pub start_ts: u64,
    pub ignore_lock: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetResponse {
    pub result: ResultRow,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchGetRequest {
    pub gets: Vec<Get>,
    pub start_ts: u64,
    pub ignore_lock: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchGetResponse {
    pub results: Vec<ResultRow>,
}

/// Prewrite of one row. On the primary row `primary_index` is the position
/// of the primary column in `mutations` and that column gets `primary_lock`;
/// every other column gets `secondary_lock` with its own mutation type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrewriteRequest {
    pub row: Vec<u8>,
    pub mutations: Vec<ColumnMutation>,
    pub prewrite_ts: u64,
    pub primary_lock: Vec<u8>,
    pub secondary_lock: Vec<u8>,
    pub primary_index: i32,
}

/// Why a row could not be prewritten.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrewriteConflict {
    /// Another transaction holds a lock on `column`.
    Locked { column: Column, lock: Vec<u8> },
    /// `column` was committed at or after our start timestamp.
    NewerWrite { column: Column, commit_ts: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrewriteResponse {
    pub conflict: Option<PrewriteConflict>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecondaryRow {
    pub row: Vec<u8>,
    pub mutations: Vec<ColumnMutation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchPrewriteSecondaryRequest {
    pub rows: Vec<SecondaryRow>,
    pub prewrite_ts: u64,
    pub secondary_lock: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchPrewriteSecondaryResponse {
    /// Rows that met a conflict. Rows absent here and from
    /// `rows_not_in_region` were prewritten.
    pub conflicts: Vec<(Vec<u8>, PrewriteConflict)>,
    /// Rows the region no longer serves; the client retries them one by one.
    pub rows_not_in_region: Vec<Vec<u8>>,
}

/// Turns the row's locks into write records. Values are not sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRequest {
    pub row: Vec<u8>,
    pub mutations: Vec<ColumnMutation>,
    pub prewrite_ts: u64,
    pub commit_ts: u64,
    pub primary_index: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitResponse {
    pub ok: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCommitSecondaryRequest {
    pub rows: Vec<SecondaryRow>,
    pub prewrite_ts: u64,
    pub commit_ts: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCommitSecondaryResponse {
    pub failed_rows: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockExpiredRequest {
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockExpiredResponse {
    pub expired: bool,
}

/// Atomically reads and removes the lock of one column at exactly `prewrite_ts`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EraseLockRequest {
    pub row: Vec<u8>,
    pub column: Column,
    pub prewrite_ts: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EraseLockResponse {
    pub lock: Option<Vec<u8>>,
}

pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>> {
    Ok(bincode::serialize(message)?)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(bincode::deserialize(bytes)?)
}
