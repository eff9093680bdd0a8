//! Common utilities for Thoth integration tests.
#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use thoth::columns;
use thoth::coprocessor::{
    self, BatchCommitSecondaryRequest, BatchCommitSecondaryResponse, BatchGetRequest,
    BatchGetResponse, BatchPrewriteSecondaryRequest, BatchPrewriteSecondaryResponse,
    CommitRequest, CommitResponse, EraseLockRequest, EraseLockResponse, GetRequest, GetResponse,
    LockExpiredRequest, LockExpiredResponse, PrewriteConflict, PrewriteRequest,
    PrewriteResponse, BATCH_COMMIT_SECONDARY_ROWS, BATCH_PREWRITE_SECONDARY_ROWS, COMMIT_ROW,
    GET_LOCK_AND_ERASE, IS_LOCK_EXPIRED, PREWRITE_ROW, SECONDARY_INDEX, THEMIS_BATCH_GET,
    THEMIS_GET,
};
use thoth::data_store::mutation_cache::ColumnMutation;
use thoth::lock::LockMeta;
use thoth::prelude::*;
use thoth::store::{DeleteTarget, RegionInfo, ServiceCall};

pub const TABLE: &str = "accounts";
pub const FAMILY: &str = "cf";
pub const QUALIFIER: &str = "q";

// --- MemStore ---

type Versions = BTreeMap<u64, Vec<u8>>;
type RowData = BTreeMap<Column, Versions>;
type TableData = BTreeMap<Vec<u8>, RowData>;

/// An in-memory versioned column store that also runs the transaction
/// coprocessor, including region splits the client may not know about.
pub struct MemStore {
    tables: Mutex<BTreeMap<Vec<u8>, TableData>>,
    /// Region boundaries as the servers see them.
    server_splits: Mutex<Vec<Vec<u8>>>,
    /// Region boundaries cached by the client.
    client_splits: Mutex<Vec<Vec<u8>>>,
    clock: AtomicU64,
    open_cursors: Arc<AtomicUsize>,
    region_cache_cleans: AtomicUsize,
    /// What the servers answer to lock expiry checks.
    locks_expired: AtomicBool,
}

impl MemStore {
    pub fn new() -> Self {
        Self::with_splits(&[])
    }

    pub fn with_splits(splits: &[&[u8]]) -> Self {
        let splits: Vec<Vec<u8>> = splits.iter().map(|s| s.to_vec()).collect();
        Self {
            tables: Mutex::new(BTreeMap::new()),
            server_splits: Mutex::new(splits.clone()),
            client_splits: Mutex::new(splits),
            clock: AtomicU64::new(1),
            open_cursors: Arc::new(AtomicUsize::new(0)),
            region_cache_cleans: AtomicUsize::new(0),
            locks_expired: AtomicBool::new(false),
        }
    }

    pub fn set_locks_expired(&self, expired: bool) {
        self.locks_expired.store(expired, Ordering::SeqCst);
    }

    /// Splits a region on the server side only; the client keeps routing by
    /// its stale view until it cleans its region cache.
    pub fn split_region(&self, at: &[u8]) {
        let mut splits = self.server_splits.lock();
        splits.push(at.to_vec());
        splits.sort();
    }

    pub fn open_cursors(&self) -> usize {
        self.open_cursors.load(Ordering::SeqCst)
    }

    pub fn region_cache_cleans(&self) -> usize {
        self.region_cache_cleans.load(Ordering::SeqCst)
    }

    fn region_index(splits: &[Vec<u8>], row: &[u8]) -> usize {
        splits.iter().filter(|s| s.as_slice() <= row).count()
    }

    /// Every version of every cell of `family` in `row`.
    pub fn raw_cells(&self, table: &str, row: &str, family: &str) -> Vec<Cell> {
        let tables = self.tables.lock();
        let Some(row_data) = tables.get(table.as_bytes()).and_then(|t| t.get(row.as_bytes())) else {
            return Vec::new();
        };
        row_data
            .iter()
            .filter(|(column, _)| column.family == family.as_bytes())
            .flat_map(|(column, versions)| {
                versions
                    .iter()
                    .map(|(ts, value)| Cell::new(column.clone(), *ts, value.clone()))
            })
            .collect()
    }

    /// Number of lock cells left anywhere in `table`.
    pub fn lock_count(&self, table: &str) -> usize {
        let tables = self.tables.lock();
        tables
            .get(table.as_bytes())
            .map(|rows| {
                rows.values()
                    .flat_map(|row| row.iter())
                    .filter(|(column, _)| columns::is_lock_column(column))
                    .map(|(_, versions)| versions.len())
                    .sum::<usize>()
            })
            .unwrap_or(0)
    }

    fn with_row<R>(&self, table: &[u8], row: &[u8], f: impl FnOnce(&mut RowData) -> R) -> R {
        let mut tables = self.tables.lock();
        let row_data = tables
            .entry(table.to_vec())
            .or_default()
            .entry(row.to_vec())
            .or_default();
        f(row_data)
    }

    fn snapshot_get(&self, table: &[u8], get: &Get, start_ts: u64, ignore_lock: bool) -> ResultRow {
        let tables = self.tables.lock();
        match tables.get(table).and_then(|t| t.get(&get.row)) {
            Some(row_data) => {
                snapshot_row(row_data, &get.row, &get.columns, &get.families, start_ts, ignore_lock)
            }
            None => ResultRow::new(get.row.clone(), Vec::new()),
        }
    }
}

fn matches_request(column: &Column, columns: &[Column], families: &[Vec<u8>]) -> bool {
    (columns.is_empty() && families.is_empty())
        || columns.contains(column)
        || families.contains(&column.family)
}

fn latest_before(row_data: &RowData, column: &Column, before: u64) -> Option<(u64, Vec<u8>)> {
    row_data
        .get(column)
        .and_then(|versions| versions.range(..before).next_back())
        .map(|(ts, value)| (*ts, value.clone()))
}

/// Snapshot read at `start_ts`: the value of the newest write committed
/// before `start_ts`, or the lock cells when a lock older than `start_ts`
/// guards a requested column.
fn snapshot_row(
    row_data: &RowData,
    row: &[u8],
    wanted_columns: &[Column],
    families: &[Vec<u8>],
    start_ts: u64,
    ignore_lock: bool,
) -> ResultRow {
    let targets: BTreeSet<Column> = if !wanted_columns.is_empty() {
        wanted_columns.iter().cloned().collect()
    } else {
        row_data
            .keys()
            .filter(|c| columns::is_lock_column(c) || columns::is_write_column(c))
            .filter_map(columns::data_column)
            .filter(|c| families.is_empty() || families.contains(&c.family))
            .collect()
    };

    if !ignore_lock {
        let locks: Vec<Cell> = targets
            .iter()
            .filter_map(|c| {
                let lock_column = columns::lock_column(c);
                latest_before(row_data, &lock_column, start_ts)
                    .map(|(ts, value)| Cell::new(lock_column, ts, value))
            })
            .collect();
        if !locks.is_empty() {
            return ResultRow::new(row.to_vec(), locks);
        }
    }

    let mut cells = Vec::new();
    for column in &targets {
        let put = latest_before(row_data, &columns::put_column(column), start_ts);
        let delete = latest_before(row_data, &columns::delete_column(column), start_ts);
        let visible = match (put, delete) {
            (Some(p), Some(d)) if p.0 > d.0 => Some(p),
            (Some(p), None) => Some(p),
            _ => None,
        };
        let Some((_, prewrite)) = visible else {
            continue;
        };
        let Ok(raw) = <[u8; 8]>::try_from(prewrite.as_slice()) else {
            continue;
        };
        let prewrite_ts = u64::from_be_bytes(raw);
        if let Some(value) = row_data.get(column).and_then(|v| v.get(&prewrite_ts)) {
            cells.push(Cell::new(column.clone(), prewrite_ts, value.clone()));
        }
    }
    ResultRow::new(row.to_vec(), cells)
}

fn typed_secondary_lock(bytes: &[u8], mutation_type: MutationType) -> Vec<u8> {
    match Lock::decode(bytes) {
        Ok(mut lock) => {
            lock.meta_mut().mutation_type = mutation_type;
            lock.encode()
        }
        Err(_) => bytes.to_vec(),
    }
}

/// Server side of prewrite. Checks every column before writing anything.
fn prewrite_row(
    row_data: &mut RowData,
    mutations: &[ColumnMutation],
    prewrite_ts: u64,
    primary_lock: &[u8],
    secondary_lock: &[u8],
    primary_index: i32,
) -> Option<PrewriteConflict> {
    for m in mutations {
        for write_column in [columns::put_column(&m.column), columns::delete_column(&m.column)] {
            if let Some((ts, _)) = row_data
                .get(&write_column)
                .and_then(|v| v.range(prewrite_ts..).next_back())
            {
                return Some(PrewriteConflict::NewerWrite {
                    column: m.column.clone(),
                    commit_ts: *ts,
                });
            }
        }
        if let Some((ts, lock)) = row_data
            .get(&columns::lock_column(&m.column))
            .and_then(|v| v.iter().next_back())
        {
            if *ts != prewrite_ts {
                return Some(PrewriteConflict::Locked {
                    column: m.column.clone(),
                    lock: lock.clone(),
                });
            }
        }
    }

    for (i, m) in mutations.iter().enumerate() {
        let lock = if i as i32 == primary_index {
            primary_lock.to_vec()
        } else {
            typed_secondary_lock(secondary_lock, m.mutation_type)
        };
        row_data
            .entry(columns::lock_column(&m.column))
            .or_default()
            .insert(prewrite_ts, lock);
        if m.mutation_type == MutationType::Put {
            row_data
                .entry(m.column.clone())
                .or_default()
                .insert(prewrite_ts, m.value.clone());
        }
    }
    None
}

/// Server side of commit. A primary commit needs its lock to still exist.
fn commit_row(
    row_data: &mut RowData,
    mutations: &[ColumnMutation],
    prewrite_ts: u64,
    commit_ts: u64,
    primary_index: i32,
) -> bool {
    if primary_index != SECONDARY_INDEX {
        let Some(primary) = mutations.get(primary_index as usize) else {
            return false;
        };
        let locked = row_data
            .get(&columns::lock_column(&primary.column))
            .is_some_and(|v| v.contains_key(&prewrite_ts));
        if !locked {
            return false;
        }
    }
    for m in mutations {
        if let Some(write_column) = columns::write_column(&m.column, m.mutation_type) {
            row_data
                .entry(write_column)
                .or_default()
                .insert(commit_ts, prewrite_ts.to_be_bytes().to_vec());
        }
        let lock_column = columns::lock_column(&m.column);
        if let Some(versions) = row_data.get_mut(&lock_column) {
            versions.remove(&prewrite_ts);
            if versions.is_empty() {
                row_data.remove(&lock_column);
            }
        }
    }
    true
}

pub struct MemCursor {
    rows: VecDeque<ResultRow>,
    open: Arc<AtomicUsize>,
    closed: bool,
}

impl ScanCursor for MemCursor {
    fn next(&mut self) -> Result<Option<ResultRow>> {
        if self.closed {
            return Err(ThothError::StorageError("cursor closed".into()));
        }
        Ok(self.rows.pop_front())
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.open.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Store for MemStore {
    fn get(&self, table: &[u8], get: &Get) -> Result<ResultRow> {
        let tables = self.tables.lock();
        let Some(row_data) = tables.get(table).and_then(|t| t.get(&get.row)) else {
            return Ok(ResultRow::new(get.row.clone(), Vec::new()));
        };
        let range = get.time_range;
        let mut cells = Vec::new();
        if range.min < range.max {
            for (column, versions) in row_data {
                if !matches_request(column, &get.columns, &get.families) {
                    continue;
                }
                for (ts, value) in versions
                    .range(range.min..range.max)
                    .rev()
                    .take(get.max_versions as usize)
                {
                    cells.push(Cell::new(column.clone(), *ts, value.clone()));
                }
            }
        }
        Ok(ResultRow::new(get.row.clone(), cells))
    }

    fn put(&self, table: &[u8], put: &Put) -> Result<()> {
        self.with_row(table, &put.row, |row_data| {
            for cell in &put.cells {
                let ts = cell
                    .timestamp
                    .unwrap_or_else(|| self.clock.fetch_add(1, Ordering::SeqCst));
                row_data
                    .entry(cell.column.clone())
                    .or_default()
                    .insert(ts, cell.value.clone());
            }
        });
        Ok(())
    }

    fn delete(&self, table: &[u8], delete: &Delete) -> Result<()> {
        self.with_row(table, &delete.row, |row_data| {
            for target in &delete.targets {
                match target {
                    DeleteTarget::Family(family) => row_data.retain(|c, _| &c.family != family),
                    DeleteTarget::Column(column) => {
                        row_data.remove(column);
                    }
                    DeleteTarget::ColumnVersion(column, ts) => {
                        if let Some(versions) = row_data.get_mut(column) {
                            versions.remove(ts);
                            if versions.is_empty() {
                                row_data.remove(column);
                            }
                        }
                    }
                }
            }
        });
        Ok(())
    }

    fn open_scanner(&self, table: &[u8], scan: &Scan) -> Result<Box<dyn ScanCursor>> {
        let tables = self.tables.lock();
        let mut rows = VecDeque::new();
        if let Some(table_data) = tables.get(table) {
            for (row, row_data) in table_data {
                if !scan.contains_row(row) {
                    continue;
                }
                let result = match scan.start_ts() {
                    Some(start_ts) => {
                        snapshot_row(row_data, row, &scan.columns, &scan.families, start_ts, false)
                    }
                    None => ResultRow::new(
                        row.clone(),
                        row_data
                            .iter()
                            .filter(|(c, _)| matches_request(c, &scan.columns, &scan.families))
                            .filter_map(|(c, v)| {
                                let (ts, value) = v.iter().next_back()?;
                                Some(Cell::new(c.clone(), *ts, value.clone()))
                            })
                            .collect(),
                    ),
                };
                if !result.is_empty() {
                    rows.push_back(result);
                }
            }
        }
        self.open_cursors.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemCursor {
            rows,
            open: Arc::clone(&self.open_cursors),
            closed: false,
        }))
    }

    fn service_call(&self, table: &[u8], call: &ServiceCall) -> Result<Vec<u8>> {
        match call.method {
            THEMIS_GET => {
                let req: GetRequest = coprocessor::decode(&call.request)?;
                let result = self.snapshot_get(table, &req.get, req.start_ts, req.ignore_lock);
                coprocessor::encode(&GetResponse { result })
            }
            THEMIS_BATCH_GET => {
                let req: BatchGetRequest = coprocessor::decode(&call.request)?;
                let results = req
                    .gets
                    .iter()
                    .map(|g| self.snapshot_get(table, g, req.start_ts, req.ignore_lock))
                    .collect();
                coprocessor::encode(&BatchGetResponse { results })
            }
            PREWRITE_ROW => {
                let req: PrewriteRequest = coprocessor::decode(&call.request)?;
                let conflict = self.with_row(table, &req.row, |row_data| {
                    prewrite_row(
                        row_data,
                        &req.mutations,
                        req.prewrite_ts,
                        &req.primary_lock,
                        &req.secondary_lock,
                        req.primary_index,
                    )
                });
                coprocessor::encode(&PrewriteResponse { conflict })
            }
            BATCH_PREWRITE_SECONDARY_ROWS => {
                let req: BatchPrewriteSecondaryRequest = coprocessor::decode(&call.request)?;
                let splits = self.server_splits.lock().clone();
                let region = Self::region_index(&splits, &call.row);
                let mut response = BatchPrewriteSecondaryResponse {
                    conflicts: Vec::new(),
                    rows_not_in_region: Vec::new(),
                };
                for row in req.rows {
                    if Self::region_index(&splits, &row.row) != region {
                        response.rows_not_in_region.push(row.row);
                        continue;
                    }
                    let conflict = self.with_row(table, &row.row, |row_data| {
                        prewrite_row(
                            row_data,
                            &row.mutations,
                            req.prewrite_ts,
                            &[],
                            &req.secondary_lock,
                            SECONDARY_INDEX,
                        )
                    });
                    if let Some(conflict) = conflict {
                        response.conflicts.push((row.row, conflict));
                    }
                }
                coprocessor::encode(&response)
            }
            COMMIT_ROW => {
                let req: CommitRequest = coprocessor::decode(&call.request)?;
                let (prewrite_ts, commit_ts) = (req.prewrite_ts, req.commit_ts);
                let ok = self.with_row(table, &req.row, |row_data| {
                    commit_row(row_data, &req.mutations, prewrite_ts, commit_ts, req.primary_index)
                });
                coprocessor::encode(&CommitResponse { ok })
            }
            BATCH_COMMIT_SECONDARY_ROWS => {
                let req: BatchCommitSecondaryRequest = coprocessor::decode(&call.request)?;
                let mut failed_rows = Vec::new();
                for row in req.rows {
                    let (prewrite_ts, commit_ts) = (req.prewrite_ts, req.commit_ts);
                    let ok = self.with_row(table, &row.row, |row_data| {
                        commit_row(
                            row_data,
                            &row.mutations,
                            prewrite_ts,
                            commit_ts,
                            SECONDARY_INDEX,
                        )
                    });
                    if !ok {
                        failed_rows.push(row.row);
                    }
                }
                coprocessor::encode(&BatchCommitSecondaryResponse { failed_rows })
            }
            IS_LOCK_EXPIRED => {
                let _req: LockExpiredRequest = coprocessor::decode(&call.request)?;
                let expired = self.locks_expired.load(Ordering::SeqCst);
                coprocessor::encode(&LockExpiredResponse { expired })
            }
            GET_LOCK_AND_ERASE => {
                let req: EraseLockRequest = coprocessor::decode(&call.request)?;
                let lock = self.with_row(table, &req.row, |row_data| {
                    let lock_column = columns::lock_column(&req.column);
                    let versions = row_data.get_mut(&lock_column)?;
                    let lock = versions.remove(&req.prewrite_ts);
                    if versions.is_empty() {
                        row_data.remove(&lock_column);
                    }
                    lock
                });
                coprocessor::encode(&EraseLockResponse { lock })
            }
            other => Err(ThothError::StorageError(format!("unknown method {other}"))),
        }
    }

    fn locate_region(&self, table: &[u8], row: &[u8]) -> Result<RegionInfo> {
        let splits = self.client_splits.lock();
        let index = Self::region_index(&splits, row);
        Ok(RegionInfo {
            server: format!("server-{}", index % 2),
            name: format!("{}-{index}", String::from_utf8_lossy(table)),
            start_key: index.checked_sub(1).map(|i| splits[i].clone()).unwrap_or_default(),
            end_key: splits.get(index).cloned().unwrap_or_default(),
        })
    }

    fn clean_all_region_cache(&self) {
        self.region_cache_cleans.fetch_add(1, Ordering::SeqCst);
        let server = self.server_splits.lock().clone();
        *self.client_splits.lock() = server;
    }
}

// --- InterceptStore ---

/// Wraps a `MemStore`, records calls and injects faults.
pub struct InterceptStore {
    inner: Arc<MemStore>,
    calls: Mutex<Vec<String>>,
    prewrites: Mutex<Vec<PrewriteRequest>>,
    reject_primary_commit: AtomicBool,
    fail_secondary_commit: AtomicBool,
    refuse_batch_prewrite: AtomicBool,
    secondary_commit_gate: Mutex<Option<Receiver<()>>>,
}

impl InterceptStore {
    pub fn new(inner: Arc<MemStore>) -> Self {
        Self {
            inner,
            calls: Mutex::new(Vec::new()),
            prewrites: Mutex::new(Vec::new()),
            reject_primary_commit: AtomicBool::new(false),
            fail_secondary_commit: AtomicBool::new(false),
            refuse_batch_prewrite: AtomicBool::new(false),
            secondary_commit_gate: Mutex::new(None),
        }
    }

    /// Batch secondary prewrites are refused as sent to a region that moved.
    pub fn refuse_batch_prewrite(&self, on: bool) {
        self.refuse_batch_prewrite.store(on, Ordering::SeqCst);
    }

    /// Batch secondary commits block until the returned sender is dropped,
    /// or give up waiting after five seconds.
    pub fn hold_secondary_commits(&self) -> Sender<()> {
        let (tx, rx) = crossbeam_channel::bounded(0);
        *self.secondary_commit_gate.lock() = Some(rx);
        tx
    }

    /// The store answers every primary commit with a refusal.
    pub fn reject_primary_commit(&self, on: bool) {
        self.reject_primary_commit.store(on, Ordering::SeqCst);
    }

    /// Secondary commits fail with a transport error.
    pub fn fail_secondary_commit(&self, on: bool) {
        self.fail_secondary_commit.store(on, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn calls_of(&self, method: &str) -> usize {
        self.calls.lock().iter().filter(|m| *m == method).count()
    }

    pub fn reset_calls(&self) {
        self.calls.lock().clear();
        self.prewrites.lock().clear();
    }

    pub fn prewrite_requests(&self) -> Vec<PrewriteRequest> {
        self.prewrites.lock().clone()
    }

    fn record(&self, method: &str) {
        self.calls.lock().push(method.to_string());
    }
}

impl Store for InterceptStore {
    fn get(&self, table: &[u8], get: &Get) -> Result<ResultRow> {
        self.record("get");
        self.inner.get(table, get)
    }

    fn put(&self, table: &[u8], put: &Put) -> Result<()> {
        self.record("put");
        self.inner.put(table, put)
    }

    fn delete(&self, table: &[u8], delete: &Delete) -> Result<()> {
        self.record("delete");
        self.inner.delete(table, delete)
    }

    fn open_scanner(&self, table: &[u8], scan: &Scan) -> Result<Box<dyn ScanCursor>> {
        self.record("scan");
        self.inner.open_scanner(table, scan)
    }

    fn service_call(&self, table: &[u8], call: &ServiceCall) -> Result<Vec<u8>> {
        self.record(call.method);
        match call.method {
            PREWRITE_ROW => {
                let req: PrewriteRequest = coprocessor::decode(&call.request)?;
                self.prewrites.lock().push(req);
            }
            COMMIT_ROW => {
                let req: CommitRequest = coprocessor::decode(&call.request)?;
                let primary = req.primary_index != SECONDARY_INDEX;
                if primary && self.reject_primary_commit.load(Ordering::SeqCst) {
                    return coprocessor::encode(&CommitResponse { ok: false });
                }
                if !primary && self.fail_secondary_commit.load(Ordering::SeqCst) {
                    return Err(injected_commit_failure());
                }
            }
            BATCH_PREWRITE_SECONDARY_ROWS if self.refuse_batch_prewrite.load(Ordering::SeqCst) => {
                return Err(ThothError::WrongRegion(format!(
                    "{}-moved",
                    String::from_utf8_lossy(table)
                )));
            }
            BATCH_COMMIT_SECONDARY_ROWS => {
                if self.fail_secondary_commit.load(Ordering::SeqCst) {
                    return Err(injected_commit_failure());
                }
                let gate = self.secondary_commit_gate.lock().clone();
                if let Some(gate) = gate {
                    let _ = gate.recv_timeout(Duration::from_secs(5));
                }
            }
            _ => {}
        }
        self.inner.service_call(table, call)
    }

    fn locate_region(&self, table: &[u8], row: &[u8]) -> Result<RegionInfo> {
        self.inner.locate_region(table, row)
    }

    fn clean_all_region_cache(&self) {
        self.inner.clean_all_region_cache()
    }
}

fn injected_commit_failure() -> ThothError {
    ThothError::StorageError("injected secondary commit failure".into())
}

// --- ManualOracle ---

/// Counter oracle whose notion of lock expiry is switched by hand.
pub struct ManualOracle {
    next: AtomicU64,
    expired: AtomicBool,
    calls: AtomicUsize,
}

impl ManualOracle {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(100),
            expired: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_expired(&self, expired: bool) {
        self.expired.store(expired, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Moves the counter so the next timestamp handed out is `ts + 1`.
    pub fn set_next(&self, ts: u64) {
        self.next.store(ts, Ordering::SeqCst);
    }
}

impl Oracle for ManualOracle {
    fn get_timestamp(&self) -> Result<u64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.next.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn is_expired(&self, _ts: u64, _ttl_ms: u64) -> bool {
        self.expired.load(Ordering::SeqCst)
    }
}

// --- RecordingLockManager ---

/// Store-backed lock manager that records what it erased.
pub struct RecordingLockManager {
    inner: StoreLockManager,
    erased: Mutex<Vec<(ColumnCoordinate, u64)>>,
}

impl RecordingLockManager {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            inner: StoreLockManager::new(Arc::new(TwoPhaseRpc::new(store))),
            erased: Mutex::new(Vec::new()),
        }
    }

    pub fn erased(&self) -> Vec<(ColumnCoordinate, u64)> {
        self.erased.lock().clone()
    }

    /// Rows erased at `ts`, sorted and deduplicated.
    pub fn erased_rows(&self, ts: u64) -> Vec<String> {
        let rows: BTreeSet<String> = self
            .erased
            .lock()
            .iter()
            .filter(|(_, at)| *at == ts)
            .map(|(c, _)| String::from_utf8_lossy(&c.row).into_owned())
            .collect();
        rows.into_iter().collect()
    }
}

impl LockManager for RecordingLockManager {
    fn is_lock_exists(
        &self,
        coordinate: &ColumnCoordinate,
        start_ts: u64,
        end_ts: u64,
    ) -> Result<bool> {
        self.inner.is_lock_exists(coordinate, start_ts, end_ts)
    }

    fn get_commit_timestamp(&self, coordinate: &ColumnCoordinate, prewrite_ts: u64) -> Result<u64> {
        self.inner.get_commit_timestamp(coordinate, prewrite_ts)
    }

    fn clean_lock(
        &self,
        coordinate: &ColumnCoordinate,
        prewrite_ts: u64,
    ) -> Result<Option<PrimaryLock>> {
        self.inner.clean_lock(coordinate, prewrite_ts)
    }

    fn erase_lock_and_data(&self, coordinate: &ColumnCoordinate, prewrite_ts: u64) -> Result<()> {
        self.erased.lock().push((coordinate.clone(), prewrite_ts));
        self.inner.erase_lock_and_data(coordinate, prewrite_ts)
    }
}

// --- Helper Functions ---

pub struct Harness {
    pub mem: Arc<MemStore>,
    pub store: Arc<InterceptStore>,
    pub oracle: Arc<ManualOracle>,
    pub locks: Arc<RecordingLockManager>,
    pub thoth: Thoth,
}

impl Harness {
    pub fn rpc(&self) -> TwoPhaseRpc {
        TwoPhaseRpc::new(self.store.clone())
    }
}

/// Retries quickly so tests that wait on live locks stay short.
pub fn fast_config() -> TxnConfig {
    TxnConfig {
        max_clean_lock_retry: 3,
        clean_lock_pause_ms: 1,
        wait_secondary_commit: true,
        client_addr: "test-client".into(),
        ..TxnConfig::default()
    }
}

pub fn sync_config() -> TxnConfig {
    TxnConfig {
        concurrent_prewrite_and_commit: false,
        ..fast_config()
    }
}

pub fn harness(config: TxnConfig) -> Harness {
    harness_with(MemStore::new(), config)
}

pub fn harness_with(mem: MemStore, config: TxnConfig) -> Harness {
    let mem = Arc::new(mem);
    let store = Arc::new(InterceptStore::new(Arc::clone(&mem)));
    let oracle = Arc::new(ManualOracle::new());
    let locks = Arc::new(RecordingLockManager::new(store.clone()));
    let thoth =
        Thoth::with_config(store.clone(), oracle.clone(), config).with_lock_manager(locks.clone());
    Harness {
        mem,
        store,
        oracle,
        locks,
        thoth,
    }
}

pub fn coord(row: &str) -> ColumnCoordinate {
    ColumnCoordinate::new(TABLE, row, Column::new(FAMILY, QUALIFIER))
}

pub fn get_of(row: &str) -> Get {
    Get::new(row).add_column(FAMILY, QUALIFIER)
}

/// Commits `value` into the test column of each row in one transaction.
pub fn write_rows(thoth: &Thoth, rows: &[(&str, &str)]) -> Transaction {
    let mut txn = thoth.begin().unwrap();
    for (row, value) in rows {
        txn.put(TABLE, Put::new(*row).add_column(FAMILY, QUALIFIER, *value)).unwrap();
    }
    txn.commit().unwrap();
    txn
}

pub fn read_value(thoth: &Thoth, row: &str) -> Option<String> {
    let txn = thoth.begin().unwrap();
    let result = txn.get(TABLE, &get_of(row)).unwrap();
    result
        .value(FAMILY.as_bytes(), QUALIFIER.as_bytes())
        .map(|v| String::from_utf8_lossy(v).into_owned())
}

/// Prewrites `writes` (one row each, the first is the primary) and stops, as
/// a client that crashed right after prewrite would. Returns the start ts.
pub fn prewrite_only(h: &Harness, writes: &[(&str, &str)]) -> u64 {
    let start_ts = h.oracle.get_timestamp().unwrap();
    let rpc = h.rpc();
    let primary = coord(writes[0].0);

    let meta = LockMeta::new(MutationType::Put, start_ts, 0, "crashed");
    let mut primary_lock = PrimaryLock::new(meta);
    for (row, _) in &writes[1..] {
        primary_lock.add_secondary(coord(row), MutationType::Put);
    }
    let primary_bytes = Lock::Primary(primary_lock).encode();
    let secondary_bytes = (writes.len() > 1).then(|| {
        Lock::Secondary(SecondaryLock::new(
            LockMeta::new(MutationType::Put, start_ts, 0, "crashed"),
            primary.clone(),
        ))
        .encode()
    });

    for (i, (row, value)) in writes.iter().enumerate() {
        let mutation = ColumnMutation {
            column: Column::new(FAMILY, QUALIFIER),
            mutation_type: MutationType::Put,
            value: value.as_bytes().to_vec(),
        };
        let conflict = if i == 0 {
            rpc.prewrite_row(
                TABLE.as_bytes(),
                row.as_bytes(),
                vec![mutation],
                start_ts,
                Some(primary_bytes.as_slice()),
                secondary_bytes.as_deref(),
                0,
            )
        } else {
            rpc.prewrite_secondary_row(
                TABLE.as_bytes(),
                row.as_bytes(),
                vec![mutation],
                start_ts,
                secondary_bytes.as_deref(),
            )
        };
        assert!(conflict.unwrap().is_none(), "planting prewrite on {row} conflicted");
    }
    start_ts
}

/// Commits only the primary row of a planted prewrite. Returns the commit ts.
pub fn commit_primary_only(h: &Harness, primary_row: &str, start_ts: u64) -> u64 {
    let commit_ts = h.oracle.get_timestamp().unwrap();
    let mutation = ColumnMutation {
        column: Column::new(FAMILY, QUALIFIER),
        mutation_type: MutationType::Put,
        value: Vec::new(),
    };
    h.rpc()
        .commit_row(
            TABLE.as_bytes(),
            primary_row.as_bytes(),
            vec![mutation],
            start_ts,
            commit_ts,
            0,
        )
        .unwrap();
    commit_ts
}
