use std::fmt;
use std::sync::Arc;
use std::thread;

use ahash::AHashMap as HashMap;
use crossbeam_channel as channel;
use log::{debug, error, warn};

use crate::config::TxnConfig;
use crate::conflict::detection::{is_lock_result, locks_from_result};
use crate::conflict::resolution::LockResolver;
use crate::columns;
use crate::coprocessor::SECONDARY_INDEX;
use crate::data_store::cell::{ColumnCoordinate, MutationType, ResultRow};
use crate::data_store::mutation_cache::{ColumnMutationCache, RowMutation};
use crate::errors::{Result, ThothError};
use crate::lock::{Lock, LockMeta, PrimaryLock, SecondaryLock};
use crate::oracle::{self, Oracle};
use crate::scanner::Scanner;
use crate::store::{Delete, DeleteTarget, Get, Put, Store};
use crate::twopc::TwoPhaseRpc;

/// Lifecycle of a transaction.
///
/// ```text
/// Active -> Prewriting -> Prewritten -> Committing -> Committed
///   \            \             \             \
///    +------------+-------------+-------------+--> RollingBack -> RolledBack
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Prewriting,
    Prewritten,
    Committing,
    Committed,
    RollingBack,
    RolledBack,
}

/// Rows of one region, prewritten or committed in a single batch call.
type RegionGroup<'a> = (Vec<u8>, Vec<&'a RowMutation>);

/// What a region worker reports back after prewriting its rows.
struct RegionPrewrite {
    /// `(table, row)` of every row that holds our lock.
    prewritten: Vec<(Vec<u8>, Vec<u8>)>,
    error: Option<ThothError>,
}

/// Prewrite state shared with the region workers of one commit.
struct Prewriter<'a> {
    rpc: &'a TwoPhaseRpc,
    resolver: &'a LockResolver,
    start_ts: u64,
    primary_lock: Option<&'a [u8]>,
    secondary_lock: Option<&'a [u8]>,
    primary_index: i32,
}

impl Prewriter<'_> {
    fn prewrite_row(&self, row: &RowMutation, contains_primary: bool) -> Result<Option<Lock>> {
        if contains_primary {
            self.rpc.prewrite_row(
                &row.table,
                &row.row,
                row.mutation_list(true),
                self.start_ts,
                self.primary_lock,
                self.secondary_lock,
                self.primary_index,
            )
        } else {
            self.rpc.prewrite_secondary_row(
                &row.table,
                &row.row,
                row.mutation_list(true),
                self.start_ts,
                self.secondary_lock,
            )
        }
    }

    /// Prewrites a row; a conflicting lock is cleaned and the prewrite retried once.
    fn prewrite_row_with_lock_clean(
        &self,
        row: &RowMutation,
        contains_primary: bool,
    ) -> Result<()> {
        let Some(mut lock) = self.prewrite_row(row, contains_primary)? else {
            return Ok(());
        };
        self.resolver.clean_lock_with_retry(self.start_ts, &mut lock)?;
        if let Some(lock) = self.prewrite_row(row, contains_primary)? {
            error!(
                "can't clean lock, column: {:?}, lock ts: {}",
                lock.coordinate().map(ToString::to_string),
                lock.timestamp()
            );
            return Err(ThothError::Retryable);
        }
        Ok(())
    }

    /// Batch prewrite of one region. Rows blocked by a lock are cleaned and
    /// retried once; rows that met a newer write fail the region.
    fn prewrite_region(&self, table: &[u8], rows: &[&RowMutation]) -> RegionPrewrite {
        let key = |r: &RowMutation| (r.table.clone(), r.row.clone());
        let mut report = RegionPrewrite {
            prewritten: Vec::new(),
            error: None,
        };

        let outcome = match self
            .rpc
            .batch_prewrite_secondary_rows(table, rows, self.start_ts, self.secondary_lock)
        {
            Ok(outcome) => outcome,
            Err(e) => {
                // A region that refused the whole batch wrote nothing. For any
                // other failure the rows are in an unknown state.
                if !matches!(e, ThothError::WrongRegion(_)) {
                    report.prewritten = rows.iter().map(|r| key(*r)).collect();
                }
                report.error = Some(e);
                return report;
            }
        };
        report.prewritten = rows
            .iter()
            .filter(|r| outcome.prewrote(&r.row))
            .map(|r| key(*r))
            .collect();
        if !outcome.newer_write.is_empty() || !outcome.failed.is_empty() {
            report.error = Some(ThothError::Retryable);
            return report;
        }
        if outcome.locked.is_empty() {
            return report;
        }

        for lock in outcome.locked.values() {
            let mut lock = lock.clone();
            if let Err(e) = self.resolver.clean_lock_with_retry(self.start_ts, &mut lock) {
                report.error = Some(e);
                return report;
            }
        }

        let retry: Vec<&RowMutation> = rows
            .iter()
            .copied()
            .filter(|r| outcome.locked.contains_key(&r.row))
            .collect();
        match self
            .rpc
            .batch_prewrite_secondary_rows(table, &retry, self.start_ts, self.secondary_lock)
        {
            Ok(again) => {
                report.prewritten.extend(
                    retry
                        .iter()
                        .filter(|r| again.prewrote(&r.row))
                        .map(|r| key(*r)),
                );
                if !again.is_clean() {
                    for lock in again.locked.values() {
                        error!(
                            "can't clean lock, column: {:?}, lock ts: {}",
                            lock.coordinate().map(ToString::to_string),
                            lock.timestamp()
                        );
                    }
                    report.error = Some(ThothError::Retryable);
                }
            }
            Err(e) => {
                if !matches!(e, ThothError::WrongRegion(_)) {
                    report.prewritten.extend(retry.iter().map(|r| key(*r)));
                }
                report.error = Some(e);
            }
        }
        report
    }
}

/// A single cross-row transaction.
///
/// Reads see the snapshot at the start timestamp. Writes are buffered until
/// [`Transaction::commit`], which runs the two-phase protocol: every column
/// is locked (prewrite), then the primary column is committed, and finally
/// the secondaries. Transactions are created by [`crate::Thoth::begin`].
pub struct Transaction {
    start_ts: u64,
    commit_ts: u64,
    state: TransactionState,
    config: TxnConfig,
    store: Arc<dyn Store>,
    oracle: Arc<dyn Oracle>,
    rpc: Arc<TwoPhaseRpc>,
    resolver: LockResolver,
    mutation_cache: ColumnMutationCache,
    designated_primary: Option<ColumnCoordinate>,
    primary: Option<ColumnCoordinate>,
    primary_row: Option<RowMutation>,
    primary_index: i32,
    secondaries: Vec<ColumnCoordinate>,
    secondary_rows: Vec<RowMutation>,
    secondary_lock_bytes: Option<Vec<u8>>,
}

impl Transaction {
    pub(crate) fn new(
        start_ts: u64,
        config: TxnConfig,
        store: Arc<dyn Store>,
        oracle: Arc<dyn Oracle>,
        rpc: Arc<TwoPhaseRpc>,
        resolver: LockResolver,
    ) -> Self {
        debug!("begin txn {start_ts}");
        Self {
            start_ts,
            commit_ts: 0,
            state: TransactionState::Active,
            config,
            store,
            oracle,
            rpc,
            resolver,
            mutation_cache: ColumnMutationCache::new(),
            designated_primary: None,
            primary: None,
            primary_row: None,
            primary_index: SECONDARY_INDEX,
            secondaries: Vec::new(),
            secondary_rows: Vec::new(),
            secondary_lock_bytes: None,
        }
    }

    /// Snapshot timestamp of the transaction.
    pub fn start_ts(&self) -> u64 {
        self.start_ts
    }

    /// Commit timestamp, or 0 until the transaction committed.
    pub fn commit_ts(&self) -> u64 {
        self.commit_ts
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn mutation_count(&self) -> usize {
        self.mutation_cache.mutation_count()
    }

    pub(crate) fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    fn ensure_active(&self) -> Result<()> {
        if self.state != TransactionState::Active {
            return Err(ThothError::InvalidState(self.state));
        }
        Ok(())
    }

    /// Reads one row at the transaction's snapshot.
    ///
    /// Locks left by other transactions are resolved first: committed ones
    /// are rolled forward, abandoned ones are rolled back, and live ones are
    /// waited on up to the configured retry budget.
    ///
    /// # Errors
    ///
    /// Returns `ThothError::CleanLockFailed` if a lock on the row stays live
    /// for the whole retry budget.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use std::sync::Arc;
    /// use thoth::prelude::*;
    ///
    /// # fn store() -> Arc<dyn Store> { unimplemented!() }
    /// let thoth = Thoth::new(store(), Arc::new(LocalOracle::new()));
    /// let txn = thoth.begin()?;
    /// let row = txn.get("accounts", &Get::new("alice").add_column("cf", "balance"))?;
    /// if let Some(balance) = row.value(b"cf", b"balance") {
    ///     println!("balance: {}", String::from_utf8_lossy(balance));
    /// }
    /// # Ok::<(), ThothError>(())
    /// ```
    pub fn get(&self, table: &str, get: &Get) -> Result<ResultRow> {
        let tbl = table.as_bytes();
        let result = self.rpc.themis_get(tbl, get, self.start_ts, false)?;
        if !is_lock_result(&result) {
            return Ok(result);
        }
        self.clean_locks_and_get_again(tbl, get, &result)
    }

    /// Batched form of [`Transaction::get`]. Results come back in the order
    /// of `gets`.
    pub fn gets(&self, table: &str, gets: &[Get]) -> Result<Vec<ResultRow>> {
        let tbl = table.as_bytes();
        let results = self.rpc.themis_batch_get(tbl, gets, self.start_ts, false)?;
        let mut has_lock = false;
        for result in &results {
            if is_lock_result(result) {
                has_lock = true;
                self.clean_locks(tbl, result)?;
            }
        }
        if !has_lock {
            return Ok(results);
        }
        self.rpc.themis_batch_get(tbl, gets, self.start_ts, true)
    }

    pub(crate) fn clean_locks_and_get_again(
        &self,
        table: &[u8],
        get: &Get,
        locked: &ResultRow,
    ) -> Result<ResultRow> {
        self.clean_locks(table, locked)?;
        self.rpc.themis_get(table, get, self.start_ts, true)
    }

    fn clean_locks(&self, table: &[u8], locked: &ResultRow) -> Result<()> {
        for mut lock in locks_from_result(table, locked)? {
            self.resolver.clean_lock_with_retry(self.start_ts, &mut lock)?;
        }
        Ok(())
    }

    /// Buffers the cells of `put`. Nothing reaches the store before commit.
    ///
    /// # Errors
    ///
    /// `ThothError::InvalidMutation` when a cell names a metadata family.
    /// Nothing of `put` is buffered then.
    pub fn put(&mut self, table: &str, put: Put) -> Result<()> {
        self.ensure_active()?;
        for cell in &put.cells {
            columns::check_data_column(&cell.column)?;
        }
        for cell in put.cells {
            self.mutation_cache.add_mutation(
                table.as_bytes(),
                &put.row,
                cell.column,
                MutationType::Put,
                cell.value,
                false,
            );
        }
        Ok(())
    }

    /// Buffers column deletes.
    ///
    /// # Errors
    ///
    /// `ThothError::InvalidMutation` when `delete` names no column, a whole
    /// family, a single version or a metadata family. Only column deletes
    /// are transactional.
    pub fn delete(&mut self, table: &str, delete: Delete) -> Result<()> {
        self.ensure_active()?;
        if delete.is_empty() {
            return Err(ThothError::InvalidMutation(
                "delete must name at least one column".into(),
            ));
        }
        let mut targets = Vec::with_capacity(delete.targets.len());
        for target in delete.targets {
            match target {
                DeleteTarget::Column(column) => {
                    columns::check_data_column(&column)?;
                    targets.push(column);
                }
                DeleteTarget::Family(family) => {
                    return Err(ThothError::InvalidMutation(format!(
                        "family delete of {:?} is not supported, name the columns",
                        String::from_utf8_lossy(&family)
                    )));
                }
                DeleteTarget::ColumnVersion(column, _) => {
                    return Err(ThothError::InvalidMutation(format!(
                        "versioned delete of {column} is not supported"
                    )));
                }
            }
        }
        for column in targets {
            self.mutation_cache.add_mutation(
                table.as_bytes(),
                &delete.row,
                column,
                MutationType::DeleteColumn,
                Vec::new(),
                false,
            );
        }
        Ok(())
    }

    /// Locks every column the row currently has, without changing data, so
    /// that concurrent writers of the row conflict with this transaction.
    /// A row without columns is left alone.
    pub fn lock_row(&mut self, table: &str, row: &[u8]) -> Result<()> {
        self.ensure_active()?;
        let name = String::from_utf8_lossy(row);
        let result = self.get(table, &Get::new(row)).map_err(|e| {
            warn!("get row error, table: {table}, row: {name:?}, error: {e}");
            e
        })?;
        if result.is_empty() {
            warn!("no data to lock, table: {table}, row: {name:?}");
            return Ok(());
        }
        for column in result.columns() {
            columns::check_data_column(column)?;
        }
        for column in result.columns() {
            self.mutation_cache.add_mutation(
                table.as_bytes(),
                row,
                column.clone(),
                MutationType::LockOnly,
                Vec::new(),
                true,
            );
        }
        Ok(())
    }

    /// Names the column whose commit decides the transaction. It must be one
    /// of the buffered columns at commit time, and it must be written rather
    /// than only locked when the transaction writes anything. Otherwise the
    /// first eligible column is used.
    pub fn set_primary(&mut self, coordinate: ColumnCoordinate) -> Result<()> {
        self.ensure_active()?;
        self.designated_primary = Some(coordinate);
        Ok(())
    }

    /// Commits the buffered mutations.
    ///
    /// An empty transaction commits without contacting the store or oracle.
    /// Once the primary row commits the transaction is durable; secondary
    /// rows that fail to commit are finished later by readers.
    ///
    /// # Errors
    ///
    /// - `ThothError::TooManyRows` before any store call when the buffer
    ///   spans more rows than `max_rows_in_one_txn`.
    /// - `ThothError::Retryable` when the transaction lost a conflict or a
    ///   store call failed before the primary committed. Nothing is left
    ///   behind; start a new transaction and try again.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use std::sync::Arc;
    /// use thoth::prelude::*;
    ///
    /// # fn store() -> Arc<dyn Store> { unimplemented!() }
    /// let thoth = Thoth::new(store(), Arc::new(LocalOracle::new()));
    /// loop {
    ///     let mut txn = thoth.begin()?;
    ///     txn.put("accounts", Put::new("alice").add_column("cf", "balance", "90"))?;
    ///     txn.put("accounts", Put::new("bob").add_column("cf", "balance", "110"))?;
    ///     match txn.commit() {
    ///         Err(e) if e.is_retryable() => continue,
    ///         other => break other,
    ///     }
    /// }?;
    /// # Ok::<(), ThothError>(())
    /// ```
    pub fn commit(&mut self) -> Result<()> {
        self.ensure_active()?;
        if self.mutation_cache.is_empty() {
            self.state = TransactionState::Committed;
            return Ok(());
        }
        let rows = self.mutation_cache.row_count();
        if rows > self.config.max_rows_in_one_txn {
            return Err(ThothError::TooManyRows {
                rows,
                limit: self.config.max_rows_in_one_txn,
            });
        }

        self.select_primary_and_secondaries()?;
        self.state = TransactionState::Prewriting;

        if let Err(e) = self.prewrite_primary() {
            error!("prewrite primary of txn {} failed: {e}", self.start_ts);
            self.state = TransactionState::RolledBack;
            return Err(ThothError::Retryable);
        }

        if let Err(e) = self.prewrite_secondaries() {
            if matches!(e, ThothError::WrongRegion(_)) {
                warn!("region info outdated, cleaning region cache");
                self.store.clean_all_region_cache();
            }
            error!("prewrite secondaries of txn {} failed: {e}", self.start_ts);
            self.state = TransactionState::RolledBack;
            return Err(ThothError::Retryable);
        }
        self.state = TransactionState::Prewritten;

        self.commit_ts = match self.oracle.get_timestamp() {
            Ok(ts) if ts > self.start_ts => ts,
            Ok(ts) => {
                error!("oracle returned commit ts {ts} not after start ts {}", self.start_ts);
                self.rollback_all();
                return Err(ThothError::Retryable);
            }
            Err(e) => {
                error!("get commit ts of txn {} failed: {e}", self.start_ts);
                self.rollback_all();
                return Err(ThothError::Retryable);
            }
        };

        self.state = TransactionState::Committing;
        if let Err(e) = self.commit_primary() {
            error!("commit primary row of txn {} failed: {e}", self.start_ts);
            self.rollback_all();
            self.commit_ts = 0;
            return Err(ThothError::Retryable);
        }
        self.state = TransactionState::Committed;

        self.commit_secondaries();
        debug!("txn {} committed at {}", self.start_ts, self.commit_ts);
        Ok(())
    }

    /// Discards the buffered mutations of an active transaction. Nothing has
    /// reached the store yet, so there is nothing to undo remotely.
    pub fn rollback(&mut self) -> Result<()> {
        self.ensure_active()?;
        self.mutation_cache.clear();
        self.state = TransactionState::RolledBack;
        Ok(())
    }

    /// Drops all in-memory state of the transaction.
    pub fn release(&mut self) {
        self.mutation_cache.clear();
        self.designated_primary = None;
        self.primary = None;
        self.primary_row = None;
        self.primary_index = SECONDARY_INDEX;
        self.secondaries.clear();
        self.secondary_rows.clear();
        self.secondary_lock_bytes = None;
        self.start_ts = 0;
        self.commit_ts = 0;
        if self.state == TransactionState::Active {
            self.state = TransactionState::RolledBack;
        }
    }

    /// Range read over `[start_row, stop_row)` at the transaction's snapshot.
    /// An empty `stop_row` scans to the end of the table.
    pub fn scanner(
        &self,
        table: &str,
        start_row: &[u8],
        stop_row: &[u8],
        batch_size: usize,
    ) -> Scanner<'_> {
        Scanner::new(self, table, start_row, stop_row, batch_size)
    }

    fn select_primary_and_secondaries(&mut self) -> Result<()> {
        // A lock-only column leaves no write record when it commits, so it
        // cannot carry the commit decision of a transaction that writes.
        let has_writes = self.mutation_cache.has_writes();
        let eligible = |m: MutationType| !has_writes || m != MutationType::LockOnly;
        let designated = match self.designated_primary.take() {
            Some(c) => match self.mutation_cache.get_mutation(&c) {
                Some(m) if eligible(m.mutation_type) => Some(c),
                Some(_) => {
                    warn!("designated primary {c} is only locked, choosing a written column");
                    None
                }
                None => {
                    warn!("designated primary {c} has no mutation, choosing the first column");
                    None
                }
            },
            None => None,
        };

        self.primary = None;
        self.primary_row = None;
        self.secondaries.clear();
        self.secondary_rows.clear();
        for row in self.mutation_cache.rows() {
            let mut holds_primary = false;
            for (index, coordinate) in row.coordinates().enumerate() {
                let is_primary = self.primary.is_none()
                    && match &designated {
                        Some(d) => *d == coordinate,
                        None => row.type_of(&coordinate.column).is_some_and(eligible),
                    };
                if is_primary {
                    self.primary = Some(coordinate);
                    self.primary_index = index as i32;
                    holds_primary = true;
                } else {
                    self.secondaries.push(coordinate);
                }
            }
            if holds_primary {
                self.primary_row = Some(row.clone());
            } else {
                self.secondary_rows.push(row.clone());
            }
        }

        let Some(primary) = self.primary.clone() else {
            return Err(ThothError::InvalidMutation("no primary column selected".into()));
        };
        self.designated_primary = designated;

        let single_column = self.secondaries.is_empty();
        self.secondary_lock_bytes = if single_column {
            None
        } else {
            let meta = LockMeta::new(
                MutationType::Put,
                self.start_ts,
                oracle::now_ms(),
                &self.config.client_addr,
            );
            Some(Lock::Secondary(SecondaryLock::new(meta, primary)).encode())
        };
        Ok(())
    }

    fn construct_primary_lock(&self) -> Result<Vec<u8>> {
        let (Some(primary), Some(row)) = (&self.primary, &self.primary_row) else {
            return Err(ThothError::InvalidMutation("primary not selected".into()));
        };
        let mutation_type = row.type_of(&primary.column).unwrap_or(MutationType::Put);
        let mut lock = PrimaryLock::new(LockMeta::new(
            mutation_type,
            self.start_ts,
            oracle::now_ms(),
            &self.config.client_addr,
        ));
        for coordinate in &self.secondaries {
            if let Some(m) = self.mutation_cache.get_mutation(coordinate) {
                lock.add_secondary(coordinate.clone(), m.mutation_type);
            }
        }
        Ok(Lock::Primary(lock).encode())
    }

    fn prewrite_primary(&self) -> Result<()> {
        let Some(row) = &self.primary_row else {
            return Err(ThothError::InvalidMutation("primary not selected".into()));
        };
        let primary_lock = self.construct_primary_lock()?;
        let prewriter = Prewriter {
            rpc: &self.rpc,
            resolver: &self.resolver,
            start_ts: self.start_ts,
            primary_lock: Some(&primary_lock),
            secondary_lock: self.secondary_lock_bytes.as_deref(),
            primary_index: self.primary_index,
        };
        prewriter.prewrite_row_with_lock_clean(row, true)?;
        debug!(
            "prewrite primary {} {:?} successfully",
            self.start_ts,
            String::from_utf8_lossy(&row.row)
        );
        Ok(())
    }

    fn secondary_prewriter(&self) -> Prewriter<'_> {
        Prewriter {
            rpc: &self.rpc,
            resolver: &self.resolver,
            start_ts: self.start_ts,
            primary_lock: None,
            secondary_lock: self.secondary_lock_bytes.as_deref(),
            primary_index: SECONDARY_INDEX,
        }
    }

    fn prewrite_secondaries(&self) -> Result<()> {
        if self.secondary_rows.is_empty() {
            return Ok(());
        }
        if self.config.concurrent_prewrite_and_commit {
            self.batch_prewrite_secondaries()
        } else {
            self.prewrite_secondaries_sync()
        }
    }

    fn prewrite_secondaries_sync(&self) -> Result<()> {
        let prewriter = self.secondary_prewriter();
        for (i, row) in self.secondary_rows.iter().enumerate() {
            if let Err(e) = prewriter.prewrite_row_with_lock_clean(row, false) {
                self.rollback_primary_row();
                for done in self.secondary_rows[..i].iter().rev() {
                    self.log_rollback_error(self.rollback_row(done));
                }
                return Err(e);
            }
        }
        Ok(())
    }

    fn batch_prewrite_secondaries(&self) -> Result<()> {
        let groups = match self.group_by_region() {
            Ok(groups) => groups,
            Err(e) => {
                self.rollback_primary_row();
                return Err(e);
            }
        };

        let prewriter = self.secondary_prewriter();
        let (tx, rx) = channel::unbounded();
        thread::scope(|s| {
            for (table, rows) in &groups {
                let tx = tx.clone();
                let prewriter = &prewriter;
                s.spawn(move || {
                    let report = prewriter.prewrite_region(table, rows);
                    let _ = tx.send(report);
                });
            }
        });
        drop(tx);

        let mut prewritten = Vec::new();
        let mut first_error = None;
        for report in rx.iter() {
            prewritten.extend(report.prewritten);
            if first_error.is_none() {
                first_error = report.error;
            }
        }
        let Some(e) = first_error else {
            return Ok(());
        };

        warn!(
            "batch prewrite secondary rows error, rolling back {} rows of txn {}",
            prewritten.len(),
            self.start_ts
        );
        self.rollback_primary_row();
        for (table, row) in prewritten {
            let mutation = self
                .secondary_rows
                .iter()
                .find(|r| r.table == table && r.row == row);
            if let Some(mutation) = mutation {
                self.log_rollback_error(self.rollback_row(mutation));
            }
        }
        Err(e)
    }

    fn group_by_region(&self) -> Result<Vec<RegionGroup<'_>>> {
        let mut groups: HashMap<(Vec<u8>, String), Vec<&RowMutation>> = HashMap::new();
        for row in &self.secondary_rows {
            let region = self.store.locate_region(&row.table, &row.row)?;
            groups
                .entry((row.table.clone(), region.group_key()))
                .or_default()
                .push(row);
        }
        Ok(groups
            .into_iter()
            .map(|((table, _), rows)| (table, rows))
            .collect())
    }

    fn commit_primary(&self) -> Result<()> {
        let (Some(primary), Some(row)) = (&self.primary, &self.primary_row) else {
            return Err(ThothError::InvalidMutation("primary not selected".into()));
        };
        self.rpc.commit_row(
            &primary.table,
            &primary.row,
            row.mutation_list(false),
            self.start_ts,
            self.commit_ts,
            self.primary_index,
        )
    }

    fn commit_secondaries(&self) {
        if self.secondary_rows.is_empty() {
            return;
        }
        if self.config.concurrent_prewrite_and_commit {
            self.batch_commit_secondaries(self.config.wait_secondary_commit);
        } else {
            self.commit_secondaries_sync();
        }
    }

    fn commit_secondaries_sync(&self) {
        for row in &self.secondary_rows {
            if let Err(e) = self.rpc.commit_secondary_row(
                &row.table,
                &row.row,
                row.mutation_list(false),
                self.start_ts,
                self.commit_ts,
            ) {
                // the next reader of this row rolls it forward
                warn!("commit secondary row {:?} failed: {e}", String::from_utf8_lossy(&row.row));
            }
        }
    }

    fn batch_commit_secondaries(&self, wait: bool) {
        let groups = match self.group_by_region() {
            Ok(groups) => groups,
            Err(e) => {
                warn!("locate regions for secondary commit of txn {} failed: {e}", self.start_ts);
                return;
            }
        };

        let mut handles = Vec::with_capacity(groups.len());
        for (table, rows) in groups {
            let rows: Vec<RowMutation> = rows.into_iter().cloned().collect();
            let rpc = Arc::clone(&self.rpc);
            let store = Arc::clone(&self.store);
            let (start_ts, commit_ts) = (self.start_ts, self.commit_ts);
            handles.push(thread::spawn(move || {
                let refs: Vec<&RowMutation> = rows.iter().collect();
                match rpc.batch_commit_secondary_rows(&table, &refs, start_ts, commit_ts) {
                    Ok(failed) if !failed.is_empty() => warn!(
                        "commit of {} secondary rows of txn {start_ts} failed, commit ts {commit_ts}",
                        failed.len()
                    ),
                    Ok(_) => {}
                    Err(ThothError::WrongRegion(region)) => {
                        store.clean_all_region_cache();
                        warn!("region {region} outdated when committing secondary rows");
                    }
                    Err(e) => warn!("batch commit secondary rows of txn {start_ts} failed: {e}"),
                }
            }));
        }
        if wait {
            for handle in handles {
                if handle.join().is_err() {
                    warn!("secondary commit worker of txn {} panicked", self.start_ts);
                }
            }
        }
    }

    fn rollback_row(&self, row: &RowMutation) -> Result<()> {
        let columns: Vec<String> = row.columns().map(ToString::to_string).collect();
        warn!(
            "rolling back {:?} {} {{{}}}",
            String::from_utf8_lossy(&row.row),
            self.start_ts,
            columns.join(", ")
        );
        for coordinate in row.coordinates() {
            self.resolver
                .lock_manager()
                .erase_lock_and_data(&coordinate, self.start_ts)?;
        }
        Ok(())
    }

    fn rollback_primary_row(&self) {
        if let Some(row) = &self.primary_row {
            self.log_rollback_error(self.rollback_row(row));
        }
    }

    /// Erases everything this transaction prewrote, primary row first.
    fn rollback_all(&mut self) {
        self.state = TransactionState::RollingBack;
        self.rollback_primary_row();
        for row in self.secondary_rows.iter().rev() {
            self.log_rollback_error(self.rollback_row(row));
        }
        self.state = TransactionState::RolledBack;
    }

    fn log_rollback_error(&self, result: Result<()>) {
        if let Err(e) = result {
            // leftover locks expire and are cleaned by other clients
            error!("rollback of txn {} failed: {e}", self.start_ts);
        }
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.start_ts)
    }
}
