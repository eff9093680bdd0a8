use log::debug;

use crate::conflict::detection::is_lock_result;
use crate::data_store::cell::{Column, ResultRow};
use crate::errors::Result;
use crate::store::{Get, Scan, ScanCursor, START_TS_ATTRIBUTE};
use crate::transaction::Transaction;

/// Forward-only range read at a transaction's snapshot.
///
/// Rows holding locks of other transactions are resolved the same way
/// [`Transaction::get`] resolves them, so callers never see a lock cell. A
/// row that turns out empty after resolution is skipped. The server-side
/// cursor opens on the first call to `next` and is released on exhaustion,
/// on [`Scanner::close`], or on drop.
pub struct Scanner<'a> {
    txn: &'a Transaction,
    table: Vec<u8>,
    scan: Scan,
    cursor: Option<Box<dyn ScanCursor>>,
    closed: bool,
}

impl<'a> Scanner<'a> {
    pub(crate) fn new(
        txn: &'a Transaction,
        table: &str,
        start_row: &[u8],
        stop_row: &[u8],
        batch_size: usize,
    ) -> Self {
        let scan = Scan::new(start_row, stop_row)
            .caching(batch_size)
            .set_attribute(START_TS_ATTRIBUTE, txn.start_ts().to_be_bytes().to_vec());
        Self {
            txn,
            table: table.as_bytes().to_vec(),
            scan,
            cursor: None,
            closed: false,
        }
    }

    /// Restricts the scan to a column. Only effective before the first row is read.
    pub fn add_column(mut self, family: impl Into<Vec<u8>>, qualifier: impl Into<Vec<u8>>) -> Self {
        self.scan.columns.push(Column::new(family, qualifier));
        self
    }

    pub fn add_family(mut self, family: impl Into<Vec<u8>>) -> Self {
        self.scan.families.push(family.into());
        self
    }

    /// Next row of the range, or `None` once the range is exhausted.
    pub fn next_row(&mut self) -> Result<Option<ResultRow>> {
        loop {
            if self.closed {
                return Ok(None);
            }
            if self.cursor.is_none() {
                self.cursor = Some(self.txn.store().open_scanner(&self.table, &self.scan)?);
            }
            let next = match self.cursor.as_mut() {
                Some(cursor) => cursor.next()?,
                None => None,
            };
            let Some(row) = next else {
                self.close();
                return Ok(None);
            };
            if !is_lock_result(&row) {
                return Ok(Some(row));
            }

            let get = Get::new(row.row.clone())
                .with_columns(self.scan.columns.iter().cloned());
            let get = self
                .scan
                .families
                .iter()
                .fold(get, |get, family| get.add_family(family.clone()));
            let resolved = self.txn.clean_locks_and_get_again(&self.table, &get, &row)?;
            if !resolved.is_empty() {
                return Ok(Some(resolved));
            }
            debug!(
                "row {:?} is empty after lock cleanup, skipping",
                String::from_utf8_lossy(&row.row)
            );
        }
    }

    /// Releases the server-side cursor. Further reads return `None`.
    pub fn close(&mut self) {
        if let Some(mut cursor) = self.cursor.take() {
            cursor.close();
        }
        self.closed = true;
    }
}

impl Iterator for Scanner<'_> {
    type Item = Result<ResultRow>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_row().transpose()
    }
}

impl Drop for Scanner<'_> {
    fn drop(&mut self) {
        self.close();
    }
}
