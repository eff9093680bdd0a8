use log::warn;

use crate::columns;
use crate::data_store::cell::ResultRow;
use crate::errors::{Result, ThothError};
use crate::lock::Lock;

/// A snapshot read that met a lock answers with the lock cells instead of
/// data; such a result starts with a lock-family cell.
pub fn is_lock_result(result: &ResultRow) -> bool {
    result
        .cells
        .first()
        .is_some_and(|cell| columns::is_lock_column(&cell.column))
}

/// Decodes every lock cell of `result` and points each lock at the data cell
/// it guards.
pub fn locks_from_result(table: &[u8], result: &ResultRow) -> Result<Vec<Lock>> {
    let mut locks = Vec::new();
    for cell in &result.cells {
        if !columns::is_lock_column(&cell.column) {
            continue;
        }
        let coordinate = columns::data_coordinate(table, &result.row, &cell.column).ok_or_else(|| {
            ThothError::InvalidLock(format!("malformed lock column {}", cell.column))
        })?;
        let mut lock = Lock::decode(&cell.value)?;
        lock.set_coordinate(coordinate);
        locks.push(lock);
    }
    if !locks.is_empty() {
        warn!(
            "{} lock(s) met reading row {:?}",
            locks.len(),
            String::from_utf8_lossy(&result.row)
        );
    }
    Ok(locks)
}
