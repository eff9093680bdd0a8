//! Naming of the meta columns that carry locks and write records.
//!
//! For a data column `f:q` the lock lives in `L:f#q`, a committed put is
//! recorded in `#p:f#q` and a committed delete in `#d:f#q`.

use crate::data_store::cell::{Column, ColumnCoordinate, MutationType};
use crate::errors::{Result, ThothError};

pub const LOCK_FAMILY: &[u8] = b"L";
pub const PUT_FAMILY: &[u8] = b"#p";
pub const DELETE_FAMILY: &[u8] = b"#d";

const SEPARATOR: u8 = b'#';

pub fn meta_qualifier(column: &Column) -> Vec<u8> {
    let mut qualifier = Vec::with_capacity(column.family.len() + 1 + column.qualifier.len());
    qualifier.extend_from_slice(&column.family);
    qualifier.push(SEPARATOR);
    qualifier.extend_from_slice(&column.qualifier);
    qualifier
}

pub fn lock_column(column: &Column) -> Column {
    Column::new(LOCK_FAMILY, meta_qualifier(column))
}

pub fn put_column(column: &Column) -> Column {
    Column::new(PUT_FAMILY, meta_qualifier(column))
}

pub fn delete_column(column: &Column) -> Column {
    Column::new(DELETE_FAMILY, meta_qualifier(column))
}

/// Write-record column for a committed mutation. Lock-only mutations leave none.
pub fn write_column(column: &Column, mutation_type: MutationType) -> Option<Column> {
    match mutation_type {
        MutationType::Put => Some(put_column(column)),
        MutationType::DeleteColumn => Some(delete_column(column)),
        MutationType::LockOnly => None,
    }
}

pub fn is_lock_column(column: &Column) -> bool {
    column.family == LOCK_FAMILY
}

pub fn is_write_column(column: &Column) -> bool {
    column.family == PUT_FAMILY || column.family == DELETE_FAMILY
}

/// Checks that `column` may hold user data. The meta families are reserved,
/// and a data family must not contain the separator.
pub fn check_data_column(column: &Column) -> Result<()> {
    if is_lock_column(column) || is_write_column(column) || column.family.contains(&SEPARATOR) {
        return Err(ThothError::InvalidMutation(format!(
            "family {:?} is reserved for transaction metadata",
            String::from_utf8_lossy(&column.family)
        )));
    }
    Ok(())
}

/// Recovers the data column from a meta column. Data families never contain
/// the separator, so the split happens at its first occurrence.
pub fn data_column(meta: &Column) -> Option<Column> {
    let at = meta.qualifier.iter().position(|b| *b == SEPARATOR)?;
    Some(Column::new(
        &meta.qualifier[..at],
        &meta.qualifier[at + 1..],
    ))
}

/// Coordinate of the data cell a lock cell protects.
pub fn data_coordinate(table: &[u8], row: &[u8], meta: &Column) -> Option<ColumnCoordinate> {
    data_column(meta).map(|column| ColumnCoordinate::new(table, row, column))
}
