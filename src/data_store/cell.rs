use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, ThothError};

/// A column of a row, addressed by family and qualifier.
///
/// Columns order by family first, then by qualifier, which is the order the
/// store returns cells in.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Column {
    pub family: Vec<u8>,
    pub qualifier: Vec<u8>,
}

impl Column {
    pub fn new(family: impl Into<Vec<u8>>, qualifier: impl Into<Vec<u8>>) -> Self {
        Self {
            family: family.into(),
            qualifier: qualifier.into(),
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}",
            String::from_utf8_lossy(&self.family),
            String::from_utf8_lossy(&self.qualifier)
        )
    }
}

/// Full address of one logical cell: table, row and column.
///
/// # Examples
///
/// ```no_run
/// use thoth::prelude::*;
///
/// let coordinate = ColumnCoordinate::new("accounts", b"alice", Column::new(b"cf", b"balance"));
/// assert_eq!(coordinate.to_string(), "accounts/alice/cf:balance");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ColumnCoordinate {
    pub table: Vec<u8>,
    pub row: Vec<u8>,
    pub column: Column,
}

impl ColumnCoordinate {
    pub fn new(table: impl Into<Vec<u8>>, row: impl Into<Vec<u8>>, column: Column) -> Self {
        Self {
            table: table.into(),
            row: row.into(),
            column,
        }
    }

    /// Table name as a string. Table names are plain identifiers.
    pub fn table_name(&self) -> String {
        String::from_utf8_lossy(&self.table).into_owned()
    }
}

impl fmt::Display for ColumnCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            String::from_utf8_lossy(&self.table),
            String::from_utf8_lossy(&self.row),
            self.column
        )
    }
}

/// Kind of a buffered mutation. The discriminants are the store's wire codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MutationType {
    /// Takes a lock on the column without writing data.
    LockOnly = 0,
    Put = 4,
    DeleteColumn = 12,
}

impl MutationType {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(MutationType::LockOnly),
            4 => Ok(MutationType::Put),
            12 => Ok(MutationType::DeleteColumn),
            other => Err(ThothError::InvalidLock(format!(
                "unknown mutation type code {other}"
            ))),
        }
    }

    /// Only puts and deletes leave a write record behind on commit.
    pub fn is_write(self) -> bool {
        !matches!(self, MutationType::LockOnly)
    }
}

/// One version of one column as returned by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    pub column: Column,
    pub timestamp: u64,
    pub value: Vec<u8>,
}

impl Cell {
    pub fn new(column: Column, timestamp: u64, value: impl Into<Vec<u8>>) -> Self {
        Self {
            column,
            timestamp,
            value: value.into(),
        }
    }
}

/// The cells of a single row, ordered by column and then newest version first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRow {
    pub row: Vec<u8>,
    pub cells: Vec<Cell>,
}

impl ResultRow {
    pub fn new(row: impl Into<Vec<u8>>, mut cells: Vec<Cell>) -> Self {
        cells.sort_by(|a, b| a.column.cmp(&b.column).then(b.timestamp.cmp(&a.timestamp)));
        Self {
            row: row.into(),
            cells,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Latest value of the given column, if the row carries it.
    pub fn value(&self, family: &[u8], qualifier: &[u8]) -> Option<&[u8]> {
        self.cells
            .iter()
            .find(|c| c.column.family == family && c.column.qualifier == qualifier)
            .map(|c| c.value.as_slice())
    }

    pub fn columns(&self) -> impl Iterator<Item = &Column> {
        self.cells.iter().map(|c| &c.column)
    }
}
