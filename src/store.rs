use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::data_store::cell::{Column, ResultRow};
use crate::errors::Result;

/// Scan attribute carrying the reader's start timestamp. The store's
/// snapshot observer reads at this timestamp and returns lock cells it meets.
pub const START_TS_ATTRIBUTE: &str = "_themisTransationStartTs_";

/// Version range `[min, max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub min: u64,
    pub max: u64,
}

impl TimeRange {
    pub const ALL: TimeRange = TimeRange { min: 0, max: u64::MAX };

    pub fn new(min: u64, max: u64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, ts: u64) -> bool {
        ts >= self.min && ts < self.max
    }
}

impl Default for TimeRange {
    fn default() -> Self {
        TimeRange::ALL
    }
}

/// Point read of one row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Get {
    pub row: Vec<u8>,
    pub columns: Vec<Column>,
    pub families: Vec<Vec<u8>>,
    pub time_range: TimeRange,
    pub max_versions: u32,
}

impl Get {
    pub fn new(row: impl Into<Vec<u8>>) -> Self {
        Self {
            row: row.into(),
            columns: Vec::new(),
            families: Vec::new(),
            time_range: TimeRange::ALL,
            max_versions: 1,
        }
    }

    pub fn add_column(mut self, family: impl Into<Vec<u8>>, qualifier: impl Into<Vec<u8>>) -> Self {
        self.columns.push(Column::new(family, qualifier));
        self
    }

    pub fn add_family(mut self, family: impl Into<Vec<u8>>) -> Self {
        self.families.push(family.into());
        self
    }

    pub fn with_columns(mut self, columns: impl IntoIterator<Item = Column>) -> Self {
        self.columns.extend(columns);
        self
    }

    pub fn time_range(mut self, min: u64, max: u64) -> Self {
        self.time_range = TimeRange::new(min, max);
        self
    }

    pub fn max_versions(mut self, versions: u32) -> Self {
        self.max_versions = versions;
        self
    }

    /// True when the read names no column or family and so reads the whole row.
    pub fn is_whole_row(&self) -> bool {
        self.columns.is_empty() && self.families.is_empty()
    }
}

/// One cell of a `Put`. Without a timestamp the store assigns one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutCell {
    pub column: Column,
    pub timestamp: Option<u64>,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Put {
    pub row: Vec<u8>,
    pub cells: Vec<PutCell>,
}

impl Put {
    pub fn new(row: impl Into<Vec<u8>>) -> Self {
        Self {
            row: row.into(),
            cells: Vec::new(),
        }
    }

    pub fn add_column(
        mut self,
        family: impl Into<Vec<u8>>,
        qualifier: impl Into<Vec<u8>>,
        value: impl Into<Vec<u8>>,
    ) -> Self {
        self.cells.push(PutCell {
            column: Column::new(family, qualifier),
            timestamp: None,
            value: value.into(),
        });
        self
    }

    pub fn add_column_at(
        mut self,
        column: Column,
        timestamp: u64,
        value: impl Into<Vec<u8>>,
    ) -> Self {
        self.cells.push(PutCell {
            column,
            timestamp: Some(timestamp),
            value: value.into(),
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeleteTarget {
    /// Every column of a family.
    Family(Vec<u8>),
    /// Every version of a column.
    Column(Column),
    /// Exactly one version of a column.
    ColumnVersion(Column, u64),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delete {
    pub row: Vec<u8>,
    pub targets: Vec<DeleteTarget>,
}

impl Delete {
    pub fn new(row: impl Into<Vec<u8>>) -> Self {
        Self {
            row: row.into(),
            targets: Vec::new(),
        }
    }

    pub fn add_column(mut self, family: impl Into<Vec<u8>>, qualifier: impl Into<Vec<u8>>) -> Self {
        self.targets
            .push(DeleteTarget::Column(Column::new(family, qualifier)));
        self
    }

    pub fn add_family(mut self, family: impl Into<Vec<u8>>) -> Self {
        self.targets.push(DeleteTarget::Family(family.into()));
        self
    }

    pub fn add_column_version(mut self, column: Column, timestamp: u64) -> Self {
        self.targets.push(DeleteTarget::ColumnVersion(column, timestamp));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// Range read over `[start_row, stop_row)`. An empty stop row means no bound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scan {
    pub start_row: Vec<u8>,
    pub stop_row: Vec<u8>,
    pub columns: Vec<Column>,
    pub families: Vec<Vec<u8>>,
    /// Rows fetched per round trip.
    pub caching: usize,
    pub attributes: BTreeMap<String, Vec<u8>>,
}

impl Scan {
    pub fn new(start_row: impl Into<Vec<u8>>, stop_row: impl Into<Vec<u8>>) -> Self {
        Self {
            start_row: start_row.into(),
            stop_row: stop_row.into(),
            columns: Vec::new(),
            families: Vec::new(),
            caching: 100,
            attributes: BTreeMap::new(),
        }
    }

    pub fn add_column(mut self, family: impl Into<Vec<u8>>, qualifier: impl Into<Vec<u8>>) -> Self {
        self.columns.push(Column::new(family, qualifier));
        self
    }

    pub fn add_family(mut self, family: impl Into<Vec<u8>>) -> Self {
        self.families.push(family.into());
        self
    }

    pub fn caching(mut self, rows: usize) -> Self {
        self.caching = rows;
        self
    }

    pub fn set_attribute(mut self, name: &str, value: Vec<u8>) -> Self {
        self.attributes.insert(name.to_string(), value);
        self
    }

    /// Start timestamp attached by a transactional scanner, if any.
    pub fn start_ts(&self) -> Option<u64> {
        let bytes = self.attributes.get(START_TS_ATTRIBUTE)?;
        let raw: [u8; 8] = bytes.as_slice().try_into().ok()?;
        Some(u64::from_be_bytes(raw))
    }

    pub fn contains_row(&self, row: &[u8]) -> bool {
        row >= self.start_row.as_slice()
            && (self.stop_row.is_empty() || row < self.stop_row.as_slice())
    }
}

/// A coprocessor invocation, routed to the region holding `row`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceCall {
    pub row: Vec<u8>,
    pub method: &'static str,
    pub request: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionInfo {
    pub server: String,
    pub name: String,
    pub start_key: Vec<u8>,
    pub end_key: Vec<u8>,
}

impl RegionInfo {
    /// Key secondary rows are batched by.
    pub fn group_key(&self) -> String {
        format!("{}_{}", self.server, self.name)
    }
}

/// Server-side cursor of an open scan.
pub trait ScanCursor: Send {
    fn next(&mut self) -> Result<Option<ResultRow>>;

    /// Releases the server-side cursor. Calling it twice is harmless.
    fn close(&mut self);
}

/// Client of the versioned column store.
///
/// Implementations must be `Send` and `Sync`; one store is shared by every
/// transaction and by the worker threads a commit fans out to.
///
/// # Errors
///
/// Transport failures are reported as `ThothError::StorageError`. A request
/// routed to a region that no longer owns the row reports
/// `ThothError::WrongRegion`.
pub trait Store: Send + Sync {
    fn get(&self, table: &[u8], get: &Get) -> Result<ResultRow>;

    fn put(&self, table: &[u8], put: &Put) -> Result<()>;

    fn delete(&self, table: &[u8], delete: &Delete) -> Result<()>;

    fn open_scanner(&self, table: &[u8], scan: &Scan) -> Result<Box<dyn ScanCursor>>;

    /// Invokes a coprocessor method and returns its encoded response.
    fn service_call(&self, table: &[u8], call: &ServiceCall) -> Result<Vec<u8>>;

    fn locate_region(&self, table: &[u8], row: &[u8]) -> Result<RegionInfo>;

    /// Drops cached region locations so the next call looks them up again.
    fn clean_all_region_cache(&self);
}
