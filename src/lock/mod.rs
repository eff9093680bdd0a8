//! Locks written during prewrite.
//!
//! Every transaction writes exactly one primary lock. It lists every other
//! column of the transaction, and each of those columns carries a secondary
//! lock pointing back at the primary. Whether a transaction committed is
//! decided by what happens to the primary lock alone.

pub mod codec;

use std::collections::BTreeMap;

use crate::data_store::cell::{ColumnCoordinate, MutationType};

/// Fields shared by both lock roles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockMeta {
    /// Cell the lock guards. Not part of the encoding; assigned when the lock
    /// is read back from a lock cell.
    pub coordinate: Option<ColumnCoordinate>,
    pub mutation_type: MutationType,
    /// Start timestamp of the owning transaction.
    pub timestamp: u64,
    /// Client wall clock at prewrite, in milliseconds.
    pub wall_time: u64,
    pub client_addr: String,
    /// Set by cleanup once the lease is known to be over.
    pub expired: bool,
}

impl LockMeta {
    pub fn new(
        mutation_type: MutationType,
        timestamp: u64,
        wall_time: u64,
        client_addr: &str,
    ) -> Self {
        Self {
            coordinate: None,
            mutation_type,
            timestamp,
            wall_time,
            client_addr: client_addr.to_string(),
            expired: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryLock {
    pub meta: LockMeta,
    secondaries: BTreeMap<ColumnCoordinate, MutationType>,
}

impl PrimaryLock {
    pub fn new(meta: LockMeta) -> Self {
        Self {
            meta,
            secondaries: BTreeMap::new(),
        }
    }

    pub fn add_secondary(&mut self, coordinate: ColumnCoordinate, mutation_type: MutationType) {
        self.secondaries.insert(coordinate, mutation_type);
    }

    pub fn secondary_columns(&self) -> &BTreeMap<ColumnCoordinate, MutationType> {
        &self.secondaries
    }

    /// Materializes a secondary lock for every listed column, each pointing
    /// back at this primary.
    pub fn secondaries(&self) -> Vec<SecondaryLock> {
        let Some(primary) = self.meta.coordinate.clone() else {
            return Vec::new();
        };
        self.secondaries
            .iter()
            .map(|(coordinate, mutation_type)| {
                let mut meta = LockMeta::new(
                    *mutation_type,
                    self.meta.timestamp,
                    self.meta.wall_time,
                    &self.meta.client_addr,
                );
                meta.coordinate = Some(coordinate.clone());
                SecondaryLock {
                    meta,
                    primary: primary.clone(),
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecondaryLock {
    pub meta: LockMeta,
    pub primary: ColumnCoordinate,
}

impl SecondaryLock {
    pub fn new(meta: LockMeta, primary: ColumnCoordinate) -> Self {
        Self { meta, primary }
    }

    /// A primary lock view whose only secondary is this lock. The primary's
    /// mutation type is unknown from here and is reported as the secondary's.
    pub fn primary_lock(&self) -> PrimaryLock {
        let mut meta = LockMeta::new(
            self.meta.mutation_type,
            self.meta.timestamp,
            self.meta.wall_time,
            &self.meta.client_addr,
        );
        meta.coordinate = Some(self.primary.clone());
        meta.expired = self.meta.expired;
        let mut primary = PrimaryLock::new(meta);
        if let Some(coordinate) = &self.meta.coordinate {
            primary.add_secondary(coordinate.clone(), self.meta.mutation_type);
        }
        primary
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lock {
    Primary(PrimaryLock),
    Secondary(SecondaryLock),
}

impl Lock {
    pub fn meta(&self) -> &LockMeta {
        match self {
            Lock::Primary(l) => &l.meta,
            Lock::Secondary(l) => &l.meta,
        }
    }

    pub fn meta_mut(&mut self) -> &mut LockMeta {
        match self {
            Lock::Primary(l) => &mut l.meta,
            Lock::Secondary(l) => &mut l.meta,
        }
    }

    pub fn is_primary(&self) -> bool {
        matches!(self, Lock::Primary(_))
    }

    pub fn timestamp(&self) -> u64 {
        self.meta().timestamp
    }

    pub fn coordinate(&self) -> Option<&ColumnCoordinate> {
        self.meta().coordinate.as_ref()
    }

    pub fn set_coordinate(&mut self, coordinate: ColumnCoordinate) {
        self.meta_mut().coordinate = Some(coordinate);
    }

    pub fn is_expired(&self) -> bool {
        self.meta().expired
    }

    pub fn set_expired(&mut self, expired: bool) {
        self.meta_mut().expired = expired;
    }

    /// The primary lock of the owning transaction, as far as this lock knows it.
    pub fn primary(&self) -> PrimaryLock {
        match self {
            Lock::Primary(l) => l.clone(),
            Lock::Secondary(l) => l.primary_lock(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        codec::encode(self)
    }

    pub fn decode(bytes: &[u8]) -> crate::errors::Result<Lock> {
        codec::decode(bytes)
    }
}
