use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use crate::errors::{Result, ThothError};

/// Bits of a timestamp used by the logical counter.
pub const LOGICAL_BITS: u32 = 18;
const MAX_LOGICAL: u64 = 1 << LOGICAL_BITS;

/// Timestamp oracle.
///
/// Timestamps must increase strictly across every client sharing a store.
/// A production deployment talks to a central oracle service; `LocalOracle`
/// serves single-process use and tests.
pub trait Oracle: Send + Sync {
    fn get_timestamp(&self) -> Result<u64>;

    /// True once a lock written at `ts` has outlived `ttl_ms`.
    fn is_expired(&self, ts: u64, ttl_ms: u64) -> bool;
}

pub fn compose_ts(physical_ms: u64, logical: u64) -> u64 {
    (physical_ms << LOGICAL_BITS) | logical
}

pub fn extract_physical(ts: u64) -> u64 {
    ts >> LOGICAL_BITS
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Hybrid clock: wall-clock milliseconds in the high bits and a logical
/// counter in the low `LOGICAL_BITS` bits.
pub struct LocalOracle {
    last: Mutex<(u64, u64)>,
}

impl LocalOracle {
    pub fn new() -> Self {
        Self {
            last: Mutex::new((0, 0)),
        }
    }
}

impl Default for LocalOracle {
    fn default() -> Self {
        Self::new()
    }
}

impl Oracle for LocalOracle {
    fn get_timestamp(&self) -> Result<u64> {
        let mut last = self.last.lock();
        let now = now_ms();
        if now == 0 {
            return Err(ThothError::OracleError("system clock before epoch".into()));
        }
        let (physical, logical) = if now > last.0 {
            (now, 0)
        } else if last.1 + 1 < MAX_LOGICAL {
            (last.0, last.1 + 1)
        } else {
            // logical space of this millisecond exhausted
            (last.0 + 1, 0)
        };
        *last = (physical, logical);
        Ok(compose_ts(physical, logical))
    }

    fn is_expired(&self, ts: u64, ttl_ms: u64) -> bool {
        extract_physical(ts).saturating_add(ttl_ms) < now_ms()
    }
}
