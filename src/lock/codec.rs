//! Binary form of a lock, as stored in lock cells.
//!
//! ```text
//! u8   is_primary (0 | 1)
//! u8   mutation type code
//! i64  prewrite timestamp            big endian
//! var  client address                uvarint length + utf-8 bytes
//! i64  wall time (ms)                big endian
//! primary:   i32 secondary count, then per secondary
//!            var table, var row, var family, var qualifier, u8 type
//! secondary: var table, var row, var family, var qualifier of the primary
//! ```

use std::io::Read;

use byteorder::{BigEndian, ByteOrder, ReadBytesExt};

use crate::data_store::cell::{Column, ColumnCoordinate, MutationType};
use crate::errors::{Result, ThothError};
use crate::lock::{Lock, LockMeta, PrimaryLock, SecondaryLock};

pub fn encode(lock: &Lock) -> Vec<u8> {
    let meta = lock.meta();
    let mut buf = Vec::with_capacity(64);
    buf.push(lock.is_primary() as u8);
    buf.push(meta.mutation_type.code());
    put_i64(&mut buf, meta.timestamp as i64);
    put_varbytes(&mut buf, meta.client_addr.as_bytes());
    put_i64(&mut buf, meta.wall_time as i64);

    match lock {
        Lock::Primary(primary) => {
            let secondaries = primary.secondary_columns();
            let mut count = [0u8; 4];
            BigEndian::write_i32(&mut count, secondaries.len() as i32);
            buf.extend_from_slice(&count);
            for (coordinate, mutation_type) in secondaries {
                put_coordinate(&mut buf, coordinate);
                buf.push(mutation_type.code());
            }
        }
        Lock::Secondary(secondary) => put_coordinate(&mut buf, &secondary.primary),
    }
    buf
}

pub fn decode(bytes: &[u8]) -> Result<Lock> {
    let mut reader = bytes;
    let is_primary = match read_u8(&mut reader)? {
        0 => false,
        1 => true,
        other => return Err(invalid(format!("bad role byte {other}"))),
    };
    let mutation_type = MutationType::from_code(read_u8(&mut reader)?)?;
    let timestamp = read_i64(&mut reader)? as u64;
    let client_addr = String::from_utf8(read_varbytes(&mut reader)?)
        .map_err(|e| invalid(format!("client address is not utf-8: {e}")))?;
    let wall_time = read_i64(&mut reader)? as u64;
    let meta = LockMeta::new(mutation_type, timestamp, wall_time, &client_addr);

    let lock = if is_primary {
        let count = reader
            .read_i32::<BigEndian>()
            .map_err(|_| invalid("truncated secondary count".into()))?;
        if count < 0 {
            return Err(invalid(format!("negative secondary count {count}")));
        }
        let mut primary = PrimaryLock::new(meta);
        for _ in 0..count {
            let coordinate = read_coordinate(&mut reader)?;
            let mutation_type = MutationType::from_code(read_u8(&mut reader)?)?;
            primary.add_secondary(coordinate, mutation_type);
        }
        Lock::Primary(primary)
    } else {
        Lock::Secondary(SecondaryLock::new(meta, read_coordinate(&mut reader)?))
    };

    if !reader.is_empty() {
        return Err(invalid(format!("{} trailing bytes", reader.len())));
    }
    Ok(lock)
}

fn invalid(reason: String) -> ThothError {
    ThothError::InvalidLock(reason)
}

fn put_i64(buf: &mut Vec<u8>, value: i64) {
    let mut bytes = [0u8; 8];
    BigEndian::write_i64(&mut bytes, value);
    buf.extend_from_slice(&bytes);
}

pub(crate) fn put_uvarint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
}

fn put_varbytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    put_uvarint(buf, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

fn put_coordinate(buf: &mut Vec<u8>, coordinate: &ColumnCoordinate) {
    put_varbytes(buf, &coordinate.table);
    put_varbytes(buf, &coordinate.row);
    put_varbytes(buf, &coordinate.column.family);
    put_varbytes(buf, &coordinate.column.qualifier);
}

fn read_u8(reader: &mut &[u8]) -> Result<u8> {
    reader.read_u8().map_err(|_| invalid("truncated".into()))
}

fn read_i64(reader: &mut &[u8]) -> Result<i64> {
    reader
        .read_i64::<BigEndian>()
        .map_err(|_| invalid("truncated timestamp".into()))
}

pub(crate) fn read_uvarint(reader: &mut &[u8]) -> Result<u64> {
    let mut value: u64 = 0;
    let mut shift = 0;
    loop {
        let byte = read_u8(reader)?;
        if shift == 63 && byte > 1 {
            return Err(invalid("varint overflows u64".into()));
        }
        value |= ((byte & 0x7F) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
        if shift > 63 {
            return Err(invalid("varint overflows u64".into()));
        }
    }
}

fn read_varbytes(reader: &mut &[u8]) -> Result<Vec<u8>> {
    let len = read_uvarint(reader)?;
    if len > reader.len() as u64 {
        return Err(invalid(format!(
            "length {len} exceeds remaining {} bytes",
            reader.len()
        )));
    }
    let mut bytes = vec![0u8; len as usize];
    reader
        .read_exact(&mut bytes)
        .map_err(|_| invalid("truncated bytes".into()))?;
    Ok(bytes)
}

fn read_coordinate(reader: &mut &[u8]) -> Result<ColumnCoordinate> {
    let table = read_varbytes(reader)?;
    let row = read_varbytes(reader)?;
    let family = read_varbytes(reader)?;
    let qualifier = read_varbytes(reader)?;
    Ok(ColumnCoordinate::new(table, row, Column::new(family, qualifier)))
}
