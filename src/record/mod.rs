//! SQLite serial-type record codec (spec §4.3), grounded on the teacher's
//! `schema/record` module but generalized for encoding and zero-copy column
//! access rather than just `serde`-backed decoding.

mod ints;

pub use ints::{I24, I48};

use crate::error::{Error, Result};
use crate::varint;

/// A single column's decoded value.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Null,
    Int(i64),
    Float(f64),
    Text(Vec<u8>),
    Blob(Vec<u8>),
}

impl ColumnValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ColumnValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&[u8]> {
        match self {
            ColumnValue::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_text().and_then(|b| std::str::from_utf8(b).ok())
    }
}

fn serial_type_for(value: &ColumnValue) -> (u64, usize) {
    match value {
        ColumnValue::Null => (0, 0),
        ColumnValue::Int(0) => (8, 0),
        ColumnValue::Int(1) => (9, 0),
        ColumnValue::Int(v) => {
            if *v >= i8::MIN as i64 && *v <= i8::MAX as i64 {
                (1, 1)
            } else if *v >= i16::MIN as i64 && *v <= i16::MAX as i64 {
                (2, 2)
            } else if *v >= -(1 << 23) && *v < (1 << 23) {
                (3, 3)
            } else if *v >= i32::MIN as i64 && *v <= i32::MAX as i64 {
                (4, 4)
            } else if *v >= -(1i64 << 47) && *v < (1i64 << 47) {
                (5, 6)
            } else {
                (6, 8)
            }
        }
        ColumnValue::Float(_) => (7, 8),
        ColumnValue::Blob(b) => (12 + 2 * b.len() as u64, b.len()),
        ColumnValue::Text(t) => (13 + 2 * t.len() as u64, t.len()),
    }
}

/// Computes the total encoded size (header + body) for a row's columns.
pub fn compute_encoded_size(columns: &[ColumnValue]) -> usize {
    let mut body_size = 0;
    let mut header_payload_size = 0;
    for col in columns {
        let (serial_type, size) = serial_type_for(col);
        header_payload_size += varint::encoded_len(serial_type as i64);
        body_size += size;
    }

    // The header itself begins with a varint of its own total size, which
    // can in turn change the header's length; recompute once if needed
    // (spec §4.3 "Header length self-consistency").
    let mut header_size = varint::encoded_len(header_payload_size as i64) + header_payload_size;
    let recomputed = varint::encoded_len(header_size as i64) + header_payload_size;
    if recomputed != header_size {
        header_size = recomputed;
    }

    header_size + body_size
}

/// Encodes `columns` into `buf`, appending the record bytes.
pub fn encode_record(columns: &[ColumnValue], buf: &mut Vec<u8>) {
    let mut header_payload = Vec::new();
    let mut body = Vec::new();

    for col in columns {
        let (serial_type, _size) = serial_type_for(col);
        let mut vb = [0u8; 9];
        let len = varint::write(serial_type as i64, &mut vb);
        header_payload.extend_from_slice(&vb[..len]);

        match col {
            ColumnValue::Null | ColumnValue::Int(0) | ColumnValue::Int(1) => {}
            ColumnValue::Int(v) => {
                let (_, size) = serial_type_for(col);
                let bytes = v.to_be_bytes();
                body.extend_from_slice(&bytes[8 - size..]);
            }
            ColumnValue::Float(f) => body.extend_from_slice(&f.to_be_bytes()),
            ColumnValue::Blob(b) => body.extend_from_slice(b),
            ColumnValue::Text(t) => body.extend_from_slice(t),
        }
    }

    let header_payload_size = header_payload.len();
    let mut header_size = varint::encoded_len(header_payload_size as i64) + header_payload_size;
    let mut hb = [0u8; 9];
    let mut hlen = varint::write(header_size as i64, &mut hb);
    if varint::encoded_len((hlen + header_payload_size) as i64) + header_payload_size != header_size
    {
        header_size = varint::encoded_len((hlen + header_payload_size) as i64) + header_payload_size;
        hlen = varint::write(header_size as i64, &mut hb);
    }

    buf.extend_from_slice(&hb[..hlen]);
    buf.extend_from_slice(&header_payload);
    buf.extend_from_slice(&body);
}

/// Decodes every column from `bytes` into owned `ColumnValue`s.
pub fn decode_record(bytes: &[u8]) -> Result<Vec<ColumnValue>> {
    let (header_size, consumed) = varint::read(bytes);
    if header_size < 1 {
        return Err(Error::BadHeaderSize);
    }
    let header_size = header_size as usize;
    if header_size > bytes.len() {
        return Err(Error::BadHeaderSize);
    }

    let mut serial_types = Vec::new();
    let mut pos = consumed;
    while pos < header_size {
        let (ty, len) = varint::read(&bytes[pos..]);
        serial_types.push(ty as u64);
        pos += len;
    }

    let mut body = &bytes[header_size..];
    let mut columns = Vec::with_capacity(serial_types.len());
    for ty in serial_types {
        columns.push(decode_one(ty, &mut body)?);
    }
    Ok(columns)
}

fn decode_one(serial_type: u64, body: &mut &[u8]) -> Result<ColumnValue> {
    Ok(match serial_type {
        0 => ColumnValue::Null,
        1 => {
            let v = body.first().copied().ok_or(Error::BadVarint)? as i8;
            *body = &body[1..];
            ColumnValue::Int(v as i64)
        }
        2 => {
            let bytes: [u8; 2] = body[..2].try_into().map_err(|_| Error::BadVarint)?;
            *body = &body[2..];
            ColumnValue::Int(i16::from_be_bytes(bytes) as i64)
        }
        3 => {
            let bytes = &body[..3];
            let mut sign_extended = [0u8; 4];
            sign_extended[1..].copy_from_slice(bytes);
            if bytes[0] & 0x80 != 0 {
                sign_extended[0] = 0xff;
            }
            *body = &body[3..];
            ColumnValue::Int(i32::from_be_bytes(sign_extended) as i64)
        }
        4 => {
            let bytes: [u8; 4] = body[..4].try_into().map_err(|_| Error::BadVarint)?;
            *body = &body[4..];
            ColumnValue::Int(i32::from_be_bytes(bytes) as i64)
        }
        5 => {
            let bytes = &body[..6];
            let mut sign_extended = [0u8; 8];
            sign_extended[2..].copy_from_slice(bytes);
            if bytes[0] & 0x80 != 0 {
                sign_extended[0] = 0xff;
                sign_extended[1] = 0xff;
            }
            *body = &body[6..];
            ColumnValue::Int(i64::from_be_bytes(sign_extended))
        }
        6 => {
            let bytes: [u8; 8] = body[..8].try_into().map_err(|_| Error::BadVarint)?;
            *body = &body[8..];
            ColumnValue::Int(i64::from_be_bytes(bytes))
        }
        7 => {
            let bytes: [u8; 8] = body[..8].try_into().map_err(|_| Error::BadVarint)?;
            *body = &body[8..];
            ColumnValue::Float(f64::from_be_bytes(bytes))
        }
        8 => ColumnValue::Int(0),
        9 => ColumnValue::Int(1),
        10 | 11 => return Err(Error::BadHeaderSize),
        n if n % 2 == 0 => {
            let len = ((n - 12) / 2) as usize;
            let bytes = body.get(..len).ok_or(Error::BadVarint)?.to_vec();
            *body = &body[len..];
            ColumnValue::Blob(bytes)
        }
        n => {
            let len = ((n - 13) / 2) as usize;
            let bytes = body.get(..len).ok_or(Error::BadVarint)?.to_vec();
            *body = &body[len..];
            ColumnValue::Text(bytes)
        }
    })
}

/// Reads the serial types from a record payload into `types_buf`, returning
/// the column count and the offset where the column bodies begin. Zero-copy:
/// no allocation, callers supply the scratch buffer (spec §4.3).
pub fn read_serial_types(payload: &[u8], types_buf: &mut Vec<u64>) -> Result<(usize, usize)> {
    types_buf.clear();
    let (header_size, consumed) = varint::read(payload);
    if header_size < 1 || header_size as usize > payload.len() {
        return Err(Error::BadHeaderSize);
    }
    let header_size = header_size as usize;
    let mut pos = consumed;
    while pos < header_size {
        let (ty, len) = varint::read(&payload[pos..]);
        types_buf.push(ty as u64);
        pos += len;
    }
    Ok((types_buf.len(), header_size))
}

fn serial_type_body_len(serial_type: u64) -> usize {
    match serial_type {
        0 | 8 | 9 => 0,
        1 => 1,
        2 => 2,
        3 => 3,
        4 => 4,
        5 => 6,
        6 | 7 => 8,
        n if n % 2 == 0 => ((n - 12) / 2) as usize,
        n => ((n - 13) / 2) as usize,
    }
}

/// Fills `out_offsets` with `(start, len)` spans (relative to `payload`) for
/// each of the `count` columns described by `types`, starting at
/// `body_offset`. Zero-copy: the returned spans index directly into
/// `payload` (spec §4.3).
pub fn compute_column_offsets(
    types: &[u64],
    count: usize,
    body_offset: usize,
    out_offsets: &mut Vec<(usize, usize)>,
) {
    out_offsets.clear();
    let mut pos = body_offset;
    for &ty in types.iter().take(count) {
        let len = serial_type_body_len(ty);
        out_offsets.push((pos, len));
        pos += len;
    }
}

/// Materializes a string for the column at `offset` only when needed (used
/// by the entitlement-tag row evaluator, spec §4.9).
pub fn decode_string_at<'a>(payload: &'a [u8], serial_type: u64, offset: usize) -> Result<&'a str> {
    let len = serial_type_body_len(serial_type);
    let bytes = payload
        .get(offset..offset + len)
        .ok_or(Error::ColumnOutOfRange {
            index: offset,
            count: payload.len(),
        })?;
    std::str::from_utf8(bytes).map_err(|_| Error::BadVarint)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_basic_types() {
        let columns = vec![
            ColumnValue::Null,
            ColumnValue::Int(0),
            ColumnValue::Int(1),
            ColumnValue::Int(42),
            ColumnValue::Int(-42),
            ColumnValue::Int(70000),
            ColumnValue::Int(i64::MAX),
            ColumnValue::Float(3.5),
            ColumnValue::Text(b"hello".to_vec()),
            ColumnValue::Blob(vec![1, 2, 3]),
        ];

        let mut buf = Vec::new();
        encode_record(&columns, &mut buf);
        assert_eq!(buf.len(), compute_encoded_size(&columns));

        let decoded = decode_record(&buf).unwrap();
        assert_eq!(decoded, columns);
    }

    #[test]
    fn zero_copy_offsets_match_decode() {
        let columns = vec![
            ColumnValue::Int(7),
            ColumnValue::Text(b"tag:public".to_vec()),
        ];
        let mut buf = Vec::new();
        encode_record(&columns, &mut buf);

        let mut types = Vec::new();
        let (count, body_offset) = read_serial_types(&buf, &mut types).unwrap();
        assert_eq!(count, 2);

        let mut offsets = Vec::new();
        compute_column_offsets(&types, count, body_offset, &mut offsets);

        let (start, len) = offsets[1];
        let text = decode_string_at(&buf, types[1], start).unwrap();
        assert_eq!(len, text.len());
        assert_eq!(text, "tag:public");
    }

    #[test]
    fn header_size_self_consistency_for_many_columns() {
        // Enough columns that the header-size varint itself flips from 1 to 2 bytes.
        let columns: Vec<_> = (0..80).map(ColumnValue::Int).collect();
        let mut buf = Vec::new();
        encode_record(&columns, &mut buf);
        assert_eq!(buf.len(), compute_encoded_size(&columns));
        let decoded = decode_record(&buf).unwrap();
        assert_eq!(decoded, columns);
    }
}
