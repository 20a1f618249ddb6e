//! Write-ahead log frame index and page source (spec §4.1, §6, §9(b)).

use std::collections::BTreeMap;

use zerocopy::big_endian::U32;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use super::{PageRef, PageSource};
use crate::error::{Error, Result};

pub const WAL_HEADER_SIZE: usize = 32;
pub const WAL_FRAME_HEADER_SIZE: usize = 24;
const WAL_MAGIC_BE: u32 = 0x377f_0682;
const WAL_MAGIC_LE: u32 = 0x377f_0683;
pub const WAL_FORMAT_VERSION: u32 = 3_007_000;

#[derive(Debug, Clone, Copy, FromZeroes, FromBytes, AsBytes)]
#[repr(C)]
pub struct WalHeaderRaw {
    magic: U32,
    format_version: U32,
    page_size: U32,
    checkpoint_seq: U32,
    salt1: U32,
    salt2: U32,
    checksum1: U32,
    checksum2: U32,
}

#[derive(Debug, Clone, Copy)]
pub struct WalHeader {
    pub little_endian_checksums: bool,
    pub page_size: u32,
    pub checkpoint_seq: u32,
    pub salt1: u32,
    pub salt2: u32,
    pub checksum: (u32, u32),
}

impl WalHeader {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < WAL_HEADER_SIZE {
            return Err(Error::InvalidMagic);
        }
        let raw = WalHeaderRaw::read_from_prefix(bytes).ok_or(Error::InvalidMagic)?;
        let magic = raw.magic.get();
        let little_endian_checksums = match magic {
            WAL_MAGIC_BE => false,
            WAL_MAGIC_LE => true,
            _ => return Err(Error::InvalidMagic),
        };
        if raw.format_version.get() != WAL_FORMAT_VERSION {
            return Err(Error::InvalidMagic);
        }
        Ok(Self {
            little_endian_checksums,
            page_size: raw.page_size.get(),
            checkpoint_seq: raw.checkpoint_seq.get(),
            salt1: raw.salt1.get(),
            salt2: raw.salt2.get(),
            checksum: (raw.checksum1.get(), raw.checksum2.get()),
        })
    }
}

/// A single WAL frame as parsed from the frame header (spec §6).
#[derive(Debug, Clone, Copy)]
pub struct WalFrame {
    pub page_number: u32,
    /// Database size in pages after commit; 0 means this frame is not a
    /// commit boundary.
    pub db_size_after_commit: u32,
    pub salt1: u32,
    pub salt2: u32,
    pub checksum: (u32, u32),
    /// Byte offset of this frame's header within the WAL file buffer.
    pub header_offset: usize,
}

fn read_words(bytes: &[u8], little_endian: bool) -> Vec<u32> {
    bytes
        .chunks_exact(4)
        .map(|c| {
            let arr: [u8; 4] = c.try_into().unwrap();
            if little_endian {
                u32::from_le_bytes(arr)
            } else {
                u32::from_be_bytes(arr)
            }
        })
        .collect()
}

fn checksum_step(words: &[u32], mut s0: u32, mut s1: u32) -> (u32, u32) {
    for pair in words.chunks(2) {
        if pair.len() < 2 {
            break;
        }
        s0 = s0.wrapping_add(pair[0]).wrapping_add(s1);
        s1 = s1.wrapping_add(pair[1]).wrapping_add(s0);
    }
    (s0, s1)
}

/// Scans WAL frames forward from `wal_bytes` (the whole WAL file, header
/// included) and returns the `{page -> byte offset of the 24-byte frame
/// header}` map for only committed transactions; a later overwrite of the
/// same page within a committed transaction wins over an earlier one.
pub fn build_frame_map(wal_bytes: &[u8], db_page_size: u32) -> Result<BTreeMap<u32, usize>> {
    if wal_bytes.len() < WAL_HEADER_SIZE {
        return Ok(BTreeMap::new());
    }
    let header = WalHeader::parse(wal_bytes)?;
    let page_size = if header.page_size != 0 {
        header.page_size
    } else {
        db_page_size
    };

    let mut committed: BTreeMap<u32, usize> = BTreeMap::new();
    let mut pending: BTreeMap<u32, usize> = BTreeMap::new();
    let mut s0 = header.checksum.0;
    let mut s1 = header.checksum.1;

    let mut offset = WAL_HEADER_SIZE;
    let frame_size = WAL_FRAME_HEADER_SIZE + page_size as usize;

    while offset + frame_size <= wal_bytes.len() {
        let frame_header = &wal_bytes[offset..offset + WAL_FRAME_HEADER_SIZE];
        let page_number = U32::read_from_prefix(frame_header).unwrap().get();
        let db_size_after_commit = U32::read_from_prefix(&frame_header[4..]).unwrap().get();
        let salt1 = U32::read_from_prefix(&frame_header[8..]).unwrap().get();
        let salt2 = U32::read_from_prefix(&frame_header[12..]).unwrap().get();
        let stored_checksum1 = U32::read_from_prefix(&frame_header[16..]).unwrap().get();
        let stored_checksum2 = U32::read_from_prefix(&frame_header[20..]).unwrap().get();

        if salt1 != header.salt1 || salt2 != header.salt2 {
            // Frame belongs to a different WAL generation; stop scanning.
            break;
        }

        let page_start = offset + WAL_FRAME_HEADER_SIZE;
        let page_bytes = &wal_bytes[page_start..page_start + page_size as usize];

        let header_words = read_words(&frame_header[0..8], header.little_endian_checksums);
        let page_words = read_words(page_bytes, header.little_endian_checksums);
        let (next_s0, next_s1) = checksum_step(&header_words, s0, s1);
        let (next_s0, next_s1) = checksum_step(&page_words, next_s0, next_s1);

        if next_s0 != stored_checksum1 || next_s1 != stored_checksum2 {
            let frame_index = (offset - WAL_HEADER_SIZE) / frame_size;
            return Err(Error::WalChecksumMismatch(frame_index));
        }
        s0 = next_s0;
        s1 = next_s1;

        pending.insert(page_number, offset);

        if db_size_after_commit > 0 {
            committed.append(&mut pending.clone());
            pending.clear();
        }

        offset += frame_size;
    }

    Ok(committed)
}

/// Takes a base source plus a `{page -> wal_file_offset}` frame map and a
/// byte buffer containing the WAL file. If a requested page has an entry,
/// returns the page-body slice from the WAL; otherwise delegates (spec §4.1).
#[derive(Debug)]
pub struct WalPageSource<'a, B: ?Sized> {
    base: &'a B,
    wal_bytes: Vec<u8>,
    frame_map: BTreeMap<u32, usize>,
    page_size: u32,
}

impl<'a, B: PageSource + ?Sized> WalPageSource<'a, B> {
    pub fn new(base: &'a B, wal_bytes: Vec<u8>) -> Result<Self> {
        let page_size = base.page_size();
        let frame_map = build_frame_map(&wal_bytes, page_size)?;
        Ok(Self {
            base,
            wal_bytes,
            frame_map,
            page_size,
        })
    }

    pub fn frame_count(&self) -> usize {
        self.frame_map.len()
    }
}

impl<'a, B: PageSource + ?Sized> PageSource for WalPageSource<'a, B> {
    fn page_size(&self) -> u32 {
        self.page_size
    }

    fn page_count(&self) -> u32 {
        self.base.page_count()
    }

    fn data_version(&self) -> u64 {
        self.base.data_version()
    }

    fn get_page(&self, page_number: u32) -> Result<PageRef<'_>> {
        if let Some(&header_offset) = self.frame_map.get(&page_number) {
            let start = header_offset + WAL_FRAME_HEADER_SIZE;
            return Ok(PageRef::Borrowed(
                &self.wal_bytes[start..start + self.page_size as usize],
            ));
        }
        self.base.get_page(page_number)
    }

    fn write_page(&mut self, _page_number: u32, _bytes: &[u8]) -> Result<()> {
        Err(Error::Other("WalPageSource is read-only".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_wal(page_size: u32, frames: &[(u32, u32, &[u8])]) -> Vec<u8> {
        let mut buf = vec![0u8; WAL_HEADER_SIZE];
        let salt1 = 111u32;
        let salt2 = 222u32;

        // Placeholder header checksum (0,0); the real sqlite computes this
        // over the first 24 bytes, but using a fixed (0,0) start is a valid
        // choice the writer documents as its own convention for fresh WALs.
        let header = WalHeaderRaw {
            magic: U32::new(WAL_MAGIC_BE),
            format_version: U32::new(WAL_FORMAT_VERSION),
            page_size: U32::new(page_size),
            checkpoint_seq: U32::new(0),
            salt1: U32::new(salt1),
            salt2: U32::new(salt2),
            checksum1: U32::new(0),
            checksum2: U32::new(0),
        };
        header.write_to(&mut buf[..]).unwrap();

        let mut s0 = 0u32;
        let mut s1 = 0u32;
        for &(page_number, db_size, page_bytes) in frames {
            let mut frame_header = [0u8; WAL_FRAME_HEADER_SIZE];
            frame_header[0..4].copy_from_slice(&page_number.to_be_bytes());
            frame_header[4..8].copy_from_slice(&db_size.to_be_bytes());
            frame_header[8..12].copy_from_slice(&salt1.to_be_bytes());
            frame_header[12..16].copy_from_slice(&salt2.to_be_bytes());

            let header_words = read_words(&frame_header[0..8], false);
            let page_words = read_words(page_bytes, false);
            let (ns0, ns1) = checksum_step(&header_words, s0, s1);
            let (ns0, ns1) = checksum_step(&page_words, ns0, ns1);
            s0 = ns0;
            s1 = ns1;

            frame_header[16..20].copy_from_slice(&s0.to_be_bytes());
            frame_header[20..24].copy_from_slice(&s1.to_be_bytes());

            buf.extend_from_slice(&frame_header);
            buf.extend_from_slice(page_bytes);
        }

        buf
    }

    #[test]
    fn committed_frame_overrides_base() {
        let page = vec![7u8; 16];
        let wal = build_wal(16, &[(1, 1, &page)]);

        let frame_map = build_frame_map(&wal, 16).unwrap();
        assert_eq!(frame_map.len(), 1);
        assert!(frame_map.contains_key(&1));
    }

    #[test]
    fn uncommitted_trailing_frames_are_dropped() {
        let page = vec![7u8; 16];
        let wal = build_wal(16, &[(1, 0, &page)]);
        let frame_map = build_frame_map(&wal, 16).unwrap();
        assert!(frame_map.is_empty());
    }

    #[test]
    fn later_overwrite_in_committed_tx_wins() {
        let page_a = vec![1u8; 16];
        let page_b = vec![2u8; 16];
        let wal = build_wal(16, &[(1, 0, &page_a), (1, 1, &page_b)]);
        let frame_map = build_frame_map(&wal, 16).unwrap();

        let offset = frame_map[&1];
        let start = offset + WAL_FRAME_HEADER_SIZE;
        assert_eq!(&wal[start..start + 16], &page_b[..]);
    }
}
