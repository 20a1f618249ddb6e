//! B-tree page layout (spec §3 "B-tree page", §4.4), ported from the
//! teacher's `physical/btree/mod.rs`.

pub mod cursor;
pub mod mutator;

use zerocopy::big_endian::U16;
use zerocopy::FromBytes;

use crate::error::{Error, Result};
use crate::pager::header::reserved;
use crate::varint;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BTreePageType {
    InteriorIndex,
    InteriorTable,
    LeafIndex,
    LeafTable,
}

impl BTreePageType {
    pub fn is_leaf(self) -> bool {
        matches!(self, BTreePageType::LeafIndex | BTreePageType::LeafTable)
    }

    pub fn is_table(self) -> bool {
        matches!(self, BTreePageType::InteriorTable | BTreePageType::LeafTable)
    }

    pub fn header_size(self) -> u16 {
        if self.is_leaf() {
            8
        } else {
            12
        }
    }
}

impl TryFrom<u8> for BTreePageType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x02 => Ok(BTreePageType::InteriorIndex),
            0x05 => Ok(BTreePageType::InteriorTable),
            0x0a => Ok(BTreePageType::LeafIndex),
            0x0d => Ok(BTreePageType::LeafTable),
            other => Err(Error::UnknownPageType(other)),
        }
    }
}

impl From<BTreePageType> for u8 {
    fn from(value: BTreePageType) -> Self {
        match value {
            BTreePageType::InteriorIndex => 0x02,
            BTreePageType::InteriorTable => 0x05,
            BTreePageType::LeafIndex => 0x0a,
            BTreePageType::LeafTable => 0x0d,
        }
    }
}

/// A read-only view over one b-tree page's bytes (owned, since the page
/// source may not be able to hand out a borrow — see DESIGN.md).
#[derive(Debug, Clone)]
pub struct BTreePage {
    pub page_number: u32,
    data: Box<[u8]>,
}

impl BTreePage {
    pub fn new(page_number: u32, data: Box<[u8]>) -> Result<Self> {
        let start = reserved(page_number);
        let flags = *data.get(start).ok_or(Error::MalformedCell {
            page: page_number,
            reason: "page too short for header".into(),
        })?;
        BTreePageType::try_from(flags)?;
        Ok(Self { page_number, data })
    }

    fn start(&self) -> usize {
        reserved(self.page_number)
    }

    pub fn page_type(&self) -> BTreePageType {
        BTreePageType::try_from(self.data[self.start()]).unwrap()
    }

    pub fn cell_count(&self) -> u16 {
        let start = self.start();
        U16::read_from_prefix(&self.data[start + 3..]).unwrap().get()
    }

    pub fn right_most_pointer(&self) -> u32 {
        let start = self.start();
        zerocopy::big_endian::U32::read_from_prefix(&self.data[start + 8..])
            .unwrap()
            .get()
    }

    pub fn cell_content_start(&self) -> u16 {
        let start = self.start();
        let raw = U16::read_from_prefix(&self.data[start + 5..]).unwrap().get();
        if raw == 0 {
            65535
        } else {
            raw
        }
    }

    fn cell_pointer(&self, cell_index: u16) -> u16 {
        let start = self.start() + self.page_type().header_size() as usize + cell_index as usize * 2;
        U16::read_from_prefix(&self.data[start..]).unwrap().get()
    }

    fn cell(&self, cell_index: u16) -> &[u8] {
        let ptr = self.cell_pointer(cell_index);
        &self.data[ptr as usize..]
    }

    /// Returns `(row_id, record_bytes)` for a table-leaf cell.
    pub fn leaf_table_cell(&self, cell_index: u16) -> Result<(i64, &[u8])> {
        if self.page_type() != BTreePageType::LeafTable {
            return Err(Error::MalformedCell {
                page: self.page_number,
                reason: "not a leaf table page".into(),
            });
        }
        let mut cell = self.cell(cell_index);
        let (payload_size, len) = varint::read(cell);
        cell = &cell[len..];
        let (row_id, len) = varint::read(cell);
        cell = &cell[len..];
        if payload_size as usize > cell.len() {
            return Err(Error::CellTooLarge(payload_size as usize));
        }
        Ok((row_id, &cell[..payload_size as usize]))
    }

    /// Returns `(left_child_page, key)` for a table-interior cell.
    pub fn interior_table_cell(&self, cell_index: u16) -> Result<(u32, i64)> {
        if self.page_type() != BTreePageType::InteriorTable {
            return Err(Error::MalformedCell {
                page: self.page_number,
                reason: "not an interior table page".into(),
            });
        }
        let cell = self.cell(cell_index);
        let left_child = zerocopy::big_endian::U32::read_from_prefix(cell).unwrap().get();
        let (row_id, _) = varint::read(&cell[4..]);
        Ok((left_child, row_id))
    }

    pub fn leaf_index_cell(&self, cell_index: u16) -> Result<&[u8]> {
        if self.page_type() != BTreePageType::LeafIndex {
            return Err(Error::MalformedCell {
                page: self.page_number,
                reason: "not a leaf index page".into(),
            });
        }
        let mut cell = self.cell(cell_index);
        let (payload_size, len) = varint::read(cell);
        cell = &cell[len..];
        if payload_size as usize > cell.len() {
            return Err(Error::CellTooLarge(payload_size as usize));
        }
        Ok(&cell[..payload_size as usize])
    }

    pub fn interior_index_cell(&self, cell_index: u16) -> Result<(u32, &[u8])> {
        if self.page_type() != BTreePageType::InteriorIndex {
            return Err(Error::MalformedCell {
                page: self.page_number,
                reason: "not an interior index page".into(),
            });
        }
        let cell = self.cell(cell_index);
        let left_child = zerocopy::big_endian::U32::read_from_prefix(cell).unwrap().get();
        let mut rest = &cell[4..];
        let (payload_size, len) = varint::read(rest);
        rest = &rest[len..];
        Ok((left_child, &rest[..payload_size as usize]))
    }
}
