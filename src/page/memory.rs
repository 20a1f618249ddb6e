use super::{PageRef, PageSource};
use crate::error::{Error, Result};

/// Backs storage in a growable byte vector. `write_page` may grow the
/// logical page count; reads return a slice into the backing memory
/// (zero-copy), per spec §4.1.
#[derive(Debug)]
pub struct MemoryPageSource {
    page_size: u32,
    pages: Vec<u8>,
    data_version: u64,
}

impl MemoryPageSource {
    pub fn new(page_size: u32) -> Self {
        Self {
            page_size,
            pages: Vec::new(),
            data_version: 0,
        }
    }

    pub fn with_page_count(page_size: u32, page_count: u32) -> Self {
        Self {
            page_size,
            pages: vec![0; page_size as usize * page_count as usize],
            data_version: 0,
        }
    }

    fn offset(&self, page_number: u32) -> usize {
        (page_number as usize - 1) * self.page_size as usize
    }
}

impl PageSource for MemoryPageSource {
    fn page_size(&self) -> u32 {
        self.page_size
    }

    fn page_count(&self) -> u32 {
        (self.pages.len() / self.page_size as usize) as u32
    }

    fn data_version(&self) -> u64 {
        self.data_version
    }

    fn get_page(&self, page_number: u32) -> Result<PageRef<'_>> {
        self.check_bounds(page_number)?;
        let start = self.offset(page_number);
        Ok(PageRef::Borrowed(
            &self.pages[start..start + self.page_size as usize],
        ))
    }

    fn write_page(&mut self, page_number: u32, bytes: &[u8]) -> Result<()> {
        if bytes.len() != self.page_size as usize {
            return Err(Error::ShortWrite {
                expected: self.page_size as usize,
                actual: bytes.len(),
            });
        }
        if page_number == 0 {
            return Err(Error::PageOutOfRange {
                page: 0,
                page_count: self.page_count(),
            });
        }
        let needed = page_number as usize * self.page_size as usize;
        if needed > self.pages.len() {
            self.pages.resize(needed, 0);
        }
        let start = self.offset(page_number);
        self.pages[start..start + self.page_size as usize].copy_from_slice(bytes);
        self.data_version += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_on_write() {
        let mut src = MemoryPageSource::new(512);
        assert_eq!(src.page_count(), 0);
        src.write_page(1, &[7u8; 512]).unwrap();
        assert_eq!(src.page_count(), 1);
        assert_eq!(&*src.get_page(1).unwrap(), &[7u8; 512][..]);
    }

    #[test]
    fn read_page_fills_buf() {
        let mut src = MemoryPageSource::new(512);
        src.write_page(1, &[9u8; 512]).unwrap();
        let mut buf = [0u8; 512];
        src.read_page(1, &mut buf).unwrap();
        assert_eq!(buf, [9u8; 512]);
    }

    #[test]
    fn out_of_range_rejected() {
        let src = MemoryPageSource::new(512);
        assert!(src.get_page(1).is_err());
    }
}
