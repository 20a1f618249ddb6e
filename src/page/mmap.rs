use memmap2::Mmap;
use std::fs::File;

use super::{FilePageSource, PageRef, PageSource};
use crate::error::Result;

/// Maps the file read-only; `get_page` returns a slice into the mapping
/// (true zero-copy). If the OS denies mapping, falls back to file mode
/// (spec §4.1).
#[derive(Debug)]
pub enum MemoryMappedPageSource {
    Mapped {
        mmap: Mmap,
        page_size: u32,
        page_count: u32,
    },
    Fallback(FilePageSource),
}

impl MemoryMappedPageSource {
    pub fn open(path: &str, page_size: u32) -> Result<Self> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(_) => return Ok(Self::Fallback(FilePageSource::open(path, page_size, false)?)),
        };

        match unsafe { Mmap::map(&file) } {
            Ok(mmap) => {
                let page_count = (mmap.len() / page_size as usize) as u32;
                Ok(Self::Mapped {
                    mmap,
                    page_size,
                    page_count,
                })
            }
            Err(_) => Ok(Self::Fallback(FilePageSource::open(path, page_size, false)?)),
        }
    }

    pub fn is_mapped(&self) -> bool {
        matches!(self, Self::Mapped { .. })
    }
}

impl PageSource for MemoryMappedPageSource {
    fn page_size(&self) -> u32 {
        match self {
            Self::Mapped { page_size, .. } => *page_size,
            Self::Fallback(f) => f.page_size(),
        }
    }

    fn page_count(&self) -> u32 {
        match self {
            Self::Mapped { page_count, .. } => *page_count,
            Self::Fallback(f) => f.page_count(),
        }
    }

    fn data_version(&self) -> u64 {
        match self {
            Self::Mapped { .. } => 0,
            Self::Fallback(f) => f.data_version(),
        }
    }

    fn get_page(&self, page_number: u32) -> Result<PageRef<'_>> {
        match self {
            Self::Mapped {
                mmap, page_size, ..
            } => {
                self.check_bounds(page_number)?;
                let start = (page_number as usize - 1) * *page_size as usize;
                Ok(PageRef::Borrowed(&mmap[start..start + *page_size as usize]))
            }
            Self::Fallback(f) => f.get_page(page_number),
        }
    }

    fn write_page(&mut self, page_number: u32, bytes: &[u8]) -> Result<()> {
        match self {
            Self::Mapped { .. } => Err(crate::error::Error::Other(
                "memory-mapped source is read-only".into(),
            )),
            Self::Fallback(f) => f.write_page(page_number, bytes),
        }
    }
}
