//! Page sources and their overlays (spec §4.1, design note in spec §9).
//!
//! The capability set is kept small and dispatched through a trait object
//! rather than a deep inheritance tree, per spec §9: each concrete source
//! implements the capability set directly, and wrappers (cached, shadow,
//! wal, proxy) delegate by composition.

mod cached;
mod file;
mod memory;
mod mmap;
mod proxy;
mod shadow;
mod wal;

pub use cached::CachedPageSource;
pub use file::FilePageSource;
pub use memory::MemoryPageSource;
pub use mmap::MemoryMappedPageSource;
pub use proxy::ProxyPageSource;
pub use shadow::ShadowPageSource;
pub use wal::{build_frame_map, WalFrame, WalPageSource};

use crate::error::{Error, Result};

/// A borrowed-or-owned view over a single page's bytes.
pub enum PageRef<'a> {
    Borrowed(&'a [u8]),
    Owned(Box<[u8]>),
}

impl<'a> std::ops::Deref for PageRef<'a> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            PageRef::Borrowed(b) => b,
            PageRef::Owned(b) => b,
        }
    }
}

/// Abstract read/write of fixed-size pages (spec §4.1).
pub trait PageSource: std::fmt::Debug {
    fn page_size(&self) -> u32;
    fn page_count(&self) -> u32;
    /// Monotonic counter, incremented on every write.
    fn data_version(&self) -> u64;

    /// Zero-copy where possible; falls back to an owned copy for sources that
    /// cannot return a borrow (e.g. `FilePageSource`).
    fn get_page(&self, page_number: u32) -> Result<PageRef<'_>>;

    fn read_page(&self, page_number: u32, dest: &mut [u8]) -> Result<()> {
        let page = self.get_page(page_number)?;
        dest.copy_from_slice(&page);
        Ok(())
    }

    fn write_page(&mut self, page_number: u32, bytes: &[u8]) -> Result<()>;

    fn invalidate(&mut self, _page_number: u32) {}

    fn check_bounds(&self, page_number: u32) -> Result<()> {
        if page_number == 0 || page_number > self.page_count() {
            return Err(Error::PageOutOfRange {
                page: page_number,
                page_count: self.page_count(),
            });
        }
        Ok(())
    }
}

impl PageSource for Box<dyn PageSource> {
    fn page_size(&self) -> u32 {
        (**self).page_size()
    }

    fn page_count(&self) -> u32 {
        (**self).page_count()
    }

    fn data_version(&self) -> u64 {
        (**self).data_version()
    }

    fn get_page(&self, page_number: u32) -> Result<PageRef<'_>> {
        (**self).get_page(page_number)
    }

    fn write_page(&mut self, page_number: u32, bytes: &[u8]) -> Result<()> {
        (**self).write_page(page_number, bytes)
    }

    fn invalidate(&mut self, page_number: u32) {
        (**self).invalidate(page_number)
    }
}
