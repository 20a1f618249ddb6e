use super::{PageRef, PageSource};
use crate::error::Result;

/// Holds a swappable target pointer and forwards calls; used by the pager to
/// redirect reads into a `ShadowPageSource` for the duration of a transaction
/// (spec §4.1, §9 "Transactional interposition").
pub struct ProxyPageSource {
    target: Box<dyn PageSource>,
}

impl ProxyPageSource {
    pub fn new(target: Box<dyn PageSource>) -> Self {
        Self { target }
    }

    pub fn swap(&mut self, target: Box<dyn PageSource>) -> Box<dyn PageSource> {
        std::mem::replace(&mut self.target, target)
    }

    pub fn target(&self) -> &dyn PageSource {
        self.target.as_ref()
    }

    pub fn target_mut(&mut self) -> &mut dyn PageSource {
        self.target.as_mut()
    }
}

impl std::fmt::Debug for ProxyPageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyPageSource").finish()
    }
}

impl PageSource for ProxyPageSource {
    fn page_size(&self) -> u32 {
        self.target.page_size()
    }

    fn page_count(&self) -> u32 {
        self.target.page_count()
    }

    fn data_version(&self) -> u64 {
        self.target.data_version()
    }

    fn get_page(&self, page_number: u32) -> Result<PageRef<'_>> {
        self.target.get_page(page_number)
    }

    fn write_page(&mut self, page_number: u32, bytes: &[u8]) -> Result<()> {
        self.target.write_page(page_number, bytes)
    }

    fn invalidate(&mut self, page_number: u32) {
        self.target.invalidate(page_number)
    }
}
