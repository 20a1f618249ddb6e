use std::collections::BTreeMap;

use super::{PageRef, PageSource};
use crate::error::Result;

/// Wraps a base source and stores a sparse map of dirty pages written during
/// a transaction. Reads first consult the shadow, then fall through to the
/// base (spec §3 "Transaction", §4.1).
///
/// `B` is owned rather than borrowed: the pager moves the base source into
/// the shadow at `begin_transaction` and moves it back out at commit/rollback
/// (spec §9 "Transactional interposition" — the proxy's target changes, not
/// its identity).
#[derive(Debug)]
pub struct ShadowPageSource<B> {
    base: B,
    shadow: BTreeMap<u32, Box<[u8]>>,
    apparent_page_count: u32,
    data_version: u64,
}

impl<B: PageSource> ShadowPageSource<B> {
    pub fn new(base: B) -> Self {
        let apparent_page_count = base.page_count();
        let data_version = base.data_version();
        Self {
            base,
            shadow: BTreeMap::new(),
            apparent_page_count,
            data_version,
        }
    }

    pub fn clear_shadow(&mut self) {
        self.shadow.clear();
        self.apparent_page_count = self.base.page_count();
    }

    /// Discards the shadow and stops shadowing further operations.
    pub fn reset(&mut self) {
        self.clear_shadow();
    }

    pub fn has_dirty_pages(&self) -> bool {
        !self.shadow.is_empty()
    }

    pub fn dirty_page_numbers(&self) -> impl Iterator<Item = u32> + '_ {
        self.shadow.keys().copied()
    }

    /// Emits each shadow page to `target` in page-number order.
    pub fn write_dirty_pages_to(&self, target: &mut dyn PageSource) -> Result<()> {
        for (&page_number, bytes) in &self.shadow {
            target.write_page(page_number, bytes)?;
        }
        Ok(())
    }

    /// Writes every dirty page into the base source in place, then clears
    /// the shadow (spec §4.5 "commit").
    pub fn flush_to_base(&mut self) -> Result<()> {
        for (&page_number, bytes) in &self.shadow {
            self.base.write_page(page_number, bytes)?;
        }
        self.shadow.clear();
        self.apparent_page_count = self.base.page_count();
        self.data_version = self.base.data_version();
        Ok(())
    }

    pub fn base(&self) -> &B {
        &self.base
    }

    pub fn into_base(self) -> B {
        self.base
    }
}

impl<B: PageSource> PageSource for ShadowPageSource<B> {
    fn page_size(&self) -> u32 {
        self.base.page_size()
    }

    fn page_count(&self) -> u32 {
        self.apparent_page_count
    }

    fn data_version(&self) -> u64 {
        self.data_version
    }

    fn get_page(&self, page_number: u32) -> Result<PageRef<'_>> {
        if let Some(bytes) = self.shadow.get(&page_number) {
            return Ok(PageRef::Borrowed(bytes));
        }
        self.base.get_page(page_number)
    }

    fn write_page(&mut self, page_number: u32, bytes: &[u8]) -> Result<()> {
        if bytes.len() != self.page_size() as usize {
            return Err(crate::error::Error::ShortWrite {
                expected: self.page_size() as usize,
                actual: bytes.len(),
            });
        }
        self.shadow
            .insert(page_number, bytes.to_vec().into_boxed_slice());
        if page_number > self.apparent_page_count {
            self.apparent_page_count = page_number;
        }
        self.data_version += 1;
        Ok(())
    }

    fn invalidate(&mut self, page_number: u32) {
        self.shadow.remove(&page_number);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::MemoryPageSource;

    #[test]
    fn reads_fall_through_to_base() {
        let mut base = MemoryPageSource::new(64);
        base.write_page(1, &[1u8; 64]).unwrap();
        let shadow = ShadowPageSource::new(base);
        assert_eq!(&*shadow.get_page(1).unwrap(), &[1u8; 64][..]);
    }

    #[test]
    fn writes_are_isolated_from_base() {
        let mut base = MemoryPageSource::new(64);
        base.write_page(1, &[1u8; 64]).unwrap();
        let mut shadow = ShadowPageSource::new(base);
        shadow.write_page(1, &[2u8; 64]).unwrap();

        assert_eq!(&*shadow.get_page(1).unwrap(), &[2u8; 64][..]);
        assert_eq!(&*shadow.base().get_page(1).unwrap(), &[1u8; 64][..]);
    }

    #[test]
    fn clear_shadow_discards_writes() {
        let mut base = MemoryPageSource::new(64);
        base.write_page(1, &[1u8; 64]).unwrap();
        let mut shadow = ShadowPageSource::new(base);
        shadow.write_page(1, &[2u8; 64]).unwrap();
        shadow.clear_shadow();
        assert_eq!(&*shadow.get_page(1).unwrap(), &[1u8; 64][..]);
    }

    #[test]
    fn write_dirty_pages_to_flushes_in_order() {
        let mut base = MemoryPageSource::new(64);
        base.write_page(1, &[0u8; 64]).unwrap();
        base.write_page(2, &[0u8; 64]).unwrap();
        let mut shadow = ShadowPageSource::new(base);
        shadow.write_page(2, &[2u8; 64]).unwrap();
        shadow.write_page(1, &[1u8; 64]).unwrap();

        let mut target = MemoryPageSource::new(64);
        target.write_page(1, &[0u8; 64]).unwrap();
        target.write_page(2, &[0u8; 64]).unwrap();
        shadow.write_dirty_pages_to(&mut target).unwrap();

        assert_eq!(&*target.get_page(1).unwrap(), &[1u8; 64][..]);
        assert_eq!(&*target.get_page(2).unwrap(), &[2u8; 64][..]);
    }

    #[test]
    fn flush_to_base_writes_in_place_and_clears_shadow() {
        let mut base = MemoryPageSource::new(64);
        base.write_page(1, &[0u8; 64]).unwrap();
        let mut shadow = ShadowPageSource::new(base);
        shadow.write_page(1, &[9u8; 64]).unwrap();
        shadow.flush_to_base().unwrap();

        assert!(!shadow.has_dirty_pages());
        assert_eq!(&*shadow.base().get_page(1).unwrap(), &[9u8; 64][..]);
    }
}
