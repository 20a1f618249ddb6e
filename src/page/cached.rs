use std::cell::RefCell;
use std::num::NonZeroUsize;

use lru::LruCache;

use super::{PageRef, PageSource};
use crate::error::Result;

/// Wraps any source with a capacity-bounded LRU of page buffers. Demand-driven:
/// no buffer is rented until first miss. Detects ascending consecutive
/// accesses and prefetches the next pages on the next miss (spec §4.1).
pub struct CachedPageSource<S> {
    inner: S,
    cache: RefCell<LruCache<u32, Box<[u8]>>>,
    sequential_threshold: u32,
    prefetch_depth: u32,
    prefetch_disabled: bool,
    last_access: RefCell<Option<u32>>,
    ascending_run: RefCell<u32>,
    hits: RefCell<u64>,
    misses: RefCell<u64>,
}

impl<S: PageSource> CachedPageSource<S> {
    pub fn new(inner: S, capacity_pages: usize) -> Self {
        Self {
            inner,
            cache: RefCell::new(LruCache::new(
                NonZeroUsize::new(capacity_pages.max(1)).unwrap(),
            )),
            sequential_threshold: 3,
            prefetch_depth: 4,
            prefetch_disabled: false,
            last_access: RefCell::new(None),
            ascending_run: RefCell::new(0),
            hits: RefCell::new(0),
            misses: RefCell::new(0),
        }
    }

    pub fn with_prefetch(mut self, sequential_threshold: u32, prefetch_depth: u32) -> Self {
        self.sequential_threshold = sequential_threshold;
        self.prefetch_depth = prefetch_depth;
        self
    }

    pub fn disable_prefetch(mut self) -> Self {
        self.prefetch_disabled = true;
        self
    }

    pub fn cache_hit_count(&self) -> u64 {
        *self.hits.borrow()
    }

    pub fn cache_miss_count(&self) -> u64 {
        *self.misses.borrow()
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    fn fetch_into_cache(&self, page_number: u32) -> Result<()> {
        if self.cache.borrow().contains(&page_number) {
            return Ok(());
        }
        let page = self.inner.get_page(page_number)?;
        self.cache
            .borrow_mut()
            .put(page_number, page.to_vec().into_boxed_slice());
        Ok(())
    }

    fn note_access(&self, page_number: u32) {
        let mut last = self.last_access.borrow_mut();
        let mut run = self.ascending_run.borrow_mut();
        match *last {
            Some(prev) if page_number == prev + 1 => *run += 1,
            _ => *run = 0,
        }
        *last = Some(page_number);
    }

    fn maybe_prefetch(&self, page_number: u32) {
        if self.prefetch_disabled {
            return;
        }
        if *self.ascending_run.borrow() + 1 < self.sequential_threshold {
            return;
        }
        for offset in 1..=self.prefetch_depth {
            let candidate = page_number + offset;
            if candidate > self.inner.page_count() {
                break;
            }
            if self.cache.borrow().contains(&candidate) {
                continue;
            }
            if let Ok(page) = self.inner.get_page(candidate) {
                self.cache
                    .borrow_mut()
                    .put(candidate, page.to_vec().into_boxed_slice());
                *self.misses.borrow_mut() += 1;
            }
        }
    }
}

impl<S: PageSource> std::fmt::Debug for CachedPageSource<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedPageSource")
            .field("hits", &self.hits.borrow())
            .field("misses", &self.misses.borrow())
            .finish()
    }
}

impl<S: PageSource> PageSource for CachedPageSource<S> {
    fn page_size(&self) -> u32 {
        self.inner.page_size()
    }

    fn page_count(&self) -> u32 {
        self.inner.page_count()
    }

    fn data_version(&self) -> u64 {
        self.inner.data_version()
    }

    fn get_page(&self, page_number: u32) -> Result<PageRef<'_>> {
        self.check_bounds(page_number)?;

        if self.cache.borrow_mut().get(&page_number).is_some() {
            *self.hits.borrow_mut() += 1;
            self.note_access(page_number);
            self.maybe_prefetch(page_number);
            let cache = self.cache.borrow();
            let bytes = cache.peek(&page_number).unwrap().clone();
            return Ok(PageRef::Owned(bytes));
        }

        *self.misses.borrow_mut() += 1;
        self.fetch_into_cache(page_number)?;
        self.note_access(page_number);
        self.maybe_prefetch(page_number);

        let cache = self.cache.borrow();
        let bytes = cache.peek(&page_number).unwrap().clone();
        Ok(PageRef::Owned(bytes))
    }

    fn write_page(&mut self, page_number: u32, bytes: &[u8]) -> Result<()> {
        self.inner.write_page(page_number, bytes)?;
        self.invalidate(page_number);
        Ok(())
    }

    fn invalidate(&mut self, page_number: u32) {
        self.cache.borrow_mut().pop(&page_number);
    }
}
