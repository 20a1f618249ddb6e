//! Trunk-chained LIFO freelist allocator (spec §3 "Freelist", §4.2).

use zerocopy::big_endian::U32;
use zerocopy::{AsBytes, FromBytes};

use crate::error::Result;
use crate::page::PageSource;

const TRUNK_HEADER_SIZE: usize = 8;

/// Maximum number of leaf page numbers a trunk of `page_size` can hold.
pub fn max_leaves_per_trunk(page_size: u32) -> usize {
    (page_size as usize - TRUNK_HEADER_SIZE) / 4
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    U32::read_from(&data[offset..offset + 4]).unwrap().get()
}

fn write_u32(data: &mut [u8], offset: usize, value: u32) {
    U32::new(value).write_to(&mut data[offset..offset + 4]).unwrap();
}

/// Pushes `page` onto the freelist headed at `head_trunk` (0 = empty list).
/// Returns the new head trunk page number. `alloc_trunk` supplies the bytes
/// of the page being pushed so it can be turned into a trunk page if needed.
pub fn push_free_page(
    source: &mut dyn PageSource,
    head_trunk: u32,
    page: u32,
) -> Result<u32> {
    let page_size = source.page_size() as usize;
    let max_leaves = max_leaves_per_trunk(page_size as u32);

    if head_trunk != 0 {
        let trunk_bytes = source.get_page(head_trunk)?.to_vec();
        let leaf_count = read_u32(&trunk_bytes, 4) as usize;
        if leaf_count < max_leaves {
            let mut new_trunk = trunk_bytes;
            write_u32(&mut new_trunk, 4, leaf_count as u32 + 1);
            write_u32(&mut new_trunk, TRUNK_HEADER_SIZE + leaf_count * 4, page);
            source.write_page(head_trunk, &new_trunk)?;
            return Ok(head_trunk);
        }
    }

    // Either the list is empty or the current trunk is full: `page` becomes
    // the new head trunk, pointing at the old one.
    let mut new_trunk = vec![0u8; page_size];
    write_u32(&mut new_trunk, 0, head_trunk);
    write_u32(&mut new_trunk, 4, 0);
    source.write_page(page, &new_trunk)?;
    Ok(page)
}

/// Pops the trailing leaf (LIFO) from the trunk headed at `head_trunk`.
/// Returns `(new_head_trunk, popped_page)`, where `popped_page == 0` means
/// the list was empty.
pub fn pop_free_page(source: &mut dyn PageSource, head_trunk: u32) -> Result<(u32, u32)> {
    if head_trunk == 0 {
        return Ok((0, 0));
    }

    let trunk_bytes = source.get_page(head_trunk)?.to_vec();
    let next_trunk = read_u32(&trunk_bytes, 0);
    let leaf_count = read_u32(&trunk_bytes, 4) as usize;

    if leaf_count == 0 {
        // Promote the trunk itself.
        return Ok((next_trunk, head_trunk));
    }

    let popped = read_u32(&trunk_bytes, TRUNK_HEADER_SIZE + (leaf_count - 1) * 4);
    let mut new_trunk = trunk_bytes;
    write_u32(&mut new_trunk, 4, leaf_count as u32 - 1);
    write_u32(&mut new_trunk, TRUNK_HEADER_SIZE + (leaf_count - 1) * 4, 0);
    source.write_page(head_trunk, &new_trunk)?;

    Ok((head_trunk, popped))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::MemoryPageSource;
    use std::collections::HashSet;

    fn fixture(page_count: u32) -> MemoryPageSource {
        let mut src = MemoryPageSource::with_page_count(64, page_count);
        for p in 1..=page_count {
            src.write_page(p, &[0u8; 64]).unwrap();
        }
        src
    }

    #[test]
    fn push_pop_roundtrip_is_lifo_within_a_trunk() {
        let mut src = fixture(20);
        let mut head = 0;
        let pages = [5u32, 6, 7, 8];
        for &p in &pages {
            head = push_free_page(&mut src, head, p).unwrap();
        }

        let mut popped = Vec::new();
        loop {
            let (new_head, page) = pop_free_page(&mut src, head).unwrap();
            head = new_head;
            if page == 0 {
                break;
            }
            popped.push(page);
        }

        // LIFO: last pushed leaf pops first. The trunk page (5) itself is a
        // leaf-turned-trunk and pops last.
        assert_eq!(popped, vec![8, 7, 6, 5]);
    }

    #[test]
    fn push_pop_multiset_roundtrip() {
        let mut src = fixture(200);
        let mut head = 0;
        let pushed: Vec<u32> = (2..150).collect();
        for &p in &pushed {
            head = push_free_page(&mut src, head, p).unwrap();
        }

        let mut popped = HashSet::new();
        loop {
            let (new_head, page) = pop_free_page(&mut src, head).unwrap();
            head = new_head;
            if page == 0 {
                break;
            }
            popped.insert(page);
        }

        assert_eq!(popped, pushed.into_iter().collect::<HashSet<_>>());
        assert_eq!(head, 0);
    }

    #[test]
    fn pop_from_empty_returns_sentinel() {
        let mut src = fixture(5);
        let (head, page) = pop_free_page(&mut src, 0).unwrap();
        assert_eq!(head, 0);
        assert_eq!(page, 0);
    }

    #[test]
    fn trunk_overflows_into_new_trunk() {
        let mut src = fixture(300);
        let max = max_leaves_per_trunk(64);
        let mut head = 0;
        // The first push turns page 2 into a trunk with 0 leaves; the next
        // `max` pushes fill it exactly full. One push beyond that must spill
        // into a fresh trunk rather than growing the first one further.
        for p in 2..(2 + max as u32 + 1) {
            head = push_free_page(&mut src, head, p).unwrap();
        }
        assert_eq!(head, 2, "trunk should still be full, not yet overflowed");

        let overflow_page = 2 + max as u32 + 1;
        head = push_free_page(&mut src, head, overflow_page).unwrap();
        assert_eq!(head, overflow_page);
    }
}
