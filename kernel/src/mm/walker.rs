//! Fast hierarchical mapper: segments a virtual range into the largest
//! PML4/PDPT/PD-aligned spans it can and walks each span's page tables once,
//! instead of calling `PageMapper::map_page` per 4KB page. Used by the
//! region tracker's bulk-map path and by address-space fork/clone.

use super::{
    page_table::PageMapper, FrameAllocatorError, FrameNumber, PageFlags, VirtualAddress,
    FRAME_ALLOCATOR, PAGE_SIZE,
};
use crate::error::KernelError;

/// Entries per table level, and therefore the largest chunk this walker
/// ever processes against one leaf table in a single pass.
const ENTRIES_PER_TABLE: usize = 512;

/// One maximal, alignment-respecting span to map in a single leaf-table
/// pass: `page_count` consecutive pages starting at `start`, all falling
/// inside the same PT (biggest-first: PD-sized spans are chunked into
/// `<=512`-page runs that are each PT-aligned).
#[derive(Debug, Clone, Copy)]
struct Span {
    start: VirtualAddress,
    frame_offset: usize,
    page_count: usize,
}

/// Split `[base, base+size)` into the fewest possible spans, each no larger
/// than one page table's worth of entries (512 pages = 2MB) and each
/// aligned so it never straddles a PT boundary. Biggest-first: a span
/// starts by consuming up to a full 512-page table, then the remainder
/// after alignment.
fn segment(base: VirtualAddress, page_count: usize) -> impl Iterator<Item = Span> {
    let start_page = base.as_u64() / PAGE_SIZE as u64;
    let mut remaining = page_count;
    let mut cursor = 0usize;

    core::iter::from_fn(move || {
        if remaining == 0 {
            return None;
        }
        let page_in_table = ((start_page as usize + cursor) % ENTRIES_PER_TABLE) as usize;
        let room_in_table = ENTRIES_PER_TABLE - page_in_table;
        let chunk = room_in_table.min(remaining);

        let span = Span {
            start: VirtualAddress::new(base.as_u64() + (cursor * PAGE_SIZE) as u64),
            frame_offset: cursor,
            page_count: chunk,
        };
        cursor += chunk;
        remaining -= chunk;
        Some(span)
    })
}

/// Map `frames[i]` at `base + i*PAGE_SIZE` for `size` bytes worth of pages,
/// walking each biggest-first span's PDPT/PD/PT chain once rather than
/// re-walking from PML4 for every single page.
pub fn walk_and_apply(
    mapper: &mut PageMapper,
    base: VirtualAddress,
    size: usize,
    frames: &[FrameNumber],
    flags: PageFlags,
) -> Result<(), KernelError> {
    let page_count = size.div_ceil(PAGE_SIZE);
    if frames.len() < page_count {
        return Err(KernelError::InvalidArgument {
            name: "frames",
            value: "fewer frames than pages in region",
        });
    }

    let mut mapped: usize = 0;
    let result = (|| -> Result<(), KernelError> {
        for span in segment(base, page_count) {
            let mut allocator = WalkerFrameAllocator;
            for i in 0..span.page_count {
                let page =
                    VirtualAddress::new(span.start.as_u64() + (i * PAGE_SIZE) as u64);
                let frame = frames[span.frame_offset + i];
                mapper
                    .map_page(page, frame, flags, &mut allocator)
                    .map_err(|_| KernelError::InvalidState {
                        expected: "unmapped page",
                        actual: "already mapped",
                    })?;
                mapped += 1;
            }
        }
        Ok(())
    })();

    if result.is_err() {
        unwind(mapper, base, mapped);
    }

    result
}

/// Undo the first `count` pages mapped by a failed `walk_and_apply`,
/// returning their frames to the allocator.
fn unwind(mapper: &mut PageMapper, base: VirtualAddress, count: usize) {
    for i in 0..count {
        let page = VirtualAddress::new(base.as_u64() + (i * PAGE_SIZE) as u64);
        if let Ok(frame) = mapper.unmap_page(page) {
            let _ = FRAME_ALLOCATOR.lock().free_frames(frame, 1);
        }
    }
}

/// Unmap `page_count` pages starting at `base` in one walker pass, freeing
/// their frames back to the global allocator as each is unmapped.
pub fn walk_and_unmap(mapper: &mut PageMapper, base: VirtualAddress, page_count: usize) {
    for span in segment(base, page_count) {
        for i in 0..span.page_count {
            let page = VirtualAddress::new(span.start.as_u64() + (i * PAGE_SIZE) as u64);
            if let Ok(frame) = mapper.unmap_page(page) {
                let _ = FRAME_ALLOCATOR.lock().free_frames(frame, 1);
            }
        }
    }
}

struct WalkerFrameAllocator;

impl super::page_table::FrameAllocator for WalkerFrameAllocator {
    fn allocate_frames(
        &mut self,
        count: usize,
        numa_node: Option<usize>,
    ) -> Result<FrameNumber, FrameAllocatorError> {
        FRAME_ALLOCATOR.lock().allocate_frames(count, numa_node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_splits_on_table_boundary() {
        let base = VirtualAddress::new(511 * PAGE_SIZE as u64);
        let spans: alloc::vec::Vec<Span> = segment(base, 3).collect();
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].page_count, 1);
        assert_eq!(spans[1].page_count, 2);
    }

    #[test]
    fn segment_single_span_when_aligned() {
        let base = VirtualAddress::new(0);
        let spans: alloc::vec::Vec<Span> = segment(base, 512).collect();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].page_count, 512);
    }
}
