//! Region tracker: the single public entry point for committing, resizing
//! and releasing spans of virtual memory. Everything above this layer
//! (heap growth, mmap, device mappings) goes through `RegionTracker` instead
//! of poking page tables directly, so the tracker's bookkeeping and the
//! actual mappings never drift apart.

#[cfg(feature = "alloc")]
extern crate alloc;

#[cfg(feature = "alloc")]
use alloc::collections::BTreeMap;

use spin::Mutex;

use super::{
    page_table::PageMapper, walker, FrameAllocatorError, PageFlags, VirtualAddress,
    FRAME_ALLOCATOR, PAGE_SIZE,
};
use crate::error::KernelError;

/// A small `bitflags!`-shaped newtype macro. Flag sets elsewhere in this
/// kernel (`PageFlags`, `Permissions`) are hand-rolled newtypes over an
/// integer rather than the `bitflags` crate, since these need raw bit access
/// (`.0`) to pack directly into page table entries; this keeps `RegionFlags`
/// consistent with that pattern.
macro_rules! bitflags_like {
    (
        $(#[$meta:meta])*
        pub struct $name:ident: $repr:ty {
            $(const $flag:ident = $value:expr;)*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct $name(pub $repr);

        impl $name {
            $(pub const $flag: Self = Self($value);)*

            pub const fn empty() -> Self {
                Self(0)
            }

            pub const fn contains(&self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }
        }

        impl core::ops::BitOr for $name {
            type Output = Self;
            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }
    };
}

bitflags_like! {
    /// Flags governing how a region is backed and what access it allows.
    pub struct RegionFlags: u32 {
        const COMMIT = 1 << 0;
        const READWRITE = 1 << 1;
        const AT_OR_OVER = 1 << 2;
        const UNCACHED = 1 << 3;
        const WRITE_COMBINE = 1 << 4;
        const IO = 1 << 5;
    }
}

/// A committed (or reserved) span of virtual address space owned by one
/// address space, tracked independently of the page table entries that
/// back it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionDescriptor {
    pub base: VirtualAddress,
    pub size: usize,
    pub flags: RegionFlags,
    /// Fixed physical base (`Target`) a caller supplied for this region, e.g.
    /// a device's MMIO aperture. `None` for ordinary RAM-backed regions,
    /// whose physical frames come from the frame allocator instead.
    pub physical_base: Option<u64>,
    /// Page granularity backing this region, in bytes. Always `PAGE_SIZE`
    /// today; carried per-region so a future large-page region doesn't need
    /// a `RegionDescriptor` layout change.
    pub granularity: usize,
    /// Short diagnostic label (e.g. `"nvme-bar0"`, `"heap"`) naming what
    /// this region is for, surfaced in logging and debugging.
    pub tag: &'static str,
}

impl RegionDescriptor {
    pub fn end(&self) -> VirtualAddress {
        self.base.add(self.size)
    }

    pub fn overlaps(&self, other_base: VirtualAddress, other_size: usize) -> bool {
        let other_end = other_base.as_u64() + other_size as u64;
        self.base.as_u64() < other_end && other_base.as_u64() < self.end().as_u64()
    }

    fn page_count(&self) -> usize {
        self.size.div_ceil(PAGE_SIZE)
    }
}

/// Tracks every live region in one address space and serializes the
/// allocate/resize/free operations that mutate them.
pub struct RegionTracker {
    #[cfg(feature = "alloc")]
    regions: Mutex<BTreeMap<u64, RegionDescriptor>>,
    search_base: u64,
    search_limit: u64,
}

impl RegionTracker {
    /// Build a tracker that hands out regions within `[search_base,
    /// search_limit)`, lowest address first.
    pub const fn new(search_base: u64, search_limit: u64) -> Self {
        Self {
            #[cfg(feature = "alloc")]
            regions: Mutex::new(BTreeMap::new()),
            search_base,
            search_limit,
        }
    }

    /// Find `size` contiguous, currently-unused bytes of address space,
    /// honoring `AT_OR_OVER`'s preferred base when set.
    #[cfg(feature = "alloc")]
    fn find_free_span(&self, regions: &BTreeMap<u64, RegionDescriptor>, size: usize, preferred: Option<u64>) -> Option<u64> {
        let mut candidate = preferred.unwrap_or(self.search_base).max(self.search_base);
        for region in regions.values() {
            let region_end = region.end().as_u64();
            if candidate + size as u64 <= region.base.as_u64() {
                return Some(candidate);
            }
            if region_end > candidate {
                candidate = region_end;
            }
        }
        if candidate + size as u64 <= self.search_limit {
            Some(candidate)
        } else {
            None
        }
    }

    /// `AllocRegion`: reserve (and, if `COMMIT` is set, back with physical
    /// frames and map) a span of `size` bytes, optionally at-or-above
    /// `preferred_base` when `AT_OR_OVER` is set. `target` supplies the
    /// fixed physical base to map when `IO` is set -- a device's MMIO
    /// aperture rather than allocator-supplied RAM -- and is ignored
    /// otherwise. `tag` is a short diagnostic label carried on the
    /// resulting descriptor. On any failure partway through committing
    /// pages, every page mapped so far is unwound before the error is
    /// returned, so a failed call never leaves a half-mapped region visible
    /// to `IsRegionFree`.
    #[cfg(feature = "alloc")]
    pub fn alloc_region(
        &self,
        mapper: &mut PageMapper,
        size: usize,
        flags: RegionFlags,
        preferred_base: Option<VirtualAddress>,
        target: Option<u64>,
        tag: &'static str,
    ) -> Result<RegionDescriptor, KernelError> {
        if size == 0 || size % PAGE_SIZE != 0 {
            return Err(KernelError::InvalidArgument {
                name: "size",
                value: "must be a non-zero multiple of PAGE_SIZE",
            });
        }
        if flags.contains(RegionFlags::IO) && target.is_none() {
            return Err(KernelError::InvalidArgument {
                name: "target",
                value: "required when RegionFlags::IO is set",
            });
        }

        let mut regions = self.regions.lock();
        let preferred = if flags.contains(RegionFlags::AT_OR_OVER) {
            preferred_base.map(|a| a.as_u64())
        } else {
            None
        };
        let base = self
            .find_free_span(&regions, size, preferred)
            .ok_or(KernelError::ResourceExhausted {
                resource: "virtual address space",
            })?;

        let descriptor = RegionDescriptor {
            base: VirtualAddress::new(base),
            size,
            flags,
            physical_base: if flags.contains(RegionFlags::IO) { target } else { None },
            granularity: PAGE_SIZE,
            tag,
        };

        if flags.contains(RegionFlags::COMMIT) {
            if let Err(e) = self.commit_pages(mapper, &descriptor) {
                // Rollback: unmap and free anything committed before the
                // failure so the region tracker's view stays consistent
                // with the page tables.
                self.unmap_pages(mapper, &descriptor);
                return Err(e);
            }
        }

        regions.insert(base, descriptor);
        Ok(descriptor)
    }

    /// Back every page of `region` with a physical frame and map it. For an
    /// `IO` region this maps the caller-supplied `physical_base` (offset per
    /// page) directly instead of drawing from the frame allocator, since the
    /// backing memory is a fixed device aperture the allocator doesn't own.
    #[cfg(feature = "alloc")]
    fn commit_pages(&self, mapper: &mut PageMapper, region: &RegionDescriptor) -> Result<(), KernelError> {
        let page_flags = region_page_flags(region.flags);
        let is_io = region.flags.contains(RegionFlags::IO);
        let mut mapped = 0usize;
        let result = (|| {
            for i in 0..region.page_count() {
                let page = VirtualAddress::new(region.base.as_u64() + (i * PAGE_SIZE) as u64);
                let frame = if is_io {
                    let phys = region.physical_base.ok_or(KernelError::InvalidArgument {
                        name: "physical_base",
                        value: "required for IO regions",
                    })? + (i * region.granularity) as u64;
                    super::FrameNumber::new(phys / PAGE_SIZE as u64)
                } else {
                    FRAME_ALLOCATOR
                        .lock()
                        .allocate_frames(1, None)
                        .map_err(frame_alloc_err)?
                };
                let mut adapter = TrackerFrameAllocator;
                mapper
                    .map_page(page, frame, page_flags, &mut adapter)
                    .map_err(|_| KernelError::InvalidState {
                        expected: "unmapped page",
                        actual: "already mapped",
                    })?;
                mapped += 1;
            }
            Ok(())
        })();
        if result.is_err() {
            // Unwind just the pages this call mapped; the caller's own
            // rollback handles anything from a previous successful commit.
            for i in 0..mapped {
                let page = VirtualAddress::new(region.base.as_u64() + (i * PAGE_SIZE) as u64);
                if let Ok(frame) = mapper.unmap_page(page) {
                    if !is_io {
                        let _ = FRAME_ALLOCATOR.lock().free_frames(frame, 1);
                    }
                }
            }
        }
        result
    }

    fn unmap_pages(&self, mapper: &mut PageMapper, region: &RegionDescriptor) {
        let is_io = region.flags.contains(RegionFlags::IO);
        for i in 0..region.page_count() {
            let page = VirtualAddress::new(region.base.as_u64() + (i * PAGE_SIZE) as u64);
            if let Ok(frame) = mapper.unmap_page(page) {
                if !is_io {
                    let _ = FRAME_ALLOCATOR.lock().free_frames(frame, 1);
                }
            }
        }
    }

    /// `ResizeRegion`: grow or shrink a region in place. Growing commits new
    /// pages past the current end (rolling back on failure exactly like
    /// `alloc_region`); shrinking unmaps and frees the trailing pages.
    #[cfg(feature = "alloc")]
    pub fn resize_region(
        &self,
        mapper: &mut PageMapper,
        base: VirtualAddress,
        new_size: usize,
    ) -> Result<RegionDescriptor, KernelError> {
        if new_size % PAGE_SIZE != 0 {
            return Err(KernelError::InvalidArgument {
                name: "new_size",
                value: "must be a multiple of PAGE_SIZE",
            });
        }

        let mut regions = self.regions.lock();
        let mut descriptor = *regions
            .get(&base.as_u64())
            .ok_or(KernelError::NotFound { resource: "region", id: base.as_u64() })?;

        if new_size > descriptor.size {
            let grown = RegionDescriptor {
                base: VirtualAddress::new(descriptor.end().as_u64()),
                size: new_size - descriptor.size,
                flags: descriptor.flags,
                physical_base: descriptor
                    .physical_base
                    .map(|phys| phys + descriptor.size as u64),
                granularity: descriptor.granularity,
                tag: descriptor.tag,
            };
            if descriptor.flags.contains(RegionFlags::COMMIT) {
                if let Err(e) = self.commit_pages(mapper, &grown) {
                    return Err(e);
                }
            }
        } else if new_size < descriptor.size {
            let shrink_base = VirtualAddress::new(base.as_u64() + new_size as u64);
            let shrunk = RegionDescriptor {
                base: shrink_base,
                size: descriptor.size - new_size,
                flags: descriptor.flags,
                physical_base: descriptor
                    .physical_base
                    .map(|phys| phys + new_size as u64),
                granularity: descriptor.granularity,
                tag: descriptor.tag,
            };
            self.unmap_pages(mapper, &shrunk);
        }

        descriptor.size = new_size;
        regions.insert(base.as_u64(), descriptor);
        Ok(descriptor)
    }

    /// `FreeRegion`: unmap and free every page in the region, then drop its
    /// bookkeeping entry.
    #[cfg(feature = "alloc")]
    pub fn free_region(&self, mapper: &mut PageMapper, base: VirtualAddress) -> Result<(), KernelError> {
        let mut regions = self.regions.lock();
        let descriptor = regions
            .remove(&base.as_u64())
            .ok_or(KernelError::NotFound { resource: "region", id: base.as_u64() })?;
        if descriptor.flags.contains(RegionFlags::COMMIT) {
            self.unmap_pages(mapper, &descriptor);
        }
        Ok(())
    }

    /// `IsRegionFree`: true if no tracked region overlaps `[base, base+size)`.
    #[cfg(feature = "alloc")]
    pub fn is_region_free(&self, base: VirtualAddress, size: usize) -> bool {
        let regions = self.regions.lock();
        !regions.values().any(|r| r.overlaps(base, size))
    }

    /// Map every page of `region` in a single bulk pass using the fast
    /// hierarchical walker instead of one `map_page` call per page. Used
    /// when a caller already knows the frames (e.g. loading a file-backed
    /// mapping) rather than asking the frame allocator for each one.
    #[cfg(feature = "alloc")]
    pub fn map_region_bulk(
        &self,
        mapper: &mut PageMapper,
        region: &RegionDescriptor,
        frames: &[super::FrameNumber],
    ) -> Result<(), KernelError> {
        walker::walk_and_apply(mapper, region.base, region.size, frames, region_page_flags(region.flags))
    }
}

fn region_page_flags(flags: RegionFlags) -> PageFlags {
    let mut out = PageFlags::PRESENT;
    if flags.contains(RegionFlags::READWRITE) {
        out = out | PageFlags::WRITABLE;
    }
    if flags.contains(RegionFlags::UNCACHED) {
        out = out | PageFlags::NO_CACHE;
    }
    if flags.contains(RegionFlags::WRITE_COMBINE) {
        out = out | PageFlags::WRITE_THROUGH;
    }
    if flags.contains(RegionFlags::IO) {
        out = out | PageFlags::FIXED;
    }
    out
}

fn frame_alloc_err(e: FrameAllocatorError) -> KernelError {
    match e {
        FrameAllocatorError::OutOfMemory => KernelError::OutOfMemory {
            requested: PAGE_SIZE,
            available: 0,
        },
        _ => KernelError::ResourceExhausted {
            resource: "physical frames",
        },
    }
}

struct TrackerFrameAllocator;

impl super::page_table::FrameAllocator for TrackerFrameAllocator {
    fn allocate_frames(
        &mut self,
        count: usize,
        numa_node: Option<usize>,
    ) -> Result<super::FrameNumber, FrameAllocatorError> {
        FRAME_ALLOCATOR.lock().allocate_frames(count, numa_node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptors_detect_overlap() {
        let r = RegionDescriptor {
            base: VirtualAddress::new(0x1000),
            size: 0x2000,
            flags: RegionFlags::COMMIT,
            physical_base: None,
            granularity: PAGE_SIZE,
            tag: "test",
        };
        assert!(r.overlaps(VirtualAddress::new(0x2000), 0x1000));
        assert!(!r.overlaps(VirtualAddress::new(0x3000), 0x1000));
    }

    #[test]
    fn flag_bitor_combines() {
        let flags = RegionFlags::COMMIT | RegionFlags::READWRITE;
        assert!(flags.contains(RegionFlags::COMMIT));
        assert!(flags.contains(RegionFlags::READWRITE));
        assert!(!flags.contains(RegionFlags::IO));
    }
}
