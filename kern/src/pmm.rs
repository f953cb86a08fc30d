// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Physical memory manager: the multiboot-aware glue around
//! [`kerncore::pmm::FrameBitmap`].
//!
//! The bitmap itself (scan-for-a-clear-bit, free/reserved/total counters)
//! is pure logic and lives in `kerncore` where it can be unit tested on the
//! host. This module owns the one real static bitmap sized for all 4 GiB of
//! physical address space, the multiboot memory-map parse that seeds it,
//! and the fallback used when no memory map is available, all grounded on
//! the reference allocator's `pmm_init`.

use abi::{multiboot, PAGE_SIZE};
use kerncore::pmm::{FrameBitmap, PmmStats};

/// `4 GiB / 4 KiB / 8 bits` — enough to track every frame in a 32-bit
/// physical address space.
const BITMAP_BYTES: usize = (4usize * (1024 * 1024 * 1024 / PAGE_SIZE)) / 8;

/// Assumed RAM size when no usable multiboot memory map is available.
/// Matches the reference allocator's documented (loudly logged) fallback.
const FALLBACK_MEMORY_BYTES: usize = 128 * 1024 * 1024;

static mut BITMAP: FrameBitmap<BITMAP_BYTES> = FrameBitmap::new();

#[repr(C, packed)]
struct MultibootMmapEntry {
    size: u32,
    addr: u64,
    len: u64,
    kind: u32,
}

/// Initializes the allocator from the multiboot info structure, or from the
/// fallback model if `magic` doesn't match or no memory map is present.
/// Returns `false` (and uses the fallback) in the latter case, matching the
/// reference implementation's "never fail to boot over a bad/absent memory
/// map" stance.
///
/// # Safety
/// `mbi` must be a valid pointer to a multiboot info structure when `magic`
/// matches [`multiboot::MAGIC`], per the boot contract. Must run exactly
/// once, before any frame is allocated.
#[cfg(target_arch = "x86")]
pub unsafe fn init(magic: u32, mbi: *const MultibootInfo) -> bool {
    if magic != multiboot::MAGIC || mbi.is_null() {
        use_fallback_model();
        return false;
    }
    let info = &*mbi;
    if info.flags & multiboot::FLAG_MMAP == 0 {
        use_fallback_model();
        return false;
    }

    let mut cursor = info.mmap_addr as u64;
    let end = cursor + info.mmap_length as u64;
    while cursor < end {
        let entry = &*(cursor as *const MultibootMmapEntry);
        if entry.kind == multiboot::MEMORY_AVAILABLE {
            let start_frame = (entry.addr as usize) / PAGE_SIZE;
            let end_frame = ((entry.addr + entry.len) as usize) / PAGE_SIZE;
            BITMAP.mark_available(start_frame, end_frame);
        }
        cursor += entry.size as u64 + core::mem::size_of::<u32>() as u64;
    }
    true
}

#[cfg(target_arch = "x86")]
unsafe fn use_fallback_model() {
    BITMAP.mark_available(0, FALLBACK_MEMORY_BYTES / PAGE_SIZE);
}

/// Raw multiboot info layout, only the fields the allocator consumes.
#[repr(C)]
pub struct MultibootInfo {
    pub flags: u32,
    _mem_lower: u32,
    _mem_upper: u32,
    _boot_device: u32,
    _cmdline: u32,
    _mods_count: u32,
    _mods_addr: u32,
    _syms: [u32; 4],
    pub mmap_length: u32,
    pub mmap_addr: u32,
}

/// Reserves `[start, start + len)`, rounding outward to frame boundaries.
/// Used at boot for the NULL page, the VGA text window, and the kernel
/// image itself.
pub fn reserve_region(start: u32, len: u32) {
    let start_frame = (start as usize) / PAGE_SIZE;
    let end_frame = ((start as usize + len as usize) + PAGE_SIZE - 1) / PAGE_SIZE;
    unsafe {
        BITMAP.reserve_region(start_frame, end_frame);
    }
}

/// Allocates one 4 KiB frame, returning its physical address, or `None` if
/// exhausted.
pub fn alloc_page() -> Option<u32> {
    unsafe { BITMAP.alloc() }.map(|frame| (frame * PAGE_SIZE) as u32)
}

/// Frees a frame previously returned by [`alloc_page`]. `addr` must be
/// frame-aligned; freeing an address that was never allocated is a no-op.
pub fn free_page(addr: u32) {
    debug_assert_eq!(addr as usize % PAGE_SIZE, 0, "freed address must be frame-aligned");
    let frame = addr as usize / PAGE_SIZE;
    unsafe {
        BITMAP.free(frame);
    }
}

pub fn stats() -> PmmStats {
    unsafe { BITMAP.stats() }
}
