// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Two-level x86 paging: page directories, page tables, and address-space
//! lifecycle. Grounded on `original_source/arch/x86/mmu.c`, with the two
//! Open Question fixes from `SPEC_FULL.md` §9 applied: the address-space
//! handle lives inline in each owning `Task` (not a single static slot),
//! and user tasks get a genuinely separate address space from the kernel's.

use abi::PageFlags;

const ENTRIES_PER_TABLE: usize = 1024;
const PAGE_SIZE: u32 = abi::PAGE_SIZE as u32;

/// Hardware PDE/PTE flag bits, distinct from the architecture-independent
/// [`abi::PageFlags`] the rest of the kernel deals in; `to_hw` is the only
/// place the two get mixed.
mod hw {
    pub const PRESENT: u32 = 1 << 0;
    pub const WRITABLE: u32 = 1 << 1;
    pub const USER: u32 = 1 << 2;
    pub const NOCACHE: u32 = 1 << 4; // PCD, bit 4 on real hardware
}

fn to_hw(flags: PageFlags) -> u32 {
    let mut hw = hw::PRESENT;
    if flags.contains(PageFlags::WRITABLE) {
        hw |= hw::WRITABLE;
    }
    if flags.contains(PageFlags::USER) {
        hw |= hw::USER;
    }
    if flags.contains(PageFlags::NOCACHE) {
        hw |= hw::NOCACHE;
    }
    hw
}

/// A page directory or page table: 1024 raw 32-bit entries, each either a
/// PDE (pointing at a page table's physical frame) or a PTE (pointing at a
/// mapped physical frame), identically shaped.
#[repr(C, align(4096))]
struct Table([u32; ENTRIES_PER_TABLE]);

fn dir_index(vaddr: u32) -> usize {
    (vaddr >> 22) as usize
}

fn table_index(vaddr: u32) -> usize {
    ((vaddr >> 12) & 0x3FF) as usize
}

/// How many page-directory entries the kernel's identity-mapped low region
/// occupies (16 MiB / 4 MiB per PDE = 4 entries). Every address space
/// shares these entries with the kernel directory so kernel code and data
/// stay reachable no matter whose address space is active when a trap
/// fires.
const KERNEL_PDE_COUNT: usize = 4;

/// An address space: the physical frame backing its page directory, plus
/// whether this `AddressSpace` owns that frame (and therefore frees it on
/// `destroy`) or merely references the kernel's.
pub struct AddressSpace {
    directory_phys: u32,
    owns_directory: bool,
}

static mut KERNEL_DIRECTORY_PHYS: u32 = 0;

impl AddressSpace {
    /// Wraps the kernel's own directory without taking ownership of it.
    /// Kernel threads share this handle; there is exactly one real
    /// directory, created once by [`init`].
    pub fn kernel() -> Self {
        AddressSpace {
            directory_phys: unsafe { KERNEL_DIRECTORY_PHYS },
            owns_directory: false,
        }
    }

    /// Allocates a fresh directory, copies in the kernel's identity-mapped
    /// PDEs so kernel code/data/stack remain reachable after a switch into
    /// this address space, and zeroes the rest (the user region, filled in
    /// by subsequent [`map`](Self::map) calls).
    pub fn create() -> Option<Self> {
        let phys = crate::pmm::alloc_page()?;
        unsafe {
            let dir = phys as *mut Table;
            core::ptr::write_bytes(dir, 0, 1);
            let kernel_dir = KERNEL_DIRECTORY_PHYS as *const Table;
            for i in 0..KERNEL_PDE_COUNT {
                (*dir).0[i] = (*kernel_dir).0[i];
            }
        }
        Some(AddressSpace {
            directory_phys: phys,
            owns_directory: true,
        })
    }

    /// Maps `vaddr` (page-aligned) to `paddr` (page-aligned) with `flags`,
    /// allocating a page-table frame on demand if this region has no table
    /// yet.
    ///
    /// # Safety
    /// Caller must ensure `vaddr`/`paddr` are page-aligned and that this is
    /// the active address space or that the directory is otherwise
    /// reachable (identity-mapped) from the current one.
    pub unsafe fn map(&mut self, vaddr: u32, paddr: u32, flags: PageFlags) -> bool {
        debug_assert_eq!(vaddr % PAGE_SIZE, 0);
        debug_assert_eq!(paddr % PAGE_SIZE, 0);

        let dir = self.directory_phys as *mut Table;
        let di = dir_index(vaddr);
        let hw_flags = to_hw(flags);

        if (*dir).0[di] & hw::PRESENT == 0 {
            let pt_phys = match crate::pmm::alloc_page() {
                Some(p) => p,
                None => return false,
            };
            core::ptr::write_bytes(pt_phys as *mut Table, 0, 1);
            // Page tables are always present/writable/user at the directory
            // level; per-page protection is enforced by the PTE itself.
            (*dir).0[di] = pt_phys | hw::PRESENT | hw::WRITABLE | hw::USER;
        }

        let pt = ((*dir).0[di] & !0xFFF) as *mut Table;
        let ti = table_index(vaddr);
        (*pt).0[ti] = paddr | hw_flags;
        flush_tlb_single(vaddr);
        true
    }

    /// Clears the mapping for `vaddr`, if one exists. Matches the
    /// reference implementation: a no-op if the page table itself isn't
    /// present, and never frees the now-possibly-empty page table (page
    /// tables are only ever freed wholesale, by `destroy`).
    ///
    /// # Safety
    /// See [`map`](Self::map).
    pub unsafe fn unmap(&mut self, vaddr: u32) {
        let dir = self.directory_phys as *mut Table;
        let di = dir_index(vaddr);
        if (*dir).0[di] & hw::PRESENT == 0 {
            return;
        }
        let pt = ((*dir).0[di] & !0xFFF) as *mut Table;
        let ti = table_index(vaddr);
        (*pt).0[ti] = 0;
        flush_tlb_single(vaddr);
    }

    /// Loads this address space's directory into CR3, making it active.
    ///
    /// # Safety
    /// The directory must contain valid mappings for whatever code runs
    /// immediately after the switch (at minimum, the kernel's identity
    /// range and the current instruction stream).
    #[cfg(target_arch = "x86")]
    pub unsafe fn switch_to(&self) {
        core::arch::asm!("mov cr3, {0}", in(reg) self.directory_phys, options(nostack));
        CURRENT_DIRECTORY_PHYS.store(self.directory_phys, core::sync::atomic::Ordering::Relaxed);
    }

    /// Tears down every page table this address space owns (the kernel's
    /// shared low-memory tables are never touched) and frees the directory
    /// itself. No-op, and a programming error by the caller, if called on
    /// the shared kernel handle.
    pub fn destroy(self) {
        if !self.owns_directory {
            return;
        }
        unsafe {
            let dir = self.directory_phys as *const Table;
            for i in KERNEL_PDE_COUNT..ENTRIES_PER_TABLE {
                let pde = (*dir).0[i];
                if pde & hw::PRESENT != 0 {
                    crate::pmm::free_page(pde & !0xFFF);
                }
            }
        }
        crate::pmm::free_page(self.directory_phys);
    }

    pub fn directory_phys(&self) -> u32 {
        self.directory_phys
    }
}

static CURRENT_DIRECTORY_PHYS: core::sync::atomic::AtomicU32 =
    core::sync::atomic::AtomicU32::new(0);

/// The directory physical address currently loaded in CR3, tracked in a
/// single global rather than re-read from CR3 and hard-coded to the
/// kernel's (the bug `SPEC_FULL.md` §9 explicitly calls out and fixes).
pub fn current_directory_phys() -> u32 {
    CURRENT_DIRECTORY_PHYS.load(core::sync::atomic::Ordering::Relaxed)
}

#[cfg(target_arch = "x86")]
unsafe fn flush_tlb_single(vaddr: u32) {
    core::arch::asm!("invlpg [{0}]", in(reg) vaddr, options(nostack));
}

#[cfg(not(target_arch = "x86"))]
unsafe fn flush_tlb_single(_vaddr: u32) {}

/// Identity-maps the first 16 MiB (skipping the NULL page at frame 0, left
/// unmapped so a null pointer dereference page-faults instead of silently
/// succeeding), builds the kernel's page directory, loads it, and enables
/// paging by setting CR0's PG bit. Mirrors the reference `mmu_init`'s
/// exact ordering: load CR3 *then* flip CR0.PG, never the reverse.
///
/// # Safety
/// Must run once, after the PMM is initialized, before any other `mmu`
/// function and before any code assumes paging is active.
#[cfg(target_arch = "x86")]
pub unsafe fn init() {
    let dir_phys = crate::pmm::alloc_page().expect("no frame for kernel page directory");
    core::ptr::write_bytes(dir_phys as *mut Table, 0, 1);
    KERNEL_DIRECTORY_PHYS = dir_phys;

    let mut kernel = AddressSpace {
        directory_phys: dir_phys,
        owns_directory: true,
    };

    const IDENTITY_LIMIT: u32 = 16 * 1024 * 1024;
    let mut addr = PAGE_SIZE; // skip the NULL page
    while addr < IDENTITY_LIMIT {
        if !kernel.map(addr, addr, PageFlags::WRITABLE) {
            break; // out of page-table frames; stop rather than panic
        }
        addr += PAGE_SIZE;
    }
    core::mem::forget(kernel); // the static handle owns this directory now

    AddressSpace::kernel().switch_to();

    let mut cr0: u32;
    core::arch::asm!("mov {0}, cr0", out(reg) cr0, options(nostack));
    cr0 |= 1 << 31;
    core::arch::asm!("mov cr0, {0}", in(reg) cr0, options(nostack));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_and_table_indices_split_a_vaddr_correctly() {
        // 0x0040_1000 -> PDE 1, PTE 1 (4 MiB into the address space, plus
        // one page): a regression check for the classic off-by-shift bug.
        let vaddr = 0x0040_1000u32;
        assert_eq!(dir_index(vaddr), 1);
        assert_eq!(table_index(vaddr), 1);
    }

    #[test]
    fn hw_flags_always_include_present() {
        assert_eq!(to_hw(PageFlags::empty()) & hw::PRESENT, hw::PRESENT);
    }

    #[test]
    fn writable_flag_maps_through() {
        assert_ne!(to_hw(PageFlags::WRITABLE) & hw::WRITABLE, 0);
        assert_eq!(to_hw(PageFlags::empty()) & hw::WRITABLE, 0);
    }
}
