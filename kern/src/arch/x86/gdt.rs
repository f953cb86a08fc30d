// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Global Descriptor Table and Task State Segment.
//!
//! Six descriptors, fixed at boot and never changed except for the TSS's
//! `esp0` field (updated on every switch into a user task so the next ring
//! 3 -> ring 0 transition lands on that task's kernel stack):
//! null, kernel code (DPL0), kernel data (DPL0), user code (DPL3), user
//! data (DPL3), TSS (DPL0). Selector values are fixed in [`abi::selector`].

use abi::selector;

const GDT_ENTRIES: usize = 6;

/// Raw 8-byte GDT descriptor layout (flat segment model: base 0, limit
/// 0xFFFFF with the granularity bit set, so "limit" really means 4 GiB).
#[derive(Copy, Clone, Default)]
#[repr(C)]
struct Descriptor(u64);

/// Builds the raw 8-byte encoding of a segment descriptor. Kept as a pure
/// function, independent of the static table below, so it can be unit
/// tested on the host without touching the real GDT.
pub const fn encode_descriptor(base: u32, limit: u32, access: u8, flags: u8) -> u64 {
    let limit_lo = (limit & 0xFFFF) as u64;
    let limit_hi = ((limit >> 16) & 0xF) as u64;
    let base_lo = (base & 0xFF_FFFF) as u64;
    let base_hi = ((base >> 24) & 0xFF) as u64;

    limit_lo
        | (base_lo << 16)
        | ((access as u64) << 40)
        | (limit_hi << 48)
        | (((flags & 0xF) as u64) << 52)
        | (base_hi << 56)
}

/// Present, DPL0, code/data descriptor, 32-bit, 4 KiB granularity.
const FLAGS_32BIT_4K: u8 = 0b1100;

const ACCESS_KERNEL_CODE: u8 = 0x9A; // present, ring0, code, exec/read
const ACCESS_KERNEL_DATA: u8 = 0x92; // present, ring0, data, read/write
const ACCESS_USER_CODE: u8 = 0xFA; // present, ring3, code, exec/read
const ACCESS_USER_DATA: u8 = 0xF2; // present, ring3, data, read/write
const ACCESS_TSS: u8 = 0x89; // present, ring0, 32-bit TSS, not busy

/// The Task State Segment. Only `esp0`/`ss0` are actually used (for the
/// ring3 -> ring0 stack switch on interrupt entry); the I/O bitmap offset
/// points past the end of the segment, meaning "no I/O permission bitmap".
#[derive(Copy, Clone, Default)]
#[repr(C, packed)]
pub struct Tss {
    prev_tss: u32,
    pub esp0: u32,
    pub ss0: u32,
    esp1: u32,
    ss1: u32,
    esp2: u32,
    ss2: u32,
    cr3: u32,
    eip: u32,
    eflags: u32,
    eax: u32,
    ecx: u32,
    edx: u32,
    ebx: u32,
    esp: u32,
    ebp: u32,
    esi: u32,
    edi: u32,
    es: u32,
    cs: u32,
    ss: u32,
    ds: u32,
    fs: u32,
    gs: u32,
    ldt: u32,
    trap: u16,
    iomap_base: u16,
}

static mut TSS: Tss = Tss {
    prev_tss: 0,
    esp0: 0,
    ss0: 0,
    esp1: 0,
    ss1: 0,
    esp2: 0,
    ss2: 0,
    cr3: 0,
    eip: 0,
    eflags: 0,
    eax: 0,
    ecx: 0,
    edx: 0,
    ebx: 0,
    esp: 0,
    ebp: 0,
    esi: 0,
    edi: 0,
    es: 0,
    cs: 0,
    ss: 0,
    ds: 0,
    fs: 0,
    gs: 0,
    ldt: 0,
    trap: 0,
    iomap_base: core::mem::size_of::<Tss>() as u16,
};

static mut GDT: [u64; GDT_ENTRIES] = [0; GDT_ENTRIES];

#[repr(C, packed)]
struct GdtrImage {
    limit: u16,
    base: u32,
}

/// Fills in the GDT and TSS, loads `GDTR`, and reloads every segment
/// register plus the task register so the new kernel code/data selectors
/// (and the TSS) take effect immediately.
///
/// # Safety
/// Must run exactly once, early in boot, before any interrupt can occur
/// (interrupts must stay disabled across this call: there is no valid IDT
/// yet either).
#[cfg(target_arch = "x86")]
pub unsafe fn init(kernel_stack_top: u32) {
    GDT[0] = 0;
    GDT[1] = encode_descriptor(0, 0xFFFFF, ACCESS_KERNEL_CODE, FLAGS_32BIT_4K);
    GDT[2] = encode_descriptor(0, 0xFFFFF, ACCESS_KERNEL_DATA, FLAGS_32BIT_4K);
    GDT[3] = encode_descriptor(0, 0xFFFFF, ACCESS_USER_CODE, FLAGS_32BIT_4K);
    GDT[4] = encode_descriptor(0, 0xFFFFF, ACCESS_USER_DATA, FLAGS_32BIT_4K);

    TSS = Tss::default();
    TSS.esp0 = kernel_stack_top;
    TSS.ss0 = selector::KERNEL_DATA as u32;
    TSS.iomap_base = core::mem::size_of::<Tss>() as u16;

    let tss_base = core::ptr::addr_of!(TSS) as u32;
    let tss_limit = core::mem::size_of::<Tss>() as u32 - 1;
    GDT[5] = encode_descriptor(tss_base, tss_limit, ACCESS_TSS, 0);

    let gdtr = GdtrImage {
        limit: (core::mem::size_of_val(&GDT) - 1) as u16,
        base: core::ptr::addr_of!(GDT) as u32,
    };
    core::arch::asm!(
        "lgdt [{0}]",
        "mov ax, {1:x}",
        "mov ds, ax",
        "mov es, ax",
        "mov fs, ax",
        "mov gs, ax",
        "mov ss, ax",
        "push {2:e}",
        "lea eax, [2f]",
        "push eax",
        "retf",
        "2:",
        "mov ax, {3:x}",
        "ltr ax",
        in(reg) &gdtr,
        in(reg) selector::KERNEL_DATA,
        in(reg) selector::KERNEL_CODE as u32,
        in(reg) selector::TSS,
        out("eax") _,
        options(nostack),
    );
}

/// Updates the TSS's ring-0 stack pointer. Called on every switch into a
/// task so the next interrupt taken while that task runs (including a
/// syscall trap from ring 3) lands on its own kernel stack.
#[cfg(target_arch = "x86")]
pub fn set_kernel_stack(esp0: u32) {
    unsafe {
        TSS.esp0 = esp0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_code_descriptor_has_dpl_zero() {
        let raw = encode_descriptor(0, 0xFFFFF, ACCESS_KERNEL_CODE, FLAGS_32BIT_4K);
        let access = ((raw >> 40) & 0xFF) as u8;
        let dpl = (access >> 5) & 0b11;
        assert_eq!(dpl, 0);
    }

    #[test]
    fn user_code_descriptor_has_dpl_three() {
        let raw = encode_descriptor(0, 0xFFFFF, ACCESS_USER_CODE, FLAGS_32BIT_4K);
        let access = ((raw >> 40) & 0xFF) as u8;
        let dpl = (access >> 5) & 0b11;
        assert_eq!(dpl, 3);
    }

    #[test]
    fn flat_descriptors_cover_the_full_4gib_limit() {
        let raw = encode_descriptor(0, 0xFFFFF, ACCESS_KERNEL_DATA, FLAGS_32BIT_4K);
        let limit_lo = raw & 0xFFFF;
        let limit_hi = (raw >> 48) & 0xF;
        let granularity = (raw >> 55) & 1;
        assert_eq!(limit_lo, 0xFFFF);
        assert_eq!(limit_hi, 0xF);
        assert_eq!(granularity, 1, "4 KiB granularity bit must be set");
    }

    #[test]
    fn present_bit_is_set_on_every_usable_descriptor() {
        for access in [
            ACCESS_KERNEL_CODE,
            ACCESS_KERNEL_DATA,
            ACCESS_USER_CODE,
            ACCESS_USER_DATA,
            ACCESS_TSS,
        ] {
            assert_ne!(access & 0x80, 0, "present bit must be set");
        }
    }
}
