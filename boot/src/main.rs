// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The bootable binary: a multiboot-1 header, a stack-setup trampoline,
//! and the one board-level driver (VGA text) this kernel needs before it
//! can log anything. Everything past `boot_main` is `kern`'s problem.
//!
//! No teacher precedent exists for this crate -- Hubris targets a
//! pre-flashed ARM image with its own vector table, not a BIOS/GRUB
//! handoff -- so the entry-trampoline shape (a fixed static stack, a
//! `lea`-to-top, then a plain `call` into Rust) is grounded instead on
//! `sunsided-os`'s `_start_kernel` naked-entry pattern from the example
//! pack, adapted from its 64-bit `win64` ABI and UEFI boot_info handoff to
//! 32-bit `cdecl` and the multiboot-1 magic/info-pointer handoff described
//! in spec.md §6.

#![no_std]
#![no_main]

mod vga;

use core::arch::global_asm;

/// Multiboot-1 magic, flags (align modules + request a memory map), and
/// the checksum that makes the three words sum to zero mod 2^32 --
/// exactly spec.md §6's boot contract.
const MULTIBOOT_MAGIC: u32 = 0x1BAD_B002;
const MULTIBOOT_FLAGS: u32 = 0b11;
const MULTIBOOT_CHECKSUM: u32 = (0u32).wrapping_sub(MULTIBOOT_MAGIC.wrapping_add(MULTIBOOT_FLAGS));

global_asm!(
    ".section .multiboot_header, \"a\"",
    ".align 4",
    ".long {magic}",
    ".long {flags}",
    ".long {checksum}",
    magic = const MULTIBOOT_MAGIC,
    flags = const MULTIBOOT_FLAGS,
    checksum = const MULTIBOOT_CHECKSUM,
);

const BOOT_STACK_SIZE: usize = 16 * 1024;

#[no_mangle]
static mut BOOT_STACK: [u8; BOOT_STACK_SIZE] = [0; BOOT_STACK_SIZE];

// GRUB hands off with EAX = multiboot magic, EBX = multiboot info pointer,
// on whatever stack happened to be live -- not guaranteed large enough, or
// even present, to run Rust on. This switches to `BOOT_STACK` first, then
// pushes EBX/EAX as `boot_main`'s cdecl arguments (reverse order: the
// first parameter must end up closest to the top of the stack) before
// calling in.
global_asm!(
    ".section .text",
    ".global _start",
    "_start:",
    "lea esp, [{stack} + {stack_size}]",
    "push ebx",
    "push eax",
    "call boot_main",
    "2:",
    "hlt",
    "jmp 2b",
    stack = sym BOOT_STACK,
    stack_size = const BOOT_STACK_SIZE,
);

/// Registers the VGA putchar, clears the screen, prints the version
/// banner, and hands off to [`kern::startup::start_kernel`]. Never
/// returns.
#[no_mangle]
extern "C" fn boot_main(multiboot_magic: u32, multiboot_info: u32) -> ! {
    kern::console::set_putchar(vga::putchar);
    vga::clear();
    klog_boot();

    unsafe {
        kern::startup::start_kernel(
            multiboot_magic,
            multiboot_info as *const kern::pmm::MultibootInfo,
        )
    }
}

fn klog_boot() {
    kern::klog!("booting");
}

// `kern::fail` supplies the crate-wide `#[panic_handler]`; this crate must
// not define a second one.
