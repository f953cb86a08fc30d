// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Raw assembly entry points for every vector the IDT actually arms: the
//! 32 CPU exceptions, the 16 PIC-remapped IRQs, and the syscall gate.
//!
//! Grounded on `original_source/arch/x86/idt.c`'s `isr0..isr31`/
//! `irq0..irq15`/`syscall_entry_int80` stub set -- one tiny label per
//! vector that normalizes the CPU's inconsistent error-code-or-not entry
//! shape into a uniform frame, then falls into a single shared tail.
//! Vectors 8, 10-14, and 17 are the ones the CPU itself pushes an error
//! code for; every other stub pushes a dummy zero so `err_code` always
//! has a defined value.
//!
//! The shared tail builds exactly the [`super::idt::InterruptFrame`]
//! layout: `push ds; pushad` (low to high: ds, edi, esi, ebp, esp_dummy,
//! ebx, edx, ecx, eax), reloads `ds`/`es` to the kernel data selector so
//! the handler can dereference kernel pointers regardless of which ring
//! trapped, calls [`kernel_interrupt_common`], then unwinds the same way
//! [`super::start_first_task`] and [`super::switch_to`] expect to resume
//! into: `pop ds; popad; add esp, 8; iretd`.

use core::arch::global_asm;

use abi::selector;

macro_rules! isr_no_err {
    ($name:ident, $vec:literal) => {
        global_asm!(
            concat!(".global ", stringify!($name)),
            concat!(stringify!($name), ":"),
            "push 0",
            concat!("push ", $vec),
            "jmp interrupt_common_stub",
        );
    };
}

macro_rules! isr_has_err {
    ($name:ident, $vec:literal) => {
        global_asm!(
            concat!(".global ", stringify!($name)),
            concat!(stringify!($name), ":"),
            concat!("push ", $vec),
            "jmp interrupt_common_stub",
        );
    };
}

global_asm!(
    ".global interrupt_common_stub",
    "interrupt_common_stub:",
    "push ds",
    "pushad",
    "mov ax, {kernel_data}",
    "mov ds, ax",
    "mov es, ax",
    "push esp",
    "call kernel_interrupt_common",
    "add esp, 4",
    "pop ds",
    "popad",
    "add esp, 8",
    "iretd",
    kernel_data = const selector::KERNEL_DATA,
);

isr_no_err!(isr0, 0);
isr_no_err!(isr1, 1);
isr_no_err!(isr2, 2);
isr_no_err!(isr3, 3);
isr_no_err!(isr4, 4);
isr_no_err!(isr5, 5);
isr_no_err!(isr6, 6);
isr_no_err!(isr7, 7);
isr_has_err!(isr8, 8);
isr_no_err!(isr9, 9);
isr_has_err!(isr10, 10);
isr_has_err!(isr11, 11);
isr_has_err!(isr12, 12);
isr_has_err!(isr13, 13);
isr_has_err!(isr14, 14);
isr_no_err!(isr15, 15);
isr_no_err!(isr16, 16);
isr_has_err!(isr17, 17);
isr_no_err!(isr18, 18);
isr_no_err!(isr19, 19);
isr_no_err!(isr20, 20);
isr_no_err!(isr21, 21);
isr_no_err!(isr22, 22);
isr_no_err!(isr23, 23);
isr_no_err!(isr24, 24);
isr_no_err!(isr25, 25);
isr_no_err!(isr26, 26);
isr_no_err!(isr27, 27);
isr_no_err!(isr28, 28);
isr_no_err!(isr29, 29);
isr_no_err!(isr30, 30);
isr_no_err!(isr31, 31);

isr_no_err!(irq0, 32);
isr_no_err!(irq1, 33);
isr_no_err!(irq2, 34);
isr_no_err!(irq3, 35);
isr_no_err!(irq4, 36);
isr_no_err!(irq5, 37);
isr_no_err!(irq6, 38);
isr_no_err!(irq7, 39);
isr_no_err!(irq8, 40);
isr_no_err!(irq9, 41);
isr_no_err!(irq10, 42);
isr_no_err!(irq11, 43);
isr_no_err!(irq12, 44);
isr_no_err!(irq13, 45);
isr_no_err!(irq14, 46);
isr_no_err!(irq15, 47);

isr_no_err!(isr_syscall, 0x80);

extern "C" {
    fn isr0();
    fn isr1();
    fn isr2();
    fn isr3();
    fn isr4();
    fn isr5();
    fn isr6();
    fn isr7();
    fn isr8();
    fn isr9();
    fn isr10();
    fn isr11();
    fn isr12();
    fn isr13();
    fn isr14();
    fn isr15();
    fn isr16();
    fn isr17();
    fn isr18();
    fn isr19();
    fn isr20();
    fn isr21();
    fn isr22();
    fn isr23();
    fn isr24();
    fn isr25();
    fn isr26();
    fn isr27();
    fn isr28();
    fn isr29();
    fn isr30();
    fn isr31();

    fn irq0();
    fn irq1();
    fn irq2();
    fn irq3();
    fn irq4();
    fn irq5();
    fn irq6();
    fn irq7();
    fn irq8();
    fn irq9();
    fn irq10();
    fn irq11();
    fn irq12();
    fn irq13();
    fn irq14();
    fn irq15();

    fn isr_syscall();
}

/// The `(vector, handler address)` table handed to
/// [`super::idt::init`]. Built from function pointers rather than typed
/// manually so a stub added above and forgotten here is a compile error
/// (unused `extern` warning aside) rather than a silent gap.
pub fn table() -> [(u8, u32); 49] {
    [
        (0, isr0 as u32),
        (1, isr1 as u32),
        (2, isr2 as u32),
        (3, isr3 as u32),
        (4, isr4 as u32),
        (5, isr5 as u32),
        (6, isr6 as u32),
        (7, isr7 as u32),
        (8, isr8 as u32),
        (9, isr9 as u32),
        (10, isr10 as u32),
        (11, isr11 as u32),
        (12, isr12 as u32),
        (13, isr13 as u32),
        (14, isr14 as u32),
        (15, isr15 as u32),
        (16, isr16 as u32),
        (17, isr17 as u32),
        (18, isr18 as u32),
        (19, isr19 as u32),
        (20, isr20 as u32),
        (21, isr21 as u32),
        (22, isr22 as u32),
        (23, isr23 as u32),
        (24, isr24 as u32),
        (25, isr25 as u32),
        (26, isr26 as u32),
        (27, isr27 as u32),
        (28, isr28 as u32),
        (29, isr29 as u32),
        (30, isr30 as u32),
        (31, isr31 as u32),
        (32, irq0 as u32),
        (33, irq1 as u32),
        (34, irq2 as u32),
        (35, irq3 as u32),
        (36, irq4 as u32),
        (37, irq5 as u32),
        (38, irq6 as u32),
        (39, irq7 as u32),
        (40, irq8 as u32),
        (41, irq9 as u32),
        (42, irq10 as u32),
        (43, irq11 as u32),
        (44, irq12 as u32),
        (45, irq13 as u32),
        (46, irq14 as u32),
        (47, irq15 as u32),
        (0x80, isr_syscall as u32),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_covers_every_exception_irq_and_the_syscall_vector_exactly_once() {
        let mut vectors: [u8; 49] = table().map(|(v, _)| v);
        vectors.sort_unstable();

        let mut expected: [u8; 49] = [0; 49];
        for v in 0..32u8 {
            expected[v as usize] = v;
        }
        for v in 0..16u8 {
            expected[32 + v as usize] = 32 + v;
        }
        expected[48] = 0x80;
        expected.sort_unstable();

        assert_eq!(vectors, expected);
    }
}
