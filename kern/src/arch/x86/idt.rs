// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interrupt Descriptor Table: gate encoding, the shared interrupt-frame
//! layout, and the handler registry that CPU exceptions, PIC IRQs, and the
//! INT 0x80 syscall gate all dispatch through.

use abi::vector;

const IDT_ENTRIES: usize = 256;

/// Interrupt-gate type/attribute byte for a ring-0-only gate: present,
/// DPL0, 32-bit interrupt gate.
pub const GATE_KERNEL_ONLY: u8 = 0x8E;
/// Same, but DPL3 -- usable from ring 3 via `int`. Only the syscall vector
/// uses this; every CPU exception and PIC IRQ gate stays ring-0-only so
/// user code cannot forge a fault or a timer tick via `int n`.
pub const GATE_USER_CALLABLE: u8 = 0xEE;

/// 8-byte IDT gate descriptor layout.
#[derive(Copy, Clone, Default)]
#[repr(C, packed)]
struct IdtEntry {
    offset_low: u16,
    selector: u16,
    zero: u8,
    type_attr: u8,
    offset_high: u16,
}

/// Builds the raw fields of an IDT gate. Pure, so it can be exercised by a
/// host unit test without a real IDT.
pub const fn encode_gate(handler: u32, selector: u16, type_attr: u8) -> (u16, u16, u8, u8, u16) {
    (
        (handler & 0xFFFF) as u16,
        selector,
        0,
        type_attr,
        ((handler >> 16) & 0xFFFF) as u16,
    )
}

static mut IDT: [IdtEntry; IDT_ENTRIES] = [IdtEntry {
    offset_low: 0,
    selector: 0,
    zero: 0,
    type_attr: 0,
    offset_high: 0,
}; IDT_ENTRIES];

#[repr(C, packed)]
struct IdtrImage {
    limit: u16,
    base: u32,
}

/// Register state captured on every interrupt, exception, and syscall trap,
/// in the order the common assembly stub pushes them. This is the kernel's
/// one and only "saved context" shape: task context switches save/restore
/// it exactly like an interrupt does, so a preempted task and a task that
/// just entered a syscall look identical to the scheduler.
#[derive(Copy, Clone, Debug, Default)]
#[repr(C, packed)]
pub struct InterruptFrame {
    pub ds: u32,
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    pub esp_dummy: u32, // pushed by PUSHA, ignored on restore
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
    pub int_no: u32,
    pub err_code: u32,
    // CPU-pushed, present on every entry:
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
    // Only valid (and only popped) when the trap came from ring 3:
    pub useresp: u32,
    pub ss: u32,
}

/// Human-readable names for vectors 0-31, used only for the panic
/// diagnostic printed when an exception has no registered handler.
pub const EXCEPTION_NAMES: [&str; 32] = [
    "Division By Zero",
    "Debug",
    "Non Maskable Interrupt",
    "Breakpoint",
    "Into Detected Overflow",
    "Out of Bounds",
    "Invalid Opcode",
    "No Coprocessor",
    "Double Fault",
    "Coprocessor Segment Overrun",
    "Bad TSS",
    "Segment Not Present",
    "Stack Fault",
    "General Protection Fault",
    "Page Fault",
    "Unknown Interrupt",
    "Coprocessor Fault",
    "Alignment Check",
    "Machine Check",
    "SIMD Floating-Point Exception",
    "Virtualization Exception",
    "Control Protection Exception",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Hypervisor Injection Exception",
    "VMM Communication Exception",
    "Security Exception",
    "Reserved",
];

type HandlerFn = fn(&mut InterruptFrame);

static mut HANDLERS: [Option<HandlerFn>; IDT_ENTRIES] = [None; IDT_ENTRIES];

/// Registers `handler` for `vector`. Overwrites any previous registration;
/// the reference implementation treats this as "last writer wins" rather
/// than an error, since handler (re)registration only happens during boot.
pub fn register_handler(vector: u8, handler: HandlerFn) {
    unsafe {
        HANDLERS[vector as usize] = Some(handler);
    }
}

pub fn unregister_handler(vector: u8) {
    unsafe {
        HANDLERS[vector as usize] = None;
    }
}

/// Entry point called by the shared assembly trampoline for every vector.
/// CPU exceptions with no registered handler panic with the diagnostic
/// prelude; IRQs with no registered handler are silently EOI'd (a spurious
/// or not-yet-wired device interrupt is not fatal); the syscall vector is
/// always handled by [`crate::syscalls::dispatch`], registered at boot.
#[no_mangle]
extern "C" fn kernel_interrupt_common(frame: &mut InterruptFrame) {
    let vector = frame.int_no as u8;
    let handler = unsafe { HANDLERS[vector as usize] };
    let is_irq = (vector::IRQ_BASE..=vector::IRQ_LAST).contains(&vector);
    if is_irq {
        crate::trace::event_isr_enter(vector as u32);
    }

    match handler {
        Some(h) => h(frame),
        None if vector < vector::EXCEPTION_COUNT => unhandled_exception(frame),
        None => {}
    }

    // A registered IRQ handler still needs its EOI sent; an unhandled one
    // (spurious or not-yet-wired device) is no less entitled to one, so
    // this always runs for any IRQ vector rather than only the
    // `None` branch.
    if is_irq {
        #[cfg(target_arch = "x86")]
        unsafe {
            super::pic::send_eoi(vector - vector::IRQ_BASE)
        };
        crate::trace::event_isr_exit();
    }

    // The common interrupt-return path: the one and only place
    // `need_resched` is consumed. A handler above may have set it (the
    // timer ISR does, via `Scheduler::tick`); nothing in this function or
    // the handlers it calls reads it except here, after the handler has
    // fully run and the interrupt has been acknowledged.
    run_scheduler_if_needed();
}

fn run_scheduler_if_needed() {
    let scheduler = crate::sched::scheduler();
    if scheduler.take_need_resched() {
        scheduler.switch_now();
    }
}

fn unhandled_exception(frame: &InterruptFrame) -> ! {
    let name = EXCEPTION_NAMES
        .get(frame.int_no as usize)
        .copied()
        .unwrap_or("Unknown");
    panic!(
        "unhandled exception: {} (vector {}, err {:#x}) eip={:#x} cs={:#x} eflags={:#x}",
        name, frame.int_no, frame.err_code, frame.eip, frame.cs, frame.eflags
    );
}

/// Loads the IDT. Only vectors named in `stubs` get a present gate; every
/// other entry stays zeroed (not present), so a vector this kernel never
/// arms (nothing in 48..128 or 129..256) faults with `#NP` through the
/// already-registered vector 11 path rather than needing 256 distinct
/// assembly stubs for routines that can never fire. The syscall vector is
/// the one entry built with `GATE_USER_CALLABLE`.
///
/// # Safety
/// Must run once, after [`super::gdt::init`], with interrupts disabled.
#[cfg(target_arch = "x86")]
pub unsafe fn init(stubs: &[(u8, u32)]) {
    use abi::selector;

    for &(vector, addr) in stubs {
        let type_attr = if vector == vector::SYSCALL {
            GATE_USER_CALLABLE
        } else {
            GATE_KERNEL_ONLY
        };
        let (offset_low, selector, zero, type_attr, offset_high) =
            encode_gate(addr, selector::KERNEL_CODE, type_attr);
        IDT[vector as usize] = IdtEntry {
            offset_low,
            selector,
            zero,
            type_attr,
            offset_high,
        };
    }

    let idtr = IdtrImage {
        limit: (core::mem::size_of_val(&IDT) - 1) as u16,
        base: core::ptr::addr_of!(IDT) as u32,
    };
    core::arch::asm!("lidt [{0}]", in(reg) &idtr, options(nostack));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_only_gate_has_dpl_zero_and_present_bit() {
        let (_, _, _, type_attr, _) = encode_gate(0, 0x08, GATE_KERNEL_ONLY);
        assert_ne!(type_attr & 0x80, 0, "present bit");
        assert_eq!((type_attr >> 5) & 0b11, 0);
    }

    #[test]
    fn syscall_gate_has_dpl_three() {
        let (_, _, _, type_attr, _) = encode_gate(0, 0x08, GATE_USER_CALLABLE);
        assert_eq!((type_attr >> 5) & 0b11, 3);
    }

    #[test]
    fn gate_offset_splits_correctly_across_the_16_bit_halves() {
        let handler = 0x0012_3456u32;
        let (offset_low, _, _, _, offset_high) = encode_gate(handler, 0x08, GATE_KERNEL_ONLY);
        assert_eq!(offset_low, 0x3456);
        assert_eq!(offset_high, 0x0012);
    }

    #[test]
    fn exception_name_table_has_32_entries() {
        assert_eq!(EXCEPTION_NAMES.len(), 32);
        assert_eq!(EXCEPTION_NAMES[0], "Division By Zero");
        assert_eq!(EXCEPTION_NAMES[14], "Page Fault");
    }
}
