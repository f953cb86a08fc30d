// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel startup: the `kmain`-equivalent called from the boot trampoline
//! once the CPU is in 32-bit protected mode, and nothing else.
//!
//! Grounded on `original_source/core/init.c`'s phase ordering: HAL/GDT/IDT
//! first (nothing else is safe without them), then the timer, the physical
//! allocator, the MMU, then the task/scheduler subsystem, and finally
//! interrupts on and a handoff into the first task. Unlike the original,
//! there is no VGA/serial console wiring here -- that is the boot crate's
//! job, done by calling [`crate::console::set_putchar`] before this
//! function runs, so this module only ever reaches the console through
//! `klog!`.

use abi::priority;

use crate::arch::{self, gdt, Hal, X86};
use crate::arch::x86::{idt, mmu, pic, stubs, timer};
use crate::pmm::{self, MultibootInfo};
use crate::{sched, syscalls, task};

/// Timer tick rate. 100 Hz gives a 10 ms quantum, matching the divisor the
/// reference `timer_init(1000)` call would yield if this kernel used
/// millisecond ticks instead; this kernel's tick is a scheduling quantum,
/// not a wall-clock millisecond, so a coarser rate is appropriate.
const TIMER_FREQUENCY_HZ: u32 = 100;

/// Stack used only until the first task is scheduled. Its top becomes the
/// TSS's initial `esp0`; once a real task is running, every subsequent
/// `esp0` update comes from that task's own stack in the pool `task`
/// allocates from.
const BOOT_STACK_SIZE: usize = 4096;
static mut BOOT_STACK: [u8; BOOT_STACK_SIZE] = [0; BOOT_STACK_SIZE];

/// Hand-assembled ring-3 program for the boot-time "create and run a user
/// task" demonstration: `exit(0)` via `INT 0x80`, then spins in place as a
/// safety net in the (unreachable) case the syscall returns instead of
/// switching away.
///
/// ```text
/// mov eax, 1      ; Sysnum::Exit
/// xor ebx, ebx    ; arg0 = 0
/// int 0x80
/// loop: jmp loop
/// ```
const USER_DEMO_CODE: [u8; 11] = [
    0xB8, 0x01, 0x00, 0x00, 0x00, // mov eax, 1
    0x31, 0xDB, // xor ebx, ebx
    0xCD, 0x80, // int 0x80
    0xEB, 0xFE, // jmp $
];

/// Reserve the low 1 MiB (real-mode IVT, BDA, video memory, and typically
/// the kernel image itself on this target) from the frame allocator. The
/// boot crate's linker script fixes the kernel's actual load address within
/// this range, so reserving the whole megabyte is simpler and no less
/// correct than threading link-time symbols through to here.
const LOW_MEMORY_RESERVED_BYTES: u32 = 1024 * 1024;

/// Entry point called by the boot trampoline with the raw multiboot
/// handoff values. Never returns: the last thing it does is transfer
/// control to the first scheduled task via [`crate::arch::start_first_task`].
///
/// # Safety
/// Must be called exactly once, immediately after the CPU reaches 32-bit
/// protected mode with interrupts disabled, and before any other kernel
/// function runs.
pub unsafe fn start_kernel(multiboot_magic: u32, multiboot_info: *const MultibootInfo) -> ! {
    let boot_stack_top = BOOT_STACK.as_mut_ptr().add(BOOT_STACK_SIZE) as u32;
    gdt::init(boot_stack_top);
    idt::init(&stubs::table());
    pic::remap();

    klog!("kernel: HAL, GDT, and IDT initialized");

    timer::init(TIMER_FREQUENCY_HZ);
    idt::register_handler(abi::vector::IRQ_BASE, timer::isr);
    klog!("kernel: PIT programmed at {} Hz", TIMER_FREQUENCY_HZ);

    if !pmm::init(multiboot_magic, multiboot_info) {
        klog!("kernel: no usable multiboot memory map, using fallback model");
    }
    pmm::reserve_region(0, LOW_MEMORY_RESERVED_BYTES);
    klog!("kernel: physical memory manager ready");

    mmu::init();
    klog!("kernel: paging enabled (16 MiB identity-mapped)");

    syscalls::init();
    idt::register_handler(abi::vector::SYSCALL, syscalls::isr);
    klog!("kernel: syscall gate armed at INT 0x80");

    let scheduler = sched::scheduler();
    task::spawn_kernel_thread(scheduler, 0, "idle", priority::IDLE, idle_entry, 0);
    task::spawn_kernel_thread(scheduler, 1, "init", priority::DEFAULT, init_thread_entry, 0);
    klog!("kernel: idle and init threads enqueued");

    task::create_user_task(
        scheduler,
        2,
        "user-demo",
        priority::DEFAULT,
        USER_DEMO_CODE.as_ptr(),
        USER_DEMO_CODE.len(),
    )
    .expect("failed to create boot-time user task demo");
    klog!("kernel: user task demo created and enqueued");

    // The first `switch_now` always finds no previously-running task, so it
    // only picks `current` and primes the TSS/CURRENT_TASK_PTR for it --
    // the actual jump into it happens below, once, via `start_first_task`.
    scheduler.switch_now();
    let first = scheduler.current_index().expect("scheduler picked no task at boot");

    klog!("kernel: enabling interrupts, handing off to task {}", first);
    X86.enable_interrupts();

    arch::start_first_task(scheduler.task(first).unwrap())
}

/// The idle task: runs at [`priority::IDLE`], the lowest priority, so it
/// only gets the CPU when every other task is blocked or exited. `hlt`
/// between checks so an idle CPU draws less power and responds to the next
/// interrupt immediately rather than busy-spinning.
extern "C" fn idle_entry(_arg: u32) -> ! {
    loop {
        unsafe { core::arch::asm!("hlt", options(nomem, nostack)) };
    }
}

/// Boot-time demonstration thread, standing in for the reference
/// implementation's `test_thread_entry`: proves the scheduler, the timer
/// quantum, and voluntary yielding all work together before any real
/// userspace task exists.
extern "C" fn init_thread_entry(_arg: u32) -> ! {
    klog!("init: started");
    for i in 0..10 {
        klog!("init: iteration {}", i);
        sched::scheduler().switch_now();
    }
    klog!("init: exiting");
    syscalls::exit_current_task(0);
}
