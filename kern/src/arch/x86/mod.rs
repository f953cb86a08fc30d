// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The sole architecture backend: 32-bit x86.

/// An assertion that is never compiled out, even in release builds:
/// kernel invariants are cheap to check relative to the cost of silent
/// corruption, so unlike `debug_assert!` these always run.
#[macro_export]
macro_rules! uassert {
    ($cond:expr $(,)?) => {
        assert!($cond)
    };
    ($cond:expr, $($arg:tt)+) => {
        assert!($cond, $($arg)+)
    };
}

pub mod gdt;
pub mod idt;
pub mod mmu;
pub mod pic;
pub mod port;
pub mod stubs;
pub mod timer;

pub use idt::InterruptFrame;
pub use mmu::AddressSpace;

use core::sync::atomic::{AtomicPtr, AtomicU32, Ordering};

use crate::task::Task;

/// The architecture-independent view of a task's saved machine state: just
/// the kernel stack pointer at the moment this task last stopped running.
/// Before a task's first dispatch that pointer addresses a [`SwitchBlock`]
/// built by [`prime`] over an [`InterruptFrame`]; after its first
/// `switch_to`, it addresses whatever shape `switch_to` itself saves.
/// Syscall argument access always goes through [`SavedState::from_frame`]
/// instead, which wraps a live `InterruptFrame` directly -- the one case
/// where the pointer is never a saved stack at all, just the frame the
/// current trap is already standing on.
#[derive(Copy, Clone, Debug)]
#[repr(transparent)]
pub struct SavedState {
    sp: u32,
}

impl Default for SavedState {
    fn default() -> Self {
        SavedState { sp: 0 }
    }
}

impl SavedState {
    pub fn stack_pointer(&self) -> u32 {
        self.sp
    }

    /// Wraps an already-live [`InterruptFrame`] (the one the common entry
    /// stub just built on the current stack) as a [`SavedState`], so the
    /// syscall dispatcher can use the same `ArchState` accessors a
    /// preempted task's saved frame would use, without a second trap.
    pub(crate) fn from_frame(frame: &mut InterruptFrame) -> Self {
        SavedState { sp: frame as *mut InterruptFrame as u32 }
    }

    unsafe fn frame(&self) -> &InterruptFrame {
        &*(self.sp as *const InterruptFrame)
    }

    unsafe fn frame_mut(&mut self) -> &mut InterruptFrame {
        &mut *(self.sp as *mut InterruptFrame)
    }
}

/// Architecture-independent access to a trapped task's syscall arguments
/// and return slot. Mirrors the register convention: EBX/ECX/EDX/ESI/EDI
/// carry up to five arguments, EAX carries the syscall number on entry and
/// the return value on exit.
pub trait ArchState {
    fn arg0(&self) -> u32;
    fn arg1(&self) -> u32;
    fn arg2(&self) -> u32;
    fn arg3(&self) -> u32;
    fn arg4(&self) -> u32;
    fn syscall_number(&self) -> u32;
    fn ret0(&mut self, x: u32);
}

impl ArchState for SavedState {
    fn arg0(&self) -> u32 {
        unsafe { self.frame().ebx }
    }
    fn arg1(&self) -> u32 {
        unsafe { self.frame().ecx }
    }
    fn arg2(&self) -> u32 {
        unsafe { self.frame().edx }
    }
    fn arg3(&self) -> u32 {
        unsafe { self.frame().esi }
    }
    fn arg4(&self) -> u32 {
        unsafe { self.frame().edi }
    }
    fn syscall_number(&self) -> u32 {
        unsafe { self.frame().eax }
    }
    fn ret0(&mut self, x: u32) {
        unsafe { self.frame_mut().eax = x }
    }
}

/// The `Hal` trait gathers the handful of privileged operations the
/// portable parts of the kernel need, mirroring the reference
/// implementation's `struct hal_ops` function-pointer table. Since there is
/// exactly one implementation (there's only one architecture this kernel
/// targets), this is a plain `impl` on a unit struct rather than a trait
/// object -- no dynamic dispatch is paid for or needed.
pub trait Hal {
    unsafe fn enable_interrupts(&self);
    unsafe fn disable_interrupts(&self) -> bool;
    unsafe fn restore_interrupts(&self, was_enabled: bool);
    unsafe fn halt(&self) -> !;
}

pub struct X86;

impl Hal for X86 {
    unsafe fn enable_interrupts(&self) {
        core::arch::asm!("sti", options(nomem, nostack));
    }

    unsafe fn disable_interrupts(&self) -> bool {
        let flags: u32;
        core::arch::asm!("pushfd", "pop {0:e}", "cli", out(reg) flags, options(nomem));
        flags & (1 << 9) != 0
    }

    unsafe fn restore_interrupts(&self, was_enabled: bool) {
        if was_enabled {
            core::arch::asm!("sti", options(nomem, nostack));
        }
    }

    unsafe fn halt(&self) -> ! {
        loop {
            core::arch::asm!("hlt", options(nomem, nostack));
        }
    }
}

/// RAII interrupt-disable guard. Captures whether interrupts were already
/// enabled on construction and restores exactly that state on drop, so
/// nested critical sections (and early returns out of one) can never leave
/// interrupts permanently disabled or re-enable them too early.
pub struct CriticalSection {
    was_enabled: bool,
}

impl CriticalSection {
    pub fn enter() -> Self {
        let was_enabled = unsafe { X86.disable_interrupts() };
        CriticalSection { was_enabled }
    }
}

impl Drop for CriticalSection {
    fn drop(&mut self) {
        unsafe { X86.restore_interrupts(self.was_enabled) };
    }
}

/// Pointer to the currently running task, consulted from interrupt context
/// (the timer ISR needs to charge CPU time and the syscall gate needs to
/// find the caller) without taking a lock -- IRQs are disabled for the
/// duration of any access that matters, per the concurrency discipline.
static CURRENT_TASK_PTR: AtomicPtr<Task> = AtomicPtr::new(core::ptr::null_mut());

pub fn set_current_task(task: &mut Task) {
    CURRENT_TASK_PTR.store(task as *mut _, Ordering::Relaxed);
}

pub fn current_task() -> Option<&'static mut Task> {
    let p = CURRENT_TASK_PTR.load(Ordering::Relaxed);
    if p.is_null() {
        None
    } else {
        unsafe { Some(&mut *p) }
    }
}

/// Builds the initial on-stack [`InterruptFrame`] for a kernel thread: EIP
/// points at [`crate::task::kernel_thread_trampoline`], CS/SS/DS are the
/// kernel selectors, and EFLAGS has the interrupt-enable bit set so the
/// task starts with interrupts on. `entry` and `arg` are passed through as
/// EBX/ECX so the trampoline can call `entry(arg)` before exiting.
///
/// # Safety
/// `stack_top` must point one-past-the-end of a valid, exclusively-owned
/// stack region at least `core::mem::size_of::<InterruptFrame>()` bytes.
pub unsafe fn prime_kernel_thread(stack_top: u32, entry: u32, arg: u32) -> SavedState {
    prime(stack_top, entry, arg, abi::selector::KERNEL_CODE, abi::selector::KERNEL_DATA, None)
}

/// Builds the initial on-stack frame for a ring-3 user task: CS/SS are the
/// user selectors (RPL 3), and a `useresp`/`ss` pair is included so `iret`
/// performs a privilege-elevating return onto the user stack described by
/// [`abi::user_layout`].
///
/// # Safety
/// See [`prime_kernel_thread`]; additionally `user_stack_top` must be a
/// valid top-of-stack address within the target address space's mapped
/// user stack page.
pub unsafe fn prime_user_task(
    kernel_stack_top: u32,
    entry: u32,
    arg: u32,
    user_stack_top: u32,
) -> SavedState {
    prime(
        kernel_stack_top,
        entry,
        arg,
        abi::selector::USER_CODE,
        abi::selector::USER_DATA,
        Some(user_stack_top),
    )
}

/// The `switch_to`-compatible shape a never-yet-run task's saved stack
/// pointer must have: laid out, low address to high, exactly as
/// `switch_to`'s save half leaves one (`pushfd; push edi; push esi; push
/// ebx; push ebp` is the push order, so memory reads `eflags, edi, esi,
/// ebx, ebp` low-to-high, followed by the return address `ret` pops last).
/// Built by [`prime`] immediately below the [`InterruptFrame`] it primes,
/// with `return_addr` pointing at [`resume_primed_frame`] -- so whether a
/// task's first dispatch comes through [`start_first_task`] or through an
/// ordinary [`switch_to`] call, both end up running the same frame-restore
/// tail once they `ret` into it.
#[repr(C)]
struct SwitchBlock {
    eflags: u32,
    edi: u32,
    esi: u32,
    ebx: u32,
    ebp: u32,
    return_addr: u32,
}

unsafe fn prime(
    stack_top: u32,
    entry: u32,
    arg: u32,
    cs: u16,
    ds: u16,
    user_stack: Option<u32>,
) -> SavedState {
    let frame_size = core::mem::size_of::<InterruptFrame>() as u32;
    let block_size = core::mem::size_of::<SwitchBlock>() as u32;
    uassert!(stack_top >= frame_size + block_size);
    let frame_addr = stack_top - frame_size;
    let frame = &mut *(frame_addr as *mut InterruptFrame);
    *frame = InterruptFrame::default();
    frame.ds = ds as u32;
    frame.ebx = entry; // carried to the trampoline as the entry fn pointer
    frame.ecx = arg;
    frame.eip = crate::task::kernel_thread_trampoline as u32;
    frame.cs = cs as u32;
    frame.eflags = abi::user_layout::EFLAGS;
    if let Some(usp) = user_stack {
        frame.useresp = usp;
        frame.ss = ds as u32;
    }

    let block_addr = frame_addr - block_size;
    let block = &mut *(block_addr as *mut SwitchBlock);
    block.eflags = 0;
    block.edi = 0;
    block.esi = 0;
    block.ebx = 0;
    block.ebp = 0;
    block.return_addr = resume_primed_frame as u32;

    SavedState { sp: block_addr }
}

/// Switches from `prev`'s register context to `next`'s: pushes every
/// register the `cdecl` caller expects preserved (`ebp`/`ebx`/`esi`/`edi`)
/// plus `eflags` onto the current stack, stashes the resulting `esp` in
/// `prev`, loads `next`'s `esp`, and pops the same five things back off --
/// symmetric around the stack swap, so the `ret` at the end returns into
/// whatever called `switch_to` the last time *this* stack was saved, not
/// into this invocation's caller. An ordinary `call switch_to` followed by
/// this `ret` is a complete stackful coroutine switch; nothing about it
/// depends on being invoked from interrupt context; [`sched::Scheduler::
/// switch_now`](crate::sched::Scheduler::switch_now) calls it directly, both
/// from the timer/syscall interrupt tail and from plain kernel code that
/// calls `switch_now` voluntarily (see `kern::startup`).
///
/// # Safety
/// `prev`'s frame must be the stack `switch_to` itself is currently running
/// on (so the saved `esp` is recoverable later by a symmetric call into
/// this same function), and `next.sp` must point at a [`SwitchBlock`]-
/// shaped stack -- either saved by a prior `switch_to` call, or built by
/// [`prime`] for a task that has never run. Both shapes end in a `ret`
/// target that is a well-formed resume point (a prior caller of
/// `switch_to`, or [`resume_primed_frame`]), which is what makes the two
/// interchangeable from `switch_to`'s point of view.
#[cfg(target_arch = "x86")]
#[unsafe(naked)]
pub unsafe extern "C" fn switch_to(_prev: &mut SavedState, _next: &SavedState) {
    core::arch::asm!(
        "push ebp",
        "push ebx",
        "push esi",
        "push edi",
        "pushfd",
        "mov eax, [esp + 24]", // prev: &mut SavedState, pushed before the 5 regs above
        "mov [eax], esp",
        "mov eax, [esp + 28]", // next: &SavedState
        "mov esp, [eax]",
        "popfd",
        "pop edi",
        "pop esi",
        "pop ebx",
        "pop ebp",
        "ret",
        options(noreturn),
    );
}

/// The tail every never-yet-run task's primed stack resumes into, reached
/// via `ret` from either [`start_first_task`] or an ordinary [`switch_to`]
/// call: pops the [`InterruptFrame`] [`prime`] built (the
/// [`SwitchBlock`] below it has already been popped by whichever caller
/// got here) and `iret`s into it, the same landing every interrupt return
/// uses.
#[cfg(target_arch = "x86")]
#[unsafe(naked)]
unsafe extern "C" fn resume_primed_frame() -> ! {
    core::arch::asm!(
        "pop ds",
        "popad",
        "add esp, 8", // skip int_no, err_code
        "iretd",
        options(noreturn),
    );
}

/// Loads `task`'s saved stack pointer and runs the same register-restore
/// half [`switch_to`] would, landing on whatever `ret` target that stack
/// has saved -- for a task fresh out of [`prime`], that's
/// [`resume_primed_frame`]. Used exactly once, at the end of boot, to hand
/// control to the first scheduled task; there is no `prev` to save here,
/// since nothing was running before it.
#[cfg(target_arch = "x86")]
pub unsafe fn start_first_task(task: &Task) -> ! {
    core::arch::asm!(
        "mov esp, {sp}",
        "popfd",
        "pop edi",
        "pop esi",
        "pop ebx",
        "pop ebp",
        "ret",
        sp = in(reg) task.save().sp,
        options(noreturn),
    );
}
