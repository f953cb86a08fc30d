// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `Task` control block and the operations that create, destroy, and
//! inspect tasks.
//!
//! A task is either a kernel thread (runs in ring 0, shares the kernel's
//! address space) or a user task (runs in ring 3, owns a private address
//! space). Both shapes are represented by the same `Task` struct; what
//! differs is how its initial stack frame and segment selectors are primed
//! (see [`crate::arch::x86::prime_kernel_thread`] and
//! [`crate::arch::x86::prime_user_task`]).

use abi::{PageFlags, TaskId};

use crate::arch::{AddressSpace, SavedState};

/// Only stack size the kernel will hand out, matching the reference
/// implementation's fixed-size kernel-stack pool. A caller asking for any
/// other size gets `InvalidArgument`.
pub const STACK_SIZE: usize = 4096;

/// Longest name a task may be given, including the implicit NUL.
pub const NAME_LEN: usize = 32;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TaskState {
    Ready,
    Running,
    Blocked,
    Zombie,
}

/// A task's control block.
///
/// `next`/`prev` are indices into the owning [`crate::sched::Scheduler`]'s
/// task table and form the intrusive doubly linked ready-queue node; they
/// are meaningless (and left as `None`) while the task is not enqueued.
pub struct Task {
    id: TaskId,
    name: [u8; NAME_LEN],
    name_len: u8,
    state: TaskState,
    exit_code: i32,
    save: SavedState,
    address_space: Option<AddressSpace>,
    kernel_stack_base: usize,
    kernel_stack_size: usize,
    priority: u8,
    cpu_time_ticks: u64,
    last_run_tick: u64,
    pub(crate) next: Option<usize>,
    pub(crate) prev: Option<usize>,
}

impl Task {
    /// Builds a task control block around an already-primed [`SavedState`].
    /// Priming (setting up the initial stack frame so a context switch in
    /// lands in the entry trampoline) is the architecture's job; this just
    /// fills in the bookkeeping fields.
    pub fn new(
        id: TaskId,
        name: &str,
        priority: u8,
        save: SavedState,
        address_space: Option<AddressSpace>,
        kernel_stack_base: usize,
        kernel_stack_size: usize,
    ) -> Self {
        let mut name_buf = [0u8; NAME_LEN];
        let bytes = name.as_bytes();
        let n = bytes.len().min(NAME_LEN - 1);
        name_buf[..n].copy_from_slice(&bytes[..n]);

        Task {
            id,
            name: name_buf,
            name_len: n as u8,
            state: TaskState::Ready,
            exit_code: 0,
            save,
            address_space,
            kernel_stack_base,
            kernel_stack_size,
            priority,
            cpu_time_ticks: 0,
            last_run_tick: 0,
            next: None,
            prev: None,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &str {
        core::str::from_utf8(&self.name[..self.name_len as usize]).unwrap_or("")
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn set_state(&mut self, s: TaskState) {
        self.state = s;
    }

    pub fn is_runnable(&self) -> bool {
        matches!(self.state, TaskState::Ready | TaskState::Running)
    }

    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn save(&self) -> &SavedState {
        &self.save
    }

    pub fn save_mut(&mut self) -> &mut SavedState {
        &mut self.save
    }

    pub fn address_space(&self) -> Option<&AddressSpace> {
        self.address_space.as_ref()
    }

    pub fn kernel_stack(&self) -> (usize, usize) {
        (self.kernel_stack_base, self.kernel_stack_size)
    }

    pub fn cpu_time_ticks(&self) -> u64 {
        self.cpu_time_ticks
    }

    pub fn last_run_tick(&self) -> u64 {
        self.last_run_tick
    }

    /// Charges one tick of CPU time to this task and records when it ran,
    /// called from the timer ISR for whichever task is current.
    pub fn account_tick(&mut self, now: u64) {
        self.cpu_time_ticks += 1;
        self.last_run_tick = now;
    }

    /// Marks the task exited with `code` and no longer schedulable. A
    /// zombie's stack and address space are reclaimed by the caller
    /// (`kern::sched::reap`), not here, since reclaiming the current
    /// task's own stack while still running on it would be unsound.
    pub fn mark_exited(&mut self, code: i32) {
        self.exit_code = code;
        self.state = TaskState::Zombie;
    }
}

/// Fixed pool of kernel stacks, one per task-table slot, avoiding the
/// dynamic `kmalloc` the reference allocator uses -- consistent with
/// `kern::sched::Scheduler`'s fixed task table, since a stack without a
/// task to own it is useless anyway.
static mut KERNEL_STACKS: [[u8; STACK_SIZE]; crate::sched::MAX_TASKS] =
    [[0; STACK_SIZE]; crate::sched::MAX_TASKS];

/// Builds and enqueues a new kernel thread (ring 0, sharing the kernel's
/// own address space) at `priority`, running `entry(arg)`. `slot` selects
/// which kernel stack in the fixed pool backs it and must not already be
/// in use by a live task -- the only caller today is `kern::startup`,
/// which hands out slots in order as it creates the boot-time tasks.
///
/// # Safety
/// `slot` must be < [`crate::sched::MAX_TASKS`] and not already owned by
/// a running task.
pub unsafe fn spawn_kernel_thread(
    scheduler: &mut crate::sched::Scheduler,
    slot: usize,
    name: &str,
    priority: u8,
    entry: extern "C" fn(u32) -> !,
    arg: u32,
) -> usize {
    let stack = &mut KERNEL_STACKS[slot];
    let stack_base = stack.as_mut_ptr() as usize;
    let stack_top = (stack_base + STACK_SIZE) as u32;

    let save = crate::arch::prime_kernel_thread(stack_top, entry as u32, arg);
    let id = scheduler.allocate_id();
    let task = Task::new(id, name, priority, save, None, stack_base, STACK_SIZE);
    let index = scheduler.insert(task).expect("task table full");
    scheduler.enqueue(index);
    index
}

/// Builds and enqueues a new ring-3 user task: a code frame and a user
/// stack frame, each allocated from the PMM and mapped into a fresh
/// [`AddressSpace`], with `code_size` bytes copied from `code_ptr` into the
/// mapped code page. Like [`spawn_kernel_thread`], `slot` selects the
/// kernel stack the task traps onto (ring-3 code still needs a ring-0
/// stack for interrupts and syscalls) from the same fixed pool.
///
/// Only one frame is ever allocated for the code image, so `code_size`
/// must fit in a single page; a larger image is rejected, matching the
/// fixed-size-only stance `spawn_kernel_thread` takes on kernel stacks.
/// Returns `None` if `code_size` doesn't fit, the task table is full, or
/// any allocation along the way fails -- at which point nothing has been
/// permanently wired into the scheduler, but any frames/directory already
/// allocated this call are intentionally not unwound (matching this
/// kernel's crash-early posture: running out of early-boot memory is not a
/// recoverable condition worth unwind bookkeeping for).
///
/// # Safety
/// `slot` must be < [`crate::sched::MAX_TASKS`] and not already owned by a
/// running task. `code_ptr` must be valid for reads of `code_size` bytes.
pub unsafe fn create_user_task(
    scheduler: &mut crate::sched::Scheduler,
    slot: usize,
    name: &str,
    priority: u8,
    code_ptr: *const u8,
    code_size: usize,
) -> Option<usize> {
    if code_size as u32 > abi::PAGE_SIZE as u32 {
        return None;
    }

    let mut space = AddressSpace::create()?;

    let code_phys = crate::pmm::alloc_page()?;
    core::ptr::write_bytes(code_phys as *mut u8, 0, abi::PAGE_SIZE);
    core::ptr::copy_nonoverlapping(code_ptr, code_phys as *mut u8, code_size);
    let code_flags = PageFlags::PRESENT | PageFlags::USER | PageFlags::WRITABLE;
    space.map(abi::user_layout::CODE_BASE, code_phys, code_flags);

    let stack_phys = crate::pmm::alloc_page()?;
    let user_stack_vaddr = abi::user_layout::STACK_TOP - abi::user_layout::STACK_SIZE;
    space.map(user_stack_vaddr, stack_phys, code_flags);

    let stack = &mut KERNEL_STACKS[slot];
    let kernel_stack_base = stack.as_mut_ptr() as usize;
    let kernel_stack_top = (kernel_stack_base + STACK_SIZE) as u32;

    let save = crate::arch::prime_user_task(
        kernel_stack_top,
        abi::user_layout::CODE_BASE,
        0,
        abi::user_layout::STACK_TOP,
    );
    let id = scheduler.allocate_id();
    let task = Task::new(id, name, priority, save, Some(space), kernel_stack_base, STACK_SIZE);
    let index = scheduler.insert(task)?;
    scheduler.enqueue(index);
    Some(index)
}

/// The landing pad every freshly primed task resumes into (see
/// [`crate::arch::prime_kernel_thread`] and
/// [`crate::arch::prime_user_task`], which encode `entry` and `arg` into
/// EBX/ECX of the initial frame). Calls `entry(arg)` and, if it returns,
/// performs the same cleanup as an explicit `exit(0)` syscall -- a task
/// entry point is allowed to just `return` instead of calling `exit`.
///
/// This is declared `extern "C"` and given a fixed, known-simple prologue
/// expectation: it is only ever reached by loading EIP directly out of a
/// primed stack frame, never called through Rust's normal call convention,
/// so it must not assume any particular incoming stack layout beyond "EBX
/// and ECX hold entry and arg".
#[unsafe(naked)]
pub extern "C" fn kernel_thread_trampoline() -> ! {
    core::arch::naked_asm!(
        "push ecx",   // arg
        "call ebx",   // entry(arg)
        "push 0",     // exit code
        "call {exit}",
        "2:",
        "jmp 2b",
        exit = sym crate::syscalls::exit_current_task,
    )
}
