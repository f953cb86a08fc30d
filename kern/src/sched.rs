// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The priority scheduler: a fixed task table, per-priority intrusive ready
//! queues, and the `kerncore` priority-summary bitmap tying them together.
//!
//! Grounded on `original_source/core/scheduler.c`. The bitmap lookup itself
//! (which priority is highest and non-empty) lives in `kerncore::sched`,
//! pure and host-testable; this module owns the parts that need an actual
//! `Task` to exist: the ready-queue FIFO links and `schedule()`/`tick()`.

use core::sync::atomic::{AtomicBool, Ordering};

use abi::{priority, TaskId};
use kerncore::sched::PriorityBitmap;

use crate::arch::SavedState;
use crate::task::{Task, TaskState};

/// Upper bound on live tasks, a fixed-size substitute for the dynamic
/// `kmalloc`-backed task list the reference implementation uses --
/// `SPEC_FULL.md`'s ambient stack section notes there is no kernel heap, so
/// the task table is a static array instead.
pub const MAX_TASKS: usize = 64;

/// Return value for operations that can have scheduling implications.
/// `#[must_use]` because forgetting to act on "we need to switch tasks" is
/// exactly the kind of bug that only shows up as mysteriously stuck tasks.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[must_use]
pub enum NextTask {
    /// Keep running whatever was running.
    Same,
    /// A switch is needed; the scheduler should pick who runs next.
    Other,
}

impl NextTask {
    pub fn combine(self, other: Self) -> Self {
        match (self, other) {
            (NextTask::Same, NextTask::Same) => NextTask::Same,
            _ => NextTask::Other,
        }
    }
}

struct Queue {
    head: Option<usize>,
    tail: Option<usize>,
}

impl Queue {
    const fn empty() -> Self {
        Queue { head: None, tail: None }
    }
}

pub struct Scheduler {
    tasks: [Option<Task>; MAX_TASKS],
    queues: [Queue; priority::LEVELS],
    bitmap: PriorityBitmap,
    current: Option<usize>,
    next_id: u32,
    ticks: u64,
    context_switches: u64,
    /// Set only by [`tick`], consumed only by the common interrupt-return
    /// path in the syscall/IRQ entry stub -- never read or written from
    /// inside a handler body, so a handler can never accidentally trigger
    /// (or suppress) a switch it didn't ask for.
    need_resched: AtomicBool,
}

impl Scheduler {
    pub const fn new() -> Self {
        const EMPTY_QUEUE: Queue = Queue::empty();
        const NONE_TASK: Option<Task> = None;
        Scheduler {
            tasks: [NONE_TASK; MAX_TASKS],
            queues: [EMPTY_QUEUE; priority::LEVELS],
            bitmap: PriorityBitmap::new(),
            current: None,
            next_id: 1,
            ticks: 0,
            context_switches: 0,
            need_resched: AtomicBool::new(false),
        }
    }

    /// Inserts `task` into a free table slot and returns its index, or
    /// `None` if the table is full.
    pub fn insert(&mut self, task: Task) -> Option<usize> {
        let slot = self.tasks.iter().position(Option::is_none)?;
        self.tasks[slot] = Some(task);
        Some(slot)
    }

    pub fn allocate_id(&mut self) -> TaskId {
        let id = TaskId(self.next_id);
        self.next_id += 1;
        id
    }

    pub fn task(&self, index: usize) -> Option<&Task> {
        self.tasks[index].as_ref()
    }

    pub fn task_mut(&mut self, index: usize) -> Option<&mut Task> {
        self.tasks[index].as_mut()
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    /// Appends `index` to the tail of its priority's ready queue (FIFO,
    /// matching `scheduler_enqueue`) and marks that priority non-empty in
    /// the summary bitmap. Enqueuing a task already in the queue is a
    /// logic error in the caller, not guarded against here, mirroring the
    /// reference implementation's assumption that callers track state.
    pub fn enqueue(&mut self, index: usize) {
        let priority = self.tasks[index].as_ref().unwrap().priority();
        let q = &mut self.queues[priority as usize];
        self.tasks[index].as_mut().unwrap().prev = q.tail;
        self.tasks[index].as_mut().unwrap().next = None;
        match q.tail {
            Some(tail) => self.tasks[tail].as_mut().unwrap().next = Some(index),
            None => q.head = Some(index),
        }
        q.tail = Some(index);
        self.bitmap.mark_ready(priority);
    }

    /// Removes `index` from whatever queue it's linked into. A no-op
    /// (idempotent) if the task is not currently enqueued, matching the
    /// spec's dequeue-from-empty-queue requirement.
    pub fn dequeue(&mut self, index: usize) {
        let priority = self.tasks[index].as_ref().unwrap().priority();
        let (prev, next) = {
            let t = self.tasks[index].as_ref().unwrap();
            (t.prev, t.next)
        };

        let q = &mut self.queues[priority as usize];
        match prev {
            Some(p) => self.tasks[p].as_mut().unwrap().next = next,
            None => q.head = next,
        }
        match next {
            Some(n) => self.tasks[n].as_mut().unwrap().prev = prev,
            None => q.tail = prev,
        }

        let t = self.tasks[index].as_mut().unwrap();
        t.next = None;
        t.prev = None;

        if q.head.is_none() {
            self.bitmap.mark_not_ready(priority);
        }
    }

    /// Picks the next task to run: the head of the highest non-empty
    /// priority's queue, or `None` if the ready set is entirely empty (the
    /// caller is expected to fall back to the idle task, which by
    /// convention is always ready and sits at [`abi::priority::IDLE`]).
    pub fn pick_next(&self) -> Option<usize> {
        let p = self.bitmap.highest_ready()?;
        self.queues[p as usize].head
    }

    /// Runs one scheduling decision: dequeues the chosen task from the
    /// ready set (it's about to become `Running`, not `Ready`), marks it
    /// current, and requeues the previous current task at the tail of its
    /// own priority (round-robin) if it's still runnable.
    ///
    /// Returns `None` both when there is nothing ready to run at all, and
    /// when the task picked is the one already running -- e.g. it was the
    /// only ready task at its priority and round-robin handed it straight
    /// back to itself. Either way there is no real switch for the caller
    /// to carry out.
    pub fn schedule(&mut self) -> Option<usize> {
        let prev = self.current.take();
        if let Some(prev_index) = prev {
            if self.tasks[prev_index].as_ref().unwrap().is_runnable() {
                self.tasks[prev_index].as_mut().unwrap().set_state(TaskState::Ready);
                self.enqueue(prev_index);
            }
        }

        let next = self.pick_next()?;
        self.dequeue(next);
        self.tasks[next].as_mut().unwrap().set_state(TaskState::Running);
        self.current = Some(next);

        if Some(next) == prev {
            return None;
        }

        self.context_switches += 1;
        Some(next)
    }

    /// Called from the timer ISR. Charges the current task a tick and, if
    /// another task is ready at its same priority, sets `need_resched` --
    /// never calls `schedule()` directly, so a long-running interrupt
    /// handler never recurses into a context switch mid-interrupt. A tick
    /// with no contention at the current priority leaves the flag alone:
    /// round-robin only matters when there's someone to round-robin with.
    pub fn tick(&mut self) {
        self.ticks += 1;
        if let Some(current) = self.current {
            let priority = self.tasks[current].as_ref().unwrap().priority();
            self.tasks[current].as_mut().unwrap().account_tick(self.ticks);
            if self.queues[priority as usize].head.is_some() {
                self.need_resched.store(true, Ordering::Relaxed);
            }
        }
    }

    /// Consumed only by the common interrupt-return path.
    pub fn take_need_resched(&self) -> bool {
        self.need_resched.swap(false, Ordering::Relaxed)
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn context_switches(&self) -> u64 {
        self.context_switches
    }

    /// Runs one scheduling decision and hands back the raw save-state
    /// pointers the architecture layer needs to perform the actual
    /// context switch: `(prev, next)`. `prev` is null the first time this
    /// is ever called (there is no previously running task during boot);
    /// the caller must not dereference it in that case.
    fn perform_switch(&mut self) -> Option<(*mut SavedState, *const SavedState)> {
        let prev_index = self.current;
        let next_index = self.schedule()?;
        let next_ptr = self.tasks[next_index].as_ref().unwrap().save() as *const SavedState;
        let prev_ptr = match prev_index {
            Some(p) => self.tasks[p].as_mut().unwrap().save_mut() as *mut SavedState,
            None => core::ptr::null_mut(),
        };
        Some((prev_ptr, next_ptr))
    }

    /// Runs one scheduling decision and, if it chose a real switch, carries
    /// it out: updates the TSS's `esp0` so a future ring-3-to-ring-0 trap
    /// for the new task lands on its own kernel stack, then hands control
    /// to [`crate::arch::switch_to`]. The one place both the timer ISR's
    /// `need_resched` path and a `NextTask::Other`-returning syscall
    /// converge, so the TSS update and the trace event can't be forgotten
    /// in one path and not the other.
    pub fn switch_now(&mut self) -> bool {
        let (prev, next) = match self.perform_switch() {
            Some(p) => p,
            None => return false,
        };
        let current = self.current_index().unwrap();
        crate::trace::event_context_switch(current);

        let (base, size) = self.task(current).unwrap().kernel_stack();
        crate::arch::gdt::set_kernel_stack((base + size) as u32);
        crate::arch::set_current_task(self.task_mut(current).unwrap());

        if prev.is_null() {
            return false;
        }
        #[cfg(target_arch = "x86")]
        unsafe {
            crate::arch::switch_to(&mut *prev, &*next)
        };
        true
    }
}

/// The single scheduler instance. One CPU, so one scheduler; a future SMP
/// port would need one of these per core, which is exactly why every
/// method above takes `&mut self` instead of reaching for statics
/// directly.
static mut SCHEDULER: Scheduler = Scheduler::new();

/// # Safety
/// Callers must only invoke this with interrupts disabled, or from
/// interrupt context, where the single-CPU, single-threaded-kernel
/// assumption holds.
pub fn scheduler() -> &'static mut Scheduler {
    unsafe { &mut *core::ptr::addr_of_mut!(SCHEDULER) }
}
