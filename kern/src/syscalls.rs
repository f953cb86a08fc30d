// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The INT 0x80 syscall gate: a dispatch table over the four syscalls this
//! kernel implements, keyed by [`abi::Sysnum`].
//!
//! Grounded on `original_source/core/syscall.c`'s register convention and
//! its two firm invariants: slot 0 of the dispatch table is always invalid
//! (syscall numbers start at 1; a lookup of 0 falls through the same
//! "missing entry" path as any unassigned slot, not a special case), and
//! the dispatch path itself never logs -- logging happens in the syscall
//! bodies, if at all, never in the hot lookup-and-call sequence.

use abi::{SyscallError, Sysnum, MAX_SYSCALLS};

use crate::arch::{ArchState, SavedState};
use crate::err::UserError;
use crate::sched::{NextTask, Scheduler};

type SyscallFn = fn(&mut Scheduler, usize, &mut SavedState) -> Result<NextTask, UserError>;

/// The dispatch table. Built once at startup by [`init`]; index 0 is never
/// populated.
static mut TABLE: [Option<SyscallFn>; MAX_SYSCALLS] = [None; MAX_SYSCALLS];

pub fn init() {
    unsafe {
        TABLE[Sysnum::Exit as usize] = Some(sys_exit);
        TABLE[Sysnum::Yield as usize] = Some(sys_yield);
        TABLE[Sysnum::GetPid as usize] = Some(sys_getpid);
        TABLE[Sysnum::SleepUs as usize] = Some(sys_sleep_us);
    }
}

/// Registered against the syscall vector by `kern::startup`. Wraps the
/// trap's own [`crate::arch::InterruptFrame`] as a [`SavedState`] (no
/// second indirection needed: the frame this interrupt just built on the
/// current stack *is* the live register state) and dispatches.
///
/// A syscall that wants to switch tasks does so immediately, here, rather
/// than through `Scheduler::tick`'s `need_resched` flag -- that flag is
/// reserved for the timer quantum expiring, never touched by a handler
/// body, this one included. `exit`/`yield` asking for `NextTask::Other`
/// is a direct request to switch right now.
pub fn isr(frame: &mut crate::arch::InterruptFrame) {
    let mut saved = SavedState::from_frame(frame);
    let scheduler = crate::sched::scheduler();
    let current = scheduler
        .current_index()
        .expect("syscall trap with no current task");

    if dispatch(scheduler, current, &mut saved) == NextTask::Other {
        scheduler.switch_now();
    }
}

/// Looks up the syscall number in EAX, dispatches, and writes the result back into EAX
/// before returning: on success the syscall's own return value; on
/// failure, `SyscallError::to_eax()` (a negative code).
pub fn dispatch(scheduler: &mut Scheduler, current: usize, frame: &mut SavedState) -> NextTask {
    crate::trace::event_syscall_enter(frame.syscall_number());

    let nr = frame.syscall_number() as usize;
    let handler = if nr < MAX_SYSCALLS {
        unsafe { TABLE[nr] }
    } else {
        None
    };

    let next = match handler {
        Some(f) => match f(scheduler, current, frame) {
            Ok(next) => next,
            Err(UserError::Recoverable(code, next)) => {
                frame.ret0(code.to_eax() as u32);
                next
            }
            Err(UserError::Unrecoverable(code)) => {
                panic!("unrecoverable syscall error: {:?}", code);
            }
        },
        None => {
            frame.ret0(SyscallError::NotImplemented.to_eax() as u32);
            NextTask::Same
        }
    };

    crate::trace::event_syscall_exit();
    next
}

fn sys_exit(
    scheduler: &mut Scheduler,
    current: usize,
    frame: &mut SavedState,
) -> Result<NextTask, UserError> {
    let code = frame.arg0() as i32;
    scheduler.task_mut(current).unwrap().mark_exited(code);
    Ok(NextTask::Other)
}

fn sys_yield(
    _scheduler: &mut Scheduler,
    _current: usize,
    frame: &mut SavedState,
) -> Result<NextTask, UserError> {
    frame.ret0(0);
    Ok(NextTask::Other)
}

fn sys_getpid(
    scheduler: &mut Scheduler,
    current: usize,
    frame: &mut SavedState,
) -> Result<NextTask, UserError> {
    let id = scheduler.task(current).unwrap().id();
    frame.ret0(id.0);
    Ok(NextTask::Same)
}

/// Always returns `not-implemented`, ignoring its argument, with no side
/// effect: no yield, no sleep-queue entry. Confirmed against
/// `original_source/core/syscall.c` with no ambiguity against the design.
fn sys_sleep_us(
    _scheduler: &mut Scheduler,
    _current: usize,
    _frame: &mut SavedState,
) -> Result<NextTask, UserError> {
    Err(SyscallError::NotImplemented.into())
}

/// Called directly (not through INT 0x80) by
/// [`crate::task::kernel_thread_trampoline`] when a kernel thread's entry
/// function returns instead of calling `exit` itself. Ring-0 code calling
/// into the kernel doesn't need to trap; it can just call the function.
#[no_mangle]
pub(crate) extern "C" fn exit_current_task(code: i32) -> ! {
    if let Some(task) = crate::arch::current_task() {
        task.mark_exited(code);
    }
    // The scheduler reaps zombies and switches away on the next tick or
    // explicit yield; a kernel thread that falls off the end of its entry
    // function has nothing left to do but wait for that to happen.
    loop {
        unsafe { core::arch::asm!("hlt", options(nomem, nostack)) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_zero_is_never_populated() {
        init();
        unsafe {
            assert!(TABLE[0].is_none());
        }
    }

    #[test]
    fn all_four_defined_syscalls_are_populated() {
        init();
        unsafe {
            assert!(TABLE[Sysnum::Exit as usize].is_some());
            assert!(TABLE[Sysnum::Yield as usize].is_some());
            assert!(TABLE[Sysnum::GetPid as usize].is_some());
            assert!(TABLE[Sysnum::SleepUs as usize].is_some());
        }
    }
}
