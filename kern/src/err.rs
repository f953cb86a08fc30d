// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Common error-handling support.
//!
//! This module is designed around the idea that kernel code spends too much
//! time handling and recording errors, and we ought to be able to separate
//! that concern using `Result`.

use crate::sched::NextTask;
use abi::SyscallError;

/// An error committed by user code when interacting with a syscall.
///
/// This is used internally as the returned error type for syscall
/// implementations. There is no cross-task fault attribution here the way
/// a message-passing kernel needs: every fault can only ever be charged to
/// the single calling task, so `UserError` carries no task index.
#[derive(Clone, Copy, Debug)]
pub enum UserError {
    /// A recoverable error. Recoverable errors are indicated to the errant
    /// task by returning a negative error code in EAX. They may still cause
    /// a context switch, however, as indicated by the `NextTask`.
    Recoverable(SyscallError, NextTask),
    /// An unrecoverable error. Unrecoverable errors mark the calling task
    /// faulted and no longer runnable; by spec this only ever happens for
    /// `InternalCorruption`, which is treated as fatal to the whole kernel
    /// rather than just the task, since a single-task-per-error design has
    /// nowhere softer to land a corrupted-ready-set bug.
    Unrecoverable(SyscallError),
}

impl From<SyscallError> for UserError {
    fn from(e: SyscallError) -> Self {
        Self::Recoverable(e, NextTask::Same)
    }
}
