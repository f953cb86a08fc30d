// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A small preemptive real-time microkernel for a single-CPU 32-bit x86
//! target.
//!
//! Six interdependent subsystems make up the core: the HAL (`arch`), the
//! physical frame allocator (`pmm`), the two-level virtual memory manager
//! (`arch::x86::mmu`), a priority scheduler with bitmap lookup (`sched`,
//! backed by the host-testable `kerncore::sched`), the task/context-switch
//! core (`task`), and the ring-0/ring-3 system-call gate (`syscalls`).
//!
//! # Design principles
//!
//! 1. One architecture, no abstraction tax: `arch` has a single backend
//!    (32-bit x86) and exposes it through a plain trait rather than a
//!    function-pointer table, since there is nothing to dispatch between.
//! 2. Static configuration. Tick frequency, the task table size, and the
//!    default/idle priorities are `const`s set once, not runtime config.
//! 3. No kernel heap. The task table, ready queues, and frame bitmap are
//!    all fixed-size statics.
//! 4. A strong preference for safe code where reasonable; `unsafe` is
//!    confined to the HAL boundary and a handful of statics that interrupt
//!    context needs lock-free access to.

#![cfg_attr(target_os = "none", no_std)]

#[macro_use]
pub mod console;
#[macro_use]
pub mod arch;

pub mod err;
pub mod fail;
pub mod pmm;
pub mod sched;
pub mod startup;
pub mod syscalls;
pub mod task;
pub mod time;
pub mod trace;
