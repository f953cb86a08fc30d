// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Pure-logic kernel algorithms that need no privileged instructions.
//!
//! Everything here compiles and runs under `std` so it can be exercised by
//! ordinary `cargo test` on the host: the frame-bitmap allocator and the
//! scheduler's priority summary bitmap. Code that actually touches hardware
//! (port I/O, CR3, `invlpg`, `int 0x80`) lives in `kern` instead.

// Allow std-y things to be used in test. Note that this attribute is a bit
// unusual: it's applying an inner attribute conditionally.
#![cfg_attr(not(test), no_std)]

pub mod pmm;
pub mod sched;
