// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Architecture-specific support.
//!
//! This kernel only ever targets 32-bit x86, so unlike a portable kernel
//! there is no `cfg_if!` chain selecting between implementations — there is
//! exactly one, `x86`, always in scope. The module boundary is kept anyway
//! (rather than inlining its contents into this file) because it is where
//! every unsafe instruction in the kernel lives, and isolating that is worth
//! the extra `pub use`.
//!
//! Instructions that only make sense running on real x86 (`in`/`out`,
//! `lgdt`/`lidt`, `mov %cr3`) are gated on `cfg(target_arch = "x86")` deeper
//! in the `x86` module; the pure encode/decode helpers (descriptor byte
//! layout, stack-image priming) are not, so they remain exercisable by
//! `#[cfg(test)]` unit tests on the host.

#[macro_use]
pub mod x86;
pub use x86::*;
