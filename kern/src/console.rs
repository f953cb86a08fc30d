// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The console boundary: the kernel exposes a single `putchar` sink and
//! consumes nothing else about how text reaches a screen or a serial line.
//! The actual VGA text-mode or UART driver is board-level code (the `boot`
//! crate), supplied here the same way the HAL's `EventsTable` hook was
//! supplied in the teacher -- a function pointer configured once at
//! startup, called from then on with no further indirection per byte.

use core::fmt::{self, Write};
use core::sync::atomic::{AtomicPtr, Ordering};

type PutcharFn = fn(u8);

static PUTCHAR: AtomicPtr<()> = AtomicPtr::new(core::ptr::null_mut());

/// Supplies the character sink. Called once, early in `kern::startup`,
/// before the first `klog!` or panic can fire.
pub fn set_putchar(f: PutcharFn) {
    PUTCHAR.store(f as *mut (), Ordering::Relaxed);
}

fn putchar_fn() -> Option<PutcharFn> {
    let p = PUTCHAR.load(Ordering::Relaxed);
    if p.is_null() {
        None
    } else {
        // Safety: the only value ever stored is a `PutcharFn` cast through
        // `set_putchar`.
        Some(unsafe { core::mem::transmute::<*mut (), PutcharFn>(p) })
    }
}

/// Writes one byte to the console sink. A no-op before `set_putchar` has
/// run (e.g. a panic during very early boot) rather than a fault.
pub fn putchar(c: u8) {
    if let Some(f) = putchar_fn() {
        f(c);
    }
}

pub fn puts(s: &str) {
    for &b in s.as_bytes() {
        putchar(b);
    }
}

pub struct Writer;

impl Write for Writer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        puts(s);
        Ok(())
    }
}

/// Formats through the console sink. Never allocates, never touches the
/// syscall dispatch hot path -- `kern::syscalls::dispatch` must not call
/// this, since a reentrant console write from IRQ context could interleave
/// with one already in progress.
#[macro_export]
macro_rules! klog {
    ($($arg:tt)*) => {{
        use core::fmt::Write;
        let _ = write!($crate::console::Writer, $($arg)*);
        $crate::console::puts("\n");
    }};
}
