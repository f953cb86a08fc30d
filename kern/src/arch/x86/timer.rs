// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! PIT (8253/8254) programming and TSC-based timekeeping.
//!
//! `original_source/arch/x86/timer.c` is an empty stub, so the calibration
//! sequence below is built directly from the design prose: program the PIT
//! to the requested frequency, then calibrate the TSC against it by
//! latching the PIT's count, busy-waiting a known number of PIT ticks, and
//! dividing the elapsed TSC delta by the elapsed wall time.

use super::port::{inb, outb};

const PIT_CHANNEL0: u16 = 0x40;
const PIT_COMMAND: u16 = 0x43;
const PIT_FREQUENCY_HZ: u32 = 1_193_182;

/// Mode 3 (square wave), channel 0, access mode lo/hi byte, binary mode.
const PIT_COMMAND_CH0_MODE3: u8 = 0b0011_0110;

static TSC_FREQ_HZ: core::sync::atomic::AtomicU64 = core::sync::atomic::AtomicU64::new(0);
static TICKS: core::sync::atomic::AtomicU64 = core::sync::atomic::AtomicU64::new(0);

/// Programs the PIT to fire at `frequency_hz`, then calibrates the TSC
/// against it. `frequency_hz` must divide evenly enough into
/// [`PIT_FREQUENCY_HZ`] that the resulting divisor fits in 16 bits (true
/// for any frequency from roughly 19 Hz up).
///
/// # Safety
/// Touches PIT I/O ports; must run once, during single-threaded boot.
#[cfg(target_arch = "x86")]
pub unsafe fn init(frequency_hz: u32) {
    let divisor = (PIT_FREQUENCY_HZ / frequency_hz) as u16;
    outb(PIT_COMMAND, PIT_COMMAND_CH0_MODE3);
    outb(PIT_CHANNEL0, (divisor & 0xFF) as u8);
    outb(PIT_CHANNEL0, (divisor >> 8) as u8);

    calibrate_tsc(frequency_hz);
}

/// Busy-waits 1/10th of a second of PIT ticks (tracked via [`on_tick`],
/// which must already be wired to the timer IRQ by this point) while
/// sampling the TSC before and after, then scales the delta up to a full
/// second.
#[cfg(target_arch = "x86")]
unsafe fn calibrate_tsc(frequency_hz: u32) {
    let sample_ticks = (frequency_hz / 10).max(1) as u64;
    let start_ticks = TICKS.load(core::sync::atomic::Ordering::Relaxed);
    let start_tsc = read_tsc();
    while TICKS.load(core::sync::atomic::Ordering::Relaxed) < start_ticks + sample_ticks {
        core::arch::asm!("pause", options(nomem, nostack));
    }
    let end_tsc = read_tsc();
    let elapsed_tsc = end_tsc.saturating_sub(start_tsc);
    TSC_FREQ_HZ.store(elapsed_tsc * 10, core::sync::atomic::Ordering::Relaxed);
}

#[cfg(target_arch = "x86")]
pub fn read_tsc() -> u64 {
    let low: u32;
    let high: u32;
    unsafe {
        core::arch::asm!("rdtsc", out("eax") low, out("edx") high, options(nomem, nostack));
    }
    (u64::from(high) << 32) | u64::from(low)
}

/// Called from the timer ISR (IRQ0) once per tick.
pub fn on_tick() {
    TICKS.fetch_add(1, core::sync::atomic::Ordering::Relaxed);
}

/// Ticks elapsed since boot, at whatever frequency [`init`] was given.
pub fn ticks() -> u64 {
    TICKS.load(core::sync::atomic::Ordering::Relaxed)
}

/// Microseconds elapsed since boot, derived from the calibrated TSC
/// frequency. Returns 0 if calibration hasn't run yet.
#[cfg(target_arch = "x86")]
pub fn read_us() -> u64 {
    let freq = TSC_FREQ_HZ.load(core::sync::atomic::Ordering::Relaxed);
    if freq == 0 {
        return 0;
    }
    read_tsc() * 1_000_000 / freq
}

pub fn tsc_freq_hz() -> u64 {
    TSC_FREQ_HZ.load(core::sync::atomic::Ordering::Relaxed)
}

/// The timer IRQ (vector `IRQ_BASE`, IRQ0) handler, registered by
/// `kern::startup`. Charges the scheduling quantum and flags a
/// reschedule; never switches tasks itself, matching the
/// `need_resched`-is-only-set-here-and-only-consumed-at-the-common-return
/// discipline.
pub fn isr(_frame: &mut super::idt::InterruptFrame) {
    crate::trace::event_timer_isr_enter();
    on_tick();
    crate::sched::scheduler().tick();
    crate::trace::event_timer_isr_exit();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pit_divisor_for_1khz_matches_the_known_constant() {
        let divisor = PIT_FREQUENCY_HZ / 1000;
        assert_eq!(divisor, 1193);
    }

    #[test]
    fn on_tick_is_monotonic() {
        let before = ticks();
        on_tick();
        assert_eq!(ticks(), before + 1);
    }
}
