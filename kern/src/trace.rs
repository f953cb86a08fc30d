// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The per-CPU trace buffer: a fixed-capacity ring of diagnostic events
//! (interrupt, schedule, task switch, syscall) for post-mortem debugging.
//! Never consulted by kernel control flow itself -- recording an event must
//! never change what the scheduler or a syscall handler does next.
//!
//! Grounded on `original_source/include/kernel/percpu.h`'s `per_cpu_data`,
//! which carries a `trace_buffer` (fixed capacity, head/tail indices, an
//! overflow counter) alongside free-running interrupts-handled and
//! context-switch counters. There is exactly one CPU here, so there is
//! exactly one buffer, held in a single static rather than a per-CPU array.
//!
//! The teacher's `profiling.rs` instead exposes a board-supplied
//! `EventsTable` of function-pointer hooks (typically wired to GPIO
//! toggles for an external logic analyzer) and stores nothing in the
//! kernel itself. This kernel has no such board-level escape hatch, so the
//! event points record directly into an in-memory ring instead of
//! forwarding to a caller-supplied table.

const CAPACITY: usize = 64;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EventKind {
    IsrEnter,
    IsrExit,
    TimerIsrEnter,
    TimerIsrExit,
    SyscallEnter,
    SyscallExit,
    ContextSwitch,
}

#[derive(Copy, Clone, Debug)]
pub struct Event {
    pub timestamp_us: u64,
    pub kind: EventKind,
    pub payload: [u64; 4],
}

pub struct Stats {
    pub len: usize,
    pub overflow: u64,
    pub interrupts_handled: u64,
    pub context_switches: u64,
}

struct TraceBuffer {
    events: [Option<Event>; CAPACITY],
    head: usize,
    len: usize,
    overflow: u64,
    interrupts_handled: u64,
    context_switches: u64,
}

impl TraceBuffer {
    const fn new() -> Self {
        const NONE: Option<Event> = None;
        TraceBuffer {
            events: [NONE; CAPACITY],
            head: 0,
            len: 0,
            overflow: 0,
            interrupts_handled: 0,
            context_switches: 0,
        }
    }

    /// Appends an event, or -- if the ring is already full -- drops it and
    /// saturates the overflow counter. A full buffer never panics and
    /// never overwrites older events: whoever is inspecting the trace
    /// after the fact wants the oldest context, not the newest churn.
    fn record(&mut self, kind: EventKind, payload: [u64; 4]) {
        let timestamp_us = crate::arch::timer::read_us();
        if self.len == CAPACITY {
            self.overflow = self.overflow.saturating_add(1);
            return;
        }
        let slot = (self.head + self.len) % CAPACITY;
        self.events[slot] = Some(Event { timestamp_us, kind, payload });
        self.len += 1;
    }

    fn stats(&self) -> Stats {
        Stats {
            len: self.len,
            overflow: self.overflow,
            interrupts_handled: self.interrupts_handled,
            context_switches: self.context_switches,
        }
    }

    fn drain_into(&mut self, out: &mut [Event]) -> usize {
        let n = self.len.min(out.len());
        for i in 0..n {
            out[i] = self.events[(self.head + i) % CAPACITY].unwrap();
        }
        self.head = (self.head + n) % CAPACITY;
        self.len -= n;
        n
    }
}

static mut TRACE: TraceBuffer = TraceBuffer::new();

pub fn event_isr_enter(vector: u32) {
    unsafe {
        TRACE.interrupts_handled += 1;
        TRACE.record(EventKind::IsrEnter, [vector as u64, 0, 0, 0]);
    }
}

pub fn event_isr_exit() {
    unsafe { TRACE.record(EventKind::IsrExit, [0; 4]) };
}

pub fn event_timer_isr_enter() {
    unsafe {
        TRACE.interrupts_handled += 1;
        TRACE.record(EventKind::TimerIsrEnter, [0; 4]);
    }
}

pub fn event_timer_isr_exit() {
    unsafe { TRACE.record(EventKind::TimerIsrExit, [0; 4]) };
}

pub fn event_syscall_enter(nr: u32) {
    unsafe { TRACE.record(EventKind::SyscallEnter, [nr as u64, 0, 0, 0]) };
}

pub fn event_syscall_exit() {
    unsafe { TRACE.record(EventKind::SyscallExit, [0; 4]) };
}

pub fn event_context_switch(task_index: usize) {
    unsafe {
        TRACE.context_switches += 1;
        TRACE.record(EventKind::ContextSwitch, [task_index as u64, 0, 0, 0]);
    }
}

pub fn stats() -> Stats {
    unsafe { TRACE.stats() }
}

/// Copies up to `out.len()` of the oldest pending events into `out` and
/// removes them from the ring, returning how many were copied. Intended
/// for a future diagnostic syscall or console dump; nothing in the kernel
/// itself reads the trace back.
pub fn drain(out: &mut [Event]) -> usize {
    unsafe { TRACE.drain_into(out) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reset() {
        unsafe { TRACE = TraceBuffer::new() };
    }

    #[test]
    fn fresh_buffer_is_empty() {
        reset();
        let s = stats();
        assert_eq!(s.len, 0);
        assert_eq!(s.overflow, 0);
    }

    #[test]
    fn recording_increments_length() {
        reset();
        event_syscall_enter(1);
        event_syscall_exit();
        assert_eq!(stats().len, 2);
    }

    #[test]
    fn filling_past_capacity_saturates_overflow_without_panicking() {
        reset();
        for i in 0..(CAPACITY + 10) {
            event_syscall_enter(i as u32);
        }
        let s = stats();
        assert_eq!(s.len, CAPACITY);
        assert_eq!(s.overflow, 10);
    }

    #[test]
    fn drain_removes_oldest_first_and_frees_room() {
        reset();
        event_syscall_enter(42);
        event_syscall_exit();
        let mut buf = [Event { timestamp_us: 0, kind: EventKind::SyscallEnter, payload: [0; 4] }; 1];
        let n = drain(&mut buf);
        assert_eq!(n, 1);
        assert_eq!(buf[0].kind, EventKind::SyscallEnter);
        assert_eq!(buf[0].payload[0], 42);
        assert_eq!(stats().len, 1);
    }

    #[test]
    fn isr_and_context_switch_counters_track_independently() {
        reset();
        event_isr_enter(32);
        event_isr_exit();
        event_timer_isr_enter();
        event_timer_isr_exit();
        event_context_switch(3);
        let s = stats();
        assert_eq!(s.interrupts_handled, 2);
        assert_eq!(s.context_switches, 1);
    }
}
