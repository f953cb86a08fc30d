// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Wire-level ABI shared between the kernel and anything running in ring 3.
//!
//! Everything here is a plain value type: syscall numbers, the error
//! taxonomy returned by the INT 0x80 gate, segment selectors, and the
//! fixed userspace memory layout. No IPC, no leases, no capabilities.

#![no_std]

/// Page size assumed everywhere in this system (x86 4 KiB pages).
pub const PAGE_SIZE: usize = 4096;

/// GDT selectors (byte values), fixed per spec.
pub mod selector {
    pub const KERNEL_CODE: u16 = 0x08;
    pub const KERNEL_DATA: u16 = 0x10;
    pub const USER_CODE: u16 = 0x1B;
    pub const USER_DATA: u16 = 0x23;
    pub const TSS: u16 = 0x28;
}

/// Fixed userspace virtual memory layout.
pub mod user_layout {
    /// Base of the 4 MiB user code/data window.
    pub const CODE_BASE: u32 = 0x0040_0000;
    /// Size of the user code window.
    pub const CODE_SIZE: u32 = 0x0040_0000;
    /// Top of the user stack (grows down).
    pub const STACK_TOP: u32 = 0xC000_0000;
    /// User stack size; only one page is mapped.
    pub const STACK_SIZE: u32 = 0x0000_1000;
    /// EFLAGS value a user task starts with: IF set, reserved bit 1 set.
    pub const EFLAGS: u32 = 0x202;
}

/// Interrupt vector map.
pub mod vector {
    /// First vector used for PIC-remapped IRQs (IRQ0 == PIT).
    pub const IRQ_BASE: u8 = 32;
    /// Last vector used for PIC-remapped IRQs.
    pub const IRQ_LAST: u8 = 47;
    /// The syscall gate vector.
    pub const SYSCALL: u8 = 0x80;
    /// Number of CPU exception vectors (0..32).
    pub const EXCEPTION_COUNT: u8 = 32;
}

/// Multiboot-1 contract constants (see spec §6).
pub mod multiboot {
    pub const MAGIC: u32 = 0x2BAD_B002;
    pub const FLAG_MMAP: u32 = 1 << 6;

    pub const MEMORY_AVAILABLE: u32 = 1;
    pub const MEMORY_RESERVED: u32 = 2;
    pub const MEMORY_ACPI_RECLAIMABLE: u32 = 3;
    pub const MEMORY_NVS: u32 = 4;
    pub const MEMORY_BADRAM: u32 = 5;
}

/// Scheduler priority constants.
pub mod priority {
    pub const LEVELS: usize = 256;
    pub const IDLE: u8 = 0;
    pub const DEFAULT: u8 = 128;
}

/// Syscall numbers. Index 0 is reserved/invalid; numbers start at 1.
///
/// Mirrors the register convention: EAX carries the number, EBX/ECX/EDX/
/// ESI/EDI carry up to five arguments, EAX carries the return value.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u32)]
pub enum Sysnum {
    Exit = 1,
    Yield = 2,
    GetPid = 3,
    SleepUs = 4,
}

/// Highest syscall number currently defined. The dispatch table is sized
/// to accommodate growth without every slot being meaningful.
pub const MAX_SYSCALLS: usize = 256;

impl core::convert::TryFrom<u32> for Sysnum {
    type Error = ();

    fn try_from(x: u32) -> Result<Self, Self::Error> {
        match x {
            1 => Ok(Self::Exit),
            2 => Ok(Self::Yield),
            3 => Ok(Self::GetPid),
            4 => Ok(Self::SleepUs),
            _ => Err(()),
        }
    }
}

/// The small, numeric, syscall-surface error taxonomy from spec §7.
///
/// Every variant lowers to a negative `i32` at the INT 0x80 boundary via
/// [`SyscallError::code`]. `InternalCorruption` is listed for completeness
/// of the taxonomy but is never actually returned across the boundary: by
/// spec it is fatal and becomes a panic before a return value is produced.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SyscallError {
    NotImplemented,
    InvalidArgument,
    NoSuchDevice,
    ResourceExhausted,
    Busy,
    InternalCorruption,
}

impl SyscallError {
    /// Numeric code returned (negated) in EAX.
    pub const fn code(self) -> i32 {
        match self {
            // Matches the historical ENOSYS value used by the reference
            // implementation's syscall table.
            Self::NotImplemented => 38,
            Self::InvalidArgument => 22,
            Self::NoSuchDevice => 19,
            Self::ResourceExhausted => 12,
            Self::Busy => 16,
            Self::InternalCorruption => 5,
        }
    }

    /// The value placed in EAX for this error: `-code`.
    pub const fn to_eax(self) -> i32 {
        -self.code()
    }
}

/// Task identity. Index 0 is reserved for the idle task; the bootstrap
/// context (code running before the scheduler takes over) uses the
/// sentinel [`TaskId::BOOTSTRAP`] and is never scheduled again.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TaskId(pub u32);

impl TaskId {
    pub const IDLE: Self = Self(0);
    pub const BOOTSTRAP: Self = Self(0xFFFF_FFFF);
}

bitflags::bitflags! {
    /// Architecture-independent page mapping flags (spec §4.5).
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct PageFlags: u32 {
        const PRESENT  = 1 << 0;
        const WRITABLE = 1 << 1;
        const USER     = 1 << 2;
        const NOCACHE  = 1 << 3;
        const EXEC     = 1 << 4;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::convert::TryFrom;

    #[test]
    fn sysnum_round_trips_known_numbers() {
        assert_eq!(Sysnum::try_from(1), Ok(Sysnum::Exit));
        assert_eq!(Sysnum::try_from(2), Ok(Sysnum::Yield));
        assert_eq!(Sysnum::try_from(3), Ok(Sysnum::GetPid));
        assert_eq!(Sysnum::try_from(4), Ok(Sysnum::SleepUs));
    }

    #[test]
    fn sysnum_rejects_zero_and_out_of_range() {
        assert_eq!(Sysnum::try_from(0), Err(()));
        assert_eq!(Sysnum::try_from(999), Err(()));
    }

    #[test]
    fn not_implemented_matches_reference_enosys_value() {
        assert_eq!(SyscallError::NotImplemented.code(), 38);
        assert_eq!(SyscallError::NotImplemented.to_eax(), -38);
    }

    #[test]
    fn selectors_have_expected_rpl_bits() {
        assert_eq!(selector::USER_CODE & 0b11, 3);
        assert_eq!(selector::USER_DATA & 0b11, 3);
        assert_eq!(selector::KERNEL_CODE & 0b11, 0);
        assert_eq!(selector::KERNEL_DATA & 0b11, 0);
    }
}
