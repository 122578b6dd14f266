// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel ABI definitions, shared between the kernel and processes.

#![cfg_attr(not(test), no_std)]

use serde::{Deserialize, Serialize};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Number of slots in the process table.
pub const NUM_PROCS: usize = 16;

/// Number of priority levels that processes can be queued at. The interrupt
/// level sits outside this range.
pub const NUM_PRIORITIES: usize = 5;

/// Size of every block handed out by the kernel's memory pool.
pub const BLOCK_SIZE: usize = 128;

/// Names a process. This is also the process's index in the process table.
#[derive(
    Copy,
    Clone,
    Debug,
    Eq,
    PartialEq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    FromBytes,
    IntoBytes,
    Immutable,
    KnownLayout,
)]
#[repr(transparent)]
pub struct Pid(pub u16);

impl Pid {
    /// The idle process, which runs when nothing else can.
    pub const NULL: Self = Self(0);
    /// Interrupt pseudo-process serving the periodic timer.
    pub const TIMER_IPROC: Self = Self(14);
    /// Interrupt pseudo-process serving the UART.
    pub const UART_IPROC: Self = Self(15);

    /// Converts a raw syscall argument into a `Pid`, if it could name a
    /// process table slot.
    pub fn from_raw(raw: u32) -> Option<Self> {
        if (raw as usize) < NUM_PROCS {
            Some(Self(raw as u16))
        } else {
            None
        }
    }

    pub fn index(self) -> usize {
        usize::from(self.0)
    }
}

/// Indicates priority of a process.
///
/// Numerically lower priorities are more important, so `HIGH` (0) is the most
/// likely to be scheduled.
///
/// Note that this type *deliberately* does not implement `PartialOrd`/`Ord`;
/// use `is_more_important_than` so nobody has to remember which way `<`
/// points.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Hash, Default, Serialize, Deserialize,
)]
#[repr(transparent)]
pub struct Priority(pub u8);

impl Priority {
    pub const HIGH: Self = Self(0);
    pub const MEDIUM: Self = Self(1);
    pub const LOW: Self = Self(2);
    pub const LOWEST: Self = Self(3);
    /// Reserved for the null process. Below every level user code can pick.
    pub const HIDDEN: Self = Self(4);
    /// Interrupt pseudo-processes. Never placed on a queue; the scheduler
    /// dispatches them from pending-interrupt flags.
    pub const INTERRUPT: Self = Self(5);

    /// Checks if `self` is strictly more important than `other`.
    pub fn is_more_important_than(self, other: Self) -> bool {
        self.0 < other.0
    }

    pub fn is_interrupt(self) -> bool {
        self == Self::INTERRUPT
    }

    /// Levels a process may be moved to with `SetPriority`.
    pub fn is_user_settable(self) -> bool {
        self.0 <= Self::LOWEST.0
    }

    /// Levels that can appear in a process descriptor.
    pub fn is_valid(self) -> bool {
        usize::from(self.0) < NUM_PRIORITIES || self.is_interrupt()
    }

    /// Queue bucket for this priority, if it is a queueable level.
    pub fn level(self) -> Option<usize> {
        let level = usize::from(self.0);
        if level < NUM_PRIORITIES {
            Some(level)
        } else {
            None
        }
    }

    pub fn from_raw(raw: u32) -> Option<Self> {
        u8::try_from(raw).ok().map(Self).filter(|p| p.is_valid())
    }
}

/// Scheduling state of a process.
///
/// Interrupt pseudo-processes pass through `New`, `Run` and `Ready` only.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Default, Serialize, Deserialize,
)]
pub enum ProcState {
    /// Never dispatched; its saved context is the synthesized initial frame.
    #[default]
    New,
    Ready,
    Run,
    BlockedOnMemory,
    BlockedOnMessage,
}

impl ProcState {
    pub fn is_blocked(self) -> bool {
        matches!(self, Self::BlockedOnMemory | Self::BlockedOnMessage)
    }
}

bitflags::bitflags! {
    #[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
    pub struct ProcFlags: u32 {
        /// System process: `SetPriority` refuses to touch it.
        const FIXED_PRIORITY = 1 << 0;
    }
}

/// Boot-time description of one process. The application hands the kernel
/// a table of these.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ProcessDesc {
    pub pid: Pid,
    pub priority: Priority,
    /// Stack size in bytes, not counting the initial register frame.
    pub stack_size: u32,
    /// Address of the process body. It must never return.
    pub entry_point: u32,
    pub flags: ProcFlags,
}

/// Kernel-managed prefix of every memory block.
///
/// A block is exactly one of: free (its first word links the free list), held
/// by a process, queued in a mailbox, or queued for delayed delivery. The
/// first word links whichever of those chains the block is on.
#[derive(
    Copy, Clone, Debug, Default, FromBytes, IntoBytes, Immutable, KnownLayout,
)]
#[repr(C)]
pub struct Envelope {
    pub link: u32,
    pub sender: Pid,
    pub receiver: Pid,
    pub custody: u32,
    /// Delivery deadline in ticks, low word first. Only meaningful while the
    /// block is in the delayed-delivery queue.
    pub expiry: [u32; 2],
}

pub const ENVELOPE_SIZE: usize = core::mem::size_of::<Envelope>();

/// Offset of the user-defined message type tag within a block.
pub const KIND_OFFSET: usize = ENVELOPE_SIZE;

/// Offset of the message text within a block.
pub const TEXT_OFFSET: usize = KIND_OFFSET + core::mem::size_of::<u32>();

/// Bytes of text a message can carry.
pub const TEXT_CAPACITY: usize = BLOCK_SIZE - TEXT_OFFSET;

static_assertions::const_assert_eq!(ENVELOPE_SIZE, 20);
static_assertions::const_assert!(TEXT_OFFSET < BLOCK_SIZE);
static_assertions::const_assert_eq!(BLOCK_SIZE % 8, 0);

/// Enumeration of syscall numbers.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u32)]
pub enum Sysnum {
    ReleaseProcessor = 0,
    GetPriority = 1,
    SetPriority = 2,
    RequestBlock = 3,
    TryRequestBlock = 4,
    ReleaseBlock = 5,
    Send = 6,
    DelayedSend = 7,
    Receive = 8,
    TryReceive = 9,
    ServiceTimer = 10,
    DumpQueues = 11,
}

impl core::convert::TryFrom<u32> for Sysnum {
    type Error = ();

    fn try_from(x: u32) -> Result<Self, Self::Error> {
        match x {
            0 => Ok(Self::ReleaseProcessor),
            1 => Ok(Self::GetPriority),
            2 => Ok(Self::SetPriority),
            3 => Ok(Self::RequestBlock),
            4 => Ok(Self::TryRequestBlock),
            5 => Ok(Self::ReleaseBlock),
            6 => Ok(Self::Send),
            7 => Ok(Self::DelayedSend),
            8 => Ok(Self::Receive),
            9 => Ok(Self::TryReceive),
            10 => Ok(Self::ServiceTimer),
            11 => Ok(Self::DumpQueues),
            _ => Err(()),
        }
    }
}

/// Response code for a successful syscall.
pub const OK: u32 = 0;

/// Response code telling the caller it was parked on a resource and should
/// reissue the same syscall now that it is running again.
pub const RETRY: u32 = 1;

/// A syscall made with bad arguments. Reported to the caller as a response
/// code; no kernel state changes.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum UsageError {
    /// A program used an undefined syscall number.
    BadSyscallNumber,
    /// The pid is out of range or names an unused slot.
    BadPid,
    /// The priority is not one the operation accepts.
    BadPriority,
    /// The process is an interrupt pseudo-process or a system process
    /// whose priority is fixed.
    PriorityLocked,
    /// The address does not name a block of the kernel pool.
    BadBlock,
    /// The block is not currently held by a process: it is free, or it is
    /// sitting in a mailbox or the delayed-delivery queue.
    BlockNotHeld,
    /// `ServiceTimer` was called by something other than the timer
    /// interrupt process.
    NotTimerProcess,
    /// `DumpQueues` was given an unknown queue selector.
    BadQueueKind,
}

impl UsageError {
    const ALL: [Self; 8] = [
        Self::BadSyscallNumber,
        Self::BadPid,
        Self::BadPriority,
        Self::PriorityLocked,
        Self::BadBlock,
        Self::BlockNotHeld,
        Self::NotTimerProcess,
        Self::BadQueueKind,
    ];

    /// Response code for this error. Codes start above `RETRY`.
    pub fn code(self) -> u32 {
        self as u32 + 2
    }

    pub fn from_code(code: u32) -> Option<Self> {
        let index = code.checked_sub(2)?;
        Self::ALL.get(index as usize).copied()
    }
}

impl From<UsageError> for u32 {
    fn from(e: UsageError) -> Self {
        e.code()
    }
}

/// Selects what `DumpQueues` logs.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u32)]
pub enum QueueKind {
    Ready = 0,
    BlockedOnMemory = 1,
    /// Not a queue in the kernel: processes in `BlockedOnMessage` are found
    /// by scanning the table.
    BlockedOnMessage = 2,
}

impl core::convert::TryFrom<u32> for QueueKind {
    type Error = UsageError;

    fn try_from(x: u32) -> Result<Self, Self::Error> {
        match x {
            0 => Ok(Self::Ready),
            1 => Ok(Self::BlockedOnMemory),
            2 => Ok(Self::BlockedOnMessage),
            _ => Err(UsageError::BadQueueKind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_codes_round_trip_and_skip_ok_and_retry() {
        for e in UsageError::ALL {
            assert!(e.code() > RETRY);
            assert_eq!(UsageError::from_code(e.code()), Some(e));
        }
        assert_eq!(UsageError::from_code(OK), None);
        assert_eq!(UsageError::from_code(RETRY), None);
        assert_eq!(UsageError::from_code(200), None);
    }

    #[test]
    fn priority_ordering_reads_the_right_way() {
        assert!(Priority::HIGH.is_more_important_than(Priority::MEDIUM));
        assert!(!Priority::LOW.is_more_important_than(Priority::LOW));
        assert!(Priority::LOWEST.is_user_settable());
        assert!(!Priority::HIDDEN.is_user_settable());
        assert_eq!(Priority::INTERRUPT.level(), None);
        assert_eq!(Priority::from_raw(6), None);
        assert_eq!(Priority::from_raw(5), Some(Priority::INTERRUPT));
    }

    #[test]
    fn pid_range_is_checked() {
        assert_eq!(Pid::from_raw(15), Some(Pid::UART_IPROC));
        assert_eq!(Pid::from_raw(NUM_PROCS as u32), None);
    }
}
