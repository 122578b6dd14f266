// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Common error-handling support.
//!
//! Kernel operations return `Result` and leave the decision of what to do
//! with a failure to the entry point that called them. The syscall layer
//! turns `UserError` into a response code in one place.

use abi::{Pid, ProcState, UsageError};

/// A broken kernel invariant. There is no recovering from these; entry
/// points log them and panic.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum KernelError {
    /// The scheduler found nothing to run. The null process is always ready,
    /// so this means the process table was never set up.
    NoRunnableProcess,
    /// The scheduler picked a process that is neither `New` nor ready to
    /// resume.
    BadDispatchState { pid: Pid, state: ProcState },
}

/// Outcome of a syscall that did not succeed.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum UserError {
    /// Bad arguments. Nothing changed; the caller gets an error code.
    Usage(UsageError),
    /// The caller has been parked waiting for a resource, and another process
    /// has been dispatched. When the caller runs again it must reissue the
    /// call.
    WouldBlock,
    /// Something is badly wrong in the kernel.
    Fatal(KernelError),
}

impl From<UsageError> for UserError {
    fn from(e: UsageError) -> Self {
        Self::Usage(e)
    }
}

impl From<KernelError> for UserError {
    fn from(e: KernelError) -> Self {
        Self::Fatal(e)
    }
}

/// A process descriptor the kernel can't boot with.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BootError {
    PidOutOfRange(Pid),
    DuplicatePid(Pid),
    BadPriority(Pid),
    /// Interrupt priority on an ordinary pid, or an interrupt pid without
    /// interrupt priority.
    MisplacedInterrupt(Pid),
    /// The stack region has no room left for this process.
    OutOfStack(Pid),
}
