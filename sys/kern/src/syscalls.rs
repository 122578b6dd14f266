// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Architecture-independent syscall implementation.
//!
//! This builds on architecture-specific parts defined in the `arch::*` modules.
//!
//! # Syscall implementations
//!
//! Syscalls are implemented by functions with the signature:
//!
//! ```ignore
//! fn syscall(k: &mut Kernel<'_>, args: [u32; 3]) -> Result<u32, UserError>;
//! ```
//!
//! `args` are the caller's argument registers. On success the `u32` is the
//! value handed back to the caller. A common wrapper turns the result into
//! the caller's response code and value, which it sees when it next runs.
//! That may not be right away: the syscall may have dispatched someone else.

use core::convert::TryFrom;

use abi::{Pid, Priority, QueueKind, Sysnum, UsageError};

use crate::arch;
use crate::err::UserError;
use crate::kernel::Kernel;
use crate::startup::with_kernel;
use crate::task::ArchState;
use crate::time::Timestamp;

/// Entry point accessed by arch-specific syscall entry sequence.
///
/// Before calling this, the calling process's volatile state (e.g.
/// callee-save registers on ARM) must be stored safely into the `SavedState`
/// struct of its `Task`.
///
/// `nr` is the syscall number passed from user code.
#[no_mangle]
pub unsafe extern "C" fn syscall_entry(nr: u32) {
    let now = arch::now();
    with_kernel(|k| safe_syscall_entry(nr, k, now));
}

/// Factored out of `syscall_entry` to encapsulate the bits that don't need
/// unsafe.
pub fn safe_syscall_entry(nr: u32, k: &mut Kernel<'_>, now: Timestamp) {
    let Some(caller) = k.current() else {
        panic!("syscall before kernel start");
    };
    let args = match k.task(caller) {
        Some(task) => {
            let save = task.save();
            [save.arg0(), save.arg1(), save.arg2()]
        }
        None => panic!(),
    };

    let res = match Sysnum::try_from(nr) {
        Ok(Sysnum::ReleaseProcessor) => release_processor(k),
        Ok(Sysnum::GetPriority) => get_priority(k, args),
        Ok(Sysnum::SetPriority) => set_priority(k, args),
        Ok(Sysnum::RequestBlock) => request_block(k),
        Ok(Sysnum::TryRequestBlock) => Ok(try_request_block(k)),
        Ok(Sysnum::ReleaseBlock) => release_block(k, args),
        Ok(Sysnum::Send) => send(k, args),
        Ok(Sysnum::DelayedSend) => delayed_send(k, args, now),
        Ok(Sysnum::Receive) => receive(k),
        Ok(Sysnum::TryReceive) => try_receive(k),
        Ok(Sysnum::ServiceTimer) => service_timer(k, now),
        Ok(Sysnum::DumpQueues) => dump_queues(k, args),
        Err(()) => Err(UsageError::BadSyscallNumber.into()),
    };

    let (code, value) = match res {
        Ok(value) => (abi::OK, value),
        Err(UserError::Usage(e)) => (e.code(), 0),
        Err(UserError::WouldBlock) => (abi::RETRY, 0),
        Err(UserError::Fatal(e)) => {
            klog!("kernel failure in syscall {}: {:?}", nr, e);
            panic!("{:?}", e);
        }
    };
    if let Some(task) = k.task_mut(caller) {
        task.save_mut().set_response(code, value);
    }
}

fn pid_arg(raw: u32) -> Result<Pid, UsageError> {
    Pid::from_raw(raw).ok_or(UsageError::BadPid)
}

fn release_processor(k: &mut Kernel<'_>) -> Result<u32, UserError> {
    k.release_processor()?;
    Ok(0)
}

fn get_priority(k: &mut Kernel<'_>, args: [u32; 3]) -> Result<u32, UserError> {
    let priority = k.get_priority(pid_arg(args[0])?)?;
    Ok(u32::from(priority.0))
}

fn set_priority(k: &mut Kernel<'_>, args: [u32; 3]) -> Result<u32, UserError> {
    let pid = pid_arg(args[0])?;
    let priority = Priority::from_raw(args[1]).ok_or(UsageError::BadPriority)?;
    k.set_priority(pid, priority)?;
    Ok(0)
}

fn request_block(k: &mut Kernel<'_>) -> Result<u32, UserError> {
    let b = k.request_block()?;
    Ok(k.addr_of(b))
}

/// Zero means the pool is empty; no block lives at address zero.
fn try_request_block(k: &mut Kernel<'_>) -> u32 {
    match k.try_request_block() {
        Some(b) => k.addr_of(b),
        None => 0,
    }
}

fn release_block(k: &mut Kernel<'_>, args: [u32; 3]) -> Result<u32, UserError> {
    let b = k.block_at(args[0])?;
    k.release_block(b)?;
    Ok(0)
}

fn send(k: &mut Kernel<'_>, args: [u32; 3]) -> Result<u32, UserError> {
    let target = pid_arg(args[0])?;
    let b = k.block_at(args[1])?;
    k.send(target, b)?;
    Ok(0)
}

fn delayed_send(
    k: &mut Kernel<'_>,
    args: [u32; 3],
    now: Timestamp,
) -> Result<u32, UserError> {
    let target = pid_arg(args[0])?;
    let b = k.block_at(args[1])?;
    k.delayed_send(target, b, args[2], now)?;
    Ok(0)
}

/// The sender travels in the block's envelope, so only the address comes
/// back.
fn receive(k: &mut Kernel<'_>) -> Result<u32, UserError> {
    let (b, _sender) = k.receive()?;
    Ok(k.addr_of(b))
}

fn try_receive(k: &mut Kernel<'_>) -> Result<u32, UserError> {
    Ok(match k.try_receive()? {
        Some((b, _sender)) => k.addr_of(b),
        None => 0,
    })
}

fn service_timer(k: &mut Kernel<'_>, now: Timestamp) -> Result<u32, UserError> {
    k.service_timer(now)?;
    Ok(0)
}

fn dump_queues(k: &mut Kernel<'_>, args: [u32; 3]) -> Result<u32, UserError> {
    k.log_queue(QueueKind::try_from(args[0])?);
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::tests::{desc, system, Space};
    use abi::{ProcState, OK, RETRY};

    /// Issues syscall `nr` from the running process and returns what it will
    /// see when it resumes.
    fn call(k: &mut Kernel<'_>, nr: Sysnum, args: [u32; 3]) -> (u32, u32) {
        call_raw(k, nr as u32, args)
    }

    fn call_raw(k: &mut Kernel<'_>, nr: u32, args: [u32; 3]) -> (u32, u32) {
        let caller = k.current().unwrap();
        k.task_mut(caller).unwrap().save_mut().set_args(args);
        safe_syscall_entry(nr, k, arch::now());
        k.task(caller).unwrap().save().response()
    }

    fn code(e: UsageError) -> (u32, u32) {
        (e.code(), 0)
    }

    #[test]
    fn unknown_syscall_is_refused() {
        let mut space = Space::new(1);
        let mut k = space.boot(&system(&[Priority::LOW, Priority::LOW]));
        k.start().unwrap();
        assert_eq!(
            call_raw(&mut k, 99, [0; 3]),
            code(UsageError::BadSyscallNumber)
        );
        assert_eq!(k.current(), Some(Pid(1)));
    }

    #[test]
    fn priorities_through_registers() {
        let mut space = Space::new(1);
        let mut k = space.boot(&system(&[Priority::MEDIUM, Priority::LOW]));
        k.start().unwrap();
        assert_eq!(call(&mut k, Sysnum::GetPriority, [2, 0, 0]), (OK, 2));
        assert_eq!(
            call(&mut k, Sysnum::GetPriority, [99, 0, 0]),
            code(UsageError::BadPid)
        );
        assert_eq!(
            call(&mut k, Sysnum::SetPriority, [2, 7, 0]),
            code(UsageError::BadPriority)
        );
        assert_eq!(call(&mut k, Sysnum::SetPriority, [2, 3, 0]), (OK, 0));
        assert_eq!(k.get_priority(Pid(2)), Ok(Priority::LOWEST));
    }

    #[test]
    fn blocks_travel_as_addresses() {
        let mut space = Space::new(1);
        let mut k = space.boot(&system(&[Priority::LOW]));
        k.start().unwrap();

        let (status, addr) = call(&mut k, Sysnum::RequestBlock, [0; 3]);
        assert_eq!(status, OK);
        assert_eq!(call(&mut k, Sysnum::TryRequestBlock, [0; 3]), (OK, 0));
        assert_eq!(
            call(&mut k, Sysnum::ReleaseBlock, [addr.wrapping_add(8), 0, 0]),
            code(UsageError::BadBlock)
        );
        assert_eq!(call(&mut k, Sysnum::ReleaseBlock, [addr, 0, 0]), (OK, 0));
        assert_eq!(call(&mut k, Sysnum::TryRequestBlock, [0; 3]), (OK, addr));
    }

    #[test]
    fn blocked_receive_asks_for_a_retry() {
        let mut space = Space::new(2);
        let mut k = space.boot(&system(&[Priority::HIGH, Priority::LOW]));
        k.start().unwrap();
        assert_eq!(call(&mut k, Sysnum::TryReceive, [0; 3]), (OK, 0));
        assert_eq!(call(&mut k, Sysnum::Receive, [0; 3]), (RETRY, 0));
        assert_eq!(k.task(Pid(1)).unwrap().state(), ProcState::BlockedOnMessage);
        assert_eq!(k.current(), Some(Pid(2)));

        let (_, addr) = call(&mut k, Sysnum::RequestBlock, [0; 3]);
        assert_eq!(call(&mut k, Sysnum::Send, [1, addr, 0]), (OK, 0));
        assert_eq!(k.current(), Some(Pid(1)));

        // The reissued call succeeds, and the sender is in the envelope.
        assert_eq!(call(&mut k, Sysnum::Receive, [0; 3]), (OK, addr));
        let b = k.block_at(addr).unwrap();
        assert_eq!(k.pool().envelope(b).sender, Pid(2));
    }

    #[test]
    fn delayed_send_uses_the_clock() {
        let mut descs = system(&[Priority::LOW]);
        descs.push(desc(14, Priority::INTERRUPT));
        let mut space = Space::new(1);
        let mut k = space.boot(&descs);
        k.start().unwrap();
        arch::advance_ticks(1000);
        let (_, addr) = call(&mut k, Sysnum::RequestBlock, [0; 3]);
        assert_eq!(call(&mut k, Sysnum::DelayedSend, [1, addr, 50]), (OK, 0));
        assert_eq!(
            k.delayed().peek_expiry(k.pool()),
            Some(Timestamp::from(u64::from(arch::now()) + 50))
        );
        assert_eq!(
            call(&mut k, Sysnum::ServiceTimer, [0; 3]),
            code(UsageError::NotTimerProcess)
        );
    }

    #[test]
    fn queue_dump_checks_its_selector() {
        let mut space = Space::new(0);
        let mut k = space.boot(&system(&[Priority::LOW]));
        k.start().unwrap();
        assert_eq!(call(&mut k, Sysnum::DumpQueues, [1, 0, 0]), (OK, 0));
        assert_eq!(
            call(&mut k, Sysnum::DumpQueues, [3, 0, 0]),
            code(UsageError::BadQueueKind)
        );
    }

    #[test]
    fn yield_through_syscall() {
        let mut space = Space::new(0);
        let mut k = space.boot(&system(&[Priority::LOW, Priority::LOW]));
        k.start().unwrap();
        assert_eq!(call(&mut k, Sysnum::ReleaseProcessor, [0; 3]), (OK, 0));
        assert_eq!(k.current(), Some(Pid(2)));
    }
}
