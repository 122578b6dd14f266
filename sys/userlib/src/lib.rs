// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! User process support library for RTX.
//!
//! This contains the syscall stub and wrappers, the `Message` handle for
//! blocks obtained from the kernel, and re-exports the contents of the `abi`
//! crate that gets shared with the kernel.
//!
//! # Syscall stub
//!
//! Every syscall goes through one stub, `sys_call_stub`. The kernel takes the
//! syscall number in r11 and up to three arguments in r4-r6, and answers with
//! a response code in r4 and a value in r5. Those are callee-save registers
//! in the C ABI, which `asm!` won't let us name as operands freely, so the
//! stub is a naked function that takes its inputs in r0-r3, shuffles them
//! into place, and restores everything it touched.
//!
//! # Blocking calls
//!
//! When a call can't complete (no free block, empty mailbox) the kernel parks
//! the caller and answers `RETRY` once it is dispatched again. The wrappers
//! for those calls reissue the syscall until it produces something else.
//!
//! On anything other than a bare-metal target, the stub is replaced by the
//! fake kernel in the `fake` module, so code built on these wrappers can be
//! tested on a workstation.

#![cfg_attr(target_os = "none", no_std)]

#[macro_use]
pub mod macros;

#[cfg(not(target_os = "none"))]
pub mod fake;

pub use abi::*;

use byteorder::{ByteOrder, NativeEndian};
use zerocopy::FromBytes;

/// A syscall that the kernel refused.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RtxError {
    /// Bad arguments. Nothing changed in the kernel.
    Usage(UsageError),
    /// A response code this library doesn't know. Indicates a mismatch
    /// between the kernel and userlib versions.
    BadResponse(u32),
}

impl From<UsageError> for RtxError {
    fn from(e: UsageError) -> Self {
        Self::Usage(e)
    }
}

/// Return type for the stub, because the layout of tuples is not specified in
/// the C ABI, and we're using the C ABI to interface to assembler.
///
/// Register-return of structs is also not guaranteed by the C ABI, so we
/// represent the pair of returned registers with something that *can* get
/// passed back in registers: a `u64`, response code in the low half.
#[cfg(target_os = "none")]
#[repr(transparent)]
struct CodeValue(u64);

#[cfg(target_os = "none")]
impl From<CodeValue> for (u32, u32) {
    fn from(s: CodeValue) -> Self {
        (s.0 as u32, (s.0 >> 32) as u32)
    }
}

cfg_if::cfg_if! {
    if #[cfg(armv6m)] {
        /// Core implementation of every syscall.
        ///
        /// See the note on the syscall stub at the top of this module.
        #[unsafe(naked)]
        unsafe extern "C" fn sys_call_stub(
            _nr: u32,
            _arg0: u32,
            _arg1: u32,
            _arg2: u32,
        ) -> CodeValue {
            core::arch::naked_asm!("
                @ Spill the registers we're about to use to pass stuff.
                push {{r4-r7, lr}}
                mov r4, r11
                push {{r4}}
                @ Move the syscall number and arguments into place.
                mov r11, r0
                mov r4, r1
                mov r5, r2
                mov r6, r3

                @ To the kernel!
                svc #0

                @ Move the two results back into their return positions.
                mov r0, r4
                mov r1, r5
                @ Restore the registers we used.
                pop {{r4}}
                mov r11, r4
                pop {{r4-r7, pc}}
                ",
            )
        }
    } else if #[cfg(any(armv7m, armv8m))] {
        /// Core implementation of every syscall.
        ///
        /// See the note on the syscall stub at the top of this module.
        #[unsafe(naked)]
        unsafe extern "C" fn sys_call_stub(
            _nr: u32,
            _arg0: u32,
            _arg1: u32,
            _arg2: u32,
        ) -> CodeValue {
            core::arch::naked_asm!("
                @ Spill the registers we're about to use to pass stuff.
                push {{r4-r7, r11, lr}}
                @ Move the syscall number and arguments into place.
                mov r11, r0
                mov r4, r1
                mov r5, r2
                mov r6, r3

                @ To the kernel!
                svc #0

                @ Move the two results back into their return positions.
                mov r0, r4
                mov r1, r5
                @ Restore the registers we used.
                pop {{r4-r7, r11, lr}}
                @ Fin.
                bx lr
                ",
            )
        }
    } else if #[cfg(target_os = "none")] {
        compile_error!("missing sys_call_stub for ARM profile");
    }
}

/// Issues syscall `nr` once, returning the raw response code and value.
#[cfg(target_os = "none")]
#[inline(always)]
fn sys_call(nr: Sysnum, args: [u32; 3]) -> (u32, u32) {
    // Safety: the stub preserves every register the C ABI asks it to, and
    // the kernel only writes r4 and r5, which the stub restores.
    unsafe { sys_call_stub(nr as u32, args[0], args[1], args[2]).into() }
}

#[cfg(not(target_os = "none"))]
fn sys_call(nr: Sysnum, args: [u32; 3]) -> (u32, u32) {
    fake::call(nr, args)
}

/// Issues syscall `nr` until the kernel stops asking for a retry.
fn retrying(nr: Sysnum, args: [u32; 3]) -> (u32, u32) {
    loop {
        let (code, value) = sys_call(nr, args);
        if code != RETRY {
            return (code, value);
        }
    }
}

/// Turns a response into the value on success or the error it encodes.
fn check(code: u32, value: u32) -> Result<u32, RtxError> {
    match code {
        OK => Ok(value),
        code => Err(UsageError::from_code(code)
            .map_or(RtxError::BadResponse(code), RtxError::Usage)),
    }
}

/// Address-to-pointer conversion for blocks handed out by the kernel.
#[cfg(target_os = "none")]
fn block_ptr(addr: u32) -> *mut u8 {
    addr as usize as *mut u8
}

#[cfg(not(target_os = "none"))]
fn block_ptr(addr: u32) -> *mut u8 {
    fake::block_ptr(addr)
}

/// A memory block held by this process.
///
/// The kernel hands a block over on `sys_request_block` or on receipt, and
/// takes it back on send or release. While a `Message` exists its block
/// belongs to this process alone, which is why it is neither `Copy` nor
/// `Clone`.
#[derive(Debug, Eq, PartialEq)]
pub struct Message {
    addr: u32,
}

impl Message {
    fn from_addr(addr: u32) -> Self {
        Self { addr }
    }

    /// The block's address, which is how the kernel names it.
    pub fn addr(&self) -> u32 {
        self.addr
    }

    fn bytes(&self) -> &[u8] {
        // Safety: the kernel handed us this block, it is BLOCK_SIZE bytes,
        // and we hold it until this `Message` is consumed.
        unsafe { core::slice::from_raw_parts(block_ptr(self.addr), BLOCK_SIZE) }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        // Safety: as in `bytes`, and `&mut self` makes this the only view.
        unsafe {
            core::slice::from_raw_parts_mut(block_ptr(self.addr), BLOCK_SIZE)
        }
    }

    fn envelope(&self) -> Envelope {
        match Envelope::read_from_prefix(self.bytes()) {
            Ok((envelope, _)) => envelope,
            // BLOCK_SIZE covers the envelope, checked in abi.
            Err(_) => panic!(),
        }
    }

    /// Who sent this message. Only meaningful for a received message.
    pub fn sender(&self) -> Pid {
        self.envelope().sender
    }

    /// Who this message was addressed to. Only meaningful for a received
    /// message.
    pub fn receiver(&self) -> Pid {
        self.envelope().receiver
    }

    /// Application-defined message type tag.
    pub fn kind(&self) -> u32 {
        NativeEndian::read_u32(&self.bytes()[KIND_OFFSET..])
    }

    pub fn set_kind(&mut self, kind: u32) {
        NativeEndian::write_u32(&mut self.bytes_mut()[KIND_OFFSET..], kind);
    }

    pub fn text(&self) -> &[u8] {
        &self.bytes()[TEXT_OFFSET..]
    }

    pub fn text_mut(&mut self) -> &mut [u8] {
        &mut self.bytes_mut()[TEXT_OFFSET..]
    }

    /// Copies as much of `text` as fits into the message body and returns
    /// how many bytes that was.
    pub fn set_text(&mut self, text: &[u8]) -> usize {
        let n = text.len().min(TEXT_CAPACITY);
        self.text_mut()[..n].copy_from_slice(&text[..n]);
        n
    }
}

/// Gives up the processor. The caller may be picked again straight away if
/// nothing more important is ready.
pub fn sys_release_processor() {
    // Never refused.
    let _ = sys_call(Sysnum::ReleaseProcessor, [0; 3]);
}

pub fn sys_get_priority(pid: Pid) -> Result<Priority, RtxError> {
    let raw = check_call(Sysnum::GetPriority, [u32::from(pid.0), 0, 0])?;
    Priority::from_raw(raw).ok_or(RtxError::BadResponse(raw))
}

/// Moves `pid` (which may be the caller) to `priority`. Interrupt processes
/// and processes with `FIXED_PRIORITY` can't be moved.
pub fn sys_set_priority(pid: Pid, priority: Priority) -> Result<(), RtxError> {
    check_call(
        Sysnum::SetPriority,
        [u32::from(pid.0), u32::from(priority.0), 0],
    )?;
    Ok(())
}

fn check_call(nr: Sysnum, args: [u32; 3]) -> Result<u32, RtxError> {
    let (code, value) = sys_call(nr, args);
    check(code, value)
}

/// Takes a block from the kernel pool, waiting for one to be released if the
/// pool is empty.
///
/// Interrupt processes must use `sys_try_request_block` instead.
pub fn sys_request_block() -> Message {
    let (code, value) = retrying(Sysnum::RequestBlock, [0; 3]);
    match check(code, value) {
        Ok(addr) => Message::from_addr(addr),
        Err(e) => panic!("RequestBlock refused: {:?}", e),
    }
}

/// Takes a block from the kernel pool if one is free.
pub fn sys_try_request_block() -> Option<Message> {
    match check_call(Sysnum::TryRequestBlock, [0; 3]) {
        Ok(0) => None,
        Ok(addr) => Some(Message::from_addr(addr)),
        Err(e) => panic!("TryRequestBlock refused: {:?}", e),
    }
}

/// Returns a block to the kernel pool.
pub fn sys_release_block(msg: Message) -> Result<(), RtxError> {
    check_call(Sysnum::ReleaseBlock, [msg.addr, 0, 0])?;
    Ok(())
}

/// Queues `msg` on `target`'s mailbox. If the kernel refuses, the message
/// comes back with the error and is still ours.
pub fn sys_send(target: Pid, msg: Message) -> Result<(), (RtxError, Message)> {
    match check_call(Sysnum::Send, [u32::from(target.0), msg.addr, 0]) {
        Ok(_) => Ok(()),
        Err(e) => Err((e, msg)),
    }
}

/// Arranges for `msg` to be delivered to `target` after `delay_ms` timer
/// ticks. A delay of zero is an ordinary send.
pub fn sys_delayed_send(
    target: Pid,
    msg: Message,
    delay_ms: u32,
) -> Result<(), (RtxError, Message)> {
    match check_call(
        Sysnum::DelayedSend,
        [u32::from(target.0), msg.addr, delay_ms],
    ) {
        Ok(_) => Ok(()),
        Err(e) => Err((e, msg)),
    }
}

/// Takes the oldest message from the caller's mailbox, waiting for one if it
/// is empty.
pub fn sys_receive() -> (Pid, Message) {
    let (code, value) = retrying(Sysnum::Receive, [0; 3]);
    match check(code, value) {
        Ok(addr) => {
            let msg = Message::from_addr(addr);
            (msg.sender(), msg)
        }
        Err(e) => panic!("Receive refused: {:?}", e),
    }
}

/// Takes the oldest message from the caller's mailbox if there is one.
pub fn sys_try_receive() -> Option<(Pid, Message)> {
    match check_call(Sysnum::TryReceive, [0; 3]) {
        Ok(0) => None,
        Ok(addr) => {
            let msg = Message::from_addr(addr);
            Some((msg.sender(), msg))
        }
        Err(e) => panic!("TryReceive refused: {:?}", e),
    }
}

/// Asks the kernel to log one of its queues.
pub fn sys_dump_queues(which: QueueKind) -> Result<(), RtxError> {
    check_call(Sysnum::DumpQueues, [which as u32, 0, 0])?;
    Ok(())
}

/// Body of the timer interrupt process: on every activation, deliver the
/// delayed messages that are due and give the processor back.
pub fn timer_iprocess() -> ! {
    loop {
        if let Err(e) = check_call(Sysnum::ServiceTimer, [0; 3]) {
            panic!("ServiceTimer refused: {:?}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    #[test]
    fn request_block_reissues_until_served() {
        let calls = Rc::new(Cell::new(0));
        let seen = calls.clone();
        fake::install(move |nr, _| {
            assert_eq!(nr, Sysnum::RequestBlock);
            seen.set(seen.get() + 1);
            if seen.get() < 3 {
                (RETRY, 0)
            } else {
                (OK, fake::block_addr(2))
            }
        });
        let msg = sys_request_block();
        assert_eq!(msg.addr(), fake::block_addr(2));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn try_calls_map_zero_to_none() {
        fake::install(|_, _| (OK, 0));
        assert_eq!(sys_try_request_block(), None);
        assert!(sys_try_receive().is_none());
    }

    #[test]
    fn receive_reads_the_sender_from_the_envelope() {
        let addr = fake::block_addr(1);
        fake::write_envelope(
            addr,
            &Envelope {
                sender: Pid(4),
                receiver: Pid(2),
                ..Default::default()
            },
        );
        let calls = Rc::new(Cell::new(0));
        let seen = calls.clone();
        fake::install(move |nr, _| {
            assert_eq!(nr, Sysnum::Receive);
            seen.set(seen.get() + 1);
            if seen.get() == 1 {
                (RETRY, 0)
            } else {
                (OK, addr)
            }
        });
        let (sender, msg) = sys_receive();
        assert_eq!(sender, Pid(4));
        assert_eq!(msg.receiver(), Pid(2));
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn refusals_surface_as_errors() {
        fake::install(|_, _| (UsageError::BadPid.code(), 0));
        assert_eq!(
            sys_get_priority(Pid(9)),
            Err(RtxError::Usage(UsageError::BadPid))
        );
        fake::install(|_, _| (77, 0));
        assert_eq!(
            sys_set_priority(Pid(1), Priority::LOW),
            Err(RtxError::BadResponse(77))
        );
    }

    #[test]
    fn refused_send_hands_the_message_back() {
        fake::install(|_, _| (UsageError::BadPid.code(), 0));
        let msg = Message::from_addr(fake::block_addr(0));
        let Err((e, msg)) = sys_send(Pid(12), msg) else {
            panic!("send should have been refused");
        };
        assert_eq!(e, RtxError::Usage(UsageError::BadPid));
        assert_eq!(msg.addr(), fake::block_addr(0));
    }

    #[test]
    fn arguments_land_in_order() {
        let args = Rc::new(RefCell::new(Vec::new()));
        let log = args.clone();
        fake::install(move |nr, a| {
            log.borrow_mut().push((nr, a));
            (OK, 0)
        });
        let addr = fake::block_addr(3);
        sys_delayed_send(Pid(5), Message::from_addr(addr), 250).unwrap();
        sys_set_priority(Pid(6), Priority::LOWEST).unwrap();
        sys_dump_queues(QueueKind::BlockedOnMessage).unwrap();
        assert_eq!(
            *args.borrow(),
            [
                (Sysnum::DelayedSend, [5, addr, 250]),
                (Sysnum::SetPriority, [6, 3, 0]),
                (Sysnum::DumpQueues, [2, 0, 0]),
            ]
        );
    }

    #[test]
    fn text_is_clipped_to_the_block() {
        let mut msg = Message::from_addr(fake::block_addr(0));
        msg.set_kind(0x4b45_5920);
        let long = [b'x'; BLOCK_SIZE];
        assert_eq!(msg.set_text(&long), TEXT_CAPACITY);
        assert_eq!(msg.set_text(b"hello"), 5);
        assert_eq!(&msg.text()[..5], b"hello");
        assert_eq!(msg.text().len(), TEXT_CAPACITY);
        assert_eq!(msg.kind(), 0x4b45_5920);
    }
}
