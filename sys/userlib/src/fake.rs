// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Host stand-in for the kernel.
//!
//! A test installs a handler that answers syscalls, and can place envelopes
//! in a small block pool that lives at fake addresses starting at
//! `POOL_BASE`. Both are per thread, so tests running in parallel don't see
//! each other.

use std::cell::{Cell, RefCell};

use abi::{Envelope, Sysnum, BLOCK_SIZE};
use zerocopy::IntoBytes;

/// Address the kernel reports for block 0 of the fake pool.
pub const POOL_BASE: u32 = 0x2000_0000;

/// Blocks in the fake pool.
pub const POOL_BLOCKS: usize = 8;

type Handler = Box<dyn FnMut(Sysnum, [u32; 3]) -> (u32, u32)>;

std::thread_local! {
    static HANDLER: RefCell<Option<Handler>> = const { RefCell::new(None) };
    static POOL: Box<[Cell<u64>]> =
        (0..POOL_BLOCKS * BLOCK_SIZE / 8).map(|_| Cell::new(0)).collect();
}

/// Answers this thread's syscalls with `handler`, which gets the syscall
/// number and argument registers and returns the response code and value.
pub fn install(
    handler: impl FnMut(Sysnum, [u32; 3]) -> (u32, u32) + 'static,
) {
    HANDLER.with(|h| *h.borrow_mut() = Some(Box::new(handler)));
}

pub(crate) fn call(nr: Sysnum, args: [u32; 3]) -> (u32, u32) {
    HANDLER.with(|h| match h.borrow_mut().as_mut() {
        Some(handler) => handler(nr, args),
        None => panic!("syscall {:?} with no fake kernel installed", nr),
    })
}

/// Address of block `index` of the fake pool.
pub fn block_addr(index: usize) -> u32 {
    assert!(index < POOL_BLOCKS);
    POOL_BASE + (index * BLOCK_SIZE) as u32
}

pub(crate) fn block_ptr(addr: u32) -> *mut u8 {
    let offset = addr.wrapping_sub(POOL_BASE) as usize;
    assert!(
        offset % BLOCK_SIZE == 0 && offset < POOL_BLOCKS * BLOCK_SIZE,
        "{:#x} is not a fake block",
        addr
    );
    // The pool is never resized or freed while the thread lives, and `Cell`
    // permits writes through a shared borrow.
    POOL.with(|pool| pool.as_ptr() as *mut u8).wrapping_add(offset)
}

/// Writes the kernel-managed prefix of the block at `addr`, the way the
/// kernel does on delivery.
pub fn write_envelope(addr: u32, envelope: &Envelope) {
    let bytes = envelope.as_bytes();
    // Safety: `block_ptr` checked that a whole block lives at `addr`.
    unsafe {
        core::ptr::copy_nonoverlapping(
            bytes.as_ptr(),
            block_ptr(addr),
            bytes.len(),
        );
    }
}
