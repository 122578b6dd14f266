// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fixed-size block pool and process stack carving.
//!
//! The pool is a single byte region cut into equal blocks. A block's first
//! word links it into whichever chain it is on: the free list here, a
//! mailbox, or the delayed-delivery queue. The kernel names blocks by index;
//! processes see their addresses.

use core::mem::offset_of;

use abi::{Envelope, UsageError, TEXT_OFFSET};
use byteorder::{ByteOrder, NativeEndian};
use zerocopy::{FromBytes, IntoBytes};

/// Handle to one block of the pool.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Block(u16);

impl Block {
    pub fn index(self) -> usize {
        usize::from(self.0)
    }
}

/// Link word value meaning "end of chain".
const NIL: u32 = u32::MAX;

const LINK_OFFSET: usize = offset_of!(Envelope, link);
const CUSTODY_OFFSET: usize = offset_of!(Envelope, custody);

/// Which kernel structure currently owns a block. Stored in the block's
/// envelope so a debugger reading the pool can tell.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u32)]
pub enum Custody {
    Free = u32::from_le_bytes(*b"free"),
    Held = u32::from_le_bytes(*b"held"),
    Mailbox = u32::from_le_bytes(*b"mbox"),
    Delayed = u32::from_le_bytes(*b"dlay"),
}

impl Custody {
    fn from_raw(raw: u32) -> Option<Self> {
        [Self::Free, Self::Held, Self::Mailbox, Self::Delayed]
            .into_iter()
            .find(|c| *c as u32 == raw)
    }
}

pub struct BlockPool<'a> {
    storage: &'a mut [u8],
    /// Address of the first block as processes see it. On a 64-bit host this
    /// is truncated, which is fine: the kernel only converts addresses to
    /// indices, never dereferences them.
    base: u32,
    block_size: usize,
    count: usize,
    free_head: Option<Block>,
    free_count: usize,
}

impl<'a> BlockPool<'a> {
    /// Cuts `storage` into as many `block_size` blocks as fit and threads
    /// them all onto the free list, lowest index first.
    pub fn new(storage: &'a mut [u8], block_size: usize) -> Self {
        uassert!(block_size >= TEXT_OFFSET);
        uassert!(block_size % 8 == 0);
        let count =
            core::cmp::min(storage.len() / block_size, usize::from(u16::MAX));
        let base = storage.as_ptr() as usize as u32;

        let mut pool = Self {
            storage,
            base,
            block_size,
            count,
            free_head: None,
            free_count: 0,
        };
        for i in (0..count).rev() {
            pool.push_free(Block(i as u16));
        }
        pool
    }

    fn push_free(&mut self, b: Block) {
        self.set_link(b, self.free_head);
        self.set_custody(b, Custody::Free);
        self.free_head = Some(b);
        self.free_count += 1;
    }

    /// Takes a block off the free list. Its custody becomes `Held`; the rest
    /// of its contents are whatever the last holder left there.
    pub fn allocate(&mut self) -> Option<Block> {
        let b = self.free_head?;
        self.free_head = self.link(b);
        self.free_count -= 1;
        self.set_link(b, None);
        self.set_custody(b, Custody::Held);
        Some(b)
    }

    /// Returns a held block to the free list.
    pub fn release(&mut self, b: Block) -> Result<(), UsageError> {
        self.check_held(b)?;
        self.push_free(b);
        Ok(())
    }

    /// Checks that `b` is in a process's hands rather than free or queued
    /// somewhere in the kernel.
    pub fn check_held(&self, b: Block) -> Result<(), UsageError> {
        if self.custody(b) == Some(Custody::Held) {
            Ok(())
        } else {
            Err(UsageError::BlockNotHeld)
        }
    }

    pub fn custody(&self, b: Block) -> Option<Custody> {
        Custody::from_raw(self.read_word(b, CUSTODY_OFFSET))
    }

    pub fn set_custody(&mut self, b: Block, custody: Custody) {
        self.write_word(b, CUSTODY_OFFSET, custody as u32);
    }

    pub fn link(&self, b: Block) -> Option<Block> {
        match self.read_word(b, LINK_OFFSET) {
            NIL => None,
            i => {
                uassert!((i as usize) < self.count);
                Some(Block(i as u16))
            }
        }
    }

    pub fn set_link(&mut self, b: Block, next: Option<Block>) {
        let raw = next.map_or(NIL, |n| u32::from(n.0));
        self.write_word(b, LINK_OFFSET, raw);
    }

    pub fn envelope(&self, b: Block) -> Envelope {
        match Envelope::read_from_prefix(self.bytes(b)) {
            Ok((envelope, _)) => envelope,
            // Blocks are at least TEXT_OFFSET bytes, checked in `new`.
            Err(_) => panic!(),
        }
    }

    pub fn set_envelope(&mut self, b: Block, envelope: &Envelope) {
        if envelope.write_to_prefix(self.bytes_mut(b)).is_err() {
            panic!();
        }
    }

    pub fn bytes(&self, b: Block) -> &[u8] {
        let start = b.index() * self.block_size;
        &self.storage[start..start + self.block_size]
    }

    pub fn bytes_mut(&mut self, b: Block) -> &mut [u8] {
        let start = b.index() * self.block_size;
        &mut self.storage[start..start + self.block_size]
    }

    fn read_word(&self, b: Block, offset: usize) -> u32 {
        NativeEndian::read_u32(&self.bytes(b)[offset..])
    }

    fn write_word(&mut self, b: Block, offset: usize, value: u32) {
        NativeEndian::write_u32(&mut self.bytes_mut(b)[offset..], value);
    }

    /// The address a process uses for `b`.
    pub fn addr_of(&self, b: Block) -> u32 {
        self.base.wrapping_add((b.index() * self.block_size) as u32)
    }

    /// Maps a process-supplied address back to a block. Anything outside the
    /// pool, or not on a block boundary, is refused.
    pub fn block_at(&self, addr: u32) -> Option<Block> {
        let offset = addr.wrapping_sub(self.base) as usize;
        if offset % self.block_size != 0 {
            return None;
        }
        let index = offset / self.block_size;
        if index < self.count {
            Some(Block(index as u16))
        } else {
            None
        }
    }

    pub fn free_count(&self) -> usize {
        self.free_count
    }

    pub fn capacity(&self) -> usize {
        self.count
    }
}

/// Bytes reserved under each stack for the register frame pushed on first
/// dispatch and on every later exception entry. Sized for the largest frame,
/// which carries FPU state.
pub const FRAME_RESERVE: u32 = 26 * 4;

/// Region that process stacks are carved from, top down.
#[derive(Debug)]
pub struct StackRegion {
    base: u32,
    top: u32,
}

impl StackRegion {
    /// Covers `size` bytes from `base`. The top is rounded down to 8 bytes so
    /// that every stack carved from it starts aligned.
    pub fn new(base: u32, size: u32) -> Self {
        Self {
            base,
            top: base.saturating_add(size) & !0x7,
        }
    }

    /// Reserves `stack_size` bytes plus a frame's worth, returning the
    /// initial stack pointer, or `None` if the region is used up.
    pub fn carve(&mut self, stack_size: u32) -> Option<u32> {
        let reserve = stack_size.checked_add(FRAME_RESERVE + 7)? & !0x7;
        let initial_sp = self.top;
        let new_top = initial_sp.checked_sub(reserve)?;
        if new_top < self.base {
            return None;
        }
        self.top = new_top;
        Some(initial_sp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use abi::{Pid, BLOCK_SIZE};
    use proptest::prelude::*;

    #[test]
    fn free_list_starts_ascending() {
        let mut storage = vec![0u8; BLOCK_SIZE * 4];
        let mut pool = BlockPool::new(&mut storage, BLOCK_SIZE);
        assert_eq!(pool.capacity(), 4);
        let got: Vec<_> = core::iter::from_fn(|| pool.allocate())
            .map(|b| b.index())
            .collect();
        assert_eq!(got, [0, 1, 2, 3]);
        assert_eq!(pool.free_count(), 0);
    }

    #[test]
    fn release_rejects_blocks_not_held() {
        let mut storage = vec![0u8; BLOCK_SIZE * 2];
        let mut pool = BlockPool::new(&mut storage, BLOCK_SIZE);
        let b = pool.allocate().unwrap();
        pool.release(b).unwrap();
        assert_eq!(pool.release(b), Err(UsageError::BlockNotHeld));
        assert_eq!(pool.free_count(), 2);

        let b = pool.allocate().unwrap();
        pool.set_custody(b, Custody::Mailbox);
        assert_eq!(pool.release(b), Err(UsageError::BlockNotHeld));
    }

    #[test]
    fn addresses_round_trip_and_reject_junk() {
        let mut storage = vec![0u8; BLOCK_SIZE * 3];
        let pool = BlockPool::new(&mut storage, BLOCK_SIZE);
        let b = Block(2);
        let addr = pool.addr_of(b);
        assert_eq!(pool.block_at(addr), Some(b));
        assert_eq!(pool.block_at(addr.wrapping_add(4)), None);
        assert_eq!(pool.block_at(addr.wrapping_add(BLOCK_SIZE as u32)), None);
        assert_eq!(pool.block_at(pool.addr_of(Block(0)).wrapping_sub(128)), None);
    }

    #[test]
    fn envelope_lives_at_block_start() {
        let mut storage = vec![0u8; BLOCK_SIZE];
        let mut pool = BlockPool::new(&mut storage, BLOCK_SIZE);
        let b = pool.allocate().unwrap();
        let mut env = pool.envelope(b);
        env.sender = Pid(3);
        env.receiver = Pid(4);
        pool.set_envelope(b, &env);
        assert_eq!(pool.envelope(b).sender, Pid(3));
        assert_eq!(pool.custody(b), Some(Custody::Held));
        assert_eq!(pool.link(b), None);
    }

    #[test]
    fn stacks_carve_down_and_stay_aligned() {
        let mut stacks = StackRegion::new(0x2000_0000, 1024);
        let a = stacks.carve(100).unwrap();
        let b = stacks.carve(256).unwrap();
        assert_eq!(a, 0x2000_0400);
        assert_eq!(b % 8, 0);
        assert_eq!(a - b, (100 + FRAME_RESERVE + 7) & !7);
        assert_eq!(stacks.carve(2048), None);
        // A failed carve leaves the region alone.
        assert!(stacks.carve(256).is_some());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Alloc,
        Free(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![Just(Op::Alloc), any::<usize>().prop_map(Op::Free)]
    }

    proptest! {
        #[test]
        fn live_blocks_never_alias(ops in prop::collection::vec(op(), 0..200)) {
            let mut storage = vec![0u8; BLOCK_SIZE * 8];
            let mut pool = BlockPool::new(&mut storage, BLOCK_SIZE);
            let mut live: Vec<Block> = Vec::new();
            for op in ops {
                match op {
                    Op::Alloc => match pool.allocate() {
                        Some(b) => {
                            prop_assert!(!live.contains(&b));
                            live.push(b);
                        }
                        None => prop_assert_eq!(live.len(), pool.capacity()),
                    },
                    Op::Free(i) if !live.is_empty() => {
                        let b = live.swap_remove(i % live.len());
                        prop_assert_eq!(pool.release(b), Ok(()));
                    }
                    Op::Free(_) => {}
                }
                prop_assert_eq!(pool.free_count() + live.len(), pool.capacity());
            }
        }
    }
}
