// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-process mailboxes.
//!
//! A message is a pool block with its envelope filled in. Mailboxes chain
//! blocks through the envelope's link word, oldest first.

use abi::{Envelope, Pid};

use crate::mem::{Block, BlockPool, Custody};

#[derive(Copy, Clone, Debug, Default)]
pub struct Mailbox {
    front: Option<Block>,
    back: Option<Block>,
}

impl Mailbox {
    pub fn is_empty(&self) -> bool {
        self.front.is_none()
    }

    /// Queues `b` behind any messages already waiting.
    pub fn push_back(&mut self, pool: &mut BlockPool<'_>, b: Block) {
        pool.set_link(b, None);
        pool.set_custody(b, Custody::Mailbox);
        match self.back {
            Some(tail) => pool.set_link(tail, Some(b)),
            None => self.front = Some(b),
        }
        self.back = Some(b);
    }

    /// Takes the oldest message. The block is handed over as `Held`.
    pub fn pop_front(&mut self, pool: &mut BlockPool<'_>) -> Option<Block> {
        let b = self.front?;
        self.front = pool.link(b);
        if self.front.is_none() {
            self.back = None;
        }
        pool.set_link(b, None);
        pool.set_custody(b, Custody::Held);
        Some(b)
    }

    /// Number of waiting messages. Walks the chain.
    pub fn len(&self, pool: &BlockPool<'_>) -> usize {
        core::iter::successors(self.front, |&b| pool.link(b)).count()
    }
}

/// Fills in the addressing part of `b`'s envelope and clears its deadline.
pub fn stamp(pool: &mut BlockPool<'_>, b: Block, sender: Pid, receiver: Pid) {
    let envelope = Envelope {
        sender,
        receiver,
        expiry: [0; 2],
        ..pool.envelope(b)
    };
    pool.set_envelope(b, &envelope);
}

#[cfg(test)]
mod tests {
    use super::*;
    use abi::BLOCK_SIZE;

    #[test]
    fn messages_come_out_in_arrival_order() {
        let mut storage = vec![0u8; BLOCK_SIZE * 4];
        let mut pool = BlockPool::new(&mut storage, BLOCK_SIZE);
        let mut mbox = Mailbox::default();
        let blocks: Vec<_> =
            (0..3).map(|_| pool.allocate().unwrap()).collect();
        for &b in &blocks {
            mbox.push_back(&mut pool, b);
            assert_eq!(pool.custody(b), Some(Custody::Mailbox));
        }
        assert_eq!(mbox.len(&pool), 3);

        let out: Vec<_> =
            core::iter::from_fn(|| mbox.pop_front(&mut pool)).collect();
        assert_eq!(out, blocks);
        assert!(mbox.is_empty());
        assert!(out.iter().all(|&b| pool.custody(b) == Some(Custody::Held)));

        // Emptying resets the tail too.
        mbox.push_back(&mut pool, blocks[1]);
        assert_eq!(mbox.pop_front(&mut pool), Some(blocks[1]));
    }

    #[test]
    fn stamp_leaves_link_and_custody_alone() {
        let mut storage = vec![0u8; BLOCK_SIZE * 2];
        let mut pool = BlockPool::new(&mut storage, BLOCK_SIZE);
        let b = pool.allocate().unwrap();
        let mut env = pool.envelope(b);
        env.expiry = [7, 7];
        pool.set_envelope(b, &env);

        stamp(&mut pool, b, Pid(2), Pid(5));
        let env = pool.envelope(b);
        assert_eq!((env.sender, env.receiver), (Pid(2), Pid(5)));
        assert_eq!(env.expiry, [0, 0]);
        assert_eq!(pool.custody(b), Some(Custody::Held));
    }
}
