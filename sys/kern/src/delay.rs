// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Delayed-delivery queue.
//!
//! Messages waiting to be delivered at a later tick, kept sorted by deadline
//! and chained through the envelope link word. The deadline itself lives in
//! the envelope's `expiry` field.

use abi::Envelope;

use crate::mem::{Block, BlockPool, Custody};
use crate::time::Timestamp;

#[derive(Debug, Default)]
pub struct DelayQueue {
    front: Option<Block>,
    len: usize,
}

fn expiry(pool: &BlockPool<'_>, b: Block) -> Timestamp {
    Timestamp::from(pool.envelope(b).expiry)
}

impl DelayQueue {
    pub const fn new() -> Self {
        Self {
            front: None,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.front.is_none()
    }

    /// Files `b` to fire at `when`. Entries with the same deadline fire in
    /// the order they were inserted.
    pub fn insert(&mut self, pool: &mut BlockPool<'_>, b: Block, when: Timestamp) {
        let envelope = Envelope {
            expiry: when.to_words(),
            ..pool.envelope(b)
        };
        pool.set_envelope(b, &envelope);
        pool.set_custody(b, Custody::Delayed);

        let mut prev = None;
        let mut cursor = self.front;
        while let Some(c) = cursor {
            if expiry(pool, c) > when {
                break;
            }
            prev = Some(c);
            cursor = pool.link(c);
        }
        pool.set_link(b, cursor);
        match prev {
            Some(p) => pool.set_link(p, Some(b)),
            None => self.front = Some(b),
        }
        self.len += 1;
    }

    /// Pulls `b` out of the queue before it fires. Returns `false` if it
    /// wasn't queued here.
    pub fn remove(&mut self, pool: &mut BlockPool<'_>, b: Block) -> bool {
        let mut prev = None;
        let mut cursor = self.front;
        while let Some(c) = cursor {
            if c == b {
                let next = pool.link(c);
                match prev {
                    Some(p) => pool.set_link(p, next),
                    None => self.front = next,
                }
                pool.set_link(b, None);
                pool.set_custody(b, Custody::Held);
                self.len -= 1;
                return true;
            }
            prev = Some(c);
            cursor = pool.link(c);
        }
        false
    }

    /// Removes the earliest entry if its deadline is at or before `now`.
    pub fn pop_expired(
        &mut self,
        pool: &mut BlockPool<'_>,
        now: Timestamp,
    ) -> Option<Block> {
        let b = self.front?;
        if expiry(pool, b) > now {
            return None;
        }
        self.front = pool.link(b);
        pool.set_link(b, None);
        pool.set_custody(b, Custody::Held);
        self.len -= 1;
        Some(b)
    }

    /// Deadline of the next entry to fire.
    pub fn peek_expiry(&self, pool: &BlockPool<'_>) -> Option<Timestamp> {
        self.front.map(|b| expiry(pool, b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use abi::BLOCK_SIZE;

    fn fired(
        q: &mut DelayQueue,
        pool: &mut BlockPool<'_>,
        now: u64,
    ) -> Vec<Block> {
        core::iter::from_fn(|| q.pop_expired(pool, Timestamp::from(now)))
            .collect()
    }

    #[test]
    fn drains_only_what_is_due_in_order() {
        let mut storage = vec![0u8; BLOCK_SIZE * 4];
        let mut pool = BlockPool::new(&mut storage, BLOCK_SIZE);
        let mut q = DelayQueue::new();
        let (a, b, c) = (
            pool.allocate().unwrap(),
            pool.allocate().unwrap(),
            pool.allocate().unwrap(),
        );
        q.insert(&mut pool, a, Timestamp::from(30));
        q.insert(&mut pool, b, Timestamp::from(10));
        q.insert(&mut pool, c, Timestamp::from(20));

        assert_eq!(fired(&mut q, &mut pool, 25), [b, c]);
        assert_eq!(q.len(), 1);
        assert_eq!(q.peek_expiry(&pool), Some(Timestamp::from(30)));
        assert_eq!(pool.custody(a), Some(Custody::Delayed));
        assert_eq!(pool.custody(b), Some(Custody::Held));
    }

    #[test]
    fn equal_deadlines_fire_in_insertion_order() {
        let mut storage = vec![0u8; BLOCK_SIZE * 4];
        let mut pool = BlockPool::new(&mut storage, BLOCK_SIZE);
        let mut q = DelayQueue::new();
        let blocks: Vec<_> =
            (0..4).map(|_| pool.allocate().unwrap()).collect();
        q.insert(&mut pool, blocks[0], Timestamp::from(5));
        q.insert(&mut pool, blocks[1], Timestamp::from(9));
        q.insert(&mut pool, blocks[2], Timestamp::from(5));
        q.insert(&mut pool, blocks[3], Timestamp::from(5));

        assert_eq!(fired(&mut q, &mut pool, 5), [blocks[0], blocks[2], blocks[3]]);
        assert!(fired(&mut q, &mut pool, 8).is_empty());
        assert_eq!(fired(&mut q, &mut pool, 9), [blocks[1]]);
        assert!(q.is_empty());
    }

    #[test]
    fn remove_unlinks_anywhere() {
        let mut storage = vec![0u8; BLOCK_SIZE * 3];
        let mut pool = BlockPool::new(&mut storage, BLOCK_SIZE);
        let mut q = DelayQueue::new();
        let blocks: Vec<_> =
            (0..3).map(|_| pool.allocate().unwrap()).collect();
        for (i, &b) in blocks.iter().enumerate() {
            q.insert(&mut pool, b, Timestamp::from(i as u64));
        }
        assert!(q.remove(&mut pool, blocks[1]));
        assert!(!q.remove(&mut pool, blocks[1]));
        assert_eq!(pool.custody(blocks[1]), Some(Custody::Held));
        assert!(q.remove(&mut pool, blocks[0]));
        assert_eq!(fired(&mut q, &mut pool, 100), [blocks[2]]);
    }
}
