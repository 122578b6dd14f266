// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Multi-level priority queues of processes.
//!
//! One FIFO per priority level, threaded through the `link` field of each
//! `Task`. Levels are scanned from `Priority::HIGH` down, so popping always
//! yields the oldest entry of the most important non-empty level.

use abi::{Pid, QueueKind, NUM_PRIORITIES};

use crate::task::ProcessTable;

#[derive(Debug)]
pub struct PriorityQueue {
    kind: QueueKind,
    front: [Option<Pid>; NUM_PRIORITIES],
    back: [Option<Pid>; NUM_PRIORITIES],
}

impl PriorityQueue {
    pub const fn new(kind: QueueKind) -> Self {
        Self {
            kind,
            front: [None; NUM_PRIORITIES],
            back: [None; NUM_PRIORITIES],
        }
    }

    pub fn kind(&self) -> QueueKind {
        self.kind
    }

    pub fn is_empty(&self) -> bool {
        self.front.iter().all(Option::is_none)
    }

    /// Checks whether `pid` is filed on this queue.
    pub fn contains(&self, procs: &ProcessTable<'_>, pid: Pid) -> bool {
        procs.task(pid).queued_on() == Some(self.kind)
    }

    /// Marks `pid` as on this queue and returns its bucket.
    fn file(&self, procs: &mut ProcessTable<'_>, pid: Pid) -> usize {
        let task = procs.task_mut(pid);
        uassert!(task.queued_on().is_none());
        let Some(level) = task.priority().level() else {
            panic!("process {} has no queue level", pid.0);
        };
        task.set_queued_on(Some(self.kind));
        level
    }

    /// Appends `pid` to the back of its priority level.
    pub fn push(&mut self, procs: &mut ProcessTable<'_>, pid: Pid) {
        let level = self.file(procs, pid);
        procs.task_mut(pid).set_link(None);
        match self.back[level] {
            Some(tail) => procs.task_mut(tail).set_link(Some(pid)),
            None => self.front[level] = Some(pid),
        }
        self.back[level] = Some(pid);
    }

    /// Puts `pid` at the head of its priority level, ahead of everything
    /// already waiting there.
    pub fn push_front(&mut self, procs: &mut ProcessTable<'_>, pid: Pid) {
        let level = self.file(procs, pid);
        procs.task_mut(pid).set_link(self.front[level]);
        if self.back[level].is_none() {
            self.back[level] = Some(pid);
        }
        self.front[level] = Some(pid);
    }

    /// Removes and returns the head of the most important non-empty level.
    pub fn pop_highest(&mut self, procs: &mut ProcessTable<'_>) -> Option<Pid> {
        let level = self.front.iter().position(Option::is_some)?;
        let pid = self.front[level]?;
        let task = procs.task_mut(pid);
        self.front[level] = task.link();
        task.set_link(None);
        task.set_queued_on(None);
        if self.front[level].is_none() {
            self.back[level] = None;
        }
        Some(pid)
    }

    /// Takes `pid` out of this queue wherever it sits. Returns `false`, and
    /// changes nothing, if it isn't on this queue.
    pub fn pop_specific(
        &mut self,
        procs: &mut ProcessTable<'_>,
        pid: Pid,
    ) -> bool {
        if !self.contains(procs, pid) {
            return false;
        }
        let Some(level) = procs.task(pid).priority().level() else {
            panic!("process {} has no queue level", pid.0);
        };

        let mut prev = None;
        let mut cursor = self.front[level];
        while let Some(c) = cursor {
            if c == pid {
                break;
            }
            prev = Some(c);
            cursor = procs.task(c).link();
        }
        // Membership is tracked per task, so it must be in the chain.
        uassert!(cursor == Some(pid));

        let next = procs.task(pid).link();
        match prev {
            Some(p) => procs.task_mut(p).set_link(next),
            None => self.front[level] = next,
        }
        if self.back[level] == Some(pid) {
            self.back[level] = prev;
        }
        let task = procs.task_mut(pid);
        task.set_link(None);
        task.set_queued_on(None);
        true
    }

    /// Walks the queue in the order `pop_highest` would drain it.
    pub fn iter<'q, 't>(&'q self, procs: &'q ProcessTable<'t>) -> Iter<'q, 't> {
        Iter {
            queue: self,
            procs,
            level: 0,
            next: self.front[0],
        }
    }
}

pub struct Iter<'q, 't> {
    queue: &'q PriorityQueue,
    procs: &'q ProcessTable<'t>,
    level: usize,
    next: Option<Pid>,
}

impl Iterator for Iter<'_, '_> {
    type Item = Pid;

    fn next(&mut self) -> Option<Pid> {
        loop {
            if let Some(pid) = self.next {
                self.next = self.procs.task(pid).link();
                return Some(pid);
            }
            self.level += 1;
            if self.level >= NUM_PRIORITIES {
                return None;
            }
            self.next = self.queue.front[self.level];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Task;
    use abi::{Priority, ProcFlags, ProcessDesc, NUM_PROCS};
    use proptest::prelude::*;

    fn table_with<'a>(
        slots: &'a mut [Option<Task>],
        prios: &[Priority],
    ) -> ProcessTable<'a> {
        let mut table = ProcessTable::new(slots);
        for (i, &priority) in prios.iter().enumerate() {
            let desc = ProcessDesc {
                pid: Pid(i as u16),
                priority,
                stack_size: 0,
                entry_point: 0,
                flags: ProcFlags::empty(),
            };
            table.install(Task::from_descriptor(&desc, 0));
        }
        table
    }

    fn drain(q: &mut PriorityQueue, procs: &mut ProcessTable<'_>) -> Vec<u16> {
        core::iter::from_fn(|| q.pop_highest(procs)).map(|p| p.0).collect()
    }

    #[test]
    fn push_front_jumps_its_level_only() {
        let mut slots: [Option<Task>; 4] = Default::default();
        let mut procs = table_with(
            &mut slots,
            &[Priority::MEDIUM, Priority::MEDIUM, Priority::HIGH, Priority::MEDIUM],
        );
        let mut q = PriorityQueue::new(QueueKind::Ready);
        q.push(&mut procs, Pid(0));
        q.push(&mut procs, Pid(1));
        q.push(&mut procs, Pid(2));
        q.push_front(&mut procs, Pid(3));
        assert_eq!(q.iter(&procs).map(|p| p.0).collect::<Vec<_>>(), [2, 3, 0, 1]);
        assert_eq!(drain(&mut q, &mut procs), [2, 3, 0, 1]);
        assert!(q.is_empty());
    }

    #[test]
    fn pop_specific_relinks_neighbours() {
        let mut slots: [Option<Task>; 3] = Default::default();
        let mut procs = table_with(&mut slots, &[Priority::LOW; 3]);
        let mut q = PriorityQueue::new(QueueKind::BlockedOnMemory);
        for i in 0..3 {
            q.push(&mut procs, Pid(i));
        }
        assert!(q.pop_specific(&mut procs, Pid(2)));
        assert!(!q.pop_specific(&mut procs, Pid(2)));
        assert!(procs.task(Pid(2)).queued_on().is_none());
        // The back pointer moved, so a fresh push lands after 1.
        q.push(&mut procs, Pid(2));
        assert!(q.pop_specific(&mut procs, Pid(0)));
        assert_eq!(drain(&mut q, &mut procs), [1, 2]);
    }

    #[test]
    fn membership_is_per_queue() {
        let mut slots: [Option<Task>; 1] = Default::default();
        let mut procs = table_with(&mut slots, &[Priority::HIGH]);
        let mut ready = PriorityQueue::new(QueueKind::Ready);
        let mut blocked = PriorityQueue::new(QueueKind::BlockedOnMemory);
        blocked.push(&mut procs, Pid(0));
        assert!(!ready.contains(&procs, Pid(0)));
        assert!(!ready.pop_specific(&mut procs, Pid(0)));
        assert_eq!(ready.pop_highest(&mut procs), None);
        assert!(blocked.contains(&procs, Pid(0)));
    }

    #[test]
    #[should_panic]
    fn double_filing_is_refused() {
        let mut slots: [Option<Task>; 1] = Default::default();
        let mut procs = table_with(&mut slots, &[Priority::HIGH]);
        let mut ready = PriorityQueue::new(QueueKind::Ready);
        let mut blocked = PriorityQueue::new(QueueKind::BlockedOnMemory);
        ready.push(&mut procs, Pid(0));
        blocked.push(&mut procs, Pid(0));
    }

    proptest! {
        #[test]
        fn pops_by_level_then_fifo(
            levels in prop::collection::vec(0u8..5, 1..NUM_PROCS)
        ) {
            let prios: Vec<_> = levels.iter().map(|&l| Priority(l)).collect();
            let mut slots: Vec<Option<Task>> =
                (0..prios.len()).map(|_| None).collect();
            let mut procs = table_with(&mut slots, &prios);
            let mut q = PriorityQueue::new(QueueKind::Ready);
            for i in 0..prios.len() {
                q.push(&mut procs, Pid(i as u16));
            }

            let popped = drain(&mut q, &mut procs);
            prop_assert_eq!(popped.len(), prios.len());
            for pair in popped.windows(2) {
                let (a, b) = (levels[pair[0] as usize], levels[pair[1] as usize]);
                prop_assert!(a <= b);
                if a == b {
                    // Pushed in pid order, so FIFO means ascending pids.
                    prop_assert!(pair[0] < pair[1]);
                }
            }
        }
    }
}
