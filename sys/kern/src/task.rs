// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Implementation of processes.

use abi::{Pid, Priority, ProcFlags, ProcState, ProcessDesc, QueueKind};

use crate::msg::Mailbox;

/// Internal representation of a process.
///
/// The fields of this struct are private to this module. Queue membership in
/// particular is only changed by `pq`, through the crate-visible accessors.
#[repr(C)] // so location of SavedState is predictable
#[derive(Debug)]
pub struct Task {
    /// Saved machine state of the user program.
    save: crate::arch::SavedState,
    // NOTE: it is critical that the above field appear first!
    pid: Pid,
    /// Current priority. Changed only by `SetPriority`.
    priority: Priority,
    state: ProcState,
    flags: ProcFlags,
    /// Messages delivered but not yet received.
    mailbox: Mailbox,
    /// Next process on whichever priority queue this one is filed on.
    link: Option<Pid>,
    /// The queue this process is filed on, if any. A process is never on more
    /// than one.
    queued_on: Option<QueueKind>,
    entry_point: u32,
    initial_stack: u32,
}

impl Task {
    /// Creates a `Task` in state `New`. Its saved state is empty until
    /// `arch::reinitialize` synthesizes the first frame.
    pub fn from_descriptor(desc: &ProcessDesc, initial_stack: u32) -> Self {
        Task {
            save: crate::arch::SavedState::default(),
            pid: desc.pid,
            priority: desc.priority,
            state: ProcState::New,
            flags: desc.flags,
            mailbox: Mailbox::default(),
            link: None,
            queued_on: None,
            entry_point: desc.entry_point,
            initial_stack,
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Moves this process to a new priority level.
    ///
    /// The caller must take it off any queue first: queues find a process's
    /// bucket from its current priority.
    pub fn set_priority(&mut self, priority: Priority) {
        uassert!(self.queued_on.is_none());
        self.priority = priority;
    }

    pub fn state(&self) -> ProcState {
        self.state
    }

    pub fn set_state(&mut self, state: ProcState) {
        self.state = state;
    }

    /// Checks whether user code may change this process's priority.
    pub fn priority_is_locked(&self) -> bool {
        self.priority.is_interrupt()
            || self.priority == Priority::HIDDEN
            || self.flags.contains(ProcFlags::FIXED_PRIORITY)
    }

    pub fn mailbox_mut(&mut self) -> &mut Mailbox {
        &mut self.mailbox
    }

    pub fn entry_point(&self) -> u32 {
        self.entry_point
    }

    /// Stack pointer this process starts from, before the initial frame is
    /// pushed.
    pub fn initial_stack(&self) -> u32 {
        self.initial_stack
    }

    pub fn queued_on(&self) -> Option<QueueKind> {
        self.queued_on
    }

    pub(crate) fn link(&self) -> Option<Pid> {
        self.link
    }

    pub(crate) fn set_link(&mut self, link: Option<Pid>) {
        self.link = link;
    }

    pub(crate) fn set_queued_on(&mut self, kind: Option<QueueKind>) {
        self.queued_on = kind;
    }

    /// Returns a reference to the saved machine state for the process.
    pub fn save(&self) -> &crate::arch::SavedState {
        &self.save
    }

    /// Returns a mutable reference to the saved machine state for the
    /// process.
    pub fn save_mut(&mut self) -> &mut crate::arch::SavedState {
        &mut self.save
    }
}

/// Interface that must be implemented by the `arch::SavedState` type. This
/// gives architecture-independent access to process state for the rest of
/// the kernel.
///
/// Architectures need to implement the `argX` and `retX` functions, and the
/// rest of the trait (such as the argument proxies) will just work. The
/// syscall number arrives separately, from the entry sequence.
pub trait ArchState: Default {
    fn stack_pointer(&self) -> u32;

    /// Reads syscall argument register 0.
    fn arg0(&self) -> u32;
    /// Reads syscall argument register 1.
    fn arg1(&self) -> u32;
    /// Reads syscall argument register 2.
    fn arg2(&self) -> u32;

    /// Writes syscall return argument 0.
    fn ret0(&mut self, _: u32);
    /// Writes syscall return argument 1.
    fn ret1(&mut self, _: u32);

    /// Sets a response code and value, which the process sees when it
    /// resumes.
    fn set_response(&mut self, code: u32, value: u32) {
        self.ret0(code);
        self.ret1(value);
    }
}

/// The table of process slots, indexed by pid. Slots without a process are
/// `None`.
pub struct ProcessTable<'a> {
    slots: &'a mut [Option<Task>],
}

impl<'a> ProcessTable<'a> {
    /// Takes over `slots`, marking every one of them unused.
    pub fn new(slots: &'a mut [Option<Task>]) -> Self {
        for slot in slots.iter_mut() {
            *slot = None;
        }
        Self { slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn get(&self, pid: Pid) -> Option<&Task> {
        self.slots.get(pid.index()).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, pid: Pid) -> Option<&mut Task> {
        self.slots.get_mut(pid.index()).and_then(Option::as_mut)
    }

    /// Like `get`, for a pid the kernel already knows is in use. Panics
    /// otherwise.
    pub fn task(&self, pid: Pid) -> &Task {
        match self.get(pid) {
            Some(task) => task,
            None => panic!("no process {}", pid.0),
        }
    }

    pub fn task_mut(&mut self, pid: Pid) -> &mut Task {
        match self.get_mut(pid) {
            Some(task) => task,
            None => panic!("no process {}", pid.0),
        }
    }

    /// Puts `task` in the slot its pid names. The slot must be in range and
    /// unused.
    pub fn install(&mut self, task: Task) -> &mut Task {
        let slot = &mut self.slots[task.pid.index()];
        uassert!(slot.is_none());
        slot.insert(task)
    }

    /// Iterates over the processes in use, in pid order.
    pub fn iter(&self) -> impl Iterator<Item = &Task> + '_ {
        self.slots.iter().filter_map(Option::as_ref)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(pid: u16, priority: Priority) -> ProcessDesc {
        ProcessDesc {
            pid: Pid(pid),
            priority,
            stack_size: 256,
            entry_point: 0x0800_1000,
            flags: ProcFlags::empty(),
        }
    }

    #[test]
    fn new_table_clears_slots() {
        let mut slots: [Option<Task>; 4] = Default::default();
        slots[2] = Some(Task::from_descriptor(&desc(2, Priority::LOW), 0));
        let table = ProcessTable::new(&mut slots);
        assert_eq!(table.iter().count(), 0);
        assert!(table.get(Pid(2)).is_none());
    }

    #[test]
    fn install_and_look_up() {
        let mut slots: [Option<Task>; 4] = Default::default();
        let mut table = ProcessTable::new(&mut slots);
        table.install(Task::from_descriptor(&desc(3, Priority::MEDIUM), 64));
        let t = table.task(Pid(3));
        assert_eq!(t.pid(), Pid(3));
        assert_eq!(t.state(), ProcState::New);
        assert_eq!(t.initial_stack(), 64);
        assert!(t.queued_on().is_none());
        assert!(table.get(Pid(9)).is_none());
    }

    #[test]
    fn locked_priorities() {
        let mut fixed = desc(1, Priority::HIGH);
        fixed.flags = ProcFlags::FIXED_PRIORITY;
        assert!(Task::from_descriptor(&fixed, 0).priority_is_locked());
        assert!(Task::from_descriptor(&desc(0, Priority::HIDDEN), 0)
            .priority_is_locked());
        assert!(Task::from_descriptor(&desc(14, Priority::INTERRUPT), 0)
            .priority_is_locked());
        assert!(!Task::from_descriptor(&desc(2, Priority::LOW), 0)
            .priority_is_locked());
    }
}
