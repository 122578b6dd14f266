// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel state and the operations on it.
//!
//! Everything the kernel mutates lives in `Kernel`: the process table, the
//! ready and memory-blocked queues, the block pool, the delayed-delivery
//! queue, the pending interrupt flags and the identity of the running
//! process. Entry points get at it through `startup::with_kernel`.
//!
//! # Yielding
//!
//! Operations that can make a more important process runnable end by calling
//! `release_processor`, which picks the next process and updates `current`.
//! On hardware, the context switch itself happens on the way out of the
//! exception that brought us into the kernel, so these methods always
//! return; the caller's saved state is still reachable through the process
//! table to deliver its response.
//!
//! Blocking operations park the caller and return `UserError::WouldBlock`.
//! The caller reissues the call once it is dispatched again.

use abi::{Pid, Priority, ProcState, ProcessDesc, QueueKind, UsageError};

use crate::arch;
use crate::delay::DelayQueue;
use crate::err::{BootError, KernelError, UserError};
use crate::mem::{Block, BlockPool, StackRegion};
use crate::msg;
use crate::pq::{self, PriorityQueue};
use crate::task::{ArchState, ProcessTable, Task};
use crate::time::Timestamp;

bitflags::bitflags! {
    /// Interrupts whose pseudo-process is waiting to be dispatched.
    #[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
    pub struct IrqPending: u32 {
        const TIMER = 1 << 0;
        const UART = 1 << 1;
    }
}

/// Pending flags in the order the scheduler serves them, with the process
/// each one dispatches.
const INTERRUPT_PROCESSES: [(IrqPending, Pid); 2] = [
    (IrqPending::TIMER, Pid::TIMER_IPROC),
    (IrqPending::UART, Pid::UART_IPROC),
];

/// What a context switch did.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Dispatch {
    /// The running process keeps the processor.
    Same,
    /// A process that has never run was started from its initial frame.
    First(Pid),
    /// A previously preempted process was resumed.
    Resume(Pid),
}

pub struct Kernel<'a> {
    procs: ProcessTable<'a>,
    ready: PriorityQueue,
    blocked: PriorityQueue,
    pool: BlockPool<'a>,
    delayed: DelayQueue,
    pending: IrqPending,
    current: Option<Pid>,
}

impl<'a> Kernel<'a> {
    /// Builds the kernel from the boot-time process descriptors.
    ///
    /// Every process starts in `New` with a synthesized initial frame, and
    /// every one but the interrupt processes is filed on the ready queue.
    /// Nothing is running until `start`.
    pub fn new(
        slots: &'a mut [Option<Task>],
        pool: BlockPool<'a>,
        stacks: &mut StackRegion,
        descs: &[ProcessDesc],
    ) -> Result<Self, BootError> {
        let mut procs = ProcessTable::new(slots);

        for desc in descs {
            let pid = desc.pid;
            if pid.index() >= procs.len() {
                return Err(BootError::PidOutOfRange(pid));
            }
            if procs.get(pid).is_some() {
                return Err(BootError::DuplicatePid(pid));
            }
            if !desc.priority.is_valid() {
                return Err(BootError::BadPriority(pid));
            }
            let interrupt_pid =
                pid == Pid::TIMER_IPROC || pid == Pid::UART_IPROC;
            if interrupt_pid != desc.priority.is_interrupt() {
                return Err(BootError::MisplacedInterrupt(pid));
            }
            let initial_stack = stacks
                .carve(desc.stack_size)
                .ok_or(BootError::OutOfStack(pid))?;

            let task = procs.install(Task::from_descriptor(desc, initial_stack));
            arch::reinitialize(task);
        }

        let mut ready = PriorityQueue::new(QueueKind::Ready);
        for index in 0..procs.len() {
            let pid = Pid(index as u16);
            let queueable = procs
                .get(pid)
                .is_some_and(|t| !t.priority().is_interrupt());
            if queueable {
                ready.push(&mut procs, pid);
            }
        }

        Ok(Self {
            procs,
            ready,
            blocked: PriorityQueue::new(QueueKind::BlockedOnMemory),
            pool,
            delayed: DelayQueue::new(),
            pending: IrqPending::empty(),
            current: None,
        })
    }

    /// Picks the first process to run.
    pub fn start(&mut self) -> Result<Dispatch, KernelError> {
        uassert!(self.current.is_none());
        self.release_processor()
    }

    pub fn current(&self) -> Option<Pid> {
        self.current
    }

    pub fn task(&self, pid: Pid) -> Option<&Task> {
        self.procs.get(pid)
    }

    pub fn task_mut(&mut self, pid: Pid) -> Option<&mut Task> {
        self.procs.get_mut(pid)
    }

    pub fn pool(&self) -> &BlockPool<'a> {
        &self.pool
    }

    pub fn pool_mut(&mut self) -> &mut BlockPool<'a> {
        &mut self.pool
    }

    pub fn delayed(&self) -> &DelayQueue {
        &self.delayed
    }

    pub fn pending(&self) -> IrqPending {
        self.pending
    }

    /// Processes on the ready queue, in dispatch order.
    pub fn ready_queue(&self) -> pq::Iter<'_, 'a> {
        self.ready.iter(&self.procs)
    }

    /// Processes waiting for a memory block, in wake order.
    pub fn blocked_queue(&self) -> pq::Iter<'_, 'a> {
        self.blocked.iter(&self.procs)
    }

    fn running(&self) -> Result<Pid, KernelError> {
        self.current.ok_or(KernelError::NoRunnableProcess)
    }

    fn running_is_interrupt(&self) -> bool {
        self.current
            .and_then(|pid| self.procs.get(pid))
            .is_some_and(|t| t.priority().is_interrupt())
    }

    /// Chooses the next process to run.
    ///
    /// The running process, unless it is blocked or an interrupt process,
    /// goes back on the ready queue first. It goes at the front of its level
    /// when an interrupt is pending, so it picks up where it left off once
    /// the interrupt process is done.
    fn scheduler(&mut self) -> Option<Pid> {
        if let Some(pid) = self.current {
            let task = self.procs.task(pid);
            if !task.priority().is_interrupt() && !task.state().is_blocked() {
                if self.pending.is_empty() {
                    self.ready.push(&mut self.procs, pid);
                } else {
                    self.ready.push_front(&mut self.procs, pid);
                }
            }
        }

        for (flag, pid) in INTERRUPT_PROCESSES {
            if self.pending.contains(flag) {
                self.pending.remove(flag);
                if self.procs.get(pid).is_some() {
                    return Some(pid);
                }
                klog!("no process to service {:?}", flag);
            }
        }

        self.ready.pop_highest(&mut self.procs)
    }

    /// Hands the processor to `self.current`, which the scheduler has just
    /// set, taking it away from `old`.
    fn switch(&mut self, old: Pid) -> Result<Dispatch, KernelError> {
        let next = self.running()?;
        match self.procs.task(next).state() {
            ProcState::New => {
                if old != next && self.procs.task(old).state() != ProcState::New
                {
                    self.park(old);
                }
                self.activate(next);
                Ok(Dispatch::First(next))
            }
            ProcState::Ready | ProcState::Run if next == old => {
                self.procs.task_mut(next).set_state(ProcState::Run);
                Ok(Dispatch::Same)
            }
            ProcState::Ready => {
                self.park(old);
                self.activate(next);
                Ok(Dispatch::Resume(next))
            }
            state => {
                self.current = Some(old);
                Err(KernelError::BadDispatchState { pid: next, state })
            }
        }
    }

    /// Takes the processor away from `pid`. Its registers were saved on
    /// kernel entry; only its state changes here.
    fn park(&mut self, pid: Pid) {
        let task = self.procs.task_mut(pid);
        match task.state() {
            ProcState::Run | ProcState::Ready => {
                task.set_state(ProcState::Ready)
            }
            ProcState::New => klog!("parking process {} that never ran", pid.0),
            ProcState::BlockedOnMemory | ProcState::BlockedOnMessage => (),
        }
    }

    fn activate(&mut self, pid: Pid) {
        let task = self.procs.task_mut(pid);
        task.set_state(ProcState::Run);
        // Safety: the task lives in the process table, which outlives every
        // return to user code, and we don't touch the recorded pointer until
        // the next kernel entry.
        unsafe {
            arch::set_current_task(task);
        }
    }

    /// Gives up the processor: the scheduler picks the next process, which
    /// may be the caller again.
    pub fn release_processor(&mut self) -> Result<Dispatch, KernelError> {
        let old = self.current;
        let Some(next) = self.scheduler() else {
            return Err(KernelError::NoRunnableProcess);
        };
        self.current = Some(next);
        self.switch(old.unwrap_or(next))
    }

    /// Reschedules on behalf of an interrupt. Interrupt processes run to
    /// their own yield point, so when one of them is running this does
    /// nothing; the pending flag is picked up when it yields.
    pub fn preempt(&mut self) -> Result<Dispatch, KernelError> {
        if self.running_is_interrupt() {
            Ok(Dispatch::Same)
        } else {
            self.release_processor()
        }
    }

    /// Records that an interrupt needs its pseudo-process dispatched.
    pub fn pend(&mut self, irq: IrqPending) {
        self.pending |= irq;
    }

    pub fn notify_timer_tick(&mut self) -> Result<Dispatch, KernelError> {
        self.pend(IrqPending::TIMER);
        self.preempt()
    }

    pub fn notify_uart_event(&mut self) -> Result<Dispatch, KernelError> {
        self.pend(IrqPending::UART);
        self.preempt()
    }

    pub fn get_priority(&self, pid: Pid) -> Result<Priority, UsageError> {
        self.procs
            .get(pid)
            .map(Task::priority)
            .ok_or(UsageError::BadPid)
    }

    /// Moves `pid` to `priority`.
    ///
    /// Changing the caller's own priority always yields. Another process is
    /// re-filed on whichever queue it was on, at the back of its new level;
    /// the caller yields only if that process is ready and now outranks it.
    pub fn set_priority(
        &mut self,
        pid: Pid,
        priority: Priority,
    ) -> Result<(), UserError> {
        if !priority.is_user_settable() {
            return Err(UsageError::BadPriority.into());
        }
        let target = self.procs.get(pid).ok_or(UsageError::BadPid)?;
        if target.priority_is_locked() {
            return Err(UsageError::PriorityLocked.into());
        }

        let me = self.running()?;
        if pid == me {
            self.procs.task_mut(pid).set_priority(priority);
            self.release_processor()?;
            return Ok(());
        }

        let was_ready = self.ready.pop_specific(&mut self.procs, pid);
        let was_blocked =
            !was_ready && self.blocked.pop_specific(&mut self.procs, pid);
        self.procs.task_mut(pid).set_priority(priority);
        if was_ready {
            self.ready.push(&mut self.procs, pid);
        } else if was_blocked {
            self.blocked.push(&mut self.procs, pid);
        }

        let mine = self.procs.task(me).priority();
        if was_ready
            && !mine.is_interrupt()
            && priority.is_more_important_than(mine)
        {
            self.release_processor()?;
        }
        Ok(())
    }

    /// Takes a block from the pool. If there are none, parks the caller on
    /// the memory-blocked queue until some process releases one.
    ///
    /// Interrupt processes must use `try_request_block`.
    pub fn request_block(&mut self) -> Result<Block, UserError> {
        if let Some(b) = self.pool.allocate() {
            return Ok(b);
        }
        let me = self.running()?;
        let task = self.procs.task_mut(me);
        uassert!(!task.priority().is_interrupt());
        task.set_state(ProcState::BlockedOnMemory);
        self.blocked.push(&mut self.procs, me);
        self.release_processor()?;
        Err(UserError::WouldBlock)
    }

    /// Takes a block from the pool if one is free. Never blocks.
    pub fn try_request_block(&mut self) -> Option<Block> {
        self.pool.allocate()
    }

    /// Returns a held block to the pool and wakes the most important process
    /// waiting for one. Unless the caller is an interrupt process, it then
    /// yields so the waiter can run if it outranks the caller.
    pub fn release_block(&mut self, b: Block) -> Result<(), UserError> {
        self.pool.release(b)?;
        if let Some(waiter) = self.blocked.pop_highest(&mut self.procs) {
            self.procs.task_mut(waiter).set_state(ProcState::Ready);
            self.ready.push(&mut self.procs, waiter);
            if !self.running_is_interrupt() {
                self.release_processor()?;
            }
        }
        Ok(())
    }

    /// Sends `b` from the running process to `target`.
    pub fn send(&mut self, target: Pid, b: Block) -> Result<(), UserError> {
        let me = self.running()?;
        self.check_send(target, b)?;
        msg::stamp(&mut self.pool, b, me, target);
        self.deliver(target, b)
    }

    fn check_send(&self, target: Pid, b: Block) -> Result<(), UsageError> {
        if self.procs.get(target).is_none() {
            return Err(UsageError::BadPid);
        }
        self.pool.check_held(b)
    }

    /// Puts a stamped block in `target`'s mailbox, waking it if it was
    /// waiting. Yields if that made a process more important than a
    /// non-interrupt caller ready.
    fn deliver(&mut self, target: Pid, b: Block) -> Result<(), UserError> {
        let task = self.procs.task_mut(target);
        task.mailbox_mut().push_back(&mut self.pool, b);
        if task.state() != ProcState::BlockedOnMessage {
            return Ok(());
        }
        task.set_state(ProcState::Ready);
        let theirs = task.priority();
        self.ready.push(&mut self.procs, target);

        let me = self.running()?;
        let mine = self.procs.task(me).priority();
        if !mine.is_interrupt() && theirs.is_more_important_than(mine) {
            self.release_processor()?;
        }
        Ok(())
    }

    /// Sends `b` to `target` once `delay` ticks have passed since `now`. A
    /// zero delay is an ordinary send.
    pub fn delayed_send(
        &mut self,
        target: Pid,
        b: Block,
        delay: u32,
        now: Timestamp,
    ) -> Result<(), UserError> {
        if delay == 0 {
            return self.send(target, b);
        }
        let me = self.running()?;
        self.check_send(target, b)?;
        msg::stamp(&mut self.pool, b, me, target);
        self.delayed.insert(&mut self.pool, b, now.after(delay));
        Ok(())
    }

    /// Takes the oldest message from the caller's mailbox, returning it with
    /// its sender. If there is none, parks the caller until one arrives.
    ///
    /// Interrupt processes must use `try_receive`.
    pub fn receive(&mut self) -> Result<(Block, Pid), UserError> {
        if let Some(received) = self.try_receive()? {
            return Ok(received);
        }
        let me = self.running()?;
        let task = self.procs.task_mut(me);
        uassert!(!task.priority().is_interrupt());
        task.set_state(ProcState::BlockedOnMessage);
        self.release_processor()?;
        Err(UserError::WouldBlock)
    }

    /// Takes the oldest message from the caller's mailbox, if any. Never
    /// blocks.
    pub fn try_receive(&mut self) -> Result<Option<(Block, Pid)>, KernelError> {
        let me = self.running()?;
        let mailbox = self.procs.task_mut(me).mailbox_mut();
        Ok(mailbox
            .pop_front(&mut self.pool)
            .map(|b| (b, self.pool.envelope(b).sender)))
    }

    /// Delivers every delayed message due at or before `now`, earliest
    /// first, as though its original sender sent it now.
    pub fn drain_delayed(&mut self, now: Timestamp) -> Result<(), UserError> {
        while let Some(b) = self.delayed.pop_expired(&mut self.pool, now) {
            let receiver = self.pool.envelope(b).receiver;
            self.deliver(receiver, b)?;
        }
        Ok(())
    }

    /// One activation of the timer interrupt process: deliver what is due,
    /// then give the processor back.
    pub fn service_timer(&mut self, now: Timestamp) -> Result<(), UserError> {
        if self.running()? != Pid::TIMER_IPROC {
            return Err(UsageError::NotTimerProcess.into());
        }
        self.drain_delayed(now)?;
        self.release_processor()?;
        Ok(())
    }

    /// Logs the contents of one of the scheduling queues.
    pub fn log_queue(&self, kind: QueueKind) {
        match kind {
            QueueKind::Ready => {
                klog!("ready queue:");
                for pid in self.ready_queue() {
                    self.log_process(pid);
                }
            }
            QueueKind::BlockedOnMemory => {
                klog!("blocked on memory:");
                for pid in self.blocked_queue() {
                    self.log_process(pid);
                }
            }
            QueueKind::BlockedOnMessage => {
                klog!("blocked on receive:");
                for task in self.procs.iter() {
                    if task.state() == ProcState::BlockedOnMessage {
                        self.log_process(task.pid());
                    }
                }
            }
        }
    }

    fn log_process(&self, pid: Pid) {
        let task = self.procs.task(pid);
        klog!(
            "  pid {} priority {} sp {:#x}",
            pid.0,
            task.priority().0,
            task.save().stack_pointer()
        );
    }

    /// Address a process uses for `b`.
    pub fn addr_of(&self, b: Block) -> u32 {
        self.pool.addr_of(b)
    }

    pub fn block_at(&self, addr: u32) -> Result<Block, UsageError> {
        self.pool.block_at(addr).ok_or(UsageError::BadBlock)
    }
}
