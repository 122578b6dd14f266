// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Host stand-in for the hardware layer.
//!
//! There are no registers to save and no exception return here. The saved
//! state is a plain record of syscall arguments and responses plus the
//! synthesized entry point and stack pointer, so tests can drive the syscall
//! layer and check what a process would observe on resumption. The "current
//! task" and the tick counter are thread-local so tests running in parallel
//! don't see each other.

use core::cell::Cell;
use core::sync::atomic::{AtomicBool, Ordering};

use abi::Pid;

use crate::task;
use crate::time::Timestamp;

macro_rules! uassert {
    ($cond:expr) => {
        assert!($cond)
    };
}

macro_rules! klog {
    ($s:expr) => {
        std::eprintln!($s)
    };
    ($s:expr, $($tt:tt)*) => {
        std::eprintln!($s, $($tt)*)
    };
}

#[derive(Debug, Default)]
pub struct SavedState {
    args: [u32; 3],
    rets: [u32; 2],
    sp: u32,
    pc: u32,
}

impl SavedState {
    /// Loads the argument registers the way a process's syscall stub would.
    pub fn set_args(&mut self, args: [u32; 3]) {
        self.args = args;
    }

    /// Returns the `(code, value)` pair the process would see on return.
    pub fn response(&self) -> (u32, u32) {
        (self.rets[0], self.rets[1])
    }

    pub fn initial_pc(&self) -> u32 {
        self.pc
    }
}

impl task::ArchState for SavedState {
    fn stack_pointer(&self) -> u32 {
        self.sp
    }

    fn arg0(&self) -> u32 {
        self.args[0]
    }
    fn arg1(&self) -> u32 {
        self.args[1]
    }
    fn arg2(&self) -> u32 {
        self.args[2]
    }

    fn ret0(&mut self, x: u32) {
        self.rets[0] = x;
    }
    fn ret1(&mut self, x: u32) {
        self.rets[1] = x;
    }
}

std::thread_local! {
    static CURRENT: Cell<Option<Pid>> = const { Cell::new(None) };
    static TICKS: Cell<u64> = const { Cell::new(0) };
}

pub unsafe fn set_clock_freq(_tick_divisor: u32) {}

/// Records the initial context. No memory is touched: the stack addresses
/// handed out on the host are not real.
pub fn reinitialize(task: &mut task::Task) {
    *task.save_mut() = SavedState::default();
    let initial_stack = task.initial_stack();
    uassert!(initial_stack & 0x7 == 0);
    task.save_mut().sp = initial_stack;
    task.save_mut().pc = task.entry_point() | 1;
}

pub unsafe fn set_current_task(task: &task::Task) {
    CURRENT.with(|c| c.set(Some(task.pid())));
}

/// The process most recently handed to `set_current_task` on this thread.
pub fn current_task() -> Option<Pid> {
    CURRENT.with(|c| c.get())
}

pub fn start_first_task(_tick_divisor: u32, _task: &task::Task) -> ! {
    panic!("entering userland");
}

pub fn now() -> Timestamp {
    Timestamp::from(TICKS.with(|t| t.get()))
}

/// Moves simulated time forward by `ticks`.
pub fn advance_ticks(ticks: u64) {
    TICKS.with(|t| t.set(t.get() + ticks));
}

impl crate::atomic::AtomicExt for AtomicBool {
    type Primitive = bool;

    fn swap_polyfill(
        &self,
        value: Self::Primitive,
        ordering: Ordering,
    ) -> Self::Primitive {
        self.swap(value, ordering)
    }
}
