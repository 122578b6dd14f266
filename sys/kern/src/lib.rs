// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! RTX kernel.
//!
//! A preemptive, priority-based kernel for a single-core Cortex-M part. The
//! process set is fixed at boot. Processes share a pool of fixed-size memory
//! blocks, exchange messages carried in those blocks, and can schedule a
//! message for delivery some number of ticks in the future.
//!
//! Everything outside `arch` is portable and runs on the host, which is how
//! the unit tests exercise it; `arch::fake` stands in for the hardware there.
//!
//! # Design principles
//!
//! 1. All mutable kernel state lives in one `kernel::Kernel` value. Kernel
//!    entry points borrow it through `startup::with_kernel`, which refuses to
//!    be re-entered.
//! 2. Static configuration: the process table is supplied at boot and the
//!    pool and stack sizes are fixed at build time (see `build.rs`).
//! 3. Intrusive queues are index-based. Processes and blocks are linked by
//!    pid and block index, never by pointer, and each carries a record of the
//!    one queue it is on.

#![cfg_attr(target_os = "none", no_std)]

#[macro_use]
pub mod arch;

pub mod atomic;
pub mod delay;
pub mod err;
pub mod fail;
pub mod kernel;
pub mod mem;
pub mod msg;
pub mod pq;
pub mod startup;
pub mod syscalls;
pub mod task;
pub mod time;

#[cfg(all(target_arch = "arm", target_os = "none"))]
pub use arch::uart_event_from_isr;
