// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel startup.

use core::mem::MaybeUninit;
use core::ptr::addr_of_mut;
use core::sync::atomic::{AtomicBool, Ordering};

use abi::{ProcessDesc, BLOCK_SIZE, NUM_PROCS};

use crate::atomic::AtomicExt;
use crate::kernel::{Dispatch, Kernel};
use crate::mem::{BlockPool, StackRegion};
use crate::task::Task;

include!(concat!(env!("OUT_DIR"), "/kconfig.rs"));

/// Tracks when a mutable reference to the kernel state is floating around in
/// kernel code, to prevent production of a second one. This forms a sort of
/// ad-hoc Mutex around `KERNEL`.
///
/// Notice that this begins life initialized to `true`. This prevents use of
/// `with_kernel` before the kernel is properly started. We set it to `false`
/// late in `start_kernel`.
static KERNEL_IN_USE: AtomicBool = AtomicBool::new(true);

static mut KERNEL: MaybeUninit<Kernel<'static>> = MaybeUninit::uninit();

static mut TASK_TABLE: [Option<Task>; NUM_PROCS] = [const { None }; NUM_PROCS];

#[repr(C, align(8))]
struct PoolSpace([u8; BLOCK_SIZE * BLOCK_COUNT]);

static mut POOL_SPACE: PoolSpace = PoolSpace([0; BLOCK_SIZE * BLOCK_COUNT]);

#[repr(C, align(8))]
struct StackSpace([u8; STACK_REGION_SIZE]);

static mut STACK_SPACE: StackSpace = StackSpace([0; STACK_REGION_SIZE]);

/// The main kernel entry point.
///
/// We currently expect an application to provide its own `main`-equivalent
/// function, which does basic hardware setup and then calls this function
/// with its process table.
///
/// Parameters:
///
/// - `descs`: one entry per process. Pids not named here stay unused.
/// - `tick_divisor`: a platform-specific way of converting "machine ticks" into
///   "kernel ticks." On ARM M-profile, this is CPU cycles per tick, where a
///   tick is typically a millisecond.
///
/// # Safety
///
/// This function has architecture-specific requirements for safe use -- on ARM,
/// for instance, it must be called from the main (interrupt) stack in
/// privileged mode.
///
/// This function may not be called reentrantly or more than once per boot.
pub unsafe fn start_kernel(
    descs: &'static [ProcessDesc],
    tick_divisor: u32,
) -> ! {
    // Set our clock frequency so debuggers can find it as needed
    unsafe {
        crate::arch::set_clock_freq(tick_divisor);
    }

    // Safety: these references will remain unique so long as the "only called
    // once per boot" contract on this function is upheld.
    let (slots, pool_space, stack_space) = unsafe {
        (
            &mut *addr_of_mut!(TASK_TABLE),
            &mut *addr_of_mut!(POOL_SPACE),
            &mut *addr_of_mut!(STACK_SPACE),
        )
    };

    let pool = BlockPool::new(&mut pool_space.0, BLOCK_SIZE);
    let mut stacks = StackRegion::new(
        stack_space.0.as_mut_ptr() as usize as u32,
        STACK_REGION_SIZE as u32,
    );
    let mut kernel = match Kernel::new(slots, pool, &mut stacks, descs) {
        Ok(kernel) => kernel,
        Err(e) => {
            klog!("bad process table: {:?}", e);
            panic!("{:?}", e);
        }
    };

    // Great! Pick our first process.
    let first = match kernel.start() {
        Ok(Dispatch::First(pid)) => pid,
        other => {
            klog!("could not pick a first process: {:?}", other);
            panic!();
        }
    };

    // Safety: nothing else has a reference to KERNEL, since KERNEL_IN_USE is
    // still set.
    let kernel = unsafe { (*addr_of_mut!(KERNEL)).write(kernel) };
    let Some(task) = kernel.task(first) else {
        panic!();
    };

    KERNEL_IN_USE.store(false, Ordering::Release);

    crate::arch::start_first_task(tick_divisor, task)
}

/// Runs `body` with a reference to the kernel state.
///
/// To preserve uniqueness of the `&mut` reference passed into `body`, this
/// function will detect any attempts to call it recursively and panic.
pub(crate) fn with_kernel<R>(body: impl FnOnce(&mut Kernel<'static>) -> R) -> R {
    if KERNEL_IN_USE.swap_polyfill(true, Ordering::Acquire) {
        panic!(); // recursive use of with_kernel
    }

    // Safety: we have observed `KERNEL_IN_USE` being false, which means the
    // kernel state is initialized (note that at reset it starts out true) and
    // that we're not already within a call to with_kernel. Thus, we can
    // produce a reference to it without aliasing.
    let kernel = unsafe { (*addr_of_mut!(KERNEL)).assume_init_mut() };

    let r = body(kernel);

    KERNEL_IN_USE.store(false, Ordering::Release);
    r
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic]
    fn kernel_is_off_limits_before_start() {
        with_kernel(|_| ());
    }

    #[test]
    fn static_pool_fits_the_configuration() {
        assert_eq!(core::mem::align_of::<PoolSpace>(), 8);
        assert_eq!(
            core::mem::size_of::<PoolSpace>(),
            BLOCK_SIZE * BLOCK_COUNT
        );
        assert!(BLOCK_COUNT >= 1);
        assert_eq!(STACK_REGION_SIZE % 8, 0);
    }
}
