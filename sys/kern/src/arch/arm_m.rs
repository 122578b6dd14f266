// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Architecture support for ARMv{6,7,8}-M.
//!
//! # ARM-M timer
//!
//! We use the system tick timer as the kernel timer, but it's only suitable for
//! producing periodic interrupts -- its counter is small and only counts down.
//! So, at each SysTick interrupt, we increment the `TICKS` global that contains
//! the real kernel timestamp, and pend the timer interrupt process.
//!
//! # Notes on ARM-M interrupts
//!
//! Three exception handlers make up the kernel's entry points:
//!
//! - `SVCall` implements the `SVC` instruction used to make syscalls.
//! - `SysTick` handles interrupts from the System Tick Timer.
//! - `PendSV` handles deferred context switches from interrupts.
//!
//! On any interrupt, the processor stacks `r0`-`r3`, `r12`, `lr`, `pc` and
//! `xpsr` on the interrupted process's stack and calls our ISR with the C
//! calling convention. That's enough to come back to the same code, but not
//! to switch to a different process, and it leaves the syscall argument
//! registers (`r4` and up) somewhere we can't get at them.
//!
//! So `SVCall` and `PendSV` deposit all remaining user state into the
//! current `Task` before calling into Rust, and on the way out load it back
//! from whichever `Task` is current by then. `SysTick` and device interrupts
//! don't pay for that: they record what happened and set `PendSV` pending,
//! which runs as soon as they return and does the switch.
//!
//! A process that has never run has a synthesized exception frame on its
//! stack and a `SavedState` shaped exactly like one the save path writes, so
//! its first dispatch goes through the same exception return as any other.

use core::arch::{self, global_asm};
use core::sync::atomic::{AtomicBool, AtomicPtr, AtomicU32, Ordering};

use crate::atomic::AtomicExt;
use crate::kernel::IrqPending;
use crate::startup::with_kernel;
use crate::task;
use crate::time::Timestamp;

macro_rules! uassert {
    ($cond : expr) => {
        if !$cond {
            panic!("Assertion failed!");
        }
    };
}

cfg_if::cfg_if! {
    if #[cfg(feature = "klog-itm")] {
        macro_rules! klog {
            ($s:expr) => {
                unsafe {
                    let stim = &mut (*cortex_m::peripheral::ITM::PTR).stim[0];
                    cortex_m::iprintln!(stim, $s);
                }
            };
            ($s:expr, $($tt:tt)*) => {
                unsafe {
                    let stim = &mut (*cortex_m::peripheral::ITM::PTR).stim[0];
                    cortex_m::iprintln!(stim, $s, $($tt)*);
                }
            };
        }
    } else if #[cfg(feature = "klog-semihosting")] {
        macro_rules! klog {
            ($s:expr) => {
                { let _ = cortex_m_semihosting::hprintln!($s); }
            };
            ($s:expr, $($tt:tt)*) => {
                { let _ = cortex_m_semihosting::hprintln!($s, $($tt)*); }
            };
        }
    } else {
        macro_rules! klog {
            ($s:expr) => {
                { let _ = $s; }
            };
            ($s:expr, $($x:expr),*$(,)?) => {
                {
                    $(
                        let _ = &$x;
                    )*
                }
            };
        }
    }
}

/// On ARMvx-M we have to use a global to record the current task pointer, since
/// we don't have a scratch register.
#[no_mangle]
static CURRENT_TASK_PTR: AtomicPtr<task::Task> =
    AtomicPtr::new(core::ptr::null_mut());

/// To allow our clock frequency to be easily determined from a debugger, we
/// store it in memory.
#[no_mangle]
static CLOCK_FREQ_KHZ: AtomicU32 = AtomicU32::new(0);

/// ARMvx-M volatile registers that must be saved across context switches.
#[repr(C)]
#[derive(Debug, Default)]
pub struct SavedState {
    // NOTE: the following fields must be kept contiguous!
    r4: u32,
    r5: u32,
    r6: u32,
    r7: u32,
    r8: u32,
    r9: u32,
    r10: u32,
    r11: u32,
    psp: u32,
    exc_return: u32,

    #[cfg(any(armv7m, armv8m))]
    fpu: [u32; 16],
    // NOTE: the above fields must be kept contiguous!
}

/// Map the volatile registers to (architecture-independent) syscall argument
/// and return slots.
impl task::ArchState for SavedState {
    fn stack_pointer(&self) -> u32 {
        self.psp
    }

    fn arg0(&self) -> u32 {
        self.r4
    }
    fn arg1(&self) -> u32 {
        self.r5
    }
    fn arg2(&self) -> u32 {
        self.r6
    }

    /// Response code.
    fn ret0(&mut self, x: u32) {
        self.r4 = x
    }
    /// Response value.
    fn ret1(&mut self, x: u32) {
        self.r5 = x
    }
}

/// Stuff placed on the stack at exception entry whether or not an FPU is
/// present.
#[allow(dead_code)] // read by the hardware on exception return
#[derive(Debug, Default)]
#[repr(C)]
pub struct BaseExceptionFrame {
    r0: u32,
    r1: u32,
    r2: u32,
    r3: u32,
    r12: u32,
    lr: u32,
    pc: u32,
    xpsr: u32,
}

cfg_if::cfg_if! {
    if #[cfg(any(armv7m, armv8m))] {
        /// Extended version for FPU.
        #[allow(dead_code)]
        #[derive(Debug, Default)]
        #[repr(C)]
        pub struct ExtendedExceptionFrame {
            base: BaseExceptionFrame,
            fpu_regs: [u32; 16],
            fpscr: u32,
            reserved: u32,
        }
    } else if #[cfg(armv6m)] {
        /// Wee version for non-FPU.
        #[allow(dead_code)]
        #[derive(Debug, Default)]
        #[repr(C)]
        pub struct ExtendedExceptionFrame {
            base: BaseExceptionFrame,
        }
    } else {
        compile_error!("unknown M-profile");
    }
}

// Stacks are carved with room for the largest frame.
static_assertions::const_assert!(
    core::mem::size_of::<ExtendedExceptionFrame>()
        <= crate::mem::FRAME_RESERVE as usize
);

/// Initially we just set the Thumb Mode bit, the minimum required.
const INITIAL_PSR: u32 = 1 << 24;

/// We don't really care about the initial FPU mode; 0 is reasonable.
#[cfg(any(armv7m, armv8m))]
const INITIAL_FPSCR: u32 = 0;

/// Return to Thread mode on the process stack. On parts with an FPU, bit 4 is
/// clear, which makes the processor expect the extended frame that
/// `reinitialize` lays down. TrustZone is assumed to be off.
#[cfg(any(armv7m, armv8m))]
const EXC_RETURN_CONST: u32 = 0xFFFFFFED;
#[cfg(armv6m)]
const EXC_RETURN_CONST: u32 = 0xFFFFFFFD;

// Because debuggers need to know the clock frequency to set the SWO clock
// scaler that enables ITM, and because ITM is particularly useful when
// debugging boot failures, this should be set as early in boot as it can
// be.
pub unsafe fn set_clock_freq(tick_divisor: u32) {
    CLOCK_FREQ_KHZ.store(tick_divisor, Ordering::Relaxed);
}

/// Lays down the exception frame a process starts from and points its saved
/// state at it.
pub fn reinitialize(task: &mut task::Task) {
    *task.save_mut() = SavedState::default();
    let initial_stack = task.initial_stack() as usize;

    // Modern ARMvX-M machines require 8-byte stack alignment. Make sure that's
    // still true.
    uassert!(initial_stack & 0x7 == 0);

    let frame_size = core::mem::size_of::<ExtendedExceptionFrame>();
    uassert!(initial_stack >= frame_size);
    let frame_addr = initial_stack - frame_size;

    let mut frame = ExtendedExceptionFrame::default();
    frame.base.pc = task.entry_point() | 1; // for thumb
    frame.base.xpsr = INITIAL_PSR;
    frame.base.lr = 0xFFFF_FFFF; // trap on return from the process body
    #[cfg(any(armv7m, armv8m))]
    {
        frame.fpscr = INITIAL_FPSCR;
    }

    // Safety: the stack was carved from the kernel's stack region with room
    // for this frame below `initial_stack`, and no process is running on it
    // yet.
    unsafe {
        core::ptr::write_volatile(
            frame_addr as *mut ExtendedExceptionFrame,
            frame,
        );
    }

    // Set the initial stack pointer, *not* to the stack top, but to the base of
    // this frame.
    task.save_mut().psp = frame_addr as u32;
    task.save_mut().exc_return = EXC_RETURN_CONST;
}

pub fn start_first_task(tick_divisor: u32, task: &task::Task) -> ! {
    // Set exception priorities. Our goal here is to keep the kernel
    // non-preemptive, which means the kernel entry points (SVCall, PendSV,
    // SysTick, interrupt handlers) must be at one priority level.
    //
    // Safety: this is actually fairly safe. We're purely lowering priorities
    // from their defaults, so it can't cause any surprise preemption or
    // anything. But these operations are `unsafe` in the `cortex_m` crate.
    unsafe {
        let scb = &*cortex_m::peripheral::SCB::PTR;
        cfg_if::cfg_if! {
            if #[cfg(armv6m)] {
                // ARMv6 only has 4 priority levels. Set priorities of SVCall,
                // SysTick and PendSV to 3 (the lowest configurable).
                scb.shpr[0].modify(|x| x | 0b11 << 30);
                scb.shpr[1].modify(|x| x | 0b11 << 22 | 0b11 << 30);
            } else if #[cfg(any(armv7m, armv8m))] {
                // Set priority of SVCall to 0xFF (lowest configurable).
                scb.shpr[7].write(0xFF);
                // SysTick and PendSV also to 0xFF
                scb.shpr[10].write(0xFF);
                scb.shpr[11].write(0xFF);
            } else {
                compile_error!("missing exception priorities for ARM profile");
            }
        }

        // Configure the priority of all external interrupts so that they can't
        // preempt the kernel.
        let nvic = &*cortex_m::peripheral::NVIC::PTR;

        cfg_if::cfg_if! {
            if #[cfg(armv6m)] {
                // On ARMv6 there are 8 IPR registers, each containing 4
                // interrupt priorities. Only bits[7:6] of each are
                // implemented, so writing all ones gives every interrupt the
                // lowest priority.
                for i in 0..8 {
                    nvic.ipr[i].write(0xFFFF_FFFF);
                }
            } else if #[cfg(any(armv7m, armv8m))] {
                // The interrupt count lives in ICTR, in blocks of 32, minus 1.
                let icb = &*cortex_m::peripheral::ICB::PTR;
                let ictr = icb.ictr.read();
                let irq_count = ((ictr as usize & 0xF) + 1) * 32;
                for i in 0..irq_count {
                    nvic.ipr[i].write(0xFFu8);
                }
            } else {
                compile_error!("missing IRQ priorities for ARM profile");
            }
        }
    }

    // Safety: this, too, is safe in practice but unsafe in API.
    unsafe {
        // Configure the timer.
        let syst = &*cortex_m::peripheral::SYST::PTR;
        // Program reload value.
        syst.rvr.write(tick_divisor - 1);
        // Clear current value.
        syst.cvr.write(0);
        // Enable counter and interrupt.
        syst.csr.modify(|v| v | 0b111);
    }

    CURRENT_TASK_PTR.store(task as *const _ as *mut _, Ordering::Relaxed);

    // Safety: this is setting the Process (task) stack pointer, which has no
    // effect _assuming_ this code is running on the Main (kernel) stack.
    unsafe {
        cortex_m::register::psp::write(task.save().psp);
    }

    // Our basic goal here is to flip into Handler mode (i.e. interrupt state)
    // so that we can switch Thread mode (not-interrupt state) to unprivileged
    // and running off the Process Stack Pointer. The easiest way to do this on
    // ARM-M is by entering Handler mode by a trap. We use SVC, which we also
    // use for system calls; the SVC entry sequence (also in this file) has code
    // to detect this condition and do kernel startup rather than processing it
    // as a syscall.
    cfg_if::cfg_if! {
        if #[cfg(armv6m)] {
            unsafe {
                arch::asm!("
                    @ restore the callee-save registers
                    ldm r0!, {{r4-r7}}
                    ldm r0, {{r0-r3}}
                    mov r11, r3
                    mov r10, r2
                    mov r9, r1
                    mov r8, r0
                    @ Trap into the kernel.
                    svc #0xFF
                    @ noreturn generates a UDF here in case that should return.
                    ",
                    in("r0") &task.save().r4,
                    options(noreturn),
                )
            }
        } else if #[cfg(any(armv7m, armv8m))] {
            unsafe {
                arch::asm!("
                    @ Restore callee-save registers.
                    ldm {task}, {{r4-r11}}
                    @ Trap into the kernel.
                    svc #0xFF
                    @ noreturn generates a UDF here in case that should return.
                    ",
                    task = in(reg) &task.save().r4,
                    options(noreturn),
                )
            }
        } else {
            compile_error!("missing kernel bootstrap sequence for ARM profile");
        }
    }
}

// Handler that gets linked into the vector table for the Supervisor Call (SVC)
// instruction. (Name is dictated by the `cortex_m` crate.)
//
// First, we inspect LR, which on exception entry contains bits describing the
// _previous_ (interrupted) processor state. We can use this to detect if the
// SVC came from the Main (interrupt) stack. This only happens once, during
// startup, so we vector to a different routine in this case.
//
// We then store the calling process's context into its `Task`, call into
// `syscall_entry`, and restore context (possibly for a different process!).
cfg_if::cfg_if! {
    if #[cfg(armv6m)] {
        global_asm!{"
            .section .text.SVCall
            .globl SVCall
            .type SVCall,function
            SVCall:
                @ Inspect LR to figure out the caller's mode.
                mov r0, lr
                ldr r1, =0xFFFFFFF3
                bics r0, r0, r1
                @ Is the call coming from thread mode + main stack, i.e.
                @ from the kernel startup routine?
                cmp r0, #0x8
                @ If so, this is startup; jump ahead.
                beq 1f

                @ store volatile state.
                @ first, get a pointer to the current task.
                ldr r0, =CURRENT_TASK_PTR
                ldr r1, [r0]
                @ now, store volatile registers, plus the PSP, plus LR.
                movs r2, r1
                stm r2!, {{r4-r7}}
                mov r4, r8
                mov r5, r9
                mov r6, r10
                mov r7, r11
                stm r2!, {{r4-r7}}
                mrs r4, PSP
                mov r5, lr
                stm r2!, {{r4, r5}}

                @ syscall number is passed in r11. Move it into r0 to pass
                @ it as an argument to the handler, then call the handler.
                mov r0, r11
                bl syscall_entry

                @ we're returning back to *some* process, maybe not the same
                @ one.
                ldr r0, =CURRENT_TASK_PTR
                ldr r0, [r0]
                @ restore volatile registers, plus PSP. We will do this in
                @ slightly reversed order for efficiency. First, do the high
                @ ones.
                movs r1, r0
                adds r1, r1, #(4 * 4)
                ldm r1!, {{r4-r7}}
                mov r11, r7
                mov r10, r6
                mov r9, r5
                mov r8, r4
                ldm r1!, {{r4, r5}}
                msr PSP, r4
                mov lr, r5

                @ Now that we no longer need r4-r7 as temporary registers,
                @ restore them too.
                ldm r0!, {{r4-r7}}

                @ resume
                bx lr

            1:  @ starting up the first process.
                @ Drop privilege in Thread mode.
                movs r0, #1
                msr CONTROL, r0
                @ note: no barrier here because exc return serves as barrier

                @ Manufacture a new EXC_RETURN to change the processor mode
                @ when we return.
                ldr r0, ={exc_return}
                mov lr, r0
                bx lr                   @ branch into user mode
        ",
        exc_return = const EXC_RETURN_CONST,
        }
    } else if #[cfg(any(armv7m, armv8m))] {
        global_asm!{"
            .section .text.SVCall
            .globl SVCall
            .type SVCall,function
            SVCall:
                @ Inspect LR to figure out the caller's mode.
                mov r0, lr
                mov r1, #0xFFFFFFF3
                bic r0, r1
                @ Is the call coming from thread mode + main stack, i.e.
                @ from the kernel startup routine?
                cmp r0, #0x8
                @ If so, this is startup; jump ahead.
                beq 1f

                @ store volatile state.
                @ first, get a pointer to the current task.
                movw r0, #:lower16:CURRENT_TASK_PTR
                movt r0, #:upper16:CURRENT_TASK_PTR
                ldr r1, [r0]
                movs r2, r1
                @ fetch the process-mode stack pointer.
                @ fetching into r12 means the order in the stm below is right.
                mrs r12, PSP
                @ now, store volatile registers, plus the PSP in r12, plus LR.
                stm r2!, {{r4-r12, lr}}
                vstm r2, {{s16-s31}}

                @ syscall number is passed in r11. Move it into r0 to pass it as
                @ an argument to the handler, then call the handler.
                movs r0, r11
                bl syscall_entry

                @ we're returning back to *some* process, maybe not the same
                @ one.
                movw r0, #:lower16:CURRENT_TASK_PTR
                movt r0, #:upper16:CURRENT_TASK_PTR
                ldr r0, [r0]
                @ restore volatile registers, plus load PSP into r12
                ldm r0!, {{r4-r12, lr}}
                vldm r0, {{s16-s31}}
                msr PSP, r12

                @ resume
                bx lr

            1:  @ starting up the first process.
                movs r0, #1         @ get bitmask to...
                msr CONTROL, r0     @ ...shed privs from thread mode.
                                    @ note: no barrier here because exc return
                                    @ serves as barrier

                mov lr, {exc_return}    @ materialize EXC_RETURN value to
                                        @ return into thread mode, PSP, FP on

                bx lr                   @ branch into user mode
            ",
            exc_return = const EXC_RETURN_CONST,
        }
    } else {
        compile_error!("missing SVCall impl for ARM profile.");
    }
}

/// Records the address of `task` as the current user task.
///
/// # Safety
///
/// This records a pointer that aliases `task`. As long as you don't read that
/// pointer while you have access to `task`, and as long as the `task` being
/// stored is actually in the process table, you'll be okay.
pub unsafe fn set_current_task(task: &task::Task) {
    CURRENT_TASK_PTR.store(task as *const _ as *mut _, Ordering::Relaxed);
}

/// Reads the tick counter.
pub fn now() -> Timestamp {
    // Recall that we expect the systick interrupt cannot preempt kernel code,
    // so we're safe to read this in two nonatomic parts here.
    Timestamp::from([
        TICKS[0].load(Ordering::Relaxed),
        TICKS[1].load(Ordering::Relaxed),
    ])
}

/// Kernel global for tracking the current timestamp, measured in ticks.
///
/// This is a pair of `AtomicU32` because (1) we want the interior mutability of
/// the atomic types but (2) ARMv7-M doesn't have any 64-bit atomic operations.
/// We access this only from contexts where we can't be preempted, so, the fact
/// that it's split across two words is ok.
///
/// `TICKS[0]` is the least significant part, `TICKS[1]` the most significant.
static TICKS: [AtomicU32; 2] = [AtomicU32::new(0), AtomicU32::new(0)];

/// Handler that gets linked into the vector table for the System Tick Timer
/// overflow interrupt. (Name is dictated by the `cortex_m` crate.)
#[allow(non_snake_case)]
#[no_mangle]
pub unsafe extern "C" fn SysTick() {
    // Advance the kernel's notion of time by adding 1. Laboriously.
    let t0 = TICKS[0].load(Ordering::Relaxed);
    if let Some(t0p) = t0.checked_add(1) {
        TICKS[0].store(t0p, Ordering::Relaxed);
    } else {
        // The low word rolled over; carry into the high word, which can't
        // overflow in the life of the part.
        let t1 = TICKS[1].load(Ordering::Relaxed);
        TICKS[0].store(0, Ordering::Relaxed);
        TICKS[1].store(t1 + 1, Ordering::Relaxed);
    }

    // The timer interrupt process does the work, which may include waking
    // someone; that needs the full save sequence, so defer to PendSV.
    with_kernel(|k| k.pend(IrqPending::TIMER));
    pend_context_switch_from_isr();
}

/// Hook for a board's UART interrupt handler: pends the UART interrupt
/// process, which runs as soon as the handler returns.
///
/// The handler must run at the kernel's exception priority, which
/// `start_first_task` gives every external interrupt.
pub fn uart_event_from_isr() {
    with_kernel(|k| k.pend(IrqPending::UART));
    pend_context_switch_from_isr();
}

fn pend_context_switch_from_isr() {
    // This sets the bit to pend a PendSV interrupt. PendSV will happen after
    // the current ISR (and any chained ISRs) returns, and perform the context
    // switch.
    cortex_m::peripheral::SCB::set_pendsv();
}

cfg_if::cfg_if! {
    if #[cfg(armv6m)] {
        global_asm!{"
            .section .text.PendSV
            .globl PendSV
            .type PendSV,function
            PendSV:
                @ store volatile state.
                @ first, get a pointer to the current task.
                ldr r0, =CURRENT_TASK_PTR
                ldr r1, [r0]
                @ now, store volatile registers, plus the PSP, plus LR.
                stm r1!, {{r4-r7}}
                mov r4, r8
                mov r5, r9
                mov r6, r10
                mov r7, r11
                stm r1!, {{r4-r7}}
                mrs r4, PSP
                mov r5, lr
                stm r1!, {{r4, r5}}

                bl pendsv_entry

                @ we're returning back to *some* process, maybe not the same
                @ one.
                ldr r0, =CURRENT_TASK_PTR
                ldr r0, [r0]
                @ restore volatile registers, plus PSP. We will do this in
                @ slightly reversed order for efficiency. First, do the high
                @ ones.
                movs r1, r0
                adds r1, r1, #(4 * 4)
                ldm r1!, {{r4-r7}}
                mov r11, r7
                mov r10, r6
                mov r9, r5
                mov r8, r4
                ldm r1!, {{r4, r5}}
                msr PSP, r4
                mov lr, r5

                @ Now that we no longer need r4-r7 as temporary registers,
                @ restore them too.
                ldm r0!, {{r4-r7}}

                @ resume
                bx lr
            ",
        }
    } else if #[cfg(any(armv7m, armv8m))] {
        global_asm!{"
            .section .text.PendSV
            .globl PendSV
            .type PendSV,function
            PendSV:
                @ store volatile state.
                @ first, get a pointer to the current task.
                movw r0, #:lower16:CURRENT_TASK_PTR
                movt r0, #:upper16:CURRENT_TASK_PTR
                ldr r1, [r0]
                @ fetch the process-mode stack pointer.
                @ fetching into r12 means the order in the stm below is right.
                mrs r12, PSP
                @ now, store volatile registers, plus the PSP in r12, plus LR.
                stm r1!, {{r4-r12, lr}}
                vstm r1, {{s16-s31}}

                bl pendsv_entry

                @ we're returning back to *some* process, maybe not the same
                @ one.
                movw r0, #:lower16:CURRENT_TASK_PTR
                movt r0, #:upper16:CURRENT_TASK_PTR
                ldr r0, [r0]
                @ restore volatile registers, plus load PSP into r12
                ldm r0!, {{r4-r12, lr}}
                vldm r0, {{s16-s31}}
                msr PSP, r12

                @ resume
                bx lr
            ",
        }
    } else {
        compile_error!("missing PendSV impl for ARM profile.");
    }
}

/// The Rust side of the PendSV handler, after all volatile registers have been
/// saved somewhere predictable.
#[no_mangle]
unsafe extern "C" fn pendsv_entry() {
    // irq before kernel started?
    uassert!(!CURRENT_TASK_PTR.load(Ordering::Relaxed).is_null());

    with_kernel(|k| {
        if let Err(e) = k.preempt() {
            klog!("kernel failure in PendSV: {:?}", e);
            panic!("{:?}", e);
        }
    });
}

cfg_if::cfg_if! {
    if #[cfg(armv6m)] {
        // The ARMv6M atomic operations are implemented by disabling interrupts
        // globally. In a normal configuration the kernel arranges priorities so
        // that it's never preempted, making this moot. However, it's entirely
        // possible for an application to adjust interrupt priorities to support
        // custom low-latency interrupt service routines that don't go through
        // the kernel; disabling interrupts here ensures that we remain correct
        // in the presence of such code.

        impl AtomicExt for AtomicBool {
            type Primitive = bool;

            #[inline(never)]
            fn swap_polyfill(&self, value: Self::Primitive, ordering: Ordering)
                -> Self::Primitive
            {
                let (lo, so) = rmw_ordering(ordering);
                cortex_m::interrupt::free(|_| {
                    let prev = self.load(lo);
                    self.store(value, so);
                    prev
                })
            }
        }

        /// Translates an ordering suppled to a read-modify-write operation into
        /// the distinct orderings implied for its load and store phases,
        /// respectively.
        #[inline(always)]
        fn rmw_ordering(o: Ordering) -> (Ordering, Ordering) {
            match o {
                Ordering::AcqRel => (Ordering::Acquire, Ordering::Release),
                Ordering::Relaxed => (o, o),
                Ordering::SeqCst => (o, o),
                Ordering::Acquire => (Ordering::Acquire, Ordering::Relaxed),
                Ordering::Release => (Ordering::Relaxed, Ordering::Release),
                // Other orderings are not suitable for RMW operations.
                _ => panic!(),
            }
        }
    } else {
        impl AtomicExt for AtomicBool {
            type Primitive = bool;

            #[inline(always)]
            fn swap_polyfill(&self, value: Self::Primitive, ordering: Ordering)
                -> Self::Primitive
            {
                self.swap(value, ordering)
            }
        }
    }
}
