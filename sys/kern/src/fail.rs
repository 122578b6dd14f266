// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Recording of kernel failures where a debugger can find them.
//!
//! Two symbols make up the interface to tools:
//!
//! - `KERNEL_HAS_FAILED` is a `bool`, false from boot and set to true once the
//!   kernel reaches `die`, usually by way of a panic.
//!
//! - `KERNEL_EPITAPH` is a `u8` array holding as much of the failure message
//!   as fits, as UTF-8, padded with NULs.
//!
//! Broken invariants in the kernel (`KernelError`) end up here: the entry
//! point that receives one logs it and panics.

use core::fmt::{Display, Write};
use core::sync::atomic::Ordering;

#[used]
static mut KERNEL_HAS_FAILED: bool = false;

const EPITAPH_LEN: usize = 128;

#[used]
static mut KERNEL_EPITAPH: [u8; EPITAPH_LEN] = [0; EPITAPH_LEN];

fn begin_epitaph() -> &'static mut [u8; EPITAPH_LEN] {
    // ARMv6-M has no atomic swap, so this is a plain read-and-set. It only
    // runs on the way down, with nothing left to race against.
    //
    // Safety: see above; there is one caller.
    let previous_fail = unsafe {
        core::ptr::replace(core::ptr::addr_of_mut!(KERNEL_HAS_FAILED), true)
    };
    if previous_fail {
        // Panicked while dying. Writing more could only make it worse.
        spin();
    }

    // Safety: only the first caller gets past the flag above.
    unsafe { &mut *core::ptr::addr_of_mut!(KERNEL_EPITAPH) }
}

fn spin() -> ! {
    loop {
        core::sync::atomic::fence(Ordering::SeqCst);
    }
}

/// Records `msg` and stops the kernel for good.
#[inline(never)]
pub fn die(msg: &dyn Display) -> ! {
    let mut writer = Eulogist {
        dest: begin_epitaph(),
    };
    write!(writer, "{msg}").ok();
    spin()
}

/// Writes into a byte buffer, dropping whatever doesn't fit.
struct Eulogist<'a> {
    dest: &'a mut [u8],
}

impl Write for Eulogist<'_> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let s = s.as_bytes();
        let n = s.len().min(self.dest.len());
        let (dest, leftovers) = core::mem::take(&mut self.dest).split_at_mut(n);
        dest.copy_from_slice(&s[..n]);
        self.dest = leftovers;
        Ok(())
    }
}

#[cfg(target_os = "none")]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo<'_>) -> ! {
    klog!("kernel panic: {}", info);
    die(info)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epitaph_truncates() {
        let mut buf = [0u8; 8];
        let mut w = Eulogist { dest: &mut buf };
        write!(w, "{}: {:?}", "fatal", crate::err::KernelError::NoRunnableProcess)
            .unwrap();
        assert_eq!(&buf, b"fatal: N");
    }

    #[test]
    fn short_messages_leave_padding() {
        let mut buf = [0u8; 8];
        let mut w = Eulogist { dest: &mut buf };
        write!(w, "ab").unwrap();
        write!(w, "c").unwrap();
        assert_eq!(&buf, b"abc\0\0\0\0\0");
    }
}
