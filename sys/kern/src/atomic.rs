// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Atomic operations the kernel needs beyond plain load and store.

use core::sync::atomic::Ordering;

/// Read-modify-write support for the kernel's entry guard.
///
/// ARMv6-M has no atomic swap instruction, and `core` hides `swap` on such
/// targets. Each `arch` module implements this trait, natively where the
/// instruction exists and with interrupts masked where it doesn't.
pub trait AtomicExt {
    type Primitive;
    fn swap_polyfill(
        &self,
        value: Self::Primitive,
        ordering: Ordering,
    ) -> Self::Primitive;
}
