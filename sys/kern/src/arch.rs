// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Architecture-specific support.
//!
//! In practice, this works by
//!
//! - Conditionally defining a nested module (below).
//! - `pub use`-ing its contents
//!
//! so all architecture-specific types and functions show up right here in the
//! `arch` module. Each support module must define the same set of names:
//! `SavedState`, `reinitialize`, `set_current_task`, `start_first_task`,
//! `now`, `set_clock_freq`, and the `klog!` and `uassert!` macros.

cfg_if::cfg_if! {
    if #[cfg(all(target_arch = "arm", target_os = "none"))] {
        #[macro_use]
        pub mod arm_m;
        pub use arm_m::*;
    } else if #[cfg(target_os = "none")] {
        compile_error!("support for this architecture not implemented");
    } else {
        #[macro_use]
        pub mod fake;
        pub use fake::*;
    }
}
