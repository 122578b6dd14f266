// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#[cfg(all(feature = "log-itm", target_os = "none"))]
#[doc(hidden)]
pub use cortex_m;
#[cfg(all(feature = "log-semihosting", target_os = "none"))]
#[doc(hidden)]
pub use cortex_m_semihosting;

cfg_if::cfg_if! {
    if #[cfg(not(target_os = "none"))] {
        #[macro_export]
        macro_rules! sys_log {
            ($s:expr) => {
                std::eprintln!($s)
            };
            ($s:expr, $($tt:tt)*) => {
                std::eprintln!($s, $($tt)*)
            };
        }
    } else if #[cfg(feature = "log-itm")] {
        #[macro_export]
        macro_rules! sys_log {
            ($s:expr) => {
                unsafe {
                    let stim = &mut (*$crate::macros::cortex_m::peripheral::ITM::PTR).stim[1];
                    $crate::macros::cortex_m::iprintln!(stim, $s);
                }
            };
            ($s:expr, $($tt:tt)*) => {
                unsafe {
                    let stim = &mut (*$crate::macros::cortex_m::peripheral::ITM::PTR).stim[1];
                    $crate::macros::cortex_m::iprintln!(stim, $s, $($tt)*);
                }
            };
        }
    } else if #[cfg(feature = "log-semihosting")] {
        #[macro_export]
        macro_rules! sys_log {
            ($s:expr) => {
                { let _ = $crate::macros::cortex_m_semihosting::hprintln!($s); }
            };
            ($s:expr, $($tt:tt)*) => {
                { let _ = $crate::macros::cortex_m_semihosting::hprintln!($s, $($tt)*); }
            };
        }
    } else if #[cfg(feature = "log-null")] {
        #[macro_export]
        macro_rules! sys_log {
            ($s:expr) => {};
            ($s:expr, $($x:expr),*$(,)?) => {
                {
                    $(
                        let _ = &$x;
                    )*
                }
            };
        }
    } else {
        // Note: we provide macros that contain compile_error, instead of just
        // using compile_error here, to allow programs to omit these features
        // if they don't use logging. Host builds always log to stderr.

        #[macro_export]
        macro_rules! sys_log {
            ($s:expr) => {
                compile_error!(concat!(
                        "to use sys_log! must enable one of ",
                        "'log-semihosting', 'log-itm' or 'log-null'"
                ))
            };
            ($s:expr, $($tt:tt)*) => {
                compile_error!(concat!(
                        "to use sys_log! must enable one of ",
                        "'log-semihosting', 'log-itm' or 'log-null'"
                ))
            };
        }
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn sys_log_formats_on_host() {
        let pid = 3;
        sys_log!("starting");
        sys_log!("pid {} priority {}", pid, 2);
    }
}
