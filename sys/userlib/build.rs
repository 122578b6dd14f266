// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

fn main() {
    // The syscall stubs differ between ARMv6-M and ARMv7-M/ARMv8-M. Host
    // builds get the fake kernel instead.
    build_util::expose_m_profile();
}
