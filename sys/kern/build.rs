// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::env;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use build_util::KernelConfig;

fn main() -> anyhow::Result<()> {
    build_util::expose_m_profile();

    let kconfig = KernelConfig::from_env()?;
    generate_kconfig(&kconfig)?;

    Ok(())
}

/// Writes the sizing constants for the kernel's static storage. The storage
/// itself is declared in `startup.rs`.
fn generate_kconfig(kconfig: &KernelConfig) -> anyhow::Result<()> {
    let out = PathBuf::from(env::var_os("OUT_DIR").context("OUT_DIR")?);
    let mut file = File::create(out.join("kconfig.rs"))?;

    writeln!(file, "// See build.rs for details")?;
    writeln!(
        file,
        "pub const BLOCK_COUNT: usize = {};",
        kconfig.block_count
    )?;
    writeln!(
        file,
        "pub const STACK_REGION_SIZE: usize = {:#x};",
        kconfig.stack_region_size
    )?;

    Ok(())
}
