// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Helpers shared by the kernel and userlib build scripts.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::env;

/// Name of the environment variable carrying the kernel configuration.
pub const KCONFIG_VAR: &str = "RTX_KCONFIG";

/// Exposes the CPU's M-profile architecture version, which rustc doesn't
/// provide on its own.
///
/// This sets one of `cfg(armv6m)`, `cfg(armv7m)` or `cfg(armv8m)` based on
/// `TARGET`. Host builds get none of them, which selects the simulated
/// architecture used by the unit tests.
pub fn expose_m_profile() {
    let target = env::var("TARGET").unwrap_or_default();

    if target.starts_with("thumbv6m") {
        println!("cargo:rustc-cfg=armv6m");
    } else if target.starts_with("thumbv7m") || target.starts_with("thumbv7em")
    {
        println!("cargo:rustc-cfg=armv7m");
    } else if target.starts_with("thumbv8m") {
        println!("cargo:rustc-cfg=armv8m");
    } else if target.starts_with("thumb") {
        println!("cargo:warning=unrecognized M-profile target {target}");
    }
}

/// Compile-time sizing of the kernel's static storage.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct KernelConfig {
    /// Number of fixed-size blocks in the message/memory pool.
    pub block_count: usize,
    /// Bytes reserved for all process stacks, carved top-down at boot.
    pub stack_region_size: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            block_count: 30,
            stack_region_size: 0x2000,
        }
    }
}

impl KernelConfig {
    /// Parses a RON document such as `(block_count: 30)`. Fields left out
    /// keep their defaults.
    pub fn parse(text: &str) -> Result<Self> {
        let config: Self =
            ron::de::from_str(text).context("parsing kernel config")?;
        config.validate()?;
        Ok(config)
    }

    /// Reads the configuration from `RTX_KCONFIG`, falling back to defaults
    /// if the variable is absent.
    pub fn from_env() -> Result<Self> {
        println!("cargo:rerun-if-env-changed={KCONFIG_VAR}");
        match env::var(KCONFIG_VAR) {
            Ok(text) => Self::parse(&text),
            Err(env::VarError::NotPresent) => Ok(Self::default()),
            Err(e) => Err(e).context(KCONFIG_VAR),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.block_count == 0 {
            bail!("block_count must be at least 1");
        }
        // Block indices travel in a u32 link word with an all-ones sentinel.
        if self.block_count >= u16::MAX as usize {
            bail!("block_count {} is too large", self.block_count);
        }
        if self.stack_region_size % 8 != 0 {
            bail!(
                "stack_region_size {:#x} is not a multiple of 8",
                self.stack_region_size
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_keeps_defaults() {
        assert_eq!(KernelConfig::parse("()").unwrap(), KernelConfig::default());
    }

    #[test]
    fn partial_document_overrides_one_field() {
        let config = KernelConfig::parse("(block_count: 8)").unwrap();
        assert_eq!(config.block_count, 8);
        assert_eq!(config.stack_region_size, 0x2000);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(KernelConfig::parse("(block_count: 0)").is_err());
        assert!(KernelConfig::parse("(stack_region_size: 0x1001)").is_err());
        assert!(KernelConfig::parse("(bogus: 1)").is_err());
    }
}
