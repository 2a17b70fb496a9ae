/*
 * SPDX-FileCopyrightText: 2024 The wipt Authors
 * SPDX-License-Identifier: GPL-3.0-only
 */

use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::Parser;

use crate::patch::{Arch, assets};

pub fn assets_main(cli: &AssetsCli) -> Result<()> {
    let report = assets::report(&cli.asset_dir, cli.arch);

    for status in &report {
        println!("{status}");
    }

    let missing = report
        .iter()
        .filter(|s| s.required && !s.found)
        .map(|s| s.name.as_str())
        .collect::<Vec<_>>();

    if !missing.is_empty() {
        bail!(
            "Missing required assets in {:?}: {}",
            cli.asset_dir,
            missing.join(", "),
        );
    }

    Ok(())
}

/// Check that the asset directory has everything needed for patching.
#[derive(Debug, Parser)]
pub struct AssetsCli {
    /// Directory containing magiskboot and the Magisk binaries.
    #[arg(long, value_name = "DIR", value_parser, default_value = assets::DEFAULT_ASSET_DIR)]
    pub asset_dir: PathBuf,

    /// Device CPU architecture.
    #[arg(long, value_name = "ARCH", value_enum, default_value_t)]
    pub arch: Arch,
}
