/*
 * SPDX-FileCopyrightText: 2024 The wipt Authors
 * SPDX-License-Identifier: GPL-3.0-only
 */

use std::{
    path::PathBuf,
    sync::{Arc, atomic::AtomicBool},
};

use anyhow::{Result, anyhow};
use clap::{Args, Parser};
use tracing::info;

use crate::{
    container::rewrap::OutputSpec,
    job,
    log::{LogSink, TracingLogSink},
    patch::{Arch, PatchOptions, PatcherKind, assets},
    workflow::PatchJob,
};

const HEADING_PATH: &str = "Path options";
const HEADING_MAGISK: &str = "Magisk patch options";

#[derive(Debug, Args)]
pub struct MagiskOptionsGroup {
    /// Device CPU architecture.
    #[arg(long, value_name = "ARCH", value_enum, default_value_t, help_heading = HEADING_MAGISK)]
    pub arch: Arch,

    /// Keep dm-verity enabled.
    #[arg(long, help_heading = HEADING_MAGISK)]
    pub keep_verity: bool,

    /// Keep forced encryption enabled.
    #[arg(long, help_heading = HEADING_MAGISK)]
    pub keep_force_encrypt: bool,

    /// Patch the vbmeta flags in the boot image header.
    #[arg(long, help_heading = HEADING_MAGISK)]
    pub patch_vbmeta_flag: bool,

    /// Patch a recovery image instead of a boot image.
    #[arg(long, help_heading = HEADING_MAGISK)]
    pub recovery_mode: bool,

    /// Treat the device as legacy system-as-root.
    #[arg(long, help_heading = HEADING_MAGISK)]
    pub legacy_sar: bool,
}

impl MagiskOptionsGroup {
    fn to_options(&self) -> PatchOptions {
        PatchOptions {
            arch: self.arch,
            keep_verity: self.keep_verity,
            keep_force_encrypt: self.keep_force_encrypt,
            patch_vbmeta_flag: self.patch_vbmeta_flag,
            recovery_mode: self.recovery_mode,
            legacy_sar: self.legacy_sar,
        }
    }
}

pub fn patch_main(cli: &PatchCli, cancel_signal: &Arc<AtomicBool>) -> Result<()> {
    let job = PatchJob {
        input: cli.input.clone(),
        output: OutputSpec {
            dir: cli.output.clone(),
            file_name: cli.output_name.clone(),
            overwrite: cli.overwrite,
        },
        patcher: cli.patcher,
        options: cli.magisk.to_options(),
        asset_dir: cli.asset_dir.clone(),
        work_dir: cli.work_dir.clone(),
    };

    info!("Patching {:?} into {:?}", job.input, job.output.dir);

    let handle = job::spawn(job, cancel_signal.clone());
    let path = handle
        .wait(|severity, message| TracingLogSink.log(severity, message))
        .map_err(|e| anyhow!(e))?;

    println!("{}", path.display());

    Ok(())
}

/// Patch a boot image or a firmware container holding one.
#[derive(Debug, Parser)]
pub struct PatchCli {
    /// Path to boot image, LZ4 image, tar, or LZ4 tar.
    #[arg(short, long, value_name = "FILE", value_parser, help_heading = HEADING_PATH)]
    pub input: PathBuf,

    /// Directory to write the patched file to.
    #[arg(short, long, value_name = "DIR", value_parser, help_heading = HEADING_PATH)]
    pub output: PathBuf,

    /// Output file name. Defaults to the input name with `_patched` appended
    /// to the stem.
    #[arg(long, value_name = "NAME", help_heading = HEADING_PATH)]
    pub output_name: Option<String>,

    /// Replace the output file if it already exists.
    #[arg(long, help_heading = HEADING_PATH)]
    pub overwrite: bool,

    /// Directory containing magiskboot and the Magisk binaries.
    #[arg(
        long,
        value_name = "DIR",
        value_parser,
        default_value = assets::DEFAULT_ASSET_DIR,
        help_heading = HEADING_PATH
    )]
    pub asset_dir: PathBuf,

    /// Parent directory for temporary files.
    #[arg(long, value_name = "DIR", value_parser, help_heading = HEADING_PATH)]
    pub work_dir: Option<PathBuf>,

    /// Patching backend.
    #[arg(long, value_name = "PATCHER", value_enum, default_value_t)]
    pub patcher: PatcherKind,

    #[command(flatten)]
    pub magisk: MagiskOptionsGroup,
}
