/*
 * SPDX-FileCopyrightText: 2024 The wipt Authors
 * SPDX-License-Identifier: GPL-3.0-only
 */

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

pub fn extract_main(cli: &ExtractCli) -> Result<()> {
    info!("Extracting {:?} to {:?}", cli.input, cli.output);
    warn!("Extraction is not implemented yet; nothing was written");

    Ok(())
}

/// Extract firmware images (not implemented).
#[derive(Debug, Parser)]
pub struct ExtractCli {
    /// Input file or directory.
    #[arg(short, long, value_name = "PATH", value_parser)]
    pub input: PathBuf,

    /// Output directory.
    #[arg(short, long, value_name = "DIR", value_parser)]
    pub output: PathBuf,
}
