/*
 * SPDX-FileCopyrightText: 2024 The wipt Authors
 * SPDX-License-Identifier: GPL-3.0-only
 */

pub mod assets;
pub mod engine;
pub mod magisk;

use std::{
    fmt, io,
    path::{Path, PathBuf},
    sync::atomic::AtomicBool,
};

use clap::ValueEnum;
use thiserror::Error;

use crate::{log::LogSink, workspace::Workspace};

pub use self::{magisk::MagiskRootPatcher, passthrough::PassthroughPatcher};

#[derive(Debug, Error)]
pub enum Error {
    #[error("Asset error")]
    Asset(#[from] assets::Error),
    #[error("Patching engine error")]
    Engine(#[from] engine::Error),
    #[error("Engine did not produce ramdisk: {0:?}")]
    NoRamdisk(PathBuf),
    #[error("Patched image missing: {0:?}")]
    PatchedImageMissing(PathBuf),
    #[error("Patching was interrupted")]
    Cancelled(#[source] io::Error),
    #[error("Failed to prepare workspace")]
    Workspace(#[source] io::Error),
    #[error("File I/O error: {0:?}")]
    File(PathBuf, #[source] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Target CPU architecture of the device. Selects which Magisk binaries are
/// injected.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, ValueEnum)]
pub enum Arch {
    #[default]
    Arm64,
    Arm,
    X86,
    X64,
}

impl Arch {
    pub fn tag(self) -> &'static str {
        match self {
            Self::Arm64 => "arm64",
            Self::Arm => "arm",
            Self::X86 => "x86",
            Self::X64 => "x64",
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Behavior flags for the root patch. Each flag is independent and maps to
/// one of Magisk's config variables.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PatchOptions {
    pub arch: Arch,
    pub keep_verity: bool,
    pub keep_force_encrypt: bool,
    pub patch_vbmeta_flag: bool,
    pub recovery_mode: bool,
    pub legacy_sar: bool,
}

impl PatchOptions {
    /// Environment passed to every ramdisk edit and repack invocation.
    pub fn engine_env(&self) -> engine::EngineEnv {
        let mut env = engine::EngineEnv::default();

        for (name, enabled) in [
            (engine::ENV_KEEP_VERITY, self.keep_verity),
            (engine::ENV_KEEP_FORCE_ENCRYPT, self.keep_force_encrypt),
            (engine::ENV_PATCH_VBMETA_FLAG, self.patch_vbmeta_flag),
            (engine::ENV_RECOVERY_MODE, self.recovery_mode),
            (engine::ENV_LEGACY_SAR, self.legacy_sar),
        ] {
            if enabled {
                env.set(name);
            }
        }

        env
    }
}

/// The patched raw image, inside the workspace.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PatchResult {
    pub patched_image: PathBuf,
}

/// Which backend to patch with.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum PatcherKind {
    #[default]
    Magisk,
    /// Placeholder that leaves the image untouched.
    Passthrough,
}

pub trait BootImagePatch {
    fn patcher_name(&self) -> &'static str;

    /// Patch the raw boot image at `raw_image`, using `workspace` for all
    /// intermediate files. The input file is not modified.
    fn patch(
        &self,
        raw_image: &Path,
        workspace: &Workspace,
        sink: &dyn LogSink,
        cancel_signal: &AtomicBool,
    ) -> Result<PatchResult>;
}

mod passthrough {
    use super::*;

    /// Return the image as-is. Stands in for backends that aren't supported.
    #[derive(Clone, Copy, Debug, Default)]
    pub struct PassthroughPatcher;

    impl BootImagePatch for PassthroughPatcher {
        fn patcher_name(&self) -> &'static str {
            "PassthroughPatcher"
        }

        fn patch(
            &self,
            raw_image: &Path,
            _workspace: &Workspace,
            sink: &dyn LogSink,
            _cancel_signal: &AtomicBool,
        ) -> Result<PatchResult> {
            sink.warning("Pass-through patcher selected; the image is not modified");

            Ok(PatchResult {
                patched_image: raw_image.to_owned(),
            })
        }
    }
}
