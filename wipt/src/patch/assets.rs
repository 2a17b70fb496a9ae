// SPDX-FileCopyrightText: 2024 The wipt Authors
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    fmt,
    path::{Path, PathBuf},
};

use thiserror::Error;

use crate::{log::LogSink, patch::Arch};

/// Default location of the unpacked Magisk release, relative to the current
/// directory.
pub const DEFAULT_ASSET_DIR: &str = "vendor/magisk-assets";

#[cfg(windows)]
pub const ENGINE_FILE_NAME: &str = "magiskboot.exe";
#[cfg(not(windows))]
pub const ENGINE_FILE_NAME: &str = "magiskboot";

#[derive(Debug, Error)]
pub enum Error {
    #[error("Required asset {asset} not found: {path:?}")]
    Missing { asset: &'static str, path: PathBuf },
}

type Result<T> = std::result::Result<T, Error>;

/// One of the Magisk components that gets injected into the ramdisk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Asset {
    Init,
    Magisk,
    InitLd,
    Stub,
}

impl Asset {
    pub const ALL: [Self; 4] = [Self::Init, Self::Magisk, Self::InitLd, Self::Stub];

    pub fn logical_name(self) -> &'static str {
        match self {
            Self::Init => "magiskinit",
            Self::Magisk => "magisk",
            Self::InitLd => "init-ld",
            Self::Stub => "stub.apk",
        }
    }

    pub fn is_required(self) -> bool {
        matches!(self, Self::Init | Self::Magisk)
    }

    /// Architecture-qualified file name. The extension, if any, stays last,
    /// so `stub.apk` becomes `stub-arm64.apk`.
    pub fn file_name(self, arch: Arch) -> String {
        let name = self.logical_name();

        match name.rsplit_once('.') {
            Some((stem, ext)) => format!("{stem}-{arch}.{ext}"),
            None => format!("{name}-{arch}"),
        }
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.logical_name())
    }
}

/// Resolved paths to the Magisk components for one architecture.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssetBundle {
    pub init: PathBuf,
    pub magisk: PathBuf,
    pub init_ld: Option<PathBuf>,
    pub stub: Option<PathBuf>,
}

/// Look up every asset for `arch` in `asset_dir`. Required assets must exist.
/// Missing optional assets are only warned about.
pub fn resolve(asset_dir: &Path, arch: Arch, sink: &dyn LogSink) -> Result<AssetBundle> {
    let required = |asset: Asset| {
        let path = asset_dir.join(asset.file_name(arch));
        if path.is_file() {
            Ok(path)
        } else {
            Err(Error::Missing {
                asset: asset.logical_name(),
                path,
            })
        }
    };
    let optional = |asset: Asset| {
        let path = asset_dir.join(asset.file_name(arch));
        if path.is_file() {
            Some(path)
        } else {
            sink.warning(&format!("Optional asset {asset} not found: {path:?}"));
            None
        }
    };

    let bundle = AssetBundle {
        init: required(Asset::Init)?,
        magisk: required(Asset::Magisk)?,
        init_ld: optional(Asset::InitLd),
        stub: optional(Asset::Stub),
    };

    sink.debug(&format!("Resolved {arch} assets: {bundle:?}"));

    Ok(bundle)
}

/// Path to the patching engine executable.
pub fn engine_path(asset_dir: &Path) -> PathBuf {
    asset_dir.join(ENGINE_FILE_NAME)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssetStatus {
    /// Logical name, or the engine's file name.
    pub name: String,
    pub path: PathBuf,
    pub required: bool,
    pub found: bool,
}

impl fmt::Display for AssetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<7}  {:<10}  {:<8}  {}",
            if self.found { "FOUND" } else { "MISSING" },
            self.name,
            if self.required { "required" } else { "optional" },
            self.path.display(),
        )
    }
}

/// Check which of the expected files are present, engine first.
pub fn report(asset_dir: &Path, arch: Arch) -> Vec<AssetStatus> {
    let engine = engine_path(asset_dir);
    let mut result = vec![AssetStatus {
        name: ENGINE_FILE_NAME.to_owned(),
        found: engine.is_file(),
        path: engine,
        required: true,
    }];

    for asset in Asset::ALL {
        let path = asset_dir.join(asset.file_name(arch));

        result.push(AssetStatus {
            name: asset.logical_name().to_owned(),
            found: path.is_file(),
            path,
            required: asset.is_required(),
        });
    }

    result
}
