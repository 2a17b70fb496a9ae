// SPDX-FileCopyrightText: 2024 The wipt Authors
// SPDX-License-Identifier: GPL-3.0-only

//! Classification of firmware files by their outer container.

use std::{fmt, path::Path};

use tracing::trace;

use crate::{format::compression, util};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ContainerKind {
    /// A bare boot image.
    RawImage,
    /// A boot image wrapped in a single LZ4 frame.
    CompressedImage,
    /// A tar archive with the boot image as one of its members.
    Archive,
    /// An LZ4-framed tar archive.
    CompressedArchive,
    Unknown,
}

impl ContainerKind {
    /// Whether the boot image is a member of a tar archive.
    pub fn is_archive(self) -> bool {
        matches!(self, Self::Archive | Self::CompressedArchive)
    }
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::RawImage => "raw image",
            Self::CompressedImage => "LZ4 compressed image",
            Self::Archive => "tar archive",
            Self::CompressedArchive => "LZ4 compressed tar archive",
            Self::Unknown => "unknown",
        };

        f.write_str(s)
    }
}

/// Classify `path` by its suffix, looking at the first four bytes only for
/// `.lz4` files that aren't tar archives. This never fails. If the file cannot
/// be read, the suffix alone decides.
pub fn detect(path: &Path) -> ContainerKind {
    let name = util::file_name_lossy(path);

    let kind = if util::has_suffix_ignore_case(&name, ".tar.lz4") {
        ContainerKind::CompressedArchive
    } else if util::has_suffix_ignore_case(&name, ".tar") {
        ContainerKind::Archive
    } else if util::has_suffix_ignore_case(&name, ".lz4") {
        // `.img.lz4` and any other `.lz4` both map to the single compressed
        // image variant once the magic matches.
        match compression::has_lz4_magic(path) {
            Ok(true) => ContainerKind::CompressedImage,
            Ok(false) => ContainerKind::Unknown,
            Err(e) => {
                trace!("Falling back to suffix for {path:?}: {e}");
                ContainerKind::CompressedImage
            }
        }
    } else if util::has_suffix_ignore_case(&name, ".img") {
        ContainerKind::RawImage
    } else {
        ContainerKind::Unknown
    };

    trace!("Detected {path:?} as {kind}");

    kind
}
