/*
 * SPDX-FileCopyrightText: 2024 The wipt Authors
 * SPDX-License-Identifier: GPL-3.0-only
 */

use std::{
    ffi::OsStr,
    fmt, io,
    path::{Path, PathBuf},
};

use tempfile::NamedTempFile;

/// A small wrapper to format a number as a size in bytes.
#[derive(Clone, Copy)]
pub struct NumBytes(pub u64);

impl fmt::Display for NumBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 1 {
            write!(f, "{} byte", self.0)
        } else {
            write!(f, "{} bytes", self.0)
        }
    }
}

/// Get the non-empty parent of a path. If the path has no parent in the string,
/// then `.` is returned. This does not perform any filesystem operations.
pub fn parent_path(path: &Path) -> &Path {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            return parent;
        }
    }

    Path::new(".")
}

/// Get the final component of a path as UTF-8, lossily. Returns an empty
/// string for paths like `/` or `..` that have no file name.
pub fn file_name_lossy(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Check whether a file name ends with `suffix`, ignoring ASCII case.
pub fn has_suffix_ignore_case(name: &str, suffix: &str) -> bool {
    name.len() >= suffix.len()
        && name.is_char_boundary(name.len() - suffix.len())
        && name[name.len() - suffix.len()..].eq_ignore_ascii_case(suffix)
}

/// Strip `suffix` from the end of `name`, ignoring ASCII case.
pub fn strip_suffix_ignore_case<'a>(name: &'a str, suffix: &str) -> Option<&'a str> {
    if has_suffix_ignore_case(name, suffix) {
        Some(&name[..name.len() - suffix.len()])
    } else {
        None
    }
}

/// Split a file name into its bare stem and every trailing extension. For
/// example, `firmware.tar.lz4` becomes `("firmware", ".tar.lz4")`. Leading
/// dots are part of the stem, so `.img` has no extension.
pub fn split_extensions(name: &OsStr) -> (PathBuf, String) {
    let mut stem = PathBuf::from(name);
    let mut extensions = vec![];

    while let Some(ext) = stem.extension() {
        extensions.push(ext.to_string_lossy().into_owned());
        stem.set_extension("");
    }

    let mut joined = String::new();
    for ext in extensions.iter().rev() {
        joined.push('.');
        joined.push_str(ext);
    }

    (stem, joined)
}

/// [`NamedTempFile`] forces 600 permissions on temp files because it's the
/// safe option for a shared /tmp. Since output files are created in the
/// destination directory, just mimic umask.
#[cfg(unix)]
pub fn set_umask_permissions(file: &NamedTempFile) -> io::Result<()> {
    use std::{fs::Permissions, os::unix::prelude::PermissionsExt};

    use rustix::{fs::Mode, process::umask};

    let mask = umask(Mode::empty());
    umask(mask);

    // Mac uses a 16-bit value.
    #[allow(clippy::useless_conversion)]
    let mode = u32::from(0o666 & !mask.bits());

    file.as_file().set_permissions(Permissions::from_mode(mode))
}

#[cfg(not(unix))]
pub fn set_umask_permissions(_file: &NamedTempFile) -> io::Result<()> {
    Ok(())
}
