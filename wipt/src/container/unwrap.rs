// SPDX-FileCopyrightText: 2024 The wipt Authors
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    fs::{self, File},
    io::{self, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
    sync::atomic::AtomicBool,
};

use thiserror::Error;

use crate::{
    container::{ContainerKind, ExtractedImage},
    format::{
        archive::{self, Selection},
        compression::{CompressedFormat, CompressedReader},
    },
    log::LogSink,
    stream,
    util::{self, NumBytes},
    workspace::Workspace,
};

/// Workspace subdirectory for extracted images. Keeping them out of the
/// workspace root means they can never collide with the patcher's files.
pub const EXTRACT_DIR: &str = "extracted";

const TEMP_ARCHIVE_NAME: &str = "container.tar";
const DEFAULT_IMAGE_NAME: &str = "boot.img";

#[derive(Debug, Error)]
pub enum Error {
    #[error("Unsupported container type ({kind}): {path:?}")]
    Unsupported { path: PathBuf, kind: ContainerKind },
    #[error("No boot image found in archive: {0:?}")]
    NoBootImage(PathBuf),
    #[error("Extracted boot image is missing or empty: {0:?}")]
    EmptyImage(PathBuf),
    #[error("Failed to decompress: {0:?}")]
    Decompress(PathBuf, #[source] io::Error),
    #[error("Failed to read archive: {0:?}")]
    Archive(PathBuf, #[source] archive::Error),
    #[error("Failed to prepare workspace")]
    Workspace(#[source] io::Error),
    #[error("File I/O error: {0:?}")]
    File(PathBuf, #[source] io::Error),
}

type Result<T> = std::result::Result<T, Error>;

fn base_name(path: &Path) -> String {
    let name = util::file_name_lossy(path);
    if name.is_empty() {
        DEFAULT_IMAGE_NAME.to_owned()
    } else {
        name
    }
}

fn open_reader(path: &Path) -> Result<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| Error::File(path.to_owned(), e))
}

fn create_writer(path: &Path) -> Result<BufWriter<File>> {
    File::create(path)
        .map(BufWriter::new)
        .map_err(|e| Error::File(path.to_owned(), e))
}

fn unwrap_raw(
    path: &Path,
    out_dir: &Path,
    sink: &dyn LogSink,
    cancel_signal: &AtomicBool,
) -> Result<PathBuf> {
    let target = out_dir.join(base_name(path));

    let n = stream::copy_file(path, &target, cancel_signal)
        .map_err(|e| Error::File(path.to_owned(), e))?;
    sink.debug(&format!("Copied {} raw image to {target:?}", NumBytes(n)));

    Ok(target)
}

/// Decompress an entire LZ4 frame from `path` into `target`.
fn decompress_to(path: &Path, target: &Path, cancel_signal: &AtomicBool) -> Result<u64> {
    let reader = open_reader(path)?;
    let reader = CompressedReader::with_format(reader, CompressedFormat::Lz4);
    let mut writer = create_writer(target)?;

    let n = stream::copy(reader, &mut writer, cancel_signal)
        .map_err(|e| Error::Decompress(path.to_owned(), e))?;
    writer
        .flush()
        .map_err(|e| Error::File(target.to_owned(), e))?;

    Ok(n)
}

fn unwrap_compressed(
    path: &Path,
    out_dir: &Path,
    sink: &dyn LogSink,
    cancel_signal: &AtomicBool,
) -> Result<PathBuf> {
    let name = base_name(path);
    let name = util::strip_suffix_ignore_case(&name, ".lz4")
        .filter(|n| !n.is_empty())
        .unwrap_or(DEFAULT_IMAGE_NAME);
    let target = out_dir.join(name);

    let n = decompress_to(path, &target, cancel_signal)?;
    sink.debug(&format!("Decompressed {} to {target:?}", NumBytes(n)));

    Ok(target)
}

/// Find and extract the boot image member from the tar file at
/// `archive_path`. `input` is only used for error messages.
fn unwrap_archive(
    input: &Path,
    archive_path: &Path,
    out_dir: &Path,
    sink: &dyn LogSink,
    cancel_signal: &AtomicBool,
) -> Result<(PathBuf, String)> {
    let members = archive::list_members(open_reader(archive_path)?)
        .map_err(|e| Error::Archive(input.to_owned(), e))?;
    sink.debug(&format!("Archive has {} members", members.len()));

    let member = match archive::select_boot_member(&members) {
        Some(Selection::Preferred(name)) => name,
        Some(Selection::Fallback(name)) => {
            sink.warning(&format!(
                "No standard boot image name found in archive; guessing {name:?}",
            ));
            name
        }
        None => return Err(Error::NoBootImage(input.to_owned())),
    };

    sink.info(&format!("Extracting archive member: {member}"));

    // Member names may contain directories. Only the last component is used on
    // disk, but the full name is kept for repacking.
    let file_name = member
        .rsplit('/')
        .find(|c| !c.is_empty() && *c != "." && *c != "..")
        .unwrap_or(DEFAULT_IMAGE_NAME);
    let target = out_dir.join(file_name);
    let mut writer = create_writer(&target)?;

    archive::extract_member(open_reader(archive_path)?, &member, &mut writer, cancel_signal)
        .map_err(|e| Error::Archive(input.to_owned(), e))?;
    writer
        .flush()
        .map_err(|e| Error::File(target.clone(), e))?;

    Ok((target, member))
}

/// Pull the raw boot image out of the container at `path` into `workspace`.
pub fn unwrap(
    path: &Path,
    kind: ContainerKind,
    workspace: &Workspace,
    sink: &dyn LogSink,
    cancel_signal: &AtomicBool,
) -> Result<ExtractedImage> {
    let out_dir = || {
        sink.info(&format!("Unpacking {kind}: {path:?}"));
        workspace.subdir(EXTRACT_DIR).map_err(Error::Workspace)
    };

    let (raw_image, member_name) = match kind {
        ContainerKind::RawImage => (unwrap_raw(path, &out_dir()?, sink, cancel_signal)?, None),
        ContainerKind::CompressedImage => (
            unwrap_compressed(path, &out_dir()?, sink, cancel_signal)?,
            None,
        ),
        ContainerKind::Archive => {
            let (image, member) = unwrap_archive(path, path, &out_dir()?, sink, cancel_signal)?;
            (image, Some(member))
        }
        ContainerKind::CompressedArchive => {
            let out_dir = out_dir()?;
            let temp_archive = workspace.path().join(TEMP_ARCHIVE_NAME);

            let n = decompress_to(path, &temp_archive, cancel_signal)?;
            sink.debug(&format!("Decompressed archive to {}", NumBytes(n)));

            let result = unwrap_archive(path, &temp_archive, &out_dir, sink, cancel_signal);

            if let Err(e) = fs::remove_file(&temp_archive) {
                sink.debug(&format!("Failed to remove {temp_archive:?}: {e}"));
            }

            let (image, member) = result?;
            (image, Some(member))
        }
        ContainerKind::Unknown => {
            return Err(Error::Unsupported {
                path: path.to_owned(),
                kind,
            });
        }
    };

    match fs::metadata(&raw_image) {
        Ok(m) if m.is_file() && m.len() > 0 => {}
        _ => return Err(Error::EmptyImage(raw_image)),
    }

    Ok(ExtractedImage {
        raw_image,
        origin: kind,
        member_name,
    })
}
