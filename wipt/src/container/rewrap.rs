// SPDX-FileCopyrightText: 2024 The wipt Authors
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    ffi::{OsStr, OsString},
    fs::{self, File},
    io::{self, BufReader, BufWriter, Read, Seek, Write},
    path::{Path, PathBuf},
    sync::atomic::AtomicBool,
};

use tempfile::NamedTempFile;
use thiserror::Error;

use crate::{
    container::ContainerKind,
    format::{
        archive,
        compression::{CompressedFormat, CompressedReader, CompressedWriter},
    },
    log::LogSink,
    stream, util,
};

const PATCHED_SUFFIX: &str = "_patched";

#[derive(Debug, Error)]
pub enum Error {
    #[error("Unsupported container type ({kind}): {path:?}")]
    Unsupported { path: PathBuf, kind: ContainerKind },
    #[error("No archive member name given for {0}")]
    NoMemberName(ContainerKind),
    #[error("Output file already exists: {0:?}")]
    AlreadyExists(PathBuf),
    #[error("Failed to rebuild archive: {0:?}")]
    Archive(PathBuf, #[source] archive::Error),
    #[error("Failed to compress output: {0:?}")]
    Compress(PathBuf, #[source] io::Error),
    #[error("Failed to decompress: {0:?}")]
    Decompress(PathBuf, #[source] io::Error),
    #[error("Failed to move output into place: {0:?}")]
    Persist(PathBuf, #[source] io::Error),
    #[error("Output file was not created: {0:?}")]
    OutputMissing(PathBuf),
    #[error("File I/O error: {0:?}")]
    File(PathBuf, #[source] io::Error),
}

type Result<T> = std::result::Result<T, Error>;

/// Where and how to write the final output.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OutputSpec {
    pub dir: PathBuf,
    /// Used verbatim when not blank. Otherwise, the name is derived from the
    /// input file name with [`default_file_name`].
    pub file_name: Option<String>,
    pub overwrite: bool,
}

impl OutputSpec {
    /// Compute the destination path for `input`.
    pub fn resolve(&self, input: &Path) -> PathBuf {
        match self.file_name.as_deref().filter(|n| !n.trim().is_empty()) {
            Some(name) => self.dir.join(name),
            None => self.dir.join(default_file_name(input)),
        }
    }
}

/// Insert `_patched` between the bare stem and all of the extensions of
/// `input`'s file name, eg. `firmware.tar.lz4` -> `firmware_patched.tar.lz4`.
pub fn default_file_name(input: &Path) -> OsString {
    let (stem, extensions) = util::split_extensions(input.file_name().unwrap_or(OsStr::new("")));

    let mut name = stem.into_os_string();
    name.push(PATCHED_SUFFIX);
    name.push(extensions);

    name
}

fn open_reader(path: &Path) -> Result<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| Error::File(path.to_owned(), e))
}

fn image_size(path: &Path) -> Result<u64> {
    fs::metadata(path)
        .map(|m| m.len())
        .map_err(|e| Error::File(path.to_owned(), e))
}

fn anonymous_temp() -> Result<File> {
    tempfile::tempfile().map_err(|e| Error::File(std::env::temp_dir(), e))
}

fn rebuild_archive<W: Write>(
    archive_reader: impl Read,
    writer: W,
    input: &Path,
    member_name: &str,
    patched: &Path,
    cancel_signal: &AtomicBool,
) -> Result<W> {
    let size = image_size(patched)?;

    archive::replace_member(
        archive_reader,
        writer,
        member_name,
        open_reader(patched)?,
        size,
        cancel_signal,
    )
    .map_err(|e| Error::Archive(input.to_owned(), e))
}

/// Rebuild a compressed archive. Both intermediate archives are anonymous
/// temporary files, so they are gone once this returns, whatever the outcome.
fn rebuild_compressed_archive<W: Write>(
    writer: W,
    input: &Path,
    member_name: &str,
    patched: &Path,
    cancel_signal: &AtomicBool,
) -> Result<W> {
    let temp_path = std::env::temp_dir();
    let temp_err = |e| Error::File(temp_path.clone(), e);

    let mut original = anonymous_temp()?;
    {
        let reader = CompressedReader::with_format(open_reader(input)?, CompressedFormat::Lz4);
        let mut buf_writer = BufWriter::new(&mut original);
        stream::copy(reader, &mut buf_writer, cancel_signal)
            .map_err(|e| Error::Decompress(input.to_owned(), e))?;
        buf_writer.flush().map_err(temp_err)?;
    }
    original.rewind().map_err(temp_err)?;

    let rebuilt = rebuild_archive(
        BufReader::new(original),
        BufWriter::new(anonymous_temp()?),
        input,
        member_name,
        patched,
        cancel_signal,
    )?;
    let mut rebuilt = rebuilt.into_inner().map_err(|e| temp_err(e.into_error()))?;
    rebuilt.rewind().map_err(temp_err)?;

    let mut compressed = CompressedWriter::new(writer, CompressedFormat::Lz4);
    stream::copy(BufReader::new(rebuilt), &mut compressed, cancel_signal)
        .map_err(|e| Error::Compress(input.to_owned(), e))?;

    compressed
        .finish()
        .map_err(|e| Error::Compress(input.to_owned(), e))
}

/// Write the container body for `origin` into `writer`.
fn write_container<W: Write>(
    writer: W,
    patched: &Path,
    input: &Path,
    origin: ContainerKind,
    member_name: Option<&str>,
    cancel_signal: &AtomicBool,
) -> Result<W> {
    let member = || member_name.ok_or(Error::NoMemberName(origin));

    match origin {
        ContainerKind::RawImage => {
            let mut writer = writer;
            stream::copy(open_reader(patched)?, &mut writer, cancel_signal)
                .map_err(|e| Error::File(patched.to_owned(), e))?;
            Ok(writer)
        }
        ContainerKind::CompressedImage => {
            let mut compressed = CompressedWriter::new(writer, CompressedFormat::Lz4);
            stream::copy(open_reader(patched)?, &mut compressed, cancel_signal)
                .map_err(|e| Error::Compress(patched.to_owned(), e))?;
            compressed
                .finish()
                .map_err(|e| Error::Compress(patched.to_owned(), e))
        }
        ContainerKind::Archive => rebuild_archive(
            open_reader(input)?,
            writer,
            input,
            member()?,
            patched,
            cancel_signal,
        ),
        ContainerKind::CompressedArchive => {
            rebuild_compressed_archive(writer, input, member()?, patched, cancel_signal)
        }
        ContainerKind::Unknown => Err(Error::Unsupported {
            path: input.to_owned(),
            kind: origin,
        }),
    }
}

/// Put the patched raw image at `patched` back into the same kind of container
/// that `input` was. For archives, every member other than `member_name` is
/// copied unchanged and in the original order. Returns the path of the new
/// file.
pub fn rewrap(
    patched: &Path,
    input: &Path,
    origin: ContainerKind,
    member_name: Option<&str>,
    output: &OutputSpec,
    sink: &dyn LogSink,
    cancel_signal: &AtomicBool,
) -> Result<PathBuf> {
    if origin == ContainerKind::Unknown {
        return Err(Error::Unsupported {
            path: input.to_owned(),
            kind: origin,
        });
    } else if origin.is_archive() && member_name.is_none() {
        return Err(Error::NoMemberName(origin));
    }

    let target = output.resolve(input);

    if fs::symlink_metadata(&target).is_ok() {
        if !output.overwrite {
            return Err(Error::AlreadyExists(target));
        }

        sink.warning(&format!("Overwriting existing file: {target:?}"));
    }

    fs::create_dir_all(&output.dir).map_err(|e| Error::File(output.dir.clone(), e))?;

    sink.info(&format!("Repacking {origin}: {target:?}"));

    let temp_writer = NamedTempFile::with_prefix_in(
        target
            .file_name()
            .unwrap_or_else(|| OsStr::new("wipt.tmp")),
        util::parent_path(&target),
    )
    .map_err(|e| Error::File(output.dir.clone(), e))?;
    let temp_path = temp_writer.path().to_owned();

    let buf_writer = write_container(
        BufWriter::new(temp_writer),
        patched,
        input,
        origin,
        member_name,
        cancel_signal,
    )?;
    let temp_writer = buf_writer
        .into_inner()
        .map_err(|e| Error::File(temp_path.clone(), e.into_error()))?;

    util::set_umask_permissions(&temp_writer)
        .map_err(|e| Error::File(temp_path.clone(), e))?;

    if output.overwrite {
        temp_writer
            .persist(&target)
            .map_err(|e| Error::Persist(target.clone(), e.error))?;
    } else {
        temp_writer.persist_noclobber(&target).map_err(|e| {
            if e.error.kind() == io::ErrorKind::AlreadyExists {
                Error::AlreadyExists(target.clone())
            } else {
                Error::Persist(target.clone(), e.error)
            }
        })?;
    }

    if !target.exists() {
        return Err(Error::OutputMissing(target));
    }

    sink.debug(&format!("Wrote {target:?}"));

    Ok(target)
}
