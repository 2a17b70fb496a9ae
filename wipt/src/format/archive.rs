// SPDX-FileCopyrightText: 2024 The wipt Authors
// SPDX-License-Identifier: GPL-3.0-only

//! Tar archive helpers for picking, extracting, and replacing a single member
//! while leaving every other member untouched.

use std::{
    io::{self, Read, Write},
    path::Path,
    sync::atomic::AtomicBool,
};

use tar::{Archive, Builder, Entry, EntryType, Header};
use thiserror::Error;
use tracing::trace;

use crate::{stream, util};

/// Member names that are treated as the boot image, in order of preference.
pub const PREFERRED_MEMBERS: &[&str] = &["boot.img", "recovery.img", "init_boot.img"];

/// Suffix used for the fallback search when no preferred member exists.
pub const IMAGE_SUFFIX: &str = ".img";

#[derive(Debug, Error)]
pub enum Error {
    #[error("Archive has no member named {0:?}")]
    MemberNotFound(String),
    #[error("Failed to read archive")]
    Read(#[source] io::Error),
    #[error("Failed to read archive member: {0:?}")]
    ReadMember(String, #[source] io::Error),
    #[error("Failed to write archive member: {0:?}")]
    WriteMember(String, #[source] io::Error),
    #[error("Failed to finalize archive")]
    Finish(#[source] io::Error),
}

type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Member {
    pub name: String,
    pub is_file: bool,
}

/// How the boot image member was chosen.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Selection {
    /// Exact match against [`PREFERRED_MEMBERS`].
    Preferred(String),
    /// First regular member ending in [`IMAGE_SUFFIX`].
    Fallback(String),
}

fn member_name<R: Read>(entry: &Entry<'_, R>) -> String {
    String::from_utf8_lossy(&entry.path_bytes()).into_owned()
}

/// GNU sparse members hold file data too. The reader expands their holes.
fn is_regular(entry_type: EntryType) -> bool {
    entry_type.is_file() || entry_type.is_gnu_sparse()
}

/// Turn a GNU sparse header into a regular file header. The sparse map only
/// describes the on-disk layout, which no longer applies once the expanded
/// data is written.
fn clear_sparse(header: &mut Header) {
    header.set_entry_type(EntryType::Regular);

    if let Some(gnu) = header.as_gnu_mut() {
        for block in &mut gnu.sparse {
            block.offset = [0; 12];
            block.numbytes = [0; 12];
        }
        gnu.isextended = [0];
        gnu.realsize = [0; 12];
    }
}

/// List every member in archive order.
pub fn list_members(reader: impl Read) -> Result<Vec<Member>> {
    let mut archive = Archive::new(reader);
    let mut members = vec![];

    for entry in archive.entries().map_err(Error::Read)? {
        let entry = entry.map_err(Error::Read)?;

        members.push(Member {
            name: member_name(&entry),
            is_file: is_regular(entry.header().entry_type()),
        });
    }

    Ok(members)
}

/// Pick the member to treat as the boot image. Preferred names win in list
/// order regardless of where they appear in the archive. Otherwise, the first
/// regular member with an image suffix is used, which may pick the wrong image
/// if the archive has several.
pub fn select_boot_member(members: &[Member]) -> Option<Selection> {
    for preferred in PREFERRED_MEMBERS {
        if members.iter().any(|m| m.is_file && m.name == *preferred) {
            return Some(Selection::Preferred((*preferred).to_owned()));
        }
    }

    members
        .iter()
        .find(|m| m.is_file && util::has_suffix_ignore_case(&m.name, IMAGE_SUFFIX))
        .map(|m| Selection::Fallback(m.name.clone()))
}

/// Copy the contents of the regular member `name` into `writer`. Returns the
/// number of bytes copied.
pub fn extract_member(
    reader: impl Read,
    name: &str,
    mut writer: impl Write,
    cancel_signal: &AtomicBool,
) -> Result<u64> {
    let mut archive = Archive::new(reader);

    for entry in archive.entries().map_err(Error::Read)? {
        let mut entry = entry.map_err(Error::Read)?;

        if is_regular(entry.header().entry_type()) && member_name(&entry) == name {
            return stream::copy(&mut entry, &mut writer, cancel_signal)
                .map_err(|e| Error::ReadMember(name.to_owned(), e));
        }
    }

    Err(Error::MemberNotFound(name.to_owned()))
}

/// Write a copy of the archive in `reader` to `writer`, with the contents of
/// the regular member `name` replaced by `size` bytes from `replacement`.
/// Members keep their order. Headers of untouched members are written back
/// verbatim unless the name or link target only fit in a GNU/pax extension, in
/// which case a GNU long name record is emitted instead. GNU sparse members are
/// written back as regular files holding the expanded data.
pub fn replace_member<W: Write>(
    reader: impl Read,
    writer: W,
    name: &str,
    mut replacement: impl Read,
    size: u64,
    cancel_signal: &AtomicBool,
) -> Result<W> {
    let mut archive = Archive::new(reader);
    let mut builder = Builder::new(writer);
    let mut replaced = false;

    for entry in archive.entries().map_err(Error::Read)? {
        stream::check_cancel(cancel_signal).map_err(Error::Read)?;

        let mut entry = entry.map_err(Error::Read)?;
        let path = member_name(&entry);
        let mut header = entry.header().clone();
        let entry_type = header.entry_type();
        let sparse = entry_type.is_gnu_sparse();

        if sparse {
            clear_sparse(&mut header);
        }

        let extended_name = header.path_bytes() != entry.path_bytes();
        let link_name = entry.link_name_bytes().map(|l| l.into_owned());
        let extended_link = header.link_name_bytes().map(|l| l.into_owned()) != link_name;

        let result = if is_regular(entry_type) && !replaced && path == name {
            trace!("Replacing archive member: {path}");
            replaced = true;

            header.set_size(size);
            let data = (&mut replacement).take(size);

            if extended_name || sparse {
                builder.append_data(&mut header, &path, data)
            } else {
                header.set_cksum();
                builder.append(&header, data)
            }
        } else if let (Some(target), true) = (&link_name, extended_name || extended_link) {
            trace!("Copying archive link with long name: {path}");

            let target = String::from_utf8_lossy(target);
            builder.append_link(&mut header, &path, Path::new(target.as_ref()))
        } else if sparse {
            trace!("Expanding sparse archive member: {path}");

            header.set_size(entry.size());
            builder.append_data(&mut header, &path, &mut entry)
        } else if extended_name {
            trace!("Copying archive member with long name: {path}");

            builder.append_data(&mut header, &path, &mut entry)
        } else {
            trace!("Copying archive member: {path}");

            // The header size still matches what the entry yields.
            builder.append(&header, &mut entry)
        };

        result.map_err(|e| Error::WriteMember(path.clone(), e))?;
    }

    if !replaced {
        return Err(Error::MemberNotFound(name.to_owned()));
    }

    builder.into_inner().map_err(Error::Finish)
}
