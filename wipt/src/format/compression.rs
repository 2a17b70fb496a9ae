// SPDX-FileCopyrightText: 2024 The wipt Authors
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    fs::File,
    io::{self, Read, Write},
    path::Path,
};

use lz4_flex::frame::{FrameDecoder, FrameEncoder};

use crate::stream::ReadFixedSizeExt;

/// Magic bytes at the start of every LZ4 frame (0x184D2204, little endian).
pub static LZ4_FRAME_MAGIC: &[u8; 4] = b"\x04\x22\x4d\x18";

/// Check whether the file at `path` begins with the LZ4 frame magic. Files
/// shorter than the magic are reported as I/O errors so that callers can tell
/// "not LZ4" apart from "could not look".
pub fn has_lz4_magic(path: &Path) -> io::Result<bool> {
    let mut file = File::open(path)?;
    let magic = file.read_array_exact::<4>()?;

    Ok(&magic == LZ4_FRAME_MAGIC)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressedFormat {
    None,
    Lz4,
}

pub enum CompressedReader<R: Read> {
    None(R),
    Lz4(FrameDecoder<R>),
}

impl<R: Read> CompressedReader<R> {
    pub fn with_format(reader: R, format: CompressedFormat) -> Self {
        match format {
            CompressedFormat::None => Self::None(reader),
            CompressedFormat::Lz4 => Self::Lz4(FrameDecoder::new(reader)),
        }
    }
}

impl<R: Read> Read for CompressedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::None(r) => r.read(buf),
            Self::Lz4(r) => r.read(buf),
        }
    }
}

pub enum CompressedWriter<W: Write> {
    None(W),
    Lz4(FrameEncoder<W>),
}

impl<W: Write> CompressedWriter<W> {
    pub fn new(writer: W, format: CompressedFormat) -> Self {
        match format {
            CompressedFormat::None => Self::None(writer),
            CompressedFormat::Lz4 => Self::Lz4(FrameEncoder::new(writer)),
        }
    }

    /// Write the end of the frame and return the inner writer. Dropping the
    /// writer without calling this produces a truncated frame.
    pub fn finish(self) -> io::Result<W> {
        match self {
            Self::None(w) => Ok(w),
            Self::Lz4(w) => w.finish().map_err(io::Error::other),
        }
    }
}

impl<W: Write> Write for CompressedWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::None(w) => w.write(buf),
            Self::Lz4(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::None(w) => w.flush(),
            Self::Lz4(w) => w.flush(),
        }
    }
}
