// SPDX-FileCopyrightText: 2024 The wipt Authors
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    fs::File,
    io::{self, BufReader, BufWriter, Read, Write},
    path::Path,
    sync::atomic::{AtomicBool, Ordering},
};

/// Extensions for readers to read fixed-size data.
pub trait ReadFixedSizeExt {
    /// Read fixed-size array.
    fn read_array_exact<const N: usize>(&mut self) -> io::Result<[u8; N]>;
}

impl<R: Read> ReadFixedSizeExt for R {
    fn read_array_exact<const N: usize>(&mut self) -> io::Result<[u8; N]> {
        let mut buf = [0u8; N];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }
}

/// Return [`io::ErrorKind::Interrupted`] if `cancel_signal` is set. Called on
/// every iteration of the copy loops below.
#[inline]
pub fn check_cancel(cancel_signal: &AtomicBool) -> io::Result<()> {
    if cancel_signal.load(Ordering::SeqCst) {
        return Err(io::Error::new(
            io::ErrorKind::Interrupted,
            "Received cancel signal",
        ));
    }

    Ok(())
}

/// Copy data from `reader` to `writer` until `reader` reaches EOF. The
/// operation is cancelled on the next loop iteration if `cancel_signal` is set
/// to `true`.
pub fn copy(
    mut reader: impl Read,
    mut writer: impl Write,
    cancel_signal: &AtomicBool,
) -> io::Result<u64> {
    let mut buf = [0u8; 16384];
    let mut copied = 0;

    loop {
        check_cancel(cancel_signal)?;

        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            // Distinguish EINTR from our own cancellation, which is checked
            // above.
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };

        writer.write_all(&buf[..n])?;

        copied += n as u64;
    }

    Ok(copied)
}

/// Copy a file's contents to a new file at `target`, truncating any existing
/// file. Unlike [`std::fs::copy`], this honors `cancel_signal` and does not
/// carry over permissions.
pub fn copy_file(source: &Path, target: &Path, cancel_signal: &AtomicBool) -> io::Result<u64> {
    let reader = File::open(source).map(BufReader::new)?;
    let mut writer = File::create(target).map(BufWriter::new)?;

    let n = copy(reader, &mut writer, cancel_signal)?;
    writer.flush()?;

    Ok(n)
}
