// SPDX-FileCopyrightText: 2024 The wipt Authors
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use tempfile::TempDir;

use crate::log::LogSink;

/// Private scratch directory for a single patching run.
///
/// Subdirectories are created on first use. The directory is removed by
/// [`Workspace::close`], or on drop if `close` was never reached (eg. during a
/// panic). Removal failures are logged and never turned into errors.
#[derive(Debug)]
pub struct Workspace {
    dir: Option<TempDir>,
    path: PathBuf,
}

impl Workspace {
    const PREFIX: &'static str = "wipt-";

    /// Create a new workspace under the system temporary directory, or under
    /// `parent` if specified.
    pub fn new(parent: Option<&Path>) -> io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(Self::PREFIX);

        let dir = match parent {
            Some(p) => {
                fs::create_dir_all(p)?;
                builder.tempdir_in(p)?
            }
            None => builder.tempdir()?,
        };
        let path = dir.path().to_owned();

        Ok(Self {
            dir: Some(dir),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the path to the subdirectory `name`, creating it if needed.
    pub fn subdir(&self, name: &str) -> io::Result<PathBuf> {
        let path = self.path.join(name);
        fs::create_dir_all(&path)?;
        Ok(path)
    }

    /// Remove the workspace. This only happens once, no matter how many times
    /// it is called.
    pub fn close(mut self, sink: &dyn LogSink) {
        self.remove(sink);
    }

    fn remove(&mut self, sink: &dyn LogSink) {
        let Some(dir) = self.dir.take() else {
            return;
        };

        match dir.close() {
            Ok(()) => sink.debug(&format!("Removed workspace: {:?}", self.path)),
            Err(e) => sink.warning(&format!(
                "Failed to remove workspace {:?}: {e}",
                self.path,
            )),
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        self.remove(&crate::log::TracingLogSink);
    }
}
