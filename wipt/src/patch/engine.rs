// SPDX-FileCopyrightText: 2024 The wipt Authors
// SPDX-License-Identifier: GPL-3.0-only

//! Protocol for driving `magiskboot`, the external tool that knows how to
//! unpack, edit, and repack boot images.

use std::{
    ffi::OsString,
    fmt, io,
    path::{Path, PathBuf},
    process::Command,
};

use thiserror::Error;

use crate::log::LogSink;

pub const ENV_KEEP_VERITY: &str = "KEEPVERITY";
pub const ENV_KEEP_FORCE_ENCRYPT: &str = "KEEPFORCEENCRYPT";
pub const ENV_PATCH_VBMETA_FLAG: &str = "PATCHVBMETAFLAG";
pub const ENV_RECOVERY_MODE: &str = "RECOVERYMODE";
pub const ENV_LEGACY_SAR: &str = "LEGACYSAR";

/// Every environment variable the engine recognizes. Anything not explicitly
/// enabled is removed from the child's environment so that the caller's
/// environment can't leak in.
pub const KNOWN_ENV: [&str; 5] = [
    ENV_KEEP_VERITY,
    ENV_KEEP_FORCE_ENCRYPT,
    ENV_PATCH_VBMETA_FLAG,
    ENV_RECOVERY_MODE,
    ENV_LEGACY_SAR,
];

/// Value used for enabled flags.
pub const ENV_TRUE: &str = "true";

#[derive(Debug, Error)]
pub enum Error {
    #[error("Patching engine not found or not executable: {0:?}")]
    EngineMissing(PathBuf, #[source] io::Error),
    #[error("Failed to run patching engine: {0:?}")]
    Spawn(PathBuf, #[source] io::Error),
    #[error("Engine command `{subcommand}` failed with exit code {}", fmt_code(*.code))]
    ExitStatus {
        subcommand: &'static str,
        code: Option<i32>,
    },
    #[error("Engine command `{subcommand}` did not produce {path:?}")]
    NoOutput {
        subcommand: &'static str,
        path: PathBuf,
    },
}

fn fmt_code(code: Option<i32>) -> String {
    match code {
        Some(c) => c.to_string(),
        None => "<killed by signal>".to_owned(),
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Set of flags to enable for an invocation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EngineEnv {
    active: Vec<&'static str>,
}

impl EngineEnv {
    pub fn set(&mut self, name: &'static str) {
        if !self.active.contains(&name) {
            self.active.push(name);
        }
    }

    pub fn is_set(&self, name: &str) -> bool {
        self.active.contains(&name)
    }

    pub fn active(&self) -> &[&'static str] {
        &self.active
    }
}

/// A single ramdisk modification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CpioEdit {
    /// Add the file at `source` (relative to the working directory) to the
    /// ramdisk as `path`.
    Add {
        mode: u32,
        path: String,
        source: String,
    },
    Mkdir {
        mode: u32,
        path: String,
    },
}

impl fmt::Display for CpioEdit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Add { mode, path, source } => write!(f, "add {mode:04o} {path} {source}"),
            Self::Mkdir { mode, path } => write!(f, "mkdir {mode:04o} {path}"),
        }
    }
}

/// One engine invocation. All paths are relative to the working directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EngineCommand {
    /// Compress `source` into the engine's native xz format at `target`.
    Compress { source: PathBuf, target: PathBuf },
    /// Split a boot image into its components, including `ramdisk.cpio`.
    Unpack { image: PathBuf },
    /// Apply one edit to a ramdisk cpio archive.
    Cpio { ramdisk: PathBuf, edit: CpioEdit },
    /// Rebuild a boot image from the unpacked components of `image`.
    Repack { image: PathBuf },
}

impl EngineCommand {
    pub fn subcommand(&self) -> &'static str {
        match self {
            Self::Compress { .. } => "xz",
            Self::Unpack { .. } => "unpack",
            Self::Cpio { .. } => "cpio",
            Self::Repack { .. } => "repack",
        }
    }

    /// Full argument list, including the subcommand.
    pub fn args(&self) -> Vec<OsString> {
        let mut args = vec![OsString::from(self.subcommand())];

        match self {
            Self::Compress { source, target } => {
                args.push(source.into());
                args.push(target.into());
            }
            Self::Unpack { image } | Self::Repack { image } => {
                args.push(image.into());
            }
            Self::Cpio { ramdisk, edit } => {
                args.push(ramdisk.into());
                args.push(edit.to_string().into());
            }
        }

        args
    }
}

impl fmt::Display for EngineCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, arg) in self.args().iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }

            let arg = arg.to_string_lossy();
            if arg.contains(' ') {
                write!(f, "{arg:?}")?;
            } else {
                f.write_str(&arg)?;
            }
        }

        Ok(())
    }
}

/// Something that can carry out [`EngineCommand`]s. Invocations are
/// synchronous and run with `work_dir` as the current directory.
pub trait ImagePatchEngine {
    fn run(
        &self,
        command: &EngineCommand,
        env: &EngineEnv,
        work_dir: &Path,
        sink: &dyn LogSink,
    ) -> Result<()>;
}

/// Runs the real `magiskboot` executable.
#[derive(Clone, Debug)]
pub struct MagiskBoot {
    path: PathBuf,
}

impl MagiskBoot {
    pub fn new(path: &Path) -> Self {
        // The child runs in a different directory, so relative paths would
        // resolve differently.
        let path = std::path::absolute(path).unwrap_or_else(|_| path.to_owned());

        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn log_output(sink: &dyn LogSink, stream: &str, data: &[u8]) {
        for line in String::from_utf8_lossy(data).lines() {
            sink.debug(&format!("[{stream}] {line}"));
        }
    }
}

impl ImagePatchEngine for MagiskBoot {
    fn run(
        &self,
        command: &EngineCommand,
        env: &EngineEnv,
        work_dir: &Path,
        sink: &dyn LogSink,
    ) -> Result<()> {
        sink.debug(&format!("Running: magiskboot {command}"));

        let mut process = Command::new(&self.path);
        process.args(command.args()).current_dir(work_dir);

        for name in KNOWN_ENV {
            process.env_remove(name);
        }
        for name in env.active() {
            process.env(name, ENV_TRUE);
        }

        let output = match process.output() {
            Ok(o) => o,
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied,
                ) =>
            {
                return Err(Error::EngineMissing(self.path.clone(), e));
            }
            Err(e) => return Err(Error::Spawn(self.path.clone(), e)),
        };

        Self::log_output(sink, "stdout", &output.stdout);
        Self::log_output(sink, "stderr", &output.stderr);

        if !output.status.success() {
            return Err(Error::ExitStatus {
                subcommand: command.subcommand(),
                code: output.status.code(),
            });
        }

        Ok(())
    }
}
