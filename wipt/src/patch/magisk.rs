/*
 * SPDX-FileCopyrightText: 2024 The wipt Authors
 * SPDX-License-Identifier: GPL-3.0-only
 */

use std::{
    fs,
    path::{Path, PathBuf},
    sync::atomic::AtomicBool,
};

use crate::{
    log::LogSink,
    patch::{
        BootImagePatch, Error, PatchOptions, PatchResult, Result,
        assets::{self, AssetBundle},
        engine::{self, CpioEdit, EngineCommand, EngineEnv, ImagePatchEngine, MagiskBoot},
    },
    stream,
    workspace::Workspace,
};

/// Root a boot image by injecting Magisk's init and payloads into the ramdisk
/// with `magiskboot`.
pub struct MagiskRootPatcher {
    bundle: AssetBundle,
    options: PatchOptions,
    engine: Box<dyn ImagePatchEngine + Send + Sync>,
}

impl MagiskRootPatcher {
    /// Workspace subdirectory used as the engine's working directory.
    pub const WORK_DIR: &'static str = "magisk";

    const STAGED_INIT: &'static str = "magiskinit";
    const STAGED_MAGISK: &'static str = "magisk";
    const STAGED_INIT_LD: &'static str = "init-ld";
    const STAGED_STUB: &'static str = "stub.apk";

    const XZ_MAGISK: &'static str = "magisk.xz";
    const XZ_INIT_LD: &'static str = "init-ld.xz";
    const XZ_STUB: &'static str = "stub.xz";

    const BOOT_IMAGE: &'static str = "boot.img";
    const RAMDISK: &'static str = "ramdisk.cpio";
    const NEW_BOOT_IMAGE: &'static str = "new-boot.img";

    const OVERLAY_DIR: &'static str = "overlay.d";
    const OVERLAY_SBIN_DIR: &'static str = "overlay.d/sbin";

    const MODE_EXEC: u32 = 0o750;
    const MODE_FILE: u32 = 0o644;

    /// Resolve the assets for `options.arch` from `asset_dir` and use the
    /// `magiskboot` executable in the same directory.
    pub fn new(asset_dir: &Path, options: PatchOptions, sink: &dyn LogSink) -> Result<Self> {
        let bundle = assets::resolve(asset_dir, options.arch, sink)?;
        let engine = MagiskBoot::new(&assets::engine_path(asset_dir));

        sink.debug(&format!("Using patching engine: {:?}", engine.path()));

        Ok(Self::with_engine(bundle, options, Box::new(engine)))
    }

    pub fn with_engine(
        bundle: AssetBundle,
        options: PatchOptions,
        engine: Box<dyn ImagePatchEngine + Send + Sync>,
    ) -> Self {
        Self {
            bundle,
            options,
            engine,
        }
    }

    /// Ramdisk modifications, in the order they are applied.
    pub fn ramdisk_edits(has_init_ld: bool, has_stub: bool) -> Vec<CpioEdit> {
        let add = |mode, path: &str, source: &str| CpioEdit::Add {
            mode,
            path: path.to_owned(),
            source: source.to_owned(),
        };
        let mkdir = |path: &str| CpioEdit::Mkdir {
            mode: Self::MODE_EXEC,
            path: path.to_owned(),
        };
        let overlay = |name: &str| format!("{}/{name}", Self::OVERLAY_SBIN_DIR);

        let mut edits = vec![
            add(Self::MODE_EXEC, "init", Self::STAGED_INIT),
            mkdir(Self::OVERLAY_DIR),
            mkdir(Self::OVERLAY_SBIN_DIR),
            add(Self::MODE_FILE, &overlay(Self::XZ_MAGISK), Self::XZ_MAGISK),
        ];

        if has_init_ld {
            edits.push(add(Self::MODE_FILE, &overlay(Self::XZ_INIT_LD), Self::XZ_INIT_LD));
        }
        if has_stub {
            edits.push(add(Self::MODE_FILE, &overlay(Self::XZ_STUB), Self::XZ_STUB));
        }

        edits
    }

    /// Every file name that may be staged into the working directory.
    fn staged_names() -> [&'static str; 7] {
        [
            Self::STAGED_INIT,
            Self::STAGED_MAGISK,
            Self::STAGED_INIT_LD,
            Self::STAGED_STUB,
            Self::XZ_MAGISK,
            Self::XZ_INIT_LD,
            Self::XZ_STUB,
        ]
    }

    fn copy_in(
        source: &Path,
        target: &Path,
        sink: &dyn LogSink,
        cancel_signal: &AtomicBool,
    ) -> Result<()> {
        stream::copy_file(source, target, cancel_signal)
            .map_err(|e| Error::File(source.to_owned(), e))?;
        sink.debug(&format!("Staged {source:?} as {target:?}"));

        Ok(())
    }

    fn run(
        &self,
        command: EngineCommand,
        env: &EngineEnv,
        work_dir: &Path,
        sink: &dyn LogSink,
        cancel_signal: &AtomicBool,
    ) -> Result<()> {
        stream::check_cancel(cancel_signal).map_err(Error::Cancelled)?;

        self.engine.run(&command, env, work_dir, sink)?;

        Ok(())
    }

    /// Steps up to and including the repack. Staged files are cleaned up by
    /// the caller regardless of how far this gets.
    fn patch_in(
        &self,
        raw_image: &Path,
        work_dir: &Path,
        sink: &dyn LogSink,
        cancel_signal: &AtomicBool,
    ) -> Result<()> {
        let env = self.options.engine_env();
        let no_env = EngineEnv::default();

        sink.info("Staging Magisk binaries");

        Self::copy_in(
            &self.bundle.init,
            &work_dir.join(Self::STAGED_INIT),
            sink,
            cancel_signal,
        )?;

        let mut to_compress = vec![(&self.bundle.magisk, Self::STAGED_MAGISK, Self::XZ_MAGISK)];
        if let Some(path) = &self.bundle.init_ld {
            to_compress.push((path, Self::STAGED_INIT_LD, Self::XZ_INIT_LD));
        }
        if let Some(path) = &self.bundle.stub {
            to_compress.push((path, Self::STAGED_STUB, Self::XZ_STUB));
        }

        for (source, staged, _) in &to_compress {
            Self::copy_in(source, &work_dir.join(staged), sink, cancel_signal)?;
        }

        sink.info("Compressing payloads");

        for (_, staged, compressed) in &to_compress {
            let command = EngineCommand::Compress {
                source: PathBuf::from(staged),
                target: PathBuf::from(compressed),
            };
            let subcommand = command.subcommand();

            self.run(command, &no_env, work_dir, sink, cancel_signal)?;

            let output = work_dir.join(compressed);
            if !output.is_file() {
                return Err(engine::Error::NoOutput {
                    subcommand,
                    path: output,
                }
                .into());
            }
        }

        sink.info("Unpacking boot image");

        Self::copy_in(
            raw_image,
            &work_dir.join(Self::BOOT_IMAGE),
            sink,
            cancel_signal,
        )?;
        self.run(
            EngineCommand::Unpack {
                image: PathBuf::from(Self::BOOT_IMAGE),
            },
            &no_env,
            work_dir,
            sink,
            cancel_signal,
        )?;

        let ramdisk = work_dir.join(Self::RAMDISK);
        if !ramdisk.is_file() {
            return Err(Error::NoRamdisk(ramdisk));
        }

        sink.info("Patching ramdisk");

        for edit in Self::ramdisk_edits(self.bundle.init_ld.is_some(), self.bundle.stub.is_some())
        {
            self.run(
                EngineCommand::Cpio {
                    ramdisk: PathBuf::from(Self::RAMDISK),
                    edit,
                },
                &env,
                work_dir,
                sink,
                cancel_signal,
            )?;
        }

        sink.info("Repacking boot image");

        self.run(
            EngineCommand::Repack {
                image: PathBuf::from(Self::BOOT_IMAGE),
            },
            &env,
            work_dir,
            sink,
            cancel_signal,
        )
    }

    fn clean_up(work_dir: &Path, sink: &dyn LogSink) {
        for name in Self::staged_names() {
            let path = work_dir.join(name);

            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => sink.debug(&format!("Failed to remove {path:?}: {e}")),
            }
        }
    }
}

impl BootImagePatch for MagiskRootPatcher {
    fn patcher_name(&self) -> &'static str {
        "MagiskRootPatcher"
    }

    fn patch(
        &self,
        raw_image: &Path,
        workspace: &Workspace,
        sink: &dyn LogSink,
        cancel_signal: &AtomicBool,
    ) -> Result<PatchResult> {
        let work_dir = workspace
            .subdir(Self::WORK_DIR)
            .map_err(Error::Workspace)?;

        let result = self.patch_in(raw_image, &work_dir, sink, cancel_signal);
        Self::clean_up(&work_dir, sink);
        result?;

        let patched_image = work_dir.join(Self::NEW_BOOT_IMAGE);
        if !patched_image.is_file() {
            return Err(Error::PatchedImageMissing(patched_image));
        }

        sink.info(&format!("Patched boot image: {patched_image:?}"));

        Ok(PatchResult { patched_image })
    }
}
