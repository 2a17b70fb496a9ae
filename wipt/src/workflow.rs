// SPDX-FileCopyrightText: 2024 The wipt Authors
// SPDX-License-Identifier: GPL-3.0-only

//! The full pipeline: detect, unwrap, patch, rewrap.

use std::{
    io,
    path::{Path, PathBuf},
    sync::atomic::AtomicBool,
};

use thiserror::Error;

use crate::{
    container::{self, rewrap::OutputSpec},
    log::LogSink,
    patch::{
        self, BootImagePatch, MagiskRootPatcher, PassthroughPatcher, PatchOptions, PatcherKind,
    },
    workspace::Workspace,
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to create workspace")]
    Workspace(#[source] io::Error),
    #[error("Failed to unpack input")]
    Unwrap(#[from] container::unwrap::Error),
    #[error("Failed to patch boot image")]
    Patch(#[from] patch::Error),
    #[error("Failed to repack output")]
    Rewrap(#[from] container::rewrap::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Everything needed for one patching run.
#[derive(Clone, Debug)]
pub struct PatchJob {
    pub input: PathBuf,
    pub output: OutputSpec,
    pub patcher: PatcherKind,
    pub options: PatchOptions,
    pub asset_dir: PathBuf,
    /// Parent directory for the workspace. The system temporary directory is
    /// used if unset.
    pub work_dir: Option<PathBuf>,
}

/// Instantiate the patcher selected in `job`.
pub fn build_patcher(job: &PatchJob, sink: &dyn LogSink) -> Result<Box<dyn BootImagePatch>> {
    let patcher: Box<dyn BootImagePatch> = match job.patcher {
        PatcherKind::Magisk => Box::new(MagiskRootPatcher::new(&job.asset_dir, job.options, sink)?),
        PatcherKind::Passthrough => Box::new(PassthroughPatcher),
    };

    Ok(patcher)
}

fn execute_in(
    input: &Path,
    output: &OutputSpec,
    patcher: &dyn BootImagePatch,
    workspace: &Workspace,
    sink: &dyn LogSink,
    cancel_signal: &AtomicBool,
) -> Result<PathBuf> {
    let kind = container::detect(input);
    sink.info(&format!("Detected input type: {kind}"));

    let extracted = container::unwrap::unwrap(input, kind, workspace, sink, cancel_signal)?;

    sink.info(&format!("Patching with {}", patcher.patcher_name()));
    let patched = patcher.patch(&extracted.raw_image, workspace, sink, cancel_signal)?;

    let path = container::rewrap::rewrap(
        &patched.patched_image,
        input,
        extracted.origin,
        extracted.member_name.as_deref(),
        output,
        sink,
        cancel_signal,
    )?;

    Ok(path)
}

/// Run the whole pipeline on `input` with an already constructed patcher.
/// Every intermediate file lives in a fresh workspace under `work_parent`,
/// which is removed before returning, whether or not the run succeeded.
pub fn execute(
    input: &Path,
    output: &OutputSpec,
    patcher: &dyn BootImagePatch,
    work_parent: Option<&Path>,
    sink: &dyn LogSink,
    cancel_signal: &AtomicBool,
) -> Result<PathBuf> {
    let workspace = Workspace::new(work_parent).map_err(Error::Workspace)?;
    sink.debug(&format!("Created workspace: {:?}", workspace.path()));

    let result = execute_in(input, output, patcher, &workspace, sink, cancel_signal);

    workspace.close(sink);

    match &result {
        Ok(path) => sink.success(&format!("Wrote patched output: {path:?}")),
        Err(e) => sink.error(&format_chain(e)),
    }

    result
}

/// Build the patcher described by `job` and run the pipeline.
pub fn run(job: &PatchJob, sink: &dyn LogSink, cancel_signal: &AtomicBool) -> Result<PathBuf> {
    let patcher = match build_patcher(job, sink) {
        Ok(p) => p,
        Err(e) => {
            sink.error(&format_chain(&e));
            return Err(e);
        }
    };

    execute(
        &job.input,
        &job.output,
        patcher.as_ref(),
        job.work_dir.as_deref(),
        sink,
        cancel_signal,
    )
}

/// Render an error and all of its sources on one line.
pub fn format_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut message = error.to_string();
    let mut source = error.source();

    while let Some(e) = source {
        message.push_str(": ");
        message.push_str(&e.to_string());
        source = e.source();
    }

    message
}
