// SPDX-FileCopyrightText: 2024 The wipt Authors
// SPDX-License-Identifier: GPL-3.0-only

//! Background execution for front-ends that must stay responsive while a
//! patch runs. Only owned data crosses the thread boundary.

use std::{
    path::PathBuf,
    sync::{Arc, atomic::AtomicBool, mpsc},
    thread,
};

use crate::{
    log::{ChannelLogSink, Severity},
    workflow::{self, PatchJob},
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobMessage {
    Log { severity: Severity, message: String },
    /// Always the last message of a job.
    Finished(Result<PathBuf, String>),
}

pub struct JobHandle {
    pub rx: mpsc::Receiver<JobMessage>,
    thread: thread::JoinHandle<()>,
}

impl JobHandle {
    /// Block until the job is finished, handing every log message to
    /// `on_log` as it arrives.
    pub fn wait(self, mut on_log: impl FnMut(Severity, &str)) -> Result<PathBuf, String> {
        let mut outcome = None;

        for msg in self.rx.iter() {
            match msg {
                JobMessage::Log { severity, message } => on_log(severity, &message),
                JobMessage::Finished(result) => outcome = Some(result),
            }
        }

        if self.thread.join().is_err() {
            return Err("Patch job panicked".to_owned());
        }

        outcome.unwrap_or_else(|| Err("Patch job ended without a result".to_owned()))
    }
}

/// Run `job` on a new thread.
pub fn spawn(job: PatchJob, cancel_signal: Arc<AtomicBool>) -> JobHandle {
    let (tx, rx) = mpsc::channel();

    let thread = thread::spawn(move || {
        let sink = ChannelLogSink::new(tx.clone(), |severity, message| JobMessage::Log {
            severity,
            message,
        });

        let result = workflow::run(&job, &sink, &cancel_signal)
            .map_err(|e| workflow::format_chain(&e));

        let _ = tx.send(JobMessage::Finished(result));
    });

    JobHandle { rx, thread }
}
