// SPDX-FileCopyrightText: 2024 The wipt Authors
// SPDX-License-Identifier: GPL-3.0-only

//! Log routing for the patching pipeline.
//!
//! Every stage receives a `&dyn LogSink` instead of logging through ambient
//! state. The CLI uses [`TracingLogSink`], which forwards to the `tracing`
//! macros. A front-end that runs the pipeline on a worker thread uses
//! [`ChannelLogSink`] to hand messages back to its own thread.

use std::{
    fmt,
    sync::{Mutex, mpsc::Sender},
};

use tracing::{debug, error, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Severity {
    Info,
    Debug,
    Warning,
    Error,
    Success,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Debug => "DEBUG",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Success => "SUCCESS",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Destination for pipeline log messages. Implementations must not panic and
/// must not block for long.
pub trait LogSink {
    fn log(&self, severity: Severity, message: &str);

    fn info(&self, message: &str) {
        self.log(Severity::Info, message);
    }

    fn debug(&self, message: &str) {
        self.log(Severity::Debug, message);
    }

    fn warning(&self, message: &str) {
        self.log(Severity::Warning, message);
    }

    fn error(&self, message: &str) {
        self.log(Severity::Error, message);
    }

    fn success(&self, message: &str) {
        self.log(Severity::Success, message);
    }
}

impl<S: LogSink + ?Sized> LogSink for &S {
    fn log(&self, severity: Severity, message: &str) {
        (**self).log(severity, message);
    }
}

/// Forward messages to the global `tracing` subscriber.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn log(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Info => info!("{message}"),
            Severity::Debug => debug!("{message}"),
            Severity::Warning => warn!("{message}"),
            Severity::Error => error!("{message}"),
            Severity::Success => info!(success = true, "{message}"),
        }
    }
}

/// Relay messages through a channel. Messages sent after the receiver is gone
/// are dropped.
pub struct ChannelLogSink<T> {
    sender: Mutex<Sender<T>>,
    wrap: fn(Severity, String) -> T,
}

impl<T> ChannelLogSink<T> {
    pub fn new(sender: Sender<T>, wrap: fn(Severity, String) -> T) -> Self {
        Self {
            sender: Mutex::new(sender),
            wrap,
        }
    }
}

impl<T> LogSink for ChannelLogSink<T> {
    fn log(&self, severity: Severity, message: &str) {
        let msg = (self.wrap)(severity, message.to_owned());

        // A poisoned lock only means another sender panicked mid-send.
        let sender = match self.sender.lock() {
            Ok(s) => s,
            Err(e) => e.into_inner(),
        };

        let _ = sender.send(msg);
    }
}

/// Collect messages in memory. Mostly useful for tests and for front-ends that
/// want to show the full log after a run.
#[derive(Debug, Default)]
pub struct MemoryLogSink {
    entries: Mutex<Vec<(Severity, String)>>,
}

impl MemoryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<(Severity, String)> {
        match self.entries.lock() {
            Ok(e) => e.clone(),
            Err(e) => e.into_inner().clone(),
        }
    }

    pub fn contains(&self, severity: Severity, needle: &str) -> bool {
        self.entries()
            .iter()
            .any(|(s, m)| *s == severity && m.contains(needle))
    }
}

impl LogSink for MemoryLogSink {
    fn log(&self, severity: Severity, message: &str) {
        let mut entries = match self.entries.lock() {
            Ok(e) => e,
            Err(e) => e.into_inner(),
        };

        entries.push((severity, message.to_owned()));
    }
}
