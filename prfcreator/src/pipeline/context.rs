// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, Ordering},
};

use tempfile::TempDir;
use tracing::{info, warn};

use crate::{
    config::Config,
    format::sin::PartitionUuid,
    pipeline::{Event, EventSink},
};

/// Mutable state of a single run. This is owned by the worker and dropped,
/// along with the scratch directory, when the run ends.
pub struct Context<'a> {
    pub config: &'a Config,
    /// 1-based index of the current step within the applicable plan.
    pub index: usize,
    /// Number of applicable steps.
    pub total: usize,
    cancel_signal: &'a AtomicBool,
    sink: &'a dyn EventSink,
    scratch: TempDir,
    /// Intermediate archive being assembled.
    pub archive: PathBuf,
    /// `system.sin` extracted from the firmware.
    pub container: Option<PathBuf>,
    /// Raw filesystem image decoded from [`Self::container`].
    pub image: Option<PathBuf>,
    pub uuid: Option<PartitionUuid>,
    pub signed: Option<PathBuf>,
    pub artifact: Option<PathBuf>,
}

impl<'a> Context<'a> {
    pub fn new(
        config: &'a Config,
        total: usize,
        cancel_signal: &'a AtomicBool,
        sink: &'a dyn EventSink,
        scratch: TempDir,
    ) -> Self {
        Self {
            config,
            index: 0,
            total,
            cancel_signal,
            sink,
            scratch,
            archive: config.intermediate_path(),
            container: None,
            image: None,
            uuid: None,
            signed: None,
            artifact: None,
        }
    }

    pub fn scratch_dir(&self) -> &Path {
        self.scratch.path()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_signal.load(Ordering::SeqCst)
    }

    pub fn emit(&self, event: Event) {
        self.sink.send(event);
    }

    pub fn log(&self, message: impl Into<String>) {
        let message = message.into();
        info!("{message}");
        self.emit(Event::Log(message));
    }

    pub fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        warn!("{message}");
        self.emit(Event::Warning(message));
    }

    /// Report that the current step finished.
    pub fn report_progress(&self, step: &'static str) {
        let percent = (self.index * 100)
            .checked_div(self.total)
            .unwrap_or(100)
            .min(100) as u8;

        self.emit(Event::Progress {
            index: self.index,
            total: self.total,
            step,
            percent,
        });
    }
}
