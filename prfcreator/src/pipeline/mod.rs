// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

//! Sequential, cancellable pipeline that turns a firmware archive into a
//! flashable package.
//!
//! The set of steps that apply to a [`Config`] is computed once, up front,
//! and drives both progress reporting and execution. Cancellation is only
//! checked between steps.

pub mod context;
pub mod error;
pub mod preflight;
pub mod steps;

use std::{
    fs, io,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
};

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, error, info, warn};

use crate::config::Config;

pub use self::{
    context::Context,
    error::{Error, Result},
    steps::{STEPS, Step},
};

/// Firmware entry holding the system partition.
pub const SYSTEM_CONTAINER: &str = "system.sin";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Completed { artifact: PathBuf },
    Cancelled,
    Failed(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    /// A step finished. `index` is 1-based and counts applicable steps only.
    Progress {
        index: usize,
        total: usize,
        step: &'static str,
        percent: u8,
    },
    Log(String),
    Warning(String),
    /// Always the last event of a run.
    Finished(Outcome),
}

/// Receiver of events emitted by a run.
pub trait EventSink {
    fn send(&self, event: Event);
}

impl EventSink for Sender<Event> {
    fn send(&self, event: Event) {
        // The receiver going away doesn't affect the run.
        let _ = Sender::send(self, event);
    }
}

/// Sink that discards all events.
pub struct NullSink;

impl EventSink for NullSink {
    fn send(&self, _event: Event) {}
}

pub struct Pipeline<'a> {
    config: &'a Config,
    plan: Vec<&'static Step>,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a Config) -> Self {
        let plan = STEPS.iter().filter(|s| (s.applicable)(config)).collect();

        Self { config, plan }
    }

    /// Steps that will run, in order.
    pub fn plan(&self) -> &[&'static Step] {
        &self.plan
    }

    pub fn total(&self) -> usize {
        self.plan.len()
    }

    /// Remove the intermediate archive unless it was requested to be kept.
    fn discard_partial(&self, sink: &dyn EventSink) {
        let path = self.config.intermediate_path();

        if self.config.keep_partial_output {
            if path.exists() {
                let message = format!("Keeping partial output: {path:?}");
                info!("{message}");
                sink.send(Event::Log(message));
            }
        } else if let Err(e) = fs::remove_file(&path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("Failed to remove partial output: {path:?}: {e}");
            }
        }
    }

    fn fail(&self, sink: &dyn EventSink, message: String, started: bool) -> Outcome {
        error!("{message}");
        sink.send(Event::Log(format!("Error: {message}")));

        if started {
            self.discard_partial(sink);
        }

        Outcome::Failed(message)
    }

    fn execute(&self, cancel_signal: &AtomicBool, sink: &dyn EventSink) -> Outcome {
        if let Err(e) = preflight::run(self.config) {
            return self.fail(sink, error::error_chain(&e), false);
        }

        let scratch = match tempfile::Builder::new()
            .prefix("prfcreator-")
            .tempdir_in(&self.config.scratch_dir)
        {
            Ok(d) => d,
            Err(e) => {
                let e = Error::Io(self.config.scratch_dir.clone(), e);
                return self.fail(sink, error::error_chain(&e), false);
            }
        };

        if let Err(e) = fs::create_dir_all(&self.config.output_dir) {
            let e = Error::Io(self.config.output_dir.clone(), e);
            return self.fail(sink, error::error_chain(&e), false);
        }

        let mut ctx = Context::new(self.config, self.total(), cancel_signal, sink, scratch);

        // Entries are only ever appended, so a leftover archive from an earlier
        // run must not be reused. A leftover signed archive would otherwise sit
        // next to a fresh unsigned one if signing fails.
        for stale in [ctx.archive.clone(), self.config.signed_path()] {
            if let Err(e) = fs::remove_file(&stale) {
                if e.kind() != io::ErrorKind::NotFound {
                    let e = Error::Io(stale, e);
                    return self.fail(sink, error::error_chain(&e), false);
                }
            }
        }

        debug!(
            "Plan: {:?}",
            self.plan.iter().map(|s| s.name).collect::<Vec<_>>(),
        );

        for (i, step) in self.plan.iter().enumerate() {
            if ctx.is_cancelled() {
                ctx.log("Cancelled");
                self.discard_partial(sink);
                return Outcome::Cancelled;
            }

            ctx.index = i + 1;
            debug!("[{}/{}] Running step: {}", ctx.index, ctx.total, step.name);

            if let Err(e) = (step.action)(&mut ctx) {
                let message = format!("{}: {}", step.name, error::error_chain(&e));

                if e.is_soft() {
                    ctx.warn(message);
                } else {
                    drop(ctx);
                    return self.fail(sink, message, true);
                }
            }

            ctx.report_progress(step.name);
        }

        let Some(artifact) = ctx.artifact.take() else {
            drop(ctx);
            return self.fail(sink, "No output was produced".to_owned(), true);
        };

        ctx.log(format!("Finished: {artifact:?}"));

        Outcome::Completed { artifact }
    }

    /// Run all applicable steps on the current thread. A single
    /// [`Event::Finished`] is emitted at the end.
    pub fn run(&self, cancel_signal: &AtomicBool, sink: &dyn EventSink) -> Outcome {
        let outcome = self.execute(cancel_signal, sink);

        sink.send(Event::Finished(outcome.clone()));

        outcome
    }
}

/// Handle to a run executing on a background thread.
pub struct RunHandle {
    cancel_signal: Arc<AtomicBool>,
    events: Receiver<Event>,
    thread: JoinHandle<Outcome>,
}

impl RunHandle {
    /// Request cancellation. This takes effect before the next step starts.
    pub fn cancel(&self) {
        self.cancel_signal.store(true, Ordering::SeqCst);
    }

    pub fn events(&self) -> &Receiver<Event> {
        &self.events
    }

    /// Wait for the worker to exit.
    pub fn join(self) -> Outcome {
        self.thread
            .join()
            .unwrap_or_else(|_| Outcome::Failed("Pipeline worker panicked".to_owned()))
    }
}

/// Start a run on a background thread. Events are delivered through
/// [`RunHandle::events`] until the worker exits.
pub fn spawn(config: Config, cancel_signal: Arc<AtomicBool>) -> io::Result<RunHandle> {
    let (sender, events) = crossbeam_channel::unbounded();
    let signal = cancel_signal.clone();

    let thread = thread::Builder::new()
        .name("pipeline".to_owned())
        .spawn(move || Pipeline::new(&config).run(&signal, &sender))?;

    Ok(RunHandle {
        cancel_signal,
        events,
        thread,
    })
}
