// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::{io, path::PathBuf};

use thiserror::Error;

use crate::{
    format::{sin, zip},
    patch::script,
    sign,
    util::NumMiB,
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("Not enough free space in {path:?}: {available} available, but {required} required")]
    InsufficientSpace {
        path: PathBuf,
        available: NumMiB,
        required: NumMiB,
    },
    #[error("{name:?} does not exist in firmware: {archive:?}")]
    MissingEntry { archive: PathBuf, name: String },
    #[error("Failed to query free space: {0:?}")]
    DiskSpace(PathBuf, #[source] io::Error),
    #[error("Malformed SIN container: {0:?}")]
    MalformedContainer(PathBuf, #[source] sin::Error),
    #[error("Failed to decode SIN container: {0:?}")]
    Container(PathBuf, #[source] sin::Error),
    #[error("Failed to patch installer script")]
    Script(#[from] script::Error),
    #[error("Failed to update archive")]
    Archive(#[from] zip::Error),
    #[error("Failed to sign archive")]
    Sign(#[from] sign::Error),
    #[error("Unknown extra file: {0:?}")]
    UnknownExtraFile(String),
    #[error("I/O error: {0:?}")]
    Io(PathBuf, #[source] io::Error),
}

impl Error {
    /// Classify a container decoding failure by whether the input itself is
    /// at fault.
    pub fn from_container(path: PathBuf, e: sin::Error) -> Self {
        if e.is_malformed() {
            Self::MalformedContainer(path, e)
        } else {
            Self::Container(path, e)
        }
    }

    /// Soft failures are reported as warnings and do not stop the run.
    pub fn is_soft(&self) -> bool {
        matches!(self, Self::Sign(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Format an error along with all of its sources on a single line.
pub fn error_chain(e: &dyn std::error::Error) -> String {
    let mut message = e.to_string();
    let mut source = e.source();

    while let Some(s) = source {
        message.push_str(": ");
        message.push_str(&s.to_string());
        source = s.source();
    }

    message
}
