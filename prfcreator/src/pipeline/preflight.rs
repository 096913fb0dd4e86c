// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

//! Checks that run before any step. None of them have side effects.

use std::{io, path::Path};

use tracing::debug;

use crate::{
    config::Config,
    format::zip,
    pipeline::{
        SYSTEM_CONTAINER,
        error::{Error, Result},
    },
    util::NumMiB,
};

const MIB: u64 = 1024 * 1024;

/// Number of bytes available to unprivileged users on the filesystem
/// containing `path`. [`None`] if this can't be determined on the current
/// platform.
#[cfg(unix)]
pub fn available_space(path: &Path) -> io::Result<Option<u64>> {
    let stat = rustix::fs::statvfs(path)?;

    Ok(Some(stat.f_bavail.saturating_mul(stat.f_frsize)))
}

#[cfg(not(unix))]
pub fn available_space(_path: &Path) -> io::Result<Option<u64>> {
    Ok(None)
}

/// Ensure that the scratch directory has at least `min_free_space_mb` MiB free.
pub fn check_free_space(path: &Path, min_free_space_mb: u64) -> Result<()> {
    let Some(available) =
        available_space(path).map_err(|e| Error::DiskSpace(path.to_owned(), e))?
    else {
        debug!("Free space cannot be determined for {path:?}");
        return Ok(());
    };

    let available_mb = available / MIB;
    debug!("{} available in {path:?}", NumMiB(available_mb));

    if available_mb < min_free_space_mb {
        return Err(Error::InsufficientSpace {
            path: path.to_owned(),
            available: NumMiB(available_mb),
            required: NumMiB(min_free_space_mb),
        });
    }

    Ok(())
}

/// Ensure that the firmware archive contains the system partition container.
pub fn check_firmware(firmware: &Path) -> Result<()> {
    if !zip::entry_exists(firmware, SYSTEM_CONTAINER)? {
        return Err(Error::MissingEntry {
            archive: firmware.to_owned(),
            name: SYSTEM_CONTAINER.to_owned(),
        });
    }

    Ok(())
}

pub fn run(config: &Config) -> Result<()> {
    check_free_space(&config.scratch_dir, config.min_free_space_mb)?;
    check_firmware(&config.firmware)?;

    Ok(())
}
