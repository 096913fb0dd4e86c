// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

//! Literal token substitution for the flashable package's `updater-script`.

use std::{fs, io, path::Path};

use memchr::memmem;
use thiserror::Error;
use tracing::debug;

/// Width that the firmware name field in the installer banner is padded to.
pub const FIELD_WIDTH: usize = 41;

/// Marker replaced by the (padded) firmware name.
pub const FIRMWARE_TOKEN: &str = "INSERT FIRMWARE HERE";

/// Marker replaced by the system partition's unique identifier.
pub const UUID_TOKEN: &str = "INSERT SYSTEM UUID HERE";

/// Device path in the default template that carries [`UUID_TOKEN`].
pub const UUID_DEVICE_TOKEN: &str = "/dev/block/by-uuid/INSERT SYSTEM UUID HERE";

/// System partition by name, for containers without a UUID.
pub const BY_NAME_DEVICE: &str = "/dev/block/platform/msm_sdcc.1/by-name/system";

/// Template used when no custom script is configured.
pub const DEFAULT_TEMPLATE: &str = include_str!("../../res/updater-script");

#[derive(Debug, Error)]
pub enum Error {
    #[error("Token not found in script: {0:?}")]
    TokenNotFound(String),
    #[error("Value is longer than {width} characters: {value:?}")]
    ValueTooLong { value: String, width: usize },
    #[error("Failed to read script: {0:?}")]
    ReadFile(Box<Path>, #[source] io::Error),
    #[error("Failed to write script: {0:?}")]
    WriteFile(Box<Path>, #[source] io::Error),
}

type Result<T> = std::result::Result<T, Error>;

/// Right-pad `value` with spaces to exactly [`FIELD_WIDTH`] characters.
pub fn pad_field(value: &str) -> Result<String> {
    let len = value.chars().count();
    if len > FIELD_WIDTH {
        return Err(Error::ValueTooLong {
            value: value.to_owned(),
            width: FIELD_WIDTH,
        });
    }

    let mut result = String::with_capacity(value.len() + FIELD_WIDTH - len);
    result.push_str(value);
    result.extend(std::iter::repeat_n(' ', FIELD_WIDTH - len));

    Ok(result)
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Check that the match at `offset` is not part of a longer word.
fn is_whole_token(data: &[u8], offset: usize, len: usize) -> bool {
    let before = offset.checked_sub(1).map(|i| data[i]);
    let after = data.get(offset + len).copied();

    !before.is_some_and(is_word_byte) && !after.is_some_and(is_word_byte)
}

/// Replace every non-overlapping whole-token occurrence of `token` in `data`
/// with `replacement`. Matching is exact and case-sensitive.
pub fn replace_in(data: &[u8], token: &str, replacement: &str) -> Result<Vec<u8>> {
    let mut result = Vec::with_capacity(data.len());
    let mut last = 0;
    let mut found = false;

    for offset in memmem::find_iter(data, token.as_bytes()) {
        if !is_whole_token(data, offset, token.len()) {
            continue;
        }

        result.extend_from_slice(&data[last..offset]);
        result.extend_from_slice(replacement.as_bytes());
        last = offset + token.len();
        found = true;
    }

    if !found {
        return Err(Error::TokenNotFound(token.to_owned()));
    }

    result.extend_from_slice(&data[last..]);

    Ok(result)
}

/// Replace every occurrence of `token` in the file at `path` with `value`
/// as-is.
pub fn replace(path: &Path, token: &str, value: &str) -> Result<()> {
    let data = fs::read(path).map_err(|e| Error::ReadFile(path.into(), e))?;
    let patched = replace_in(&data, token, value)?;

    debug!("Replaced {token:?} with {value:?} in {path:?}");

    fs::write(path, patched).map_err(|e| Error::WriteFile(path.into(), e))
}

/// Replace every occurrence of `token` in the file at `path` with
/// `replacement`, padded to [`FIELD_WIDTH`] characters.
pub fn patch(path: &Path, token: &str, replacement: &str) -> Result<()> {
    let padded = pad_field(replacement)?;

    replace(path, token, &padded)
}
