/*
 * SPDX-FileCopyrightText: 2023 Andrew Gunnerson
 * SPDX-License-Identifier: GPL-3.0-only
 */

use std::fmt;

pub const ZEROS: [u8; 16384] = [0u8; 16384];

/// A small wrapper to format a byte count in mebibytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NumMiB(pub u64);

impl fmt::Display for NumMiB {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}MB", self.0)
    }
}

/// Stores the [`fmt::Debug`] representation of a value so that it can be
/// included in an error type without requiring the value itself to be
/// [`Send`] or [`Sync`].
#[derive(Clone)]
pub struct DebugString(String);

impl DebugString {
    pub fn new<T: fmt::Debug + ?Sized>(value: &T) -> Self {
        Self(format!("{value:?}"))
    }
}

impl fmt::Debug for DebugString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Check if a byte slice is all zeros.
pub fn is_zero(mut buf: &[u8]) -> bool {
    while !buf.is_empty() {
        let n = buf.len().min(ZEROS.len());
        if buf[..n] != ZEROS[..n] {
            return false;
        }

        buf = &buf[n..];
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_detection() {
        assert!(is_zero(&[]));
        assert!(is_zero(&[0u8; 40000]));

        let mut buf = vec![0u8; 40000];
        buf[39999] = 1;
        assert!(!is_zero(&buf));
    }

    #[test]
    fn mib_formatting() {
        assert_eq!(NumMiB(4096).to_string(), "4096MB");
    }
}
