// SPDX-FileCopyrightText: 2025-2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

//! Additive zip archive operations. Entries are only ever appended. Existing
//! entries are never rewritten.

use std::{
    fs::{self, File, OpenOptions},
    io::{self, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::debug;
use zip::{CompressionMethod, ZipArchive, ZipWriter, result::ZipError, write::SimpleFileOptions};

use crate::stream;

/// Entries at or above this size need zip64 extensions.
const ZIP64_THRESHOLD: u64 = 0xffffffff;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Entry {name:?} not found in archive: {archive:?}")]
    EntryNotFound { archive: PathBuf, name: String },
    #[error("Entry name has no usable file name: {0:?}")]
    UnsafeName(String),
    #[error("Zip error: {0:?}")]
    Zip(PathBuf, #[source] ZipError),
    #[error("I/O error: {0:?}")]
    Io(PathBuf, #[source] io::Error),
}

type Result<T> = std::result::Result<T, Error>;

/// A file to be appended to an archive.
#[derive(Clone, Debug)]
pub struct ArchiveEntry {
    /// Name of the entry inside the archive.
    pub name: String,
    /// File to read the entry's data from.
    pub source: PathBuf,
    /// Whether to deflate the data. Payloads that are already compressed
    /// containers (eg. nested zips) should be stored as-is.
    pub compress: bool,
    /// Whether to delete [`Self::source`] after it has been appended.
    pub delete_source_after: bool,
}

impl ArchiveEntry {
    pub fn new(name: impl Into<String>, source: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            compress: true,
            delete_source_after: false,
        }
    }

    pub fn stored(mut self) -> Self {
        self.compress = false;
        self
    }

    pub fn delete_source_after(mut self) -> Self {
        self.delete_source_after = true;
        self
    }
}

fn open_writer(archive: &Path) -> Result<ZipWriter<File>> {
    let exists = archive
        .try_exists()
        .map_err(|e| Error::Io(archive.to_owned(), e))?;

    if exists {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(archive)
            .map_err(|e| Error::Io(archive.to_owned(), e))?;

        ZipWriter::new_append(file).map_err(|e| Error::Zip(archive.to_owned(), e))
    } else {
        let file = File::create(archive).map_err(|e| Error::Io(archive.to_owned(), e))?;

        Ok(ZipWriter::new(file))
    }
}

fn open_reader(archive: &Path) -> Result<ZipArchive<BufReader<File>>> {
    let reader = File::open(archive)
        .map(BufReader::new)
        .map_err(|e| Error::Io(archive.to_owned(), e))?;

    ZipArchive::new(reader).map_err(|e| Error::Zip(archive.to_owned(), e))
}

/// Append the contents of `source` to `archive` as a new entry named `name`.
/// The archive is created if it does not exist.
pub fn add_entry(archive: &Path, source: &Path, name: &str, compress: bool) -> Result<()> {
    let reader = File::open(source).map_err(|e| Error::Io(source.to_owned(), e))?;
    let size = reader
        .metadata()
        .map_err(|e| Error::Io(source.to_owned(), e))?
        .len();

    let method = if compress {
        CompressionMethod::Deflated
    } else {
        CompressionMethod::Stored
    };
    let options = SimpleFileOptions::default()
        .compression_method(method)
        .large_file(size >= ZIP64_THRESHOLD);

    debug!("Appending {source:?} to {archive:?} as {name:?} ({method:?})");

    let mut writer = open_writer(archive)?;

    writer
        .start_file(name, options)
        .map_err(|e| Error::Zip(archive.to_owned(), e))?;

    stream::copy(BufReader::new(reader), &mut writer)
        .map_err(|e| Error::Io(source.to_owned(), e))?;

    writer
        .finish()
        .map_err(|e| Error::Zip(archive.to_owned(), e))?;

    Ok(())
}

/// Append `entry` to `archive`. If requested by the entry, its source file is
/// deleted once the append succeeds.
pub fn append(archive: &Path, entry: &ArchiveEntry) -> Result<()> {
    add_entry(archive, &entry.source, &entry.name, entry.compress)?;

    if entry.delete_source_after {
        fs::remove_file(&entry.source).map_err(|e| Error::Io(entry.source.clone(), e))?;
    }

    Ok(())
}

/// Extract the entry `name` from `archive` into `dest_dir`, keeping only the
/// base name of the entry. Returns the path to the extracted file.
pub fn extract_entry(archive: &Path, name: &str, dest_dir: &Path) -> Result<PathBuf> {
    let base_name = Path::new(name)
        .file_name()
        .ok_or_else(|| Error::UnsafeName(name.to_owned()))?;

    let mut zip = open_reader(archive)?;
    let mut reader = match zip.by_name(name) {
        Ok(r) => r,
        Err(ZipError::FileNotFound) => {
            return Err(Error::EntryNotFound {
                archive: archive.to_owned(),
                name: name.to_owned(),
            });
        }
        Err(e) => return Err(Error::Zip(archive.to_owned(), e)),
    };

    let path = dest_dir.join(base_name);

    debug!("Extracting {name:?} from {archive:?} to {path:?}");

    let result = File::create(&path)
        .map(BufWriter::new)
        .and_then(|mut writer| {
            stream::copy(&mut reader, &mut writer)?;
            writer.flush()
        });

    if let Err(e) = result {
        let _ = fs::remove_file(&path);
        return Err(Error::Io(path, e));
    }

    Ok(path)
}

/// Check whether `archive` contains an entry named exactly `name`.
pub fn entry_exists(archive: &Path, name: &str) -> Result<bool> {
    let zip = open_reader(archive)?;

    Ok(zip.file_names().any(|n| n == name))
}

/// List the entry names in `archive` in central directory order.
pub fn entry_names(archive: &Path) -> Result<Vec<String>> {
    let zip = open_reader(archive)?;
    let mut names = zip.file_names().map(|n| n.to_owned()).collect::<Vec<_>>();

    // Don't rely on the iteration order of file_names().
    names.sort_by_key(|n| zip.index_for_name(n));

    Ok(names)
}
