// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

//! Reader and writer for Sony's SIN v3 partition containers.
//!
//! A container is a fixed 52-byte big-endian header, an opaque remainder of
//! the header (hash tables and certificates that we never interpret), and the
//! raw partition image at the offset recorded in the header. Only the fixed
//! part is parsed. The image byte range is copied verbatim.

use std::{
    fmt,
    fs::{self, File},
    io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write},
    mem,
    path::Path,
    str::FromStr,
};

use thiserror::Error;
use zerocopy::{FromBytes, IntoBytes, byteorder::big_endian};
use zerocopy_derive::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::{
    stream::{self, FromReader, ToWriter, WriteZerosExt},
    util,
};

/// Only SIN v3 containers carry the image location in the fixed header.
pub const VERSION: u8 = 3;

/// Magic value for [`RawHeader::magic`].
pub const MAGIC: [u8; 3] = *b"SIN";

/// Size of the fixed portion of the header.
pub const HEADER_SIZE: usize = mem::size_of::<RawHeader>();

/// Offset of the 16-byte unique identifier within the header.
pub const UUID_OFFSET: usize = mem::offset_of!(RawHeader, uuid);

/// Alignment used for the image when creating new containers.
pub const IMAGE_ALIGNMENT: u64 = 4096;

const NEW_IMAGE_OFFSET: u64 = (HEADER_SIZE as u64).next_multiple_of(IMAGE_ALIGNMENT);

const _: () = assert!(HEADER_SIZE == 52);
const _: () = assert!(UUID_OFFSET == 0x14);

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid SIN magic: {0:?}")]
    InvalidMagic([u8; 3]),
    #[error("Unsupported SIN version: {0}")]
    UnsupportedVersion(u8),
    #[error("Header size too small: {0} < {HEADER_SIZE}")]
    HeaderTooSmall(u32),
    #[error("Image offset {offset} is inside the {header_size}-byte header")]
    ImageOverlapsHeader { offset: u64, header_size: u32 },
    #[error("Image range overflows: {offset} + {size}")]
    ImageRangeOverflow { offset: u64, size: u64 },
    #[error("Image ends at {end}, but the container is only {len} bytes")]
    ImageOutOfBounds { end: u64, len: u64 },
    #[error("Failed to read SIN data: {0}")]
    DataRead(&'static str, #[source] io::Error),
    #[error("Failed to write SIN data: {0}")]
    DataWrite(&'static str, #[source] io::Error),
    #[error("Failed to copy SIN data: {0}")]
    DataCopy(&'static str, #[source] io::Error),
}

impl Error {
    /// Whether the error is caused by the container contents being truncated
    /// or structurally invalid, as opposed to an I/O failure unrelated to the
    /// data.
    pub fn is_malformed(&self) -> bool {
        match self {
            Self::DataRead(_, e) | Self::DataCopy(_, e) => {
                e.kind() == io::ErrorKind::UnexpectedEof
            }
            Self::DataWrite(_, _) => false,
            _ => true,
        }
    }
}

type Result<T> = std::result::Result<T, Error>;

/// 16-byte unique identifier of the partition stored in the container header.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PartitionUuid(pub [u8; 16]);

impl PartitionUuid {
    /// Interpret the raw header field. Older containers store all zeros or all
    /// `0xff` bytes when there is no identifier.
    pub fn from_raw(raw: [u8; 16]) -> Option<Self> {
        if util::is_zero(&raw) || raw.iter().all(|b| *b == 0xff) {
            None
        } else {
            Some(Self(raw))
        }
    }
}

impl fmt::Display for PartitionUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;

        write!(
            f,
            "{}-{}-{}-{}-{}",
            hex::encode(&b[0..4]),
            hex::encode(&b[4..6]),
            hex::encode(&b[6..8]),
            hex::encode(&b[8..10]),
            hex::encode(&b[10..16]),
        )
    }
}

impl fmt::Debug for PartitionUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PartitionUuid({self})")
    }
}

impl FromStr for PartitionUuid {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let digits = s.replace('-', "");
        let mut raw = [0u8; 16];
        hex::decode_to_slice(digits, &mut raw)?;

        Ok(Self(raw))
    }
}

/// Raw on-disk layout for the fixed portion of the header.
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C, packed)]
struct RawHeader {
    /// Container format version. This should be equal to [`VERSION`].
    version: u8,
    /// Magic value. This should be equal to [`MAGIC`].
    magic: [u8; 3],
    /// Size of the whole header, including the opaque tables after this
    /// fixed portion.
    header_size: big_endian::U32,
    payload_type: big_endian::U32,
    hash_type: big_endian::U32,
    /// Partition identifier.
    partition_id: big_endian::U32,
    /// Unique identifier. All zeros or all `0xff` if absent.
    uuid: [u8; 16],
    /// Absolute offset of the raw partition image.
    image_offset: big_endian::U64,
    /// Size of the raw partition image.
    image_size: big_endian::U64,
}

impl RawHeader {
    /// Ensure that all fields are semantically valid. The image bounds can
    /// only be checked against the container size, which is done separately.
    fn validate(&self) -> Result<()> {
        if self.magic != MAGIC {
            return Err(Error::InvalidMagic(self.magic));
        }

        if self.version != VERSION {
            return Err(Error::UnsupportedVersion(self.version));
        }

        let header_size = self.header_size.get();
        if (header_size as usize) < HEADER_SIZE {
            return Err(Error::HeaderTooSmall(header_size));
        }

        let offset = self.image_offset.get();
        let size = self.image_size.get();

        if offset < u64::from(header_size) {
            return Err(Error::ImageOverlapsHeader {
                offset,
                header_size,
            });
        } else if offset.checked_add(size).is_none() {
            return Err(Error::ImageRangeOverflow { offset, size });
        }

        Ok(())
    }
}

/// Decoded fixed-offset fields of a container header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SinHeader {
    pub header_size: u32,
    pub payload_type: u32,
    pub hash_type: u32,
    pub partition_id: u32,
    pub uuid: Option<PartitionUuid>,
    pub image_offset: u64,
    pub image_size: u64,
}

impl SinHeader {
    /// Create a header for a new container holding an image of the specified
    /// size. The image is placed at the first [`IMAGE_ALIGNMENT`] boundary
    /// after the fixed header.
    pub fn for_image(partition_id: u32, uuid: Option<PartitionUuid>, image_size: u64) -> Self {
        Self {
            header_size: HEADER_SIZE as u32,
            payload_type: 0,
            hash_type: 0,
            partition_id,
            uuid,
            image_offset: NEW_IMAGE_OFFSET,
            image_size,
        }
    }

    /// Offset one past the last byte of the image.
    pub fn image_end(&self) -> Result<u64> {
        self.image_offset
            .checked_add(self.image_size)
            .ok_or(Error::ImageRangeOverflow {
                offset: self.image_offset,
                size: self.image_size,
            })
    }

    /// Ensure that the image lies entirely within a container of size `len`.
    pub fn check_bounds(&self, len: u64) -> Result<()> {
        let end = self.image_end()?;
        if end > len {
            return Err(Error::ImageOutOfBounds { end, len });
        }

        Ok(())
    }

    fn to_raw(&self) -> RawHeader {
        RawHeader {
            version: VERSION,
            magic: MAGIC,
            header_size: self.header_size.into(),
            payload_type: self.payload_type.into(),
            hash_type: self.hash_type.into(),
            partition_id: self.partition_id.into(),
            uuid: self.uuid.map(|u| u.0).unwrap_or_default(),
            image_offset: self.image_offset.into(),
            image_size: self.image_size.into(),
        }
    }
}

impl<R: Read> FromReader<R> for SinHeader {
    type Error = Error;

    fn from_reader(mut reader: R) -> Result<Self> {
        let raw = RawHeader::read_from_io(&mut reader).map_err(|e| Error::DataRead("header", e))?;
        raw.validate()?;

        Ok(Self {
            header_size: raw.header_size.get(),
            payload_type: raw.payload_type.get(),
            hash_type: raw.hash_type.get(),
            partition_id: raw.partition_id.get(),
            uuid: PartitionUuid::from_raw(raw.uuid),
            image_offset: raw.image_offset.get(),
            image_size: raw.image_size.get(),
        })
    }
}

impl<W: Write> ToWriter<W> for SinHeader {
    type Error = Error;

    /// Write the fixed header followed by zeros up to [`Self::header_size`].
    fn to_writer(&self, mut writer: W) -> Result<()> {
        let raw = self.to_raw();
        raw.validate()?;

        raw.write_to_io(&mut writer)
            .map_err(|e| Error::DataWrite("header", e))?;

        let remain = u64::from(self.header_size) - HEADER_SIZE as u64;
        writer
            .write_zeros_exact(remain)
            .map_err(|e| Error::DataWrite("header_tables", e))?;

        Ok(())
    }
}

/// Parse the header of the container in `reader` and copy the raw partition
/// image to `writer`. The image must lie entirely within the container.
pub fn extract_image(mut reader: impl Read + Seek, writer: impl Write) -> Result<SinHeader> {
    let len = reader
        .seek(SeekFrom::End(0))
        .map_err(|e| Error::DataRead("container_size", e))?;
    reader
        .rewind()
        .map_err(|e| Error::DataRead("container_start", e))?;

    let header = SinHeader::from_reader(&mut reader)?;
    header.check_bounds(len)?;

    reader
        .seek(SeekFrom::Start(header.image_offset))
        .map_err(|e| Error::DataRead("image_start", e))?;

    stream::copy_n(reader, writer, header.image_size)
        .map_err(|e| Error::DataCopy("image", e))?;

    Ok(header)
}

/// Decode the container at `container` into the raw image file at `image`. On
/// failure, the partially written image is removed.
pub fn decode(container: &Path, image: &Path) -> Result<SinHeader> {
    let mut reader = File::open(container)
        .map(BufReader::new)
        .map_err(|e| Error::DataRead("container_open", e))?;

    // Validate before creating the output so that a bad container leaves no
    // trace behind.
    let len = reader
        .seek(SeekFrom::End(0))
        .map_err(|e| Error::DataRead("container_size", e))?;
    reader
        .rewind()
        .map_err(|e| Error::DataRead("container_start", e))?;
    SinHeader::from_reader(&mut reader)?.check_bounds(len)?;

    let writer = File::create(image).map_err(|e| Error::DataWrite("image_create", e))?;
    let mut writer = BufWriter::new(writer);

    let result = extract_image(reader, &mut writer).and_then(|h| {
        writer
            .flush()
            .map_err(|e| Error::DataWrite("image_flush", e))?;
        Ok(h)
    });

    if result.is_err() {
        drop(writer);
        let _ = fs::remove_file(image);
    }

    result
}

/// Write a complete container consisting of `header`, zero padding up to the
/// image offset, and exactly [`SinHeader::image_size`] bytes from `image`.
pub fn write_container(mut writer: impl Write, header: &SinHeader, image: impl Read) -> Result<()> {
    header.to_writer(&mut writer)?;

    // to_writer() pads up to header_size and validation guarantees the image
    // starts at or after it.
    writer
        .write_zeros_exact(header.image_offset - u64::from(header.header_size))
        .map_err(|e| Error::DataWrite("image_padding", e))?;

    stream::copy_n(image, &mut writer, header.image_size)
        .map_err(|e| Error::DataCopy("image", e))?;

    writer.flush().map_err(|e| Error::DataWrite("flush", e))?;

    Ok(())
}
