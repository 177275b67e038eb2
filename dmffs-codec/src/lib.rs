// Copyright 2024 Kevin Ludwig
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! TLV (type-length-value) container format shared by the image packer and
//! the in-place reader.
//!
//! A record is an 8-byte header — a 4-byte tag and a 4-byte payload length,
//! both little-endian — followed by exactly `length` payload bytes. The
//! wire format fixes little-endian byte order; the original module used the
//! host's native order, which only round-trips when the packer and reader
//! run on matching-endianness hosts. Fixing the order breaks that
//! assumption deliberately (see `DESIGN.md`).

use std::io::{self, Write};

use dmffs_err::{CodecError, Error, Result};
use zerocopy::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Size in bytes of a TLV header: 4-byte tag + 4-byte length.
pub const HEADER_SIZE: u64 = 8;

pub const TAG_INVALID: u32 = 0;
pub const TAG_FILE: u32 = 1;
pub const TAG_DIR: u32 = 2;
pub const TAG_VERSION: u32 = 3;
pub const TAG_NAME: u32 = 4;
pub const TAG_DATA: u32 = 5;
/// Reserved: a 32-bit timestamp payload. Not emitted by this packer, but a
/// conforming reader skips it gracefully when present.
pub const TAG_DATE: u32 = 6;
/// Reserved: a 32-bit attribute bitmask payload. Not emitted by this packer.
pub const TAG_ATTR: u32 = 7;
pub const TAG_END: u32 = 0xFFFF_FFFF;

/// A TLV type tag. Values outside the reserved set round-trip through
/// [`Tag::Reserved`] so that scanners can skip records of a type they don't
/// recognize instead of failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    Invalid,
    File,
    Dir,
    Version,
    Name,
    Data,
    Date,
    Attr,
    End,
    Reserved(u32),
}

impl From<u32> for Tag {
    fn from(value: u32) -> Self {
        match value {
            TAG_INVALID => Tag::Invalid,
            TAG_FILE => Tag::File,
            TAG_DIR => Tag::Dir,
            TAG_VERSION => Tag::Version,
            TAG_NAME => Tag::Name,
            TAG_DATA => Tag::Data,
            TAG_DATE => Tag::Date,
            TAG_ATTR => Tag::Attr,
            TAG_END => Tag::End,
            other => Tag::Reserved(other),
        }
    }
}

impl From<Tag> for u32 {
    fn from(tag: Tag) -> Self {
        match tag {
            Tag::Invalid => TAG_INVALID,
            Tag::File => TAG_FILE,
            Tag::Dir => TAG_DIR,
            Tag::Version => TAG_VERSION,
            Tag::Name => TAG_NAME,
            Tag::Data => TAG_DATA,
            Tag::Date => TAG_DATE,
            Tag::Attr => TAG_ATTR,
            Tag::End => TAG_END,
            Tag::Reserved(other) => other,
        }
    }
}

/// A decoded TLV header: the tag plus the payload's byte length (not
/// counting the 8-byte header itself).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub tag: Tag,
    pub length: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
struct RawHeader {
    tag: U32,
    length: U32,
}

/// A bounds-checked view over the mapped image region. All codec reads go
/// through this instead of raw pointer arithmetic: `offset + n` is checked
/// against the region length before any byte is touched.
#[derive(Debug, Clone, Copy)]
pub struct Region<'a> {
    bytes: &'a [u8],
}

impl<'a> Region<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Bounded copy from `offset` into `dst`, returning the number of bytes
    /// actually copied: `min(dst.len(), region_size - offset)`, or 0 if
    /// `offset` is already past the end of the region.
    pub fn read(&self, offset: u64, dst: &mut [u8]) -> usize {
        let Ok(offset) = usize::try_from(offset) else {
            return 0;
        };
        let Some(available) = self.bytes.get(offset..) else {
            return 0;
        };
        let n = dst.len().min(available.len());
        dst[..n].copy_from_slice(&available[..n]);
        n
    }

    /// A borrowed slice of exactly `len` bytes at `offset`, or `None` if
    /// that range falls outside the region.
    pub fn slice(&self, offset: u64, len: u64) -> Option<&'a [u8]> {
        let offset = usize::try_from(offset).ok()?;
        let len = usize::try_from(len).ok()?;
        let end = offset.checked_add(len)?;
        self.bytes.get(offset..end)
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }
}

/// Reads the 8-byte header at `base + offset`.
///
/// Returns the decoded header and the offset of its payload
/// (`offset + HEADER_SIZE`). Fails with [`CodecError::ShortRead`] if fewer
/// than 8 bytes remain in the region, or [`CodecError::OutOfBounds`] if the
/// advertised payload would run past the region's end (invariant 1 of the
/// data model: `offset + 8 + length` never exceeds the region size).
pub fn read_header(region: &Region, offset: u64) -> Result<(RecordHeader, u64)> {
    let mut raw = RawHeader {
        tag: U32::new(0),
        length: U32::new(0),
    };
    let copied = region.read(offset, raw.as_mut_bytes());
    if (copied as u64) < HEADER_SIZE {
        return Err(Error::Codec(CodecError::ShortRead {
            offset,
            needed: HEADER_SIZE,
            available: copied as u64,
        }));
    }

    let tag = Tag::from(raw.tag.get());
    let length = raw.length.get();
    let payload_offset = offset + HEADER_SIZE;
    match payload_offset.checked_add(length as u64) {
        Some(end) if end <= region.len() => Ok((RecordHeader { tag, length }, payload_offset)),
        _ => Err(Error::Codec(CodecError::OutOfBounds {
            offset,
            length: length as u64,
        })),
    }
}

/// Bounded copy of a record's payload bytes into `dst`, starting at
/// `offset` (the payload offset, i.e. past the 8-byte header). Returns the
/// number of bytes actually copied.
pub fn read_payload(region: &Region, offset: u64, dst: &mut [u8]) -> usize {
    region.read(offset, dst)
}

/// Writes an 8-byte TLV header to `sink`.
pub fn write_header<W: Write>(sink: &mut W, tag: Tag, length: u32) -> io::Result<()> {
    let raw = RawHeader {
        tag: U32::new(tag.into()),
        length: U32::new(length),
    };
    sink.write_all(raw.as_bytes())
}

/// Writes a full record — header followed by `bytes` — to `sink`.
pub fn write_record<W: Write>(sink: &mut W, tag: Tag, bytes: &[u8]) -> io::Result<()> {
    write_header(sink, tag, bytes.len() as u32)?;
    sink.write_all(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips_through_write_and_read() {
        let mut buf = Vec::new();
        write_record(&mut buf, Tag::Name, b"hello.txt").unwrap();

        let region = Region::new(&buf);
        let (header, payload_offset) = read_header(&region, 0).unwrap();
        assert_eq!(header.tag, Tag::Name);
        assert_eq!(header.length, 9);
        assert_eq!(payload_offset, HEADER_SIZE);

        let mut dst = [0u8; 9];
        let n = read_payload(&region, payload_offset, &mut dst);
        assert_eq!(n, 9);
        assert_eq!(&dst, b"hello.txt");
    }

    #[test]
    fn short_read_is_reported() {
        let buf = [0u8; 4];
        let region = Region::new(&buf);
        let err = read_header(&region, 0).unwrap_err();
        assert!(matches!(
            err,
            Error::Codec(CodecError::ShortRead { available: 4, .. })
        ));
    }

    #[test]
    fn header_read_fails_past_region_end() {
        let region = Region::new(&[]);
        let err = read_header(&region, 100).unwrap_err();
        assert!(matches!(
            err,
            Error::Codec(CodecError::ShortRead { available: 0, .. })
        ));
    }

    #[test]
    fn out_of_bounds_length_is_rejected() {
        let mut buf = Vec::new();
        write_header(&mut buf, Tag::Data, 1000).unwrap();
        // No payload bytes follow; the advertised length overruns the region.
        let region = Region::new(&buf);
        let err = read_header(&region, 0).unwrap_err();
        assert!(matches!(
            err,
            Error::Codec(CodecError::OutOfBounds { length: 1000, .. })
        ));
    }

    #[test]
    fn unknown_tag_round_trips_as_reserved() {
        let tag = Tag::from(42);
        assert_eq!(tag, Tag::Reserved(42));
        assert_eq!(u32::from(tag), 42);
    }

    #[test]
    fn end_tag_has_the_sentinel_value() {
        assert_eq!(u32::from(Tag::End), 0xFFFF_FFFF);
        assert_eq!(Tag::from(0xFFFF_FFFF), Tag::End);
    }

    #[test]
    fn region_read_clamps_at_boundary() {
        let buf = [1, 2, 3, 4, 5];
        let region = Region::new(&buf);
        let mut dst = [0u8; 10];
        let n = region.read(3, &mut dst);
        assert_eq!(n, 2);
        assert_eq!(&dst[..2], &[4, 5]);
    }
}
