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

//! File and directory handles: thin cursors into a [`Context`]'s region.
//!
//! Both handle types are linear state machines with no error state of their
//! own — a failed operation returns an error code but leaves the handle
//! exactly as usable as before the call.

use dmffs_err::{Error, Result};

use crate::{Context, Entry, Whence, ATTR_READONLY, FALLBACK_NAME};

/// An open file. Owned by whoever called [`Context::fopen`]; dropping it is
/// the only `fclose` this crate needs, since there is no underlying
/// resource beyond the borrow of the mounted region.
#[derive(Debug)]
pub struct FileHandle {
    entry: Entry,
    position: u64,
}

impl FileHandle {
    pub(crate) fn new(entry: Entry) -> Self {
        Self { entry, position: 0 }
    }

    pub fn size(&self) -> u64 {
        self.entry.data_size
    }

    pub fn tell(&self) -> u64 {
        self.position
    }

    pub fn eof(&self) -> bool {
        self.position >= self.entry.data_size
    }

    /// Reads up to `buf.len()` bytes starting at the current position into
    /// `buf`, advancing the position by the amount actually read. Reaching
    /// EOF is not an error; it simply reads zero bytes.
    pub fn fread(&mut self, ctx: &Context, buf: &mut [u8]) -> Result<usize> {
        let remaining = self.entry.data_size.saturating_sub(self.position);
        let want = (buf.len() as u64).min(remaining) as usize;
        let n = ctx.read_at(self.entry.data_base_offset + self.position, &mut buf[..want]);
        self.position += n as u64;
        Ok(n)
    }

    /// One-byte read at the current position, advancing it. Returns `-1` at
    /// EOF rather than an error, matching the scalar-operation convention.
    pub fn getc(&mut self, ctx: &Context) -> i32 {
        let mut byte = [0u8; 1];
        match self.fread(ctx, &mut byte) {
            Ok(1) => {
                byte[0] as i32
            }
            _ => -1,
        }
    }

    /// Seeks relative to `whence`, clamping the result to `[0, size]`.
    /// Returns the new position, or `-1` if the resulting offset would be
    /// negative (there is no invalid-`whence` case left to reject once
    /// `Whence` is a closed enum).
    pub fn lseek(&mut self, offset: i64, whence: Whence) -> i64 {
        let base = match whence {
            Whence::Set => 0i64,
            Whence::Cur => self.position as i64,
            Whence::End => self.entry.data_size as i64,
        };
        let target = base.saturating_add(offset);
        if target < 0 {
            return -1;
        }
        let clamped = (target as u64).min(self.entry.data_size);
        self.position = clamped;
        clamped as i64
    }

    /// Always fails: this filesystem is read-only. Returns `-1` for the
    /// scalar write primitives, matching `getc`'s failure convention.
    pub fn putc(&mut self, _byte: u8) -> i32 {
        -1
    }

    /// Always fails: this filesystem is read-only.
    pub fn fwrite(&mut self, _buf: &[u8]) -> Result<usize> {
        Err(Error::Invalid)
    }
}

/// A directory entry produced by [`DirHandle::readdir`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub size: u64,
    pub attributes: u32,
}

/// An open directory iterator over top-level FILE records, followed by the
/// synthetic fallback entry.
#[derive(Debug)]
pub struct DirHandle {
    cursor: u64,
    emitted_fallback: bool,
    exhausted: bool,
}

impl DirHandle {
    pub(crate) fn new(cursor: u64) -> Self {
        Self {
            cursor,
            emitted_fallback: false,
            exhausted: false,
        }
    }

    /// Returns the next directory entry: each real FILE record in turn,
    /// then the synthetic [`FALLBACK_NAME`] entry exactly once, then
    /// `NotFound` forever after.
    pub fn readdir(&mut self, ctx: &Context) -> Result<DirEntry> {
        if self.exhausted {
            return Err(Error::NotFound);
        }

        if !self.emitted_fallback {
            if let Some((entry, next_cursor)) = ctx.next_file_entry(self.cursor) {
                self.cursor = next_cursor;
                return Ok(DirEntry {
                    name: entry.name,
                    size: entry.data_size,
                    attributes: entry.attributes,
                });
            }
        }

        if !self.emitted_fallback {
            self.emitted_fallback = true;
            return Ok(DirEntry {
                name: FALLBACK_NAME.to_string(),
                size: ctx.region_size(),
                attributes: ATTR_READONLY,
            });
        }

        self.exhausted = true;
        Err(Error::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Context;
    use dmffs_codec::{write_record, Region, Tag};

    fn sample_image() -> Vec<u8> {
        let mut buf = Vec::new();
        write_record(&mut buf, Tag::Version, b"1.0").unwrap();
        let name = b"hello.txt";
        let data = b"hi";
        let file_len = (8 + name.len()) + (8 + data.len());
        dmffs_codec::write_header(&mut buf, Tag::File, file_len as u32).unwrap();
        write_record(&mut buf, Tag::Name, name).unwrap();
        write_record(&mut buf, Tag::Data, data).unwrap();
        write_record(&mut buf, Tag::End, &[]).unwrap();
        buf
    }

    #[test]
    fn reads_full_file_contents_and_reports_eof() {
        let bytes = sample_image();
        let ctx = Context::mount(Region::new(&bytes));
        let mut handle = ctx.fopen("hello.txt", crate::MODE_RDONLY).unwrap();

        let mut buf = [0u8; 8];
        let n = handle.fread(&ctx, &mut buf).unwrap();
        assert_eq!(n, 2);
        assert_eq!(&buf[..2], b"hi");
        assert!(handle.eof());

        let n = handle.fread(&ctx, &mut buf).unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn lseek_clamps_to_data_size() {
        let bytes = sample_image();
        let ctx = Context::mount(Region::new(&bytes));
        let mut handle = ctx.fopen("hello.txt", crate::MODE_RDONLY).unwrap();

        assert_eq!(handle.lseek(100, Whence::Set), 2);
        assert_eq!(handle.lseek(-100, Whence::Cur), 0);
        assert_eq!(handle.lseek(0, Whence::End), 2);
        assert_eq!(handle.lseek(-10, Whence::Set), -1);
    }

    #[test]
    fn getc_reads_bytes_then_minus_one_at_eof() {
        let bytes = sample_image();
        let ctx = Context::mount(Region::new(&bytes));
        let mut handle = ctx.fopen("hello.txt", crate::MODE_RDONLY).unwrap();

        assert_eq!(handle.getc(&ctx), b'h' as i32);
        assert_eq!(handle.getc(&ctx), b'i' as i32);
        assert_eq!(handle.getc(&ctx), -1);
    }

    #[test]
    fn readdir_lists_files_then_fallback_then_not_found() {
        let bytes = sample_image();
        let ctx = Context::mount(Region::new(&bytes));
        let mut dir = ctx.opendir("/").unwrap();

        let first = dir.readdir(&ctx).unwrap();
        assert_eq!(first.name, "hello.txt");
        assert_eq!(first.size, 2);

        let second = dir.readdir(&ctx).unwrap();
        assert_eq!(second.name, "data.bin");
        assert_eq!(second.size, bytes.len() as u64);

        assert!(matches!(dir.readdir(&ctx), Err(Error::NotFound)));
    }

    #[test]
    fn opendir_rejects_non_root_paths() {
        let bytes = sample_image();
        let ctx = Context::mount(Region::new(&bytes));
        assert!(matches!(ctx.opendir("/sub"), Err(Error::NotFound)));
    }

    #[test]
    fn write_primitives_reject() {
        let bytes = sample_image();
        let ctx = Context::mount(Region::new(&bytes));
        let mut handle = ctx.fopen("hello.txt", crate::MODE_RDONLY).unwrap();
        assert_eq!(handle.putc(b'x'), -1);
        assert!(matches!(handle.fwrite(b"x"), Err(Error::Invalid)));
    }
}
