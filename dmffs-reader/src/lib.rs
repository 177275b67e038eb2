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

//! In-place, read-only filesystem over a mapped dmffs image.
//!
//! A [`Context`] borrows the mapped region and never copies its content; a
//! [`FileHandle`] or [`DirHandle`] is a thin cursor into that same region.
//! Nothing here allocates beyond the handles themselves and the handful of
//! bytes needed to hold a resolved entry's name.

mod config;
mod handle;

pub use config::Config;
pub use handle::{DirEntry, DirHandle, FileHandle};

use dmffs_codec::{read_header, Region, Tag};
use dmffs_err::{Error, Result};
use log::{debug, warn};

/// Read-only attribute bit. The only attribute this filesystem ever reports.
pub const ATTR_READONLY: u32 = 1;

/// Name of the synthetic whole-region file exposed when the image has no
/// recognizable TLV prelude, or is otherwise used as a flat fallback view.
pub const FALLBACK_NAME: &str = "data.bin";

/// Maximum length, in bytes, of a resolvable entry name. Names longer than
/// this are truncated when stored in a handle, mirroring the fixed-size name
/// buffer of the original module.
pub const MAX_NAME_LEN: usize = 255;

/// The read-only filesystem surface, kept as a trait so the directory-entry
/// lookups a caller depends on (`stat`, `fopen`, `opendir`) are expressed
/// independently of `Context`'s own storage. [`Context`] is the only
/// implementer in this crate.
pub trait FileSystem {
    fn stat(&self, path: &str) -> Result<Stat>;
    fn fopen(&self, path: &str, mode: u32) -> Result<FileHandle>;
    fn opendir(&self, path: &str) -> Result<DirHandle>;
}

impl<'a> FileSystem for Context<'a> {
    fn stat(&self, path: &str) -> Result<Stat> {
        Context::stat(self, path)
    }

    fn fopen(&self, path: &str, mode: u32) -> Result<FileHandle> {
        Context::fopen(self, path, mode)
    }

    fn opendir(&self, path: &str) -> Result<DirHandle> {
        Context::opendir(self, path)
    }
}

/// A resolved top-level entry: either a real FILE record, or the synthetic
/// fallback view over the whole region.
#[derive(Debug, Clone)]
pub(crate) struct Entry {
    pub name: String,
    pub data_base_offset: u64,
    pub data_size: u64,
    pub attributes: u32,
    pub mtime: u32,
    pub ctime: u32,
}

/// Per-mount state: the region coordinates and whether the image begins with
/// a recognizable TLV prelude. Created once, shared (by reference) by every
/// handle it opens; dropping it while handles exist is the caller's
/// responsibility, not something this type can enforce without the host's
/// cooperation.
#[derive(Debug)]
pub struct Context<'a> {
    region: Region<'a>,
    valid: bool,
}

impl<'a> Context<'a> {
    /// Mounts `region`, inspecting its first 8 bytes to decide whether it
    /// looks like a dmffs image. Never fails: an unrecognized region is
    /// simply presented through fallback mode rather than rejected.
    pub fn mount(region: Region<'a>) -> Self {
        let valid = has_valid_tlv_structure(&region);
        if !valid {
            debug!("region does not begin with a recognizable TLV, entering fallback mode");
        }
        Self { region, valid }
    }

    /// Mounts the region described by `config`, resolving it to a raw
    /// `(address, length)` pair. The caller must guarantee that span is
    /// valid for `'a` and is not concurrently mutated: this is the one
    /// place the read-only contract of the rest of the crate depends on an
    /// external promise rather than the type system.
    ///
    /// # Safety
    /// `config.flash_addr` must point to at least `config.flash_size`
    /// readable bytes, valid for the lifetime `'a`.
    pub unsafe fn from_config(config: &Config) -> Self {
        let bytes =
            unsafe { std::slice::from_raw_parts(config.flash_addr as *const u8, config.flash_size) };
        Self::mount(Region::new(bytes))
    }

    pub fn region_size(&self) -> u64 {
        self.region.len()
    }

    /// Whether the mounted region begins with a recognizable TLV prelude.
    /// `false` means every path resolves, if at all, only to the synthetic
    /// [`FALLBACK_NAME`] entry.
    pub fn is_valid_image(&self) -> bool {
        self.valid
    }

    pub fn opendir(&self, path: &str) -> Result<DirHandle> {
        match normalize_path(path) {
            Some("") => Ok(DirHandle::new(self.scan_start())),
            _ => Err(Error::NotFound),
        }
    }

    pub fn fopen(&self, path: &str, mode: u32) -> Result<FileHandle> {
        if mode & (MODE_WRONLY | MODE_RDWR | MODE_CREAT | MODE_TRUNC) != 0 {
            return Err(Error::Invalid);
        }
        let entry = self.resolve(path).ok_or(Error::NotFound)?;
        Ok(FileHandle::new(entry))
    }

    pub fn stat(&self, path: &str) -> Result<Stat> {
        let entry = self.resolve(path).ok_or(Error::NotFound)?;
        Ok(Stat {
            size: entry.data_size,
            attributes: entry.attributes,
            ctime: entry.ctime,
            mtime: entry.mtime,
            atime: entry.mtime,
        })
    }

    /// Accepted but performs no mutation: the entry remains visible
    /// afterward. Kept as a no-op success rather than rejected outright,
    /// matching the original module's behavior for this call.
    pub fn unlink(&self, path: &str) -> Result<()> {
        self.resolve(path).ok_or(Error::NotFound)?;
        Ok(())
    }

    pub fn rename(&self, _from: &str, _to: &str) -> Result<()> {
        Err(Error::Invalid)
    }

    pub fn chmod(&self, _path: &str, _attributes: u32) -> Result<()> {
        Err(Error::Invalid)
    }

    pub fn mkdir(&self, _path: &str) -> Result<()> {
        Err(Error::NoSpace)
    }

    /// Offset just past a leading VERSION TLV, or 0 if there isn't one.
    fn scan_start(&self) -> u64 {
        if !self.valid {
            return 0;
        }
        match read_header(&self.region, 0) {
            Ok((header, payload_offset)) if header.tag == Tag::Version => {
                payload_offset + header.length as u64
            }
            _ => 0,
        }
    }

    /// Resolves `path` against the top-level FILE records, falling back to
    /// the synthetic whole-region view for [`FALLBACK_NAME`].
    fn resolve(&self, path: &str) -> Option<Entry> {
        let name = normalize_path(path)?;
        if name.is_empty() {
            return None;
        }

        if !self.valid {
            return (name == FALLBACK_NAME).then(|| self.fallback_entry());
        }

        let mut offset = self.scan_start();
        while let Ok((header, payload_offset)) = read_header(&self.region, offset) {
            match header.tag {
                Tag::End | Tag::Invalid => break,
                Tag::File => {
                    if let Some(entry) = self.parse_file(payload_offset, header.length as u64) {
                        if entry.name == name {
                            return Some(entry);
                        }
                    }
                }
                _ => {}
            }
            offset = payload_offset + header.length as u64;
            if offset >= self.region.len() {
                break;
            }
        }

        (name == FALLBACK_NAME).then(|| self.fallback_entry())
    }

    fn fallback_entry(&self) -> Entry {
        Entry {
            name: FALLBACK_NAME.to_string(),
            data_base_offset: 0,
            data_size: self.region.len(),
            attributes: ATTR_READONLY,
            mtime: 0,
            ctime: 0,
        }
    }

    /// Parses a FILE record's children within `[offset, offset + length)`.
    fn parse_file(&self, offset: u64, length: u64) -> Option<Entry> {
        let end = offset + length;
        let mut name = None;
        let mut data_base_offset = 0u64;
        let mut data_size = 0u64;
        let mut mtime = 0u32;
        let mut attributes = ATTR_READONLY;

        let mut cursor = offset;
        while cursor < end {
            let (header, payload_offset) = read_header(&self.region, cursor).ok()?;
            let payload_len = header.length as u64;
            if payload_offset + payload_len > end {
                warn!("FILE child at {cursor} overruns its parent's bounds, truncating scan");
                break;
            }
            match header.tag {
                Tag::Name => {
                    let bytes = self.region.slice(payload_offset, payload_len)?;
                    let bytes = &bytes[..bytes.len().min(MAX_NAME_LEN)];
                    name = Some(String::from_utf8_lossy(bytes).into_owned());
                }
                Tag::Data => {
                    data_base_offset = payload_offset;
                    data_size = payload_len;
                }
                Tag::Date => {
                    mtime = read_u32_payload(&self.region, payload_offset).unwrap_or(0);
                }
                Tag::Attr => {
                    attributes = read_u32_payload(&self.region, payload_offset).unwrap_or(attributes);
                }
                _ => {}
            }
            cursor = payload_offset + payload_len;
        }

        Some(Entry {
            name: name?,
            data_base_offset,
            data_size,
            attributes,
            mtime,
            ctime: mtime,
        })
    }

    pub(crate) fn read_at(&self, offset: u64, dst: &mut [u8]) -> usize {
        self.region.read(offset, dst)
    }

    /// Advances `cursor` past TLVs that are not a top-level FILE, returning
    /// the next FILE entry and the cursor position just past it, or `None`
    /// once the scan is exhausted.
    pub(crate) fn next_file_entry(&self, cursor: u64) -> Option<(Entry, u64)> {
        if !self.valid {
            return None;
        }
        let mut offset = cursor;
        loop {
            let (header, payload_offset) = read_header(&self.region, offset).ok()?;
            let end = payload_offset + header.length as u64;
            match header.tag {
                Tag::End | Tag::Invalid => return None,
                Tag::File => {
                    let entry = self.parse_file(payload_offset, header.length as u64)?;
                    return Some((entry, end));
                }
                _ => {
                    offset = end;
                    if offset >= self.region.len() {
                        return None;
                    }
                }
            }
        }
    }
}

fn read_u32_payload(region: &Region, offset: u64) -> Option<u32> {
    let mut buf = [0u8; 4];
    if region.read(offset, &mut buf) < 4 {
        return None;
    }
    Some(u32::from_le_bytes(buf))
}

/// An image begins with a recognizable TLV prelude iff its first record's
/// tag is VERSION, FILE, or DIR.
fn has_valid_tlv_structure(region: &Region) -> bool {
    match read_header(region, 0) {
        Ok((header, _)) => matches!(header.tag, Tag::Version | Tag::File | Tag::Dir),
        Err(_) => false,
    }
}

/// Strips one optional leading `/`. Returns `None` for paths containing a
/// second path component, since this resolver only supports flat layouts.
fn normalize_path(path: &str) -> Option<&str> {
    let stripped = path.strip_prefix('/').unwrap_or(path);
    if stripped.contains('/') {
        None
    } else {
        Some(stripped)
    }
}

/// Result of [`Context::stat`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    pub size: u64,
    pub attributes: u32,
    pub ctime: u32,
    pub mtime: u32,
    pub atime: u32,
}

/// `whence` argument to [`FileHandle::lseek`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Set,
    Cur,
    End,
}

pub const MODE_RDONLY: u32 = 0;
pub const MODE_WRONLY: u32 = 1 << 0;
pub const MODE_RDWR: u32 = 1 << 1;
pub const MODE_CREAT: u32 = 1 << 2;
pub const MODE_TRUNC: u32 = 1 << 3;
