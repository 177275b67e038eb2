//! Packs a host directory tree into a dmffs image: a flat or nested run of
//! FILE and DIR TLV records preceded by a VERSION record and closed with an
//! END sentinel.
//!
//! The size of a subtree is computed during the same walk that later emits
//! it, rather than by re-opening each directory for a separate sizing pass.
//! A directory that becomes unreadable between listing and emission is
//! simply not there to find again; building one in-memory tree up front
//! means the size written for a DIR record and the bytes that follow it
//! can never disagree.

use std::fs;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use dmffs_codec::{write_record, Tag, HEADER_SIZE};
use dmffs_err::{Error, Result};
use log::{info, warn};

/// Host path components longer than this are skipped rather than truncated.
/// The original module used a fixed-size on-stack path buffer; this is its
/// Rust-side equivalent of a hard ceiling.
const MAX_PATH_LEN: usize = 512;

const VERSION_PAYLOAD: &[u8] = b"1.0";

/// A host directory entry resolved into the tree that will be emitted. Built
/// once per [`pack`] call; sizes are computed bottom-up as part of the same
/// walk that reads directory contents.
enum Node {
    File {
        name: String,
        path: PathBuf,
        size: u64,
    },
    Dir {
        name: String,
        children: Vec<Node>,
        payload_len: u64,
    },
}

impl Node {
    /// Total on-wire size of this node's own record, header included.
    fn total_size(&self) -> u64 {
        match self {
            Node::File { name, size, .. } => {
                HEADER_SIZE + name_record_len(name) + HEADER_SIZE + size
            }
            Node::Dir { payload_len, .. } => HEADER_SIZE + payload_len,
        }
    }
}

/// Wire size of a NAME record: header plus the UTF-8 byte length of `name`.
fn name_record_len(name: &str) -> u64 {
    HEADER_SIZE + name.len() as u64
}

/// `fs::read_dir`, tolerating failure: a directory that can't be listed logs
/// a warning and contributes nothing — its whole subtree, header included,
/// is dropped rather than emitted as empty.
fn list_entries(dir: &Path) -> Option<Vec<fs::DirEntry>> {
    match fs::read_dir(dir) {
        Ok(iter) => {
            let mut entries = Vec::new();
            for entry in iter {
                match entry {
                    Ok(entry) => entries.push(entry),
                    Err(err) => {
                        warn!("{}: failed to read an entry: {err}", dir.display());
                        return None;
                    }
                }
            }
            Some(entries)
        }
        Err(err) => {
            warn!("{}: failed to list directory: {err}", dir.display());
            None
        }
    }
}

/// Resolves a directory's entries into [`Node`]s, recursing into
/// subdirectories. Entries that can't be named, stated, or (for
/// subdirectories) listed are skipped individually; the rest of the
/// directory still packs.
fn build_nodes(entries: Vec<fs::DirEntry>) -> Vec<Node> {
    let mut nodes = Vec::with_capacity(entries.len());
    for entry in entries {
        let path = entry.path();
        let name = match entry.file_name().into_string() {
            Ok(name) => name,
            Err(raw) => {
                warn!("{}: skipping non-UTF-8 file name", raw.to_string_lossy());
                continue;
            }
        };
        if path.as_os_str().len() >= MAX_PATH_LEN {
            warn!("{}: path too long, skipping", path.display());
            continue;
        }
        let file_type = match entry.file_type() {
            Ok(ft) => ft,
            Err(err) => {
                warn!("{}: failed to stat entry: {err}", path.display());
                continue;
            }
        };

        if file_type.is_dir() {
            let Some(children) = list_entries(&path) else {
                continue;
            };
            let children = build_nodes(children);
            let payload_len = dir_payload_len(&name, &children);
            nodes.push(Node::Dir {
                name,
                children,
                payload_len,
            });
        } else if file_type.is_file() {
            let size = match fs::metadata(&path) {
                Ok(meta) => meta.len(),
                Err(err) => {
                    warn!("{}: failed to stat file: {err}", path.display());
                    continue;
                }
            };
            if to_u32(size).is_err() {
                warn!("{}: file too large to pack, skipping", path.display());
                continue;
            }
            nodes.push(Node::File { name, path, size });
        }
        // Symlinks, devices, and other non-regular entries are silently skipped.
    }
    nodes
}

/// A DIR record's advertised payload length: its own NAME child plus the
/// total wire size of every nested FILE/DIR child.
fn dir_payload_len(name: &str, children: &[Node]) -> u64 {
    let name_len = name_record_len(name);
    let children_len: u64 = children.iter().map(Node::total_size).sum();
    name_len + children_len
}

fn to_u32(value: u64) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::General)
}

/// Packs `input_dir` into a new image at `output_file`, overwriting it if
/// present. Root entries are emitted directly — there is no synthetic DIR
/// wrapper around the root — followed by a single END sentinel.
pub fn pack(input_dir: &Path, output_file: &Path) -> Result<()> {
    info!(
        "packing {} into {}",
        input_dir.display(),
        output_file.display()
    );

    let meta = fs::metadata(input_dir).map_err(Error::Io)?;
    if !meta.is_dir() {
        warn!("{}: not a directory", input_dir.display());
        return Err(Error::Invalid);
    }

    let entries = list_entries(input_dir).unwrap_or_default();
    let roots = build_nodes(entries);

    let shadows_fallback = roots
        .iter()
        .any(|node| matches!(node, Node::File { name, .. } if name == "data.bin"));
    if shadows_fallback {
        warn!(
            "{}: a top-level file named data.bin would shadow the reader's fallback view",
            input_dir.display()
        );
        return Err(Error::Invalid);
    }

    let file = fs::File::create(output_file).map_err(Error::Io)?;
    let mut sink = BufWriter::new(file);

    write_record(&mut sink, Tag::Version, VERSION_PAYLOAD).map_err(Error::Io)?;
    for node in &roots {
        emit_node(node, &mut sink)?;
    }
    write_record(&mut sink, Tag::End, &[]).map_err(Error::Io)?;
    sink.flush().map_err(Error::Io)?;

    info!("wrote {}", output_file.display());
    Ok(())
}

fn emit_node<W: Write>(node: &Node, sink: &mut W) -> Result<()> {
    match node {
        Node::File { name, path, size } => emit_file(name, path, *size, sink),
        Node::Dir {
            name,
            children,
            payload_len,
        } => {
            dmffs_codec::write_header(sink, Tag::Dir, to_u32(*payload_len)?).map_err(Error::Io)?;
            write_record(sink, Tag::Name, name.as_bytes()).map_err(Error::Io)?;
            for child in children {
                emit_node(child, sink)?;
            }
            Ok(())
        }
    }
}

fn emit_file<W: Write>(name: &str, path: &Path, size: u64, sink: &mut W) -> Result<()> {
    let payload_len = name_record_len(name) + HEADER_SIZE + size;
    dmffs_codec::write_header(sink, Tag::File, to_u32(payload_len)?).map_err(Error::Io)?;
    write_record(sink, Tag::Name, name.as_bytes()).map_err(Error::Io)?;

    dmffs_codec::write_header(sink, Tag::Data, to_u32(size)?).map_err(Error::Io)?;
    let mut source = fs::File::open(path).map_err(Error::Io)?;
    let mut buf = [0u8; 4096];
    let mut remaining = size;
    while remaining > 0 {
        let want = remaining.min(buf.len() as u64) as usize;
        let n = source.read(&mut buf[..want]).map_err(Error::Io)?;
        if n == 0 {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("{}: file shrank while packing", path.display()),
            )));
        }
        sink.write_all(&buf[..n]).map_err(Error::Io)?;
        remaining -= n as u64;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dmffs_codec::{read_header, Region};
    use std::fs as stdfs;
    use tempfile::tempdir;

    fn write_file(dir: &Path, name: &str, contents: &[u8]) {
        stdfs::write(dir.join(name), contents).unwrap();
    }

    #[test]
    fn packs_flat_directory_with_version_and_end() {
        let src = tempdir().unwrap();
        write_file(src.path(), "hello.txt", b"hi");

        let out = tempdir().unwrap();
        let image_path = out.path().join("image.bin");
        pack(src.path(), &image_path).unwrap();

        let bytes = stdfs::read(&image_path).unwrap();
        let region = Region::new(&bytes);

        let (version_header, version_payload_off) = read_header(&region, 0).unwrap();
        assert_eq!(version_header.tag, Tag::Version);
        let version_end = version_payload_off + version_header.length as u64;

        let (file_header, file_payload_off) = read_header(&region, version_end).unwrap();
        assert_eq!(file_header.tag, Tag::File);
        let file_end = file_payload_off + file_header.length as u64;

        let (name_header, name_payload_off) = read_header(&region, file_payload_off).unwrap();
        assert_eq!(name_header.tag, Tag::Name);
        assert_eq!(name_header.length as usize, "hello.txt".len());
        let name_end = name_payload_off + name_header.length as u64;

        let (data_header, data_payload_off) = read_header(&region, name_end).unwrap();
        assert_eq!(data_header.tag, Tag::Data);
        assert_eq!(data_header.length, 2);
        assert_eq!(data_payload_off + data_header.length as u64, file_end);

        let (end_header, _) = read_header(&region, file_end).unwrap();
        assert_eq!(end_header.tag, Tag::End);
        assert_eq!(end_header.length, 0);
    }

    #[test]
    fn dir_payload_length_matches_nested_contents() {
        let src = tempdir().unwrap();
        let sub = src.path().join("sub");
        stdfs::create_dir(&sub).unwrap();
        write_file(&sub, "a.txt", b"abc");

        let out = tempdir().unwrap();
        let image_path = out.path().join("image.bin");
        pack(src.path(), &image_path).unwrap();

        let bytes = stdfs::read(&image_path).unwrap();
        let region = Region::new(&bytes);

        let (version_header, version_payload_off) = read_header(&region, 0).unwrap();
        let version_end = version_payload_off + version_header.length as u64;

        let (dir_header, dir_payload_off) = read_header(&region, version_end).unwrap();
        assert_eq!(dir_header.tag, Tag::Dir);
        let dir_end = dir_payload_off + dir_header.length as u64;

        let (end_header, _) = read_header(&region, dir_end).unwrap();
        assert_eq!(end_header.tag, Tag::End);
    }

    #[test]
    fn packing_is_idempotent() {
        let src = tempdir().unwrap();
        write_file(src.path(), "one.txt", b"first");
        write_file(src.path(), "two.txt", b"second file contents");

        let out = tempdir().unwrap();
        let image_path = out.path().join("image.bin");
        pack(src.path(), &image_path).unwrap();
        let first = stdfs::read(&image_path).unwrap();
        pack(src.path(), &image_path).unwrap();
        let second = stdfs::read(&image_path).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn rejects_missing_input_directory() {
        let out = tempdir().unwrap();
        let image_path = out.path().join("image.bin");
        let missing = out.path().join("does-not-exist");
        let err = pack(&missing, &image_path).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn rejects_a_real_top_level_file_named_data_bin() {
        let src = tempdir().unwrap();
        write_file(src.path(), "data.bin", b"would shadow fallback");
        write_file(src.path(), "kept.txt", b"kept");

        let out = tempdir().unwrap();
        let image_path = out.path().join("image.bin");
        let err = pack(src.path(), &image_path).unwrap_err();
        assert!(matches!(err, Error::Invalid));
    }
}
