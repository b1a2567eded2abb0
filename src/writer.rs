//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the tarstream-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//

//! Archive creation: filesystem objects to tar byte stream
//!
//! `TarWriter` turns one filesystem path at a time into header blocks
//! (plus a pax override entry when the fixed-width fields cannot hold a
//! value) and padded body blocks. Directory walking belongs to the
//! caller; this layer archives exactly the paths it is handed.
//!
//! Hard links are detected through a shared `(dev, ino)` cache: the
//! first path owning an inode is written in full, later ones become
//! Link entries pointing back at it.

use crate::entry::{EntryAttrs, EntryKind};
use crate::error::{TarError, TarResult, WarnHandler, Warner};
use crate::formats::fields::BLOCK_SIZE;
use crate::formats::{padding_needed, Header, PaxExtended};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs::{self, File, Metadata};
use std::io::{Read, Write};
#[cfg(unix)]
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Static zero buffer for padding and end-of-archive markers
static ZERO_BLOCK: [u8; BLOCK_SIZE] = [0u8; BLOCK_SIZE];

/// Default upper bound on a single body read (1 MiB)
pub const MAX_READ_SIZE: usize = 1024 * 1024;

/// Maps `(dev, ino)` to the first archive path that used that inode
pub type LinkCache = Rc<RefCell<HashMap<(u64, u64), String>>>;

/// Maps filesystem path to its lstat result
pub type StatCache = Rc<RefCell<HashMap<PathBuf, Metadata>>>;

/// Options for archive creation
#[derive(Default)]
pub struct WriteOptions {
    /// Omit uid/gid/uname/gname/atime/ctime and the dev/ino/nlink pax
    /// records, for archives meant to be reproducible across hosts
    pub portable: bool,
    /// Cap on a single body read; zero means the 1 MiB default
    pub max_read_size: usize,
    /// Promote warnings to errors
    pub strict: bool,
    /// Warning callback
    pub on_warn: Option<WarnHandler>,
    /// Share hard-link detection across writers
    pub link_cache: Option<LinkCache>,
    /// Share lstat results across writers
    pub stat_cache: Option<StatCache>,
}

/// Streaming tar writer
pub struct TarWriter<W: Write> {
    out: W,
    portable: bool,
    max_read_size: usize,
    warner: Warner,
    link_cache: LinkCache,
    stat_cache: StatCache,
    finished: bool,
}

impl<W: Write> TarWriter<W> {
    pub fn new(out: W) -> Self {
        Self::with_options(out, WriteOptions::default())
    }

    pub fn with_options(out: W, opts: WriteOptions) -> Self {
        TarWriter {
            out,
            portable: opts.portable,
            max_read_size: if opts.max_read_size == 0 {
                MAX_READ_SIZE
            } else {
                opts.max_read_size
            },
            warner: Warner {
                strict: opts.strict,
                on_warn: opts.on_warn,
            },
            link_cache: opts.link_cache.unwrap_or_default(),
            stat_cache: opts.stat_cache.unwrap_or_default(),
            finished: false,
        }
    }

    /// Archive one filesystem path under its own name
    pub fn append_path(&mut self, path: &Path) -> TarResult<()> {
        let archive_path = path.to_string_lossy().into_owned();
        self.append_path_as(path, &archive_path)
    }

    /// Archive one filesystem path under the given member name
    pub fn append_path_as(&mut self, path: &Path, archive_path: &str) -> TarResult<()> {
        let meta = self.lstat(path)?;

        let kind = match entry_kind_of(&meta) {
            Some(kind) => kind,
            None => {
                return self
                    .warner
                    .warn("unsupported entry type", &path.display().to_string());
            }
        };

        let mut attrs = build_attrs(archive_path, kind, &meta, self.portable);

        match kind {
            EntryKind::SymbolicLink => {
                attrs.linkpath = fs::read_link(path)?.to_string_lossy().into_owned();
            }
            EntryKind::Directory => {
                if !attrs.path.ends_with('/') {
                    attrs.path.push('/');
                }
            }
            EntryKind::File if attrs.nlink > 1 => {
                let key = (attrs.dev, attrs.ino);
                let mut cache = self.link_cache.borrow_mut();
                let first = cache.get(&key).cloned();
                match first {
                    Some(first) if first != attrs.path => {
                        attrs.kind = EntryKind::Link;
                        attrs.linkpath = first;
                        attrs.size = 0;
                    }
                    Some(_) => {}
                    None => {
                        cache.insert(key, attrs.path.clone());
                    }
                }
            }
            _ => {}
        }

        self.write_header(&attrs)?;

        if attrs.kind.is_file() && attrs.size > 0 {
            self.write_body(path, attrs.size)?;
        }
        Ok(())
    }

    /// Encode the header, preceded by a pax override entry when needed
    fn write_header(&mut self, attrs: &EntryAttrs) -> TarResult<()> {
        let mut hdr = header_from_attrs(attrs);
        let block = hdr.encode();

        if hdr.need_pax {
            let pax = PaxExtended::from_attrs(attrs, self.portable);
            if !pax.is_empty() {
                self.out.write_all(&pax.encode(&attrs.path, attrs.mtime))?;
            } else {
                self.warner
                    .warn("field overflow not covered by pax", &attrs.path)?;
            }
        }

        self.out.write_all(&block)?;
        Ok(())
    }

    /// Stream the body in bounded reads and pad to the block grid
    fn write_body(&mut self, path: &Path, size: u64) -> TarResult<()> {
        let mut file = File::open(path)?;
        let chunk = std::cmp::min(
            crate::formats::round_up_block(size),
            self.max_read_size as u64,
        ) as usize;
        let mut buf = vec![0u8; chunk];

        let mut remain = size;
        while remain > 0 {
            let want = std::cmp::min(remain, buf.len() as u64) as usize;
            let n = file.read(&mut buf[..want])?;
            if n == 0 {
                // the file shrank underneath us; the header is already
                // committed, so the archive cannot be made consistent
                return Err(TarError::Corrupt(format!(
                    "{}: file truncated while reading ({} bytes short)",
                    path.display(),
                    remain
                )));
            }
            self.out.write_all(&buf[..n])?;
            remain -= n as u64;
        }

        let pad = padding_needed(size);
        if pad > 0 {
            self.out.write_all(&ZERO_BLOCK[..pad])?;
        }
        Ok(())
    }

    /// Write the end-of-archive marker and flush
    pub fn finish(&mut self) -> TarResult<()> {
        if self.finished {
            return Ok(());
        }
        self.out.write_all(&ZERO_BLOCK)?;
        self.out.write_all(&ZERO_BLOCK)?;
        self.out.flush()?;
        self.finished = true;
        Ok(())
    }

    /// Consume the writer, returning the output stream
    pub fn into_inner(mut self) -> TarResult<W> {
        self.finish()?;
        Ok(self.out)
    }

    fn lstat(&mut self, path: &Path) -> TarResult<Metadata> {
        if let Some(meta) = self.stat_cache.borrow().get(path) {
            return Ok(meta.clone());
        }
        let meta = fs::symlink_metadata(path)?;
        self.stat_cache
            .borrow_mut()
            .insert(path.to_path_buf(), meta.clone());
        Ok(meta)
    }
}

/// Classify an lstat result; `None` for types tar cannot carry
fn entry_kind_of(meta: &Metadata) -> Option<EntryKind> {
    let file_type = meta.file_type();
    if file_type.is_dir() {
        return Some(EntryKind::Directory);
    }
    if file_type.is_symlink() {
        return Some(EntryKind::SymbolicLink);
    }
    if file_type.is_file() {
        return Some(EntryKind::File);
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::FileTypeExt;
        if file_type.is_block_device() {
            return Some(EntryKind::BlockDevice);
        }
        if file_type.is_char_device() {
            return Some(EntryKind::CharacterDevice);
        }
        if file_type.is_fifo() {
            return Some(EntryKind::Fifo);
        }
    }
    None
}

/// Build merged attributes from an lstat result
fn build_attrs(archive_path: &str, kind: EntryKind, meta: &Metadata, portable: bool) -> EntryAttrs {
    let mut attrs = EntryAttrs::new(archive_path.to_string(), kind);

    #[cfg(unix)]
    {
        attrs.mode = meta.mode() & 0o7777;
        attrs.mtime = meta.mtime();
        attrs.mtime_nsec = meta.mtime_nsec().clamp(0, 999_999_999) as u32;
        attrs.dev = meta.dev();
        attrs.ino = meta.ino();
        attrs.nlink = meta.nlink();

        if !portable {
            attrs.uid = meta.uid() as u64;
            attrs.gid = meta.gid() as u64;
            attrs.uname = username_of(meta.uid());
            attrs.gname = groupname_of(meta.gid());
            attrs.atime = Some(meta.atime());
            attrs.atime_nsec = meta.atime_nsec().clamp(0, 999_999_999) as u32;
            attrs.ctime = Some(meta.ctime());
        }

        if kind.is_device() {
            let rdev = meta.rdev() as libc::dev_t;
            attrs.devmaj = libc::major(rdev) as u32;
            attrs.devmin = libc::minor(rdev) as u32;
        }
    }

    #[cfg(not(unix))]
    {
        attrs.mode = if meta.permissions().readonly() {
            0o444
        } else {
            0o644
        };
        attrs.mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
    }

    if kind == EntryKind::File {
        attrs.size = meta.len();
    }

    attrs
}

/// Lower merged attributes into a header for encoding
fn header_from_attrs(attrs: &EntryAttrs) -> Header {
    Header {
        path: attrs.path.clone(),
        mode: attrs.mode,
        uid: attrs.uid,
        gid: attrs.gid,
        size: attrs.size,
        mtime: attrs.mtime,
        kind: attrs.kind,
        linkpath: attrs.linkpath.clone(),
        uname: attrs.uname.clone().unwrap_or_default(),
        gname: attrs.gname.clone().unwrap_or_default(),
        devmaj: attrs.devmaj,
        devmin: attrs.devmin,
        atime: attrs.atime,
        ctime: attrs.ctime,
        ..Default::default()
    }
}

/// Get username from uid
#[cfg(unix)]
fn username_of(uid: u32) -> Option<String> {
    unsafe {
        let pw = libc::getpwuid(uid);
        if pw.is_null() {
            return None;
        }
        let name = std::ffi::CStr::from_ptr((*pw).pw_name);
        name.to_str().ok().map(|s| s.to_string())
    }
}

/// Get group name from gid
#[cfg(unix)]
fn groupname_of(gid: u32) -> Option<String> {
    unsafe {
        let gr = libc::getgrgid(gid);
        if gr.is_null() {
            return None;
        }
        let name = std::ffi::CStr::from_ptr((*gr).gr_name);
        name.to_str().ok().map(|s| s.to_string())
    }
}
