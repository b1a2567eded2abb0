//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the tarstream-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//

//! 512-byte header block codec
//!
//! Three fieldsets share the block layout up to offset 156:
//! - basic: the original v7 fields only
//! - ustar: adds `ustar\0` magic, version `00`, uname/gname, device
//!   numbers and a 155-byte path prefix at offset 345
//! - xstar: the Sun variant; the prefix narrows to 130 bytes, a NUL
//!   terminator sits at offset 475, and atime/ctime occupy the tail
//!
//! Encoding picks the narrowest fieldset that fits every value; decoding
//! detects the fieldset from the magic at offset 257 and the terminator
//! byte at offset 475.

use crate::entry::EntryKind;
use crate::formats::fields;
use crate::formats::fields::BLOCK_SIZE;

/// Which header fields are in use beyond offset 156
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Fieldset {
    /// Original v7 layout
    #[default]
    Basic,
    /// POSIX ustar layout
    Ustar,
    /// Sun xstar layout with atime/ctime
    Xstar,
}

/// A decoded or to-be-encoded header block
#[derive(Debug, Clone, Default)]
pub struct Header {
    /// Member path (prefix already joined on decode)
    pub path: String,
    /// Permission bits (12-bit)
    pub mode: u32,
    pub uid: u64,
    pub gid: u64,
    /// Body size in bytes
    pub size: u64,
    /// Modification time, seconds since epoch
    pub mtime: i64,
    /// Stored checksum (set by both decode and encode)
    pub cksum: u32,
    /// Entry type
    pub kind: EntryKind,
    /// Link target for hard and symbolic links
    pub linkpath: String,
    pub uname: String,
    pub gname: String,
    pub devmaj: u32,
    pub devmin: u32,
    /// Raw prefix field as stored (informational; `path` has it joined)
    pub prefix: String,
    /// Access time (xstar tail)
    pub atime: Option<i64>,
    /// Change time (xstar tail)
    pub ctime: Option<i64>,
    /// Fieldset detected on decode or chosen on encode
    pub fieldset: Fieldset,
    /// Checksum matched under signed or unsigned summation
    pub cksum_valid: bool,
    /// Every byte of the block is zero
    pub null_block: bool,
    /// Some field overflowed or was truncated; a pax override is needed
    pub need_pax: bool,
}

impl Header {
    /// Create a header for the given path and kind with default fields
    pub fn new(path: String, kind: EntryKind) -> Self {
        Header {
            path,
            kind,
            mode: 0o644,
            ..Default::default()
        }
    }

    /// Decode a 512-byte block
    pub fn decode(block: &[u8; BLOCK_SIZE]) -> Self {
        if block.iter().all(|&b| b == 0) {
            return Header {
                null_block: true,
                ..Default::default()
            };
        }

        let fieldset = detect_fieldset(block);

        let name = fields::PATH.read_str(block);
        let prefix = match fieldset {
            Fieldset::Basic => String::new(),
            Fieldset::Ustar => fields::USTAR_PREFIX.read_str(block),
            Fieldset::Xstar => fields::XSTAR_PREFIX.read_str(block),
        };
        let path = if prefix.is_empty() {
            name
        } else {
            format!("{}/{}", prefix, name)
        };

        let mut kind = EntryKind::from_code(block[fields::TYPEFLAG.off]);
        // v7 archives mark directories by a trailing slash only
        if kind == EntryKind::File && path.ends_with('/') {
            kind = EntryKind::Directory;
        }

        let stored = fields::CKSUM.read_num(block);
        let cksum_valid = match stored {
            Some(sum) => sum == checksum_unsigned(block) as i64 || sum == checksum_signed(block),
            None => false,
        };

        let (atime, ctime) = match fieldset {
            Fieldset::Xstar => (
                fields::ATIME.read_num(block),
                fields::CTIME.read_num(block),
            ),
            _ => (None, None),
        };

        Header {
            path,
            mode: fields::MODE.read_num(block).unwrap_or(0) as u32 & 0o7777,
            uid: fields::UID.read_num(block).unwrap_or(0) as u64,
            gid: fields::GID.read_num(block).unwrap_or(0) as u64,
            size: fields::SIZE.read_num(block).unwrap_or(0).max(0) as u64,
            mtime: fields::MTIME.read_num(block).unwrap_or(0),
            cksum: stored.unwrap_or(0) as u32,
            kind,
            linkpath: fields::LINKPATH.read_str(block),
            uname: fields::UNAME.read_str(block),
            gname: fields::GNAME.read_str(block),
            devmaj: fields::DEVMAJ.read_num(block).unwrap_or(0) as u32,
            devmin: fields::DEVMIN.read_num(block).unwrap_or(0) as u32,
            prefix,
            atime,
            ctime,
            fieldset,
            cksum_valid,
            null_block: false,
            need_pax: false,
        }
    }

    /// Encode into a fresh block, choosing the narrowest fieldset that
    /// fits. Overflow and truncation set `need_pax` rather than failing.
    pub fn encode(&mut self) -> [u8; BLOCK_SIZE] {
        let mut block = [0u8; BLOCK_SIZE];
        self.encode_into(&mut block);
        block
    }

    /// Encode into a caller-provided block
    pub fn encode_into(&mut self, block: &mut [u8; BLOCK_SIZE]) {
        block.fill(0);
        self.need_pax = false;

        let fieldset = self.select_fieldset();
        self.fieldset = fieldset;

        let prefix_field = match fieldset {
            Fieldset::Basic => None,
            Fieldset::Ustar => Some(fields::USTAR_PREFIX),
            Fieldset::Xstar => Some(fields::XSTAR_PREFIX),
        };

        // Path, split across name and prefix when the fieldset allows
        match split_path(&self.path, prefix_field.map(|f| f.len).unwrap_or(0)) {
            Some((name, prefix)) => {
                fields::PATH.write_str(block, name);
                self.prefix = prefix.to_string();
                if let (Some(field), false) = (prefix_field, prefix.is_empty()) {
                    field.write_str(block, prefix);
                }
            }
            None => {
                // no split point exists; keep the head and override in pax
                fields::PATH.write_str(block, &self.path);
                self.prefix = String::new();
                self.need_pax = true;
            }
        }

        self.need_pax |= fields::MODE.write_num(block, (self.mode & 0o7777) as i64);
        self.need_pax |= fields::UID.write_num(block, self.uid as i64);
        self.need_pax |= fields::GID.write_num(block, self.gid as i64);
        self.need_pax |= fields::SIZE.write_num(block, self.size as i64);
        self.need_pax |= fields::MTIME.write_num(block, self.mtime);

        block[fields::TYPEFLAG.off] = self.kind.code();
        self.need_pax |= fields::LINKPATH.write_str(block, &self.linkpath);

        if fieldset != Fieldset::Basic {
            fields::MAGIC.write_str(block, "ustar");
            fields::VERSION.write_str(block, "00");
            self.need_pax |= fields::UNAME.write_str(block, &self.uname);
            self.need_pax |= fields::GNAME.write_str(block, &self.gname);
            self.need_pax |= !self.uname.is_ascii() || !self.gname.is_ascii();
            self.need_pax |= fields::DEVMAJ.write_num(block, self.devmaj as i64);
            self.need_pax |= fields::DEVMIN.write_num(block, self.devmin as i64);
        }

        if fieldset == Fieldset::Xstar {
            if let Some(atime) = self.atime {
                self.need_pax |= fields::ATIME.write_num(block, atime);
            }
            if let Some(ctime) = self.ctime {
                self.need_pax |= fields::CTIME.write_num(block, ctime);
            }
        }

        let sum = checksum_unsigned(block);
        fields::CKSUM.write_num(block, sum as i64);
        self.cksum = sum;
        self.cksum_valid = true;
    }

    fn select_fieldset(&self) -> Fieldset {
        if self.atime.is_some() || self.ctime.is_some() {
            return Fieldset::Xstar;
        }
        let uses_ustar = !self.uname.is_empty()
            || !self.gname.is_empty()
            || self.devmaj != 0
            || self.devmin != 0
            || self.path.len() > fields::PATH.len;
        if uses_ustar {
            Fieldset::Ustar
        } else {
            Fieldset::Basic
        }
    }
}

/// Detect the fieldset of a stored block
fn detect_fieldset(block: &[u8; BLOCK_SIZE]) -> Fieldset {
    if fields::MAGIC.read_str(block) != "ustar" {
        return Fieldset::Basic;
    }
    if block[fields::PREFIX_TERM.off] == 0 {
        Fieldset::Xstar
    } else {
        Fieldset::Ustar
    }
}

/// Split a path into `(name, prefix)` for the given prefix width.
///
/// Returns `None` when no split at a `/` keeps the name within 100
/// bytes and the prefix within `prefix_len`.
pub(crate) fn split_path(path: &str, prefix_len: usize) -> Option<(&str, &str)> {
    if path.len() <= fields::PATH.len {
        return Some((path, ""));
    }
    if prefix_len == 0 {
        return None;
    }
    let bytes = path.as_bytes();
    let limit = std::cmp::min(prefix_len, path.len() - 1);
    for i in (1..=limit).rev() {
        if bytes[i] == b'/' && path.len() - i - 1 <= fields::PATH.len {
            return Some((&path[i + 1..], &path[..i]));
        }
    }
    None
}

/// Sum of header bytes with the cksum field counted as ASCII spaces
fn checksum_unsigned(block: &[u8; BLOCK_SIZE]) -> u32 {
    let mut sum: u32 = 0;
    for (i, &byte) in block.iter().enumerate() {
        if (fields::CKSUM.off..fields::CKSUM.off + fields::CKSUM.len).contains(&i) {
            sum += b' ' as u32;
        } else {
            sum += byte as u32;
        }
    }
    sum
}

/// Signed variant; some historical encoders summed `char` bytes
fn checksum_signed(block: &[u8; BLOCK_SIZE]) -> i64 {
    let mut sum: i64 = 0;
    for (i, &byte) in block.iter().enumerate() {
        if (fields::CKSUM.off..fields::CKSUM.off + fields::CKSUM.len).contains(&i) {
            sum += b' ' as i64;
        } else {
            sum += byte as i8 as i64;
        }
    }
    sum
}
