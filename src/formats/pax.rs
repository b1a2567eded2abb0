//
// Copyright (c) 2024 Jeff Garzik
//
// This file is part of the tarstream-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//

//! Pax extended header codec
//!
//! Extended headers carry `key=value` overrides for values the
//! fixed-width header cannot hold: long paths, sizes beyond 8 GiB,
//! large uid/gid, subsecond timestamps, non-ASCII names.
//!
//! Body format, one record per line: `"<len> <key>=<value>\n"` where
//! `<len>` is the byte length of the whole line including its own
//! digits. The length is a fixpoint and is computed by iteration.
//!
//! The body travels as the payload of a meta entry: typeflag `x` for
//! per-entry overrides, `g` for global ones, under a synthesized
//! `PaxHeader/` path.

use crate::entry::{EntryAttrs, EntryKind};
use crate::error::{TarError, TarResult};
use crate::formats::fields;
use crate::formats::header::{split_path, Header};
use std::collections::BTreeMap;

/// A set of extended header overrides
#[derive(Debug, Clone, Default)]
pub struct PaxExtended {
    /// True for a global (`g`) header affecting all subsequent entries
    pub global: bool,
    /// atime - file access time, fractional seconds
    pub atime: Option<f64>,
    /// mtime - file modification time, fractional seconds
    pub mtime: Option<f64>,
    /// ctime - file change time, fractional seconds
    pub ctime: Option<f64>,
    /// charset - value encoding declaration
    pub charset: Option<String>,
    /// comment - free text, ignored on read
    pub comment: Option<String>,
    /// path - member pathname
    pub path: Option<String>,
    /// linkpath - link target pathname
    pub linkpath: Option<String>,
    /// size - body size
    pub size: Option<u64>,
    /// uid - user ID
    pub uid: Option<u64>,
    /// gid - group ID
    pub gid: Option<u64>,
    /// uname - user name
    pub uname: Option<String>,
    /// gname - group name
    pub gname: Option<String>,
    /// dev - device ID of the source file
    pub dev: Option<u64>,
    /// ino - inode of the source file
    pub ino: Option<u64>,
    /// nlink - hard link count of the source file
    pub nlink: Option<u64>,
    /// Unrecognized keywords, preserved but not interpreted
    pub extra: BTreeMap<String, String>,
}

impl PaxExtended {
    /// Create an empty override set
    pub fn new(global: bool) -> Self {
        PaxExtended {
            global,
            ..Default::default()
        }
    }

    /// Check if the set holds no overrides
    pub fn is_empty(&self) -> bool {
        self.atime.is_none()
            && self.mtime.is_none()
            && self.ctime.is_none()
            && self.charset.is_none()
            && self.comment.is_none()
            && self.path.is_none()
            && self.linkpath.is_none()
            && self.size.is_none()
            && self.uid.is_none()
            && self.gid.is_none()
            && self.uname.is_none()
            && self.gname.is_none()
            && self.dev.is_none()
            && self.ino.is_none()
            && self.nlink.is_none()
            && self.extra.is_empty()
    }

    /// Parse an extended header body, merging into `prior`.
    ///
    /// Later records win over earlier ones and over `prior`. Records
    /// whose stored length fails the fixed-point check are an error.
    pub fn parse(data: &[u8], prior: Option<PaxExtended>, global: bool) -> TarResult<Self> {
        let mut merged = prior.unwrap_or_else(|| PaxExtended::new(global));
        merged.global = global;

        let mut pos = 0;
        while pos < data.len() {
            let space = data[pos..]
                .iter()
                .position(|&b| b == b' ')
                .ok_or_else(|| TarError::InvalidPax("record has no length field".to_string()))?;

            let len_str = std::str::from_utf8(&data[pos..pos + space])
                .map_err(|_| TarError::InvalidPax("record length is not ASCII".to_string()))?;
            let record_len: usize = len_str
                .parse()
                .map_err(|_| TarError::InvalidPax(format!("bad record length: {}", len_str)))?;

            // the length covers its own digits, the space, the record
            // text and the trailing newline
            if record_len <= space + 1
                || pos + record_len > data.len()
                || data[pos + record_len - 1] != b'\n'
            {
                return Err(TarError::InvalidPax(format!(
                    "record length {} does not match its line",
                    record_len
                )));
            }

            let record = std::str::from_utf8(&data[pos + space + 1..pos + record_len - 1])
                .map_err(|_| TarError::InvalidPax("record is not UTF-8".to_string()))?;

            if let Some(eq) = record.find('=') {
                merged.set_keyword(&record[..eq], &record[eq + 1..])?;
            }

            pos += record_len;
        }

        Ok(merged)
    }

    fn set_keyword(&mut self, keyword: &str, value: &str) -> TarResult<()> {
        match keyword {
            "atime" => self.atime = Some(parse_pax_time(value)?),
            "mtime" => self.mtime = Some(parse_pax_time(value)?),
            "ctime" => self.ctime = Some(parse_pax_time(value)?),
            "charset" => self.charset = Some(value.to_string()),
            "comment" => self.comment = Some(value.to_string()),
            "path" => self.path = Some(value.to_string()),
            "linkpath" => self.linkpath = Some(value.to_string()),
            "size" => self.size = Some(parse_pax_num(keyword, value)?),
            "uid" => self.uid = Some(parse_pax_num(keyword, value)?),
            "gid" => self.gid = Some(parse_pax_num(keyword, value)?),
            "uname" => self.uname = Some(value.to_string()),
            "gname" => self.gname = Some(value.to_string()),
            "dev" => self.dev = Some(parse_pax_num(keyword, value)?),
            "ino" => self.ino = Some(parse_pax_num(keyword, value)?),
            "nlink" => self.nlink = Some(parse_pax_num(keyword, value)?),
            _ => {
                self.extra
                    .insert(keyword.to_string(), value.to_string());
            }
        }
        Ok(())
    }

    /// Serialize the override records
    pub fn encode_body(&self) -> Vec<u8> {
        let mut data = Vec::new();

        if let Some(atime) = self.atime {
            write_pax_record(&mut data, "atime", &format_pax_time(atime));
        }
        if let Some(ref charset) = self.charset {
            write_pax_record(&mut data, "charset", charset);
        }
        if let Some(ref comment) = self.comment {
            write_pax_record(&mut data, "comment", comment);
        }
        if let Some(ctime) = self.ctime {
            write_pax_record(&mut data, "ctime", &format_pax_time(ctime));
        }
        if let Some(gid) = self.gid {
            write_pax_record(&mut data, "gid", &gid.to_string());
        }
        if let Some(ref gname) = self.gname {
            write_pax_record(&mut data, "gname", gname);
        }
        if let Some(ref linkpath) = self.linkpath {
            write_pax_record(&mut data, "linkpath", linkpath);
        }
        if let Some(mtime) = self.mtime {
            write_pax_record(&mut data, "mtime", &format_pax_time(mtime));
        }
        if let Some(ref path) = self.path {
            write_pax_record(&mut data, "path", path);
        }
        if let Some(size) = self.size {
            write_pax_record(&mut data, "size", &size.to_string());
        }
        if let Some(uid) = self.uid {
            write_pax_record(&mut data, "uid", &uid.to_string());
        }
        if let Some(ref uname) = self.uname {
            write_pax_record(&mut data, "uname", uname);
        }
        if let Some(dev) = self.dev {
            write_pax_record(&mut data, "dev", &dev.to_string());
        }
        if let Some(ino) = self.ino {
            write_pax_record(&mut data, "ino", &ino.to_string());
        }
        if let Some(nlink) = self.nlink {
            write_pax_record(&mut data, "nlink", &nlink.to_string());
        }
        for (key, value) in &self.extra {
            write_pax_record(&mut data, key, value);
        }

        data
    }

    /// Encode the complete meta entry: wrapping header block plus the
    /// body padded to a block boundary.
    ///
    /// `for_path` and `mtime` come from the entry being described.
    pub fn encode(&self, for_path: &str, mtime: i64) -> Vec<u8> {
        let body = self.encode_body();

        let kind = if self.global {
            EntryKind::GlobalExtendedHeader
        } else {
            EntryKind::ExtendedHeader
        };
        let mut hdr = Header::new(pax_meta_path(for_path), kind);
        hdr.mode = 0o644;
        hdr.size = body.len() as u64;
        hdr.mtime = mtime;

        let mut out = Vec::with_capacity(fields::BLOCK_SIZE + body.len() + fields::BLOCK_SIZE);
        out.extend_from_slice(&hdr.encode());
        out.extend_from_slice(&body);
        out.resize(out.len() + fields::padding_needed(body.len() as u64), 0);
        out
    }

    /// Apply the overrides to merged entry attributes
    pub fn apply_to(&self, attrs: &mut EntryAttrs) {
        if let Some(ref path) = self.path {
            attrs.path = path.clone();
        }
        if let Some(ref linkpath) = self.linkpath {
            attrs.linkpath = linkpath.clone();
        }
        if let Some(size) = self.size {
            attrs.size = size;
        }
        if let Some(uid) = self.uid {
            attrs.uid = uid;
        }
        if let Some(gid) = self.gid {
            attrs.gid = gid;
        }
        if let Some(ref uname) = self.uname {
            attrs.uname = Some(uname.clone());
        }
        if let Some(ref gname) = self.gname {
            attrs.gname = Some(gname.clone());
        }
        if let Some(mtime) = self.mtime {
            let (sec, nsec) = split_pax_time(mtime);
            attrs.mtime = sec;
            attrs.mtime_nsec = nsec;
        }
        if let Some(atime) = self.atime {
            let (sec, nsec) = split_pax_time(atime);
            attrs.atime = Some(sec);
            attrs.atime_nsec = nsec;
        }
        if let Some(ctime) = self.ctime {
            let (sec, nsec) = split_pax_time(ctime);
            attrs.ctime = Some(sec);
            attrs.ctime_nsec = nsec;
        }
        if let Some(dev) = self.dev {
            attrs.dev = dev;
        }
        if let Some(ino) = self.ino {
            attrs.ino = ino;
        }
        if let Some(nlink) = self.nlink {
            attrs.nlink = nlink;
        }
    }

    /// Build the override set an entry needs because its values do not
    /// fit the fixed-width header.
    pub fn from_attrs(attrs: &EntryAttrs, portable: bool) -> Self {
        let mut pax = PaxExtended::new(false);

        // the narrower xstar prefix is the conservative split width
        if attrs.path.len() > fields::PATH.len
            && split_path(&attrs.path, fields::XSTAR_PREFIX.len).is_none()
        {
            pax.path = Some(attrs.path.clone());
        }

        if attrs.linkpath.len() > fields::LINKPATH.len {
            pax.linkpath = Some(attrs.linkpath.clone());
        }

        // 12-octal-digit limit on the size field
        if attrs.size > 0o77777777777 {
            pax.size = Some(attrs.size);
        }

        // 8-octal-digit limit on uid/gid
        if attrs.uid > 0o7777777 {
            pax.uid = Some(attrs.uid);
        }
        if attrs.gid > 0o7777777 {
            pax.gid = Some(attrs.gid);
        }

        if attrs.mtime_nsec > 0 {
            pax.mtime = Some(join_pax_time(attrs.mtime, attrs.mtime_nsec));
        }

        if let Some(ref uname) = attrs.uname {
            if !uname.is_ascii() || uname.len() > fields::UNAME.len {
                pax.uname = Some(uname.clone());
            }
        }
        if let Some(ref gname) = attrs.gname {
            if !gname.is_ascii() || gname.len() > fields::GNAME.len {
                pax.gname = Some(gname.clone());
            }
        }

        if !portable {
            if attrs.atime_nsec > 0 {
                if let Some(atime) = attrs.atime {
                    pax.atime = Some(join_pax_time(atime, attrs.atime_nsec));
                }
            }
            if attrs.nlink > 1 {
                pax.dev = Some(attrs.dev);
                pax.ino = Some(attrs.ino);
                pax.nlink = Some(attrs.nlink);
            }
        }

        pax
    }
}

/// Synthesize the wrapping header path: `<dirname>/PaxHeader/<basename>`
/// clamped to the width of the path field.
fn pax_meta_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    let synth = match trimmed.rfind('/') {
        Some(i) => format!("{}/PaxHeader/{}", &trimmed[..i], &trimmed[i + 1..]),
        None => format!("PaxHeader/{}", trimmed),
    };
    truncate_bytes(&synth, fields::PATH.len)
}

/// Truncate to at most `max` bytes on a character boundary
fn truncate_bytes(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

/// Parse pax time format: decimal seconds with optional fraction
fn parse_pax_time(s: &str) -> TarResult<f64> {
    s.parse()
        .map_err(|_| TarError::InvalidPax(format!("bad time value: {}", s)))
}

fn parse_pax_num(keyword: &str, value: &str) -> TarResult<u64> {
    value
        .parse()
        .map_err(|_| TarError::InvalidPax(format!("bad {} value: {}", keyword, value)))
}

/// Format time for an extended header record
fn format_pax_time(time: f64) -> String {
    if time.fract() == 0.0 {
        format!("{}", time as i64)
    } else {
        format!("{:.9}", time)
            .trim_end_matches('0')
            .to_string()
    }
}

fn split_pax_time(time: f64) -> (i64, u32) {
    let sec = time.floor() as i64;
    let nsec = ((time - sec as f64) * 1_000_000_000.0).round() as u32;
    (sec, nsec.min(999_999_999))
}

fn join_pax_time(sec: i64, nsec: u32) -> f64 {
    sec as f64 + nsec as f64 / 1_000_000_000.0
}

/// Write one record; the stored length is a fixpoint because its own
/// digits count toward it.
fn write_pax_record(data: &mut Vec<u8>, keyword: &str, value: &str) {
    let content = format!(" {}={}\n", keyword, value);

    let mut len = content.len() + 1;
    loop {
        let total = len.to_string().len() + content.len();
        if total == len {
            break;
        }
        len = total;
    }

    data.extend_from_slice(len.to_string().as_bytes());
    data.extend_from_slice(content.as_bytes());
}
