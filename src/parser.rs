//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the tarstream-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//

//! Push-mode parse state machine
//!
//! Callers feed arbitrary byte chunks with `write` and collect entries
//! with `next_entry`; the parser reconciles the chunks to the 512-byte
//! block grid, detects gzip on the first bytes, consumes meta entries
//! into pending overrides, and hands out entries strictly in archive
//! order. One entry is active at a time: the next one is released only
//! after the previous has ended and been drained.
//!
//! The parser never treats a null block as end-of-archive; it reports
//! invalid headers and keeps scanning one block at a time. Detecting
//! the two-zero-block trailer is the caller's concern.

use crate::compression::{is_gzip, GunzipStream};
use crate::entry::{EntryAttrs, EntryKind};
use crate::error::{TarError, TarResult, WarnHandler, Warner};
use crate::formats::fields::BLOCK_SIZE;
use crate::formats::{round_up_block, Header, PaxExtended};
use crate::read_entry::ReadEntry;
use std::collections::VecDeque;

/// Default cap on the body size of a meta entry (1 MiB)
pub const MAX_META_ENTRY_SIZE: u64 = 1024 * 1024;

/// Filter applied to each parsed entry: return false to skip it
pub type EntryFilter = Box<dyn FnMut(&str, &EntryAttrs) -> bool>;

/// Options for the parser
#[derive(Default)]
pub struct ParseOptions {
    /// Meta entries larger than this are ignored with a warning.
    /// Zero means the 1 MiB default.
    pub max_meta_entry_size: u64,
    /// Entry filter; filtered entries surface with `ignored` set
    pub filter: Option<EntryFilter>,
    /// Promote warnings to errors
    pub strict: bool,
    /// Warning callback
    pub on_warn: Option<WarnHandler>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Expecting a header block
    Begin,
    /// Consuming an entry body
    Body,
    /// Consuming a meta entry body
    Meta,
    /// Silently dropping blocks (oversized meta)
    Ignore,
}

/// Input routing decided from the first two bytes
enum Input {
    Undecided(Vec<u8>),
    Raw,
    Gzip(Box<GunzipStream>),
}

/// Streaming tar parser
pub struct Parser {
    state: State,
    input: Input,
    /// Partial header bytes carried between writes; the only place
    /// arbitrary chunk sizes meet the block grid
    slack: Vec<u8>,
    queue: VecDeque<ReadEntry>,
    /// Entry currently receiving body bytes (Body and Meta states)
    consuming: Option<ReadEntry>,
    /// Entry most recently handed to the consumer
    handed: Option<ReadEntry>,
    skip_remain: u64,
    ex: Option<PaxExtended>,
    gex: Option<PaxExtended>,
    next_index: u64,
    max_meta: u64,
    filter: Option<EntryFilter>,
    warner: Warner,
    ended: bool,
}

impl Parser {
    pub fn new() -> Self {
        Self::with_options(ParseOptions::default())
    }

    pub fn with_options(opts: ParseOptions) -> Self {
        let max_meta = if opts.max_meta_entry_size == 0 {
            MAX_META_ENTRY_SIZE
        } else {
            opts.max_meta_entry_size
        };
        Parser {
            state: State::Begin,
            input: Input::Undecided(Vec::new()),
            slack: Vec::new(),
            queue: VecDeque::new(),
            consuming: None,
            handed: None,
            skip_remain: 0,
            ex: None,
            gex: None,
            next_index: 0,
            max_meta,
            filter: opts.filter,
            warner: Warner {
                strict: opts.strict,
                on_warn: opts.on_warn,
            },
            ended: false,
        }
    }

    /// Feed a chunk of archive bytes.
    ///
    /// Returns `Ok(false)` when the consumer is lagging (entries parsed
    /// in body state but not yet collected); callers should pause the
    /// upstream until the queue drains.
    pub fn write(&mut self, chunk: &[u8]) -> TarResult<bool> {
        if self.ended {
            return Err(TarError::WriteAfterEnd("parser already ended".to_string()));
        }

        match &mut self.input {
            Input::Undecided(pending) => {
                pending.extend_from_slice(chunk);
                if pending.len() < 2 {
                    return Ok(true);
                }
                let buffered = std::mem::take(pending);
                if is_gzip(&buffered) {
                    let mut gz = Box::new(GunzipStream::new());
                    let mut plain = Vec::new();
                    gz.push(&buffered, &mut plain)?;
                    self.input = Input::Gzip(gz);
                    self.consume(&plain)?;
                } else {
                    self.input = Input::Raw;
                    self.consume(&buffered)?;
                }
            }
            Input::Raw => self.consume(chunk)?,
            Input::Gzip(gz) => {
                let mut plain = Vec::new();
                gz.push(chunk, &mut plain)?;
                self.consume(&plain)?;
            }
        }

        Ok(!self.lagging())
    }

    /// Signal end of input.
    ///
    /// Flushes the inflater and errors if the stream stops inside an
    /// entry body or inside a block holding nonzero bytes.
    pub fn end(&mut self) -> TarResult<()> {
        if self.ended {
            return Ok(());
        }

        match &mut self.input {
            Input::Undecided(pending) => {
                // a single buffered byte can never be gzip
                let buffered = std::mem::take(pending);
                self.input = Input::Raw;
                if !buffered.is_empty() {
                    self.consume(&buffered)?;
                }
            }
            Input::Gzip(gz) => {
                let mut plain = Vec::new();
                gz.finish(&mut plain)?;
                self.consume(&plain)?;
            }
            Input::Raw => {}
        }
        self.ended = true;

        if let Some(entry) = self.consuming.take() {
            if entry.remain() > 0 {
                return Err(TarError::TruncatedArchive(format!(
                    "stream ended with {} body bytes missing in {}",
                    entry.remain(),
                    entry.path()
                )));
            }
            entry.end();
        }
        if self.slack.iter().any(|&b| b != 0) {
            return Err(TarError::TruncatedArchive(
                "stream ended inside a partial block".to_string(),
            ));
        }
        Ok(())
    }

    /// Collect the next entry in archive order.
    ///
    /// Returns `None` while the previously returned entry has not yet
    /// ended and been drained, and after the queue is exhausted.
    pub fn next_entry(&mut self) -> Option<ReadEntry> {
        if let Some(handed) = &self.handed {
            if !handed.emitted_end() {
                return None;
            }
        }
        let entry = self.queue.pop_front()?;
        self.handed = Some(entry.clone());
        Some(entry)
    }

    /// True once `end` has been accepted
    pub fn is_ended(&self) -> bool {
        self.ended
    }

    fn lagging(&self) -> bool {
        self.state == State::Body && !self.queue.is_empty()
    }

    fn consume(&mut self, mut data: &[u8]) -> TarResult<()> {
        while !data.is_empty() {
            match self.state {
                State::Begin => {
                    if self.slack.is_empty() && data.len() >= BLOCK_SIZE {
                        let block: &[u8; BLOCK_SIZE] = data[..BLOCK_SIZE].try_into().unwrap();
                        data = &data[BLOCK_SIZE..];
                        self.handle_header(block)?;
                    } else {
                        let need = BLOCK_SIZE - self.slack.len();
                        let take = std::cmp::min(need, data.len());
                        self.slack.extend_from_slice(&data[..take]);
                        data = &data[take..];
                        if self.slack.len() == BLOCK_SIZE {
                            let block: [u8; BLOCK_SIZE] = self.slack[..].try_into().unwrap();
                            self.slack.clear();
                            self.handle_header(&block)?;
                        }
                    }
                }
                State::Body | State::Meta => {
                    let entry = self
                        .consuming
                        .clone()
                        .expect("body state without an entry");
                    let n = std::cmp::min(data.len() as u64, entry.block_remain()) as usize;
                    entry.write(&data[..n])?;
                    data = &data[n..];
                    if entry.block_remain() == 0 {
                        self.consuming = None;
                        let was_meta = self.state == State::Meta;
                        self.state = State::Begin;
                        if was_meta {
                            self.finish_meta(&entry)?;
                        }
                    }
                }
                State::Ignore => {
                    let n = std::cmp::min(data.len() as u64, self.skip_remain) as usize;
                    self.skip_remain -= n as u64;
                    data = &data[n..];
                    if self.skip_remain == 0 {
                        self.state = State::Begin;
                    }
                }
            }
        }
        Ok(())
    }

    fn handle_header(&mut self, block: &[u8; BLOCK_SIZE]) -> TarResult<()> {
        let hdr = Header::decode(block);
        if hdr.null_block {
            return Ok(());
        }
        if !hdr.cksum_valid {
            // report and advance one block; a later block may line up
            return self.warner.warn("invalid entry header", "checksum mismatch");
        }

        if hdr.kind.is_meta() {
            return self.begin_meta(&hdr);
        }

        let mut attrs = attrs_from_header(&hdr);
        if let Some(gex) = &self.gex {
            gex.apply_to(&mut attrs);
        }
        if let Some(ex) = self.ex.take() {
            ex.apply_to(&mut attrs);
        }

        let mut ignored = false;
        if let EntryKind::Unknown(code) = attrs.kind {
            self.warner.warn(
                "unknown entry type",
                &format!("'{}' in {}", code as char, attrs.path),
            )?;
            ignored = true;
        }
        if !ignored {
            if let Some(filter) = &mut self.filter {
                if !filter(&attrs.path, &attrs) {
                    ignored = true;
                }
            }
        }

        let entry = ReadEntry::new(attrs, self.next_index, false, ignored);
        self.next_index += 1;
        self.queue.push_back(entry.clone());

        if entry.block_remain() == 0 {
            entry.end();
        } else {
            self.consuming = Some(entry);
            self.state = State::Body;
        }
        Ok(())
    }

    fn begin_meta(&mut self, hdr: &Header) -> TarResult<()> {
        if hdr.size > self.max_meta {
            self.warner.warn(
                "oversized meta entry ignored",
                &format!("{} ({} bytes)", hdr.path, hdr.size),
            )?;
            self.skip_remain = round_up_block(hdr.size);
            if self.skip_remain > 0 {
                self.state = State::Ignore;
            }
            return Ok(());
        }

        let attrs = attrs_from_header(hdr);
        let entry = ReadEntry::new(attrs, self.next_index, true, false);
        self.next_index += 1;

        if entry.block_remain() == 0 {
            entry.end();
            self.finish_meta(&entry)?;
        } else {
            self.consuming = Some(entry);
            self.state = State::Meta;
        }
        Ok(())
    }

    /// Apply a completed meta entry to the pending overrides
    fn finish_meta(&mut self, entry: &ReadEntry) -> TarResult<()> {
        let mut body = Vec::new();
        entry.drain_to(&mut body);

        match entry.kind() {
            EntryKind::ExtendedHeader => {
                self.ex = Some(PaxExtended::parse(&body, self.ex.take(), false)?);
            }
            EntryKind::GlobalExtendedHeader => {
                self.gex = Some(PaxExtended::parse(&body, self.gex.take(), true)?);
            }
            EntryKind::NextFileHasLongPath | EntryKind::OldGnuLongPath => {
                self.ex
                    .get_or_insert_with(|| PaxExtended::new(false))
                    .path = Some(body_string(body));
            }
            EntryKind::NextFileHasLongLinkpath => {
                self.ex
                    .get_or_insert_with(|| PaxExtended::new(false))
                    .linkpath = Some(body_string(body));
            }
            _ => unreachable!("non-meta entry in meta state"),
        }
        Ok(())
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

fn attrs_from_header(hdr: &Header) -> EntryAttrs {
    EntryAttrs {
        path: hdr.path.clone(),
        mode: hdr.mode,
        uid: hdr.uid,
        gid: hdr.gid,
        size: hdr.size,
        mtime: hdr.mtime,
        atime: hdr.atime,
        ctime: hdr.ctime,
        kind: hdr.kind,
        linkpath: hdr.linkpath.clone(),
        uname: if hdr.uname.is_empty() {
            None
        } else {
            Some(hdr.uname.clone())
        },
        gname: if hdr.gname.is_empty() {
            None
        } else {
            Some(hdr.gname.clone())
        },
        devmaj: hdr.devmaj,
        devmin: hdr.devmin,
        ..Default::default()
    }
}

/// GNU long-path bodies are NUL-terminated strings
fn body_string(body: Vec<u8>) -> String {
    let end = body.iter().position(|&b| b == 0).unwrap_or(body.len());
    String::from_utf8_lossy(&body[..end]).to_string()
}
