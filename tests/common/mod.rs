//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the tarstream-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//

//! Common helpers for tarstream integration tests

use tarstream::entry::{EntryAttrs, EntryKind};
use tarstream::formats::padding_needed;
use tarstream::{Extractor, Header, Parser, ReadEntry, BLOCK_SIZE};

/// Build one archive member: header block, body, block padding
pub fn member(path: &str, body: &[u8]) -> Vec<u8> {
    let mut hdr = Header::new(path.to_string(), EntryKind::File);
    hdr.size = body.len() as u64;
    hdr.mtime = 1_459_548_000;
    member_from(hdr, body)
}

/// Build one member from a prepared header
pub fn member_from(mut hdr: Header, body: &[u8]) -> Vec<u8> {
    let mut out = hdr.encode().to_vec();
    out.extend_from_slice(body);
    out.resize(out.len() + padding_needed(body.len() as u64), 0);
    out
}

/// Append the end-of-archive trailer
pub fn with_trailer(mut stream: Vec<u8>) -> Vec<u8> {
    stream.extend_from_slice(&[0u8; 2 * BLOCK_SIZE]);
    stream
}

/// Run a byte stream through a parser in fixed-size chunks, collecting
/// every emitted entry with its body
pub fn parse_archive(stream: &[u8], chunk_size: usize) -> Vec<(EntryAttrs, Vec<u8>)> {
    let mut parser = Parser::new();
    let mut got: Vec<(EntryAttrs, Vec<u8>)> = Vec::new();
    let mut pending: Option<ReadEntry> = None;

    for chunk in stream.chunks(chunk_size.max(1)) {
        parser.write(chunk).unwrap();
        drain(&mut parser, &mut pending, &mut got);
    }
    parser.end().unwrap();
    drain(&mut parser, &mut pending, &mut got);
    assert!(pending.is_none(), "entry left unfinished by the stream");
    got
}

fn drain(
    parser: &mut Parser,
    pending: &mut Option<ReadEntry>,
    got: &mut Vec<(EntryAttrs, Vec<u8>)>,
) {
    loop {
        if let Some(entry) = pending {
            entry.drain_to(&mut got.last_mut().unwrap().1);
            if entry.emitted_end() {
                *pending = None;
            } else {
                return;
            }
        }
        match parser.next_entry() {
            Some(entry) => {
                got.push((entry.attrs(), Vec::new()));
                *pending = Some(entry);
            }
            None => return,
        }
    }
}

/// Feed a byte stream through parser and extractor cooperatively
pub fn extract_archive(stream: &[u8], extractor: &mut Extractor, chunk_size: usize) {
    let mut parser = Parser::new();
    let mut pending: Option<ReadEntry> = None;

    for chunk in stream.chunks(chunk_size.max(1)) {
        parser.write(chunk).unwrap();
        pump(&mut parser, extractor, &mut pending);
    }
    parser.end().unwrap();
    pump(&mut parser, extractor, &mut pending);
}

fn pump(parser: &mut Parser, extractor: &mut Extractor, pending: &mut Option<ReadEntry>) {
    loop {
        if let Some(entry) = pending {
            extractor.consume(entry).unwrap();
            if entry.emitted_end() {
                *pending = None;
            } else {
                return;
            }
        }
        match parser.next_entry() {
            Some(entry) => *pending = Some(entry),
            None => return,
        }
    }
}
