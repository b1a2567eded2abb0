//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the tarstream-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//

//! Gzip support
//!
//! Blocking `GzipReader`/`GzipWriter` wrap Read/Write streams for the
//! archive creation path. The parser cannot block, so its transparent
//! decompression uses `GunzipStream`: a non-blocking inflater fed one
//! chunk at a time through an internal buffer.

use libflate::gzip;
use libflate::non_blocking::gzip as nb_gzip;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::rc::Rc;

/// Gzip magic bytes (first two bytes of a gzip file)
pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Check if data starts with gzip magic bytes
pub fn is_gzip(data: &[u8]) -> bool {
    data.len() >= 2 && data[0] == GZIP_MAGIC[0] && data[1] == GZIP_MAGIC[1]
}

/// Gzip decompression wrapper for Read streams
pub struct GzipReader<R: Read> {
    decoder: gzip::Decoder<R>,
}

impl<R: Read> GzipReader<R> {
    /// Create a new gzip decompressor wrapping the given reader
    pub fn new(reader: R) -> io::Result<Self> {
        let decoder = gzip::Decoder::new(reader)?;
        Ok(GzipReader { decoder })
    }
}

impl<R: Read> Read for GzipReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.decoder.read(buf)
    }
}

/// Gzip compression wrapper for Write streams
pub struct GzipWriter<W: Write> {
    encoder: Option<gzip::Encoder<W>>,
}

impl<W: Write> GzipWriter<W> {
    /// Create a new gzip compressor wrapping the given writer
    pub fn new(writer: W) -> io::Result<Self> {
        let encoder = gzip::Encoder::new(writer)?;
        Ok(GzipWriter {
            encoder: Some(encoder),
        })
    }
}

impl<W: Write> Write for GzipWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(ref mut encoder) = self.encoder {
            encoder.write(buf)
        } else {
            Err(io::Error::other("GzipWriter already finished"))
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(ref mut encoder) = self.encoder {
            encoder.flush()
        } else {
            Ok(())
        }
    }
}

impl<W: Write> Drop for GzipWriter<W> {
    fn drop(&mut self) {
        // If encoder hasn't been finished yet, finish it now
        if let Some(encoder) = self.encoder.take() {
            // Ignore errors during drop - nothing we can do about them
            let _ = encoder.finish();
        }
    }
}

/// Shared feed buffer behind the non-blocking decoder.
///
/// An empty buffer reads as WouldBlock until `close` marks end of
/// input, after which it reads as EOF.
#[derive(Clone, Default)]
struct FeedBuf {
    inner: Rc<RefCell<FeedState>>,
}

#[derive(Default)]
struct FeedState {
    data: VecDeque<u8>,
    closed: bool,
}

impl FeedBuf {
    fn push(&self, data: &[u8]) {
        self.inner.borrow_mut().data.extend(data);
    }

    fn close(&self) {
        self.inner.borrow_mut().closed = true;
    }
}

impl Read for FeedBuf {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.inner.borrow_mut();
        if state.data.is_empty() {
            return if state.closed {
                Ok(0)
            } else {
                Err(io::Error::from(io::ErrorKind::WouldBlock))
            };
        }
        let n = std::cmp::min(buf.len(), state.data.len());
        for b in buf[..n].iter_mut() {
            *b = state.data.pop_front().unwrap();
        }
        Ok(n)
    }
}

/// Chunk-fed gzip inflater for push-mode consumers
pub struct GunzipStream {
    feed: FeedBuf,
    decoder: nb_gzip::Decoder<FeedBuf>,
    done: bool,
}

impl GunzipStream {
    pub fn new() -> Self {
        let feed = FeedBuf::default();
        let decoder = nb_gzip::Decoder::new(feed.clone());
        GunzipStream {
            feed,
            decoder,
            done: false,
        }
    }

    /// Feed compressed bytes; decompressed output is appended to `out`
    pub fn push(&mut self, data: &[u8], out: &mut Vec<u8>) -> io::Result<()> {
        self.feed.push(data);
        self.pump(out)
    }

    /// Signal end of compressed input and drain the remainder.
    ///
    /// Errors if the gzip stream is cut short.
    pub fn finish(&mut self, out: &mut Vec<u8>) -> io::Result<()> {
        self.feed.close();
        self.pump(out)?;
        if !self.done {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "gzip stream ended prematurely",
            ));
        }
        Ok(())
    }

    fn pump(&mut self, out: &mut Vec<u8>) -> io::Result<()> {
        if self.done {
            return Ok(());
        }
        let mut scratch = [0u8; 8192];
        loop {
            match self.decoder.read(&mut scratch) {
                Ok(0) => {
                    self.done = true;
                    return Ok(());
                }
                Ok(n) => out.extend_from_slice(&scratch[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for GunzipStream {
    fn default() -> Self {
        Self::new()
    }
}
