//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the tarstream-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//

//! Streaming tar codec
//!
//! Implements the ustar, xstar (Sun) and pax extended variants of the
//! tape archive format as three cooperating pieces:
//!
//! - [`Parser`]: a push-mode state machine turning arbitrary byte
//!   chunks (gzipped or plain, detected automatically) into an ordered
//!   stream of [`ReadEntry`] values
//! - [`TarWriter`]: filesystem objects to archive bytes, with pax
//!   overrides for values the fixed-width header cannot hold and
//!   hard-link deduplication
//! - [`Extractor`]: parsed entries back onto a filesystem, with path
//!   sanitation, link replay and collision policies
//!
//! The 512-byte header codec lives in [`formats`] and can be used on
//! its own.
//!
//! ```no_run
//! use std::io::Read;
//! use tarstream::{Extractor, Parser};
//!
//! fn unpack(mut input: impl Read, dest: std::path::PathBuf) -> tarstream::TarResult<()> {
//!     let mut parser = Parser::new();
//!     let mut extractor = Extractor::new(dest);
//!     let mut pending = None;
//!     let mut buf = [0u8; 65536];
//!     loop {
//!         let n = input.read(&mut buf)?;
//!         if n == 0 {
//!             break;
//!         }
//!         parser.write(&buf[..n])?;
//!         loop {
//!             if let Some(entry) = &pending {
//!                 extractor.consume(entry)?;
//!                 if entry.emitted_end() {
//!                     pending = None;
//!                 } else {
//!                     break;
//!                 }
//!             }
//!             match parser.next_entry() {
//!                 Some(entry) => pending = Some(entry),
//!                 None => break,
//!             }
//!         }
//!     }
//!     parser.end()?;
//!     while let Some(entry) = pending.take().or_else(|| parser.next_entry()) {
//!         extractor.consume(&entry)?;
//!     }
//!     Ok(())
//! }
//! ```

pub mod compression;
pub mod entry;
pub mod error;
pub mod extract;
pub mod formats;
pub mod parser;
pub mod read_entry;
pub mod writer;

pub use compression::{is_gzip, GzipReader, GzipWriter};
pub use entry::{EntryAttrs, EntryKind};
pub use error::{TarError, TarResult, WarnHandler};
pub use extract::{DirCache, ExtractOptions, Extractor};
pub use formats::{Fieldset, Header, PaxExtended, BLOCK_SIZE};
pub use parser::{EntryFilter, ParseOptions, Parser};
pub use read_entry::ReadEntry;
pub use writer::{LinkCache, StatCache, TarWriter, WriteOptions};
