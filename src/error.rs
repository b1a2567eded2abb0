//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the tarstream-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//

use std::fmt;
use std::io;

/// Error type for tarstream operations
#[derive(Debug)]
pub enum TarError {
    /// I/O error
    Io(io::Error),
    /// Header block failed structural validation
    InvalidHeader(String),
    /// Extended header body failed to parse
    InvalidPax(String),
    /// Body bytes missing or inconsistent with the header
    Corrupt(String),
    /// Data pushed past an entry's block boundary
    WriteAfterEnd(String),
    /// Archive byte stream ended mid-block with data pending
    TruncatedArchive(String),
    /// A warning promoted to an error by strict mode
    Strict(String),
}

impl fmt::Display for TarError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TarError::Io(e) => write!(f, "I/O error: {}", e),
            TarError::InvalidHeader(msg) => write!(f, "Invalid header: {}", msg),
            TarError::InvalidPax(msg) => write!(f, "Invalid pax extended header: {}", msg),
            TarError::Corrupt(msg) => write!(f, "Corrupt archive: {}", msg),
            TarError::WriteAfterEnd(msg) => write!(f, "Write past end of entry: {}", msg),
            TarError::TruncatedArchive(msg) => write!(f, "Truncated archive: {}", msg),
            TarError::Strict(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for TarError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TarError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for TarError {
    fn from(err: io::Error) -> Self {
        TarError::Io(err)
    }
}

/// Result type for tarstream operations
pub type TarResult<T> = Result<T, TarError>;

/// Callback invoked for recoverable conditions: `(message, detail)`
pub type WarnHandler = Box<dyn FnMut(&str, &str)>;

/// Warning dispatch shared by parser, writer and extractor.
///
/// Warnings go to the `on_warn` callback when one is set and are dropped
/// otherwise. With `strict` set, every warning becomes a
/// `TarError::Strict` and stops the operation that raised it.
#[derive(Default)]
pub struct Warner {
    pub strict: bool,
    pub on_warn: Option<WarnHandler>,
}

impl Warner {
    pub fn warn(&mut self, message: &str, detail: &str) -> TarResult<()> {
        if self.strict {
            return Err(TarError::Strict(format!("{}: {}", message, detail)));
        }
        if let Some(ref mut handler) = self.on_warn {
            handler(message, detail);
        }
        Ok(())
    }
}

impl fmt::Debug for Warner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Warner")
            .field("strict", &self.strict)
            .field("on_warn", &self.on_warn.is_some())
            .finish()
    }
}
