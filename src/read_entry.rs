//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the tarstream-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//

//! One logical archive entry as a lazy sequence of body bytes
//!
//! The parser owns one handle and pushes bytes in; the consumer owns
//! another and drains them. `remain` counts unread body bytes and
//! `block_remain` the same rounded up to the block grid; the gap
//! between them is padding and is swallowed on write.

use crate::entry::{EntryAttrs, EntryKind};
use crate::error::{TarError, TarResult};
use crate::formats::round_up_block;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

struct EntryState {
    attrs: EntryAttrs,
    index: u64,
    remain: u64,
    block_remain: u64,
    meta: bool,
    ignored: bool,
    data: VecDeque<u8>,
    ended: bool,
}

/// Handle to one parsed entry. Clones share state; the parser keeps one
/// clone to feed bytes while the consumer drains another.
#[derive(Clone)]
pub struct ReadEntry {
    inner: Rc<RefCell<EntryState>>,
}

impl ReadEntry {
    pub(crate) fn new(attrs: EntryAttrs, index: u64, meta: bool, ignored: bool) -> Self {
        let size = attrs.size;
        ReadEntry {
            inner: Rc::new(RefCell::new(EntryState {
                attrs,
                index,
                remain: size,
                block_remain: round_up_block(size),
                meta,
                ignored,
                data: VecDeque::new(),
                ended: false,
            })),
        }
    }

    /// Push body bytes into the entry.
    ///
    /// Accepts at most `block_remain` bytes; the first `remain` of them
    /// are body data, the rest is block padding and is dropped. Returns
    /// the number of body bytes accepted. The entry ends itself when
    /// `remain` reaches zero.
    pub fn write(&self, data: &[u8]) -> TarResult<usize> {
        let mut st = self.inner.borrow_mut();
        if data.len() as u64 > st.block_remain {
            return Err(TarError::WriteAfterEnd(format!(
                "{} bytes offered with {} remaining in entry {}",
                data.len(),
                st.block_remain,
                st.attrs.path
            )));
        }

        let take = std::cmp::min(data.len() as u64, st.remain) as usize;
        if take > 0 && !st.ignored {
            st.data.extend(&data[..take]);
        }
        st.remain -= take as u64;
        st.block_remain -= data.len() as u64;
        if st.remain == 0 {
            st.ended = true;
        }
        Ok(take)
    }

    /// Mark the entry complete. Idempotent; the parser calls this for
    /// bodyless entries and at stream end.
    pub fn end(&self) {
        self.inner.borrow_mut().ended = true;
    }

    /// Drain buffered body bytes into `buf`, returning the count moved
    pub fn read_data(&self, buf: &mut [u8]) -> usize {
        let mut st = self.inner.borrow_mut();
        let n = std::cmp::min(buf.len(), st.data.len());
        for b in buf[..n].iter_mut() {
            *b = st.data.pop_front().unwrap();
        }
        n
    }

    /// Drain all currently buffered body bytes
    pub fn drain_to(&self, out: &mut Vec<u8>) {
        let mut st = self.inner.borrow_mut();
        out.extend(st.data.drain(..));
    }

    /// Bytes currently buffered and not yet drained
    pub fn available(&self) -> usize {
        self.inner.borrow().data.len()
    }

    /// Body bytes not yet pushed by the parser
    pub fn remain(&self) -> u64 {
        self.inner.borrow().remain
    }

    /// Body plus padding bytes not yet pushed
    pub fn block_remain(&self) -> u64 {
        self.inner.borrow().block_remain
    }

    /// True once all body bytes have been pushed
    pub fn ended(&self) -> bool {
        self.inner.borrow().ended
    }

    /// True once the entry has ended and every buffered byte was drained
    pub fn emitted_end(&self) -> bool {
        let st = self.inner.borrow();
        st.ended && st.data.is_empty()
    }

    /// True when the caller filtered this entry out or its type is not
    /// understood; body bytes are swallowed
    pub fn ignored(&self) -> bool {
        self.inner.borrow().ignored
    }

    pub(crate) fn set_ignored(&self) {
        self.inner.borrow_mut().ignored = true;
    }

    /// True for pax/GNU meta entries whose body describes the next entry
    pub fn is_meta(&self) -> bool {
        self.inner.borrow().meta
    }

    /// Parser-assigned position in the archive, starting at zero
    pub fn index(&self) -> u64 {
        self.inner.borrow().index
    }

    /// Snapshot of the merged attributes
    pub fn attrs(&self) -> EntryAttrs {
        self.inner.borrow().attrs.clone()
    }

    /// Member path shortcut
    pub fn path(&self) -> String {
        self.inner.borrow().attrs.path.clone()
    }

    /// Entry kind shortcut
    pub fn kind(&self) -> EntryKind {
        self.inner.borrow().attrs.kind
    }
}

impl std::fmt::Debug for ReadEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.inner.borrow();
        f.debug_struct("ReadEntry")
            .field("path", &st.attrs.path)
            .field("kind", &st.attrs.kind)
            .field("index", &st.index)
            .field("remain", &st.remain)
            .field("block_remain", &st.block_remain)
            .field("ended", &st.ended)
            .field("ignored", &st.ignored)
            .finish()
    }
}
