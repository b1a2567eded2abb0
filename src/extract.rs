//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the tarstream-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//

//! Extraction: materialize parsed entries on the filesystem
//!
//! Entry paths are normalized, stripped, and rooted under `cwd`; with
//! `preserve_paths` off (the default) a path containing `..` or shadowed
//! by a symlink in its directory prefix is skipped with a warning, so no
//! entry can escape the extraction root.
//!
//! The extractor consumes one entry at a time, incrementally: `consume`
//! may be called repeatedly while the parser is still feeding the
//! entry's body. Filesystem failures surface as errors on the affected
//! entry; the extractor stays usable for the entries that follow.

use crate::entry::{EntryAttrs, EntryKind};
use crate::error::{TarResult, WarnHandler, Warner};
use crate::read_entry::ReadEntry;
use std::cell::RefCell;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Directories already created, shared to skip redundant mkdir calls
pub type DirCache = Rc<RefCell<HashSet<PathBuf>>>;

/// Options for extraction
pub struct ExtractOptions {
    /// Extraction root
    pub cwd: PathBuf,
    /// Leading path components dropped from every member path
    pub strip: usize,
    /// Allow `..` components and absolute paths (dangerous)
    pub preserve_paths: bool,
    /// Unlink the target before creating it
    pub unlink: bool,
    /// Skip members older than the file already on disk
    pub newer: bool,
    /// Bits cleared from every applied mode
    pub umask: u32,
    /// Mode override for directories
    pub dmode: Option<u32>,
    /// Mode override for files
    pub fmode: Option<u32>,
    /// Restore uid/gid (requires privileges; EPERM downgrades to a warning)
    pub preserve_owner: bool,
    /// Restore mtime/atime, best-effort
    pub preserve_mtime: bool,
    /// Promote warnings to errors
    pub strict: bool,
    /// Warning callback
    pub on_warn: Option<WarnHandler>,
    /// Share the made-directories set across extractors
    pub dir_cache: Option<DirCache>,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        ExtractOptions {
            cwd: PathBuf::from("."),
            strip: 0,
            preserve_paths: false,
            unlink: false,
            newer: false,
            umask: 0,
            dmode: None,
            fmode: None,
            preserve_owner: false,
            preserve_mtime: true,
            strict: false,
            on_warn: None,
            dir_cache: None,
        }
    }
}

/// One entry being materialized
struct InProgress {
    index: u64,
    attrs: EntryAttrs,
    /// Resolved target; `None` when the entry was skipped and its body
    /// is being drained
    target: Option<PathBuf>,
    file: Option<File>,
}

/// Streaming extractor
pub struct Extractor {
    opts: ExtractOptions,
    warner: Warner,
    dir_cache: DirCache,
    current: Option<InProgress>,
}

impl Extractor {
    pub fn new(cwd: PathBuf) -> Self {
        Self::with_options(ExtractOptions {
            cwd,
            ..Default::default()
        })
    }

    pub fn with_options(mut opts: ExtractOptions) -> Self {
        let warner = Warner {
            strict: opts.strict,
            on_warn: opts.on_warn.take(),
        };
        let dir_cache = opts.dir_cache.take().unwrap_or_default();
        Extractor {
            opts,
            warner,
            dir_cache,
            current: None,
        }
    }

    /// Feed one entry, as many times as needed until it has ended.
    ///
    /// Entries must arrive in archive order, one at a time, the way the
    /// parser hands them out.
    pub fn consume(&mut self, entry: &ReadEntry) -> TarResult<()> {
        if entry.is_meta() || entry.ignored() {
            drain_and_drop(entry);
            return Ok(());
        }

        if self.current.as_ref().map(|c| c.index) != Some(entry.index()) {
            self.begin(entry)?;
        }

        // move any buffered body bytes to their destination
        let mut buf = [0u8; 8192];
        loop {
            let n = entry.read_data(&mut buf);
            if n == 0 {
                break;
            }
            if let Some(cur) = &mut self.current {
                if let Some(file) = &mut cur.file {
                    file.write_all(&buf[..n])?;
                }
            }
        }

        if entry.ended() {
            self.finalize()?;
        }
        Ok(())
    }

    /// Dispatch a new entry by type and open whatever it needs
    fn begin(&mut self, entry: &ReadEntry) -> TarResult<()> {
        // an abandoned predecessor still holding a file gets closed
        if self.current.is_some() {
            self.finalize()?;
        }

        let attrs = entry.attrs();
        let skip = InProgress {
            index: entry.index(),
            attrs: attrs.clone(),
            target: None,
            file: None,
        };

        let target = match self.resolve(&attrs.path)? {
            Some(t) => t,
            None => {
                self.current = Some(skip);
                return Ok(());
            }
        };

        if !self.opts.preserve_paths && !self.prefix_is_clean(&target)? {
            self.current = Some(skip);
            return Ok(());
        }

        if self.opts.newer && disk_is_newer(&target, attrs.mtime) {
            self.warner
                .warn("keeping newer existing file", &attrs.path)?;
            self.current = Some(skip);
            return Ok(());
        }

        self.current = Some(skip);

        match attrs.kind {
            EntryKind::File | EntryKind::OldFile | EntryKind::ContiguousFile => {
                self.mkdir_parent(&target)?;
                if self.opts.unlink {
                    remove_if_present(&target)?;
                }
                let file = File::create(&target)?;
                if let Some(cur) = &mut self.current {
                    cur.target = Some(target);
                    cur.file = Some(file);
                }
            }
            EntryKind::Directory | EntryKind::GnuDumpDir => {
                self.mkdir_with_mode(&target, self.dir_mode(&attrs))?;
                if let Some(cur) = &mut self.current {
                    cur.target = Some(target);
                }
            }
            EntryKind::Link => {
                let link_target = match self.resolve(&attrs.linkpath)? {
                    Some(t) => t,
                    None => return Ok(()),
                };
                // the link source gets the same prefix scrutiny as the
                // target; path resolution follows symlinks in its prefix
                if !self.opts.preserve_paths && !self.prefix_is_clean(&link_target)? {
                    return Ok(());
                }
                self.mkdir_parent(&target)?;
                if self.opts.unlink {
                    remove_if_present(&target)?;
                }
                replay_link(&target, |t| fs::hard_link(&link_target, t))?;
            }
            EntryKind::SymbolicLink => {
                self.mkdir_parent(&target)?;
                if self.opts.unlink {
                    remove_if_present(&target)?;
                }
                // the raw linkpath: relative targets are the archive's
                // business, not ours
                let raw = PathBuf::from(&attrs.linkpath);
                replay_link(&target, |t| symlink(&raw, t))?;
            }
            EntryKind::CharacterDevice | EntryKind::BlockDevice | EntryKind::Fifo => {
                self.warner
                    .warn("unsupported entry type", &format!("{} ({})", attrs.path, attrs.kind.name()))?;
            }
            EntryKind::Unknown(code) => {
                self.warner.warn(
                    "unknown entry type",
                    &format!("'{}' in {}", code as char, attrs.path),
                )?;
            }
            _ => {}
        }

        Ok(())
    }

    /// Close the entry's file and apply modes, ownership and times
    fn finalize(&mut self) -> TarResult<()> {
        let cur = match self.current.take() {
            Some(cur) => cur,
            None => return Ok(()),
        };
        // close before touching metadata
        drop(cur.file);

        let target = match cur.target {
            Some(t) => t,
            None => return Ok(()),
        };

        match cur.attrs.kind {
            EntryKind::File | EntryKind::OldFile | EntryKind::ContiguousFile => {
                self.apply_metadata(&target, &cur.attrs, self.file_mode(&cur.attrs))?;
            }
            EntryKind::Directory | EntryKind::GnuDumpDir => {
                self.apply_metadata(&target, &cur.attrs, self.dir_mode(&cur.attrs))?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Normalize an archive path to a target under `cwd`.
    ///
    /// Splits on `/`, drops empty and `.` components, strips the
    /// configured component count, and rejoins under the extraction
    /// root. The join defeats absolute-path escapes; `..` rejection
    /// defeats relative ones.
    fn resolve(&mut self, raw: &str) -> TarResult<Option<PathBuf>> {
        let parts: Vec<&str> = raw
            .split('/')
            .filter(|c| !c.is_empty() && *c != ".")
            .collect();

        if parts.len() <= self.opts.strip {
            self.warner.warn("path stripped to nothing", raw)?;
            return Ok(None);
        }
        let parts = &parts[self.opts.strip..];

        if !self.opts.preserve_paths {
            if parts.iter().any(|c| *c == "..") {
                self.warner.warn("path contains '..'", raw)?;
                return Ok(None);
            }
            return Ok(Some(self.opts.cwd.join(parts.join("/"))));
        }

        // preserve_paths keeps absolute locations as they are
        if raw.starts_with('/') {
            Ok(Some(PathBuf::from(format!("/{}", parts.join("/")))))
        } else {
            Ok(Some(self.opts.cwd.join(parts.join("/"))))
        }
    }

    /// Reject targets whose directory prefix crosses an existing symlink
    fn prefix_is_clean(&mut self, target: &Path) -> TarResult<bool> {
        let parent = match target.parent() {
            Some(p) => p,
            None => return Ok(true),
        };
        let mut probe = self.opts.cwd.clone();
        let rel = match parent.strip_prefix(&self.opts.cwd) {
            Ok(rel) => rel,
            Err(_) => return Ok(true),
        };
        for comp in rel.components() {
            probe.push(comp);
            if self.dir_cache.borrow().contains(&probe) {
                continue;
            }
            if let Ok(meta) = fs::symlink_metadata(&probe) {
                if meta.file_type().is_symlink() {
                    self.warner.warn(
                        "extraction path crosses a symlink",
                        &probe.display().to_string(),
                    )?;
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// Create the target's parent chain, memoized
    fn mkdir_parent(&mut self, target: &Path) -> TarResult<()> {
        if let Some(parent) = target.parent() {
            if parent.as_os_str().is_empty() {
                return Ok(());
            }
            let parent = parent.to_path_buf();
            let mode = self.opts.dmode.unwrap_or(0o777) & !self.opts.umask;
            self.mkdir_with_mode(&parent, mode)?;
        }
        Ok(())
    }

    fn mkdir_with_mode(&mut self, dir: &Path, mode: u32) -> TarResult<()> {
        if self.dir_cache.borrow().contains(dir) {
            return Ok(());
        }
        if !dir.is_dir() {
            let mut builder = fs::DirBuilder::new();
            builder.recursive(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::DirBuilderExt;
                builder.mode(mode);
            }
            #[cfg(not(unix))]
            let _ = mode;
            builder.create(dir)?;
        }
        self.dir_cache.borrow_mut().insert(dir.to_path_buf());
        Ok(())
    }

    fn file_mode(&self, attrs: &EntryAttrs) -> u32 {
        self.opts.fmode.unwrap_or(attrs.mode) & !self.opts.umask
    }

    fn dir_mode(&self, attrs: &EntryAttrs) -> u32 {
        self.opts.dmode.unwrap_or(attrs.mode) & !self.opts.umask
    }

    /// Permissions, ownership and timestamps after the content is in place
    fn apply_metadata(&mut self, path: &Path, attrs: &EntryAttrs, mode: u32) -> TarResult<()> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(mode))?;

            if self.opts.preserve_owner {
                self.chown(path, attrs)?;
            }
            if self.opts.preserve_mtime {
                set_times(path, attrs);
            }
        }
        #[cfg(not(unix))]
        {
            let _ = (path, attrs, mode);
        }
        Ok(())
    }

    #[cfg(unix)]
    fn chown(&mut self, path: &Path, attrs: &EntryAttrs) -> TarResult<()> {
        use std::os::unix::ffi::OsStrExt;

        let path_cstr = match std::ffi::CString::new(path.as_os_str().as_bytes()) {
            Ok(s) => s,
            Err(_) => return Ok(()),
        };
        let result =
            unsafe { libc::chown(path_cstr.as_ptr(), attrs.uid as libc::uid_t, attrs.gid as libc::gid_t) };
        if result != 0 {
            let err = std::io::Error::last_os_error();
            // EPERM just means we are not root
            if err.raw_os_error() == Some(libc::EPERM) {
                return self
                    .warner
                    .warn("cannot restore ownership", &path.display().to_string());
            }
            return Err(err.into());
        }
        Ok(())
    }
}

/// Pull and discard whatever the entry has buffered
fn drain_and_drop(entry: &ReadEntry) {
    let mut sink = Vec::new();
    entry.drain_to(&mut sink);
}

fn disk_is_newer(path: &Path, mtime: i64) -> bool {
    let meta = match fs::metadata(path) {
        Ok(meta) => meta,
        Err(_) => return false,
    };
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        meta.mtime() > mtime
    }
    #[cfg(not(unix))]
    {
        meta.modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64 > mtime)
            .unwrap_or(false)
    }
}

fn remove_if_present(path: &Path) -> TarResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Create a link, unlinking a collision and retrying once
fn replay_link<F>(target: &Path, create: F) -> TarResult<()>
where
    F: Fn(&Path) -> std::io::Result<()>,
{
    match create(target) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            fs::remove_file(target)?;
            create(target).map_err(Into::into)
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(unix)]
fn symlink(target: &Path, at: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, at)
}

#[cfg(windows)]
fn symlink(target: &Path, at: &Path) -> std::io::Result<()> {
    std::os::windows::fs::symlink_file(target, at)
        .or_else(|_| std::os::windows::fs::symlink_dir(target, at))
}

/// Restore mtime and atime, ignoring failures
#[cfg(unix)]
fn set_times(path: &Path, attrs: &EntryAttrs) {
    use std::os::unix::ffi::OsStrExt;

    let path_cstr = match std::ffi::CString::new(path.as_os_str().as_bytes()) {
        Ok(s) => s,
        Err(_) => return,
    };

    let times = [
        libc::timeval {
            tv_sec: attrs.atime.unwrap_or(attrs.mtime) as libc::time_t,
            tv_usec: 0,
        },
        libc::timeval {
            tv_sec: attrs.mtime as libc::time_t,
            tv_usec: 0,
        },
    ];

    unsafe {
        libc::utimes(path_cstr.as_ptr(), times.as_ptr());
    }
}
