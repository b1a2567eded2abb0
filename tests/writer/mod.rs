//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the tarstream-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//

//! Writer tests - filesystem to archive byte stream

use crate::common::*;
use std::fs::{self, File};
use std::io::Write;
use tarstream::entry::EntryKind;
use tarstream::{Extractor, GzipWriter, TarWriter, WriteOptions};
use tempfile::TempDir;

fn write_file(dir: &TempDir, name: &str, contents: &[u8]) -> std::path::PathBuf {
    let path = dir.path().join(name);
    let mut f = File::create(&path).unwrap();
    f.write_all(contents).unwrap();
    path
}

#[test]
fn test_writer_parser_roundtrip() {
    let temp = TempDir::new().unwrap();
    let f1 = write_file(&temp, "one.txt", b"first body");
    let big: Vec<u8> = (0..2000).map(|i| (i % 251) as u8).collect();
    let f2 = write_file(&temp, "two.bin", &big);

    let mut writer = TarWriter::new(Vec::new());
    writer.append_path_as(&f1, "one.txt").unwrap();
    writer.append_path_as(&f2, "two.bin").unwrap();
    let stream = writer.into_inner().unwrap();
    assert_eq!(stream.len() % 512, 0);

    let entries = parse_archive(&stream, 999);
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].0.path, "one.txt");
    assert_eq!(entries[0].1, b"first body");
    assert_eq!(entries[1].0.path, "two.bin");
    assert_eq!(entries[1].1, big);
}

#[test]
fn test_directory_gets_trailing_slash() {
    let temp = TempDir::new().unwrap();
    fs::create_dir(temp.path().join("sub")).unwrap();

    let mut writer = TarWriter::new(Vec::new());
    writer
        .append_path_as(&temp.path().join("sub"), "sub")
        .unwrap();
    let stream = writer.into_inner().unwrap();

    let entries = parse_archive(&stream, 512);
    assert_eq!(entries[0].0.path, "sub/");
    assert_eq!(entries[0].0.kind, EntryKind::Directory);
    assert_eq!(entries[0].0.size, 0);
}

#[cfg(unix)]
#[test]
fn test_hardlinks_are_deduplicated() {
    let temp = TempDir::new().unwrap();
    let a = write_file(&temp, "a", b"shared bytes");
    let b = temp.path().join("b");
    fs::hard_link(&a, &b).unwrap();

    let mut writer = TarWriter::new(Vec::new());
    writer.append_path_as(&a, "a").unwrap();
    writer.append_path_as(&b, "b").unwrap();
    let stream = writer.into_inner().unwrap();

    let entries = parse_archive(&stream, 512);
    assert_eq!(entries.len(), 2);

    // exactly one body, the second entry refers back to the first
    assert_eq!(entries[0].0.kind, EntryKind::File);
    assert_eq!(entries[0].1, b"shared bytes");
    assert_eq!(entries[1].0.kind, EntryKind::Link);
    assert_eq!(entries[1].0.linkpath, "a");
    assert_eq!(entries[1].0.size, 0);
    assert_eq!(entries[1].1, b"");
}

#[cfg(unix)]
#[test]
fn test_symlink_is_archived_as_link_target() {
    let temp = TempDir::new().unwrap();
    write_file(&temp, "real.txt", b"pointed at");
    let ln = temp.path().join("ln");
    std::os::unix::fs::symlink("real.txt", &ln).unwrap();

    let mut writer = TarWriter::new(Vec::new());
    writer.append_path_as(&ln, "ln").unwrap();
    let stream = writer.into_inner().unwrap();

    let entries = parse_archive(&stream, 512);
    assert_eq!(entries[0].0.kind, EntryKind::SymbolicLink);
    assert_eq!(entries[0].0.linkpath, "real.txt");
    assert_eq!(entries[0].1, b"");
}

#[test]
fn test_long_single_component_path_uses_pax() {
    let temp = TempDir::new().unwrap();
    let long_name = "n".repeat(180); // unsplittable, needs a pax override
    let path = write_file(&temp, &long_name, b"deep");

    let mut writer = TarWriter::new(Vec::new());
    writer.append_path_as(&path, &long_name).unwrap();
    let stream = writer.into_inner().unwrap();

    let entries = parse_archive(&stream, 512);
    assert_eq!(entries.len(), 1, "pax meta entry must not surface");
    assert_eq!(entries[0].0.path, long_name);
    assert_eq!(entries[0].1, b"deep");
}

#[cfg(unix)]
#[test]
fn test_portable_mode_drops_identity() {
    let temp = TempDir::new().unwrap();
    let path = write_file(&temp, "p.txt", b"payload");

    let mut writer = TarWriter::with_options(
        Vec::new(),
        WriteOptions {
            portable: true,
            ..Default::default()
        },
    );
    writer.append_path_as(&path, "p.txt").unwrap();
    let stream = writer.into_inner().unwrap();

    let entries = parse_archive(&stream, 512);
    let attrs = &entries[0].0;
    assert_eq!(attrs.uid, 0);
    assert_eq!(attrs.gid, 0);
    assert_eq!(attrs.uname, None);
    assert_eq!(attrs.gname, None);
    assert_eq!(attrs.atime, None);
    assert_eq!(attrs.ctime, None);
    assert_eq!(entries[0].1, b"payload");
}

#[cfg(unix)]
#[test]
fn test_nonportable_carries_times() {
    let temp = TempDir::new().unwrap();
    let path = write_file(&temp, "t.txt", b"x");

    let mut writer = TarWriter::new(Vec::new());
    writer.append_path_as(&path, "t.txt").unwrap();
    let stream = writer.into_inner().unwrap();

    let entries = parse_archive(&stream, 512);
    assert!(entries[0].0.atime.is_some());
    assert!(entries[0].0.ctime.is_some());
}

#[test]
fn test_gzipped_output_roundtrips() {
    let temp = TempDir::new().unwrap();
    let path = write_file(&temp, "z.txt", b"compress me");

    let mut gzipped = Vec::new();
    {
        let gz = GzipWriter::new(&mut gzipped).unwrap();
        let mut writer = TarWriter::new(gz);
        writer.append_path_as(&path, "z.txt").unwrap();
        writer.finish().unwrap();
    }

    assert!(tarstream::is_gzip(&gzipped));
    let entries = parse_archive(&gzipped, 100);
    assert_eq!(entries[0].0.path, "z.txt");
    assert_eq!(entries[0].1, b"compress me");
}

#[test]
fn test_create_then_extract_end_to_end() {
    let src = TempDir::new().unwrap();
    fs::create_dir(src.path().join("nested")).unwrap();
    write_file(&src, "top.txt", b"top level\n");
    write_file(&src, "nested/inner.txt", b"inner\n");

    let mut writer = TarWriter::new(Vec::new());
    writer
        .append_path_as(&src.path().join("nested"), "nested")
        .unwrap();
    writer
        .append_path_as(&src.path().join("top.txt"), "top.txt")
        .unwrap();
    writer
        .append_path_as(&src.path().join("nested/inner.txt"), "nested/inner.txt")
        .unwrap();
    let stream = writer.into_inner().unwrap();

    let dst = TempDir::new().unwrap();
    let mut extractor = Extractor::new(dst.path().to_path_buf());
    extract_archive(&stream, &mut extractor, 4096);

    assert_eq!(
        fs::read_to_string(dst.path().join("top.txt")).unwrap(),
        "top level\n"
    );
    assert_eq!(
        fs::read_to_string(dst.path().join("nested/inner.txt")).unwrap(),
        "inner\n"
    );
}
