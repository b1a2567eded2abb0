//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the tarstream-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//

//! Header and pax codec tests - bit-exact round-trips

use tarstream::entry::EntryKind;
use tarstream::formats::Fieldset;
use tarstream::{Header, PaxExtended};

/// The reference xstar header: a known block with a known checksum
fn reference_header() -> Header {
    let mut hdr = Header::new("foo.txt".to_string(), EntryKind::File);
    hdr.mode = 0o755;
    hdr.uid = 24561;
    hdr.gid = 20;
    hdr.size = 100;
    hdr.mtime = 1_459_548_000; // 2016-04-01T22:00:00Z
    hdr.atime = Some(1_459_548_000);
    hdr.ctime = Some(1_459_548_000);
    hdr.uname = "isaacs".to_string();
    hdr.gname = "staff".to_string();
    hdr
}

#[test]
fn test_xstar_reference_checksum() {
    let mut hdr = reference_header();
    hdr.encode();
    assert_eq!(hdr.fieldset, Fieldset::Xstar);
    assert_eq!(hdr.cksum, 6745);
    assert!(!hdr.need_pax);
}

#[test]
fn test_xstar_reference_roundtrip() {
    let mut hdr = reference_header();
    let block = hdr.encode();

    let parsed = Header::decode(&block);
    assert!(parsed.cksum_valid);
    assert!(!parsed.null_block);
    assert_eq!(parsed.fieldset, Fieldset::Xstar);
    assert_eq!(parsed.path, "foo.txt");
    assert_eq!(parsed.mode, 0o755);
    assert_eq!(parsed.uid, 24561);
    assert_eq!(parsed.gid, 20);
    assert_eq!(parsed.size, 100);
    assert_eq!(parsed.mtime, 1_459_548_000);
    assert_eq!(parsed.atime, Some(1_459_548_000));
    assert_eq!(parsed.ctime, Some(1_459_548_000));
    assert_eq!(parsed.uname, "isaacs");
    assert_eq!(parsed.gname, "staff");
    assert_eq!(parsed.kind, EntryKind::File);
    assert_eq!(parsed.cksum, 6745);
}

#[test]
fn test_every_fieldset_roundtrips() {
    // basic: nothing but v7 fields
    let mut basic = Header::new("plain".to_string(), EntryKind::File);
    basic.size = 42;
    basic.mtime = 1_000_000_000;

    // ustar: names and a split path
    let mut ustar = Header::new(format!("{}/{}", "p".repeat(120), "leaf"), EntryKind::File);
    ustar.uname = "operator".to_string();
    ustar.gname = "wheel".to_string();
    ustar.size = 7;

    // xstar: timestamps in the tail
    let mut xstar = reference_header();

    for (hdr, fieldset) in [
        (&mut basic, Fieldset::Basic),
        (&mut ustar, Fieldset::Ustar),
        (&mut xstar, Fieldset::Xstar),
    ] {
        let block = hdr.encode();
        assert_eq!(hdr.fieldset, fieldset);
        let parsed = Header::decode(&block);
        assert!(parsed.cksum_valid, "{:?} checksum", fieldset);
        assert_eq!(parsed.path, hdr.path, "{:?} path", fieldset);
        assert_eq!(parsed.size, hdr.size, "{:?} size", fieldset);
        assert_eq!(parsed.mtime, hdr.mtime, "{:?} mtime", fieldset);
        assert_eq!(parsed.uname, hdr.uname, "{:?} uname", fieldset);
    }
}

#[test]
fn test_link_header_roundtrip() {
    let mut hdr = Header::new("b".to_string(), EntryKind::Link);
    hdr.linkpath = "a".to_string();
    let parsed = Header::decode(&hdr.encode());
    assert_eq!(parsed.kind, EntryKind::Link);
    assert_eq!(parsed.linkpath, "a");
    assert_eq!(parsed.size, 0);
}

#[test]
fn test_device_header_roundtrip() {
    let mut hdr = Header::new("dev/sda1".to_string(), EntryKind::BlockDevice);
    hdr.devmaj = 8;
    hdr.devmin = 1;
    hdr.uname = "root".to_string();
    let parsed = Header::decode(&hdr.encode());
    assert_eq!(parsed.kind, EntryKind::BlockDevice);
    assert_eq!(parsed.devmaj, 8);
    assert_eq!(parsed.devmin, 1);
}

#[test]
fn test_pax_body_roundtrip_over_recognized_keys() {
    let mut pax = PaxExtended::new(false);
    pax.atime = Some(1_459_548_000.5);
    pax.mtime = Some(1_459_548_000.25);
    pax.ctime = Some(1_459_548_000.75);
    pax.path = Some("päx/ünicode/name".to_string());
    pax.linkpath = Some("elsewhere".to_string());
    pax.size = Some(9_000_000_000);
    pax.uid = Some(4_000_000);
    pax.gid = Some(4_000_001);
    pax.uname = Some("überuser".to_string());
    pax.gname = Some("ωgroup".to_string());
    pax.dev = Some(64768);
    pax.ino = Some(131_203);
    pax.nlink = Some(3);
    pax.charset = Some("ISO-IR 10646 2000 UTF-8".to_string());
    pax.comment = Some("free text".to_string());

    let body = pax.encode_body();
    let parsed = PaxExtended::parse(&body, None, false).unwrap();

    assert_eq!(parsed.path, pax.path);
    assert_eq!(parsed.linkpath, pax.linkpath);
    assert_eq!(parsed.size, pax.size);
    assert_eq!(parsed.uid, pax.uid);
    assert_eq!(parsed.gid, pax.gid);
    assert_eq!(parsed.uname, pax.uname);
    assert_eq!(parsed.gname, pax.gname);
    assert_eq!(parsed.dev, pax.dev);
    assert_eq!(parsed.ino, pax.ino);
    assert_eq!(parsed.nlink, pax.nlink);
    assert_eq!(parsed.charset, pax.charset);
    assert_eq!(parsed.comment, pax.comment);
    assert!((parsed.atime.unwrap() - 1_459_548_000.5).abs() < 1e-6);
    assert!((parsed.mtime.unwrap() - 1_459_548_000.25).abs() < 1e-6);
    assert!((parsed.ctime.unwrap() - 1_459_548_000.75).abs() < 1e-6);
}
