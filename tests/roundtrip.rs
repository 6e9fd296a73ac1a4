//! End-to-end round-trip scenarios (§8): read an existing multi-cluster,
//! non-contiguous file back correctly, and have a freshly created file
//! survive a close/reopen cycle.

mod common;

use fatfsck::dirent::create_short_entry;
use fatfsck::{OpenOptions, Session};

#[test]
fn reads_scattered_multi_cluster_file() {
    let dir = common::tempdir("roundtrip-read");
    let mut img = common::fat16_shell(200);

    let bpc = img.bpb.bytes_per_cluster() as usize;
    // Non-contiguous chain: 10 -> 40 -> 25 -> EOC, so this also doubles as a
    // fragmentation fixture elsewhere; here it just proves the walker
    // doesn't assume adjacency.
    common::set_fat_entry_both(&mut img, 10, 40);
    common::set_fat_entry_both(&mut img, 40, 25);
    common::set_fat_entry_both(&mut img, 25, img.bpb.variant.eoc_write_value());

    common::write_cluster_data(&mut img, 10, &vec![b'A'; bpc]);
    common::write_cluster_data(&mut img, 40, &vec![b'B'; bpc]);
    let mut tail = vec![b'C'; bpc];
    tail.truncate(10);
    common::write_cluster_data(&mut img, 25, &tail);

    let size = (bpc * 2 + 10) as u32;
    let entry = create_short_entry("BIG.TXT", 10, false, size).unwrap();
    common::write_root_entry(&mut img, 0, &entry);

    let path = common::save(&img, &dir, "image.img");
    let mut options = OpenOptions::default();
    options.journal_path = Some(dir.join("j.log"));
    let mut session = Session::open(path.to_str().unwrap(), options).unwrap();

    assert!(session.last_repairs().is_empty());
    let bytes = session.read_file("BIG.TXT").unwrap();
    assert_eq!(bytes.len(), size as usize);
    assert!(bytes[..bpc].iter().all(|&b| b == b'A'));
    assert!(bytes[bpc..bpc * 2].iter().all(|&b| b == b'B'));
    assert!(bytes[bpc * 2..].iter().all(|&b| b == b'C'));
}

#[test]
fn created_file_survives_close_and_reopen() {
    let dir = common::tempdir("roundtrip-create");
    let img = common::fat16_shell(200);
    let path = common::save(&img, &dir, "image.img");

    let mut options = OpenOptions::default();
    options.journal_path = Some(dir.join("j.log"));
    let mut session = Session::open(path.to_str().unwrap(), options).unwrap();
    session.create_file("", "NEW.TXT", b"roundtrip contents").unwrap();
    session.close().unwrap();

    let mut options2 = OpenOptions::default();
    options2.journal_path = Some(dir.join("j.log"));
    let mut reopened = Session::open(path.to_str().unwrap(), options2).unwrap();
    assert!(reopened.last_repairs().is_empty());
    assert_eq!(reopened.read_file("NEW.TXT").unwrap(), b"roundtrip contents");
}
