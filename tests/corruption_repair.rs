//! Structural-corruption detection and ErrorRepair end-to-end (§8): FAT-copy
//! disagreement resolved via `default_fat_copy`, bad-cluster quarantine vs.
//! removal, self-loop detection, and symmetric cluster-intersection
//! quarantine of both colliding files.

mod common;

use fatfsck::dirent::create_short_entry;
use fatfsck::repair::RepairAction;
use fatfsck::{OpenOptions, RepairPolicy, Session};

fn options_with(dir: &std::path::Path, tag: &str, default_fat_copy: Option<usize>, policy: RepairPolicy) -> OpenOptions {
    OpenOptions {
        on_corruption: policy,
        default_fat_copy,
        disambiguate: Box::new(|diffs| Ok(diffs[0].0)),
        journal_path: Some(dir.join(format!("{}.log", tag))),
    }
}

#[test]
fn table_disagreement_default_copy_decides_whether_file_is_readable() {
    let dir = common::tempdir("fat-disagreement");
    let mut img = common::fat16_shell(200);

    // Copy 0 says cluster 5 is a clean EOC chain; copy 1 says it's bad.
    common::set_fat_entry(&mut img, 0, 5, img.bpb.variant.eoc_write_value());
    common::set_fat_entry(&mut img, 1, 5, img.bpb.variant.bad_marker());
    common::write_cluster_data(&mut img, 5, b"data");
    let entry = create_short_entry("DIFF.TXT", 5, false, 4).unwrap();
    common::write_root_entry(&mut img, 0, &entry);

    let path = common::save(&img, &dir, "image.img");

    let mut trusting_copy0 = Session::open(
        path.to_str().unwrap(),
        options_with(&dir, "copy0", Some(0), RepairPolicy::Quarantine),
    )
    .unwrap();
    assert!(trusting_copy0.last_repairs().is_empty());
    assert_eq!(trusting_copy0.read_file("DIFF.TXT").unwrap(), b"data");

    let mut trusting_copy1 = Session::open(
        path.to_str().unwrap(),
        options_with(&dir, "copy1", Some(1), RepairPolicy::Quarantine),
    )
    .unwrap();
    assert!(trusting_copy1.read_file("DIFF.TXT").is_err());
    assert!(trusting_copy1.tree().resolve("FOUND/DIFF.TXT").is_ok());
}

fn bad_cluster_image(dir: &std::path::Path, name: &str) -> std::path::PathBuf {
    let mut img = common::fat16_shell(200);
    common::set_fat_entry_both(&mut img, 5, img.bpb.variant.bad_marker());
    common::write_cluster_data(&mut img, 5, b"data");
    let entry = create_short_entry("BAD.TXT", 5, false, 4).unwrap();
    common::write_root_entry(&mut img, 0, &entry);
    common::save(&img, dir, name)
}

#[test]
fn bad_cluster_is_quarantined_by_default() {
    let dir = common::tempdir("bad-cluster-quarantine");
    let path = bad_cluster_image(&dir, "image.img");

    let session = Session::open(
        path.to_str().unwrap(),
        options_with(&dir, "q", None, RepairPolicy::Quarantine),
    )
    .unwrap();

    assert_eq!(session.last_repairs().len(), 1);
    assert_eq!(session.last_repairs()[0].action, RepairAction::Quarantined);
    assert!(session.tree().resolve("BAD.TXT").is_err());
    assert!(session.tree().resolve("FOUND/BAD.TXT").is_ok());
}

#[test]
fn bad_cluster_is_removed_under_remove_policy() {
    let dir = common::tempdir("bad-cluster-remove");
    let path = bad_cluster_image(&dir, "image.img");

    let session = Session::open(
        path.to_str().unwrap(),
        options_with(&dir, "r", None, RepairPolicy::Remove),
    )
    .unwrap();

    assert_eq!(session.last_repairs().len(), 1);
    assert_eq!(session.last_repairs()[0].action, RepairAction::Removed);
    assert!(session.tree().resolve("BAD.TXT").is_err());
    assert!(session.tree().found.is_none() || session.tree().resolve("FOUND/BAD.TXT").is_err());
}

#[test]
fn self_loop_is_detected_and_quarantined() {
    let dir = common::tempdir("self-loop");
    let mut img = common::fat16_shell(200);
    common::set_fat_entry_both(&mut img, 5, 5);
    common::write_cluster_data(&mut img, 5, b"data");
    let entry = create_short_entry("LOOP.TXT", 5, false, 4).unwrap();
    common::write_root_entry(&mut img, 0, &entry);

    let path = common::save(&img, &dir, "image.img");
    let session = Session::open(
        path.to_str().unwrap(),
        options_with(&dir, "loop", None, RepairPolicy::Quarantine),
    )
    .unwrap();

    assert_eq!(session.last_repairs().len(), 1);
    assert_eq!(session.last_repairs()[0].kind, fatfsck::tree::StructuralErrorKind::SelfLoop);
    assert!(session.tree().resolve("FOUND/LOOP.TXT").is_ok());
}

#[test]
fn intersecting_chains_quarantine_both_files() {
    let dir = common::tempdir("intersection");
    let mut img = common::fat16_shell(200);

    // FILE1: 5 -> 6 -> EOC.
    common::set_fat_entry_both(&mut img, 5, 6);
    common::set_fat_entry_both(&mut img, 6, img.bpb.variant.eoc_write_value());
    common::write_cluster_data(&mut img, 5, b"one ");
    common::write_cluster_data(&mut img, 6, b"one2");
    // FILE2: 7 -> 6 (already claimed by FILE1).
    common::set_fat_entry_both(&mut img, 7, 6);
    common::write_cluster_data(&mut img, 7, b"two ");

    let e1 = create_short_entry("FILE1.TXT", 5, false, 8).unwrap();
    let e2 = create_short_entry("FILE2.TXT", 7, false, 8).unwrap();
    common::write_root_entry(&mut img, 0, &e1);
    common::write_root_entry(&mut img, 1, &e2);

    let path = common::save(&img, &dir, "image.img");
    let session = Session::open(
        path.to_str().unwrap(),
        options_with(&dir, "isect", None, RepairPolicy::Quarantine),
    )
    .unwrap();

    assert_eq!(session.last_repairs().len(), 2);
    assert!(session.tree().resolve("FILE1.TXT").is_err());
    assert!(session.tree().resolve("FILE2.TXT").is_err());
    assert!(session.tree().resolve("FOUND/FILE1.TXT").is_ok());
    assert!(session.tree().resolve("FOUND/FILE2.TXT").is_ok());
}

/// The allocator's `find_free` hands out `2..=data_cluster_count+1`
/// (`alloc::find_free`), so a chain legitimately ending at the top allocator
/// cluster must open clean, not get walked as BAD_CLUSTER/reserved.
#[test]
fn chain_into_top_allocator_cluster_opens_without_repair() {
    let dir = common::tempdir("top-cluster");
    let mut img = common::fat16_shell(200);
    let top = img.bpb.data_cluster_count + 1;

    common::set_fat_entry_both(&mut img, 5, top);
    common::set_fat_entry_both(&mut img, top, img.bpb.variant.eoc_write_value());
    common::write_cluster_data(&mut img, 5, b"head");
    common::write_cluster_data(&mut img, top as i64, b"tail");

    let entry = create_short_entry("TOP.TXT", 5, false, 8).unwrap();
    common::write_root_entry(&mut img, 0, &entry);

    let path = common::save(&img, &dir, "image.img");
    let session = Session::open(
        path.to_str().unwrap(),
        options_with(&dir, "top", None, RepairPolicy::Quarantine),
    )
    .unwrap();

    assert!(session.last_repairs().is_empty());
    assert!(session.tree().resolve("TOP.TXT").is_ok());
}

/// A FAT-copy disagreement on the top allocator cluster must still be
/// reconciled — `FatTables::reconcile`'s range must cover `DCC+1`, not just
/// `0..DCC`.
#[test]
fn table_disagreement_on_top_allocator_cluster_is_reconciled() {
    let dir = common::tempdir("top-cluster-reconcile");
    let mut img = common::fat16_shell(200);
    let top = img.bpb.data_cluster_count + 1;

    common::set_fat_entry(&mut img, 0, 5, top);
    common::set_fat_entry(&mut img, 1, 5, top);
    common::set_fat_entry(&mut img, 0, top, img.bpb.variant.eoc_write_value());
    common::set_fat_entry(&mut img, 1, top, img.bpb.variant.bad_marker());
    common::write_cluster_data(&mut img, 5, b"head");

    let entry = create_short_entry("TOP2.TXT", 5, false, 4).unwrap();
    common::write_root_entry(&mut img, 0, &entry);

    let path = common::save(&img, &dir, "image.img");
    let session = Session::open(
        path.to_str().unwrap(),
        options_with(&dir, "top2", Some(0), RepairPolicy::Quarantine),
    )
    .unwrap();

    assert!(session.last_repairs().is_empty());
    assert!(session.tree().resolve("TOP2.TXT").is_ok());
}
