//! Journal replay end-to-end (§8): a journal left behind with an unclosed
//! nested transaction touching cluster 25 causes that cluster's owner to be
//! truncated at open, not silently trusted.

mod common;

use std::io::Write;

use fatfsck::dirent::create_short_entry;
use fatfsck::repair::RepairAction;
use fatfsck::tree::StructuralErrorKind;
use fatfsck::{OpenOptions, RepairPolicy, Session};

#[test]
fn unclosed_transaction_is_truncated_on_reopen() {
    let dir = common::tempdir("journal-replay");
    let mut img = common::fat16_shell(200);

    common::set_fat_entry_both(&mut img, 25, 26);
    common::set_fat_entry_both(&mut img, 26, img.bpb.variant.eoc_write_value());
    common::write_cluster_data(&mut img, 25, b"abcd");

    let entry = create_short_entry("FILE.TXT", 25, false, 4).unwrap();
    common::write_root_entry(&mut img, 0, &entry);

    let path = common::save(&img, &dir, "image.img");
    let image_path = path.to_str().unwrap().to_string();

    // Two nested transactions (WRITE_BOTH outer, WRITE_TABLE inner) both
    // carrying cluster 25; only the inner one is closed, leaving the outer
    // frame's event dangling (mirrors the journal unit test's fixture).
    let journal_path = dir.join("fat_journal.log");
    let mut f = std::fs::File::create(&journal_path).unwrap();
    writeln!(f, "{}", image_path).unwrap();
    writeln!(f, "TRANSACTION 2").unwrap();
    writeln!(f, r#"{{"cluster_number":25,"value":0,"table":null}}"#).unwrap();
    writeln!(f, "TRANSACTION 0").unwrap();
    writeln!(f, r#"{{"cluster_number":25,"value":0,"table":0}}"#).unwrap();
    writeln!(f, "CLOSED").unwrap();
    drop(f);

    let mut options = OpenOptions::default();
    options.journal_path = Some(journal_path.clone());
    let session = Session::open(&image_path, options).unwrap();

    assert_eq!(session.last_repairs().len(), 1);
    assert_eq!(session.last_repairs()[0].kind, StructuralErrorKind::UnclosedTransaction);
    assert_eq!(session.last_repairs()[0].action, RepairAction::Truncated);
    assert!(session.tree().resolve("FILE.TXT").is_ok());

    // The journal was truncated back to just the image-path line on open.
    let remaining = std::fs::read_to_string(&journal_path).unwrap();
    assert_eq!(remaining.trim_end(), image_path);
}
