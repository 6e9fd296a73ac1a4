//! Fragmentation analysis end-to-end (§8): a scattered chain reports a
//! nonzero ratio, `defragment` compacts it to zero given ample free space,
//! and a fragment/defragment round-trip converges back near the
//! post-defragment baseline.

mod common;

use fatfsck::dirent::create_short_entry;
use fatfsck::{OpenOptions, Session};

#[test]
fn defragment_compacts_and_fragment_defragment_converges() {
    let dir = common::tempdir("fragmentation");
    let mut img = common::fat16_shell(200);

    let bpc = img.bpb.bytes_per_cluster() as usize;
    common::set_fat_entry_both(&mut img, 5, 50);
    common::set_fat_entry_both(&mut img, 50, 90);
    common::set_fat_entry_both(&mut img, 90, img.bpb.variant.eoc_write_value());
    common::write_cluster_data(&mut img, 5, &vec![1u8; bpc]);
    common::write_cluster_data(&mut img, 50, &vec![2u8; bpc]);
    common::write_cluster_data(&mut img, 90, &vec![3u8; bpc]);

    let entry = create_short_entry("FRAG.TXT", 5, false, (bpc * 3) as u32).unwrap();
    common::write_root_entry(&mut img, 0, &entry);

    let path = common::save(&img, &dir, "image.img");
    let mut options = OpenOptions::default();
    options.journal_path = Some(dir.join("j.log"));
    let mut session = Session::open(path.to_str().unwrap(), options).unwrap();

    let r0 = session.fragmentation_ratio();
    assert!(r0 > 0.0, "scattered chain should start fragmented, got {}", r0);

    session.defragment().unwrap();
    let r1 = session.fragmentation_ratio();
    assert_eq!(r1, 0.0, "ample free space should let defragment fully compact the chain");

    // File contents must be unchanged by the cluster shuffling.
    let bytes = session.read_file("FRAG.TXT").unwrap();
    assert!(bytes[..bpc].iter().all(|&b| b == 1));
    assert!(bytes[bpc..bpc * 2].iter().all(|&b| b == 2));
    assert!(bytes[bpc * 2..].iter().all(|&b| b == 3));

    session.fragment().unwrap();
    session.defragment().unwrap();
    let r2 = session.fragmentation_ratio();
    assert!((r2 - r1).abs() <= 1.0, "fragment/defragment round-trip should reconverge, r1={} r2={}", r1, r2);
}
