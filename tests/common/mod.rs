//! Shared synthetic-image builder for the integration tests (§8 end-to-end
//! scenarios). Grounded on `session.rs`'s own `synth_image` unit-test helper,
//! generalized to a reusable FAT16 layout big enough to hold several
//! multi-cluster files so fragmentation and repair scenarios have room to
//! work in.

use std::path::{Path, PathBuf};

use fatfsck::bpb::BiosParameterBlock;

pub struct Image {
    pub bytes: Vec<u8>,
    pub bpb: BiosParameterBlock,
}

/// A FAT16 volume shell: boot sector parsed and zeroed data region, `data_clusters`
/// data clusters, nothing allocated yet. `data_clusters` must clear the
/// 4085-cluster FAT12/FAT16 threshold (§3) for the boot sector to parse as FAT16.
pub fn fat16_shell(data_clusters: u32) -> Image {
    let bytes_per_sector: u16 = 512;
    let sectors_per_cluster: u8 = 1;
    let reserved: u16 = 1;
    let fats: u8 = 2;
    let root_entries: u16 = 32;
    let sectors_per_fat: u16 = (((data_clusters + 2) * 2 + 511) / 512) as u16;
    let root_dir_sectors = ((root_entries as u32 * 32) + 511) / 512;
    let total_sectors =
        reserved as u32 + fats as u32 * sectors_per_fat as u32 + root_dir_sectors + data_clusters;

    let mut boot = vec![0u8; 512];
    boot[11..13].copy_from_slice(&bytes_per_sector.to_le_bytes());
    boot[13] = sectors_per_cluster;
    boot[14..16].copy_from_slice(&reserved.to_le_bytes());
    boot[16] = fats;
    boot[17..19].copy_from_slice(&root_entries.to_le_bytes());
    boot[19..21].copy_from_slice(&(total_sectors as u16).to_le_bytes());
    boot[22..24].copy_from_slice(&sectors_per_fat.to_le_bytes());

    let image_len = total_sectors as usize * bytes_per_sector as usize;
    let mut bytes = vec![0u8; image_len];
    bytes[0..512].copy_from_slice(&boot);

    let bpb = BiosParameterBlock::parse(&boot).unwrap();
    Image { bytes, bpb }
}

pub fn set_fat_entry(img: &mut Image, copy: u32, cluster: u32, value: u32) {
    let off = img.bpb.fat_offset(copy) as usize + cluster as usize * 2;
    img.bytes[off..off + 2].copy_from_slice(&(value as u16).to_le_bytes());
}

pub fn set_fat_entry_both(img: &mut Image, cluster: u32, value: u32) {
    for copy in 0..img.bpb.num_fats {
        set_fat_entry(img, copy, cluster, value);
    }
}

pub fn write_cluster_data(img: &mut Image, cluster: i64, content: &[u8]) {
    let off = img.bpb.cluster_offset(cluster) as usize;
    img.bytes[off..off + content.len()].copy_from_slice(content);
}

pub fn write_root_entry(img: &mut Image, index: usize, entry: &[u8; 32]) {
    let root_addr = img.bpb.cluster_offset(img.bpb.root_cluster) as usize + index * 32;
    img.bytes[root_addr..root_addr + 32].copy_from_slice(entry);
}

/// Allocate a contiguous `len`-cluster chain starting at `first` (both FAT
/// copies), writing `fill` bytes repeated across the payload and truncated
/// to `size` bytes of logical file length.
pub fn lay_down_chain(img: &mut Image, first: u32, len: u32, fill: u8) {
    let bpc = img.bpb.bytes_per_cluster() as usize;
    for i in 0..len {
        let cluster = first + i;
        let next = if i + 1 == len {
            img.bpb.variant.eoc_write_value()
        } else {
            first + i + 1
        };
        set_fat_entry_both(img, cluster, next);
        let payload = vec![fill; bpc];
        write_cluster_data(img, cluster as i64, &payload);
    }
}

pub fn tempdir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "fatfsck-it-{}-{}-{}",
        tag,
        std::process::id(),
        COUNTER.fetch_add(1, std::sync::atomic::Ordering::Relaxed)
    ));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

static COUNTER: std::sync::atomic::AtomicU32 = std::sync::atomic::AtomicU32::new(0);

pub fn save(img: &Image, dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, &img.bytes).unwrap();
    path
}
