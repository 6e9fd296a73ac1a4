//! FatCodec (§4.2), FatTables (§4.5) and ChainWalker (§4.6).
//!
//! Grounded on the teacher's `fat.rs` (`ClusterChain` iterator walking the
//! FAT via `read_le_u32`, terminating on the end-of-chain marker) generalized
//! from a FAT32-only 4-byte stride to all three variants' bit packing, and on
//! `original_source/defrag/file_system_processor.py`'s `_read_fat_entry_`,
//! `_write_fat_entry_`, `_compare_tables_`/`_fix_tables_`, and
//! `_get_cluster_chain_` for the exact FAT12 nibble-sharing and multi-copy
//! reconciliation algorithms.

use crate::bpb::{BiosParameterBlock, FatVariant};
use crate::device::BlockDevice;
use crate::error::EngineError;
use crate::journal::{Journal, JournalEvent, TransactionKind};
use crate::{read_le_u16, read_le_u32, write_le_u16, write_le_u32};

/// Read a single FAT entry from copy `copy` (§4.2).
pub fn read_entry(
    device: &mut dyn BlockDevice,
    bpb: &BiosParameterBlock,
    cluster: u32,
    copy: u32,
) -> std::io::Result<u32> {
    let base = bpb.fat_offset(copy);
    match bpb.variant {
        FatVariant::Fat12 => {
            // Two bytes hold one and a half entries; split on parity (§4.2).
            let byte_off = cluster as u64 + cluster as u64 / 2;
            let mut buf = [0u8; 2];
            device.read_at(base + byte_off, &mut buf)?;
            let word = read_le_u16(&buf);
            let value = if cluster % 2 == 0 {
                word & 0x0FFF
            } else {
                word >> 4
            };
            Ok(value as u32)
        }
        FatVariant::Fat16 => {
            let mut buf = [0u8; 2];
            device.read_at(base + cluster as u64 * 2, &mut buf)?;
            Ok(read_le_u16(&buf) as u32)
        }
        FatVariant::Fat32 => {
            let mut buf = [0u8; 4];
            device.read_at(base + cluster as u64 * 4, &mut buf)?;
            Ok(read_le_u32(&buf) & 0x0FFF_FFFF)
        }
    }
}

/// Write a single FAT entry to copy `copy` (§4.2). Does not itself open a
/// journal transaction — callers (FatTables broadcast, Allocator) wrap this
/// in the appropriate transaction kind.
pub fn write_entry(
    device: &mut dyn BlockDevice,
    bpb: &BiosParameterBlock,
    cluster: u32,
    copy: u32,
    value: u32,
) -> crate::Result<()> {
    let bits = bpb.variant.entry_bits();
    if value >= (1u32 << bits) && !(bpb.variant == FatVariant::Fat32 && value <= 0x0FFF_FFFF) {
        return Err(EngineError::InvalidValue { value, bits });
    }
    let base = bpb.fat_offset(copy);
    match bpb.variant {
        FatVariant::Fat12 => {
            // Preserve the neighboring entry's nibble sharing the byte (§4.2, §9).
            let byte_off = cluster as u64 + cluster as u64 / 2;
            let mut buf = [0u8; 2];
            device.read_at(base + byte_off, &mut buf)?;
            let existing = read_le_u16(&buf);
            let merged = if cluster % 2 == 0 {
                (existing & 0xF000) | (value as u16 & 0x0FFF)
            } else {
                (existing & 0x000F) | ((value as u16 & 0x0FFF) << 4)
            };
            write_le_u16(&mut buf, merged);
            device.write_at(base + byte_off, &buf)?;
        }
        FatVariant::Fat16 => {
            let mut buf = [0u8; 2];
            write_le_u16(&mut buf, value as u16);
            device.write_at(base + cluster as u64 * 2, &buf)?;
        }
        FatVariant::Fat32 => {
            // Preserve the top 4 reserved bits (§4.2).
            let off = base + cluster as u64 * 4;
            let mut buf = [0u8; 4];
            device.read_at(off, &mut buf)?;
            let existing = read_le_u32(&buf);
            let merged = (existing & 0xF000_0000) | (value & 0x0FFF_FFFF);
            write_le_u32(&mut buf, merged);
            device.write_at(off, &buf)?;
        }
    }
    Ok(())
}

pub fn is_eoc(bpb: &BiosParameterBlock, value: u32) -> bool {
    value >= bpb.variant.eoc_marker()
}

pub fn is_bad(bpb: &BiosParameterBlock, value: u32) -> bool {
    value == bpb.variant.bad_marker()
}

/// "Reserved" here conflates out-of-range pointers with the classic reserved
/// markers, by design (§9, deliberately preserved quirk) — but the boundary
/// itself must track the allocator's actual cluster range (`find_free` in
/// `alloc.rs` hands out `2..=data_cluster_count+1`), not `original_source`'s
/// `range(2, data_clusters_count)` convention, or the top two valid data
/// clusters get condemned as reserved.
pub fn is_reserved(bpb: &BiosParameterBlock, value: u32) -> bool {
    value > bpb.data_cluster_count + 1 && !is_eoc(bpb, value) && !is_bad(bpb, value)
}

pub fn is_free(value: u32) -> bool {
    value == 0
}

/// FatTables (§4.5): multi-copy read, diff, reconcile, and broadcast-write.
pub struct FatTables;

impl FatTables {
    /// Reconcile all FAT copies against copy 0 at open time. Returns the
    /// canonical value chosen for every cluster whose copies disagreed.
    pub fn reconcile(
        device: &mut dyn BlockDevice,
        bpb: &BiosParameterBlock,
        journal: &mut Journal,
        mut disambiguate: impl FnMut(&[(usize, u32)]) -> crate::Result<usize>,
        default_fat_copy: Option<usize>,
    ) -> crate::Result<()> {
        if bpb.data_cluster_count == 0 {
            return Err(EngineError::InvalidBoot);
        }

        // Clusters 0/1 are reserved slots, not data clusters; the valid data
        // range is `2..=data_cluster_count+1` (matching `alloc::find_free`),
        // not the `0..data_cluster_count` original_source convention.
        for cluster in 2..bpb.data_cluster_count + 2 {
            let canonical = read_entry(device, bpb, cluster, 0)?;
            let mut diffs: Vec<(usize, u32)> = vec![(0, canonical)];
            for copy in 1..bpb.num_fats {
                let value = read_entry(device, bpb, cluster, copy)?;
                if value != canonical {
                    diffs.push((copy as usize, value));
                }
            }

            if diffs.len() > 1 {
                let chosen_copy = if let Some(default) = default_fat_copy {
                    if default >= bpb.num_fats as usize {
                        return Err(EngineError::WrongFatCopyIndex(default));
                    }
                    default
                } else {
                    let chosen = disambiguate(&diffs)?;
                    if chosen >= bpb.num_fats as usize {
                        return Err(EngineError::WrongFatCopyIndex(chosen));
                    }
                    chosen
                };
                let chosen_value = diffs
                    .iter()
                    .find(|(copy, _)| *copy == chosen_copy)
                    .map(|(_, v)| *v)
                    .unwrap_or(canonical);
                broadcast_write(device, bpb, journal, cluster, chosen_value)?;
            }
        }
        Ok(())
    }
}

/// Broadcast a single FAT entry value to every copy under one WRITE_TABLE
/// transaction (§4.5).
pub fn broadcast_write(
    device: &mut dyn BlockDevice,
    bpb: &BiosParameterBlock,
    journal: &mut Journal,
    cluster: u32,
    value: u32,
) -> crate::Result<()> {
    journal.begin(TransactionKind::WriteTable)?;
    journal.record(JournalEvent::new(cluster, Some(value), None))?;
    for copy in 0..bpb.num_fats {
        write_entry(device, bpb, cluster, copy, value)?;
    }
    journal.close()?;
    Ok(())
}

/// Write a single FAT entry to one specific copy under its own WRITE_TABLE
/// transaction — used by the error-injection collaborator to desynchronize
/// copies deliberately.
pub fn write_single_copy(
    device: &mut dyn BlockDevice,
    bpb: &BiosParameterBlock,
    journal: &mut Journal,
    cluster: u32,
    copy: u32,
    value: u32,
) -> crate::Result<()> {
    journal.begin(TransactionKind::WriteTable)?;
    journal.record(JournalEvent::new(cluster, Some(value), Some(copy)))?;
    write_entry(device, bpb, cluster, copy, value)?;
    journal.close()?;
    Ok(())
}

/// The outcome of walking a cluster chain (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainErrorKind {
    SelfLoop,
    ClusterIntersection,
    BadCluster,
}

#[derive(Debug, Clone, Copy)]
pub struct ChainError {
    pub kind: ChainErrorKind,
    pub at_cluster: u32,
    pub next_cluster: Option<u32>,
}

/// ChainWalker (§4.6): follow a chain via FAT copy 0, flagging structural
/// corruption. `already_occupied` answers whether a cluster is already
/// claimed by a previously-walked file (cluster-intersection detection).
pub fn walk_chain(
    device: &mut dyn BlockDevice,
    bpb: &BiosParameterBlock,
    first_cluster: u32,
    mut already_occupied: impl FnMut(u32) -> bool,
) -> std::io::Result<(Vec<u32>, Option<ChainError>)> {
    let mut chain = vec![first_cluster];
    let mut cur = first_cluster;

    loop {
        let next = read_entry(device, bpb, cur, 0)?;

        if is_eoc(bpb, next) {
            return Ok((chain, None));
        }
        if next == cur {
            return Ok((
                chain,
                Some(ChainError {
                    kind: ChainErrorKind::SelfLoop,
                    at_cluster: cur,
                    next_cluster: Some(next),
                }),
            ));
        }
        if already_occupied(next) {
            return Ok((
                chain,
                Some(ChainError {
                    kind: ChainErrorKind::ClusterIntersection,
                    at_cluster: cur,
                    next_cluster: Some(next),
                }),
            ));
        }
        if is_bad(bpb, next) || is_reserved(bpb, next) {
            return Ok((
                chain,
                Some(ChainError {
                    kind: ChainErrorKind::BadCluster,
                    at_cluster: cur,
                    next_cluster: Some(next),
                }),
            ));
        }

        chain.push(next);
        cur = next;
    }
}

/// The root-directory pseudo-chain on FAT12/16 (§4.6): fixed consecutive
/// sectors, no FAT lookup.
pub fn root_pseudo_chain(bpb: &BiosParameterBlock) -> Vec<i64> {
    let len = bpb.root_pseudo_chain_len();
    (0..len as i64).map(|i| bpb.root_cluster + i).collect()
}
