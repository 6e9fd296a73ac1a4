//! DirWriter (§4.8): append and remove 32-byte directory records, extending
//! the owning directory by one cluster when it runs out of room.
//!
//! Grounded on the teacher's `dir.rs` (`VirtFile::create`/`remove` entry-span
//! bookkeeping) generalized from its cached-block read-modify-write to the
//! journaled `clusterio::write_cluster` primitive, and on
//! `original_source/file_system_processor.py`'s `_remove_directory_entries_`/
//! `_append_directory_entry_` for the exact span and extension rules.

use crate::alloc::extend_chain;
use crate::bpb::BiosParameterBlock;
use crate::clusterio;
use crate::device::BlockDevice;
use crate::journal::Journal;
use crate::tree::{NodeId, Tree};
use crate::{EngineError, Result, DIRENT_SIZE, DIR_ENTRY_UNUSED};

fn slots_per_cluster(bpb: &BiosParameterBlock) -> usize {
    bpb.bytes_per_cluster() as usize / DIRENT_SIZE
}

/// Map a (cluster, byte offset) position inside `chain` to a slot index
/// counted linearly along the whole chain.
fn global_slot(chain: &[i64], cluster: i64, offset: u32, spc: usize) -> usize {
    let chain_index = chain.iter().position(|&c| c == cluster).unwrap_or(0);
    chain_index * spc + offset as usize / DIRENT_SIZE
}

fn slot_address(bpb: &BiosParameterBlock, chain: &[i64], slot: usize, spc: usize) -> (i64, u32) {
    let chain_index = slot / spc;
    let within = (slot % spc) * DIRENT_SIZE;
    (chain[chain_index], within as u32)
}

/// Overwrite one 32-byte slot with a tombstone (0xE5 followed by zeros),
/// reading and rewriting the whole owning cluster through the journal.
fn tombstone_slot(
    device: &mut dyn BlockDevice,
    bpb: &BiosParameterBlock,
    journal: &mut Journal,
    cluster: i64,
    offset: u32,
) -> Result<()> {
    let mut payload = clusterio::read_cluster(device, bpb, cluster)?;
    let start = offset as usize;
    payload[start] = DIR_ENTRY_UNUSED;
    for b in &mut payload[start + 1..start + DIRENT_SIZE] {
        *b = 0;
    }
    clusterio::write_cluster(device, bpb, journal, cluster, &payload)
}

/// `remove_entries` (§4.8): tombstone every slot from the previous sibling's
/// record (exclusive) through this node's own short-name record (inclusive),
/// possibly spanning two clusters of the parent's chain.
pub fn remove_entries(
    tree: &Tree,
    device: &mut dyn BlockDevice,
    bpb: &BiosParameterBlock,
    journal: &mut Journal,
    node_id: NodeId,
) -> Result<()> {
    let node = tree.node(node_id);
    let parent_id = node.parent.ok_or(EngineError::InvalidRootEdit)?;
    let parent = tree.node(parent_id);
    let spc = slots_per_cluster(bpb);

    let siblings = parent.contents();
    let my_index = siblings.iter().position(|&id| id == node_id);
    let start = match my_index.and_then(|i| i.checked_sub(1)).map(|i| siblings[i]) {
        Some(prev_id) => {
            let prev = tree.node(prev_id);
            global_slot(&parent.chain, prev.parent_cluster_number, prev.parent_offset, spc) + 1
        }
        None => 0,
    };
    let end = global_slot(&parent.chain, node.parent_cluster_number, node.parent_offset, spc) + 1;

    for slot in start..end {
        let (cluster, offset) = slot_address(bpb, &parent.chain, slot, spc);
        tombstone_slot(device, bpb, journal, cluster, offset)?;
    }
    Ok(())
}

/// `append_entry` (§4.8): write one 32-byte record at `dir.number_of_entries`,
/// extending the directory by one cluster first if it has run out of room.
pub fn append_entry(
    tree: &mut Tree,
    device: &mut dyn BlockDevice,
    bpb: &BiosParameterBlock,
    journal: &mut Journal,
    dir_id: NodeId,
    entry_bytes: &[u8; DIRENT_SIZE],
) -> Result<(i64, u32)> {
    let spc = slots_per_cluster(bpb);
    let offset = tree.node(dir_id).number_of_entries() as usize;
    let cluster_index = offset / spc;

    if cluster_index > tree.node(dir_id).cluster_count() as usize - 1 {
        extend_chain(tree, device, bpb, journal, dir_id)?;
    }

    let chain = tree.node(dir_id).chain.clone();
    let (cluster, within) = slot_address(bpb, &chain, offset, spc);

    let mut payload = clusterio::read_cluster(device, bpb, cluster)?;
    let start = within as usize;
    payload[start..start + DIRENT_SIZE].copy_from_slice(entry_bytes);
    clusterio::write_cluster(device, bpb, journal, cluster, &payload)?;

    if let crate::tree::NodeKind::Directory { number_of_entries, .. } = &mut tree.node_mut(dir_id).kind {
        *number_of_entries += 1;
    }

    Ok((cluster, within))
}
