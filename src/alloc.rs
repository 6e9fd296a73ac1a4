//! Allocator (§4.11): find a free cluster, extend a chain, and provision new
//! files/directories.
//!
//! Grounded on the teacher's `fs.rs` (`alloc_cluster`/`dealloc_cluster`
//! free-cluster-count bookkeeping) generalized from its cached-FSInfo-counter
//! style to the tree's `occupied` map, and on
//! `original_source/file_system_processor.py`'s `_find_free_cluster_`/
//! `_create_file_`/`_create_directory_` for the exact reserve-then-chain and
//! rollback-on-failure sequencing.

use crate::bpb::BiosParameterBlock;
use crate::clusterio;
use crate::device::BlockDevice;
use crate::dirent;
use crate::dirwriter;
use crate::fat;
use crate::journal::Journal;
use crate::tree::{Node, NodeId, NodeKind, Owner, OccupiedClusterInfo, Tree};
use crate::{EngineError, Result, ATTR_DIRECTORY};

/// `find_free` (§4.11): linear scan from cluster 2 for the first free entry.
pub fn find_free(device: &mut dyn BlockDevice, bpb: &BiosParameterBlock) -> Result<u32> {
    for cluster in 2..=(bpb.data_cluster_count + 1) {
        if fat::is_free(fat::read_entry(device, bpb, cluster, 0)?) {
            return Ok(cluster);
        }
    }
    Err(EngineError::OutOfSpace)
}

/// `extend(file)` (§4.11): grow `node_id`'s chain by one cluster. The node
/// must already own at least one cluster (directories always do).
pub fn extend_chain(
    tree: &mut Tree,
    device: &mut dyn BlockDevice,
    bpb: &BiosParameterBlock,
    journal: &mut Journal,
    node_id: NodeId,
) -> Result<()> {
    let tail = *tree
        .node(node_id)
        .chain
        .last()
        .expect("extend_chain called on a node with no clusters");
    let new_cluster = find_free(device, bpb)?;

    fat::broadcast_write(device, bpb, journal, new_cluster, bpb.variant.eoc_write_value())?;
    fat::broadcast_write(device, bpb, journal, tail as u32, new_cluster)?;

    if let Some(info) = tree.occupied.get_mut(&(tail as u32)) {
        info.next = Some(new_cluster);
    }
    tree.occupied.insert(
        new_cluster,
        OccupiedClusterInfo {
            cluster: new_cluster,
            previous: Some(tail as u32),
            next: None,
            owner: Owner::Real(node_id),
        },
    );
    tree.node_mut(node_id).chain.push(new_cluster as i64);
    Ok(())
}

/// Free every cluster in `chain` by zeroing their FAT entries in all copies
/// (§4.10 `remove`, §4.11 allocation rollback).
pub fn free_chain(
    device: &mut dyn BlockDevice,
    bpb: &BiosParameterBlock,
    journal: &mut Journal,
    chain: &[u32],
) -> Result<()> {
    for &c in chain {
        fat::broadcast_write(device, bpb, journal, c, 0)?;
    }
    Ok(())
}

/// `create_file`/`create_directory` (§4.11): reserve `n` clusters, chain and
/// write them, append a short-name directory entry, and install bookkeeping.
/// On mid-allocation failure every already-reserved cluster is freed before
/// the error surfaces.
fn create(
    tree: &mut Tree,
    device: &mut dyn BlockDevice,
    bpb: &BiosParameterBlock,
    journal: &mut Journal,
    parent_id: NodeId,
    name: &str,
    contents: &[u8],
    is_directory: bool,
) -> Result<NodeId> {
    if tree
        .node(parent_id)
        .contents()
        .iter()
        .any(|&id| tree.node(id).name.eq_ignore_ascii_case(name))
    {
        return Err(EngineError::InvalidName(name.to_string()));
    }

    let bpc = bpb.bytes_per_cluster() as usize;
    let needed = if contents.is_empty() { 1 } else { (contents.len() + bpc - 1) / bpc }.max(1);

    let mut reserved: Vec<u32> = Vec::with_capacity(needed);
    for _ in 0..needed {
        match find_free(device, bpb) {
            Ok(cluster) => {
                if let Err(e) = fat::broadcast_write(device, bpb, journal, cluster, bpb.variant.eoc_write_value()) {
                    free_chain(device, bpb, journal, &reserved).ok();
                    return Err(e);
                }
                reserved.push(cluster);
            }
            Err(e) => {
                free_chain(device, bpb, journal, &reserved).ok();
                return Err(e);
            }
        }
    }

    for pair in reserved.windows(2) {
        fat::broadcast_write(device, bpb, journal, pair[0], pair[1])?;
    }

    for (i, &cluster) in reserved.iter().enumerate() {
        let start = i * bpc;
        let chunk = if start < contents.len() {
            &contents[start..(start + bpc).min(contents.len())]
        } else {
            &[][..]
        };
        clusterio::write_cluster(device, bpb, journal, cluster as i64, chunk)?;
    }

    let first_cluster = reserved[0];
    let size = if is_directory { 0 } else { contents.len() as u32 };
    let entry_bytes = dirent::create_short_entry(name, first_cluster, is_directory, size)?;

    let node_id = tree.nodes.len();
    let kind = if is_directory {
        NodeKind::Directory { contents: Vec::new(), number_of_entries: 0 }
    } else {
        NodeKind::File
    };
    tree.nodes.push(Node {
        name: name.to_string(),
        attrs: if is_directory { ATTR_DIRECTORY } else { 0 },
        first_cluster,
        chain: reserved.iter().map(|&c| c as i64).collect(),
        size,
        parent: Some(parent_id),
        parent_cluster_number: 0,
        parent_offset: 0,
        kind,
    });

    for (i, &cluster) in reserved.iter().enumerate() {
        let previous = if i == 0 { None } else { Some(reserved[i - 1]) };
        let next = reserved.get(i + 1).copied();
        tree.occupied.insert(
            cluster,
            OccupiedClusterInfo { cluster, previous, next, owner: Owner::Real(node_id) },
        );
    }

    let (pc, po) = dirwriter::append_entry(tree, device, bpb, journal, parent_id, &entry_bytes)?;
    tree.node_mut(node_id).parent_cluster_number = pc;
    tree.node_mut(node_id).parent_offset = po;

    if is_directory {
        // idiomatic on-disk `.`/`..` records (§4.11); traversal still skips
        // 0x2E slots (§4.7, §9) so the two behaviors coexist.
        let parent_dot_cluster = if parent_id == tree.root && bpb.variant != crate::bpb::FatVariant::Fat32 {
            0
        } else {
            tree.node(parent_id).first_cluster
        };
        let [dot, dotdot] = dirent::create_dot_entries(first_cluster, parent_dot_cluster);
        dirwriter::append_entry(tree, device, bpb, journal, node_id, &dot)?;
        dirwriter::append_entry(tree, device, bpb, journal, node_id, &dotdot)?;
    }

    if let NodeKind::Directory { contents, .. } = &mut tree.node_mut(parent_id).kind {
        contents.push(node_id);
    }

    Ok(node_id)
}

pub fn create_file(
    tree: &mut Tree,
    device: &mut dyn BlockDevice,
    bpb: &BiosParameterBlock,
    journal: &mut Journal,
    parent_id: NodeId,
    name: &str,
    contents: &[u8],
) -> Result<NodeId> {
    create(tree, device, bpb, journal, parent_id, name, contents, false)
}

pub fn create_directory(
    tree: &mut Tree,
    device: &mut dyn BlockDevice,
    bpb: &BiosParameterBlock,
    journal: &mut Journal,
    parent_id: NodeId,
    name: &str,
) -> Result<NodeId> {
    create(tree, device, bpb, journal, parent_id, name, &[], true)
}
