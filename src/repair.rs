//! ErrorRepair (§4.10): after traversal, quarantine or delete files that
//! touch corrupt chains, creating a FOUND directory lazily.
//!
//! Grounded on `original_source/file_system_processor.py`'s
//! `_handle_corrupted_files_`/`_move_to_found_`/`_remove_file_` for the
//! per-error-kind branching (truncate-in-place for unclosed transactions vs.
//! move-to-FOUND for the rest), reimplemented over the arena-of-nodes shape
//! (§9) rather than the teacher's `VirtFile` tree (the teacher carries no
//! repair pass of its own to ground this against directly).

use crate::alloc::{self, free_chain};
use crate::bpb::BiosParameterBlock;
use crate::device::BlockDevice;
use crate::dirent;
use crate::dirwriter;
use crate::fat;
use crate::journal::Journal;
use crate::session::RepairPolicy;
use crate::tree::{NodeId, NodeKind, StructuralError, StructuralErrorKind, Tree};
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairAction {
    Removed,
    Quarantined,
    Truncated,
}

#[derive(Debug, Clone)]
pub struct RepairRecord {
    pub name: String,
    pub kind: StructuralErrorKind,
    pub action: RepairAction,
}

/// Run ErrorRepair over every structural error recorded during tree
/// construction (§2 data flow "on open"). The root, the sentinel, and FOUND
/// itself are immune (§4.10).
pub fn run(
    tree: &mut Tree,
    device: &mut dyn BlockDevice,
    bpb: &BiosParameterBlock,
    journal: &mut Journal,
    policy: RepairPolicy,
) -> Result<Vec<RepairRecord>> {
    let errors = std::mem::take(&mut tree.errors);
    let mut records = Vec::new();

    for err in errors {
        if err.owner == tree.root || err.owner == tree.none_file {
            continue;
        }
        if tree.found == Some(err.owner) {
            continue;
        }

        let name = tree.node(err.owner).name.clone();

        match policy {
            RepairPolicy::Remove => {
                remove_file(tree, device, bpb, journal, err.owner)?;
                records.push(RepairRecord { name, kind: err.kind, action: RepairAction::Removed });
            }
            RepairPolicy::Quarantine => {
                if err.kind == StructuralErrorKind::UnclosedTransaction {
                    truncate_chain(tree, device, bpb, journal, err.owner, err.at_cluster)?;
                    records.push(RepairRecord { name, kind: err.kind, action: RepairAction::Truncated });
                } else if err.next_cluster.is_some() {
                    quarantine(tree, device, bpb, journal, err.owner)?;
                    records.push(RepairRecord { name, kind: err.kind, action: RepairAction::Quarantined });
                } else {
                    remove_file(tree, device, bpb, journal, err.owner)?;
                    records.push(RepairRecord { name, kind: err.kind, action: RepairAction::Removed });
                }
            }
        }
    }

    Ok(records)
}

fn detach_from_parent(tree: &mut Tree, node_id: NodeId) {
    if let Some(parent_id) = tree.node(node_id).parent {
        if let NodeKind::Directory { contents, .. } = &mut tree.node_mut(parent_id).kind {
            contents.retain(|&id| id != node_id);
        }
    }
}

fn free_node_chain(
    tree: &mut Tree,
    device: &mut dyn BlockDevice,
    bpb: &BiosParameterBlock,
    journal: &mut Journal,
    node_id: NodeId,
) -> Result<()> {
    let clusters: Vec<u32> = tree.node(node_id).chain.iter().map(|&c| c as u32).collect();
    free_chain(device, bpb, journal, &clusters)?;
    for c in clusters {
        tree.occupied.remove(&c);
    }
    tree.node_mut(node_id).chain.clear();
    Ok(())
}

/// **Remove** (§4.10): free every cluster, drop from parent's contents,
/// tombstone directory records.
fn remove_file(
    tree: &mut Tree,
    device: &mut dyn BlockDevice,
    bpb: &BiosParameterBlock,
    journal: &mut Journal,
    node_id: NodeId,
) -> Result<()> {
    dirwriter::remove_entries(tree, device, bpb, journal, node_id)?;
    free_node_chain(tree, device, bpb, journal, node_id)?;
    detach_from_parent(tree, node_id);
    Ok(())
}

/// Truncate `node_id`'s chain at `at_cluster`: clear its FAT next-entry to
/// EOC, free everything after, and update bookkeeping (§4.10
/// UNCLOSED_TRANSACTION case — the file itself is not moved).
fn truncate_chain(
    tree: &mut Tree,
    device: &mut dyn BlockDevice,
    bpb: &BiosParameterBlock,
    journal: &mut Journal,
    node_id: NodeId,
    at_cluster: u32,
) -> Result<()> {
    let chain = tree.node(node_id).chain.clone();
    let Some(idx) = chain.iter().position(|&c| c as u32 == at_cluster) else {
        return Ok(());
    };

    let trailing: Vec<u32> = chain[idx + 1..].iter().map(|&c| c as u32).collect();
    free_chain(device, bpb, journal, &trailing)?;
    for c in &trailing {
        tree.occupied.remove(c);
    }

    fat::broadcast_write(device, bpb, journal, at_cluster, bpb.variant.eoc_write_value())?;
    if let Some(info) = tree.occupied.get_mut(&at_cluster) {
        info.next = None;
    }

    tree.node_mut(node_id).chain.truncate(idx + 1);
    Ok(())
}

/// Lazily create (or find) the FOUND quarantine directory under root,
/// disambiguating with a numeric suffix on name collision (§4.10).
fn ensure_found(
    tree: &mut Tree,
    device: &mut dyn BlockDevice,
    bpb: &BiosParameterBlock,
    journal: &mut Journal,
) -> Result<NodeId> {
    if let Some(id) = tree.found {
        return Ok(id);
    }

    let mut name = "FOUND".to_string();
    let mut suffix = 1;
    while tree
        .node(tree.root)
        .contents()
        .iter()
        .any(|&id| tree.node(id).name.eq_ignore_ascii_case(&name))
    {
        name = format!("FOUND{}", suffix);
        suffix += 1;
    }

    let root = tree.root;
    let id = alloc::create_directory(tree, device, bpb, journal, root, &name)?;
    tree.found = Some(id);
    Ok(id)
}

/// **Quarantine** (§4.10, default): move the file's directory records out of
/// their current parent and append them to FOUND.
fn quarantine(
    tree: &mut Tree,
    device: &mut dyn BlockDevice,
    bpb: &BiosParameterBlock,
    journal: &mut Journal,
    node_id: NodeId,
) -> Result<()> {
    let found_id = ensure_found(tree, device, bpb, journal)?;
    if node_id == found_id {
        return Ok(());
    }

    dirwriter::remove_entries(tree, device, bpb, journal, node_id)?;
    detach_from_parent(tree, node_id);

    let node = tree.node(node_id);
    let entry_bytes = dirent::create_short_entry(
        &node.name,
        node.first_cluster,
        node.is_directory(),
        node.size,
    )?;

    let (pc, po) = dirwriter::append_entry(tree, device, bpb, journal, found_id, &entry_bytes)?;
    tree.node_mut(node_id).parent = Some(found_id);
    tree.node_mut(node_id).parent_cluster_number = pc;
    tree.node_mut(node_id).parent_offset = po;

    if let NodeKind::Directory { contents, .. } = &mut tree.node_mut(found_id).kind {
        contents.push(node_id);
    }
    Ok(())
}
