//! Swap (§4.12): exchange the roles of two data clusters, fixing up FAT
//! entries, chain-head directory records, and OccupiedClusterInfo on both
//! sides. Composed into fragmentation analysis and defragmentation.
//!
//! Grounded on `original_source/defrag/file_system_processor.py`'s
//! `_swap_clusters_`/`_defragment_`/`_fragment_` for the four-case
//! (head/interior x occupied/free) state machine and the
//! self-referential-adjacency handling this module generalizes into the
//! single `relocate` helper below (the teacher carries no swap primitive of
//! its own to ground this against).

use rand::Rng;

use crate::bpb::BiosParameterBlock;
use crate::clusterio;
use crate::device::BlockDevice;
use crate::fat;
use crate::journal::{Journal, JournalEvent, TransactionKind};
use crate::tree::{NodeId, OccupiedClusterInfo, Owner, Tree};
use crate::{write_le_u16, EngineError, Result};

/// Map a cluster number to its new identity after an a<->b role exchange.
fn relocate(x: u32, a: u32, b: u32) -> u32 {
    if x == a {
        b
    } else if x == b {
        a
    } else {
        x
    }
}

fn relocate_chain_for_owner(tree: &mut Tree, owner: Owner, a: u32, b: u32) {
    if let Owner::Real(id) = owner {
        for c in tree.node_mut(id).chain.iter_mut() {
            let v = *c as u32;
            if v == a {
                *c = b as i64;
            } else if v == b {
                *c = a as i64;
            }
        }
    }
}

/// Rewrite the owning file's directory record's first-cluster fields to
/// `new_cluster` (§4.12 step 2). The root has no directory record of its own
/// and is only updated in memory.
fn rewrite_head(
    tree: &mut Tree,
    device: &mut dyn BlockDevice,
    bpb: &BiosParameterBlock,
    journal: &mut Journal,
    owner: Owner,
    new_cluster: u32,
) -> Result<()> {
    let Owner::Real(id) = owner else { return Ok(()) };
    tree.node_mut(id).first_cluster = new_cluster;

    if tree.node(id).parent.is_none() {
        return Ok(());
    }

    let cluster = tree.node(id).parent_cluster_number;
    let offset = tree.node(id).parent_offset as usize;
    let mut payload = clusterio::read_cluster(device, bpb, cluster)?;
    write_le_u16(&mut payload[offset + 20..offset + 22], (new_cluster >> 16) as u16);
    write_le_u16(&mut payload[offset + 26..offset + 28], new_cluster as u16);
    clusterio::write_cluster(device, bpb, journal, cluster, &payload)
}

/// `swap(a, b)` (§4.12): exchange the roles of two data clusters end to end.
pub fn swap(
    tree: &mut Tree,
    device: &mut dyn BlockDevice,
    bpb: &BiosParameterBlock,
    journal: &mut Journal,
    a: u32,
    b: u32,
) -> Result<()> {
    if a == b {
        return Err(EngineError::InvalidSwap(a));
    }
    let na = fat::read_entry(device, bpb, a, 0)?;
    let nb = fat::read_entry(device, bpb, b, 0)?;
    if fat::is_bad(bpb, na) || fat::is_bad(bpb, nb) {
        return Err(EngineError::InvalidSwap(a));
    }

    let info_a = tree.occupied.get(&a).cloned();
    let info_b = tree.occupied.get(&b).cloned();

    // Step 2: chain heads.
    if let Some(ia) = &info_a {
        if ia.previous.is_none() {
            rewrite_head(tree, device, bpb, journal, ia.owner, b)?;
        }
    }
    if let Some(ib) = &info_b {
        if ib.previous.is_none() {
            rewrite_head(tree, device, bpb, journal, ib.owner, a)?;
        }
    }

    // Step 3: external predecessors. Adjacency (prev == the other side) is
    // handled entirely by the FAT[a]/FAT[b] rewrite below — writing it here
    // too would create a transient self-loop (§4.12 self-reference note).
    if let Some(ia) = &info_a {
        if let Some(prev) = ia.previous {
            if prev != b {
                fat::broadcast_write(device, bpb, journal, prev, b)?;
                if let Some(info) = tree.occupied.get_mut(&prev) {
                    info.next = Some(b);
                }
            }
        }
    }
    if let Some(ib) = &info_b {
        if let Some(prev) = ib.previous {
            if prev != a {
                fat::broadcast_write(device, bpb, journal, prev, a)?;
                if let Some(info) = tree.occupied.get_mut(&prev) {
                    info.next = Some(a);
                }
            }
        }
    }

    // Step 4: external successors' previous-pointer bookkeeping.
    if let Some(ia) = &info_a {
        if let Some(next) = ia.next {
            if next != b {
                if let Some(info) = tree.occupied.get_mut(&next) {
                    info.previous = Some(b);
                }
            }
        }
    }
    if let Some(ib) = &info_b {
        if let Some(next) = ib.next {
            if next != a {
                if let Some(info) = tree.occupied.get_mut(&next) {
                    info.previous = Some(a);
                }
            }
        }
    }

    // Step 5: FAT[a]/FAT[b] and the cluster payload swap, one WRITE_BOTH transaction.
    let new_fat_a = relocate(nb, a, b);
    let new_fat_b = relocate(na, a, b);

    journal.begin(TransactionKind::WriteBoth)?;
    journal.record(JournalEvent::new(a, Some(new_fat_a), None))?;
    journal.record(JournalEvent::new(b, Some(new_fat_b), None))?;
    for copy in 0..bpb.num_fats {
        fat::write_entry(device, bpb, a, copy, new_fat_a)?;
        fat::write_entry(device, bpb, b, copy, new_fat_b)?;
    }
    let payload_a = clusterio::read_cluster(device, bpb, a as i64)?;
    let payload_b = clusterio::read_cluster(device, bpb, b as i64)?;
    device.write_at(bpb.cluster_offset(a as i64), &payload_b)?;
    device.write_at(bpb.cluster_offset(b as i64), &payload_a)?;
    journal.close()?;

    // Bookkeeping for a and b themselves: each now carries the other's role.
    match (&info_a, &info_b) {
        (Some(ia), Some(ib)) => {
            tree.occupied.insert(a, OccupiedClusterInfo {
                cluster: a,
                previous: ib.previous.map(|p| relocate(p, a, b)),
                next: if fat::is_eoc(bpb, new_fat_a) { None } else { Some(new_fat_a) },
                owner: ib.owner,
            });
            tree.occupied.insert(b, OccupiedClusterInfo {
                cluster: b,
                previous: ia.previous.map(|p| relocate(p, a, b)),
                next: if fat::is_eoc(bpb, new_fat_b) { None } else { Some(new_fat_b) },
                owner: ia.owner,
            });
        }
        (Some(ia), None) => {
            tree.occupied.remove(&a);
            tree.occupied.insert(b, OccupiedClusterInfo {
                cluster: b,
                previous: ia.previous.map(|p| relocate(p, a, b)),
                next: if fat::is_eoc(bpb, new_fat_b) { None } else { Some(new_fat_b) },
                owner: ia.owner,
            });
        }
        (None, Some(ib)) => {
            tree.occupied.remove(&b);
            tree.occupied.insert(a, OccupiedClusterInfo {
                cluster: a,
                previous: ib.previous.map(|p| relocate(p, a, b)),
                next: if fat::is_eoc(bpb, new_fat_a) { None } else { Some(new_fat_a) },
                owner: ib.owner,
            });
        }
        (None, None) => {}
    }

    let mut owners = Vec::new();
    if let Some(ia) = &info_a {
        owners.push(ia.owner);
    }
    if let Some(ib) = &info_b {
        if !owners.contains(&ib.owner) {
            owners.push(ib.owner);
        }
    }
    for owner in owners {
        relocate_chain_for_owner(tree, owner, a, b);
    }

    Ok(())
}

/// Fragmentation ratio (§ "Fragmentation analysis"): the share of non-head
/// occupied clusters whose distance from their predecessor isn't 1.
pub fn fragmentation_ratio(tree: &Tree) -> f64 {
    let real: Vec<&OccupiedClusterInfo> = tree
        .occupied
        .values()
        .filter(|info| info.owner != Owner::Sentinel)
        .collect();
    if real.is_empty() {
        return 0.0;
    }
    let fragmented = real
        .iter()
        .filter(|info| match info.previous {
            Some(prev) => (info.cluster as i64 - prev as i64) != 1,
            None => false,
        })
        .count();
    fragmented as f64 / real.len() as f64 * 100.0
}

fn ordered_file_ids(tree: &Tree) -> Vec<NodeId> {
    let mut ids: Vec<NodeId> = (0..tree.nodes.len())
        .filter(|&id| id != tree.root && id != tree.none_file && Some(id) != tree.found)
        .filter(|&id| tree.node(id).chain.len() > 1)
        .collect();
    ids.sort_by_key(|&id| tree.node(id).chain[0]);
    ids
}

/// Defragmentation (§ "Fragmentation analysis"): walk files in ascending
/// first-cluster order and, for each non-contiguous link, try to swap the
/// cluster into `previous + 1`, skipping bad/reserved slots up to 5 attempts
/// per link and aborting the link on swap failure.
pub fn defragment(
    tree: &mut Tree,
    device: &mut dyn BlockDevice,
    bpb: &BiosParameterBlock,
    journal: &mut Journal,
) -> Result<()> {
    for id in ordered_file_ids(tree) {
        let mut i = 1;
        loop {
            let chain_len = tree.node(id).chain.len();
            if i >= chain_len {
                break;
            }
            let cluster = tree.node(id).chain[i] as u32;
            let previous = tree.node(id).chain[i - 1] as u32;

            if (cluster as i64 - previous as i64) != 1 {
                for attempt in 0..5u32 {
                    let target = previous + 1 + attempt;
                    if target < 2 || target > bpb.data_cluster_count + 1 || target == cluster {
                        break;
                    }
                    let value = fat::read_entry(device, bpb, target, 0)?;
                    if fat::is_bad(bpb, value) || fat::is_reserved(bpb, value) {
                        continue;
                    }
                    let _ = swap(tree, device, bpb, journal, cluster, target);
                    break;
                }
            }
            i += 1;
        }
    }
    Ok(())
}

/// The fragmentator (§ "Fragmentation analysis"): the inverse of
/// defragmentation, picking a uniformly random target cluster in the data
/// region for every non-head occupied cluster.
pub fn fragment(
    tree: &mut Tree,
    device: &mut dyn BlockDevice,
    bpb: &BiosParameterBlock,
    journal: &mut Journal,
) -> Result<()> {
    let mut rng = rand::thread_rng();
    let candidates: Vec<u32> = ordered_file_ids(tree)
        .into_iter()
        .flat_map(|id| tree.node(id).chain.iter().skip(1).map(|&c| c as u32).collect::<Vec<_>>())
        .collect();

    for cluster in candidates {
        let target = rng.gen_range(2..=(bpb.data_cluster_count + 1));
        if target == cluster {
            continue;
        }
        let value = fat::read_entry(device, bpb, target, 0)?;
        if fat::is_bad(bpb, value) || fat::is_reserved(bpb, value) {
            continue;
        }
        let _ = swap(tree, device, bpb, journal, cluster, target);
    }
    Ok(())
}
