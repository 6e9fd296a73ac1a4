//! Tree (§4.9): recursive directory materialization into the in-memory file
//! graph, plus OccupiedClusterInfo bookkeeping (§3).
//!
//! Grounded on the teacher's `vfs.rs`/`dir.rs` (`VirtFile` parent/contents
//! traversal) generalized from its `Arc<RwLock<..>>`-cyclic-graph style to
//! the arena-of-nodes-keyed-by-id shape mandated by §9 (single-threaded, no
//! shared-ownership machinery needed), and on
//! `original_source/file_system_processor.py`'s `_build_file_system_tree_`
//! and `_set_occupied_clusters_` for the traversal order and the
//! previous/next linkage this module installs into `occupied`.

use std::collections::{HashMap, HashSet};

use crate::bpb::{BiosParameterBlock, FatVariant};
use crate::device::BlockDevice;
use crate::fat::{self, ChainErrorKind};
use crate::{dirent, ATTR_DIRECTORY};

pub type NodeId = usize;

/// Who owns a cluster: a real node, or the sentinel that owns cluster 0
/// (§3, §9 — a tagged variant rather than a magic empty `NoneFile` object).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    Real(NodeId),
    Sentinel,
}

#[derive(Debug)]
pub enum NodeKind {
    File,
    Directory {
        contents: Vec<NodeId>,
        number_of_entries: u32,
    },
    Sentinel,
}

/// A File or Directory node (§3). The in-memory graph is cyclic
/// (child.parent <-> parent.contents); `parent` is stored as a stable id,
/// never a reference (§9).
#[derive(Debug)]
pub struct Node {
    pub name: String,
    pub attrs: u8,
    /// The on-disk first-cluster value for this node's directory record.
    /// Meaningless for the root and the sentinel.
    pub first_cluster: u32,
    /// The node's full cluster chain, in order. May hold the FAT12/16 virtual
    /// negative root clusters (§4.1, §4.6).
    pub chain: Vec<i64>,
    pub size: u32,
    pub parent: Option<NodeId>,
    pub parent_cluster_number: i64,
    pub parent_offset: u32,
    pub kind: NodeKind,
}

impl Node {
    pub fn is_directory(&self) -> bool {
        matches!(self.kind, NodeKind::Directory { .. })
    }

    pub fn cluster_count(&self) -> u32 {
        self.chain.len() as u32
    }

    pub fn contents(&self) -> &[NodeId] {
        match &self.kind {
            NodeKind::Directory { contents, .. } => contents,
            _ => &[],
        }
    }

    pub fn number_of_entries(&self) -> u32 {
        match &self.kind {
            NodeKind::Directory { number_of_entries, .. } => *number_of_entries,
            _ => 0,
        }
    }
}

/// One of the four structural corruptions detected during traversal (§3 FATError, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructuralErrorKind {
    SelfLoop,
    ClusterIntersection,
    BadCluster,
    UnclosedTransaction,
}

#[derive(Debug, Clone)]
pub struct StructuralError {
    pub kind: StructuralErrorKind,
    pub owner: NodeId,
    pub at_cluster: u32,
    pub next_cluster: Option<u32>,
}

/// OccupiedClusterInfo (§3): cluster -> {previous, next, owner}. Consulted by
/// every mutation (swap, allocate, repair).
#[derive(Debug, Clone)]
pub struct OccupiedClusterInfo {
    pub cluster: u32,
    pub previous: Option<u32>,
    pub next: Option<u32>,
    pub owner: Owner,
}

pub struct Tree {
    pub nodes: Vec<Node>,
    pub root: NodeId,
    pub none_file: NodeId,
    /// Lazily-created FOUND quarantine directory id, once ErrorRepair has
    /// created one (§4.10). `None` until the first quarantine.
    pub found: Option<NodeId>,
    pub occupied: HashMap<u32, OccupiedClusterInfo>,
    pub errors: Vec<StructuralError>,
}

impl Tree {
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id]
    }

    /// Resolve a `/`-separated path against the tree, starting at root.
    pub fn resolve(&self, path: &str) -> crate::Result<NodeId> {
        let mut current = self.root;
        for component in path.split('/').filter(|c| !c.is_empty()) {
            let next = self.nodes[current]
                .contents()
                .iter()
                .copied()
                .find(|&id| self.nodes[id].name.eq_ignore_ascii_case(component));
            match next {
                Some(id) => current = id,
                None => return Err(crate::EngineError::NotFound(path.to_string())),
            }
        }
        Ok(current)
    }

    /// Free-space survey (§2 data flow "on open"): clusters not claimed by
    /// any chain or the sentinel, derived from `data_cluster_count` minus
    /// every cluster recorded in `occupied`.
    pub fn free_cluster_count(&self, bpb: &BiosParameterBlock) -> u32 {
        bpb.data_cluster_count - self.occupied.len() as u32
    }
}

struct Builder<'d> {
    device: &'d mut dyn BlockDevice,
    bpb: &'d BiosParameterBlock,
    unclosed: HashSet<u32>,
    claimed: HashSet<u32>,
    occupied: HashMap<u32, OccupiedClusterInfo>,
    errors: Vec<StructuralError>,
    nodes: Vec<Node>,
}

impl<'d> Builder<'d> {
    /// Walk a chain, install OccupiedClusterInfo links, and record any
    /// structural error found (unclosed-transaction clusters take priority
    /// over whatever the walk itself would have reported past that point,
    /// since content past a suspect cluster cannot be trusted, §4.3/§9).
    fn walk_and_install(&mut self, owner: NodeId, first_cluster: u32) -> std::io::Result<Vec<i64>> {
        if first_cluster == 0 {
            return Ok(Vec::new());
        }

        let claimed = &self.claimed;
        let (mut chain, walk_err) =
            fat::walk_chain(self.device, self.bpb, first_cluster, |c| claimed.contains(&c))?;

        let mut unclosed_at = None;
        for (i, &c) in chain.iter().enumerate() {
            if self.unclosed.contains(&c) {
                unclosed_at = Some(i);
                break;
            }
        }

        let error = if let Some(i) = unclosed_at {
            let next_cluster = chain.get(i + 1).copied();
            chain.truncate(i + 1);
            Some(StructuralError {
                kind: StructuralErrorKind::UnclosedTransaction,
                owner,
                at_cluster: chain[i],
                next_cluster,
            })
        } else {
            walk_err.map(|e| StructuralError {
                kind: match e.kind {
                    ChainErrorKind::SelfLoop => StructuralErrorKind::SelfLoop,
                    ChainErrorKind::ClusterIntersection => StructuralErrorKind::ClusterIntersection,
                    ChainErrorKind::BadCluster => StructuralErrorKind::BadCluster,
                },
                owner,
                at_cluster: e.at_cluster,
                next_cluster: e.next_cluster,
            })
        };

        for (i, &c) in chain.iter().enumerate() {
            self.claimed.insert(c);
            let previous = if i == 0 { None } else { Some(chain[i - 1]) };
            let next = chain.get(i + 1).copied();
            self.occupied.insert(
                c,
                OccupiedClusterInfo {
                    cluster: c,
                    previous,
                    next,
                    owner: Owner::Real(owner),
                },
            );
        }

        if let Some(err) = error {
            // Intersections are reported symmetrically so both files are
            // quarantined (§4.10): the side that legitimately owns the
            // colliding cluster gets its own error too, pointed at itself so
            // the quarantine branch (which keys off `next_cluster.is_some()`)
            // still fires for it.
            if err.kind == StructuralErrorKind::ClusterIntersection {
                if let Some(next) = err.next_cluster {
                    if let Some(victim) = self.occupied.get(&next).map(|info| info.owner) {
                        if let Owner::Real(victim_id) = victim {
                            self.errors.push(StructuralError {
                                kind: StructuralErrorKind::ClusterIntersection,
                                owner: victim_id,
                                at_cluster: next,
                                next_cluster: Some(next),
                            });
                        }
                    }
                }
            }
            self.errors.push(err);
        }

        Ok(chain.into_iter().map(|c| c as i64).collect())
    }

    fn build_directory(&mut self, dir_id: NodeId) -> std::io::Result<()> {
        let chain = self.nodes[dir_id].chain.clone();
        let (entries, count) = dirent::read_directory(self.device, self.bpb, &chain)?;
        if let NodeKind::Directory { number_of_entries, .. } = &mut self.nodes[dir_id].kind {
            *number_of_entries = count;
        }

        let mut children = Vec::with_capacity(entries.len());
        for entry in entries {
            let node_id = self.nodes.len();
            let is_dir = entry.is_directory();
            let kind = if is_dir {
                NodeKind::Directory { contents: Vec::new(), number_of_entries: 0 }
            } else {
                NodeKind::File
            };
            self.nodes.push(Node {
                name: entry.name,
                attrs: entry.attrs,
                first_cluster: entry.first_cluster,
                chain: Vec::new(),
                size: entry.size,
                parent: Some(dir_id),
                parent_cluster_number: entry.parent_cluster_number,
                parent_offset: entry.parent_offset,
                kind,
            });

            let chain = self.walk_and_install(node_id, entry.first_cluster)?;
            self.nodes[node_id].chain = chain;
            children.push(node_id);

            if is_dir {
                self.build_directory(node_id)?;
            }
        }

        if let NodeKind::Directory { contents, .. } = &mut self.nodes[dir_id].kind {
            *contents = children;
        }
        Ok(())
    }
}

/// Build the in-memory file graph (§4.9, data flow "on open"). `unclosed` is
/// the set of clusters reported by [`crate::journal::Journal::open`].
pub fn build(
    device: &mut dyn BlockDevice,
    bpb: &BiosParameterBlock,
    unclosed: &[u32],
) -> std::io::Result<Tree> {
    let mut builder = Builder {
        device,
        bpb,
        unclosed: unclosed.iter().copied().collect(),
        claimed: HashSet::new(),
        occupied: HashMap::new(),
        errors: Vec::new(),
        nodes: Vec::new(),
    };

    let root_id = 0;
    let root_chain: Vec<i64> = if bpb.variant == FatVariant::Fat32 {
        builder.walk_and_install(root_id, bpb.root_cluster as u32)?
    } else {
        fat::root_pseudo_chain(bpb)
    };

    builder.nodes.push(Node {
        name: String::new(),
        attrs: ATTR_DIRECTORY,
        first_cluster: if bpb.variant == FatVariant::Fat32 { bpb.root_cluster as u32 } else { 0 },
        chain: root_chain,
        size: 0,
        parent: None,
        parent_cluster_number: -1,
        parent_offset: 0,
        kind: NodeKind::Directory { contents: Vec::new(), number_of_entries: 0 },
    });

    builder.build_directory(root_id)?;

    let none_id = builder.nodes.len();
    builder.nodes.push(Node {
        name: String::new(),
        attrs: 0,
        first_cluster: 0,
        chain: Vec::new(),
        size: 0,
        parent: None,
        parent_cluster_number: -1,
        parent_offset: 0,
        kind: NodeKind::Sentinel,
    });
    builder.occupied.entry(0).or_insert(OccupiedClusterInfo {
        cluster: 0,
        previous: None,
        next: None,
        owner: Owner::Sentinel,
    });

    Ok(Tree {
        nodes: builder.nodes,
        root: root_id,
        none_file: none_id,
        found: None,
        occupied: builder.occupied,
        errors: builder.errors,
    })
}
