//! Session/Engine API (§4.14): the single entry point wiring journal replay,
//! boot parsing, FAT reconciliation, tree construction and error repair into
//! one `open()` call, plus the mutating operations built on top.
//!
//! Grounded on the teacher's `fs.rs` (`Fat32FileSystem::open` sequencing boot
//! parsing, FAT loading and root-directory materialization behind one
//! constructor) generalized to the full open-time pipeline described in
//! `original_source/file_system_processor.py`'s `FileSystemProcessor.__init__`
//! (replay journal -> parse boot sector -> reconcile FAT copies -> build tree
//! -> repair errors -> survey free space).

use std::fs::OpenOptions as FsOpenOptions;
use std::path::PathBuf;

use log::info;

use crate::alloc;
use crate::bpb::{BiosParameterBlock, FatVariant, FsInfo};
use crate::device::{BlockDevice, ImageFile};
use crate::fat::{self, FatTables};
use crate::journal::Journal;
use crate::repair::{self, RepairRecord};
use crate::swap;
use crate::tree::{self, NodeId, Tree};
use crate::{EngineError, Result};

/// How ErrorRepair disposes of files whose chain is structurally broken (§4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairPolicy {
    Remove,
    Quarantine,
}

impl Default for RepairPolicy {
    fn default() -> Self {
        RepairPolicy::Quarantine
    }
}

/// Knobs for [`Session::open`] (§4.14).
pub struct OpenOptions {
    pub on_corruption: RepairPolicy,
    /// If set, every disagreeing FAT copy is resolved to this copy's value
    /// without consulting `disambiguate`.
    pub default_fat_copy: Option<usize>,
    /// Consulted only when `default_fat_copy` is `None` and a cluster's FAT
    /// copies disagree: given `[(copy_index, value)]`, return which copy to
    /// trust.
    pub disambiguate: Box<dyn FnMut(&[(usize, u32)]) -> Result<usize>>,
    pub journal_path: Option<PathBuf>,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            on_corruption: RepairPolicy::default(),
            default_fat_copy: Some(0),
            disambiguate: Box::new(|diffs| Ok(diffs[0].0)),
            journal_path: None,
        }
    }
}

/// Volume metadata surfaced by [`Session::info`].
#[derive(Debug, Clone, Copy)]
pub struct VolumeInfo {
    pub variant: FatVariant,
    pub bytes_per_sector: u32,
    pub sectors_per_cluster: u32,
    pub num_fats: u32,
    pub data_cluster_count: u32,
    pub free_cluster_count: u32,
}

pub struct Session {
    device: Box<dyn BlockDevice>,
    bpb: BiosParameterBlock,
    fs_info: Option<FsInfo>,
    journal: Journal,
    tree: Tree,
    last_repairs: Vec<RepairRecord>,
}

impl Session {
    /// Open an image (§2 data flow "on open", §4.14): replay the journal,
    /// parse the boot sector, reconcile FAT copies, build the file graph, and
    /// repair any structural error the build surfaced.
    pub fn open(image_path: &str, mut options: OpenOptions) -> Result<Session> {
        let file = FsOpenOptions::new().read(true).write(true).open(image_path)?;
        let mut device: Box<dyn BlockDevice> = Box::new(ImageFile::open(file));

        let mut boot_sector = [0u8; 512];
        device.read_at(0, &mut boot_sector)?;
        let bpb = BiosParameterBlock::parse(&boot_sector)?;

        let fs_info = if bpb.variant == FatVariant::Fat32 {
            let mut sector = vec![0u8; bpb.bytes_per_sector as usize];
            device.read_at((bpb.fs_info_sector as u64) * bpb.bytes_per_sector as u64, &mut sector)?;
            FsInfo::parse(&sector)
        } else {
            None
        };

        let (mut journal, unclosed) = Journal::open(image_path, options.journal_path.take())?;
        if !unclosed.is_empty() {
            info!("replayed journal: {} cluster(s) left dangling by an unclosed transaction", unclosed.len());
        }

        FatTables::reconcile(
            device.as_mut(),
            &bpb,
            &mut journal,
            &mut options.disambiguate,
            options.default_fat_copy,
        )?;

        let mut tree = tree::build(device.as_mut(), &bpb, &unclosed)?;

        let last_repairs = repair::run(&mut tree, device.as_mut(), &bpb, &mut journal, options.on_corruption)?;
        if !last_repairs.is_empty() {
            info!("repaired {} file(s) during open", last_repairs.len());
        }

        Ok(Session { device, bpb, fs_info, journal, tree, last_repairs })
    }

    pub fn info(&self) -> VolumeInfo {
        VolumeInfo {
            variant: self.bpb.variant,
            bytes_per_sector: self.bpb.bytes_per_sector,
            sectors_per_cluster: self.bpb.sectors_per_cluster,
            num_fats: self.bpb.num_fats,
            data_cluster_count: self.bpb.data_cluster_count,
            free_cluster_count: self.tree.free_cluster_count(&self.bpb),
        }
    }

    /// The FAT32 FSInfo hint, when the volume carries one (§3, §6). Advisory
    /// only — `info().free_cluster_count` is the authoritative figure.
    pub fn fs_info_hint(&self) -> Option<FsInfo> {
        self.fs_info
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn last_repairs(&self) -> &[RepairRecord] {
        &self.last_repairs
    }

    /// Read a file's full contents by path, walking its cluster chain and
    /// truncating the tail to its recorded size (§4.14).
    pub fn read_file(&mut self, path: &str) -> Result<Vec<u8>> {
        let node_id = self.tree.resolve(path)?;
        let node = self.tree.node(node_id);
        if node.is_directory() {
            return Err(EngineError::NotADirectory(path.to_string()));
        }
        let size = node.size as usize;
        let chain = node.chain.clone();

        let bpc = self.bpb.bytes_per_cluster() as usize;
        let mut out = Vec::with_capacity(size);
        for cluster in chain {
            if out.len() >= size {
                break;
            }
            let mut buf = vec![0u8; bpc];
            self.device.read_at(self.bpb.cluster_offset(cluster), &mut buf)?;
            out.extend_from_slice(&buf);
        }
        out.truncate(size);
        Ok(out)
    }

    pub fn create_file(&mut self, parent_path: &str, name: &str, contents: &[u8]) -> Result<NodeId> {
        let parent_id = self.tree.resolve(parent_path)?;
        alloc::create_file(&mut self.tree, self.device.as_mut(), &self.bpb, &mut self.journal, parent_id, name, contents)
    }

    pub fn create_directory(&mut self, parent_path: &str, name: &str) -> Result<NodeId> {
        let parent_id = self.tree.resolve(parent_path)?;
        alloc::create_directory(&mut self.tree, self.device.as_mut(), &self.bpb, &mut self.journal, parent_id, name)
    }

    /// Swap (§4.12): exchange the roles of two data clusters in place.
    pub fn swap(&mut self, a: u32, b: u32) -> Result<()> {
        swap::swap(&mut self.tree, self.device.as_mut(), &self.bpb, &mut self.journal, a, b)
    }

    pub fn fragmentation_ratio(&self) -> f64 {
        swap::fragmentation_ratio(&self.tree)
    }

    pub fn defragment(&mut self) -> Result<()> {
        swap::defragment(&mut self.tree, self.device.as_mut(), &self.bpb, &mut self.journal)
    }

    /// Scramble every file's cluster order for demonstration purposes — the
    /// inverse of [`Session::defragment`].
    pub fn fragment(&mut self) -> Result<()> {
        swap::fragment(&mut self.tree, self.device.as_mut(), &self.bpb, &mut self.journal)
    }

    /// Desynchronize one FAT copy's entry from the rest (§4.5 error-injection
    /// collaborator): the next `open()` will disambiguate or default over it.
    pub fn inject_single_table_corruption(&mut self, cluster: u32, copy: u32, value: u32) -> Result<()> {
        fat::write_single_copy(self.device.as_mut(), &self.bpb, &mut self.journal, cluster, copy, value)
    }

    /// Mark `cluster`'s own FAT entry as the bad-cluster sentinel (§4.6 BAD_CLUSTER).
    pub fn inject_bad_cluster(&mut self, cluster: u32) -> Result<()> {
        fat::broadcast_write(self.device.as_mut(), &self.bpb, &mut self.journal, cluster, self.bpb.variant.bad_marker())
    }

    /// Make `cluster` point at itself (§4.6 SELF_LOOP).
    pub fn inject_self_loop(&mut self, cluster: u32) -> Result<()> {
        fat::broadcast_write(self.device.as_mut(), &self.bpb, &mut self.journal, cluster, cluster)
    }

    /// Make `cluster` point at `target`, a cluster already claimed by another
    /// chain (§4.6 CLUSTER_INTERSECTION).
    pub fn inject_intersection(&mut self, cluster: u32, target: u32) -> Result<()> {
        fat::broadcast_write(self.device.as_mut(), &self.bpb, &mut self.journal, cluster, target)
    }

    /// Flush and truncate the journal, leaving the image clean (§5).
    pub fn close(mut self) -> Result<()> {
        self.journal.truncate()
    }
}
