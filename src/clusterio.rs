//! ClusterIO (§4.4): read/write whole clusters. Reads go straight to the
//! device; writes are journaled so a crash mid-write is detectable on reopen.
//!
//! Grounded on the teacher's `block_cache.rs` block-granularity read/write,
//! generalized from fixed `BLOCK_SIZE` transfers to a whole `bytes_per_cluster`
//! payload, and on `original_source/defrag/file_system_processor.py`'s
//! `_write_cluster_`/`_read_cluster_` (the zero-pad-to-cluster-size and
//! single-event-per-write shape this module follows).

use crate::bpb::BiosParameterBlock;
use crate::device::BlockDevice;
use crate::journal::{Journal, JournalEvent, TransactionKind};
use crate::{EngineError, Result};

/// Read a whole cluster's payload (§4.4). `cluster` may be a FAT12/16 virtual
/// root cluster (negative) as well as a real data cluster.
pub fn read_cluster(
    device: &mut dyn BlockDevice,
    bpb: &BiosParameterBlock,
    cluster: i64,
) -> Result<Vec<u8>> {
    let addr = bpb.cluster_offset(cluster);
    let mut buf = vec![0u8; bpb.bytes_per_cluster() as usize];
    device.read_at(addr, &mut buf)?;
    Ok(buf)
}

/// Write a whole cluster's payload through the journal (§4.4). Zero-pads
/// short payloads to `bytes_per_cluster`; rejects payloads that don't fit.
pub fn write_cluster(
    device: &mut dyn BlockDevice,
    bpb: &BiosParameterBlock,
    journal: &mut Journal,
    cluster: i64,
    payload: &[u8],
) -> Result<()> {
    let bpc = bpb.bytes_per_cluster() as usize;
    if payload.len() > bpc {
        return Err(EngineError::InvalidValue { value: payload.len() as u32, bits: 0 });
    }
    let mut buf = vec![0u8; bpc];
    buf[..payload.len()].copy_from_slice(payload);

    journal.begin(TransactionKind::WriteCluster)?;
    journal.record(JournalEvent::new(cluster as u32, None, None))?;
    let addr = bpb.cluster_offset(cluster);
    device.write_at(addr, &buf)?;
    journal.close()?;
    Ok(())
}
