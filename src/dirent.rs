//! DirParser (§4.7): decode 32-byte directory records, assemble long names,
//! and build fresh short-name records for newly created files.
//!
//! Grounded on the teacher's `entry.rs` (`ShortDirEntry`/`LongDirEntry` field
//! layout and offsets) generalized from its `#[repr(packed)]`/unsafe-cast
//! decoding to safe byte-slice reads, and on `original_source/service_classes.py`'s
//! `DirectoryEntry`/`LongName` (the long-name fragment accumulation and
//! short-entry timestamp packing) and `file_system_processor.py`'s
//! `_read_directory_` (record-by-record traversal and name assembly).

use chrono::{Datelike, Timelike, Utc};

use crate::codepage;
use crate::{
    read_le_u16, read_le_u32, write_le_u16, write_le_u32, ATTR_DIRECTORY, ATTR_LONG_NAME,
    ATTR_VOLUME_ID, DIRENT_SIZE, DIR_ENTRY_DOT, DIR_ENTRY_LAST_AND_UNUSED, DIR_ENTRY_UNUSED,
};
use crate::{EngineError, Result};

/// One decoded long-name continuation record (§4.7, §6).
#[derive(Debug, Clone)]
pub struct LongNameFragment {
    pub order: u8,
    pub name_pt1: [u8; 10],
    pub name_pt2: [u8; 12],
    pub name_pt3: [u8; 4],
}

impl LongNameFragment {
    fn decode(entry: &[u8; 32]) -> Self {
        let mut name_pt1 = [0u8; 10];
        name_pt1.copy_from_slice(&entry[1..11]);
        let mut name_pt2 = [0u8; 12];
        name_pt2.copy_from_slice(&entry[14..26]);
        let mut name_pt3 = [0u8; 4];
        name_pt3.copy_from_slice(&entry[28..32]);
        Self {
            order: entry[0],
            name_pt1,
            name_pt2,
            name_pt3,
        }
    }

    /// The UCS-2 code units carried by this fragment, in on-disk order.
    fn units(&self) -> Vec<u16> {
        let mut units = Vec::with_capacity(13);
        for chunk in self.name_pt1.chunks_exact(2) {
            units.push(u16::from_le_bytes([chunk[0], chunk[1]]));
        }
        for chunk in self.name_pt2.chunks_exact(2) {
            units.push(u16::from_le_bytes([chunk[0], chunk[1]]));
        }
        for chunk in self.name_pt3.chunks_exact(2) {
            units.push(u16::from_le_bytes([chunk[0], chunk[1]]));
        }
        units
    }
}

/// A decoded short-name record, with its long name already reassembled if one
/// preceded it (§4.7, §9).
#[derive(Debug, Clone)]
pub struct DecodedEntry {
    pub name: String,
    pub attrs: u8,
    pub first_cluster: u32,
    pub size: u32,
    pub parent_cluster_number: i64,
    pub parent_offset: u32,
}

impl DecodedEntry {
    pub fn is_directory(&self) -> bool {
        self.attrs & ATTR_DIRECTORY != 0
    }
}

/// Outcome of decoding one 32-byte slot (§4.7).
enum Record {
    EndOfDirectory,
    Deleted,
    DotEntry,
    VolumeId,
    Long(LongNameFragment),
    Short { name_raw: [u8; 11], attrs: u8, first_cluster: u32, size: u32 },
}

fn decode_record(entry: &[u8; 32]) -> Record {
    if entry[0] == DIR_ENTRY_LAST_AND_UNUSED {
        return Record::EndOfDirectory;
    }
    if entry[0] == DIR_ENTRY_UNUSED || entry[0] == DIR_ENTRY_DOT {
        return if entry[0] == DIR_ENTRY_UNUSED {
            Record::Deleted
        } else {
            Record::DotEntry
        };
    }

    let attrs = entry[11];
    if attrs & ATTR_LONG_NAME == ATTR_LONG_NAME {
        return Record::Long(LongNameFragment::decode(entry));
    }
    if attrs & ATTR_VOLUME_ID != 0 {
        return Record::VolumeId;
    }

    let mut name_raw = [0u8; 11];
    name_raw.copy_from_slice(&entry[0..11]);
    let hi = read_le_u16(&entry[20..22]) as u32;
    let lo = read_le_u16(&entry[26..28]) as u32;
    let size = read_le_u32(&entry[28..32]);
    Record::Short {
        name_raw,
        attrs,
        first_cluster: (hi << 16) | lo,
        size,
    }
}

/// Decode the 8.3 short name into a dotted string, CP866 (§4.7).
fn decode_short_name(name_raw: &[u8; 11]) -> String {
    let base = String::from_utf8(
        codepage::decode(&name_raw[0..8]).trim_end().as_bytes().to_vec(),
    )
    .unwrap_or_default();
    let ext = codepage::decode(&name_raw[8..11]).trim_end().to_string();
    if ext.is_empty() {
        base
    } else {
        format!("{}.{}", base, ext)
    }
}

/// Reassemble a long name from its fragments: stored in descending `order`,
/// concatenated in ascending order, trimmed of 0xFFFF padding and the
/// trailing NUL (§4.7, §9).
fn assemble_long_name(fragments: &mut [LongNameFragment]) -> String {
    fragments.sort_by_key(|f| f.order & 0x3F);
    let mut units = Vec::new();
    for fragment in fragments.iter() {
        units.extend(fragment.units());
    }
    while matches!(units.last(), Some(&0xFFFF)) {
        units.pop();
    }
    if matches!(units.last(), Some(&0x0000)) {
        units.pop();
    }
    String::from_utf16_lossy(&units)
}

/// DirParser (§4.7): read every live record in a directory's cluster chain.
/// Returns the decoded file/dir entries plus the slot count consumed
/// (`number_of_entries`, §3 invariant 4), which counts long-name fragments
/// and volume-id slots too, matching `original_source`'s counting.
pub fn read_directory(
    device: &mut dyn crate::device::BlockDevice,
    bpb: &crate::bpb::BiosParameterBlock,
    chain: &[i64],
) -> std::io::Result<(Vec<DecodedEntry>, u32)> {
    let bpc = bpb.bytes_per_cluster() as usize;
    let mut entries = Vec::new();
    let mut pending_long: Vec<LongNameFragment> = Vec::new();
    let mut number_of_entries = 0u32;

    'outer: for &cluster in chain {
        let addr = bpb.cluster_offset(cluster);
        let mut buf = vec![0u8; bpc];
        device.read_at(addr, &mut buf)?;

        for slot in 0..(bpc / DIRENT_SIZE) {
            let raw: &[u8; 32] = buf[slot * DIRENT_SIZE..(slot + 1) * DIRENT_SIZE]
                .try_into()
                .unwrap();

            match decode_record(raw) {
                Record::EndOfDirectory => break 'outer,
                Record::Deleted | Record::DotEntry => continue,
                Record::VolumeId => {
                    number_of_entries += 1;
                    pending_long.clear();
                }
                Record::Long(fragment) => {
                    number_of_entries += 1;
                    pending_long.push(fragment);
                }
                Record::Short { name_raw, attrs, first_cluster, size } => {
                    number_of_entries += 1;
                    let name = if pending_long.is_empty() {
                        decode_short_name(&name_raw)
                    } else {
                        let name = assemble_long_name(&mut pending_long);
                        pending_long.clear();
                        name
                    };
                    entries.push(DecodedEntry {
                        name,
                        attrs,
                        first_cluster,
                        size,
                        parent_cluster_number: cluster,
                        parent_offset: (slot * DIRENT_SIZE) as u32,
                    });
                }
            }
        }
    }

    Ok((entries, number_of_entries))
}

/// Short-entry construction for new files (§4.7): upper-case, CP866-encode,
/// pad to 11 bytes, pack attributes, stamp creation time in the documented
/// FAT DOS date/time bit layout (§9 Open Question decision — not the
/// `original_source`'s non-standard packing).
pub fn create_short_entry(
    name: &str,
    first_cluster: u32,
    is_directory: bool,
    size: u32,
) -> Result<[u8; 32]> {
    let upper = name.to_uppercase();
    let encoded = codepage::encode(&upper)
        .ok_or_else(|| EngineError::InvalidName(name.to_string()))?;
    if encoded.len() > 11 {
        return Err(EngineError::InvalidName(name.to_string()));
    }

    let mut out = [0u8; 32];
    out[0..11].fill(b' ');
    out[0..encoded.len()].copy_from_slice(&encoded);

    let attrs = if is_directory { ATTR_DIRECTORY } else { 0 };
    out[11] = attrs;

    let now = Utc::now();
    let time = dos_time(now.hour() as u8, now.minute() as u8, now.second() as u8);
    let date = dos_date(now.year(), now.month() as u8, now.day() as u8);

    write_le_u16(&mut out[14..16], time);
    write_le_u16(&mut out[16..18], date);
    write_le_u16(&mut out[18..20], date);
    write_le_u16(&mut out[20..22], (first_cluster >> 16) as u16);
    write_le_u16(&mut out[22..24], time);
    write_le_u16(&mut out[24..26], date);
    write_le_u16(&mut out[26..28], first_cluster as u16);
    write_le_u32(&mut out[28..32], size);

    Ok(out)
}

/// Pack `.`/`..` self/parent short-name records (§4.11), copying the
/// directory's own timestamp fields.
pub fn create_dot_entries(self_cluster: u32, parent_cluster: u32) -> [[u8; 32]; 2] {
    let mut dot = create_short_entry(".", self_cluster, true, 0).unwrap();
    let mut dotdot = create_short_entry("..", parent_cluster, true, 0).unwrap();
    dot[0..11].copy_from_slice(b".          ");
    dotdot[0..11].copy_from_slice(b"..         ");
    [dot, dotdot]
}

fn dos_time(hour: u8, minute: u8, second: u8) -> u16 {
    ((hour as u16) << 11) | ((minute as u16) << 5) | ((second as u16) / 2)
}

fn dos_date(year: i32, month: u8, day: u8) -> u16 {
    let years_since_1980 = (year - 1980).max(0) as u16;
    (years_since_1980 << 9) | ((month as u16) << 5) | (day as u16)
}
