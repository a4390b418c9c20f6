//! Short (8.3) directory entries, directory streams, and name
//! resolution/creation.
//!
//! A FAT directory is just a byte stream of 32-byte slots: the fixed
//! root region for FAT12/16, or an ordinary cluster chain for FAT32 and
//! every subdirectory. [`DirStream`] hides that difference so the rest
//! of this module can enumerate, locate, and create entries without
//! caring which kind of directory it is looking at.

use alloc::{string::String, vec::Vec};

use super::cluster::{self, FatLayout};
use super::lfn::{self, LfnEntry, ATTR_LFN, LAST_LFN_ORDINAL_BIT};
use crate::error::{FsError, KernelError};
use crate::fs::blockdev::BlockDevice;

pub const ATTR_READ_ONLY: u8 = 0x01;
pub const ATTR_HIDDEN: u8 = 0x02;
pub const ATTR_SYSTEM: u8 = 0x04;
pub const ATTR_VOLUME_ID: u8 = 0x08;
pub const ATTR_DIRECTORY: u8 = 0x10;
pub const ATTR_ARCHIVE: u8 = 0x20;

const ENTRY_SIZE: usize = 32;
/// First byte of an entry that has never been used; also terminates the
/// scan for free slots at the end of a directory.
const ENTRY_FREE: u8 = 0x00;
/// First byte of a deleted entry (the slot is reusable but the scan must
/// continue past it).
const ENTRY_DELETED: u8 = 0xE5;

/// Which kind of directory a [`DirStream`] is reading: the fixed root
/// region (FAT12/16 only) or an ordinary cluster chain.
#[derive(Debug, Clone, Copy)]
pub enum DirStream {
    Root { start_sector: u32, sector_count: u32 },
    Chain { first_cluster: u32 },
}

/// A located 32-byte slot, enough information to read, rewrite, or free
/// it later without re-walking the directory.
#[derive(Debug, Clone, Copy)]
pub struct DirSlot {
    pub stream: DirStream,
    pub offset: u32,
}

/// Parsed short directory entry.
#[derive(Debug, Clone, Copy)]
pub struct ShortEntry {
    pub short_name: [u8; 11],
    pub attrs: u8,
    pub first_cluster: u32,
    pub file_size: u32,
}

impl ShortEntry {
    pub fn is_directory(&self) -> bool {
        self.attrs & ATTR_DIRECTORY != 0
    }

    pub fn parse(buf: &[u8; 32]) -> Self {
        let mut short_name = [0u8; 11];
        short_name.copy_from_slice(&buf[0..11]);
        let attrs = buf[11];
        let cluster_hi = u16::from_le_bytes([buf[20], buf[21]]) as u32;
        let cluster_lo = u16::from_le_bytes([buf[26], buf[27]]) as u32;
        let file_size = u32::from_le_bytes([buf[28], buf[29], buf[30], buf[31]]);
        Self {
            short_name,
            attrs,
            first_cluster: (cluster_hi << 16) | cluster_lo,
            file_size,
        }
    }

    pub fn to_bytes(self) -> [u8; 32] {
        let mut buf = [0u8; 32];
        buf[0..11].copy_from_slice(&self.short_name);
        buf[11] = self.attrs;
        let cluster_hi = ((self.first_cluster >> 16) & 0xFFFF) as u16;
        let cluster_lo = (self.first_cluster & 0xFFFF) as u16;
        buf[20..22].copy_from_slice(&cluster_hi.to_le_bytes());
        buf[26..28].copy_from_slice(&cluster_lo.to_le_bytes());
        buf[28..32].copy_from_slice(&self.file_size.to_le_bytes());
        buf
    }

    pub fn checksum(&self) -> u8 {
        lfn::name_checksum(&self.short_name)
    }
}

/// A fully resolved directory entry: the short entry plus its long name
/// (if any) and where its short entry physically lives.
#[derive(Debug, Clone)]
pub struct ResolvedEntry {
    pub name: String,
    pub short: ShortEntry,
    pub slot: DirSlot,
}

fn first_byte_marks_end(buf: &[u8]) -> bool {
    buf[0] == ENTRY_FREE
}

fn first_byte_marks_deleted(buf: &[u8]) -> bool {
    buf[0] == ENTRY_DELETED
}

/// Read the full byte contents of a directory stream into memory. FAT
/// directories stay small enough in practice (this driver does not
/// support directories spanning more than a few hundred clusters'
/// worth of entries without this becoming wasteful, matching the
/// original driver's whole-directory-buffer approach).
fn read_stream_bytes(
    device: &dyn BlockDevice,
    layout: &FatLayout,
    stream: DirStream,
) -> Result<Vec<u8>, KernelError> {
    match stream {
        DirStream::Root {
            start_sector,
            sector_count,
        } => {
            let mut buf = alloc::vec![0u8; sector_count as usize * layout.bytes_per_sector as usize];
            device.read_blocks(start_sector as u64, &mut buf)?;
            Ok(buf)
        }
        DirStream::Chain { first_cluster } => {
            let mut buf = Vec::new();
            let mut cluster = first_cluster;
            loop {
                let mut chunk = alloc::vec![0u8; layout.bytes_per_cluster()];
                cluster::read_cluster(device, layout, cluster, &mut chunk)?;
                buf.extend_from_slice(&chunk);
                match cluster::next_cluster_in_chain(device, layout, cluster)? {
                    Some(next) => cluster = next,
                    None => break,
                }
            }
            Ok(buf)
        }
    }
}

/// Read exactly one 32-byte slot at `offset` within the stream.
fn read_slot(
    device: &dyn BlockDevice,
    layout: &FatLayout,
    stream: DirStream,
    offset: u32,
) -> Result<[u8; 32], KernelError> {
    match stream {
        DirStream::Root { start_sector, .. } => {
            let sector = start_sector as u64 + offset as u64 / layout.bytes_per_sector as u64;
            let within = (offset as u64 % layout.bytes_per_sector as u64) as usize;
            let mut sector_buf = alloc::vec![0u8; layout.bytes_per_sector as usize];
            device.read_blocks(sector, &mut sector_buf)?;
            let mut entry = [0u8; ENTRY_SIZE];
            entry.copy_from_slice(&sector_buf[within..within + ENTRY_SIZE]);
            Ok(entry)
        }
        DirStream::Chain { first_cluster } => {
            let cluster_index = offset as usize / layout.bytes_per_cluster();
            let within = offset as usize % layout.bytes_per_cluster();
            let cluster = cluster::nth_cluster(device, layout, first_cluster, cluster_index)?;
            let mut chunk = alloc::vec![0u8; layout.bytes_per_cluster()];
            cluster::read_cluster(device, layout, cluster, &mut chunk)?;
            let mut entry = [0u8; ENTRY_SIZE];
            entry.copy_from_slice(&chunk[within..within + ENTRY_SIZE]);
            Ok(entry)
        }
    }
}

/// Re-read the short entry at a previously located slot, picking up any
/// size/cluster updates a write or truncate made since it was located.
pub fn read_entry_at(
    device: &dyn BlockDevice,
    layout: &FatLayout,
    slot: DirSlot,
) -> Result<ShortEntry, KernelError> {
    let raw = read_slot(device, layout, slot.stream, slot.offset)?;
    Ok(ShortEntry::parse(&raw))
}

/// Rewrite exactly one 32-byte slot at `offset` within the stream.
fn write_slot(
    device: &mut dyn BlockDevice,
    layout: &FatLayout,
    stream: DirStream,
    offset: u32,
    entry: &[u8; 32],
) -> Result<(), KernelError> {
    match stream {
        DirStream::Root { start_sector, .. } => {
            let sector = start_sector as u64 + offset as u64 / layout.bytes_per_sector as u64;
            let within = (offset as u64 % layout.bytes_per_sector as u64) as usize;
            let mut sector_buf = alloc::vec![0u8; layout.bytes_per_sector as usize];
            device.read_blocks(sector, &mut sector_buf)?;
            sector_buf[within..within + ENTRY_SIZE].copy_from_slice(entry);
            device.write_blocks(sector, &sector_buf)
        }
        DirStream::Chain { first_cluster } => {
            let cluster_index = offset as usize / layout.bytes_per_cluster();
            let within = offset as usize % layout.bytes_per_cluster();
            let cluster = cluster::nth_cluster(device, layout, first_cluster, cluster_index)?;
            let mut chunk = alloc::vec![0u8; layout.bytes_per_cluster()];
            cluster::read_cluster(device, layout, cluster, &mut chunk)?;
            chunk[within..within + ENTRY_SIZE].copy_from_slice(entry);
            cluster::write_cluster(device, layout, cluster, &chunk)
        }
    }
}

/// Grow a chained directory by one cluster, returning the number of
/// additional 32-byte slots now available. Fixed-root directories
/// cannot grow.
fn extend_directory(
    device: &mut dyn BlockDevice,
    layout: &FatLayout,
    stream: DirStream,
) -> Result<u32, KernelError> {
    match stream {
        DirStream::Root { .. } => Err(KernelError::FsError(FsError::NoSpace)),
        DirStream::Chain { first_cluster } => {
            let tail = cluster::last_cluster_in_chain(device, layout, first_cluster)?;
            cluster::chain_new_cluster(device, layout, tail)?;
            Ok((layout.bytes_per_cluster() / ENTRY_SIZE) as u32)
        }
    }
}

/// List every live entry (skipping deleted slots, volume labels, and
/// orphaned LFN fragments) in a directory stream.
pub fn list_entries(
    device: &dyn BlockDevice,
    layout: &FatLayout,
    stream: DirStream,
) -> Result<Vec<ResolvedEntry>, KernelError> {
    let bytes = read_stream_bytes(device, layout, stream)?;
    let mut entries = Vec::new();
    let mut pending_lfn: Vec<LfnEntry> = Vec::new();

    for (slot_index, chunk) in bytes.chunks_exact(ENTRY_SIZE).enumerate() {
        let mut raw = [0u8; ENTRY_SIZE];
        raw.copy_from_slice(chunk);

        if first_byte_marks_end(&raw) {
            break;
        }
        if first_byte_marks_deleted(&raw) {
            pending_lfn.clear();
            continue;
        }

        let attrs = raw[11];
        if attrs == ATTR_LFN {
            pending_lfn.push(LfnEntry::from_bytes(&raw));
            continue;
        }
        if attrs & ATTR_VOLUME_ID != 0 {
            pending_lfn.clear();
            continue;
        }

        let short = ShortEntry::parse(&raw);
        if short.short_name[0] == b'.' {
            // "." and ".." bookkeeping entries carry no useful name.
            pending_lfn.clear();
            continue;
        }

        let long_name = if !pending_lfn.is_empty() && validate_lfn_chain(&pending_lfn, &short) {
            Some(lfn::decode_lfn_entries(&pending_lfn))
        } else {
            None
        };
        pending_lfn.clear();

        let name = long_name.unwrap_or_else(|| short_name_to_display(&short.short_name));
        entries.push(ResolvedEntry {
            name,
            short,
            slot: DirSlot {
                stream,
                offset: (slot_index * ENTRY_SIZE) as u32,
            },
        });
    }

    Ok(entries)
}

/// An LFN run is only trusted if every fragment's checksum matches the
/// short entry it precedes and the ordinal sequence is unbroken.
fn validate_lfn_chain(fragments: &[LfnEntry], short: &ShortEntry) -> bool {
    let checksum = short.checksum();
    let expected_count = fragments.len();
    for (i, fragment) in fragments.iter().enumerate() {
        if fragment.checksum != checksum {
            return false;
        }
        let ordinal = fragment.ordinal & !LAST_LFN_ORDINAL_BIT;
        if ordinal as usize != expected_count - i {
            return false;
        }
    }
    fragments[0].ordinal & LAST_LFN_ORDINAL_BIT != 0
}

/// Case-insensitive lookup of `name` within a directory stream.
pub fn locate_entry(
    device: &dyn BlockDevice,
    layout: &FatLayout,
    stream: DirStream,
    name: &str,
) -> Result<ResolvedEntry, KernelError> {
    list_entries(device, layout, stream)?
        .into_iter()
        .find(|e| e.name.eq_ignore_ascii_case(name))
        .ok_or(KernelError::FsError(FsError::NotFound))
}

/// Create a new entry named `name` in `stream` with the given
/// attributes and first cluster (0 for an empty file; callers create
/// the first cluster themselves for directories before calling this).
pub fn create_entry(
    device: &mut dyn BlockDevice,
    layout: &FatLayout,
    stream: DirStream,
    name: &str,
    attrs: u8,
    first_cluster: u32,
) -> Result<ResolvedEntry, KernelError> {
    if list_entries(device, layout, stream)?
        .iter()
        .any(|e| e.name.eq_ignore_ascii_case(name))
    {
        return Err(KernelError::FsError(FsError::AlreadyExists));
    }

    let short_name = build_short_name(device, layout, stream, name)?;
    let checksum = lfn::name_checksum(&short_name);
    let needs_lfn = !is_plain_8dot3(name, &short_name);
    let lfn_entries = if needs_lfn {
        lfn::build_lfn_entries(name, checksum)
    } else {
        Vec::new()
    };
    let required_slots = lfn_entries.len() + 1;

    let offsets = allocate_free_slots(device, layout, stream, required_slots)?;

    for (slot_offset, fragment) in offsets.iter().zip(lfn_entries.iter()) {
        write_slot(device, layout, stream, *slot_offset, &fragment.to_bytes())?;
    }

    let short = ShortEntry {
        short_name,
        attrs,
        first_cluster,
        file_size: 0,
    };
    let short_offset = offsets[lfn_entries.len()];
    write_slot(device, layout, stream, short_offset, &short.to_bytes())?;

    Ok(ResolvedEntry {
        name: String::from(name),
        short,
        slot: DirSlot {
            stream,
            offset: short_offset,
        },
    })
}

/// Find `count` contiguous free slots, extending the directory if it is
/// a cluster chain and none are found.
fn allocate_free_slots(
    device: &mut dyn BlockDevice,
    layout: &FatLayout,
    stream: DirStream,
    count: usize,
) -> Result<Vec<u32>, KernelError> {
    loop {
        let bytes = read_stream_bytes(device, layout, stream)?;
        let slot_count = bytes.len() / ENTRY_SIZE;
        let mut run_start: Option<usize> = None;
        let mut run_len = 0usize;

        for slot_index in 0..slot_count {
            let chunk = &bytes[slot_index * ENTRY_SIZE..(slot_index + 1) * ENTRY_SIZE];
            let free = first_byte_marks_end(chunk) || first_byte_marks_deleted(chunk);
            if free {
                if run_start.is_none() {
                    run_start = Some(slot_index);
                }
                run_len += 1;
                if run_len == count {
                    let start = run_start.unwrap();
                    return Ok((start..start + count)
                        .map(|i| (i * ENTRY_SIZE) as u32)
                        .collect());
                }
            } else {
                run_start = None;
                run_len = 0;
            }
        }

        extend_directory(device, layout, stream)?;
    }
}

/// Mark an entry's short-name slot (and any LFN fragments immediately
/// preceding it) as deleted.
pub fn delete_entry(
    device: &mut dyn BlockDevice,
    layout: &FatLayout,
    entry: &ResolvedEntry,
) -> Result<(), KernelError> {
    let bytes = read_stream_bytes(device, layout, entry.slot.stream)?;
    let short_slot = entry.slot.offset as usize / ENTRY_SIZE;

    let mut deleted_buf = [0u8; ENTRY_SIZE];
    deleted_buf[0] = ENTRY_DELETED;
    write_slot(device, layout, entry.slot.stream, entry.slot.offset, &deleted_buf)?;

    // Walk backwards over any LFN fragments that belong to this entry.
    let checksum = entry.short.checksum();
    let mut slot_index = short_slot;
    while slot_index > 0 {
        slot_index -= 1;
        let chunk = &bytes[slot_index * ENTRY_SIZE..(slot_index + 1) * ENTRY_SIZE];
        if chunk[11] != ATTR_LFN {
            break;
        }
        let mut raw = [0u8; ENTRY_SIZE];
        raw.copy_from_slice(chunk);
        if LfnEntry::from_bytes(&raw).checksum != checksum {
            break;
        }
        write_slot(
            device,
            layout,
            entry.slot.stream,
            (slot_index * ENTRY_SIZE) as u32,
            &deleted_buf,
        )?;
    }
    Ok(())
}

/// Write a fully-formed short entry at a known offset, bypassing name
/// resolution. Used for the `.`/`..` bookkeeping entries a new
/// directory cluster needs, which are never looked up by name.
pub fn write_raw_entry(
    device: &mut dyn BlockDevice,
    layout: &FatLayout,
    stream: DirStream,
    offset: u32,
    entry: &ShortEntry,
) -> Result<(), KernelError> {
    write_slot(device, layout, stream, offset, &entry.to_bytes())
}

/// Overwrite an entry's short-entry slot with updated size/cluster
/// fields, used after a write grows a file.
pub fn update_entry(
    device: &mut dyn BlockDevice,
    layout: &FatLayout,
    slot: DirSlot,
    short: ShortEntry,
) -> Result<(), KernelError> {
    write_slot(device, layout, slot.stream, slot.offset, &short.to_bytes())
}

/// Convert an 11-byte padded short name to its conventional `NAME.EXT`
/// display form.
pub fn short_name_to_display(short_name: &[u8; 11]) -> String {
    let base = trim_trailing_spaces(&short_name[0..8]);
    let ext = trim_trailing_spaces(&short_name[8..11]);
    let mut out = String::new();
    for &b in base {
        out.push((b as char).to_ascii_lowercase());
    }
    if !ext.is_empty() {
        out.push('.');
        for &b in ext {
            out.push((b as char).to_ascii_lowercase());
        }
    }
    out
}

fn trim_trailing_spaces(bytes: &[u8]) -> &[u8] {
    let mut end = bytes.len();
    while end > 0 && bytes[end - 1] == b' ' {
        end -= 1;
    }
    &bytes[..end]
}

/// True if `name` already exactly matches the 8.3 form `short_name`
/// decodes to, meaning no LFN fragments are needed.
fn is_plain_8dot3(name: &str, short_name: &[u8; 11]) -> bool {
    short_name_to_display(short_name).eq_ignore_ascii_case(name) && name.len() <= 12
}

/// Derive an 11-byte padded short name for `name`, generating a
/// `~1`..`~9` numeric tail if a plain uppercased truncation collides
/// with an existing entry (the standard Windows convention).
fn build_short_name(
    device: &dyn BlockDevice,
    layout: &FatLayout,
    stream: DirStream,
    name: &str,
) -> Result<[u8; 11], KernelError> {
    let (base_in, ext_in) = match name.rsplit_once('.') {
        Some((b, e)) => (b, e),
        None => (name, ""),
    };
    let base_upper = sanitize_component(base_in, 8);
    let ext_upper = sanitize_component(ext_in, 3);

    let existing = list_entries(device, layout, stream)?;
    let collides = |candidate: &[u8; 11]| existing.iter().any(|e| &e.short.short_name == candidate);

    let mut plain = [b' '; 11];
    plain[0..base_upper.len()].copy_from_slice(&base_upper);
    plain[8..8 + ext_upper.len()].copy_from_slice(&ext_upper);

    if !collides(&plain) {
        return Ok(plain);
    }

    for suffix in 1u32..=9 {
        let mut candidate = [b' '; 11];
        let tail = alloc::format!("~{}", suffix);
        let keep = 8 - tail.len();
        let truncated_len = base_upper.len().min(keep);
        candidate[0..truncated_len].copy_from_slice(&base_upper[0..truncated_len]);
        candidate[truncated_len..truncated_len + tail.len()].copy_from_slice(tail.as_bytes());
        candidate[8..8 + ext_upper.len()].copy_from_slice(&ext_upper);
        if !collides(&candidate) {
            return Ok(candidate);
        }
    }

    Err(KernelError::FsError(FsError::AlreadyExists))
}

fn sanitize_component(component: &str, max_len: usize) -> Vec<u8> {
    component
        .bytes()
        .filter(|b| !b.is_ascii_whitespace() && *b != b'.')
        .map(|b| b.to_ascii_uppercase())
        .take(max_len)
        .collect()
}

#[cfg(test)]
mod tests {
    use alloc::string::String;

    use super::*;
    use crate::fs::blockdev::RamBlockDevice;
    use crate::fs::fat::bpb::{FatVariant, SECTOR_SIZE};

    fn test_layout() -> FatLayout {
        FatLayout {
            variant: FatVariant::Fat16,
            bytes_per_sector: SECTOR_SIZE as u32,
            sectors_per_cluster: 1,
            reserved_sectors: 1,
            num_fats: 2,
            sectors_per_fat: 4,
            root_dir_sectors: 4,
            fat_start: 1,
            data_start: 1 + 2 * 4 + 4,
            root_cluster: 0,
            total_clusters: 64,
        }
    }

    fn test_device(layout: &FatLayout) -> RamBlockDevice {
        let total = layout.data_start + layout.total_clusters * layout.sectors_per_cluster;
        RamBlockDevice::new(String::from("test"), SECTOR_SIZE, total as u64 + 16)
    }

    fn root_stream(layout: &FatLayout) -> DirStream {
        DirStream::Root {
            start_sector: layout.root_dir_start(),
            sector_count: layout.root_dir_sectors,
        }
    }

    #[test]
    fn short_name_round_trip() {
        let name = *b"HELLO   TXT";
        let display = short_name_to_display(&name);
        assert_eq!(display, "hello.txt");
    }

    #[test]
    fn create_and_locate_short_name_file() {
        let layout = test_layout();
        let mut device = test_device(&layout);
        let stream = root_stream(&layout);

        create_entry(&mut device, &layout, stream, "readme.txt", ATTR_ARCHIVE, 0).unwrap();
        let found = locate_entry(&device, &layout, stream, "README.TXT").unwrap();
        assert_eq!(found.name, "readme.txt");
        assert_eq!(found.short.attrs, ATTR_ARCHIVE);
    }

    #[test]
    fn create_and_locate_long_name_file() {
        let layout = test_layout();
        let mut device = test_device(&layout);
        let stream = root_stream(&layout);

        let long_name = "a rather long descriptive filename.markdown";
        create_entry(&mut device, &layout, stream, long_name, ATTR_ARCHIVE, 0).unwrap();

        let found = locate_entry(&device, &layout, stream, long_name).unwrap();
        assert_eq!(found.name, long_name);
    }

    #[test]
    fn duplicate_create_fails() {
        let layout = test_layout();
        let mut device = test_device(&layout);
        let stream = root_stream(&layout);

        create_entry(&mut device, &layout, stream, "dup.txt", ATTR_ARCHIVE, 0).unwrap();
        let err = create_entry(&mut device, &layout, stream, "DUP.TXT", ATTR_ARCHIVE, 0);
        assert!(err.is_err());
    }

    #[test]
    fn delete_removes_entry() {
        let layout = test_layout();
        let mut device = test_device(&layout);
        let stream = root_stream(&layout);

        create_entry(&mut device, &layout, stream, "gone.txt", ATTR_ARCHIVE, 0).unwrap();
        let found = locate_entry(&device, &layout, stream, "gone.txt").unwrap();
        delete_entry(&mut device, &layout, &found).unwrap();
        assert!(locate_entry(&device, &layout, stream, "gone.txt").is_err());
    }

    #[test]
    fn collision_gets_numeric_tail() {
        let layout = test_layout();
        let mut device = test_device(&layout);
        let stream = root_stream(&layout);

        create_entry(&mut device, &layout, stream, "same name one.txt", ATTR_ARCHIVE, 0).unwrap();
        create_entry(&mut device, &layout, stream, "same name two.txt", ATTR_ARCHIVE, 0).unwrap();

        let entries = list_entries(&device, &layout, stream).unwrap();
        let short_names: Vec<_> = entries.iter().map(|e| e.short.short_name).collect();
        assert_ne!(short_names[0], short_names[1]);
    }
}
