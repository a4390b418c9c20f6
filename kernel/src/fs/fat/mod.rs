//! FAT12/16/32 filesystem driver.
//!
//! Mounts an existing FAT volume from a [`BlockDevice`] and formats new
//! ones. The on-disk layout (BPB, cluster chains, 8.3 + LFN directory
//! entries) is split across [`bpb`], [`cluster`], [`lfn`], and [`dirent`];
//! this module wires those pieces into the [`Filesystem`]/[`VfsNode`]
//! vtable the rest of the kernel talks to.

pub mod bpb;
pub mod cluster;
pub mod dirent;
pub mod lfn;

use alloc::{boxed::Box, string::String, sync::Arc, vec::Vec};

#[cfg(not(target_arch = "aarch64"))]
use spin::RwLock;

#[cfg(target_arch = "aarch64")]
use super::bare_lock::RwLock;
use super::{DirEntry, Filesystem, Metadata, NodeType, Permissions, VfsNode};
use crate::error::{FsError, KernelError};
use crate::fs::blockdev::BlockDevice;
use bpb::{Bpb, FatVariant, SECTOR_SIZE};
use cluster::FatLayout;
use dirent::{DirSlot, DirStream, ResolvedEntry, ShortEntry};

fn to_str_err(err: KernelError) -> &'static str {
    match err {
        KernelError::FsError(FsError::NotFound) => "Not found",
        KernelError::FsError(FsError::AlreadyExists) => "Already exists",
        KernelError::FsError(FsError::NotADirectory) => "Not a directory",
        KernelError::FsError(FsError::NotAFile) => "Not a file",
        KernelError::FsError(FsError::IsADirectory) => "Is a directory",
        KernelError::FsError(FsError::DirectoryNotEmpty) => "Directory not empty",
        KernelError::FsError(FsError::ReadOnly) => "Filesystem is read-only",
        KernelError::FsError(FsError::NoSpace) => "No space left on device",
        KernelError::FsError(FsError::CorruptFilesystem) => "Corrupt FAT filesystem",
        KernelError::FsError(FsError::NotSupported) => "Operation not supported",
        _ => "FAT filesystem error",
    }
}

/// Shared mutable state behind every node of one mounted FAT volume.
pub struct FatFsInner {
    device: Box<dyn BlockDevice>,
    layout: FatLayout,
}

impl FatFsInner {
    fn root_stream(&self) -> DirStream {
        match self.layout.variant {
            FatVariant::Fat32 => DirStream::Chain {
                first_cluster: self.layout.root_cluster,
            },
            FatVariant::Fat12 | FatVariant::Fat16 => DirStream::Root {
                start_sector: self.layout.root_dir_start(),
                sector_count: self.layout.root_dir_sectors,
            },
        }
    }

    fn stream_for(&self, short: &ShortEntry) -> DirStream {
        DirStream::Chain {
            first_cluster: short.first_cluster,
        }
    }

    fn metadata_for(&self, short: &ShortEntry) -> Metadata {
        Metadata {
            node_type: if short.is_directory() {
                NodeType::Directory
            } else {
                NodeType::File
            },
            size: short.file_size as usize,
            permissions: if short.attrs & dirent::ATTR_READ_ONLY != 0 {
                Permissions::read_only()
            } else {
                Permissions::default()
            },
            uid: 0,
            gid: 0,
            created: 0,
            modified: 0,
            accessed: 0,
        }
    }

    fn read_file(
        &self,
        short: &ShortEntry,
        offset: usize,
        buffer: &mut [u8],
    ) -> Result<usize, KernelError> {
        let size = short.file_size as usize;
        if offset >= size || short.first_cluster == 0 {
            return Ok(0);
        }
        let to_read = buffer.len().min(size - offset);
        let bytes_per_cluster = self.layout.bytes_per_cluster();

        let mut cluster = cluster::nth_cluster(
            self.device.as_ref(),
            &self.layout,
            short.first_cluster,
            offset / bytes_per_cluster,
        )?;
        let mut within = offset % bytes_per_cluster;
        let mut done = 0;
        let mut chunk = alloc::vec![0u8; bytes_per_cluster];

        while done < to_read {
            cluster::read_cluster(self.device.as_ref(), &self.layout, cluster, &mut chunk)?;
            let take = (bytes_per_cluster - within).min(to_read - done);
            buffer[done..done + take].copy_from_slice(&chunk[within..within + take]);
            done += take;
            within = 0;
            if done < to_read {
                cluster = match cluster::next_cluster_in_chain(
                    self.device.as_ref(),
                    &self.layout,
                    cluster,
                )? {
                    Some(next) => next,
                    None => break,
                };
            }
        }
        Ok(done)
    }

    /// Write `data` at `offset`, extending the chain and the recorded
    /// file size as needed, then persist the updated short entry.
    fn write_file(
        &mut self,
        slot: DirSlot,
        mut short: ShortEntry,
        offset: usize,
        data: &[u8],
    ) -> Result<usize, KernelError> {
        let bytes_per_cluster = self.layout.bytes_per_cluster();

        if short.first_cluster == 0 {
            short.first_cluster = cluster::allocate_cluster(self.device.as_mut(), &self.layout)?;
        }

        let target_cluster_index = offset / bytes_per_cluster;
        let mut cluster = short.first_cluster;
        let mut index = 0;
        while index < target_cluster_index {
            cluster = match cluster::next_cluster_in_chain(
                self.device.as_ref(),
                &self.layout,
                cluster,
            )? {
                Some(next) => next,
                None => cluster::chain_new_cluster(self.device.as_mut(), &self.layout, cluster)?,
            };
            index += 1;
        }

        let mut within = offset % bytes_per_cluster;
        let mut written = 0;
        let mut chunk = alloc::vec![0u8; bytes_per_cluster];
        while written < data.len() {
            cluster::read_cluster(self.device.as_ref(), &self.layout, cluster, &mut chunk)?;
            let take = (bytes_per_cluster - within).min(data.len() - written);
            chunk[within..within + take].copy_from_slice(&data[written..written + take]);
            cluster::write_cluster(self.device.as_mut(), &self.layout, cluster, &chunk)?;
            written += take;
            within = 0;

            if written < data.len() {
                cluster = match cluster::next_cluster_in_chain(
                    self.device.as_ref(),
                    &self.layout,
                    cluster,
                )? {
                    Some(next) => next,
                    None => {
                        cluster::chain_new_cluster(self.device.as_mut(), &self.layout, cluster)?
                    }
                };
            }
        }

        let new_size = (offset + written).max(short.file_size as usize);
        short.file_size = new_size as u32;
        dirent::update_entry(self.device.as_mut(), &self.layout, slot, short)?;
        Ok(written)
    }

    fn truncate_file(
        &mut self,
        slot: DirSlot,
        mut short: ShortEntry,
        size: usize,
    ) -> Result<(), KernelError> {
        if size == 0 {
            if short.first_cluster != 0 {
                cluster::free_chain(self.device.as_mut(), &self.layout, short.first_cluster)?;
            }
            short.first_cluster = 0;
        } else if (size as u32) < short.file_size && short.first_cluster != 0 {
            let bytes_per_cluster = self.layout.bytes_per_cluster();
            let keep_clusters = size.div_ceil(bytes_per_cluster).max(1);
            let last_kept = cluster::nth_cluster(
                self.device.as_ref(),
                &self.layout,
                short.first_cluster,
                keep_clusters - 1,
            )?;
            if let Some(next) =
                cluster::next_cluster_in_chain(self.device.as_ref(), &self.layout, last_kept)?
            {
                cluster::free_chain(self.device.as_mut(), &self.layout, next)?;
                cluster::write_fat_entry(
                    self.device.as_mut(),
                    &self.layout,
                    last_kept,
                    self.layout.variant.last(),
                )?;
            }
        }
        short.file_size = size as u32;
        dirent::update_entry(self.device.as_mut(), &self.layout, slot, short)
    }

    fn write_dot_entries(&mut self, cluster: u32, parent_cluster: u32) -> Result<(), KernelError> {
        let mut dot_name = [b' '; 11];
        dot_name[0] = b'.';
        let dot = ShortEntry {
            short_name: dot_name,
            attrs: dirent::ATTR_DIRECTORY,
            first_cluster: cluster,
            file_size: 0,
        };
        let mut dotdot_name = [b' '; 11];
        dotdot_name[0] = b'.';
        dotdot_name[1] = b'.';
        let dotdot = ShortEntry {
            short_name: dotdot_name,
            attrs: dirent::ATTR_DIRECTORY,
            first_cluster: parent_cluster,
            file_size: 0,
        };

        let stream = DirStream::Chain {
            first_cluster: cluster,
        };
        dirent::write_raw_entry(self.device.as_mut(), &self.layout, stream, 0, &dot)?;
        dirent::write_raw_entry(
            self.device.as_mut(),
            &self.layout,
            stream,
            32,
            &dotdot,
        )
    }
}

/// Which directory entry, if any, backs a node: the volume root has
/// none, every other node is located by the slot its short entry lives
/// at. The short entry itself is never cached here -- it is re-read on
/// every operation so a write or truncate through one handle is
/// immediately visible through another.
enum FatNodeKind {
    Root,
    Entry { name: String, slot: DirSlot },
}

pub struct FatNode {
    fs: Arc<RwLock<FatFsInner>>,
    kind: FatNodeKind,
}

impl FatNode {
    fn root(fs: Arc<RwLock<FatFsInner>>) -> Self {
        Self {
            fs,
            kind: FatNodeKind::Root,
        }
    }

    fn from_entry(fs: Arc<RwLock<FatFsInner>>, entry: ResolvedEntry) -> Self {
        Self {
            fs,
            kind: FatNodeKind::Entry {
                name: entry.name,
                slot: entry.slot,
            },
        }
    }

    fn current_short(&self) -> Result<ShortEntry, &'static str> {
        match &self.kind {
            FatNodeKind::Root => Err("Is a directory"),
            FatNodeKind::Entry { slot, .. } => {
                let inner = self.fs.read();
                dirent::read_entry_at(inner.device.as_ref(), &inner.layout, *slot)
                    .map_err(to_str_err)
            }
        }
    }

    fn directory_stream(&self) -> Result<DirStream, &'static str> {
        match &self.kind {
            FatNodeKind::Root => Ok(self.fs.read().root_stream()),
            FatNodeKind::Entry { .. } => {
                let short = self.current_short()?;
                if !short.is_directory() {
                    return Err(to_str_err(KernelError::FsError(FsError::NotADirectory)));
                }
                Ok(self.fs.read().stream_for(&short))
            }
        }
    }
}

impl VfsNode for FatNode {
    fn node_type(&self) -> NodeType {
        match &self.kind {
            FatNodeKind::Root => NodeType::Directory,
            FatNodeKind::Entry { .. } => match self.current_short() {
                Ok(short) if short.is_directory() => NodeType::Directory,
                _ => NodeType::File,
            },
        }
    }

    fn read(&self, offset: usize, buffer: &mut [u8]) -> Result<usize, &'static str> {
        match &self.kind {
            FatNodeKind::Root => Err("Is a directory"),
            FatNodeKind::Entry { .. } => {
                let short = self.current_short()?;
                if short.is_directory() {
                    return Err("Is a directory");
                }
                let inner = self.fs.read();
                inner.read_file(&short, offset, buffer).map_err(to_str_err)
            }
        }
    }

    fn write(&self, offset: usize, data: &[u8]) -> Result<usize, &'static str> {
        match &self.kind {
            FatNodeKind::Root => Err("Is a directory"),
            FatNodeKind::Entry { slot, .. } => {
                let short = self.current_short()?;
                if short.is_directory() {
                    return Err("Is a directory");
                }
                let mut inner = self.fs.write();
                inner
                    .write_file(*slot, short, offset, data)
                    .map_err(to_str_err)
            }
        }
    }

    fn metadata(&self) -> Result<Metadata, &'static str> {
        match &self.kind {
            FatNodeKind::Root => Ok(Metadata {
                node_type: NodeType::Directory,
                size: 0,
                permissions: Permissions::default(),
                uid: 0,
                gid: 0,
                created: 0,
                modified: 0,
                accessed: 0,
            }),
            FatNodeKind::Entry { .. } => {
                let short = self.current_short()?;
                Ok(self.fs.read().metadata_for(&short))
            }
        }
    }

    fn readdir(&self) -> Result<Vec<DirEntry>, &'static str> {
        let stream = self.directory_stream()?;
        let inner = self.fs.read();
        let entries = dirent::list_entries(inner.device.as_ref(), &inner.layout, stream)
            .map_err(to_str_err)?;
        Ok(entries
            .into_iter()
            .map(|e| DirEntry {
                name: e.name,
                node_type: if e.short.is_directory() {
                    NodeType::Directory
                } else {
                    NodeType::File
                },
                inode: e.short.first_cluster as u64,
            })
            .collect())
    }

    fn lookup(&self, name: &str) -> Result<Arc<dyn VfsNode>, &'static str> {
        let stream = self.directory_stream()?;
        let inner = self.fs.read();
        let entry = dirent::locate_entry(inner.device.as_ref(), &inner.layout, stream, name)
            .map_err(to_str_err)?;
        drop(inner);
        Ok(Arc::new(FatNode::from_entry(self.fs.clone(), entry)))
    }

    fn create(
        &self,
        name: &str,
        _permissions: Permissions,
    ) -> Result<Arc<dyn VfsNode>, &'static str> {
        let stream = self.directory_stream()?;
        let mut inner = self.fs.write();
        let entry = dirent::create_entry(
            inner.device.as_mut(),
            &inner.layout,
            stream,
            name,
            dirent::ATTR_ARCHIVE,
            0,
        )
        .map_err(to_str_err)?;
        drop(inner);
        Ok(Arc::new(FatNode::from_entry(self.fs.clone(), entry)))
    }

    fn mkdir(
        &self,
        name: &str,
        _permissions: Permissions,
    ) -> Result<Arc<dyn VfsNode>, &'static str> {
        let stream = self.directory_stream()?;
        let mut inner = self.fs.write();

        let parent_cluster = match stream {
            DirStream::Chain { first_cluster } => first_cluster,
            DirStream::Root { .. } => 0,
        };
        let new_cluster =
            cluster::allocate_cluster(inner.device.as_mut(), &inner.layout).map_err(to_str_err)?;
        inner
            .write_dot_entries(new_cluster, parent_cluster)
            .map_err(to_str_err)?;

        let entry = dirent::create_entry(
            inner.device.as_mut(),
            &inner.layout,
            stream,
            name,
            dirent::ATTR_DIRECTORY,
            new_cluster,
        )
        .map_err(to_str_err)?;
        drop(inner);
        Ok(Arc::new(FatNode::from_entry(self.fs.clone(), entry)))
    }

    fn unlink(&self, name: &str) -> Result<(), &'static str> {
        let stream = self.directory_stream()?;
        let mut inner = self.fs.write();
        let entry = dirent::locate_entry(inner.device.as_ref(), &inner.layout, stream, name)
            .map_err(to_str_err)?;

        if entry.short.is_directory() {
            let child_stream = inner.stream_for(&entry.short);
            let children =
                dirent::list_entries(inner.device.as_ref(), &inner.layout, child_stream)
                    .map_err(to_str_err)?;
            if !children.is_empty() {
                return Err(to_str_err(KernelError::FsError(FsError::DirectoryNotEmpty)));
            }
        }

        if entry.short.first_cluster != 0 {
            cluster::free_chain(inner.device.as_mut(), &inner.layout, entry.short.first_cluster)
                .map_err(to_str_err)?;
        }
        dirent::delete_entry(inner.device.as_mut(), &inner.layout, &entry).map_err(to_str_err)
    }

    fn truncate(&self, size: usize) -> Result<(), &'static str> {
        match &self.kind {
            FatNodeKind::Root => Err("Is a directory"),
            FatNodeKind::Entry { slot, .. } => {
                let short = self.current_short()?;
                if short.is_directory() {
                    return Err("Is a directory");
                }
                let mut inner = self.fs.write();
                inner.truncate_file(*slot, short, size).map_err(to_str_err)
            }
        }
    }
}

/// A mounted FAT volume.
pub struct FatFileSystem {
    inner: Arc<RwLock<FatFsInner>>,
}

impl Filesystem for FatFileSystem {
    fn root(&self) -> Arc<dyn VfsNode> {
        Arc::new(FatNode::root(self.inner.clone()))
    }

    fn name(&self) -> &str {
        "fat"
    }

    fn is_readonly(&self) -> bool {
        false
    }

    fn sync(&self) -> Result<(), &'static str> {
        self.inner.write().device.flush().map_err(to_str_err)
    }
}

/// Mount an existing FAT12/16/32 volume from `device`.
pub fn mount(mut device: Box<dyn BlockDevice>) -> Result<FatFileSystem, KernelError> {
    let mut sector0 = [0u8; SECTOR_SIZE];
    device.read_blocks(0, &mut sector0)?;
    let bpb = Bpb::parse(&sector0)?;
    let layout = FatLayout::from_bpb(&bpb)?;

    Ok(FatFileSystem {
        inner: Arc::new(RwLock::new(FatFsInner { device, layout })),
    })
}

/// Format `device` as a fresh FAT16 volume and mount it.
///
/// Sizing follows the same fixed-point loop `mkfs.fat` uses: grow the
/// FAT until it is large enough to address every cluster the resulting
/// data region can hold.
pub fn format(mut device: Box<dyn BlockDevice>) -> Result<FatFileSystem, KernelError> {
    if device.block_size() != SECTOR_SIZE {
        return Err(KernelError::FsError(FsError::NotSupported));
    }

    let total_sectors = device.block_count() as u32;
    let sectors_per_cluster: u8 = 4;
    let num_fats: u32 = 2;
    let root_entry_count: u16 = 512;
    let root_dir_sectors = (root_entry_count as u32 * 32).div_ceil(SECTOR_SIZE as u32);
    let reserved_sectors: u32 = 1;

    let mut fat_size_16: u32 = 1;
    for _ in 0..32 {
        let data_sectors = total_sectors
            .checked_sub(reserved_sectors + num_fats * fat_size_16 + root_dir_sectors)
            .ok_or(KernelError::FsError(FsError::NoSpace))?;
        let cluster_count = data_sectors / sectors_per_cluster as u32;
        let needed_bytes = (cluster_count + 2) * 2;
        let needed_sectors = needed_bytes.div_ceil(SECTOR_SIZE as u32);
        if needed_sectors <= fat_size_16 {
            break;
        }
        fat_size_16 = needed_sectors;
    }

    let mut sector0 = [0u8; SECTOR_SIZE];
    sector0[0] = 0xEB;
    sector0[1] = 0x3C;
    sector0[2] = 0x90;
    sector0[3..11].copy_from_slice(b"EXOS    ");
    sector0[11..13].copy_from_slice(&(SECTOR_SIZE as u16).to_le_bytes());
    sector0[13] = sectors_per_cluster;
    sector0[14..16].copy_from_slice(&(reserved_sectors as u16).to_le_bytes());
    sector0[16] = num_fats as u8;
    sector0[17..19].copy_from_slice(&root_entry_count.to_le_bytes());
    if total_sectors < 0x10000 {
        sector0[19..21].copy_from_slice(&(total_sectors as u16).to_le_bytes());
    } else {
        sector0[32..36].copy_from_slice(&total_sectors.to_le_bytes());
    }
    sector0[21] = 0xF8; // fixed disk media descriptor
    sector0[22..24].copy_from_slice(&(fat_size_16 as u16).to_le_bytes());
    sector0[36] = 0x80; // drive number
    sector0[38] = 0x29; // extended boot signature
    sector0[43..54].copy_from_slice(b"NO NAME    ");
    sector0[54..62].copy_from_slice(b"FAT16   ");
    sector0[510] = 0x55;
    sector0[511] = 0xAA;
    device.write_blocks(0, &sector0)?;

    let bpb = Bpb::parse(&sector0)?;
    let layout = FatLayout::from_bpb(&bpb)?;

    let zero_fat_sector = [0u8; SECTOR_SIZE];
    for copy in 0..layout.num_fats {
        let start = layout.fat_start + copy * layout.sectors_per_fat;
        for s in 0..layout.sectors_per_fat {
            device.write_blocks((start + s) as u64, &zero_fat_sector)?;
        }
    }
    // First two FAT entries are reserved; clusters 0 and 1 are never
    // allocated to files. Entry 0 conventionally mirrors the media
    // descriptor byte, entry 1 is marked end-of-chain.
    cluster::write_fat_entry(device.as_mut(), &layout, 0, 0xFFFFFF00 | 0xF8)?;
    cluster::write_fat_entry(device.as_mut(), &layout, 1, layout.variant.last())?;

    let zero_root_sector = [0u8; SECTOR_SIZE];
    for s in 0..layout.root_dir_sectors {
        device.write_blocks((layout.root_dir_start() + s) as u64, &zero_root_sector)?;
    }

    Ok(FatFileSystem {
        inner: Arc::new(RwLock::new(FatFsInner { device, layout })),
    })
}

/// Helper used by [`super::Vfs::mount_by_type`]: format a fresh
/// RAM-backed FAT16 volume, the same way `ramfs` hands back a
/// self-contained in-memory instance.
pub fn new_ram_backed(block_count: u64) -> Result<FatFileSystem, KernelError> {
    let device: Box<dyn BlockDevice> = Box::new(crate::fs::blockdev::RamBlockDevice::new(
        String::from("fatram"),
        SECTOR_SIZE,
        block_count,
    ));
    format(device)
}

#[cfg(test)]
mod tests {
    use alloc::string::String;

    use super::*;
    use crate::fs::blockdev::RamBlockDevice;

    fn mounted_fs() -> FatFileSystem {
        let device: Box<dyn BlockDevice> =
            Box::new(RamBlockDevice::new(String::from("test"), SECTOR_SIZE, 4096));
        format(device).unwrap()
    }

    #[test]
    fn format_then_mount_round_trips() {
        let fs = mounted_fs();
        assert_eq!(fs.name(), "fat");
        let root = fs.root();
        assert_eq!(root.readdir().unwrap().len(), 0);
    }

    #[test]
    fn create_read_write_file() {
        let fs = mounted_fs();
        let root = fs.root();
        let file = root.create("hello.txt", Permissions::default()).unwrap();
        let written = file.write(0, b"hello fat").unwrap();
        assert_eq!(written, 9);

        let looked_up = root.lookup("hello.txt").unwrap();
        let mut buf = [0u8; 9];
        let read = looked_up.read(0, &mut buf).unwrap();
        assert_eq!(read, 9);
        assert_eq!(&buf, b"hello fat");
    }

    #[test]
    fn write_spanning_multiple_clusters() {
        let fs = mounted_fs();
        let root = fs.root();
        let file = root.create("big.bin", Permissions::default()).unwrap();
        let data = alloc::vec![0x7Au8; 8192];
        let written = file.write(0, &data).unwrap();
        assert_eq!(written, data.len());

        let looked_up = root.lookup("big.bin").unwrap();
        let mut buf = alloc::vec![0u8; data.len()];
        let read = looked_up.read(0, &mut buf).unwrap();
        assert_eq!(read, data.len());
        assert_eq!(buf, data);
    }

    #[test]
    fn mkdir_then_create_nested_file() {
        let fs = mounted_fs();
        let root = fs.root();
        let subdir = root.mkdir("sub", Permissions::default()).unwrap();
        assert_eq!(subdir.node_type(), NodeType::Directory);

        subdir
            .create("nested.txt", Permissions::default())
            .unwrap();
        let entries = subdir.readdir().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "nested.txt");
    }

    #[test]
    fn unlink_removes_file() {
        let fs = mounted_fs();
        let root = fs.root();
        root.create("temp.txt", Permissions::default()).unwrap();
        root.unlink("temp.txt").unwrap();
        assert!(root.lookup("temp.txt").is_err());
    }

    #[test]
    fn unlink_refuses_nonempty_directory() {
        let fs = mounted_fs();
        let root = fs.root();
        let subdir = root.mkdir("full", Permissions::default()).unwrap();
        subdir.create("f.txt", Permissions::default()).unwrap();
        assert!(root.unlink("full").is_err());
    }

    #[test]
    fn truncate_shrinks_file() {
        let fs = mounted_fs();
        let root = fs.root();
        let file = root.create("shrink.bin", Permissions::default()).unwrap();
        file.write(0, &alloc::vec![1u8; 8192]).unwrap();
        file.truncate(10).unwrap();
        assert_eq!(file.metadata().unwrap().size, 10);
    }
}
