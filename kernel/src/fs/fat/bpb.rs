//! BIOS Parameter Block parsing for FAT12/16/32 volumes.
//!
//! The BPB lives in the first sector of the partition (reserved sector 0)
//! immediately after the 3-byte jump instruction and the 8-byte OEM name.
//! Layout and offsets follow the Microsoft FAT white paper; FAT32 carries
//! an extended BPB (root cluster, FSInfo sector, ...) in place of the
//! FAT12/16 tail (drive number, extended signature, volume label).

use alloc::string::String;

use crate::error::{FsError, KernelError};

/// Every FAT variant uses 512-byte sectors in this implementation; larger
/// physical sector sizes are not handled (the original driver assumes the
/// same).
pub const SECTOR_SIZE: usize = 512;

/// Offset of the `0x55AA` boot sector signature.
const BIOS_MARK_OFFSET: usize = 510;
const BIOS_MARK: u16 = 0xAA55;

/// Which on-disk FAT flavor a mounted volume uses. Distinguished by cluster
/// count after the layout is computed, per the Microsoft FAT white paper
/// (not by the `FAT12`/`FAT16`/`FAT32` string in the BPB, which is only
/// ever a hint written by formatting tools).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatVariant {
    Fat12,
    Fat16,
    Fat32,
}

impl FatVariant {
    /// Cluster number marking a free/available FAT entry.
    pub const fn avail(self) -> u32 {
        0
    }

    /// First cluster number in the reserved range: readers must treat any
    /// cluster at or above this as end-of-chain.
    ///
    /// FAT32's reserved threshold is preserved exactly as the source
    /// driver wrote it (`>= 0xFFFFFFF0`), not the theoretically correct
    /// `(x & 0x0FFFFFFF) >= 0x0FFFFFF8` that masks the reserved top
    /// nibble first. Do not "fix" this without failing tests driving the
    /// change: it is a deliberate compatibility preservation, not an
    /// oversight.
    pub const fn reserved(self) -> u32 {
        match self {
            FatVariant::Fat12 => 0x0FF8,
            FatVariant::Fat16 => 0xFFF0,
            FatVariant::Fat32 => 0xFFFF_FFF0,
        }
    }

    /// Cluster value marking a bad (unusable) cluster.
    pub const fn bad(self) -> u32 {
        match self {
            FatVariant::Fat12 => 0x0FF7,
            FatVariant::Fat16 => 0xFFF7,
            FatVariant::Fat32 => 0xFFFF_FFF7,
        }
    }

    /// Canonical end-of-chain marker written when terminating a chain.
    pub const fn last(self) -> u32 {
        match self {
            FatVariant::Fat12 => 0x0FFF,
            FatVariant::Fat16 => 0xFFFF,
            FatVariant::Fat32 => 0xFFFF_FFFF,
        }
    }

    pub const fn is_end_of_chain(self, cluster: u32) -> bool {
        cluster == 0 || cluster >= self.reserved()
    }
}

/// Parsed BIOS Parameter Block, common fields plus the FAT32 extension.
#[derive(Debug, Clone)]
pub struct Bpb {
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub reserved_sector_count: u16,
    pub num_fats: u8,
    pub root_entry_count: u16,
    pub total_sectors_16: u16,
    pub fat_size_16: u16,
    pub total_sectors_32: u32,
    /// FAT32 only: sectors occupied by one copy of the FAT.
    pub fat_size_32: u32,
    /// FAT32 only: first cluster of the root directory (usually 2).
    pub root_cluster: u32,
    pub fs_type_label: String,
}

impl Bpb {
    /// Parse a 512-byte reserved sector 0 buffer and validate the BIOS
    /// mark. Does not yet decide FAT12 vs FAT16 vs FAT32 -- that requires
    /// the cluster count, computed once `FatLayout` knows `DataStart`.
    pub fn parse(sector0: &[u8]) -> Result<Self, KernelError> {
        if sector0.len() < SECTOR_SIZE {
            return Err(KernelError::FsError(FsError::CorruptFilesystem));
        }

        let mark = u16::from_le_bytes([
            sector0[BIOS_MARK_OFFSET],
            sector0[BIOS_MARK_OFFSET + 1],
        ]);
        if mark != BIOS_MARK {
            return Err(KernelError::FsError(FsError::CorruptFilesystem));
        }

        let bytes_per_sector = u16::from_le_bytes([sector0[11], sector0[12]]);
        let sectors_per_cluster = sector0[13];
        let reserved_sector_count = u16::from_le_bytes([sector0[14], sector0[15]]);
        let num_fats = sector0[16];
        let root_entry_count = u16::from_le_bytes([sector0[17], sector0[18]]);
        let total_sectors_16 = u16::from_le_bytes([sector0[19], sector0[20]]);
        let fat_size_16 = u16::from_le_bytes([sector0[22], sector0[23]]);
        let total_sectors_32 =
            u32::from_le_bytes([sector0[32], sector0[33], sector0[34], sector0[35]]);

        if bytes_per_sector == 0 || sectors_per_cluster == 0 || num_fats == 0 {
            return Err(KernelError::FsError(FsError::CorruptFilesystem));
        }

        let (fat_size_32, root_cluster, fs_type_label) = if fat_size_16 == 0 {
            // FAT32 extended BPB starts where FAT12/16's trailing fields
            // (drive number, signature, label) would otherwise sit.
            let fat_size_32 =
                u32::from_le_bytes([sector0[36], sector0[37], sector0[38], sector0[39]]);
            let root_cluster =
                u32::from_le_bytes([sector0[44], sector0[45], sector0[46], sector0[47]]);
            let label = decode_label(&sector0[82..90]);
            (fat_size_32, root_cluster, label)
        } else {
            let label = decode_label(&sector0[54..62]);
            (0, 0, label)
        };

        Ok(Self {
            bytes_per_sector,
            sectors_per_cluster,
            reserved_sector_count,
            num_fats,
            root_entry_count,
            total_sectors_16,
            fat_size_16,
            total_sectors_32,
            fat_size_32,
            root_cluster,
            fs_type_label,
        })
    }

    pub fn total_sectors(&self) -> u32 {
        if self.total_sectors_16 != 0 {
            self.total_sectors_16 as u32
        } else {
            self.total_sectors_32
        }
    }

    pub fn sectors_per_fat(&self) -> u32 {
        if self.fat_size_16 != 0 {
            self.fat_size_16 as u32
        } else {
            self.fat_size_32
        }
    }

    pub fn root_dir_sectors(&self) -> u32 {
        let bytes = self.root_entry_count as u32 * 32;
        (bytes + self.bytes_per_sector as u32 - 1) / self.bytes_per_sector as u32
    }

    /// Decide the FAT variant from the total cluster count, the rule the
    /// Microsoft white paper specifies (not the on-disk string label,
    /// which this parser only keeps around for mount-time validation).
    pub fn variant(&self, data_sectors: u32) -> FatVariant {
        let cluster_count = data_sectors / self.sectors_per_cluster as u32;
        if cluster_count < 4085 {
            FatVariant::Fat12
        } else if cluster_count < 65525 {
            FatVariant::Fat16
        } else {
            FatVariant::Fat32
        }
    }
}

fn decode_label(bytes: &[u8]) -> String {
    let mut s = String::new();
    for &b in bytes {
        if b == 0 {
            break;
        }
        s.push(b as char);
    }
    s
}

#[cfg(test)]
mod tests {
    use alloc::vec;

    use super::*;

    fn fat32_sector0() -> vec::Vec<u8> {
        let mut buf = vec![0u8; SECTOR_SIZE];
        buf[11..13].copy_from_slice(&512u16.to_le_bytes());
        buf[13] = 8; // sectors per cluster
        buf[14..16].copy_from_slice(&32u16.to_le_bytes()); // reserved
        buf[16] = 2; // num fats
        buf[17..19].copy_from_slice(&0u16.to_le_bytes()); // root entries = 0 (FAT32)
        buf[22..24].copy_from_slice(&0u16.to_le_bytes()); // fat_size_16 = 0 => FAT32
        buf[32..36].copy_from_slice(&200_000u32.to_le_bytes());
        buf[36..40].copy_from_slice(&1000u32.to_le_bytes()); // fat_size_32
        buf[44..48].copy_from_slice(&2u32.to_le_bytes()); // root cluster
        buf[82..87].copy_from_slice(b"FAT32");
        buf[510] = 0x55;
        buf[511] = 0xAA;
        buf
    }

    #[test]
    fn parses_fat32_bpb() {
        let sector = fat32_sector0();
        let bpb = Bpb::parse(&sector).unwrap();
        assert_eq!(bpb.bytes_per_sector, 512);
        assert_eq!(bpb.sectors_per_cluster, 8);
        assert_eq!(bpb.sectors_per_fat(), 1000);
        assert_eq!(bpb.root_cluster, 2);
        assert_eq!(bpb.fs_type_label, "FAT32");
    }

    #[test]
    fn rejects_missing_bios_mark() {
        let mut sector = fat32_sector0();
        sector[510] = 0;
        sector[511] = 0;
        assert!(Bpb::parse(&sector).is_err());
    }

    #[test]
    fn variant_thresholds() {
        let bpb = Bpb::parse(&fat32_sector0()).unwrap();
        assert_eq!(bpb.variant(100_000), FatVariant::Fat32);
        assert_eq!(bpb.variant(10_000), FatVariant::Fat16);
        assert_eq!(bpb.variant(4000), FatVariant::Fat12);
    }
}
