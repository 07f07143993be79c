use crate::error::{Error, Result};

/// First sector of a FAT volume, BIOS Parameter Block fields plus the
/// FAT32 extended BPB. Byte-backed like the on-disk sector so accessors
/// are cheap offset reads; no field is copied out until asked for.
#[derive(Clone)]
pub struct BootSector {
    raw: Vec<u8>,
}

impl BootSector {
    /// XTAF magic, 4 ASCII bytes at offset 0 (Xbox 360 FAT variant).
    pub const XTAF_MAGIC: &'static [u8; 4] = b"XTAF";
    pub const VALID_SIGNATURE: u16 = 0xAA55;

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 512 {
            return Err(Error::Magic(format!(
                "boot sector too small: {} bytes",
                bytes.len()
            )));
        }
        Ok(Self {
            raw: bytes.to_vec(),
        })
    }

    pub fn is_xtaf(&self) -> bool {
        &self.raw[0..4] == Self::XTAF_MAGIC
    }

    pub fn bytes_per_sector(&self) -> u16 {
        u16::from_le_bytes([self.raw[11], self.raw[12]])
    }

    pub fn sectors_per_cluster(&self) -> u8 {
        self.raw[13]
    }

    pub fn reserved_sectors(&self) -> u16 {
        u16::from_le_bytes([self.raw[14], self.raw[15]])
    }

    pub fn num_fats(&self) -> u8 {
        self.raw[16]
    }

    pub fn root_entry_count(&self) -> u16 {
        u16::from_le_bytes([self.raw[17], self.raw[18]])
    }

    pub fn total_sectors_16(&self) -> u16 {
        u16::from_le_bytes([self.raw[19], self.raw[20]])
    }

    pub fn media_type(&self) -> u8 {
        self.raw[21]
    }

    pub fn fat_size_16(&self) -> u16 {
        u16::from_le_bytes([self.raw[22], self.raw[23]])
    }

    pub fn total_sectors_32(&self) -> u32 {
        u32::from_le_bytes([self.raw[32], self.raw[33], self.raw[34], self.raw[35]])
    }

    /// Sectors per FAT, FAT32 extended field (offset 36, 4 bytes). Zero
    /// on FAT12/16, where `fat_size_16` carries the value instead.
    pub fn fat_size_32(&self) -> u32 {
        u32::from_le_bytes([self.raw[36], self.raw[37], self.raw[38], self.raw[39]])
    }

    /// Root directory cluster, FAT32 only (offset 44, 4 bytes).
    pub fn root_cluster(&self) -> u32 {
        u32::from_le_bytes([self.raw[44], self.raw[45], self.raw[46], self.raw[47]])
    }

    pub fn fs_info_sector(&self) -> u16 {
        u16::from_le_bytes([self.raw[48], self.raw[49]])
    }

    pub fn backup_boot_sector(&self) -> u16 {
        u16::from_le_bytes([self.raw[50], self.raw[51]])
    }

    pub fn volume_id(&self) -> u32 {
        u32::from_le_bytes([self.raw[67], self.raw[68], self.raw[69], self.raw[70]])
    }

    pub fn volume_label(&self) -> &[u8] {
        &self.raw[71..82]
    }

    pub fn fs_type(&self) -> &[u8] {
        &self.raw[82..90]
    }

    pub fn boot_signature(&self) -> u16 {
        u16::from_le_bytes([self.raw[510], self.raw[511]])
    }

    pub fn is_signature_valid(&self) -> bool {
        self.boot_signature() == Self::VALID_SIGNATURE
    }

    /// Total sectors, preferring the 32-bit field when the 16-bit one
    /// is unused (the usual case for FAT32 and large FAT16 volumes).
    pub fn total_sectors(&self) -> u64 {
        let total16 = self.total_sectors_16();
        if total16 == 0 {
            self.total_sectors_32() as u64
        } else {
            total16 as u64
        }
    }

    /// Sectors per FAT, preferring the FAT32 extended field.
    pub fn fat_size(&self) -> u64 {
        let fat16 = self.fat_size_16();
        if fat16 == 0 {
            self.fat_size_32() as u64
        } else {
            fat16 as u64
        }
    }
}

impl std::fmt::Debug for BootSector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootSector")
            .field("bytes_per_sector", &self.bytes_per_sector())
            .field("sectors_per_cluster", &self.sectors_per_cluster())
            .field("reserved_sectors", &self.reserved_sectors())
            .field("num_fats", &self.num_fats())
            .field("total_sectors", &self.total_sectors())
            .field("fat_size", &self.fat_size())
            .finish()
    }
}

/// Which FAT variant a geometry was derived for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatFlavor {
    Fat12,
    Fat16,
    Fat32,
    /// Xbox 360 XTAF. `allow_size_table_fallback` gates the hard-coded
    /// per-image-size geometry table (see `fat::xtaf`) — it is never
    /// consulted unless the caller opts in, because it was a debugging
    /// stub in the original and not a trustworthy source of truth.
    Xtaf {
        allow_size_table_fallback: bool,
    },
}

/// First valid FAT inode (2 is reserved for the synthetic root).
pub const FIRST_INO: u64 = 3;
/// Synthetic root directory inode.
pub const ROOT_INO: u64 = 2;

/// Derived layout of a FAT volume: everything the cache, chain
/// resolver, and block walker need, computed once at open time.
#[derive(Debug, Clone)]
pub struct FatGeometry {
    pub flavor: FatFlavor,
    pub sector_size: u32,
    pub sector_shift: u32,
    pub cluster_size: u32,
    pub num_fats: u32,
    pub first_fat_sector: u64,
    pub sectors_per_fat: u64,
    pub first_data_sector: u64,
    pub first_cluster_sector: u64,
    pub cluster_count: u64,
    pub last_cluster: u64,
    pub end_of_chain_mask: u32,
    pub first_block: u64,
    pub last_block: u64,
    pub last_block_act: u64,
    pub first_inum: u64,
    pub last_inum: u64,
    pub root_inum: u64,
}

impl FatGeometry {
    /// Derive geometry from a validated boot sector. `image_size` is
    /// used only to clamp `last_block_act` when the declared volume
    /// outgrows the backing image (a truncated capture).
    pub fn from_boot_sector(
        boot: &BootSector,
        requested: Option<FatFlavor>,
        image_size: u64,
    ) -> Result<Self> {
        validate_boot_sector(boot)?;

        let sector_size = boot.bytes_per_sector() as u32;
        let sector_shift = sector_size.trailing_zeros();
        let cluster_size = boot.sectors_per_cluster() as u32;
        let num_fats = boot.num_fats() as u32;
        let first_fat_sector = boot.reserved_sectors() as u64;
        let sectors_per_fat = boot.fat_size();
        let root_entry_count = boot.root_entry_count() as u64;
        let root_dir_sectors =
            (root_entry_count * 32).div_ceil(sector_size as u64);

        let first_data_sector =
            first_fat_sector + num_fats as u64 * sectors_per_fat;
        let first_cluster_sector = first_data_sector + root_dir_sectors;

        let total_sectors = boot.total_sectors();
        if total_sectors < first_cluster_sector {
            return Err(Error::Magic(
                "declared total sectors do not reach the cluster area".into(),
            ));
        }
        let data_sectors = total_sectors - first_cluster_sector;
        let cluster_count = data_sectors / cluster_size as u64;
        let last_cluster = 1 + cluster_count;

        let flavor = match requested {
            Some(f) => f,
            None => detect_flavor(cluster_count),
        };
        let end_of_chain_mask: u32 = match flavor {
            FatFlavor::Fat12 => 0x0FFF,
            FatFlavor::Fat16 => 0xFFFF,
            FatFlavor::Fat32 | FatFlavor::Xtaf { .. } => 0x0FFFFFFF,
        };

        let last_block = total_sectors - 1;
        let last_block_act = (image_size / sector_size as u64)
            .saturating_sub(1)
            .min(last_block);

        let first_inum = FIRST_INO;
        let last_inum = FIRST_INO + cluster_count * dentries_per_cluster(cluster_size, sector_size);
        let root_inum = ROOT_INO;

        Ok(Self {
            flavor,
            sector_size,
            sector_shift,
            cluster_size,
            num_fats,
            first_fat_sector,
            sectors_per_fat,
            first_data_sector,
            first_cluster_sector,
            cluster_count,
            last_cluster,
            end_of_chain_mask,
            first_block: 0,
            last_block,
            last_block_act,
            first_inum,
            last_inum,
            root_inum,
        })
    }

    /// Derive geometry for an XTAF volume directly from a size-table
    /// entry rather than standard BPB offsets, which the XTAF boot
    /// sector does not use for layout fields. `cluster_size`/`num_fats`
    /// are still read off the boot sector: the source reads them
    /// through the same struct offsets it uses for classic FAT.
    pub fn from_xtaf_table(
        boot: &BootSector,
        table: crate::fat::xtaf::XtafTableGeometry,
        image_size: u64,
    ) -> Result<Self> {
        let cluster_size = boot.sectors_per_cluster() as u32;
        if cluster_size == 0 || !cluster_size.is_power_of_two() || cluster_size > 128 {
            return Err(Error::Magic(format!(
                "invalid sectors per cluster: {} (must be a power of two, 1-128)",
                cluster_size
            )));
        }
        let num_fats = boot.num_fats() as u32;
        if num_fats == 0 || num_fats > 8 {
            return Err(Error::Magic(format!(
                "invalid number of FATs: {} (must be 1-8)",
                num_fats
            )));
        }

        let sector_size = table.sector_size;
        let sector_shift = sector_size.trailing_zeros();
        let first_fat_sector = crate::fat::xtaf::XTAF_FIRST_FAT_SECT;
        let sectors_per_fat = table.sectors_per_fat;
        let first_cluster_sector = table.first_cluster_sector;
        let first_data_sector = first_cluster_sector;
        let cluster_count = table.cluster_count;
        let last_cluster = 1 + cluster_count;

        let flavor = FatFlavor::Xtaf {
            allow_size_table_fallback: true,
        };
        let end_of_chain_mask: u32 = 0x0FFFFFFF;

        let last_block = first_cluster_sector + cluster_size as u64 * cluster_count - 1;
        let last_block_act = (image_size / sector_size as u64)
            .saturating_sub(1)
            .min(last_block);

        let first_inum = FIRST_INO;
        let last_inum = FIRST_INO + cluster_count * dentries_per_cluster(cluster_size, sector_size);
        let root_inum = ROOT_INO;

        Ok(Self {
            flavor,
            sector_size,
            sector_shift,
            cluster_size,
            num_fats,
            first_fat_sector,
            sectors_per_fat,
            first_data_sector,
            first_cluster_sector,
            cluster_count,
            last_cluster,
            end_of_chain_mask,
            first_block: 0,
            last_block,
            last_block_act,
            first_inum,
            last_inum,
            root_inum,
        })
    }

    pub fn sector_to_cluster(&self, sector: u64) -> u64 {
        (sector - self.first_cluster_sector) / self.cluster_size as u64 + 2
    }

    pub fn cluster_to_sector(&self, cluster: u64) -> u64 {
        self.first_cluster_sector + (cluster - 2) * self.cluster_size as u64
    }
}

fn dentries_per_cluster(cluster_size: u32, sector_size: u32) -> u64 {
    (cluster_size as u64 * sector_size as u64) / 32
}

/// Three-way FAT12/FAT16/FAT32 detection by cluster count, the
/// Microsoft-documented rule. The original source's two-way split
/// (FAT16-or-FAT32 only) is not reproduced; see the design notes.
pub fn detect_flavor(cluster_count: u64) -> FatFlavor {
    if cluster_count < 4085 {
        FatFlavor::Fat12
    } else if cluster_count < 65525 {
        FatFlavor::Fat16
    } else {
        FatFlavor::Fat32
    }
}

/// Validate the boot sector fields that every FAT flavor must satisfy,
/// regardless of which flavor is ultimately selected.
pub fn validate_boot_sector(boot: &BootSector) -> Result<()> {
    if !boot.is_signature_valid() {
        return Err(Error::Magic(format!(
            "invalid boot signature: {:#06x} (expected 0xaa55)",
            boot.boot_signature()
        )));
    }

    let bps = boot.bytes_per_sector();
    if !matches!(bps, 512 | 1024 | 2048 | 4096) {
        return Err(Error::Magic(format!(
            "invalid bytes per sector: {} (must be 512, 1024, 2048, or 4096)",
            bps
        )));
    }

    let spc = boot.sectors_per_cluster();
    if spc == 0 || !spc.is_power_of_two() || spc > 128 {
        return Err(Error::Magic(format!(
            "invalid sectors per cluster: {} (must be a power of two, 1-128)",
            spc
        )));
    }

    if boot.reserved_sectors() == 0 {
        return Err(Error::Magic("reserved sector count is 0".into()));
    }

    let num_fats = boot.num_fats();
    if num_fats == 0 || num_fats > 8 {
        return Err(Error::Magic(format!(
            "invalid number of FATs: {} (must be 1-8)",
            num_fats
        )));
    }

    if boot.total_sectors() == 0 {
        return Err(Error::Magic("total sectors is 0".into()));
    }

    if boot.fat_size() == 0 {
        return Err(Error::Magic("FAT size is 0".into()));
    }

    Ok(())
}

/// Check whether two boot sectors (primary and backup) describe the
/// same volume, ignoring fields that legitimately differ (serial
/// number, volume label).
pub fn boot_sectors_match(primary: &BootSector, backup: &BootSector) -> bool {
    primary.bytes_per_sector() == backup.bytes_per_sector()
        && primary.sectors_per_cluster() == backup.sectors_per_cluster()
        && primary.reserved_sectors() == backup.reserved_sectors()
        && primary.num_fats() == backup.num_fats()
        && primary.total_sectors() == backup.total_sectors()
        && primary.fat_size() == backup.fat_size()
}
