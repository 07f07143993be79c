pub mod cache;
pub mod chain;
pub mod geometry;
pub mod walker;
pub mod xtaf;

use crate::error::{Error, Result};
use crate::fsinfo::{BlockFlags, BlockView, Filesystem, WalkAction, WalkFlags};
use crate::image::{read_exact, ImageReader};
use chain::ChainResolver;
use geometry::{BootSector, FatFlavor, FatGeometry};
use walker::BlockWalker;

/// Number of sector-cache slots allocated at open time.
const CACHE_SLOTS: usize = 4;
/// Sectors per cache slot; must be >= 2 to hold a straddling FAT12 entry.
const SECTORS_PER_SLOT: u32 = 4;

/// An opened FAT (or XTAF) filesystem.
///
/// A fresh `ChainResolver` (and its sector cache) is built per call
/// rather than held long-lived, since it borrows `geometry` — cheap,
/// since the cache only gets warm within a single walk anyway.
#[derive(Debug)]
pub struct FatFilesystem<R: ImageReader> {
    reader: R,
    geometry: FatGeometry,
}

impl<R: ImageReader> FatFilesystem<R> {
    /// Open a FAT volume: locate and validate the boot sector (trying
    /// the backup at sector 6 if the primary fails), detect the flavor
    /// if not given explicitly, and derive the full geometry.
    pub fn open(reader: R, requested: Option<FatFlavor>) -> Result<Self> {
        let mut primary = [0u8; 512];
        let primary_ok = read_exact(&reader, 0, &mut primary).is_ok();

        let boot = if primary_ok {
            match BootSector::from_bytes(&primary) {
                Ok(b) if b.is_xtaf() || b.is_signature_valid() => Some(b),
                _ => None,
            }
        } else {
            None
        };

        let boot = match boot {
            Some(b) => b,
            None => {
                let mut backup = [0u8; 512];
                read_exact(&reader, 6 * 512, &mut backup)?;
                let b = BootSector::from_bytes(&backup)?;
                if !b.is_xtaf() && !b.is_signature_valid() {
                    return Err(Error::Magic(
                        "neither primary nor backup boot sector is valid".into(),
                    ));
                }
                b
            }
        };

        let flavor = if boot.is_xtaf() {
            match requested {
                Some(f @ FatFlavor::Xtaf { .. }) => f,
                _ => FatFlavor::Xtaf {
                    allow_size_table_fallback: false,
                },
            }
        } else {
            requested.filter(|f| !matches!(f, FatFlavor::Xtaf { .. }))
                .unwrap_or_else(|| geometry::detect_flavor(boot.data_cluster_count_hint()))
        };

        let geometry = match flavor {
            FatFlavor::Xtaf {
                allow_size_table_fallback: true,
            } => {
                let table = xtaf::known_partition_geometry(reader.size(), 0).ok_or_else(|| {
                    Error::Magic("XTAF image size not present in the known partition table".into())
                })?;
                FatGeometry::from_xtaf_table(&boot, table, reader.size())?
            }
            _ => FatGeometry::from_boot_sector(&boot, Some(flavor), reader.size())?,
        };

        Ok(Self { reader, geometry })
    }

    pub fn geometry(&self) -> &FatGeometry {
        &self.geometry
    }

    fn new_resolver(&self) -> ChainResolver<'_> {
        ChainResolver::new(&self.geometry, CACHE_SLOTS, SECTORS_PER_SLOT)
    }
}

impl BootSector {
    /// Cheap cluster-count estimate used only to pick a flavor before
    /// the full geometry (which itself needs a flavor to pick an
    /// end-of-chain mask) has been derived. Uses FAT32-style masking,
    /// which is flavor-agnostic for this purpose since it only feeds
    /// the three-way threshold comparison.
    fn data_cluster_count_hint(&self) -> u64 {
        let root_dir_sectors =
            (self.root_entry_count() as u64 * 32).div_ceil(self.bytes_per_sector() as u64);
        let first_data_sector =
            self.reserved_sectors() as u64 + self.num_fats() as u64 * self.fat_size();
        let total = self.total_sectors();
        let first_cluster_sector = first_data_sector + root_dir_sectors;
        if total <= first_cluster_sector || self.sectors_per_cluster() == 0 {
            return 0;
        }
        (total - first_cluster_sector) / self.sectors_per_cluster() as u64
    }
}

impl<R: ImageReader> Filesystem for FatFilesystem<R> {
    fn block_walk(
        &self,
        start: u64,
        end: u64,
        flags: WalkFlags,
        callback: &mut dyn FnMut(BlockView<'_>) -> Result<WalkAction>,
    ) -> Result<()> {
        let mut resolver = self.new_resolver();
        let walker = BlockWalker::new(&self.geometry);
        walker.block_walk(&self.reader, &mut resolver, start, end, flags, callback)
    }

    fn block_getflags(&self, addr: u64) -> Result<BlockFlags> {
        let mut resolver = self.new_resolver();
        let walker = BlockWalker::new(&self.geometry);
        walker.block_getflags(&self.reader, &mut resolver, addr)
    }

    fn first_block(&self) -> u64 {
        self.geometry.first_block
    }

    fn last_block(&self) -> u64 {
        self.geometry.last_block
    }

    fn last_block_act(&self) -> u64 {
        self.geometry.last_block_act
    }

    fn first_inum(&self) -> u64 {
        self.geometry.first_inum
    }

    fn last_inum(&self) -> u64 {
        self.geometry.last_inum
    }

    fn root_inum(&self) -> u64 {
        self.geometry.root_inum
    }
}
