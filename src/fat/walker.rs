use crate::error::{Error, Result};
use crate::fat::chain::{ChainResolver, FatEntryValue};
use crate::fat::geometry::FatGeometry;
use crate::fsinfo::{BlockFlags, BlockView, WalkAction, WalkFlags};
use crate::image::{read_exact, ImageReader};

/// Burst size used while scanning the pre-data (boot sector + FAT +
/// static root directory) region, matching the source's fixed 8-sector
/// read granularity for that phase.
const PRE_DATA_BURST_SECTORS: u64 = 8;

pub struct BlockWalker<'a> {
    geometry: &'a FatGeometry,
}

impl<'a> BlockWalker<'a> {
    pub fn new(geometry: &'a FatGeometry) -> Self {
        Self { geometry }
    }

    /// True iff the cluster containing `sector` has a non-zero FAT
    /// successor (i.e. is allocated).
    pub fn is_cluster_allocated(
        &self,
        reader: &dyn ImageReader,
        resolver: &mut ChainResolver<'_>,
        cluster: u64,
    ) -> Result<bool> {
        Ok(!matches!(
            resolver.get_fat(reader, cluster)?,
            FatEntryValue::Free
        ))
    }

    pub fn is_sector_allocated(
        &self,
        reader: &dyn ImageReader,
        resolver: &mut ChainResolver<'_>,
        sector: u64,
    ) -> Result<bool> {
        if sector < self.geometry.first_cluster_sector {
            return Ok(true);
        }
        let data_end = self.geometry.first_cluster_sector
            + self.geometry.cluster_size as u64 * self.geometry.cluster_count;
        if sector >= data_end {
            return Ok(false);
        }
        let cluster = self.geometry.sector_to_cluster(sector);
        self.is_cluster_allocated(reader, resolver, cluster)
    }

    pub fn block_getflags(
        &self,
        reader: &dyn ImageReader,
        resolver: &mut ChainResolver<'_>,
        sector: u64,
    ) -> Result<BlockFlags> {
        if sector < self.geometry.first_data_sector {
            return Ok(BlockFlags::META | BlockFlags::ALLOC);
        }
        if sector < self.geometry.first_cluster_sector {
            return Ok(BlockFlags::CONT | BlockFlags::ALLOC);
        }
        let allocated = self.is_sector_allocated(reader, resolver, sector)?;
        let mut flags = BlockFlags::CONT;
        flags |= if allocated {
            BlockFlags::ALLOC
        } else {
            BlockFlags::UNALLOC
        };
        Ok(flags)
    }

    /// Walk `[start, end]`, delivering matching sectors to `callback`
    /// in ascending order. Phase A covers the pre-data region in fixed
    /// 8-sector bursts; phase B reads one cluster at a time and clips
    /// the final cluster to the requested end address.
    pub fn block_walk(
        &self,
        reader: &dyn ImageReader,
        resolver: &mut ChainResolver<'_>,
        start: u64,
        end: u64,
        flags: WalkFlags,
        callback: &mut dyn FnMut(BlockView<'_>) -> Result<WalkAction>,
    ) -> Result<()> {
        if start > end || end > self.geometry.last_block_act {
            return Err(Error::WalkRange {
                start,
                end,
                first: self.geometry.first_block,
                last: self.geometry.last_block_act,
            });
        }
        let flags = flags.normalized();

        if start < self.geometry.first_cluster_sector && flags.contains(WalkFlags::ALLOC) {
            if self.walk_pre_data(reader, start, end, flags, callback)? == WalkAction::Stop {
                return Ok(());
            }
        }

        if end >= self.geometry.first_cluster_sector {
            let data_start = start.max(self.geometry.first_cluster_sector);
            self.walk_clusters(reader, resolver, data_start, end, flags, callback)?;
        }

        Ok(())
    }

    fn walk_pre_data(
        &self,
        reader: &dyn ImageReader,
        start: u64,
        end: u64,
        flags: WalkFlags,
        callback: &mut dyn FnMut(BlockView<'_>) -> Result<WalkAction>,
    ) -> Result<WalkAction> {
        let region_end = end.min(self.geometry.first_cluster_sector - 1);
        let mut burst_start = start - (start % PRE_DATA_BURST_SECTORS);

        while burst_start <= region_end {
            let burst_len = PRE_DATA_BURST_SECTORS.min(region_end + 1 - burst_start);
            let mut buf = vec![0u8; (burst_len * self.geometry.sector_size as u64) as usize];
            read_exact(
                reader,
                burst_start * self.geometry.sector_size as u64,
                &mut buf,
            )?;

            for i in 0..burst_len {
                let addr = burst_start + i;
                if addr < start || addr > end {
                    continue;
                }
                let classification = if addr < self.geometry.first_data_sector {
                    BlockFlags::META
                } else {
                    BlockFlags::CONT
                };
                if !flags_accept(flags, classification) {
                    continue;
                }
                let sector_size = self.geometry.sector_size as usize;
                let start_off = (i as usize) * sector_size;
                let view = BlockView {
                    addr,
                    flags: classification | BlockFlags::ALLOC | BlockFlags::RAW,
                    data: &buf[start_off..start_off + sector_size],
                };
                if callback(view)? == WalkAction::Stop {
                    return Ok(WalkAction::Stop);
                }
            }
            burst_start += PRE_DATA_BURST_SECTORS;
        }
        Ok(WalkAction::Continue)
    }

    fn walk_clusters(
        &self,
        reader: &dyn ImageReader,
        resolver: &mut ChainResolver<'_>,
        start: u64,
        end: u64,
        flags: WalkFlags,
        callback: &mut dyn FnMut(BlockView<'_>) -> Result<WalkAction>,
    ) -> Result<WalkAction> {
        let cluster_size = self.geometry.cluster_size as u64;
        let sector_size = self.geometry.sector_size as u64;
        let start_cluster = self.geometry.sector_to_cluster(start);
        let mut cluster_sector = self.geometry.cluster_to_sector(start_cluster);

        while cluster_sector <= end {
            let allocated = self.is_sector_allocated(reader, resolver, cluster_sector)?;
            let classification = BlockFlags::CONT
                | if allocated {
                    BlockFlags::ALLOC
                } else {
                    BlockFlags::UNALLOC
                };

            if flags_accept(flags, classification) {
                let cluster_end = (cluster_sector + cluster_size - 1).min(end);
                let read_sectors = cluster_end - cluster_sector + 1;
                let mut buf = vec![0u8; (read_sectors * sector_size) as usize];
                read_exact(reader, cluster_sector * sector_size, &mut buf)?;

                for i in 0..read_sectors {
                    let addr = cluster_sector + i;
                    if addr < start {
                        continue;
                    }
                    let off = (i * sector_size) as usize;
                    let view = BlockView {
                        addr,
                        flags: classification | BlockFlags::RAW,
                        data: &buf[off..off + sector_size as usize],
                    };
                    if callback(view)? == WalkAction::Stop {
                        return Ok(WalkAction::Stop);
                    }
                }
            }
            cluster_sector += cluster_size;
        }
        Ok(WalkAction::Continue)
    }
}

fn flags_accept(flags: WalkFlags, classification: BlockFlags) -> bool {
    let alloc_ok = (classification.contains(BlockFlags::ALLOC) && flags.contains(WalkFlags::ALLOC))
        || (classification.contains(BlockFlags::UNALLOC) && flags.contains(WalkFlags::UNALLOC))
        || !classification.intersects(BlockFlags::ALLOC | BlockFlags::UNALLOC);
    let role_ok = (classification.contains(BlockFlags::META) && flags.contains(WalkFlags::META))
        || (classification.contains(BlockFlags::CONT) && flags.contains(WalkFlags::CONT))
        || !classification.intersects(BlockFlags::META | BlockFlags::CONT);
    alloc_ok && role_ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fat::geometry::{BootSector, FatFlavor};
    use crate::image::MemoryImage;

    /// 8-sector pre-data region (1 reserved + 7-sector FAT), 16-sector
    /// static root directory, 100 data sectors in 4-sector clusters.
    fn fat16_with_data() -> (FatGeometry, MemoryImage) {
        let mut boot = [0u8; 512];
        boot[11..13].copy_from_slice(&512u16.to_le_bytes());
        boot[13] = 4; // sectors per cluster
        boot[14..16].copy_from_slice(&1u16.to_le_bytes()); // reserved
        boot[16] = 1; // num fats
        boot[17..19].copy_from_slice(&256u16.to_le_bytes()); // root entries -> 16 sectors
        boot[19..21].copy_from_slice(&124u16.to_le_bytes()); // total sectors: 8 + 16 + 100
        boot[21] = 0xF8;
        boot[22..24].copy_from_slice(&7u16.to_le_bytes()); // 7-sector FAT
        boot[510] = 0x55;
        boot[511] = 0xAA;
        let boot_sector = BootSector::from_bytes(&boot).unwrap();
        let geom =
            FatGeometry::from_boot_sector(&boot_sector, Some(FatFlavor::Fat16), 124 * 512).unwrap();
        let data = vec![0u8; 124 * 512];
        (geom, MemoryImage::new(data))
    }

    #[test]
    fn test_block_walk_pre_data_phase_returns_meta_sectors() {
        let (geom, img) = fat16_with_data();
        let walker = BlockWalker::new(&geom);
        let mut resolver = ChainResolver::new(&geom, 2, 2);

        let mut seen = Vec::new();
        walker
            .block_walk(
                &img,
                &mut resolver,
                0,
                23,
                WalkFlags::META,
                &mut |view| {
                    seen.push(view.addr);
                    assert!(view.flags.contains(BlockFlags::META));
                    assert!(view.flags.contains(BlockFlags::ALLOC));
                    Ok(WalkAction::Continue)
                },
            )
            .unwrap();

        assert_eq!(seen, (0..=7).collect::<Vec<_>>());
    }

    #[test]
    fn test_block_walk_cluster_tail_is_clipped() {
        let (geom, img) = fat16_with_data();
        let walker = BlockWalker::new(&geom);
        let mut resolver = ChainResolver::new(&geom, 2, 2);

        let first_cluster_sector = geom.first_cluster_sector;
        let end = first_cluster_sector + 2; // 3 sectors into a wider walk
        let mut seen = Vec::new();
        walker
            .block_walk(
                &img,
                &mut resolver,
                first_cluster_sector,
                end,
                WalkFlags::empty(),
                &mut |view| {
                    seen.push(view.addr);
                    Ok(WalkAction::Continue)
                },
            )
            .unwrap();

        assert_eq!(seen, vec![first_cluster_sector, first_cluster_sector + 1, first_cluster_sector + 2]);
    }

    /// 125 total sectors: 24-sector pre-data region + 101 data sectors,
    /// which only fills 25 whole 4-sector clusters (100 sectors),
    /// leaving sector 124 as a non-clustered tail with no FAT entry.
    fn fat16_with_non_clustered_tail() -> (FatGeometry, MemoryImage) {
        let mut boot = [0u8; 512];
        boot[11..13].copy_from_slice(&512u16.to_le_bytes());
        boot[13] = 4;
        boot[14..16].copy_from_slice(&1u16.to_le_bytes());
        boot[16] = 1;
        boot[17..19].copy_from_slice(&256u16.to_le_bytes());
        boot[19..21].copy_from_slice(&125u16.to_le_bytes());
        boot[21] = 0xF8;
        boot[22..24].copy_from_slice(&7u16.to_le_bytes());
        boot[510] = 0x55;
        boot[511] = 0xAA;
        let boot_sector = BootSector::from_bytes(&boot).unwrap();
        let geom =
            FatGeometry::from_boot_sector(&boot_sector, Some(FatFlavor::Fat16), 125 * 512).unwrap();
        (geom, MemoryImage::new(vec![0u8; 125 * 512]))
    }

    #[test]
    fn test_block_walk_reaches_non_clustered_tail_without_error() {
        let (geom, img) = fat16_with_non_clustered_tail();
        let tail_sector = geom.first_cluster_sector + geom.cluster_size as u64 * geom.cluster_count;
        assert_eq!(tail_sector, geom.last_block_act);

        let walker = BlockWalker::new(&geom);
        let mut resolver = ChainResolver::new(&geom, 2, 2);
        let mut seen = Vec::new();
        walker
            .block_walk(
                &img,
                &mut resolver,
                tail_sector,
                geom.last_block_act,
                WalkFlags::empty(),
                &mut |view| {
                    seen.push(view.addr);
                    assert!(view.flags.contains(BlockFlags::UNALLOC));
                    Ok(WalkAction::Continue)
                },
            )
            .unwrap();
        assert_eq!(seen, vec![tail_sector]);
    }

    #[test]
    fn test_block_walk_rejects_range_past_last_block() {
        let (geom, img) = fat16_with_data();
        let walker = BlockWalker::new(&geom);
        let mut resolver = ChainResolver::new(&geom, 2, 2);
        let err = walker
            .block_walk(
                &img,
                &mut resolver,
                0,
                geom.last_block_act + 1,
                WalkFlags::empty(),
                &mut |_| Ok(WalkAction::Continue),
            )
            .unwrap_err();
        assert!(matches!(err, Error::WalkRange { .. }));
    }

    #[test]
    fn test_callback_stop_ends_walk_early() {
        let (geom, img) = fat16_with_data();
        let walker = BlockWalker::new(&geom);
        let mut resolver = ChainResolver::new(&geom, 2, 2);
        let mut count = 0;
        walker
            .block_walk(
                &img,
                &mut resolver,
                0,
                23,
                WalkFlags::META,
                &mut |_| {
                    count += 1;
                    Ok(WalkAction::Stop)
                },
            )
            .unwrap();
        assert_eq!(count, 1);
    }
}
