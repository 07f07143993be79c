use crate::error::{Error, Result};
use crate::fat::cache::FatCache;
use crate::fat::geometry::{FatFlavor, FatGeometry};
use crate::image::ImageReader;

/// Sentinel class of a resolved FAT entry, kept distinct from a bare
/// `u64` so callers can't accidentally treat EOF/BAD as a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatEntryValue {
    Free,
    Bad,
    EndOfChain,
    Next(u64),
}

/// XTAF, like FAT16/32, widens its entries once the volume has too
/// many clusters for a 16-bit table to address.
fn xtaf_entry_is_32bit(cluster_count: u64) -> bool {
    cluster_count >= 0xfff0
}

fn entry_byte_width(flavor: FatFlavor, cluster_count: u64) -> u32 {
    match flavor {
        FatFlavor::Fat12 => 0, // handled specially: 12 bits packed into 2 bytes per pair
        FatFlavor::Fat16 => 2,
        FatFlavor::Fat32 => 4,
        FatFlavor::Xtaf { .. } => {
            if xtaf_entry_is_32bit(cluster_count) {
                4
            } else {
                2
            }
        }
    }
}

/// Resolves cluster chains against the FAT table, backed by a sector
/// cache. Holds no loop-detection state of its own — the source pushes
/// that responsibility to whoever is walking a chain.
pub struct ChainResolver<'a> {
    geometry: &'a FatGeometry,
    cache: FatCache,
}

impl<'a> ChainResolver<'a> {
    pub fn new(geometry: &'a FatGeometry, cache_slots: usize, sectors_per_slot: u32) -> Self {
        Self {
            geometry,
            cache: FatCache::new(cache_slots, sectors_per_slot, geometry.sector_size),
        }
    }

    /// Resolve the successor of `cluster`, applying the historical
    /// sanity clamp: a masked value that is neither a valid cluster nor
    /// a recognized end-of-chain/bad sentinel is treated as FREE, with
    /// a warning, rather than propagated as a bogus cluster address.
    pub fn get_fat(&mut self, reader: &dyn ImageReader, cluster: u64) -> Result<FatEntryValue> {
        // When the data region doesn't divide evenly into whole
        // clusters, the sectors past the last full cluster still need
        // an address: the first such sector is `SECT_2_CLUST`-equivalent
        // to `last_cluster + 1`. Accept it silently as FREE rather than
        // erroring, since it never has a FAT entry of its own.
        if cluster == self.geometry.last_cluster + 1 {
            let last_clustered_sector = self.geometry.first_cluster_sector
                + self.geometry.cluster_size as u64 * self.geometry.cluster_count
                - 1;
            if last_clustered_sector != self.geometry.last_block {
                return Ok(FatEntryValue::Free);
            }
        }

        if cluster < 2 || cluster > self.geometry.last_cluster {
            return Err(Error::Arg(format!(
                "cluster {} outside valid range [2, {}]",
                cluster, self.geometry.last_cluster
            )));
        }

        let raw = match self.geometry.flavor {
            FatFlavor::Fat12 => self.read_fat12(reader, cluster)?,
            _ => {
                let width = entry_byte_width(self.geometry.flavor, self.geometry.cluster_count);
                self.read_fixed_width(reader, cluster, width)?
            }
        };

        let mask = self.geometry.end_of_chain_mask;
        let masked = raw & mask;
        Ok(self.classify(masked, mask))
    }

    fn classify(&self, masked: u32, mask: u32) -> FatEntryValue {
        let end_of_chain_min = 0x0FFFFFF8 & mask;
        let bad_cluster = 0x0FFFFFF7 & mask;

        if masked == 0 {
            return FatEntryValue::Free;
        }
        if masked == bad_cluster {
            return FatEntryValue::Bad;
        }
        if masked >= end_of_chain_min {
            return FatEntryValue::EndOfChain;
        }
        if (masked as u64) > self.geometry.last_cluster && (masked as u64) < end_of_chain_min as u64
        {
            log::warn!(
                "FAT entry value {:#x} too large for {} clusters, resetting to FREE",
                masked,
                self.geometry.last_cluster
            );
            return FatEntryValue::Free;
        }
        FatEntryValue::Next(masked as u64)
    }

    fn read_fixed_width(
        &mut self,
        reader: &dyn ImageReader,
        cluster: u64,
        width: u32,
    ) -> Result<u32> {
        let byte_index = cluster * width as u64;
        let sector = self.geometry.first_fat_sector + (byte_index >> self.geometry.sector_shift);
        let slot = self.cache.acquire(reader, sector)?;
        let offset = self.cache.offset_in_slot(slot, sector)
            + (byte_index % self.geometry.sector_size as u64) as usize;
        let data = self.cache.slot_data(slot);
        Ok(match width {
            2 => u16::from_le_bytes([data[offset], data[offset + 1]]) as u32,
            4 => u32::from_le_bytes([
                data[offset],
                data[offset + 1],
                data[offset + 2],
                data[offset + 3],
            ]),
            _ => unreachable!("fixed-width FAT entries are either 2 or 4 bytes"),
        })
    }

    fn read_fat12(&mut self, reader: &dyn ImageReader, cluster: u64) -> Result<u32> {
        let byte_index = cluster + (cluster >> 1);
        let sector = self.geometry.first_fat_sector + (byte_index >> self.geometry.sector_shift);
        let slot = self.cache.acquire(reader, sector)?;
        let offset = self.cache.offset_in_slot(slot, sector)
            + (byte_index % self.geometry.sector_size as u64) as usize;

        let slot_bytes = self.cache.slot_bytes();
        if offset == slot_bytes - 1 {
            // The 16-bit read straddles past the end of this slot's
            // buffer: its low byte is the last byte of `sector`, its
            // high byte is the first byte of `sector + 1`. Reload a
            // slot based exactly at `sector + 1` for the high byte,
            // and re-read the low byte directly since the old slot's
            // buffer is about to be evicted.
            let reload_sector = sector + 1;
            let low_byte_offset = sector * self.geometry.sector_size as u64
                + self.geometry.sector_size as u64
                - 1;
            let mut low_byte = [0u8; 1];
            crate::image::read_exact(reader, low_byte_offset, &mut low_byte)?;

            let slot = self.cache.acquire(reader, reload_sector)?;
            let offset = self.cache.offset_in_slot(slot, reload_sector);
            let data = self.cache.slot_data(slot);
            let raw16 = u16::from_le_bytes([low_byte[0], data[offset]]);
            return Ok(self.finish_fat12(cluster, raw16));
        }

        let data = self.cache.slot_data(slot);
        let raw16 = u16::from_le_bytes([data[offset], data[offset + 1]]);
        Ok(self.finish_fat12(cluster, raw16))
    }

    fn finish_fat12(&self, cluster: u64, raw16: u16) -> u32 {
        let value = if cluster & 1 == 1 {
            raw16 >> 4
        } else {
            raw16 & 0x0FFF
        };
        value as u32
    }
}
