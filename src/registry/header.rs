use crate::error::{Error, Result};
use crate::image::{read_exact, ImageReader};

/// Fixed page size shared by the REGF header and every HBIN.
pub const HBIN_SIZE: u64 = 4096;
/// Byte offset of the first addressable HBIN, immediately after the
/// REGF header page.
pub const FIRST_HBIN_OFFSET: u64 = HBIN_SIZE;

const REGF_MAGIC: u32 = 0x66676572; // "regf" little-endian

/// Parsed REGF header page: format identity plus the bounds needed to
/// derive inode/block ranges before any cell can be read.
#[derive(Debug, Clone)]
pub struct RegfsGeometry {
    pub seq1: u32,
    pub seq2: u32,
    pub major_version: u32,
    pub minor_version: u32,
    pub first_key_offset: u32,
    pub last_hbin_offset: u32,
    pub hive_name_utf16: [u8; 30],
    pub first_block: u64,
    pub last_block: u64,
    pub last_block_act: u64,
    pub first_inum: u64,
    pub last_inum: u64,
    pub root_inum: u64,
}

impl RegfsGeometry {
    /// Read and validate the REGF header page at offset 0, then derive
    /// the block/inode bounds an opened hive exposes for its lifetime.
    pub fn load(reader: &dyn ImageReader, image_size: u64) -> Result<Self> {
        let mut page = vec![0u8; HBIN_SIZE as usize];
        read_exact(reader, 0, &mut page)?;

        // A bad REGF magic is treated as hive-level cell corruption,
        // not a wrong-filesystem-type signal.
        let magic = u32::from_le_bytes(page[0..4].try_into().unwrap());
        if magic != REGF_MAGIC {
            return Err(Error::InodeCorrupt(0));
        }

        let seq1 = u32::from_le_bytes(page[4..8].try_into().unwrap());
        let seq2 = u32::from_le_bytes(page[8..12].try_into().unwrap());
        let major_version = u32::from_le_bytes(page[20..24].try_into().unwrap());
        let minor_version = u32::from_le_bytes(page[24..28].try_into().unwrap());
        let first_key_offset = u32::from_le_bytes(page[36..40].try_into().unwrap());
        let last_hbin_offset = u32::from_le_bytes(page[40..44].try_into().unwrap());
        let mut hive_name_utf16 = [0u8; 30];
        hive_name_utf16.copy_from_slice(&page[48..78]);

        let first_block = 0;
        let last_block = last_hbin_offset as u64 / HBIN_SIZE;
        // Clamp to whichever is smaller: the header's own declared last
        // block, or what the backing image actually has present.
        let image_last_block = (image_size / HBIN_SIZE).saturating_sub(1);
        let last_block_act = last_block.min(image_last_block);

        Ok(Self {
            seq1,
            seq2,
            major_version,
            minor_version,
            first_key_offset,
            last_hbin_offset,
            hive_name_utf16,
            first_block,
            last_block,
            last_block_act,
            first_inum: FIRST_HBIN_OFFSET,
            last_inum: last_hbin_offset as u64 + HBIN_SIZE,
            root_inum: FIRST_HBIN_OFFSET,
        })
    }

    /// Whether the two sequence numbers agree, i.e. the hive was
    /// cleanly flushed rather than caught mid-write.
    pub fn is_synchronized(&self) -> bool {
        self.seq1 == self.seq2
    }

    pub fn hive_name_lossy(&self) -> String {
        let units: Vec<u16> = self
            .hive_name_utf16
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .take_while(|&u| u != 0)
            .collect();
        String::from_utf16_lossy(&units)
    }
}
