use crate::error::{Error, Result};
use crate::image::{read_exact, ImageReader};
use crate::registry::header::HBIN_SIZE;

/// Record type tag decoded from the two ASCII bytes at offset 4 of a
/// cell header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellType {
    Vk,
    Nk,
    Lf,
    Lh,
    Li,
    Ri,
    Sk,
    Db,
    Unknown,
}

impl CellType {
    fn from_tag(tag: [u8; 2]) -> Self {
        match &tag {
            b"vk" => CellType::Vk,
            b"nk" => CellType::Nk,
            b"lf" => CellType::Lf,
            b"lh" => CellType::Lh,
            b"li" => CellType::Li,
            b"ri" => CellType::Ri,
            b"sk" => CellType::Sk,
            b"db" => CellType::Db,
            _ => CellType::Unknown,
        }
    }
}

/// A loaded cell header: an inode number (its byte offset), allocation
/// state, size, and record type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryCell {
    pub inum: u64,
    pub is_allocated: bool,
    pub length: u32,
    pub cell_type: CellType,
}

/// Read the 6-byte cell header at absolute offset `inum` and classify
/// it. `first_block`/`last_block_act` bound valid cell offsets, same
/// as the block-addressing rules the HBIN walker enforces.
pub fn load_cell(
    reader: &dyn ImageReader,
    inum: u64,
    first_block: u64,
    last_block_act: u64,
) -> Result<RegistryCell> {
    if inum < first_block * HBIN_SIZE || inum > last_block_act * HBIN_SIZE + HBIN_SIZE - 1 {
        return Err(Error::BlkNum {
            addr: inum,
            first: first_block,
            last: last_block_act,
        });
    }

    let mut buf = [0u8; 6];
    read_exact(reader, inum, &mut buf)?;

    let raw_len = i32::from_le_bytes(buf[0..4].try_into().unwrap());
    let (is_allocated, length) = if raw_len < 0 {
        (true, raw_len.unsigned_abs())
    } else {
        (false, raw_len as u32)
    };
    if length as u64 >= HBIN_SIZE {
        return Err(Error::InodeCorrupt(inum));
    }

    let cell_type = CellType::from_tag([buf[4], buf[5]]);

    Ok(RegistryCell {
        inum,
        is_allocated,
        length,
        cell_type,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::MemoryImage;

    fn image_with_cell_at(offset: u64, bytes: &[u8]) -> MemoryImage {
        let mut data = vec![0u8; 2 * HBIN_SIZE as usize];
        data[offset as usize..offset as usize + bytes.len()].copy_from_slice(bytes);
        MemoryImage::new(data)
    }

    #[test]
    fn test_allocated_nk_cell() {
        let bytes = [0xF8, 0xFF, 0xFF, 0xFF, b'n', b'k'];
        let img = image_with_cell_at(0x1000, &bytes);
        let cell = load_cell(&img, 0x1000, 0, 1).unwrap();
        assert!(cell.is_allocated);
        assert_eq!(cell.length, 8);
        assert_eq!(cell.cell_type, CellType::Nk);
    }

    #[test]
    fn test_unallocated_cell_positive_length() {
        let bytes = [0x10, 0x00, 0x00, 0x00, b'v', b'k'];
        let img = image_with_cell_at(0x1000, &bytes);
        let cell = load_cell(&img, 0x1000, 0, 1).unwrap();
        assert!(!cell.is_allocated);
        assert_eq!(cell.length, 16);
        assert_eq!(cell.cell_type, CellType::Vk);
    }

    #[test]
    fn test_oversized_length_is_inode_corrupt() {
        let bytes = [0x00, 0x10, 0x00, 0x00, b'v', b'k']; // 4096, not < HBIN_SIZE
        let img = image_with_cell_at(0x1000, &bytes);
        let err = load_cell(&img, 0x1000, 0, 1).unwrap_err();
        assert!(matches!(err, Error::InodeCorrupt(_)));
    }

    #[test]
    fn test_unknown_tag_classified_unknown() {
        let bytes = [0x08, 0x00, 0x00, 0x00, b'z', b'z'];
        let img = image_with_cell_at(0x1000, &bytes);
        let cell = load_cell(&img, 0x1000, 0, 1).unwrap();
        assert_eq!(cell.cell_type, CellType::Unknown);
    }

    #[test]
    fn test_inum_out_of_range_is_blk_num_error() {
        let img = image_with_cell_at(0x1000, &[0, 0, 0, 0, b'v', b'k']);
        let err = load_cell(&img, 10 * HBIN_SIZE, 0, 1).unwrap_err();
        assert!(matches!(err, Error::BlkNum { .. }));
    }
}
