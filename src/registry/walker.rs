use crate::error::{Error, Result};
use crate::fsinfo::{BlockFlags, BlockView, WalkAction};
use crate::image::{read_exact, ImageReader};
use crate::registry::cell::{load_cell, CellType};
use crate::registry::header::{RegfsGeometry, HBIN_SIZE};

/// Iterate HBIN-sized pages `[start_blk, end_blk)`, delivering each one
/// to `callback`. HBINs are always ALLOC | META | CONT; a short read
/// aborts the walk with an error.
pub fn block_walk(
    reader: &dyn ImageReader,
    geometry: &RegfsGeometry,
    start_blk: u64,
    end_blk: u64,
    callback: &mut dyn FnMut(BlockView<'_>) -> Result<WalkAction>,
) -> Result<()> {
    if start_blk < geometry.first_block || start_blk > geometry.last_block {
        return Err(Error::WalkRange {
            start: start_blk,
            end: end_blk,
            first: geometry.first_block,
            last: geometry.last_block,
        });
    }
    if end_blk < geometry.first_block || end_blk > geometry.last_block + 1 {
        return Err(Error::WalkRange {
            start: start_blk,
            end: end_blk,
            first: geometry.first_block,
            last: geometry.last_block,
        });
    }

    let mut blknum = start_blk;
    while blknum < end_blk {
        let mut buf = vec![0u8; HBIN_SIZE as usize];
        read_exact(reader, blknum * HBIN_SIZE, &mut buf)?;

        let view = BlockView {
            addr: blknum,
            flags: BlockFlags::ALLOC | BlockFlags::META | BlockFlags::CONT | BlockFlags::RAW,
            data: &buf,
        };
        if callback(view)? == WalkAction::Stop {
            return Ok(());
        }
        blknum += 1;
    }
    Ok(())
}

/// Flags reported for a single HBIN page: always allocated, and both
/// metadata-bearing and content-bearing since a page can hold either.
pub fn block_getflags() -> BlockFlags {
    BlockFlags::ALLOC | BlockFlags::META | BlockFlags::CONT
}

/// Iterate cells sequentially by inode (byte offset), starting at
/// `start_inum` and stopping before `end_inum`. Implements the
/// commented-out design in the original block walker: classify each
/// cell as allocated/unallocated and, by record type, as metadata- or
/// content-bearing, then advance by the cell's own length. A cell
/// whose extent would cross into the next HBIN's header signals
/// `Error::BlkNum`; skip past the 0x20-byte HBIN header when a cell's
/// end lands exactly on the next page.
pub fn inode_walk(
    reader: &dyn ImageReader,
    geometry: &RegfsGeometry,
    start_inum: u64,
    end_inum: u64,
    callback: &mut dyn FnMut(u64, BlockFlags) -> Result<WalkAction>,
) -> Result<()> {
    if start_inum < geometry.first_inum || start_inum > geometry.last_inum {
        return Err(Error::WalkRange {
            start: start_inum,
            end: end_inum,
            first: geometry.first_inum,
            last: geometry.last_inum,
        });
    }
    if end_inum < geometry.first_inum || end_inum > geometry.last_inum {
        return Err(Error::WalkRange {
            start: start_inum,
            end: end_inum,
            first: geometry.first_inum,
            last: geometry.last_inum,
        });
    }

    let mut addr = start_inum;
    let mut current_hbin_start = addr - (addr % HBIN_SIZE);

    while addr < end_inum {
        let cell = load_cell(reader, addr, geometry.first_block, geometry.last_block_act)?;

        let mut flags = if cell.is_allocated {
            BlockFlags::ALLOC
        } else {
            BlockFlags::UNALLOC
        };
        flags |= match cell.cell_type {
            CellType::Nk
            | CellType::Lf
            | CellType::Lh
            | CellType::Li
            | CellType::Ri
            | CellType::Db
            | CellType::Sk
            | CellType::Vk => BlockFlags::META,
            CellType::Unknown => BlockFlags::CONT,
        };

        if addr + cell.length as u64 > current_hbin_start + HBIN_SIZE - 1 {
            return Err(Error::BlkNum {
                addr,
                first: geometry.first_block,
                last: geometry.last_block_act,
            });
        }

        if callback(addr, flags)? == WalkAction::Stop {
            return Ok(());
        }

        addr += cell.length as u64;
        if addr > current_hbin_start + HBIN_SIZE {
            current_hbin_start += HBIN_SIZE;
            addr = current_hbin_start + 0x20;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::MemoryImage;
    use crate::registry::header::FIRST_HBIN_OFFSET;

    fn geometry_for(data_len: u64, last_hbin_offset: u32) -> RegfsGeometry {
        RegfsGeometry {
            seq1: 1,
            seq2: 1,
            major_version: 1,
            minor_version: 5,
            first_key_offset: 0x20,
            last_hbin_offset,
            hive_name_utf16: [0u8; 30],
            first_block: 0,
            last_block: last_hbin_offset as u64 / HBIN_SIZE,
            last_block_act: (data_len / HBIN_SIZE).saturating_sub(1),
            first_inum: FIRST_HBIN_OFFSET,
            last_inum: last_hbin_offset as u64 + HBIN_SIZE,
            root_inum: FIRST_HBIN_OFFSET,
        }
    }

    #[test]
    fn test_block_walk_visits_hbins_in_order() {
        let data = vec![0u8; 3 * HBIN_SIZE as usize];
        let geom = geometry_for(data.len() as u64, HBIN_SIZE as u32);
        let img = MemoryImage::new(data);
        let mut seen = Vec::new();
        block_walk(&img, &geom, 0, 2, &mut |view| {
            seen.push(view.addr);
            assert!(view.flags.contains(BlockFlags::ALLOC));
            assert!(view.flags.contains(BlockFlags::RAW));
            Ok(WalkAction::Continue)
        })
        .unwrap();
        assert_eq!(seen, vec![0, 1]);
    }

    #[test]
    fn test_block_walk_rejects_end_past_last_block() {
        let data = vec![0u8; 2 * HBIN_SIZE as usize];
        let geom = geometry_for(data.len() as u64, HBIN_SIZE as u32);
        let img = MemoryImage::new(data);
        let err = block_walk(&img, &geom, 0, 10, &mut |_| Ok(WalkAction::Continue)).unwrap_err();
        assert!(matches!(err, Error::WalkRange { .. }));
    }

    #[test]
    fn test_inode_walk_visits_sequential_cells() {
        let mut data = vec![0u8; 2 * HBIN_SIZE as usize];
        // Two 16-byte allocated vk cells starting right after the HBIN header.
        let first = FIRST_HBIN_OFFSET + 0x20;
        data[first as usize..first as usize + 6]
            .copy_from_slice(&[0xF0u8, 0xFF, 0xFF, 0xFF, b'v', b'k']);
        let second = first + 16;
        data[second as usize..second as usize + 6]
            .copy_from_slice(&[0xF0u8, 0xFF, 0xFF, 0xFF, b'n', b'k']);

        let geom = geometry_for(data.len() as u64, HBIN_SIZE as u32);
        let img = MemoryImage::new(data);

        let mut seen = Vec::new();
        inode_walk(&img, &geom, first, first + 32, &mut |addr, flags| {
            seen.push((addr, flags));
            Ok(WalkAction::Continue)
        })
        .unwrap();

        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0, first);
        assert!(seen[0].1.contains(BlockFlags::ALLOC));
        assert!(seen[0].1.contains(BlockFlags::META));
        assert_eq!(seen[1].0, second);
    }

    #[test]
    fn test_inode_walk_detects_cell_overrunning_hbin() {
        let mut data = vec![0u8; 2 * HBIN_SIZE as usize];
        let near_end = FIRST_HBIN_OFFSET + HBIN_SIZE - 8;
        // Declares a length that would cross into the next HBIN header.
        data[near_end as usize..near_end as usize + 6]
            .copy_from_slice(&[0x00u8, 0x01, 0x00, 0x00, b'v', b'k']);

        let geom = geometry_for(data.len() as u64, HBIN_SIZE as u32);
        let img = MemoryImage::new(data);

        let err = inode_walk(&img, &geom, near_end, near_end + 1, &mut |_, _| {
            Ok(WalkAction::Continue)
        })
        .unwrap_err();
        assert!(matches!(err, Error::BlkNum { .. }));
    }
}
