pub mod cell;
pub mod header;
pub mod walker;

use crate::error::Result;
use crate::fsinfo::{BlockFlags, BlockView, Filesystem, WalkAction, WalkFlags};
use crate::image::ImageReader;
use cell::RegistryCell;
use header::RegfsGeometry;

/// An opened Windows Registry hive, modeled as a pseudo-file-system of
/// cells addressed by byte offset.
pub struct RegistryFilesystem<R: ImageReader> {
    reader: R,
    geometry: RegfsGeometry,
}

impl<R: ImageReader> RegistryFilesystem<R> {
    /// Parse the REGF header and derive the hive's block/inode bounds.
    pub fn open(reader: R) -> Result<Self> {
        let geometry = RegfsGeometry::load(&reader, reader.size())?;
        Ok(Self { reader, geometry })
    }

    pub fn geometry(&self) -> &RegfsGeometry {
        &self.geometry
    }

    /// Load the cell header at `inum`.
    pub fn load_cell(&self, inum: u64) -> Result<RegistryCell> {
        cell::load_cell(&self.reader, inum, self.geometry.first_block, self.geometry.last_block_act)
    }
}

impl<R: ImageReader> Filesystem for RegistryFilesystem<R> {
    fn block_walk(
        &self,
        start: u64,
        end: u64,
        flags: WalkFlags,
        callback: &mut dyn FnMut(BlockView<'_>) -> Result<WalkAction>,
    ) -> Result<()> {
        let _ = flags.normalized(); // every HBIN matches every filter combination
        walker::block_walk(&self.reader, &self.geometry, start, end, callback)
    }

    fn block_getflags(&self, _addr: u64) -> Result<BlockFlags> {
        Ok(walker::block_getflags())
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

    fn inode_walk(
        &self,
        start: u64,
        end: u64,
        callback: &mut dyn FnMut(u64) -> Result<WalkAction>,
    ) -> Result<()> {
        walker::inode_walk(&self.reader, &self.geometry, start, end, &mut |addr, _flags| {
            callback(addr)
        })
    }
}
