use crate::error::{Error, Result};
use bitflags::bitflags;

bitflags! {
    /// Allocation/role flags reported for a single block by `block_getflags`
    /// and delivered alongside block data during a walk.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BlockFlags: u32 {
        const ALLOC   = 0x01;
        const UNALLOC = 0x02;
        const META    = 0x04;
        const CONT    = 0x08;
        const RAW     = 0x10;
    }
}

bitflags! {
    /// Filter flags accepted by `block_walk`/`inode_walk`. An absent
    /// ALLOC/UNALLOC pair (or META/CONT pair) means "include both".
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct WalkFlags: u32 {
        const ALLOC   = 0x01;
        const UNALLOC = 0x02;
        const META    = 0x04;
        const CONT    = 0x08;
    }
}

impl WalkFlags {
    /// Fill in the default "include everything" behavior for whichever
    /// pair the caller left unset, matching the source's convention
    /// that omitted filters mean "no restriction".
    pub fn normalized(self) -> Self {
        let mut flags = self;
        if !flags.intersects(WalkFlags::ALLOC | WalkFlags::UNALLOC) {
            flags |= WalkFlags::ALLOC | WalkFlags::UNALLOC;
        }
        if !flags.intersects(WalkFlags::META | WalkFlags::CONT) {
            flags |= WalkFlags::META | WalkFlags::CONT;
        }
        flags
    }
}

/// A caller's response to one block/inode delivered during a walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkAction {
    Continue,
    Stop,
}

/// One block's worth of data as seen by a block-walk callback.
#[derive(Debug, Clone)]
pub struct BlockView<'a> {
    pub addr: u64,
    pub flags: BlockFlags,
    pub data: &'a [u8],
}

/// Capability surface every opened filesystem exposes, bound once at
/// open time. The FAT and Registry parsers each implement this once;
/// there is no inheritance between them, only the same capability set.
///
/// Operations this crate's core does not implement (directory listing,
/// attribute loading, textual pretty-printing, journaling) get default
/// bodies that return `Error::UnsupFunc`, the same way the original
/// always failed unsupported journal operations rather than panicking.
pub trait Filesystem {
    /// Visit every block in `[start, end]` matching `flags`, in
    /// ascending address order, until the callback stops the walk or
    /// an error occurs.
    fn block_walk(
        &self,
        start: u64,
        end: u64,
        flags: WalkFlags,
        callback: &mut dyn FnMut(BlockView<'_>) -> Result<WalkAction>,
    ) -> Result<()>;

    /// Report the allocation/role flags for a single block.
    fn block_getflags(&self, addr: u64) -> Result<BlockFlags>;

    /// First addressable block.
    fn first_block(&self) -> u64;

    /// Last block declared by the filesystem's own metadata.
    fn last_block(&self) -> u64;

    /// Last block actually present in the backing image (may trail
    /// `last_block` when the image is a truncated capture).
    fn last_block_act(&self) -> u64;

    /// First valid inode number.
    fn first_inum(&self) -> u64;

    /// Last valid inode number.
    fn last_inum(&self) -> u64;

    /// Root directory inode number.
    fn root_inum(&self) -> u64;

    fn inode_walk(
        &self,
        _start: u64,
        _end: u64,
        _callback: &mut dyn FnMut(u64) -> Result<WalkAction>,
    ) -> Result<()> {
        Err(Error::UnsupFunc("inode_walk"))
    }

    fn istat(&self, _inum: u64) -> Result<String> {
        Err(Error::UnsupFunc("istat"))
    }

    fn fsstat(&self) -> Result<String> {
        Err(Error::UnsupFunc("fsstat"))
    }

    fn fscheck(&self) -> Result<()> {
        Err(Error::UnsupFunc("fscheck"))
    }

    fn jopen(&self, _inum: u64) -> Result<()> {
        Err(Error::UnsupFunc("jopen"))
    }

    fn jblk_walk(&self, _start: u64, _end: u64) -> Result<()> {
        Err(Error::UnsupFunc("jblk_walk"))
    }

    fn jentry_walk(&self) -> Result<()> {
        Err(Error::UnsupFunc("jentry_walk"))
    }

    fn name_cmp(&self, a: &str, b: &str) -> bool {
        a == b
    }

    fn close(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_walk_flags_normalized_fills_both_pairs() {
        let flags = WalkFlags::empty().normalized();
        assert!(flags.contains(WalkFlags::ALLOC));
        assert!(flags.contains(WalkFlags::UNALLOC));
        assert!(flags.contains(WalkFlags::META));
        assert!(flags.contains(WalkFlags::CONT));
    }

    #[test]
    fn test_walk_flags_normalized_preserves_explicit_choice() {
        let flags = WalkFlags::META.normalized();
        assert!(flags.contains(WalkFlags::META));
        assert!(!flags.contains(WalkFlags::CONT));
        assert!(flags.contains(WalkFlags::ALLOC));
        assert!(flags.contains(WalkFlags::UNALLOC));
    }
}
