use thiserror::Error;

/// Errors produced by the FAT and Registry parsers.
///
/// Each variant carries the context a caller needs to report a useful
/// message; there is no process-wide error slot to consult.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    Arg(String),

    #[error("bad magic/signature: {0}")]
    Magic(String),

    #[error("short read at offset {offset}: expected {expected} bytes, got {actual}")]
    Read {
        offset: u64,
        expected: usize,
        actual: usize,
    },

    #[error("walk range [{start}, {end}] is outside the filesystem bounds [{first}, {last}]")]
    WalkRange {
        start: u64,
        end: u64,
        first: u64,
        last: u64,
    },

    #[error("inode/cell at {0:#x} is corrupted")]
    InodeCorrupt(u64),

    #[error("block/inode number {addr} is outside [{first}, {last}]")]
    BlkNum { addr: u64, first: u64, last: u64 },

    #[error("operation not supported by this filesystem: {0}")]
    UnsupFunc(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
