use crate::error::Result;
use std::fs::File;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

/// A bounded byte-addressable source for filesystem images.
///
/// `read_at` never pads a short read with zeros: it returns the count
/// actually transferred, and it is the caller's job (cache, resolver,
/// walker) to decide whether a short read is fatal. This mirrors the
/// reference `Device`'s raw `read_bytes_at`, generalized to report a
/// count instead of unconditionally requiring a full buffer.
pub trait ImageReader: std::fmt::Debug {
    /// Read up to `buf.len()` bytes starting at `offset`. Returns the
    /// number of bytes actually read, which may be less than
    /// `buf.len()` near the end of the image.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize>;

    /// Total size of the backing store in bytes.
    fn size(&self) -> u64;
}

/// A filesystem image backed by an open file or block device.
pub struct FileImage {
    file: File,
    path: PathBuf,
    size: u64,
}

impl FileImage {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_buf = path.as_ref().to_path_buf();
        let file = File::open(&path_buf)?;
        let size = Self::probe_size(&file)?;
        Ok(Self {
            file,
            path: path_buf,
            size,
        })
    }

    fn probe_size(file: &File) -> Result<u64> {
        let metadata = file.metadata()?;
        if metadata.is_file() {
            Ok(metadata.len())
        } else {
            use std::io::{Seek, SeekFrom};
            let mut f = file.try_clone()?;
            Ok(f.seek(SeekFrom::End(0))?)
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for FileImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileImage")
            .field("path", &self.path)
            .field("size", &self.size)
            .finish()
    }
}

impl ImageReader for FileImage {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if offset >= self.size {
            return Ok(0);
        }
        let available = (self.size - offset) as usize;
        let want = buf.len().min(available);
        if want == 0 {
            return Ok(0);
        }
        self.file.read_exact_at(&mut buf[..want], offset)?;
        Ok(want)
    }

    fn size(&self) -> u64 {
        self.size
    }
}

/// An in-memory filesystem image, for unit tests constructing tiny
/// synthetic boot sectors, FAT tables, and registry hives.
#[derive(Debug, Clone)]
pub struct MemoryImage {
    data: Vec<u8>,
}

impl MemoryImage {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }
}

impl ImageReader for MemoryImage {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let offset = offset as usize;
        if offset >= self.data.len() {
            return Ok(0);
        }
        let available = self.data.len() - offset;
        let want = buf.len().min(available);
        buf[..want].copy_from_slice(&self.data[offset..offset + want]);
        Ok(want)
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// Read exactly `buf.len()` bytes, treating any short read as fatal.
/// Every higher-level component (cache, chain resolver, block walkers,
/// registry cell loader) routes through this instead of calling
/// `read_at` directly, per the "short read is always fatal" policy.
pub fn read_exact(reader: &dyn ImageReader, offset: u64, buf: &mut [u8]) -> Result<()> {
    let n = reader.read_at(offset, buf)?;
    if n != buf.len() {
        return Err(crate::error::Error::Read {
            offset,
            expected: buf.len(),
            actual: n,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_memory_image_read() {
        let img = MemoryImage::new((0..16u8).collect());
        let mut buf = [0u8; 4];
        let n = img.read_at(4, &mut buf).unwrap();
        assert_eq!(n, 4);
        assert_eq!(buf, [4, 5, 6, 7]);
    }

    #[test]
    fn test_memory_image_short_read_at_tail() {
        let img = MemoryImage::new(vec![1, 2, 3]);
        let mut buf = [0u8; 8];
        let n = img.read_at(1, &mut buf).unwrap();
        assert_eq!(n, 2);
    }

    #[test]
    fn test_read_exact_fails_on_short_read() {
        let img = MemoryImage::new(vec![1, 2, 3]);
        let mut buf = [0u8; 8];
        let err = read_exact(&img, 0, &mut buf).unwrap_err();
        assert!(matches!(err, crate::error::Error::Read { .. }));
    }

    #[test]
    fn test_file_image_open_and_read() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), vec![0xABu8; 1024]).unwrap();

        let img = FileImage::open(file.path()).unwrap();
        assert_eq!(img.size(), 1024);

        let mut buf = [0u8; 512];
        let n = img.read_at(0, &mut buf).unwrap();
        assert_eq!(n, 512);
        assert_eq!(buf, [0xAB; 512]);
    }
}
