pub mod error;
pub mod fat;
pub mod fsinfo;
pub mod image;
pub mod registry;

pub use error::{Error, Result};
pub use fat::geometry::FatFlavor;
pub use fat::FatFilesystem;
pub use fsinfo::{BlockFlags, BlockView, Filesystem, WalkAction, WalkFlags};
pub use image::{FileImage, ImageReader, MemoryImage};
pub use registry::header::RegfsGeometry;
pub use registry::RegistryFilesystem;
