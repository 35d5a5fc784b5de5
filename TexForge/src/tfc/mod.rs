//! External texture cache (TFC) files
//!
//! A cache file is a flat append-only file whose first 16 bytes are its GUID.
//! Everything after that is mip payloads at offsets recorded by the textures
//! that reference the file by name and GUID.

mod allocator;
mod store;

pub use allocator::{Allocation, ReuseBoundary, ReuseSlot, TfcAllocator};
pub use store::CacheStore;

/// Extension of cache files
pub const TFC_EXTENSION: &str = "tfc";

/// Size of the GUID at the start of every cache file
pub const GUID_SIZE: usize = 16;

/// Default size ceiling for a cache file (offsets are stored as u32)
pub const DEFAULT_CEILING: u64 = 0x7FFF_FFFF;

/// Default headroom kept below the ceiling
pub const DEFAULT_MARGIN: u64 = 80 * 1024 * 1024;

/// Default name of the cache this tool appends to
pub const DEFAULT_MOD_CACHE: &str = "TexturesMod";

/// Highest roll-over suffix tried before giving up
pub const MAX_ROLLOVER: usize = 100;
