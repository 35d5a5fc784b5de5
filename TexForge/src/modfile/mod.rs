//! Mod containers
//!
//! ```text
//! 0   magic            b"TFMD"
//! 4   format_version   u32
//! 8   directory_offset u64
//! 16  payloads         zlib envelope frames
//! dir game_variant u32, entry_count u32,
//!     entries (kind_tag u32, name NUL-terminated, offset u64, length u64)
//! ```

pub mod diff;
pub mod mipset;
mod reader;
pub mod types;
mod writer;

pub use diff::{apply_patch, create_patch};
pub use mipset::{MipImage, MipSet};
pub use reader::ModReader;
pub use types::{EntryTarget, ModEntry, ModEntryKind, export_entry_name, texture_entry_name};
pub use writer::ModWriter;

/// Magic tag at the start of every mod
pub const MOD_MAGIC: &[u8; 4] = b"TFMD";

/// The only format version read and written
pub const MOD_VERSION: u32 = 2;

/// Extension of mod files
pub const MOD_EXTENSION: &str = "tfmod";

pub(crate) const HEADER_SIZE: u64 = 16;
pub(crate) const DIRECTORY_OFFSET_POSITION: u64 = 8;
