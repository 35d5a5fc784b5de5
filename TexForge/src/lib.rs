//! # TexForge
//!
//! A pure-Rust texture modding engine for Unreal Engine 3 package files.
//!
//! ## Supported Formats
//!
//! - **PCC packages** - Read, edit and save packages, compressed or not
//! - **Chunked compression** - The zlib/LZ4 block envelope used by packages and mips
//! - **Textures** - Mip lists stored inline, in the package or in external caches
//! - **TFC caches** - Append-only texture cache files with rollover
//! - **Mod containers** - `.tfmod` files carrying replacement textures and exports
//!
//! ## Quick Start
//!
//! ### Inspecting a Package
//!
//! ```no_run
//! use texforge::package::Package;
//! use texforge::texture::Texture;
//!
//! let package = Package::open("BioA_Nor.pcc")?;
//! for index in package.find_exports_by_class("Texture2D") {
//!     let texture = Texture::from_export(&package, index)?;
//!     println!("{}: {:?}", package.export_object_name(index)?, texture.size());
//! }
//! # Ok::<(), texforge::Error>(())
//! ```
//!
//! ### Installing Mods
//!
//! ```no_run
//! use texforge::catalog::TextureCatalog;
//! use texforge::install::{InstallOptions, Installer};
//! use texforge::variant::GameVariant;
//!
//! let catalog = TextureCatalog::load("catalog.json")?;
//! let options = InstallOptions::new("/games/trilogy/Game", GameVariant::Extended);
//! let report = Installer::new(options, &catalog).install(&["HDTextures.tfmod"], &|_| {})?;
//! println!("Applied {} replacements", report.applied());
//! # Ok::<(), texforge::Error>(())
//! ```
//!
//! ## Feature Flags
//!
//! - `cli` - Enables the `texforge` command-line binary

pub mod catalog;
pub mod compression;
pub mod config;
pub mod error;
pub mod install;
pub mod mirror;
pub mod modfile;
pub mod package;
pub mod texture;
pub mod tfc;
pub mod variant;

// Re-exports for convenience
pub use error::{Error, ErrorKind, Result};

/// Prelude module for common imports
pub mod prelude {
    pub use crate::error::{Error, ErrorKind, Result};

    pub use crate::catalog::{CatalogTexture, TextureCatalog, TextureLocation, scan_game};
    pub use crate::compression::CompressionMethod;
    pub use crate::config::InstallConfig;
    pub use crate::install::{InstallOptions, InstallProgress, InstallReport, Installer, PixelCodec};
    pub use crate::mirror::MirrorResolver;
    pub use crate::modfile::{MipSet, ModEntryKind, ModReader, ModWriter};
    pub use crate::package::{Package, SaveOptions};
    pub use crate::texture::{Mipmap, PixelFormat, StorageKind, Texture, TextureRelocator};
    pub use crate::tfc::{CacheStore, TfcAllocator};
    pub use crate::variant::GameVariant;
}

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// CLI module (feature-gated)
#[cfg(feature = "cli")]
pub mod cli;
