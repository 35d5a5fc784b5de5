//! Texture catalog
//!
//! Maps texture checksums to every (package, export) that holds the texture.
//! The install pipeline matches mod entries against it; [`scan_game`] builds
//! one from a game installation.

mod scan;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::variant::GameVariant;

pub use scan::{ScanFailure, ScanPhase, ScanProgress, ScanReport, find_packages, scan_game};

/// Extension of package files
pub const PACKAGE_EXTENSION: &str = "pcc";

/// One place a texture lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextureLocation {
    /// Package path relative to the game root, `/` separated
    pub package_path: String,
    pub export_index: usize,
    /// Mip count the export had when scanned
    pub mip_count: usize,
    /// Data offset of the top mip (mirroring platforms)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_offset: Option<u32>,
    /// Declared base package (mirroring platforms)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_package: Option<String>,
}

impl TextureLocation {
    /// Absolute path of the package under `root`
    pub fn resolve(&self, root: &Path) -> PathBuf {
        root.join(self.package_path.replace('\\', "/"))
    }

    /// Package file stem (name without directory or extension)
    pub fn package_stem(&self) -> &str {
        let file = self
            .package_path
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(&self.package_path);
        file.rsplit_once('.').map_or(file, |(stem, _)| stem)
    }
}

/// One distinct texture, identified by its checksum
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogTexture {
    pub name: String,
    pub crc: u32,
    pub width: u32,
    pub height: u32,
    pub pixel_format: String,
    pub locations: Vec<TextureLocation>,
}

/// All textures of one game installation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextureCatalog {
    pub variant: GameVariant,
    pub textures: Vec<CatalogTexture>,
}

impl TextureCatalog {
    #[must_use]
    pub fn new(variant: GameVariant) -> Self {
        Self {
            variant,
            textures: Vec::new(),
        }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = std::fs::read(path)?;
        Ok(serde_json::from_slice(&data)?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let data = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, data)?;
        Ok(())
    }

    /// Texture index by checksum
    pub fn crc_index(&self) -> HashMap<u32, usize> {
        self.textures
            .iter()
            .enumerate()
            .map(|(i, t)| (t.crc, i))
            .collect()
    }

    pub fn find_by_crc(&self, crc: u32) -> Option<&CatalogTexture> {
        self.textures.iter().find(|t| t.crc == crc)
    }

    /// Total number of locations
    pub fn location_count(&self) -> usize {
        self.textures.iter().map(|t| t.locations.len()).sum()
    }
}
