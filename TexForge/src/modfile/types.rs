//! Mod container entry types and naming

use crate::error::{Error, Result};

/// What an entry's payload replaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModEntryKind {
    /// Mip set for every location of a catalogued texture
    Texture,
    /// Mip set whose pixels must go through a pixel codec before install
    TextureReencode,
    /// Verbatim replacement bytes for one export
    RawExport,
    /// Binary diff against one export's current bytes
    BinaryDiff,
}

impl ModEntryKind {
    /// Tag stored in the directory
    #[must_use]
    pub fn tag(self) -> u32 {
        match self {
            ModEntryKind::Texture => 1,
            ModEntryKind::TextureReencode => 2,
            ModEntryKind::RawExport => 3,
            ModEntryKind::BinaryDiff => 4,
        }
    }

    pub fn from_tag(tag: u32) -> Result<Self> {
        match tag {
            1 => Ok(ModEntryKind::Texture),
            2 => Ok(ModEntryKind::TextureReencode),
            3 => Ok(ModEntryKind::RawExport),
            4 => Ok(ModEntryKind::BinaryDiff),
            other => Err(Error::UnknownModEntryKind(other)),
        }
    }

    /// Entry targets a texture by checksum
    #[must_use]
    pub fn is_texture(self) -> bool {
        matches!(self, ModEntryKind::Texture | ModEntryKind::TextureReencode)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ModEntryKind::Texture => "texture",
            ModEntryKind::TextureReencode => "texture (reencode)",
            ModEntryKind::RawExport => "raw export",
            ModEntryKind::BinaryDiff => "binary diff",
        }
    }
}

impl std::fmt::Display for ModEntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Directory record of one entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModEntry {
    pub kind: ModEntryKind,
    pub name: String,
    pub offset: u64,
    pub length: u64,
}

impl ModEntry {
    /// Where this entry's payload goes
    pub fn target(&self) -> Result<EntryTarget> {
        EntryTarget::parse(self.kind, &self.name)
    }
}

/// Where an entry's payload goes
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntryTarget {
    /// Every catalogued location of the texture with this top-mip checksum
    Texture { name: String, crc: u32 },
    /// One export of one package, path relative to the game root
    Export { package_path: String, export_index: usize },
}

impl EntryTarget {
    /// Parse an entry name according to its kind
    pub fn parse(kind: ModEntryKind, name: &str) -> Result<Self> {
        let malformed = || Error::MalformedEntryName(name.to_string());
        if kind.is_texture() {
            let (texture, crc) = name.rsplit_once("_0x").ok_or_else(malformed)?;
            if crc.len() != 8 || texture.is_empty() {
                return Err(malformed());
            }
            let crc = u32::from_str_radix(crc, 16).map_err(|_| malformed())?;
            Ok(EntryTarget::Texture {
                name: texture.to_string(),
                crc,
            })
        } else {
            let (package, index) = name.rsplit_once('#').ok_or_else(malformed)?;
            if package.is_empty() {
                return Err(malformed());
            }
            let export_index = index.parse().map_err(|_| malformed())?;
            Ok(EntryTarget::Export {
                package_path: package.replace('\\', "/"),
                export_index,
            })
        }
    }

    /// Entry name for this target
    #[must_use]
    pub fn entry_name(&self) -> String {
        match self {
            EntryTarget::Texture { name, crc } => texture_entry_name(name, *crc),
            EntryTarget::Export {
                package_path,
                export_index,
            } => export_entry_name(package_path, *export_index),
        }
    }
}

/// `<name>_0x<CRC>` with the CRC as eight uppercase hex digits
#[must_use]
pub fn texture_entry_name(name: &str, crc: u32) -> String {
    format!("{name}_0x{crc:08X}")
}

/// `<package path>#<export index>`
#[must_use]
pub fn export_entry_name(package_path: &str, export_index: usize) -> String {
    format!("{}#{export_index}", package_path.replace('\\', "/"))
}
