//! Streaming mod container writer

use std::fs::OpenOptions;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

use super::diff::create_patch;
use super::mipset::MipSet;
use super::types::{ModEntry, ModEntryKind, export_entry_name, texture_entry_name};
use super::{DIRECTORY_OFFSET_POSITION, MOD_MAGIC, MOD_VERSION};
use crate::compression::{self, CompressionMethod, DEFAULT_BLOCK_SIZE};
use crate::error::Result;
use crate::variant::GameVariant;

/// Writes a mod container in one pass over its entries.
///
/// The header is reserved up front, each payload is appended as it is added,
/// and [`ModWriter::finish`] writes the directory and patches its offset into
/// the header.
pub struct ModWriter<W: Write + Seek> {
    output: W,
    variant: GameVariant,
    entries: Vec<ModEntry>,
}

impl ModWriter<BufWriter<std::fs::File>> {
    /// Create (or truncate) a mod file
    pub fn create(path: impl AsRef<Path>, variant: GameVariant) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(path)?;
        Self::new(BufWriter::new(file), variant)
    }
}

impl<W: Write + Seek> ModWriter<W> {
    /// Start a container on `output`, writing the header placeholder
    pub fn new(mut output: W, variant: GameVariant) -> Result<Self> {
        output.write_all(MOD_MAGIC)?;
        output.write_all(&MOD_VERSION.to_le_bytes())?;
        // Directory offset, patched by finish()
        output.write_all(&0u64.to_le_bytes())?;
        Ok(Self {
            output,
            variant,
            entries: Vec::new(),
        })
    }

    /// Append an entry. `payload` is stored as a zlib envelope frame.
    pub fn add_entry(&mut self, kind: ModEntryKind, name: &str, payload: &[u8]) -> Result<&ModEntry> {
        let frame = compression::encode(payload, DEFAULT_BLOCK_SIZE, &CompressionMethod::Zlib)?;
        let offset = self.output.stream_position()?;
        self.output.write_all(&frame)?;
        tracing::debug!(
            "Mod entry {} ({}): {} -> {} bytes",
            name,
            kind,
            payload.len(),
            frame.len()
        );
        self.entries.push(ModEntry {
            kind,
            name: name.to_string(),
            offset,
            length: frame.len() as u64,
        });
        Ok(&self.entries[self.entries.len() - 1])
    }

    /// Append a texture replacement keyed by the original's checksum
    pub fn add_texture(&mut self, name: &str, crc: u32, mips: &MipSet, reencode: bool) -> Result<&ModEntry> {
        let kind = if reencode {
            ModEntryKind::TextureReencode
        } else {
            ModEntryKind::Texture
        };
        self.add_entry(kind, &texture_entry_name(name, crc), &mips.to_bytes())
    }

    /// Append verbatim replacement bytes for one export
    pub fn add_raw_export(&mut self, package_path: &str, export_index: usize, data: &[u8]) -> Result<&ModEntry> {
        self.add_entry(
            ModEntryKind::RawExport,
            &export_entry_name(package_path, export_index),
            data,
        )
    }

    /// Append a diff from an export's current bytes to `new`
    pub fn add_binary_diff(
        &mut self,
        package_path: &str,
        export_index: usize,
        old: &[u8],
        new: &[u8],
    ) -> Result<&ModEntry> {
        let patch = create_patch(old, new);
        self.add_entry(
            ModEntryKind::BinaryDiff,
            &export_entry_name(package_path, export_index),
            &patch,
        )
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Write the directory, patch the header and return the output
    pub fn finish(mut self) -> Result<W> {
        let directory_offset = self.output.stream_position()?;

        let mut directory = Vec::new();
        directory.extend_from_slice(&self.variant.id().to_le_bytes());
        directory.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());
        for entry in &self.entries {
            directory.extend_from_slice(&entry.kind.tag().to_le_bytes());
            directory.extend_from_slice(entry.name.as_bytes());
            directory.push(0);
            directory.extend_from_slice(&entry.offset.to_le_bytes());
            directory.extend_from_slice(&entry.length.to_le_bytes());
        }
        self.output.write_all(&directory)?;

        self.output.seek(SeekFrom::Start(DIRECTORY_OFFSET_POSITION))?;
        self.output.write_all(&directory_offset.to_le_bytes())?;
        self.output.seek(SeekFrom::End(0))?;
        self.output.flush()?;

        tracing::info!(
            "Wrote mod with {} entries for {}",
            self.entries.len(),
            self.variant
        );
        Ok(self.output)
    }
}
