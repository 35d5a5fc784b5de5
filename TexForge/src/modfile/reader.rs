//! Mod container reader

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use super::mipset::MipSet;
use super::types::{ModEntry, ModEntryKind};
use super::{HEADER_SIZE, MOD_MAGIC, MOD_VERSION};
use crate::compression::{self, CompressionMethod};
use crate::error::{Error, Result};
use crate::variant::GameVariant;

/// Reads a mod container's directory and entry payloads
pub struct ModReader<R: Read + Seek> {
    reader: BufReader<R>,
    variant: GameVariant,
    entries: Vec<ModEntry>,
}

impl ModReader<File> {
    /// Open a mod file, validating its header and directory
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(File::open(path)?)
    }
}

impl<R: Read + Seek> ModReader<R> {
    /// Read the header and directory from `source`.
    ///
    /// A wrong magic or format version is always an error.
    pub fn new(source: R) -> Result<Self> {
        let mut reader = BufReader::new(source);
        let file_size = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(0))?;

        let mut magic = [0u8; 4];
        read_exact(&mut reader, &mut magic)?;
        if &magic != MOD_MAGIC {
            return Err(Error::InvalidModMagic(magic));
        }
        let version = read_u32(&mut reader)?;
        if version != MOD_VERSION {
            return Err(Error::UnsupportedModVersion {
                version,
                expected: MOD_VERSION,
            });
        }
        let directory_offset = read_u64(&mut reader)?;
        if directory_offset < HEADER_SIZE || directory_offset > file_size {
            return Err(Error::ModEntryOutOfBounds {
                name: format!("<directory at {directory_offset}>"),
            });
        }

        reader.seek(SeekFrom::Start(directory_offset))?;
        let variant_id = read_u32(&mut reader)?;
        let variant = GameVariant::from_id(variant_id).ok_or(Error::UnknownModVariant(variant_id))?;
        let count = read_u32(&mut reader)?;

        let mut entries = Vec::new();
        for _ in 0..count {
            let kind = ModEntryKind::from_tag(read_u32(&mut reader)?)?;
            let name = read_c_string(&mut reader)?;
            let offset = read_u64(&mut reader)?;
            let length = read_u64(&mut reader)?;
            let in_data_region = offset >= HEADER_SIZE
                && offset
                    .checked_add(length)
                    .is_some_and(|end| end <= directory_offset);
            if !in_data_region {
                return Err(Error::ModEntryOutOfBounds { name });
            }
            entries.push(ModEntry {
                kind,
                name,
                offset,
                length,
            });
        }

        tracing::debug!("Mod for {} with {} entries", variant, entries.len());
        Ok(Self {
            reader,
            variant,
            entries,
        })
    }

    /// Game variant the mod was built for
    pub fn variant(&self) -> GameVariant {
        self.variant
    }

    pub fn entries(&self) -> &[ModEntry] {
        &self.entries
    }

    /// Decoded payload of `entry`
    pub fn read_entry(&mut self, entry: &ModEntry) -> Result<Vec<u8>> {
        let length = usize::try_from(entry.length).map_err(|_| Error::ModEntryOutOfBounds {
            name: entry.name.clone(),
        })?;
        self.reader.seek(SeekFrom::Start(entry.offset))?;
        let mut frame = vec![0u8; length];
        read_exact(&mut self.reader, &mut frame)?;
        compression::decode(&frame, &CompressionMethod::Zlib)
    }

    /// Decoded mip set of a texture entry
    pub fn read_mip_set(&mut self, entry: &ModEntry) -> Result<MipSet> {
        MipSet::from_bytes(&self.read_entry(entry)?)
    }

    /// Find an entry by name, ignoring case
    pub fn find(&self, name: &str) -> Option<&ModEntry> {
        self.entries.iter().find(|e| e.name.eq_ignore_ascii_case(name))
    }
}

fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        std::io::ErrorKind::UnexpectedEof => Error::UnexpectedEof,
        _ => Error::Io(e),
    })
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    read_exact(reader, &mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64<R: Read>(reader: &mut R) -> Result<u64> {
    let mut buf = [0u8; 8];
    read_exact(reader, &mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

/// NUL-terminated UTF-8 name
fn read_c_string<R: Read>(reader: &mut R) -> Result<String> {
    let mut bytes = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        read_exact(reader, &mut byte)?;
        if byte[0] == 0 {
            break;
        }
        bytes.push(byte[0]);
    }
    String::from_utf8(bytes).map_err(|e| {
        Error::MalformedEntryName(String::from_utf8_lossy(e.as_bytes()).into_owned())
    })
}
