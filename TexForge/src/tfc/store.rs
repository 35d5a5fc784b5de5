//! Index of cache files under a game root

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use super::{GUID_SIZE, TFC_EXTENSION};
use crate::error::{Error, Result};

/// Cache files by case-insensitive name (file stem)
#[derive(Debug, Clone, Default)]
pub struct CacheStore {
    files: HashMap<String, PathBuf>,
}

impl CacheStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Index every `*.tfc` below `root`.
    ///
    /// When a name occurs twice the first path in walk order wins.
    pub fn scan(root: &Path) -> Result<Self> {
        let mut store = Self::new();
        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let is_cache = path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case(TFC_EXTENSION));
            if !is_cache {
                continue;
            }
            let Some(stem) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
                continue;
            };
            if let Some(existing) = store.path(&stem) {
                tracing::debug!(
                    "Ignoring duplicate cache {} (already have {})",
                    path.display(),
                    existing.display()
                );
                continue;
            }
            store.insert(&stem, path.to_path_buf());
        }
        tracing::debug!("Indexed {} texture caches under {}", store.len(), root.display());
        Ok(store)
    }

    pub fn insert(&mut self, name: &str, path: PathBuf) {
        self.files.insert(name.to_ascii_lowercase(), path);
    }

    pub fn path(&self, name: &str) -> Option<&Path> {
        self.files.get(&name.to_ascii_lowercase()).map(PathBuf::as_path)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.path(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn open(&self, name: &str) -> Result<(File, u64)> {
        let path = self.path(name).ok_or_else(|| Error::CacheFileNotFound {
            name: name.to_string(),
        })?;
        let file = File::open(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::CacheFileNotFound {
                name: name.to_string(),
            },
            _ => Error::Io(e),
        })?;
        let size = file.metadata()?.len();
        Ok((file, size))
    }

    /// GUID stored in the first 16 bytes of a cache
    pub fn guid(&self, name: &str) -> Result<[u8; 16]> {
        let bytes = self.read_at(name, 0, GUID_SIZE)?;
        let mut guid = [0u8; 16];
        guid.copy_from_slice(&bytes);
        Ok(guid)
    }

    /// Read `length` bytes at `offset` of a cache file
    pub fn read_at(&self, name: &str, offset: u64, length: usize) -> Result<Vec<u8>> {
        let (mut file, size) = self.open(name)?;
        if offset.saturating_add(length as u64) > size {
            return Err(Error::CacheReadOutOfBounds {
                name: name.to_string(),
                offset,
                length,
                size,
            });
        }
        file.seek(SeekFrom::Start(offset))?;
        let mut buffer = vec![0u8; length];
        file.read_exact(&mut buffer)?;
        Ok(buffer)
    }
}
