//! Offset allocation in the caches this tool owns
//!
//! Payloads either overwrite the slot a mip already occupies (when the new
//! bytes fit and the cache is one of ours) or are appended to the active mod
//! cache. A cache that would cross the ceiling is retired for the rest of the
//! run and the next roll-over name is used instead.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::{DEFAULT_CEILING, DEFAULT_MARGIN, GUID_SIZE, MAX_ROLLOVER, TFC_EXTENSION};
use crate::error::{Error, Result};

/// Size comparison used for in-place overwrites
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReuseBoundary {
    /// New payload may be as large as the old slot
    #[default]
    AllowEqual,
    /// New payload must be strictly smaller than the old slot
    StrictlySmaller,
}

impl ReuseBoundary {
    #[must_use]
    pub fn permits(self, new_len: usize, old_len: usize) -> bool {
        match self {
            ReuseBoundary::AllowEqual => new_len <= old_len,
            ReuseBoundary::StrictlySmaller => new_len < old_len,
        }
    }
}

/// Slot currently held by a mip of the same size
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReuseSlot {
    pub cache_name: String,
    pub guid: [u8; 16],
    pub offset: u32,
    pub compressed_size: u32,
}

/// Where a payload was written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub cache_name: String,
    pub guid: [u8; 16],
    pub offset: u32,
    pub path: PathBuf,
    /// Overwrote an existing slot rather than appending
    pub reused: bool,
}

#[derive(Debug, Clone)]
struct ActiveCache {
    name: String,
    guid: [u8; 16],
    path: PathBuf,
    len: u64,
    /// Position in the roll-over sequence (0 = base name)
    sequence: usize,
}

/// Allocator for one install run
#[derive(Debug)]
pub struct TfcAllocator {
    dir: PathBuf,
    base_name: String,
    ceiling: u64,
    margin: u64,
    boundary: ReuseBoundary,
    active: Option<ActiveCache>,
    appended_bytes: u64,
}

impl TfcAllocator {
    /// Allocator appending to `<dir>/<base_name>.tfc` and its roll-overs
    pub fn new<P: AsRef<Path>>(dir: P, base_name: &str) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            base_name: base_name.to_string(),
            ceiling: DEFAULT_CEILING,
            margin: DEFAULT_MARGIN,
            boundary: ReuseBoundary::default(),
            active: None,
            appended_bytes: 0,
        }
    }

    #[must_use]
    pub fn with_ceiling(mut self, ceiling: u64) -> Self {
        self.ceiling = ceiling;
        self
    }

    #[must_use]
    pub fn with_margin(mut self, margin: u64) -> Self {
        self.margin = margin;
        self
    }

    #[must_use]
    pub fn with_reuse_boundary(mut self, boundary: ReuseBoundary) -> Self {
        self.boundary = boundary;
        self
    }

    pub fn base_name(&self) -> &str {
        &self.base_name
    }

    /// Bytes appended during this run
    pub fn appended_bytes(&self) -> u64 {
        self.appended_bytes
    }

    fn candidate_name(&self, sequence: usize) -> String {
        if sequence == 0 {
            self.base_name.clone()
        } else {
            format!("{}_{sequence}", self.base_name)
        }
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.{TFC_EXTENSION}"))
    }

    /// Whether `name` is the mod cache or one of its roll-overs
    pub fn is_managed(&self, name: &str) -> bool {
        if name.eq_ignore_ascii_case(&self.base_name) {
            return true;
        }
        let Some(prefix) = name.get(..self.base_name.len()) else {
            return false;
        };
        if !prefix.eq_ignore_ascii_case(&self.base_name) {
            return false;
        }
        name[self.base_name.len()..]
            .strip_prefix('_')
            .and_then(|n| n.parse::<usize>().ok())
            .is_some_and(|n| (1..=MAX_ROLLOVER).contains(&n))
    }

    /// Name and GUID of the cache new payloads go to, opening it if needed
    pub fn active_cache(&mut self) -> Result<(String, [u8; 16])> {
        let active = self.ensure_active(0)?;
        Ok((active.name.clone(), active.guid))
    }

    /// Make sure the active cache can take `bytes` more without rolling over,
    /// so that the mips of one texture all land in the same cache.
    pub fn reserve(&mut self, bytes: u64) -> Result<(String, [u8; 16])> {
        let active = self.ensure_active(bytes)?;
        Ok((active.name.clone(), active.guid))
    }

    /// Write `payload`, reusing `reuse` in place when allowed.
    ///
    /// # Errors
    /// [`Error::CacheCapacityExhausted`] when no roll-over name has room.
    pub fn allocate(&mut self, payload: &[u8], reuse: Option<&ReuseSlot>) -> Result<Allocation> {
        if let Some(slot) = reuse {
            if let Some(allocation) = self.try_overwrite(payload, slot)? {
                return Ok(allocation);
            }
        }

        let (base, ceiling) = (self.base_name.clone(), self.ceiling);
        let active = self.ensure_active(payload.len() as u64)?;
        let offset = u32::try_from(active.len).map_err(|_| Error::CacheCapacityExhausted {
            base,
            ceiling,
            attempts: active.sequence + 1,
        })?;

        let mut file = OpenOptions::new().append(true).open(&active.path)?;
        file.write_all(payload)?;
        active.len += payload.len() as u64;
        let allocation = Allocation {
            cache_name: active.name.clone(),
            guid: active.guid,
            offset,
            path: active.path.clone(),
            reused: false,
        };
        self.appended_bytes += payload.len() as u64;
        tracing::debug!(
            "Appended {} bytes to {} at {}",
            payload.len(),
            allocation.cache_name,
            offset
        );
        Ok(allocation)
    }

    fn try_overwrite(&self, payload: &[u8], slot: &ReuseSlot) -> Result<Option<Allocation>> {
        if !self.is_managed(&slot.cache_name)
            || !self.boundary.permits(payload.len(), slot.compressed_size as usize)
        {
            return Ok(None);
        }
        let path = self.path_for(&slot.cache_name);
        let Ok(mut file) = OpenOptions::new().read(true).write(true).open(&path) else {
            return Ok(None);
        };
        if read_guid(&mut file)? != slot.guid {
            return Ok(None);
        }
        let end = u64::from(slot.offset) + u64::from(slot.compressed_size);
        if u64::from(slot.offset) < GUID_SIZE as u64 || end > file.metadata()?.len() {
            return Ok(None);
        }

        file.seek(SeekFrom::Start(u64::from(slot.offset)))?;
        file.write_all(payload)?;
        tracing::debug!(
            "Overwrote {} bytes in {} at {}",
            payload.len(),
            slot.cache_name,
            slot.offset
        );
        Ok(Some(Allocation {
            cache_name: slot.cache_name.clone(),
            guid: slot.guid,
            offset: slot.offset,
            path,
            reused: true,
        }))
    }

    fn fits(&self, len: u64, additional: u64) -> bool {
        len.saturating_add(self.margin).saturating_add(additional) <= self.ceiling
    }

    /// Active cache with room for `additional` bytes, rolling over if needed
    fn ensure_active(&mut self, additional: u64) -> Result<&mut ActiveCache> {
        let mut start = 0;
        if let Some(active) = self.active.take() {
            if self.fits(active.len, additional) {
                return Ok(self.active.insert(active));
            }
            tracing::info!(
                "Texture cache {} reached {} bytes, rolling over",
                active.name,
                active.len
            );
            start = active.sequence + 1;
        }

        for sequence in start..=MAX_ROLLOVER {
            let name = self.candidate_name(sequence);
            let path = self.path_for(&name);
            let candidate = if path.exists() {
                let len = std::fs::metadata(&path)?.len();
                if !self.fits(len, additional) {
                    continue;
                }
                let mut file = File::open(&path)?;
                ActiveCache {
                    guid: read_guid(&mut file)?,
                    name,
                    path,
                    len,
                    sequence,
                }
            } else {
                if !self.fits(GUID_SIZE as u64, additional) {
                    continue;
                }
                let guid = *uuid::Uuid::new_v4().as_bytes();
                std::fs::create_dir_all(&self.dir)?;
                std::fs::write(&path, guid)?;
                tracing::info!("Created texture cache {}", path.display());
                ActiveCache {
                    name,
                    guid,
                    path,
                    len: GUID_SIZE as u64,
                    sequence,
                }
            };
            return Ok(self.active.insert(candidate));
        }

        Err(Error::CacheCapacityExhausted {
            base: self.base_name.clone(),
            ceiling: self.ceiling,
            attempts: MAX_ROLLOVER + 1 - start,
        })
    }
}

fn read_guid(file: &mut File) -> Result<[u8; 16]> {
    let mut guid = [0u8; GUID_SIZE];
    file.seek(SeekFrom::Start(0))?;
    file.read_exact(&mut guid)?;
    Ok(guid)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(name: &str, guid: [u8; 16], offset: u32, size: u32) -> ReuseSlot {
        ReuseSlot {
            cache_name: name.to_string(),
            guid,
            offset,
            compressed_size: size,
        }
    }

    #[test]
    fn test_first_allocation_creates_cache_with_guid() {
        let dir = tempfile::tempdir().unwrap();
        let mut allocator = TfcAllocator::new(dir.path(), "TexturesMod");
        let allocation = allocator.allocate(b"abcd", None).unwrap();
        assert_eq!(allocation.offset, 16);
        assert!(!allocation.reused);

        let bytes = std::fs::read(dir.path().join("TexturesMod.tfc")).unwrap();
        assert_eq!(&bytes[..16], &allocation.guid);
        assert_eq!(&bytes[16..], b"abcd");
    }

    #[test]
    fn test_smaller_payload_reuses_slot() {
        let dir = tempfile::tempdir().unwrap();
        let mut allocator = TfcAllocator::new(dir.path(), "TexturesMod");
        let first = allocator.allocate(&[1u8; 100], None).unwrap();
        allocator.allocate(&[2u8; 10], None).unwrap();

        let hint = slot("TexturesMod", first.guid, first.offset, 100);
        let again = allocator.allocate(&[3u8; 60], Some(&hint)).unwrap();
        assert!(again.reused);
        assert_eq!(again.offset, first.offset);

        let bigger = allocator.allocate(&[4u8; 101], Some(&hint)).unwrap();
        assert!(!bigger.reused);
        assert!(bigger.offset >= 16 + 110);
    }

    #[test]
    fn test_reuse_boundary_is_configurable() {
        let dir = tempfile::tempdir().unwrap();
        let mut allocator = TfcAllocator::new(dir.path(), "TexturesMod")
            .with_reuse_boundary(ReuseBoundary::StrictlySmaller);
        let first = allocator.allocate(&[1u8; 50], None).unwrap();
        let hint = slot("TexturesMod", first.guid, first.offset, 50);
        assert!(!allocator.allocate(&[2u8; 50], Some(&hint)).unwrap().reused);
        assert!(allocator.allocate(&[2u8; 49], Some(&hint)).unwrap().reused);
    }

    #[test]
    fn test_stock_cache_and_changed_guid_are_never_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Textures.tfc"), [9u8; 64]).unwrap();
        let mut allocator = TfcAllocator::new(dir.path(), "TexturesMod");

        let stock = slot("Textures", [9u8; 16], 16, 48);
        let allocation = allocator.allocate(&[1u8; 8], Some(&stock)).unwrap();
        assert_eq!(allocation.cache_name, "TexturesMod");
        assert_eq!(std::fs::read(dir.path().join("Textures.tfc")).unwrap(), vec![9u8; 64]);

        let stale = slot("TexturesMod", [0u8; 16], allocation.offset, 8);
        assert!(!allocator.allocate(&[2u8; 8], Some(&stale)).unwrap().reused);
    }

    #[test]
    fn test_full_cache_rolls_over() {
        let dir = tempfile::tempdir().unwrap();
        let ceiling = 1000;
        let margin = 100;
        std::fs::write(dir.path().join("TexturesMod.tfc"), vec![5u8; 900]).unwrap();

        let mut allocator = TfcAllocator::new(dir.path(), "TexturesMod")
            .with_ceiling(ceiling)
            .with_margin(margin);
        let allocation = allocator.allocate(&[1u8; 10], None).unwrap();
        assert_eq!(allocation.cache_name, "TexturesMod_1");
        assert_eq!(allocation.offset, 16);
        assert_eq!(std::fs::metadata(dir.path().join("TexturesMod.tfc")).unwrap().len(), 900);

        // Later allocations stay on the roll-over
        let next = allocator.allocate(&[1u8; 10], None).unwrap();
        assert_eq!(next.cache_name, "TexturesMod_1");
        assert_eq!(next.offset, 26);
    }

    #[test]
    fn test_exhausted_range_is_a_capacity_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut allocator = TfcAllocator::new(dir.path(), "TexturesMod")
            .with_ceiling(100)
            .with_margin(0);
        let err = allocator.allocate(&[0u8; 200], None).unwrap_err();
        assert!(err.is_fatal_for_run());
        assert!(matches!(err, Error::CacheCapacityExhausted { attempts: 101, .. }));
    }

    #[test]
    fn test_managed_names() {
        let allocator = TfcAllocator::new("/tmp", "TexturesMod");
        assert!(allocator.is_managed("texturesmod"));
        assert!(allocator.is_managed("TexturesMod_7"));
        assert!(!allocator.is_managed("TexturesMod_101"));
        assert!(!allocator.is_managed("Textures"));
        assert!(!allocator.is_managed("TexturesModded"));
    }
}
