//! Decoded payloads shared by every location a payload is installed to
//!
//! Each payload gets a use count when jobs are matched. The first use decodes
//! it, later uses share the decoded set, and the last use drops it. Payloads
//! that would push the cache over its limit are handed out without being
//! kept and are decoded again on their next use.
//!
//! A kept payload also keeps what later uses derive from it: its mips encoded
//! per storage codec and its conversions to other pixel formats. Those count
//! toward the limit once they exist.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::compression::{self, CompressionMethod, DEFAULT_BLOCK_SIZE};
use crate::error::Result;
use crate::modfile::MipSet;
use crate::texture::PixelFormat;

/// Index of a payload among all entries of all mods in a run
pub type PayloadId = usize;

/// Decoded mip set plus the forms derived from it
#[derive(Debug)]
pub struct PreparedPayload {
    pub mips: MipSet,
    encoded: RefCell<HashMap<u32, Rc<Vec<Vec<u8>>>>>,
    converted: RefCell<HashMap<PixelFormat, Rc<PreparedPayload>>>,
}

impl PreparedPayload {
    #[must_use]
    pub fn new(mips: MipSet) -> Self {
        Self {
            mips,
            encoded: RefCell::new(HashMap::new()),
            converted: RefCell::new(HashMap::new()),
        }
    }

    /// Every mip encoded with `codec` (`None` = stored raw), smallest first
    pub fn stored(&self, codec: Option<CompressionMethod>) -> Result<Rc<Vec<Vec<u8>>>> {
        let key = codec.map_or(0, CompressionMethod::to_id);
        if let Some(existing) = self.encoded.borrow().get(&key) {
            return Ok(Rc::clone(existing));
        }
        let encoded = self
            .mips
            .mips
            .iter()
            .map(|mip| match codec {
                Some(method) => compression::encode(&mip.data, DEFAULT_BLOCK_SIZE, &method),
                None => Ok(mip.data.clone()),
            })
            .collect::<Result<Vec<_>>>()?;
        let encoded = Rc::new(encoded);
        self.encoded.borrow_mut().insert(key, Rc::clone(&encoded));
        Ok(encoded)
    }

    /// This payload in `target` format, calling `convert` the first time
    pub fn converted<F>(&self, target: &PixelFormat, convert: F) -> Result<Rc<PreparedPayload>>
    where
        F: FnOnce(&MipSet) -> Result<MipSet>,
    {
        if let Some(existing) = self.converted.borrow().get(target) {
            return Ok(Rc::clone(existing));
        }
        let converted = Rc::new(PreparedPayload::new(convert(&self.mips)?));
        self.converted
            .borrow_mut()
            .insert(target.clone(), Rc::clone(&converted));
        Ok(converted)
    }

    /// Bytes held: decoded mips, encoded forms and conversions
    #[must_use]
    pub fn footprint(&self) -> u64 {
        let encoded: usize = self
            .encoded
            .borrow()
            .values()
            .flat_map(|forms| forms.iter().map(Vec::len))
            .sum();
        let converted: u64 = self
            .converted
            .borrow()
            .values()
            .map(|payload| payload.footprint())
            .sum();
        self.mips.byte_len() as u64 + encoded as u64 + converted
    }
}

/// Cache statistics for one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    /// Payloads not kept, or dropped early, because of the memory limit
    pub evictions: usize,
    /// Bytes currently held, derived forms included
    pub bytes: u64,
    pub peak_bytes: u64,
}

#[derive(Debug)]
struct CacheEntry {
    payload: Option<Rc<PreparedPayload>>,
    size: u64,
    remaining: usize,
}

/// Use-counted payload cache with a byte limit
#[derive(Debug)]
pub struct PayloadCache {
    limit: u64,
    entries: HashMap<PayloadId, CacheEntry>,
    stats: CacheStats,
}

impl PayloadCache {
    #[must_use]
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            entries: HashMap::new(),
            stats: CacheStats::default(),
        }
    }

    /// Add `uses` pending uses of payload `id`
    pub fn register(&mut self, id: PayloadId, uses: usize) {
        self.entries
            .entry(id)
            .or_insert(CacheEntry {
                payload: None,
                size: 0,
                remaining: 0,
            })
            .remaining += uses;
    }

    /// Pending uses of payload `id`
    pub fn remaining(&self, id: PayloadId) -> usize {
        self.entries.get(&id).map_or(0, |e| e.remaining)
    }

    /// Decoded payload `id`, calling `load` on a miss
    pub fn acquire<F>(&mut self, id: PayloadId, load: F) -> Result<Rc<PreparedPayload>>
    where
        F: FnOnce() -> Result<MipSet>,
    {
        if let Some(payload) = self.entries.get(&id).and_then(|e| e.payload.as_ref()) {
            self.stats.hits += 1;
            return Ok(Rc::clone(payload));
        }

        self.stats.misses += 1;
        let payload = Rc::new(PreparedPayload::new(load()?));
        let size = payload.footprint();
        let Some(entry) = self.entries.get_mut(&id) else {
            // Not registered: a one-off use
            return Ok(payload);
        };
        if entry.remaining <= 1 {
            return Ok(payload);
        }
        if self.stats.bytes + size > self.limit {
            self.stats.evictions += 1;
            tracing::debug!(
                "Payload {} ({} bytes) not kept, cache holds {} of {} bytes",
                id,
                size,
                self.stats.bytes,
                self.limit
            );
            return Ok(payload);
        }
        entry.payload = Some(Rc::clone(&payload));
        entry.size = size;
        self.stats.bytes += size;
        self.stats.peak_bytes = self.stats.peak_bytes.max(self.stats.bytes);
        Ok(payload)
    }

    /// Finish one use of payload `id`; the last use drops it.
    ///
    /// A payload that grew past the limit while in use is dropped early.
    pub fn release(&mut self, id: PayloadId) {
        let Some(entry) = self.entries.get_mut(&id) else {
            return;
        };
        entry.remaining = entry.remaining.saturating_sub(1);
        if entry.remaining == 0 {
            if let Some(entry) = self.entries.remove(&id) {
                self.stats.bytes -= entry.size;
            }
            return;
        }

        let Some(footprint) = entry.payload.as_ref().map(|p| p.footprint()) else {
            return;
        };
        let others = self.stats.bytes - entry.size;
        if others + footprint > self.limit {
            tracing::debug!(
                "Payload {} grew to {} bytes, dropping it ({} of {} bytes held)",
                id,
                footprint,
                self.stats.bytes,
                self.limit
            );
            entry.payload = None;
            entry.size = 0;
            self.stats.bytes = others;
            self.stats.evictions += 1;
        } else {
            entry.size = footprint;
            self.stats.bytes = others + footprint;
            self.stats.peak_bytes = self.stats.peak_bytes.max(self.stats.bytes);
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::modfile::MipImage;
    use crate::texture::PixelFormat;

    fn set(bytes: usize) -> MipSet {
        MipSet::new(
            PixelFormat::G8,
            vec![MipImage {
                width: 4,
                height: 4,
                data: vec![1u8; bytes],
            }],
        )
    }

    #[test]
    fn test_shared_until_last_use() {
        let mut cache = PayloadCache::new(1000);
        cache.register(7, 3);
        let loads = Cell::new(0);
        let load = || -> Result<MipSet> {
            loads.set(loads.get() + 1);
            Ok(set(100))
        };

        for _ in 0..3 {
            cache.acquire(7, load).unwrap();
            cache.release(7);
        }
        assert_eq!(loads.get(), 1);
        assert_eq!(cache.remaining(7), 0);
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (2, 1));
        assert_eq!(stats.bytes, 0);
        assert_eq!(stats.peak_bytes, 100);
    }

    #[test]
    fn test_over_limit_payloads_are_decoded_again() {
        let mut cache = PayloadCache::new(150);
        cache.register(1, 2);
        cache.register(2, 2);

        cache.acquire(1, || Ok(set(100))).unwrap();
        cache.acquire(2, || Ok(set(100))).unwrap();
        cache.release(2);
        cache.acquire(2, || Ok(set(100))).unwrap();

        let stats = cache.stats();
        assert_eq!(stats.misses, 3);
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.bytes, 100);

        cache.release(1);
        cache.release(1);
        cache.release(2);
        assert_eq!(cache.stats().bytes, 0);
    }

    #[test]
    fn test_encoded_forms_are_reused() {
        let payload = PreparedPayload::new(set(64));
        let first = payload.stored(Some(CompressionMethod::Zlib)).unwrap();
        let second = payload.stored(Some(CompressionMethod::Zlib)).unwrap();
        assert!(Rc::ptr_eq(&first, &second));
        assert_eq!(payload.stored(None).unwrap()[0], vec![1u8; 64]);
        assert_eq!(payload.footprint(), 64 + first[0].len() as u64 + 64);
    }

    #[test]
    fn test_encoded_forms_count_toward_the_limit() {
        let mut cache = PayloadCache::new(150);
        cache.register(1, 3);

        let payload = cache.acquire(1, || Ok(set(100))).unwrap();
        assert_eq!(cache.stats().bytes, 100);
        payload.stored(None).unwrap();
        cache.release(1);
        let stats = cache.stats();
        assert_eq!((stats.bytes, stats.evictions), (0, 1));

        // Dropped early, so the next use decodes again
        cache.acquire(1, || Ok(set(100))).unwrap();
        assert_eq!(cache.stats().misses, 2);
        cache.release(1);
        assert_eq!(cache.stats().bytes, 100);
        cache.release(1);
        assert_eq!(cache.stats().bytes, 0);
    }

    #[test]
    fn test_conversions_are_kept_with_their_payload() {
        let mut cache = PayloadCache::new(10_000);
        cache.register(4, 2);
        let conversions = Cell::new(0);
        let to_argb = |mips: &MipSet| -> Result<MipSet> {
            conversions.set(conversions.get() + 1);
            Ok(MipSet::new(PixelFormat::A8R8G8B8, mips.mips.clone()))
        };

        for _ in 0..2 {
            let payload = cache.acquire(4, || Ok(set(100))).unwrap();
            let converted = payload.converted(&PixelFormat::A8R8G8B8, to_argb).unwrap();
            assert_eq!(converted.mips.format, PixelFormat::A8R8G8B8);
            cache.release(4);
        }
        assert_eq!(conversions.get(), 1);
        assert_eq!(cache.stats().misses, 1);
        assert_eq!(cache.stats().peak_bytes, 200);
    }
}
