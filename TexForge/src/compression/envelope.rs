//! Chunked compression envelope
//!
//! Splits a buffer into fixed-size blocks, compresses each one independently and
//! frames them with a block table:
//!
//! ```text
//! tag u32 | block_size u32 | total_compressed u32 | total_uncompressed u32
//! (compressed_len u32, uncompressed_len u32) * ceil(total_uncompressed / block_size)
//! block data ...
//! ```
//!
//! Blocks are processed on the rayon pool. `collect` on an indexed parallel
//! iterator keeps every block in its input slot, so output order never depends
//! on completion order.

use byteorder::{ByteOrder, LittleEndian};
use rayon::prelude::*;

use super::BlockCodec;
use crate::error::{Error, Result};

/// Frame tag (shared with the package magic)
pub const ENVELOPE_TAG: u32 = 0x9E2A_83C1;

/// Default maximum uncompressed bytes per block (128 KiB)
pub const DEFAULT_BLOCK_SIZE: u32 = 0x20000;

/// Size of the fixed frame header
const HEADER_SIZE: usize = 16;

/// Size of one block table entry
const BLOCK_ENTRY_SIZE: usize = 8;

#[derive(Debug, Clone, Copy)]
struct BlockEntry {
    compressed_len: u32,
    uncompressed_len: u32,
}

impl BlockEntry {
    /// Bytes this block occupies in the data region
    fn stored_len(self) -> usize {
        if self.compressed_len == 0 {
            self.uncompressed_len as usize
        } else {
            self.compressed_len as usize
        }
    }

    fn is_verbatim(self) -> bool {
        self.compressed_len == 0 || self.compressed_len == self.uncompressed_len
    }
}

/// Encode `data` into one envelope frame.
///
/// # Errors
/// Returns an error if a block fails to compress or the input exceeds 4 GiB.
pub fn encode(data: &[u8], block_size: u32, codec: &dyn BlockCodec) -> Result<Vec<u8>> {
    if block_size == 0 {
        return Err(Error::corrupt_envelope("block size must be non-zero"));
    }
    let total_uncompressed =
        u32::try_from(data.len()).map_err(|_| Error::PackageTooLarge { size: data.len() })?;

    let blocks: Vec<Vec<u8>> = data
        .par_chunks(block_size as usize)
        .map(|chunk| {
            let packed = codec.compress_block(chunk)?;
            // Store incompressible blocks verbatim
            if packed.len() >= chunk.len() {
                Ok(chunk.to_vec())
            } else {
                Ok(packed)
            }
        })
        .collect::<Result<_>>()?;

    let total_compressed: usize = blocks.iter().map(Vec::len).sum();
    let total_compressed = u32::try_from(total_compressed)
        .map_err(|_| Error::PackageTooLarge { size: total_compressed })?;

    let table_len = HEADER_SIZE + BLOCK_ENTRY_SIZE * blocks.len();
    let mut out = vec![0u8; table_len];
    out.reserve(total_compressed as usize);

    LittleEndian::write_u32(&mut out[0..4], ENVELOPE_TAG);
    LittleEndian::write_u32(&mut out[4..8], block_size);
    LittleEndian::write_u32(&mut out[8..12], total_compressed);
    LittleEndian::write_u32(&mut out[12..16], total_uncompressed);

    for (i, (block, chunk)) in blocks.iter().zip(data.chunks(block_size as usize)).enumerate() {
        let at = HEADER_SIZE + i * BLOCK_ENTRY_SIZE;
        LittleEndian::write_u32(&mut out[at..at + 4], block.len() as u32);
        LittleEndian::write_u32(&mut out[at + 4..at + 8], chunk.len() as u32);
    }
    for block in &blocks {
        out.extend_from_slice(block);
    }

    Ok(out)
}

/// Decode a buffer that holds exactly one envelope frame.
///
/// The frame length must equal the header, the block table and the declared
/// compressed total; anything else is corrupt data.
pub fn decode(frame: &[u8], codec: &dyn BlockCodec) -> Result<Vec<u8>> {
    let (data, consumed) = decode_prefix(frame, codec)?;
    if consumed != frame.len() {
        return Err(Error::corrupt_envelope(format!(
            "frame declares {consumed} bytes but {} were supplied",
            frame.len()
        )));
    }
    Ok(data)
}

/// Decode one envelope frame from the start of `bytes`.
///
/// Returns the decoded buffer and the number of bytes the frame occupied.
pub fn decode_prefix(bytes: &[u8], codec: &dyn BlockCodec) -> Result<(Vec<u8>, usize)> {
    if bytes.len() < HEADER_SIZE {
        return Err(Error::corrupt_envelope(format!(
            "frame header truncated ({} bytes)",
            bytes.len()
        )));
    }

    let tag = LittleEndian::read_u32(&bytes[0..4]);
    if tag != ENVELOPE_TAG {
        return Err(Error::corrupt_envelope(format!("bad frame tag {tag:#010X}")));
    }
    let block_size = LittleEndian::read_u32(&bytes[4..8]);
    if block_size == 0 {
        return Err(Error::corrupt_envelope("block size is zero"));
    }
    let total_compressed = LittleEndian::read_u32(&bytes[8..12]) as usize;
    let total_uncompressed = LittleEndian::read_u32(&bytes[12..16]) as usize;

    let block_count = total_uncompressed.div_ceil(block_size as usize);
    let table_end = HEADER_SIZE + block_count * BLOCK_ENTRY_SIZE;
    if bytes.len() < table_end {
        return Err(Error::corrupt_envelope(format!(
            "block table truncated: need {table_end} bytes, have {}",
            bytes.len()
        )));
    }

    let entries: Vec<BlockEntry> = (0..block_count)
        .map(|i| {
            let at = HEADER_SIZE + i * BLOCK_ENTRY_SIZE;
            BlockEntry {
                compressed_len: LittleEndian::read_u32(&bytes[at..at + 4]),
                uncompressed_len: LittleEndian::read_u32(&bytes[at + 4..at + 8]),
            }
        })
        .collect();

    let stored_sum: usize = entries.iter().map(|e| e.stored_len()).sum();
    if stored_sum != total_compressed {
        return Err(Error::corrupt_envelope(format!(
            "block table sums to {stored_sum} compressed bytes, header declares {total_compressed}"
        )));
    }
    let uncompressed_sum: usize = entries.iter().map(|e| e.uncompressed_len as usize).sum();
    if uncompressed_sum != total_uncompressed {
        return Err(Error::corrupt_envelope(format!(
            "block table sums to {uncompressed_sum} uncompressed bytes, header declares {total_uncompressed}"
        )));
    }
    if let Some(oversized) = entries.iter().find(|e| e.uncompressed_len > block_size) {
        return Err(Error::corrupt_envelope(format!(
            "block of {} bytes exceeds block size {block_size}",
            oversized.uncompressed_len
        )));
    }

    let frame_len = table_end + total_compressed;
    if bytes.len() < frame_len {
        return Err(Error::corrupt_envelope(format!(
            "frame data truncated: need {frame_len} bytes, have {}",
            bytes.len()
        )));
    }

    let mut slices = Vec::with_capacity(entries.len());
    let mut cursor = table_end;
    for entry in &entries {
        let len = entry.stored_len();
        slices.push((*entry, &bytes[cursor..cursor + len]));
        cursor += len;
    }

    let blocks: Vec<Vec<u8>> = slices
        .par_iter()
        .map(|(entry, data)| {
            if entry.is_verbatim() {
                return Ok(data.to_vec());
            }
            let block = codec.decompress_block(data, entry.uncompressed_len as usize)?;
            if block.len() != entry.uncompressed_len as usize {
                return Err(Error::corrupt_envelope(format!(
                    "block decompressed to {} bytes, expected {}",
                    block.len(),
                    entry.uncompressed_len
                )));
            }
            Ok(block)
        })
        .collect::<Result<_>>()?;

    let mut out = Vec::with_capacity(total_uncompressed);
    for block in blocks {
        out.extend_from_slice(&block);
    }

    Ok((out, frame_len))
}

/// Read the uncompressed size declared by a frame header without decoding it.
pub fn declared_uncompressed_size(bytes: &[u8]) -> Option<u32> {
    if bytes.len() < HEADER_SIZE || LittleEndian::read_u32(&bytes[0..4]) != ENVELOPE_TAG {
        return None;
    }
    Some(LittleEndian::read_u32(&bytes[12..16]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::CompressionMethod;
    use proptest::prelude::*;

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| ((i * 7) % 251) as u8).collect()
    }

    #[test]
    fn test_round_trip_multiple_blocks() {
        let data = sample(300_000);
        let frame = encode(&data, DEFAULT_BLOCK_SIZE, &CompressionMethod::Zlib).unwrap();
        assert_eq!(decode(&frame, &CompressionMethod::Zlib).unwrap(), data);
    }

    #[test]
    fn test_empty_buffer_has_no_blocks() {
        let frame = encode(&[], 1024, &CompressionMethod::Zlib).unwrap();
        assert_eq!(frame.len(), HEADER_SIZE);
        assert!(decode(&frame, &CompressionMethod::Zlib).unwrap().is_empty());
    }

    #[test]
    fn test_incompressible_block_is_stored_verbatim() {
        // A short block always grows under zlib framing
        let data = vec![0x5Au8, 0x13, 0x77];
        let frame = encode(&data, 1024, &CompressionMethod::Zlib).unwrap();
        let compressed_len = LittleEndian::read_u32(&frame[16..20]);
        let uncompressed_len = LittleEndian::read_u32(&frame[20..24]);
        assert_eq!(compressed_len, uncompressed_len);
        assert_eq!(&frame[24..], &data[..]);
        assert_eq!(decode(&frame, &CompressionMethod::Zlib).unwrap(), data);
    }

    #[test]
    fn test_zero_length_entry_means_verbatim() {
        let data = b"abcdef".to_vec();
        let mut frame = vec![0u8; 24];
        LittleEndian::write_u32(&mut frame[0..4], ENVELOPE_TAG);
        LittleEndian::write_u32(&mut frame[4..8], 1024);
        LittleEndian::write_u32(&mut frame[8..12], 6);
        LittleEndian::write_u32(&mut frame[12..16], 6);
        LittleEndian::write_u32(&mut frame[16..20], 0);
        LittleEndian::write_u32(&mut frame[20..24], 6);
        frame.extend_from_slice(&data);
        assert_eq!(decode(&frame, &CompressionMethod::Zlib).unwrap(), data);
    }

    #[test]
    fn test_declared_total_mismatch_is_corrupt() {
        let data = sample(5000);
        let mut frame = encode(&data, 1024, &CompressionMethod::Zlib).unwrap();
        let declared = LittleEndian::read_u32(&frame[8..12]);
        LittleEndian::write_u32(&mut frame[8..12], declared + 1);
        frame.push(0);
        let err = decode(&frame, &CompressionMethod::Zlib).unwrap_err();
        assert!(matches!(err, Error::CorruptEnvelope { .. }));
        assert_eq!(err.kind(), crate::error::ErrorKind::CorruptData);
    }

    #[test]
    fn test_trailing_bytes_are_rejected_by_exact_decode() {
        let data = sample(2000);
        let mut frame = encode(&data, 512, &CompressionMethod::Lz4).unwrap();
        let exact_len = frame.len();
        frame.extend_from_slice(&[1, 2, 3]);
        assert!(decode(&frame, &CompressionMethod::Lz4).is_err());
        let (decoded, consumed) = decode_prefix(&frame, &CompressionMethod::Lz4).unwrap();
        assert_eq!(decoded, data);
        assert_eq!(consumed, exact_len);
    }

    #[test]
    fn test_truncated_frame_is_corrupt() {
        let data = sample(4096);
        let frame = encode(&data, 1024, &CompressionMethod::Zlib).unwrap();
        let err = decode(&frame[..frame.len() - 1], &CompressionMethod::Zlib).unwrap_err();
        assert!(matches!(err, Error::CorruptEnvelope { .. }));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_envelope_round_trips(
            data in proptest::collection::vec(any::<u8>(), 0..20_000),
            block_size in 1u32..8192,
            lz4 in any::<bool>(),
        ) {
            let codec = if lz4 { CompressionMethod::Lz4 } else { CompressionMethod::Zlib };
            let frame = encode(&data, block_size, &codec).unwrap();
            prop_assert_eq!(decode(&frame, &codec).unwrap(), data);
        }
    }
}
