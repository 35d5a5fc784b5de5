//! Binary diffs for export replacements
//!
//! Patches use bsdiff semantics: a list of control triples, each copying
//! `diff_len` bytes from the old data with a wrapping byte delta added, then
//! `extra_len` literal bytes, then moving the old cursor by `seek`.
//!
//! ```text
//! b"TFDIFF01"
//! control_count u64, diff_len u64, extra_len u64, output_size u64
//! control_count x (diff_len u64, extra_len u64, seek i64)
//! diff bytes, extra bytes
//! ```

use std::collections::HashMap;

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Error, Result};

/// Magic tag of a patch
pub const DIFF_MAGIC: &[u8; 8] = b"TFDIFF01";

const HEADER_SIZE: usize = 8 + 4 * 8;
const CONTROL_SIZE: usize = 24;
/// Window used to find matching regions
const MATCH_WINDOW: usize = 8;
/// Mismatching bytes tolerated inside one diff segment
const MAX_MISSES: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Control {
    diff_len: u64,
    extra_len: u64,
    seek: i64,
}

fn failed(message: impl Into<String>) -> Error {
    Error::BinaryDiffFailed {
        message: message.into(),
    }
}

fn window(data: &[u8], pos: usize) -> Option<[u8; MATCH_WINDOW]> {
    data.get(pos..pos + MATCH_WINDOW)?.try_into().ok()
}

/// Length of the aligned segment starting at the two cursors, ending on the
/// last matching byte before too many misses
fn extend_match(old: &[u8], new: &[u8], old_pos: usize, new_pos: usize) -> usize {
    let mut len = 0;
    let mut last_match = 0;
    let mut misses = 0;
    while new_pos + len < new.len() && old_pos + len < old.len() {
        if new[new_pos + len] == old[old_pos + len] {
            misses = 0;
            last_match = len + 1;
        } else {
            misses += 1;
            if misses >= MAX_MISSES {
                break;
            }
        }
        len += 1;
    }
    last_match
}

/// Create a patch turning `old` into `new`
pub fn create_patch(old: &[u8], new: &[u8]) -> Vec<u8> {
    let mut index: HashMap<[u8; MATCH_WINDOW], usize> = HashMap::new();
    for pos in 0..old.len().saturating_sub(MATCH_WINDOW - 1) {
        if let Some(key) = window(old, pos) {
            index.entry(key).or_insert(pos);
        }
    }

    let mut controls = Vec::new();
    let mut diff = Vec::new();
    let mut extra = Vec::new();
    let mut new_pos = 0;
    let mut old_pos = 0;

    while new_pos < new.len() {
        let diff_len = extend_match(old, new, old_pos, new_pos);
        diff.extend(
            (0..diff_len).map(|i| new[new_pos + i].wrapping_sub(old[old_pos + i])),
        );

        // Next region of `new` that also occurs in `old`, preferring the
        // current alignment
        let scan_from = new_pos + diff_len;
        let mut next = None;
        for q in scan_from..new.len() {
            let Some(key) = window(new, q) else {
                break;
            };
            let aligned = old_pos + (q - new_pos);
            if window(old, aligned) == Some(key) {
                next = Some((q, aligned));
                break;
            }
            if let Some(&found) = index.get(&key) {
                next = Some((q, found));
                break;
            }
        }

        let (next_new, next_old) = next.unwrap_or((new.len(), old_pos + diff_len));
        extra.extend_from_slice(&new[scan_from..next_new]);
        controls.push(Control {
            diff_len: diff_len as u64,
            extra_len: (next_new - scan_from) as u64,
            seek: next_old as i64 - (old_pos + diff_len) as i64,
        });
        new_pos = next_new;
        old_pos = next_old;
    }

    let mut out =
        Vec::with_capacity(HEADER_SIZE + controls.len() * CONTROL_SIZE + diff.len() + extra.len());
    out.extend_from_slice(DIFF_MAGIC);
    out.extend_from_slice(&(controls.len() as u64).to_le_bytes());
    out.extend_from_slice(&(diff.len() as u64).to_le_bytes());
    out.extend_from_slice(&(extra.len() as u64).to_le_bytes());
    out.extend_from_slice(&(new.len() as u64).to_le_bytes());
    for control in &controls {
        out.extend_from_slice(&control.diff_len.to_le_bytes());
        out.extend_from_slice(&control.extra_len.to_le_bytes());
        out.extend_from_slice(&control.seek.to_le_bytes());
    }
    out.extend_from_slice(&diff);
    out.extend_from_slice(&extra);
    out
}

fn to_usize(value: u64, what: &str) -> Result<usize> {
    usize::try_from(value).map_err(|_| failed(format!("{what} {value} does not fit in memory")))
}

/// Apply a patch created by [`create_patch`] to `old`
pub fn apply_patch(old: &[u8], patch: &[u8]) -> Result<Vec<u8>> {
    if patch.len() < HEADER_SIZE || &patch[0..8] != DIFF_MAGIC {
        return Err(failed("missing TFDIFF01 header"));
    }
    let control_count = to_usize(LittleEndian::read_u64(&patch[8..16]), "control count")?;
    let diff_total = to_usize(LittleEndian::read_u64(&patch[16..24]), "diff length")?;
    let extra_total = to_usize(LittleEndian::read_u64(&patch[24..32]), "extra length")?;
    let output_size = to_usize(LittleEndian::read_u64(&patch[32..40]), "output size")?;

    let expected = control_count
        .checked_mul(CONTROL_SIZE)
        .and_then(|n| n.checked_add(HEADER_SIZE))
        .and_then(|n| n.checked_add(diff_total))
        .and_then(|n| n.checked_add(extra_total));
    if expected != Some(patch.len()) {
        return Err(failed(format!(
            "patch is {} bytes but its header describes {:?}",
            patch.len(),
            expected
        )));
    }

    // Every output byte comes from either the diff or the extra region
    if diff_total.checked_add(extra_total) != Some(output_size) {
        return Err(failed(format!(
            "output size {output_size} does not match {diff_total} diff and {extra_total} extra bytes"
        )));
    }

    let controls_end = HEADER_SIZE + control_count * CONTROL_SIZE;
    let diff_region = &patch[controls_end..controls_end + diff_total];
    let extra_region = &patch[controls_end + diff_total..];

    let mut out = Vec::with_capacity(output_size);
    let mut old_pos: i64 = 0;
    let mut diff_pos = 0;
    let mut extra_pos = 0;

    for i in 0..control_count {
        let raw = &patch[HEADER_SIZE + i * CONTROL_SIZE..HEADER_SIZE + (i + 1) * CONTROL_SIZE];
        let control = Control {
            diff_len: LittleEndian::read_u64(&raw[0..8]),
            extra_len: LittleEndian::read_u64(&raw[8..16]),
            seek: LittleEndian::read_i64(&raw[16..24]),
        };
        let diff_len = to_usize(control.diff_len, "diff segment")?;
        let extra_len = to_usize(control.extra_len, "extra segment")?;

        if out.len().saturating_add(diff_len).saturating_add(extra_len) > output_size {
            return Err(failed(format!("control {i} writes past the output size")));
        }

        let start = usize::try_from(old_pos)
            .map_err(|_| failed(format!("control {i} seeks before the old data")))?;
        let old_segment = old
            .get(start..start.saturating_add(diff_len))
            .ok_or_else(|| failed(format!("control {i} reads past the old data")))?;
        let diff_segment = diff_region
            .get(diff_pos..diff_pos + diff_len)
            .ok_or_else(|| failed(format!("control {i} overruns the diff bytes")))?;
        out.extend(
            old_segment
                .iter()
                .zip(diff_segment)
                .map(|(o, d)| o.wrapping_add(*d)),
        );
        diff_pos += diff_len;

        let extra_segment = extra_region
            .get(extra_pos..extra_pos + extra_len)
            .ok_or_else(|| failed(format!("control {i} overruns the extra bytes")))?;
        out.extend_from_slice(extra_segment);
        extra_pos += extra_len;

        old_pos = (start + diff_len) as i64 + control.seek;
    }

    if out.len() != output_size || diff_pos != diff_total || extra_pos != extra_total {
        return Err(failed(format!(
            "patch produced {} of {output_size} bytes",
            out.len()
        )));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn sample(len: usize, seed: u32) -> Vec<u8> {
        let mut state = seed;
        (0..len)
            .map(|_| {
                state = state.wrapping_mul(1_103_515_245).wrapping_add(12345);
                (state >> 16) as u8
            })
            .collect()
    }

    #[test]
    fn test_local_edit_is_small() {
        let old = sample(4096, 1);
        let mut new = old.clone();
        new[100] ^= 0xFF;
        new[2000..2004].copy_from_slice(b"edit");
        let patch = create_patch(&old, &new);
        // One aligned segment, no literal bytes
        assert_eq!(LittleEndian::read_u64(&patch[8..16]), 1);
        assert_eq!(LittleEndian::read_u64(&patch[24..32]), 0);
        let changed = patch[HEADER_SIZE + CONTROL_SIZE..].iter().filter(|&&b| b != 0).count();
        assert!(changed <= 5);
        assert_eq!(apply_patch(&old, &patch).unwrap(), new);
    }

    #[test]
    fn test_moved_and_inserted_blocks() {
        let old = sample(2048, 7);
        let mut new = sample(300, 9);
        new.extend_from_slice(&old[1024..]);
        new.extend_from_slice(&old[..1024]);
        let patch = create_patch(&old, &new);
        assert_eq!(apply_patch(&old, &patch).unwrap(), new);
    }

    #[test]
    fn test_empty_inputs() {
        assert_eq!(apply_patch(b"", &create_patch(b"", b"abc")).unwrap(), b"abc");
        assert_eq!(apply_patch(b"abc", &create_patch(b"abc", b"")).unwrap(), b"");
    }

    #[test]
    fn test_rejects_inconsistent_patches() {
        let old = sample(512, 3);
        let new = sample(600, 4);
        let patch = create_patch(&old, &new);

        assert!(apply_patch(&old, &patch[..patch.len() - 1]).is_err());

        let mut wrong_size = patch.clone();
        wrong_size[32..40].copy_from_slice(&1u64.to_le_bytes());
        assert!(apply_patch(&old, &wrong_size).is_err());

        let mut bad_magic = patch;
        bad_magic[0] = b'X';
        let err = apply_patch(&old, &bad_magic).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::CorruptData);
    }

    #[test]
    fn test_oversized_output_is_corrupt_not_a_panic() {
        let mut patch = DIFF_MAGIC.to_vec();
        for value in [0u64, 0, 0, u64::MAX] {
            patch.extend_from_slice(&value.to_le_bytes());
        }
        let result = std::panic::catch_unwind(|| apply_patch(b"old", &patch));
        let err = result.expect("no panic").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::CorruptData);

        // Claims more output than its diff and extra bytes can produce
        let mut patch = DIFF_MAGIC.to_vec();
        for value in [0u64, 0, 0, 1 << 40] {
            patch.extend_from_slice(&value.to_le_bytes());
        }
        let err = apply_patch(b"old", &patch).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::CorruptData);
    }

    proptest! {
        #[test]
        fn prop_patch_reproduces_new(old in proptest::collection::vec(any::<u8>(), 0..512),
                                     new in proptest::collection::vec(any::<u8>(), 0..512)) {
            let patch = create_patch(&old, &new);
            prop_assert_eq!(apply_patch(&old, &patch).unwrap(), new);
        }
    }
}
