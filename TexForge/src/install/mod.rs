//! Installing mods into a game
//!
//! A run matches every mod entry against the catalog, groups the resulting
//! jobs by package, then opens, rewrites and saves each package once.
//! Problems with one texture or export are reported and skipped; running out
//! of cache capacity aborts the run.

mod cache;
mod codec;
mod options;
mod pipeline;

use std::path::PathBuf;

use crate::error::{Error, ErrorKind};

pub use cache::{CacheStats, PayloadCache, PayloadId, PreparedPayload};
pub use codec::{PixelCodec, convert_mip_set};
pub use options::{InstallOptions, default_memory_limit};
pub use pipeline::Installer;

/// Install phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallPhase {
    /// Opening mod files
    Loading,
    /// Resolving entries against the catalog
    Matching,
    /// Rewriting exports of one package
    Applying,
    /// Writing one package
    Saving,
    Complete,
}

impl InstallPhase {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Loading => "Loading mods",
            Self::Matching => "Matching textures",
            Self::Applying => "Applying",
            Self::Saving => "Saving",
            Self::Complete => "Complete",
        }
    }
}

/// Progress of an install run
#[derive(Debug, Clone)]
pub struct InstallProgress {
    pub phase: InstallPhase,
    /// Current item number (1-indexed)
    pub current: usize,
    pub total: usize,
    pub current_file: Option<String>,
}

impl InstallProgress {
    #[must_use]
    pub fn new(phase: InstallPhase, current: usize, total: usize) -> Self {
        Self {
            phase,
            current,
            total,
            current_file: None,
        }
    }

    #[must_use]
    pub fn with_file(phase: InstallPhase, current: usize, total: usize, file: impl Into<String>) -> Self {
        Self {
            phase,
            current,
            total,
            current_file: Some(file.into()),
        }
    }

    /// Progress from 0.0 to 1.0
    #[must_use]
    pub fn percentage(&self) -> f32 {
        if self.total == 0 {
            1.0
        } else {
            self.current as f32 / self.total as f32
        }
    }
}

/// What a skipped item was
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SkipContext {
    pub mod_path: Option<PathBuf>,
    pub entry_name: Option<String>,
    pub texture_name: Option<String>,
    pub crc: Option<u32>,
    pub package_path: Option<String>,
    pub export_index: Option<usize>,
}

impl std::fmt::Display for SkipContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut parts = Vec::new();
        if let Some(name) = &self.texture_name {
            parts.push(name.clone());
        }
        if let Some(crc) = self.crc {
            parts.push(format!("0x{crc:08X}"));
        }
        if let Some(package) = &self.package_path {
            match self.export_index {
                Some(index) => parts.push(format!("{package} export {index}")),
                None => parts.push(package.clone()),
            }
        }
        if parts.is_empty() {
            if let Some(entry) = &self.entry_name {
                parts.push(entry.clone());
            }
        }
        if let Some(path) = &self.mod_path {
            parts.push(format!("from {}", path.display()));
        }
        f.write_str(&parts.join(", "))
    }
}

/// One texture, export, package or mod that was not installed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedItem {
    pub context: SkipContext,
    pub kind: ErrorKind,
    pub reason: String,
}

impl SkippedItem {
    #[must_use]
    pub fn from_error(context: SkipContext, error: &Error) -> Self {
        Self {
            context,
            kind: error.kind(),
            reason: error.to_string(),
        }
    }
}

/// Outcome of an install run
#[derive(Debug, Clone, Default)]
pub struct InstallReport {
    /// Texture locations rewritten
    pub textures_applied: usize,
    /// Raw and diffed exports rewritten
    pub exports_applied: usize,
    pub packages_saved: usize,
    /// Packages left alone because they carry the end marker
    pub packages_already_processed: usize,
    pub skipped: Vec<SkippedItem>,
    /// Bytes appended to mod caches
    pub cache_bytes_appended: u64,
    pub payload_cache: CacheStats,
}

impl InstallReport {
    pub fn applied(&self) -> usize {
        self.textures_applied + self.exports_applied
    }
}
