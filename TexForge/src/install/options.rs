//! Install run options

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::tfc::{DEFAULT_CEILING, DEFAULT_MARGIN, DEFAULT_MOD_CACHE, ReuseBoundary};
use crate::variant::GameVariant;

const GIB: u64 = 1024 * 1024 * 1024;
/// Assumed RAM when the total cannot be read
const FALLBACK_TOTAL_MEMORY: u64 = 8 * GIB;
/// Kept free for the rest of the system
const MEMORY_RESERVE: u64 = 4 * GIB;

/// Options for one install run.
///
/// # Example
///
/// ```no_run
/// use texforge::install::InstallOptions;
/// use texforge::variant::GameVariant;
///
/// let options = InstallOptions::new("/games/trilogy/Game", GameVariant::Extended)
///     .with_mod_cache_name("TexturesMod")
///     .with_strip_empty_mips(true);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallOptions {
    /// Game installation the catalog paths are relative to
    pub game_root: PathBuf,

    /// Directory new mod caches are created in (default: game root)
    pub cache_dir: Option<PathBuf>,

    pub variant: GameVariant,

    /// Bytes of decoded payloads kept between uses
    /// (default: [`default_memory_limit`])
    pub memory_limit: Option<u64>,

    /// Base name of the cache file mod textures are written to
    pub mod_cache_name: String,

    /// Drop placeholder mips from rewritten textures
    pub strip_empty_mips: bool,

    /// Recompress every saved package
    pub repack: bool,

    /// Mark saved packages as processed
    pub append_marker: bool,

    /// Leave packages that already carry the marker alone
    pub skip_marked: bool,

    pub reuse_boundary: ReuseBoundary,

    /// Size a mod cache may not grow past
    pub cache_ceiling: u64,

    /// Headroom kept below the ceiling
    pub cache_margin: u64,
}

impl Default for InstallOptions {
    fn default() -> Self {
        Self {
            game_root: PathBuf::new(),
            cache_dir: None,
            variant: GameVariant::Extended,
            memory_limit: None,
            mod_cache_name: DEFAULT_MOD_CACHE.to_string(),
            strip_empty_mips: false,
            repack: false,
            append_marker: true,
            skip_marked: true,
            reuse_boundary: ReuseBoundary::default(),
            cache_ceiling: DEFAULT_CEILING,
            cache_margin: DEFAULT_MARGIN,
        }
    }
}

impl InstallOptions {
    #[must_use]
    pub fn new(game_root: impl Into<PathBuf>, variant: GameVariant) -> Self {
        Self {
            game_root: game_root.into(),
            variant,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_cache_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.cache_dir = dir;
        self
    }

    #[must_use]
    pub fn with_memory_limit(mut self, limit: Option<u64>) -> Self {
        self.memory_limit = limit;
        self
    }

    #[must_use]
    pub fn with_mod_cache_name(mut self, name: impl Into<String>) -> Self {
        self.mod_cache_name = name.into();
        self
    }

    #[must_use]
    pub fn with_strip_empty_mips(mut self, strip: bool) -> Self {
        self.strip_empty_mips = strip;
        self
    }

    #[must_use]
    pub fn with_repack(mut self, repack: bool) -> Self {
        self.repack = repack;
        self
    }

    #[must_use]
    pub fn with_append_marker(mut self, append: bool) -> Self {
        self.append_marker = append;
        self
    }

    #[must_use]
    pub fn with_skip_marked(mut self, skip: bool) -> Self {
        self.skip_marked = skip;
        self
    }

    #[must_use]
    pub fn with_reuse_boundary(mut self, boundary: ReuseBoundary) -> Self {
        self.reuse_boundary = boundary;
        self
    }

    /// Set the cache ceiling and margin
    #[must_use]
    pub fn with_cache_limits(mut self, ceiling: u64, margin: u64) -> Self {
        self.cache_ceiling = ceiling;
        self.cache_margin = margin;
        self
    }

    /// Directory for mod caches
    pub fn cache_dir(&self) -> &Path {
        self.cache_dir.as_deref().unwrap_or(&self.game_root)
    }

    /// Payload cache limit in effect
    pub fn effective_memory_limit(&self) -> u64 {
        self.memory_limit.unwrap_or_else(default_memory_limit)
    }
}

/// Total RAM minus a 4 GiB reserve, never less than a quarter of RAM
pub fn default_memory_limit() -> u64 {
    memory_limit_for(total_memory().unwrap_or(FALLBACK_TOTAL_MEMORY))
}

fn memory_limit_for(total: u64) -> u64 {
    total.saturating_sub(MEMORY_RESERVE).max(total / 4)
}

#[cfg(target_os = "linux")]
fn total_memory() -> Option<u64> {
    let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
    parse_mem_total(&meminfo)
}

#[cfg(not(target_os = "linux"))]
fn total_memory() -> Option<u64> {
    None
}

/// `MemTotal:  16318816 kB` in bytes
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_mem_total(meminfo: &str) -> Option<u64> {
    let rest = meminfo.lines().find_map(|l| l.strip_prefix("MemTotal:"))?;
    let mut fields = rest.split_whitespace();
    let value: u64 = fields.next()?.parse().ok()?;
    let multiplier = match fields.next() {
        Some(unit) if unit.eq_ignore_ascii_case("kb") => 1024,
        Some(unit) if unit.eq_ignore_ascii_case("mb") => 1024 * 1024,
        _ => 1,
    };
    value.checked_mul(multiplier)
}
