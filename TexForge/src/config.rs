//! Install configuration files
//!
//! ```toml
//! game_root = "/games/trilogy/Game"
//! variant = "extended"
//! catalog = "/games/trilogy/texforge-catalog.json"
//! strip_empty_mips = true
//! ```
//!
//! Every key is optional; command-line flags fill in or override values.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::install::InstallOptions;
use crate::tfc::ReuseBoundary;
use crate::variant::GameVariant;

/// File name looked up in the user config directory
pub const CONFIG_FILE_NAME: &str = "install.toml";

/// Install settings as stored on disk
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallConfig {
    pub game_root: Option<PathBuf>,
    pub variant: Option<GameVariant>,
    /// Catalog used when none is given on the command line
    pub catalog: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
    pub memory_limit: Option<u64>,
    pub mod_cache_name: Option<String>,
    pub strip_empty_mips: Option<bool>,
    pub repack: Option<bool>,
    pub append_marker: Option<bool>,
    pub skip_marked: Option<bool>,
    pub reuse_boundary: Option<ReuseBoundary>,
    pub cache_ceiling: Option<u64>,
    pub cache_margin: Option<u64>,
}

impl InstallConfig {
    /// `<config dir>/TexForge/install.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("TexForge").join(CONFIG_FILE_NAME))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// The default file if it exists, otherwise an empty config
    pub fn load_default() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.is_file() => {
                tracing::debug!("Reading config {}", path.display());
                Self::load(&path)
            }
            _ => Ok(Self::default()),
        }
    }

    /// Options from this config on top of the built-in defaults.
    ///
    /// `game_root` and `variant` come from the arguments when given.
    pub fn to_options(&self, game_root: Option<PathBuf>, variant: Option<GameVariant>) -> InstallOptions {
        let mut options = InstallOptions::default();
        if let Some(root) = game_root.or_else(|| self.game_root.clone()) {
            options.game_root = root;
        }
        if let Some(variant) = variant.or(self.variant) {
            options.variant = variant;
        }
        options.cache_dir.clone_from(&self.cache_dir);
        options.memory_limit = self.memory_limit;
        if let Some(name) = &self.mod_cache_name {
            options.mod_cache_name.clone_from(name);
        }
        options.strip_empty_mips = self.strip_empty_mips.unwrap_or(options.strip_empty_mips);
        options.repack = self.repack.unwrap_or(options.repack);
        options.append_marker = self.append_marker.unwrap_or(options.append_marker);
        options.skip_marked = self.skip_marked.unwrap_or(options.skip_marked);
        options.reuse_boundary = self.reuse_boundary.unwrap_or(options.reuse_boundary);
        options.cache_ceiling = self.cache_ceiling.unwrap_or(options.cache_ceiling);
        options.cache_margin = self.cache_margin.unwrap_or(options.cache_margin);
        options
    }
}
