//! Subcommand enum definitions for CLI

use clap::Subcommand;
use std::path::PathBuf;

use super::parse_variant;
use crate::variant::GameVariant;

/// Package commands
#[derive(Subcommand)]
pub enum PackageCommands {
    /// Show header and table summary of a package
    Info {
        /// Package file
        source: PathBuf,
    },

    /// List texture exports with their mips
    Textures {
        /// Package file
        source: PathBuf,

        /// Show every mip descriptor
        #[arg(short, long)]
        detailed: bool,
    },

    /// Rewrite a package compressed or uncompressed
    Repack {
        /// Package file
        source: PathBuf,

        /// Output file (defaults to overwriting the source)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Write the body uncompressed
        #[arg(long)]
        decompress: bool,
    },

    /// Write one export to a file
    Export {
        /// Package file
        source: PathBuf,

        /// Export index (0-based)
        index: usize,

        /// Output file
        destination: PathBuf,

        /// Write the export bytes instead of a mip set
        #[arg(long)]
        raw: bool,

        /// Directory searched for texture caches (defaults to the package's directory)
        #[arg(long)]
        cache_dir: Option<PathBuf>,
    },

    /// Replace one export's bytes from a file
    Import {
        /// Package file
        source: PathBuf,

        /// Export index (0-based)
        index: usize,

        /// File holding the new export bytes
        data: PathBuf,
    },
}

/// Mod container commands
#[derive(Subcommand)]
pub enum ModCommands {
    /// Build a mod container from a JSON manifest
    Create {
        /// Manifest file
        manifest: PathBuf,

        /// Output .tfmod file
        destination: PathBuf,
    },

    /// List the entries of a mod container
    List {
        /// Mod file
        source: PathBuf,
    },

    /// Write every entry payload of a mod container to a directory
    Extract {
        /// Mod file
        source: PathBuf,

        /// Output directory
        destination: PathBuf,
    },
}

/// Catalog commands
#[derive(Subcommand)]
pub enum CatalogCommands {
    /// Scan a game installation and write its texture catalog
    Scan {
        /// Game root
        root: PathBuf,

        /// Output catalog (JSON)
        output: PathBuf,

        /// Game variant (classic, streaming, extended)
        #[arg(long, value_parser = parse_variant, default_value = "extended")]
        variant: GameVariant,

        /// Suppress progress bar
        #[arg(short, long)]
        quiet: bool,
    },
}
