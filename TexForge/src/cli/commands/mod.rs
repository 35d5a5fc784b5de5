use clap::Subcommand;
use std::path::PathBuf;

use crate::variant::GameVariant;

pub mod catalog;
pub mod definitions;
pub mod execute;
pub mod install;
pub mod mod_cmd;
pub mod package;

use definitions::{CatalogCommands, ModCommands, PackageCommands};

/// Parse a `--variant` value (classic, streaming, extended)
pub fn parse_variant(s: &str) -> Result<GameVariant, String> {
    GameVariant::from_name(s).ok_or_else(|| {
        format!("Invalid variant '{s}'. Valid values: classic, streaming, extended")
    })
}

#[derive(Subcommand)]
pub enum Commands {
    /// Package (.pcc) operations
    Package {
        #[command(subcommand)]
        command: PackageCommands,
    },

    /// Mod container (.tfmod) operations
    #[command(name = "mod")]
    Mods {
        #[command(subcommand)]
        command: ModCommands,
    },

    /// Texture catalog operations
    Catalog {
        #[command(subcommand)]
        command: CatalogCommands,
    },

    /// Install mod containers into a game
    Install {
        /// Mod containers, applied in order
        #[arg(required = true)]
        mods: Vec<PathBuf>,

        /// Texture catalog of the game (defaults to the config file's)
        #[arg(short, long)]
        catalog: Option<PathBuf>,

        /// Game root (defaults to the config file's)
        #[arg(short, long)]
        game_root: Option<PathBuf>,

        /// Game variant (classic, streaming, extended)
        #[arg(long, value_parser = parse_variant)]
        variant: Option<GameVariant>,

        /// Config file (defaults to <config dir>/TexForge/install.toml)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Drop placeholder mips larger than the new top mip
        #[arg(long)]
        strip_empty_mips: bool,

        /// Recompress every saved package
        #[arg(long)]
        repack: bool,

        /// Rewrite packages that already carry the end marker
        #[arg(long)]
        force: bool,

        /// Payload cache size in bytes
        #[arg(long)]
        memory_limit: Option<u64>,

        /// Suppress progress bar
        #[arg(short, long)]
        quiet: bool,
    },
}
