//! Command execution implementations

use super::Commands;
use super::definitions::{CatalogCommands, ModCommands, PackageCommands};
use super::install::InstallArgs;
use super::{catalog, install, mod_cmd, package};

impl Commands {
    /// Execute the selected command.
    ///
    /// # Errors
    /// Returns an error if the underlying command fails.
    pub fn execute(&self) -> anyhow::Result<()> {
        match self {
            Commands::Package { command } => command.execute(),
            Commands::Mods { command } => command.execute(),
            Commands::Catalog { command } => command.execute(),
            Commands::Install {
                mods,
                catalog,
                game_root,
                variant,
                config,
                strip_empty_mips,
                repack,
                force,
                memory_limit,
                quiet,
            } => install::execute(&InstallArgs {
                mods,
                catalog: catalog.as_deref(),
                game_root: game_root.clone(),
                variant: *variant,
                config: config.as_deref(),
                strip_empty_mips: *strip_empty_mips,
                repack: *repack,
                force: *force,
                memory_limit: *memory_limit,
                quiet: *quiet,
            }),
        }
    }
}

impl PackageCommands {
    /// Execute the selected package command.
    ///
    /// # Errors
    /// Returns an error if the package cannot be read or written.
    pub fn execute(&self) -> anyhow::Result<()> {
        match self {
            PackageCommands::Info { source } => package::info(source),
            PackageCommands::Textures { source, detailed } => package::textures(source, *detailed),
            PackageCommands::Repack {
                source,
                output,
                decompress,
            } => package::repack(source, output.as_deref(), *decompress),
            PackageCommands::Export {
                source,
                index,
                destination,
                raw,
                cache_dir,
            } => package::export(source, *index, destination, *raw, cache_dir.as_deref()),
            PackageCommands::Import {
                source,
                index,
                data,
            } => package::import(source, *index, data),
        }
    }
}

impl ModCommands {
    /// Execute the selected mod command.
    ///
    /// # Errors
    /// Returns an error if the mod container cannot be read or written.
    pub fn execute(&self) -> anyhow::Result<()> {
        match self {
            ModCommands::Create {
                manifest,
                destination,
            } => mod_cmd::create(manifest, destination),
            ModCommands::List { source } => mod_cmd::list(source),
            ModCommands::Extract {
                source,
                destination,
            } => mod_cmd::extract(source, destination),
        }
    }
}

impl CatalogCommands {
    /// Execute the selected catalog command.
    ///
    /// # Errors
    /// Returns an error if the scan or the catalog write fails.
    pub fn execute(&self) -> anyhow::Result<()> {
        match self {
            CatalogCommands::Scan {
                root,
                output,
                variant,
                quiet,
            } => catalog::scan(root, output, *variant, *quiet),
        }
    }
}
