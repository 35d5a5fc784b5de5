//! CLI command for installing mods

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, bail};

use crate::catalog::TextureCatalog;
use crate::cli::progress::{PACKAGE, PICTURE, bar_unless_quiet, format_size, print_done, print_step};
use crate::config::InstallConfig;
use crate::install::{InstallPhase, Installer};
use crate::variant::GameVariant;

/// Flags of the `install` command
#[derive(Debug)]
pub struct InstallArgs<'a> {
    pub mods: &'a [PathBuf],
    pub catalog: Option<&'a Path>,
    pub game_root: Option<PathBuf>,
    pub variant: Option<GameVariant>,
    pub config: Option<&'a Path>,
    pub strip_empty_mips: bool,
    pub repack: bool,
    /// Rewrite packages that carry the end marker
    pub force: bool,
    pub memory_limit: Option<u64>,
    pub quiet: bool,
}

pub fn execute(args: &InstallArgs) -> anyhow::Result<()> {
    let started = Instant::now();
    let config = match args.config {
        Some(path) => InstallConfig::load(path)
            .with_context(|| format!("failed to read config {}", path.display()))?,
        None => InstallConfig::load_default()?,
    };

    let Some(catalog_path) = args.catalog.map(Path::to_path_buf).or_else(|| config.catalog.clone()) else {
        bail!("no catalog given; pass --catalog or set `catalog` in the config file");
    };
    if !args.quiet {
        print_step(1, 2, PACKAGE, &format!("Loading catalog {}...", catalog_path.display()));
    }
    let catalog = TextureCatalog::load(&catalog_path)
        .with_context(|| format!("failed to load catalog {}", catalog_path.display()))?;

    // An unconfigured variant follows the catalog
    let variant = args.variant.or(config.variant).unwrap_or(catalog.variant);
    let mut options = config.to_options(args.game_root.clone(), Some(variant));
    if options.game_root.as_os_str().is_empty() {
        bail!("no game root given; pass --game-root or set `game_root` in the config file");
    }
    if args.strip_empty_mips {
        options.strip_empty_mips = true;
    }
    if args.repack {
        options.repack = true;
    }
    if args.force {
        options.skip_marked = false;
    }
    if args.memory_limit.is_some() {
        options.memory_limit = args.memory_limit;
    }

    if !args.quiet {
        print_step(2, 2, PICTURE, &format!("Installing {} mods...", args.mods.len()));
    }
    let pb = bar_unless_quiet(args.quiet, 0, "Applying");
    let installer = Installer::new(options, &catalog);
    let report = installer.install(args.mods, &|progress| {
        if matches!(progress.phase, InstallPhase::Applying | InstallPhase::Saving) {
            pb.set_length(progress.total as u64);
            pb.set_position(progress.current as u64);
            if let Some(file) = &progress.current_file {
                pb.set_message(format!("{} {file}", progress.phase.as_str()));
            }
        }
    })?;
    pb.finish_and_clear();

    println!(
        "Applied {} textures and {} exports",
        report.textures_applied, report.exports_applied
    );
    println!(
        "Saved {} packages ({} already processed)",
        report.packages_saved, report.packages_already_processed
    );
    println!(
        "Appended {} to texture caches",
        format_size(report.cache_bytes_appended)
    );
    if !report.skipped.is_empty() {
        println!("Skipped {} items:", report.skipped.len());
        for item in &report.skipped {
            println!("  [{}] {}: {}", item.kind, item.context, item.reason);
        }
    }
    if !args.quiet {
        print_done(started.elapsed());
    }
    Ok(())
}
