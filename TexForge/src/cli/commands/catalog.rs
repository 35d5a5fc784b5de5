//! CLI command for catalog scans

use std::path::Path;
use std::time::Instant;

use crate::catalog::{ScanPhase, scan_game};
use crate::cli::progress::{DISK, LOOKING_GLASS, bar_unless_quiet, print_done, print_step};
use crate::variant::GameVariant;

/// Scan a game installation and write the catalog as JSON
pub fn scan(root: &Path, output: &Path, variant: GameVariant, quiet: bool) -> anyhow::Result<()> {
    let started = Instant::now();
    if !quiet {
        print_step(1, 2, LOOKING_GLASS, &format!("Scanning {}...", root.display()));
    }

    let pb = bar_unless_quiet(quiet, 0, "Reading");
    let report = scan_game(root, variant, &|progress| {
        if progress.phase == ScanPhase::ReadingPackages {
            pb.set_length(progress.total as u64);
            pb.inc(1);
        }
    })?;
    pb.finish_and_clear();

    if !quiet {
        print_step(2, 2, DISK, &format!("Writing {}...", output.display()));
    }
    report.catalog.save(output)?;

    println!(
        "{} textures in {} locations",
        report.catalog.textures.len(),
        report.catalog.location_count()
    );
    if !report.failures.is_empty() {
        println!("{} items could not be read:", report.failures.len());
        for failure in &report.failures {
            match failure.export_index {
                Some(index) => println!("  {} export {}: {}", failure.package_path, index, failure.reason),
                None => println!("  {}: {}", failure.package_path, failure.reason),
            }
        }
    }
    if !quiet {
        print_done(started.elapsed());
    }
    Ok(())
}
