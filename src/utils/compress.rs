use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use log::{debug, info, warn};

use crate::constants::ARCHIVE_EXTENSION;

/// Archive path for a bundle directory: `<bundle-path>.tar.gz`
pub fn archive_path_for(bundle_dir: &Path) -> Result<PathBuf> {
    let name = bundle_dir
        .file_name()
        .ok_or_else(|| anyhow!("Bundle path {} has no file name", bundle_dir.display()))?;
    Ok(bundle_dir.with_file_name(format!("{}.{}", name.to_string_lossy(), ARCHIVE_EXTENSION)))
}

fn write_archive(bundle_dir: &Path, archive_path: &Path) -> Result<()> {
    let name = bundle_dir
        .file_name()
        .ok_or_else(|| anyhow!("Bundle path {} has no file name", bundle_dir.display()))?;

    let file = fs::File::create(archive_path)
        .context(format!("Failed to create {}", archive_path.display()))?;
    let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());

    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);
    builder
        .append_dir_all(name, bundle_dir)
        .context(format!("Failed to add {} to archive", bundle_dir.display()))?;

    let encoder = builder.into_inner().context("Failed to finish tar stream")?;
    let mut writer = encoder.finish().context("Failed to finish gzip stream")?;
    writer.flush().context("Failed to flush archive")?;
    Ok(())
}

/// Pack the bundle directory into `<bundle-path>.tar.gz` and remove the directory.
///
/// The archive's single top-level entry is the bundle directory's own name.
/// On failure the bundle directory is left in place and any partial archive
/// is removed.
///
/// # Example
///
/// ```no_run
/// # use std::path::Path;
/// # use hpc_diag::utils::compress::build_archive;
/// let archive = build_archive(Path::new("/tmp/0f1e2d3c.2024-01-15_14-30-52"))?;
/// assert!(archive.ends_with("0f1e2d3c.2024-01-15_14-30-52.tar.gz"));
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn build_archive(bundle_dir: &Path) -> Result<PathBuf> {
    let start = Instant::now();
    if !bundle_dir.is_dir() {
        return Err(anyhow!("Bundle directory {} does not exist", bundle_dir.display()));
    }

    let archive_path = archive_path_for(bundle_dir)?;
    info!("Creating archive {}", archive_path.display());

    if let Err(e) = write_archive(bundle_dir, &archive_path) {
        if archive_path.exists() {
            if let Err(remove_err) = fs::remove_file(&archive_path) {
                warn!("Failed to remove partial archive {}: {}", archive_path.display(), remove_err);
            }
        }
        return Err(e.context(format!(
            "Archive creation failed; bundle left at {}",
            bundle_dir.display()
        )));
    }
    debug!("Archive written in {:?}", start.elapsed());

    if let Err(e) = fs::remove_dir_all(bundle_dir) {
        warn!("Archive created but failed to remove {}: {}", bundle_dir.display(), e);
    }

    Ok(archive_path)
}
