//! Promotion of a verified partial file into the final backup image.
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::info;

/// On-disk locations of one partition's backup artifacts.
#[derive(Clone, Debug)]
pub struct ArtifactPaths {
    /// The file receiving an in-progress or interrupted transfer.
    pub partial: PathBuf,
    /// The verified, complete image. Only ever created by [`promote`].
    pub final_image: PathBuf,
}

impl ArtifactPaths {
    pub fn new(out_dir: &Path, partition_name: &str) -> Self {
        Self {
            partial: out_dir.join(format!("{partition_name}.tmp")),
            final_image: out_dir.join(format!("{partition_name}.img")),
        }
    }
}

/// Atomically replaces the final image with the completed partial file.
///
/// The partial file is synced to disk before the rename.
pub fn promote(paths: &ArtifactPaths) -> io::Result<()> {
    OpenOptions::new()
        .append(true)
        .open(&paths.partial)?
        .sync_all()?;

    match fs::remove_file(&paths.final_image) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    fs::rename(&paths.partial, &paths.final_image)?;

    info!(image = %paths.final_image.display(), "Backup finalized");
    Ok(())
}
