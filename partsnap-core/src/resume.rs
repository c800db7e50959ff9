//! Decides where a backup starts from, based on what is already on disk.
//!
//! A partial file is only trusted after the device confirms that its first
//! `len` bytes hash to the same digest as the file. Anything else (changed
//! partition contents, a corrupted file, a file longer than the partition)
//! restarts the transfer from zero.
use crate::channel::CommandChannel;
use crate::checksum::{device_digest, hash_file, hex_digest};
use crate::error::ensure_running;
use crate::finalize::ArtifactPaths;
use crate::partition::Partition;
use crate::session::BackupOptions;
use crate::Result;
use sha2::Sha256;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use tracing::{debug, info, warn};

/// Why no transfer is needed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpToDate {
    /// A final image exists and existing images are skipped.
    Skipped,
    /// A final image exists and its digest matches the device.
    Verified,
}

/// Where and how a transfer begins.
pub struct TransferStart {
    /// Byte offset into the partition to read from.
    pub offset: u64,
    /// Hash state over the bytes already in the partial file, when resuming.
    pub prefix_hash: Option<Sha256>,
    /// Full-partition device digest, if it was already computed.
    pub device_digest: Option<String>,
}

impl TransferStart {
    fn fresh(device_digest: Option<String>) -> Self {
        Self {
            offset: 0,
            prefix_hash: None,
            device_digest,
        }
    }
}

pub enum ResumePlan {
    UpToDate(UpToDate),
    Transfer(TransferStart),
}

/// Inspects the artifacts of `partition` and picks a starting point.
///
/// A final image that no longer matches the device is deleted before the
/// re-download begins, so a stale image never sits next to a fresh partial.
///
/// Hashing either side can take minutes on large partitions; `running` is
/// checked around every device hash and between local read buffers, and
/// nothing is deleted once it has been cleared.
pub fn evaluate(
    channel: &mut dyn CommandChannel,
    partition: &Partition,
    paths: &ArtifactPaths,
    options: &BackupOptions,
    running: &AtomicBool,
) -> Result<ResumePlan> {
    let mut full_digest = None;

    if paths.final_image.exists() {
        if options.skip_existing {
            debug!(partition = %partition.name, "Final image exists, skipping");
            return Ok(ResumePlan::UpToDate(UpToDate::Skipped));
        }

        ensure_running(running)?;
        let device = device_digest(channel, partition, None)?;
        let local = hex_digest(&hash_file(&paths.final_image, running)?);
        if local == device {
            info!(partition = %partition.name, "Existing image matches device");
            return Ok(ResumePlan::UpToDate(UpToDate::Verified));
        }

        warn!(
            partition = %partition.name,
            device = %device,
            local = %local,
            "Existing image differs from device, downloading again"
        );
        remove_if_exists(&paths.final_image)?;
        full_digest = Some(device);
    }

    if !options.resume || !paths.partial.exists() {
        remove_if_exists(&paths.partial)?;
        return Ok(ResumePlan::Transfer(TransferStart::fresh(full_digest)));
    }

    let len = fs::metadata(&paths.partial)?.len();
    if len == 0 || len > partition.size {
        debug!(partition = %partition.name, len, "Partial file unusable, starting over");
        remove_if_exists(&paths.partial)?;
        return Ok(ResumePlan::Transfer(TransferStart::fresh(full_digest)));
    }

    ensure_running(running)?;
    let device_prefix = device_digest(channel, partition, Some(len))?;
    let local_hash = hash_file(&paths.partial, running)?;
    let local_prefix = hex_digest(&local_hash);

    if local_prefix != device_prefix {
        warn!(
            partition = %partition.name,
            len,
            "Partial file no longer matches the device, starting over"
        );
        remove_if_exists(&paths.partial)?;
        return Ok(ResumePlan::Transfer(TransferStart::fresh(full_digest)));
    }

    info!(partition = %partition.name, offset = len, "Resuming transfer");
    if len == partition.size {
        full_digest.get_or_insert(device_prefix);
    }
    Ok(ResumePlan::Transfer(TransferStart {
        offset: len,
        prefix_hash: Some(local_hash),
        device_digest: full_digest,
    }))
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
