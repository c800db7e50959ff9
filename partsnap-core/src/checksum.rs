//! Local and device-side SHA-256 digests.
use crate::channel::CommandChannel;
use crate::error::ensure_running;
use crate::partition::Partition;
use crate::{Error, Result};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::sync::atomic::AtomicBool;
use tracing::debug;

// Use a 4 MiB buffer when hashing local files.
const BUFFER_SIZE: usize = 4 * 1024 * 1024;

/// Hashes a local file and returns the accumulator without finalizing it,
/// so the caller can keep feeding bytes that logically follow the file.
///
/// `running` is checked before every buffer; clearing it stops the hash
/// with [`Error::Cancelled`].
pub fn hash_file(path: &Path, running: &AtomicBool) -> Result<Sha256> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];

    loop {
        ensure_running(running)?;
        let n = match file.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        hasher.update(&buffer[..n]);
    }

    Ok(hasher)
}

/// Returns the lowercase hex digest of everything fed to `hasher` so far.
pub fn hex_digest(hasher: &Sha256) -> String {
    hex::encode(hasher.clone().finalize())
}

/// Asks the device for the SHA-256 of a partition, or of its first `prefix`
/// bytes when given.
pub fn device_digest(
    channel: &mut dyn CommandChannel,
    partition: &Partition,
    prefix: Option<u64>,
) -> Result<String> {
    let command = match prefix {
        None => format!("sha256sum {}", partition.path),
        Some(len) => format!("head -c {} {} | sha256sum", len, partition.path),
    };

    debug!(partition = %partition.name, command = %command, "Hashing on device");
    let output = channel.run(&command)?;
    parse_digest(&output).ok_or(Error::UnexpectedOutput { command, output })
}

/// Extracts the digest token from `sha256sum` output.
fn parse_digest(output: &str) -> Option<String> {
    let token = output.split_whitespace().next()?;
    if token.len() == 64 && token.bytes().all(|b| b.is_ascii_hexdigit()) {
        Some(token.to_ascii_lowercase())
    } else {
        None
    }
}
