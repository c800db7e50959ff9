//! Contains the logic for streaming a partition from the device into a partial file.
use crate::channel::{CommandChannel, CommandStream};
use crate::checksum::{device_digest, hex_digest};
use crate::codec::{Codec, Decoder};
use crate::error::ensure_running;
use crate::partition::Partition;
use crate::{Error, Result};
use sha2::{Digest, Sha256};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tracing::{debug, warn};

/// Block size used by `dd` on the device.
pub const READ_BLOCK_SIZE: u64 = 4 * 1024 * 1024;

/// Builds the device-side command that emits the partition from `offset` on,
/// optionally compressed.
///
/// Offsets that are not a multiple of [`READ_BLOCK_SIZE`] are bridged to the
/// next block boundary with `head | tail`, which never holds more than one
/// block in memory; the rest is read with aligned `dd` blocks.
pub fn read_command(partition: &Partition, offset: u64, codec: Option<Codec>) -> String {
    let path = &partition.path;
    let mut command = if offset == 0 {
        format!("dd if={path} bs=4M 2>/dev/null")
    } else if offset % READ_BLOCK_SIZE == 0 {
        format!("dd if={path} bs=4M skip={} 2>/dev/null", offset / READ_BLOCK_SIZE)
    } else {
        let boundary = (offset / READ_BLOCK_SIZE + 1) * READ_BLOCK_SIZE;
        let bridge_end = boundary.min(partition.size).max(offset);
        let bridge = format!("head -c {bridge_end} {path} | tail -c {}", bridge_end - offset);
        if boundary < partition.size {
            format!(
                "{{ {bridge}; dd if={path} bs=4M skip={} 2>/dev/null; }}",
                boundary / READ_BLOCK_SIZE
            )
        } else {
            bridge
        }
    };

    if let Some(codec) = codec {
        command.push_str(" | ");
        command.push_str(&codec.compress_command());
    }
    command
}

/// State of one partition transfer, from the first device read to the
/// postcondition checks.
pub struct Transfer<'a> {
    pub partition: &'a Partition,
    pub partial_path: &'a Path,
    pub offset: u64,
    pub codec: Option<Codec>,
    /// Running hash over the partial file; `None` disables verification.
    pub hasher: Option<Sha256>,
    /// Cached full-partition digest from the device, fetched on demand.
    pub device_digest: Option<String>,
}

impl Transfer<'_> {
    /// Streams the partition into the partial file and checks the result.
    ///
    /// `on_progress` receives the number of partition bytes held by the
    /// partial file after every chunk. Returns the final byte count, which
    /// equals the partition size on success.
    ///
    /// # Errors
    ///
    /// - [`Error::PartitionDataSizeMismatch`] if the stream ended early or
    ///   delivered too much.
    /// - [`Error::PartitionDataHashMismatch`] if verification is enabled and
    ///   the bytes do not hash to the device digest.
    /// - [`Error::Cancelled`] if `running` was cleared mid-stream. Bytes
    ///   received so far stay in the partial file.
    pub fn run<F>(
        mut self,
        channel: &mut dyn CommandChannel,
        running: &Arc<AtomicBool>,
        mut on_progress: F,
    ) -> Result<u64>
    where
        F: FnMut(u64, &Partition),
    {
        let partition = self.partition;

        // Append vs truncate is fixed here for the whole transfer.
        let mut file = if self.offset > 0 {
            OpenOptions::new().append(true).open(self.partial_path)?
        } else {
            File::create(self.partial_path)?
        };

        let command = read_command(partition, self.offset, self.codec);
        debug!(partition = %partition.name, command = %command, "Starting device read");

        let mut total = self.offset;
        on_progress(total, partition);

        let streamed = {
            let mut stream = channel.stream(&command)?;
            let result = pump(
                stream.as_mut(),
                self.codec,
                &mut file,
                self.hasher.as_mut(),
                &mut total,
                running,
                |bytes| on_progress(bytes, partition),
            );
            let closed = stream.close();
            result.and_then(|()| closed.map_err(Error::from))
        };
        file.flush()?;
        drop(file);
        streamed?;

        if total != partition.size {
            return Err(Error::PartitionDataSizeMismatch {
                name: partition.name.clone(),
                expected: partition.size,
                actual: total,
            });
        }

        if let Some(hasher) = self.hasher.take() {
            ensure_running(running)?;
            let expected = match self.device_digest.take() {
                Some(digest) => digest,
                None => device_digest(channel, partition, None)?,
            };
            let actual = hex_digest(&hasher);
            if actual != expected {
                return Err(Error::PartitionDataHashMismatch {
                    name: partition.name.clone(),
                    expected,
                    actual,
                });
            }
            debug!(partition = %partition.name, digest = %actual, "Checksum verified");
        }

        Ok(total)
    }
}

/// Pulls chunks until the stream ends, decoding and writing each one.
fn pump<F>(
    stream: &mut dyn CommandStream,
    codec: Option<Codec>,
    file: &mut File,
    mut hasher: Option<&mut Sha256>,
    total: &mut u64,
    running: &AtomicBool,
    mut on_progress: F,
) -> Result<()>
where
    F: FnMut(u64),
{
    let mut decoder = Decoder::new(codec).map_err(Error::Decompress)?;
    let mut write = |data: &[u8]| -> Result<()> {
        if !data.is_empty() {
            file.write_all(data)?;
            if let Some(hasher) = hasher.as_deref_mut() {
                hasher.update(data);
            }
            *total += data.len() as u64;
        }
        // Chunks the decoder only buffered still count as progress ticks.
        on_progress(*total);
        Ok(())
    };

    while let Some(chunk) = stream.next_chunk()? {
        ensure_running(running)?;
        let data = decoder.decode(&chunk).map_err(Error::Decompress)?;
        write(&data)?;
    }

    match decoder.finish() {
        Ok(tail) => write(&tail),
        // A cut-off compressed stream is reported as the size mismatch it causes.
        Err(e) if codec.is_some() => {
            warn!(error = %e, "Compressed stream ended unexpectedly");
            Ok(())
        }
        Err(e) => Err(Error::Decompress(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boot() -> Partition {
        Partition::new("boot", "/dev/block/mmcblk0p12", 64 * 1024 * 1024)
    }

    #[test]
    fn fresh_read_is_plain_dd() {
        assert_eq!(
            read_command(&boot(), 0, None),
            "dd if=/dev/block/mmcblk0p12 bs=4M 2>/dev/null"
        );
    }

    #[test]
    fn aligned_resume_skips_whole_blocks() {
        assert_eq!(
            read_command(&boot(), 8 * 1024 * 1024, Some(Codec::Gzip)),
            "dd if=/dev/block/mmcblk0p12 bs=4M skip=2 2>/dev/null | gzip -c"
        );
    }

    #[test]
    fn unaligned_resume_bridges_to_next_block() {
        assert_eq!(
            read_command(&boot(), 1000, Some(Codec::Zstd)),
            "{ head -c 4194304 /dev/block/mmcblk0p12 | tail -c 4193304; \
             dd if=/dev/block/mmcblk0p12 bs=4M skip=1 2>/dev/null; } | zstd -c"
        );
    }

    #[test]
    fn unaligned_resume_in_last_block_needs_no_dd() {
        let misc = Partition::new("misc", "/dev/block/mmcblk0p3", 6 * 1024 * 1024);
        assert_eq!(
            read_command(&misc, 5 * 1024 * 1024, None),
            "head -c 6291456 /dev/block/mmcblk0p3 | tail -c 1048576"
        );
    }
}
