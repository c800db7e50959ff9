//! The long-lived backup session tying discovery, resume and transfer together.
use crate::catalog::{Catalog, CatalogLayout};
use crate::channel::CommandChannel;
use crate::codec::{self, Codec};
use crate::error::ensure_running;
use crate::finalize::{self, ArtifactPaths};
use crate::partition::{Partition, PartitionRef};
use crate::resume::{self, ResumePlan, UpToDate};
use crate::transfer::Transfer;
use crate::Result;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tracing::{info, info_span};

/// Per-backup behaviour switches.
#[derive(Clone, Debug)]
pub struct BackupOptions {
    /// Hash the received data and compare it against the device.
    pub verify: bool,
    /// Continue from a partial file when the device confirms it is still valid.
    pub resume: bool,
    /// Leave existing final images alone. When `false`, an existing image is
    /// re-hashed and kept only if it still matches the device.
    pub skip_existing: bool,
    /// Compress the stream on the device when a compressor is available.
    pub compression: bool,
}

impl Default for BackupOptions {
    fn default() -> Self {
        Self {
            verify: true,
            resume: true,
            skip_existing: true,
            compression: true,
        }
    }
}

/// What a call to [`BackupSession::backup`] ended up doing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackupOutcome {
    /// The image already existed and was left untouched.
    Skipped,
    /// The existing image was re-hashed and still matches the device.
    Verified,
    /// The partition was transferred, starting at `resumed_from`.
    Completed { bytes: u64, resumed_from: u64 },
}

/// Owns a command channel and everything learned about the device through it.
///
/// The block size, partition catalog and negotiated compressor are each
/// fetched on first use and reused for the lifetime of the session.
pub struct BackupSession<C> {
    channel: C,
    catalog: Catalog,
    preferences: Vec<Codec>,
    codec: Option<Option<Codec>>,
    running: Arc<AtomicBool>,
}

impl<C: CommandChannel> BackupSession<C> {
    pub fn new(channel: C) -> Self {
        Self {
            channel,
            catalog: Catalog::new(CatalogLayout::default()),
            preferences: codec::PREFERENCES.to_vec(),
            codec: None,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Uses custom device paths for partition discovery.
    pub fn with_layout(mut self, layout: CatalogLayout) -> Self {
        self.catalog = Catalog::new(layout);
        self
    }

    /// Overrides the ordered list of compressors to probe.
    pub fn with_codecs(mut self, preferences: &[Codec]) -> Self {
        self.preferences = preferences.to_vec();
        self.codec = None;
        self
    }

    /// Installs a flag that aborts the running backup when set to `false`.
    pub fn with_cancel_flag(mut self, running: Arc<AtomicBool>) -> Self {
        self.running = running;
        self
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    pub fn into_channel(self) -> C {
        self.channel
    }

    /// Lists all partitions of the device in discovery order.
    pub fn list_partitions(&mut self) -> Result<Vec<Partition>> {
        Ok(self.catalog.partitions(&mut self.channel)?.to_vec())
    }

    /// Looks a partition up by name.
    pub fn partition(&mut self, name: &str) -> Result<Partition> {
        self.catalog.find(&mut self.channel, name)
    }

    /// Returns the compressor used for transfers, probing the device once.
    pub fn compression(&mut self) -> Result<Option<Codec>> {
        if let Some(codec) = self.codec {
            return Ok(codec);
        }
        let codec = codec::negotiate(&mut self.channel, &self.preferences)?;
        info!(codec = ?codec.map(|c| c.tool()), "Negotiated stream compression");
        self.codec = Some(codec);
        Ok(codec)
    }

    /// Backs a partition up into `out_dir` as `<name>.img`.
    ///
    /// Data is first streamed into `<name>.tmp`; only after the size (and,
    /// with `options.verify`, the digest) has been checked is it renamed to
    /// the final image. `on_progress` is called with the number of bytes in
    /// the partial file and the partition being transferred.
    ///
    /// # Errors
    ///
    /// Fails with [`crate::Error::PartitionNotFound`] for unknown names and
    /// with the size/hash mismatch errors of [`Transfer::run`]. On failure
    /// the partial file keeps every byte received. Returns
    /// [`crate::Error::Cancelled`] without touching the device once the
    /// cancel flag has been cleared.
    pub fn backup<F>(
        &mut self,
        partition: impl Into<PartitionRef>,
        out_dir: &Path,
        options: &BackupOptions,
        on_progress: F,
    ) -> Result<BackupOutcome>
    where
        F: FnMut(u64, &Partition),
    {
        ensure_running(&self.running)?;

        let partition = match partition.into() {
            PartitionRef::Resolved(p) => p,
            PartitionRef::Name(name) => self.partition(&name)?,
        };

        let span = info_span!("backup", partition = %partition.name);
        let _guard = span.enter();

        fs::create_dir_all(out_dir)?;
        let paths = ArtifactPaths::new(out_dir, &partition.name);

        let plan = resume::evaluate(&mut self.channel, &partition, &paths, options, &self.running)?;
        let start = match plan {
            ResumePlan::UpToDate(UpToDate::Skipped) => return Ok(BackupOutcome::Skipped),
            ResumePlan::UpToDate(UpToDate::Verified) => return Ok(BackupOutcome::Verified),
            ResumePlan::Transfer(start) => start,
        };

        let codec = if options.compression {
            self.compression()?
        } else {
            None
        };

        let hasher = options
            .verify
            .then(|| start.prefix_hash.unwrap_or_else(Sha256::new));

        let transfer = Transfer {
            partition: &partition,
            partial_path: &paths.partial,
            offset: start.offset,
            codec,
            hasher,
            device_digest: start.device_digest,
        };
        let bytes = transfer.run(&mut self.channel, &self.running, on_progress)?;

        finalize::promote(&paths)?;

        Ok(BackupOutcome::Completed {
            bytes,
            resumed_from: start.offset,
        })
    }
}
