//! Discovery of the partitions a device exposes.
//!
//! Partitions are found through the by-name symlink directory the bootloader
//! populates (e.g. `/dev/block/bootdevice/by-name/boot -> /dev/block/mmcblk0p12`).
//! Sizes come from sysfs, which reports a block count per block device.
use crate::channel::CommandChannel;
use crate::partition::Partition;
use crate::{Error, Result};
use tracing::{debug, warn};

/// Device-side locations consulted during discovery.
#[derive(Clone, Debug)]
pub struct CatalogLayout {
    /// Directory holding one symlink per named partition.
    pub by_name_dir: String,
    /// File containing the logical block size of the backing disk.
    pub block_size_file: String,
    /// Sysfs directory of the backing disk; `<dir>/<block>/size` holds block counts.
    pub disk_sysfs_dir: String,
}

impl Default for CatalogLayout {
    fn default() -> Self {
        Self {
            by_name_dir: "/dev/block/bootdevice/by-name".to_string(),
            block_size_file: "/sys/class/block/mmcblk0/queue/logical_block_size".to_string(),
            disk_sysfs_dir: "/sys/block/mmcblk0".to_string(),
        }
    }
}

/// A symlink entry parsed from the by-name listing.
#[derive(Debug, PartialEq, Eq)]
struct ListingEntry<'a> {
    name: &'a str,
    target: &'a str,
}

/// Extracts `name -> target` pairs from `ls -l` output, ignoring anything
/// that is not a symlink line.
fn parse_listing(output: &str) -> Vec<ListingEntry<'_>> {
    output
        .lines()
        .filter_map(|line| {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            if tokens.len() < 3 || tokens[tokens.len() - 2] != "->" {
                return None;
            }
            Some(ListingEntry {
                name: tokens[tokens.len() - 3],
                target: tokens[tokens.len() - 1],
            })
        })
        .collect()
}

/// Lazily discovered, session-lifetime cache of the device's partitions.
#[derive(Debug, Default)]
pub struct Catalog {
    layout: CatalogLayout,
    block_size: Option<u64>,
    partitions: Option<Vec<Partition>>,
}

impl Catalog {
    pub fn new(layout: CatalogLayout) -> Self {
        Self {
            layout,
            block_size: None,
            partitions: None,
        }
    }

    /// Returns the logical block size of the disk, querying it on first use.
    pub fn block_size(&mut self, channel: &mut dyn CommandChannel) -> Result<u64> {
        if let Some(bs) = self.block_size {
            return Ok(bs);
        }

        let command = format!("cat {}", self.layout.block_size_file);
        let output = channel.run(&command)?;
        let bs = output
            .trim()
            .parse::<u64>()
            .ok()
            .filter(|bs| *bs > 0)
            .ok_or(Error::UnexpectedOutput { command, output })?;

        debug!(block_size = bs, "Logical block size");
        self.block_size = Some(bs);
        Ok(bs)
    }

    /// Returns every partition in listing order. Only the first call talks
    /// to the device.
    pub fn partitions(&mut self, channel: &mut dyn CommandChannel) -> Result<&[Partition]> {
        if self.partitions.is_none() {
            let discovered = self.discover(channel)?;
            self.partitions = Some(discovered);
        }
        Ok(self.partitions.as_deref().unwrap_or_default())
    }

    /// Looks a partition up by name.
    pub fn find(&mut self, channel: &mut dyn CommandChannel, name: &str) -> Result<Partition> {
        self.partitions(channel)?
            .iter()
            .find(|p| p.name == name)
            .cloned()
            .ok_or_else(|| Error::PartitionNotFound(name.to_string()))
    }

    fn discover(&mut self, channel: &mut dyn CommandChannel) -> Result<Vec<Partition>> {
        let bs = self.block_size(channel)?;
        let listing = channel.run(&format!("ls -l {}", self.layout.by_name_dir))?;

        let mut found = Vec::new();
        for entry in parse_listing(&listing) {
            if found.iter().any(|p: &Partition| p.name == entry.name) {
                continue;
            }

            let block = entry.target.rsplit('/').next().unwrap_or(entry.target);
            let command = format!("cat {}/{}/size", self.layout.disk_sysfs_dir, block);
            let output = channel.run(&command)?;
            let Ok(blocks) = output.trim().parse::<u64>() else {
                warn!(partition = entry.name, output = %output.trim(), "Skipping partition with unreadable size");
                continue;
            };
            let Some(size) = blocks.checked_mul(bs) else {
                warn!(partition = entry.name, blocks, block_size = bs, "Skipping partition with impossible size");
                continue;
            };

            let partition = Partition::new(entry.name, entry.target, size);
            debug!(name = %partition.name, path = %partition.path, size = partition.size, "Found partition");
            found.push(partition);
        }

        Ok(found)
    }
}
