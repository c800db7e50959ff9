use std::fmt;

/// A named partition exposed by the device as a block special file.
///
/// Instances are produced by the [`crate::catalog::Catalog`] and are immutable
/// once discovered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Partition {
    /// The entry name in the by-name symlink table (e.g., "boot").
    pub name: String,
    /// The device-side path of the block file (e.g., `/dev/block/mmcblk0p12`).
    pub path: String,
    /// The exact size of the partition in bytes.
    pub size: u64,
}

impl Partition {
    pub fn new(name: impl Into<String>, path: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            size,
        }
    }

    /// The size in MiB, formatted with two decimals.
    pub fn size_mb(&self) -> String {
        format!("{:.2}", self.size as f64 / (1024.0 * 1024.0))
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<20} {:<32} {:>10} MB", self.name, self.path, self.size_mb())
    }
}

/// A partition given either by name or already resolved against the catalog.
#[derive(Clone, Debug)]
pub enum PartitionRef {
    Name(String),
    Resolved(Partition),
}

impl From<&str> for PartitionRef {
    fn from(name: &str) -> Self {
        PartitionRef::Name(name.to_string())
    }
}

impl From<String> for PartitionRef {
    fn from(name: String) -> Self {
        PartitionRef::Name(name)
    }
}

impl From<Partition> for PartitionRef {
    fn from(partition: Partition) -> Self {
        PartitionRef::Resolved(partition)
    }
}

impl From<&Partition> for PartitionRef {
    fn from(partition: &Partition) -> Self {
        PartitionRef::Resolved(partition.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_is_rendered_in_mebibytes() {
        let p = Partition::new("boot", "/dev/block/mmcblk0p1", 64 * 1024 * 1024 + 512 * 1024);
        assert_eq!(p.size_mb(), "64.50");
    }
}
