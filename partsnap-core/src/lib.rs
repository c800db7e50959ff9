//! The core, UI-agnostic library for the `partsnap` partition backup utility.
//!
//! `partsnap-core` copies raw partitions from a device reachable through a
//! command channel (normally adb) into local image files. Transfers are
//! compressed on the device when possible, resumable after interruption, and
//! verified against a device-side SHA-256 before the image is committed.
//!
//! The library is structured into several key modules:
//! - [`channel`]: The command-execution traits the rest of the library talks through.
//! - [`adb`]: An adb-server client implementing [`channel::CommandChannel`].
//! - [`catalog`]: Discovery of named partitions and their sizes.
//! - [`codec`]: Compressor negotiation and incremental decoding.
//! - [`resume`]: Validation of partial files against the device.
//! - [`transfer`]: The streaming pipeline writing the partial file.
//! - [`finalize`]: Atomic promotion of the partial file to the final image.
//! - [`checksum`]: Local and device-side hashing.
//!
//! The primary entry point is [`BackupSession::backup`], which reports its
//! progress via a callback so the calling application can display it in any
//! way it chooses.
//!
//! ## Example: Backing Up a Partition with Progress Reporting
//!
//! ```rust,no_run
//! use partsnap_core::{BackupOptions, BackupSession, adb::AdbServer};
//! use std::path::Path;
//!
//! fn main() -> partsnap_core::Result<()> {
//!     let server = AdbServer::default();
//!     let devices = server.devices()?;
//!     let Some(device) = devices.first() else {
//!         println!("No devices found");
//!         return Ok(());
//!     };
//!
//!     let mut session = BackupSession::new(server.device(&device.serial));
//!
//!     let outcome = session.backup(
//!         "boot",
//!         Path::new("backups"),
//!         &BackupOptions::default(),
//!         |bytes, partition| println!("{}: {}/{} bytes", partition.name, bytes, partition.size),
//!     )?;
//!
//!     println!("{outcome:?}");
//!     Ok(())
//! }
//! ```

pub mod adb;
pub mod catalog;
pub mod channel;
pub mod checksum;
pub mod codec;
pub mod device;
mod error;
pub mod finalize;
pub mod partition;
pub mod resume;
pub mod session;
pub mod transfer;

pub use error::{Error, Result};
pub use partition::{Partition, PartitionRef};
pub use session::{BackupOptions, BackupOutcome, BackupSession};
