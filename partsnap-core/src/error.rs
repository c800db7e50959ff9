//! Error types for the backup pipeline.
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

/// Errors produced while discovering, transferring or verifying partitions.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("partition {0} not found")]
    PartitionNotFound(String),

    /// The stream ended with a different number of bytes than the partition holds.
    #[error(
        "partition {name}: expected {expected} bytes, received {actual}{}",
        resume_hint(.expected, .actual)
    )]
    PartitionDataSizeMismatch {
        name: String,
        expected: u64,
        actual: u64,
    },

    /// The received bytes are complete but do not hash to the device digest.
    #[error(
        "partition {name}: checksum mismatch (device {expected}, local {actual}); \
         run again without resume to fetch it from scratch"
    )]
    PartitionDataHashMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("unexpected output from `{command}`: {output:?}")]
    UnexpectedOutput { command: String, output: String },

    #[error("decompression failed: {0}")]
    Decompress(#[source] io::Error),

    #[error("adb: {0}")]
    Adb(String),

    #[error("operation cancelled by user")]
    Cancelled,
}

fn resume_hint(expected: &u64, actual: &u64) -> &'static str {
    if actual < expected {
        " (connection dropped? run again with resume enabled to continue)"
    } else {
        ""
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Fails with [`Error::Cancelled`] once `running` has been cleared.
pub(crate) fn ensure_running(running: &AtomicBool) -> Result<()> {
    if running.load(Ordering::SeqCst) {
        Ok(())
    } else {
        Err(Error::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_transfer_suggests_resume() {
        let err = Error::PartitionDataSizeMismatch {
            name: "boot".into(),
            expected: 10,
            actual: 4,
        };
        assert!(err.to_string().contains("resume"));
    }

    #[test]
    fn oversized_transfer_has_no_resume_hint() {
        let err = Error::PartitionDataSizeMismatch {
            name: "boot".into(),
            expected: 10,
            actual: 12,
        };
        assert_eq!(
            err.to_string(),
            "partition boot: expected 10 bytes, received 12"
        );
    }

    #[test]
    fn cleared_flag_means_cancelled() {
        assert!(ensure_running(&AtomicBool::new(true)).is_ok());
        assert!(matches!(
            ensure_running(&AtomicBool::new(false)),
            Err(Error::Cancelled)
        ));
    }
}
