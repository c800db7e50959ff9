//! The command-execution channel used to talk to the device.
//!
//! Everything the library knows about the device comes through two primitives:
//! running a command and capturing its textual output, and running a command
//! whose raw output is pulled back chunk by chunk. [`crate::adb::AdbDevice`]
//! is the production implementation; tests provide in-memory ones.
use crate::Result;
use std::io::{self, Read};

/// Default size of chunks pulled from a [`ReaderStream`].
pub const DEFAULT_CHUNK_SIZE: usize = 32 * 1024;

/// A channel capable of executing shell commands on the device.
pub trait CommandChannel {
    /// Runs `command` and returns everything it printed.
    fn run(&mut self, command: &str) -> Result<String>;

    /// Runs `command` and returns a stream over its raw output bytes.
    ///
    /// The caller must [`close`](CommandStream::close) the stream when done.
    fn stream<'a>(&'a mut self, command: &str) -> Result<Box<dyn CommandStream + 'a>>;
}

/// Pull-based access to the output of a streaming command.
pub trait CommandStream {
    /// Returns the next chunk of output, or `None` once the command has
    /// closed its output.
    fn next_chunk(&mut self) -> io::Result<Option<Vec<u8>>>;

    /// Tears down the command session. Further calls to `next_chunk` return `None`.
    fn close(&mut self) -> io::Result<()>;
}

/// Adapts any [`Read`] into a [`CommandStream`]. Closing drops the reader.
pub struct ReaderStream<R> {
    reader: Option<R>,
    chunk_size: usize,
}

impl<R: Read> ReaderStream<R> {
    pub fn new(reader: R) -> Self {
        Self::with_chunk_size(reader, DEFAULT_CHUNK_SIZE)
    }

    pub fn with_chunk_size(reader: R, chunk_size: usize) -> Self {
        Self {
            reader: Some(reader),
            chunk_size: chunk_size.max(1),
        }
    }
}

impl<R: Read> CommandStream for ReaderStream<R> {
    fn next_chunk(&mut self) -> io::Result<Option<Vec<u8>>> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };

        let mut buf = vec![0u8; self.chunk_size];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => return Ok(None),
                Ok(n) => {
                    buf.truncate(n);
                    return Ok(Some(buf));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    fn close(&mut self) -> io::Result<()> {
        self.reader.take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn reader_stream_yields_chunks_then_end() {
        let mut stream = ReaderStream::with_chunk_size(Cursor::new(vec![7u8; 10]), 4);
        let mut sizes = Vec::new();
        while let Some(chunk) = stream.next_chunk().unwrap() {
            sizes.push(chunk.len());
        }
        assert_eq!(sizes, vec![4, 4, 2]);
    }

    #[test]
    fn closed_stream_is_exhausted() {
        let mut stream = ReaderStream::new(Cursor::new(vec![1u8; 10]));
        stream.close().unwrap();
        assert!(stream.next_chunk().unwrap().is_none());
    }
}
