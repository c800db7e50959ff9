//! Compression negotiation and incremental decompression of the transfer stream.
//!
//! The device compresses the partition with whatever tool its userland ships;
//! the host decodes each received chunk as it arrives. When no tool is found
//! the stream is sent raw and decoding is a pass-through.
use crate::Result;
use crate::channel::CommandChannel;
use flate2::write::{DeflateDecoder, GzDecoder, ZlibDecoder};
use std::fmt;
use std::io::{self, Write};
use tracing::debug;
use xz2::write::XzDecoder;

/// A stream compressor that may be available on the device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Codec {
    Zstd,
    Gzip,
    Xz,
}

/// Tools probed during negotiation, most preferred first.
pub const PREFERENCES: &[Codec] = &[Codec::Zstd, Codec::Gzip, Codec::Xz];

impl Codec {
    /// The executable name on the device.
    pub fn tool(self) -> &'static str {
        match self {
            Codec::Zstd => "zstd",
            Codec::Gzip => "gzip",
            Codec::Xz => "xz",
        }
    }

    /// The pipeline stage that compresses stdin to stdout on the device.
    pub fn compress_command(self) -> String {
        format!("{} -c", self.tool())
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tool())
    }
}

/// Returns the first codec in `preferences` whose tool answers `--help` with
/// a usage text, or `None` if none does.
pub fn negotiate(channel: &mut dyn CommandChannel, preferences: &[Codec]) -> Result<Option<Codec>> {
    for &codec in preferences {
        let output = channel.run(&format!("{} --help 2>&1", codec.tool()))?;
        if output.to_lowercase().contains("usage:") {
            debug!(codec = %codec, "Compression tool available");
            return Ok(Some(codec));
        }
        debug!(codec = %codec, "Compression tool not available");
    }
    Ok(None)
}

/// A deflate-family decoder, chosen by sniffing the first two stream bytes.
enum Flate {
    Gzip(GzDecoder<Vec<u8>>),
    Zlib(ZlibDecoder<Vec<u8>>),
    Raw(DeflateDecoder<Vec<u8>>),
}

impl Flate {
    fn from_header(header: &[u8]) -> Self {
        match header {
            [0x1f, 0x8b, ..] => Flate::Gzip(GzDecoder::new(Vec::new())),
            [cmf, flg, ..] if cmf & 0x0f == 8 && (u16::from(*cmf) << 8 | u16::from(*flg)) % 31 == 0 => {
                Flate::Zlib(ZlibDecoder::new(Vec::new()))
            }
            _ => Flate::Raw(DeflateDecoder::new(Vec::new())),
        }
    }

    fn decode(&mut self, data: &[u8]) -> io::Result<Vec<u8>> {
        match self {
            Flate::Gzip(d) => {
                d.write_all(data)?;
                d.flush()?;
                Ok(std::mem::take(d.get_mut()))
            }
            Flate::Zlib(d) => {
                d.write_all(data)?;
                d.flush()?;
                Ok(std::mem::take(d.get_mut()))
            }
            Flate::Raw(d) => {
                d.write_all(data)?;
                d.flush()?;
                Ok(std::mem::take(d.get_mut()))
            }
        }
    }

    fn finish(&mut self) -> io::Result<Vec<u8>> {
        match self {
            Flate::Gzip(d) => {
                d.try_finish()?;
                Ok(std::mem::take(d.get_mut()))
            }
            Flate::Zlib(d) => {
                d.try_finish()?;
                Ok(std::mem::take(d.get_mut()))
            }
            Flate::Raw(d) => {
                d.try_finish()?;
                Ok(std::mem::take(d.get_mut()))
            }
        }
    }
}

enum Inner {
    Identity,
    /// Deflate-family input whose framing is not known yet.
    Sniffing(Vec<u8>),
    Flate(Flate),
    Zstd(zstd::stream::write::Decoder<'static, Vec<u8>>),
    Xz(XzDecoder<Vec<u8>>),
}

/// Push-based decoder turning received chunks back into partition bytes.
pub struct Decoder {
    inner: Inner,
}

impl Decoder {
    /// Builds the decoder matching the negotiated codec; `None` yields a
    /// pass-through decoder.
    pub fn new(codec: Option<Codec>) -> io::Result<Self> {
        let inner = match codec {
            None => Inner::Identity,
            Some(Codec::Gzip) => Inner::Sniffing(Vec::with_capacity(2)),
            Some(Codec::Zstd) => Inner::Zstd(zstd::stream::write::Decoder::new(Vec::new())?),
            Some(Codec::Xz) => Inner::Xz(XzDecoder::new(Vec::new())),
        };
        Ok(Self { inner })
    }

    /// Feeds one received chunk and returns whatever it decoded to.
    pub fn decode(&mut self, chunk: &[u8]) -> io::Result<Vec<u8>> {
        match &mut self.inner {
            Inner::Identity => Ok(chunk.to_vec()),
            Inner::Sniffing(header) => {
                header.extend_from_slice(chunk);
                if header.len() < 2 {
                    return Ok(Vec::new());
                }
                let buffered = std::mem::take(header);
                let mut flate = Flate::from_header(&buffered);
                let out = flate.decode(&buffered);
                self.inner = Inner::Flate(flate);
                out
            }
            Inner::Flate(flate) => flate.decode(chunk),
            Inner::Zstd(d) => {
                d.write_all(chunk)?;
                d.flush()?;
                Ok(std::mem::take(d.get_mut()))
            }
            Inner::Xz(d) => {
                d.write_all(chunk)?;
                d.flush()?;
                Ok(std::mem::take(d.get_mut()))
            }
        }
    }

    /// Signals end of input and returns any remaining decoded bytes.
    ///
    /// Fails if the compressed stream was cut short.
    pub fn finish(&mut self) -> io::Result<Vec<u8>> {
        match &mut self.inner {
            Inner::Identity => Ok(Vec::new()),
            Inner::Sniffing(header) if header.is_empty() => Ok(Vec::new()),
            Inner::Sniffing(header) => {
                let buffered = std::mem::take(header);
                let mut flate = Flate::from_header(&buffered);
                let mut out = flate.decode(&buffered)?;
                out.extend(flate.finish()?);
                self.inner = Inner::Flate(flate);
                Ok(out)
            }
            Inner::Flate(flate) => flate.finish(),
            Inner::Zstd(d) => {
                d.flush()?;
                Ok(std::mem::take(d.get_mut()))
            }
            Inner::Xz(d) => {
                d.finish()
            }
        }
    }
}
