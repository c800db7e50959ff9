//! A minimal client for the adb server's host protocol.
//!
//! Every request is a 4-digit hex length followed by the payload. The server
//! answers `OKAY`, or `FAIL` followed by a length-prefixed message. Commands
//! for a device first switch the connection with `host:transport:<serial>`,
//! after which the connection carries the output of the requested service.
use crate::channel::{CommandChannel, CommandStream, ReaderStream};
use crate::device::Device;
use crate::{Error, Result};
use std::io::{self, Read, Write};
use std::net::TcpStream;
use tracing::debug;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 5037;

/// Address of a running adb server.
#[derive(Clone, Debug)]
pub struct AdbServer {
    pub host: String,
    pub port: u16,
}

impl Default for AdbServer {
    fn default() -> Self {
        Self::new(DEFAULT_HOST, DEFAULT_PORT)
    }
}

impl AdbServer {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    fn connect(&self) -> Result<TcpStream> {
        let stream = TcpStream::connect((self.host.as_str(), self.port))?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    /// Lists the devices the server knows about.
    pub fn devices(&self) -> Result<Vec<Device>> {
        let mut conn = self.connect()?;
        request(&mut conn, "host:devices")?;
        let body = read_length_prefixed(&mut conn)?;
        Ok(Device::parse_list(&body))
    }

    /// Returns a command channel bound to the device with `serial`.
    pub fn device(&self, serial: impl Into<String>) -> AdbDevice {
        AdbDevice {
            server: self.clone(),
            serial: serial.into(),
        }
    }
}

/// Command channel to one device, opening a fresh connection per command.
#[derive(Clone, Debug)]
pub struct AdbDevice {
    server: AdbServer,
    serial: String,
}

impl AdbDevice {
    pub fn serial(&self) -> &str {
        &self.serial
    }

    fn open(&self, service: &str) -> Result<TcpStream> {
        let mut conn = self.server.connect()?;
        request(&mut conn, &format!("host:transport:{}", self.serial))?;
        request(&mut conn, service)?;
        Ok(conn)
    }
}

impl CommandChannel for AdbDevice {
    fn run(&mut self, command: &str) -> Result<String> {
        debug!(serial = %self.serial, command, "adb shell");
        let mut conn = self.open(&format!("shell:{command}"))?;
        let mut output = Vec::new();
        conn.read_to_end(&mut output)?;
        Ok(String::from_utf8_lossy(&output).into_owned())
    }

    fn stream<'a>(&'a mut self, command: &str) -> Result<Box<dyn CommandStream + 'a>> {
        debug!(serial = %self.serial, command, "adb exec");
        // `exec:` does not allocate a pty, so binary output arrives untouched.
        let conn = self.open(&format!("exec:{command}"))?;
        Ok(Box::new(ReaderStream::new(conn)))
    }
}

/// Encodes a request as the server expects it.
fn encode_request(payload: &str) -> Result<Vec<u8>> {
    if payload.len() > 0xffff {
        return Err(Error::Adb(format!("request too long ({} bytes)", payload.len())));
    }
    let mut out = format!("{:04x}", payload.len()).into_bytes();
    out.extend_from_slice(payload.as_bytes());
    Ok(out)
}

/// Sends `payload` and waits for the server's verdict.
fn request<S: Read + Write>(conn: &mut S, payload: &str) -> Result<()> {
    conn.write_all(&encode_request(payload)?)?;
    conn.flush()?;

    let mut status = [0u8; 4];
    conn.read_exact(&mut status)?;
    match &status {
        b"OKAY" => Ok(()),
        b"FAIL" => {
            let message = read_length_prefixed(conn)?;
            Err(Error::Adb(format!("{payload}: {message}")))
        }
        other => Err(Error::Adb(format!(
            "unexpected status {:?}",
            String::from_utf8_lossy(other)
        ))),
    }
}

fn read_length_prefixed<R: Read>(conn: &mut R) -> Result<String> {
    let mut len = [0u8; 4];
    conn.read_exact(&mut len)?;
    let len = std::str::from_utf8(&len)
        .ok()
        .and_then(|s| usize::from_str_radix(s, 16).ok())
        .ok_or_else(|| Error::Adb("malformed length prefix".to_string()))?;

    let mut body = vec![0u8; len];
    conn.read_exact(&mut body)?;
    String::from_utf8(body).map_err(|e| Error::Io(io::Error::new(io::ErrorKind::InvalidData, e)))
}
