//! An in-memory device that understands the shell commands the library issues.
#![allow(dead_code)]

use flate2::Compression;
use flate2::write::GzEncoder;
use partsnap_core::channel::{CommandChannel, CommandStream, ReaderStream};
use partsnap_core::Result;
use sha2::{Digest, Sha256};
use std::io::{Cursor, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub const MIB: usize = 1024 * 1024;
const BY_NAME_DIR: &str = "/dev/block/bootdevice/by-name";

pub struct FakePartition {
    pub name: &'static str,
    pub block: &'static str,
    pub data: Vec<u8>,
}

pub struct FakeDevice {
    pub block_size: u64,
    pub partitions: Vec<FakePartition>,
    /// Compressors that answer `--help`.
    pub tools: Vec<&'static str>,
    /// Stop the partition data after this many bytes (device-side interruption).
    pub drop_after: Option<usize>,
    /// Stop the wire bytes after this many bytes (connection loss mid-stream).
    pub cut_wire_after: Option<usize>,
    /// Flip the partition byte at this absolute offset while in transit.
    pub flip_byte_at: Option<usize>,
    pub chunk_size: usize,
    /// Canned replies that take precedence over the simulated userland.
    pub answers: Vec<(String, String)>,
    /// Clears the flag when the command runs, like a Ctrl+C while it executes.
    pub interrupt: Option<(String, Arc<AtomicBool>)>,
    pub commands: Vec<String>,
    /// Commands whose output was streamed.
    pub streamed: Vec<String>,
}

/// Deterministic, poorly compressible test data.
pub fn pattern(len: usize, seed: u32) -> Vec<u8> {
    let mut state = seed | 1;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state >> 24) as u8
        })
        .collect()
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

impl FakeDevice {
    /// A device with `boot` (4 MiB + 150 KiB) and `misc` (64 KiB) partitions,
    /// plus a by-name entry whose size cannot be read.
    pub fn new() -> Self {
        Self {
            block_size: 512,
            partitions: vec![
                FakePartition {
                    name: "boot",
                    block: "mmcblk0p1",
                    data: pattern(4 * MIB + 300 * 512, 7),
                },
                FakePartition {
                    name: "misc",
                    block: "mmcblk0p2",
                    data: pattern(128 * 512, 11),
                },
            ],
            tools: vec!["gzip"],
            drop_after: None,
            cut_wire_after: None,
            flip_byte_at: None,
            chunk_size: 64 * 1024,
            answers: Vec::new(),
            interrupt: None,
            commands: Vec::new(),
            streamed: Vec::new(),
        }
    }

    /// Makes `command` print `output` instead of its simulated result.
    pub fn answering(mut self, command: &str, output: &str) -> Self {
        self.answers.push((command.to_string(), output.to_string()));
        self
    }

    pub fn with_tools(mut self, tools: &[&'static str]) -> Self {
        self.tools = tools.to_vec();
        self
    }

    pub fn data(&self, name: &str) -> &[u8] {
        &self
            .partitions
            .iter()
            .find(|p| p.name == name)
            .expect("unknown fake partition")
            .data
    }

    /// Every streaming read issued so far.
    pub fn reads(&self) -> Vec<&str> {
        self.streamed.iter().map(String::as_str).collect()
    }

    pub fn count(&self, command: &str) -> usize {
        self.commands.iter().filter(|c| *c == command).count()
    }

    fn by_path(&self, path: &str) -> Option<&FakePartition> {
        self.partitions
            .iter()
            .find(|p| format!("/dev/block/{}", p.block) == path)
    }

    fn listing(&self) -> String {
        let mut out = String::from("total 0\n");
        out.push_str("drwxr-xr-x 2 root root 60 2024-01-01 00:00 nested\n");
        for p in &self.partitions {
            out.push_str(&format!(
                "lrwxrwxrwx 1 root root 21 2024-01-01 00:00 {} -> /dev/block/{}\n",
                p.name, p.block
            ));
        }
        out.push_str("lrwxrwxrwx 1 root root 21 2024-01-01 00:00 broken -> /dev/block/mmcblk0p99\n");
        out
    }

    fn answer(&self, command: &str) -> String {
        if let Some((_, output)) = self.answers.iter().find(|(c, _)| c == command) {
            return output.clone();
        }
        if command == "cat /sys/class/block/mmcblk0/queue/logical_block_size" {
            return format!("{}\n", self.block_size);
        }
        if command == format!("ls -l {BY_NAME_DIR}") {
            return self.listing();
        }
        if let Some(block) = command
            .strip_prefix("cat /sys/block/mmcblk0/")
            .and_then(|rest| rest.strip_suffix("/size"))
        {
            return match self.partitions.iter().find(|p| p.block == block) {
                Some(p) => format!("{}\n", p.data.len() as u64 / self.block_size),
                None => format!("cat: /sys/block/mmcblk0/{block}/size: No such file or directory\n"),
            };
        }
        if let Some(tool) = command.strip_suffix(" --help 2>&1") {
            return if self.tools.contains(&tool) {
                format!("usage: {tool} [-cdfk] [FILE...]\n")
            } else {
                format!("/system/bin/sh: {tool}: inaccessible or not found\n")
            };
        }
        if let Some(path) = command.strip_prefix("sha256sum ") {
            if let Some(p) = self.by_path(path) {
                return format!("{}  {}\n", sha256_hex(&p.data), path);
            }
        }
        if let Some(rest) = command
            .strip_prefix("head -c ")
            .and_then(|rest| rest.strip_suffix(" | sha256sum"))
        {
            let (len, path) = rest.split_once(' ').expect("head -c <len> <path>");
            let len: usize = len.parse().expect("numeric prefix length");
            if let Some(p) = self.by_path(path) {
                return format!("{}  -\n", sha256_hex(&p.data[..len.min(p.data.len())]));
            }
        }
        format!("/system/bin/sh: {command}: not found\n")
    }

    /// Returns the partition bytes one read stage prints, and where they start.
    fn read_stage(&self, stage: &str) -> (usize, Vec<u8>) {
        let tokens: Vec<&str> = stage.split_whitespace().collect();
        match tokens.as_slice() {
            // head -c <end> <path> | tail -c <len>
            ["head", "-c", end, path, "|", "tail", "-c", len] => {
                let end: usize = end.parse().expect("numeric head length");
                let len: usize = len.parse().expect("numeric tail length");
                let data = &self.by_path(path).expect("head of unknown partition").data;
                let end = end.min(data.len());
                let start = end.saturating_sub(len);
                (start, data[start..end].to_vec())
            }
            ["dd", args @ ..] => {
                let arg = |key: &str| args.iter().find_map(|t| t.strip_prefix(key));
                let path = arg("if=").expect("dd without if=");
                let bs = arg("bs=").expect("dd without bs=");
                let skip: usize = arg("skip=").map_or(0, |s| s.parse().expect("numeric skip"));
                let block = if bs == "4M" { 4 * MIB } else { bs.parse().expect("numeric bs") };
                let data = &self.by_path(path).expect("dd of unknown partition").data;
                let start = (block * skip).min(data.len());
                (start, data[start..].to_vec())
            }
            _ => panic!("unexpected read stage {stage:?}"),
        }
    }

    /// Interprets a read command and returns the bytes it would print.
    fn read_output(&self, command: &str) -> Vec<u8> {
        let (source, compressor) = match command.rsplit_once(" | ") {
            Some((source, last)) if last.ends_with(" -c") => {
                (source, last.strip_suffix(" -c"))
            }
            _ => (command, None),
        };

        let stages: Vec<&str> = match source
            .strip_prefix("{ ")
            .and_then(|s| s.strip_suffix("; }"))
        {
            Some(group) => group.split("; ").collect(),
            None => vec![source],
        };
        let mut offset = None;
        let mut payload = Vec::new();
        for stage in stages {
            let (start, bytes) = self.read_stage(stage.trim_end_matches(" 2>/dev/null"));
            offset.get_or_insert(start);
            payload.extend(bytes);
        }
        let offset = offset.unwrap_or(0);

        if let Some(at) = self.flip_byte_at {
            if at >= offset && at - offset < payload.len() {
                payload[at - offset] ^= 0xff;
            }
        }
        if let Some(n) = self.drop_after {
            payload.truncate(n);
        }

        let mut wire = match compressor {
            None => payload,
            Some("gzip") => {
                let mut enc = GzEncoder::new(Vec::new(), Compression::fast());
                enc.write_all(&payload).unwrap();
                enc.finish().unwrap()
            }
            Some("zstd") => zstd::encode_all(&payload[..], 1).unwrap(),
            Some("xz") => {
                let mut enc = xz2::write::XzEncoder::new(Vec::new(), 1);
                enc.write_all(&payload).unwrap();
                enc.finish().unwrap()
            }
            Some(other) => panic!("unexpected compressor {other}"),
        };
        if let Some(n) = self.cut_wire_after {
            wire.truncate(n);
        }
        wire
    }
}

impl CommandChannel for FakeDevice {
    fn run(&mut self, command: &str) -> Result<String> {
        self.commands.push(command.to_string());
        if let Some((trigger, running)) = &self.interrupt {
            if trigger == command {
                running.store(false, Ordering::SeqCst);
            }
        }
        Ok(self.answer(command))
    }

    fn stream<'a>(&'a mut self, command: &str) -> Result<Box<dyn CommandStream + 'a>> {
        self.commands.push(command.to_string());
        self.streamed.push(command.to_string());
        let wire = self.read_output(command);
        Ok(Box::new(ReaderStream::with_chunk_size(
            Cursor::new(wire),
            self.chunk_size,
        )))
    }
}
