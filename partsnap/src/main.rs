mod logging;

use anyhow::{Context, Result, anyhow};
use clap::{ArgAction, Parser};
use console::style;
use dialoguer::{Select, theme::ColorfulTheme};
use indicatif::{ProgressBar, ProgressStyle};
use partsnap_core::adb::{AdbServer, DEFAULT_HOST, DEFAULT_PORT};
use partsnap_core::device::Device;
use partsnap_core::{BackupOptions, BackupOutcome, BackupSession, Error, PartitionRef};
use std::io::{IsTerminal, stdout};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Parser)]
#[command(name = "partsnap")]
#[command(about = "Resumable, verified backups of device partitions over adb", version)]
struct Cli {
    /// adb server host
    #[arg(short = 'H', long, env = "ADB_SERVER_HOST", default_value = DEFAULT_HOST)]
    adb_host: String,

    /// adb server port
    #[arg(short = 'P', long, env = "ADB_SERVER_PORT", default_value_t = DEFAULT_PORT)]
    adb_port: u16,

    /// List connected devices and exit
    #[arg(short = 'l', long)]
    list_devices: bool,

    /// List the partitions of the selected device
    #[arg(short = 'i', long)]
    list_partitions: bool,

    /// Serial of the device to back up (defaults to the only/first one)
    #[arg(short = 'd', long)]
    device: Option<String>,

    /// Partition to back up (repeatable)
    #[arg(short = 't', long = "partition")]
    partitions: Vec<String>,

    /// Back up every partition
    #[arg(short = 'a', long, conflicts_with = "partitions")]
    all: bool,

    /// Output directory
    #[arg(short = 'o', long, default_value = ".")]
    out: PathBuf,

    /// Skip checksum verification after the transfer
    #[arg(long)]
    no_verify: bool,

    /// Always start from scratch instead of continuing interrupted backups
    #[arg(long)]
    no_continue: bool,

    /// Re-check existing images against the device instead of skipping them
    #[arg(long)]
    no_skip_existing: bool,

    /// Transfer uncompressed even if the device has a compressor
    #[arg(long)]
    no_compression: bool,

    /// Increase log verbosity (-v, -vv)
    #[arg(short = 'v', long, action = ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn backup_options(&self) -> BackupOptions {
        BackupOptions {
            verify: !self.no_verify,
            resume: !self.no_continue,
            skip_existing: !self.no_skip_existing,
            compression: !self.no_compression,
        }
    }
}

/// Picks the device to work with, asking the user when the choice is ambiguous.
fn select_device(devices: &[Device], serial: Option<&str>) -> Result<Device> {
    if let Some(serial) = serial {
        return devices
            .iter()
            .find(|d| d.serial == serial)
            .cloned()
            .ok_or_else(|| anyhow!("Device '{}' not found.", serial));
    }

    let online: Vec<&Device> = devices.iter().filter(|d| d.is_online()).collect();
    match online.as_slice() {
        [] => Err(anyhow!(
            "No device is ready: {}",
            devices.iter().map(|d| d.to_string()).collect::<Vec<_>>().join(", ")
        )),
        [only] => Ok((*only).clone()),
        [first, ..] if !stdout().is_terminal() => Ok((*first).clone()),
        many => {
            let items: Vec<String> = many.iter().map(|d| d.to_string()).collect();
            let selection = Select::with_theme(&ColorfulTheme::default())
                .with_prompt("Select the device to back up")
                .items(&items)
                .default(0)
                .interact()?;
            Ok(many[selection].clone())
        }
    }
}

fn print_devices(devices: &[Device]) {
    println!("Connected devices:");
    println!("\n  {:<24} {}", "SERIAL", "STATE");
    println!("  {:-<24} {:-<14}", "", "");
    for device in devices {
        println!("  {:<24} {}", device.serial, device.state);
    }
}

fn progress_bar(name: &str) -> ProgressBar {
    let pb = ProgressBar::new(0);
    pb.set_prefix(name.to_string());
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{prefix:12} [{elapsed_precise}] [{bar:40.green/black}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})",
            )
            .expect("valid progress template")
            .progress_chars("■ "),
    );
    pb
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    // Cleared by Ctrl+C; the core checks it between chunks and hash buffers.
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    let server = AdbServer::new(cli.adb_host.clone(), cli.adb_port);
    let devices = server.devices().with_context(|| {
        format!("Could not reach the adb server at {}:{}", server.host, server.port)
    })?;

    if devices.is_empty() {
        println!("No devices found");
        return Ok(());
    }

    if cli.list_devices {
        print_devices(&devices);
        return Ok(());
    }

    let device = select_device(&devices, cli.device.as_deref())?;
    let mut session =
        BackupSession::new(server.device(&device.serial)).with_cancel_flag(running.clone());

    if cli.list_partitions {
        let partitions = session.list_partitions()?;
        println!("{} partitions on {}:", partitions.len(), style(&device.serial).cyan());
        println!("\n  {:<20} {:<32} {:>10}", "NAME", "PATH", "SIZE");
        println!("  {:-<20} {:-<32} {:-<10}", "", "", "");
        for partition in &partitions {
            println!("  {partition}");
        }
        println!();
    }

    let targets: Vec<PartitionRef> = if cli.all {
        session.list_partitions()?.into_iter().map(PartitionRef::from).collect()
    } else {
        cli.partitions.iter().map(|name| PartitionRef::from(name.as_str())).collect()
    };

    if targets.is_empty() {
        if cli.all {
            println!("No partitions found");
        } else if !cli.list_partitions {
            println!("Nothing to do. Select partitions with --partition or --all.");
        }
        return Ok(());
    }

    let options = cli.backup_options();
    for target in targets {
        if !running.load(Ordering::SeqCst) {
            println!("Interrupted; remaining partitions were not backed up.");
            return Err(Error::Cancelled.into());
        }

        let name = match &target {
            PartitionRef::Name(name) => name.clone(),
            PartitionRef::Resolved(p) => p.name.clone(),
        };
        let pb = progress_bar(&name);

        let result = session.backup(target, &cli.out, &options, |bytes, partition| {
            if pb.length() != Some(partition.size) {
                pb.set_length(partition.size);
            }
            pb.set_position(bytes);
        });

        match result {
            Ok(BackupOutcome::Skipped) => {
                pb.finish_and_clear();
                println!("⏭  {} already backed up, skipped.", style(&name).cyan());
            }
            Ok(BackupOutcome::Verified) => {
                pb.finish_and_clear();
                println!("✔  {} image still matches the device.", style(&name).cyan());
            }
            Ok(BackupOutcome::Completed { bytes, resumed_from }) => {
                pb.finish_with_message("Backup complete.");
                let resumed = if resumed_from > 0 {
                    format!(" (resumed at {resumed_from} bytes)")
                } else {
                    String::new()
                };
                println!(
                    "✨ Backed up {} ({} bytes) to {}{}.",
                    style(&name).cyan(),
                    bytes,
                    style(cli.out.join(format!("{name}.img")).display()).cyan(),
                    resumed
                );
            }
            Err(Error::Cancelled) => {
                pb.abandon_with_message("Interrupted.");
                println!("Backup of {} interrupted; run again to resume.", style(&name).cyan());
                return Err(Error::Cancelled.into());
            }
            Err(e) => {
                pb.abandon_with_message("❌ Operation failed.");
                return Err(e).with_context(|| format!("Backup of partition {name} failed"));
            }
        }
    }

    println!("All done!");
    Ok(())
}
