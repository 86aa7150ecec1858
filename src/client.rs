use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use tracing::info;
use tracing_subscriber::EnvFilter;

use robot_link::io::{FileSink, FileSource, FirmwareFile, OutputFile};
use robot_link::{run_download, run_upload, CancelToken, Config, Protocol, DEVICE_PORT};

/// Download the robot's photo, or upload new firmware to it
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Host name or address of the robot
    hostname: Option<String>,

    /// Firmware image to upload; without it the photo is downloaded
    firmware: Option<PathBuf>,

    /// UDP port of the robot
    #[arg(short, long, default_value_t = DEVICE_PORT)]
    port: u16,

    /// Where the downloaded photo is written
    #[arg(short, long, default_value = "photo.png")]
    output: PathBuf,

    /// Handshake, ack and FIN timeout in milliseconds
    #[arg(long, default_value_t = 100)]
    timeout_ms: u64,

    /// Consecutive timeouts tolerated before giving up
    #[arg(long, default_value_t = 50)]
    max_retries: u32,

    /// Log more (-v debug, -vv every packet)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let Some(hostname) = args.hostname.as_deref() else {
        Args::command().print_help()?;
        return Ok(());
    };

    let config = Config::default()
        .with_timeout(Duration::from_millis(args.timeout_ms))
        .with_max_retries(args.max_retries);
    let cancel = CancelToken::new();

    match &args.firmware {
        None => {
            let protocol = Protocol::connect(hostname, args.port)?;
            let (image, stats) =
                run_download(protocol.into_socket(), config, cancel).context("photo download failed")?;
            OutputFile::new(&args.output)
                .write_all(&image)
                .with_context(|| format!("cannot write {}", args.output.display()))?;
            info!(bytes = image.len(), ?stats, "photo downloaded");
        }
        Some(path) => {
            let firmware = FirmwareFile::new(path).read_all()?;
            let protocol = Protocol::connect(hostname, args.port)?;
            let stats =
                run_upload(protocol.into_socket(), &firmware, config, cancel).context("firmware upload failed")?;
            info!(bytes = firmware.len(), ?stats, "firmware uploaded");
        }
    }
    Ok(())
}

fn init_logging(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
