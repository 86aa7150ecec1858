use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use robot_link::io::{FileSink, OutputFile};
use robot_link::protocol::device::{serve, Served};
use robot_link::{CancelToken, Config, Protocol};

/// Robot emulator: serves one photo download or firmware upload session
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Address used to bind the emulator
    #[arg(short, long, default_value = "0.0.0.0:4000")]
    addr: String,

    /// Photo served to download requests
    #[arg(short, long)]
    photo: Option<PathBuf>,

    /// Where an uploaded firmware image is stored
    #[arg(short, long, default_value = "firmware.bin")]
    firmware_out: PathBuf,

    /// Log more (-v debug, -vv every packet)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let args: Args = Args::parse();
    let filter = match args.verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let photo = match &args.photo {
        Some(path) => fs::read(path).with_context(|| format!("cannot read photo {}", path.display()))?,
        None => Vec::new(),
    };

    let config = Config::default();
    let cancel = CancelToken::new();
    let protocol = Protocol::new(&args.addr)?;
    info!(addr = %protocol.local_addr()?, "waiting for a session");
    protocol.wait_for_peer(&cancel, config.poll_interval)?;

    let (served, stats) = serve(protocol.into_socket(), &photo, config, cancel)?;
    match served {
        Served::Photo { bytes } => info!(bytes, ?stats, "photo sent"),
        Served::Firmware(firmware) => {
            OutputFile::new(&args.firmware_out).write_all(&firmware)?;
            info!(bytes = firmware.len(), path = %args.firmware_out.display(), ?stats, "firmware stored");
        }
    }
    Ok(())
}
