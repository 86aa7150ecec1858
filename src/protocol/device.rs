//! Answering side of the protocol, emulating the robot: it serves the photo
//! for a download request and takes the firmware of an upload request.

use tracing::info;

use crate::error::Result;
use crate::protocol::config::Config;
use crate::protocol::connection::{Link, TransferStats};
use crate::protocol::download::ReceiveSession;
use crate::protocol::packets::Command;
use crate::protocol::transport::{CancelToken, Transport};
use crate::protocol::upload::SendSession;

#[derive(Debug)]
pub enum Served {
    Photo { bytes: usize },
    Firmware(Vec<u8>),
}

/**
 * Serve exactly one session on `transport`
 */
pub fn serve<T: Transport>(
    transport: T,
    photo: &[u8],
    config: Config,
    cancel: CancelToken,
) -> Result<(Served, TransferStats)> {
    let mut link = Link::accept(transport, config, cancel)?;
    let served = match link.command() {
        Command::Download => {
            SendSession::new(&mut link, photo).run()?;
            Served::Photo { bytes: photo.len() }
        }
        Command::Upload => Served::Firmware(ReceiveSession::new(&mut link).run()?),
    };
    info!(stats = ?link.stats(), "session served");
    Ok((served, link.stats().clone()))
}
