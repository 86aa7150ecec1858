use std::io::{self, ErrorKind};
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use tracing::info;

use crate::error::{Error, Result};

pub mod config;
pub mod connection;
pub mod device;
pub mod download;
pub mod memory;
pub mod packets;
pub mod sequence;
pub mod teardown;
pub mod transport;
pub mod upload;

use config::Config;
use connection::{Link, TransferStats};
use download::ReceiveSession;
use packets::Command;
use transport::{CancelToken, Transport};
use upload::SendSession;

/// UDP port the robot listens on for both commands.
pub const DEVICE_PORT: u16 = 4000;

/// A UDP socket bound to one peer.
pub struct Protocol {
    socket: UdpSocket,
}

impl Protocol {
    /**
     * Resolve `host` and open a socket connected to its `port`
     */
    pub fn connect(host: &str, port: u16) -> Result<Protocol> {
        let resolution = |source| Error::HostResolution { host: host.to_string(), source };
        let addr = (host, port)
            .to_socket_addrs()
            .map_err(resolution)?
            .next()
            .ok_or_else(|| resolution(io::Error::new(ErrorKind::NotFound, "no address found")))?;

        let local = if addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(local).map_err(Error::SocketSetup)?;
        socket.connect(addr).map_err(Error::SocketSetup)?;
        info!(%addr, "socket ready");
        Ok(Protocol { socket })
    }

    /**
     * Bind the answering side on `addr`; the peer is learned from the first
     * datagram, see `wait_for_peer`
     */
    pub fn new(addr: &str) -> Result<Protocol> {
        let socket = UdpSocket::bind(addr).map_err(Error::SocketSetup)?;
        Ok(Protocol { socket })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /**
     * Block until a datagram arrives and connect the socket to its sender.
     * The datagram itself stays queued for the handshake.
     */
    pub fn wait_for_peer(&self, cancel: &CancelToken, poll: Duration) -> Result<SocketAddr> {
        let mut buf = [0u8; connection::RECV_BUFFER];
        self.socket.set_read_timeout(Some(poll)).map_err(Error::SocketSetup)?;
        let peer = loop {
            cancel.check()?;
            match self.socket.peek_from(&mut buf) {
                Ok((_, peer)) => break peer,
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => continue,
                Err(e) => return Err(e.into()),
            }
        };
        self.socket.connect(peer).map_err(Error::SocketSetup)?;
        info!(%peer, "peer connected");
        Ok(peer)
    }

    pub fn into_socket(self) -> UdpSocket {
        self.socket
    }
}

/**
 * Download the photo: handshake with the download command, reassemble the
 * image and close with the FIN burst
 */
pub fn run_download<T: Transport>(transport: T, config: Config, cancel: CancelToken) -> Result<(Vec<u8>, TransferStats)> {
    let mut link = Link::connect(transport, Command::Download, config, cancel)?;
    let image = ReceiveSession::new(&mut link).run()?;
    Ok((image, link.stats().clone()))
}

/**
 * Upload `firmware`: handshake with the upload command, send it through the
 * window and close with the confirmed FIN exchange
 */
pub fn run_upload<T: Transport>(
    transport: T,
    firmware: &[u8],
    config: Config,
    cancel: CancelToken,
) -> Result<TransferStats> {
    let mut link = Link::connect(transport, Command::Upload, config, cancel)?;
    SendSession::new(&mut link, firmware).run()?;
    Ok(link.stats().clone())
}
