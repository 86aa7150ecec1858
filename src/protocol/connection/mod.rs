use std::time::{Duration, Instant};

use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::protocol::config::Config;
use crate::protocol::packets::{Command, Flag, Packet};
use crate::protocol::transport::{CancelToken, Transport};

pub mod state;

use state::{SessionEvent, SessionState};

/// Receive buffer; anything larger than a header plus one segment is noise.
pub const RECV_BUFFER: usize = 2560;

/// Counters kept for the whole lifetime of a session.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TransferStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    /// Data segments sent again, for any reason.
    pub retransmissions: u64,
    pub fast_retransmits: u64,
    pub timeouts: u64,
    pub duplicate_acks: u64,
    /// Packets of a foreign or stale connection.
    pub dropped: u64,
}

/// Datagram I/O with packet logging, cancellation and deadline handling.
struct Wire<T> {
    transport: T,
    config: Config,
    cancel: CancelToken,
    stats: TransferStats,
    buf: Vec<u8>,
}

impl<T: Transport> Wire<T> {
    fn new(transport: T, config: Config, cancel: CancelToken) -> Wire<T> {
        Wire {
            transport,
            config,
            cancel,
            stats: TransferStats::default(),
            buf: vec![0; RECV_BUFFER],
        }
    }

    fn send(&mut self, packet: &Packet) -> Result<()> {
        trace!(%packet, "SEND");
        self.transport.send(&packet.to_bytes())?;
        self.stats.packets_sent += 1;
        Ok(())
    }

    /**
     * Next decodable packet, or None once `timeout` elapsed.
     * Waits are cut into poll slices so a cancellation is noticed.
     */
    fn recv(&mut self, timeout: Option<Duration>) -> Result<Option<Packet>> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            self.cancel.check()?;
            let slice = match deadline {
                Some(deadline) => {
                    let left = deadline.saturating_duration_since(Instant::now());
                    if left.is_zero() {
                        return Ok(None);
                    }
                    left.min(self.config.poll_interval)
                }
                None => self.config.poll_interval,
            };
            let Some(amt) = self.transport.recv(&mut self.buf, Some(slice))? else {
                continue;
            };
            match Packet::from_bytes(&self.buf[..amt]) {
                Ok(packet) => {
                    self.stats.packets_received += 1;
                    trace!(%packet, "RCVD");
                    return Ok(Some(packet));
                }
                Err(e) => warn!(error = %e, "skipping datagram"),
            }
        }
    }
}

/// An established session with the peer.
pub struct Link<T> {
    wire: Wire<T>,
    connection_id: u32,
    command: Command,
    state: SessionState,
    // responder only: answer to a SYN the initiator repeats
    syn_reply: Option<Packet>,
}

impl<T: Transport> Link<T> {
    /**
     * Initiator side of the handshake: send SYN with the command byte and
     * resend it on every timeout until a SYN comes back
     */
    pub fn connect(transport: T, command: Command, config: Config, cancel: CancelToken) -> Result<Link<T>> {
        let mut wire = Wire::new(transport, config, cancel);
        let syn = Packet::new_syn(command);
        if let Err(e) = wire.send(&syn) {
            warn!(error = %e, "sending SYN failed, will retry");
        }

        let mut attempts = 0;
        let connection_id = loop {
            match wire.recv(Some(wire.config.handshake_timeout)) {
                Ok(Some(packet)) if packet.is_syn() => break packet.get_connection_id(),
                Ok(Some(packet)) => {
                    trace!(flag = ?packet.get_flag(), "not a SYN, ignored during handshake");
                    continue;
                }
                Ok(None) => {
                    wire.stats.timeouts += 1;
                    debug!(attempts, "no SYN reply yet");
                }
                Err(Error::Io(e)) => warn!(error = %e, "receive failed during handshake"),
                Err(e) => return Err(e),
            }
            attempts += 1;
            if attempts >= wire.config.max_retries {
                return Err(Error::RetriesExhausted { phase: "handshake", attempts });
            }
            if let Err(e) = wire.send(&syn) {
                warn!(error = %e, "resending SYN failed");
            }
        };

        let mut link = Link {
            wire,
            connection_id,
            command,
            state: SessionState::Init,
            syn_reply: None,
        };
        link.transition(SessionEvent::SynAccepted)?;
        info!(connection_id = format_args!("{connection_id:08x}"), ?command, "connection established");
        Ok(link)
    }

    /**
     * Responder side: wait for a SYN carrying a known command and answer it
     * with a freshly assigned connection id
     */
    pub fn accept(transport: T, config: Config, cancel: CancelToken) -> Result<Link<T>> {
        let mut wire = Wire::new(transport, config, cancel);
        let command = loop {
            let Some(packet) = wire.recv(None)? else {
                continue;
            };
            match packet.command() {
                Some(command) => break command,
                None => debug!(flag = ?packet.get_flag(), "waiting for a SYN with a known command"),
            }
        };

        let connection_id = loop {
            let id: u32 = rand::random();
            if id != 0 {
                break id;
            }
        };
        let reply = Packet::new_syn_reply(connection_id, command);
        wire.send(&reply)?;

        let mut link = Link {
            wire,
            connection_id,
            command,
            state: SessionState::Init,
            syn_reply: Some(reply),
        };
        link.transition(SessionEvent::SynAccepted)?;
        info!(connection_id = format_args!("{connection_id:08x}"), ?command, "connection accepted");
        Ok(link)
    }

    pub fn connection_id(&self) -> u32 {
        self.connection_id
    }

    pub fn command(&self) -> Command {
        self.command
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &Config {
        &self.wire.config
    }

    pub fn stats(&self) -> &TransferStats {
        &self.wire.stats
    }

    pub(crate) fn stats_mut(&mut self) -> &mut TransferStats {
        &mut self.wire.stats
    }

    pub(crate) fn transition(&mut self, event: SessionEvent) -> Result<()> {
        self.state = self.state.next(event)?;
        Ok(())
    }

    pub fn send(&mut self, packet: &Packet) -> Result<()> {
        self.wire.send(packet)
    }

    /**
     * Next data or FIN packet of this session, None once `timeout` elapsed.
     * Packets of other connections are dropped without a trace beyond the log.
     */
    pub fn recv(&mut self, timeout: Option<Duration>) -> Result<Option<Packet>> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let left = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            let Some(packet) = self.wire.recv(left)? else {
                return Ok(None);
            };

            if packet.is_syn() && packet.get_connection_id() == 0 {
                if let Some(reply) = &self.syn_reply {
                    debug!("initiator repeated its SYN, answering again");
                    self.wire.send(reply)?;
                }
                continue;
            }
            if packet.get_connection_id() != self.connection_id {
                self.wire.stats.dropped += 1;
                trace!(
                    expected = self.connection_id,
                    got = packet.get_connection_id(),
                    "foreign connection id, dropped"
                );
                continue;
            }
            match packet.get_flag() {
                Flag::Data | Flag::Fin => return Ok(Some(packet)),
                // recognised but deliberately without effect
                Flag::Rst => warn!("RST received, ignored"),
                Flag::Syn => trace!("duplicate SYN reply ignored"),
                Flag::Other(flag) => warn!(flag, "unknown flag, packet ignored"),
            }
        }
    }
}
