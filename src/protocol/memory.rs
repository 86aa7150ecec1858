//! In-process datagram transport with optional loss, for exercising the
//! sessions without sockets.

use std::io::{self, ErrorKind};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

use tracing::trace;

use super::transport::Transport;

/// One end of an in-memory datagram pipe.
pub struct MemoryTransport {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
}

impl MemoryTransport {
    /**
     * Create two connected endpoints
     */
    pub fn pair() -> (MemoryTransport, MemoryTransport) {
        let (tx_a, rx_b) = channel();
        let (tx_b, rx_a) = channel();
        (
            MemoryTransport { tx: tx_a, rx: rx_a },
            MemoryTransport { tx: tx_b, rx: rx_b },
        )
    }
}

impl Transport for MemoryTransport {
    fn send(&mut self, datagram: &[u8]) -> io::Result<()> {
        // like UDP, sending towards a peer that is gone is not an error
        let _ = self.tx.send(datagram.to_vec());
        Ok(())
    }

    fn recv(&mut self, buf: &mut [u8], timeout: Option<Duration>) -> io::Result<Option<usize>> {
        let datagram = match timeout {
            Some(timeout) => match self.rx.recv_timeout(timeout) {
                Ok(datagram) => datagram,
                Err(RecvTimeoutError::Timeout) => return Ok(None),
                Err(RecvTimeoutError::Disconnected) => return Err(peer_gone()),
            },
            None => self.rx.recv().map_err(|_| peer_gone())?,
        };
        // truncated like an undersized UDP receive buffer
        let amt = datagram.len().min(buf.len());
        buf[..amt].copy_from_slice(&datagram[..amt]);
        Ok(Some(amt))
    }
}

fn peer_gone() -> io::Error {
    io::Error::new(ErrorKind::ConnectionAborted, "peer endpoint dropped")
}

/// Drops every `n`-th outgoing datagram of the wrapped transport.
pub struct DropEveryNth<T> {
    inner: T,
    every: usize,
    sent: usize,
    dropped: usize,
}

impl<T: Transport> DropEveryNth<T> {
    pub fn new(inner: T, every: usize) -> DropEveryNth<T> {
        DropEveryNth { inner, every: every.max(1), sent: 0, dropped: 0 }
    }

    pub fn dropped(&self) -> usize {
        self.dropped
    }
}

impl<T: Transport> Transport for DropEveryNth<T> {
    fn send(&mut self, datagram: &[u8]) -> io::Result<()> {
        self.sent += 1;
        if self.sent % self.every == 0 {
            self.dropped += 1;
            trace!(n = self.sent, "datagram dropped");
            return Ok(());
        }
        self.inner.send(datagram)
    }

    fn recv(&mut self, buf: &mut [u8], timeout: Option<Duration>) -> io::Result<Option<usize>> {
        self.inner.recv(buf, timeout)
    }
}
