//! Session close. The two directions close differently on purpose: the
//! sending side repeats its FIN until the peer answers with one, the
//! receiving side answers with a burst of FINs and leaves without waiting.

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::protocol::connection::state::SessionEvent;
use crate::protocol::connection::Link;
use crate::protocol::packets::Packet;
use crate::protocol::sequence::to_wire;
use crate::protocol::transport::Transport;

/**
 * Confirming close: FIN carrying the total length, resent on every timeout
 * until a FIN of the same connection comes back
 */
pub fn close<T: Transport>(link: &mut Link<T>, total: u64) -> Result<()> {
    let fin = Packet::new_fin(link.connection_id(), to_wire(total), 0);
    if let Err(e) = link.send(&fin) {
        warn!(error = %e, "sending FIN failed, will retry");
    }

    let timeout = link.config().fin_timeout;
    let max_retries = link.config().max_retries;
    let mut attempts = 0;
    loop {
        match link.recv(Some(timeout)) {
            Ok(Some(packet)) if packet.is_fin() => break,
            // late acks of the data phase
            Ok(Some(_)) => continue,
            Ok(None) => {
                link.stats_mut().timeouts += 1;
                debug!(attempts, "no FIN reply yet");
            }
            Err(Error::Io(e)) => warn!(error = %e, "receive failed while closing"),
            Err(e) => return Err(e),
        }
        attempts += 1;
        if attempts >= max_retries {
            return Err(Error::RetriesExhausted { phase: "closing", attempts });
        }
        if let Err(e) = link.send(&fin) {
            warn!(error = %e, "resending FIN failed");
        }
    }

    link.transition(SessionEvent::FinExchanged)
}

/**
 * Best-effort close: a fixed burst of FIN replies, no confirmation awaited
 */
pub fn answer_fin<T: Transport>(link: &mut Link<T>, ack: u64) -> Result<()> {
    let fin = Packet::new_fin(link.connection_id(), 0, to_wire(ack));
    let burst = link.config().fin_burst;
    for _ in 0..burst {
        link.send(&fin)?;
    }
    debug!(burst, "FIN burst sent");
    link.transition(SessionEvent::FinExchanged)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::protocol::config::Config;
    use crate::protocol::connection::state::SessionState;
    use crate::protocol::connection::RECV_BUFFER;
    use crate::protocol::memory::MemoryTransport;
    use crate::protocol::packets::Command;
    use crate::protocol::transport::CancelToken;

    fn closing_link(command: Command) -> (Link<MemoryTransport>, MemoryTransport) {
        let (client, mut device) = MemoryTransport::pair();
        device.send(&Packet::new_syn_reply(77, command).to_bytes()).unwrap();
        let config = Config::default()
            .with_timeout(Duration::from_millis(10))
            .with_poll_interval(Duration::from_millis(5))
            .with_max_retries(4);
        let mut link = Link::connect(client, command, config, CancelToken::new()).unwrap();
        link.transition(SessionEvent::DataFinished).unwrap();

        let mut buf = [0u8; RECV_BUFFER];
        device.recv(&mut buf, Some(Duration::from_secs(1))).unwrap();
        (link, device)
    }

    fn drain(device: &mut MemoryTransport) -> Vec<Packet> {
        let mut buf = [0u8; RECV_BUFFER];
        let mut packets = Vec::new();
        while let Some(amt) = device.recv(&mut buf, Some(Duration::from_millis(5))).unwrap() {
            packets.push(Packet::from_bytes(&buf[..amt]).unwrap());
        }
        packets
    }

    #[test]
    fn burst_sends_configured_number_of_fins() {
        let (mut link, mut device) = closing_link(Command::Download);
        answer_fin(&mut link, 70_000).unwrap();
        assert_eq!(link.state(), SessionState::Closed);

        let fins = drain(&mut device);
        assert_eq!(fins.len(), 20);
        assert!(fins.iter().all(|p| p.is_fin() && p.get_acked() == to_wire(70_000)));
    }

    #[test]
    fn confirming_close_waits_for_fin() {
        let (mut link, mut device) = closing_link(Command::Upload);
        device.send(&Packet::new_ack(77, 1000).to_bytes()).unwrap();
        device.send(&Packet::new_fin(77, 0, 1000).to_bytes()).unwrap();
        close(&mut link, 1000).unwrap();
        assert_eq!(link.state(), SessionState::Closed);

        let sent = drain(&mut device);
        assert!(sent[0].is_fin());
        assert_eq!(sent[0].get_sequence(), 1000);
    }

    #[test]
    fn confirming_close_resends_until_exhausted() {
        let (mut link, mut device) = closing_link(Command::Upload);
        let err = close(&mut link, 5).unwrap_err();
        assert!(matches!(err, Error::RetriesExhausted { phase: "closing", attempts: 4 }));
        assert_eq!(drain(&mut device).len(), 4);
    }
}
