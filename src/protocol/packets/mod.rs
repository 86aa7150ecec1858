use std::fmt;

use crate::error::{Error, Result};

pub mod hex;

use hex::Hex;

/// connection id (4) + seq (2) + ack (2) + flags (1)
pub const HEADER_LEN: usize = 9;

/// Value of the flags byte. The flags are never combined on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flag {
    Data,
    Rst,
    Fin,
    Syn,
    /// Anything else the peer puts in byte 8; kept so it can be logged.
    Other(u8),
}

impl From<u8> for Flag {
    fn from(byte: u8) -> Flag {
        match byte {
            0 => Flag::Data,
            1 => Flag::Rst,
            2 => Flag::Fin,
            4 => Flag::Syn,
            other => Flag::Other(other),
        }
    }
}

impl From<Flag> for u8 {
    fn from(flag: Flag) -> u8 {
        match flag {
            Flag::Data => 0,
            Flag::Rst => 1,
            Flag::Fin => 2,
            Flag::Syn => 4,
            Flag::Other(byte) => byte,
        }
    }
}

/// Command byte carried by the initial SYN; selects the operating mode on
/// the device's single listening port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Download,
    Upload,
}

impl Command {
    pub fn from_byte(byte: u8) -> Option<Command> {
        match byte {
            0x01 => Some(Command::Download),
            0x02 => Some(Command::Upload),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            Command::Download => 0x01,
            Command::Upload => 0x02,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    connection_id: u32,
    sequence: u16,
    acked: u16,
    flag: Flag,
    content: Vec<u8>,
}

impl Packet {
    pub fn new(connection_id: u32, sequence: u16, acked: u16, flag: Flag, content: Vec<u8>) -> Packet {
        Packet { connection_id, sequence, acked, flag, content }
    }

    /**
     * Opening SYN of the initiator, before any connection id is known
     */
    pub fn new_syn(command: Command) -> Packet {
        Packet::new(0, 0, 0, Flag::Syn, vec![command.as_byte()])
    }

    /**
     * Answer of the responder, carrying the connection id it assigned
     */
    pub fn new_syn_reply(connection_id: u32, command: Command) -> Packet {
        Packet::new(connection_id, 0, 0, Flag::Syn, vec![command.as_byte()])
    }

    pub fn new_data(connection_id: u32, sequence: u16, content: Vec<u8>) -> Packet {
        Packet::new(connection_id, sequence, 0, Flag::Data, content)
    }

    pub fn new_ack(connection_id: u32, acked: u16) -> Packet {
        Packet::new(connection_id, 0, acked, Flag::Data, Vec::new())
    }

    pub fn new_fin(connection_id: u32, sequence: u16, acked: u16) -> Packet {
        Packet::new(connection_id, sequence, acked, Flag::Fin, Vec::new())
    }

    pub fn get_connection_id(&self) -> u32 {
        self.connection_id
    }

    pub fn get_sequence(&self) -> u16 {
        self.sequence
    }

    pub fn get_acked(&self) -> u16 {
        self.acked
    }

    pub fn get_flag(&self) -> Flag {
        self.flag
    }

    pub fn get_content(&self) -> &[u8] {
        &self.content
    }

    pub fn into_content(self) -> Vec<u8> {
        self.content
    }

    pub fn get_size(&self) -> usize {
        self.content.len()
    }

    pub fn is_syn(&self) -> bool {
        self.flag == Flag::Syn
    }

    pub fn is_fin(&self) -> bool {
        self.flag == Flag::Fin
    }

    pub fn is_reset(&self) -> bool {
        self.flag == Flag::Rst
    }

    /// Command carried by a SYN, if any.
    pub fn command(&self) -> Option<Command> {
        match (self.flag, self.content.first()) {
            (Flag::Syn, Some(&byte)) => Command::from_byte(byte),
            _ => None,
        }
    }

    /**
     * Wire layout, all integers big-endian:
     * 0-3 connection id, 4-5 sequence, 6-7 ack, 8 flags, 9.. payload
     */
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut vec: Vec<u8> = Vec::with_capacity(HEADER_LEN + self.content.len());
        vec.extend_from_slice(&self.connection_id.to_be_bytes());
        vec.extend_from_slice(&self.sequence.to_be_bytes());
        vec.extend_from_slice(&self.acked.to_be_bytes());
        vec.push(self.flag.into());
        vec.extend_from_slice(&self.content);
        vec
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Packet> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::MalformedPacket { len: bytes.len() });
        }
        let connection_id = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let sequence = u16::from_be_bytes([bytes[4], bytes[5]]);
        let acked = u16::from_be_bytes([bytes[6], bytes[7]]);
        let flag = Flag::from(bytes[8]);
        let content = bytes[HEADER_LEN..].to_vec();
        Ok(Packet { connection_id, sequence, acked, flag, content })
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "conn={:08x} seq={} ack={} flag={:?} len={} data={}",
            self.connection_id,
            self.sequence,
            self.acked,
            self.flag,
            self.content.len(),
            Hex(&self.content)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syn_is_ten_bytes_with_command() {
        let bytes = Packet::new_syn(Command::Upload).to_bytes();
        assert_eq!(bytes, vec![0, 0, 0, 0, 0, 0, 0, 0, 4, 0x02]);
    }

    #[test]
    fn ack_and_fin_are_header_only() {
        assert_eq!(Packet::new_ack(7, 510).to_bytes().len(), HEADER_LEN);
        assert_eq!(Packet::new_fin(7, 1000, 0).to_bytes().len(), HEADER_LEN);
    }

    #[test]
    fn header_fields_are_big_endian() {
        let packet = Packet::new(0x0102_0304, 0x0506, 0x0708, Flag::Fin, vec![0xaa]);
        assert_eq!(
            packet.to_bytes(),
            vec![0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 2, 0xaa]
        );
    }

    #[test]
    fn data_segment_decodes() {
        let payload: Vec<u8> = (0..=254).collect();
        let bytes = Packet::new_data(0xdead_beef, 65280, payload.clone()).to_bytes();
        assert_eq!(bytes.len(), HEADER_LEN + 255);

        let packet = Packet::from_bytes(&bytes).unwrap();
        assert_eq!(packet.get_connection_id(), 0xdead_beef);
        assert_eq!(packet.get_sequence(), 65280);
        assert_eq!(packet.get_acked(), 0);
        assert_eq!(packet.get_flag(), Flag::Data);
        assert_eq!(packet.get_content(), &payload[..]);
    }

    #[test]
    fn short_datagram_is_malformed() {
        let err = Packet::from_bytes(&[0u8; 8]).unwrap_err();
        assert!(matches!(err, Error::MalformedPacket { len: 8 }));
        assert!(Packet::from_bytes(&[]).is_err());
    }

    #[test]
    fn unknown_flag_is_preserved() {
        let mut bytes = Packet::new_ack(1, 2).to_bytes();
        bytes[8] = 0x40;
        let packet = Packet::from_bytes(&bytes).unwrap();
        assert_eq!(packet.get_flag(), Flag::Other(0x40));
        assert!(!packet.is_syn() && !packet.is_fin() && !packet.is_reset());
        assert_eq!(packet.to_bytes()[8], 0x40);
    }

    #[test]
    fn command_only_read_from_syn() {
        assert_eq!(Packet::new_syn(Command::Download).command(), Some(Command::Download));
        assert_eq!(Packet::new_data(1, 0, vec![0x01]).command(), None);
        assert_eq!(Packet::new(0, 0, 0, Flag::Syn, vec![0x09]).command(), None);
    }

    #[test]
    fn display_includes_hex_payload() {
        let line = Packet::new_data(0x10, 255, vec![0xab, 0x01]).to_string();
        assert!(line.contains("conn=00000010"));
        assert!(line.contains("seq=255"));
        assert!(line.ends_with("data=AB01"));
    }
}
