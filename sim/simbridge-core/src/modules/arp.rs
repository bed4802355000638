//! Answers ARP requests the simulated hardware sends for the host side of
//! its TAP link, for hosts whose TAP driver does not answer them itself.
//!
//! Only IPv4 over Ethernet ARP is understood.
//!
//! <https://en.wikipedia.org/wiki/Address_Resolution_Protocol#Packet_structure>

use crate::framing::ETH_MIN_FRAME_LEN;
use std::net::Ipv4Addr;
use thiserror::Error as ThisError;

const ETHERTYPE_ARP: u16 = 0x0806;
const ETH_HEADER_LEN: usize = 14;

const HTYPE: u16 = 1;
const PTYPE: u16 = 0x0800;
const HLEN: u8 = 6;
const PLEN: u8 = 4;

pub type Mac = [u8; 6];

/// Represents a request or reply operation of an ARP packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    Request = 1,
    Reply = 2,
}

/// An IPv4 over Ethernet ARP packet.
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub struct ArpPacket {
    pub oper: Operation,
    pub sender_mac: Mac,
    pub sender_ip: Ipv4Addr,
    pub target_mac: Mac,
    pub target_ip: Ipv4Addr,
}

impl ArpPacket {
    /// The size of an ARP packet in bytes (28).
    pub const SIZE: usize = 28;

    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.extend_from_slice(&HTYPE.to_be_bytes());
        out.extend_from_slice(&PTYPE.to_be_bytes());
        out.push(HLEN);
        out.push(PLEN);
        out.extend_from_slice(&(self.oper as u16).to_be_bytes());
        out.extend_from_slice(&self.sender_mac);
        out.extend_from_slice(&self.sender_ip.octets());
        out.extend_from_slice(&self.target_mac);
        out.extend_from_slice(&self.target_ip.octets());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        if bytes.len() < Self::SIZE {
            Err(ParseError::HeaderTooShort)?
        }
        let htype = u16::from_be_bytes([bytes[0], bytes[1]]);
        let ptype = u16::from_be_bytes([bytes[2], bytes[3]]);
        if htype != HTYPE || ptype != PTYPE || bytes[4] != HLEN || bytes[5] != PLEN {
            Err(ParseError::UnsupportedAddresses)?
        }
        let oper = match u16::from_be_bytes([bytes[6], bytes[7]]) {
            1 => Operation::Request,
            2 => Operation::Reply,
            _ => Err(ParseError::InvalidOperation)?,
        };
        Ok(Self {
            oper,
            sender_mac: mac(&bytes[8..14]),
            sender_ip: ip(&bytes[14..18]),
            target_mac: mac(&bytes[18..24]),
            target_ip: ip(&bytes[24..28]),
        })
    }
}

#[derive(Debug, ThisError, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    #[error("The frame is too short to hold an ARP header")]
    HeaderTooShort,
    #[error("Not an ARP frame")]
    NotArp,
    #[error("Only IPv4 over Ethernet ARP is supported")]
    UnsupportedAddresses,
    #[error("Invalid operation: should be 1 for request, 2 for reply")]
    InvalidOperation,
}

/// Builds the reply to `frame` if it is an ARP request asking for `ip`.
///
/// The reply claims `ip` for `mac` and is padded to the minimum Ethernet
/// frame size.
pub fn reply_to(frame: &[u8], ip: Ipv4Addr, mac: Mac) -> Option<Vec<u8>> {
    let request = match parse_frame(frame) {
        Ok(request) => request,
        Err(e) => {
            tracing::trace!("Not answering frame: {}", e);
            return None;
        }
    };
    if request.oper != Operation::Request || request.target_ip != ip {
        return None;
    }

    let mut reply = Vec::with_capacity(ETH_MIN_FRAME_LEN);
    reply.extend_from_slice(&request.sender_mac);
    reply.extend_from_slice(&mac);
    reply.extend_from_slice(&ETHERTYPE_ARP.to_be_bytes());
    let packet = ArpPacket {
        oper: Operation::Reply,
        sender_mac: mac,
        sender_ip: ip,
        target_mac: request.sender_mac,
        target_ip: request.sender_ip,
    };
    reply.extend(packet.build());
    reply.resize(ETH_MIN_FRAME_LEN, 0);
    Some(reply)
}

fn parse_frame(frame: &[u8]) -> Result<ArpPacket, ParseError> {
    if frame.len() < ETH_HEADER_LEN + ArpPacket::SIZE {
        Err(ParseError::HeaderTooShort)?
    }
    if u16::from_be_bytes([frame[12], frame[13]]) != ETHERTYPE_ARP {
        Err(ParseError::NotArp)?
    }
    ArpPacket::from_bytes(&frame[ETH_HEADER_LEN..])
}

fn mac(bytes: &[u8]) -> Mac {
    let mut mac = [0; 6];
    mac.copy_from_slice(bytes);
    mac
}

fn ip(bytes: &[u8]) -> Ipv4Addr {
    Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3])
}
