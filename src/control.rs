/*!
    wire contract of the addressing protocol

    an addressing packet is a regular bus packet whose header carries the [Header::addressing]
    bit and whose payload starts with a control block: one opcode byte, the 4 byte big-endian
    random id claimed by the device, and for some opcodes a trailing address byte.
*/

use bilge::prelude::*;
use packbytes::{FromBytes, ToBytes};

use crate::{pack_bilge, pack_enum};


/// maximum payload of a single bus packet
pub const MAX_PAYLOAD: usize = 50;

/// address reaching every device, never assignable
pub const BROADCAST: u8 = 0;
/// address of the master itself
pub const MASTER_ADDRESS: u8 = 254;
/// address of a device that has none yet
pub const NOT_ASSIGNED: u8 = 255;

/// identifier of a logical bus segment, distinct from the single byte device address
pub type BusId = [u8; 4];
/// bus id of a bus not shared with other segments
pub const LOCAL_BUS: BusId = [0; 4];


/// packet header flags
#[bitsize(8)]
#[derive(Copy, Clone, FromBits, DebugBits, PartialEq, Default)]
pub struct Header {
    /// packet crosses bus segments, bus ids are included in the frame
    pub shared: bool,
    /// sender address and bus id are included in the frame
    pub sender_info: bool,
    /// receiver must acknowledge reception
    pub ack_request: bool,
    /// acknowledgement travels as a separate packet
    pub ack_mode: bool,
    /// frame carries a port number
    pub port: bool,
    /// payload is protected by a 32bit checksum instead of 8bit
    pub crc32: bool,
    /// frame length is encoded on two bytes
    pub extended_length: bool,
    /// payload starts with an addressing control block
    pub addressing: bool,
}
pack_bilge!(Header);

/// opcode starting an addressing control block
#[bitsize(8)]
#[derive(Copy, Clone, FromBits, Debug, PartialEq)]
pub enum Opcode {
    #[fallback]
    Unknown = 255,

    /// device asks for an address, the master answers with the same opcode carrying the grant
    Request = 200,
    /// device accepts the address it was granted
    Confirm = 201,
    /// master asks already addressed devices to announce themselves again
    Refresh = 204,
    /// either side aborts an address claim
    Negate = 203,
    /// broadcast by the master at startup to trigger refresh announcements
    List = 202,
}
pack_enum!(Opcode);


/// control block granting an address, broadcast repeatedly until the device confirms
#[derive(Copy, Clone, FromBytes, ToBytes, Debug, PartialEq)]
pub struct Grant {
    /// always [Opcode::Request]
    pub opcode: Opcode,
    /// random id the grant answers to, only the matching device interprets it
    pub rid: u32,
    /// address assigned to that device
    pub address: u8,
}

/// control block rejecting an address claim, the device must pick a new random id
#[derive(Copy, Clone, FromBytes, ToBytes, Debug, PartialEq)]
pub struct Negate {
    /// always [Opcode::Negate]
    pub opcode: Opcode,
    /// random id of the rejected claim
    pub rid: u32,
}

impl Grant {
    pub fn new(rid: u32, address: u8) -> Self {
        Self {opcode: Opcode::Request, rid, address}
    }
}
impl Negate {
    pub fn new(rid: u32) -> Self {
        Self {opcode: Opcode::Negate, rid}
    }
}


/// control block found at the start of an address-tagged payload
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ControlBlock {
    pub opcode: Opcode,
    /// random id claimed by the device
    pub rid: u32,
    /// trailing address byte, present for confirm/refresh/negate
    pub address: Option<u8>,
}
impl ControlBlock {
    /// size of a block without the trailing address byte
    pub const SHORT: usize = 5;
    /// size of a block with the trailing address byte
    pub const LONG: usize = 6;

    /// decode the control block starting the given payload, or nothing if the payload
    /// cannot hold an opcode and a random id
    pub fn decode(payload: &[u8]) -> Option<Self> {
        if payload.len() < Self::SHORT
            {return None}
        Some(Self {
            opcode: Opcode::from_be_bytes([payload[0]]),
            rid: u32::from_be_bytes(payload[1 .. Self::SHORT].try_into().unwrap()),
            address: payload.get(Self::LONG - 1).copied(),
        })
    }
}
