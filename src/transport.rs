/*!
    abstract contract of the transport below the addressing master

    the transport owns framing, checksums, acknowledgements, retransmission of raw
    packets and the physical medium. the master only needs to send a packet once,
    register/cancel a repeating transmission, poll for one decoded packet, and read a
    monotonic clock.
*/

use thiserror::Error;

use crate::control::{BusId, Header};


/// non fatal error condition, reported by the transport or the master
#[derive(Error, Copy, Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// transport gave up retransmitting to a device, its slot must be freed
    #[error("device {0} stopped acknowledging")]
    ConnectionLost(u8),
    /// an address request could not be serviced, the device will retry on its own timeout
    #[error("device table full, {0} addresses assignable")]
    DevicesFull(u8),
    /// the transport's outgoing packet queue is full
    #[error("outgoing packet queue is full")]
    PacketsFull,
    /// a payload does not fit in one packet
    #[error("payload of {0} bytes is too long for one packet")]
    ContentTooLong(u8),
    /// no packet completed within the requested duration
    #[error("no packet arrived in expected time")]
    Timeout,
    /// any other transport condition, forwarded opaque
    #[error("transport error {code:#x}, context {context:#x}")]
    Transport {code: u8, context: u8},
}

/// metadata decoded from a packet header
#[derive(Copy, Clone, Debug)]
pub struct PacketInfo {
    /// header flags of the packet
    pub header: Header,
    /// address of the sender, [crate::control::NOT_ASSIGNED] for a device still joining
    pub sender: u8,
    /// bus segment of the sender
    pub sender_bus: BusId,
}

/**
    one decoded frame handed over by the transport

    `offset` and `trailer` delimit the control/application payload inside the raw
    frame: metadata bytes before it, optional checksum bytes after it. transports
    guarantee `offset + trailer <= frame.len()`.
*/
pub struct Inbound<'a> {
    /// whole decoded frame, metadata and checksum trailer included
    pub frame: &'a [u8],
    /// offset of the first payload byte in `frame`
    pub offset: usize,
    /// length of the checksum trailer ending `frame`
    pub trailer: usize,
    pub info: PacketInfo,
}
impl Inbound<'_> {
    /// control/application payload, metadata and checksum trailer stripped
    pub fn payload(&self) -> &[u8] {
        &self.frame[self.offset .. self.frame.len() - self.trailer]
    }
}


/// operations the master requires from the bus transport
pub trait Transport {
    /// handle to a scheduled repeating transmission
    type Schedule: Copy;

    /// bring the medium up, called once before any traffic
    fn begin(&mut self);

    /// monotonic microsecond clock
    fn micros(&self) -> u64;

    /// transmit one packet, best effort
    fn send_once(&mut self, to: u8, bus: BusId, payload: &[u8], header: Header);

    /// register a packet for transmission every `interval` microseconds until cancelled
    fn send_repeating(&mut self, to: u8, bus: BusId, payload: &[u8], interval: u64, header: Header) -> Self::Schedule;

    /// drop a previously registered repeating transmission
    fn cancel_repeating(&mut self, schedule: Self::Schedule);

    /// try to decode one inbound packet, returning immediately if none completed
    fn receive_one(&mut self) -> Option<Inbound<'_>>;

    /// per tick maintenance: retries, scheduled repeats, acknowledgement timeouts.
    /// every failure detected during the tick goes through `faults`
    fn update(&mut self, faults: &mut dyn FnMut(Error));
}
