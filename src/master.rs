/*!
    implement the master side of dynamic bus addressing.

    The central resource is the [Master] struct which owns the transport, the
    [DeviceTable] and the host hooks. It is single-threaded and poll-driven: nothing
    happens outside explicit calls to [Master::begin], [Master::update],
    [Master::receive] or [Master::receive_for] made by the host loop.

    joining handshake, seen from the master:

    - a device broadcasts a request with a random 32bit id
    - the master reserves a table slot and broadcasts a grant repeatedly, tagged with
      the random id so only the matching device interprets it
    - the device confirms its new address, the master stops the grant broadcast
    - reservations never confirmed expire on their own, claims that collide or arrive
      stale are negated
*/

use core::time::Duration;
use log::*;
use packbytes::ToBytes;

use crate::{
    control::*,
    table::{DeviceTable, Reservation},
    transport::{Error, PacketInfo, Transport},
    };


/// timing of the addressing protocol, identical on master and devices
#[derive(Copy, Clone, Debug)]
pub struct Timing {
    /// how long a reservation may stay unconfirmed
    pub addressing_timeout: Duration,
    /// interval between two repetitions of a grant broadcast
    pub grant_interval: Duration,
    /// inbound servicing slice between two enumeration broadcasts
    pub enumeration_slice: Duration,
    /// total duration of the startup enumeration
    pub enumeration_window: Duration,
}
impl Default for Timing {
    fn default() -> Self {
        Self {
            addressing_timeout: Duration::from_micros(2_900_000),
            grant_interval: Duration::from_millis(100),
            enumeration_slice: Duration::from_millis(250),
            enumeration_window: Duration::from_micros(2_900_000),
        }
    }
}

/**
    host hooks for payload delivery and error notification

    the value is owned by the master, so a host wanting to reach back into its own
    state simply captures it in the implementing type.
*/
pub trait Events {
    /**
        called for every received packet with its payload and sender metadata

        packets consumed as addressing control messages are forwarded too, so hosts
        mixing application traffic with addressing must be prepared to see control
        bytes they do not recognize
    */
    fn received(&mut self, payload: &[u8], info: &PacketInfo) {
        let _ = (payload, info);
    }
    /// called for every non fatal error, transport faults included
    fn error(&mut self, error: Error) {
        let _ = error;
    }
}
/// discard everything
impl Events for () {}


/**
    dynamic addressing master of one bus segment

    `N` is the number of assignable addresses, so the highest address handed out is `N`.
*/
pub struct Master<T: Transport, E: Events, const N: usize = 25> {
    transport: T,
    events: E,
    table: DeviceTable<T::Schedule, N>,
    /// bus segment this master owns
    bus: BusId,
    timing: Timing,
    /// header flags set on every packet this master sends
    config: Header,
}

impl<T: Transport, E: Events, const N: usize> Master<T, E, N> {
    pub fn new(transport: T, bus: BusId, events: E) -> Self {
        let mut config = Header::default();
        config.set_sender_info(true);
        Self {
            transport,
            events,
            table: DeviceTable::new(),
            bus,
            timing: Timing::default(),
            config,
        }
    }
    pub fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }

    pub fn transport(&self) -> &T {&self.transport}
    pub fn transport_mut(&mut self) -> &mut T {&mut self.transport}
    pub fn events(&self) -> &E {&self.events}
    pub fn events_mut(&mut self) -> &mut E {&mut self.events}
    /// table of currently reserved and confirmed addresses
    pub fn devices(&self) -> &DeviceTable<T::Schedule, N> {&self.table}
    /// number of devices that confirmed their address
    pub fn count_confirmed(&self) -> usize {self.table.count_confirmed()}

    /**
        bring the transport up, then enumerate devices already addressed

        the enumeration broadcast asks devices that kept an address across a master
        restart to announce themselves again, and inbound traffic is serviced between
        repetitions so handshakes arriving meanwhile are not dropped
    */
    pub fn begin(&mut self) {
        self.transport.begin();
        info!("enumerating devices already present on the bus");
        let window = self.timing.enumeration_window.as_micros() as u64;
        let start = self.transport.micros();
        while self.transport.micros().wrapping_sub(start) < window {
            self.transport.send_once(
                BROADCAST,
                self.bus,
                &Opcode::List.to_be_bytes(),
                self.addressing_header(),
                );
            let _ = self.receive_for(self.timing.enumeration_slice);
        }
    }

    /**
        per tick maintenance, to be called regularly by the host loop

        expires reservations never confirmed, then delegates to the transport's own
        upkeep and forwards every fault it reported
    */
    pub fn update(&mut self) {
        let now = self.transport.micros();
        let timeout = self.timing.addressing_timeout.as_micros() as u64;
        {
            let Self {transport, table, ..} = self;
            table.sweep(now, timeout, |grant| {
                debug!("reservation expired, cancelling its grant broadcast");
                transport.cancel_repeating(grant);
            });
        }
        // grants of slots freed during the tick, cancelled once the transport is done updating
        let mut stale: heapless::Vec<T::Schedule, N> = heapless::Vec::new();
        {
            let Self {transport, table, events, ..} = self;
            transport.update(&mut |fault| {
                if let Error::ConnectionLost(raw) = fault {
                    debug!("device {} lost, freeing its address", raw);
                    if let Some(address) = table.address(raw) {
                        if let Some(grant) = table.clear(address) {
                            // at most one pending grant per slot, the buffer cannot overflow
                            let _ = stale.push(grant);
                        }
                    }
                }
                events.error(fault);
            });
        }
        for grant in stale {
            self.transport.cancel_repeating(grant);
        }
    }

    /**
        handle one error condition

        a connection loss frees the device's slot, every condition is then forwarded
        to the host error hook
    */
    pub fn report_error(&mut self, error: Error) {
        if let Error::ConnectionLost(raw) = error {
            debug!("device {} lost, freeing its address", raw);
            if let Some(address) = self.table.address(raw) {
                if let Some(grant) = self.table.clear(address) {
                    self.transport.cancel_repeating(grant);
                }
            }
        }
        self.events.error(error);
    }

    /**
        try to process one inbound packet, true if one was processed

        a payload longer than [MAX_PAYLOAD] is reported as [Error::ContentTooLong]
        and never delivered truncated
    */
    pub fn receive(&mut self) -> bool {
        let mut payload = [0u8; MAX_PAYLOAD];
        let (size, info) = {
            let Some(inbound) = self.transport.receive_one()
                else {return false};
            let data = inbound.payload();
            let info = inbound.info;
            if data.len() > payload.len() {
                (Err(u8::try_from(data.len()).unwrap_or(u8::MAX)), info)
            }
            else {
                payload[.. data.len()].copy_from_slice(data);
                (Ok(data.len()), info)
            }
        };
        match size {
            Ok(size) => self.dispatch(&payload[.. size], &info),
            Err(length) => self.report_error(Error::ContentTooLong(length)),
        }
        true
    }

    /// process inbound packets until one completes or the duration elapses
    pub fn receive_for(&mut self, duration: Duration) -> Result<(), Error> {
        let duration = duration.as_micros() as u64;
        let start = self.transport.micros();
        while self.transport.micros().wrapping_sub(start) <= duration {
            if self.receive()
                {return Ok(())}
        }
        Err(Error::Timeout)
    }

    /// route one decoded packet: addressing control first, then payload delivery
    fn dispatch(&mut self, payload: &[u8], info: &PacketInfo) {
        if info.header.addressing() {
            if let Some(block) = ControlBlock::decode(payload) {
                self.control(block, info);
            }
        }
        // every packet reaches the host, addressing control blocks included
        self.events.received(payload, info);
    }

    /// act on one addressing control block
    fn control(&mut self, block: ControlBlock, info: &PacketInfo) {
        match block.opcode {
            Opcode::Request => self.approve(block.rid, info),

            Opcode::Confirm => {
                let now = self.transport.micros();
                let timeout = self.timing.addressing_timeout.as_micros() as u64;
                let address = block.address.and_then(|raw| self.table.address(raw));
                let confirmed = match address {
                    Some(address) => {
                        if self.table.confirm(address, block.rid, now, timeout) {
                            if let Some(grant) = self.table.take_grant(address) {
                                self.transport.cancel_repeating(grant);
                            }
                            debug!("device {} confirmed its address", address.get());
                            true
                        }
                        else {false}
                    }
                    None => false,
                };
                if !confirmed {
                    debug!("stale or mismatched confirmation for rid {:#010x}", block.rid);
                    self.negate(info.sender, info.sender_bus, block.rid);
                }
            }

            Opcode::Refresh => {
                let added = block.address
                    .and_then(|raw| self.table.address(raw))
                    .is_some_and(|address| self.table.add_confirmed(address, block.rid));
                if added {
                    debug!("device re-announced at address {}", block.address.unwrap_or(0));
                }
                else {
                    self.negate(info.sender, info.sender_bus, block.rid);
                }
            }

            Opcode::Negate => {
                // only the legitimate claimant, from this master's own bus, may abort its claim
                if block.address == Some(info.sender) && info.sender_bus == self.bus {
                    if let Some(address) = self.table.address(info.sender) {
                        if self.table.rid(address) == block.rid {
                            debug!("device {} aborted its address claim", address.get());
                            if let Some(grant) = self.table.clear(address) {
                                self.transport.cancel_repeating(grant);
                            }
                        }
                    }
                }
            }

            // list requests are emitted by masters, not answered by them
            Opcode::List | Opcode::Unknown => {}
        }
    }

    /**
        service an address request

        reserves a slot and broadcasts the grant repeatedly until the device confirms.
        the grant is deliberately broadcast, not unicast, because the device has no
        address yet: the random id in the block tells it the grant is for it.
    */
    fn approve(&mut self, rid: u32, info: &PacketInfo) {
        let now = self.transport.micros();
        match self.table.try_reserve(rid, now) {
            Reservation::Full => {
                // no response, the device will retry on its own timeout
                warn!("no address left for rid {:#010x}", rid);
                self.events.error(Error::DevicesFull(N as u8));
            }
            Reservation::Busy => {
                // two devices picked the same random id, the later one must pick again
                debug!("rid {:#010x} already claimed, negating", rid);
                self.negate(NOT_ASSIGNED, info.sender_bus, rid);
            }
            Reservation::Granted(address) => {
                debug!("granting address {} to rid {:#010x}", address.get(), rid);
                let grant = Grant::new(rid, address.get());
                let schedule = self.transport.send_repeating(
                    BROADCAST,
                    info.sender_bus,
                    &grant.to_be_bytes(),
                    self.timing.grant_interval.as_micros() as u64,
                    self.addressing_header(),
                    );
                self.table.schedule_grant(address, schedule);
            }
        }
    }

    /// reject an address claim with one acknowledged unicast, the device picks a new random id
    fn negate(&mut self, to: u8, bus: BusId, rid: u32) {
        let mut header = self.addressing_header();
        header.set_ack_request(true);
        self.transport.send_once(to, bus, &Negate::new(rid).to_be_bytes(), header);
    }

    fn addressing_header(&self) -> Header {
        let mut header = self.config;
        header.set_addressing(true);
        header
    }
}
