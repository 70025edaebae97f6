/*!
    fixed capacity table recording which device claims which bus address

    one slot per assignable address, all state transitions are driven by the master:
    a slot is reserved when a device requests an address, confirmed when the device
    acknowledges it, and freed on timeout, negation or connection loss.
*/


/// bus address of a device, always between 1 and the table capacity
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Address(u8);

impl Address {
    /// checked constructor, 0 is the broadcast sentinel and anything above `capacity` is out of table
    pub fn new(raw: u8, capacity: usize) -> Option<Self> {
        if raw == 0 || usize::from(raw) > capacity
            {return None}
        Some(Self(raw))
    }
    /// raw address byte as it travels on the bus
    pub fn get(self) -> u8 {self.0}

    fn index(self) -> usize {usize::from(self.0) - 1}
}


/// outcome of an address reservation attempt
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Reservation {
    /// a free slot was reserved at this address
    Granted(Address),
    /// the random id is already claimed somewhere in the table
    Busy,
    /// no free slot left
    Full,
}

/// state of one assignable address
#[derive(Copy, Clone, Debug)]
struct Slot<H> {
    /// repeating grant broadcast currently scheduled for this slot
    grant: Option<H>,
    /// microsecond timestamp of the reservation, 0 when free
    reserved_at: u64,
    /// random id claimed by the joining device, 0 when free
    rid: u32,
    /// device acknowledged its address
    confirmed: bool,
}
impl<H> Slot<H> {
    const FREE: Self = Self {grant: None, reserved_at: 0, rid: 0, confirmed: false};
}

/**
    table of the `N` assignable addresses, indexed by `address - 1`

    `H` is the transport's handle to a scheduled repeating transmission, stored here so
    the grant broadcast of a slot can be cancelled whenever the slot leaves the
    reserved state.

    random ids are unique across all non-free slots at any instant, and id 0 doubles as
    the free slot marker so it is never grantable.
*/
pub struct DeviceTable<H: Copy, const N: usize> {
    slots: [Slot<H>; N],
}

impl<H: Copy, const N: usize> Default for DeviceTable<H, N> {
    fn default() -> Self {Self::new()}
}

impl<H: Copy, const N: usize> DeviceTable<H, N> {
    pub fn new() -> Self {
        // one address byte per slot, 254 and 255 are the master and not-assigned sentinels
        const { assert!(N < 254, "table capacity exceeds the assignable address space") };
        Self {slots: [Slot::FREE; N]}
    }

    /// bounds-checked address lookup for a raw byte received from the bus
    pub fn address(&self, raw: u8) -> Option<Address> {
        Address::new(raw, N)
    }

    /// true if no slot, free or not, holds this random id
    pub fn is_unique(&self, rid: u32) -> bool {
        self.slots.iter().all(|slot| slot.rid != rid)
    }

    /**
        reserve the first free slot for the given random id

        the id must be unique across the whole table, a duplicate means two devices
        picked the same id and the later one must be negated
    */
    pub fn try_reserve(&mut self, rid: u32, now: u64) -> Reservation {
        if !self.is_unique(rid)
            {return Reservation::Busy}
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if !slot.confirmed && slot.rid == 0 {
                slot.rid = rid;
                slot.reserved_at = now;
                slot.confirmed = false;
                return Reservation::Granted(Address(i as u8 + 1));
            }
        }
        Reservation::Full
    }

    /**
        mark a reserved slot as confirmed by its device

        fails if the slot holds a different id, is already confirmed, or was reserved
        longer than `timeout` microseconds ago. the caller must negate on failure and
        cancel the pending grant broadcast on success.
    */
    pub fn confirm(&mut self, address: Address, rid: u32, now: u64, timeout: u64) -> bool {
        let slot = &mut self.slots[address.index()];
        if rid == 0 || slot.rid != rid || slot.confirmed
            {return false}
        if now.wrapping_sub(slot.reserved_at) >= timeout
            {return false}
        slot.confirmed = true;
        true
    }

    /**
        register an already addressed device announcing itself, skipping reservation

        only succeeds on an entirely free slot, so a refresh can never silently take
        over an address someone else is using
    */
    pub fn add_confirmed(&mut self, address: Address, rid: u32) -> bool {
        let slot = &mut self.slots[address.index()];
        if rid == 0 || slot.confirmed || slot.rid != 0
            {return false}
        slot.rid = rid;
        slot.confirmed = true;
        true
    }

    /// attach the repeating grant broadcast scheduled for this slot
    pub fn schedule_grant(&mut self, address: Address, handle: H) {
        self.slots[address.index()].grant = Some(handle);
    }
    /// detach the pending grant broadcast of this slot, if any
    pub fn take_grant(&mut self, address: Address) -> Option<H> {
        self.slots[address.index()].grant.take()
    }

    /// free one slot, returning its pending grant broadcast for cancellation
    pub fn clear(&mut self, address: Address) -> Option<H> {
        let slot = &mut self.slots[address.index()];
        let grant = slot.grant.take();
        *slot = Slot::FREE;
        grant
    }
    /// free the whole table
    pub fn clear_all(&mut self) {
        for slot in &mut self.slots {
            *slot = Slot::FREE;
        }
    }

    /**
        free every reserved slot whose device never confirmed within `timeout` microseconds

        pending grant broadcasts of expired slots are handed to `cancelled` so they stop
        referencing a freed address
    */
    pub fn sweep(&mut self, now: u64, timeout: u64, mut cancelled: impl FnMut(H)) {
        for slot in &mut self.slots {
            if !slot.confirmed && slot.rid != 0
            && now.wrapping_sub(slot.reserved_at) >= timeout {
                if let Some(grant) = slot.grant.take()
                    {cancelled(grant)}
                *slot = Slot::FREE;
            }
        }
    }

    /// number of confirmed devices
    pub fn count_confirmed(&self) -> usize {
        self.slots.iter().filter(|slot| slot.confirmed).count()
    }

    pub fn is_free(&self, address: Address) -> bool {
        let slot = &self.slots[address.index()];
        !slot.confirmed && slot.rid == 0
    }
    pub fn is_confirmed(&self, address: Address) -> bool {
        self.slots[address.index()].confirmed
    }
    /// random id recorded for this slot, 0 when free
    pub fn rid(&self, address: Address) -> u32 {
        self.slots[address.index()].rid
    }
}
