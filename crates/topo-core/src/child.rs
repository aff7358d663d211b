//! Child records and the child table
//!
//! A child is a neighbor that attached to this node as its parent. Sleepy
//! children are only reachable through their [`IndirectQueue`], which the
//! child record owns.

use crate::error::{Result, TopologyError};
use crate::indirect::IndirectQueue;
use crate::neighbor::{Neighbor, NeighborEvent, NeighborInfo};
use crate::types::{Challenge, ExtAddress, ShortAddress, Timestamp};
use std::net::Ipv6Addr;
use std::time::Duration;

/// Maximum number of TLV types a child may request
pub const MAX_REQUESTED_TLVS: usize = 5;

/// Handshake-phase data; the two arms are never needed at the same time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandshakeData {
    /// Nothing pending
    #[default]
    None,
    /// TLV types the child asked for in its request
    RequestedTlvs {
        /// TLV type codes
        tlvs: [u8; MAX_REQUESTED_TLVS],
        /// Number of valid entries
        len: u8,
    },
    /// Challenge sent to the child, awaiting its response
    AttachChallenge(Challenge),
}

impl HandshakeData {
    /// Build the requested-TLV arm, rejecting more than [`MAX_REQUESTED_TLVS`]
    pub fn requested_tlvs(types: &[u8]) -> Result<Self> {
        if types.len() > MAX_REQUESTED_TLVS {
            return Err(TopologyError::OutOfRange {
                field: "requested tlvs",
                value: types.len() as u32,
            });
        }
        let mut tlvs = [0u8; MAX_REQUESTED_TLVS];
        tlvs[..types.len()].copy_from_slice(types);
        Ok(HandshakeData::RequestedTlvs {
            tlvs,
            len: types.len() as u8,
        })
    }

    /// Requested TLV types, if in that phase
    pub fn tlvs(&self) -> Option<&[u8]> {
        match self {
            HandshakeData::RequestedTlvs { tlvs, len } => Some(&tlvs[..*len as usize]),
            _ => None,
        }
    }

    /// Attach challenge, if in that phase
    pub fn challenge(&self) -> Option<&Challenge> {
        match self {
            HandshakeData::AttachChallenge(c) => Some(c),
            _ => None,
        }
    }
}

/// A child attached to this node
#[derive(Debug, Clone)]
pub struct Child {
    neighbor: Neighbor,
    addresses: Vec<Ipv6Addr>,
    max_addresses: usize,
    /// Negotiated child timeout (seconds)
    pub timeout: u32,
    indirect: IndirectQueue,
    /// Handshake-phase data
    pub handshake: HandshakeData,
    /// Network data version the child is known to have
    pub network_data_version: u8,
    /// Force a short-address source-match entry in the radio
    pub src_match_short: bool,
    /// A source-match entry is waiting to be added
    pub src_match_pending: bool,
}

impl Child {
    fn new(noise_floor: i8, max_addresses: usize, indirect: IndirectQueue) -> Self {
        Self {
            neighbor: Neighbor::new(noise_floor),
            addresses: Vec::with_capacity(max_addresses),
            max_addresses,
            timeout: 0,
            indirect,
            handshake: HandshakeData::None,
            network_data_version: 0,
            src_match_short: false,
            src_match_pending: false,
        }
    }

    /// Mutable access to the neighbor part
    pub fn neighbor_mut(&mut self) -> &mut Neighbor {
        &mut self.neighbor
    }

    /// Register a network address, rejecting duplicates and overflow
    pub fn register_address(&mut self, address: Ipv6Addr) -> Result<()> {
        if self.has_address(&address) {
            return Err(TopologyError::DuplicateAddress(address));
        }
        if self.addresses.len() >= self.max_addresses {
            return Err(TopologyError::TableFull);
        }
        self.addresses.push(address);
        Ok(())
    }

    /// Whether the child registered `address`
    pub fn has_address(&self, address: &Ipv6Addr) -> bool {
        self.addresses.contains(address)
    }

    /// Registered addresses
    pub fn addresses(&self) -> &[Ipv6Addr] {
        &self.addresses
    }

    /// Forget all registered addresses
    pub fn clear_addresses(&mut self) {
        self.addresses.clear();
    }

    /// Child timeout as a duration
    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs(u64::from(self.timeout))
    }

    /// The child's indirect mailbox
    pub fn indirect(&self) -> &IndirectQueue {
        &self.indirect
    }

    /// Mutable access to the indirect mailbox
    pub fn indirect_mut(&mut self) -> &mut IndirectQueue {
        &mut self.indirect
    }

    /// Short address, once assigned
    pub fn short_address(&self) -> Option<ShortAddress> {
        self.neighbor.short_address()
    }

    fn reset(&mut self, indirect: IndirectQueue) {
        self.addresses.clear();
        self.timeout = 0;
        self.indirect = indirect;
        self.handshake = HandshakeData::None;
        self.network_data_version = 0;
        self.src_match_short = false;
        self.src_match_pending = false;
    }
}

impl NeighborInfo for Child {
    fn neighbor(&self) -> &Neighbor {
        &self.neighbor
    }
}

/// Fixed-capacity table of child records
///
/// Slots are allocated up front; a slot whose neighbor is `Invalid` is free.
#[derive(Debug)]
pub struct ChildTable {
    slots: Vec<Child>,
}

impl ChildTable {
    /// Create a table with `capacity` free slots
    pub fn new(capacity: usize, max_addresses: usize, noise_floor: i8) -> Self {
        let slots = (0..capacity)
            .map(|_| Child::new(noise_floor, max_addresses, IndirectQueue::new(0, 0, 0)))
            .collect();
        Self { slots }
    }

    /// Claim a free slot for `ext_address` and apply its first event
    ///
    /// If `first` is rejected the slot stays free.
    pub(crate) fn allocate(
        &mut self,
        ext_address: ExtAddress,
        first: NeighborEvent,
        now: Timestamp,
        indirect: IndirectQueue,
    ) -> Result<usize> {
        debug_assert!(self.find(&ext_address).is_none());
        let index = self
            .slots
            .iter()
            .position(|c| c.neighbor.is_free())
            .ok_or(TopologyError::TableFull)?;
        let child = &mut self.slots[index];
        child.reset(indirect);
        child.neighbor.claim(ext_address, now);
        if let Err(e) = child.neighbor.apply(first) {
            child.neighbor.remove();
            return Err(e);
        }
        Ok(index)
    }

    /// Free a slot, dropping its queued messages
    pub(crate) fn release(&mut self, index: usize) {
        if let Some(child) = self.slots.get_mut(index) {
            child.indirect.clear();
            child.addresses.clear();
            child.handshake = HandshakeData::None;
            child.neighbor.remove();
        }
    }

    /// Slot index of the child with `ext_address`
    pub fn find(&self, ext_address: &ExtAddress) -> Option<usize> {
        self.slots
            .iter()
            .position(|c| !c.neighbor.is_free() && c.neighbor.ext_address == *ext_address)
    }

    /// Slot index of the child with short address `short`
    pub fn find_by_short(&self, short: ShortAddress) -> Option<usize> {
        self.slots
            .iter()
            .position(|c| !c.neighbor.is_free() && c.short_address() == Some(short))
    }

    /// Slot index of the child that registered `address`
    pub fn find_by_address(&self, address: &Ipv6Addr) -> Option<usize> {
        self.slots
            .iter()
            .position(|c| !c.neighbor.is_free() && c.has_address(address))
    }

    /// Child in slot `index`, if occupied
    pub fn get(&self, index: usize) -> Option<&Child> {
        self.slots.get(index).filter(|c| !c.neighbor.is_free())
    }

    /// Mutable child in slot `index`, if occupied
    pub fn get_mut(&mut self, index: usize) -> Option<&mut Child> {
        self.slots.get_mut(index).filter(|c| !c.neighbor.is_free())
    }

    /// Occupied slots with their indices
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Child)> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.neighbor.is_free())
    }

    /// Number of occupied slots
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Check if no slot is occupied
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of slots
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neighbor::NeighborState;

    fn table(capacity: usize) -> ChildTable {
        ChildTable::new(capacity, 2, -100)
    }

    fn queue() -> IndirectQueue {
        IndirectQueue::new(4, 3, 0)
    }

    fn parent_request() -> NeighborEvent {
        NeighborEvent::ParentRequest(Challenge::default())
    }

    fn attach(table: &mut ChildTable, ext: u64) -> usize {
        table
            .allocate(ExtAddress::from_u64(ext), parent_request(), Timestamp::ZERO, queue())
            .unwrap()
    }

    #[test]
    fn test_allocate_until_full() {
        let mut t = table(2);
        attach(&mut t, 1);
        attach(&mut t, 2);
        assert_eq!(t.len(), 2);
        assert_eq!(
            t.allocate(ExtAddress::from_u64(3), parent_request(), Timestamp::ZERO, queue()),
            Err(TopologyError::TableFull)
        );
    }

    #[test]
    fn test_rejected_first_event_keeps_slot_free() {
        let mut t = table(1);
        let err = t
            .allocate(ExtAddress::from_u64(1), NeighborEvent::Attach, Timestamp::ZERO, queue())
            .unwrap_err();
        assert!(matches!(err, TopologyError::InvalidTransition { .. }));
        assert!(t.is_empty());
        attach(&mut t, 2);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn test_release_frees_slot() {
        let mut t = table(1);
        let index = attach(&mut t, 1);
        t.get_mut(index)
            .unwrap()
            .register_address("fd00::1".parse().unwrap())
            .unwrap();
        t.release(index);
        assert!(t.is_empty());
        assert!(t.find(&ExtAddress::from_u64(1)).is_none());
        assert!(t.find_by_address(&"fd00::1".parse().unwrap()).is_none());

        let again = attach(&mut t, 2);
        assert_eq!(again, index);
        assert!(t.get(again).unwrap().addresses().is_empty());
    }

    #[test]
    fn test_register_addresses() {
        let mut t = table(1);
        let index = attach(&mut t, 1);
        let child = t.get_mut(index).unwrap();
        let a: Ipv6Addr = "fd00::1".parse().unwrap();
        let b: Ipv6Addr = "fd00::2".parse().unwrap();
        child.register_address(a).unwrap();
        assert_eq!(child.register_address(a), Err(TopologyError::DuplicateAddress(a)));
        child.register_address(b).unwrap();
        assert_eq!(
            child.register_address("fd00::3".parse().unwrap()),
            Err(TopologyError::TableFull)
        );
        assert_eq!(child.addresses(), &[a, b]);
        assert_eq!(t.find_by_address(&b), Some(index));
    }

    #[test]
    fn test_find_by_short_address() {
        let mut t = table(2);
        let index = attach(&mut t, 7);
        let counters = crate::types::LinkCounters {
            short_address: ShortAddress(0x0401),
            ..Default::default()
        };
        t.get_mut(index)
            .unwrap()
            .neighbor_mut()
            .apply(NeighborEvent::ChildIdRequest(counters))
            .unwrap();
        assert_eq!(t.find_by_short(ShortAddress(0x0401)), Some(index));
        assert_eq!(t.find_by_short(ShortAddress(0x0402)), None);
        assert_eq!(t.get(index).unwrap().state(), NeighborState::ChildIdRequestReceived);
    }

    #[test]
    fn test_handshake_data_arms() {
        let tlvs = HandshakeData::requested_tlvs(&[1, 2, 3]).unwrap();
        assert_eq!(tlvs.tlvs(), Some(&[1u8, 2, 3][..]));
        assert_eq!(tlvs.challenge(), None);
        assert!(HandshakeData::requested_tlvs(&[0; 6]).is_err());

        let challenge = Challenge::new(&[9; 8]).unwrap();
        let attach = HandshakeData::AttachChallenge(challenge);
        assert_eq!(attach.challenge(), Some(&challenge));
        assert_eq!(attach.tlvs(), None);
    }
}
