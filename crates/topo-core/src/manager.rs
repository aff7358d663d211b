//! Topology manager
//!
//! [`TopologyManager`] owns the child and router tables and is the only way
//! the attach protocol, the radio and the forwarding logic touch them.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         TopologyManager                          │
//! │                                                                  │
//! │   attach protocol ──► transition / transition_router             │
//! │   radio           ──► record_frame_heard / poll_received /       │
//! │                       send_completed / next_message_to_send      │
//! │   forwarding      ──► best_route / link_cost / enqueue_indirect  │
//! │                                                                  │
//! │   ┌────────────────────────┐    ┌─────────────────────────────┐  │
//! │   │ ChildTable             │    │ RouterTable                 │  │
//! │   │  Child ─ Neighbor      │    │  Router ─ Neighbor          │  │
//! │   │        └ IndirectQueue │    │         └ next hop, cost    │  │
//! │   └────────────────────────┘    └─────────────────────────────┘  │
//! │                                                                  │
//! │   tick(now) ──► child timeouts, router link expiry, reclaim      │
//! │   drain_events() ◄── TopologyEvent                               │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Removing a record is never reported as an error. Timeouts, exhausted
//! retries and reclaims show up as [`TopologyEvent`]s instead.

use crate::child::{Child, ChildTable, HandshakeData};
use crate::config::TopologyConfig;
use crate::error::{Result, TopologyError};
use crate::indirect::{IndirectFrame, IndirectQueue, TxOutcome, TxSecurity};
use crate::link_quality::LinkQuality;
use crate::neighbor::{Neighbor, NeighborEvent, NeighborInfo, NeighborState};
use crate::persist::{PersistedNeighbor, PersistedRole};
use crate::router::{NextHop, Router, RouterTable};
use crate::types::{Challenge, DeviceMode, ExtAddress, FrameCounters, RouterId, ShortAddress, Timestamp};
use serde::Serialize;
use std::net::Ipv6Addr;
use tracing::{debug, info, warn};

/// Why a record left its table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalReason {
    /// The attach protocol removed it
    Detached,
    /// Child not heard from within its timeout
    ChildTimeout,
    /// Attach handshake did not complete in time
    AttachTimeout,
    /// Too many indirect messages dropped
    LinkFailures,
    /// Router id released explicitly
    Released,
    /// Router id freed after its reclaim grace period
    Reclaimed,
}

/// Topology change notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TopologyEvent {
    /// A child record was created
    ChildAdded {
        /// Child address
        ext_address: ExtAddress,
    },
    /// A child record was freed
    ChildRemoved {
        /// Child address
        ext_address: ExtAddress,
        /// Why it was freed
        reason: RemovalReason,
    },
    /// A router id was allocated
    RouterAllocated {
        /// Router id
        router_id: RouterId,
    },
    /// A router id was freed
    RouterReleased {
        /// Router id
        router_id: RouterId,
        /// Why it was freed
        reason: RemovalReason,
    },
    /// A neighbor's link state changed
    NeighborStateChanged {
        /// Neighbor address
        ext_address: ExtAddress,
        /// Previous state
        from: NeighborState,
        /// New state
        to: NeighborState,
    },
    /// An indirect message ran out of attempts
    IndirectDropped {
        /// Child address
        ext_address: ExtAddress,
        /// Data sequence number of the dropped message
        sequence: u8,
    },
}

/// Borrowed view of a neighbor in either table
#[derive(Debug, Clone, Copy)]
pub enum NeighborRef<'a> {
    /// Neighbor is a child
    Child(&'a Child),
    /// Neighbor is a router
    Router(&'a Router),
}

impl NeighborInfo for NeighborRef<'_> {
    fn neighbor(&self) -> &Neighbor {
        match self {
            NeighborRef::Child(child) => child.neighbor(),
            NeighborRef::Router(router) => router.neighbor(),
        }
    }
}

/// Owner of the child and router tables
#[derive(Debug)]
pub struct TopologyManager {
    config: TopologyConfig,
    children: ChildTable,
    routers: RouterTable,
    security: TxSecurity,
    events: Vec<TopologyEvent>,
}

impl TopologyManager {
    /// Create a manager with empty tables and the self route
    pub fn new(config: TopologyConfig) -> Result<Self> {
        config.validate()?;
        let children = ChildTable::new(
            config.max_children,
            config.max_child_addresses,
            config.noise_floor_dbm,
        );
        let routers = RouterTable::new(
            config.router_id,
            config.max_routers,
            config.reclaim_grace(),
            config.route_stale_timeout(),
            config.noise_floor_dbm,
        );
        info!(
            ext_address = %config.ext_address,
            router_id = %config.router_id,
            max_children = config.max_children,
            max_routers = config.max_routers,
            "topology manager created"
        );
        Ok(Self {
            config,
            children,
            routers,
            security: TxSecurity::default(),
            events: Vec::new(),
        })
    }

    /// Active configuration
    pub fn config(&self) -> &TopologyConfig {
        &self.config
    }

    /// The child table
    pub fn children(&self) -> &ChildTable {
        &self.children
    }

    /// The router table
    pub fn routers(&self) -> &RouterTable {
        &self.routers
    }

    /// Frame security used when promoting indirect messages
    pub fn tx_security(&self) -> TxSecurity {
        self.security
    }

    /// Replace the frame security state, e.g. after a key switch
    pub fn set_tx_security(&mut self, security: TxSecurity) {
        self.security = security;
    }

    /// Take all pending topology notifications
    pub fn drain_events(&mut self) -> Vec<TopologyEvent> {
        std::mem::take(&mut self.events)
    }

    // ------------------------------------------------------------------
    // Attach protocol
    // ------------------------------------------------------------------

    /// Apply an attach event to the child with `ext_address`
    ///
    /// An unknown address gets a fresh child slot. `Remove` frees the slot
    /// and drops everything queued for the child. Returns the new state.
    pub fn transition(
        &mut self,
        ext_address: ExtAddress,
        event: NeighborEvent,
        now: Timestamp,
    ) -> Result<NeighborState> {
        let Some(index) = self.children.find(&ext_address) else {
            return self.admit_child(ext_address, event, now);
        };
        if matches!(event, NeighborEvent::Remove) {
            self.evict_child(index, RemovalReason::Detached);
            return Ok(NeighborState::Invalid);
        }

        let default_timeout = self.config.default_child_timeout_secs;
        let child = self
            .children
            .get_mut(index)
            .ok_or(TopologyError::UnknownIdentity)?;
        let from = child.neighbor_mut().apply(event).map_err(|e| {
            debug!(%ext_address, error = %e, "child transition rejected");
            e
        })?;
        let to = child.state();
        if to == NeighborState::Valid {
            child.handshake = HandshakeData::None;
            if child.timeout == 0 {
                child.timeout = default_timeout;
            }
        }
        self.state_changed(ext_address, from, to);
        Ok(to)
    }

    /// Apply a link event to the neighbor part of router `id`
    ///
    /// The router id must be allocated. A free link is claimed for
    /// `ext_address`; a link held by another address is `SlotInUse`.
    pub fn transition_router(
        &mut self,
        id: RouterId,
        ext_address: ExtAddress,
        event: NeighborEvent,
        now: Timestamp,
    ) -> Result<NeighborState> {
        if id == self.routers.own_id() {
            return Err(TopologyError::SelfRoute);
        }
        // Validate against the target before touching any other link
        let neighbor = self
            .routers
            .get(id)
            .ok_or(TopologyError::UnknownIdentity)?
            .neighbor();
        let fresh = neighbor.is_free();
        if fresh && matches!(event, NeighborEvent::Remove) {
            return Err(TopologyError::UnknownIdentity);
        }
        if !fresh && neighbor.ext_address != ext_address {
            return Err(TopologyError::SlotInUse(id));
        }
        if let Err(e) = neighbor.link().apply(event) {
            debug!(router_id = %id, %ext_address, error = %e, "router transition rejected");
            return Err(e);
        }

        // A router that changed id keeps a single link
        if let Some(previous) = self.routers.find(&ext_address).filter(|&other| other != id) {
            self.drop_router_link(previous);
        }

        let neighbor = self
            .routers
            .get_mut(id)
            .ok_or(TopologyError::UnknownIdentity)?
            .neighbor_mut();
        if fresh {
            neighbor.claim(ext_address, now);
        }
        let from = neighbor.apply(event)?;
        let to = neighbor.state();
        if to.is_valid_or_restoring() {
            self.routers.cancel_reclaim(id);
        }
        self.state_changed(ext_address, from, to);
        Ok(to)
    }

    /// Find a neighbor in either table
    pub fn lookup(&self, ext_address: &ExtAddress) -> Option<NeighborRef<'_>> {
        if let Some(child) = self.child(ext_address) {
            return Some(NeighborRef::Child(child));
        }
        self.routers
            .find(ext_address)
            .and_then(|id| self.routers.get(id))
            .map(NeighborRef::Router)
    }

    /// Whether messages may be exchanged with the neighbor
    pub fn is_usable(&self, ext_address: &ExtAddress) -> bool {
        self.lookup(ext_address)
            .is_some_and(|n| n.is_state_valid_or_restoring())
    }

    /// Child with `ext_address`
    pub fn child(&self, ext_address: &ExtAddress) -> Option<&Child> {
        self.children
            .find(ext_address)
            .and_then(|index| self.children.get(index))
    }

    // ------------------------------------------------------------------
    // Radio
    // ------------------------------------------------------------------

    /// Record a frame received from a neighbor
    ///
    /// Contact with a router cancels a pending reclaim of its id.
    pub fn record_frame_heard(
        &mut self,
        ext_address: ExtAddress,
        rss: i8,
        counters: &FrameCounters,
        now: Timestamp,
    ) -> Result<()> {
        let stale = |e: TopologyError| {
            warn!(%ext_address, error = %e, "frame rejected");
            e
        };
        if let Some(index) = self.children.find(&ext_address) {
            let child = self
                .children
                .get_mut(index)
                .ok_or(TopologyError::UnknownIdentity)?;
            return child
                .neighbor_mut()
                .record_frame(rss, counters, now)
                .map_err(stale);
        }

        let id = self
            .routers
            .find(&ext_address)
            .ok_or(TopologyError::UnknownIdentity)?;
        let router = self
            .routers
            .get_mut(id)
            .ok_or(TopologyError::UnknownIdentity)?;
        router
            .neighbor_mut()
            .record_frame(rss, counters, now)
            .map_err(stale)?;
        self.routers.cancel_reclaim(id);
        Ok(())
    }

    /// Handle a data poll from a child
    ///
    /// Returns the frame the radio should transmit, if any.
    pub fn poll_received(
        &mut self,
        ext_address: ExtAddress,
        now: Timestamp,
    ) -> Result<Option<IndirectFrame<'_>>> {
        let index = self
            .children
            .find(&ext_address)
            .ok_or(TopologyError::UnknownIdentity)?;
        let child = self
            .children
            .get_mut(index)
            .ok_or(TopologyError::UnknownIdentity)?;
        let neighbor = child.neighbor_mut();
        neighbor.last_heard = now;
        neighbor.data_request = true;

        let frame = child.indirect_mut().poll();
        match &frame {
            Some(f) => debug!(
                %ext_address,
                sequence = f.sequence,
                attempt = f.attempt,
                "indirect frame handed to radio"
            ),
            None => debug!(%ext_address, "poll with nothing to send"),
        }
        Ok(frame)
    }

    /// Handle the radio's completion of an indirect transmission
    ///
    /// A dropped message counts as one link failure; reaching
    /// `max_link_failures` evicts the child.
    pub fn send_completed(&mut self, ext_address: ExtAddress, success: bool) -> Result<TxOutcome> {
        let index = self
            .children
            .find(&ext_address)
            .ok_or(TopologyError::UnknownIdentity)?;
        let max_link_failures = self.config.max_link_failures;
        let child = self
            .children
            .get_mut(index)
            .ok_or(TopologyError::UnknownIdentity)?;
        let sequence = child.indirect().peek().map(|f| f.sequence);
        let outcome = child.indirect_mut().complete(success, &mut self.security);

        let mut evict = false;
        match outcome {
            TxOutcome::Delivered => {
                let neighbor = child.neighbor_mut();
                neighbor.link_failures = 0;
                neighbor.data_request = false;
                debug!(%ext_address, ?sequence, "indirect message delivered");
            }
            TxOutcome::Retry => {
                debug!(
                    %ext_address,
                    attempts = child.indirect().tx_attempts(),
                    "indirect transmission failed, will retry"
                );
            }
            TxOutcome::Dropped => {
                let neighbor = child.neighbor_mut();
                neighbor.link_failures = neighbor.link_failures.saturating_add(1);
                neighbor.data_request = false;
                warn!(
                    %ext_address,
                    ?sequence,
                    link_failures = neighbor.link_failures,
                    "indirect message dropped"
                );
                evict = neighbor.link_failures >= max_link_failures;
                if let Some(sequence) = sequence {
                    self.events.push(TopologyEvent::IndirectDropped {
                        ext_address,
                        sequence,
                    });
                }
            }
            TxOutcome::Ignored => {
                debug!(%ext_address, "completion with nothing in flight");
            }
        }

        if evict {
            self.evict_child(index, RemovalReason::LinkFailures);
        }
        Ok(outcome)
    }

    /// The frame the child's next poll would carry
    pub fn next_message_to_send(&self, ext_address: &ExtAddress) -> Result<Option<IndirectFrame<'_>>> {
        self.child(ext_address)
            .map(|child| child.indirect().peek())
            .ok_or(TopologyError::UnknownIdentity)
    }

    // ------------------------------------------------------------------
    // Forwarding
    // ------------------------------------------------------------------

    /// Next hop and cost towards router `id`
    pub fn best_route(&self, id: RouterId) -> Result<NextHop> {
        self.routers.best_route(id)
    }

    /// Cost of the direct link to neighbor router `id`
    pub fn link_cost(&self, id: RouterId) -> u8 {
        self.routers.link_cost(id)
    }

    /// Queue a message for a sleepy child. Returns `true` if it is the
    /// message the child's next poll will receive.
    pub fn enqueue_indirect(&mut self, ext_address: ExtAddress, payload: Vec<u8>) -> Result<bool> {
        let index = self
            .children
            .find(&ext_address)
            .ok_or(TopologyError::UnknownIdentity)?;
        let child = self
            .children
            .get_mut(index)
            .ok_or(TopologyError::UnknownIdentity)?;
        let promoted = child
            .indirect_mut()
            .enqueue(payload, &mut self.security)
            .map_err(|e| {
                warn!(%ext_address, "indirect queue full");
                e
            })?;
        debug!(
            %ext_address,
            queued = child.indirect().queued_count(),
            promoted,
            "indirect message queued"
        );
        Ok(promoted)
    }

    /// Child that registered `address`
    pub fn find_child_by_address(&self, address: &Ipv6Addr) -> Option<&Child> {
        self.children
            .find_by_address(address)
            .and_then(|index| self.children.get(index))
    }

    /// Child with short address `short`
    pub fn find_child_by_short(&self, short: ShortAddress) -> Option<&Child> {
        self.children
            .find_by_short(short)
            .and_then(|index| self.children.get(index))
    }

    // ------------------------------------------------------------------
    // Router bookkeeping
    // ------------------------------------------------------------------

    /// Assign router id `id`
    pub fn allocate_router(&mut self, id: RouterId) -> Result<()> {
        self.routers.allocate(id)?;
        self.events.push(TopologyEvent::RouterAllocated { router_id: id });
        Ok(())
    }

    /// Free router id `id` immediately, dropping its link
    pub fn release_router(&mut self, id: RouterId) -> Result<()> {
        let link = self
            .routers
            .get(id)
            .filter(|r| !r.neighbor().is_free())
            .map(|r| (r.ext_address(), r.state()));
        self.routers.release(id)?;
        if let Some((ext_address, from)) = link {
            self.state_changed(ext_address, from, NeighborState::Invalid);
        }
        self.events.push(TopologyEvent::RouterReleased {
            router_id: id,
            reason: RemovalReason::Released,
        });
        Ok(())
    }

    /// Record a route advertisement for router `id`
    pub fn update_route(
        &mut self,
        id: RouterId,
        next_hop: RouterId,
        cost: u8,
        link_quality_out: LinkQuality,
        now: Timestamp,
    ) -> Result<bool> {
        self.routers
            .update_cost(id, next_hop, cost, link_quality_out, now)
    }

    /// Start the reclaim grace period for an idle router id
    pub fn start_reclaim(&mut self, id: RouterId, now: Timestamp) -> Result<()> {
        self.routers.start_reclaim(id, now)
    }

    /// Cancel a pending reclaim. Returns whether one was pending.
    pub fn cancel_reclaim(&mut self, id: RouterId) -> Result<bool> {
        if self.routers.get(id).is_none() {
            return Err(TopologyError::UnknownIdentity);
        }
        Ok(self.routers.cancel_reclaim(id))
    }

    /// Process timer expiries up to `now`
    ///
    /// - children silent past their timeout are evicted; children still
    ///   attaching get `attach_timeout` instead
    /// - router links silent past `router_neighbor_timeout` are dropped
    /// - router ids whose reclaim grace period elapsed are freed
    pub fn tick(&mut self, now: Timestamp) {
        let attach_timeout = self.config.attach_timeout();
        let expired: Vec<(usize, RemovalReason)> = self
            .children
            .iter()
            .filter_map(|(index, child)| {
                let neighbor = child.neighbor();
                if child.is_state_valid_or_restoring() {
                    neighbor
                        .is_stale(now, child.timeout_duration())
                        .then_some((index, RemovalReason::ChildTimeout))
                } else {
                    neighbor
                        .is_stale(now, attach_timeout)
                        .then_some((index, RemovalReason::AttachTimeout))
                }
            })
            .collect();
        for (index, reason) in expired {
            self.evict_child(index, reason);
        }

        let own_id = self.routers.own_id();
        let link_timeout = self.config.router_neighbor_timeout();
        let lost: Vec<RouterId> = self
            .routers
            .iter()
            .filter(|r| r.id() != own_id && !r.neighbor().is_free())
            .filter(|r| r.neighbor().is_stale(now, link_timeout))
            .map(|r| r.id())
            .collect();
        for id in lost {
            self.drop_router_link(id);
        }

        for router_id in self.routers.sweep(now) {
            self.events.push(TopologyEvent::RouterReleased {
                router_id,
                reason: RemovalReason::Reclaimed,
            });
        }
    }

    // ------------------------------------------------------------------
    // Child bookkeeping
    // ------------------------------------------------------------------

    /// Register a network address for a child
    ///
    /// An address already held by another child is rejected.
    pub fn register_address(&mut self, ext_address: ExtAddress, address: Ipv6Addr) -> Result<()> {
        let index = self
            .children
            .find(&ext_address)
            .ok_or(TopologyError::UnknownIdentity)?;
        if self
            .children
            .find_by_address(&address)
            .is_some_and(|other| other != index)
        {
            return Err(TopologyError::DuplicateAddress(address));
        }
        self.child_mut(&ext_address)?.register_address(address)
    }

    /// Set a child's negotiated timeout (seconds)
    pub fn set_child_timeout(&mut self, ext_address: ExtAddress, timeout: u32) -> Result<()> {
        self.child_mut(&ext_address)?.timeout = timeout;
        Ok(())
    }

    /// Set a neighbor's declared device mode
    pub fn set_mode(&mut self, ext_address: ExtAddress, mode: DeviceMode) -> Result<()> {
        if let Ok(child) = self.child_mut(&ext_address) {
            child.neighbor_mut().mode = mode;
            return Ok(());
        }
        let id = self
            .routers
            .find(&ext_address)
            .ok_or(TopologyError::UnknownIdentity)?;
        if let Some(router) = self.routers.get_mut(id) {
            router.neighbor_mut().mode = mode;
        }
        Ok(())
    }

    /// Remember the TLV types a child requested
    pub fn set_requested_tlvs(&mut self, ext_address: ExtAddress, tlvs: &[u8]) -> Result<()> {
        let handshake = HandshakeData::requested_tlvs(tlvs)?;
        self.child_mut(&ext_address)?.handshake = handshake;
        Ok(())
    }

    /// Remember the challenge sent to a child
    pub fn set_attach_challenge(&mut self, ext_address: ExtAddress, challenge: Challenge) -> Result<()> {
        self.child_mut(&ext_address)?.handshake = HandshakeData::AttachChallenge(challenge);
        Ok(())
    }

    /// Set the network data version a child is known to have
    pub fn set_network_data_version(&mut self, ext_address: ExtAddress, version: u8) -> Result<()> {
        self.child_mut(&ext_address)?.network_data_version = version;
        Ok(())
    }

    /// Set a child's radio source-match flags
    pub fn set_source_match(&mut self, ext_address: ExtAddress, short: bool, pending: bool) -> Result<()> {
        let child = self.child_mut(&ext_address)?;
        child.src_match_short = short;
        child.src_match_pending = pending;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Load persisted neighbors into `Restored` state
    ///
    /// Router records allocate their id when needed. Returns the number of
    /// records loaded.
    pub fn restore<I>(&mut self, records: I, now: Timestamp) -> Result<usize>
    where
        I: IntoIterator<Item = PersistedNeighbor>,
    {
        let mut restored = 0;
        for record in records {
            let ext_address = record.ext_address;
            let event = NeighborEvent::Restore(record.counters);
            match record.role {
                PersistedRole::Child { timeout, mode } => {
                    if self.children.find(&ext_address).is_some() {
                        warn!(%ext_address, "duplicate persisted child skipped");
                        continue;
                    }
                    self.admit_child(ext_address, event, now)?;
                    let child = self.child_mut(&ext_address)?;
                    child.timeout = timeout;
                    child.neighbor_mut().mode = mode;
                    child.neighbor_mut().key_sequence = record.key_sequence;
                }
                PersistedRole::Router { router_id } => {
                    if router_id == self.routers.own_id() {
                        warn!(%ext_address, %router_id, "persisted self route skipped");
                        continue;
                    }
                    match self.allocate_router(router_id) {
                        Ok(()) | Err(TopologyError::SlotInUse(_)) => {}
                        Err(e) => return Err(e),
                    }
                    self.transition_router(router_id, ext_address, event, now)?;
                    if let Some(router) = self.routers.get_mut(router_id) {
                        router.neighbor_mut().key_sequence = record.key_sequence;
                    }
                }
            }
            restored += 1;
        }
        info!(restored, "neighbors restored");
        Ok(restored)
    }

    /// Records for every neighbor worth keeping across a restart
    pub fn snapshot(&self) -> Vec<PersistedNeighbor> {
        let children = self.children.iter().filter_map(|(_, child)| {
            Self::persisted(
                child.neighbor(),
                PersistedRole::Child {
                    timeout: child.timeout,
                    mode: child.neighbor().mode,
                },
            )
        });
        let own_id = self.routers.own_id();
        let routers = self
            .routers
            .iter()
            .filter(|r| r.id() != own_id)
            .filter_map(|r| Self::persisted(r.neighbor(), PersistedRole::Router { router_id: r.id() }));
        children.chain(routers).collect()
    }

    fn persisted(neighbor: &Neighbor, role: PersistedRole) -> Option<PersistedNeighbor> {
        if !neighbor.is_state_valid_or_restoring() {
            return None;
        }
        neighbor.link().counters().map(|counters| PersistedNeighbor {
            ext_address: neighbor.ext_address,
            counters: *counters,
            key_sequence: neighbor.key_sequence,
            role,
        })
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn child_mut(&mut self, ext_address: &ExtAddress) -> Result<&mut Child> {
        let index = self
            .children
            .find(ext_address)
            .ok_or(TopologyError::UnknownIdentity)?;
        self.children
            .get_mut(index)
            .ok_or(TopologyError::UnknownIdentity)
    }

    fn new_indirect_queue(&self) -> IndirectQueue {
        let sequence = self
            .config
            .initial_data_sequence
            .unwrap_or_else(rand::random);
        IndirectQueue::new(
            self.config.max_indirect_messages,
            self.config.max_tx_attempts,
            sequence,
        )
    }

    fn admit_child(
        &mut self,
        ext_address: ExtAddress,
        event: NeighborEvent,
        now: Timestamp,
    ) -> Result<NeighborState> {
        if matches!(event, NeighborEvent::Remove) {
            return Err(TopologyError::UnknownIdentity);
        }
        let queue = self.new_indirect_queue();
        let index = self
            .children
            .allocate(ext_address, event, now, queue)
            .map_err(|e| {
                warn!(%ext_address, error = %e, "child not admitted");
                e
            })?;
        let child = self
            .children
            .get_mut(index)
            .ok_or(TopologyError::UnknownIdentity)?;
        child.timeout = self.config.default_child_timeout_secs;
        let to = child.state();
        info!(%ext_address, state = ?to, "child added");
        self.events.push(TopologyEvent::ChildAdded { ext_address });
        self.state_changed(ext_address, NeighborState::Invalid, to);
        Ok(to)
    }

    fn evict_child(&mut self, index: usize, reason: RemovalReason) {
        let Some(child) = self.children.get(index) else {
            return;
        };
        let ext_address = child.ext_address();
        let from = child.state();
        let dropped = child.indirect().queued_count();
        self.children.release(index);
        info!(%ext_address, ?reason, dropped, "child removed");
        self.state_changed(ext_address, from, NeighborState::Invalid);
        self.events
            .push(TopologyEvent::ChildRemoved { ext_address, reason });
    }

    fn drop_router_link(&mut self, id: RouterId) {
        let Some(router) = self.routers.get_mut(id) else {
            return;
        };
        let ext_address = router.ext_address();
        let from = router.state();
        router.neighbor_mut().remove();
        info!(router_id = %id, %ext_address, "router link lost");
        self.state_changed(ext_address, from, NeighborState::Invalid);
    }

    fn state_changed(&mut self, ext_address: ExtAddress, from: NeighborState, to: NeighborState) {
        if from == to {
            return;
        }
        debug!(%ext_address, ?from, ?to, "neighbor state changed");
        self.events.push(TopologyEvent::NeighborStateChanged {
            ext_address,
            from,
            to,
        });
    }
}
