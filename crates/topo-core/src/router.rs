//! Router records and path-cost bookkeeping
//!
//! The router table is indexed by router id. A slot is *allocated* while the
//! id is assigned to a real router; the neighbor part of the record is only
//! non-`Invalid` when that router is also a direct neighbor.
//!
//! ## Route updates
//!
//! A cost update via the current next hop always refreshes the route. An
//! update via a different next hop replaces it only if strictly cheaper, or
//! if the current route is unreachable or stale. Momentarily worse
//! re-advertisements therefore never cause route flapping.
//!
//! ## Reclaim
//!
//! An idle router id is first marked for reclaim. It is freed by [`RouterTable::sweep`]
//! only once the mark has held for the whole grace period; contact with the
//! router in the meantime cancels it.

use crate::error::{Result, TopologyError};
use crate::link_quality::LinkQuality;
use crate::neighbor::{Neighbor, NeighborInfo};
use crate::types::{ExtAddress, RouterId, Timestamp};
use std::time::Duration;
use tracing::{debug, info};

/// Path cost meaning "unreachable"
pub const COST_INFINITE: u8 = 16;

/// Smallest cost of a route to another router
pub const COST_MIN: u8 = 1;

/// Next hop and cost towards a router
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NextHop {
    /// Router to forward to (the destination itself when directly reachable)
    pub router_id: RouterId,
    /// Path cost
    pub cost: u8,
}

/// A router known to this node
#[derive(Debug, Clone)]
pub struct Router {
    id: RouterId,
    neighbor: Neighbor,
    next_hop: Option<RouterId>,
    link_quality_out: LinkQuality,
    cost: u8,
    allocated: bool,
    reclaim_started: Option<Timestamp>,
    route_updated: Timestamp,
}

impl Router {
    fn new(id: RouterId, noise_floor: i8) -> Self {
        Self {
            id,
            neighbor: Neighbor::new(noise_floor),
            next_hop: None,
            link_quality_out: LinkQuality::Zero,
            cost: COST_INFINITE,
            allocated: false,
            reclaim_started: None,
            route_updated: Timestamp::ZERO,
        }
    }

    /// Router id
    pub fn id(&self) -> RouterId {
        self.id
    }

    /// Mutable access to the neighbor part
    pub fn neighbor_mut(&mut self) -> &mut Neighbor {
        &mut self.neighbor
    }

    /// Router used to reach this one; itself when directly reachable
    pub fn next_hop(&self) -> Option<RouterId> {
        self.next_hop
    }

    /// Path cost, [`COST_INFINITE`] when unreachable
    pub fn cost(&self) -> u8 {
        self.cost
    }

    /// Quality of the reverse link, as reported by the router
    pub fn link_quality_out(&self) -> LinkQuality {
        self.link_quality_out
    }

    /// Whether the id is assigned
    pub fn is_allocated(&self) -> bool {
        self.allocated
    }

    /// Whether the slot is waiting out its reclaim grace period
    pub fn is_reclaim_pending(&self) -> bool {
        self.reclaim_started.is_some()
    }

    /// Time of the last accepted route update
    pub fn route_updated(&self) -> Timestamp {
        self.route_updated
    }

    fn release(&mut self) {
        self.neighbor.remove();
        self.next_hop = None;
        self.link_quality_out = LinkQuality::Zero;
        self.cost = COST_INFINITE;
        self.allocated = false;
        self.reclaim_started = None;
        self.route_updated = Timestamp::ZERO;
    }
}

impl NeighborInfo for Router {
    fn neighbor(&self) -> &Neighbor {
        &self.neighbor
    }
}

/// Router-id-indexed table of routers, including this node's own entry
#[derive(Debug)]
pub struct RouterTable {
    routers: Vec<Router>,
    own_id: RouterId,
    max_routers: usize,
    reclaim_grace: Duration,
    route_stale_timeout: Duration,
}

impl RouterTable {
    /// Create a table holding only the self route
    pub fn new(
        own_id: RouterId,
        max_routers: usize,
        reclaim_grace: Duration,
        route_stale_timeout: Duration,
        noise_floor: i8,
    ) -> Self {
        let mut routers: Vec<Router> = (0..RouterId::COUNT as u8)
            .filter_map(|id| RouterId::new(id).ok())
            .map(|id| Router::new(id, noise_floor))
            .collect();
        let own = &mut routers[own_id.index()];
        own.allocated = true;
        own.cost = 0;
        own.next_hop = Some(own_id);
        Self {
            routers,
            own_id,
            max_routers,
            reclaim_grace,
            route_stale_timeout,
        }
    }

    /// This node's router id
    pub fn own_id(&self) -> RouterId {
        self.own_id
    }

    /// Assign a router id
    pub fn allocate(&mut self, id: RouterId) -> Result<()> {
        if self.routers[id.index()].allocated {
            return Err(TopologyError::SlotInUse(id));
        }
        if self.allocated_count() >= self.max_routers {
            return Err(TopologyError::TableFull);
        }
        let router = &mut self.routers[id.index()];
        router.allocated = true;
        router.reclaim_started = None;
        router.cost = COST_INFINITE;
        router.next_hop = None;
        info!(router_id = %id, "router id allocated");
        Ok(())
    }

    /// Free a router id immediately
    pub(crate) fn release(&mut self, id: RouterId) -> Result<()> {
        if id == self.own_id {
            return Err(TopologyError::SelfRoute);
        }
        let router = &mut self.routers[id.index()];
        if !router.allocated {
            return Err(TopologyError::UnknownIdentity);
        }
        router.release();
        info!(router_id = %id, "router id released");
        Ok(())
    }

    /// Record a route advertisement. Returns whether the route was taken.
    pub fn update_cost(
        &mut self,
        id: RouterId,
        next_hop: RouterId,
        cost: u8,
        link_quality_out: LinkQuality,
        now: Timestamp,
    ) -> Result<bool> {
        if id == self.own_id {
            return Err(TopologyError::SelfRoute);
        }
        if !self.routers[id.index()].allocated {
            return Err(TopologyError::UnknownIdentity);
        }
        let cost = cost.clamp(COST_MIN, COST_INFINITE);

        let router = &self.routers[id.index()];
        let accept = match router.next_hop {
            None => true,
            Some(current) if current == next_hop => true,
            Some(current) => {
                cost < router.cost
                    || router.cost >= COST_INFINITE
                    || self.is_route_stale(id, current, now)
            }
        };
        if !accept {
            debug!(router_id = %id, %next_hop, cost, current_cost = router.cost, "route update ignored");
            return Ok(false);
        }

        let router = &mut self.routers[id.index()];
        if router.next_hop != Some(next_hop) {
            debug!(router_id = %id, %next_hop, cost, "route replaced");
        }
        router.next_hop = Some(next_hop);
        router.cost = cost;
        router.link_quality_out = link_quality_out;
        router.route_updated = now;
        Ok(true)
    }

    /// Mark an allocated id for reclaim. An already pending reclaim keeps
    /// its original start time.
    pub fn start_reclaim(&mut self, id: RouterId, now: Timestamp) -> Result<()> {
        if id == self.own_id {
            return Err(TopologyError::SelfRoute);
        }
        let router = &mut self.routers[id.index()];
        if !router.allocated {
            return Err(TopologyError::UnknownIdentity);
        }
        if router.reclaim_started.is_none() {
            router.reclaim_started = Some(now);
            debug!(router_id = %id, "router reclaim started");
        }
        Ok(())
    }

    /// Cancel a pending reclaim. Returns whether one was pending.
    pub fn cancel_reclaim(&mut self, id: RouterId) -> bool {
        let router = &mut self.routers[id.index()];
        let was_pending = router.reclaim_started.take().is_some();
        if was_pending {
            debug!(router_id = %id, "router reclaim cancelled");
        }
        was_pending
    }

    /// Free every id whose reclaim has held for the grace period
    pub fn sweep(&mut self, now: Timestamp) -> Vec<RouterId> {
        let grace = self.reclaim_grace;
        let expired: Vec<RouterId> = self
            .routers
            .iter()
            .filter(|r| r.allocated && r.id != self.own_id)
            .filter(|r| matches!(r.reclaim_started, Some(t) if now.saturating_since(t) >= grace))
            .map(|r| r.id)
            .collect();
        for id in &expired {
            self.routers[id.index()].release();
            info!(router_id = %id, "router id reclaimed");
        }
        expired
    }

    /// Next hop and cost towards `id`
    pub fn best_route(&self, id: RouterId) -> Result<NextHop> {
        let router = &self.routers[id.index()];
        if !router.allocated {
            return Err(TopologyError::UnknownIdentity);
        }
        if id == self.own_id {
            return Ok(NextHop {
                router_id: id,
                cost: 0,
            });
        }
        match router.next_hop {
            Some(hop) if router.cost < COST_INFINITE && !self.next_hop_gone(hop) => Ok(NextHop {
                router_id: hop,
                cost: router.cost,
            }),
            _ => Err(TopologyError::NoRoute(id)),
        }
    }

    /// Cost of the direct link to a neighbor router: the worse of the two
    /// directions, [`COST_INFINITE`] when the link is not usable
    pub fn link_cost(&self, id: RouterId) -> u8 {
        let router = &self.routers[id.index()];
        if id == self.own_id || !router.allocated || !router.is_state_valid_or_restoring() {
            return COST_INFINITE;
        }
        let quality_in = router.neighbor.link_info.link_quality();
        quality_in.min(router.link_quality_out).cost()
    }

    /// Allocated router with neighbor address `ext_address`
    pub fn find(&self, ext_address: &ExtAddress) -> Option<RouterId> {
        self.routers
            .iter()
            .find(|r| r.allocated && !r.neighbor.is_free() && r.neighbor.ext_address == *ext_address)
            .map(|r| r.id)
    }

    /// Allocated router `id`
    pub fn get(&self, id: RouterId) -> Option<&Router> {
        self.routers.get(id.index()).filter(|r| r.allocated)
    }

    /// Mutable allocated router `id`
    pub fn get_mut(&mut self, id: RouterId) -> Option<&mut Router> {
        self.routers.get_mut(id.index()).filter(|r| r.allocated)
    }

    /// Allocated routers, own entry included
    pub fn iter(&self) -> impl Iterator<Item = &Router> {
        self.routers.iter().filter(|r| r.allocated)
    }

    /// Number of allocated ids, own entry included
    pub fn allocated_count(&self) -> usize {
        self.iter().count()
    }

    /// Maximum number of allocated ids
    pub fn capacity(&self) -> usize {
        self.max_routers
    }

    fn is_route_stale(&self, id: RouterId, hop: RouterId, now: Timestamp) -> bool {
        let router = &self.routers[id.index()];
        now.saturating_since(router.route_updated) > self.route_stale_timeout || self.next_hop_gone(hop)
    }

    /// Whether the current next hop can no longer carry the route: any hop
    /// other than this node needs a usable link
    fn next_hop_gone(&self, hop: RouterId) -> bool {
        if hop == self.own_id {
            return false;
        }
        let hop = &self.routers[hop.index()];
        !hop.allocated || !hop.is_state_valid_or_restoring()
    }
}
