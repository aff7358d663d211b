//! Configuration for the topology manager.

use crate::error::{Result, TopologyError};
use crate::link_quality::DEFAULT_NOISE_FLOOR;
use crate::types::{ExtAddress, RouterId};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for topology table sizes, retry bounds and timers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologyConfig {
    /// This node's hardware address
    pub ext_address: ExtAddress,
    /// This node's router id (self route)
    pub router_id: RouterId,
    /// Child table capacity
    pub max_children: usize,
    /// Maximum allocated router ids, own id included
    pub max_routers: usize,
    /// Addresses a child may register
    pub max_child_addresses: usize,
    /// Indirect backlog bound per child
    pub max_indirect_messages: usize,
    /// Poll-triggered attempts per indirect message
    pub max_tx_attempts: u8,
    /// Consecutive dropped indirect messages that evict a child: the drop
    /// that brings the count to this value evicts it
    pub max_link_failures: u8,
    /// Child timeout until the child negotiates its own (seconds)
    pub default_child_timeout_secs: u32,
    /// Grace period between reclaim start and release (seconds)
    pub reclaim_grace_secs: u64,
    /// Silence after which a router neighbor link is dropped (seconds)
    pub router_neighbor_timeout_secs: u64,
    /// Time allowed for an attach handshake to complete (seconds)
    pub attach_timeout_secs: u64,
    /// Age after which a route may be replaced by a worse one (seconds)
    pub route_stale_timeout_secs: u64,
    /// Receiver noise floor (dBm)
    pub noise_floor_dbm: i8,
    /// First data sequence number for new children (random if None)
    pub initial_data_sequence: Option<u8>,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            ext_address: ExtAddress::default(),
            router_id: RouterId::ZERO,
            max_children: 10,
            max_routers: 32,
            max_child_addresses: 4,
            max_indirect_messages: 8,
            max_tx_attempts: 4,
            max_link_failures: 4,
            default_child_timeout_secs: 240,
            reclaim_grace_secs: 100,
            router_neighbor_timeout_secs: 100,
            attach_timeout_secs: 10,
            route_stale_timeout_secs: 120,
            noise_floor_dbm: DEFAULT_NOISE_FLOOR,
            initial_data_sequence: None,
        }
    }
}

impl TopologyConfig {
    /// Builder: set own identity
    pub fn with_identity(mut self, ext_address: ExtAddress, router_id: RouterId) -> Self {
        self.ext_address = ext_address;
        self.router_id = router_id;
        self
    }

    /// Builder: set the child table capacity
    pub fn with_max_children(mut self, max_children: usize) -> Self {
        self.max_children = max_children;
        self
    }

    /// Builder: set the router capacity
    pub fn with_max_routers(mut self, max_routers: usize) -> Self {
        self.max_routers = max_routers;
        self
    }

    /// Builder: set the first data sequence number for new children
    pub fn with_initial_data_sequence(mut self, sequence: u8) -> Self {
        self.initial_data_sequence = Some(sequence);
        self
    }

    /// Check the configuration for values the tables cannot honor
    pub fn validate(&self) -> Result<()> {
        if self.max_children == 0 {
            return Err(TopologyError::Config("max_children must be at least 1".into()));
        }
        if self.max_routers == 0 || self.max_routers > RouterId::COUNT {
            return Err(TopologyError::Config(format!(
                "max_routers must be in 1..={}",
                RouterId::COUNT
            )));
        }
        if self.max_indirect_messages == 0 {
            return Err(TopologyError::Config(
                "max_indirect_messages must be at least 1".into(),
            ));
        }
        if self.max_tx_attempts == 0 {
            return Err(TopologyError::Config("max_tx_attempts must be at least 1".into()));
        }
        if self.max_link_failures == 0 {
            return Err(TopologyError::Config("max_link_failures must be at least 1".into()));
        }
        Ok(())
    }

    /// Reclaim grace period
    pub fn reclaim_grace(&self) -> Duration {
        Duration::from_secs(self.reclaim_grace_secs)
    }

    /// Router neighbor silence timeout
    pub fn router_neighbor_timeout(&self) -> Duration {
        Duration::from_secs(self.router_neighbor_timeout_secs)
    }

    /// Attach handshake timeout
    pub fn attach_timeout(&self) -> Duration {
        Duration::from_secs(self.attach_timeout_secs)
    }

    /// Route staleness timeout
    pub fn route_stale_timeout(&self) -> Duration {
        Duration::from_secs(self.route_stale_timeout_secs)
    }
}
