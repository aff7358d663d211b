//! Error types for the topology core.

use crate::neighbor::{NeighborEventKind, NeighborState};
use crate::types::RouterId;
use thiserror::Error;

/// Topology error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopologyError {
    /// No free slot for a new neighbor, child, router or address
    #[error("table full")]
    TableFull,

    /// Router id is already allocated
    #[error("router id {0} already allocated")]
    SlotInUse(RouterId),

    /// Indirect mailbox backlog bound reached
    #[error("indirect queue full")]
    QueueFull,

    /// Operation referenced an identity absent from the tables
    #[error("unknown identity")]
    UnknownIdentity,

    /// Event not valid from the neighbor's current state
    #[error("invalid transition: {event:?} from {from:?}")]
    InvalidTransition {
        /// State the record was in
        from: NeighborState,
        /// Event that was rejected
        event: NeighborEventKind,
    },

    /// Router id above the valid range
    #[error("invalid router id {0}")]
    InvalidRouterId(u8),

    /// Field value outside its narrow range
    #[error("{field} out of range: {value}")]
    OutOfRange {
        /// Field being assigned
        field: &'static str,
        /// Rejected value
        value: u32,
    },

    /// Address already registered by this child
    #[error("duplicate address {0}")]
    DuplicateAddress(std::net::Ipv6Addr),

    /// Destination router is allocated but unreachable
    #[error("no route to router {0}")]
    NoRoute(RouterId),

    /// The self route cannot be reclaimed or re-costed
    #[error("operation not permitted on the self route")]
    SelfRoute,

    /// Frame carried security counters older than the ones stored
    #[error("stale frame counter")]
    StaleFrameCounter,

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type alias for topology operations
pub type Result<T> = std::result::Result<T, TopologyError>;
