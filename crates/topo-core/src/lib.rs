//! # Mesh Topology Core
//!
//! This crate tracks every node a low-power mesh device depends on to stay
//! attached: its neighbors, the sleepy children that attached to it, and the
//! routers it can reach. It exposes what routing and attach maintenance need
//! and nothing more; radio framing, the attach protocol and frame crypto live
//! elsewhere and drive this crate through [`TopologyManager`].
//!
//! ## Overview
//!
//! - **Link quality**: rolling RSS history per neighbor, link margin and a
//!   four-band quality estimate
//! - **Neighbors**: identity, freshness, security counters and a tagged link
//!   state machine
//! - **Indirect delivery**: per-child mailbox with retry bookkeeping for
//!   children that sleep between polls
//! - **Child table / router table**: fixed-capacity arenas with capacity,
//!   uniqueness and reclaim rules
//!
//! ## Data Flow
//!
//! ```text
//! radio frame  → record_frame_heard → Neighbor (counters, RSS history)
//! attach event → transition         → LinkState::apply
//! outbound msg → enqueue_indirect   → IndirectQueue → poll_received → radio
//! routing      → best_route         → RouterTable
//! timer        → tick               → evictions, reclaim → drain_events
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use topo_core::{Challenge, ExtAddress, NeighborEvent, Timestamp, TopologyConfig, TopologyManager};
//!
//! let mut topology = TopologyManager::new(TopologyConfig::default())?;
//! let child = ExtAddress::from_u64(0x1234);
//! let challenge = Challenge::new(&[0x11; 8])?;
//!
//! topology.transition(child, NeighborEvent::ParentRequest(challenge), Timestamp::ZERO)?;
//! for event in topology.drain_events() {
//!     println!("{:?}", event);
//! }
//! # Ok::<(), topo_core::TopologyError>(())
//! ```

pub mod child;
pub mod config;
pub mod error;
pub mod indirect;
pub mod link_quality;
pub mod manager;
pub mod neighbor;
pub mod persist;
pub mod router;
pub mod types;

pub use child::{Child, ChildTable, HandshakeData, MAX_REQUESTED_TLVS};
pub use config::TopologyConfig;
pub use error::{Result, TopologyError};
pub use indirect::{IndirectFrame, IndirectQueue, TxOutcome, TxSecurity};
pub use link_quality::{LinkQuality, LinkQualityEstimator, HISTORY_DEPTH};
pub use manager::{NeighborRef, RemovalReason, TopologyEvent, TopologyManager};
pub use neighbor::{LinkState, Neighbor, NeighborEvent, NeighborEventKind, NeighborInfo, NeighborState};
pub use persist::{PersistedNeighbor, PersistedRole};
pub use router::{NextHop, Router, RouterTable, COST_INFINITE};
pub use types::{
    Challenge, DeviceMode, ExtAddress, FrameCounters, LinkCounters, RouterId, ShortAddress, Timestamp,
};
