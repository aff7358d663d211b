//! Neighbor records and the link state machine
//!
//! A neighbor is any peer this node has direct radio-level knowledge of.
//! Both children and routers embed a [`Neighbor`] by value; the shared
//! [`NeighborInfo`] trait lets attach and forwarding logic treat them alike.
//!
//! ## Link states
//!
//! ```text
//!            Restore                ParentRequest              ChildIdRequest
//!  Invalid ─────────► Restored ─────────────────► ParentReq ─────────────────► ChildIdReq
//!     │                 │  │                                                       │
//!     │ LinkAccept      │  └──────────────── Attach ─────────────┐                 │ Attach
//!     ▼                 │ SendChildUpdateRequest                 ▼                 │
//!  Valid ◄──────────────┼───────────────────────────────────── Valid ◄─────────────┘
//!   │  ▲                ▼                                        ▲
//!   │  └── Attach ── ChildUpdateReq ◄── SendChildUpdateRequest ──┘
//!   │
//!   └── SendLinkRequest ──► LinkReq ── Attach / LinkAccept ──► Valid
//!
//!  any ── Remove ──► Invalid
//! ```
//!
//! The counters and the pending challenge are mutually exclusive for every
//! state except `LinkRequestSent`, which keeps the counters of the link it is
//! probing. [`LinkState`] carries exactly the data its state needs.

use crate::error::{Result, TopologyError};
use crate::link_quality::LinkQualityEstimator;
use crate::types::{Challenge, DeviceMode, ExtAddress, FrameCounters, LinkCounters, ShortAddress, Timestamp};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Neighbor link state (without the per-state data)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NeighborState {
    /// Slot is free
    Invalid,
    /// Rehydrated from persisted state, not yet re-handshaken
    Restored,
    /// Received a Parent Request
    ParentRequestReceived,
    /// Received a Child ID Request
    ChildIdRequestReceived,
    /// Sent a Link Request to probe this neighbor
    LinkRequestSent,
    /// Sent a Child Update Request trying to restore the child
    ChildUpdateRequestSent,
    /// Link is valid
    Valid,
}

impl NeighborState {
    /// Every state, for exhaustive iteration
    pub const ALL: [NeighborState; 7] = [
        NeighborState::Invalid,
        NeighborState::Restored,
        NeighborState::ParentRequestReceived,
        NeighborState::ChildIdRequestReceived,
        NeighborState::LinkRequestSent,
        NeighborState::ChildUpdateRequestSent,
        NeighborState::Valid,
    ];

    /// Whether messages may be exchanged with the neighbor in this state.
    ///
    /// True for a valid link and for a link being restored or re-validated.
    pub fn is_valid_or_restoring(self) -> bool {
        matches!(
            self,
            NeighborState::Valid | NeighborState::Restored | NeighborState::ChildUpdateRequestSent
        )
    }

    /// Whether an attach handshake is in progress
    pub fn is_attaching(self) -> bool {
        matches!(
            self,
            NeighborState::ParentRequestReceived | NeighborState::ChildIdRequestReceived
        )
    }
}

/// Protocol event driving a link state transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NeighborEvent {
    /// Record rehydrated from persisted state
    Restore(LinkCounters),
    /// Peer sent a Parent Request carrying a challenge
    ParentRequest(Challenge),
    /// Peer sent a Child ID Request; counters become authoritative
    ChildIdRequest(LinkCounters),
    /// Handshake or re-validation completed
    Attach,
    /// This node probes a valid neighbor
    SendLinkRequest(Challenge),
    /// This node tries to re-validate a child
    SendChildUpdateRequest,
    /// Peer accepted a link, supplying fresh counters
    LinkAccept(LinkCounters),
    /// Explicit removal or failure
    Remove,
}

/// Data-less discriminant of [`NeighborEvent`], used in errors and logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NeighborEventKind {
    /// See [`NeighborEvent::Restore`]
    Restore,
    /// See [`NeighborEvent::ParentRequest`]
    ParentRequest,
    /// See [`NeighborEvent::ChildIdRequest`]
    ChildIdRequest,
    /// See [`NeighborEvent::Attach`]
    Attach,
    /// See [`NeighborEvent::SendLinkRequest`]
    SendLinkRequest,
    /// See [`NeighborEvent::SendChildUpdateRequest`]
    SendChildUpdateRequest,
    /// See [`NeighborEvent::LinkAccept`]
    LinkAccept,
    /// See [`NeighborEvent::Remove`]
    Remove,
}

impl NeighborEvent {
    /// The event's kind
    pub fn kind(&self) -> NeighborEventKind {
        match self {
            NeighborEvent::Restore(_) => NeighborEventKind::Restore,
            NeighborEvent::ParentRequest(_) => NeighborEventKind::ParentRequest,
            NeighborEvent::ChildIdRequest(_) => NeighborEventKind::ChildIdRequest,
            NeighborEvent::Attach => NeighborEventKind::Attach,
            NeighborEvent::SendLinkRequest(_) => NeighborEventKind::SendLinkRequest,
            NeighborEvent::SendChildUpdateRequest => NeighborEventKind::SendChildUpdateRequest,
            NeighborEvent::LinkAccept(_) => NeighborEventKind::LinkAccept,
            NeighborEvent::Remove => NeighborEventKind::Remove,
        }
    }
}

/// Link state together with the data that state makes meaningful
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    /// Slot is free
    #[default]
    Invalid,
    /// Restored; counters trusted, link tentative
    Restored(LinkCounters),
    /// Parent Request received; challenge to answer
    ParentRequestReceived(Challenge),
    /// Child ID Request received; counters authoritative
    ChildIdRequestReceived(LinkCounters),
    /// Probing an established link
    LinkRequestSent {
        /// Counters of the link being probed
        counters: LinkCounters,
        /// Challenge sent in the Link Request
        challenge: Challenge,
    },
    /// Re-validating a child
    ChildUpdateRequestSent(LinkCounters),
    /// Link is valid
    Valid(LinkCounters),
}

impl LinkState {
    /// The state discriminant
    pub fn state(&self) -> NeighborState {
        match self {
            LinkState::Invalid => NeighborState::Invalid,
            LinkState::Restored(_) => NeighborState::Restored,
            LinkState::ParentRequestReceived(_) => NeighborState::ParentRequestReceived,
            LinkState::ChildIdRequestReceived(_) => NeighborState::ChildIdRequestReceived,
            LinkState::LinkRequestSent { .. } => NeighborState::LinkRequestSent,
            LinkState::ChildUpdateRequestSent(_) => NeighborState::ChildUpdateRequestSent,
            LinkState::Valid(_) => NeighborState::Valid,
        }
    }

    /// Authoritative counters, if the state carries them
    pub fn counters(&self) -> Option<&LinkCounters> {
        match self {
            LinkState::Restored(c)
            | LinkState::ChildIdRequestReceived(c)
            | LinkState::ChildUpdateRequestSent(c)
            | LinkState::Valid(c)
            | LinkState::LinkRequestSent { counters: c, .. } => Some(c),
            LinkState::Invalid | LinkState::ParentRequestReceived(_) => None,
        }
    }

    fn counters_mut(&mut self) -> Option<&mut LinkCounters> {
        match self {
            LinkState::Restored(c)
            | LinkState::ChildIdRequestReceived(c)
            | LinkState::ChildUpdateRequestSent(c)
            | LinkState::Valid(c)
            | LinkState::LinkRequestSent { counters: c, .. } => Some(c),
            LinkState::Invalid | LinkState::ParentRequestReceived(_) => None,
        }
    }

    /// Pending challenge, if the state carries one
    pub fn challenge(&self) -> Option<&Challenge> {
        match self {
            LinkState::ParentRequestReceived(c) => Some(c),
            LinkState::LinkRequestSent { challenge, .. } => Some(challenge),
            _ => None,
        }
    }

    /// Compute the state `event` leads to, leaving `self` untouched.
    pub fn apply(&self, event: NeighborEvent) -> Result<LinkState> {
        use LinkState as S;
        use NeighborEvent as E;

        let next = match (*self, event) {
            (_, E::Remove) => S::Invalid,
            (S::Invalid, E::Restore(counters)) => S::Restored(counters),
            (S::Invalid | S::Restored(_), E::ParentRequest(challenge)) => {
                S::ParentRequestReceived(challenge)
            }
            (S::ParentRequestReceived(_), E::ChildIdRequest(counters)) => {
                S::ChildIdRequestReceived(counters)
            }
            (
                S::ChildIdRequestReceived(counters)
                | S::Restored(counters)
                | S::ChildUpdateRequestSent(counters)
                | S::LinkRequestSent { counters, .. },
                E::Attach,
            ) => S::Valid(counters),
            (S::Valid(counters), E::SendLinkRequest(challenge)) => {
                S::LinkRequestSent { counters, challenge }
            }
            (S::Valid(counters) | S::Restored(counters), E::SendChildUpdateRequest) => {
                S::ChildUpdateRequestSent(counters)
            }
            (S::Invalid | S::LinkRequestSent { .. }, E::LinkAccept(counters)) => S::Valid(counters),
            (from, event) => {
                return Err(TopologyError::InvalidTransition {
                    from: from.state(),
                    event: event.kind(),
                })
            }
        };
        Ok(next)
    }
}

/// Uniform read access to the neighbor part of child and router records
pub trait NeighborInfo {
    /// The embedded neighbor record
    fn neighbor(&self) -> &Neighbor;

    /// Hardware address
    fn ext_address(&self) -> ExtAddress {
        self.neighbor().ext_address
    }

    /// Current link state
    fn state(&self) -> NeighborState {
        self.neighbor().state()
    }

    /// See [`NeighborState::is_valid_or_restoring`]
    fn is_state_valid_or_restoring(&self) -> bool {
        self.state().is_valid_or_restoring()
    }

    /// Smoothed link quality estimate
    fn link_info(&self) -> &LinkQualityEstimator {
        &self.neighbor().link_info
    }
}

/// Link-level state kept for every neighbor
#[derive(Debug, Clone)]
pub struct Neighbor {
    /// Hardware address; meaningful only when not `Invalid`
    pub ext_address: ExtAddress,
    /// Time the last frame from this neighbor was received
    pub last_heard: Timestamp,
    link: LinkState,
    /// Declared capabilities
    pub mode: DeviceMode,
    /// Key sequence the neighbor is using
    pub key_sequence: u32,
    /// Consecutive transmission failures
    pub link_failures: u8,
    /// Link quality estimate
    pub link_info: LinkQualityEstimator,
    /// A data poll was received and not yet served
    pub data_request: bool,
}

impl Neighbor {
    /// Create a free (`Invalid`) record
    pub fn new(noise_floor: i8) -> Self {
        Self {
            ext_address: ExtAddress::default(),
            last_heard: Timestamp::ZERO,
            link: LinkState::Invalid,
            mode: DeviceMode::NONE,
            key_sequence: 0,
            link_failures: 0,
            link_info: LinkQualityEstimator::new(noise_floor),
            data_request: false,
        }
    }

    /// Link state discriminant
    pub fn state(&self) -> NeighborState {
        self.link.state()
    }

    /// Link state with its data
    pub fn link(&self) -> &LinkState {
        &self.link
    }

    /// Whether the record is free for reuse
    pub fn is_free(&self) -> bool {
        self.state() == NeighborState::Invalid
    }

    /// See [`NeighborState::is_valid_or_restoring`]
    pub fn is_state_valid_or_restoring(&self) -> bool {
        self.state().is_valid_or_restoring()
    }

    /// Short address, once counters are authoritative
    pub fn short_address(&self) -> Option<ShortAddress> {
        self.link.counters().map(|c| c.short_address)
    }

    /// Apply a protocol event. On error the record is unchanged.
    ///
    /// Returns the previous state.
    pub fn apply(&mut self, event: NeighborEvent) -> Result<NeighborState> {
        let next = self.link.apply(event)?;
        let prev = self.state();
        self.link = next;
        if next.state() == NeighborState::Invalid {
            self.reset();
        }
        Ok(prev)
    }

    /// Return the record to `Invalid`, from any state
    pub fn remove(&mut self) {
        self.reset();
    }

    /// Claim a free record for a new peer
    pub(crate) fn claim(&mut self, ext_address: ExtAddress, now: Timestamp) {
        debug_assert!(self.is_free());
        self.reset();
        self.ext_address = ext_address;
        self.last_heard = now;
    }

    /// Record a received frame: freshness, signal sample and counters.
    ///
    /// The stored counters are the next ones expected from the peer. A frame
    /// below them, including an exact replay of the last accepted frame, is
    /// rejected and not recorded at all. A newer key sequence restarts the
    /// frame counters.
    pub fn record_frame(&mut self, rss: i8, counters: &FrameCounters, now: Timestamp) -> Result<()> {
        let key_sequence = self.key_sequence;
        if let Some(stored) = self.link.counters() {
            if counters.key_sequence < key_sequence {
                return Err(TopologyError::StaleFrameCounter);
            }
            if counters.key_sequence == key_sequence {
                let mle_stale = matches!(counters.mle_frame_counter, Some(mle) if mle < stored.mle_frame_counter);
                if counters.link_frame_counter < stored.link_frame_counter || mle_stale {
                    return Err(TopologyError::StaleFrameCounter);
                }
            }
        }

        if let Some(stored) = self.link.counters_mut() {
            stored.link_frame_counter = counters.link_frame_counter.saturating_add(1);
            if let Some(mle) = counters.mle_frame_counter {
                stored.mle_frame_counter = mle.saturating_add(1);
            }
        }
        self.key_sequence = self.key_sequence.max(counters.key_sequence);
        self.link_info.add_sample(rss);
        self.last_heard = now;
        Ok(())
    }

    /// Time since the last received frame
    pub fn time_since_heard(&self, now: Timestamp) -> Duration {
        now.saturating_since(self.last_heard)
    }

    /// Check if the neighbor has been silent longer than `timeout`
    pub fn is_stale(&self, now: Timestamp, timeout: Duration) -> bool {
        self.time_since_heard(now) > timeout
    }

    fn reset(&mut self) {
        self.link = LinkState::Invalid;
        self.ext_address = ExtAddress::default();
        self.last_heard = Timestamp::ZERO;
        self.mode = DeviceMode::NONE;
        self.key_sequence = 0;
        self.link_failures = 0;
        self.link_info.clear();
        self.data_request = false;
    }
}

impl NeighborInfo for Neighbor {
    fn neighbor(&self) -> &Neighbor {
        self
    }
}
