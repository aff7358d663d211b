//! Indirect delivery to sleepy children
//!
//! A sleepy child keeps its receiver off and polls its parent for data.
//! Each child owns an [`IndirectQueue`]: at most one message is *active*
//! (the one handed to the radio on the next poll), the rest wait in a
//! bounded backlog.
//!
//! ## Retransmission
//!
//! 1. A message is promoted to active when nothing else is; it gets the next
//!    data sequence number and a snapshot of the frame counter and key id
//! 2. Every poll (re)transmits the active message with that same DSN and
//!    counter, so the child can tell a retransmission from a new message
//! 3. An ack clears it and promotes the next; after `max_tx_attempts`
//!    failures the message is dropped

use crate::error::{Result, TopologyError};
use std::collections::VecDeque;
use tracing::debug;

/// Frame security state supplied by the security layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TxSecurity {
    /// Next outgoing MAC frame counter
    pub frame_counter: u32,
    /// Key id in use
    pub key_id: u8,
}

impl TxSecurity {
    /// Take the current counter for a new message and advance it
    pub fn next(&mut self) -> TxSecurity {
        let snapshot = *self;
        self.frame_counter = self.frame_counter.wrapping_add(1);
        snapshot
    }
}

/// Message currently offered to the child
#[derive(Debug, Clone)]
struct ActiveMessage {
    payload: Vec<u8>,
    sequence: u8,
    security: TxSecurity,
}

/// What the radio should transmit in answer to a poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndirectFrame<'a> {
    /// Message payload
    pub payload: &'a [u8],
    /// MAC data sequence number, fixed across retransmissions
    pub sequence: u8,
    /// Frame counter snapshotted at promotion
    pub frame_counter: u32,
    /// Key id snapshotted at promotion
    pub key_id: u8,
    /// Attempt number of this transmission (1-based, 0 for a peek)
    pub attempt: u8,
}

/// Result of a transmission completion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOutcome {
    /// Acked; the next message (if any) was promoted
    Delivered,
    /// Failed; the message stays active for the next poll
    Retry,
    /// Failed for the last allowed time; the message was dropped
    Dropped,
    /// No transmission was in flight
    Ignored,
}

/// Per-child indirect mailbox
#[derive(Debug, Clone)]
pub struct IndirectQueue {
    active: Option<ActiveMessage>,
    backlog: VecDeque<Vec<u8>>,
    max_queued: usize,
    max_tx_attempts: u8,
    tx_attempts: u8,
    in_flight: bool,
    next_sequence: u8,
}

impl IndirectQueue {
    /// Create an empty queue
    pub fn new(max_queued: usize, max_tx_attempts: u8, initial_sequence: u8) -> Self {
        Self {
            active: None,
            backlog: VecDeque::with_capacity(max_queued),
            max_queued,
            max_tx_attempts,
            tx_attempts: 0,
            in_flight: false,
            next_sequence: initial_sequence,
        }
    }

    /// Queue a message. Returns `true` if it became the active message.
    pub fn enqueue(&mut self, payload: Vec<u8>, security: &mut TxSecurity) -> Result<bool> {
        if self.queued_count() >= self.max_queued {
            return Err(TopologyError::QueueFull);
        }
        self.backlog.push_back(payload);
        Ok(self.promote(security))
    }

    /// Handle a data poll. Returns the frame to transmit, if any.
    pub fn poll(&mut self) -> Option<IndirectFrame<'_>> {
        if self.in_flight {
            debug!("poll while indirect transmission in flight");
            return None;
        }
        self.active.as_ref()?;
        self.tx_attempts = self.tx_attempts.saturating_add(1);
        self.in_flight = true;
        self.frame(self.tx_attempts)
    }

    /// The frame the next poll would carry, without recording an attempt
    pub fn peek(&self) -> Option<IndirectFrame<'_>> {
        self.frame(0)
    }

    /// Handle the radio's completion for the in-flight transmission
    pub fn complete(&mut self, success: bool, security: &mut TxSecurity) -> TxOutcome {
        if !self.in_flight {
            return TxOutcome::Ignored;
        }
        self.in_flight = false;

        if success {
            self.retire();
            self.promote(security);
            TxOutcome::Delivered
        } else if self.tx_attempts >= self.max_tx_attempts {
            self.retire();
            self.promote(security);
            TxOutcome::Dropped
        } else {
            TxOutcome::Retry
        }
    }

    /// Drop all messages without side effects
    pub fn clear(&mut self) {
        self.active = None;
        self.backlog.clear();
        self.tx_attempts = 0;
        self.in_flight = false;
    }

    /// Messages held, including the active one
    pub fn queued_count(&self) -> usize {
        self.backlog.len() + usize::from(self.active.is_some())
    }

    /// Whether any message is waiting for the child
    pub fn has_pending(&self) -> bool {
        self.active.is_some()
    }

    /// Attempts made for the active message
    pub fn tx_attempts(&self) -> u8 {
        self.tx_attempts
    }

    /// Whether a transmission is awaiting its completion
    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    /// DSN the next promoted message will get
    pub fn next_sequence(&self) -> u8 {
        self.next_sequence
    }

    fn frame(&self, attempt: u8) -> Option<IndirectFrame<'_>> {
        self.active.as_ref().map(|m| IndirectFrame {
            payload: &m.payload,
            sequence: m.sequence,
            frame_counter: m.security.frame_counter,
            key_id: m.security.key_id,
            attempt,
        })
    }

    fn retire(&mut self) {
        self.active = None;
        self.tx_attempts = 0;
    }

    fn promote(&mut self, security: &mut TxSecurity) -> bool {
        if self.active.is_some() {
            return false;
        }
        let Some(payload) = self.backlog.pop_front() else {
            return false;
        };
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        self.tx_attempts = 0;
        self.active = Some(ActiveMessage {
            payload,
            sequence,
            security: security.next(),
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> (IndirectQueue, TxSecurity) {
        (
            IndirectQueue::new(4, 3, 5),
            TxSecurity {
                frame_counter: 100,
                key_id: 1,
            },
        )
    }

    #[test]
    fn test_first_enqueue_promotes() {
        let (mut q, mut sec) = queue();
        assert!(q.enqueue(vec![1], &mut sec).unwrap());
        assert!(!q.enqueue(vec![2], &mut sec).unwrap());
        assert_eq!(q.queued_count(), 2);

        let frame = q.peek().unwrap();
        assert_eq!(frame.payload, &[1]);
        assert_eq!(frame.sequence, 5);
        assert_eq!(frame.frame_counter, 100);
        assert_eq!(frame.attempt, 0);
    }

    #[test]
    fn test_queue_full_leaves_count_unchanged() {
        let (mut q, mut sec) = queue();
        for i in 0..4 {
            q.enqueue(vec![i], &mut sec).unwrap();
        }
        assert_eq!(q.enqueue(vec![9], &mut sec), Err(TopologyError::QueueFull));
        assert_eq!(q.queued_count(), 4);
    }

    #[test]
    fn test_ack_in_order_drains_queue() {
        let (mut q, mut sec) = queue();
        for i in 0..4u8 {
            q.enqueue(vec![i], &mut sec).unwrap();
        }
        let mut seen = Vec::new();
        while q.has_pending() {
            let frame = q.poll().unwrap();
            seen.push((frame.payload[0], frame.sequence));
            assert_eq!(q.complete(true, &mut sec), TxOutcome::Delivered);
        }
        assert_eq!(q.queued_count(), 0);
        assert_eq!(seen, vec![(0, 5), (1, 6), (2, 7), (3, 8)]);
    }

    #[test]
    fn test_retransmission_keeps_sequence_and_counter() {
        let (mut q, mut sec) = queue();
        q.enqueue(vec![1], &mut sec).unwrap();
        q.enqueue(vec![2], &mut sec).unwrap();

        let first = q.poll().map(|f| (f.sequence, f.frame_counter, f.attempt));
        assert_eq!(first, Some((5, 100, 1)));
        assert_eq!(q.complete(false, &mut sec), TxOutcome::Retry);

        let second = q.poll().map(|f| (f.sequence, f.frame_counter, f.attempt));
        assert_eq!(second, Some((5, 100, 2)));
        assert_eq!(q.complete(true, &mut sec), TxOutcome::Delivered);

        let next = q.peek().unwrap();
        assert_eq!(next.sequence, 6);
        assert!(next.frame_counter > 100);
        assert_eq!(q.tx_attempts(), 0);
    }

    #[test]
    fn test_max_attempts_drops_message() {
        let (mut q, mut sec) = queue();
        q.enqueue(vec![1], &mut sec).unwrap();
        q.enqueue(vec![2], &mut sec).unwrap();

        for _ in 0..2 {
            q.poll().unwrap();
            assert_eq!(q.complete(false, &mut sec), TxOutcome::Retry);
        }
        q.poll().unwrap();
        assert_eq!(q.complete(false, &mut sec), TxOutcome::Dropped);
        assert_eq!(q.queued_count(), 1);
        assert_eq!(q.peek().unwrap().payload, &[2]);
    }

    #[test]
    fn test_poll_while_in_flight() {
        let (mut q, mut sec) = queue();
        q.enqueue(vec![1], &mut sec).unwrap();
        assert!(q.poll().is_some());
        assert!(q.poll().is_none());
        assert_eq!(q.tx_attempts(), 1);
    }

    #[test]
    fn test_completion_without_transmission_ignored() {
        let (mut q, mut sec) = queue();
        assert_eq!(q.complete(true, &mut sec), TxOutcome::Ignored);
        q.enqueue(vec![1], &mut sec).unwrap();
        assert_eq!(q.complete(true, &mut sec), TxOutcome::Ignored);
        assert_eq!(q.queued_count(), 1);
    }

    #[test]
    fn test_sequence_wraps() {
        let mut sec = TxSecurity::default();
        let mut q = IndirectQueue::new(2, 1, 255);
        q.enqueue(vec![1], &mut sec).unwrap();
        q.enqueue(vec![2], &mut sec).unwrap();
        assert_eq!(q.poll().unwrap().sequence, 255);
        q.complete(true, &mut sec);
        assert_eq!(q.peek().unwrap().sequence, 0);
    }

    #[test]
    fn test_clear() {
        let (mut q, mut sec) = queue();
        q.enqueue(vec![1], &mut sec).unwrap();
        q.enqueue(vec![2], &mut sec).unwrap();
        q.poll();
        q.clear();
        assert_eq!(q.queued_count(), 0);
        assert!(!q.is_in_flight());
        assert_eq!(q.complete(true, &mut sec), TxOutcome::Ignored);
    }
}
