//! Identity and small value types shared by the topology tables
//!
//! The radio and attach layers hand the core already-parsed fields. These
//! types keep each field inside the range the protocol allows, so a
//! bad value is rejected where it enters rather than stored silently.

use crate::error::{Result, TopologyError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::BitOr;
use std::str::FromStr;
use std::time::Duration;

/// IEEE 802.15.4 extended (64-bit) hardware address
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ExtAddress([u8; 8]);

impl ExtAddress {
    /// Create an address from 8 bytes
    pub const fn from_bytes(bytes: [u8; 8]) -> Self {
        ExtAddress(bytes)
    }

    /// Create an address from a u64 (big-endian byte order)
    pub const fn from_u64(value: u64) -> Self {
        ExtAddress(value.to_be_bytes())
    }

    /// Convert to u64
    pub fn to_u64(&self) -> u64 {
        u64::from_be_bytes(self.0)
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }
}

impl fmt::Debug for ExtAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ExtAddress({})", self)
    }
}

impl fmt::Display for ExtAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl FromStr for ExtAddress {
    type Err = TopologyError;

    /// Parse 16 hex digits, as produced by `Display`
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || TopologyError::OutOfRange {
            field: "ext address",
            value: s.len() as u32,
        };
        if s.len() != 16 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(invalid());
        }
        u64::from_str_radix(s, 16)
            .map(ExtAddress::from_u64)
            .map_err(|_| invalid())
    }
}

impl TryFrom<String> for ExtAddress {
    type Error = TopologyError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<ExtAddress> for String {
    fn from(addr: ExtAddress) -> String {
        addr.to_string()
    }
}

/// 16-bit short address (RLOC16) assigned to an attached neighbor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ShortAddress(pub u16);

impl ShortAddress {
    /// Address used before one has been assigned
    pub const INVALID: ShortAddress = ShortAddress(0xfffe);

    /// Router id encoded in the upper six bits
    pub fn router_id(&self) -> u8 {
        (self.0 >> 10) as u8
    }

    /// Whether this address belongs to a router rather than a child
    pub fn is_router(&self) -> bool {
        self.0 & 0x01ff == 0
    }
}

impl fmt::Display for ShortAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04x}", self.0)
    }
}

/// Router identifier, `0..=MAX`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct RouterId(u8);

impl RouterId {
    /// Router id 0
    pub const ZERO: RouterId = RouterId(0);

    /// Largest valid router id
    pub const MAX: u8 = 62;

    /// Number of distinct router ids
    pub const COUNT: usize = Self::MAX as usize + 1;

    /// Create a router id, rejecting values above [`RouterId::MAX`]
    pub fn new(id: u8) -> Result<Self> {
        if id > Self::MAX {
            return Err(TopologyError::InvalidRouterId(id));
        }
        Ok(RouterId(id))
    }

    /// Raw id value
    pub fn get(&self) -> u8 {
        self.0
    }

    pub(crate) fn index(&self) -> usize {
        self.0 as usize
    }

    /// Short address of the router itself
    pub fn short_address(&self) -> ShortAddress {
        ShortAddress((self.0 as u16) << 10)
    }
}

impl TryFrom<u8> for RouterId {
    type Error = TopologyError;

    fn try_from(id: u8) -> Result<Self> {
        RouterId::new(id)
    }
}

impl From<RouterId> for u8 {
    fn from(id: RouterId) -> u8 {
        id.0
    }
}

impl fmt::Display for RouterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic time in milliseconds, supplied by the caller's clock
///
/// The core never reads a clock itself; every time-dependent operation
/// takes the current `Timestamp` so timer handling stays deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Zero timestamp
    pub const ZERO: Timestamp = Timestamp(0);

    /// Create a timestamp from milliseconds
    #[inline]
    pub const fn from_millis(ms: u64) -> Self {
        Timestamp(ms)
    }

    /// Create a timestamp from seconds
    #[inline]
    pub const fn from_secs(secs: u64) -> Self {
        Timestamp(secs.saturating_mul(1000))
    }

    /// Milliseconds since the clock's epoch
    #[inline]
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    /// Time elapsed since `earlier`, zero if `earlier` is in the future
    pub fn saturating_since(self, earlier: Timestamp) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }

    /// Saturating addition of a duration
    pub fn saturating_add(self, d: Duration) -> Timestamp {
        let ms = u64::try_from(d.as_millis()).unwrap_or(u64::MAX);
        Timestamp(self.0.saturating_add(ms))
    }
}

/// Maximum challenge length carried by an MLE challenge TLV
pub const MAX_CHALLENGE_LEN: usize = 8;

/// Handshake challenge (random nonce) of up to [`MAX_CHALLENGE_LEN`] bytes
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Challenge {
    bytes: [u8; MAX_CHALLENGE_LEN],
    len: u8,
}

impl Challenge {
    /// Copy a challenge, rejecting input longer than the TLV maximum
    pub fn new(value: &[u8]) -> Result<Self> {
        if value.len() > MAX_CHALLENGE_LEN {
            return Err(TopologyError::OutOfRange {
                field: "challenge",
                value: value.len() as u32,
            });
        }
        let mut bytes = [0u8; MAX_CHALLENGE_LEN];
        bytes[..value.len()].copy_from_slice(value);
        Ok(Self {
            bytes,
            len: value.len() as u8,
        })
    }

    /// The challenge bytes
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    /// Challenge length in bytes
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// Whether the challenge is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl fmt::Debug for Challenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Challenge(")?;
        for b in self.as_slice() {
            write!(f, "{:02x}", b)?;
        }
        write!(f, ")")
    }
}

/// MLE device mode: the capabilities a peer declares when attaching
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct DeviceMode(u8);

impl DeviceMode {
    /// No capabilities (sleepy minimal device)
    pub const NONE: DeviceMode = DeviceMode(0);
    /// Receiver stays on while idle; no indirect delivery needed
    pub const RX_ON_WHEN_IDLE: DeviceMode = DeviceMode(0x08);
    /// Data requests are secured at the MAC layer
    pub const SECURE_DATA_REQUESTS: DeviceMode = DeviceMode(0x04);
    /// Full Thread device (router capable)
    pub const FULL_THREAD_DEVICE: DeviceMode = DeviceMode(0x02);
    /// Wants the full network data set rather than the stable subset
    pub const FULL_NETWORK_DATA: DeviceMode = DeviceMode(0x01);

    const MASK: u8 = 0x0f;

    /// Create a mode from raw bits, rejecting anything outside the low nibble
    pub fn from_bits(bits: u8) -> Result<Self> {
        if bits & !Self::MASK != 0 {
            return Err(TopologyError::OutOfRange {
                field: "device mode",
                value: bits as u32,
            });
        }
        Ok(DeviceMode(bits))
    }

    /// Raw bits
    pub fn bits(&self) -> u8 {
        self.0
    }

    /// Check if a capability flag is set
    pub fn contains(&self, other: DeviceMode) -> bool {
        (self.0 & other.0) == other.0
    }

    /// Whether the peer keeps its receiver on
    pub fn is_rx_on_when_idle(&self) -> bool {
        self.contains(Self::RX_ON_WHEN_IDLE)
    }

    /// Whether the peer sleeps and must be served indirectly
    pub fn is_sleepy(&self) -> bool {
        !self.is_rx_on_when_idle()
    }

    /// Whether the peer is a full Thread device
    pub fn is_full_thread_device(&self) -> bool {
        self.contains(Self::FULL_THREAD_DEVICE)
    }
}

impl BitOr for DeviceMode {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        DeviceMode(self.0 | rhs.0)
    }
}

impl TryFrom<u8> for DeviceMode {
    type Error = TopologyError;

    fn try_from(bits: u8) -> Result<Self> {
        DeviceMode::from_bits(bits)
    }
}

impl From<DeviceMode> for u8 {
    fn from(mode: DeviceMode) -> u8 {
        mode.0
    }
}

/// Counters that become authoritative once a link is established
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LinkCounters {
    /// Next MAC frame counter expected from the peer
    pub link_frame_counter: u32,
    /// Next MLE frame counter expected from the peer
    pub mle_frame_counter: u32,
    /// Short address assigned to the peer
    pub short_address: ShortAddress,
}

/// Security counters carried by a received frame, already verified by the
/// security layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameCounters {
    /// Key sequence the frame was secured with
    pub key_sequence: u32,
    /// MAC frame counter
    pub link_frame_counter: u32,
    /// MLE frame counter, present only on MLE frames
    pub mle_frame_counter: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_router_id_range() {
        assert!(RouterId::new(0).is_ok());
        assert_eq!(RouterId::new(62).unwrap().get(), 62);
        assert!(matches!(
            RouterId::new(63),
            Err(TopologyError::InvalidRouterId(63))
        ));
        assert_eq!(RouterId::new(3).unwrap().short_address(), ShortAddress(0x0c00));
    }

    #[test]
    fn test_device_mode_validation() {
        let mode = DeviceMode::from_bits(0x0b).unwrap();
        assert!(mode.is_rx_on_when_idle());
        assert!(mode.is_full_thread_device());
        assert!(!mode.is_sleepy());
        assert!(DeviceMode::from_bits(0x10).is_err());
        assert_eq!(
            DeviceMode::RX_ON_WHEN_IDLE | DeviceMode::FULL_NETWORK_DATA,
            DeviceMode::from_bits(0x09).unwrap()
        );
    }

    #[test]
    fn test_challenge_bounds() {
        let c = Challenge::new(&[1, 2, 3]).unwrap();
        assert_eq!(c.as_slice(), &[1, 2, 3]);
        assert_eq!(c.len(), 3);
        assert!(Challenge::new(&[0u8; 9]).is_err());
    }

    #[test]
    fn test_ext_address_display() {
        let addr = ExtAddress::from_u64(0x1122_3344_5566_7788);
        assert_eq!(addr.to_string(), "1122334455667788");
        assert_eq!(addr.to_u64(), 0x1122_3344_5566_7788);
        assert_eq!("1122334455667788".parse::<ExtAddress>().unwrap(), addr);
        assert!("+122334455667788".parse::<ExtAddress>().is_err());
        assert!("1122".parse::<ExtAddress>().is_err());
    }

    #[test]
    fn test_timestamp_arithmetic() {
        let t = Timestamp::from_secs(10);
        let later = t.saturating_add(Duration::from_millis(1500));
        assert_eq!(later.as_millis(), 11_500);
        assert_eq!(later.saturating_since(t), Duration::from_millis(1500));
        assert_eq!(t.saturating_since(later), Duration::ZERO);
    }

    #[test]
    fn test_short_address_roles() {
        assert!(ShortAddress(0x0400).is_router());
        assert!(!ShortAddress(0x0401).is_router());
        assert_eq!(ShortAddress(0x0401).router_id(), 1);
    }
}
