//! Records exchanged with the external persistence layer
//!
//! Only what is needed to bring a neighbor back in `Restored` state is kept:
//! identity, short address, frame counters and key sequence, plus the role
//! specific fields. Records are read once at startup and produced on demand
//! by [`TopologyManager::snapshot`](crate::TopologyManager::snapshot).

use crate::types::{DeviceMode, ExtAddress, LinkCounters, RouterId};
use serde::{Deserialize, Serialize};

/// Role-specific part of a persisted neighbor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PersistedRole {
    /// Attached child
    Child {
        /// Negotiated child timeout (seconds)
        timeout: u32,
        /// Declared device mode
        mode: DeviceMode,
    },
    /// Neighboring router
    Router {
        /// Router id the neighbor holds
        router_id: RouterId,
    },
}

/// A neighbor as stored across restarts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedNeighbor {
    /// Hardware address
    pub ext_address: ExtAddress,
    /// Last accepted frame counters and assigned short address
    pub counters: LinkCounters,
    /// Key sequence in use
    #[serde(default)]
    pub key_sequence: u32,
    /// Child or router specific fields
    pub role: PersistedRole,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ShortAddress;

    #[test]
    fn test_child_record_json() {
        let json = r#"{
            "ext_address": "00000000000000a1",
            "counters": { "link_frame_counter": 7, "mle_frame_counter": 3, "short_address": 1025 },
            "role": { "kind": "child", "timeout": 240, "mode": 4 }
        }"#;
        let record: PersistedNeighbor = serde_json::from_str(json).unwrap();
        assert_eq!(record.ext_address, ExtAddress::from_u64(0xa1));
        assert_eq!(record.counters.short_address, ShortAddress(0x0401));
        assert_eq!(record.key_sequence, 0);
        assert_eq!(
            record.role,
            PersistedRole::Child {
                timeout: 240,
                mode: DeviceMode::SECURE_DATA_REQUESTS,
            }
        );
    }

    #[test]
    fn test_router_record_rejects_bad_id() {
        let json = r#"{
            "ext_address": "00000000000000b2",
            "counters": { "link_frame_counter": 0, "mle_frame_counter": 0, "short_address": 0 },
            "role": { "kind": "router", "router_id": 70 }
        }"#;
        assert!(serde_json::from_str::<PersistedNeighbor>(json).is_err());
    }
}
