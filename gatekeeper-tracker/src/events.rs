use std::collections::BTreeMap;

use tokio::sync::oneshot;

use gatekeeper_domain::device::KnownDevice;
use gatekeeper_domain::observation::Advertisement;

use crate::calibration::{CalibrationAction, CalibrationReply};
use crate::discovery_cache::DiscoveryEntry;

/// One outbound presence publication, fully resolved: the publisher only
/// formats topics and payloads from this.
#[derive(Debug, Clone, PartialEq)]
pub struct PresenceUpdate {
    pub device: KnownDevice,
    pub present: bool,
    /// Fused RSSI truncated to whole dBm.
    pub rssi: i32,
    pub room: String,
    pub distance: f64,
    /// Unix seconds of the newest sighting.
    pub last_seen: i64,
    /// Latest raw RSSI per satellite, stale sources included.
    pub raw_sources: BTreeMap<String, i32>,
}

/// Everything that can arrive on the engine queue. Observations and
/// health reports come from the bus dispatcher and the local scanner;
/// commands come from the admin surface.
#[derive(Debug)]
pub enum Inbound {
    Observation {
        sat_id: String,
        advertisement: Advertisement,
    },
    Health {
        sat_id: String,
        sensor: String,
        value: String,
    },
    Command(Command),
}

#[derive(Debug)]
pub enum Command {
    ReloadConfig,
    ClearDiscoveryCache,
    Calibrate {
        sat_id: String,
        action: CalibrationAction,
        reply: oneshot::Sender<CalibrationReply>,
    },
    DiscoverySnapshot {
        reply: oneshot::Sender<Vec<DiscoveryEntry>>,
    },
}
