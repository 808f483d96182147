use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};

use gatekeeper_domain::identifier::DeviceId;

/// Room literal published while a device is away.
pub const NOT_HOME_ROOM: &str = "not_home";
/// Room literal before a device has ever been placed.
pub const UNKNOWN_ROOM: &str = "unknown";

/// What one satellite currently knows about one device.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceReading {
    pub raw_rssi: i32,
    pub smooth_rssi: f64,
    pub distance: f64,
    pub last_seen: DateTime<Utc>,
    pub room_name: String,
}

/// Fused presence state for one tracked device. Source entries are never
/// physically removed; zoning ignores the ones past the absence timeout.
#[derive(Debug, Clone)]
pub struct DeviceState {
    pub identifier: DeviceId,
    pub present: bool,
    pub room: String,
    pub rssi: f64,
    pub distance: f64,
    pub last_seen: DateTime<Utc>,
    pub last_published: DateTime<Utc>,
    pub sources: BTreeMap<String, SourceReading>,
}

impl DeviceState {
    fn new(identifier: DeviceId) -> DeviceState {
        DeviceState {
            identifier,
            present: false,
            room: UNKNOWN_ROOM.to_string(),
            rssi: -100.0,
            distance: -1.0,
            last_seen: DateTime::UNIX_EPOCH,
            last_published: DateTime::UNIX_EPOCH,
            sources: BTreeMap::new(),
        }
    }
}

/// Container for per-device fused state. Policy lives in the zoning
/// arbiter and the engine; this only holds and mutates data.
#[derive(Debug, Default)]
pub struct StateStore {
    devices: HashMap<DeviceId, DeviceState>,
}

impl StateStore {
    pub fn new() -> StateStore {
        StateStore::default()
    }

    pub fn get_or_init(&mut self, id: &DeviceId) -> &mut DeviceState {
        self.devices
            .entry(id.clone())
            .or_insert_with(|| DeviceState::new(id.clone()))
    }

    pub fn get(&self, id: &DeviceId) -> Option<&DeviceState> {
        self.devices.get(id)
    }

    pub fn get_mut(&mut self, id: &DeviceId) -> Option<&mut DeviceState> {
        self.devices.get_mut(id)
    }

    /// Record a fresh reading from one satellite. Keeps
    /// `state.last_seen == max(sources[*].last_seen)`.
    pub fn update_source(&mut self, id: &DeviceId, sat_id: &str, reading: SourceReading) {
        let state = self.get_or_init(id);
        if reading.last_seen > state.last_seen {
            state.last_seen = reading.last_seen;
        }
        state.sources.insert(sat_id.to_string(), reading);
    }

    pub fn set_room(&mut self, id: &DeviceId, room: &str, rssi: f64, distance: f64) {
        if let Some(state) = self.devices.get_mut(id) {
            state.room = room.to_string();
            state.rssi = rssi;
            state.distance = distance;
            state.present = true;
        }
    }

    pub fn mark_absent(&mut self, id: &DeviceId) {
        if let Some(state) = self.devices.get_mut(id) {
            state.present = false;
            state.room = NOT_HOME_ROOM.to_string();
            state.distance = -1.0;
        }
    }

    pub fn set_last_published(&mut self, id: &DeviceId, at: DateTime<Utc>) {
        if let Some(state) = self.devices.get_mut(id) {
            state.last_published = at;
        }
    }

    pub fn ids(&self) -> Vec<DeviceId> {
        self.devices.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
