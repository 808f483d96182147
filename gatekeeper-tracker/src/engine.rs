use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use gatekeeper_config::ConfigStore;
use gatekeeper_domain::device::KnownDevice;
use gatekeeper_domain::identifier::DeviceId;
use gatekeeper_domain::observation::Advertisement;
use gatekeeper_domain::signal::{SignalBuffer, estimate_distance};

use crate::HUB_SATELLITE_ID;
use crate::calibration::{CalibrationAction, CalibrationReply, CalibrationSessions, RecentSignal};
use crate::discovery_cache::{DiscoveryCache, DiscoveryEntry};
use crate::events::PresenceUpdate;
use crate::registry::SatelliteRegistry;
use crate::state::{SourceReading, StateStore};
use crate::zoning::{self, PendingSwitch, ZoningParams, age_secs};

/// Health sensor readings reported by one satellite.
#[derive(Debug, Clone, Default)]
pub struct SatelliteStats {
    pub sensors: BTreeMap<String, String>,
    pub last_health_update: Option<DateTime<Utc>>,
}

/// The signal-fusion and zoning engine. Owns every cache the pipeline
/// touches; all methods are synchronous and take the current time as an
/// argument, so one observation is always processed to completion before
/// the next and tests control the clock.
pub struct Engine {
    store: Arc<ConfigStore>,
    known_devices: HashMap<DeviceId, KnownDevice>,
    /// Seconds without any sighting before a present device departs.
    timeout_interval: f64,
    zoning_params: ZoningParams,
    state: StateStore,
    pending: HashMap<DeviceId, Option<PendingSwitch>>,
    buffers: HashMap<(String, DeviceId), SignalBuffer>,
    registry: SatelliteRegistry,
    discovery: DiscoveryCache,
    recent_signals: HashMap<String, RecentSignal>,
    calibration: CalibrationSessions,
    satellite_stats: HashMap<String, SatelliteStats>,
}

impl Engine {
    pub fn new(store: Arc<ConfigStore>) -> Engine {
        let registry = SatelliteRegistry::new(store.clone());
        let mut engine = Engine {
            store,
            known_devices: HashMap::new(),
            timeout_interval: 45.0,
            zoning_params: ZoningParams::default(),
            state: StateStore::new(),
            pending: HashMap::new(),
            buffers: HashMap::new(),
            registry,
            discovery: DiscoveryCache::new(),
            recent_signals: HashMap::new(),
            calibration: CalibrationSessions::new(),
            satellite_stats: HashMap::new(),
        };
        engine.reload_config();
        engine
    }

    /// Swap in the current device list and settings. Runs between queue
    /// events, so it can never interleave with an observation.
    pub fn reload_config(&mut self) {
        let mut devices = HashMap::new();
        for record in self.store.list_devices() {
            match record.device_id() {
                Some(id) => {
                    devices.insert(id, record);
                }
                None => warn!(alias = %record.alias, "device record without identifier, skipping"),
            }
        }
        self.known_devices = devices;
        self.timeout_interval = self.store.load_settings().beacon_expiration_secs() as f64;
        self.registry.reload();
        info!(devices = self.known_devices.len(), "configuration loaded");
    }

    pub fn set_timeout_interval(&mut self, secs: f64) {
        self.timeout_interval = secs;
    }

    pub fn set_zoning_params(&mut self, params: ZoningParams) {
        self.zoning_params = params;
    }

    pub fn known_devices(&self) -> impl Iterator<Item = &KnownDevice> {
        self.known_devices.values()
    }

    /// Route one observation from satellite `sat_id` through the pipeline.
    /// Returns a publication when zoning decided one is due.
    pub fn ingest(
        &mut self,
        sat_id: &str,
        advertisement: &Advertisement,
        now: DateTime<Utc>,
    ) -> Option<PresenceUpdate> {
        // The calibration cache always takes the newest sample.
        self.recent_signals.insert(
            sat_id.to_string(),
            RecentSignal {
                rssi: advertisement.rssi,
                at: now,
            },
        );

        self.discovery.observe(sat_id, advertisement, now);
        self.registry.touch(sat_id, now);

        if !self.known_devices.contains_key(&advertisement.identifier) {
            return None;
        }

        self.state.get_or_init(&advertisement.identifier);

        let (room_name, ref_rssi) = self.registry.lookup(sat_id);
        let buffer = self
            .buffers
            .entry((sat_id.to_string(), advertisement.identifier.clone()))
            .or_default();
        let smooth_rssi = buffer.add(advertisement.rssi);
        let distance = estimate_distance(smooth_rssi, ref_rssi);

        self.state.update_source(
            &advertisement.identifier,
            sat_id,
            SourceReading {
                raw_rssi: advertisement.rssi,
                smooth_rssi,
                distance,
                last_seen: now,
                room_name,
            },
        );

        self.evaluate_zone(&advertisement.identifier, now)
    }

    /// An advertisement seen by the hub's own radio.
    pub fn ingest_local(
        &mut self,
        advertisement: &Advertisement,
        now: DateTime<Utc>,
    ) -> Option<PresenceUpdate> {
        self.ingest(HUB_SATELLITE_ID, advertisement, now)
    }

    /// A satellite health sensor (WiFi, uptime, ...). Stored for the admin
    /// surface; also counts as a sighting for registration freshness.
    pub fn health(&mut self, sat_id: &str, sensor: &str, value: &str, now: DateTime<Utc>) {
        let stats = self.satellite_stats.entry(sat_id.to_string()).or_default();
        stats.sensors.insert(sensor.to_string(), value.to_string());
        stats.last_health_update = Some(now);
        self.registry.touch(sat_id, now);
    }

    pub fn satellite_stats(&self, sat_id: &str) -> Option<&SatelliteStats> {
        self.satellite_stats.get(sat_id)
    }

    /// One maintenance tick: time out departed devices, re-arbitrate any
    /// device whose current room has gone quiet.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> Vec<PresenceUpdate> {
        let mut updates = Vec::new();
        for id in self.state.ids() {
            let Some(state) = self.state.get(&id) else {
                continue;
            };
            if !state.present {
                continue;
            }
            if age_secs(now, state.last_seen) > self.timeout_interval {
                let alias = self
                    .known_devices
                    .get(&id)
                    .map_or_else(|| id.to_string(), |d| d.alias.clone());
                info!(device = %alias, "departure");
                self.state.mark_absent(&id);
                updates.extend(self.emit(&id, now));
                continue;
            }
            let room_alive = state.sources.values().any(|reading| {
                reading.room_name == state.room
                    && age_secs(now, reading.last_seen) < self.zoning_params.absence_timeout
            });
            if !room_alive {
                updates.extend(self.evaluate_zone(&id, now));
            }
        }
        updates
    }

    pub fn calibrate(
        &mut self,
        sat_id: &str,
        action: CalibrationAction,
        now: DateTime<Utc>,
    ) -> CalibrationReply {
        match action {
            CalibrationAction::Start => self.calibration.start(sat_id, now),
            CalibrationAction::Status => {
                self.calibration
                    .status(sat_id, self.recent_signals.get(sat_id), now)
            }
        }
    }

    pub fn discovery_snapshot(&self) -> Vec<DiscoveryEntry> {
        self.discovery.snapshot()
    }

    pub fn clear_discovery_cache(&mut self) {
        self.discovery.clear();
        info!("discovery cache cleared");
    }

    pub fn device_state(&self, id: &DeviceId) -> Option<&crate::state::DeviceState> {
        self.state.get(id)
    }

    fn evaluate_zone(&mut self, id: &DeviceId, now: DateTime<Utc>) -> Option<PresenceUpdate> {
        let pending = self.pending.entry(id.clone()).or_insert(None);
        let state = self.state.get_mut(id)?;
        let publish = zoning::evaluate(state, pending, &self.zoning_params, now);
        if publish { self.emit(id, now) } else { None }
    }

    fn emit(&mut self, id: &DeviceId, now: DateTime<Utc>) -> Option<PresenceUpdate> {
        let device = self.known_devices.get(id)?.clone();
        self.state.set_last_published(id, now);
        let state = self.state.get(id)?;
        Some(PresenceUpdate {
            device,
            present: state.present,
            rssi: state.rssi as i32,
            room: state.room.clone(),
            distance: state.distance,
            last_seen: state.last_seen.timestamp(),
            raw_sources: state
                .sources
                .iter()
                .map(|(sat, reading)| (sat.clone(), reading.raw_rssi))
                .collect(),
        })
    }
}
