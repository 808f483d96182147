use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use gatekeeper_config::ConfigStore;
use gatekeeper_domain::satellite::Satellite;
use gatekeeper_domain::signal::DEFAULT_REF_RSSI;

/// Seconds between persisted `last_seen` refreshes per satellite.
const LAST_SEEN_THROTTLE: f64 = 60.0;

/// In-memory view of the satellite store. New satellites are registered as
/// `Unassigned` on first sight; for known ones the persisted `last_seen`
/// is refreshed at most once a minute so a chatty satellite cannot turn
/// into a disk-write loop.
pub struct SatelliteRegistry {
    store: Arc<ConfigStore>,
    satellites: BTreeMap<String, Satellite>,
}

impl SatelliteRegistry {
    pub fn new(store: Arc<ConfigStore>) -> SatelliteRegistry {
        let satellites = store.list_satellites();
        SatelliteRegistry { store, satellites }
    }

    /// Re-read the persisted set (admin edits rooms and references there).
    pub fn reload(&mut self) {
        self.satellites = self.store.list_satellites();
    }

    /// Note a sighting of `sat_id`.
    pub fn touch(&mut self, sat_id: &str, now: DateTime<Utc>) {
        let now_secs = now.timestamp_millis() as f64 / 1000.0;
        if !self.satellites.contains_key(sat_id) {
            // Unseen in memory; another writer may have added it on disk.
            self.satellites = self.store.list_satellites();
            if !self.satellites.contains_key(sat_id) {
                info!(satellite = sat_id, "new satellite registered");
                self.satellites
                    .insert(sat_id.to_string(), Satellite::unassigned(now_secs));
                self.persist();
            }
            return;
        }
        let mut refreshed = false;
        if let Some(sat) = self.satellites.get_mut(sat_id)
            && now_secs - sat.last_seen > LAST_SEEN_THROTTLE
        {
            sat.last_seen = now_secs;
            refreshed = true;
        }
        if refreshed {
            self.persist();
        }
    }

    /// `(room name for zoning, 1 m reference RSSI)` for a satellite. An
    /// unknown id gets the unassigned defaults.
    pub fn lookup(&self, sat_id: &str) -> (String, i32) {
        match self.satellites.get(sat_id) {
            Some(sat) => (sat.room_name(sat_id), sat.ref_rssi_1m),
            None => (format!("Sat:{sat_id}"), DEFAULT_REF_RSSI),
        }
    }

    pub fn contains(&self, sat_id: &str) -> bool {
        self.satellites.contains_key(sat_id)
    }

    fn persist(&self) {
        if let Err(err) = self.store.save_satellites(&self.satellites) {
            warn!(%err, "failed to save satellites, continuing with in-memory view");
        }
    }
}

#[cfg(test)]
mod test {
    use super::SatelliteRegistry;
    use chrono::{DateTime, Duration, Utc};
    use gatekeeper_config::ConfigStore;
    use gatekeeper_domain::satellite::Satellite;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn at(secs: f64) -> DateTime<Utc> {
        DateTime::UNIX_EPOCH + Duration::milliseconds((secs * 1000.0) as i64)
    }

    fn store() -> (tempfile::TempDir, Arc<ConfigStore>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ConfigStore::open(dir.path()).unwrap());
        (dir, store)
    }

    #[test]
    fn first_sighting_registers_unassigned() {
        let (_dir, store) = store();
        let mut registry = SatelliteRegistry::new(store.clone());
        registry.touch("kitchen-pi", at(10.0));
        let persisted = store.list_satellites();
        assert_eq!(persisted["kitchen-pi"].room, "Unassigned");
        assert_eq!(persisted["kitchen-pi"].last_seen, 10.0);
        assert_eq!(registry.lookup("kitchen-pi"), ("Sat:kitchen-pi".to_string(), -59));
    }

    #[test]
    fn lookup_uses_persisted_room_and_reference() {
        let (_dir, store) = store();
        let mut sats = BTreeMap::new();
        sats.insert(
            "s1".to_string(),
            Satellite {
                room: "Kitchen".to_string(),
                x: None,
                y: None,
                ref_rssi_1m: -62,
                last_seen: 0.0,
            },
        );
        store.save_satellites(&sats).unwrap();
        let registry = SatelliteRegistry::new(store);
        assert_eq!(registry.lookup("s1"), ("Kitchen".to_string(), -62));
    }

    // At most one save per satellite per minute under a continuous
    // observation stream.
    #[test]
    fn last_seen_writes_are_throttled() {
        let (_dir, store) = store();
        let mut registry = SatelliteRegistry::new(store.clone());
        let mut persisted_stamps = Vec::new();
        // 10 minutes of 10 Hz observations.
        for tenth in 0..6000 {
            let now = at(f64::from(tenth) / 10.0);
            registry.touch("s1", now);
            let stamp = store.list_satellites()["s1"].last_seen;
            if persisted_stamps.last() != Some(&stamp) {
                persisted_stamps.push(stamp);
            }
        }
        // registration plus at most one refresh per 60 s window
        assert!(
            persisted_stamps.len() <= 11,
            "too many persisted stamps: {persisted_stamps:?}"
        );
    }

    #[test]
    fn touch_preserves_layout_and_reference_fields() {
        let (_dir, store) = store();
        let mut sats = BTreeMap::new();
        sats.insert(
            "s1".to_string(),
            Satellite {
                room: "Kitchen".to_string(),
                x: Some(4.0),
                y: Some(2.0),
                ref_rssi_1m: -63,
                last_seen: 0.0,
            },
        );
        store.save_satellites(&sats).unwrap();
        let mut registry = SatelliteRegistry::new(store.clone());
        registry.touch("s1", at(120.0));
        let persisted = store.list_satellites();
        assert_eq!(persisted["s1"].x, Some(4.0));
        assert_eq!(persisted["s1"].y, Some(2.0));
        assert_eq!(persisted["s1"].ref_rssi_1m, -63);
        assert_eq!(persisted["s1"].last_seen, 120.0);
    }
}
