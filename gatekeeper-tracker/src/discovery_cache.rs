use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::Serialize;

use gatekeeper_domain::identifier::DeviceId;
use gatekeeper_domain::observation::Advertisement;

use crate::zoning::age_secs;

/// Hard cap on cached identities.
const MAX_ENTRIES: usize = 200;
/// Entries idle this long are eligible for eviction at the cap.
const IDLE_EVICT_SECS: f64 = 300.0;

/// One identity the radios have seen recently, for the admin UI's
/// "nearby devices" listing. Not consulted by zoning.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryEntry {
    pub identifier: DeviceId,
    /// Strongest RSSI seen from any source.
    pub rssi: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub major: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minor: Option<u16>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub last_seen: DateTime<Utc>,
    /// Latest RSSI per observing satellite.
    pub sources: BTreeMap<String, i32>,
}

#[derive(Debug, Default)]
pub struct DiscoveryCache {
    entries: HashMap<DeviceId, DiscoveryEntry>,
}

impl DiscoveryCache {
    pub fn new() -> DiscoveryCache {
        DiscoveryCache::default()
    }

    pub fn observe(&mut self, sat_id: &str, adv: &Advertisement, now: DateTime<Utc>) {
        if !self.entries.contains_key(&adv.identifier) && self.entries.len() >= MAX_ENTRIES {
            self.evict(now);
        }
        match self.entries.entry(adv.identifier.clone()) {
            Entry::Occupied(occupied) => {
                let entry = occupied.into_mut();
                entry.rssi = entry.rssi.max(adv.rssi);
                entry.last_seen = now;
                entry.sources.insert(sat_id.to_string(), adv.rssi);
                if adv.name.is_some() {
                    entry.name = adv.name.clone();
                }
            }
            Entry::Vacant(vacant) => {
                let mut sources = BTreeMap::new();
                sources.insert(sat_id.to_string(), adv.rssi);
                vacant.insert(DiscoveryEntry {
                    identifier: adv.identifier.clone(),
                    rssi: adv.rssi,
                    name: adv.name.clone(),
                    major: adv.major,
                    minor: adv.minor,
                    last_seen: now,
                    sources,
                });
            }
        }
    }

    /// Drop idle entries; if everything is fresh, drop the oldest so the
    /// cap is never exceeded.
    fn evict(&mut self, now: DateTime<Utc>) {
        self.entries
            .retain(|_, entry| age_secs(now, entry.last_seen) <= IDLE_EVICT_SECS);
        while self.entries.len() >= MAX_ENTRIES {
            let Some(oldest) = self
                .entries
                .values()
                .min_by_key(|entry| entry.last_seen)
                .map(|entry| entry.identifier.clone())
            else {
                break;
            };
            self.entries.remove(&oldest);
        }
    }

    /// Entries ordered strongest first, the way the UI lists them.
    pub fn snapshot(&self) -> Vec<DiscoveryEntry> {
        let mut entries: Vec<DiscoveryEntry> = self.entries.values().cloned().collect();
        entries.sort_by(|a, b| b.rssi.cmp(&a.rssi));
        entries
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::{DiscoveryCache, MAX_ENTRIES};
    use chrono::{DateTime, Duration, Utc};
    use gatekeeper_domain::identifier::DeviceId;
    use gatekeeper_domain::observation::Advertisement;

    fn at(secs: f64) -> DateTime<Utc> {
        DateTime::UNIX_EPOCH + Duration::milliseconds((secs * 1000.0) as i64)
    }

    fn adv(n: u32, rssi: i32) -> Advertisement {
        Advertisement::new(DeviceId::mac(&format!("AA:BB:CC:00:{:02X}:{:02X}", n >> 8, n & 0xFF)), rssi)
    }

    #[test]
    fn keeps_max_rssi_and_merges_sources() {
        let mut cache = DiscoveryCache::new();
        let a = adv(1, -70);
        cache.observe("s1", &a, at(0.0));
        cache.observe("s2", &Advertisement { rssi: -60, ..a.clone() }, at(1.0));
        cache.observe("s1", &Advertisement { rssi: -80, ..a.clone() }, at(2.0));
        let snap = cache.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].rssi, -60);
        assert_eq!(snap[0].sources["s1"], -80);
        assert_eq!(snap[0].sources["s2"], -60);
        assert_eq!(snap[0].last_seen, at(2.0));
    }

    #[test]
    fn name_updates_when_provided() {
        let mut cache = DiscoveryCache::new();
        let mut a = adv(1, -70);
        cache.observe("s1", &a, at(0.0));
        assert_eq!(cache.snapshot()[0].name, None);
        a.name = Some("Tile".to_string());
        cache.observe("s1", &a, at(1.0));
        assert_eq!(cache.snapshot()[0].name.as_deref(), Some("Tile"));
        a.name = None;
        cache.observe("s1", &a, at(2.0));
        assert_eq!(cache.snapshot()[0].name.as_deref(), Some("Tile"));
    }

    #[test]
    fn cap_is_never_exceeded() {
        let mut cache = DiscoveryCache::new();
        for n in 0..400 {
            cache.observe("s1", &adv(n, -70), at(f64::from(n)));
            assert!(cache.len() <= MAX_ENTRIES);
        }
    }

    #[test]
    fn idle_entries_are_evicted_before_fresh_ones() {
        let mut cache = DiscoveryCache::new();
        // 200 entries seen at t=0, idle by t=400
        for n in 0..200 {
            cache.observe("s1", &adv(n, -70), at(0.0));
        }
        cache.observe("s1", &adv(999, -50), at(400.0));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.snapshot()[0].rssi, -50);
    }

    #[test]
    fn freshest_survive_when_everything_is_recent() {
        let mut cache = DiscoveryCache::new();
        for n in 0..200 {
            cache.observe("s1", &adv(n, -70), at(f64::from(n) / 10.0));
        }
        cache.observe("s1", &adv(999, -50), at(25.0));
        assert_eq!(cache.len(), 200);
        // the oldest (t=0.0) entry made room
        let snap = cache.snapshot();
        assert!(snap.iter().any(|e| e.rssi == -50));
    }
}
