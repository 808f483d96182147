use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tempfile::NamedTempFile;
use tracing::error;

use gatekeeper_domain::device::KnownDevice;
use gatekeeper_domain::satellite::Satellite;

use crate::settings::{MqttSettings, Settings};

const DEVICES_FILE: &str = "devices.json";
const SATELLITES_FILE: &str = "satellites.json";
const SETTINGS_FILE: &str = "settings.json";
const MQTT_FILE: &str = "mqtt.json";

/// On-disk JSON configuration, one document per concern, under
/// `<base>/config/`. All file access is serialised through the store's own
/// lock; writes go to a temp file that is fsynced and renamed into place so
/// a crash can never leave a half-written document.
pub struct ConfigStore {
    config_dir: PathBuf,
    lock: Mutex<()>,
}

impl ConfigStore {
    /// Fails if the config directory cannot be created; the process cannot
    /// run without it.
    pub fn open(base_path: &Path) -> Result<ConfigStore> {
        let config_dir = base_path.join("config");
        fs::create_dir_all(&config_dir)
            .with_context(|| format!("creating config dir {}", config_dir.display()))?;
        Ok(ConfigStore {
            config_dir,
            lock: Mutex::new(()),
        })
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Known devices, or empty on a missing or unparseable file.
    pub fn list_devices(&self) -> Vec<KnownDevice> {
        self.load_or(DEVICES_FILE, Vec::new)
    }

    pub fn save_devices(&self, devices: &[KnownDevice]) -> Result<()> {
        self.write_atomic(DEVICES_FILE, &devices)
    }

    /// Satellite records keyed by satellite id, or empty on a missing or
    /// unparseable file.
    pub fn list_satellites(&self) -> BTreeMap<String, Satellite> {
        self.load_or(SATELLITES_FILE, BTreeMap::new)
    }

    pub fn save_satellites(&self, satellites: &BTreeMap<String, Satellite>) -> Result<()> {
        self.write_atomic(SATELLITES_FILE, satellites)
    }

    /// Settings merged over their defaults; defaults alone on a missing or
    /// unparseable file.
    pub fn load_settings(&self) -> Settings {
        let overrides: Map<String, Value> = self.load_or(SETTINGS_FILE, Map::new);
        Settings::from_overrides(overrides)
    }

    pub fn save_settings(&self, settings: &Settings) -> Result<()> {
        self.write_atomic(SETTINGS_FILE, settings)
    }

    /// Broker settings merged over their defaults.
    pub fn load_mqtt(&self) -> MqttSettings {
        self.load_or(MQTT_FILE, MqttSettings::default)
    }

    pub fn save_mqtt(&self, mqtt: &MqttSettings) -> Result<()> {
        self.write_atomic(MQTT_FILE, mqtt)
    }

    fn load_or<T, F>(&self, file: &str, fallback: F) -> T
    where
        T: DeserializeOwned,
        F: FnOnce() -> T,
    {
        let path = self.config_dir.join(file);
        if !path.exists() {
            return fallback();
        }
        let _guard = self.lock.lock();
        match fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(value) => value,
                Err(err) => {
                    error!(file, %err, "unparseable config document, using defaults");
                    fallback()
                }
            },
            Err(err) => {
                error!(file, %err, "unreadable config document, using defaults");
                fallback()
            }
        }
    }

    fn write_atomic<T: Serialize>(&self, file: &str, value: &T) -> Result<()> {
        let path = self.config_dir.join(file);
        let json = serde_json::to_vec_pretty(value)?;
        let _guard = self.lock.lock();
        let mut tmp = NamedTempFile::new_in(&self.config_dir)
            .with_context(|| format!("creating temp file for {file}"))?;
        tmp.write_all(&json)?;
        tmp.flush()?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path)
            .with_context(|| format!("renaming temp file over {file}"))?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::ConfigStore;
    use gatekeeper_domain::device::KnownDevice;
    use gatekeeper_domain::identifier::DeviceId;
    use gatekeeper_domain::satellite::Satellite;
    use std::collections::BTreeMap;

    fn store() -> (tempfile::TempDir, ConfigStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn missing_files_yield_defaults() {
        let (_dir, store) = store();
        assert!(store.list_devices().is_empty());
        assert!(store.list_satellites().is_empty());
        assert_eq!(store.load_settings().beacon_expiration_secs(), 60);
        assert_eq!(store.load_mqtt().broker, "localhost");
    }

    #[test]
    fn devices_round_trip() {
        let (_dir, store) = store();
        let devices = vec![KnownDevice::new(
            &DeviceId::mac("aa:bb:cc:dd:ee:01"),
            "Phone",
            "Bluetooth",
        )];
        store.save_devices(&devices).unwrap();
        let loaded = store.list_devices();
        assert_eq!(loaded.len(), 1);
        assert_eq!(
            loaded[0].device_id(),
            Some(DeviceId::mac("AA:BB:CC:DD:EE:01"))
        );
        assert_eq!(loaded[0].alias, "Phone");
    }

    #[test]
    fn satellites_round_trip_preserves_layout_fields() {
        let (_dir, store) = store();
        let mut sats = BTreeMap::new();
        sats.insert(
            "kitchen-pi".to_string(),
            Satellite {
                room: "Kitchen".to_string(),
                x: Some(2.5),
                y: Some(0.75),
                ref_rssi_1m: -61,
                last_seen: 1700000000.25,
            },
        );
        store.save_satellites(&sats).unwrap();
        assert_eq!(store.list_satellites(), sats);
    }

    #[test]
    fn corrupt_file_falls_back_to_empty() {
        let (dir, store) = store();
        std::fs::write(dir.path().join("config/devices.json"), b"{not json").unwrap();
        assert!(store.list_devices().is_empty());
    }

    #[test]
    fn settings_round_trip_keeps_unknown_keys() {
        let (dir, store) = store();
        std::fs::write(
            dir.path().join("config/settings.json"),
            br#"{"PREF_BEACON_EXPIRATION":"90","PREF_CUSTOM":"x"}"#,
        )
        .unwrap();
        let settings = store.load_settings();
        assert_eq!(settings.beacon_expiration_secs(), 90);
        store.save_settings(&settings).unwrap();
        let again = store.load_settings();
        assert_eq!(again.extra["PREF_CUSTOM"], serde_json::json!("x"));
    }
}
