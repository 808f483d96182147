use serde_json::{Map, Value};
use serde::{Deserialize, Serialize};

/// Seconds without a sighting after which a present device departs.
pub const BEACON_EXPIRATION_DEFAULT: u64 = 60;
pub const BEACON_EXPIRATION_MIN: u64 = 15;
pub const BEACON_EXPIRATION_MAX: u64 = 300;

/// `settings.json`. The tracker core only interprets
/// `PREF_BEACON_EXPIRATION`; every other key is carried verbatim for the
/// surrounding collaborators, so unknown keys survive a load/save cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(rename = "PREF_BEACON_EXPIRATION")]
    pub beacon_expiration: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for Settings {
    fn default() -> Settings {
        let mut extra = Map::new();
        extra.insert("PREF_INTER_SCAN_DELAY".into(), Value::from("60"));
        extra.insert("PREF_ARRIVAL_SCAN_ATTEMPTS".into(), Value::from("1"));
        extra.insert("PREF_DEPART_SCAN_ATTEMPTS".into(), Value::from("2"));
        extra.insert("PREF_FAIL_OBSERVATION_TO_DEPART".into(), Value::from("1"));
        extra.insert("PREF_DEVICE_TRACKER_REPORT".into(), Value::from("true"));
        extra.insert("PREF_ENABLE_LOGGING".into(), Value::from("false"));
        Settings {
            beacon_expiration: Value::from(BEACON_EXPIRATION_DEFAULT.to_string()),
            extra,
        }
    }
}

impl Settings {
    /// Defaults overlaid with whatever keys the file carried, mirroring a
    /// dict-update merge.
    pub fn from_overrides(overrides: Map<String, Value>) -> Settings {
        let mut base = Settings::default();
        for (key, value) in overrides {
            if key == "PREF_BEACON_EXPIRATION" {
                base.beacon_expiration = value;
            } else {
                base.extra.insert(key, value);
            }
        }
        base
    }

    /// The beacon expiration in seconds, clamped to its legal range. The
    /// stored value may be a JSON number or a numeric string.
    pub fn beacon_expiration_secs(&self) -> u64 {
        let raw = match &self.beacon_expiration {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse::<u64>().ok(),
            _ => None,
        };
        raw.unwrap_or(BEACON_EXPIRATION_DEFAULT)
            .clamp(BEACON_EXPIRATION_MIN, BEACON_EXPIRATION_MAX)
    }
}

/// `mqtt.json`: broker location, credentials and the topic conventions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttSettings {
    pub broker: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub topic_prefix: String,
    /// The `<identity>` segment of every outbound topic.
    pub identity: String,
}

impl Default for MqttSettings {
    fn default() -> MqttSettings {
        MqttSettings {
            broker: "localhost".to_string(),
            port: 1883,
            user: String::new(),
            password: String::new(),
            topic_prefix: "gatekeeper".to_string(),
            identity: "gatekeeper".to_string(),
        }
    }
}
