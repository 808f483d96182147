use serde::Deserialize;
use tracing::debug;

use gatekeeper_domain::identifier::DeviceId;
use gatekeeper_domain::observation::Advertisement;

/// Wildcard every satellite publishes under.
pub fn subscription_filter(prefix: &str) -> String {
    format!("{prefix}/satellite/#")
}

/// `home`/`not_home` state topic for one tracked device.
pub fn state_topic(prefix: &str, identity: &str, alias_slug: &str) -> String {
    format!("{prefix}/{identity}/{alias_slug}/device_tracker")
}

/// JSON attribute topic for one tracked device.
pub fn attribute_topic(prefix: &str, identity: &str, alias_slug: &str) -> String {
    format!("{prefix}/{identity}/{alias_slug}")
}

/// Hub online/offline topic.
pub fn status_topic(prefix: &str, identity: &str) -> String {
    format!("{prefix}/{identity}/status")
}

/// A recognised message under `<prefix>/satellite/#`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    Observation {
        sat_id: String,
        advertisement: Advertisement,
    },
    Health {
        sat_id: String,
        sensor: String,
        value: String,
    },
}

#[derive(Deserialize)]
struct BeaconPayload {
    #[serde(default = "missing_rssi")]
    rssi: i32,
    #[serde(default)]
    major: Option<u16>,
    #[serde(default)]
    minor: Option<u16>,
}

fn missing_rssi() -> i32 {
    -100
}

/// Parse one bus message. Three shapes are recognised:
///
/// - `<prefix>/satellite/<sat>/<MAC>` with a decimal RSSI payload,
/// - `<prefix>/satellite/<sat>/uuid/<UUID>` with a JSON
///   `{rssi, major?, minor?}` payload,
/// - `<prefix>/satellite/<sat>/health/<sensor>` with an opaque value.
///
/// Anything else is dropped after a debug log; satellites re-send, so a
/// malformed sample is never worth retrying.
pub fn parse_inbound(topic: &str, payload: &[u8]) -> Option<InboundMessage> {
    let parts: Vec<&str> = topic.split('/').collect();
    if parts.len() < 4 || parts[1] != "satellite" || parts[2].is_empty() {
        debug!(topic, "unrecognised topic shape");
        return None;
    }
    let sat_id = parts[2].to_string();
    match parts[3] {
        "uuid" if parts.len() == 5 => {
            let beacon: BeaconPayload = match serde_json::from_slice(payload) {
                Ok(beacon) => beacon,
                Err(err) => {
                    debug!(topic, %err, "invalid beacon payload");
                    return None;
                }
            };
            Some(InboundMessage::Observation {
                sat_id,
                advertisement: Advertisement {
                    identifier: DeviceId::uuid(parts[4]),
                    rssi: beacon.rssi,
                    name: None,
                    major: beacon.major,
                    minor: beacon.minor,
                },
            })
        }
        "health" if parts.len() == 5 => Some(InboundMessage::Health {
            sat_id,
            sensor: parts[4].to_string(),
            value: String::from_utf8_lossy(payload).into_owned(),
        }),
        mac if parts.len() == 4 => {
            let text = std::str::from_utf8(payload).ok()?;
            let Ok(rssi) = text.trim().parse::<f64>() else {
                debug!(topic, "non-numeric RSSI payload");
                return None;
            };
            Some(InboundMessage::Observation {
                sat_id,
                advertisement: Advertisement::new(DeviceId::mac(mac), rssi as i32),
            })
        }
        _ => {
            debug!(topic, "unrecognised topic depth");
            None
        }
    }
}
