use serde::{Deserialize, Serialize};

use crate::signal::DEFAULT_REF_RSSI;

/// A remote observer as persisted in `satellites.json`, keyed by its opaque
/// satellite id. `x`/`y` are floor-plan coordinates consumed only by the
/// admin UI; they must survive a load/save round trip untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Satellite {
    #[serde(default = "unassigned")]
    pub room: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(default = "default_ref_rssi")]
    pub ref_rssi_1m: i32,
    /// Unix seconds of the last persisted sighting.
    #[serde(default)]
    pub last_seen: f64,
}

pub const UNASSIGNED_ROOM: &str = "Unassigned";

fn unassigned() -> String {
    UNASSIGNED_ROOM.to_string()
}

fn default_ref_rssi() -> i32 {
    DEFAULT_REF_RSSI
}

impl Satellite {
    pub fn unassigned(last_seen: f64) -> Satellite {
        Satellite {
            room: unassigned(),
            x: None,
            y: None,
            ref_rssi_1m: DEFAULT_REF_RSSI,
            last_seen,
        }
    }

    /// Zoning name for this satellite: its room, or `Sat:<id>` while it is
    /// still unassigned.
    pub fn room_name(&self, sat_id: &str) -> String {
        if self.room == UNASSIGNED_ROOM {
            format!("Sat:{sat_id}")
        } else {
            self.room.clone()
        }
    }
}
