use serde::{Deserialize, Serialize};

use crate::identifier::DeviceId;

/// One advertisement sighting, as handed to the fusion engine by the local
/// scanner or the satellite subscription. `major`/`minor` are only present
/// for iBeacon frames; `name` only when the frame carried a local name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advertisement {
    pub identifier: DeviceId,
    pub rssi: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub major: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minor: Option<u16>,
}

impl Advertisement {
    pub fn new(identifier: DeviceId, rssi: i32) -> Advertisement {
        Advertisement {
            identifier,
            rssi,
            name: None,
            major: None,
            minor: None,
        }
    }
}

