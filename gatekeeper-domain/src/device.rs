use serde::{Deserialize, Serialize};

use crate::identifier::{DeviceId, IdKind};

/// A device the tracker is configured to follow, as stored in
/// `devices.json`. Older config files carry a bare `mac` field instead of
/// the `identifier`/`identifier_type` pair; both shapes are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownDevice {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(
        default,
        rename = "identifier_type",
        skip_serializing_if = "Option::is_none"
    )]
    pub kind: Option<IdKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
    pub alias: String,
    #[serde(default, rename = "type")]
    pub device_type: String,
}

impl KnownDevice {
    pub fn new(id: &DeviceId, alias: &str, device_type: &str) -> KnownDevice {
        KnownDevice {
            identifier: Some(id.as_str().to_string()),
            kind: Some(id.kind()),
            mac: None,
            alias: alias.to_string(),
            device_type: device_type.to_string(),
        }
    }

    /// Canonical identity for state keying. `None` if the record carries
    /// neither an `identifier` nor a legacy `mac`.
    pub fn device_id(&self) -> Option<DeviceId> {
        if let Some(raw) = &self.identifier {
            Some(DeviceId::new(self.kind.unwrap_or(IdKind::Mac), raw))
        } else {
            self.mac.as_deref().map(DeviceId::mac)
        }
    }

    pub fn id_kind(&self) -> IdKind {
        self.kind.unwrap_or(IdKind::Mac)
    }

    /// Topic-safe alias: spaces and dashes become underscores, lower case.
    pub fn alias_slug(&self) -> String {
        slugify(&self.alias)
    }
}

pub fn slugify(alias: &str) -> String {
    alias.replace([' ', '-'], "_").to_lowercase()
}
