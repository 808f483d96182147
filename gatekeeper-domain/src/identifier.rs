use serde::{Deserialize, Serialize};

/// Identity of a tracked device as it appears on the air: either a
/// Bluetooth MAC address or an iBeacon proximity UUID.
///
/// MAC addresses are canonicalised to upper case on construction, so
/// equality and hashing are case-insensitive for free. UUIDs keep their
/// source casing and compare byte-for-byte.
#[derive(Hash, Eq, PartialEq, Ord, PartialOrd, Debug, Clone)]
pub enum DeviceId {
    Mac(String),
    Uuid(String),
}

#[derive(Hash, Eq, PartialEq, Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdKind {
    Mac,
    Uuid,
}

impl DeviceId {
    pub fn mac(raw: &str) -> DeviceId {
        DeviceId::Mac(raw.to_uppercase())
    }

    pub fn uuid(raw: &str) -> DeviceId {
        DeviceId::Uuid(raw.to_string())
    }

    pub fn new(kind: IdKind, raw: &str) -> DeviceId {
        match kind {
            IdKind::Mac => DeviceId::mac(raw),
            IdKind::Uuid => DeviceId::uuid(raw),
        }
    }

    pub fn kind(&self) -> IdKind {
        match self {
            DeviceId::Mac(_) => IdKind::Mac,
            DeviceId::Uuid(_) => IdKind::Uuid,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            DeviceId::Mac(s) | DeviceId::Uuid(s) => s,
        }
    }

    /// Whether `raw` has the 36-char dashed UUID form.
    pub fn looks_like_uuid(raw: &str) -> bool {
        raw.len() == 36 && uuid::Uuid::try_parse(raw).is_ok()
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for DeviceId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for DeviceId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<DeviceId, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if DeviceId::looks_like_uuid(&raw) {
            Ok(DeviceId::Uuid(raw))
        } else {
            Ok(DeviceId::mac(&raw))
        }
    }
}
