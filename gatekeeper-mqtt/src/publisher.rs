use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use gatekeeper_config::MqttSettings;
use gatekeeper_domain::identifier::IdKind;
use gatekeeper_tracker::events::PresenceUpdate;
use gatekeeper_tracker::service::UpdateSink;

use crate::topics::{attribute_topic, state_topic};

/// Outbound side of the bus, narrowed to what the publisher needs so
/// tests can swap in a recorder.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<()>;
}

/// The retained attribute document accompanying every state publish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDocument {
    pub rssi: i32,
    pub identifier: String,
    pub id_type: IdKind,
    pub source_type: String,
    /// 100 while present, 0 after departure.
    pub confidence: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
    pub room: String,
    pub distance: f64,
    /// Unix seconds of the newest sighting.
    pub last_seen: i64,
    /// Latest raw RSSI per satellite.
    pub raw_sources: BTreeMap<String, i32>,
}

impl AttributeDocument {
    pub fn from_update(update: &PresenceUpdate) -> AttributeDocument {
        // The identifier echoes the configured record verbatim, casing
        // included; only state keys are canonicalised.
        let identifier = update
            .device
            .identifier
            .clone()
            .or_else(|| update.device.mac.clone())
            .unwrap_or_default();
        let id_type = update.device.id_kind();
        AttributeDocument {
            rssi: update.rssi,
            identifier: identifier.clone(),
            id_type,
            source_type: "bluetooth".to_string(),
            confidence: if update.present { 100 } else { 0 },
            mac: (id_type == IdKind::Mac).then_some(identifier),
            room: update.room.clone(),
            distance: update.distance,
            last_seen: update.last_seen,
            raw_sources: update.raw_sources.clone(),
        }
    }
}

/// Emits the retained presence contract for one hub identity.
pub struct PresencePublisher {
    pub(crate) sink: Arc<dyn MessageSink>,
    pub(crate) prefix: String,
    pub(crate) identity: String,
}

impl PresencePublisher {
    pub fn new(sink: Arc<dyn MessageSink>, settings: &MqttSettings) -> PresencePublisher {
        PresencePublisher {
            sink,
            prefix: settings.topic_prefix.clone(),
            identity: settings.identity.clone(),
        }
    }

    pub async fn publish_update(&self, update: &PresenceUpdate) -> Result<()> {
        let slug = update.device.alias_slug();
        let state = if update.present { "home" } else { "not_home" };
        self.sink
            .publish(
                &state_topic(&self.prefix, &self.identity, &slug),
                state.as_bytes().to_vec(),
                true,
            )
            .await?;
        let document = AttributeDocument::from_update(update);
        self.sink
            .publish(
                &attribute_topic(&self.prefix, &self.identity, &slug),
                serde_json::to_vec(&document)?,
                true,
            )
            .await
    }
}

#[async_trait]
impl UpdateSink for PresencePublisher {
    async fn publish(&self, update: &PresenceUpdate) -> Result<()> {
        self.publish_update(update).await
    }
}


#[cfg(test)]
mod test {
    use super::test_support::RecordingSink;
    use super::{AttributeDocument, PresencePublisher};
    use gatekeeper_config::MqttSettings;
    use gatekeeper_domain::device::KnownDevice;
    use gatekeeper_domain::identifier::{DeviceId, IdKind};
    use gatekeeper_tracker::events::PresenceUpdate;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn update(present: bool) -> PresenceUpdate {
        let mut raw_sources = BTreeMap::new();
        raw_sources.insert("s1".to_string(), -60);
        raw_sources.insert("gatekeeper-hub".to_string(), -72);
        PresenceUpdate {
            device: KnownDevice::new(&DeviceId::mac("AA:BB:CC:DD:EE:01"), "Alice Phone", "Bluetooth"),
            present,
            rssi: -60,
            room: if present { "Kitchen".to_string() } else { "not_home".to_string() },
            distance: if present { 1.1 } else { -1.0 },
            last_seen: 1700000000,
            raw_sources,
        }
    }

    #[tokio::test]
    async fn state_and_attributes_are_retained() {
        let sink = Arc::new(RecordingSink::default());
        let publisher = PresencePublisher::new(sink.clone(), &MqttSettings::default());
        publisher.publish_update(&update(true)).await.unwrap();

        let messages = sink.messages.lock().unwrap();
        assert_eq!(messages.len(), 2);
        let (topic, payload, retain) = &messages[0];
        assert_eq!(topic, "gatekeeper/gatekeeper/alice_phone/device_tracker");
        assert_eq!(payload, b"home");
        assert!(retain);
        let (topic, payload, retain) = &messages[1];
        assert_eq!(topic, "gatekeeper/gatekeeper/alice_phone");
        assert!(retain);
        let doc: AttributeDocument = serde_json::from_slice(payload).unwrap();
        assert_eq!(doc.room, "Kitchen");
        assert_eq!(doc.confidence, 100);
        assert_eq!(doc.raw_sources["s1"], -60);
        assert_eq!(doc.mac.as_deref(), Some("AA:BB:CC:DD:EE:01"));
        assert_eq!(doc.id_type, IdKind::Mac);
    }

    #[tokio::test]
    async fn departure_publishes_not_home_with_zero_confidence() {
        let sink = Arc::new(RecordingSink::default());
        let publisher = PresencePublisher::new(sink.clone(), &MqttSettings::default());
        publisher.publish_update(&update(false)).await.unwrap();

        let messages = sink.messages.lock().unwrap();
        assert_eq!(messages[0].1, b"not_home");
        let doc: AttributeDocument = serde_json::from_slice(&messages[1].1).unwrap();
        assert_eq!(doc.confidence, 0);
        assert_eq!(doc.room, "not_home");
        assert_eq!(doc.distance, -1.0);
    }

    #[test]
    fn attribute_document_round_trips() {
        let doc = AttributeDocument::from_update(&update(true));
        let encoded = serde_json::to_vec(&doc).unwrap();
        let decoded: AttributeDocument = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(decoded, doc);
    }

    #[test]
    fn uuid_document_omits_the_mac_field() {
        let mut u = update(true);
        u.device = KnownDevice::new(
            &DeviceId::uuid("e2c56db5-dffb-48d2-b060-d0f5a71096e0"),
            "Badge",
            "iBeacon",
        );
        let doc = AttributeDocument::from_update(&u);
        assert_eq!(doc.mac, None);
        assert_eq!(doc.id_type, IdKind::Uuid);
        let encoded = serde_json::to_string(&doc).unwrap();
        assert!(!encoded.contains("\"mac\""));
    }
}
