use anyhow::Result;
use serde_json::json;
use tracing::info;

use gatekeeper_domain::device::{KnownDevice, slugify};
use gatekeeper_domain::identifier::IdKind;

use crate::publisher::PresencePublisher;
use crate::topics::{attribute_topic, state_topic, status_topic};

impl PresencePublisher {
    /// Announce the hub and every tracked device to Home Assistant.
    ///
    /// For each device this first publishes empty retained payloads to the
    /// topic shapes older releases used (spaces-to-underscores only, case
    /// preserved), clearing any stale configs the broker still holds, and
    /// only then writes the current ones.
    pub async fn publish_discovery(&self, devices: &[KnownDevice]) -> Result<()> {
        let hub_id = format!("gk_{}_hub", self.identity);
        let hub_device = json!({
            "identifiers": [hub_id.clone()],
            "name": format!("Gatekeeper Hub ({})", self.identity),
            "manufacturer": "Gatekeeper",
            "model": "Gatekeeper Hub",
            "sw_version": env!("CARGO_PKG_VERSION"),
        });
        let status = status_topic(&self.prefix, &self.identity);
        self.retain(
            &format!("homeassistant/binary_sensor/{hub_id}/config"),
            serde_json::to_vec(&json!({
                "name": "Status",
                "unique_id": hub_id.clone(),
                "state_topic": status.clone(),
                "payload_on": "online",
                "payload_off": "offline",
                "device_class": "connectivity",
                "device": hub_device,
            }))?,
        )
        .await?;
        self.retain(&status, b"online".to_vec()).await?;

        for device in devices {
            self.publish_device_discovery(device, &hub_id).await?;
        }
        Ok(())
    }

    async fn publish_device_discovery(&self, device: &KnownDevice, hub_id: &str) -> Result<()> {
        let alias = &device.alias;

        // Legacy node ids kept the alias casing and dashes.
        let old_node = format!("gk_{}_{}", self.identity, alias.replace(' ', "_"));
        self.retain(
            &format!("homeassistant/device_tracker/{old_node}/config"),
            Vec::new(),
        )
        .await?;
        for sensor in ["room", "distance", "rssi"] {
            self.retain(
                &format!("homeassistant/sensor/{old_node}_{sensor}/config"),
                Vec::new(),
            )
            .await?;
        }

        let slug = slugify(alias);
        let node_id = format!("gk_{}_{}", self.identity, slug);
        // An earlier scheme used the slugged node id with a different
        // unique_id; clear that tracker config too.
        self.retain(
            &format!("homeassistant/device_tracker/{node_id}/config"),
            Vec::new(),
        )
        .await?;

        let state = state_topic(&self.prefix, &self.identity, &slug);
        let attributes = attribute_topic(&self.prefix, &self.identity, &slug);
        let device_info = json!({
            "identifiers": [format!("device_{node_id}")],
            "name": alias,
            "manufacturer": "Gatekeeper",
            "model": "Generic Tracked Device",
            "via_device": hub_id,
        });

        self.retain(
            &format!("homeassistant/device_tracker/{node_id}/config"),
            serde_json::to_vec(&json!({
                "name": "Presence",
                "unique_id": format!("{node_id}_presence"),
                "state_topic": state.clone(),
                "payload_home": "home",
                "payload_not_home": "not_home",
                "source_type": "bluetooth",
                "json_attributes_topic": attributes.clone(),
                "icon": if device.id_kind() == IdKind::Mac { "mdi:bluetooth" } else { "mdi:identifier-variant" },
                "device": device_info.clone(),
            }))?,
        )
        .await?;

        self.retain(
            &format!("homeassistant/sensor/{node_id}_room/config"),
            serde_json::to_vec(&json!({
                "name": "Room",
                "unique_id": format!("{node_id}_room"),
                "state_topic": attributes.clone(),
                "value_template": "{{ value_json.room }}",
                "icon": "mdi:room-service",
                "device": device_info.clone(),
            }))?,
        )
        .await?;

        self.retain(
            &format!("homeassistant/sensor/{node_id}_distance/config"),
            serde_json::to_vec(&json!({
                "name": "Distance",
                "unique_id": format!("{node_id}_distance"),
                "state_topic": attributes.clone(),
                "value_template": "{{ value_json.distance if value_json.distance != -1 else 'N/A' }}",
                "unit_of_measurement": "m",
                "icon": "mdi:ruler",
                "device": device_info.clone(),
            }))?,
        )
        .await?;

        self.retain(
            &format!("homeassistant/sensor/{node_id}_rssi/config"),
            serde_json::to_vec(&json!({
                "name": "RSSI",
                "unique_id": format!("{node_id}_rssi"),
                "state_topic": attributes,
                "value_template": "{{ value_json.rssi }}",
                "unit_of_measurement": "dBm",
                "device_class": "signal_strength",
                "icon": "mdi:signal",
                "device": device_info,
            }))?,
        )
        .await?;

        info!(alias = %alias, "published discovery configs");
        Ok(())
    }

    async fn retain(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.sink.publish(topic, payload, true).await
    }
}
