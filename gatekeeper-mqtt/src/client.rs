use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use gatekeeper_config::MqttSettings;
use gatekeeper_tracker::service::TrackerHandle;

use crate::publisher::MessageSink;
use crate::topics::{InboundMessage, parse_inbound, subscription_filter};

/// The bus connection: a shared publish client plus a background task
/// that polls the event loop, resubscribes after every reconnect and
/// feeds recognised satellite messages into the tracker queue.
#[derive(Clone)]
pub struct MqttTransport {
    client: AsyncClient,
}

impl MqttTransport {
    pub fn connect(
        settings: &MqttSettings,
        tracker: TrackerHandle,
        mut shutdown: watch::Receiver<bool>,
    ) -> (MqttTransport, JoinHandle<()>) {
        let client_id = format!(
            "{}_{}",
            settings.identity,
            &Uuid::new_v4().simple().to_string()[..8]
        );
        let mut options = MqttOptions::new(client_id, &settings.broker, settings.port);
        options.set_keep_alive(Duration::from_secs(30));
        if !settings.user.is_empty() {
            options.set_credentials(&settings.user, &settings.password);
        }

        let (client, mut event_loop) = AsyncClient::new(options, 64);
        let filter = subscription_filter(&settings.topic_prefix);
        let subscriber = client.clone();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                    event = event_loop.poll() => match event {
                        Ok(Event::Incoming(Packet::ConnAck(_))) => {
                            info!(filter = %filter, "connected to broker, subscribing");
                            if let Err(err) = subscriber.subscribe(&filter, QoS::AtMostOnce).await {
                                warn!(%err, "subscribe failed");
                            }
                        }
                        Ok(Event::Incoming(Packet::Publish(publish))) => {
                            dispatch(&tracker, &publish.topic, &publish.payload).await;
                        }
                        Ok(_) => {}
                        Err(err) => {
                            warn!(%err, "broker connection lost, retrying");
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                    }
                }
            }
            debug!("bus task stopped");
        });

        (MqttTransport { client }, task)
    }

    pub async fn disconnect(&self) {
        if let Err(err) = self.client.disconnect().await {
            debug!(%err, "disconnect after shutdown");
        }
    }
}

async fn dispatch(tracker: &TrackerHandle, topic: &str, payload: &[u8]) {
    match parse_inbound(topic, payload) {
        Some(InboundMessage::Observation {
            sat_id,
            advertisement,
        }) => tracker.observe(&sat_id, advertisement).await,
        Some(InboundMessage::Health {
            sat_id,
            sensor,
            value,
        }) => tracker.health(&sat_id, &sensor, &value).await,
        None => {}
    }
}

#[async_trait]
impl MessageSink for MqttTransport {
    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<()> {
        self.client
            .publish(topic, QoS::AtMostOnce, retain, payload)
            .await?;
        Ok(())
    }
}
